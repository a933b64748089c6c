//! Change feed events.
//!
//! The change feed delivers each event at least once. Redelivery can
//! happen after a restart or a network partition, so consumers must be
//! idempotent.

use serde::{Deserialize, Serialize};

use crate::offering::{AttributeKind, AttributeValue, Offering};

/// A change notification about an offering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// A new offering appeared
    OfferingCreated { offering: Offering },
    /// An attribute of an offering changed
    AttributeUpdated {
        offering: Offering,
        value: AttributeValue,
        /// Update hashes of the values this one supersedes
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        prior: Vec<String>,
    },
    /// An offering was deleted
    OfferingDeleted { offering: Offering },
}

impl ChangeEvent {
    /// First value of an attribute, superseding nothing.
    pub fn updated(offering: Offering, value: AttributeValue) -> Self {
        ChangeEvent::AttributeUpdated {
            offering,
            value,
            prior: Vec::new(),
        }
    }

    /// An attribute update superseding `prior`.
    ///
    /// `prior` is expected to be an attribute update of the same offering.
    pub fn superseding(prior: &ChangeEvent, value: AttributeValue) -> Self {
        ChangeEvent::AttributeUpdated {
            offering: prior.offering().clone(),
            value,
            prior: prior.update_hash().into_iter().collect(),
        }
    }

    /// Identity of an attribute update; `None` for other events.
    pub fn update_hash(&self) -> Option<String> {
        match self {
            ChangeEvent::AttributeUpdated { value, prior, .. } => Some(value.update_hash(prior)),
            _ => None,
        }
    }

    pub fn offering(&self) -> &Offering {
        match self {
            ChangeEvent::OfferingCreated { offering }
            | ChangeEvent::AttributeUpdated { offering, .. }
            | ChangeEvent::OfferingDeleted { offering } => offering,
        }
    }

    /// Topic a subscriber must listen on to receive this event.
    pub fn topic(&self) -> FeedTopic {
        match self {
            ChangeEvent::OfferingCreated { .. } => FeedTopic::Created,
            ChangeEvent::AttributeUpdated { value, .. } => FeedTopic::Attribute(value.kind()),
            ChangeEvent::OfferingDeleted { .. } => FeedTopic::Deleted,
        }
    }
}

/// Subscription filter over the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedTopic {
    Created,
    Attribute(AttributeKind),
    Deleted,
}

impl FeedTopic {
    pub const ALL: [FeedTopic; 5] = [
        FeedTopic::Created,
        FeedTopic::Attribute(AttributeKind::Time),
        FeedTopic::Attribute(AttributeKind::Location),
        FeedTopic::Attribute(AttributeKind::Instructor),
        FeedTopic::Deleted,
    ];
}

impl std::fmt::Display for FeedTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedTopic::Created => write!(f, "created"),
            FeedTopic::Attribute(kind) => write!(f, "{}", kind),
            FeedTopic::Deleted => write!(f, "deleted"),
        }
    }
}
