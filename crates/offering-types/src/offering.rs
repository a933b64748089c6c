//! Offerings and their attachable attributes.
//!
//! An offering is a course taught in a semester. Its identity fields
//! (course, semester, instance guid) never change; time, location and
//! instructor evolve independently and arrive as separate change events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record_id::{encode_url_safe, CanonicalHasher, RecordId};

/// A course in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Course {
    /// Catalog code, e.g. "CS 101"
    pub code: String,
    /// Human readable course name
    pub name: String,
}

impl Course {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

/// An academic term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Semester {
    pub year: i32,
    /// Term name, e.g. "Spring"
    pub term: String,
}

impl Semester {
    pub fn new(year: i32, term: impl Into<String>) -> Self {
        Self {
            year,
            term: term.into(),
        }
    }
}

/// A course offered in a semester.
///
/// All fields are identity fields: two offerings with equal fields are the
/// same offering and share a [`RecordId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Offering {
    pub course: Course,
    pub semester: Semester,
    /// Opaque instance identifier distinguishing sections of one course
    pub guid: Uuid,
}

impl Offering {
    pub fn new(course: Course, semester: Semester, guid: Uuid) -> Self {
        Self {
            course,
            semester,
            guid,
        }
    }

    /// Compute the stable record id for this offering.
    ///
    /// The id is a content hash of the identity fields only, so it is the
    /// same for every delivery of the same offering.
    pub fn record_id(&self) -> RecordId {
        let hash = CanonicalHasher::new()
            .field(&self.course.code)
            .field(&self.course.name)
            .field(self.semester.year.to_le_bytes())
            .field(&self.semester.term)
            .field(self.guid.as_bytes())
            .finish();
        RecordId::from_hash(&hash)
    }
}

/// Meeting days and time of an offering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferingTime {
    /// Meeting days, e.g. "MWF"
    pub days: String,
    /// Time of day, e.g. "10:00"
    pub time: String,
}

/// Room an offering meets in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferingLocation {
    pub building: String,
    pub room: String,
}

impl OfferingLocation {
    /// Render as shown in search documents: "{building} {room}".
    pub fn display(&self) -> String {
        format!("{} {}", self.building, self.room)
    }
}

/// Instructor assigned to an offering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferingInstructor {
    /// Display name
    pub name: String,
}

/// Independently evolving facet of an offering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Time,
    Location,
    Instructor,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; 3] = [
        AttributeKind::Time,
        AttributeKind::Location,
        AttributeKind::Instructor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeKind::Time => "time",
            AttributeKind::Location => "location",
            AttributeKind::Instructor => "instructor",
        }
    }
}

impl std::fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value for one attribute kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeValue {
    Time(OfferingTime),
    Location(OfferingLocation),
    Instructor(OfferingInstructor),
}

impl AttributeValue {
    pub fn time(days: impl Into<String>, time: impl Into<String>) -> Self {
        AttributeValue::Time(OfferingTime {
            days: days.into(),
            time: time.into(),
        })
    }

    pub fn location(building: impl Into<String>, room: impl Into<String>) -> Self {
        AttributeValue::Location(OfferingLocation {
            building: building.into(),
            room: room.into(),
        })
    }

    pub fn instructor(name: impl Into<String>) -> Self {
        AttributeValue::Instructor(OfferingInstructor { name: name.into() })
    }

    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Time(_) => AttributeKind::Time,
            AttributeValue::Location(_) => AttributeKind::Location,
            AttributeValue::Instructor(_) => AttributeKind::Instructor,
        }
    }

    /// Content hash of the value alone.
    pub fn fingerprint(&self) -> String {
        self.update_hash(&[])
    }

    /// Hash identifying one update: the value plus the hashes of the
    /// updates it supersedes.
    ///
    /// Setting a value back to an earlier one yields a new hash because
    /// its prior set differs. Prior order does not matter.
    pub fn update_hash(&self, prior: &[String]) -> String {
        let hasher = CanonicalHasher::new().field(self.kind().as_str());
        let hasher = match self {
            AttributeValue::Time(t) => hasher.field(&t.days).field(&t.time),
            AttributeValue::Location(l) => hasher.field(&l.building).field(&l.room),
            AttributeValue::Instructor(i) => hasher.field(&i.name),
        };

        let mut prior: Vec<&str> = prior.iter().map(String::as_str).collect();
        prior.sort_unstable();
        prior.dedup();
        let hasher = hasher.field((prior.len() as u64).to_le_bytes());
        let hasher = prior.into_iter().fold(hasher, |h, p| h.field(p));
        encode_url_safe(&hasher.finish())
    }
}
