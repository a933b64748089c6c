//! Search document written to the external store.

use serde::{Deserialize, Serialize};

use crate::offering::{Offering, OfferingInstructor, OfferingLocation, OfferingTime};
use crate::record_id::RecordId;

/// Placeholder rendered for attributes that have not been observed yet.
pub const TBA: &str = "TBA";

/// Flattened projection of an offering.
///
/// Every field is required at write time; missing attributes are
/// substituted with [`TBA`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDocument {
    pub id: String,
    pub course_code: String,
    pub course_name: String,
    pub days: String,
    pub time: String,
    pub instructor: String,
    pub location: String,
}

impl SearchDocument {
    /// Build a document from an offering and whatever attributes are known.
    pub fn build(
        id: &RecordId,
        offering: &Offering,
        time: Option<&OfferingTime>,
        location: Option<&OfferingLocation>,
        instructor: Option<&OfferingInstructor>,
    ) -> Self {
        Self {
            id: id.to_string(),
            course_code: offering.course.code.clone(),
            course_name: offering.course.name.clone(),
            days: time.map_or_else(|| TBA.to_string(), |t| t.days.clone()),
            time: time.map_or_else(|| TBA.to_string(), |t| t.time.clone()),
            instructor: instructor.map_or_else(|| TBA.to_string(), |i| i.name.clone()),
            location: location.map_or_else(|| TBA.to_string(), |l| l.display()),
        }
    }

    /// Document for a freshly created offering with no attributes.
    pub fn placeholder(id: &RecordId, offering: &Offering) -> Self {
        Self::build(id, offering, None, None, None)
    }
}
