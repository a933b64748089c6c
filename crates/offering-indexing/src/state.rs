//! Per-offering attribute state.

use std::collections::HashMap;

use offering_types::{
    AttributeKind, AttributeValue, Offering, OfferingInstructor, OfferingLocation, OfferingTime,
    RecordId, SearchDocument,
};

/// Latest observed value of each attribute kind.
///
/// Values are only ever replaced, never reset to unset. Each kind also
/// remembers the update hash that set it, when known, so replayed
/// updates can tell whether they supersede the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialIndexState {
    pub time: Option<OfferingTime>,
    pub location: Option<OfferingLocation>,
    pub instructor: Option<OfferingInstructor>,
    heads: HashMap<AttributeKind, String>,
}

impl PartialIndexState {
    /// Merge a value, overwriting the prior value of the same kind.
    ///
    /// Returns `false` if the value was already current.
    pub fn apply(&mut self, value: AttributeValue) -> bool {
        self.apply_update(value, None)
    }

    /// Merge a value set by the update `update_hash`.
    ///
    /// Returns `false` if the value was already current.
    pub fn apply_update(&mut self, value: AttributeValue, update_hash: Option<&str>) -> bool {
        let kind = value.kind();
        match update_hash {
            Some(hash) => self.heads.insert(kind, hash.to_string()),
            None => self.heads.remove(&kind),
        };
        match value {
            AttributeValue::Time(t) => replace(&mut self.time, t),
            AttributeValue::Location(l) => replace(&mut self.location, l),
            AttributeValue::Instructor(i) => replace(&mut self.instructor, i),
        }
    }

    /// Merge a value that is known to be written already.
    ///
    /// Fills an unset kind, or replaces the current value when `prior`
    /// names the update that set it. Returns whether the state changed.
    pub fn restore(&mut self, value: AttributeValue, update_hash: &str, prior: &[String]) -> bool {
        let kind = value.kind();
        let supersedes = match self.heads.get(&kind) {
            Some(head) => prior.iter().any(|p| p == head),
            None => !self.has(kind),
        };
        if !supersedes {
            return false;
        }
        self.apply_update(value, Some(update_hash));
        true
    }

    /// Hash of the update that set `kind`, if known.
    pub fn head(&self, kind: AttributeKind) -> Option<&str> {
        self.heads.get(&kind).map(String::as_str)
    }

    pub fn has(&self, kind: AttributeKind) -> bool {
        match kind {
            AttributeKind::Time => self.time.is_some(),
            AttributeKind::Location => self.location.is_some(),
            AttributeKind::Instructor => self.instructor.is_some(),
        }
    }

    pub fn to_document(&self, id: &RecordId, offering: &Offering) -> SearchDocument {
        SearchDocument::build(
            id,
            offering,
            self.time.as_ref(),
            self.location.as_ref(),
            self.instructor.as_ref(),
        )
    }
}

fn replace<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
    if slot.as_ref() == Some(&value) {
        return false;
    }
    *slot = Some(value);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use offering_types::{Course, Semester, TBA};
    use uuid::Uuid;

    #[test]
    fn test_apply_is_last_wins_per_kind() {
        let mut state = PartialIndexState::default();
        assert!(state.apply(AttributeValue::time("MF", "10:00")));
        assert!(!state.apply(AttributeValue::time("MF", "10:00")));
        assert!(state.apply(AttributeValue::time("TR", "14:00")));
        assert!(state.apply(AttributeValue::instructor("Dr. Smith")));

        assert_eq!(state.time.as_ref().unwrap().days, "TR");
        assert!(state.has(AttributeKind::Instructor));
        assert!(!state.has(AttributeKind::Location));
    }

    #[test]
    fn test_restore_follows_prior_chain() {
        let x = AttributeValue::time("MF", "10:00");
        let y = AttributeValue::time("TR", "14:00");
        let hx = x.update_hash(&[]);
        let hy = y.update_hash(&[hx.clone()]);
        let hx2 = x.update_hash(&[hy.clone()]);

        let mut state = PartialIndexState::default();
        assert!(state.restore(x.clone(), &hx, &[]));
        // Redelivery of the root update does not supersede itself
        assert!(!state.restore(x.clone(), &hx, &[]));
        assert!(state.restore(y.clone(), &hy, &[hx.clone()]));
        assert_eq!(state.time.as_ref().unwrap().days, "TR");

        // An update older than the current head is ignored
        assert!(!state.restore(x.clone(), &hx, &[]));
        assert!(state.restore(x, &hx2, &[hy]));
        assert_eq!(state.time.as_ref().unwrap().days, "MF");
        assert_eq!(state.head(AttributeKind::Time), Some(hx2.as_str()));
    }

    #[test]
    fn test_restore_keeps_unmarked_value() {
        let mut state = PartialIndexState::default();
        state.apply(AttributeValue::instructor("Dr. Lee"));
        let smith = AttributeValue::instructor("Dr. Smith");
        assert!(!state.restore(smith.clone(), &smith.fingerprint(), &[]));
        assert_eq!(state.instructor.as_ref().unwrap().name, "Dr. Lee");
        assert_eq!(state.head(AttributeKind::Instructor), None);
    }

    #[test]
    fn test_to_document_defaults_missing_attributes() {
        let offering = Offering::new(
            Course::new("CS 101", "Intro"),
            Semester::new(2022, "Spring"),
            Uuid::new_v4(),
        );
        let id = offering.record_id();
        let mut state = PartialIndexState::default();
        state.apply(AttributeValue::location("Science Hall", "101"));

        let doc = state.to_document(&id, &offering);
        assert_eq!(doc.location, "Science Hall 101");
        assert_eq!(doc.days, TBA);
        assert_eq!(doc.time, TBA);
        assert_eq!(doc.instructor, TBA);
    }
}
