//! Index field mappings.
//!
//! Every document field is an exact-match keyword except the course name,
//! which is analyzed for full-text search.

use serde_json::{json, Map, Value};

/// Field name and store type of every document field.
pub const FIELD_TYPES: [(&str, &str); 7] = [
    ("id", "keyword"),
    ("courseCode", "keyword"),
    ("courseName", "text"),
    ("days", "keyword"),
    ("time", "keyword"),
    ("instructor", "keyword"),
    ("location", "keyword"),
];

/// Index creation body.
pub fn index_mapping() -> Value {
    let properties: Map<String, Value> = FIELD_TYPES
        .iter()
        .map(|(field, ty)| (field.to_string(), json!({ "type": ty })))
        .collect();
    json!({ "mappings": { "properties": properties } })
}

/// Compare an existing index's `properties` against [`FIELD_TYPES`].
///
/// Returns one description per missing or differently typed field.
pub fn mapping_mismatches(properties: &Value) -> Vec<String> {
    FIELD_TYPES
        .iter()
        .filter_map(|(field, expected)| {
            match properties.get(field).and_then(|p| p.get("type")).and_then(Value::as_str) {
                Some(actual) if actual == *expected => None,
                Some(actual) => Some(format!("{}: expected {}, found {}", field, expected, actual)),
                None => Some(format!("{}: missing, expected {}", field, expected)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_mapping_types() {
        let body = index_mapping();
        let props = &body["mappings"]["properties"];
        assert_eq!(props["courseName"]["type"], "text");
        assert_eq!(props["courseCode"]["type"], "keyword");
        assert_eq!(props.as_object().unwrap().len(), 7);
        assert!(mapping_mismatches(props).is_empty());
    }

    #[test]
    fn test_mapping_mismatches() {
        let props = json!({
            "id": { "type": "keyword" },
            "courseCode": { "type": "keyword" },
            "courseName": { "type": "keyword" },
            "days": { "type": "keyword" },
            "time": { "type": "keyword" },
            "instructor": { "type": "keyword" }
        });
        let mismatches = mapping_mismatches(&props);
        assert_eq!(mismatches.len(), 2);
        assert!(mismatches[0].starts_with("courseName: expected text"));
        assert!(mismatches[1].starts_with("location: missing"));
    }
}
