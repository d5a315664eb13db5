//! Field composition: turn a record's attributes into one canonical string.

use std::collections::BTreeMap;

use semvec_core::Record;

use crate::definition::PipelineDefinition;

/// Compose the canonical text of `record` for `definition`.
///
/// Attribute values are joined in composition order with a single space.
/// A missing attribute contributes the empty string, so its separator is
/// still emitted.
pub fn compose(record: &Record, definition: &PipelineDefinition) -> String {
    compose_attributes(&record.attributes, &definition.composition)
}

/// Compose free-standing attributes, as supplied in a query.
pub fn compose_attributes(attributes: &BTreeMap<String, String>, composition: &[String]) -> String {
    composition
        .iter()
        .map(|name| attributes.get(name).map(String::as_str).unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_compose_in_list_order() {
        let record = Record::new("r1")
            .with_attribute("serviceName", "CAR-ENRICHMENT")
            .with_attribute("level", "INFO")
            .with_attribute("message", "enrich start");
        let text = compose_attributes(
            &record.attributes,
            &names(&["serviceName", "level", "message"]),
        );
        assert_eq!(text, "CAR-ENRICHMENT INFO enrich start");
    }

    #[test]
    fn test_missing_attribute_keeps_separator() {
        let record = Record::new("r1").with_attribute("a", "a");
        assert_eq!(compose_attributes(&record.attributes, &names(&["a", "missing"])), "a ");
        assert_eq!(compose_attributes(&record.attributes, &names(&["missing", "a"])), " a");
    }

    #[test]
    fn test_all_missing_is_blank() {
        let record = Record::new("r1");
        let text = compose_attributes(&record.attributes, &names(&["x", "y"]));
        assert_eq!(text, " ");
        assert!(text.trim().is_empty());
    }

    #[test]
    fn test_compose_is_deterministic() {
        let record = Record::new("r1")
            .with_attribute("b", "two")
            .with_attribute("a", "one");
        let order = names(&["b", "a"]);
        let first = compose_attributes(&record.attributes, &order);
        for _ in 0..10 {
            assert_eq!(compose_attributes(&record.attributes, &order), first);
        }
        assert_eq!(first, "two one");
    }
}
