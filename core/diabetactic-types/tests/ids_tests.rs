use diabetactic_types::{RecordId, ServiceId};
use std::collections::HashSet;
use std::str::FromStr;

// ── ServiceId ─────────────────────────────────────────────────────

#[test]
fn service_id_trims_whitespace() {
    let id = ServiceId::new("  api-gateway ");
    assert_eq!(id.as_str(), "api-gateway");
}

#[test]
fn service_id_parse_rejects_empty() {
    assert!(ServiceId::parse("").is_err());
    assert!(ServiceId::parse("   ").is_err());
}

#[test]
fn service_id_from_str_and_display() {
    let id = ServiceId::from_str("tidepool").unwrap();
    assert_eq!(id.to_string(), "tidepool");
    assert_eq!(id, ServiceId::from("tidepool"));
}

#[test]
fn service_id_serializes_transparently() {
    let id = ServiceId::new("local-storage");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"local-storage\"");
    let back: ServiceId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn service_id_deserialization_trims_whitespace() {
    let id: ServiceId = serde_json::from_str("\"  api-gateway \"").unwrap();
    assert_eq!(id, ServiceId::new("api-gateway"));
    assert_eq!(id.as_str(), "api-gateway");
}

#[test]
fn service_ids_hash_by_value() {
    let mut set = HashSet::new();
    set.insert(ServiceId::new("a"));
    set.insert(ServiceId::new("a"));
    set.insert(ServiceId::new("b"));
    assert_eq!(set.len(), 2);
}

// ── RecordId ──────────────────────────────────────────────────────

#[test]
fn record_id_new_is_unique() {
    assert_ne!(RecordId::new(), RecordId::new());
}

#[test]
fn record_id_display_and_parse() {
    let id = RecordId::new();
    let parsed = RecordId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn record_id_parse_invalid() {
    assert!(RecordId::parse("not-a-uuid").is_err());
    assert!(RecordId::from_str("garbage").is_err());
}

#[test]
fn record_ids_are_time_ordered() {
    let a = RecordId::new();
    let b = RecordId::new();
    assert!(a < b || a.as_uuid().get_timestamp() == b.as_uuid().get_timestamp());
}
