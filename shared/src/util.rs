/// Current UTC timestamp in milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a new UUID v4 string for entity ids (drafts, items, orders)
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
