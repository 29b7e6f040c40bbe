use chrono::{DateTime, TimeZone, Utc};

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a JSON string column, returning CorruptRow on parse failure.
pub fn parse_json(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Timestamps are stored as Unix milliseconds.
pub fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub fn from_millis(
    ms: i64,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::CorruptRow {
            table,
            column,
            detail: format!("timestamp out of range: {ms}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_success() {
        let result = parse_json(r#"{"key": "value"}"#, "documents", "body");
        assert_eq!(result.unwrap()["key"], "value");
    }

    #[test]
    fn parse_json_failure() {
        let result = parse_json("not valid json", "documents", "body");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "documents", column: "body", .. })
        ));
    }

    #[test]
    fn millis_roundtrip_keeps_precision() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(from_millis(to_millis(t), "documents", "created_at").unwrap(), t);
    }
}
