use chrono::{DateTime, Utc};

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

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    get(row, idx, table, column)
}

/// Parse a JSON string column into `T`, returning CorruptRow on parse failure.
pub fn parse_json<T: serde::de::DeserializeOwned>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Parse an RFC 3339 timestamp column.
pub fn parse_timestamp(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp {raw:?}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::messages::Role;

    #[test]
    fn parse_enum_success() {
        let role: Role = parse_enum("tool", "messages", "role").unwrap();
        assert_eq!(role, Role::Tool);
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<Role, _> = parse_enum("INVALID", "messages", "role");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "messages", column: "role", .. })
        ));
    }

    #[test]
    fn parse_json_success() {
        let v: serde_json::Value =
            parse_json(r#"{"key": "value"}"#, "messages", "tool_calls").unwrap();
        assert_eq!(v["key"], "value");
    }

    #[test]
    fn parse_json_failure() {
        let result: Result<serde_json::Value, _> =
            parse_json("not valid json", "messages", "tool_calls");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "messages", column: "tool_calls", .. })
        ));
    }

    #[test]
    fn parse_timestamp_roundtrip() {
        let now = Utc::now();
        let parsed = parse_timestamp(&now.to_rfc3339(), "sessions", "created_at").unwrap();
        assert_eq!(parsed, now);
        assert!(parse_timestamp("yesterday", "sessions", "created_at").is_err());
    }
}
