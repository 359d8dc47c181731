//! Row filters passed to the change feed when a channel is opened.
//!
//! Format: `column=eq.value` (empty string = no filter). Enforcement is the
//! transport's job; the in-memory feed evaluates it so tests can observe scoping.

use core::str::FromStr;

use thiserror::Error;

use crate::ChangeRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    column: String,
    value: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unsupported row filter '{0}' (expected column=eq.value)")]
pub struct FilterParseError(pub String);

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn matches(&self, record: &ChangeRecord) -> bool {
        record
            .text(&[self.column.as_str()])
            .is_some_and(|v| v == self.value)
    }

    /// Parse an optional filter; an empty string means "everything".
    pub fn parse_optional(s: &str) -> Result<Option<Self>, FilterParseError> {
        if s.trim().is_empty() {
            return Ok(None);
        }
        s.parse().map(Some)
    }
}

impl core::fmt::Display for RowFilter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

impl FromStr for RowFilter {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, rest) = s
            .split_once('=')
            .ok_or_else(|| FilterParseError(s.to_string()))?;
        let value = rest
            .strip_prefix("eq.")
            .ok_or_else(|| FilterParseError(s.to_string()))?;
        if column.trim().is_empty() {
            return Err(FilterParseError(s.to_string()));
        }
        Ok(Self::eq(column.trim(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Operation;
    use serde_json::json;

    #[test]
    fn parses_and_displays() {
        let f: RowFilter = "tenant_id=eq.T1".parse().unwrap();
        assert_eq!(f.column(), "tenant_id");
        assert_eq!(f.value(), "T1");
        assert_eq!(f.to_string(), "tenant_id=eq.T1");
    }

    #[test]
    fn rejects_other_operators() {
        assert!("tenant_id=neq.T1".parse::<RowFilter>().is_err());
        assert!("tenant_id".parse::<RowFilter>().is_err());
        assert_eq!(RowFilter::parse_optional("  ").unwrap(), None);
    }

    #[test]
    fn matches_on_row_image() {
        let f = RowFilter::eq("tenant_id", "T1");
        let hit = ChangeRecord::new("t", Operation::Insert, None, Some(json!({"tenant_id": "T1"})));
        let miss = ChangeRecord::new("t", Operation::Insert, None, Some(json!({"tenant_id": "T2"})));
        let deleted = ChangeRecord::new("t", Operation::Delete, Some(json!({"tenant_id": "T1"})), None);
        assert!(f.matches(&hit));
        assert!(!f.matches(&miss));
        assert!(f.matches(&deleted));
    }
}
