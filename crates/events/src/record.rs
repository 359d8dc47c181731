use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Row operation reported by the change feed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw change record as delivered by the transport.
///
/// `after` is absent for deletes, `before` is usually only present for updates
/// and deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub table: String,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<JsonValue>,
}

impl ChangeRecord {
    pub fn new(
        table: impl Into<String>,
        operation: Operation,
        before: Option<JsonValue>,
        after: Option<JsonValue>,
    ) -> Self {
        Self {
            table: table.into(),
            operation,
            before,
            after,
        }
    }

    /// The row image that best describes the row: `after`, or `before` for deletes.
    pub fn row(&self) -> Option<&JsonValue> {
        self.after.as_ref().or(self.before.as_ref())
    }

    /// Look up a field on [`ChangeRecord::row`], trying each path in order.
    ///
    /// Paths may be dotted (`availability.status`). Strings are returned as-is,
    /// numbers and booleans are stringified, anything else is treated as absent.
    pub fn text(&self, paths: &[&str]) -> Option<String> {
        let row = self.row()?;
        paths.iter().find_map(|path| lookup(row, path).and_then(as_text))
    }
}

fn lookup<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

fn as_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
