//! Code-intelligence queries issued against a ready session.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Side of a diff being queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Base,
    Head,
}

impl Side {
    #[must_use]
    pub const fn is_base(self) -> bool {
        matches!(self, Self::Base)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Base => "base",
            Self::Head => "head",
        })
    }
}

/// Kind of query a ready session answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Hover,
    Definition,
    References,
    FileContents,
}

impl QueryKind {
    /// Whether the query addresses a position rather than a whole file.
    #[must_use]
    pub const fn needs_position(self) -> bool {
        !matches!(self, Self::FileContents)
    }
}

/// File contents response, annotated with what was asked for.
///
/// The service does not echo the path or side back, so the client attaches them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContents {
    pub file_path: String,
    pub side: Side,
    pub contents: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_serialization() {
        assert_eq!(serde_json::to_string(&Side::Base).unwrap(), "\"base\"");
        assert!(Side::Base.is_base());
        assert!(!Side::Head.is_base());
    }

    #[test]
    fn test_file_contents_needs_no_position() {
        assert!(QueryKind::Hover.needs_position());
        assert!(!QueryKind::FileContents.needs_position());
    }
}
