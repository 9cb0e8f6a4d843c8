//! Database roles

use serde::{Deserialize, Serialize};

/// The two logical database targets PartScout talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbRole {
    /// Local parts catalog, the read/write operational store.
    Catalog,
    /// External accounting/inventory server, read-mostly.
    Ledger,
}

impl DbRole {
    /// Both roles, in bootstrap order (catalog first).
    pub const ALL: [DbRole; 2] = [DbRole::Catalog, DbRole::Ledger];

    pub fn as_str(&self) -> &'static str {
        match self {
            DbRole::Catalog => "catalog",
            DbRole::Ledger => "ledger",
        }
    }
}

impl std::fmt::Display for DbRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display() {
        assert_eq!(DbRole::Catalog.to_string(), "catalog");
        assert_eq!(DbRole::Ledger.to_string(), "ledger");
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&DbRole::Catalog).unwrap(), "\"catalog\"");
        let role: DbRole = serde_json::from_str("\"ledger\"").unwrap();
        assert_eq!(role, DbRole::Ledger);
    }
}
