use std::fmt::{Display, Formatter, Result as FmtResult};

/// Key prefix scoping this library's entries inside a shared flat map.
///
/// Built as `"{database}:{store}:"`. A physical key belongs to the namespace
/// iff it starts with the prefix, so changing the names after entries were
/// written orphans them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// Creates the namespace for a database/store name pair.
    #[must_use]
    pub fn new(database_name: &str, store_name: &str) -> Self {
        Self(format!("{database_name}:{store_name}:"))
    }

    /// The raw prefix.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Physical key for a logical key.
    #[must_use]
    pub fn key(&self, logical_key: &str) -> String {
        format!("{}{}", self.0, logical_key)
    }

    /// Whether a physical key was written under this namespace.
    #[must_use]
    pub fn owns(&self, physical_key: &str) -> bool {
        physical_key.starts_with(&self.0)
    }

    /// Logical key of a physical key, or `None` if the key is foreign.
    #[must_use]
    pub fn strip<'a>(&self, physical_key: &'a str) -> Option<&'a str> {
        physical_key.strip_prefix(self.0.as_str())
    }
}

impl Display for Namespace {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_format() {
        let ns = Namespace::new("kv-keeper-items", "items");
        assert_eq!(ns.as_str(), "kv-keeper-items:items:");
        assert_eq!(ns.key("foo"), "kv-keeper-items:items:foo");
    }

    #[test]
    fn test_owns_and_strip() {
        let ns = Namespace::new("db", "store");

        assert!(ns.owns("db:store:a"));
        assert!(!ns.owns("db:other:a"));
        assert!(!ns.owns("db:store"));

        assert_eq!(ns.strip("db:store:a"), Some("a"));
        assert_eq!(ns.strip("db:store:"), Some(""));
        assert_eq!(ns.strip("other:b"), None);
    }
}
