//! Wire-visible full names.
//!
//! Tools and resources are addressed on the wire as `{serverId}__{localName}`.
//! Parsing is strict: the name must split on the first `__` into exactly two
//! non-empty segments, and the local segment may not contain the separator
//! again. Anything else is rejected before any store or backend lookup.

use std::fmt;

use crate::error::CoreError;

/// Separator between the server id and the local tool/resource name.
pub const SEPARATOR: &str = "__";

/// A parsed `{serverId}__{localName}` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FullName {
    server_id: String,
    local_name: String,
}

impl FullName {
    /// Build a full name from its parts without validation.
    pub fn new(server_id: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            local_name: local_name.into(),
        }
    }

    /// Parse a wire name.
    pub fn parse(name: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let (server_id, local_name) = name
            .split_once(SEPARATOR)
            .ok_or_else(|| invalid("expected '{serverId}__{name}'"))?;

        if server_id.is_empty() {
            return Err(invalid("empty server id"));
        }
        if local_name.is_empty() {
            return Err(invalid("empty local name"));
        }
        if local_name.contains(SEPARATOR) {
            return Err(invalid("more than two '__'-delimited segments"));
        }

        Ok(Self::new(server_id, local_name))
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }
}

impl fmt::Display for FullName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.server_id, SEPARATOR, self.local_name)
    }
}

/// Format a full name from a server id and a local name.
pub fn full_name(server_id: &str, local_name: &str) -> String {
    format!("{server_id}{SEPARATOR}{local_name}")
}

/// The owning prefix of a server id: the segment before its first `__`,
/// or the whole id when it carries no separator.
pub fn owner_prefix(server_id: &str) -> &str {
    server_id
        .split_once(SEPARATOR)
        .map_or(server_id, |(owner, _)| owner)
}

/// Resource name addressed by a `resources/read` uri: the part before `://`.
pub fn resource_name_from_uri(uri: &str) -> &str {
    uri.split_once("://").map_or(uri, |(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_segments() {
        let name = FullName::parse("acme__get_users").unwrap();
        assert_eq!(name.server_id(), "acme");
        assert_eq!(name.local_name(), "get_users");
        assert_eq!(name.to_string(), "acme__get_users");
    }

    #[test]
    fn test_single_underscores_stay_in_segments() {
        let name = FullName::parse("my_db__list_open_orders").unwrap();
        assert_eq!(name.server_id(), "my_db");
        assert_eq!(name.local_name(), "list_open_orders");
    }

    #[test]
    fn test_rejects_malformed_names() {
        for bad in [
            "",
            "nounderscore",
            "single_underscore",
            "__tool",
            "server__",
            "a__b__c",
            "alice__shop__get_users",
            "____",
        ] {
            let err = FullName::parse(bad).unwrap_err();
            assert!(
                matches!(err, CoreError::InvalidName { .. }),
                "expected invalid name for {bad:?}"
            );
        }
    }

    #[test]
    fn test_owner_prefix() {
        assert_eq!(owner_prefix("alice__shop"), "alice");
        assert_eq!(owner_prefix("acme"), "acme");
    }

    #[test]
    fn test_resource_name_from_uri() {
        assert_eq!(resource_name_from_uri("acme__users_list://users_list"), "acme__users_list");
        assert_eq!(resource_name_from_uri("acme__users_list"), "acme__users_list");
    }
}
