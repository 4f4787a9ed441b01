//! The closed catalog of add-on types

use std::fmt;
use std::str::FromStr;

use koli_common::Error;

/// Add-on types known to the platform
///
/// Parsing is exact and case-sensitive; anything else is
/// [`Error::UnsupportedAddon`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddonKind {
    /// Redis key-value store
    Redis,
    /// Memcached cache
    Memcached,
    /// MySQL database; declared but not implemented
    MySql,
}

impl AddonKind {
    /// Every known kind
    pub const ALL: [AddonKind; 3] = [AddonKind::Redis, AddonKind::Memcached, AddonKind::MySql];

    /// Wire name used in `spec.type`
    pub fn as_str(&self) -> &'static str {
        match self {
            AddonKind::Redis => "redis",
            AddonKind::Memcached => "memcached",
            AddonKind::MySql => "mysql",
        }
    }

    /// Port the service listens on when the declaration gives none
    pub fn default_port(&self) -> i32 {
        match self {
            AddonKind::Redis => 6379,
            AddonKind::Memcached => 11211,
            AddonKind::MySql => 3306,
        }
    }
}

impl FromStr for AddonKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AddonKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::unsupported_addon(s))
    }
}

impl fmt::Display for AddonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
