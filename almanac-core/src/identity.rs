//! Identity types: users, namespaces and request scoping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generation counter value as stored in a shared generation array.
pub type GenerationValue = i32;

// ============================================================================
// USER IDENTITY
// ============================================================================

/// Identifier of a user whose settings are being read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u32);

impl UserId {
    /// The primary (system) user.
    pub const SYSTEM: UserId = UserId(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for UserId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Whether a request targets the calling process's own user.
///
/// Only [`RequestScope::SelfUser`] requests may read from or populate a local
/// cache. Foreign-user requests always go to the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestScope {
    /// The request is for the process's own user.
    SelfUser,
    /// The request is made on behalf of another user.
    Foreign(UserId),
}

impl RequestScope {
    /// Resolve the scope of a request for `requested` issued by a process
    /// running as `process_user`.
    pub fn resolve(requested: UserId, process_user: UserId) -> Self {
        if requested == process_user {
            RequestScope::SelfUser
        } else {
            RequestScope::Foreign(requested)
        }
    }

    pub fn is_self(&self) -> bool {
        matches!(self, RequestScope::SelfUser)
    }

    /// The user to put on the wire: `None` for self requests, which the
    /// remote side attributes to the caller.
    pub fn wire_user(&self) -> Option<UserId> {
        match self {
            RequestScope::SelfUser => None,
            RequestScope::Foreign(user) => Some(*user),
        }
    }
}

// ============================================================================
// NAMESPACES
// ============================================================================

/// Independent settings tables, each with its own remote endpoint and
/// generation counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    System,
    Secure,
    Global,
    Config,
}

impl Namespace {
    /// All namespaces, in table order.
    pub const ALL: [Namespace; 4] = [
        Namespace::System,
        Namespace::Secure,
        Namespace::Global,
        Namespace::Config,
    ];

    /// Table name of this namespace.
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::System => "system",
            Namespace::Secure => "secure",
            Namespace::Global => "global",
            Namespace::Config => "config",
        }
    }

    /// Content URI of the backing collection used by fallback queries.
    pub fn content_uri(&self) -> String {
        format!("content://settings/{}", self.as_str())
    }

    /// Remote method name for fast-path reads.
    pub fn get_method(&self) -> String {
        format!("GET_{}", self.as_str())
    }

    /// Remote method name for fast-path writes.
    pub fn put_method(&self) -> String {
        format!("PUT_{}", self.as_str())
    }

    /// Remote method name for bulk resets.
    pub fn reset_method(&self) -> String {
        format!("RESET_{}", self.as_str())
    }

    /// Remote method name for prefix listings.
    pub fn list_method(&self) -> String {
        format!("LIST_{}", self.as_str())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = NamespaceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(Namespace::System),
            "secure" => Ok(Namespace::Secure),
            "global" => Ok(Namespace::Global),
            "config" => Ok(Namespace::Config),
            _ => Err(NamespaceParseError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid namespace string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceParseError(pub String);

impl fmt::Display for NamespaceParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid settings namespace: {}", self.0)
    }
}

impl std::error::Error for NamespaceParseError {}

// ============================================================================
// RESET MODES
// ============================================================================

/// How a bulk reset-to-defaults treats existing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResetMode {
    /// Reset values written by a package (matched by tag) to their defaults.
    PackageDefaults,
    /// Reset values set by untrusted writers to their defaults.
    UntrustedDefaults,
    /// Drop values set by untrusted writers and reset untrusted defaults.
    UntrustedChanges,
    /// Reset every value to its trusted default.
    TrustedDefaults,
}

impl ResetMode {
    /// Wire code understood by the settings service.
    pub fn code(&self) -> i32 {
        match self {
            ResetMode::PackageDefaults => 1,
            ResetMode::UntrustedDefaults => 2,
            ResetMode::UntrustedChanges => 3,
            ResetMode::TrustedDefaults => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ResetMode::PackageDefaults),
            2 => Some(ResetMode::UntrustedDefaults),
            3 => Some(ResetMode::UntrustedChanges),
            4 => Some(ResetMode::TrustedDefaults),
            _ => None,
        }
    }
}
