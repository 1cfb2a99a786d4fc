//! The `User` record and its small enums.
//!
//! Grounded on libunftp's `UserDetail`/`StoragePermissions` split
//! (`auth/user.rs`): there, authorization is a capability bitset attached to
//! an opaque user type. Here there's only one axis of authorization (opLevel)
//! so a plain two-variant enum stands in for the bitflags.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpLevel {
    Normal = 1,
    Advanced = 2,
}

impl OpLevel {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(OpLevel::Normal),
            2 => Some(OpLevel::Advanced),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(rename = "passwordHash")]
    pub password_hash: String,
    pub salt: String,
    #[serde(rename = "registrationIP")]
    pub registration_ip: String,
    pub status: UserStatus,
    #[serde(rename = "opLevel")]
    pub op_level: OpLevel,
    #[serde(rename = "createdAt")]
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// `2-32 chars, [a-z0-9_-]`, already lowercased by the caller.
pub fn is_valid_username(username: &str) -> bool {
    let len_ok = (2..=32).contains(&username.chars().count());
    len_ok && username.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_validation() {
        assert!(is_valid_username("alice"));
        assert!(is_valid_username("a1"));
        assert!(is_valid_username("a_b-c9"));
        assert!(!is_valid_username("a"));
        assert!(!is_valid_username("Alice"));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username(&"a".repeat(33)));
    }
}
