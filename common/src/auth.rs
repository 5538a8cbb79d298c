use std::fmt::{self, Write as _};

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

pub const DIGEST_HEX_LEN: usize = 64;

/// Lowercase hex SHA-256 of the shared access code. The code itself is never kept.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessDigest(String);

impl AccessDigest {
    pub fn from_code(code: &str) -> Self {
        let digest = Sha256::digest(code.as_bytes());
        let mut hex = String::with_capacity(DIGEST_HEX_LEN);
        for byte in digest {
            let _ = write!(&mut hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Accepts any-case hex of the right length; an all-zero digest is treated as a placeholder.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.len() != DIGEST_HEX_LEN || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        if value.chars().all(|c| c == '0') {
            return None;
        }
        Some(Self(value.to_ascii_lowercase()))
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.0.eq_ignore_ascii_case(candidate.trim())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keep digests out of logs.
impl fmt::Debug for AccessDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessDigest({}…)", &self.0[..8])
    }
}

impl TryFrom<String> for AccessDigest {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or("auth_hash must be 64 hex characters")
    }
}

impl From<AccessDigest> for String {
    fn from(value: AccessDigest) -> Self {
        value.0
    }
}

/// An `auth_hash` field as it arrived: `None` when the key was absent, `Some(None)` for `null`.
pub type SuppliedHash = Option<Option<String>>;

/// Keeps an explicit `null` distinct from an absent key. Pair with `#[serde(default)]`.
pub fn deserialize_supplied<'de, D>(deserializer: D) -> Result<SuppliedHash, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

pub fn supply(digest: &AccessDigest) -> SuppliedHash {
    Some(Some(digest.as_str().to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No `auth_hash` key at all.
    Missing,
    /// Present but empty, null, all zeros, or not 64 hex characters.
    Malformed,
    /// Well-formed digest of the wrong code.
    Invalid,
}

impl AuthFailure {
    pub fn status_code(self) -> u16 {
        match self {
            Self::Missing => 401,
            Self::Malformed => 400,
            Self::Invalid => 403,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Missing => "Missing auth_hash",
            Self::Malformed => "Malformed auth_hash",
            Self::Invalid => "Invalid authentication code",
        }
    }
}

/// Only an absent key counts as missing; anything present must parse as a digest.
pub fn parse_supplied(supplied: &SuppliedHash) -> Result<AccessDigest, AuthFailure> {
    match supplied {
        None => Err(AuthFailure::Missing),
        Some(value) => value
            .as_deref()
            .and_then(AccessDigest::parse)
            .ok_or(AuthFailure::Malformed),
    }
}

/// Device-side check run before every mutating request.
pub fn authorize(expected: &AccessDigest, supplied: &SuppliedHash) -> Result<(), AuthFailure> {
    let candidate = parse_supplied(supplied)?;
    if expected.matches(candidate.as_str()) {
        Ok(())
    } else {
        Err(AuthFailure::Invalid)
    }
}
