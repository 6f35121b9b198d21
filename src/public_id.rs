use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Opaque identifier handed out to clients in place of row ids.
///
/// Rendered as 32 lowercase hex characters. Parsing accepts both the hex and
/// the hyphenated form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct PublicId(Uuid);

impl PublicId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns `None` for anything that is not a UUID.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::try_parse(raw.trim()).ok().map(Self)
    }

    #[cfg(test)]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for PublicId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for PublicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl Serialize for PublicId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PublicId::parse(&raw).ok_or_else(|| serde::de::Error::custom("invalid public id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_as_simple_hex() {
        let id = PublicId::generate();
        let s = id.to_string();
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn parses_hex_and_hyphenated() {
        let id = PublicId::generate();
        assert_eq!(PublicId::parse(&id.to_string()), Some(id));
        assert_eq!(PublicId::parse(&id.as_uuid().hyphenated().to_string()), Some(id));
    }

    #[test]
    fn malformed_input_is_none() {
        assert_eq!(PublicId::parse(""), None);
        assert_eq!(PublicId::parse("42"), None);
        assert_eq!(PublicId::parse("not-a-uuid-at-all"), None);
    }

    #[test]
    fn serializes_as_hex_string() {
        let id = PublicId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: PublicId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
