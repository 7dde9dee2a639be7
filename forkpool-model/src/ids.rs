use crate::error::ModelError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;
use uuid::Uuid;

static CANONICAL_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    )
    .expect("canonical id pattern is valid")
});

/// Strongly typed ID for users with validation
///
/// Only the hyphenated 8-4-4-4-12 form is accepted when parsing from a path
/// segment; braced, URN and simple forms are rejected even though `Uuid`
/// itself would take them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct UserId(pub Uuid);

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl UserId {
    pub fn new() -> Self {
        UserId(Uuid::new_v4())
    }

    pub fn parse_canonical(raw: &str) -> Result<Self, ModelError> {
        if !CANONICAL_ID.is_match(raw) {
            return Err(ModelError::InvalidId(raw.to_string()));
        }
        Uuid::parse_str(raw)
            .map(UserId)
            .map_err(|_| ModelError::InvalidId(raw.to_string()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl FromStr for UserId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_canonical(s)
    }
}

impl AsRef<Uuid> for UserId {
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_lower_and_upper_case_hyphenated_ids() {
        let id = UserId::new();
        let lower = id.to_string();
        let upper = lower.to_uppercase();

        assert_eq!(UserId::parse_canonical(&lower).unwrap(), id);
        assert_eq!(UserId::parse_canonical(&upper).unwrap(), id);
    }

    #[test]
    fn rejects_non_canonical_forms() {
        let id = Uuid::new_v4();
        for raw in [
            "not-a-uuid".to_string(),
            String::new(),
            id.simple().to_string(),
            id.braced().to_string(),
            id.urn().to_string(),
            format!("{id}0"),
            format!(" {id}"),
            "zzzzzzzz-zzzz-zzzz-zzzz-zzzzzzzzzzzz".to_string(),
        ] {
            assert_eq!(
                UserId::parse_canonical(&raw),
                Err(ModelError::InvalidId(raw.clone())),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(UserId::new(), UserId::new());
    }

    #[test]
    fn invalid_id_error_message() {
        let err = "nope".parse::<UserId>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid user ID format");
    }
}
