use crate::error::{ModelError, Result};
use crate::ids::UserId;

/// A user record as held by a worker's store.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub age: i64,
    pub hobbies: Vec<String>,
}

impl User {
    pub fn from_draft(id: UserId, draft: UserDraft) -> Self {
        let UserDraft {
            username,
            age,
            hobbies,
        } = draft;
        Self {
            id,
            username,
            age,
            hobbies,
        }
    }
}

/// Validated field set used to create or replace a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDraft {
    pub username: String,
    pub age: i64,
    pub hobbies: Vec<String>,
}

impl UserDraft {
    pub fn new(
        username: impl Into<String>,
        age: i64,
        hobbies: Vec<String>,
    ) -> Self {
        Self {
            username: username.into(),
            age,
            hobbies,
        }
    }
}

/// Body of `POST /api/users`.
///
/// `username` is required; `age` defaults to 0 and `hobbies` to an empty
/// list when absent or null. Present values must still be well typed, which
/// the deserializer enforces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct CreateUserRequest {
    #[cfg_attr(feature = "serde", serde(default))]
    pub username: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub age: Option<i64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub hobbies: Option<Vec<String>>,
}

impl CreateUserRequest {
    pub fn into_draft(self) -> Result<UserDraft> {
        let username = self
            .username
            .filter(|name| !name.is_empty())
            .ok_or(ModelError::MissingField("username"))?;

        Ok(UserDraft {
            username,
            age: self.age.unwrap_or(0),
            hobbies: self.hobbies.unwrap_or_default(),
        })
    }
}

/// Body of `PUT /api/users/{id}`; every field is mandatory.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct ReplaceUserRequest {
    pub username: String,
    pub age: i64,
    pub hobbies: Vec<String>,
}

impl From<ReplaceUserRequest> for UserDraft {
    fn from(request: ReplaceUserRequest) -> Self {
        UserDraft {
            username: request.username,
            age: request.age,
            hobbies: request.hobbies,
        }
    }
}
