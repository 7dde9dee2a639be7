use axum::{
    Json,
    body::Bytes,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
};
use forkpool_model::{
    CreateUserRequest, ModelError, ReplaceUserRequest, User, UserId,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    infra::errors::{AppError, AppResult},
    users::store::SharedUserStore,
};

pub const INVALID_INPUT: &str = "Invalid input";

/// The `{id}` path segment, validated before any handler runs.
///
/// Every rejection renders as a JSON 400, including a segment that does not
/// percent-decode to UTF-8.
#[derive(Debug, Clone, Copy)]
pub struct UserIdPath(pub UserId);

impl<S> FromRequestParts<S> for UserIdPath
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let Path(raw_id) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| {
                debug!(error = %rejection, "rejected user id segment");
                let path = parts.uri.path().to_string();
                AppError::from(ModelError::InvalidId(path))
            })?;

        Ok(Self(UserId::parse_canonical(&raw_id)?))
    }
}

pub async fn list_users_handler(
    State(store): State<SharedUserStore>,
) -> Json<Vec<User>> {
    Json(store.list())
}

pub async fn get_user_handler(
    State(store): State<SharedUserStore>,
    UserIdPath(id): UserIdPath,
) -> AppResult<Json<User>> {
    store.get(&id).map(Json).ok_or_else(AppError::user_not_found)
}

pub async fn create_user_handler(
    State(store): State<SharedUserStore>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<User>)> {
    let draft = parse_create_body(&body)?.into_draft()?;
    let user = store.create(draft);
    info!(user.id = %user.id, "created user");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn replace_user_handler(
    State(store): State<SharedUserStore>,
    UserIdPath(id): UserIdPath,
    body: Bytes,
) -> AppResult<Json<User>> {
    let request: ReplaceUserRequest = serde_json::from_slice(&body)
        .map_err(|err| {
            debug!(error = %err, "rejected replace body");
            AppError::bad_request(INVALID_INPUT)
        })?;

    let user = store
        .replace(&id, request.into())
        .ok_or_else(AppError::user_not_found)?;
    info!(user.id = %user.id, "replaced user");
    Ok(Json(user))
}

pub async fn delete_user_handler(
    State(store): State<SharedUserStore>,
    UserIdPath(id): UserIdPath,
) -> AppResult<StatusCode> {
    if !store.remove(&id) {
        return Err(AppError::user_not_found());
    }
    info!(user.id = %id, "deleted user");
    Ok(StatusCode::NO_CONTENT)
}

/// An empty or unparsable body counts as `{}`, so it ends up as a missing
/// username. A parsable body with a mistyped field is rejected outright.
fn parse_create_body(body: &[u8]) -> AppResult<CreateUserRequest> {
    let value = match serde_json::from_slice::<Value>(body) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "create body is not JSON; treating as empty");
            return Ok(CreateUserRequest::default());
        }
    };

    serde_json::from_value(value).map_err(|err| {
        debug!(error = %err, "rejected create body");
        AppError::bad_request(INVALID_INPUT)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_body_tolerates_garbage_as_empty() {
        assert_eq!(
            parse_create_body(b"").unwrap(),
            CreateUserRequest::default()
        );
        assert_eq!(
            parse_create_body(b"{not json").unwrap(),
            CreateUserRequest::default()
        );
    }

    #[test]
    fn create_body_rejects_mistyped_fields() {
        let err =
            parse_create_body(br#"{"username":"a","age":"old"}"#).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, INVALID_INPUT);
    }

    #[test]
    fn create_body_accepts_null_optionals() {
        let request =
            parse_create_body(br#"{"username":"a","age":null,"hobbies":null}"#)
                .unwrap();
        assert_eq!(request.username.as_deref(), Some("a"));
        assert_eq!(request.age, None);
        assert_eq!(request.hobbies, None);
    }
}
