use axum::{
    Router,
    routing::{MethodRouter, get},
};
use tower_http::trace::TraceLayer;

use crate::{
    infra::errors::{method_not_allowed, route_not_found},
    users::{SharedUserStore, user_handlers},
};

pub const USERS: &str = "/api/users";
pub const USERS_SLASH: &str = "/api/users/";
pub const USER_BY_ID: &str = "/api/users/{id}";

fn users_collection() -> MethodRouter<SharedUserStore> {
    get(user_handlers::list_users_handler)
        .post(user_handlers::create_user_handler)
        .fallback(method_not_allowed)
}

/// Worker API: user CRUD under `/api/users`. The collection also answers
/// with a trailing slash.
pub fn create_api_router(store: SharedUserStore) -> Router {
    Router::new()
        .route(USERS, users_collection())
        .route(USERS_SLASH, users_collection())
        .route(
            USER_BY_ID,
            get(user_handlers::get_user_handler)
                .put(user_handlers::replace_user_handler)
                .delete(user_handlers::delete_user_handler)
                .fallback(method_not_allowed),
        )
        .fallback(route_not_found)
        .with_state(store)
        .layer(TraceLayer::new_for_http())
}
