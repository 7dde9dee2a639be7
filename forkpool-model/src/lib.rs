//! Core data model definitions shared across forkpool crates.
#![allow(missing_docs)]

pub mod error;
pub mod ids;
pub mod user;

pub use error::{ModelError, Result};
pub use ids::UserId;
pub use user::{CreateUserRequest, ReplaceUserRequest, User, UserDraft};
