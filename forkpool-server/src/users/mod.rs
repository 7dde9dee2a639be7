pub mod store;
pub mod user_handlers;

pub use store::{InMemoryUserStore, SharedUserStore, UserStore};
