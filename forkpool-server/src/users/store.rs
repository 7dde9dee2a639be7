use forkpool_model::{User, UserDraft, UserId};
use parking_lot::RwLock;
use std::{fmt, sync::Arc};

/// Storage seam for user records.
///
/// Each worker process owns exactly one store; records are never shared
/// between workers.
pub trait UserStore: Send + Sync + fmt::Debug {
    /// All records in insertion order.
    fn list(&self) -> Vec<User>;

    fn get(&self, id: &UserId) -> Option<User>;

    /// Stores a new record under a freshly generated id.
    fn create(&self, draft: UserDraft) -> User;

    /// Replaces every field except the id. `None` when the id is absent.
    fn replace(&self, id: &UserId, draft: UserDraft) -> Option<User>;

    /// Returns whether a record was removed.
    fn remove(&self, id: &UserId) -> bool;
}

pub type SharedUserStore = Arc<dyn UserStore>;

#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<Vec<User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<User>) -> Self {
        Self {
            users: RwLock::new(users),
        }
    }

    /// Store pre-populated with the three sample users.
    pub fn seeded() -> Self {
        let users = seed_drafts()
            .into_iter()
            .map(|draft| User::from_draft(UserId::new(), draft))
            .collect();
        Self::with_users(users)
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    fn fresh_id(users: &[User]) -> UserId {
        loop {
            let id = UserId::new();
            if !users.iter().any(|user| user.id == id) {
                return id;
            }
        }
    }
}

impl UserStore for InMemoryUserStore {
    fn list(&self) -> Vec<User> {
        self.users.read().clone()
    }

    fn get(&self, id: &UserId) -> Option<User> {
        self.users.read().iter().find(|user| &user.id == id).cloned()
    }

    fn create(&self, draft: UserDraft) -> User {
        let mut users = self.users.write();
        let user = User::from_draft(Self::fresh_id(&users), draft);
        users.push(user.clone());
        user
    }

    fn replace(&self, id: &UserId, draft: UserDraft) -> Option<User> {
        let mut users = self.users.write();
        let slot = users.iter_mut().find(|user| &user.id == id)?;
        *slot = User::from_draft(*id, draft);
        Some(slot.clone())
    }

    fn remove(&self, id: &UserId) -> bool {
        let mut users = self.users.write();
        let before = users.len();
        users.retain(|user| &user.id != id);
        users.len() != before
    }
}

pub fn seed_drafts() -> Vec<UserDraft> {
    vec![
        UserDraft::new(
            "John Doe",
            30,
            vec!["reading".into(), "swimming".into()],
        ),
        UserDraft::new(
            "Jane Smith",
            25,
            vec!["painting".into(), "yoga".into()],
        ),
        UserDraft::new(
            "Bob Johnson",
            35,
            vec!["hiking".into(), "cooking".into()],
        ),
    ]
}
