//! Identity lookup against the external user directory.
//!
//! User management lives outside this crate. The engine only needs to resolve
//! a user by id or username and to enumerate the admin roster for broadcasts.

use crate::error::GarageError;
use crate::store::StoreError;
use crate::types::{Role, UserId, UserProfile};
use std::future::Future;
use std::pin::Pin;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Boxed future returned by directory lookups
pub type DirectoryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// External user directory
pub trait UserDirectory: Send + Sync {
    /// Resolve a user by id (as text) or username
    fn resolve_user(&self, id_or_username: &str) -> DirectoryFuture<'_, Option<UserProfile>>;

    /// Every user holding the ADMIN role
    fn admins(&self) -> DirectoryFuture<'_, Vec<UserProfile>>;
}

/// Resolve a user id or fail with `NotFound`.
///
/// # Errors
///
/// Returns [`GarageError::NotFound`] if the directory does not know the user,
/// or [`GarageError::Storage`] if the directory is unreachable.
pub async fn require_user(
    directory: &dyn UserDirectory,
    id: UserId,
) -> Result<UserProfile, GarageError> {
    directory
        .resolve_user(&id.to_string())
        .await?
        .ok_or_else(|| GarageError::not_found("User", id))
}

/// In-memory [`UserDirectory`]
///
/// # Example
///
/// ```
/// use garage::directory::{InMemoryDirectory, UserDirectory};
/// use garage::types::Role;
///
/// # tokio_test::block_on(async {
/// let directory = InMemoryDirectory::new();
/// let boss = directory.add("boss", "Big Boss", Role::Admin);
/// directory.add("ana", "Ana Lopez", Role::Customer);
///
/// let admins = directory.admins().await.unwrap();
/// assert_eq!(admins, vec![boss.clone()]);
/// assert_eq!(directory.resolve_user("boss").await.unwrap(), Some(boss));
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: RwLock<Vec<UserProfile>>,
}

impl InMemoryDirectory {
    /// Create an empty directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<UserProfile>> {
        match self.users.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<UserProfile>> {
        match self.users.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add or replace a user
    pub fn insert(&self, profile: UserProfile) {
        let mut users = self.write();
        users.retain(|existing| existing.id != profile.id);
        users.push(profile);
    }

    /// Create and add a user, returning its profile
    pub fn add(&self, username: &str, display_name: &str, role: Role) -> UserProfile {
        let profile = UserProfile::new(username, display_name, role);
        self.insert(profile.clone());
        profile
    }

    /// Remove a user
    pub fn remove(&self, id: UserId) {
        self.write().retain(|existing| existing.id != id);
    }
}

impl UserDirectory for InMemoryDirectory {
    fn resolve_user(&self, id_or_username: &str) -> DirectoryFuture<'_, Option<UserProfile>> {
        let found = self
            .read()
            .iter()
            .find(|user| user.username == id_or_username || user.id.to_string() == id_or_username)
            .cloned();
        Box::pin(async move { Ok(found) })
    }

    fn admins(&self) -> DirectoryFuture<'_, Vec<UserProfile>> {
        let admins: Vec<UserProfile> = self
            .read()
            .iter()
            .filter(|user| user.role == Role::Admin)
            .cloned()
            .collect();
        Box::pin(async move { Ok(admins) })
    }
}
