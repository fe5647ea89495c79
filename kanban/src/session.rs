//! User directory and session management.
//!
//! A [`Session`] names the active user and is passed explicitly to the sync
//! engine. The [`IdentityProvider`] trait resolves sessions for both storage
//! variants:
//! - [`LocalIdentity`]: user list under `users`, full record under `currentUser`
//! - [`RemoteIdentity`]: `users` table, user id under `currentUserId`
//!
//! Both persist the session marker in the local key space so a restart
//! restores the last login.

use std::time::{SystemTime, UNIX_EPOCH};

use kanban_proto::backend::{Column, NewRow, Query, Row, Table, UserRow, Value};
use kanban_proto::user::{User, UserId};

use crate::backend::{Backend, BackendError};
use crate::storage::{KeyValueStore, StorageError};

/// Key holding the local user directory.
pub const USERS_KEY: &str = "users";
/// Key holding the full record of the logged-in local user.
pub const CURRENT_USER_KEY: &str = "currentUser";
/// Key holding the id of the logged-in remote user.
pub const CURRENT_USER_ID_KEY: &str = "currentUserId";

/// Errors that can occur during login and registration.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Name or email was blank.
    #[error("name and email are required")]
    MissingFields,

    /// Another user already registered this email.
    #[error("a user with email {0} already exists")]
    DuplicateEmail(String),

    /// No user has this id.
    #[error("no user with id {0}")]
    UnknownUser(UserId),

    /// The local key space failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The remote backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A record could not be encoded.
    #[error("failed to encode user record: {0}")]
    Encode(#[from] serde_json::Error),

    /// Every numeric id from the current time upward is taken.
    #[error("no user ids left to allocate")]
    IdsExhausted,
}

/// The active user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Logged-in user; owner of every task shown.
    pub user: User,
}

impl Session {
    /// Owner id for task operations.
    #[must_use]
    pub const fn owner(&self) -> &UserId {
        &self.user.id
    }
}

/// Resolves, creates and ends sessions.
pub trait IdentityProvider: Send + Sync {
    /// All known users. Failures degrade to an empty list.
    fn users(&self) -> impl std::future::Future<Output = Vec<User>> + Send;

    /// The session persisted by a previous login, if still valid.
    fn restore(
        &self,
    ) -> impl std::future::Future<Output = Result<Option<Session>, SessionError>> + Send;

    /// Log in as an existing user.
    fn login(
        &self,
        user_id: &UserId,
    ) -> impl std::future::Future<Output = Result<Session, SessionError>> + Send;

    /// Create a user and log in as them.
    fn register(
        &self,
        name: &str,
        email: &str,
    ) -> impl std::future::Future<Output = Result<Session, SessionError>> + Send;

    /// End the current session.
    fn logout(&self) -> impl std::future::Future<Output = Result<(), SessionError>> + Send;
}

/// Trims both fields, rejecting blanks.
fn registration_fields(name: &str, email: &str) -> Result<(String, String), SessionError> {
    let name = name.trim();
    let email = email.trim();
    if name.is_empty() || email.is_empty() {
        return Err(SessionError::MissingFields);
    }
    Ok((name.to_string(), email.to_string()))
}

fn same_email(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Directory seeded on first use.
fn default_users() -> Vec<User> {
    [
        ("1", "Taro Tanaka", "tanaka@example.com"),
        ("2", "Hanako Sato", "sato@example.com"),
        ("3", "Jiro Yamada", "yamada@example.com"),
    ]
    .into_iter()
    .map(|(id, name, email)| User {
        id: UserId::new(id),
        name: name.to_string(),
        email: email.to_string(),
    })
    .collect()
}

/// Identity provider over the local key space.
pub struct LocalIdentity<K> {
    kv: K,
}

impl<K: KeyValueStore> LocalIdentity<K> {
    /// Creates a provider over `kv`.
    pub const fn new(kv: K) -> Self {
        Self { kv }
    }

    /// Reads the directory, seeding the defaults if it has never been written.
    fn directory(&self) -> Result<Vec<User>, SessionError> {
        if let Some(raw) = self.kv.get(USERS_KEY)? {
            return match serde_json::from_str(&raw) {
                Ok(users) => Ok(users),
                Err(e) => {
                    tracing::warn!(error = %e, "corrupt user directory, treating as empty");
                    Ok(Vec::new())
                }
            };
        }
        let users = default_users();
        self.kv.set(USERS_KEY, &serde_json::to_string(&users)?)?;
        tracing::info!(count = users.len(), "seeded default users");
        Ok(users)
    }

    fn set_current(&self, user: &User) -> Result<Session, SessionError> {
        self.kv
            .set(CURRENT_USER_KEY, &serde_json::to_string(user)?)?;
        tracing::info!(user_id = %user.id, "logged in");
        Ok(Session { user: user.clone() })
    }
}

impl<K: KeyValueStore> IdentityProvider for LocalIdentity<K> {
    async fn users(&self) -> Vec<User> {
        self.directory().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to read user directory");
            Vec::new()
        })
    }

    async fn restore(&self) -> Result<Option<Session>, SessionError> {
        // Seed the directory as a side effect, like first launch does.
        self.directory()?;
        let Some(raw) = self.kv.get(CURRENT_USER_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str::<User>(&raw) {
            Ok(user) => Ok(Some(Session { user })),
            Err(e) => {
                tracing::warn!(error = %e, "corrupt session marker, clearing");
                self.kv.remove(CURRENT_USER_KEY)?;
                Ok(None)
            }
        }
    }

    async fn login(&self, user_id: &UserId) -> Result<Session, SessionError> {
        let users = self.directory()?;
        let user = users
            .iter()
            .find(|u| &u.id == user_id)
            .ok_or_else(|| SessionError::UnknownUser(user_id.clone()))?;
        self.set_current(user)
    }

    async fn register(&self, name: &str, email: &str) -> Result<Session, SessionError> {
        let (name, email) = registration_fields(name, email)?;
        let mut users = self.directory()?;
        if users.iter().any(|u| same_email(&u.email, &email)) {
            return Err(SessionError::DuplicateEmail(email));
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        let id = first_free_id(now, &users).ok_or(SessionError::IdsExhausted)?;

        let user = User {
            id: UserId::new(id.to_string()),
            name,
            email,
        };
        users.push(user.clone());
        self.kv.set(USERS_KEY, &serde_json::to_string(&users)?)?;
        tracing::info!(user_id = %user.id, "user registered");
        self.set_current(&user)
    }

    async fn logout(&self) -> Result<(), SessionError> {
        self.kv.remove(CURRENT_USER_KEY)?;
        tracing::info!("logged out");
        Ok(())
    }
}

fn user_from_row(row: UserRow) -> User {
    User {
        id: UserId::new(row.id),
        name: row.name,
        email: row.email,
    }
}

fn expect_user(row: Row) -> Result<User, BackendError> {
    match row {
        Row::User(user) => Ok(user_from_row(user)),
        other => Err(BackendError::UnexpectedResponse(format!(
            "expected user row, got {other:?}"
        ))),
    }
}

/// Identity provider over the hosted backend.
pub struct RemoteIdentity<B, K> {
    backend: B,
    kv: K,
}

impl<B: Backend, K: KeyValueStore> RemoteIdentity<B, K> {
    /// Creates a provider reading users from `backend` and keeping the
    /// session marker in `kv`.
    pub const fn new(backend: B, kv: K) -> Self {
        Self { backend, kv }
    }

    async fn find(&self, column: Column, value: Value) -> Result<Option<User>, SessionError> {
        let rows = self
            .backend
            .select(Query::all(Table::Users).filter(column, value))
            .await?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(expect_user(row)?)),
            None => Ok(None),
        }
    }

    fn set_current(&self, user: User) -> Result<Session, SessionError> {
        self.kv.set(CURRENT_USER_ID_KEY, user.id.as_str())?;
        tracing::info!(user_id = %user.id, "logged in");
        Ok(Session { user })
    }
}

impl<B: Backend, K: KeyValueStore> IdentityProvider for RemoteIdentity<B, K> {
    async fn users(&self) -> Vec<User> {
        match self.backend.select(Query::all(Table::Users)).await {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| expect_user(row).ok())
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to list users");
                Vec::new()
            }
        }
    }

    async fn restore(&self) -> Result<Option<Session>, SessionError> {
        let Some(id) = self.kv.get(CURRENT_USER_ID_KEY)? else {
            return Ok(None);
        };
        let id = id.trim().to_string();
        match self.find(Column::Id, Value::Text(id.clone())).await? {
            Some(user) => Ok(Some(Session { user })),
            None => {
                tracing::info!(user_id = %id, "remembered user no longer exists, clearing");
                self.kv.remove(CURRENT_USER_ID_KEY)?;
                Ok(None)
            }
        }
    }

    async fn login(&self, user_id: &UserId) -> Result<Session, SessionError> {
        let user = self
            .find(Column::Id, Value::Text(user_id.as_str().to_string()))
            .await?
            .ok_or_else(|| SessionError::UnknownUser(user_id.clone()))?;
        self.set_current(user)
    }

    async fn register(&self, name: &str, email: &str) -> Result<Session, SessionError> {
        let (name, email) = registration_fields(name, email)?;
        let taken = self
            .users()
            .await
            .iter()
            .any(|u| same_email(&u.email, &email));
        if taken {
            return Err(SessionError::DuplicateEmail(email));
        }
        let row = self.backend.insert(NewRow::User { name, email }).await?;
        let user = expect_user(row)?;
        tracing::info!(user_id = %user.id, "user registered");
        self.set_current(user)
    }

    async fn logout(&self) -> Result<(), SessionError> {
        self.kv.remove(CURRENT_USER_ID_KEY)?;
        tracing::info!("logged out");
        Ok(())
    }
}

/// Smallest id at or above `start` that no user in `users` holds.
fn first_free_id(start: u64, users: &[User]) -> Option<u64> {
    let mut id = start;
    while users.iter().any(|u| u.id.as_str() == id.to_string()) {
        id = id.checked_add(1)?;
    }
    Some(id)
}
