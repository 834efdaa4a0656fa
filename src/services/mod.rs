use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::capsule::{Capsule, CapsuleId};

pub mod vault;

pub type AccountId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: AccountId,
    pub email: String,
}

/// What the identity provider reports once it has resolved a state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedIn(AuthUser),
    SignedOut,
}

impl AuthState {
    pub fn user(&self) -> Option<AuthUser> {
        match self {
            Self::SignedIn(user) => Some(user.clone()),
            Self::SignedOut => None,
        }
    }
}

/// Profile document stored alongside an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: AccountId,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("an account already exists for {0}")]
    EmailTaken(String),
    #[error("the old password is incorrect")]
    WrongOldPassword,
    #[error("no user is currently signed in")]
    NotSignedIn,
    #[error("identity backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt document: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("document store failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("could not store {file}: {source}")]
    Io {
        file: String,
        source: std::io::Error,
    },
    #[error("upload interrupted: {0}")]
    Interrupted(String),
}

/// Credential-based identity provider. Models a client SDK: one ambient
/// session per process, pushed to subscribers on every change.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, IdentityError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, IdentityError>;

    async fn sign_out(&self) -> Result<(), IdentityError>;

    async fn change_password(&self, old: &str, new: &str) -> Result<(), IdentityError>;

    /// Deletes the signed-in account and ends the session.
    async fn delete_account(&self) -> Result<(), IdentityError>;

    /// Push-based session changes. The value stays `None` until the
    /// provider has resolved its first state; it never reverts to `None`.
    fn session_changes(&self) -> watch::Receiver<Option<AuthState>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn profile(&self, account: AccountId) -> Result<Option<UserProfile>, StoreError>;

    async fn create_profile(&self, profile: UserProfile) -> Result<(), StoreError>;

    async fn delete_profile(&self, account: AccountId) -> Result<(), StoreError>;

    async fn username_taken(&self, username: &str) -> Result<bool, StoreError>;

    /// Profiles whose email is in `emails`. Unknown emails are simply
    /// absent from the result.
    async fn profiles_by_email(&self, emails: &[String]) -> Result<Vec<UserProfile>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapsuleQuery {
    OwnedBy(AccountId),
    SharedWith(String),
}

#[async_trait]
pub trait CapsuleStore: Send + Sync {
    async fn create(&self, capsule: Capsule) -> Result<CapsuleId, StoreError>;

    async fn fetch(&self, id: CapsuleId) -> Result<Option<Capsule>, StoreError>;

    async fn delete(&self, id: CapsuleId) -> Result<(), StoreError>;

    /// Live snapshots for a query. The initial value is the current match
    /// set; every store mutation afterwards delivers a fresh snapshot.
    /// Dropping the receiver releases the subscription.
    async fn subscribe(
        &self,
        query: CapsuleQuery,
    ) -> Result<watch::Receiver<Vec<Capsule>>, StoreError>;
}

/// Black-box media upload: hand over a file, get back a URL or an error.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(&self, file: &Path) -> Result<String, UploadError>;
}

/// The full service surface the application is wired against.
#[derive(Clone)]
pub struct Services {
    pub identity: Arc<dyn IdentityService>,
    pub profiles: Arc<dyn ProfileStore>,
    pub capsules: Arc<dyn CapsuleStore>,
    pub media: Arc<dyn MediaUploader>,
}
