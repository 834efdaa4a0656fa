use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use tokio::{
    fs,
    sync::{RwLock, watch},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    AccountId, AuthState, AuthUser, CapsuleQuery, CapsuleStore, IdentityError, IdentityService,
    MediaUploader, ProfileStore, StoreError, UploadError, UserProfile,
};
use crate::capsule::{Capsule, CapsuleId};

const ACCOUNTS_FILE: &str = "accounts.json";
const PROFILES_FILE: &str = "profiles.json";
const CAPSULES_FILE: &str = "capsules.json";
const SESSION_FILE: &str = "session.json";
const MEDIA_DIR: &str = "media";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRecord {
    id: AccountId,
    email: String,
    salt: String,
    password_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSession {
    account_id: AccountId,
}

#[derive(Debug, Default)]
struct VaultInner {
    accounts: Vec<AccountRecord>,
    profiles: Vec<UserProfile>,
    capsules: Vec<Capsule>,
    revision: u64,
}

/// File-backed implementation of every collaborator service: accounts,
/// profile documents, capsule documents with live query subscriptions,
/// and media storage. One ambient client session per process, persisted
/// across restarts.
pub struct LocalVault {
    root: PathBuf,
    inner: Arc<RwLock<VaultInner>>,
    changed: watch::Sender<u64>,
    auth: watch::Sender<Option<AuthState>>,
}

impl LocalVault {
    pub async fn open(root: PathBuf) -> Result<Arc<Self>, StoreError> {
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join(MEDIA_DIR)).await?;

        let inner = VaultInner {
            accounts: load_or_default(&root.join(ACCOUNTS_FILE)).await?,
            profiles: load_or_default(&root.join(PROFILES_FILE)).await?,
            capsules: load_or_default(&root.join(CAPSULES_FILE)).await?,
            revision: 0,
        };

        info!(
            vault = %root.display(),
            accounts = inner.accounts.len(),
            capsules = inner.capsules.len(),
            "vault opened"
        );

        let (changed, _) = watch::channel(0);
        let (auth, _) = watch::channel(None);

        Ok(Arc::new(Self {
            root,
            inner: Arc::new(RwLock::new(inner)),
            changed,
            auth,
        }))
    }

    /// Resolves the persisted client session in the background and pushes
    /// the provider's first report. Until this lands, `session_changes`
    /// subscribers see `None`.
    pub fn resolve_startup_session(self: &Arc<Self>) {
        let vault = Arc::clone(self);
        tokio::spawn(async move {
            let restored = vault.restore_session().await;
            let state = match restored {
                Some(user) => {
                    debug!(email = %user.email, "restored persisted session");
                    AuthState::SignedIn(user)
                }
                None => AuthState::SignedOut,
            };
            vault.auth.send_replace(Some(state));
        });
    }

    async fn restore_session(&self) -> Option<AuthUser> {
        let bytes = fs::read(self.root.join(SESSION_FILE)).await.ok()?;
        let persisted: PersistedSession = serde_json::from_slice(&bytes).ok()?;

        let inner = self.inner.read().await;
        inner
            .accounts
            .iter()
            .find(|account| account.id == persisted.account_id)
            .map(|account| AuthUser {
                id: account.id,
                email: account.email.clone(),
            })
    }

    async fn persist_session(&self, account: AccountId) -> Result<(), StoreError> {
        write_json(
            &self.root.join(SESSION_FILE),
            &PersistedSession {
                account_id: account,
            },
        )
        .await
    }

    async fn clear_session(&self) {
        if let Err(err) = fs::remove_file(self.root.join(SESSION_FILE)).await {
            if err.kind() != ErrorKind::NotFound {
                warn!(?err, "failed to remove persisted session");
            }
        }
    }

    fn current_user(&self) -> Result<AuthUser, IdentityError> {
        match self.auth.borrow().as_ref() {
            Some(AuthState::SignedIn(user)) => Ok(user.clone()),
            _ => Err(IdentityError::NotSignedIn),
        }
    }

    // send_replace: the state must stick even while nobody subscribes.
    fn publish(&self, state: AuthState) {
        self.auth.send_replace(Some(state));
    }

    async fn persist_accounts(&self, inner: &VaultInner) -> Result<(), StoreError> {
        write_json(&self.root.join(ACCOUNTS_FILE), &inner.accounts).await
    }

    async fn persist_profiles(&self, inner: &VaultInner) -> Result<(), StoreError> {
        write_json(&self.root.join(PROFILES_FILE), &inner.profiles).await
    }

    async fn persist_capsules(&self, inner: &VaultInner) -> Result<(), StoreError> {
        write_json(&self.root.join(CAPSULES_FILE), &inner.capsules).await
    }

    fn bump(&self, inner: &mut VaultInner) {
        inner.revision += 1;
        self.changed.send_replace(inner.revision);
    }
}

fn digest_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn matches_query(capsule: &Capsule, query: &CapsuleQuery) -> bool {
    match query {
        CapsuleQuery::OwnedBy(account) => capsule.creator_id == *account,
        CapsuleQuery::SharedWith(email) => {
            capsule.collaborator_emails.iter().any(|e| e == email)
        }
    }
}

fn snapshot(capsules: &[Capsule], query: &CapsuleQuery) -> Vec<Capsule> {
    capsules
        .iter()
        .filter(|capsule| matches_query(capsule, query))
        .cloned()
        .collect()
}

async fn load_or_default<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    match fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let encoded = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &encoded).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl IdentityService for LocalVault {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, IdentityError> {
        let mut inner = self.inner.write().await;
        if inner
            .accounts
            .iter()
            .any(|account| account.email.eq_ignore_ascii_case(email))
        {
            return Err(IdentityError::EmailTaken(email.to_string()));
        }

        let salt = Uuid::new_v4().simple().to_string();
        let record = AccountRecord {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_digest: digest_password(&salt, password),
            salt,
        };
        let user = AuthUser {
            id: record.id,
            email: record.email.clone(),
        };

        inner.accounts.push(record);
        self.persist_accounts(&inner)
            .await
            .map_err(|err| IdentityError::Backend(err.to_string()))?;
        drop(inner);

        if let Err(err) = self.persist_session(user.id).await {
            warn!(?err, "failed to persist session after sign-up");
        }
        self.publish(AuthState::SignedIn(user.clone()));
        info!(email = %user.email, "account created");
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, IdentityError> {
        let inner = self.inner.read().await;
        let account = inner
            .accounts
            .iter()
            .find(|account| account.email.eq_ignore_ascii_case(email))
            .ok_or(IdentityError::InvalidCredentials)?;

        if digest_password(&account.salt, password) != account.password_digest {
            return Err(IdentityError::InvalidCredentials);
        }

        let user = AuthUser {
            id: account.id,
            email: account.email.clone(),
        };
        drop(inner);

        if let Err(err) = self.persist_session(user.id).await {
            warn!(?err, "failed to persist session after sign-in");
        }
        self.publish(AuthState::SignedIn(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.clear_session().await;
        self.publish(AuthState::SignedOut);
        Ok(())
    }

    async fn change_password(&self, old: &str, new: &str) -> Result<(), IdentityError> {
        let user = self.current_user()?;

        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .iter_mut()
            .find(|account| account.id == user.id)
            .ok_or(IdentityError::NotSignedIn)?;

        if digest_password(&account.salt, old) != account.password_digest {
            return Err(IdentityError::WrongOldPassword);
        }

        let salt = Uuid::new_v4().simple().to_string();
        account.password_digest = digest_password(&salt, new);
        account.salt = salt;

        self.persist_accounts(&inner)
            .await
            .map_err(|err| IdentityError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn delete_account(&self) -> Result<(), IdentityError> {
        let user = self.current_user()?;

        let mut inner = self.inner.write().await;
        inner.accounts.retain(|account| account.id != user.id);
        self.persist_accounts(&inner)
            .await
            .map_err(|err| IdentityError::Backend(err.to_string()))?;
        drop(inner);

        self.clear_session().await;
        self.publish(AuthState::SignedOut);
        info!(email = %user.email, "account deleted");
        Ok(())
    }

    fn session_changes(&self) -> watch::Receiver<Option<AuthState>> {
        self.auth.subscribe()
    }
}

#[async_trait]
impl ProfileStore for LocalVault {
    async fn profile(&self, account: AccountId) -> Result<Option<UserProfile>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .profiles
            .iter()
            .find(|profile| profile.uid == account)
            .cloned())
    }

    async fn create_profile(&self, profile: UserProfile) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.profiles.retain(|existing| existing.uid != profile.uid);
        inner.profiles.push(profile);
        self.persist_profiles(&inner).await
    }

    async fn delete_profile(&self, account: AccountId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.profiles.retain(|profile| profile.uid != account);
        self.persist_profiles(&inner).await
    }

    async fn username_taken(&self, username: &str) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .profiles
            .iter()
            .any(|profile| profile.username == username))
    }

    async fn profiles_by_email(&self, emails: &[String]) -> Result<Vec<UserProfile>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .profiles
            .iter()
            .filter(|profile| emails.contains(&profile.email))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CapsuleStore for LocalVault {
    async fn create(&self, capsule: Capsule) -> Result<CapsuleId, StoreError> {
        let id = capsule.id;
        let mut inner = self.inner.write().await;
        inner.capsules.push(capsule);
        self.persist_capsules(&inner).await?;
        self.bump(&mut inner);
        Ok(id)
    }

    async fn fetch(&self, id: CapsuleId) -> Result<Option<Capsule>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .capsules
            .iter()
            .find(|capsule| capsule.id == id)
            .cloned())
    }

    async fn delete(&self, id: CapsuleId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.capsules.retain(|capsule| capsule.id != id);
        self.persist_capsules(&inner).await?;
        self.bump(&mut inner);
        Ok(())
    }

    async fn subscribe(
        &self,
        query: CapsuleQuery,
    ) -> Result<watch::Receiver<Vec<Capsule>>, StoreError> {
        // Subscribe before the initial read so no mutation lands unseen
        // in between.
        let mut changes = self.changed.subscribe();
        let initial = {
            let inner = self.inner.read().await;
            snapshot(&inner.capsules, &query)
        };
        let (tx, rx) = watch::channel(initial);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let fresh = {
                            let inner = inner.read().await;
                            snapshot(&inner.capsules, &query)
                        };
                        if tx.send(fresh).is_err() {
                            break;
                        }
                    }
                    _ = tx.closed() => break,
                }
            }
            debug!("capsule subscription released");
        });

        Ok(rx)
    }
}

#[async_trait]
impl MediaUploader for LocalVault {
    async fn upload(&self, file: &Path) -> Result<String, UploadError> {
        let name = match file.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{}.{ext}", Uuid::new_v4().simple()),
            None => Uuid::new_v4().simple().to_string(),
        };
        let dest = self.root.join(MEDIA_DIR).join(&name);

        fs::copy(file, &dest).await.map_err(|source| UploadError::Io {
            file: file.display().to_string(),
            source,
        })?;

        debug!(from = %file.display(), to = %dest.display(), "media stored");
        Ok(dest.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    async fn open_vault(dir: &TempDir) -> Arc<LocalVault> {
        LocalVault::open(dir.path().to_path_buf())
            .await
            .expect("vault should open")
    }

    fn capsule(creator: AccountId, shared_with: &[&str]) -> Capsule {
        Capsule {
            id: Uuid::new_v4(),
            creator_id: creator,
            creator_email: "owner@example.com".into(),
            creator_username: "owner".into(),
            title: "sealed".into(),
            message: "later".into(),
            open_at: Utc.timestamp_opt(0, 0).unwrap(),
            created_at: Utc::now(),
            media_urls: Vec::new(),
            collaborator_emails: shared_with.iter().map(|s| s.to_string()).collect(),
            collaborators: Vec::new(),
        }
    }

    #[tokio::test]
    async fn sign_up_rejects_duplicate_email() {
        let dir = TempDir::new().expect("tempdir");
        let vault = open_vault(&dir).await;

        vault
            .sign_up("me@example.com", "hunter22")
            .await
            .expect("first sign-up should succeed");
        let err = vault
            .sign_up("ME@example.com", "other")
            .await
            .expect_err("duplicate email must be rejected");
        assert!(matches!(err, IdentityError::EmailTaken(_)));
    }

    #[tokio::test]
    async fn sign_in_verifies_credentials() {
        let dir = TempDir::new().expect("tempdir");
        let vault = open_vault(&dir).await;

        let created = vault
            .sign_up("me@example.com", "hunter22")
            .await
            .expect("sign-up should succeed");

        let signed_in = vault
            .sign_in("me@example.com", "hunter22")
            .await
            .expect("sign-in should succeed");
        assert_eq!(signed_in.id, created.id);

        let err = vault
            .sign_in("me@example.com", "wrong")
            .await
            .expect_err("wrong password must fail");
        assert!(matches!(err, IdentityError::InvalidCredentials));

        let err = vault
            .sign_in("nobody@example.com", "hunter22")
            .await
            .expect_err("unknown email must fail");
        assert!(matches!(err, IdentityError::InvalidCredentials));
    }

    #[tokio::test]
    async fn session_persists_across_reopen() {
        let dir = TempDir::new().expect("tempdir");
        {
            let vault = open_vault(&dir).await;
            vault
                .sign_up("me@example.com", "hunter22")
                .await
                .expect("sign-up should succeed");
        }

        let vault = open_vault(&dir).await;
        let mut changes = vault.session_changes();
        assert!(changes.borrow().is_none(), "unresolved until restore runs");

        vault.resolve_startup_session();
        changes.changed().await.expect("restore should report");
        match changes.borrow().clone() {
            Some(AuthState::SignedIn(user)) => assert_eq!(user.email, "me@example.com"),
            other => panic!("expected restored sign-in, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sign_out_clears_persisted_session() {
        let dir = TempDir::new().expect("tempdir");
        {
            let vault = open_vault(&dir).await;
            vault
                .sign_up("me@example.com", "hunter22")
                .await
                .expect("sign-up should succeed");
            vault.sign_out().await.expect("sign-out should succeed");
        }

        let vault = open_vault(&dir).await;
        let mut changes = vault.session_changes();
        vault.resolve_startup_session();
        changes.changed().await.expect("restore should report");
        assert_eq!(changes.borrow().clone(), Some(AuthState::SignedOut));
    }

    #[tokio::test]
    async fn change_password_requires_the_old_one() {
        let dir = TempDir::new().expect("tempdir");
        let vault = open_vault(&dir).await;
        vault
            .sign_up("me@example.com", "hunter22")
            .await
            .expect("sign-up should succeed");

        let err = vault
            .change_password("nope", "newpassword")
            .await
            .expect_err("wrong old password must fail");
        assert!(matches!(err, IdentityError::WrongOldPassword));

        vault
            .change_password("hunter22", "newpassword")
            .await
            .expect("change should succeed");
        vault
            .sign_in("me@example.com", "newpassword")
            .await
            .expect("new password should work");
        assert!(vault.sign_in("me@example.com", "hunter22").await.is_err());
    }

    #[tokio::test]
    async fn username_uniqueness_and_email_resolution() {
        let dir = TempDir::new().expect("tempdir");
        let vault = open_vault(&dir).await;

        let uid = Uuid::from_u128(5);
        vault
            .create_profile(UserProfile {
                uid,
                username: "keeper".into(),
                email: "keeper@example.com".into(),
            })
            .await
            .expect("profile should store");

        assert!(vault.username_taken("keeper").await.expect("query works"));
        assert!(!vault.username_taken("drifter").await.expect("query works"));

        let resolved = vault
            .profiles_by_email(&[
                "keeper@example.com".to_string(),
                "ghost@example.com".to_string(),
            ])
            .await
            .expect("query works");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].uid, uid);
    }

    #[tokio::test]
    async fn subscriptions_track_create_and_delete() {
        let dir = TempDir::new().expect("tempdir");
        let vault = open_vault(&dir).await;
        let owner = Uuid::from_u128(9);

        let mut owned = vault
            .subscribe(CapsuleQuery::OwnedBy(owner))
            .await
            .expect("subscribe works");
        assert!(owned.borrow().is_empty());

        let stored = vault
            .create(capsule(owner, &["friend@example.com"]))
            .await
            .expect("create works");
        owned.changed().await.expect("create should notify");
        assert_eq!(owned.borrow().len(), 1);

        let mut shared = vault
            .subscribe(CapsuleQuery::SharedWith("friend@example.com".into()))
            .await
            .expect("subscribe works");
        assert_eq!(shared.borrow().len(), 1);

        vault.delete(stored).await.expect("delete works");
        owned.changed().await.expect("delete should notify");
        assert!(owned.borrow().is_empty());
        shared.changed().await.expect("delete should notify");
        assert!(shared.borrow().is_empty());
    }

    #[tokio::test]
    async fn capsules_persist_across_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let owner = Uuid::from_u128(3);
        let id = {
            let vault = open_vault(&dir).await;
            vault
                .create(capsule(owner, &[]))
                .await
                .expect("create works")
        };

        let vault = open_vault(&dir).await;
        let fetched = vault.fetch(id).await.expect("fetch works");
        assert!(fetched.is_some(), "capsule should survive a reopen");
        assert!(
            vault
                .fetch(Uuid::new_v4())
                .await
                .expect("fetch works")
                .is_none()
        );
    }

    #[tokio::test]
    async fn upload_copies_into_media_dir_preserving_extension() {
        let dir = TempDir::new().expect("tempdir");
        let vault = open_vault(&dir).await;

        let source = dir.path().join("photo.jpg");
        fs::write(&source, b"not really a jpeg")
            .await
            .expect("write source");

        let url = vault.upload(&source).await.expect("upload works");
        assert!(url.ends_with(".jpg"));
        let stored = fs::read(&url).await.expect("stored file readable");
        assert_eq!(stored, b"not really a jpeg");

        let missing = dir.path().join("absent.png");
        assert!(vault.upload(&missing).await.is_err());
    }
}
