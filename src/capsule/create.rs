use std::{
    collections::HashSet,
    fmt,
    path::PathBuf,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{info, warn};
use uuid::Uuid;

use super::{Capsule, CapsuleId, Collaborator};
use crate::services::{
    AuthUser, CapsuleStore, MediaUploader, ProfileStore, StoreError, UploadError,
};

/// Everything the creation form collects before sealing.
#[derive(Debug, Clone)]
pub struct CapsuleDraft {
    pub title: String,
    pub message: String,
    pub open_at: DateTime<Utc>,
    pub media_files: Vec<PathBuf>,
    pub collaborator_input: String,
}

/// Progress reported to the UI while a capsule is being sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationStatus {
    Sealing,
    CheckingCollaborators,
    UploadingMedia,
    Storing,
}

impl fmt::Display for CreationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Sealing => "Sealing your capsule...",
            Self::CheckingCollaborators => "Checking collaborators...",
            Self::UploadingMedia => "Uploading memories...",
            Self::Storing => "Placing capsule in the vault...",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum CreationError {
    #[error("media upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error("could not store the capsule: {0}")]
    Store(#[from] StoreError),
}

/// Splits free-text collaborator input into candidate emails: comma
/// separated, trimmed, empties dropped, duplicates collapsed keeping
/// first-seen order.
pub fn parse_collaborators(input: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut emails = Vec::new();
    for candidate in input.split(',') {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            continue;
        }
        if seen.insert(candidate.to_string()) {
            emails.push(candidate.to_string());
        }
    }
    emails
}

/// Seals a capsule: resolves the creator's display name, resolves
/// collaborators, uploads media, then persists the document. Uploads are
/// concurrent and all-or-nothing: one failure fails the whole creation and
/// no document is written. Files uploaded before a later failure are left
/// behind (no rollback).
pub async fn create_capsule(
    profiles: Arc<dyn ProfileStore>,
    capsules: Arc<dyn CapsuleStore>,
    media: Arc<dyn MediaUploader>,
    creator: AuthUser,
    draft: CapsuleDraft,
    status: mpsc::UnboundedSender<CreationStatus>,
) -> Result<CapsuleId, CreationError> {
    let _ = status.send(CreationStatus::Sealing);

    let creator_username = match profiles.profile(creator.id).await {
        Ok(Some(profile)) => profile.username,
        Ok(None) => creator.email.clone(),
        Err(err) => {
            warn!(?err, "profile lookup failed; falling back to account email");
            creator.email.clone()
        }
    };

    let collaborator_emails = parse_collaborators(&draft.collaborator_input);
    let mut collaborators = Vec::new();
    if !collaborator_emails.is_empty() {
        let _ = status.send(CreationStatus::CheckingCollaborators);
        collaborators = profiles
            .profiles_by_email(&collaborator_emails)
            .await?
            .into_iter()
            .map(|profile| Collaborator {
                uid: profile.uid,
                email: profile.email,
                username: profile.username,
            })
            .collect();
    }

    let mut media_urls = Vec::new();
    if !draft.media_files.is_empty() {
        let _ = status.send(CreationStatus::UploadingMedia);
        media_urls = upload_all(&media, &draft.media_files).await?;
    }

    let _ = status.send(CreationStatus::Storing);
    let capsule = Capsule {
        id: Uuid::new_v4(),
        creator_id: creator.id,
        creator_email: creator.email,
        creator_username,
        title: draft.title,
        message: draft.message,
        open_at: draft.open_at,
        // Stamped here, at persist time, not when sealing started.
        created_at: Utc::now(),
        media_urls,
        collaborator_emails,
        collaborators,
    };

    match capsules.create(capsule).await {
        Ok(id) => {
            info!(%id, "capsule sealed");
            Ok(id)
        }
        Err(err) => {
            warn!(?err, "capsule store failed after media upload; uploaded files were left behind");
            Err(err.into())
        }
    }
}

/// Uploads every file concurrently, preserving input order in the result.
async fn upload_all(
    media: &Arc<dyn MediaUploader>,
    files: &[PathBuf],
) -> Result<Vec<String>, UploadError> {
    let mut uploads = JoinSet::new();
    for (index, file) in files.iter().enumerate() {
        let uploader = Arc::clone(media);
        let file = file.clone();
        uploads.spawn(async move { (index, uploader.upload(&file).await) });
    }

    let mut urls: Vec<Option<String>> = vec![None; files.len()];
    let mut first_error = None;
    while let Some(joined) = uploads.join_next().await {
        match joined {
            Ok((index, Ok(url))) => urls[index] = Some(url),
            Ok((_, Err(err))) => {
                first_error.get_or_insert(err);
            }
            Err(err) => {
                first_error.get_or_insert(UploadError::Interrupted(err.to_string()));
            }
        }
    }

    if let Some(err) = first_error {
        let orphaned = urls.iter().flatten().count();
        if orphaned > 0 {
            warn!(orphaned, "uploads that finished before the failure were left behind");
        }
        return Err(err);
    }

    Ok(urls.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{AccountId, CapsuleQuery, UserProfile};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::{
        path::Path,
        sync::Mutex,
    };
    use tokio::sync::watch;

    struct FakeProfiles {
        known: Vec<UserProfile>,
        fail_profile_lookup: bool,
    }

    #[async_trait]
    impl ProfileStore for FakeProfiles {
        async fn profile(&self, account: AccountId) -> Result<Option<UserProfile>, StoreError> {
            if self.fail_profile_lookup {
                return Err(StoreError::Backend("profiles offline".into()));
            }
            Ok(self.known.iter().find(|p| p.uid == account).cloned())
        }

        async fn create_profile(&self, _profile: UserProfile) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete_profile(&self, _account: AccountId) -> Result<(), StoreError> {
            Ok(())
        }

        async fn username_taken(&self, username: &str) -> Result<bool, StoreError> {
            Ok(self.known.iter().any(|p| p.username == username))
        }

        async fn profiles_by_email(
            &self,
            emails: &[String],
        ) -> Result<Vec<UserProfile>, StoreError> {
            Ok(self
                .known
                .iter()
                .filter(|p| emails.contains(&p.email))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        created: Mutex<Vec<Capsule>>,
    }

    #[async_trait]
    impl CapsuleStore for RecordingStore {
        async fn create(&self, capsule: Capsule) -> Result<CapsuleId, StoreError> {
            let id = capsule.id;
            self.created
                .lock()
                .expect("store mutex poisoned")
                .push(capsule);
            Ok(id)
        }

        async fn fetch(&self, id: CapsuleId) -> Result<Option<Capsule>, StoreError> {
            Ok(self
                .created
                .lock()
                .expect("store mutex poisoned")
                .iter()
                .find(|c| c.id == id)
                .cloned())
        }

        async fn delete(&self, _id: CapsuleId) -> Result<(), StoreError> {
            Ok(())
        }

        async fn subscribe(
            &self,
            _query: CapsuleQuery,
        ) -> Result<watch::Receiver<Vec<Capsule>>, StoreError> {
            let (_tx, rx) = watch::channel(Vec::new());
            Ok(rx)
        }
    }

    struct FlakyUploader {
        fail_matching: Option<&'static str>,
    }

    #[async_trait]
    impl MediaUploader for FlakyUploader {
        async fn upload(&self, file: &Path) -> Result<String, UploadError> {
            let name = file.display().to_string();
            if let Some(pattern) = self.fail_matching {
                if name.contains(pattern) {
                    return Err(UploadError::Interrupted(format!("{name} rejected")));
                }
            }
            Ok(format!("vault/{name}"))
        }
    }

    fn creator() -> AuthUser {
        AuthUser {
            id: Uuid::from_u128(0xAA),
            email: "me@example.com".into(),
        }
    }

    fn draft(collaborators: &str, files: &[&str]) -> CapsuleDraft {
        CapsuleDraft {
            title: "New year letter".into(),
            message: "open me later".into(),
            open_at: Utc.timestamp_opt(4_102_444_800, 0).unwrap(),
            media_files: files.iter().map(PathBuf::from).collect(),
            collaborator_input: collaborators.to_string(),
        }
    }

    fn status_channel() -> (
        mpsc::UnboundedSender<CreationStatus>,
        mpsc::UnboundedReceiver<CreationStatus>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn collaborator_parsing_trims_and_deduplicates() {
        assert_eq!(
            parse_collaborators("a@x.com, b@x.com, a@x.com"),
            vec!["a@x.com".to_string(), "b@x.com".to_string()]
        );
        assert_eq!(
            parse_collaborators("  a@x.com ,, ,b@x.com"),
            vec!["a@x.com".to_string(), "b@x.com".to_string()]
        );
        assert!(parse_collaborators("").is_empty());
        assert!(parse_collaborators(" , ,, ").is_empty());
    }

    #[tokio::test]
    async fn unregistered_collaborators_keep_email_access() {
        let profiles = Arc::new(FakeProfiles {
            known: vec![UserProfile {
                uid: Uuid::from_u128(0xBB),
                username: "friend".into(),
                email: "friend@example.com".into(),
            }],
            fail_profile_lookup: false,
        });
        let store = Arc::new(RecordingStore::default());
        let uploader = Arc::new(FlakyUploader {
            fail_matching: None,
        });
        let (status_tx, _status_rx) = status_channel();

        create_capsule(
            profiles,
            Arc::clone(&store) as _,
            uploader,
            creator(),
            draft("friend@example.com, stranger@example.com", &[]),
            status_tx,
        )
        .await
        .expect("creation should succeed");

        let created = store.created.lock().expect("store mutex poisoned");
        let capsule = created.first().expect("one capsule stored");
        assert_eq!(
            capsule.collaborator_emails,
            vec![
                "friend@example.com".to_string(),
                "stranger@example.com".to_string()
            ]
        );
        assert_eq!(capsule.collaborators.len(), 1);
        assert_eq!(capsule.collaborators[0].username, "friend");
    }

    #[tokio::test]
    async fn one_failed_upload_fails_the_whole_creation() {
        let profiles = Arc::new(FakeProfiles {
            known: Vec::new(),
            fail_profile_lookup: false,
        });
        let store = Arc::new(RecordingStore::default());
        let uploader = Arc::new(FlakyUploader {
            fail_matching: Some("second"),
        });
        let (status_tx, _status_rx) = status_channel();

        let result = create_capsule(
            profiles,
            Arc::clone(&store) as _,
            uploader,
            creator(),
            draft("", &["first.jpg", "second.jpg"]),
            status_tx,
        )
        .await;

        assert!(matches!(result, Err(CreationError::Upload(_))));
        assert!(
            store.created.lock().expect("store mutex poisoned").is_empty(),
            "no capsule document may exist after a failed upload"
        );
    }

    #[tokio::test]
    async fn profile_lookup_failure_falls_back_to_email() {
        let profiles = Arc::new(FakeProfiles {
            known: Vec::new(),
            fail_profile_lookup: true,
        });
        let store = Arc::new(RecordingStore::default());
        let uploader = Arc::new(FlakyUploader {
            fail_matching: None,
        });
        let (status_tx, _status_rx) = status_channel();

        create_capsule(
            profiles,
            Arc::clone(&store) as _,
            uploader,
            creator(),
            draft("", &[]),
            status_tx,
        )
        .await
        .expect("profile lookup failure must not fail creation");

        let created = store.created.lock().expect("store mutex poisoned");
        assert_eq!(created[0].creator_username, "me@example.com");
    }

    #[tokio::test]
    async fn uploads_preserve_input_order_and_statuses_flow() {
        let profiles = Arc::new(FakeProfiles {
            known: Vec::new(),
            fail_profile_lookup: false,
        });
        let store = Arc::new(RecordingStore::default());
        let uploader = Arc::new(FlakyUploader {
            fail_matching: None,
        });
        let (status_tx, mut status_rx) = status_channel();

        create_capsule(
            profiles,
            Arc::clone(&store) as _,
            uploader,
            creator(),
            draft("a@x.com", &["one.jpg", "two.mp4", "three.pdf"]),
            status_tx,
        )
        .await
        .expect("creation should succeed");

        let created = store.created.lock().expect("store mutex poisoned");
        assert_eq!(
            created[0].media_urls,
            vec![
                "vault/one.jpg".to_string(),
                "vault/two.mp4".to_string(),
                "vault/three.pdf".to_string()
            ]
        );

        let mut statuses = Vec::new();
        while let Ok(status) = status_rx.try_recv() {
            statuses.push(status);
        }
        assert_eq!(
            statuses,
            vec![
                CreationStatus::Sealing,
                CreationStatus::CheckingCollaborators,
                CreationStatus::UploadingMedia,
                CreationStatus::Storing,
            ]
        );
    }
}
