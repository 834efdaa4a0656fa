use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::AccountId;

pub mod create;

pub type CapsuleId = Uuid;

/// A collaborator resolved to a registered account at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    pub uid: AccountId,
    pub email: String,
    pub username: String,
}

/// A sealed time capsule. Immutable once stored; the only mutation the
/// application supports is owner-initiated deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capsule {
    pub id: CapsuleId,
    pub creator_id: AccountId,
    pub creator_email: String,
    pub creator_username: String,
    pub title: String,
    pub message: String,
    pub open_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub collaborator_emails: Vec<String>,
    #[serde(default)]
    pub collaborators: Vec<Collaborator>,
}

impl Capsule {
    /// Unlock gate: the scheduled open time itself counts as unlocked.
    pub fn is_unlocked(&self, now: DateTime<Utc>) -> bool {
        now >= self.open_at
    }

    pub fn is_owner(&self, account: AccountId) -> bool {
        self.creator_id == account
    }

    /// Whether `account`/`email` may read this capsule at all. Invited
    /// emails grant access even before the invitee registers.
    pub fn grants_access(&self, account: AccountId, email: &str) -> bool {
        self.is_owner(account)
            || self.collaborators.iter().any(|c| c.uid == account)
            || self.collaborator_emails.iter().any(|e| e == email)
    }
}

/// Merge the owned and shared result sets into one list. An id present in
/// both keeps the owned copy. Output is ordered by `created_at` descending,
/// ties by id so re-sorts are stable.
pub fn reconcile(owned: &[Capsule], shared: &[Capsule]) -> Vec<Capsule> {
    let mut merged: HashMap<CapsuleId, &Capsule> = HashMap::new();
    for capsule in owned.iter().chain(shared.iter()) {
        merged.entry(capsule.id).or_insert(capsule);
    }

    let mut capsules: Vec<Capsule> = merged.into_values().cloned().collect();
    capsules.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    capsules
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Pdf,
    Unknown,
}

impl MediaKind {
    /// Classify a stored media URL by its extension, ignoring any query
    /// string suffix.
    pub fn classify(url: &str) -> Self {
        let tail = url.rsplit('.').next().unwrap_or("");
        let extension = tail.split('?').next().unwrap_or("").to_ascii_lowercase();

        match extension.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "svg" => Self::Image,
            "mp4" | "webm" | "ogg" => Self::Video,
            "pdf" => Self::Pdf,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Pdf => "pdf",
            Self::Unknown => "file",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn capsule(id_byte: u8, created_at: i64) -> Capsule {
        Capsule {
            id: Uuid::from_u128(id_byte as u128),
            creator_id: Uuid::from_u128(0xAA),
            creator_email: "owner@example.com".into(),
            creator_username: "owner".into(),
            title: format!("capsule {id_byte}"),
            message: "hello".into(),
            open_at: Utc.timestamp_opt(0, 0).unwrap(),
            created_at: Utc.timestamp_opt(created_at, 0).unwrap(),
            media_urls: Vec::new(),
            collaborator_emails: Vec::new(),
            collaborators: Vec::new(),
        }
    }

    #[test]
    fn unlock_boundary_is_inclusive() {
        let mut sealed = capsule(1, 0);
        sealed.open_at = Utc.timestamp_opt(1_000, 0).unwrap();

        assert!(!sealed.is_unlocked(Utc.timestamp_opt(999, 0).unwrap()));
        assert!(sealed.is_unlocked(Utc.timestamp_opt(1_000, 0).unwrap()));
        assert!(sealed.is_unlocked(Utc.timestamp_opt(1_001, 0).unwrap()));
    }

    #[test]
    fn unlock_is_monotonic_in_now() {
        let mut sealed = capsule(1, 0);
        sealed.open_at = Utc.timestamp_opt(500, 0).unwrap();

        let mut unlocked_seen = false;
        for second in 0..1_000 {
            let now = Utc.timestamp_opt(second, 0).unwrap();
            if sealed.is_unlocked(now) {
                unlocked_seen = true;
            } else {
                assert!(!unlocked_seen, "capsule re-locked at {second}");
            }
        }
        assert!(unlocked_seen);
    }

    #[test]
    fn reconcile_deduplicates_shared_ids() {
        let owned = vec![capsule(1, 10)];
        let shared = vec![capsule(1, 10), capsule(2, 20)];

        let merged = reconcile(&owned, &shared);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, Uuid::from_u128(2));
        assert_eq!(merged[1].id, Uuid::from_u128(1));
    }

    #[test]
    fn reconcile_keeps_owned_copy_on_conflict() {
        let mut ours = capsule(1, 10);
        ours.title = "owned copy".into();
        let mut theirs = capsule(1, 10);
        theirs.title = "shared copy".into();

        let merged = reconcile(&[ours], &[theirs]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "owned copy");
    }

    #[test]
    fn reconcile_sorts_newest_first_for_any_input_order() {
        let a = capsule(1, 30);
        let b = capsule(2, 10);
        let c = capsule(3, 20);

        let forward = reconcile(&[a.clone(), b.clone()], &[c.clone()]);
        let reverse = reconcile(&[b, a], &[c]);

        let order: Vec<_> = forward.iter().map(|c| c.id).collect();
        assert_eq!(
            order,
            vec![Uuid::from_u128(1), Uuid::from_u128(3), Uuid::from_u128(2)]
        );
        assert_eq!(
            order,
            reverse.iter().map(|c| c.id).collect::<Vec<_>>(),
            "ordering must not depend on input order"
        );
    }

    #[test]
    fn reconcile_breaks_created_at_ties_deterministically() {
        let first = reconcile(&[capsule(7, 10), capsule(3, 10)], &[]);
        let second = reconcile(&[capsule(3, 10)], &[capsule(7, 10)]);

        assert_eq!(
            first.iter().map(|c| c.id).collect::<Vec<_>>(),
            second.iter().map(|c| c.id).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn reconcile_is_idempotent() {
        let owned = vec![capsule(1, 5), capsule(2, 9)];
        let shared = vec![capsule(2, 9), capsule(4, 1)];

        let once = reconcile(&owned, &shared);
        let twice = reconcile(&owned, &shared);
        assert_eq!(
            once.iter().map(|c| c.id).collect::<Vec<_>>(),
            twice.iter().map(|c| c.id).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn access_extends_to_invited_emails() {
        let mut sealed = capsule(1, 0);
        sealed.collaborator_emails = vec!["friend@example.com".into()];

        let stranger = Uuid::from_u128(0xBB);
        assert!(sealed.grants_access(stranger, "friend@example.com"));
        assert!(!sealed.grants_access(stranger, "other@example.com"));
        assert!(sealed.grants_access(Uuid::from_u128(0xAA), "whatever@example.com"));
    }

    #[test]
    fn media_kind_from_extension() {
        assert_eq!(MediaKind::classify("vault/a1b2.jpg"), MediaKind::Image);
        assert_eq!(MediaKind::classify("vault/a1b2.JPEG"), MediaKind::Image);
        assert_eq!(MediaKind::classify("clip.webm"), MediaKind::Video);
        assert_eq!(MediaKind::classify("scan.pdf?v=2"), MediaKind::Pdf);
        assert_eq!(MediaKind::classify("notes.txt"), MediaKind::Unknown);
        assert_eq!(MediaKind::classify("no-extension"), MediaKind::Unknown);
    }
}
