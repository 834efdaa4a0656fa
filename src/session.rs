use std::time::Duration;

use tokio::{sync::watch, task::JoinHandle, time};
use tracing::warn;

use crate::services::{AuthState, AuthUser};

/// Whether the identity provider has reported at least once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unknown,
    Resolved,
}

/// The application-wide authentication state. Starts in the unknown phase
/// and resolves exactly once; later provider events only change `user`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub phase: SessionPhase,
    pub user: Option<AuthUser>,
}

impl Session {
    pub const fn unknown() -> Self {
        Self {
            phase: SessionPhase::Unknown,
            user: None,
        }
    }

    pub fn resolved(user: Option<AuthUser>) -> Self {
        Self {
            phase: SessionPhase::Resolved,
            user,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.phase == SessionPhase::Resolved
    }

    pub fn signed_in(&self) -> bool {
        self.is_resolved() && self.user.is_some()
    }
}

/// Maps identity-provider pushes into a `Session` watch channel. A
/// provider that stays silent past `resolve_timeout` degrades the session
/// to resolved-signed-out instead of loading forever.
pub struct SessionTracker {
    rx: watch::Receiver<Session>,
    task: JoinHandle<()>,
}

impl SessionTracker {
    pub fn spawn(
        provider: watch::Receiver<Option<AuthState>>,
        resolve_timeout: Duration,
    ) -> Self {
        let (tx, rx) = watch::channel(Session::unknown());
        let task = tokio::spawn(track(provider, tx, resolve_timeout));
        Self { rx, task }
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.rx.clone()
    }

    pub fn current(&self) -> Session {
        self.rx.borrow().clone()
    }

    /// Releases the provider-side listener.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

async fn track(
    mut provider: watch::Receiver<Option<AuthState>>,
    tx: watch::Sender<Session>,
    resolve_timeout: Duration,
) {
    let first = time::timeout(resolve_timeout, async {
        loop {
            if let Some(state) = provider.borrow_and_update().clone() {
                return Some(state);
            }
            if provider.changed().await.is_err() {
                return None;
            }
        }
    })
    .await;

    match first {
        Ok(Some(state)) => {
            let _ = tx.send(Session::resolved(state.user()));
        }
        Ok(None) => {
            warn!("identity provider went away before reporting; assuming signed out");
            let _ = tx.send(Session::resolved(None));
            return;
        }
        Err(_) => {
            warn!(
                timeout_secs = resolve_timeout.as_secs(),
                "identity provider did not report in time; assuming signed out"
            );
            let _ = tx.send(Session::resolved(None));
        }
    }

    loop {
        if provider.changed().await.is_err() {
            break;
        }
        let Some(state) = provider.borrow_and_update().clone() else {
            continue;
        };
        if tx.send(Session::resolved(state.user())).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user() -> AuthUser {
        AuthUser {
            id: Uuid::from_u128(1),
            email: "me@example.com".into(),
        }
    }

    #[tokio::test]
    async fn stays_unknown_until_provider_reports() {
        let (provider_tx, provider_rx) = watch::channel(None);
        let tracker = SessionTracker::spawn(provider_rx, Duration::from_secs(60));
        let mut sessions = tracker.subscribe();

        assert_eq!(sessions.borrow().phase, SessionPhase::Unknown);

        provider_tx
            .send(Some(AuthState::SignedIn(user())))
            .expect("tracker should be listening");
        sessions.changed().await.expect("session should update");

        let session = sessions.borrow().clone();
        assert_eq!(session.phase, SessionPhase::Resolved);
        assert_eq!(session.user, Some(user()));

        tracker.shutdown();
    }

    #[tokio::test]
    async fn sign_out_clears_user_but_stays_resolved() {
        let (provider_tx, provider_rx) = watch::channel(Some(AuthState::SignedIn(user())));
        let tracker = SessionTracker::spawn(provider_rx, Duration::from_secs(60));
        let mut sessions = tracker.subscribe();

        sessions
            .wait_for(|session| session.signed_in())
            .await
            .expect("initial state should resolve signed in");

        provider_tx
            .send(Some(AuthState::SignedOut))
            .expect("tracker should be listening");
        let session = sessions
            .wait_for(|session| session.user.is_none())
            .await
            .expect("sign-out should propagate")
            .clone();

        assert_eq!(session.phase, SessionPhase::Resolved);

        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_provider_degrades_to_signed_out() {
        let (_provider_tx, provider_rx) = watch::channel(None);
        let tracker = SessionTracker::spawn(provider_rx, Duration::from_secs(5));
        let mut sessions = tracker.subscribe();

        sessions.changed().await.expect("timeout should resolve");
        let session = sessions.borrow().clone();
        assert_eq!(session.phase, SessionPhase::Resolved);
        assert!(session.user.is_none());

        tracker.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn late_report_after_timeout_still_lands() {
        let (provider_tx, provider_rx) = watch::channel(None);
        let tracker = SessionTracker::spawn(provider_rx, Duration::from_secs(5));
        let mut sessions = tracker.subscribe();

        sessions.changed().await.expect("timeout should resolve");
        assert!(sessions.borrow().user.is_none());

        provider_tx
            .send(Some(AuthState::SignedIn(user())))
            .expect("tracker should still be listening");
        let session = sessions
            .wait_for(|session| session.user.is_some())
            .await
            .expect("late sign-in should propagate")
            .clone();

        assert_eq!(session.user, Some(user()));

        tracker.shutdown();
    }
}
