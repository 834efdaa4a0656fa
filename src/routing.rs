use uuid::Uuid;

use crate::{
    capsule::CapsuleId,
    session::{Session, SessionPhase},
};

/// Every screen the application can show, addressable by path for deep
/// links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Welcome,
    Auth,
    Dashboard,
    CreateCapsule,
    Capsule(CapsuleId),
    Settings,
}

impl Route {
    pub fn parse(path: &str) -> Option<Self> {
        match path {
            "/" | "" => Some(Self::Welcome),
            "/auth" => Some(Self::Auth),
            "/dashboard" => Some(Self::Dashboard),
            "/create-capsule" => Some(Self::CreateCapsule),
            "/settings" => Some(Self::Settings),
            other => {
                let id = other.strip_prefix("/capsule/")?;
                Uuid::parse_str(id).ok().map(Self::Capsule)
            }
        }
    }

    pub fn path(&self) -> String {
        match self {
            Self::Welcome => "/".into(),
            Self::Auth => "/auth".into(),
            Self::Dashboard => "/dashboard".into(),
            Self::CreateCapsule => "/create-capsule".into(),
            Self::Capsule(id) => format!("/capsule/{id}"),
            Self::Settings => "/settings".into(),
        }
    }

    /// Routes that require a signed-in session.
    pub fn protected(&self) -> bool {
        !matches!(self, Self::Welcome | Self::Auth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Session phase still unknown: show the loading placeholder,
    /// whatever was requested.
    Loading,
    Render(Route),
    Redirect(Route),
}

/// The authorization policy. Pure; re-evaluated on every navigation event
/// and every session change.
pub fn decide(session: &Session, requested: Route) -> RouteDecision {
    if session.phase == SessionPhase::Unknown {
        return RouteDecision::Loading;
    }

    let signed_in = session.user.is_some();
    match requested {
        Route::Auth if signed_in => RouteDecision::Redirect(Route::Dashboard),
        Route::Welcome | Route::Auth => RouteDecision::Render(requested),
        _ if !signed_in => RouteDecision::Redirect(Route::Auth),
        _ => RouteDecision::Render(requested),
    }
}

/// Like [`decide`], for raw paths: anything unparseable falls back to the
/// dashboard when signed in, else to the auth screen.
pub fn decide_path(session: &Session, path: &str) -> RouteDecision {
    match Route::parse(path) {
        Some(route) => decide(session, route),
        None => {
            if session.phase == SessionPhase::Unknown {
                RouteDecision::Loading
            } else if session.user.is_some() {
                RouteDecision::Redirect(Route::Dashboard)
            } else {
                RouteDecision::Redirect(Route::Auth)
            }
        }
    }
}
