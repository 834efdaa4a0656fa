use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use color_eyre::{Result, eyre::eyre};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::{
    select,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_stream::{StreamExt, wrappers::WatchStream};
use tracing::{debug, info, warn};

use crate::{
    capsule::{
        Capsule, CapsuleId, MediaKind,
        create::{self, CapsuleDraft, CreationStatus},
        reconcile,
    },
    config::Config,
    routing::{self, Route, RouteDecision},
    services::{
        AuthUser, CapsuleQuery, CapsuleStore, IdentityError, Services, UserProfile,
        vault::LocalVault,
    },
    session::{Session, SessionTracker},
    tui::{self, Event, TerminalGuard},
    ui::{
        self, AppViewModel, ChromeView, FieldView, ScreenView,
        auth::AuthView,
        capsule::{CapsuleDetailView, MediaItem, UnlockedCapsule},
        create::CreateView,
        dashboard::{CapsuleCard, DashboardView},
        settings::SettingsView,
        welcome::WelcomeView,
    },
};

const SPLASH_DELAY: Duration = Duration::from_secs(3);
const SUCCESS_NAV_DELAY: Duration = Duration::from_millis(1_500);
const MIN_PASSWORD_CHARS: usize = 6;

const LOGIN_FAILED: &str = "Invalid email or password. Please try again.";
const USERNAME_TAKEN: &str = "This username is already taken. Please choose another one.";
const GENERIC_FAILURE: &str = "An error occurred. Please try again.";
const WRONG_OLD_PASSWORD: &str = "The old password you entered is incorrect.";
const DELETE_ACCOUNT_FAILED: &str =
    "Error deleting account. You may need to log in again to complete this action.";
const CAPSULE_SEALED: &str = "Capsule sealed successfully!";

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

pub struct CapsuleApp {
    tick_rate: Duration,
    services: Services,
    tracker: SessionTracker,
    session_rx: watch::Receiver<Session>,
    msgs_tx: mpsc::UnboundedSender<AppMsg>,
    msgs_rx: Option<mpsc::UnboundedReceiver<AppMsg>>,
    screen: Screen,
    pending_nav: Option<(Instant, Route)>,
}

enum AppMsg {
    AuthFinished(Result<(), String>),
    Greeting(String),
    DashboardSnapshot(Vec<Capsule>),
    DashboardFailed(String),
    CapsuleLoaded {
        id: CapsuleId,
        outcome: CapsuleOutcome,
    },
    CapsuleDeleted(Result<(), String>),
    CreationStatus(CreationStatus),
    CreationFinished(Result<CapsuleId, String>),
    PasswordChanged(Result<(), String>),
    AccountDeleted(Result<(), String>),
}

enum CapsuleOutcome {
    Found(Box<Capsule>),
    Missing,
    Failed(String),
}

/// Aborts the wrapped task when the owning screen goes away, so torn-down
/// views never receive further subscription updates.
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum Screen {
    Welcome { shown_since: Option<Instant> },
    Auth(AuthForm),
    Dashboard(DashboardState),
    Create(CreateForm),
    Capsule(CapsuleDetail),
    Settings(SettingsForm),
}

impl Screen {
    fn route(&self) -> Route {
        match self {
            Self::Welcome { .. } => Route::Welcome,
            Self::Auth(_) => Route::Auth,
            Self::Dashboard(_) => Route::Dashboard,
            Self::Create(_) => Route::CreateCapsule,
            Self::Capsule(detail) => Route::Capsule(detail.id),
            Self::Settings(_) => Route::Settings,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum AuthMode {
    #[default]
    Login,
    SignUp,
}

#[derive(Default)]
struct AuthForm {
    mode: AuthMode,
    username: String,
    email: String,
    password: String,
    focus: usize,
    error: Option<String>,
    busy: bool,
}

impl AuthForm {
    fn field_count(&self) -> usize {
        match self.mode {
            AuthMode::Login => 2,
            AuthMode::SignUp => 3,
        }
    }

    fn focused_value_mut(&mut self) -> &mut String {
        match (self.mode, self.focus) {
            (AuthMode::SignUp, 0) => &mut self.username,
            (AuthMode::SignUp, 1) | (AuthMode::Login, 0) => &mut self.email,
            _ => &mut self.password,
        }
    }

    fn toggle_mode(&mut self) {
        self.mode = match self.mode {
            AuthMode::Login => AuthMode::SignUp,
            AuthMode::SignUp => AuthMode::Login,
        };
        self.username.clear();
        self.email.clear();
        self.password.clear();
        self.focus = 0;
        self.error = None;
    }
}

struct DashboardState {
    greeting: Option<String>,
    capsules: Vec<Capsule>,
    loading: bool,
    selected: usize,
    confirm_delete: Option<CapsuleId>,
    error: Option<String>,
    _watcher: TaskGuard,
}

#[derive(Default)]
struct CreateForm {
    title: String,
    message: String,
    open_date: String,
    media_input: String,
    collaborator_input: String,
    focus: usize,
    busy: bool,
    status: Option<String>,
    error: Option<String>,
}

impl CreateForm {
    const FIELDS: usize = 5;

    fn focused_value_mut(&mut self) -> &mut String {
        match self.focus {
            0 => &mut self.title,
            1 => &mut self.message,
            2 => &mut self.open_date,
            3 => &mut self.media_input,
            _ => &mut self.collaborator_input,
        }
    }
}

struct CapsuleDetail {
    id: CapsuleId,
    fetch: DetailFetch,
}

enum DetailFetch {
    Loading,
    Found(Box<Capsule>),
    Missing,
    Failed(String),
}

#[derive(Default)]
struct SettingsForm {
    old_password: String,
    new_password: String,
    confirm_password: String,
    focus: usize,
    error: Option<String>,
    success: Option<String>,
    busy: bool,
    confirm_delete: Option<String>,
}

impl SettingsForm {
    const FIELDS: usize = 3;

    fn focused_value_mut(&mut self) -> &mut String {
        match self.focus {
            0 => &mut self.old_password,
            1 => &mut self.new_password,
            _ => &mut self.confirm_password,
        }
    }
}

impl CapsuleApp {
    pub async fn bootstrap(config: Config) -> Result<Self> {
        let vault = LocalVault::open(config.vault_dir.clone())
            .await
            .map_err(|err| {
                eyre!(
                    "could not open the vault at {}: {err}",
                    config.vault_dir.display()
                )
            })?;

        let services = Services {
            identity: vault.clone(),
            profiles: vault.clone(),
            capsules: vault.clone(),
            media: vault.clone(),
        };

        let tracker = SessionTracker::spawn(
            services.identity.session_changes(),
            Duration::from_secs(config.resolve_timeout_secs),
        );
        vault.resolve_startup_session();

        let session_rx = tracker.subscribe();
        let (msgs_tx, msgs_rx) = mpsc::unbounded_channel();

        Ok(Self {
            tick_rate: Duration::from_millis(250),
            services,
            tracker,
            session_rx,
            msgs_tx,
            msgs_rx: Some(msgs_rx),
            screen: Screen::Welcome { shown_since: None },
            pending_nav: None,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        info!("starting ChronoVault");

        let mut terminal = TerminalGuard::new()?;
        let (tx, mut input_rx) = mpsc::unbounded_channel();
        let input_handle = tui::spawn_event_loop(tx, self.tick_rate);

        let mut msgs_rx = self
            .msgs_rx
            .take()
            .ok_or_else(|| eyre!("application already running"))?;
        let mut session_rx = self.session_rx.clone();

        loop {
            let view_model = self.build_view_model();
            terminal.draw(|frame| tui::render_app(frame, &view_model))?;

            let exit_requested = select! {
                maybe_event = input_rx.recv() => {
                    match maybe_event {
                        Some(Event::Input(key)) => self.handle_key(key),
                        Some(Event::Tick) => {
                            self.handle_tick();
                            false
                        }
                        Some(Event::Resize(width, height)) => {
                            debug!(%width, %height, "terminal resized");
                            false
                        }
                        None => true,
                    }
                }
                maybe_msg = msgs_rx.recv() => {
                    if let Some(msg) = maybe_msg {
                        self.handle_msg(msg);
                    }
                    false
                }
                changed = session_rx.changed() => {
                    if changed.is_ok() {
                        self.apply_session_change();
                        false
                    } else {
                        true
                    }
                }
                ctrl_c = tokio::signal::ctrl_c() => {
                    if let Err(err) = ctrl_c {
                        warn!(?err, "failed to listen for ctrl+c");
                    } else {
                        info!("received ctrl+c");
                    }
                    true
                }
            };

            if exit_requested {
                break;
            }
        }

        drop(terminal);
        drop(input_rx);

        if let Err(err) = input_handle.await {
            warn!(?err, "terminal event loop task ended unexpectedly");
        }

        // Dropping the screen releases any live capsule subscriptions.
        self.screen = Screen::Welcome { shown_since: None };
        self.tracker.shutdown();

        info!("ChronoVault shutting down");
        Ok(())
    }

    fn session(&self) -> Session {
        self.session_rx.borrow().clone()
    }

    // --- navigation ---

    fn navigate(&mut self, route: Route) {
        match routing::decide(&self.session(), route) {
            RouteDecision::Loading => {
                debug!(path = %route.path(), "navigation deferred while session resolves");
            }
            RouteDecision::Redirect(target) => {
                debug!(from = %route.path(), to = %target.path(), "redirecting");
                self.navigate(target);
            }
            RouteDecision::Render(route) => self.enter(route),
        }
    }

    fn enter(&mut self, route: Route) {
        debug!(path = %route.path(), "entering");
        self.pending_nav = None;

        // Replacing the screen drops its task guard, which tears down any
        // subscriptions the old view owned.
        self.screen = match (route, self.session().user) {
            (Route::Welcome, _) => Screen::Welcome { shown_since: None },
            (Route::Auth, _) => Screen::Auth(AuthForm::default()),
            (Route::Dashboard, Some(user)) => Screen::Dashboard(self.spawn_dashboard(user)),
            (Route::CreateCapsule, Some(_)) => Screen::Create(CreateForm::default()),
            (Route::Capsule(id), Some(user)) => {
                Screen::Capsule(self.spawn_capsule_fetch(id, user))
            }
            (Route::Settings, Some(_)) => Screen::Settings(SettingsForm::default()),
            // decide() never routes here signed out; land on the form.
            (_, None) => Screen::Auth(AuthForm::default()),
        };
    }

    fn apply_session_change(&mut self) {
        let session = self.session();
        if !session.is_resolved() {
            return;
        }

        let route = self.screen.route();
        match routing::decide(&session, route) {
            RouteDecision::Render(_) | RouteDecision::Loading => {}
            RouteDecision::Redirect(target) => {
                debug!(from = %route.path(), to = %target.path(), "session change redirect");
                self.navigate(target);
            }
        }
    }

    // --- background work ---

    fn spawn_dashboard(&self, user: AuthUser) -> DashboardState {
        let capsules = Arc::clone(&self.services.capsules);
        let msgs = self.msgs_tx.clone();
        let watcher = tokio::spawn(watch_capsules(capsules, user.clone(), msgs.clone()));

        let profiles = Arc::clone(&self.services.profiles);
        tokio::spawn(async move {
            let name = match profiles.profile(user.id).await {
                Ok(Some(profile)) => profile.username,
                Ok(None) => user.email.clone(),
                Err(err) => {
                    warn!(?err, "greeting lookup failed");
                    user.email.clone()
                }
            };
            let _ = msgs.send(AppMsg::Greeting(name));
        });

        DashboardState {
            greeting: None,
            capsules: Vec::new(),
            loading: true,
            selected: 0,
            confirm_delete: None,
            error: None,
            _watcher: TaskGuard(watcher),
        }
    }

    fn spawn_capsule_fetch(&self, id: CapsuleId, user: AuthUser) -> CapsuleDetail {
        let capsules = Arc::clone(&self.services.capsules);
        let msgs = self.msgs_tx.clone();

        tokio::spawn(async move {
            let outcome = match capsules.fetch(id).await {
                Ok(Some(capsule)) if capsule.grants_access(user.id, &user.email) => {
                    CapsuleOutcome::Found(Box::new(capsule))
                }
                Ok(Some(_)) => {
                    debug!(%id, "capsule hidden from this account");
                    CapsuleOutcome::Missing
                }
                Ok(None) => CapsuleOutcome::Missing,
                Err(err) => {
                    warn!(?err, "capsule fetch failed");
                    CapsuleOutcome::Failed(GENERIC_FAILURE.to_string())
                }
            };
            let _ = msgs.send(AppMsg::CapsuleLoaded { id, outcome });
        });

        CapsuleDetail {
            id,
            fetch: DetailFetch::Loading,
        }
    }

    fn sign_out(&self) {
        let services = self.services.clone();
        tokio::spawn(async move {
            if let Err(err) = services.identity.sign_out().await {
                warn!(?err, "sign-out failed");
            }
        });
    }

    fn delete_capsule(&self, id: CapsuleId) {
        let capsules = Arc::clone(&self.services.capsules);
        let msgs = self.msgs_tx.clone();
        tokio::spawn(async move {
            let result = capsules.delete(id).await.map_err(|err| {
                warn!(?err, "capsule delete failed");
                "Error deleting capsule.".to_string()
            });
            let _ = msgs.send(AppMsg::CapsuleDeleted(result));
        });
    }

    // --- input ---

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('c') => return true,
                KeyCode::Char('o') => {
                    if self.session().signed_in() {
                        self.sign_out();
                    }
                    return false;
                }
                _ => {}
            }
        }

        if !self.session().is_resolved() {
            return false;
        }

        match self.screen {
            Screen::Welcome { .. } => matches!(key.code, KeyCode::Char('q')),
            Screen::Auth(_) => self.handle_key_auth(key),
            Screen::Dashboard(_) => self.handle_key_dashboard(key),
            Screen::Create(_) => self.handle_key_create(key),
            Screen::Capsule(_) => self.handle_key_capsule(key),
            Screen::Settings(_) => self.handle_key_settings(key),
        }
    }

    fn handle_key_auth(&mut self, key: KeyEvent) -> bool {
        let submit = {
            let Screen::Auth(form) = &mut self.screen else {
                return false;
            };
            if form.busy {
                return false;
            }

            match key.code {
                KeyCode::Char('t') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    form.toggle_mode();
                    false
                }
                KeyCode::Tab => {
                    form.focus = (form.focus + 1) % form.field_count();
                    false
                }
                KeyCode::BackTab => {
                    let count = form.field_count();
                    form.focus = (form.focus + count - 1) % count;
                    false
                }
                KeyCode::Backspace => {
                    form.focused_value_mut().pop();
                    false
                }
                KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                    form.focused_value_mut().push(c);
                    false
                }
                KeyCode::Esc => {
                    form.error = None;
                    false
                }
                KeyCode::Enter => true,
                _ => false,
            }
        };

        if submit {
            self.submit_auth();
        }
        false
    }

    fn handle_key_dashboard(&mut self, key: KeyEvent) -> bool {
        enum Action {
            None,
            Quit,
            Open(CapsuleId),
            New,
            Settings,
            Delete(CapsuleId),
        }

        let action = {
            let Screen::Dashboard(state) = &mut self.screen else {
                return false;
            };

            if let Some(pending) = state.confirm_delete {
                match key.code {
                    KeyCode::Char('y') | KeyCode::Char('Y') => {
                        state.confirm_delete = None;
                        Action::Delete(pending)
                    }
                    KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                        state.confirm_delete = None;
                        Action::None
                    }
                    _ => Action::None,
                }
            } else {
                match key.code {
                    KeyCode::Char('q') => Action::Quit,
                    KeyCode::Down | KeyCode::Char('j') => {
                        if !state.capsules.is_empty() {
                            state.selected = (state.selected + 1).min(state.capsules.len() - 1);
                        }
                        Action::None
                    }
                    KeyCode::Up | KeyCode::Char('k') => {
                        state.selected = state.selected.saturating_sub(1);
                        Action::None
                    }
                    KeyCode::Enter => state
                        .capsules
                        .get(state.selected)
                        .map_or(Action::None, |capsule| Action::Open(capsule.id)),
                    KeyCode::Char('n') => Action::New,
                    KeyCode::Char('s') => Action::Settings,
                    KeyCode::Char('x') => {
                        if let Some(capsule) = state.capsules.get(state.selected) {
                            let owner = self
                                .session_rx
                                .borrow()
                                .user
                                .as_ref()
                                .is_some_and(|user| capsule.is_owner(user.id));
                            if owner {
                                state.confirm_delete = Some(capsule.id);
                            } else {
                                state.error =
                                    Some("Only the owner can delete a capsule.".to_string());
                            }
                        }
                        Action::None
                    }
                    _ => Action::None,
                }
            }
        };

        match action {
            Action::Quit => return true,
            Action::Open(id) => self.navigate(Route::Capsule(id)),
            Action::New => self.navigate(Route::CreateCapsule),
            Action::Settings => self.navigate(Route::Settings),
            Action::Delete(id) => self.delete_capsule(id),
            Action::None => {}
        }
        false
    }

    fn handle_key_create(&mut self, key: KeyEvent) -> bool {
        enum Action {
            None,
            Submit,
            Back,
        }

        let action = {
            let Screen::Create(form) = &mut self.screen else {
                return false;
            };
            if form.busy {
                if key.code == KeyCode::Esc {
                    Action::Back
                } else {
                    Action::None
                }
            } else {
                match key.code {
                    KeyCode::Tab => {
                        form.focus = (form.focus + 1) % CreateForm::FIELDS;
                        Action::None
                    }
                    KeyCode::BackTab => {
                        form.focus = (form.focus + CreateForm::FIELDS - 1) % CreateForm::FIELDS;
                        Action::None
                    }
                    KeyCode::Backspace => {
                        form.focused_value_mut().pop();
                        Action::None
                    }
                    KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                        form.focused_value_mut().push(c);
                        Action::None
                    }
                    KeyCode::Enter => Action::Submit,
                    KeyCode::Esc => Action::Back,
                    _ => Action::None,
                }
            }
        };

        match action {
            Action::Submit => self.submit_create(),
            Action::Back => self.navigate(Route::Dashboard),
            Action::None => {}
        }
        false
    }

    fn handle_key_capsule(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Char('q') => true,
            KeyCode::Esc | KeyCode::Backspace => {
                self.navigate(Route::Dashboard);
                false
            }
            _ => false,
        }
    }

    fn handle_key_settings(&mut self, key: KeyEvent) -> bool {
        enum Action {
            None,
            Submit,
            Back,
            DeleteAccount,
        }

        let action = {
            let Screen::Settings(form) = &mut self.screen else {
                return false;
            };
            if form.busy {
                return false;
            }

            if let Some(typed) = &mut form.confirm_delete {
                match key.code {
                    KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                        typed.push(c);
                        Action::None
                    }
                    KeyCode::Backspace => {
                        typed.pop();
                        Action::None
                    }
                    KeyCode::Esc => {
                        form.confirm_delete = None;
                        Action::None
                    }
                    KeyCode::Enter => {
                        if typed == "DELETE" {
                            Action::DeleteAccount
                        } else {
                            form.confirm_delete = None;
                            form.error = Some("Deletion cancelled.".to_string());
                            Action::None
                        }
                    }
                    _ => Action::None,
                }
            } else {
                match key.code {
                    KeyCode::Char('x') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        form.error = None;
                        form.success = None;
                        form.confirm_delete = Some(String::new());
                        Action::None
                    }
                    KeyCode::Tab => {
                        form.focus = (form.focus + 1) % SettingsForm::FIELDS;
                        Action::None
                    }
                    KeyCode::BackTab => {
                        form.focus = (form.focus + SettingsForm::FIELDS - 1) % SettingsForm::FIELDS;
                        Action::None
                    }
                    KeyCode::Backspace => {
                        form.focused_value_mut().pop();
                        Action::None
                    }
                    KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                        form.focused_value_mut().push(c);
                        Action::None
                    }
                    KeyCode::Enter => Action::Submit,
                    KeyCode::Esc => Action::Back,
                    _ => Action::None,
                }
            }
        };

        match action {
            Action::Submit => self.submit_change_password(),
            Action::Back => self.navigate(Route::Dashboard),
            Action::DeleteAccount => self.delete_account(),
            Action::None => {}
        }
        false
    }

    // --- form submissions ---

    fn submit_auth(&mut self) {
        let services = self.services.clone();
        let msgs = self.msgs_tx.clone();

        let Screen::Auth(form) = &mut self.screen else {
            return;
        };
        form.error = None;

        let email = form.email.trim().to_string();
        let password = form.password.clone();

        if !EMAIL_RE.is_match(&email) {
            form.error = Some("Please enter a valid email address.".to_string());
            return;
        }
        if password.is_empty() {
            form.error = Some("Please enter a password.".to_string());
            return;
        }

        match form.mode {
            AuthMode::Login => {
                form.busy = true;
                tokio::spawn(async move {
                    // Masked whatever the cause, to avoid account
                    // enumeration.
                    let result = services
                        .identity
                        .sign_in(&email, &password)
                        .await
                        .map(|_| ())
                        .map_err(|err| {
                            debug!(?err, "sign-in rejected");
                            LOGIN_FAILED.to_string()
                        });
                    let _ = msgs.send(AppMsg::AuthFinished(result));
                });
            }
            AuthMode::SignUp => {
                let username = form.username.trim().to_string();
                if username.is_empty() {
                    form.error = Some("Please enter a username.".to_string());
                    return;
                }
                if password.chars().count() < MIN_PASSWORD_CHARS {
                    form.error = Some("Password must be at least 6 characters long.".to_string());
                    return;
                }

                form.busy = true;
                tokio::spawn(async move {
                    let result = sign_up_flow(services, username, email, password).await;
                    let _ = msgs.send(AppMsg::AuthFinished(result));
                });
            }
        }
    }

    fn submit_create(&mut self) {
        let Some(user) = self.session().user else {
            return;
        };
        let services = self.services.clone();
        let msgs = self.msgs_tx.clone();

        let Screen::Create(form) = &mut self.screen else {
            return;
        };
        form.error = None;

        let title = form.title.trim().to_string();
        let message = form.message.trim().to_string();
        if title.is_empty() || message.is_empty() {
            form.error = Some("Please fill in the title and message.".to_string());
            return;
        }
        let Some(open_at) = parse_open_date(form.open_date.trim()) else {
            form.error = Some("Opening date must be a valid YYYY-MM-DD date.".to_string());
            return;
        };

        let draft = CapsuleDraft {
            title,
            message,
            open_at,
            media_files: split_paths(&form.media_input),
            collaborator_input: form.collaborator_input.clone(),
        };

        form.busy = true;
        form.status = None;

        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let status_msgs = msgs.clone();
        tokio::spawn(async move {
            while let Some(status) = status_rx.recv().await {
                if status_msgs.send(AppMsg::CreationStatus(status)).is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let result = create::create_capsule(
                services.profiles,
                services.capsules,
                services.media,
                user,
                draft,
                status_tx,
            )
            .await
            .map_err(|err| format!("Error: {err}"));
            let _ = msgs.send(AppMsg::CreationFinished(result));
        });
    }

    fn submit_change_password(&mut self) {
        let services = self.services.clone();
        let msgs = self.msgs_tx.clone();

        let Screen::Settings(form) = &mut self.screen else {
            return;
        };
        form.error = None;
        form.success = None;

        if form.new_password != form.confirm_password {
            form.error = Some("New passwords do not match.".to_string());
            return;
        }
        if form.new_password.chars().count() < MIN_PASSWORD_CHARS {
            form.error = Some("New password must be at least 6 characters long.".to_string());
            return;
        }

        form.busy = true;
        let old = form.old_password.clone();
        let new = form.new_password.clone();
        tokio::spawn(async move {
            let result = services
                .identity
                .change_password(&old, &new)
                .await
                .map_err(|err| match err {
                    IdentityError::WrongOldPassword => WRONG_OLD_PASSWORD.to_string(),
                    other => {
                        warn!(?other, "password change failed");
                        GENERIC_FAILURE.to_string()
                    }
                });
            let _ = msgs.send(AppMsg::PasswordChanged(result));
        });
    }

    fn delete_account(&mut self) {
        let Some(user) = self.session().user else {
            return;
        };
        let services = self.services.clone();
        let msgs = self.msgs_tx.clone();

        if let Screen::Settings(form) = &mut self.screen {
            form.busy = true;
            form.confirm_delete = None;
        }

        tokio::spawn(async move {
            // Profile document first, then the account itself.
            if let Err(err) = services.profiles.delete_profile(user.id).await {
                warn!(?err, "profile delete failed");
                let _ = msgs.send(AppMsg::AccountDeleted(Err(DELETE_ACCOUNT_FAILED.to_string())));
                return;
            }
            let result = services.identity.delete_account().await.map_err(|err| {
                warn!(?err, "account delete failed");
                DELETE_ACCOUNT_FAILED.to_string()
            });
            let _ = msgs.send(AppMsg::AccountDeleted(result));
        });
    }

    // --- timers & messages ---

    fn handle_tick(&mut self) {
        if let Some((due, route)) = self.pending_nav {
            if Instant::now() >= due {
                self.pending_nav = None;
                self.navigate(route);
                return;
            }
        }

        let resolved = self.session().is_resolved();
        let advance = if let Screen::Welcome { shown_since } = &mut self.screen {
            if resolved {
                match shown_since {
                    None => {
                        *shown_since = Some(Instant::now());
                        false
                    }
                    Some(at) => at.elapsed() >= SPLASH_DELAY,
                }
            } else {
                false
            }
        } else {
            false
        };

        if advance {
            self.navigate(Route::Auth);
        }
    }

    fn handle_msg(&mut self, msg: AppMsg) {
        match msg {
            AppMsg::AuthFinished(result) => {
                if let Screen::Auth(form) = &mut self.screen {
                    form.busy = false;
                    if let Err(message) = result {
                        form.error = Some(message);
                    }
                }
            }
            AppMsg::Greeting(name) => {
                if let Screen::Dashboard(state) = &mut self.screen {
                    state.greeting = Some(name);
                }
            }
            AppMsg::DashboardSnapshot(capsules) => {
                if let Screen::Dashboard(state) = &mut self.screen {
                    state.loading = false;
                    state.capsules = capsules;
                    state.selected = state.selected.min(state.capsules.len().saturating_sub(1));
                    if let Some(id) = state.confirm_delete {
                        if !state.capsules.iter().any(|capsule| capsule.id == id) {
                            state.confirm_delete = None;
                        }
                    }
                }
            }
            AppMsg::DashboardFailed(message) => {
                if let Screen::Dashboard(state) = &mut self.screen {
                    state.loading = false;
                    state.error = Some(message);
                }
            }
            AppMsg::CapsuleLoaded { id, outcome } => {
                // A fetch that outlived its view is simply discarded.
                if let Screen::Capsule(detail) = &mut self.screen {
                    if detail.id == id {
                        detail.fetch = match outcome {
                            CapsuleOutcome::Found(capsule) => DetailFetch::Found(capsule),
                            CapsuleOutcome::Missing => DetailFetch::Missing,
                            CapsuleOutcome::Failed(message) => DetailFetch::Failed(message),
                        };
                    }
                }
            }
            AppMsg::CapsuleDeleted(result) => {
                if let Screen::Dashboard(state) = &mut self.screen {
                    if let Err(message) = result {
                        state.error = Some(message);
                    }
                }
            }
            AppMsg::CreationStatus(status) => {
                if let Screen::Create(form) = &mut self.screen {
                    form.status = Some(status.to_string());
                }
            }
            AppMsg::CreationFinished(result) => {
                if let Screen::Create(form) = &mut self.screen {
                    form.busy = false;
                    match result {
                        Ok(id) => {
                            info!(%id, "capsule created");
                            form.error = None;
                            form.status = Some(CAPSULE_SEALED.to_string());
                            self.pending_nav =
                                Some((Instant::now() + SUCCESS_NAV_DELAY, Route::Dashboard));
                        }
                        Err(message) => {
                            form.status = None;
                            form.error = Some(message);
                        }
                    }
                }
            }
            AppMsg::PasswordChanged(result) => {
                if let Screen::Settings(form) = &mut self.screen {
                    form.busy = false;
                    match result {
                        Ok(()) => {
                            form.success = Some("Password updated successfully!".to_string());
                            form.old_password.clear();
                            form.new_password.clear();
                            form.confirm_password.clear();
                        }
                        Err(message) => form.error = Some(message),
                    }
                }
            }
            AppMsg::AccountDeleted(result) => match result {
                Ok(()) => info!("account deleted"),
                Err(message) => {
                    if let Screen::Settings(form) = &mut self.screen {
                        form.busy = false;
                        form.error = Some(message);
                    }
                }
            },
        }
    }

    // --- view models ---

    fn build_view_model(&self) -> AppViewModel {
        let session = self.session();
        if !session.is_resolved() {
            return AppViewModel {
                chrome: None,
                screen: ScreenView::Loading,
            };
        }

        let chrome = session.user.as_ref().map(|user| ChromeView {
            email: user.email.clone(),
        });

        let screen = match &self.screen {
            Screen::Welcome { .. } => ScreenView::Welcome(WelcomeView),
            Screen::Auth(form) => ScreenView::Auth(auth_view(form)),
            Screen::Dashboard(state) => {
                ScreenView::Dashboard(dashboard_view(state, session.user.as_ref()))
            }
            Screen::Create(form) => ScreenView::Create(create_view(form)),
            Screen::Capsule(detail) => {
                ScreenView::Capsule(capsule_view(detail, session.user.as_ref()))
            }
            Screen::Settings(form) => ScreenView::Settings(settings_view(form)),
        };

        AppViewModel { chrome, screen }
    }
}

async fn sign_up_flow(
    services: Services,
    username: String,
    email: String,
    password: String,
) -> Result<(), String> {
    match services.profiles.username_taken(&username).await {
        Ok(true) => return Err(USERNAME_TAKEN.to_string()),
        Ok(false) => {}
        Err(err) => {
            warn!(?err, "username lookup failed");
            return Err(GENERIC_FAILURE.to_string());
        }
    }

    let user = services
        .identity
        .sign_up(&email, &password)
        .await
        .map_err(|err| match err {
            IdentityError::EmailTaken(email) => {
                format!("An account already exists for {email}.")
            }
            other => {
                warn!(?other, "sign-up failed");
                GENERIC_FAILURE.to_string()
            }
        })?;

    if let Err(err) = services
        .profiles
        .create_profile(UserProfile {
            uid: user.id,
            username,
            email: user.email.clone(),
        })
        .await
    {
        warn!(?err, "profile creation failed after sign-up");
        return Err(GENERIC_FAILURE.to_string());
    }

    Ok(())
}

/// Feeds the dashboard: subscribes to both capsule queries and pushes a
/// freshly reconciled snapshot whenever either stream delivers. Last value
/// wins per stream; neither is required to deliver first.
async fn watch_capsules(
    capsules: Arc<dyn CapsuleStore>,
    user: AuthUser,
    msgs: mpsc::UnboundedSender<AppMsg>,
) {
    let owned = match capsules.subscribe(CapsuleQuery::OwnedBy(user.id)).await {
        Ok(rx) => rx,
        Err(err) => {
            warn!(?err, "owned-capsule subscription failed");
            let _ = msgs.send(AppMsg::DashboardFailed(
                "Could not load your capsules.".to_string(),
            ));
            return;
        }
    };
    let shared = match capsules
        .subscribe(CapsuleQuery::SharedWith(user.email.clone()))
        .await
    {
        Ok(rx) => rx,
        Err(err) => {
            warn!(?err, "shared-capsule subscription failed");
            let _ = msgs.send(AppMsg::DashboardFailed(
                "Could not load your capsules.".to_string(),
            ));
            return;
        }
    };

    let mut latest_owned = owned.borrow().clone();
    let mut latest_shared = shared.borrow().clone();
    if msgs
        .send(AppMsg::DashboardSnapshot(reconcile(
            &latest_owned,
            &latest_shared,
        )))
        .is_err()
    {
        return;
    }

    enum Update {
        Owned(Vec<Capsule>),
        Shared(Vec<Capsule>),
    }

    let owned_updates = WatchStream::from_changes(owned).map(Update::Owned);
    let shared_updates = WatchStream::from_changes(shared).map(Update::Shared);
    let mut updates = owned_updates.merge(shared_updates);

    while let Some(update) = updates.next().await {
        match update {
            Update::Owned(list) => latest_owned = list,
            Update::Shared(list) => latest_shared = list,
        }
        if msgs
            .send(AppMsg::DashboardSnapshot(reconcile(
                &latest_owned,
                &latest_shared,
            )))
            .is_err()
        {
            break;
        }
    }
}

fn parse_open_date(input: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}

fn split_paths(input: &str) -> Vec<PathBuf> {
    input
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn auth_view(form: &AuthForm) -> AuthView {
    let (title, switch_hint) = match form.mode {
        AuthMode::Login => (
            "Login to Your Account",
            "Don't have an account? Press ctrl+t to sign up.",
        ),
        AuthMode::SignUp => (
            "Create a New Account",
            "Already have an account? Press ctrl+t to log in.",
        ),
    };

    let mut fields = Vec::new();
    if form.mode == AuthMode::SignUp {
        fields.push(FieldView {
            label: "Username",
            value: form.username.clone(),
            focused: form.focus == 0,
            masked: false,
        });
    }
    let base = fields.len();
    fields.push(FieldView {
        label: "Email Address",
        value: form.email.clone(),
        focused: form.focus == base,
        masked: false,
    });
    fields.push(FieldView {
        label: "Password",
        value: form.password.clone(),
        focused: form.focus == base + 1,
        masked: true,
    });

    AuthView {
        title,
        fields,
        error: form.error.clone(),
        busy: form.busy,
        switch_hint,
    }
}

fn dashboard_view(state: &DashboardState, viewer: Option<&AuthUser>) -> DashboardView {
    // Visibility is derived per render, never cached.
    let now = Utc::now();

    let cards = state
        .capsules
        .iter()
        .map(|capsule| CapsuleCard {
            title: capsule.title.clone(),
            creator: capsule.creator_username.clone(),
            unlocked: capsule.is_unlocked(now),
            opens_on: ui::format_date(capsule.open_at),
            owned: viewer.is_some_and(|user| capsule.is_owner(user.id)),
        })
        .collect();

    DashboardView {
        greeting: state.greeting.clone().unwrap_or_else(|| "...".to_string()),
        cards,
        selected: (!state.capsules.is_empty())
            .then(|| state.selected.min(state.capsules.len() - 1)),
        loading: state.loading,
        error: state.error.clone(),
        confirm_delete: state.confirm_delete.and_then(|id| {
            state
                .capsules
                .iter()
                .find(|capsule| capsule.id == id)
                .map(|capsule| capsule.title.clone())
        }),
    }
}

fn create_view(form: &CreateForm) -> CreateView {
    let fields = vec![
        FieldView {
            label: "Capsule Title",
            value: form.title.clone(),
            focused: form.focus == 0,
            masked: false,
        },
        FieldView {
            label: "A Message to the Future",
            value: form.message.clone(),
            focused: form.focus == 1,
            masked: false,
        },
        FieldView {
            label: "Opening Date (YYYY-MM-DD)",
            value: form.open_date.clone(),
            focused: form.focus == 2,
            masked: false,
        },
        FieldView {
            label: "Memories (file paths, comma-separated)",
            value: form.media_input.clone(),
            focused: form.focus == 3,
            masked: false,
        },
        FieldView {
            label: "Share With Others (emails, comma-separated)",
            value: form.collaborator_input.clone(),
            focused: form.focus == 4,
            masked: false,
        },
    ];

    CreateView {
        fields,
        status: form.status.clone(),
        error: form.error.clone(),
        busy: form.busy,
    }
}

fn capsule_view(detail: &CapsuleDetail, viewer: Option<&AuthUser>) -> CapsuleDetailView {
    match &detail.fetch {
        DetailFetch::Loading => CapsuleDetailView::Loading,
        DetailFetch::Missing => CapsuleDetailView::Missing,
        DetailFetch::Failed(message) => CapsuleDetailView::Failed(message.clone()),
        DetailFetch::Found(capsule) => {
            let is_owner = viewer.is_some_and(|user| capsule.is_owner(user.id));
            let creator = if is_owner {
                "You".to_string()
            } else {
                capsule.creator_username.clone()
            };

            // Recomputed on every render: a capsule crossing its open time
            // unlocks without a refetch.
            if !capsule.is_unlocked(Utc::now()) {
                return CapsuleDetailView::Locked {
                    title: capsule.title.clone(),
                    creator,
                    opens_on: ui::format_date(capsule.open_at),
                };
            }

            let collaborators = capsule
                .collaborators
                .iter()
                .map(|collaborator| {
                    if viewer.is_some_and(|user| collaborator.uid == user.id) {
                        format!("{} (You)", collaborator.username)
                    } else {
                        collaborator.username.clone()
                    }
                })
                .collect();

            let media = capsule
                .media_urls
                .iter()
                .map(|url| MediaItem {
                    url: url.clone(),
                    kind: MediaKind::classify(url).label(),
                })
                .collect();

            CapsuleDetailView::Unlocked(Box::new(UnlockedCapsule {
                title: capsule.title.clone(),
                creator,
                created_on: ui::format_date(capsule.created_at),
                message: capsule.message.clone(),
                collaborators,
                media,
            }))
        }
    }
}

fn settings_view(form: &SettingsForm) -> SettingsView {
    let fields = vec![
        FieldView {
            label: "Old Password",
            value: form.old_password.clone(),
            focused: form.focus == 0,
            masked: true,
        },
        FieldView {
            label: "New Password",
            value: form.new_password.clone(),
            focused: form.focus == 1,
            masked: true,
        },
        FieldView {
            label: "Confirm New Password",
            value: form.confirm_password.clone(),
            focused: form.focus == 2,
            masked: true,
        },
    ];

    SettingsView {
        fields,
        error: form.error.clone(),
        success: form.success.clone(),
        busy: form.busy,
        confirm_delete: form.confirm_delete.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_date_parses_plain_days() {
        let parsed = parse_open_date("2031-07-04").expect("valid date");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2031, 7, 4, 0, 0, 0).unwrap());

        assert!(parse_open_date("2031-13-01").is_none());
        assert!(parse_open_date("not a date").is_none());
        assert!(parse_open_date("").is_none());
    }

    #[test]
    fn media_paths_split_like_collaborators() {
        let paths = split_paths(" a.jpg , ,b.mp4,");
        assert_eq!(paths, vec![PathBuf::from("a.jpg"), PathBuf::from("b.mp4")]);
        assert!(split_paths("").is_empty());
    }

    #[test]
    fn email_shape_check() {
        assert!(EMAIL_RE.is_match("me@example.com"));
        assert!(!EMAIL_RE.is_match("me@example"));
        assert!(!EMAIL_RE.is_match("not-an-email"));
        assert!(!EMAIL_RE.is_match("two words@example.com"));
    }
}
