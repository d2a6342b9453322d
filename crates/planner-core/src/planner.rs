//! The single owner of client state.
//!
//! Every mutation follows the same contract: the request goes to the task
//! store first and local state changes only once the server has answered,
//! always from the record the server returned. Nothing is applied
//! optimistically. Store failures are logged and leave state as it was; an
//! unauthorized answer additionally drops the session.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::client::TaskStoreClient;
use crate::error::{AuthFailure, Rejection, StoreError};
use crate::session::{Session, SessionManager};
use crate::state::AppState;
use crate::task::{CategoryFilter, TaskDraft, TaskPatch};
use crate::views::{Projections, ViewCounts};

const DEFAULT_AUTH_FAILURE: &str = "Sign-in failed, try again";

/// What became of a requested change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// The store answered but nothing local matched the response.
    Unchanged,
    Failed,
    /// The store rejected the credential; the session is gone.
    SessionExpired,
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_applied(self) -> bool {
        self == Self::Applied
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => f.write_str("done"),
            Self::Unchanged => f.write_str("nothing changed"),
            Self::Failed => f.write_str("the task store did not accept the request"),
            Self::SessionExpired => f.write_str("session expired, sign in again"),
            Self::Rejected(reason) => fmt::Display::fmt(reason, f),
        }
    }
}

/// Result of dropping a project and unassigning its tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectRemoval {
    /// The name was in the user-declared set.
    pub was_declared: bool,
    pub cleared: usize,
    /// Tasks still tagged with the project because their patch failed.
    pub failed: usize,
    pub session_expired: bool,
}

/// Published on every state change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Revision {
    pub seq: u64,
    pub counts: ViewCounts,
}

pub struct Planner {
    client: TaskStoreClient,
    session: SessionManager,
    state: AppState,
    changes: watch::Sender<Revision>,
}

impl Planner {
    pub fn new(client: TaskStoreClient, session: SessionManager) -> Self {
        let (changes, _) = watch::channel(Revision::default());
        Self {
            client,
            session,
            state: AppState::default(),
            changes,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn projections(&self, now: DateTime<Utc>) -> Projections<'_> {
        Projections::compute(&self.state, now)
    }

    /// Receiver that wakes whenever local state changes.
    pub fn subscribe(&self) -> watch::Receiver<Revision> {
        self.changes.subscribe()
    }

    pub fn restore_session(&mut self) -> bool {
        self.session.restore()
    }

    /// Replaces the local collection with the store's list.
    #[instrument(skip(self))]
    pub async fn refresh(&mut self) -> Outcome {
        if let Err(reason) = self.gate() {
            return Outcome::Rejected(reason);
        }

        let result = self.client.list_tasks(self.session.token()).await;
        match result {
            Ok(tasks) => {
                info!(count = tasks.len(), "loaded tasks");
                self.state.tasks.replace_all(tasks);
                self.notify();
                Outcome::Applied
            }
            Err(err) => self.store_failure("list", err),
        }
    }

    #[instrument(skip(self, draft))]
    pub async fn create_task(&mut self, draft: TaskDraft) -> Outcome {
        let Some(new_task) = draft.normalize() else {
            debug!("ignoring draft with empty text");
            return Outcome::Rejected(Rejection::EmptyText);
        };
        if let Err(reason) = self.gate() {
            return Outcome::Rejected(reason);
        }

        let result = self
            .client
            .create_task(self.session.token(), &new_task)
            .await;
        match result {
            Ok(task) => {
                info!(id = %task.id, "task created");
                self.state.tasks.insert_front(task);
                self.notify();
                Outcome::Applied
            }
            Err(err) => self.store_failure("create", err),
        }
    }

    #[instrument(skip(self, patch))]
    pub async fn update_task(&mut self, id: &str, patch: TaskPatch) -> Outcome {
        if patch.is_empty() {
            return Outcome::Rejected(Rejection::EmptyPatch);
        }
        if patch.has_blank_text() {
            return Outcome::Rejected(Rejection::EmptyText);
        }
        if let Err(reason) = self.gate() {
            return Outcome::Rejected(reason);
        }

        let result = self
            .client
            .patch_task(self.session.token(), id, &patch)
            .await;
        match result {
            Ok(task) => {
                if self.state.tasks.replace(task) {
                    debug!(id, "task replaced from store response");
                    self.notify();
                    Outcome::Applied
                } else {
                    debug!(id, "dropping update for a task no longer held");
                    Outcome::Unchanged
                }
            }
            Err(err) => self.store_failure("update", err),
        }
    }

    pub async fn toggle_done(&mut self, id: &str) -> Outcome {
        let Some(done) = self.state.tasks.get(id).map(|task| task.done) else {
            return Outcome::Rejected(Rejection::UnknownTask);
        };
        self.update_task(id, TaskPatch::done(!done)).await
    }

    #[instrument(skip(self))]
    pub async fn delete_task(&mut self, id: &str) -> Outcome {
        if let Err(reason) = self.gate() {
            return Outcome::Rejected(reason);
        }

        let result = self.client.delete_task(self.session.token(), id).await;
        match result {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!(id, "task already gone on the store");
            }
            Err(err) => return self.store_failure("delete", err),
        }

        if self.state.tasks.remove(id).is_some() {
            info!(id, "task deleted");
            self.notify();
        }
        Outcome::Applied
    }

    pub fn add_project(&mut self, name: &str) -> bool {
        let added = self.state.add_project(name);
        if added {
            self.notify();
        }
        added
    }

    /// Removes a project and unassigns each of its tasks, one request per
    /// task. There is no transaction: a failed patch leaves that task in the
    /// project while the name is dropped from the declared set anyway, and
    /// the count of such tasks is reported so the caller can retry.
    #[instrument(skip(self))]
    pub async fn delete_project(&mut self, name: &str) -> Result<ProjectRemoval, Rejection> {
        let ids = self.state.tasks.ids_in_project(name);
        if !ids.is_empty() {
            self.gate()?;
        }

        let mut removal = ProjectRemoval::default();
        for id in ids {
            match self.update_task(&id, TaskPatch::clear_project()).await {
                Outcome::Applied | Outcome::Unchanged => removal.cleared += 1,
                Outcome::SessionExpired => {
                    removal.session_expired = true;
                    removal.failed += 1;
                    break;
                }
                Outcome::Failed | Outcome::Rejected(_) => removal.failed += 1,
            }
        }
        if removal.session_expired {
            removal.failed = self.state.tasks.ids_in_project(name).len();
        }

        removal.was_declared = self.state.remove_project(name);
        if removal.failed > 0 {
            warn!(
                project = name,
                failed = removal.failed,
                "project removed with tasks still assigned to it"
            );
        }
        self.notify();
        Ok(removal)
    }

    pub fn set_category_filter(&mut self, filter: CategoryFilter) {
        self.state.selection.category = filter;
        self.notify();
    }

    /// `None` goes back to following the current date.
    pub fn set_today(&mut self, day: Option<NaiveDate>) {
        self.state.selection.today = day;
        self.notify();
    }

    pub fn toggle_project(&mut self, name: &str) -> bool {
        let expanded = self.state.selection.toggle_expanded(name.trim());
        self.notify();
        expanded
    }

    #[instrument(skip(self, password))]
    pub async fn login(&mut self, email: &str, password: &str) -> Result<(), AuthFailure> {
        self.ensure_auth_enabled()?;
        self.session.begin_authenticating();
        let result = self.client.login(email.trim(), password).await;
        self.finish_authentication(result).await
    }

    #[instrument(skip(self, password))]
    pub async fn register(
        &mut self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<(), AuthFailure> {
        self.ensure_auth_enabled()?;
        self.session.begin_authenticating();
        let result = self
            .client
            .register(name.trim(), email.trim(), password)
            .await;
        self.finish_authentication(result).await
    }

    /// Tells the store (ignoring any failure) and then forgets the session
    /// and every task unconditionally.
    #[instrument(skip(self))]
    pub async fn logout(&mut self) {
        if let Some(token) = self.session.token().map(str::to_string)
            && let Err(err) = self.client.logout(&token).await
        {
            debug!(error = %err, "logout notification failed");
        }
        self.session.clear();
        self.state.tasks.clear();
        self.notify();
    }

    fn ensure_auth_enabled(&self) -> Result<(), AuthFailure> {
        if self.session.is_required() {
            Ok(())
        } else {
            Err(AuthFailure::new("this task store does not use accounts"))
        }
    }

    async fn finish_authentication(
        &mut self,
        result: Result<Session, StoreError>,
    ) -> Result<(), AuthFailure> {
        match result {
            Ok(session) if !session.token.trim().is_empty() => {
                self.session.establish(session);
                self.notify();
                match self.refresh().await {
                    Outcome::SessionExpired => {
                        Err(AuthFailure::new(Outcome::SessionExpired.to_string()))
                    }
                    _ => Ok(()),
                }
            }
            Ok(_) => {
                self.session.abort_authenticating();
                warn!("auth endpoint returned an empty token");
                Err(AuthFailure::new(DEFAULT_AUTH_FAILURE))
            }
            Err(err) => {
                self.session.abort_authenticating();
                warn!(error = %err, "authentication failed");
                let message = err
                    .server_message()
                    .map(str::to_string)
                    .unwrap_or_else(|| DEFAULT_AUTH_FAILURE.to_string());
                Err(AuthFailure::new(message))
            }
        }
    }

    fn gate(&self) -> Result<(), Rejection> {
        if self.session.can_mutate() {
            Ok(())
        } else {
            Err(Rejection::NotAuthenticated)
        }
    }

    fn store_failure(&mut self, operation: &str, err: StoreError) -> Outcome {
        if err.is_unauthorized() {
            warn!(operation, error = %err, "credential rejected; clearing session");
            self.session.clear();
            self.notify();
            return Outcome::SessionExpired;
        }
        warn!(operation, error = %err, "task store call failed");
        Outcome::Failed
    }

    fn notify(&self) {
        let counts = Projections::compute(&self.state, Utc::now()).counts();
        self.changes.send_modify(|revision| {
            revision.seq += 1;
            revision.counts = counts;
        });
    }
}
