//! Loading/error/data bookkeeping around backend calls.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StalePolicy {
    /// Whichever response resolves last wins, even if it belongs to an older
    /// request.
    #[default]
    Apply,
    /// Responses belonging to a request older than the latest one are dropped.
    Discard,
}

#[derive(Debug, Clone, PartialEq)]
enum Phase<T> {
    Idle,
    Loading,
    Ready(T),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Applied,
    Discarded,
}

#[derive(Debug, Clone)]
pub struct RequestState<T> {
    phase: Phase<T>,
    policy: StalePolicy,
    latest: u64,
}

impl<T> Default for RequestState<T> {
    fn default() -> Self {
        Self::new(StalePolicy::default())
    }
}

impl<T> RequestState<T> {
    pub fn new(policy: StalePolicy) -> Self {
        Self {
            phase: Phase::Idle,
            policy,
            latest: 0,
        }
    }

    pub fn data(&self) -> Option<&T> {
        match &self.phase {
            Phase::Ready(data) => Some(data),
            _ => None,
        }
    }

    pub fn loading(&self) -> bool {
        matches!(self.phase, Phase::Loading)
    }

    pub fn error(&self) -> Option<&str> {
        match &self.phase {
            Phase::Failed(message) => Some(message),
            _ => None,
        }
    }

    /// Marks the request as in flight. Must be called before the call starts.
    pub fn begin(&mut self) -> Ticket {
        self.latest += 1;
        self.phase = Phase::Loading;
        Ticket(self.latest)
    }

    pub fn settle(&mut self, ticket: Ticket, result: Result<T, String>) -> Settled {
        if self.policy == StalePolicy::Discard && ticket.0 < self.latest {
            debug!(ticket = ticket.0, latest = self.latest, "discarding stale response");
            return Settled::Discarded;
        }

        self.phase = match result {
            Ok(data) => Phase::Ready(data),
            Err(message) => Phase::Failed(message),
        };
        Settled::Applied
    }

    /// Forgets everything except the policy. Tickets handed out earlier stay
    /// older than any ticket issued afterwards.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }
}

/// A [`RequestState`] shared between concurrent calls. The lock is only held
/// while beginning and settling, never across the call itself, so several
/// calls on the same state may be in flight at once.
#[derive(Debug)]
pub struct SharedRequest<T> {
    state: Mutex<RequestState<T>>,
}

impl<T: Clone> SharedRequest<T> {
    pub fn new(policy: StalePolicy) -> Self {
        Self {
            state: Mutex::new(RequestState::new(policy)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RequestState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn data(&self) -> Option<T> {
        self.lock().data().cloned()
    }

    pub fn loading(&self) -> bool {
        self.lock().loading()
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error().map(str::to_string)
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    /// Runs one call through the state: loading first, then exactly one
    /// terminal phase. Only responses that are applied are reported to
    /// `notifier`; a discarded stale response is logged and dropped.
    pub async fn track<F>(&self, action: &str, notifier: &dyn Notifier, call: F) -> Option<T>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        let ticket = self.lock().begin();
        info!(action, "request started");

        let outcome = call.await;
        let notification = match &outcome {
            Ok(_) => {
                info!(action, "request succeeded");
                Notification::success(format!("{action} completed"))
            }
            Err(failure) => {
                error!(action, error = %failure, "request failed");
                Notification::error(failure.user_message())
            }
        };

        let applied = {
            let mut state = self.lock();
            let settled = state.settle(ticket, outcome.map_err(|failure| failure.user_message()));
            (settled == Settled::Applied).then(|| state.data().cloned())
        };

        match applied {
            Some(data) => {
                notifier.notify(notification);
                data
            }
            None => {
                warn!(action, "response arrived after a newer request and was ignored");
                None
            }
        }
    }

    /// Records a failure that happened before any call was made, such as a
    /// request that did not pass local validation.
    pub fn reject(&self, message: String, notifier: &dyn Notifier) {
        notifier.notify(Notification::error(message.clone()));
        let mut state = self.lock();
        let ticket = state.begin();
        state.settle(ticket, Err(message));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Info,
            message: message.into(),
        }
    }
}

/// Transient user-facing notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Success | NotificationKind::Info => {
                info!(target: "notifications", "{}", notification.message)
            }
            NotificationKind::Error => warn!(target: "notifications", "{}", notification.message),
        }
    }
}

/// Keeps every notification, newest last.
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.seen
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(notification);
        }
    }
}
