//! Request completion lifecycle
//!
//! Each in-flight request gets one [`CompletionHandle`]. The handle stands in
//! for the three terminal notifications of a response:
//! - completed: the body reached end-of-stream, carries the status code
//! - errored: the inner service or the body failed
//! - aborted: the response future or body was dropped before completion
//!
//! Whichever fires first is authoritative. It samples the timer once,
//! invokes the listener once, and detaches the handle; every later
//! notification (an error followed by a close, a completion followed by a
//! drop) is a no-op.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use http::{header, Request, StatusCode};

use super::timer::{Mark, RequestTimer};

/// Facts captured at request entry. Owned by a single request.
#[derive(Debug, Clone)]
pub struct RequestObservation {
    pub start: Mark,
    pub path: String,
    pub method: String,
    pub host: String,
}

impl RequestObservation {
    /// Start the timer and capture path, method and host from `request`.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let host = request
            .headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| request.uri().host())
            .map(hostname)
            .unwrap_or_default();

        Self {
            start: RequestTimer::start(),
            path: request.uri().path().to_string(),
            method: request.method().as_str().to_string(),
            host: host.to_string(),
        }
    }
}

/// Strip the port from a `Host` value, keeping bracketed IPv6 literals whole.
fn hostname(authority: &str) -> &str {
    if authority.starts_with('[') {
        return match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority,
        };
    }
    authority.split(':').next().unwrap_or(authority)
}

/// The terminal event that ended a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Completed(StatusCode),
    Errored,
    Aborted,
}

impl Terminal {
    /// Only a completed response has a status code.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Terminal::Completed(status) => Some(*status),
            Terminal::Errored | Terminal::Aborted => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Terminal::Completed(_) => "completed",
            Terminal::Errored => "errored",
            Terminal::Aborted => "aborted",
        }
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived once, at the terminal event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOutcome {
    pub terminal: Terminal,
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
}

impl CompletionOutcome {
    pub fn status(&self) -> Option<StatusCode> {
        self.terminal.status()
    }

    pub fn elapsed_millis(&self) -> f64 {
        self.elapsed.as_nanos() as f64 / 1_000_000.0
    }
}

/// Receives exactly one callback per registered request.
pub trait CompletionListener: Send + Sync {
    fn on_complete(&self, observation: RequestObservation, outcome: CompletionOutcome);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Pending,
    Completed,
    Errored,
    Aborted,
    Detached,
}

struct Registration {
    observation: RequestObservation,
    listener: Arc<dyn CompletionListener>,
}

/// One-shot completion hooks for a single request/response pair.
pub struct CompletionHandle {
    state: LifecycleState,
    fired: Option<Terminal>,
    registration: Option<Registration>,
}

impl CompletionHandle {
    pub fn register(
        observation: RequestObservation,
        listener: Arc<dyn CompletionListener>,
    ) -> Self {
        Self {
            state: LifecycleState::Pending,
            fired: None,
            registration: Some(Registration {
                observation,
                listener,
            }),
        }
    }

    /// Returns `true` if this call triggered the emission.
    pub fn complete(&mut self, status: StatusCode) -> bool {
        self.fire(Terminal::Completed(status))
    }

    pub fn error(&mut self) -> bool {
        self.fire(Terminal::Errored)
    }

    pub fn abort(&mut self) -> bool {
        self.fire(Terminal::Aborted)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_detached(&self) -> bool {
        self.state == LifecycleState::Detached
    }

    /// The terminal event that won, if any has fired.
    pub fn terminal(&self) -> Option<Terminal> {
        self.fired
    }

    fn fire(&mut self, terminal: Terminal) -> bool {
        // Taking the registration detaches all three hooks at once.
        let Some(Registration {
            observation,
            listener,
        }) = self.registration.take()
        else {
            return false;
        };

        let outcome = CompletionOutcome {
            terminal,
            elapsed: RequestTimer::elapsed(observation.start),
            finished_at: Utc::now(),
        };

        self.fired = Some(terminal);
        self.state = match terminal {
            Terminal::Completed(_) => LifecycleState::Completed,
            Terminal::Errored => LifecycleState::Errored,
            Terminal::Aborted => LifecycleState::Aborted,
        };

        listener.on_complete(observation, outcome);
        self.state = LifecycleState::Detached;
        true
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("state", &self.state)
            .field("fired", &self.fired)
            .finish()
    }
}
