//! Shared request vocabulary: identity, lifecycle, outcomes and callbacks.
//!
//! # Design
//! Every executable unit implements `Request`. Single requests and compound
//! requests (chains, parallel groups) share the same `execute` / `cancel`
//! contract so the registry can hold them uniformly as `Arc<dyn Request>`.

use std::fmt;

use uuid::Uuid;

use crate::error::RequestError;
use crate::http::HttpResponse;

/// Unique, opaque identifier of a request, stable for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestTag(Uuid);

impl RequestTag {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RequestTag {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Single,
    Chained,
    Parallel,
}

/// Identity of a request as seen by callbacks.
///
/// Compound requests pass their own `RequestInfo` to child callbacks, so
/// observers see the compound request as the owner of the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub tag: RequestTag,
    pub group: Option<String>,
    pub kind: RequestKind,
}

impl RequestInfo {
    pub(crate) fn new(kind: RequestKind, group: Option<String>) -> Self {
        Self {
            tag: RequestTag::generate(),
            group,
            kind,
        }
    }
}

/// Lifecycle of a request. Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Executing,
    Succeeded,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Succeeded | RequestState::Failed | RequestState::Cancelled
        )
    }
}

/// What a completed request produced: the deserialized body when the
/// response carried JSON, the raw bytes and the response itself.
///
/// `Payload::default()` is the neutral payload a chain reports once all of
/// its children have run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub body: Option<serde_json::Value>,
    pub data: Vec<u8>,
    pub response: Option<HttpResponse>,
}

impl Payload {
    pub fn from_response(response: HttpResponse) -> Self {
        let body = if response.body.is_empty() {
            None
        } else {
            serde_json::from_str(&response.body).ok()
        };
        Self {
            body,
            data: response.body.as_bytes().to_vec(),
            response: Some(response),
        }
    }
}

/// A terminal failure together with whatever the transport received.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub error: RequestError,
    pub payload: Payload,
}

impl Failure {
    /// A failure with no response, e.g. a connection-level error.
    pub fn new(error: RequestError) -> Self {
        Self {
            error,
            payload: Payload::default(),
        }
    }

    pub fn with_payload(error: RequestError, payload: Payload) -> Self {
        Self { error, payload }
    }
}

pub type Outcome = Result<Payload, Failure>;

pub type SuccessCallback = Box<dyn FnOnce(&Payload, &RequestInfo) + Send>;
pub type ErrorCallback = Box<dyn FnOnce(&Failure, &RequestInfo) + Send>;

/// Continuation invoked exactly once with a task's terminal outcome.
pub type CompletionHandler = Box<dyn FnOnce(Outcome) + Send>;

/// Capability shared by every executable request.
pub trait Request: Send + Sync {
    fn info(&self) -> &RequestInfo;

    fn state(&self) -> RequestState;

    /// Start the request. Returns `false` without side effects when the
    /// request was already started or cancelled.
    fn execute(&self) -> bool;

    /// Move to the cancelled state and abort in-flight work. Neither
    /// callback fires afterwards.
    fn cancel(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_unique_and_round_trip_through_strings() {
        let a = RequestTag::generate();
        let b = RequestTag::generate();
        assert_ne!(a, b);
        let parsed: RequestTag = a.to_string().parse().unwrap();
        assert_eq!(parsed, a);
    }

    #[test]
    fn only_finished_states_are_terminal() {
        assert!(!RequestState::Pending.is_terminal());
        assert!(!RequestState::Executing.is_terminal());
        assert!(RequestState::Succeeded.is_terminal());
        assert!(RequestState::Failed.is_terminal());
        assert!(RequestState::Cancelled.is_terminal());
    }
}
