//! Request orchestration core: single, chained and parallel HTTP requests.
//!
//! # Overview
//! Callers build `SingleRequest`s and compose them into a `ChainedRequest`
//! (strictly sequential) or a `ParallelRequest` (all at once). The engine
//! registers a request while it executes, drives its children, reports each
//! child's outcome to that child's callbacks and finally fires exactly one
//! of the compound request's own callbacks.
//!
//! No network I/O happens here (host-does-IO pattern). Prepared
//! `TransportTask`s go to a `Transport`; `HostQueue` lets an external host
//! pull them, run the round-trip and report the response.
//!
//! # Design
//! - `Manager` is an explicit service object owning the registry, the host
//!   policy store and the transport. Requests hold it weakly.
//! - Completions reach requests through trampolines holding `Weak` handles,
//!   so late callbacks after cancellation or drop are no-ops.
//! - Locks are never held while user callbacks or the transport run.
//! - Per-host headers and credentials resolve host-specific first, then
//!   global; server trust is decided per request by `trust`.

pub mod chain;
pub mod config;
pub mod error;
pub mod http;
pub mod manager;
pub mod parallel;
pub mod policy;
pub mod registry;
pub mod request;
pub mod single;
pub mod transport;
pub mod trust;

pub use chain::ChainedRequest;
pub use config::ManagerConfig;
pub use error::{ConfigError, RequestError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use manager::Manager;
pub use parallel::ParallelRequest;
pub use policy::HostPolicyStore;
pub use request::{Failure, Outcome, Payload, Request, RequestInfo, RequestKind, RequestState, RequestTag};
pub use single::SingleRequest;
pub use transport::{HostQueue, TaskId, Transport, TransportTask};
pub use trust::{AuthChallenge, AuthenticationMethod, ChallengeDisposition, Credential, ServerTrust, TrustPolicy};
