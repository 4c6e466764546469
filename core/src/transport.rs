//! Boundary to the transport that performs the actual HTTP/TLS I/O.
//!
//! # Design
//! The engine never touches the network. A `Transport` receives a prepared
//! `TransportTask` plus a completion handler and must invoke the handler
//! exactly once with the terminal outcome, unless the task is cancelled
//! first.
//!
//! `HostQueue` is the host-does-IO implementation: tasks are queued for the
//! host to pull with `next_task`, execute however it likes, and report with
//! `complete` or `fail`. Completions run on the caller's thread, so a host
//! that reports from one loop gets the serialized completion queue the
//! engine expects.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::RequestError;
use crate::http::{HttpRequest, HttpResponse};
use crate::request::{CompletionHandler, Failure, Outcome, RequestTag};
use crate::trust::{resolve_challenge, AuthChallenge, ChallengeDisposition, Credential, TrustPolicy};

/// Everything the transport needs to run one request attempt.
#[derive(Debug, Clone)]
pub struct TransportTask {
    pub tag: RequestTag,
    pub request: HttpRequest,
    pub trust: TrustPolicy,
    pub credential: Option<Credential>,
}

impl TransportTask {
    /// Answer a TLS or HTTP authentication challenge raised for this task.
    pub fn evaluate(&self, challenge: &AuthChallenge<'_>) -> ChallengeDisposition {
        resolve_challenge(&self.trust, self.credential.as_ref(), challenge)
    }
}

/// Best-effort cancellation of an in-flight task.
pub trait TaskHandle: Send + Sync {
    fn cancel(&self);
}

pub trait Transport: Send + Sync {
    fn start(&self, task: TransportTask, done: CompletionHandler) -> Box<dyn TaskHandle>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Transport whose I/O is performed by an external host.
#[derive(Clone, Default)]
pub struct HostQueue {
    inner: Arc<Mutex<QueueState>>,
}

#[derive(Default)]
struct QueueState {
    next_id: u64,
    queued: VecDeque<TaskId>,
    tasks: HashMap<TaskId, Entry>,
}

struct Entry {
    task: Arc<TransportTask>,
    done: Option<CompletionHandler>,
    /// Handed to the host by `next_task`.
    pulled: bool,
}

impl HostQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the next task the host should execute. Tasks cancelled before
    /// being pulled are skipped.
    pub fn next_task(&self) -> Option<(TaskId, Arc<TransportTask>)> {
        let mut state = self.inner.lock();
        while let Some(id) = state.queued.pop_front() {
            match state.tasks.get_mut(&id) {
                Some(entry) if entry.done.is_some() => {
                    entry.pulled = true;
                    return Some((id, entry.task.clone()));
                }
                Some(_) => {
                    state.tasks.remove(&id);
                }
                None => {}
            }
        }
        None
    }

    /// Look up a task that is queued or in flight.
    pub fn task(&self, id: TaskId) -> Option<Arc<TransportTask>> {
        self.inner.lock().tasks.get(&id).map(|entry| entry.task.clone())
    }

    /// Whether the engine has cancelled `id`. Unknown ids count as cancelled
    /// so the host stops working on them.
    pub fn is_cancelled(&self, id: TaskId) -> bool {
        self.inner
            .lock()
            .tasks
            .get(&id)
            .is_none_or(|entry| entry.done.is_none())
    }

    /// Tasks queued or in flight. A task cancelled while still queued counts
    /// until `next_task` skips it.
    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Report the terminal outcome of `id`. Returns `false` when the task is
    /// unknown or was cancelled; the outcome is then dropped.
    pub fn complete(&self, id: TaskId, outcome: Outcome) -> bool {
        let done = self
            .inner
            .lock()
            .tasks
            .remove(&id)
            .and_then(|entry| entry.done);
        match done {
            Some(done) => {
                done(outcome);
                true
            }
            None => {
                tracing::trace!(task = %id, "completion for cancelled or unknown task ignored");
                false
            }
        }
    }

    /// Report a response for `id`, mapping its status to an outcome.
    pub fn respond(&self, id: TaskId, response: HttpResponse) -> bool {
        self.complete(id, response.into_outcome())
    }

    /// Report that `id` failed without a response.
    pub fn fail(&self, id: TaskId, error: RequestError) -> bool {
        self.complete(id, Err(Failure::new(error)))
    }

    /// Answer a challenge for `id`. A rejected server trust fails the task
    /// with `RequestError::TrustRejected`; the host must abort the connection
    /// and not report it again.
    pub fn evaluate(&self, id: TaskId, challenge: &AuthChallenge<'_>) -> ChallengeDisposition {
        let Some(task) = self.task(id) else {
            return ChallengeDisposition::PerformDefaultHandling;
        };
        let disposition = task.evaluate(challenge);
        if disposition == ChallengeDisposition::Reject {
            let host = challenge
                .server_trust
                .map(|trust| trust.host.clone())
                .or_else(|| task.request.host())
                .unwrap_or_default();
            self.fail(id, RequestError::TrustRejected { host });
        }
        disposition
    }

    fn cancel(&self, id: TaskId) {
        // A pulled task is gone from `queued`, so nothing else would reap it.
        let done = {
            let mut state = self.inner.lock();
            if state.tasks.get(&id).is_some_and(|entry| entry.pulled) {
                state.tasks.remove(&id).and_then(|entry| entry.done)
            } else {
                state.tasks.get_mut(&id).and_then(|entry| entry.done.take())
            }
        };
        if done.is_some() {
            tracing::trace!(task = %id, "task cancelled");
        }
    }
}

impl Transport for HostQueue {
    fn start(&self, task: TransportTask, done: CompletionHandler) -> Box<dyn TaskHandle> {
        let id = {
            let mut state = self.inner.lock();
            state.next_id += 1;
            let id = TaskId(state.next_id);
            tracing::trace!(task = %id, tag = %task.tag, url = %task.request.url, "task queued");
            state.tasks.insert(
                id,
                Entry {
                    task: Arc::new(task),
                    done: Some(done),
                    pulled: false,
                },
            );
            state.queued.push_back(id);
            id
        };
        Box::new(QueuedTask {
            queue: self.clone(),
            id,
        })
    }
}

struct QueuedTask {
    queue: HostQueue,
    id: TaskId,
}

impl TaskHandle for QueuedTask {
    fn cancel(&self) {
        self.queue.cancel(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::ServerTrust;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task(url: &str) -> TransportTask {
        TransportTask {
            tag: RequestTag::generate(),
            request: HttpRequest::get(url),
            trust: TrustPolicy::default(),
            credential: None,
        }
    }

    fn counting(counter: &Arc<AtomicUsize>) -> CompletionHandler {
        let counter = counter.clone();
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn tasks_are_pulled_in_start_order() {
        let queue = HostQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));
        queue.start(task("http://h/1"), counting(&calls));
        queue.start(task("http://h/2"), counting(&calls));

        let (first, t1) = queue.next_task().unwrap();
        let (second, t2) = queue.next_task().unwrap();
        assert!(first < second);
        assert_eq!(t1.request.url, "http://h/1");
        assert_eq!(t2.request.url, "http://h/2");
        assert!(queue.next_task().is_none());

        assert!(queue.respond(first, HttpResponse::new(200, "")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn completion_is_delivered_once() {
        let queue = HostQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));
        queue.start(task("http://h/"), counting(&calls));
        let (id, _) = queue.next_task().unwrap();

        assert!(queue.respond(id, HttpResponse::new(200, "")));
        assert!(!queue.respond(id, HttpResponse::new(200, "")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn cancelled_queued_task_is_skipped() {
        let queue = HostQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = queue.start(task("http://h/1"), counting(&calls));
        queue.start(task("http://h/2"), counting(&calls));

        handle.cancel();
        let (_, next) = queue.next_task().unwrap();
        assert_eq!(next.request.url, "http://h/2");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn late_completion_after_cancel_is_dropped() {
        let queue = HostQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = queue.start(task("http://h/"), counting(&calls));
        let (id, _) = queue.next_task().unwrap();

        handle.cancel();
        assert!(queue.is_cancelled(id));
        assert!(!queue.fail(id, RequestError::Connection("reset".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn cancelling_pulled_tasks_releases_them() {
        let queue = HostQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..100)
            .map(|n| queue.start(task(&format!("http://h/{n}")), counting(&calls)))
            .collect();
        let pulled: Vec<_> = std::iter::from_fn(|| queue.next_task()).collect();
        assert_eq!(pulled.len(), 100);

        for handle in &handles {
            handle.cancel();
        }
        assert!(queue.is_empty());
        for (id, _) in &pulled {
            assert!(queue.is_cancelled(*id));
            assert!(queue.task(*id).is_none());
        }
        assert!(!queue.respond(pulled[0].0, HttpResponse::new(200, "")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rejected_server_trust_fails_the_task() {
        let queue = HostQueue::new();
        let outcome = Arc::new(Mutex::new(None));
        let sink = outcome.clone();
        let mut pinned = task("https://pinned.example/");
        pinned.trust = TrustPolicy {
            trusted_certificates: vec![b"expected".to_vec()],
            public_key_pinning_required: true,
            ..TrustPolicy::default()
        };
        queue.start(pinned, Box::new(move |o| *sink.lock() = Some(o)));
        let (id, _) = queue.next_task().unwrap();

        let presented = ServerTrust {
            host: "pinned.example".to_string(),
            certificate_chain: vec![b"forged".to_vec()],
        };
        assert_eq!(
            queue.evaluate(id, &AuthChallenge::server_trust(&presented)),
            ChallengeDisposition::Reject
        );

        let failure = outcome.lock().take().unwrap().unwrap_err();
        assert_eq!(
            failure.error,
            RequestError::TrustRejected {
                host: "pinned.example".to_string()
            }
        );
        assert!(queue.is_empty());
    }
}
