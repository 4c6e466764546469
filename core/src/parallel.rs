//! Concurrent compound request.
//!
//! All children are started at once. The group completes when every child
//! has reported: with the first failure in completion order unless errors
//! are ignored, otherwise with success.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::RequestError;
use crate::manager::{Manager, WeakManager};
use crate::request::{
    ErrorCallback, Failure, Outcome, Payload, Request, RequestInfo, RequestKind, RequestState,
    SuccessCallback,
};
use crate::single::SingleRequest;

pub struct ParallelRequest {
    info: RequestInfo,
    this: Weak<ParallelRequest>,
    manager: WeakManager,
    ignore_errors: bool,
    inner: Mutex<Inner>,
}

struct Inner {
    state: RequestState,
    children: Vec<Arc<SingleRequest>>,
    finished: Vec<bool>,
    remaining: usize,
    first_failure: Option<Failure>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl ParallelRequest {
    pub fn builder() -> ParallelRequestBuilder {
        ParallelRequestBuilder::default()
    }

    pub fn add(&self, request: Arc<SingleRequest>) -> &Self {
        let mut inner = self.inner.lock();
        if inner.state == RequestState::Pending {
            inner.children.push(request);
        } else {
            tracing::debug!(tag = %self.info.tag, "child added to a started group ignored");
        }
        self
    }

    pub fn then(&self, request: Arc<SingleRequest>) -> &Self {
        self.add(request)
    }

    pub fn ignores_errors(&self) -> bool {
        self.ignore_errors
    }

    pub fn len(&self) -> usize {
        self.inner.lock().children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Children that have not reported yet.
    pub fn remaining(&self) -> usize {
        self.inner.lock().remaining
    }

    fn child_finished(&self, index: usize, outcome: Outcome) {
        let child = {
            let inner = self.inner.lock();
            if inner.state != RequestState::Executing || inner.finished.get(index) != Some(&false) {
                tracing::trace!(tag = %self.info.tag, index, "stale group member ignored");
                return;
            }
            inner.children.get(index).cloned()
        };
        if let Some(child) = child {
            child.deliver(&outcome, &self.info);
        }
        self.record(index, outcome);
    }

    fn record(&self, index: usize, outcome: Outcome) {
        let done = {
            let mut inner = self.inner.lock();
            if inner.state != RequestState::Executing {
                return;
            }
            match inner.finished.get_mut(index) {
                Some(flag) if !*flag => *flag = true,
                _ => return,
            }
            inner.remaining -= 1;
            if let Err(failure) = outcome {
                if self.ignore_errors {
                    tracing::debug!(tag = %self.info.tag, index, error = %failure.error, "ignoring failed group member");
                } else if inner.first_failure.is_none() {
                    inner.first_failure = Some(failure);
                }
            }
            inner.remaining == 0
        };
        if done {
            self.complete();
        }
    }

    fn complete(&self) {
        let (failure, on_success, on_error) = {
            let mut inner = self.inner.lock();
            if inner.state != RequestState::Executing {
                return;
            }
            let failure = inner.first_failure.take();
            inner.state = if failure.is_some() {
                RequestState::Failed
            } else {
                RequestState::Succeeded
            };
            (failure, inner.on_success.take(), inner.on_error.take())
        };

        match failure {
            None => {
                tracing::debug!(tag = %self.info.tag, "group completed");
                if let Some(callback) = on_success {
                    callback(&Payload::default(), &self.info);
                }
            }
            Some(failure) => {
                tracing::debug!(tag = %self.info.tag, error = %failure.error, "group failed");
                if let Some(callback) = on_error {
                    callback(&failure, &self.info);
                }
            }
        }
        self.unregister();
    }

    fn unregister(&self) {
        if let Some(manager) = self.manager.upgrade_any() {
            manager.unregister_request(&self.info.tag);
        }
    }
}

impl Request for ParallelRequest {
    fn info(&self) -> &RequestInfo {
        &self.info
    }

    fn state(&self) -> RequestState {
        self.inner.lock().state
    }

    fn execute(&self) -> bool {
        let Some(manager) = self.manager.upgrade() else {
            tracing::warn!(tag = %self.info.tag, "manager gone or shut down; not executing group");
            return false;
        };
        let Some(this) = self.this.upgrade() else {
            return false;
        };
        let children = {
            let mut inner = self.inner.lock();
            if inner.state != RequestState::Pending {
                tracing::debug!(tag = %self.info.tag, state = ?inner.state, "group already started or cancelled");
                return false;
            }
            inner.state = RequestState::Executing;
            inner.remaining = inner.children.len();
            inner.finished = vec![false; inner.children.len()];
            inner.children.clone()
        };
        tracing::debug!(tag = %self.info.tag, children = children.len(), "executing group");
        manager.register_request(this);

        if children.is_empty() {
            self.complete();
            return true;
        }
        for (index, child) in children.iter().enumerate() {
            let this = self.this.clone();
            let started = child.run(Box::new(move |outcome| {
                if let Some(group) = this.upgrade() {
                    group.child_finished(index, outcome);
                }
            }));
            if !started {
                let error = RequestError::NotExecutable(child.info().tag.clone());
                self.record(index, Err(Failure::new(error)));
            }
        }
        true
    }

    fn cancel(&self) {
        let children = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = RequestState::Cancelled;
            inner.on_success = None;
            inner.on_error = None;
            inner.first_failure = None;
            inner.children.clone()
        };
        tracing::debug!(tag = %self.info.tag, children = children.len(), "group cancelled");
        for child in &children {
            child.cancel();
        }
        self.unregister();
    }
}

#[derive(Default)]
pub struct ParallelRequestBuilder {
    group: Option<String>,
    ignore_errors: bool,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl ParallelRequestBuilder {
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    pub fn on_success(mut self, callback: impl FnOnce(&Payload, &RequestInfo) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(&Failure, &RequestInfo) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn build(self, manager: &Manager) -> Arc<ParallelRequest> {
        Arc::new_cyclic(|this| ParallelRequest {
            info: RequestInfo::new(RequestKind::Parallel, self.group),
            this: this.clone(),
            manager: manager.downgrade(),
            ignore_errors: self.ignore_errors,
            inner: Mutex::new(Inner {
                state: RequestState::Pending,
                children: Vec::new(),
                finished: Vec::new(),
                remaining: 0,
                first_failure: None,
                on_success: self.on_success,
                on_error: self.on_error,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::http::{HttpRequest, HttpResponse};
    use crate::transport::{HostQueue, TaskId};

    type Log = Arc<Mutex<Vec<String>>>;

    fn setup() -> (Manager, HostQueue, Log) {
        let queue = HostQueue::new();
        let manager = Manager::new(ManagerConfig::default(), Arc::new(queue.clone())).unwrap();
        (manager, queue, Log::default())
    }

    fn child(manager: &Manager, log: &Log, name: &str) -> Arc<SingleRequest> {
        let (ok, err) = (log.clone(), log.clone());
        let (ok_name, err_name) = (name.to_string(), name.to_string());
        SingleRequest::builder(HttpRequest::get(format!("http://svc/{name}")))
            .on_success(move |_, owner| ok.lock().push(format!("{ok_name} ok via {:?}", owner.kind)))
            .on_error(move |_, _| err.lock().push(format!("{err_name} err")))
            .build(manager)
    }

    fn group(manager: &Manager, log: &Log, ignore_errors: bool) -> Arc<ParallelRequest> {
        let (ok, err) = (log.clone(), log.clone());
        ParallelRequest::builder()
            .ignore_errors(ignore_errors)
            .on_success(move |_, _| ok.lock().push("group ok".to_string()))
            .on_error(move |failure, _| err.lock().push(format!("group err {}", failure.error)))
            .build(manager)
    }

    fn drain(queue: &HostQueue) -> Vec<(TaskId, String)> {
        std::iter::from_fn(|| queue.next_task())
            .map(|(id, task)| (id, task.request.url.clone()))
            .collect()
    }

    #[test]
    fn all_children_start_at_once() {
        let (manager, queue, log) = setup();
        let parallel = group(&manager, &log, false);
        parallel
            .add(child(&manager, &log, "a"))
            .then(child(&manager, &log, "b"))
            .then(child(&manager, &log, "c"));

        assert!(parallel.execute());
        let tasks = drain(&queue);
        assert_eq!(tasks.len(), 3);

        // Complete out of order.
        for (id, _) in tasks.iter().rev() {
            queue.respond(*id, HttpResponse::new(200, ""));
        }
        assert_eq!(
            *log.lock(),
            vec!["c ok via Parallel", "b ok via Parallel", "a ok via Parallel", "group ok"]
        );
        assert_eq!(parallel.state(), RequestState::Succeeded);
        assert_eq!(manager.active_requests(), 0);
    }

    #[test]
    fn group_waits_for_every_child_and_reports_first_failure() {
        let (manager, queue, log) = setup();
        let parallel = group(&manager, &log, false);
        parallel
            .add(child(&manager, &log, "a"))
            .then(child(&manager, &log, "b"))
            .then(child(&manager, &log, "c"));
        parallel.execute();
        let tasks = drain(&queue);

        queue.respond(tasks[1].0, HttpResponse::new(503, "busy"));
        queue.respond(tasks[0].0, HttpResponse::new(500, "boom"));
        assert_eq!(parallel.remaining(), 1);
        assert_eq!(parallel.state(), RequestState::Executing);

        queue.respond(tasks[2].0, HttpResponse::new(200, ""));
        assert_eq!(
            *log.lock(),
            vec!["b err", "a err", "c ok via Parallel", "group err HTTP 503: busy"]
        );
        assert_eq!(parallel.state(), RequestState::Failed);
    }

    #[test]
    fn ignored_errors_complete_with_success() {
        let (manager, queue, log) = setup();
        let parallel = group(&manager, &log, true);
        parallel.add(child(&manager, &log, "a")).then(child(&manager, &log, "b"));
        parallel.execute();
        let tasks = drain(&queue);

        queue.fail(tasks[0].0, RequestError::Connection("refused".to_string()));
        queue.respond(tasks[1].0, HttpResponse::new(200, ""));
        assert_eq!(*log.lock(), vec!["a err", "b ok via Parallel", "group ok"]);
    }

    #[test]
    fn empty_group_succeeds_immediately() {
        let (manager, _queue, log) = setup();
        let parallel = group(&manager, &log, false);
        assert!(parallel.execute());
        assert_eq!(*log.lock(), vec!["group ok"]);
        assert_eq!(manager.active_requests(), 0);
    }

    #[test]
    fn second_execute_is_refused() {
        let (manager, queue, log) = setup();
        let parallel = group(&manager, &log, false);
        parallel.add(child(&manager, &log, "a"));
        assert!(parallel.execute());
        assert!(!parallel.execute());
        assert_eq!(queue.len(), 1);
        assert_eq!(manager.active_requests(), 1);
    }

    #[test]
    fn cancel_stops_every_child_without_callbacks() {
        let (manager, queue, log) = setup();
        let parallel = group(&manager, &log, false);
        let (a, b) = (child(&manager, &log, "a"), child(&manager, &log, "b"));
        parallel.add(a.clone()).then(b.clone());
        parallel.execute();
        let tasks = drain(&queue);

        queue.respond(tasks[0].0, HttpResponse::new(200, ""));
        parallel.cancel();

        assert_eq!(parallel.state(), RequestState::Cancelled);
        assert_eq!(b.state(), RequestState::Cancelled);
        assert!(queue.is_cancelled(tasks[1].0));
        assert!(!queue.respond(tasks[1].0, HttpResponse::new(200, "")));
        assert_eq!(*log.lock(), vec!["a ok via Parallel"]);
        assert_eq!(manager.active_requests(), 0);
    }

    #[test]
    fn already_started_child_counts_as_failed() {
        let (manager, queue, log) = setup();
        let busy = child(&manager, &log, "busy");
        busy.execute();

        let parallel = group(&manager, &log, false);
        parallel.add(busy).then(child(&manager, &log, "fresh"));
        parallel.execute();
        assert_eq!(parallel.remaining(), 1);

        let tasks = drain(&queue);
        assert_eq!(tasks.len(), 2);
        let fresh = tasks.iter().find(|(_, url)| url.ends_with("/fresh")).unwrap();
        queue.respond(fresh.0, HttpResponse::new(200, ""));

        let log = log.lock();
        assert!(log.last().unwrap().ends_with("cannot be executed again"));
    }

    #[test]
    fn shutdown_cancels_running_groups() {
        let (manager, _queue, log) = setup();
        let parallel = group(&manager, &log, false);
        parallel.add(child(&manager, &log, "a"));
        parallel.execute();

        assert_eq!(manager.shutdown(), 1);
        assert_eq!(parallel.state(), RequestState::Cancelled);
        assert!(log.lock().is_empty());

        let late = group(&manager, &log, false);
        assert!(!late.execute());
    }
}
