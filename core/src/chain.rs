//! Sequential compound request.
//!
//! # Design
//! The chain owns the decision logic. Each child is started with a fixed
//! trampoline that holds a `Weak` reference to the chain and calls
//! `child_finished(index, outcome)`. The chain then reports the outcome to
//! the child's own callback (with the chain as owning request) and decides:
//! advance the cursor, or abort on an error that is not ignored.
//!
//! Invariants:
//! - the cursor only moves forward, and only from `child_finished` for the
//!   child it points at;
//! - child N+1 starts only after child N's completion was fully processed;
//! - exactly one of the chain's callbacks fires, or none when cancelled.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::RequestError;
use crate::manager::{Manager, WeakManager};
use crate::request::{
    ErrorCallback, Failure, Outcome, Payload, Request, RequestInfo, RequestKind, RequestState,
    SuccessCallback,
};
use crate::single::SingleRequest;

pub struct ChainedRequest {
    info: RequestInfo,
    this: Weak<ChainedRequest>,
    manager: WeakManager,
    ignore_errors: bool,
    inner: Mutex<Inner>,
}

struct Inner {
    state: RequestState,
    children: Vec<Arc<SingleRequest>>,
    cursor: usize,
    /// Set while a `drive` loop is running on some thread.
    driving: bool,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

enum Step {
    Run(usize, Arc<SingleRequest>),
    Exhausted(Option<SuccessCallback>),
}

impl ChainedRequest {
    pub fn builder() -> ChainedRequestBuilder {
        ChainedRequestBuilder::default()
    }

    /// Append a child. Children run in the order they were added.
    pub fn add(&self, request: Arc<SingleRequest>) -> &Self {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            tracing::debug!(tag = %self.info.tag, "child added to a finished chain ignored");
        } else {
            inner.children.push(request);
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

    /// Index of the next child to run.
    pub fn cursor(&self) -> usize {
        self.inner.lock().cursor
    }

    /// Run children until one is left in flight or the chain finishes.
    ///
    /// A child that completes inside `run` only bumps the cursor through
    /// `advance`; this loop then picks up the next child, so the stack does
    /// not grow with the chain. At most one caller drives at a time.
    fn drive(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.driving {
                return;
            }
            inner.driving = true;
        }

        loop {
            let step = {
                let mut inner = self.inner.lock();
                if inner.state != RequestState::Executing {
                    inner.driving = false;
                    return;
                }
                match inner.children.get(inner.cursor).cloned() {
                    Some(child) => Step::Run(inner.cursor, child),
                    None => {
                        inner.state = RequestState::Succeeded;
                        inner.driving = false;
                        inner.on_error = None;
                        Step::Exhausted(inner.on_success.take())
                    }
                }
            };

            let (index, child) = match step {
                Step::Exhausted(callback) => {
                    tracing::debug!(tag = %self.info.tag, "chain completed");
                    if let Some(callback) = callback {
                        callback(&Payload::default(), &self.info);
                    }
                    self.unregister();
                    return;
                }
                Step::Run(index, child) => (index, child),
            };

            tracing::trace!(tag = %self.info.tag, index, child = %child.info().tag, "running chain step");
            let this = self.this.clone();
            let started = child.run(Box::new(move |outcome| {
                if let Some(chain) = this.upgrade() {
                    chain.child_finished(index, outcome);
                }
            }));
            if !started {
                let error = RequestError::NotExecutable(child.info().tag.clone());
                self.decide(index, Err(Failure::new(error)));
            }

            let mut inner = self.inner.lock();
            if inner.state == RequestState::Executing && inner.cursor != index {
                // The step already finished; keep going from here.
                continue;
            }
            // Still in flight, or terminal. A later completion drives again.
            inner.driving = false;
            return;
        }
    }

    fn is_current(&self, index: usize) -> bool {
        let inner = self.inner.lock();
        inner.state == RequestState::Executing && inner.cursor == index
    }

    fn child_finished(&self, index: usize, outcome: Outcome) {
        if !self.is_current(index) {
            tracing::trace!(tag = %self.info.tag, index, "stale chain step ignored");
            return;
        }
        let child = self.inner.lock().children.get(index).cloned();
        if let Some(child) = child {
            child.deliver(&outcome, &self.info);
        }
        self.decide(index, outcome);
    }

    fn decide(&self, index: usize, outcome: Outcome) {
        match outcome {
            Ok(_) => self.advance(index),
            Err(failure) if self.ignore_errors => {
                tracing::debug!(tag = %self.info.tag, index, error = %failure.error, "ignoring failed chain step");
                self.advance(index);
            }
            Err(failure) => self.abort(index, failure),
        }
    }

    fn advance(&self, index: usize) {
        {
            let mut inner = self.inner.lock();
            if inner.state != RequestState::Executing || inner.cursor != index {
                return;
            }
            inner.cursor += 1;
        }
        self.drive();
    }

    fn abort(&self, index: usize, failure: Failure) {
        let callback = {
            let mut inner = self.inner.lock();
            if inner.state != RequestState::Executing || inner.cursor != index {
                return;
            }
            inner.state = RequestState::Failed;
            let skipped = inner.children.len().saturating_sub(index + 1);
            inner.children.truncate(index + 1);
            inner.on_success = None;
            tracing::debug!(tag = %self.info.tag, index, skipped, error = %failure.error, "chain aborted");
            inner.on_error.take()
        };
        if let Some(callback) = callback {
            callback(&failure, &self.info);
        }
        self.unregister();
    }

    fn unregister(&self) {
        if let Some(manager) = self.manager.upgrade_any() {
            manager.unregister_request(&self.info.tag);
        }
    }
}

impl Request for ChainedRequest {
    fn info(&self) -> &RequestInfo {
        &self.info
    }

    fn state(&self) -> RequestState {
        self.inner.lock().state
    }

    fn execute(&self) -> bool {
        let Some(manager) = self.manager.upgrade() else {
            tracing::warn!(tag = %self.info.tag, "manager gone or shut down; not executing chain");
            return false;
        };
        let Some(this) = self.this.upgrade() else {
            return false;
        };
        {
            let mut inner = self.inner.lock();
            if inner.state != RequestState::Pending {
                tracing::debug!(tag = %self.info.tag, state = ?inner.state, "chain already started or cancelled");
                return false;
            }
            inner.state = RequestState::Executing;
            tracing::debug!(tag = %self.info.tag, children = inner.children.len(), "executing chain");
        }
        manager.register_request(this);
        self.drive();
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
            inner.children.clone()
        };
        tracing::debug!(tag = %self.info.tag, children = children.len(), "chain cancelled");
        for child in &children {
            child.cancel();
        }
        self.unregister();
    }
}

#[derive(Default)]
pub struct ChainedRequestBuilder {
    group: Option<String>,
    ignore_errors: bool,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl ChainedRequestBuilder {
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Keep running after a child fails. Failed children are still reported
    /// to their own error callback; the chain's error callback never fires.
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

    pub fn build(self, manager: &Manager) -> Arc<ChainedRequest> {
        Arc::new_cyclic(|this| ChainedRequest {
            info: RequestInfo::new(RequestKind::Chained, self.group),
            this: this.clone(),
            manager: manager.downgrade(),
            ignore_errors: self.ignore_errors,
            inner: Mutex::new(Inner {
                state: RequestState::Pending,
                children: Vec::new(),
                cursor: 0,
                driving: false,
                on_success: self.on_success,
                on_error: self.on_error,
            }),
        })
    }
}
