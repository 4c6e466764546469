//! A leaf request: one HTTP call with its own callbacks and lifecycle.
//!
//! # Design
//! A single request runs either at the top level (`execute`, registered in
//! the manager) or as the child of a compound request (`run`, never
//! registered). In both cases the transport is handed a trampoline that
//! holds only a `Weak` reference; the request stores the continuation that
//! decides what completion means, so cancellation can take it away and late
//! transport callbacks find nothing to call.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::RequestError;
use crate::http::HttpRequest;
use crate::manager::{Manager, WeakManager};
use crate::request::{
    CompletionHandler, ErrorCallback, Failure, Outcome, Payload, Request, RequestInfo,
    RequestKind, RequestState, SuccessCallback,
};
use crate::transport::{TaskHandle, TransportTask};
use crate::trust::{Credential, TrustPolicy};

pub struct SingleRequest {
    info: RequestInfo,
    this: Weak<SingleRequest>,
    manager: WeakManager,
    request: HttpRequest,
    trust: TrustPolicy,
    credential: Option<Credential>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: RequestState,
    task: Option<Box<dyn TaskHandle>>,
    continuation: Option<CompletionHandler>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl SingleRequest {
    pub fn builder(request: HttpRequest) -> SingleRequestBuilder {
        SingleRequestBuilder {
            request,
            group: None,
            trust: TrustPolicy::default(),
            credential: None,
            on_success: None,
            on_error: None,
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn trust_policy(&self) -> &TrustPolicy {
        &self.trust
    }

    /// Start as the child of a compound request. `continuation` receives the
    /// outcome instead of this request's own completion path; the caller is
    /// responsible for invoking `deliver`.
    pub(crate) fn run(&self, continuation: CompletionHandler) -> bool {
        let Some(manager) = self.manager.upgrade() else {
            return false;
        };
        if !self.begin() {
            return false;
        }
        self.launch(&manager, continuation);
        true
    }

    /// Invoke this request's own callback for `outcome`, reporting `context`
    /// as the owning request, and move to the matching terminal state.
    /// Returns `false` when the request already reached a terminal state.
    pub(crate) fn deliver(&self, outcome: &Outcome, context: &RequestInfo) -> bool {
        let (on_success, on_error) = {
            let mut inner = self.inner.lock();
            if inner.state != RequestState::Executing {
                return false;
            }
            inner.state = match outcome {
                Ok(_) => RequestState::Succeeded,
                Err(_) => RequestState::Failed,
            };
            inner.task = None;
            (inner.on_success.take(), inner.on_error.take())
        };

        match outcome {
            Ok(payload) => {
                tracing::debug!(tag = %self.info.tag, owner = %context.tag, "request succeeded");
                if let Some(callback) = on_success {
                    callback(payload, context);
                }
            }
            Err(failure) => {
                tracing::debug!(
                    tag = %self.info.tag,
                    owner = %context.tag,
                    error = %failure.error,
                    "request failed"
                );
                if let Some(callback) = on_error {
                    callback(failure, context);
                }
            }
        }
        true
    }

    fn begin(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != RequestState::Pending {
            tracing::debug!(tag = %self.info.tag, state = ?inner.state, "request already started or cancelled");
            return false;
        }
        inner.state = RequestState::Executing;
        true
    }

    fn launch(&self, manager: &Manager, continuation: CompletionHandler) {
        self.inner.lock().continuation = Some(continuation);

        let request = match manager.prepare(&self.request) {
            Ok(request) => request,
            Err(error) => {
                self.finish(Err(Failure::new(error)));
                return;
            }
        };
        let credential = self.credential.clone().or_else(|| {
            manager
                .policies()
                .credentials_for_host(request.host().as_deref())
        });
        tracing::trace!(tag = %self.info.tag, method = request.method.as_str(), url = %request.url, "starting transport task");

        let task = TransportTask {
            tag: self.info.tag.clone(),
            request,
            trust: self.trust.clone(),
            credential,
        };
        let this = self.this.clone();
        let handle = manager.transport().start(
            task,
            Box::new(move |outcome| {
                if let Some(request) = this.upgrade() {
                    request.finish(outcome);
                }
            }),
        );

        let mut inner = self.inner.lock();
        let state = inner.state;
        match state {
            RequestState::Executing if inner.continuation.is_some() => inner.task = Some(handle),
            RequestState::Cancelled => {
                drop(inner);
                handle.cancel();
            }
            // Completed synchronously; nothing left to cancel.
            _ => {}
        }
    }

    fn finish(&self, outcome: Outcome) {
        let continuation = {
            let mut inner = self.inner.lock();
            inner.task = None;
            inner.continuation.take()
        };
        match continuation {
            Some(continuation) => continuation(outcome),
            None => tracing::trace!(tag = %self.info.tag, "late completion ignored"),
        }
    }

    fn unregister(&self) {
        if let Some(manager) = self.manager.upgrade_any() {
            manager.unregister_request(&self.info.tag);
        }
    }
}

impl Request for SingleRequest {
    fn info(&self) -> &RequestInfo {
        &self.info
    }

    fn state(&self) -> RequestState {
        self.inner.lock().state
    }

    fn execute(&self) -> bool {
        let Some(manager) = self.manager.upgrade() else {
            tracing::warn!(tag = %self.info.tag, "manager gone or shut down; not executing");
            return false;
        };
        let Some(this) = self.this.upgrade() else {
            return false;
        };
        if !self.begin() {
            return false;
        }
        manager.register_request(this);

        let this = self.this.clone();
        self.launch(
            &manager,
            Box::new(move |outcome| {
                if let Some(request) = this.upgrade() {
                    let info = request.info.clone();
                    if request.deliver(&outcome, &info) {
                        request.unregister();
                    }
                }
            }),
        );
        true
    }

    fn cancel(&self) {
        let (task, continuation) = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = RequestState::Cancelled;
            inner.on_success = None;
            inner.on_error = None;
            (inner.task.take(), inner.continuation.take())
        };
        tracing::debug!(tag = %self.info.tag, "request cancelled");

        if let Some(task) = task {
            task.cancel();
        }
        // A compound parent learns about the cancellation through its
        // continuation; a top-level continuation ignores it because the
        // request is no longer executing.
        if let Some(continuation) = continuation {
            continuation(Err(Failure::new(RequestError::Cancelled(self.info.tag.clone()))));
        }
        self.unregister();
    }
}

pub struct SingleRequestBuilder {
    request: HttpRequest,
    group: Option<String>,
    trust: TrustPolicy,
    credential: Option<Credential>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl SingleRequestBuilder {
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
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

    pub fn trust_policy(mut self, trust: TrustPolicy) -> Self {
        self.trust = trust;
        self
    }

    pub fn trust_all_certificates(mut self) -> Self {
        self.trust.trusts_all_certificates = true;
        self
    }

    pub fn trusted_certificate(mut self, der: impl Into<Vec<u8>>) -> Self {
        self.trust.trusted_certificates.push(der.into());
        self
    }

    pub fn require_public_key_pinning(mut self) -> Self {
        self.trust.public_key_pinning_required = true;
        self
    }

    /// Attach a credential; otherwise the host's credential from the policy
    /// store is used.
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn build(self, manager: &Manager) -> Arc<SingleRequest> {
        Arc::new_cyclic(|this| SingleRequest {
            info: RequestInfo::new(RequestKind::Single, self.group),
            this: this.clone(),
            manager: manager.downgrade(),
            request: self.request,
            trust: self.trust,
            credential: self.credential,
            inner: Mutex::new(Inner {
                state: RequestState::Pending,
                task: None,
                continuation: None,
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
    use crate::http::HttpResponse;
    use crate::transport::HostQueue;

    type Events = Arc<Mutex<Vec<String>>>;

    fn setup() -> (Manager, HostQueue) {
        let queue = HostQueue::new();
        let manager = Manager::new(ManagerConfig::default(), Arc::new(queue.clone())).unwrap();
        (manager, queue)
    }

    fn recorded(manager: &Manager, url: &str, events: &Events) -> Arc<SingleRequest> {
        let ok = events.clone();
        let err = events.clone();
        SingleRequest::builder(HttpRequest::get(url))
            .on_success(move |payload, _| {
                let status = payload.response.as_ref().map_or(0, |r| r.status);
                ok.lock().push(format!("ok {status}"));
            })
            .on_error(move |failure, _| err.lock().push(format!("err {}", failure.error)))
            .build(manager)
    }

    #[test]
    fn top_level_request_registers_until_completion() {
        let (manager, queue) = setup();
        let events = Events::default();
        let request = recorded(&manager, "http://h/a", &events);

        assert!(request.execute());
        assert_eq!(request.state(), RequestState::Executing);
        assert!(manager.registry().contains(&request.info().tag));

        let (id, task) = queue.next_task().unwrap();
        assert_eq!(task.tag, request.info().tag);
        queue.respond(id, HttpResponse::new(200, "{}"));

        assert_eq!(*events.lock(), vec!["ok 200"]);
        assert_eq!(request.state(), RequestState::Succeeded);
        assert_eq!(manager.active_requests(), 0);
    }

    #[test]
    fn execute_twice_is_refused() {
        let (manager, queue) = setup();
        let request = recorded(&manager, "http://h/a", &Events::default());
        assert!(request.execute());
        assert!(!request.execute());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn error_callback_receives_own_info() {
        let (manager, queue) = setup();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let request = SingleRequest::builder(HttpRequest::get("http://h/missing"))
            .group("g")
            .on_error(move |failure, info| *sink.lock() = Some((failure.error.clone(), info.clone())))
            .build(&manager);
        request.execute();

        let (id, _) = queue.next_task().unwrap();
        queue.respond(id, HttpResponse::new(404, "nope"));

        let (error, info) = seen.lock().take().unwrap();
        assert_eq!(
            error,
            RequestError::HttpStatus {
                status: 404,
                body: "nope".to_string()
            }
        );
        assert_eq!(&info, request.info());
        assert_eq!(info.group.as_deref(), Some("g"));
        assert_eq!(request.state(), RequestState::Failed);
    }

    #[test]
    fn invalid_url_fails_through_the_callback() {
        let (manager, queue) = setup();
        let events = Events::default();
        let request = recorded(&manager, "relative/path", &events);

        assert!(request.execute());
        assert!(queue.is_empty());
        assert_eq!(events.lock().len(), 1);
        assert!(events.lock()[0].starts_with("err invalid url"));
        assert_eq!(manager.active_requests(), 0);
    }

    #[test]
    fn cancel_suppresses_callbacks_and_late_completion() {
        let (manager, queue) = setup();
        let events = Events::default();
        let request = recorded(&manager, "http://h/a", &events);
        request.execute();
        let (id, _) = queue.next_task().unwrap();

        request.cancel();
        assert_eq!(request.state(), RequestState::Cancelled);
        assert_eq!(manager.active_requests(), 0);
        assert!(queue.is_cancelled(id));

        assert!(!queue.respond(id, HttpResponse::new(200, "")));
        assert!(events.lock().is_empty());
        assert!(!request.execute());
    }

    #[test]
    fn cancel_before_execute_prevents_execution() {
        let (manager, queue) = setup();
        let request = recorded(&manager, "http://h/a", &Events::default());
        request.cancel();
        assert!(!request.execute());
        assert!(queue.is_empty());
    }

    #[test]
    fn credential_falls_back_to_host_policy() {
        let (manager, queue) = setup();
        let host_credential = Credential::password("host", "h");
        manager
            .policies()
            .set_credentials(Some(host_credential.clone()), Some("h"));

        SingleRequest::builder(HttpRequest::get("http://h/a"))
            .build(&manager)
            .execute();
        let explicit = Credential::password("mine", "m");
        SingleRequest::builder(HttpRequest::get("http://h/b"))
            .credential(explicit.clone())
            .build(&manager)
            .execute();

        let (_, first) = queue.next_task().unwrap();
        let (_, second) = queue.next_task().unwrap();
        assert_eq!(first.credential, Some(host_credential));
        assert_eq!(second.credential, Some(explicit));
    }

    #[test]
    fn trust_settings_reach_the_transport_task() {
        let (manager, queue) = setup();
        SingleRequest::builder(HttpRequest::get("https://h/a"))
            .trusted_certificate(b"pin".to_vec())
            .require_public_key_pinning()
            .build(&manager)
            .execute();

        let (_, task) = queue.next_task().unwrap();
        assert_eq!(task.trust.trusted_certificates, vec![b"pin".to_vec()]);
        assert!(task.trust.public_key_pinning_required);
        assert!(!task.trust.trusts_all_certificates);
    }

    #[test]
    fn shutdown_refuses_new_executions() {
        let (manager, queue) = setup();
        let running = recorded(&manager, "http://h/a", &Events::default());
        running.execute();

        assert_eq!(manager.shutdown(), 1);
        assert_eq!(running.state(), RequestState::Cancelled);

        let late = recorded(&manager, "http://h/b", &Events::default());
        assert!(!late.execute());
        assert_eq!(late.state(), RequestState::Pending);
        assert!(queue.next_task().is_none());
    }

    #[test]
    fn dropped_request_ignores_late_completion() {
        let (manager, queue) = setup();
        let events = Events::default();
        let request = recorded(&manager, "http://h/a", &events);
        request.execute();
        let (id, _) = queue.next_task().unwrap();

        manager.unregister_request(&request.info().tag);
        drop(request);

        assert!(queue.respond(id, HttpResponse::new(200, "")));
        assert!(events.lock().is_empty());
    }
}
