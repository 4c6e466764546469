//! The service object every request executes against.
//!
//! # Design
//! `Manager` is constructed once and handed to request builders. It owns
//! the request registry, the host policy store and the transport. Requests
//! keep only a `WeakManager`, so a manager dropped or shut down while
//! requests are in flight turns their late callbacks into no-ops instead of
//! keeping the whole engine alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use url::Url;

use crate::config::ManagerConfig;
use crate::error::{ConfigError, RequestError};
use crate::http::HttpRequest;
use crate::policy::HostPolicyStore;
use crate::registry::RequestRegistry;
use crate::request::{Request, RequestTag};
use crate::transport::Transport;

#[derive(Clone)]
pub struct Manager {
    shared: Arc<Shared>,
}

struct Shared {
    base_url: Option<Url>,
    transport: Arc<dyn Transport>,
    registry: RequestRegistry,
    policies: HostPolicyStore,
    closed: AtomicBool,
}

/// Non-owning handle held by requests.
#[derive(Clone, Default)]
pub struct WeakManager {
    shared: Weak<Shared>,
}

impl WeakManager {
    /// Upgrade to a live manager that has not been shut down.
    pub fn upgrade(&self) -> Option<Manager> {
        self.shared
            .upgrade()
            .map(|shared| Manager { shared })
            .filter(|manager| !manager.is_shut_down())
    }

    /// Upgrade even after shutdown, for teardown paths.
    pub(crate) fn upgrade_any(&self) -> Option<Manager> {
        self.shared.upgrade().map(|shared| Manager { shared })
    }
}

impl Manager {
    pub fn new(config: ManagerConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        let base_url = config
            .base_url
            .map(|raw| {
                Url::parse(&raw).map_err(|source| ConfigError::InvalidBaseUrl { url: raw, source })
            })
            .transpose()?;

        let policies = HostPolicyStore::new();
        for (name, value) in &config.headers {
            policies.set_header(name, Some(value.as_str()), None);
        }
        for (host, headers) in &config.host_headers {
            for (name, value) in headers {
                policies.set_header(name, Some(value.as_str()), Some(host.as_str()));
            }
        }

        Ok(Self {
            shared: Arc::new(Shared {
                base_url,
                transport,
                registry: RequestRegistry::new(),
                policies,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn downgrade(&self) -> WeakManager {
        WeakManager {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn policies(&self) -> &HostPolicyStore {
        &self.shared.policies
    }

    pub fn registry(&self) -> &RequestRegistry {
        &self.shared.registry
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.shared.transport.as_ref()
    }

    pub fn register_request(&self, request: Arc<dyn Request>) {
        self.shared.registry.register(request);
    }

    pub fn unregister_request(&self, tag: &RequestTag) {
        self.shared.registry.unregister(tag);
    }

    pub fn request(&self, tag: &RequestTag) -> Option<Arc<dyn Request>> {
        self.shared.registry.get(tag)
    }

    pub fn active_requests(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn cancel_all_requests(&self) -> usize {
        self.shared.registry.cancel_all()
    }

    pub fn cancel_requests_in_group(&self, group: &str) -> usize {
        self.shared.registry.cancel_group(group)
    }

    /// Refuse further executions and cancel everything still registered.
    pub fn shutdown(&self) -> usize {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let cancelled = self.cancel_all_requests();
        tracing::debug!(cancelled, "manager shut down");
        cancelled
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Resolve `request` against the base URL and merge the host's default
    /// headers underneath the request's own.
    pub fn prepare(&self, request: &HttpRequest) -> Result<HttpRequest, RequestError> {
        let url = match &self.shared.base_url {
            Some(base) => base.join(&request.url),
            None => Url::parse(&request.url),
        }
        .map_err(|e| RequestError::InvalidUrl {
            url: request.url.clone(),
            reason: e.to_string(),
        })?;

        let host = url.host_str().map(str::to_ascii_lowercase);
        let mut headers: Vec<(String, String)> = self
            .shared
            .policies
            .headers_for_host(host.as_deref())
            .into_iter()
            .filter(|(name, _)| request.header(name).is_none())
            .collect();
        headers.sort();
        headers.extend(request.headers.iter().cloned());

        Ok(HttpRequest {
            method: request.method,
            url: url.to_string(),
            headers,
            body: request.body.clone(),
        })
    }
}
