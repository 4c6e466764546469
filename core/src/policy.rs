//! Host-scoped header and credential policy.
//!
//! Headers resolve per name, host entries overriding the all-hosts entries.
//! Names compare case-insensitively and keep the spelling they were last set
//! with.
//! Credentials resolve wholesale: a host with its own credential never sees
//! the all-hosts one.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::trust::Credential;

#[derive(Debug, Default)]
pub struct HostPolicyStore {
    inner: RwLock<Policies>,
}

/// Lowercased name to `(name as set, value)`.
type Headers = HashMap<String, (String, String)>;

#[derive(Debug, Default)]
struct Policies {
    headers: Headers,
    host_headers: HashMap<String, Headers>,
    credential: Option<Credential>,
    host_credentials: HashMap<String, Credential>,
}

impl HostPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` for `host`, or for all hosts when `host` is `None`.
    /// A `None` value unsets the header in that scope.
    pub fn set_header(&self, name: &str, value: Option<&str>, host: Option<&str>) {
        let key = name.to_ascii_lowercase();
        let mut policies = self.inner.write();
        match (host, value) {
            (None, Some(value)) => {
                policies.headers.insert(key, (name.to_string(), value.to_string()));
            }
            (None, None) => {
                policies.headers.remove(&key);
            }
            (Some(host), Some(value)) => {
                policies
                    .host_headers
                    .entry(host_key(host))
                    .or_default()
                    .insert(key, (name.to_string(), value.to_string()));
            }
            (Some(host), None) => {
                let host = host_key(host);
                if let Some(headers) = policies.host_headers.get_mut(&host) {
                    headers.remove(&key);
                    if headers.is_empty() {
                        policies.host_headers.remove(&host);
                    }
                }
            }
        }
    }

    /// Effective headers for `host`: all-hosts entries merged with the
    /// host's own, the host's winning on name conflicts.
    pub fn headers_for_host(&self, host: Option<&str>) -> HashMap<String, String> {
        let policies = self.inner.read();
        let mut merged: HashMap<&str, &(String, String)> = policies
            .headers
            .iter()
            .map(|(key, entry)| (key.as_str(), entry))
            .collect();
        if let Some(specific) = host.and_then(|h| policies.host_headers.get(&host_key(h))) {
            merged.extend(specific.iter().map(|(key, entry)| (key.as_str(), entry)));
        }
        merged
            .into_values()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Set the credential for `host`, or the all-hosts credential when
    /// `host` is `None`. `None` removes it.
    pub fn set_credentials(&self, credential: Option<Credential>, host: Option<&str>) {
        let mut policies = self.inner.write();
        match (host, credential) {
            (None, credential) => policies.credential = credential,
            (Some(host), Some(credential)) => {
                policies.host_credentials.insert(host_key(host), credential);
            }
            (Some(host), None) => {
                policies.host_credentials.remove(&host_key(host));
            }
        }
    }

    pub fn credentials_for_host(&self, host: Option<&str>) -> Option<Credential> {
        let policies = self.inner.read();
        host.and_then(|h| policies.host_credentials.get(&host_key(h)))
            .or(policies.credential.as_ref())
            .cloned()
    }

    /// Forget every header and the credential registered for `host`.
    pub fn clear_host(&self, host: &str) {
        let key = host_key(host);
        let mut policies = self.inner.write();
        policies.host_headers.remove(&key);
        policies.host_credentials.remove(&key);
    }
}

fn host_key(host: &str) -> String {
    host.to_ascii_lowercase()
}
