//! Trust and credential resolution for authentication challenges.
//!
//! Consulted by the transport once per challenge. Server-trust challenges are
//! decided against the request's `TrustPolicy`; HTTP Basic/Digest challenges
//! against the credential attached to the transport task.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Per-request TLS pinning configuration.
///
/// The three settings are layered: `trusts_all_certificates` wins outright,
/// otherwise pinned certificates are checked, and `public_key_pinning_required`
/// turns a pin mismatch into a hard rejection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustPolicy {
    pub trusts_all_certificates: bool,
    pub trusted_certificates: Vec<Vec<u8>>,
    pub public_key_pinning_required: bool,
}

impl TrustPolicy {
    fn pins_certificates(&self) -> bool {
        !self.trusted_certificates.is_empty() || self.public_key_pinning_required
    }
}

/// The server's trust object: its host and DER certificate chain, leaf first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTrust {
    pub host: String,
    pub certificate_chain: Vec<Vec<u8>>,
}

impl ServerTrust {
    pub fn leaf_certificate(&self) -> Option<&[u8]> {
        self.certificate_chain.first().map(Vec::as_slice)
    }
}

/// Credentials the engine can hand back to the transport.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password { user: String, password: String },
    ServerTrust(ServerTrust),
}

impl Credential {
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::Password {
            user: user.into(),
            password: password.into(),
        }
    }

    /// `Authorization` header value for Basic authentication.
    pub fn basic_authorization(&self) -> Option<String> {
        match self {
            Credential::Password { user, password } => {
                Some(format!("Basic {}", STANDARD.encode(format!("{user}:{password}"))))
            }
            Credential::ServerTrust(_) => None,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            Credential::ServerTrust(trust) => f.debug_tuple("ServerTrust").field(trust).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationMethod {
    ServerTrust,
    HttpBasic,
    HttpDigest,
    Other(String),
}

/// A challenge raised by the transport for one request.
#[derive(Debug, Clone)]
pub struct AuthChallenge<'a> {
    pub method: AuthenticationMethod,
    /// Present for `ServerTrust` challenges.
    pub server_trust: Option<&'a ServerTrust>,
    /// Headers of the outgoing request that triggered the challenge.
    pub outgoing_headers: &'a [(String, String)],
}

impl<'a> AuthChallenge<'a> {
    pub fn server_trust(trust: &'a ServerTrust) -> Self {
        Self {
            method: AuthenticationMethod::ServerTrust,
            server_trust: Some(trust),
            outgoing_headers: &[],
        }
    }

    pub fn http_basic(outgoing_headers: &'a [(String, String)]) -> Self {
        Self {
            method: AuthenticationMethod::HttpBasic,
            server_trust: None,
            outgoing_headers,
        }
    }

    fn has_authorization(&self) -> bool {
        self.outgoing_headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("authorization"))
    }
}

/// How the transport should answer a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeDisposition {
    UseCredential(Credential),
    PerformDefaultHandling,
    /// Abort the connection; the pin did not match.
    Reject,
}

/// Decide a server-trust challenge. First matching rule wins.
pub fn evaluate_server_trust(policy: &TrustPolicy, trust: &ServerTrust) -> ChallengeDisposition {
    if policy.trusts_all_certificates {
        return ChallengeDisposition::UseCredential(Credential::ServerTrust(trust.clone()));
    }
    if !policy.pins_certificates() {
        return ChallengeDisposition::PerformDefaultHandling;
    }

    let Some(leaf) = trust.leaf_certificate() else {
        tracing::debug!(host = %trust.host, "no leaf certificate in server trust");
        return ChallengeDisposition::PerformDefaultHandling;
    };

    if policy
        .trusted_certificates
        .iter()
        .any(|pinned| pinned.as_slice() == leaf)
    {
        return ChallengeDisposition::UseCredential(Credential::ServerTrust(trust.clone()));
    }

    if policy.public_key_pinning_required {
        tracing::warn!(host = %trust.host, "leaf certificate matches no pin; rejecting");
        ChallengeDisposition::Reject
    } else {
        ChallengeDisposition::PerformDefaultHandling
    }
}

/// Decide any authentication challenge for a request carrying `policy` and
/// optionally `credential`.
pub fn resolve_challenge(
    policy: &TrustPolicy,
    credential: Option<&Credential>,
    challenge: &AuthChallenge<'_>,
) -> ChallengeDisposition {
    match challenge.method {
        AuthenticationMethod::ServerTrust => match challenge.server_trust {
            Some(trust) => evaluate_server_trust(policy, trust),
            None => ChallengeDisposition::PerformDefaultHandling,
        },
        AuthenticationMethod::HttpBasic | AuthenticationMethod::HttpDigest => {
            match credential {
                // Already sent once on this attempt; resupplying would loop.
                Some(_) if challenge.has_authorization() => {
                    ChallengeDisposition::PerformDefaultHandling
                }
                Some(credential) => ChallengeDisposition::UseCredential(credential.clone()),
                None => ChallengeDisposition::PerformDefaultHandling,
            }
        }
        AuthenticationMethod::Other(_) => ChallengeDisposition::PerformDefaultHandling,
    }
}
