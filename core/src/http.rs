//! HTTP transport types for the host-does-IO pattern.
//!
//! # Design
//! Requests and responses are plain data. The engine prepares `HttpRequest`
//! values and hands them to a `Transport`; the transport (or the host behind
//! a `HostQueue`) performs the I/O and reports back an `HttpResponse`, which
//! `into_outcome` turns into the terminal `Outcome` a request expects.
//!
//! All fields use owned types (`String`, `Vec`) so values can cross FFI
//! boundaries without lifetime concerns.

use serde::Serialize;
use url::Url;

use crate::error::RequestError;
use crate::request::{Failure, Outcome, Payload};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// An HTTP request described as plain data.
///
/// `url` may be relative; `Manager::prepare` resolves it against the
/// configured base URL before the request reaches the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Head, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body and set the content type.
    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self, RequestError> {
        let body =
            serde_json::to_string(value).map_err(|e| RequestError::Serialization(e.to_string()))?;
        Ok(self
            .with_header("content-type", "application/json")
            .with_body(body))
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Host component of an absolute `url`, lowercased.
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Map the response to a terminal outcome: 2xx succeeds, anything else
    /// fails with `RequestError::HttpStatus`. Both sides carry the payload.
    pub fn into_outcome(self) -> Outcome {
        if self.is_success() {
            return Ok(Payload::from_response(self));
        }
        let error = RequestError::HttpStatus {
            status: self.status,
            body: self.body.clone(),
        };
        Err(Failure::with_payload(error, Payload::from_response(self)))
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_json_sets_content_type_and_body() {
        #[derive(Serialize)]
        struct Login<'a> {
            user: &'a str,
        }

        let req = HttpRequest::post("/login").with_json(&Login { user: "ada" }).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.header("Content-Type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["user"], "ada");
    }

    #[test]
    fn host_is_lowercased_and_requires_absolute_url() {
        assert_eq!(
            HttpRequest::get("https://API.Example.com/v1").host().as_deref(),
            Some("api.example.com")
        );
        assert_eq!(HttpRequest::get("/relative").host(), None);
    }

    #[test]
    fn success_response_parses_json_body() {
        let outcome = HttpResponse::new(200, r#"{"ok":true}"#).into_outcome();
        let payload = outcome.unwrap();
        assert_eq!(payload.body.unwrap()["ok"], true);
        assert_eq!(payload.data, br#"{"ok":true}"#.to_vec());
        assert_eq!(payload.response.unwrap().status, 200);
    }

    #[test]
    fn non_json_success_body_keeps_raw_data_only() {
        let payload = HttpResponse::new(204, "").into_outcome().unwrap();
        assert!(payload.body.is_none());
        assert!(payload.data.is_empty());
    }

    #[test]
    fn error_status_maps_to_http_status_error() {
        let failure = HttpResponse::new(503, "busy").into_outcome().unwrap_err();
        assert_eq!(
            failure.error,
            RequestError::HttpStatus {
                status: 503,
                body: "busy".to_string()
            }
        );
        assert_eq!(failure.payload.response.unwrap().status, 503);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut resp = HttpResponse::new(401, "");
        resp.headers.push(("WWW-Authenticate".to_string(), "Basic".to_string()));
        assert_eq!(resp.header("www-authenticate"), Some("Basic"));
    }
}
