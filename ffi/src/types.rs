//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Each type mirrors a core type with C-compatible representations:
//! `*mut c_char` instead of `String`, pointer + length instead of `Vec`, and
//! enums with explicit discriminants. Conversions live here to keep `lib.rs`
//! focused on the `extern "C"` surface.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;

use parking_lot::Mutex;
use reqchain_core::chain::ChainedRequest;
use reqchain_core::transport::{TaskId, TransportTask};
use reqchain_core::trust::{ChallengeDisposition, TrustPolicy};
use reqchain_core::{HostQueue, HttpMethod, HttpResponse, Manager, RequestError, RequestState};

/// Opaque handle to a manager and the host queue feeding it.
pub struct FfiManager {
    pub(crate) manager: Manager,
    pub(crate) queue: HostQueue,
}

/// Opaque handle to a chained request and the report its callbacks fill.
pub struct FfiChain {
    pub(crate) manager: Manager,
    pub(crate) chain: Arc<ChainedRequest>,
    pub(crate) report: Arc<Mutex<ChainReport>>,
}

/// What the chain's callbacks observed, read back by `reqchain_chain_result`.
#[derive(Debug, Default)]
pub(crate) struct ChainReport {
    pub(crate) error: Option<RequestError>,
    pub(crate) http_status: u16,
    pub(crate) body: String,
}

// ---------------------------------------------------------------------------
// String helpers
// ---------------------------------------------------------------------------

/// Copy `s` into a C string owned by the caller. Interior NULs are dropped.
pub(crate) fn to_c_string(s: impl Into<Vec<u8>>) -> *mut c_char {
    let c_string = CString::new(s).unwrap_or_else(|err| {
        let mut bytes = err.into_vec();
        bytes.retain(|b| *b != 0);
        CString::new(bytes).unwrap_or_default()
    });
    c_string.into_raw()
}

/// Borrow a C string. `None` for null pointers and invalid UTF-8.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// HTTP method as a C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiHttpMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Patch = 3,
    Delete = 4,
    Head = 5,
}

impl From<HttpMethod> for FfiHttpMethod {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => FfiHttpMethod::Get,
            HttpMethod::Post => FfiHttpMethod::Post,
            HttpMethod::Put => FfiHttpMethod::Put,
            HttpMethod::Patch => FfiHttpMethod::Patch,
            HttpMethod::Delete => FfiHttpMethod::Delete,
            HttpMethod::Head => FfiHttpMethod::Head,
        }
    }
}

impl From<FfiHttpMethod> for HttpMethod {
    fn from(m: FfiHttpMethod) -> Self {
        match m {
            FfiHttpMethod::Get => HttpMethod::Get,
            FfiHttpMethod::Post => HttpMethod::Post,
            FfiHttpMethod::Put => HttpMethod::Put,
            FfiHttpMethod::Patch => HttpMethod::Patch,
            FfiHttpMethod::Delete => HttpMethod::Delete,
            FfiHttpMethod::Head => HttpMethod::Head,
        }
    }
}

/// A single HTTP header as a pair of C strings.
#[repr(C)]
pub struct FfiHeader {
    pub name: *mut c_char,
    pub value: *mut c_char,
}

/// Read a caller-provided header array. Entries with null or non-UTF-8
/// strings are skipped.
///
/// # Safety
/// `headers` must be null or point to `len` valid `FfiHeader`s.
pub(crate) unsafe fn read_headers(headers: *const FfiHeader, len: u32) -> Vec<(String, String)> {
    if headers.is_null() || len == 0 {
        return Vec::new();
    }
    let headers = unsafe { std::slice::from_raw_parts(headers, len as usize) };
    headers
        .iter()
        .filter_map(|h| {
            let name = unsafe { read_str(h.name) }?;
            let value = unsafe { read_str(h.value) }?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Borrowed byte buffer, e.g. one DER certificate.
#[repr(C)]
pub struct FfiBytes {
    pub data: *const u8,
    pub len: usize,
}

/// Copy a caller-provided array of buffers.
///
/// # Safety
/// `items` must be null or point to `len` `FfiBytes` whose buffers are valid.
pub(crate) unsafe fn read_byte_buffers(items: *const FfiBytes, len: u32) -> Vec<Vec<u8>> {
    if items.is_null() || len == 0 {
        return Vec::new();
    }
    let items = unsafe { std::slice::from_raw_parts(items, len as usize) };
    items
        .iter()
        .map(|b| {
            if b.data.is_null() || b.len == 0 {
                Vec::new()
            } else {
                unsafe { std::slice::from_raw_parts(b.data, b.len) }.to_vec()
            }
        })
        .collect()
}

/// Per-request TLS pinning configuration.
#[repr(C)]
pub struct FfiTrustPolicy {
    pub trusts_all_certificates: bool,
    pub trusted_certificates: *const FfiBytes,
    pub trusted_certificates_len: u32,
    pub public_key_pinning_required: bool,
}

impl FfiTrustPolicy {
    /// # Safety
    /// `trusted_certificates` must satisfy `read_byte_buffers`.
    pub(crate) unsafe fn to_core(&self) -> TrustPolicy {
        TrustPolicy {
            trusts_all_certificates: self.trusts_all_certificates,
            trusted_certificates: unsafe {
                read_byte_buffers(self.trusted_certificates, self.trusted_certificates_len)
            },
            public_key_pinning_required: self.public_key_pinning_required,
        }
    }
}

/// A transport task handed to the host for execution.
///
/// Returned by `reqchain_next_task`; the host performs the round-trip and
/// reports it with `reqchain_complete_task` or `reqchain_fail_task`, using
/// `id`. Free with `reqchain_free_task`.
#[repr(C)]
pub struct FfiHttpTask {
    pub id: u64,
    pub tag: *mut c_char,
    pub method: FfiHttpMethod,
    pub url: *mut c_char,
    pub headers: *mut FfiHeader,
    pub headers_len: u32,
    pub body: *mut c_char,
}

impl FfiHttpTask {
    pub(crate) fn from_core(id: TaskId, task: &TransportTask) -> *mut Self {
        let request = &task.request;
        let body = match &request.body {
            Some(b) => to_c_string(b.as_str()),
            None => std::ptr::null_mut(),
        };

        let headers_len = request.headers.len() as u32;
        let headers = if request.headers.is_empty() {
            std::ptr::null_mut()
        } else {
            let ffi_headers: Box<[FfiHeader]> = request
                .headers
                .iter()
                .map(|(name, value)| FfiHeader {
                    name: to_c_string(name.as_str()),
                    value: to_c_string(value.as_str()),
                })
                .collect();
            Box::into_raw(ffi_headers) as *mut FfiHeader
        };

        Box::into_raw(Box::new(FfiHttpTask {
            id: id.0,
            tag: to_c_string(task.tag.to_string()),
            method: request.method.into(),
            url: to_c_string(request.url.as_str()),
            headers,
            headers_len,
            body,
        }))
    }
}

// ---------------------------------------------------------------------------
// Response input (caller-provided, not heap-allocated by us)
// ---------------------------------------------------------------------------

/// An HTTP response described as C-compatible plain data.
///
/// The host builds this after executing a task and passes a pointer to
/// `reqchain_complete_task`. The FFI layer reads but does not free it.
#[repr(C)]
pub struct FfiHttpResponse {
    pub status: u16,
    pub headers: *const FfiHeader,
    pub headers_len: u32,
    pub body: *const c_char,
}

impl FfiHttpResponse {
    /// # Safety
    /// Pointers must satisfy `read_headers` and `read_str`.
    pub(crate) unsafe fn to_core(&self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            headers: unsafe { read_headers(self.headers, self.headers_len) },
            body: unsafe { read_str(self.body) }.unwrap_or("").to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Status codes returned by the FFI surface.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    Connection = 1,
    HttpStatus = 2,
    TrustRejected = 3,
    InvalidUrl = 4,
    Serialization = 5,
    Cancelled = 6,
    NotExecutable = 7,
    NullArg = 8,
    InvalidArg = 9,
    UnknownTask = 10,
    Panic = 11,
}

impl From<&RequestError> for FfiErrorCode {
    fn from(err: &RequestError) -> Self {
        match err {
            RequestError::Connection(_) => FfiErrorCode::Connection,
            RequestError::HttpStatus { .. } => FfiErrorCode::HttpStatus,
            RequestError::TrustRejected { .. } => FfiErrorCode::TrustRejected,
            RequestError::InvalidUrl { .. } => FfiErrorCode::InvalidUrl,
            RequestError::Serialization(_) => FfiErrorCode::Serialization,
            RequestError::Cancelled(_) => FfiErrorCode::Cancelled,
            RequestError::NotExecutable(_) => FfiErrorCode::NotExecutable,
        }
    }
}

/// Lifecycle state of a request as a C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiRequestState {
    Pending = 0,
    Executing = 1,
    Succeeded = 2,
    Failed = 3,
    Cancelled = 4,
}

impl From<RequestState> for FfiRequestState {
    fn from(state: RequestState) -> Self {
        match state {
            RequestState::Pending => FfiRequestState::Pending,
            RequestState::Executing => FfiRequestState::Executing,
            RequestState::Succeeded => FfiRequestState::Succeeded,
            RequestState::Failed => FfiRequestState::Failed,
            RequestState::Cancelled => FfiRequestState::Cancelled,
        }
    }
}

/// Answer to a TLS or HTTP authentication challenge.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiDisposition {
    UseCredential = 0,
    PerformDefaultHandling = 1,
    Reject = 2,
}

impl From<&ChallengeDisposition> for FfiDisposition {
    fn from(disposition: &ChallengeDisposition) -> Self {
        match disposition {
            ChallengeDisposition::UseCredential(_) => FfiDisposition::UseCredential,
            ChallengeDisposition::PerformDefaultHandling => FfiDisposition::PerformDefaultHandling,
            ChallengeDisposition::Reject => FfiDisposition::Reject,
        }
    }
}

/// Snapshot of a chain's outcome.
///
/// `error_code` is `Ok` unless the chain failed. `http_status` and `body`
/// come from the failing child's response, or from the last successful
/// child when the chain succeeded; both are empty when no response exists.
#[repr(C)]
pub struct FfiChainResult {
    pub state: FfiRequestState,
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub http_status: u16,
    pub body: *mut c_char,
}

impl FfiChainResult {
    pub(crate) fn from_report(state: RequestState, report: &ChainReport) -> *mut Self {
        let (error_code, error_message) = match &report.error {
            Some(err) => (FfiErrorCode::from(err), to_c_string(err.to_string())),
            None => (FfiErrorCode::Ok, std::ptr::null_mut()),
        };
        let body = if report.body.is_empty() {
            std::ptr::null_mut()
        } else {
            to_c_string(report.body.as_str())
        };
        Box::into_raw(Box::new(FfiChainResult {
            state: state.into(),
            error_code,
            error_message,
            http_status: report.http_status,
            body,
        }))
    }
}
