//! C-ABI wrapper around `reqchain-core`.
//!
//! # Overview
//! Lets any language with a C FFI build request chains, configure per-host
//! headers and credentials, and act as the transport: the host pulls tasks
//! with `reqchain_next_task`, performs the HTTP round-trip itself and
//! reports back with `reqchain_complete_task` / `reqchain_fail_task`.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Completions run synchronously inside `reqchain_complete_task`, so
//!   chain callbacks and follow-up tasks are observable as soon as it
//!   returns.
//! - The C caller owns all returned pointers and must call the matching
//!   `reqchain_free_*` function to release them.

pub mod types;

use std::ffi::CString;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use reqchain_core::trust::{AuthChallenge, ServerTrust};
use reqchain_core::{
    ChainedRequest, ChallengeDisposition, Credential, HostQueue, HttpRequest, Manager,
    ManagerConfig, Request, RequestError, SingleRequest, TaskId,
};

use types::*;

// ---------------------------------------------------------------------------
// Manager lifecycle
// ---------------------------------------------------------------------------

/// Create a manager driven by a host queue.
///
/// `config_json` may be null for the default configuration. Returns null if
/// the configuration does not parse or its base URL is invalid.
/// Free with `reqchain_manager_free`.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_manager_new(config_json: *const c_char) -> *mut FfiManager {
    catch_unwind(|| {
        let config = if config_json.is_null() {
            ManagerConfig::default()
        } else {
            let Some(raw) = (unsafe { read_str(config_json) }) else {
                return std::ptr::null_mut();
            };
            match ManagerConfig::from_json(raw) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(error = %err, "rejected manager configuration");
                    return std::ptr::null_mut();
                }
            }
        };
        let queue = HostQueue::new();
        match Manager::new(config, Arc::new(queue.clone())) {
            Ok(manager) => Box::into_raw(Box::new(FfiManager { manager, queue })),
            Err(err) => {
                tracing::warn!(error = %err, "rejected manager configuration");
                std::ptr::null_mut()
            }
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Shut the manager down and free it. In-flight requests are cancelled.
/// Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_manager_free(manager: *mut FfiManager) {
    if !manager.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let manager = unsafe { Box::from_raw(manager) };
            manager.manager.shutdown();
        }));
    }
}

/// Cancel everything and refuse further executions. Returns how many
/// requests were cancelled.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_manager_shutdown(manager: *const FfiManager) -> u32 {
    catch_unwind(AssertUnwindSafe(|| {
        if manager.is_null() {
            return 0;
        }
        let manager = unsafe { &*manager };
        manager.manager.shutdown() as u32
    }))
    .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Host policy
// ---------------------------------------------------------------------------

/// Set a default header. `value` null removes it; `host` null targets all
/// hosts.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_set_header(
    manager: *const FfiManager,
    name: *const c_char,
    value: *const c_char,
    host: *const c_char,
) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        if manager.is_null() || name.is_null() {
            return FfiErrorCode::NullArg;
        }
        let manager = unsafe { &*manager };
        let Some(name) = (unsafe { read_str(name) }) else {
            return FfiErrorCode::InvalidArg;
        };
        let value = unsafe { read_str(value) };
        let host = unsafe { read_str(host) };
        manager.manager.policies().set_header(name, value, host);
        FfiErrorCode::Ok
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Store Basic credentials for `host`, or for all hosts when `host` is null.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_set_basic_credentials(
    manager: *const FfiManager,
    user: *const c_char,
    password: *const c_char,
    host: *const c_char,
) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        if manager.is_null() || user.is_null() || password.is_null() {
            return FfiErrorCode::NullArg;
        }
        let manager = unsafe { &*manager };
        let (Some(user), Some(password)) = (unsafe { read_str(user) }, unsafe { read_str(password) })
        else {
            return FfiErrorCode::InvalidArg;
        };
        let host = unsafe { read_str(host) };
        manager
            .manager
            .policies()
            .set_credentials(Some(Credential::password(user, password)), host);
        FfiErrorCode::Ok
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Remove the credentials stored for `host` (or the global ones).
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_clear_credentials(
    manager: *const FfiManager,
    host: *const c_char,
) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        if manager.is_null() {
            return FfiErrorCode::NullArg;
        }
        let manager = unsafe { &*manager };
        let host = unsafe { read_str(host) };
        manager.manager.policies().set_credentials(None, host);
        FfiErrorCode::Ok
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

// ---------------------------------------------------------------------------
// Chains
// ---------------------------------------------------------------------------

/// Create an empty chain. `group` may be null. Free with
/// `reqchain_chain_free`.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_chain_new(
    manager: *const FfiManager,
    group: *const c_char,
    ignore_errors: bool,
) -> *mut FfiChain {
    catch_unwind(AssertUnwindSafe(|| {
        if manager.is_null() {
            return std::ptr::null_mut();
        }
        let manager = unsafe { &*manager };
        let report = Arc::new(Mutex::new(ChainReport::default()));

        let on_error = report.clone();
        let mut builder = ChainedRequest::builder()
            .ignore_errors(ignore_errors)
            .on_error(move |failure, _| {
                let mut report = on_error.lock();
                report.error = Some(failure.error.clone());
                match &failure.payload.response {
                    Some(response) => {
                        report.http_status = response.status;
                        report.body = response.body.clone();
                    }
                    None => {
                        report.http_status = 0;
                        report.body.clear();
                    }
                }
            });
        if let Some(group) = unsafe { read_str(group) } {
            builder = builder.group(group);
        }

        let chain = builder.build(&manager.manager);
        Box::into_raw(Box::new(FfiChain {
            manager: manager.manager.clone(),
            chain,
            report,
        }))
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Append a request to the chain. `body` and `trust` may be null.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_chain_add(
    chain: *const FfiChain,
    method: FfiHttpMethod,
    url: *const c_char,
    body: *const c_char,
    trust: *const FfiTrustPolicy,
) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        if chain.is_null() || url.is_null() {
            return FfiErrorCode::NullArg;
        }
        let chain = unsafe { &*chain };
        let Some(url) = (unsafe { read_str(url) }) else {
            return FfiErrorCode::InvalidArg;
        };
        let mut request = HttpRequest::new(method.into(), url);
        if let Some(body) = unsafe { read_str(body) } {
            request = request.with_body(body);
        }

        let report = chain.report.clone();
        let mut builder = SingleRequest::builder(request).on_success(move |payload, _| {
            let mut report = report.lock();
            if let Some(response) = &payload.response {
                report.http_status = response.status;
                report.body = response.body.clone();
            }
        });
        if !trust.is_null() {
            builder = builder.trust_policy(unsafe { (*trust).to_core() });
        }

        chain.chain.add(builder.build(&chain.manager));
        FfiErrorCode::Ok
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Start the chain. Returns false if it already started, was cancelled, or
/// the manager was shut down.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_chain_execute(chain: *const FfiChain) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        if chain.is_null() {
            return false;
        }
        let chain = unsafe { &*chain };
        chain.chain.execute()
    }))
    .unwrap_or(false)
}

/// Cancel the chain and every child. No chain callbacks fire afterwards.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_chain_cancel(chain: *const FfiChain) {
    if !chain.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let chain = unsafe { &*chain };
            chain.chain.cancel();
        }));
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn reqchain_chain_state(chain: *const FfiChain) -> FfiRequestState {
    catch_unwind(AssertUnwindSafe(|| {
        if chain.is_null() {
            return FfiRequestState::Cancelled;
        }
        let chain = unsafe { &*chain };
        chain.chain.state().into()
    }))
    .unwrap_or(FfiRequestState::Cancelled)
}

/// Snapshot the chain's outcome. Returns null if `chain` is null.
/// Free with `reqchain_free_result`.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_chain_result(chain: *const FfiChain) -> *mut FfiChainResult {
    catch_unwind(AssertUnwindSafe(|| {
        if chain.is_null() {
            return std::ptr::null_mut();
        }
        let chain = unsafe { &*chain };
        let state = chain.chain.state();
        FfiChainResult::from_report(state, &chain.report.lock())
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Free a chain handle. A chain that is still executing keeps running;
/// cancel it first to stop it. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_chain_free(chain: *mut FfiChain) {
    if !chain.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(chain) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Host I/O
// ---------------------------------------------------------------------------

/// Pull the next task to execute, or null when none is queued.
/// Free with `reqchain_free_task`.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_next_task(manager: *const FfiManager) -> *mut FfiHttpTask {
    catch_unwind(AssertUnwindSafe(|| {
        if manager.is_null() {
            return std::ptr::null_mut();
        }
        let manager = unsafe { &*manager };
        match manager.queue.next_task() {
            Some((id, task)) => FfiHttpTask::from_core(id, &task),
            None => std::ptr::null_mut(),
        }
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Whether the engine cancelled the task; the host should abort it.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_task_is_cancelled(manager: *const FfiManager, task_id: u64) -> bool {
    catch_unwind(AssertUnwindSafe(|| {
        if manager.is_null() {
            return true;
        }
        let manager = unsafe { &*manager };
        manager.queue.is_cancelled(TaskId(task_id))
    }))
    .unwrap_or(true)
}

/// Report the response received for a task. Returns `UnknownTask` when the
/// task was cancelled or already reported.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_complete_task(
    manager: *const FfiManager,
    task_id: u64,
    response: *const FfiHttpResponse,
) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        if manager.is_null() || response.is_null() {
            return FfiErrorCode::NullArg;
        }
        let manager = unsafe { &*manager };
        let response = unsafe { (*response).to_core() };
        if manager.queue.respond(TaskId(task_id), response) {
            FfiErrorCode::Ok
        } else {
            FfiErrorCode::UnknownTask
        }
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Report that a task failed without a response.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_fail_task(
    manager: *const FfiManager,
    task_id: u64,
    message: *const c_char,
) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        if manager.is_null() {
            return FfiErrorCode::NullArg;
        }
        let manager = unsafe { &*manager };
        let message = unsafe { read_str(message) }.unwrap_or("transport error");
        let error = RequestError::Connection(message.to_string());
        if manager.queue.fail(TaskId(task_id), error) {
            FfiErrorCode::Ok
        } else {
            FfiErrorCode::UnknownTask
        }
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Decide a TLS server-trust challenge for a task. `certificates` is the
/// presented chain, leaf first. On `Reject` the task has already failed and
/// must not be reported again.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_evaluate_server_trust(
    manager: *const FfiManager,
    task_id: u64,
    host: *const c_char,
    certificates: *const FfiBytes,
    certificates_len: u32,
) -> FfiDisposition {
    catch_unwind(AssertUnwindSafe(|| {
        if manager.is_null() {
            return FfiDisposition::PerformDefaultHandling;
        }
        let manager = unsafe { &*manager };
        let trust = ServerTrust {
            host: unsafe { read_str(host) }.unwrap_or("").to_ascii_lowercase(),
            certificate_chain: unsafe { read_byte_buffers(certificates, certificates_len) },
        };
        let disposition = manager
            .queue
            .evaluate(TaskId(task_id), &AuthChallenge::server_trust(&trust));
        FfiDisposition::from(&disposition)
    }))
    .unwrap_or(FfiDisposition::Reject)
}

/// Decide an HTTP Basic challenge for a task. `headers` are the headers the
/// challenged attempt was sent with. On `UseCredential`, `*authorization`
/// receives the `Authorization` header value to retry with (free with
/// `reqchain_free_string`); otherwise it is set to null.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_evaluate_basic_auth(
    manager: *const FfiManager,
    task_id: u64,
    headers: *const FfiHeader,
    headers_len: u32,
    authorization: *mut *mut c_char,
) -> FfiDisposition {
    catch_unwind(AssertUnwindSafe(|| {
        if !authorization.is_null() {
            unsafe { *authorization = std::ptr::null_mut() };
        }
        if manager.is_null() {
            return FfiDisposition::PerformDefaultHandling;
        }
        let manager = unsafe { &*manager };
        let outgoing = unsafe { read_headers(headers, headers_len) };
        let disposition = manager
            .queue
            .evaluate(TaskId(task_id), &AuthChallenge::http_basic(&outgoing));

        if let ChallengeDisposition::UseCredential(credential) = &disposition {
            match credential.basic_authorization() {
                Some(value) if !authorization.is_null() => {
                    unsafe { *authorization = to_c_string(value) };
                }
                _ => return FfiDisposition::PerformDefaultHandling,
            }
        }
        FfiDisposition::from(&disposition)
    }))
    .unwrap_or(FfiDisposition::PerformDefaultHandling)
}

// ---------------------------------------------------------------------------
// Bulk operations
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn reqchain_cancel_all(manager: *const FfiManager) -> u32 {
    catch_unwind(AssertUnwindSafe(|| {
        if manager.is_null() {
            return 0;
        }
        let manager = unsafe { &*manager };
        manager.manager.cancel_all_requests() as u32
    }))
    .unwrap_or(0)
}

#[unsafe(no_mangle)]
pub extern "C" fn reqchain_cancel_group(manager: *const FfiManager, group: *const c_char) -> u32 {
    catch_unwind(AssertUnwindSafe(|| {
        if manager.is_null() {
            return 0;
        }
        let manager = unsafe { &*manager };
        match unsafe { read_str(group) } {
            Some(group) => manager.manager.cancel_requests_in_group(group) as u32,
            None => 0,
        }
    }))
    .unwrap_or(0)
}

/// Number of requests currently executing at the top level.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_active_requests(manager: *const FfiManager) -> u32 {
    catch_unwind(AssertUnwindSafe(|| {
        if manager.is_null() {
            return 0;
        }
        let manager = unsafe { &*manager };
        manager.manager.active_requests() as u32
    }))
    .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free a task returned by `reqchain_next_task`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_free_task(task: *mut FfiHttpTask) {
    if task.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let task = unsafe { Box::from_raw(task) };
        for s in [task.tag, task.url, task.body] {
            if !s.is_null() {
                drop(unsafe { CString::from_raw(s) });
            }
        }
        if !task.headers.is_null() && task.headers_len > 0 {
            let headers = unsafe {
                Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                    task.headers,
                    task.headers_len as usize,
                ))
            };
            for h in headers.iter() {
                if !h.name.is_null() {
                    drop(unsafe { CString::from_raw(h.name) });
                }
                if !h.value.is_null() {
                    drop(unsafe { CString::from_raw(h.value) });
                }
            }
        }
    });
}

/// Free a result returned by `reqchain_chain_result`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_free_result(result: *mut FfiChainResult) {
    if result.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let result = unsafe { Box::from_raw(result) };
        if !result.error_message.is_null() {
            drop(unsafe { CString::from_raw(result.error_message) });
        }
        if !result.body.is_null() {
            drop(unsafe { CString::from_raw(result.body) });
        }
    });
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn reqchain_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
