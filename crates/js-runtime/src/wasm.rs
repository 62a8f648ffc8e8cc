//! The flat exports a wasm host links against: the handler entry point,
//! plus a pre-initialization hook that compiles the guest program before
//! the instance is snapshotted.

use std::cell::{RefCell, UnsafeCell};

use oriel_abi::{AbiString, RawRequest, Response, RetArea, codec};

use crate::{
    diagnostics,
    driver::{FatalPolicy, RuntimeConfig, RuntimeHandle, SessionMode},
    error::Error,
};

thread_local! {
    static RUNTIME: RefCell<Option<RuntimeHandle>> = const { RefCell::new(None) };
}

// The host reads the return record after the call, so it must live in
// static memory. The module is single-threaded.
struct RetSlot(UnsafeCell<RetArea>);

unsafe impl Sync for RetSlot {}

static RET_AREA: RetSlot = RetSlot(UnsafeCell::new(RetArea::zeroed()));

fn runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        session_mode: SessionMode::Cached,
        fatal_policy: FatalPolicy::Exit,
        ..RuntimeConfig::default()
    }
}

fn with_runtime<R>(f: impl FnOnce(&RuntimeHandle) -> R) -> R {
    RUNTIME.with(|slot| {
        let mut slot = slot.borrow_mut();
        let handle = slot.get_or_insert_with(|| RuntimeHandle::new(runtime_config()));
        f(handle)
    })
}

#[allow(
    clippy::too_many_arguments,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap
)]
#[export_name = "handler"]
pub unsafe extern "C" fn handler(
    method: i32,
    uri_ptr: i32,
    uri_len: i32,
    headers_ptr: i32,
    headers_len: i32,
    params_tag: i32,
    params_ptr: i32,
    params_len: i32,
    body_tag: i32,
    body_ptr: i32,
    body_len: i32,
) -> i32 {
    let raw = RawRequest {
        method: method as u32,
        uri_ptr: uri_ptr as usize as *mut u8,
        uri_len: uri_len as usize,
        headers_ptr: headers_ptr as usize as *mut AbiString,
        headers_len: headers_len as usize,
        params_tag: params_tag as u32,
        params_ptr: params_ptr as usize as *mut AbiString,
        params_len: params_len as usize,
        body_tag: body_tag as u32,
        body_ptr: body_ptr as usize as *mut u8,
        body_len: body_len as usize,
    };

    let response = match unsafe { codec::lift_request(raw) } {
        Ok(request) => with_runtime(|runtime| runtime.handle(&request)),
        Err(err) => {
            diagnostics::report("decoding request", &Error::from(err));
            Response {
                status: 500,
                headers: None,
                body: None,
            }
        }
    };

    let area = codec::lower_response(&response);
    unsafe {
        *RET_AREA.0.get() = area;
    }
    RET_AREA.0.get() as usize as i32
}

/// Pre-initialization entry point. Runs module constructors, then compiles
/// the guest program so snapshotted instances answer their first request
/// without paying for initialization.
#[export_name = "oriel.initialize"]
pub extern "C" fn initialize() {
    unsafe extern "C" {
        fn __wasm_call_ctors();
    }
    unsafe { __wasm_call_ctors() };

    if let Err(err) = with_runtime(RuntimeHandle::preload) {
        diagnostics::report("initializing", &err);
        std::process::exit(1);
    }
}
