//! Terminal runtime panics and the diagnostic trace-frame stack.
//!
//! Every in-language failure (null dereference, bad cast, out-of-bounds
//! access, OOM, root-discipline violation) routes through this family. A panic
//! prints `panic: <message>` to stderr, an optional `location:` line for the
//! innermost trace frame, a `stacktrace:` block in reverse-chronological
//! order, and then aborts the process. Nothing unwinds and nothing recovers.

#![allow(unsafe_op_in_unsafe_fn)]

use std::ffi::{CStr, c_char};

use super::thread_state_mut;

/// Diagnostic stack frame, maintained by generated code when debug info is on.
///
/// Frames live on the native stack of the traced activation; the runtime only
/// ever walks the chain, it never owns the memory.
#[repr(C)]
pub struct RtTraceFrame {
    /// Previous frame, forming a singly-linked stack.
    pub prev: *const RtTraceFrame,
    /// NUL-terminated function name, may be null.
    pub function_name: *const c_char,
    /// NUL-terminated source path, may be null.
    pub file_path: *const c_char,
    pub line: u32,
    pub column: u32,
}

fn cstr_or_unknown(ptr: *const c_char) -> &'static str {
    if ptr.is_null() {
        return "<unknown>";
    }
    unsafe { CStr::from_ptr(ptr).to_str().unwrap_or("<unknown>") }
}

fn print_stacktrace(top: *const RtTraceFrame) {
    if top.is_null() {
        return;
    }

    eprintln!("stacktrace:");
    let mut frame = top;
    while !frame.is_null() {
        let current = unsafe { &*frame };
        eprintln!(
            "  at {} ({}:{}:{})",
            cstr_or_unknown(current.function_name),
            cstr_or_unknown(current.file_path),
            current.line,
            current.column
        );
        frame = current.prev;
    }
}

/// Print the diagnostic and abort. The single exit point for every panic kind.
pub(crate) fn abort_with_message(message: &str) -> ! {
    let ts = thread_state_mut();

    eprintln!("panic: {}", message);
    if !ts.trace_top.is_null() {
        let top = unsafe { &*ts.trace_top };
        eprintln!(
            "location: {}:{}:{}",
            cstr_or_unknown(top.file_path),
            top.line,
            top.column
        );
    }
    print_stacktrace(ts.trace_top);
    std::process::abort();
}

/// Panic with `message` unless `condition` holds.
pub(crate) fn require(condition: bool, message: &str) {
    if !condition {
        abort_with_message(message);
    }
}

/// Abort with an explicit message.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_panic(message: *const c_char) -> ! {
    if message.is_null() {
        abort_with_message("unknown");
    }
    let text = CStr::from_ptr(message).to_string_lossy();
    abort_with_message(&text)
}

/// Abort for a field or method access through the null reference.
#[unsafe(no_mangle)]
pub extern "C" fn rt_panic_null_deref() -> ! {
    abort_with_message("null dereference")
}

/// Abort for a failed downcast, naming both sides.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_panic_bad_cast(from_type: *const c_char, to_type: *const c_char) -> ! {
    let message = format!(
        "bad cast ({} -> {})",
        cstr_or_unknown(from_type),
        cstr_or_unknown(to_type)
    );
    abort_with_message(&message)
}

/// Abort after the host allocator failed even with a forced collection.
#[unsafe(no_mangle)]
pub extern "C" fn rt_panic_oom() -> ! {
    abort_with_message("out of memory")
}

/// Link a diagnostic frame onto the thread's trace stack.
///
/// # Safety
/// `frame` must point at a frame that outlives its time on the stack.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_trace_push_frame(frame: *mut RtTraceFrame) {
    require(!frame.is_null(), "rt_trace_push_frame: frame is NULL");
    let ts = thread_state_mut();
    (*frame).prev = ts.trace_top;
    ts.trace_top = frame;
}

/// Unlink the innermost diagnostic frame. Underflow is fatal.
#[unsafe(no_mangle)]
pub extern "C" fn rt_trace_pop_frame() {
    let ts = thread_state_mut();
    require(
        !ts.trace_top.is_null(),
        "rt_trace_pop_frame: trace stack underflow",
    );
    ts.trace_top = unsafe { (*ts.trace_top).prev as *mut RtTraceFrame };
}
