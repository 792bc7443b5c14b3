//! Zero-initialized object allocation and checked downcasts.
//!
//! `rt_alloc_obj` is the single point where new managed storage enters the
//! system: it consults the collector's threshold first, zeroes the storage so
//! a partially initialized object is never observed by a later safepoint,
//! writes the header, and registers the object for sweep. Callers are bound by
//! the safepoint discipline: any live reference they hold must already be
//! spilled into root slots, because a collection may run inside this call.

#![allow(unsafe_op_in_unsafe_fn)]

use std::alloc::{Layout, alloc_zeroed};
use std::os::raw::c_void;

use super::gc::{rt_gc_collect, rt_gc_maybe_collect, rt_gc_track_allocation};
use super::object::{HEADER_BYTES, RtObjHeader, RtType, type_name_of};
use super::panic::{abort_with_message, rt_panic_oom};
use super::roots::RtThreadState;
use super::rt_thread_state;

/// Header plus payload, with overflow routed to the OOM panic.
fn checked_total_size(payload_bytes: u64) -> u64 {
    match HEADER_BYTES.checked_add(payload_bytes) {
        Some(total) => total,
        None => rt_panic_oom(),
    }
}

/// Ask the host allocator for `total_bytes` of zeroed storage; on the first
/// failure force a collection and retry exactly once.
unsafe fn try_alloc_zeroed(ts: *mut RtThreadState, total_bytes: u64, align: usize) -> *mut u8 {
    let layout = match Layout::from_size_align(total_bytes as usize, align) {
        Ok(layout) => layout,
        Err(_) => rt_panic_oom(),
    };

    let first = alloc_zeroed(layout);
    if !first.is_null() {
        return first;
    }

    rt_gc_collect(ts);
    alloc_zeroed(layout)
}

/// Allocate a zero-initialized object of `HEADER_BYTES + payload_bytes`,
/// register it with the collector, and return its base.
///
/// # Safety
/// `ts` must be null or the pointer returned by `rt_thread_state`; `ty` must
/// point at a descriptor that outlives the object.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_alloc_obj(
    ts: *mut RtThreadState,
    ty: *const RtType,
    payload_bytes: u64,
) -> *mut c_void {
    let ts = if ts.is_null() { rt_thread_state() } else { ts };

    if ty.is_null() {
        abort_with_message("rt_alloc_obj called with NULL type metadata");
    }

    let total = checked_total_size(payload_bytes);
    rt_gc_maybe_collect(ts, total);

    let align = ((*ty).align_bytes as usize).max(8);
    let storage = try_alloc_zeroed(ts, total, align);
    if storage.is_null() {
        rt_panic_oom();
    }

    let obj = storage as *mut RtObjHeader;
    (*obj).ty = ty;
    (*obj).size_bytes = total;
    (*obj).gc_flags = 0;
    (*obj).reserved0 = 0;
    rt_gc_track_allocation(obj);
    obj as *mut c_void
}

/// Downcast check: null flows through, an exact descriptor match returns the
/// object unchanged, anything else panics with both type names.
///
/// # Safety
/// `obj` must be null or a tracked-object base; `expected_type` must be a
/// valid descriptor pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_checked_cast(
    obj: *mut c_void,
    expected_type: *const RtType,
) -> *mut c_void {
    if obj.is_null() {
        return std::ptr::null_mut();
    }
    if expected_type.is_null() {
        abort_with_message("rt_checked_cast called with NULL expected_type");
    }

    let header = obj as *const RtObjHeader;
    if std::ptr::eq((*header).ty, expected_type) {
        return obj;
    }

    let from = type_name_of(header);
    let to = (*expected_type).name();
    abort_with_message(&format!("bad cast ({} -> {})", from, to))
}
