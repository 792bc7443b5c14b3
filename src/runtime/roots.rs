//! Shadow-stack root frames and the thread state that anchors them.
//!
//! Generated code maintains one [`RtRootFrame`] per activation that holds
//! reference locals or temporaries: the prologue initializes and pushes it,
//! every exit path pops it exactly once, and every live reference is spilled
//! into one of its slots before each safepoint. The collector walks the frame
//! chain (plus the global-root registry in `gc`) to obtain exact roots.

#![allow(unsafe_op_in_unsafe_fn)]

use std::os::raw::c_void;
use std::ptr;

use super::panic::{RtTraceFrame, require};
use super::thread_state_mut;

/// One shadow-stack frame: a caller-supplied slot array plus chain link.
#[repr(C)]
pub struct RtRootFrame {
    /// Previous frame on the shadow stack.
    pub prev: *mut RtRootFrame,
    /// Number of reference slots, possibly zero.
    pub slot_count: u32,
    pub reserved: u32,
    /// Caller-supplied array of `slot_count` reference slots.
    pub slots: *mut *mut c_void,
}

/// Per-thread runtime state. Single-threaded in v0.1: one static instance,
/// handed out by `rt_thread_state`.
#[repr(C)]
pub struct RtThreadState {
    /// Top of the shadow stack of root frames.
    pub roots_top: *mut RtRootFrame,
    /// Top of the diagnostic trace-frame stack, may stay null.
    pub trace_top: *mut RtTraceFrame,
}

impl RtThreadState {
    pub const fn new() -> Self {
        Self {
            roots_top: ptr::null_mut(),
            trace_top: ptr::null_mut(),
        }
    }
}

/// Attach a slot array to a frame descriptor and zero every slot.
///
/// # Safety
/// `frame` must be valid for writes; `slots` must point at `slot_count`
/// writable slots (or be anything when `slot_count` is zero).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_root_frame_init(
    frame: *mut RtRootFrame,
    slots: *mut *mut c_void,
    slot_count: u32,
) {
    require(!frame.is_null(), "rt_root_frame_init: frame is NULL");
    require(
        slot_count == 0 || !slots.is_null(),
        "rt_root_frame_init: slots is NULL with non-zero slot_count",
    );

    (*frame).prev = ptr::null_mut();
    (*frame).slot_count = slot_count;
    (*frame).reserved = 0;
    (*frame).slots = slots;

    for i in 0..slot_count {
        *slots.add(i as usize) = ptr::null_mut();
    }
}

/// Store a reference (or null) into a frame slot. Out-of-range is fatal.
///
/// # Safety
/// `frame` must be a frame initialized by `rt_root_frame_init`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_root_slot_store(
    frame: *mut RtRootFrame,
    slot_index: u32,
    reference: *mut c_void,
) {
    require(!frame.is_null(), "rt_root_slot_store: frame is NULL");
    require(
        slot_index < (*frame).slot_count,
        "rt_root_slot_store: slot index out of bounds",
    );
    *(*frame).slots.add(slot_index as usize) = reference;
}

/// Load a reference (or null) from a frame slot. Out-of-range is fatal.
///
/// # Safety
/// `frame` must be a frame initialized by `rt_root_frame_init`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_root_slot_load(
    frame: *const RtRootFrame,
    slot_index: u32,
) -> *mut c_void {
    require(!frame.is_null(), "rt_root_slot_load: frame is NULL");
    require(
        slot_index < (*frame).slot_count,
        "rt_root_slot_load: slot index out of bounds",
    );
    *(*frame).slots.add(slot_index as usize)
}

/// Link `frame` onto the thread's shadow stack.
///
/// # Safety
/// `ts` must be the pointer returned by `rt_thread_state`; `frame` must stay
/// valid until its matching `rt_pop_roots`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_push_roots(ts: *mut RtThreadState, frame: *mut RtRootFrame) {
    require(!ts.is_null(), "rt_push_roots: thread state is NULL");
    require(!frame.is_null(), "rt_push_roots: frame is NULL");
    require(
        (*frame).slot_count == 0 || !(*frame).slots.is_null(),
        "rt_push_roots: frame slots is NULL",
    );

    (*frame).prev = (*ts).roots_top;
    (*ts).roots_top = frame;
}

/// Unlink the top frame. Underflow is fatal.
///
/// # Safety
/// `ts` must be the pointer returned by `rt_thread_state`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_pop_roots(ts: *mut RtThreadState) {
    require(!ts.is_null(), "rt_pop_roots: thread state is NULL");
    require(
        !(*ts).roots_top.is_null(),
        "rt_pop_roots: shadow stack underflow",
    );

    let top = (*ts).roots_top;
    (*ts).roots_top = (*top).prev;
    (*top).prev = ptr::null_mut();
}

/// Convenience wrapper for runtime-internal code that needs a temporary root
/// frame around its own allocations (the built-in constructors use this the
/// same way generated prologues do).
pub(crate) struct ScopedRoots<const N: usize> {
    frame: RtRootFrame,
    slots: [*mut c_void; N],
}

impl<const N: usize> ScopedRoots<N> {
    pub fn new() -> Box<Self> {
        let mut scoped = Box::new(Self {
            frame: RtRootFrame {
                prev: ptr::null_mut(),
                slot_count: 0,
                reserved: 0,
                slots: ptr::null_mut(),
            },
            slots: [ptr::null_mut(); N],
        });
        unsafe {
            let slots = scoped.slots.as_mut_ptr();
            rt_root_frame_init(&mut scoped.frame, slots, N as u32);
            rt_push_roots(thread_state_mut(), &mut scoped.frame);
        }
        scoped
    }

    pub fn set(&mut self, index: usize, reference: *mut c_void) {
        unsafe { rt_root_slot_store(&mut self.frame, index as u32, reference) }
    }
}

impl<const N: usize> Drop for ScopedRoots<N> {
    fn drop(&mut self) {
        unsafe { rt_pop_roots(thread_state_mut()) }
    }
}
