//! The Niflheim managed runtime.
//!
//! Everything generated code links against lives here: the allocation and
//! collection entry points, the shadow-stack root protocol, the panic family,
//! and the built-in heap types. All public entry points use the C ABI and are
//! exported under their `rt_` names; the matching header is generated into
//! `include/niflheim_rt.h` at build time.
//!
//! The runtime is single-threaded: one static thread state, one collector
//! context, no locks. The collector only ever runs inline at a safepoint on
//! the mutator thread.

pub mod alloc;
pub mod array;
pub mod boxes;
pub mod gc;
pub mod io;
pub mod object;
pub mod panic;
pub mod roots;
pub mod str;
pub mod strbuf;
pub mod vec;

use std::cell::UnsafeCell;

use roots::RtThreadState;

pub use gc::{RtGcStats, set_gc_config};
pub use object::{RtObjHeader, RtType};

/// Interior-mutable cell for the runtime's process-wide state.
///
/// The runtime is specified as single-threaded; the `Sync` impl exists only
/// so the cells can live in statics.
pub(crate) struct RtCell<T>(UnsafeCell<T>);

unsafe impl<T> Sync for RtCell<T> {}

impl<T> RtCell<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    pub(crate) fn get(&self) -> *mut T {
        self.0.get()
    }
}

static THREAD_STATE: RtCell<RtThreadState> = RtCell::new(RtThreadState::new());

/// Borrow the static thread state. Runtime-internal shorthand for
/// dereferencing `rt_thread_state()`.
pub(crate) fn thread_state_mut() -> &'static mut RtThreadState {
    unsafe { &mut *THREAD_STATE.get() }
}

/// Initialize the runtime for this process. Generated programs call this
/// before `main`'s body runs; calling it again resets the shadow stack.
#[unsafe(no_mangle)]
pub extern "C" fn rt_init() {
    let ts = thread_state_mut();
    ts.roots_top = std::ptr::null_mut();
    ts.trace_top = std::ptr::null_mut();
}

/// Tear the runtime down: frees every tracked object and drops all global
/// root registrations.
#[unsafe(no_mangle)]
pub extern "C" fn rt_shutdown() {
    gc::rt_gc_reset_state();
}

/// The process-wide thread state handle passed to the root and GC entry
/// points.
#[unsafe(no_mangle)]
pub extern "C" fn rt_thread_state() -> *mut RtThreadState {
    THREAD_STATE.get()
}
