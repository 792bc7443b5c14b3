//! Stop-the-world mark-sweep collection over the tracked-object set.
//!
//! The collector context is process-wide state: the tracked-object set, the
//! global-root registry, and the allocation accounting that drives the
//! next-collection threshold. Generated code never touches any of it directly;
//! everything goes through the `rt_gc_*` entry points, which run inline at
//! safepoints on the single mutator thread.
//!
//! Marking is worklist-driven. Descriptor trace functions receive a mark
//! callback that pushes gray objects; the drain loop below never holds a
//! borrow of the context across a callback into descriptor code.

#![allow(unsafe_op_in_unsafe_fn)]

use std::alloc::{Layout, dealloc};
use std::collections::HashSet;
use std::os::raw::c_void;

use crate::config::GcConfig;

use super::object::{RT_GC_FLAG_MARKED, RT_GC_FLAG_PINNED, RtObjHeader};
use super::panic::require;
use super::roots::RtThreadState;
use super::{RtCell, rt_thread_state};

/// Snapshot of the collector's accounting, returned by value.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtGcStats {
    pub allocated_bytes: u64,
    pub live_bytes: u64,
    pub next_gc_threshold: u64,
    pub tracked_object_count: u64,
}

/// Process-wide collector context, created on first use and reset by
/// `rt_gc_reset_state`.
pub(crate) struct GcContext {
    /// Every tracked object, in allocation order; sweep walks this.
    tracked: Vec<*mut RtObjHeader>,
    /// Address index over `tracked` for exact membership checks during mark.
    tracked_index: HashSet<usize>,
    /// Registered global-root slots; registration is idempotent.
    global_roots: Vec<*mut *mut c_void>,
    /// Gray worklist, reused across cycles.
    worklist: Vec<*mut RtObjHeader>,
    allocated_bytes: u64,
    live_bytes: u64,
    next_gc_threshold: u64,
    tracked_object_count: u64,
    collections: u64,
    config: GcConfig,
}

impl GcContext {
    fn new() -> Self {
        let config = GcConfig::default();
        Self {
            tracked: Vec::new(),
            tracked_index: HashSet::new(),
            global_roots: Vec::new(),
            worklist: Vec::new(),
            allocated_bytes: 0,
            live_bytes: 0,
            next_gc_threshold: config.min_threshold_bytes,
            tracked_object_count: 0,
            collections: 0,
            config,
        }
    }

    fn scaled_live_bytes(&self, live_bytes: u64) -> u64 {
        if self.config.growth_num != 0 && live_bytes > u64::MAX / self.config.growth_num {
            return u64::MAX;
        }
        (live_bytes * self.config.growth_num) / self.config.growth_den.max(1)
    }

    fn update_threshold_from_live(&mut self, live_bytes: u64) {
        self.next_gc_threshold = self
            .scaled_live_bytes(live_bytes)
            .max(self.config.min_threshold_bytes);
    }

    fn is_tracked(&self, candidate: *const RtObjHeader) -> bool {
        self.tracked_index.contains(&(candidate as usize))
    }

    /// Mark one slot's current value if it refers to a tracked object.
    ///
    /// Stale non-GC bit patterns in an uninitialized slot fail the membership
    /// check and are ignored.
    fn mark_ref(&mut self, reference: *mut c_void) {
        let candidate = reference as *mut RtObjHeader;
        if candidate.is_null() || !self.is_tracked(candidate) {
            return;
        }

        let header = unsafe { &mut *candidate };
        if header.gc_flags & RT_GC_FLAG_MARKED != 0 {
            return;
        }
        header.gc_flags |= RT_GC_FLAG_MARKED;
        self.worklist.push(candidate);
    }

    fn clear_all_marks(&mut self) {
        for &obj in &self.tracked {
            unsafe { (*obj).gc_flags &= !RT_GC_FLAG_MARKED };
        }
    }

    /// Free every unmarked, unpinned object and return the surviving bytes.
    fn sweep_unmarked(&mut self) -> u64 {
        let mut live_bytes: u64 = 0;
        let mut tracked = std::mem::take(&mut self.tracked);

        tracked.retain(|&obj| {
            let header = unsafe { &mut *obj };
            let marked = header.gc_flags & RT_GC_FLAG_MARKED != 0;
            let pinned = header.gc_flags & RT_GC_FLAG_PINNED != 0;
            if marked || pinned {
                header.gc_flags &= !RT_GC_FLAG_MARKED;
                live_bytes = live_bytes.saturating_add(header.size_bytes);
                return true;
            }

            self.tracked_index.remove(&(obj as usize));
            self.tracked_object_count = self.tracked_object_count.saturating_sub(1);
            unsafe { free_object(obj) };
            false
        });

        self.tracked = tracked;
        live_bytes
    }
}

/// Release an object's backing storage using the layout recorded at
/// allocation time (header size plus descriptor alignment).
unsafe fn free_object(obj: *mut RtObjHeader) {
    let size = (*obj).size_bytes as usize;
    let align = if (*obj).ty.is_null() {
        8
    } else {
        ((*(*obj).ty).align_bytes as usize).max(8)
    };
    if let Ok(layout) = Layout::from_size_align(size, align) {
        dealloc(obj as *mut u8, layout);
    }
}

static GC: RtCell<Option<GcContext>> = RtCell::new(None);

/// Borrow the process-wide collector context, creating it on first use.
///
/// The borrow must not be held across a call back into descriptor trace code;
/// the drain loop below re-borrows per step for exactly that reason.
pub(crate) fn gc_mut() -> &'static mut GcContext {
    let slot = unsafe { &mut *GC.get() };
    slot.get_or_insert_with(GcContext::new)
}

/// Replace the collector tuning. Intended to be called before `rt_init`.
pub fn set_gc_config(config: GcConfig) {
    let gc = gc_mut();
    gc.next_gc_threshold = gc.next_gc_threshold.max(config.min_threshold_bytes);
    gc.config = config;
}

/// The mark callback handed to descriptor trace functions: pushes the slot's
/// target onto the gray worklist if it is a tracked object.
///
/// # Safety
/// `slot`, if non-null, must be readable as a pointer-sized value.
pub(crate) unsafe extern "C" fn rt_gc_mark_ref_slot(slot: *mut *mut c_void) {
    if slot.is_null() {
        return;
    }
    gc_mut().mark_ref(*slot);
}

/// Pop and trace gray objects until the worklist is empty.
///
/// No context borrow is live while a descriptor trace function runs; the
/// callback re-enters through `rt_gc_mark_ref_slot`.
fn drain_worklist() {
    loop {
        let obj = match gc_mut().worklist.pop() {
            Some(obj) => obj,
            None => break,
        };

        let ty = unsafe { (*obj).ty };
        if ty.is_null() {
            continue;
        }

        if let Some(trace_fn) = unsafe { (*ty).trace_fn } {
            unsafe { trace_fn(obj as *mut c_void, rt_gc_mark_ref_slot) };
            continue;
        }

        let offsets = unsafe { (*ty).pointer_offsets };
        let count = unsafe { (*ty).pointer_offsets_count };
        if offsets.is_null() || count == 0 {
            continue;
        }
        let base = obj as *mut u8;
        for i in 0..count {
            let offset = unsafe { *offsets.add(i as usize) };
            let slot = unsafe { base.add(offset as usize) } as *mut *mut c_void;
            unsafe { rt_gc_mark_ref_slot(slot) };
        }
    }
}

fn mark_from_global_roots() {
    let root_count = gc_mut().global_roots.len();
    for i in 0..root_count {
        let slot = gc_mut().global_roots[i];
        unsafe { rt_gc_mark_ref_slot(slot) };
        drain_worklist();
    }
}

fn mark_from_shadow_stack(ts: *mut RtThreadState) {
    if ts.is_null() {
        return;
    }

    let mut frame = unsafe { (*ts).roots_top };
    while !frame.is_null() {
        let slot_count = unsafe { (*frame).slot_count };
        let slots = unsafe { (*frame).slots };
        for i in 0..slot_count {
            unsafe { rt_gc_mark_ref_slot(slots.add(i as usize)) };
            drain_worklist();
        }
        frame = unsafe { (*frame).prev };
    }
}

/// Run a full stop-the-world collection.
///
/// # Safety
/// `ts` must be null (meaning the current thread state) or the pointer
/// returned by `rt_thread_state`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_gc_collect(ts: *mut RtThreadState) {
    let ts = if ts.is_null() { rt_thread_state() } else { ts };

    gc_mut().clear_all_marks();
    mark_from_global_roots();
    mark_from_shadow_stack(ts);

    let gc = gc_mut();
    gc.live_bytes = gc.sweep_unmarked();
    gc.allocated_bytes = gc.live_bytes;
    let live = gc.live_bytes;
    gc.update_threshold_from_live(live);
    gc.collections += 1;

    if gc.config.trace_gc {
        eprintln!(
            "[GC] cycle {}: live {} bytes, tracked {}, next threshold {}",
            gc.collections, gc.live_bytes, gc.tracked_object_count, gc.next_gc_threshold
        );
    }
}

/// Pre-allocation threshold check: collect now if `upcoming_bytes` more would
/// meet or exceed the next-collection threshold.
///
/// # Safety
/// Same contract as `rt_gc_collect`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_gc_maybe_collect(ts: *mut RtThreadState, upcoming_bytes: u64) {
    let projected = {
        let gc = gc_mut();
        gc.allocated_bytes.saturating_add(upcoming_bytes)
    };
    if projected >= gc_mut().next_gc_threshold {
        rt_gc_collect(ts);
    }
}

/// Append a freshly allocated header to the tracked-object set and charge its
/// footprint to the accounting (saturating).
///
/// # Safety
/// `obj` must point at a fully written header whose `size_bytes` covers the
/// whole allocation.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_gc_track_allocation(obj: *mut RtObjHeader) {
    require(!obj.is_null(), "rt_gc_track_allocation: object is NULL");

    let gc = gc_mut();
    gc.tracked.push(obj);
    gc.tracked_index.insert(obj as usize);
    gc.allocated_bytes = gc.allocated_bytes.saturating_add((*obj).size_bytes);
    gc.tracked_object_count = gc.tracked_object_count.saturating_add(1);
}

/// Register a global slot as a root. Null is fatal; duplicates are no-ops.
///
/// # Safety
/// `slot` must remain readable until unregistered.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_gc_register_global_root(slot: *mut *mut c_void) {
    require(!slot.is_null(), "rt_gc_register_global_root: slot is NULL");

    let gc = gc_mut();
    if gc.global_roots.contains(&slot) {
        return;
    }
    gc.global_roots.push(slot);
}

/// Remove one registration for `slot`. Unregistering an unregistered slot is
/// a silent no-op; a null slot is fatal.
///
/// # Safety
/// `slot` may be any non-null pointer; absent registrations are ignored.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_gc_unregister_global_root(slot: *mut *mut c_void) {
    require(!slot.is_null(), "rt_gc_unregister_global_root: slot is NULL");

    let gc = gc_mut();
    if let Some(index) = gc.global_roots.iter().position(|&s| s == slot) {
        gc.global_roots.remove(index);
    }
}

/// Current accounting snapshot.
#[unsafe(no_mangle)]
pub extern "C" fn rt_gc_get_stats() -> RtGcStats {
    let gc = gc_mut();
    RtGcStats {
        allocated_bytes: gc.allocated_bytes,
        live_bytes: gc.live_bytes,
        next_gc_threshold: gc.next_gc_threshold,
        tracked_object_count: gc.tracked_object_count,
    }
}

/// Free every tracked object unconditionally, drop all global-root
/// registrations, and restore the accounting to its initial state. Tests call
/// this between scenarios; `rt_shutdown` calls it on teardown.
#[unsafe(no_mangle)]
pub extern "C" fn rt_gc_reset_state() {
    let gc = gc_mut();
    for &obj in &gc.tracked {
        unsafe { free_object(obj) };
    }
    gc.tracked.clear();
    gc.tracked_index.clear();
    gc.global_roots.clear();
    gc.worklist.clear();
    gc.allocated_bytes = 0;
    gc.live_bytes = 0;
    gc.next_gc_threshold = gc.config.min_threshold_bytes;
    gc.tracked_object_count = 0;
    gc.collections = 0;
}
