//! End-to-end collector scenarios driven through the runtime entry points,
//! the same way generated code and the C-level tests exercise them.
//!
//! The runtime is process-wide and single-threaded, so every test grabs the
//! serialization lock and starts from `rt_gc_reset_state`.

use std::ffi::c_char;
use std::os::raw::c_void;
use std::ptr;
use std::sync::{Mutex, MutexGuard};

use niflheim::runtime::alloc::{rt_alloc_obj, rt_checked_cast};
use niflheim::runtime::boxes::{rt_box_i64_get, rt_box_i64_new, rt_type_box_i64_desc};
use niflheim::runtime::gc::{
    rt_gc_collect, rt_gc_get_stats, rt_gc_register_global_root, rt_gc_reset_state,
    rt_gc_unregister_global_root,
};
use niflheim::runtime::object::{
    RT_TYPE_FLAG_HAS_REFS, RT_TYPE_FLAG_LEAF, RtObjHeader, RtType,
};
use niflheim::runtime::roots::{
    RtRootFrame, rt_pop_roots, rt_push_roots, rt_root_frame_init, rt_root_slot_load,
    rt_root_slot_store,
};
use niflheim::runtime::array::{
    rt_array_get_u8, rt_array_new_ref, rt_array_new_u8, rt_array_set_ref, rt_array_set_u8,
    rt_array_slice_u8,
};
use niflheim::runtime::{rt_init, rt_thread_state};

static LOCK: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    let guard = LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    rt_init();
    rt_gc_reset_state();
    guard
}

// A leaf object: header plus one u64 payload word.
static LEAF_TYPE: RtType = RtType {
    type_id: 11,
    flags: RT_TYPE_FLAG_LEAF,
    abi_version: 1,
    align_bytes: 8,
    fixed_size_bytes: 32,
    debug_name: b"Leaf\0".as_ptr() as *const c_char,
    trace_fn: None,
    pointer_offsets: std::ptr::null(),
    pointer_offsets_count: 0,
    reserved0: 0,
};

// A node with a single outgoing reference at offset 24, traced through the
// descriptor's pointer-offset table.
static NODE_OFFSETS: [u32; 1] = [24];
static NODE_TYPE: RtType = RtType {
    type_id: 12,
    flags: RT_TYPE_FLAG_HAS_REFS,
    abi_version: 1,
    align_bytes: 8,
    fixed_size_bytes: 32,
    debug_name: b"Node\0".as_ptr() as *const c_char,
    trace_fn: None,
    pointer_offsets: NODE_OFFSETS.as_ptr(),
    pointer_offsets_count: 1,
    reserved0: 0,
};

fn alloc_leaf(value: u64) -> *mut c_void {
    unsafe {
        let obj = rt_alloc_obj(rt_thread_state(), &LEAF_TYPE, 8);
        *((obj as *mut u8).add(24) as *mut u64) = value;
        obj
    }
}

fn alloc_node() -> *mut c_void {
    unsafe { rt_alloc_obj(rt_thread_state(), &NODE_TYPE, 8) }
}

fn set_node_next(node: *mut c_void, next: *mut c_void) {
    unsafe {
        *((node as *mut u8).add(24) as *mut *mut c_void) = next;
    }
}

struct Frame<const N: usize> {
    frame: RtRootFrame,
    slots: [*mut c_void; N],
}

impl<const N: usize> Frame<N> {
    /// Initialize and push a frame; the value must stay pinned in place
    /// (callers keep it in a local and pop before returning).
    fn pushed() -> Box<Self> {
        let mut frame = Box::new(Self {
            frame: RtRootFrame {
                prev: ptr::null_mut(),
                slot_count: 0,
                reserved: 0,
                slots: ptr::null_mut(),
            },
            slots: [ptr::null_mut(); N],
        });
        unsafe {
            let slots = frame.slots.as_mut_ptr();
            rt_root_frame_init(&mut frame.frame, slots, N as u32);
            rt_push_roots(rt_thread_state(), &mut frame.frame);
        }
        frame
    }

    fn store(&mut self, index: u32, value: *mut c_void) {
        unsafe { rt_root_slot_store(&mut self.frame, index, value) }
    }

    fn load(&self, index: u32) -> *mut c_void {
        unsafe { rt_root_slot_load(&self.frame, index) }
    }

    fn pop(self: Box<Self>) {
        unsafe { rt_pop_roots(rt_thread_state()) }
    }
}

#[test]
fn allocation_writes_a_clean_header() {
    let _guard = serial();

    let obj = alloc_leaf(7) as *const RtObjHeader;
    unsafe {
        assert!(std::ptr::eq((*obj).ty, &LEAF_TYPE));
        assert_eq!((*obj).size_bytes, 32);
        assert_eq!((*obj).gc_flags, 0);
        assert_eq!((*obj).reserved0, 0);
    }
}

#[test]
fn unrooted_objects_are_reclaimed() {
    let _guard = serial();

    for i in 0..200 {
        alloc_leaf(i);
    }
    unsafe { rt_gc_collect(rt_thread_state()) };

    let stats = rt_gc_get_stats();
    assert_eq!(stats.tracked_object_count, 0);
    assert_eq!(stats.live_bytes, 0);
    assert_eq!(stats.allocated_bytes, 0);
}

#[test]
fn rooted_chain_survives_then_reclaims() {
    let _guard = serial();

    let mut frame: Box<Frame<1>> = Frame::pushed();
    let a = alloc_node();
    frame.store(0, a);
    let b = alloc_node();
    set_node_next(a, b);
    let c = alloc_node();
    set_node_next(b, c);

    unsafe { rt_gc_collect(rt_thread_state()) };
    assert_eq!(rt_gc_get_stats().tracked_object_count, 3);

    frame.store(0, ptr::null_mut());
    frame.pop();
    unsafe { rt_gc_collect(rt_thread_state()) };
    assert_eq!(rt_gc_get_stats().tracked_object_count, 0);
}

#[test]
fn cycles_are_collected_once_unrooted() {
    let _guard = serial();

    let mut frame: Box<Frame<1>> = Frame::pushed();
    let n1 = alloc_node();
    frame.store(0, n1);
    let n2 = alloc_node();
    set_node_next(n1, n2);
    set_node_next(n2, n1);

    unsafe { rt_gc_collect(rt_thread_state()) };
    assert_eq!(rt_gc_get_stats().tracked_object_count, 2);

    frame.store(0, ptr::null_mut());
    unsafe { rt_gc_collect(rt_thread_state()) };
    assert_eq!(rt_gc_get_stats().tracked_object_count, 0);

    frame.pop();
}

#[test]
fn global_root_lifecycle() {
    let _guard = serial();

    let mut slot: *mut c_void = ptr::null_mut();
    unsafe {
        rt_gc_register_global_root(&mut slot);
        slot = alloc_leaf(42);
        rt_gc_collect(rt_thread_state());
        assert_eq!(rt_gc_get_stats().tracked_object_count, 1);

        slot = ptr::null_mut();
        rt_gc_unregister_global_root(&mut slot);
        rt_gc_collect(rt_thread_state());
        assert_eq!(rt_gc_get_stats().tracked_object_count, 0);
    }
}

#[test]
fn double_registration_leaves_one_entry() {
    let _guard = serial();

    let mut slot: *mut c_void = ptr::null_mut();
    unsafe {
        rt_gc_register_global_root(&mut slot);
        rt_gc_register_global_root(&mut slot);
        slot = alloc_leaf(1);

        // One unregister must fully retire the slot.
        rt_gc_unregister_global_root(&mut slot);
        rt_gc_collect(rt_thread_state());
        assert_eq!(rt_gc_get_stats().tracked_object_count, 0);

        // Unregistering an unregistered slot is a silent no-op.
        rt_gc_unregister_global_root(&mut slot);
    }
}

#[test]
fn threshold_triggers_collections_under_pressure() {
    let _guard = serial();

    // 5000 leaves at 32 bytes comfortably exceed the 64 KiB floor, so the
    // allocator must have collected at least once along the way.
    for i in 0..5000 {
        alloc_leaf(i);
    }
    let stats = rt_gc_get_stats();
    assert!(
        stats.tracked_object_count < 5000,
        "threshold never fired: {} tracked",
        stats.tracked_object_count
    );

    unsafe { rt_gc_collect(rt_thread_state()) };
    assert_eq!(rt_gc_get_stats().tracked_object_count, 0);
}

#[test]
fn reference_arrays_trace_their_elements() {
    let _guard = serial();

    let mut frame: Box<Frame<1>> = Frame::pushed();
    let array = rt_array_new_ref(2);
    frame.store(0, array);

    unsafe {
        rt_array_set_ref(array, 0, alloc_leaf(1));
        rt_array_set_ref(array, 1, alloc_leaf(2));

        rt_gc_collect(rt_thread_state());
        assert_eq!(rt_gc_get_stats().tracked_object_count, 3);

        rt_array_set_ref(array, 0, ptr::null_mut());
        rt_gc_collect(rt_thread_state());
        assert_eq!(rt_gc_get_stats().tracked_object_count, 2);

        rt_array_set_ref(array, 1, ptr::null_mut());
        rt_gc_collect(rt_thread_state());
        assert_eq!(rt_gc_get_stats().tracked_object_count, 1);
    }

    frame.store(0, ptr::null_mut());
    frame.pop();
    unsafe { rt_gc_collect(rt_thread_state()) };
    assert_eq!(rt_gc_get_stats().tracked_object_count, 0);
}

#[test]
fn slices_are_independent_of_their_source() {
    let _guard = serial();

    let mut frame: Box<Frame<1>> = Frame::pushed();
    let array = rt_array_new_u8(4);
    frame.store(0, array);

    unsafe {
        rt_array_set_u8(array, 0, 9);
        rt_array_set_u8(array, 1, 7);

        let slice = rt_array_slice_u8(array, 0, 2);
        rt_array_set_u8(array, 0, 1);

        assert_eq!(rt_array_get_u8(slice, 0), 9);
        assert_eq!(rt_array_get_u8(slice, 1), 7);
        assert_eq!(rt_array_get_u8(array, 0), 1);
    }

    frame.pop();
}

#[test]
fn checked_cast_accepts_null_and_exact_type() {
    let _guard = serial();

    unsafe {
        assert!(rt_checked_cast(ptr::null_mut(), &rt_type_box_i64_desc).is_null());

        let boxed = rt_box_i64_new(3);
        let cast = rt_checked_cast(boxed, &rt_type_box_i64_desc);
        assert_eq!(cast, boxed);
        assert_eq!(rt_box_i64_get(cast), 3);
    }
}

#[test]
fn stats_are_consistent_across_collections() {
    let _guard = serial();

    let mut frame: Box<Frame<1>> = Frame::pushed();
    frame.store(0, alloc_leaf(5));
    for i in 0..50 {
        alloc_leaf(i);
    }

    let before = rt_gc_get_stats();
    assert!(before.allocated_bytes >= before.live_bytes);
    assert!(before.next_gc_threshold >= 64 * 1024);

    unsafe { rt_gc_collect(rt_thread_state()) };
    let after = rt_gc_get_stats();
    assert_eq!(after.allocated_bytes, after.live_bytes);
    assert_eq!(after.tracked_object_count, 1);
    assert_eq!(after.live_bytes, 32);
    assert!(after.next_gc_threshold >= 64 * 1024);

    frame.pop();
}

#[test]
fn root_slots_start_null_and_round_trip() {
    let _guard = serial();

    let mut frame: Box<Frame<2>> = Frame::pushed();
    assert!(frame.load(0).is_null());
    assert!(frame.load(1).is_null());

    let a = alloc_leaf(123);
    let b = alloc_leaf(456);
    frame.store(0, a);
    frame.store(1, b);
    assert_eq!(frame.load(0), a);
    assert_eq!(frame.load(1), b);

    frame.pop();
}

#[test]
fn marked_flag_is_invisible_outside_collection() {
    let _guard = serial();

    let mut frame: Box<Frame<1>> = Frame::pushed();
    let leaf = alloc_leaf(9);
    frame.store(0, leaf);

    unsafe {
        rt_gc_collect(rt_thread_state());
        let header = leaf as *const RtObjHeader;
        assert_eq!(
            (*header).gc_flags & 0x1,
            0,
            "MARKED must be cleared by the end of sweep"
        );
    }

    frame.pop();
}
