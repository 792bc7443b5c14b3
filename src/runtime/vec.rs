//! The built-in growable `Vec` of references and its storage object.
//!
//! `Vec` is a fixed-size record (length plus storage pointer) whose trace
//! function visits the storage reference; `VecStorage` is variable-size and
//! traces every element slot up to its capacity. Growth allocates a fresh
//! storage object and copies; the old storage is reclaimed by the collector.

#![allow(unsafe_op_in_unsafe_fn)]
#![allow(non_upper_case_globals)]

use std::ffi::c_char;
use std::os::raw::c_void;

use super::alloc::rt_alloc_obj;
use super::object::{
    RT_TYPE_FLAG_HAS_REFS, RT_TYPE_FLAG_VARIABLE_SIZE, RtMarkRefFn, RtObjHeader, RtType,
};
use super::panic::{abort_with_message, require};
use super::roots::ScopedRoots;
use super::rt_thread_state;

#[repr(C)]
pub struct RtVecStorageObj {
    pub header: RtObjHeader,
    pub capacity: u64,
    // capacity reference slots follow inline
}

#[repr(C)]
pub struct RtVecObj {
    pub header: RtObjHeader,
    pub len: u64,
    pub storage: *mut RtVecStorageObj,
}

#[unsafe(no_mangle)]
pub static rt_type_vec_desc: RtType = RtType {
    type_id: 0x56454331,
    flags: RT_TYPE_FLAG_HAS_REFS,
    abi_version: 1,
    align_bytes: 8,
    fixed_size_bytes: std::mem::size_of::<RtVecObj>() as u64,
    debug_name: b"Vec\0".as_ptr() as *const c_char,
    trace_fn: Some(vec_trace),
    pointer_offsets: std::ptr::null(),
    pointer_offsets_count: 0,
    reserved0: 0,
};

#[unsafe(no_mangle)]
pub static rt_type_vec_storage_desc: RtType = RtType {
    type_id: 0x56455331,
    flags: RT_TYPE_FLAG_HAS_REFS | RT_TYPE_FLAG_VARIABLE_SIZE,
    abi_version: 1,
    align_bytes: 8,
    fixed_size_bytes: std::mem::size_of::<RtVecStorageObj>() as u64,
    debug_name: b"VecStorage\0".as_ptr() as *const c_char,
    trace_fn: Some(vec_storage_trace),
    pointer_offsets: std::ptr::null(),
    pointer_offsets_count: 0,
    reserved0: 0,
};

unsafe extern "C" fn vec_trace(obj: *mut c_void, mark_ref: RtMarkRefFn) {
    let vec = obj as *mut RtVecObj;
    mark_ref(&mut (*vec).storage as *mut *mut RtVecStorageObj as *mut *mut c_void);
}

unsafe extern "C" fn vec_storage_trace(obj: *mut c_void, mark_ref: RtMarkRefFn) {
    let storage = obj as *mut RtVecStorageObj;
    let elements = storage_elements(storage);
    for i in 0..(*storage).capacity {
        mark_ref(elements.add(i as usize));
    }
}

unsafe fn storage_elements(storage: *mut RtVecStorageObj) -> *mut *mut c_void {
    (storage as *mut u8).add(std::mem::size_of::<RtVecStorageObj>()) as *mut *mut c_void
}

unsafe fn require_vec_obj(vec_obj: *const c_void, api_name: &str) -> *mut RtVecObj {
    require(!vec_obj.is_null(), "Vec API called with null object");

    let vec = vec_obj as *mut RtVecObj;
    if !std::ptr::eq((*vec).header.ty, &rt_type_vec_desc) {
        abort_with_message(api_name);
    }
    vec
}

unsafe fn vec_storage_new(capacity: u64) -> *mut RtVecStorageObj {
    let slot_bytes = capacity
        .checked_mul(std::mem::size_of::<*mut c_void>() as u64)
        .unwrap_or_else(|| abort_with_message("rt_vec: capacity overflow"));
    let payload = std::mem::size_of::<u64>() as u64 + slot_bytes;
    let storage = rt_alloc_obj(rt_thread_state(), &rt_type_vec_storage_desc, payload)
        as *mut RtVecStorageObj;
    (*storage).capacity = capacity;
    storage
}

unsafe fn vec_grow_if_needed(vec: *mut RtVecObj) {
    let storage = (*vec).storage;
    require(!storage.is_null(), "rt_vec_push: internal storage is null");

    if (*vec).len < (*storage).capacity {
        return;
    }

    // The caller has the vec rooted, which keeps the old storage reachable
    // across the grow allocation; objects never move.
    let next_capacity = if (*storage).capacity == 0 {
        4
    } else {
        (*storage).capacity * 2
    };
    let grown = vec_storage_new(next_capacity);
    for index in 0..(*vec).len {
        *storage_elements(grown).add(index as usize) =
            *storage_elements(storage).add(index as usize);
    }
    (*vec).storage = grown;
}

/// Allocate an empty `Vec` with a small initial storage.
#[unsafe(no_mangle)]
pub extern "C" fn rt_vec_new() -> *mut c_void {
    unsafe {
        // The fresh storage must survive the vec allocation right after it.
        let mut roots: Box<ScopedRoots<1>> = ScopedRoots::new();
        let storage = vec_storage_new(4);
        roots.set(0, storage as *mut c_void);

        let payload =
            std::mem::size_of::<u64>() as u64 + std::mem::size_of::<*mut c_void>() as u64;
        let vec = rt_alloc_obj(rt_thread_state(), &rt_type_vec_desc, payload) as *mut RtVecObj;
        (*vec).len = 0;
        (*vec).storage = storage;
        vec as *mut c_void
    }
}

/// # Safety
/// `vec_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_vec_len(vec_obj: *const c_void) -> u64 {
    (*require_vec_obj(vec_obj, "rt_vec_len: object is not Vec")).len
}

/// Append a reference (or null), growing the storage when full.
///
/// # Safety
/// `vec_obj` must be a tracked object; the caller must have spilled `value`
/// and the vec into root slots before this safepoint.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_vec_push(vec_obj: *mut c_void, value: *mut c_void) {
    let vec = require_vec_obj(vec_obj, "rt_vec_push: object is not Vec");
    vec_grow_if_needed(vec);

    let storage = (*vec).storage;
    require(!storage.is_null(), "rt_vec_push: internal storage is null");
    *storage_elements(storage).add((*vec).len as usize) = value;
    (*vec).len += 1;
}

/// Bounds-checked element read.
///
/// # Safety
/// `vec_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_vec_get(vec_obj: *const c_void, index: u64) -> *mut c_void {
    let vec = require_vec_obj(vec_obj, "rt_vec_get: object is not Vec");
    if index >= (*vec).len {
        abort_with_message("rt_vec_get: index out of bounds");
    }

    let storage = (*vec).storage;
    require(!storage.is_null(), "rt_vec_get: internal storage is null");
    *storage_elements(storage).add(index as usize)
}

/// Bounds-checked element write.
///
/// # Safety
/// `vec_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_vec_set(vec_obj: *mut c_void, index: u64, value: *mut c_void) {
    let vec = require_vec_obj(vec_obj, "rt_vec_set: object is not Vec");
    if index >= (*vec).len {
        abort_with_message("rt_vec_set: index out of bounds");
    }

    let storage = (*vec).storage;
    require(!storage.is_null(), "rt_vec_set: internal storage is null");
    *storage_elements(storage).add(index as usize) = value;
}
