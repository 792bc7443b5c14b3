//! The built-in mutable string buffer and its storage object.
//!
//! `StrBuf` mirrors the `Vec`/`VecStorage` split: the buffer is a fixed-size
//! record (length plus storage pointer) whose trace function visits the
//! storage reference; `StrBufStorage` is a variable-size leaf holding the
//! capacity and the inline bytes. Growth allocates fresh storage and copies.

#![allow(unsafe_op_in_unsafe_fn)]
#![allow(non_upper_case_globals)]

use std::ffi::c_char;
use std::os::raw::c_void;

use super::alloc::rt_alloc_obj;
use super::object::{
    RT_TYPE_FLAG_HAS_REFS, RT_TYPE_FLAG_LEAF, RT_TYPE_FLAG_VARIABLE_SIZE, RtMarkRefFn,
    RtObjHeader, RtType,
};
use super::panic::{abort_with_message, require};
use super::roots::ScopedRoots;
use super::rt_thread_state;
use super::str::{rt_str_from_bytes, rt_str_get_u8, rt_str_len};

#[repr(C)]
pub struct RtStrBufStorageObj {
    pub header: RtObjHeader,
    pub capacity: u64,
    // capacity bytes follow inline
}

#[repr(C)]
pub struct RtStrBufObj {
    pub header: RtObjHeader,
    pub len: u64,
    pub storage: *mut RtStrBufStorageObj,
}

#[unsafe(no_mangle)]
pub static rt_type_strbuf_desc: RtType = RtType {
    type_id: 0x53424601,
    flags: RT_TYPE_FLAG_HAS_REFS,
    abi_version: 1,
    align_bytes: 8,
    fixed_size_bytes: std::mem::size_of::<RtStrBufObj>() as u64,
    debug_name: b"StrBuf\0".as_ptr() as *const c_char,
    trace_fn: Some(strbuf_trace),
    pointer_offsets: std::ptr::null(),
    pointer_offsets_count: 0,
    reserved0: 0,
};

#[unsafe(no_mangle)]
pub static rt_type_strbuf_storage_desc: RtType = RtType {
    type_id: 0x53425331,
    flags: RT_TYPE_FLAG_LEAF | RT_TYPE_FLAG_VARIABLE_SIZE,
    abi_version: 1,
    align_bytes: 8,
    fixed_size_bytes: std::mem::size_of::<RtStrBufStorageObj>() as u64,
    debug_name: b"StrBufStorage\0".as_ptr() as *const c_char,
    trace_fn: None,
    pointer_offsets: std::ptr::null(),
    pointer_offsets_count: 0,
    reserved0: 0,
};

unsafe extern "C" fn strbuf_trace(obj: *mut c_void, mark_ref: RtMarkRefFn) {
    let buf = obj as *mut RtStrBufObj;
    mark_ref(&mut (*buf).storage as *mut *mut RtStrBufStorageObj as *mut *mut c_void);
}

unsafe fn storage_bytes(storage: *mut RtStrBufStorageObj) -> *mut u8 {
    (storage as *mut u8).add(std::mem::size_of::<RtStrBufStorageObj>())
}

unsafe fn require_strbuf_obj(strbuf_obj: *const c_void, api_name: &str) -> *mut RtStrBufObj {
    require(!strbuf_obj.is_null(), "StrBuf API called with null object");

    let buf = strbuf_obj as *mut RtStrBufObj;
    if !std::ptr::eq((*buf).header.ty, &rt_type_strbuf_desc) {
        abort_with_message(api_name);
    }
    buf
}

unsafe fn strbuf_storage_new(capacity: u64) -> *mut RtStrBufStorageObj {
    let payload = (std::mem::size_of::<u64>() as u64)
        .checked_add(capacity)
        .unwrap_or_else(|| abort_with_message("rt_strbuf: capacity overflow"));
    let storage = rt_alloc_obj(rt_thread_state(), &rt_type_strbuf_storage_desc, payload)
        as *mut RtStrBufStorageObj;
    (*storage).capacity = capacity;
    storage
}

unsafe fn strbuf_with_storage(len: u64, storage: *mut RtStrBufStorageObj) -> *mut RtStrBufObj {
    let mut roots: Box<ScopedRoots<1>> = ScopedRoots::new();
    roots.set(0, storage as *mut c_void);

    let payload = std::mem::size_of::<u64>() as u64 + std::mem::size_of::<*mut c_void>() as u64;
    let buf = rt_alloc_obj(rt_thread_state(), &rt_type_strbuf_desc, payload) as *mut RtStrBufObj;
    (*buf).len = len;
    (*buf).storage = storage;
    buf
}

/// Allocate an empty `StrBuf` with the requested capacity.
#[unsafe(no_mangle)]
pub extern "C" fn rt_strbuf_new(capacity: i64) -> *mut c_void {
    if capacity < 0 {
        abort_with_message("rt_strbuf_new: capacity must be non-negative");
    }

    unsafe {
        let storage = strbuf_storage_new(capacity as u64);
        strbuf_with_storage(0, storage) as *mut c_void
    }
}

/// Copy a `Str` into a fresh `StrBuf` of exactly its length.
///
/// # Safety
/// `str_obj` must be a tracked `Str`; the caller must have it rooted.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_strbuf_from_str(str_obj: *const c_void) -> *mut c_void {
    let len = rt_str_len(str_obj);
    let storage = strbuf_storage_new(len);
    for i in 0..len {
        *storage_bytes(storage).add(i as usize) = rt_str_get_u8(str_obj, i as i64) as u8;
    }
    strbuf_with_storage(len, storage) as *mut c_void
}

/// Snapshot the buffer's current contents as an immutable `Str`.
///
/// # Safety
/// `strbuf_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_strbuf_to_str(strbuf_obj: *const c_void) -> *mut c_void {
    let buf = require_strbuf_obj(strbuf_obj, "rt_strbuf_to_str: object is not StrBuf");
    let storage = (*buf).storage;
    require(!storage.is_null(), "rt_strbuf_to_str: internal storage is null");
    rt_str_from_bytes(rt_thread_state(), storage_bytes(storage), (*buf).len)
}

/// # Safety
/// `strbuf_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_strbuf_len(strbuf_obj: *const c_void) -> u64 {
    (*require_strbuf_obj(strbuf_obj, "rt_strbuf_len: object is not StrBuf")).len
}

/// Bounds-checked byte read.
///
/// # Safety
/// `strbuf_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_strbuf_get_u8(strbuf_obj: *const c_void, index: i64) -> u64 {
    let buf = require_strbuf_obj(strbuf_obj, "rt_strbuf_get_u8: object is not StrBuf");
    if index < 0 || index as u64 >= (*buf).len {
        abort_with_message("rt_strbuf_get_u8: index out of bounds");
    }

    let storage = (*buf).storage;
    require(!storage.is_null(), "rt_strbuf_get_u8: internal storage is null");
    *storage_bytes(storage).add(index as usize) as u64
}

/// Bounds-checked byte write; values above 255 are rejected.
///
/// # Safety
/// `strbuf_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_strbuf_set_u8(strbuf_obj: *mut c_void, index: i64, value: u64) {
    let buf = require_strbuf_obj(strbuf_obj, "rt_strbuf_set_u8: object is not StrBuf");
    if index < 0 || index as u64 >= (*buf).len {
        abort_with_message("rt_strbuf_set_u8: index out of bounds");
    }
    if value > 255 {
        abort_with_message("rt_strbuf_set_u8: value out of range");
    }

    let storage = (*buf).storage;
    require(!storage.is_null(), "rt_strbuf_set_u8: internal storage is null");
    *storage_bytes(storage).add(index as usize) = value as u8;
}

/// Append one byte, growing the storage when full.
///
/// # Safety
/// `strbuf_obj` must be a tracked object rooted by the caller; the append may
/// allocate and therefore collect.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_strbuf_push_u8(strbuf_obj: *mut c_void, value: u64) {
    let buf = require_strbuf_obj(strbuf_obj, "rt_strbuf_push_u8: object is not StrBuf");
    if value > 255 {
        abort_with_message("rt_strbuf_push_u8: value out of range");
    }

    let storage = (*buf).storage;
    require(!storage.is_null(), "rt_strbuf_push_u8: internal storage is null");

    if (*buf).len >= (*storage).capacity {
        // The caller has the buffer rooted, which keeps the old storage
        // reachable across the grow allocation; objects never move.
        let next_capacity = if (*storage).capacity == 0 {
            8
        } else {
            (*storage).capacity * 2
        };
        let grown = strbuf_storage_new(next_capacity);
        std::ptr::copy_nonoverlapping(
            storage_bytes(storage),
            storage_bytes(grown),
            (*buf).len as usize,
        );
        (*buf).storage = grown;
    }

    let storage = (*buf).storage;
    *storage_bytes(storage).add((*buf).len as usize) = value as u8;
    (*buf).len += 1;
}
