//! The built-in `Str` type: immutable byte strings with inline storage.
//!
//! Layout: header, 8-byte length, then `len` bytes of payload. Leaf and
//! variable-size; the header's `size_bytes` is the footprint authority.

#![allow(unsafe_op_in_unsafe_fn)]
#![allow(non_upper_case_globals)]

use std::ffi::c_char;
use std::os::raw::c_void;

use super::alloc::rt_alloc_obj;
use super::object::{
    RT_TYPE_FLAG_LEAF, RT_TYPE_FLAG_VARIABLE_SIZE, RtObjHeader, RtType,
};
use super::panic::{abort_with_message, require};
use super::roots::RtThreadState;
use super::rt_thread_state;

#[repr(C)]
pub struct RtStrObj {
    pub header: RtObjHeader,
    pub len: u64,
    // len bytes follow inline
}

#[unsafe(no_mangle)]
pub static rt_type_str_desc: RtType = RtType {
    type_id: 0x53545201,
    flags: RT_TYPE_FLAG_LEAF | RT_TYPE_FLAG_VARIABLE_SIZE,
    abi_version: 1,
    align_bytes: 8,
    fixed_size_bytes: std::mem::size_of::<RtStrObj>() as u64,
    debug_name: b"Str\0".as_ptr() as *const c_char,
    trace_fn: None,
    pointer_offsets: std::ptr::null(),
    pointer_offsets_count: 0,
    reserved0: 0,
};

unsafe fn require_str_obj(str_obj: *const c_void, api_name: &str) -> *mut RtStrObj {
    require(!str_obj.is_null(), "Str API called with null object");

    let str_ptr = str_obj as *mut RtStrObj;
    if !std::ptr::eq((*str_ptr).header.ty, &rt_type_str_desc) {
        abort_with_message(api_name);
    }
    str_ptr
}

unsafe fn str_bytes_ptr(str_ptr: *mut RtStrObj) -> *mut u8 {
    (str_ptr as *mut u8).add(std::mem::size_of::<RtStrObj>())
}

/// Allocate a `Str` holding a copy of `len` bytes.
///
/// # Safety
/// `bytes` must be readable for `len` bytes when `len > 0`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_str_from_bytes(
    ts: *mut RtThreadState,
    bytes: *const u8,
    len: u64,
) -> *mut c_void {
    if len > 0 && bytes.is_null() {
        abort_with_message("rt_str_from_bytes: bytes is NULL with non-zero length");
    }

    let payload = std::mem::size_of::<u64>() as u64 + len;
    let str_ptr = rt_alloc_obj(ts, &rt_type_str_desc, payload) as *mut RtStrObj;
    (*str_ptr).len = len;
    if len > 0 {
        std::ptr::copy_nonoverlapping(bytes, str_bytes_ptr(str_ptr), len as usize);
    }
    str_ptr as *mut c_void
}

/// Allocate a one-byte `Str`.
#[unsafe(no_mangle)]
pub extern "C" fn rt_str_from_char(value: u8) -> *mut c_void {
    unsafe { rt_str_from_bytes(rt_thread_state(), &value, 1) }
}

/// Length in bytes.
///
/// # Safety
/// `str_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_str_len(str_obj: *const c_void) -> u64 {
    (*require_str_obj(str_obj, "rt_str_len: object is not Str")).len
}

/// Raw pointer to the inline bytes; valid until the next safepoint.
///
/// # Safety
/// `str_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_str_data_ptr(str_obj: *const c_void) -> *const u8 {
    str_bytes_ptr(require_str_obj(str_obj, "rt_str_data_ptr: object is not Str"))
}

/// Bounds-checked byte read.
///
/// # Safety
/// `str_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_str_get_u8(str_obj: *const c_void, index: i64) -> u64 {
    let str_ptr = require_str_obj(str_obj, "rt_str_get_u8: object is not Str");
    if index < 0 || index as u64 >= (*str_ptr).len {
        abort_with_message("rt_str_get_u8: index out of bounds");
    }
    *str_bytes_ptr(str_ptr).add(index as usize) as u64
}

/// Copy `[begin, end)` into a fresh `Str`. `begin > end` or `end > len` is a
/// fatal slice-range error.
///
/// # Safety
/// `str_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_str_slice(str_obj: *const c_void, begin: i64, end: i64) -> *mut c_void {
    let str_ptr = require_str_obj(str_obj, "rt_str_slice: object is not Str");
    if begin < 0 || end < 0 || begin > end || end as u64 > (*str_ptr).len {
        abort_with_message("rt_str_slice: invalid slice range");
    }

    let slice_len = (end - begin) as u64;
    let slice_bytes = str_bytes_ptr(str_ptr).add(begin as usize);
    rt_str_from_bytes(rt_thread_state(), slice_bytes, slice_len)
}

/// Panic with a managed `Str` as the message.
///
/// # Safety
/// `str_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_panic_str(str_obj: *const c_void) -> ! {
    let str_ptr = require_str_obj(str_obj, "rt_panic_str: object is not Str");
    let bytes = std::slice::from_raw_parts(str_bytes_ptr(str_ptr), (*str_ptr).len as usize);
    let message = String::from_utf8_lossy(bytes).into_owned();
    abort_with_message(&message)
}
