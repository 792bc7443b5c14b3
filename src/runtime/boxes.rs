//! Boxed primitives: one fixed-size leaf type per primitive kind.
//!
//! Layout is header plus a single 8-byte value slot. The per-kind descriptors
//! give each box a distinct identity for checked casts.

#![allow(unsafe_op_in_unsafe_fn)]
#![allow(non_upper_case_globals)]

use std::ffi::c_char;
use std::os::raw::c_void;

use super::alloc::rt_alloc_obj;
use super::object::{RT_TYPE_FLAG_LEAF, RtObjHeader, RtType};
use super::panic::{abort_with_message, require};
use super::rt_thread_state;

#[repr(C)]
struct RtBoxObj<T> {
    header: RtObjHeader,
    value: T,
}

const fn box_desc(type_id: u32, debug_name: *const c_char) -> RtType {
    RtType {
        type_id,
        flags: RT_TYPE_FLAG_LEAF,
        abi_version: 1,
        align_bytes: 8,
        fixed_size_bytes: std::mem::size_of::<RtBoxObj<u64>>() as u64,
        debug_name,
        trace_fn: None,
        pointer_offsets: std::ptr::null(),
        pointer_offsets_count: 0,
        reserved0: 0,
    }
}

#[unsafe(no_mangle)]
pub static rt_type_box_i64_desc: RtType =
    box_desc(0x42495831, b"BoxI64\0".as_ptr() as *const c_char);
#[unsafe(no_mangle)]
pub static rt_type_box_u64_desc: RtType =
    box_desc(0x42555831, b"BoxU64\0".as_ptr() as *const c_char);
#[unsafe(no_mangle)]
pub static rt_type_box_u8_desc: RtType = box_desc(0x42553831, b"BoxU8\0".as_ptr() as *const c_char);
#[unsafe(no_mangle)]
pub static rt_type_box_bool_desc: RtType =
    box_desc(0x42424F31, b"BoxBool\0".as_ptr() as *const c_char);
#[unsafe(no_mangle)]
pub static rt_type_box_double_desc: RtType =
    box_desc(0x42445831, b"BoxDouble\0".as_ptr() as *const c_char);

unsafe fn new_box<T>(desc: &'static RtType, value: T) -> *mut c_void {
    let payload = std::mem::size_of::<T>() as u64;
    let obj = rt_alloc_obj(rt_thread_state(), desc, payload) as *mut RtBoxObj<T>;
    (*obj).value = value;
    obj as *mut c_void
}

unsafe fn box_value<T: Copy>(
    box_obj: *const c_void,
    desc: &'static RtType,
    api_name: &str,
) -> T {
    require(!box_obj.is_null(), "Box API called with null object");
    let obj = box_obj as *const RtBoxObj<T>;
    if !std::ptr::eq((*obj).header.ty, desc) {
        abort_with_message(api_name);
    }
    (*obj).value
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_box_i64_new(value: i64) -> *mut c_void {
    unsafe { new_box(&rt_type_box_i64_desc, value) }
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_box_u64_new(value: u64) -> *mut c_void {
    unsafe { new_box(&rt_type_box_u64_desc, value) }
}

/// The stored value is narrowed to the u8 range.
#[unsafe(no_mangle)]
pub extern "C" fn rt_box_u8_new(value: u64) -> *mut c_void {
    unsafe { new_box(&rt_type_box_u8_desc, (value as u8) as u64) }
}

/// The stored value is normalized to 0 or 1.
#[unsafe(no_mangle)]
pub extern "C" fn rt_box_bool_new(value: i64) -> *mut c_void {
    unsafe { new_box(&rt_type_box_bool_desc, (value != 0) as i64) }
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_box_double_new(value: f64) -> *mut c_void {
    unsafe { new_box(&rt_type_box_double_desc, value) }
}

/// # Safety
/// `box_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_box_i64_get(box_obj: *const c_void) -> i64 {
    box_value(box_obj, &rt_type_box_i64_desc, "rt_box_i64_get: object is not BoxI64")
}

/// # Safety
/// `box_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_box_u64_get(box_obj: *const c_void) -> u64 {
    box_value(box_obj, &rt_type_box_u64_desc, "rt_box_u64_get: object is not BoxU64")
}

/// # Safety
/// `box_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_box_u8_get(box_obj: *const c_void) -> u64 {
    box_value(box_obj, &rt_type_box_u8_desc, "rt_box_u8_get: object is not BoxU8")
}

/// # Safety
/// `box_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_box_bool_get(box_obj: *const c_void) -> i64 {
    box_value(box_obj, &rt_type_box_bool_desc, "rt_box_bool_get: object is not BoxBool")
}

/// # Safety
/// `box_obj` must be a tracked object (type-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_box_double_get(box_obj: *const c_void) -> f64 {
    box_value(box_obj, &rt_type_box_double_desc, "rt_box_double_get: object is not BoxDouble")
}
