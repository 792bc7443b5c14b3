//! Fixed-length arrays: one leaf descriptor per primitive element kind plus a
//! traced reference-array descriptor.
//!
//! Layout: header, 8-byte length, then `len * element_size` bytes of element
//! storage. The element kind is carried entirely by the descriptor identity;
//! accessors check it before touching storage. `bool` elements are stored as
//! full 8-byte words, matching the register representation generated code
//! uses.

#![allow(unsafe_op_in_unsafe_fn)]
#![allow(non_upper_case_globals)]

use std::ffi::c_char;
use std::os::raw::c_void;

use super::alloc::rt_alloc_obj;
use super::object::{
    RT_TYPE_FLAG_HAS_REFS, RT_TYPE_FLAG_LEAF, RT_TYPE_FLAG_VARIABLE_SIZE, RtMarkRefFn,
    RtObjHeader, RtType,
};
use super::panic::{abort_with_message, require, rt_panic_oom};
use super::rt_thread_state;

#[repr(C)]
pub struct RtArrayObj {
    pub header: RtObjHeader,
    pub len: u64,
    // len * element_size bytes follow inline
}

const fn array_desc(
    type_id: u32,
    flags: u32,
    debug_name: *const c_char,
    trace_fn: Option<super::object::RtTraceFn>,
) -> RtType {
    RtType {
        type_id,
        flags,
        abi_version: 1,
        align_bytes: 8,
        fixed_size_bytes: std::mem::size_of::<RtArrayObj>() as u64,
        debug_name,
        trace_fn,
        pointer_offsets: std::ptr::null(),
        pointer_offsets_count: 0,
        reserved0: 0,
    }
}

const LEAF_VAR: u32 = RT_TYPE_FLAG_LEAF | RT_TYPE_FLAG_VARIABLE_SIZE;

#[unsafe(no_mangle)]
pub static rt_type_array_i64_desc: RtType =
    array_desc(0x41493634, LEAF_VAR, b"ArrayI64\0".as_ptr() as *const c_char, None);
#[unsafe(no_mangle)]
pub static rt_type_array_u64_desc: RtType =
    array_desc(0x41553634, LEAF_VAR, b"ArrayU64\0".as_ptr() as *const c_char, None);
#[unsafe(no_mangle)]
pub static rt_type_array_u8_desc: RtType =
    array_desc(0x41553831, LEAF_VAR, b"ArrayU8\0".as_ptr() as *const c_char, None);
#[unsafe(no_mangle)]
pub static rt_type_array_bool_desc: RtType =
    array_desc(0x41424F31, LEAF_VAR, b"ArrayBool\0".as_ptr() as *const c_char, None);
#[unsafe(no_mangle)]
pub static rt_type_array_double_desc: RtType =
    array_desc(0x41444231, LEAF_VAR, b"ArrayDouble\0".as_ptr() as *const c_char, None);
#[unsafe(no_mangle)]
pub static rt_type_array_ref_desc: RtType = array_desc(
    0x41525231,
    RT_TYPE_FLAG_HAS_REFS | RT_TYPE_FLAG_VARIABLE_SIZE,
    b"ArrayRef\0".as_ptr() as *const c_char,
    Some(array_ref_trace),
);

unsafe extern "C" fn array_ref_trace(obj: *mut c_void, mark_ref: RtMarkRefFn) {
    let array = obj as *mut RtArrayObj;
    if !std::ptr::eq((*array).header.ty, &rt_type_array_ref_desc) {
        abort_with_message("array trace: object is not a reference array");
    }

    let elements = array_data_ptr(array) as *mut *mut c_void;
    for i in 0..(*array).len {
        mark_ref(elements.add(i as usize));
    }
}

unsafe fn array_data_ptr(array: *mut RtArrayObj) -> *mut u8 {
    (array as *mut u8).add(std::mem::size_of::<RtArrayObj>())
}

fn mul_checked(a: u64, b: u64) -> u64 {
    match a.checked_mul(b) {
        Some(product) => product,
        None => rt_panic_oom(),
    }
}

fn add_checked(a: u64, b: u64) -> u64 {
    match a.checked_add(b) {
        Some(sum) => sum,
        None => rt_panic_oom(),
    }
}

fn array_payload_bytes(len: u64, element_size: u64) -> u64 {
    let fixed = std::mem::size_of::<u64>() as u64;
    add_checked(fixed, mul_checked(len, element_size))
}

/// Element size implied by a descriptor, None for non-array descriptors.
fn element_size_for(desc: &RtType) -> Option<u64> {
    if std::ptr::eq(desc, &rt_type_array_u8_desc) {
        Some(1)
    } else if std::ptr::eq(desc, &rt_type_array_i64_desc)
        || std::ptr::eq(desc, &rt_type_array_u64_desc)
        || std::ptr::eq(desc, &rt_type_array_bool_desc)
        || std::ptr::eq(desc, &rt_type_array_double_desc)
        || std::ptr::eq(desc, &rt_type_array_ref_desc)
    {
        Some(8)
    } else {
        None
    }
}

unsafe fn require_any_array(array_obj: *const c_void, api_name: &str) -> *mut RtArrayObj {
    require(!array_obj.is_null(), "Array API called with null object");

    let array = array_obj as *mut RtArrayObj;
    if element_size_for(&*(*array).header.ty).is_none() {
        abort_with_message(api_name);
    }
    array
}

unsafe fn require_array_kind(
    array_obj: *const c_void,
    desc: &'static RtType,
    api_name: &str,
) -> *mut RtArrayObj {
    require(!array_obj.is_null(), "Array API called with null object");

    let array = array_obj as *mut RtArrayObj;
    if !std::ptr::eq((*array).header.ty, desc) {
        abort_with_message(api_name);
    }
    array
}

unsafe fn require_index_in_bounds(array: *const RtArrayObj, index: u64, api_name: &str) {
    if index >= (*array).len {
        abort_with_message(api_name);
    }
}

unsafe fn array_new(len: u64, element_size: u64, desc: &'static RtType) -> *mut RtArrayObj {
    let array = rt_alloc_obj(
        rt_thread_state(),
        desc,
        array_payload_bytes(len, element_size),
    ) as *mut RtArrayObj;
    (*array).len = len;
    array
}

unsafe fn array_slice(
    array_obj: *const c_void,
    desc: &'static RtType,
    start: u64,
    end: u64,
    api_name: &str,
) -> *mut c_void {
    let source = require_array_kind(array_obj, desc, api_name);
    if start > end || end > (*source).len {
        abort_with_message(api_name);
    }

    let element_size = element_size_for(desc).unwrap_or(8);
    let slice_len = end - start;
    // Source stays reachable through the caller's roots while the copy target
    // is allocated, and the copy itself crosses no safepoint.
    let slice = array_new(slice_len, element_size, desc);
    let byte_offset = mul_checked(start, element_size);
    let copy_bytes = mul_checked(slice_len, element_size);
    if copy_bytes > 0 {
        let source = require_array_kind(array_obj, desc, api_name);
        std::ptr::copy_nonoverlapping(
            array_data_ptr(source).add(byte_offset as usize),
            array_data_ptr(slice),
            copy_bytes as usize,
        );
    }
    slice as *mut c_void
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_array_new_i64(len: u64) -> *mut c_void {
    unsafe { array_new(len, 8, &rt_type_array_i64_desc) as *mut c_void }
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_array_new_u64(len: u64) -> *mut c_void {
    unsafe { array_new(len, 8, &rt_type_array_u64_desc) as *mut c_void }
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_array_new_u8(len: u64) -> *mut c_void {
    unsafe { array_new(len, 1, &rt_type_array_u8_desc) as *mut c_void }
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_array_new_bool(len: u64) -> *mut c_void {
    unsafe { array_new(len, 8, &rt_type_array_bool_desc) as *mut c_void }
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_array_new_double(len: u64) -> *mut c_void {
    unsafe { array_new(len, 8, &rt_type_array_double_desc) as *mut c_void }
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_array_new_ref(len: u64) -> *mut c_void {
    unsafe { array_new(len, 8, &rt_type_array_ref_desc) as *mut c_void }
}

/// Length of any array kind.
///
/// # Safety
/// `array_obj` must be a tracked object (kind-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_array_len(array_obj: *const c_void) -> u64 {
    (*require_any_array(array_obj, "rt_array_len: object is not array")).len
}

macro_rules! primitive_array_accessors {
    ($get:ident, $set:ident, $slice:ident, $desc:ident, $elem:ty, $store:ty, $kind:literal) => {
        /// Bounds-checked element read.
        ///
        /// # Safety
        /// `array_obj` must be a tracked object (kind-checked here).
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $get(array_obj: *const c_void, index: u64) -> $elem {
            let array = require_array_kind(
                array_obj,
                &$desc,
                concat!(stringify!($get), ": object is not ", $kind),
            );
            require_index_in_bounds(array, index, concat!(stringify!($get), ": index out of bounds"));
            *(array_data_ptr(array) as *const $store).add(index as usize) as $elem
        }

        /// Bounds-checked element write.
        ///
        /// # Safety
        /// `array_obj` must be a tracked object (kind-checked here).
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $set(array_obj: *mut c_void, index: u64, value: $elem) {
            let array = require_array_kind(
                array_obj,
                &$desc,
                concat!(stringify!($set), ": object is not ", $kind),
            );
            require_index_in_bounds(array, index, concat!(stringify!($set), ": index out of bounds"));
            *(array_data_ptr(array) as *mut $store).add(index as usize) = value as $store;
        }

        /// Copy `[start, end)` into a fresh, independent array.
        ///
        /// # Safety
        /// `array_obj` must be a tracked object (kind-checked here).
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $slice(array_obj: *const c_void, start: u64, end: u64) -> *mut c_void {
            array_slice(
                array_obj,
                &$desc,
                start,
                end,
                concat!(stringify!($slice), ": invalid slice range"),
            )
        }
    };
}

primitive_array_accessors!(
    rt_array_get_i64,
    rt_array_set_i64,
    rt_array_slice_i64,
    rt_type_array_i64_desc,
    i64,
    i64,
    "i64[]"
);
primitive_array_accessors!(
    rt_array_get_u64,
    rt_array_set_u64,
    rt_array_slice_u64,
    rt_type_array_u64_desc,
    u64,
    u64,
    "u64[]"
);
primitive_array_accessors!(
    rt_array_get_u8,
    rt_array_set_u8,
    rt_array_slice_u8,
    rt_type_array_u8_desc,
    u64,
    u8,
    "u8[]"
);
primitive_array_accessors!(
    rt_array_get_double,
    rt_array_set_double,
    rt_array_slice_double,
    rt_type_array_double_desc,
    f64,
    f64,
    "double[]"
);

/// Bounds-checked element read; nonzero stored values read back as 1.
///
/// # Safety
/// `array_obj` must be a tracked object (kind-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_array_get_bool(array_obj: *const c_void, index: u64) -> i64 {
    let array = require_array_kind(array_obj, &rt_type_array_bool_desc, "rt_array_get_bool: object is not bool[]");
    require_index_in_bounds(array, index, "rt_array_get_bool: index out of bounds");
    *(array_data_ptr(array) as *const i64).add(index as usize)
}

/// Bounds-checked element write, normalized to 0 or 1.
///
/// # Safety
/// `array_obj` must be a tracked object (kind-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_array_set_bool(array_obj: *mut c_void, index: u64, value: i64) {
    let array = require_array_kind(array_obj, &rt_type_array_bool_desc, "rt_array_set_bool: object is not bool[]");
    require_index_in_bounds(array, index, "rt_array_set_bool: index out of bounds");
    *(array_data_ptr(array) as *mut i64).add(index as usize) = (value != 0) as i64;
}

/// # Safety
/// `array_obj` must be a tracked object (kind-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_array_slice_bool(
    array_obj: *const c_void,
    start: u64,
    end: u64,
) -> *mut c_void {
    array_slice(
        array_obj,
        &rt_type_array_bool_desc,
        start,
        end,
        "rt_array_slice_bool: invalid slice range",
    )
}

/// Bounds-checked reference read.
///
/// # Safety
/// `array_obj` must be a tracked object (kind-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_array_get_ref(array_obj: *const c_void, index: u64) -> *mut c_void {
    let array = require_array_kind(array_obj, &rt_type_array_ref_desc, "rt_array_get_ref: object is not ref[]");
    require_index_in_bounds(array, index, "rt_array_get_ref: index out of bounds");
    *(array_data_ptr(array) as *const *mut c_void).add(index as usize)
}

/// Bounds-checked reference write; null is a legal element.
///
/// # Safety
/// `array_obj` must be a tracked object (kind-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_array_set_ref(array_obj: *mut c_void, index: u64, value: *mut c_void) {
    let array = require_array_kind(array_obj, &rt_type_array_ref_desc, "rt_array_set_ref: object is not ref[]");
    require_index_in_bounds(array, index, "rt_array_set_ref: index out of bounds");
    *(array_data_ptr(array) as *mut *mut c_void).add(index as usize) = value;
}

/// # Safety
/// `array_obj` must be a tracked object (kind-checked here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_array_slice_ref(
    array_obj: *const c_void,
    start: u64,
    end: u64,
) -> *mut c_void {
    array_slice(
        array_obj,
        &rt_type_array_ref_desc,
        start,
        end,
        "rt_array_slice_ref: invalid slice range",
    )
}
