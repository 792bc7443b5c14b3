//! Managed-object headers and type descriptors.
//!
//! Every managed object starts with a 24-byte [`RtObjHeader`]; the header's
//! type pointer names an immutable [`RtType`] descriptor that tells the
//! collector how to size and trace the object. Both layouts are part of the
//! compiler/runtime ABI and are mirrored verbatim in the generated C header.

use std::ffi::c_char;
use std::os::raw::c_void;

// =============================================================================
// Header Layout (24 bytes)
// =============================================================================
//
// +----------------+----------------+-----------+-----------+
// | type (8)       | size_bytes (8) | flags (4) | rsvd (4)  |
// +----------------+----------------+-----------+-----------+
//
// Payload begins immediately after the header. Minimum alignment is 8.

/// Set by the collector between the start of mark and the end of sweep.
pub const RT_GC_FLAG_MARKED: u32 = 1 << 0;
/// Objects carrying this flag survive sweep even when unreachable.
pub const RT_GC_FLAG_PINNED: u32 = 1 << 1;

/// The object contains outgoing reference slots.
pub const RT_TYPE_FLAG_HAS_REFS: u32 = 1 << 0;
/// The header's `size_bytes` is the sole source of truth for the footprint.
pub const RT_TYPE_FLAG_VARIABLE_SIZE: u32 = 1 << 1;
/// Tracing the object is a no-op.
pub const RT_TYPE_FLAG_LEAF: u32 = 1 << 2;

/// Header present at the base of every managed object.
#[repr(C)]
pub struct RtObjHeader {
    /// Type descriptor; never null and never mutated after allocation.
    pub ty: *const RtType,
    /// Total footprint in bytes, header included.
    pub size_bytes: u64,
    /// `RT_GC_FLAG_*` bits; reserved bits must be zero.
    pub gc_flags: u32,
    pub reserved0: u32,
}

/// Size of the object header in bytes.
pub const HEADER_BYTES: u64 = std::mem::size_of::<RtObjHeader>() as u64;

/// Callback handed to trace functions; called once per outgoing reference slot.
pub type RtMarkRefFn = unsafe extern "C" fn(slot: *mut *mut c_void);

/// Per-type trace function. Given an object base, calls `mark_ref` on every
/// outgoing reference slot inside the object.
pub type RtTraceFn = unsafe extern "C" fn(obj: *mut c_void, mark_ref: RtMarkRefFn);

/// Immutable type metadata, usually static-lifetime.
///
/// Exactly one of `trace_fn` or the pointer-offset table should drive tracing;
/// when both are present the trace function wins.
#[repr(C)]
pub struct RtType {
    /// Unique per concrete type; equality is identity.
    pub type_id: u32,
    /// `RT_TYPE_FLAG_*` bits.
    pub flags: u32,
    /// ABI schema version.
    pub abi_version: u32,
    /// Required alignment, at least 8.
    pub align_bytes: u32,
    /// Fixed footprint in bytes; for variable-size types, the fixed prefix.
    pub fixed_size_bytes: u64,
    /// Optional NUL-terminated debug name.
    pub debug_name: *const c_char,
    /// Optional trace function; wins over the pointer-offset table.
    pub trace_fn: Option<RtTraceFn>,
    /// Optional table of reference-slot offsets from the object base.
    pub pointer_offsets: *const u32,
    pub pointer_offsets_count: u32,
    pub reserved0: u32,
}

// Descriptors are immutable and live for the whole process; sharing them
// across the (single-threaded) runtime is sound.
unsafe impl Sync for RtType {}

impl RtType {
    pub fn has_refs(&self) -> bool {
        self.flags & RT_TYPE_FLAG_HAS_REFS != 0
    }

    pub fn is_leaf(&self) -> bool {
        self.flags & RT_TYPE_FLAG_LEAF != 0
    }

    pub fn is_variable_size(&self) -> bool {
        self.flags & RT_TYPE_FLAG_VARIABLE_SIZE != 0
    }

    /// Debug name, or `<unknown>` when the descriptor carries none.
    pub fn name(&self) -> &'static str {
        if self.debug_name.is_null() {
            return "<unknown>";
        }
        unsafe {
            std::ffi::CStr::from_ptr(self.debug_name)
                .to_str()
                .unwrap_or("<unknown>")
        }
    }
}

/// Debug name of the descriptor behind an object pointer, tolerating nulls.
///
/// # Safety
/// `obj`, if non-null, must point at a live object header.
pub unsafe fn type_name_of(obj: *const RtObjHeader) -> &'static str {
    if obj.is_null() {
        return "<unknown>";
    }
    let ty = unsafe { (*obj).ty };
    if ty.is_null() {
        return "<unknown>";
    }
    unsafe { (*ty).name() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_24_bytes() {
        assert_eq!(std::mem::size_of::<RtObjHeader>(), 24);
        assert_eq!(std::mem::offset_of!(RtObjHeader, ty), 0);
        assert_eq!(std::mem::offset_of!(RtObjHeader, size_bytes), 8);
        assert_eq!(std::mem::offset_of!(RtObjHeader, gc_flags), 16);
        assert_eq!(std::mem::offset_of!(RtObjHeader, reserved0), 20);
    }

    #[test]
    fn descriptor_layout_matches_emitted_records() {
        // The emitter writes descriptor records field by field; these offsets
        // are load-bearing for generated .data sections.
        assert_eq!(std::mem::offset_of!(RtType, type_id), 0);
        assert_eq!(std::mem::offset_of!(RtType, flags), 4);
        assert_eq!(std::mem::offset_of!(RtType, abi_version), 8);
        assert_eq!(std::mem::offset_of!(RtType, align_bytes), 12);
        assert_eq!(std::mem::offset_of!(RtType, fixed_size_bytes), 16);
        assert_eq!(std::mem::offset_of!(RtType, debug_name), 24);
        assert_eq!(std::mem::offset_of!(RtType, trace_fn), 32);
        assert_eq!(std::mem::offset_of!(RtType, pointer_offsets), 40);
        assert_eq!(std::mem::offset_of!(RtType, pointer_offsets_count), 48);
        assert_eq!(std::mem::size_of::<RtType>(), 56);
    }

    #[test]
    fn flag_predicates() {
        let ty = RtType {
            type_id: 1,
            flags: RT_TYPE_FLAG_HAS_REFS | RT_TYPE_FLAG_VARIABLE_SIZE,
            abi_version: 1,
            align_bytes: 8,
            fixed_size_bytes: 0,
            debug_name: std::ptr::null(),
            trace_fn: None,
            pointer_offsets: std::ptr::null(),
            pointer_offsets_count: 0,
            reserved0: 0,
        };
        assert!(ty.has_refs());
        assert!(ty.is_variable_size());
        assert!(!ty.is_leaf());
        assert_eq!(ty.name(), "<unknown>");
    }
}
