//! Dispatch tables for the runtime entry-point surface the emitter targets.
//!
//! Built-in constructors, methods, and free functions resolve here to their
//! `rt_*` symbols. A table entry also records whether the entry point takes
//! the thread-state handle as a leading argument; everything else about a
//! call (argument classes, return register) follows from the IR types.

use super::ir::Ty;

/// How a built-in call lowers: target symbol plus calling details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinCall {
    pub symbol: &'static str,
    /// The entry point takes `RtThreadState*` as its first argument.
    pub needs_thread_state: bool,
}

const fn plain(symbol: &'static str) -> BuiltinCall {
    BuiltinCall {
        symbol,
        needs_thread_state: false,
    }
}

/// Constructor entry point for a built-in class, if `class` names one.
pub fn builtin_constructor(class: &str) -> Option<BuiltinCall> {
    let call = match class {
        "Vec" => plain("rt_vec_new"),
        "StrBuf" => plain("rt_strbuf_new"),
        "BoxI64" => plain("rt_box_i64_new"),
        "BoxU64" => plain("rt_box_u64_new"),
        "BoxU8" => plain("rt_box_u8_new"),
        "BoxBool" => plain("rt_box_bool_new"),
        "BoxDouble" => plain("rt_box_double_new"),
        _ => return None,
    };
    Some(call)
}

/// Array constructor for an element type.
pub fn array_constructor(elem: &Ty) -> Option<BuiltinCall> {
    let call = match array_kind_suffix(elem)? {
        "i64" => plain("rt_array_new_i64"),
        "u64" => plain("rt_array_new_u64"),
        "u8" => plain("rt_array_new_u8"),
        "bool" => plain("rt_array_new_bool"),
        "double" => plain("rt_array_new_double"),
        _ => plain("rt_array_new_ref"),
    };
    Some(call)
}

/// Element-kind suffix used by the `rt_array_*` families.
pub fn array_kind_suffix(elem: &Ty) -> Option<&'static str> {
    let suffix = match elem {
        Ty::I64 => "i64",
        Ty::U64 => "u64",
        Ty::U8 => "u8",
        Ty::Bool => "bool",
        Ty::Double => "double",
        Ty::Unit => return None,
        _ => "ref",
    };
    Some(suffix)
}

/// Built-in method dispatch: `(receiver type, canonical method name)` to the
/// runtime entry point. Index and slice sugar reach this table as `get`,
/// `set`, and `slice`.
pub fn builtin_method(receiver: &Ty, method: &str) -> Option<BuiltinCall> {
    let call = match (receiver, method) {
        (Ty::Vec, "len") => plain("rt_vec_len"),
        (Ty::Vec, "push") => plain("rt_vec_push"),
        (Ty::Vec, "get") => plain("rt_vec_get"),
        (Ty::Vec, "set") => plain("rt_vec_set"),

        (Ty::Str, "len") => plain("rt_str_len"),
        (Ty::Str, "get") => plain("rt_str_get_u8"),
        (Ty::Str, "slice") => plain("rt_str_slice"),

        (Ty::StrBuf, "len") => plain("rt_strbuf_len"),
        (Ty::StrBuf, "get") => plain("rt_strbuf_get_u8"),
        (Ty::StrBuf, "set") => plain("rt_strbuf_set_u8"),
        (Ty::StrBuf, "push") => plain("rt_strbuf_push_u8"),
        (Ty::StrBuf, "to_str") => plain("rt_strbuf_to_str"),

        (Ty::BoxI64, "get") => plain("rt_box_i64_get"),
        (Ty::BoxU64, "get") => plain("rt_box_u64_get"),
        (Ty::BoxU8, "get") => plain("rt_box_u8_get"),
        (Ty::BoxBool, "get") => plain("rt_box_bool_get"),
        (Ty::BoxDouble, "get") => plain("rt_box_double_get"),

        (Ty::Array(_), "len") => plain("rt_array_len"),
        (Ty::Array(elem), "get") => match array_kind_suffix(elem)? {
            "i64" => plain("rt_array_get_i64"),
            "u64" => plain("rt_array_get_u64"),
            "u8" => plain("rt_array_get_u8"),
            "bool" => plain("rt_array_get_bool"),
            "double" => plain("rt_array_get_double"),
            _ => plain("rt_array_get_ref"),
        },
        (Ty::Array(elem), "set") => match array_kind_suffix(elem)? {
            "i64" => plain("rt_array_set_i64"),
            "u64" => plain("rt_array_set_u64"),
            "u8" => plain("rt_array_set_u8"),
            "bool" => plain("rt_array_set_bool"),
            "double" => plain("rt_array_set_double"),
            _ => plain("rt_array_set_ref"),
        },
        (Ty::Array(elem), "slice") => match array_kind_suffix(elem)? {
            "i64" => plain("rt_array_slice_i64"),
            "u64" => plain("rt_array_slice_u64"),
            "u8" => plain("rt_array_slice_u8"),
            "bool" => plain("rt_array_slice_bool"),
            "double" => plain("rt_array_slice_double"),
            _ => plain("rt_array_slice_ref"),
        },

        _ => return None,
    };
    Some(call)
}

/// Built-in static method dispatch (no receiver).
pub fn builtin_static_method(class: &str, method: &str) -> Option<BuiltinCall> {
    match (class, method) {
        ("StrBuf", "from_str") => Some(plain("rt_strbuf_from_str")),
        _ => None,
    }
}

/// Built-in free functions: `println` dispatches on its argument type,
/// `panic` takes a `Str` message.
pub fn builtin_function(name: &str, arg_tys: &[&Ty]) -> Option<BuiltinCall> {
    match (name, arg_tys) {
        ("println", [Ty::I64]) => Some(plain("rt_println_i64")),
        ("println", [Ty::U64]) => Some(plain("rt_println_u64")),
        ("println", [Ty::U8]) => Some(plain("rt_println_u8")),
        ("println", [Ty::Bool]) => Some(plain("rt_println_bool")),
        ("println", [Ty::Double]) => Some(plain("rt_println_double")),
        ("panic", [Ty::Str]) => Some(plain("rt_panic_str")),
        _ => None,
    }
}

/// Descriptor symbol for a built-in reference type, used by checked casts.
pub fn builtin_type_desc_symbol(ty: &Ty) -> Option<String> {
    let symbol = match ty {
        Ty::Str => "rt_type_str_desc",
        Ty::StrBuf => "rt_type_strbuf_desc",
        Ty::Vec => "rt_type_vec_desc",
        Ty::BoxI64 => "rt_type_box_i64_desc",
        Ty::BoxU64 => "rt_type_box_u64_desc",
        Ty::BoxU8 => "rt_type_box_u8_desc",
        Ty::BoxBool => "rt_type_box_bool_desc",
        Ty::BoxDouble => "rt_type_box_double_desc",
        Ty::Array(elem) => {
            return match array_kind_suffix(elem)? {
                "i64" => Some("rt_type_array_i64_desc".to_string()),
                "u64" => Some("rt_type_array_u64_desc".to_string()),
                "u8" => Some("rt_type_array_u8_desc".to_string()),
                "bool" => Some("rt_type_array_bool_desc".to_string()),
                "double" => Some("rt_type_array_double_desc".to_string()),
                _ => Some("rt_type_array_ref_desc".to_string()),
            };
        }
        _ => return None,
    };
    Some(symbol.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_dispatch() {
        assert_eq!(builtin_constructor("Vec").unwrap().symbol, "rt_vec_new");
        assert_eq!(
            builtin_constructor("BoxI64").unwrap().symbol,
            "rt_box_i64_new"
        );
        assert!(builtin_constructor("Point").is_none());
    }

    #[test]
    fn index_sugar_reaches_kind_specific_entries() {
        let u8_array = Ty::Array(Box::new(Ty::U8));
        assert_eq!(
            builtin_method(&u8_array, "get").unwrap().symbol,
            "rt_array_get_u8"
        );
        assert_eq!(
            builtin_method(&u8_array, "slice").unwrap().symbol,
            "rt_array_slice_u8"
        );

        let obj_array = Ty::Array(Box::new(Ty::Obj));
        assert_eq!(
            builtin_method(&obj_array, "set").unwrap().symbol,
            "rt_array_set_ref"
        );
    }

    #[test]
    fn println_dispatches_on_argument_type() {
        assert_eq!(
            builtin_function("println", &[&Ty::I64]).unwrap().symbol,
            "rt_println_i64"
        );
        assert_eq!(
            builtin_function("println", &[&Ty::Bool]).unwrap().symbol,
            "rt_println_bool"
        );
        assert!(builtin_function("println", &[&Ty::Str]).is_none());
    }

    #[test]
    fn desc_symbols_cover_builtins() {
        assert_eq!(
            builtin_type_desc_symbol(&Ty::Str).unwrap(),
            "rt_type_str_desc"
        );
        assert_eq!(
            builtin_type_desc_symbol(&Ty::Array(Box::new(Ty::Obj))).unwrap(),
            "rt_type_array_ref_desc"
        );
        assert!(builtin_type_desc_symbol(&Ty::I64).is_none());
    }
}
