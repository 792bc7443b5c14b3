//! Console output entry points for the primitive types.

/// Print a signed integer and a newline.
#[unsafe(no_mangle)]
pub extern "C" fn rt_println_i64(value: i64) {
    println!("{}", value);
}

/// Print an unsigned integer and a newline.
#[unsafe(no_mangle)]
pub extern "C" fn rt_println_u64(value: u64) {
    println!("{}", value);
}

/// Print a byte value (narrowed to the u8 range) and a newline.
#[unsafe(no_mangle)]
pub extern "C" fn rt_println_u8(value: u64) {
    println!("{}", value as u8);
}

/// Print `true` or `false` and a newline.
#[unsafe(no_mangle)]
pub extern "C" fn rt_println_bool(value: i64) {
    println!("{}", if value != 0 { "true" } else { "false" });
}

/// Print a double with six fractional digits and a newline.
#[unsafe(no_mangle)]
pub extern "C" fn rt_println_double(value: f64) {
    println!("{:.6}", value);
}
