//! GLSL literals. Formatting never depends on the host locale.

/// Shortest decimal that parses back to exactly `value`; non-finite values keep their bit pattern.
pub fn format_float(value: f32) -> String {
    if !value.is_finite() {
        return format!("uintBitsToFloat(0x{:08x}u)", value.to_bits());
    }
    // `{:?}` prints the shortest round-tripping digits and always keeps a `.` or an exponent.
    format!("{value:?}")
}

pub fn format_int(value: i32) -> String {
    if value == i32::MIN {
        // `2147483648` alone does not fit an `int` literal.
        return "int(0x80000000u)".to_string();
    }
    value.to_string()
}

pub fn format_uint(value: u32) -> String {
    format!("{value}u")
}
