//! Argv-emission helpers.
//!
//! External tools receive their options as `name<sep>value` tokens. Each
//! helper skips the option entirely when the value equals its unset
//! sentinel: the empty string for strings, a negative value for optional
//! signed numerics, zero-or-less for optional floats, `false` for booleans.

/// Appends `name<separator>value` unless the value is empty.
pub fn push_kv(argv: &mut Vec<String>, name: &str, value: &str, separator: &str) {
    if !value.is_empty() {
        argv.push(format!("{name}{separator}{value}"));
    }
}

/// Appends `name<separator>true` when the flag is set.
pub fn push_flag(argv: &mut Vec<String>, name: &str, value: bool, separator: &str) {
    if value {
        argv.push(format!("{name}{separator}true"));
    }
}

/// Appends `name<separator>value` unless the value is negative.
pub fn push_int(argv: &mut Vec<String>, name: &str, value: i64, separator: &str) {
    if value >= 0 {
        argv.push(format!("{name}{separator}{value}"));
    }
}

/// Appends `name<separator>value`; unsigned values are always set.
pub fn push_uint(argv: &mut Vec<String>, name: &str, value: u64, separator: &str) {
    argv.push(format!("{name}{separator}{value}"));
}

/// Appends `name<separator>value` with the given precision unless the value
/// is zero or negative.
pub fn push_float(argv: &mut Vec<String>, name: &str, value: f64, precision: usize, separator: &str) {
    if value > 0.0 {
        argv.push(format!("{name}{separator}{value:.precision$}"));
    }
}

/// Returns `val` when non-empty, otherwise `default`.
pub fn default_if_empty<'a>(val: &'a str, default: &'a str) -> &'a str {
    if val.is_empty() {
        default
    } else {
        val
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_kv_skips_empty() {
        let mut argv = Vec::new();
        push_kv(&mut argv, "-DsourceUrlFormat", "", "=");
        push_kv(&mut argv, "-Dorientation", "xy", "=");
        assert_eq!(argv, vec!["-Dorientation=xy".to_string()]);
    }

    #[test]
    fn test_push_int_skips_negative() {
        let mut argv = Vec::new();
        push_int(&mut argv, "-DminX", -1, "=");
        push_int(&mut argv, "-DminY", 0, "=");
        push_int(&mut argv, "-Dwidth", 16384, "=");
        assert_eq!(argv, vec!["-DminY=0".to_string(), "-Dwidth=16384".to_string()]);
    }

    #[test]
    fn test_push_flag_skips_false() {
        let mut argv = Vec::new();
        push_flag(&mut argv, "-DignoreEmptyTiles", false, "=");
        push_flag(&mut argv, "-DignoreEmptyTiles", true, "=");
        assert_eq!(argv, vec!["-DignoreEmptyTiles=true".to_string()]);
    }

    #[test]
    fn test_push_float_precision() {
        let mut argv = Vec::new();
        push_float(&mut argv, "-Dquality", 0.85, 2, "=");
        push_float(&mut argv, "-DsourceResXY", 0.0, 3, "=");
        assert_eq!(argv, vec!["-Dquality=0.85".to_string()]);
    }

    #[test]
    fn test_default_if_empty() {
        assert_eq!(default_if_empty("", "%1$d"), "%1$d");
        assert_eq!(default_if_empty("%2$d", "%1$d"), "%2$d");
    }
}
