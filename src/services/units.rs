//! Pure (value, unit) -> SI-target conversions (component C3).
//!
//! Unknown units are not an error: the raw value is preserved and the caller
//! is expected to emit a debug diagnostic. A missing value or unit is the
//! caller's concern, not this module's.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Converted {
    pub value: f64,
    pub recognised: bool,
}

fn converted(value: f64, recognised: bool) -> Converted {
    Converted { value, recognised }
}

/// Convert an energy value to kilojoules.
pub fn energy_to_kj(value: f64, unit: &str) -> Converted {
    match unit {
        "kcal" | "Cal" => converted(value * 4.184, true),
        "kJ" => converted(value, true),
        _ => converted(value, false),
    }
}

/// Convert a distance value to metres.
pub fn distance_to_metres(value: f64, unit: &str) -> Converted {
    match unit {
        "km" => converted(value * 1000.0, true),
        "mi" | "mile" | "miles" => converted(value * 1609.344, true),
        "m" | "meter" | "meters" => converted(value, true),
        _ => converted(value, false),
    }
}

/// Convert a duration value to seconds.
pub fn duration_to_seconds(value: f64, unit: &str) -> Converted {
    match unit {
        "min" | "minute" | "minutes" => converted(value * 60.0, true),
        "hr" | "hour" | "hours" => converted(value * 3600.0, true),
        "s" | "sec" | "second" | "seconds" => converted(value, true),
        _ => converted(value, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_units_convert_to_kilojoules() {
        assert_eq!(energy_to_kj(1.0, "kcal").value, 4.184);
        assert_eq!(energy_to_kj(1.0, "Cal").value, 4.184);
        assert_eq!(energy_to_kj(10.0, "kJ").value, 10.0);
    }

    #[test]
    fn distance_units_convert_to_metres() {
        assert_eq!(distance_to_metres(1.0, "km").value, 1000.0);
        assert!((distance_to_metres(1.0, "mi").value - 1609.344).abs() < 1e-9);
        assert!((distance_to_metres(1.0, "miles").value - 1609.344).abs() < 1e-9);
        assert_eq!(distance_to_metres(5.0, "m").value, 5.0);
        assert_eq!(distance_to_metres(5.0, "meters").value, 5.0);
    }

    #[test]
    fn duration_units_convert_to_seconds() {
        assert_eq!(duration_to_seconds(1.0, "min").value, 60.0);
        assert_eq!(duration_to_seconds(1.0, "minutes").value, 60.0);
        assert_eq!(duration_to_seconds(1.0, "hr").value, 3600.0);
        assert_eq!(duration_to_seconds(30.0, "s").value, 30.0);
        assert_eq!(duration_to_seconds(30.0, "seconds").value, 30.0);
    }

    #[test]
    fn unknown_unit_preserves_raw_value_and_flags_unrecognised() {
        let result = energy_to_kj(42.0, "furlong-pounds");
        assert_eq!(result.value, 42.0);
        assert!(!result.recognised);
    }
}
