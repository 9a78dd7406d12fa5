//! TX power conversion from user percent to the driver's quarter-dBm range

/// Lowest accepted power setting in percent
pub const MIN_TX_POWER_PERCENT: u8 = 1;

/// Highest accepted power setting in percent
pub const MAX_TX_POWER_PERCENT: u8 = 100;

/// Driver power floor, 0.25 dBm units (2 dBm)
pub const MIN_TX_POWER: i8 = 8;

/// Driver power ceiling, 0.25 dBm units (21 dBm)
pub const MAX_TX_POWER: i8 = 84;

/// Linear integer re-map of `x` from `[in_min, in_max]` to `[out_min, out_max]`
///
/// Truncates toward zero and does not clamp.
pub fn map_range(x: i32, in_min: i32, in_max: i32, out_min: i32, out_max: i32) -> i32 {
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

/// Convert a power percentage to the driver's quarter-dBm value
///
/// Percentages outside 1..=100 are clamped first.
pub fn percent_to_quarter_dbm(percent: u8) -> i8 {
    let percent = percent.clamp(MIN_TX_POWER_PERCENT, MAX_TX_POWER_PERCENT);
    map_range(
        percent as i32,
        MIN_TX_POWER_PERCENT as i32,
        MAX_TX_POWER_PERCENT as i32,
        MIN_TX_POWER as i32,
        MAX_TX_POWER as i32,
    ) as i8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_ends() {
        assert_eq!(percent_to_quarter_dbm(1), 8);
        assert_eq!(percent_to_quarter_dbm(100), 84);
    }

    #[test]
    fn test_out_of_range_percent_clamped() {
        assert_eq!(percent_to_quarter_dbm(0), MIN_TX_POWER);
        assert_eq!(percent_to_quarter_dbm(101), MAX_TX_POWER);
        assert_eq!(percent_to_quarter_dbm(255), MAX_TX_POWER);
    }

    #[test]
    fn test_default_power() {
        // (60 - 1) * 76 / 99 + 8
        assert_eq!(percent_to_quarter_dbm(60), 53);
    }

    #[test]
    fn test_map_range_truncates() {
        assert_eq!(map_range(50, 0, 100, 0, 3), 1);
        assert_eq!(map_range(5, 0, 10, 10, 0), 5);
    }
}
