//! Environment-variable overrides (§6: "environment-derived defaults apply
//! when an appliance is not explicitly selected").

use std::time::Duration;

/// Read a `PROSBC_*` string variable, trimmed, treating blank as absent.
pub(super) fn string_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a `PROSBC_*` variable as a duration expressed in whole seconds.
pub(super) fn seconds_var(name: &str) -> Option<Duration> {
    string_var(name)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Read a `PROSBC_*` variable as an unsigned integer.
pub(super) fn usize_var(name: &str) -> Option<usize> {
    string_var(name).and_then(|v| v.parse::<usize>().ok())
}

/// Read a `PROSBC_*` variable as a `u32`.
pub(super) fn u32_var(name: &str) -> Option<u32> {
    string_var(name).and_then(|v| v.parse::<u32>().ok())
}

/// Read a `PROSBC_*` variable as a boolean (`1`/`true`/`yes`, case-insensitive).
pub(super) fn bool_var(name: &str) -> Option<bool> {
    string_var(name).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_var_recognizes_truthy_values() {
        std::env::set_var("PROSBC_TEST_BOOL_ENV", "YES");
        assert_eq!(bool_var("PROSBC_TEST_BOOL_ENV"), Some(true));
        std::env::remove_var("PROSBC_TEST_BOOL_ENV");
    }

    #[test]
    fn string_var_treats_blank_as_absent() {
        std::env::set_var("PROSBC_TEST_BLANK_ENV", "   ");
        assert_eq!(string_var("PROSBC_TEST_BLANK_ENV"), None);
        std::env::remove_var("PROSBC_TEST_BLANK_ENV");
    }
}
