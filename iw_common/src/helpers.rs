use std::time::Duration;

/// Parse a whole number of seconds into a [`Duration`].
///
/// Returns `Ok(None)` if no value was given, and an error message if the value is present but is not a
/// non-negative integer.
pub fn parse_duration_secs(value: Option<String>) -> Result<Option<Duration>, String> {
    match value {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|e| format!("'{v}' is not a valid number of seconds. {e}")),
    }
}

/// Parse an optional positive count. `0`, `none` and `unlimited` mean "no limit".
pub fn parse_limit(value: Option<String>) -> Result<Option<usize>, String> {
    let value = match value {
        Some(v) => v,
        None => return Ok(None),
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "0" | "none" | "unlimited" => Ok(None),
        s => s.parse::<usize>().map(Some).map_err(|e| format!("'{value}' is not a valid limit. {e}")),
    }
}
