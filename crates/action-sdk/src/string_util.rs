/// String utility functions.
pub struct StringUtil;

/// Characters that cannot appear in a path segment on at least one platform.
const UNSAFE_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

impl StringUtil {
    /// Convert a string to a boolean.
    ///
    /// Valid true values: `"1"`, `"true"`, `"$true"` (case-insensitive).
    /// Valid false values: `"0"`, `"false"`, `"$false"` (case-insensitive).
    /// Returns `None` for unrecognized values.
    pub fn convert_to_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "1" | "true" | "$true" => Some(true),
            "0" | "false" | "$false" => Some(false),
            _ => None,
        }
    }

    /// Replace filesystem-unsafe characters with `-`.
    ///
    /// `@`, `.` and every other character pass through unchanged, so distinct
    /// inputs only collide when they differ solely in unsafe characters.
    pub fn safe_filename(name: &str) -> String {
        name.chars()
            .map(|ch| if UNSAFE_FILENAME_CHARS.contains(&ch) { '-' } else { ch })
            .collect()
    }

    /// Split a comma separated list, trimming entries and dropping empty ones.
    pub fn split_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}
