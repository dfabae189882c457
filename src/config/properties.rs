//! Key/value properties file parsing
//!
//! The transport configuration artifact is a plain properties file:
//! one `key=value` pair per line, `#` and `!` comment lines, blank lines
//! ignored, whitespace around keys and values trimmed.

use std::collections::HashMap;

use super::ConfigError;

/// Parse properties text into a key/value map.
///
/// Later occurrences of a key replace earlier ones.
pub fn parse_properties(text: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut properties = HashMap::new();

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::MalformedLine {
            line_number: index + 1,
            content: line.to_string(),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::MalformedLine {
                line_number: index + 1,
                content: line.to_string(),
            });
        }

        properties.insert(key.to_string(), value.trim().to_string());
    }

    Ok(properties)
}
