use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::ConfigError;

pub use serde_yaml::Value as YamlValue;

/// Reads and deserializes a YAML document. I/O and shape errors both surface
/// as [`ConfigError`] naming the file, since a bad document must stop the run
/// before anything is written remotely.
pub fn load_from_path<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|err| ConfigError::new(format!("reading {}: {err}", path.display())))?;
    parse_str(&raw, &path.display().to_string())
}

pub fn parse_str<T: DeserializeOwned>(input: &str, origin: &str) -> Result<T, ConfigError> {
    serde_yaml::from_str(input).map_err(|err| {
        let location = err
            .location()
            .map(|loc| format!(" (line {}, column {})", loc.line(), loc.column()))
            .unwrap_or_default();
        ConfigError::new(format!("parsing {origin}{location}: {err}"))
    })
}

/// Scalars written as YAML numbers or booleans are accepted wherever text is
/// expected (`value: 123`).
pub fn scalar_to_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
