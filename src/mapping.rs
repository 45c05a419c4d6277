use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    error::ConfigError,
    io_utils,
    model::{CsvFileMapping, IdentityTemplate, MappingRule, UpdateAction},
    schema::{DEFAULT_LANGUAGE, RawStatement, non_empty},
    template::Template,
    yaml_provider,
};

#[derive(Debug, Clone)]
pub struct MappingDescription {
    pub name: String,
    pub description: Option<String>,
    pub language: String,
    pub files: Vec<CsvFileMapping>,
}

impl MappingDescription {
    /// Loads a mapping file; relative CSV paths resolve against its directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw: RawMapping = yaml_provider::load_from_path(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        raw.validate(base)
    }

    pub fn parse(input: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let raw: RawMapping = yaml_provider::parse_str(input, "mapping description")?;
        raw.validate(base_dir)
    }
}

/// Fails when a rule of `file` uses a column its CSV header does not have.
pub fn check_headers(file: &CsvFileMapping, headers: &[String]) -> Result<(), ConfigError> {
    let missing: BTreeSet<&str> = file
        .rules
        .iter()
        .flat_map(MappingRule::templates)
        .flat_map(|t| t.columns())
        .filter(|column| !headers.iter().any(|h| h.as_str() == *column))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::new(format!(
            "{}: column(s) {} not found in header [{}]",
            file.path.display(),
            missing.iter().map(|c| format!("'{c}'")).collect::<Vec<_>>().join(", "),
            headers.join(", ")
        )))
    }
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_decimal_separator() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMapping {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default = "default_encoding")]
    encoding: String,
    #[serde(default = "default_delimiter")]
    delimiter: String,
    #[serde(default = "default_decimal_separator")]
    decimal_separator: String,
    csv_files: Vec<RawCsvFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCsvFile {
    file_path: PathBuf,
    update_action: UpdateAction,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    delimiter: Option<String>,
    #[serde(default)]
    decimal_separator: Option<String>,
    mappings: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    item: RawItemIdentity,
    #[serde(default)]
    update_action: Option<UpdateAction>,
    #[serde(default)]
    statements: Vec<RawStatement>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawItemIdentity {
    label: String,
    identity: RawIdentity,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIdentity {
    property: String,
    value: String,
}

impl RawMapping {
    fn validate(self, base_dir: &Path) -> Result<MappingDescription, ConfigError> {
        let name = non_empty(self.name, "mapping name")?;
        let language = non_empty(self.language, "mapping language")?;
        if self.csv_files.is_empty() {
            return Err(ConfigError::new(format!(
                "mapping '{name}' does not declare any csv_files"
            )));
        }

        let mut files = Vec::with_capacity(self.csv_files.len());
        for raw in self.csv_files {
            let context = format!("csv file {}", raw.file_path.display());
            let encoding = io_utils::resolve_encoding(Some(
                raw.encoding.as_deref().unwrap_or(&self.encoding),
            ))
            .map_err(|err| ConfigError::new(format!("{context}: {err}")))?;
            let delimiter =
                io_utils::parse_delimiter(raw.delimiter.as_deref().unwrap_or(&self.delimiter))
                    .map_err(|err| ConfigError::new(format!("{context}: {err}")))?;
            let decimal_separator = io_utils::parse_decimal_separator(
                raw.decimal_separator
                    .as_deref()
                    .unwrap_or(&self.decimal_separator),
            )
            .map_err(|err| ConfigError::new(format!("{context}: {err}")))?;
            if raw.mappings.is_empty() {
                return Err(ConfigError::new(format!("{context}: no mappings declared")));
            }
            let rules = raw
                .mappings
                .into_iter()
                .enumerate()
                .map(|(idx, rule)| rule.validate(&format!("{context}, mapping #{}", idx + 1)))
                .collect::<Result<Vec<_>, _>>()?;
            let path = if raw.file_path.is_absolute() {
                raw.file_path
            } else {
                base_dir.join(raw.file_path)
            };
            files.push(CsvFileMapping {
                path,
                encoding,
                delimiter,
                decimal_separator,
                language: language.clone(),
                update_action: raw.update_action,
                rules,
            });
        }

        Ok(MappingDescription {
            name,
            description: self.description,
            language,
            files,
        })
    }
}

impl RawRule {
    fn validate(self, context: &str) -> Result<MappingRule, ConfigError> {
        let label = Template::parse(&non_empty(self.item.label, &format!("{context}: label"))?)?;
        let identity = IdentityTemplate {
            property: non_empty(
                self.item.identity.property,
                &format!("{context}: identity property"),
            )?,
            value: Template::parse(&non_empty(
                self.item.identity.value,
                &format!("{context}: identity value"),
            )?)?,
        };
        let description = self
            .item
            .description
            .filter(|d| !d.trim().is_empty())
            .map(|d| Template::parse(&d))
            .transpose()?;
        let aliases = self
            .item
            .aliases
            .iter()
            .filter(|a| !a.trim().is_empty())
            .map(|a| Template::parse(a))
            .collect::<Result<Vec<_>, _>>()?;
        let statements = self
            .statements
            .into_iter()
            .map(|s| s.into_def(context))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MappingRule {
            label,
            identity,
            description,
            aliases,
            statements,
            update_action: self.update_action,
        })
    }
}
