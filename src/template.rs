//! `{COLUMN}` placeholder templates. Substituted cell values are never scanned
//! again; `{{` and `}}` produce literal braces.

use std::{fmt, sync::LazyLock};

use regex::Regex;

use crate::error::{ConfigError, UnresolvedPlaceholderError};
use crate::rows::Row;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\{\{)|(\}\})|\{([^{}]*)\}|([{}])").expect("placeholder pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Column(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut cursor = 0;
        for caps in TOKEN.captures_iter(source) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            text.push_str(&source[cursor..whole.start()]);
            cursor = whole.end();
            if caps.get(1).is_some() {
                text.push('{');
            } else if caps.get(2).is_some() {
                text.push('}');
            } else if let Some(name) = caps.get(3) {
                let column = name.as_str().trim();
                if column.is_empty() {
                    return Err(ConfigError::new(format!(
                        "empty placeholder in template '{source}'"
                    )));
                }
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Column(column.to_string()));
            } else {
                return Err(ConfigError::new(format!(
                    "unbalanced '{}' at byte {} in template '{source}'",
                    whole.as_str(),
                    whole.start()
                )));
            }
        }
        text.push_str(&source[cursor..]);
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// A template with no placeholders that renders to `text` exactly.
    pub fn literal(text: &str) -> Self {
        let segments = if text.is_empty() {
            Vec::new()
        } else {
            vec![Segment::Text(text.to_string())]
        };
        Self {
            source: text.replace('{', "{{").replace('}', "}}"),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Column(name) => Some(name.as_str()),
            Segment::Text(_) => None,
        })
    }

    pub fn has_placeholders(&self) -> bool {
        self.columns().next().is_some()
    }

    pub fn render(&self, row: &Row) -> Result<String, UnresolvedPlaceholderError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Column(column) => {
                    let value = row.get(column).ok_or_else(|| UnresolvedPlaceholderError {
                        column: column.clone(),
                        template: self.source.clone(),
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parses and renders `template` against `row` in one call.
pub fn render(template: &str, row: &Row) -> Result<String, RenderError> {
    let parsed = Template::parse(template)?;
    Ok(parsed.render(row)?)
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Syntax(#[from] ConfigError),
    #[error(transparent)]
    Unresolved(#[from] UnresolvedPlaceholderError),
}
