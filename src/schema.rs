//! Schema descriptions: the properties and base items a Wikibase must hold.
//!
//! The YAML document is deserialized into loose `Raw*` structs and then
//! validated into the immutable [`PropertyDef`]/[`ItemDef`] model. All
//! validation failures are [`ConfigError`]s so a bad schema never reaches
//! the remote store.

use std::{collections::HashSet, path::Path};

use serde::Deserialize;

use crate::{
    error::ConfigError,
    model::{Datatype, ItemDef, PropertyDef, QualifierDef, Rank, StatementDef, ValueTemplate},
    template::Template,
    yaml_provider::{self, YamlValue},
};

pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescription {
    /// Informational; labels are stored exactly as written.
    pub namespace: String,
    pub language: String,
    pub properties: Vec<PropertyDef>,
    pub items: Vec<ItemDef>,
}

impl SchemaDescription {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw: RawSchema = yaml_provider::load_from_path(path)?;
        raw.validate()
    }

    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let raw: RawSchema = yaml_provider::parse_str(input, "schema description")?;
        raw.validate()
    }
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSchema {
    #[serde(default)]
    namespace: String,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default)]
    properties: Vec<RawProperty>,
    #[serde(default)]
    items: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProperty {
    label: String,
    #[serde(default)]
    description: String,
    datatype: String,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawItem {
    label: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    statements: Vec<RawStatement>,
}

/// Statement shape shared by schema items and mapping rules.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawStatement {
    property: String,
    value: RawValue,
    #[serde(default)]
    qualifiers: Vec<RawQualifier>,
    #[serde(default)]
    references: Vec<RawQualifier>,
    #[serde(default)]
    rank: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawQualifier {
    property: String,
    value: RawValue,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawValue {
    Item { item: String },
    Literal { literal: YamlValue },
    Scalar(YamlValue),
}

impl RawValue {
    fn into_template(self, context: &str) -> Result<ValueTemplate, ConfigError> {
        match self {
            RawValue::Item { item } => Ok(ValueTemplate::ItemLabel(Template::parse(&item)?)),
            RawValue::Literal { literal } => yaml_provider::scalar_to_string(&literal)
                .map(ValueTemplate::Literal)
                .ok_or_else(|| ConfigError::new(format!("{context}: literal must be a scalar"))),
            RawValue::Scalar(value) => {
                let text = yaml_provider::scalar_to_string(&value).ok_or_else(|| {
                    ConfigError::new(format!(
                        "{context}: value must be text, {{ item: ... }} or {{ literal: ... }}"
                    ))
                })?;
                Ok(ValueTemplate::Template(Template::parse(&text)?))
            }
        }
    }
}

impl RawStatement {
    pub(crate) fn into_def(self, context: &str) -> Result<StatementDef, ConfigError> {
        let property = non_empty(self.property, &format!("{context}: statement property"))?;
        let context = format!("{context}, statement '{property}'");
        let value = self.value.into_template(&context)?;
        let rank = self
            .rank
            .map(|rank| rank.parse::<Rank>())
            .transpose()
            .map_err(|err| ConfigError::new(format!("{context}: {err}")))?;
        Ok(StatementDef {
            qualifiers: snak_defs(self.qualifiers, &context, "qualifier")?,
            references: snak_defs(self.references, &context, "reference")?,
            rank,
            ..StatementDef::new(property, value)
        })
    }
}

fn snak_defs(
    raw: Vec<RawQualifier>,
    context: &str,
    what: &str,
) -> Result<Vec<QualifierDef>, ConfigError> {
    raw.into_iter()
        .map(|q| {
            let property = non_empty(q.property, &format!("{context}: {what} property"))?;
            let value = q.value.into_template(&format!("{context}, {what} '{property}'"))?;
            Ok(QualifierDef { property, value })
        })
        .collect()
}

pub(crate) fn non_empty(value: String, what: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ConfigError::new(format!("{what} must not be empty")))
    } else {
        Ok(trimmed.to_string())
    }
}

fn clean_aliases(aliases: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    aliases
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty() && seen.insert(a.clone()))
        .collect()
}

impl RawSchema {
    fn validate(self) -> Result<SchemaDescription, ConfigError> {
        let language = non_empty(self.language, "schema language")?;

        let mut labels = HashSet::new();
        let mut properties = Vec::with_capacity(self.properties.len());
        for raw in self.properties {
            let label = non_empty(raw.label, "property label")?;
            if !labels.insert(label.clone()) {
                return Err(ConfigError::new(format!("property '{label}' is declared twice")));
            }
            let datatype = raw
                .datatype
                .parse::<Datatype>()
                .map_err(|err| ConfigError::new(format!("property '{label}': {err}")))?;
            properties.push(PropertyDef {
                label,
                description: raw.description.trim().to_string(),
                datatype,
                aliases: clean_aliases(raw.aliases),
                language: language.clone(),
            });
        }

        let mut labels = HashSet::new();
        let mut items = Vec::with_capacity(self.items.len());
        for raw in self.items {
            let label = non_empty(raw.label, "item label")?;
            if !labels.insert(label.clone()) {
                return Err(ConfigError::new(format!("item '{label}' is declared twice")));
            }
            let context = format!("item '{label}'");
            let statements = raw
                .statements
                .into_iter()
                .map(|s| s.into_def(&context))
                .collect::<Result<Vec<_>, _>>()?;
            // Schema statements have no row to render against.
            if let Some(template) = statements
                .iter()
                .flat_map(StatementDef::templates)
                .find(|t| t.has_placeholders())
            {
                return Err(ConfigError::new(format!(
                    "{context}: placeholder in '{template}' is not allowed in a schema statement"
                )));
            }
            items.push(ItemDef {
                label,
                description: raw.description.trim().to_string(),
                aliases: clean_aliases(raw.aliases),
                language: language.clone(),
                statements,
            });
        }

        Ok(SchemaDescription {
            namespace: self.namespace,
            language,
            properties,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
language: es
properties:
  - label: región
    description: Región administrativa
    datatype: wikibase-item
    aliases: [region, " region "]
  - label: matrícula
    datatype: quantity
items:
  - label: comuna
    description: División administrativa
    statements:
      - property: región
        value: { item: Maule }
        qualifiers:
          - property: matrícula
            value: 3
        references:
          - property: fuente
            value: https://www.bcn.cl
        rank: preferred
"#;

    #[test]
    fn parses_properties_items_and_statements() {
        let schema = SchemaDescription::parse(SCHEMA).unwrap();
        assert_eq!(schema.language, "es");
        assert_eq!(schema.properties.len(), 2);
        assert_eq!(schema.properties[0].datatype, Datatype::WikibaseItem);
        assert_eq!(schema.properties[0].aliases, ["region"]);
        let item = &schema.items[0];
        assert_eq!(item.language, "es");
        assert!(matches!(item.statements[0].value, ValueTemplate::ItemLabel(_)));
        assert_eq!(item.statements[0].qualifiers[0].property, "matrícula");
        assert_eq!(item.statements[0].references[0].property, "fuente");
        assert_eq!(item.statements[0].rank, Some(Rank::Preferred));
    }

    #[test]
    fn unknown_rank_is_a_config_error() {
        let err = SchemaDescription::parse(
            "items:\n  - label: a\n    statements:\n      - {property: p, value: x, rank: top}\n",
        )
        .unwrap_err();
        assert!(err.message().contains("unknown rank 'top'"));
    }

    #[test]
    fn unknown_datatype_is_a_config_error() {
        let err = SchemaDescription::parse(
            "properties:\n  - label: x\n    datatype: colour\n",
        )
        .unwrap_err();
        assert!(err.message().contains("unknown datatype 'colour'"));
    }

    #[test]
    fn placeholders_are_rejected_in_schema_statements() {
        let err = SchemaDescription::parse(concat!(
            "items:\n  - label: a\n    statements:\n",
            "      - property: p\n        value: \"{COL}\"\n",
        ))
        .unwrap_err();
        assert!(err.message().contains("not allowed in a schema statement"));
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let err = SchemaDescription::parse(
            "properties:\n  - {label: a, datatype: string}\n  - {label: a, datatype: url}\n",
        )
        .unwrap_err();
        assert!(err.message().contains("declared twice"));
    }
}
