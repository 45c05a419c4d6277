use std::{fmt, path::PathBuf, str::FromStr};

use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;
use crate::template::Template;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Accepts `Q123` (case-sensitive) and nothing else.
    pub fn parse_item(text: &str) -> Option<Self> {
        let digits = text.strip_prefix('Q')?;
        if !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit()) {
            Some(Self(text.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn numeric_id(&self) -> Option<u64> {
        self.0.get(1..).and_then(|digits| digits.parse().ok())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Property,
    Item,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Property => "property",
            EntityKind::Item => "item",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datatype {
    #[serde(rename = "wikibase-item", alias = "item")]
    WikibaseItem,
    #[serde(rename = "quantity")]
    Quantity,
    #[serde(rename = "time")]
    Time,
    #[serde(rename = "globe-coordinate", alias = "globecoordinate")]
    GlobeCoordinate,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "url")]
    Url,
    #[serde(rename = "external-id")]
    ExternalId,
}

impl Datatype {
    /// The datatype identifier used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Datatype::WikibaseItem => "wikibase-item",
            Datatype::Quantity => "quantity",
            Datatype::Time => "time",
            Datatype::GlobeCoordinate => "globe-coordinate",
            Datatype::String => "string",
            Datatype::Url => "url",
            Datatype::ExternalId => "external-id",
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Datatype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "wikibase-item" | "item" => Ok(Datatype::WikibaseItem),
            "quantity" => Ok(Datatype::Quantity),
            "time" => Ok(Datatype::Time),
            "globe-coordinate" | "globecoordinate" => Ok(Datatype::GlobeCoordinate),
            "string" => Ok(Datatype::String),
            "url" => Ok(Datatype::Url),
            "external-id" => Ok(Datatype::ExternalId),
            other => Err(format!("unknown datatype '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
    pub label: String,
    pub description: String,
    pub datatype: Datatype,
    pub aliases: Vec<String>,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemDef {
    pub label: String,
    pub description: String,
    pub aliases: Vec<String>,
    pub language: String,
    pub statements: Vec<StatementDef>,
}

/// Where a statement's value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueTemplate {
    /// Rendered against the row. For item-reference properties the rendered
    /// text is an item label.
    Template(Template),
    /// Explicit by-label item reference.
    ItemLabel(Template),
    /// Taken verbatim, never rendered.
    Literal(String),
}

impl ValueTemplate {
    pub fn templates(&self) -> impl Iterator<Item = &Template> {
        match self {
            ValueTemplate::Template(t) | ValueTemplate::ItemLabel(t) => Some(t),
            ValueTemplate::Literal(_) => None,
        }
        .into_iter()
    }
}

/// A qualifier or reference snak of a [`StatementDef`].
#[derive(Debug, Clone, PartialEq)]
pub struct QualifierDef {
    pub property: String,
    pub value: ValueTemplate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementDef {
    pub property: String,
    pub value: ValueTemplate,
    pub qualifiers: Vec<QualifierDef>,
    /// Snaks of a single reference block.
    pub references: Vec<QualifierDef>,
    pub rank: Option<Rank>,
}

impl StatementDef {
    pub fn new(property: impl Into<String>, value: ValueTemplate) -> Self {
        Self {
            property: property.into(),
            value,
            qualifiers: Vec::new(),
            references: Vec::new(),
            rank: None,
        }
    }

    pub fn templates(&self) -> impl Iterator<Item = &Template> {
        self.value.templates().chain(
            self.qualifiers
                .iter()
                .chain(self.references.iter())
                .flat_map(|q| q.value.templates()),
        )
    }
}

/// Template half of an identity snak: the property label and the value template.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityTemplate {
    pub property: String,
    pub value: Template,
}

/// A resolved identity snak, used to discover whether an item already exists.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentitySnak {
    pub property: EntityId,
    pub datatype: Datatype,
    pub value: Value,
}

impl IdentitySnak {
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::statement(&self.property, &self.value.identity_key())
    }

    /// The statement a newly created item carries so later lookups find it.
    pub fn to_statement(&self) -> Statement {
        Statement::new(Snak {
            property: self.property.clone(),
            datatype: self.datatype,
            value: self.value.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    /// Statements on governed properties are replaced by the computed set.
    ReplaceAll,
    /// Matching statements are updated in place, others appended.
    AppendOrReplace,
    /// Only properties the item has no statements for are written.
    Keep,
    /// Every computed statement is appended.
    ForceAppend,
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpdateAction::ReplaceAll => "replace_all",
            UpdateAction::AppendOrReplace => "append_or_replace",
            UpdateAction::Keep => "keep",
            UpdateAction::ForceAppend => "force_append",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappingRule {
    pub label: Template,
    pub identity: IdentityTemplate,
    pub description: Option<Template>,
    pub aliases: Vec<Template>,
    pub statements: Vec<StatementDef>,
    pub update_action: Option<UpdateAction>,
}

impl MappingRule {
    /// Every template the rule renders, in evaluation order.
    pub fn templates(&self) -> impl Iterator<Item = &Template> {
        std::iter::once(&self.label)
            .chain(std::iter::once(&self.identity.value))
            .chain(self.description.iter())
            .chain(self.aliases.iter())
            .chain(self.statements.iter().flat_map(StatementDef::templates))
    }
}

#[derive(Debug, Clone)]
pub struct CsvFileMapping {
    pub path: PathBuf,
    pub encoding: &'static Encoding,
    pub delimiter: u8,
    pub decimal_separator: char,
    pub language: String,
    pub update_action: UpdateAction,
    pub rules: Vec<MappingRule>,
}

impl CsvFileMapping {
    pub fn action_for(&self, rule: &MappingRule) -> UpdateAction {
        rule.update_action.unwrap_or(self.update_action)
    }
}

/// A (property, value) pair: a statement's main snak, one of its qualifiers,
/// or part of a reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Snak {
    pub property: EntityId,
    pub datatype: Datatype,
    pub value: Value,
}

/// Order-independent set equality on (property, value).
fn same_snaks(a: &[Snak], b: &[Snak]) -> bool {
    let covers = |a: &[Snak], b: &[Snak]| {
        a.iter()
            .all(|q| b.iter().any(|o| o.property == q.property && o.value == q.value))
    };
    covers(a, b) && covers(b, a)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Preferred,
    #[default]
    Normal,
    Deprecated,
}

impl Rank {
    pub fn as_str(self) -> &'static str {
        match self {
            Rank::Preferred => "preferred",
            Rank::Normal => "normal",
            Rank::Deprecated => "deprecated",
        }
    }
}

impl FromStr for Rank {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "preferred" => Ok(Rank::Preferred),
            "normal" => Ok(Rank::Normal),
            "deprecated" => Ok(Rank::Deprecated),
            other => Err(format!("unknown rank '{other}'")),
        }
    }
}

/// One reference block. `hash` is set on references read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub hash: Option<String>,
    pub snaks: Vec<Snak>,
}

impl Reference {
    pub fn new(snaks: Vec<Snak>) -> Self {
        Self { hash: None, snaks }
    }

    pub fn same_snaks(&self, other: &Reference) -> bool {
        same_snaks(&self.snaks, &other.snaks)
    }
}

/// A fully resolved statement, ready to be written.
///
/// `rank: None` leaves the rank to the store: normal on creation, unchanged
/// on update.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub main: Snak,
    pub qualifiers: Vec<Snak>,
    pub references: Vec<Reference>,
    pub rank: Option<Rank>,
}

impl Statement {
    pub fn new(main: Snak) -> Self {
        Self {
            main,
            qualifiers: Vec::new(),
            references: Vec::new(),
            rank: None,
        }
    }

    pub fn property(&self) -> &EntityId {
        &self.main.property
    }

    pub fn same_qualifiers(&self, other: &Statement) -> bool {
        same_snaks(&self.qualifiers, &other.qualifiers)
    }

    /// Same property, value and qualifier set.
    pub fn same_content(&self, other: &Statement) -> bool {
        self.main.property == other.main.property
            && self.main.value == other.main.value
            && self.same_qualifiers(other)
    }

    /// Whether `existing` already says what `self` says: same content, the
    /// requested rank if any, and every requested reference.
    pub fn is_satisfied_by(&self, existing: &Statement) -> bool {
        self.same_content(existing)
            && self.rank.is_none_or(|rank| existing.rank.unwrap_or_default() == rank)
            && self
                .references
                .iter()
                .all(|r| existing.references.iter().any(|e| e.same_snaks(r)))
    }

    /// `self` written over `existing`: references already on `existing` are
    /// kept, and so is its rank unless `self` names one.
    pub fn carried_onto(&self, existing: &Statement) -> Statement {
        let mut references = existing.references.clone();
        for reference in &self.references {
            if !references.iter().any(|r| r.same_snaks(reference)) {
                references.push(reference.clone());
            }
        }
        Statement {
            main: self.main.clone(),
            qualifiers: self.qualifiers.clone(),
            references,
            rank: self.rank.or(existing.rank),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStatement {
    pub id: String,
    pub statement: Statement,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub label: String,
    pub description: String,
    pub aliases: Vec<String>,
    /// Set for properties only.
    pub datatype: Option<Datatype>,
    pub statements: Vec<RemoteStatement>,
}

impl RemoteEntity {
    pub fn statements_for<'a>(
        &'a self,
        property: &'a EntityId,
    ) -> impl Iterator<Item = &'a RemoteStatement> + 'a {
        self.statements
            .iter()
            .filter(move |s| s.statement.property() == property)
    }
}

/// One statement-level change sent to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Create(Statement),
    Update { id: String, statement: Statement },
    Delete { id: String },
}

impl Operation {
    pub fn describe(&self) -> String {
        match self {
            Operation::Create(statement) => format!(
                "create {} = {}",
                statement.main.property, statement.main.value
            ),
            Operation::Update { id, statement } => {
                format!("update {id} to {}", statement.main.value)
            }
            Operation::Delete { id } => format!("delete {id}"),
        }
    }
}
