use log::debug;

use crate::{
    cache::{CacheKey, EntityCache, SharedEntity, share},
    error::{GatewayError, RowError, UnresolvedReferenceError},
    gateway::EntityGateway,
    model::{
        Datatype, EntityId, EntityKind, QualifierDef, Reference, Snak, Statement, StatementDef,
        ValueTemplate,
    },
    rows::Row,
    value::{Value, ValueError},
};

/// Resolves entities by label, fetching each (kind, label, language) from
/// the gateway at most once per run.
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    gateway: &'a dyn EntityGateway,
    cache: &'a EntityCache,
}

/// A property's id and datatype, copied out of the shared entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRef {
    pub id: EntityId,
    pub datatype: Datatype,
}

impl<'a> Resolver<'a> {
    pub fn new(gateway: &'a dyn EntityGateway, cache: &'a EntityCache) -> Self {
        Self { gateway, cache }
    }

    pub fn gateway(&self) -> &'a dyn EntityGateway {
        self.gateway
    }

    pub fn cache(&self) -> &'a EntityCache {
        self.cache
    }

    pub fn by_label(
        &self,
        kind: EntityKind,
        label: &str,
        language: &str,
    ) -> Result<Option<SharedEntity>, GatewayError> {
        let key = CacheKey::label(kind, label, language);
        self.cache.resolve_or_fetch(&key, || {
            debug!("Looking up {key}");
            Ok(self.gateway.find_entity(kind, label, language)?.map(share))
        })
    }

    /// `None` when no property has this label, or it carries no datatype.
    pub fn property(
        &self,
        label: &str,
        language: &str,
    ) -> Result<Option<PropertyRef>, GatewayError> {
        Ok(self
            .by_label(EntityKind::Property, label, language)?
            .and_then(|shared| {
                let entity = shared.lock();
                entity.datatype.map(|datatype| PropertyRef {
                    id: entity.id.clone(),
                    datatype,
                })
            }))
    }

    pub fn item_id(&self, label: &str, language: &str) -> Result<Option<EntityId>, GatewayError> {
        Ok(self
            .by_label(EntityKind::Item, label, language)?
            .map(|shared| shared.lock().id.clone()))
    }

    /// Builds one statement against `row`. `Ok(None)` means the main value
    /// rendered empty and the statement is skipped; empty qualifier and
    /// reference snaks are dropped the same way.
    pub fn build_statement(
        &self,
        def: &StatementDef,
        row: &Row,
        language: &str,
        decimal_separator: char,
    ) -> Result<Option<Statement>, RowError> {
        let main = self.build_snak(&def.property, &def.value, row, language, decimal_separator)?;
        let Some(main) = main else {
            return Ok(None);
        };
        let qualifiers = self.build_snaks(&def.qualifiers, row, language, decimal_separator)?;
        let reference = self.build_snaks(&def.references, row, language, decimal_separator)?;
        Ok(Some(Statement {
            main,
            qualifiers,
            references: if reference.is_empty() {
                Vec::new()
            } else {
                vec![Reference::new(reference)]
            },
            rank: def.rank,
        }))
    }

    fn build_snaks(
        &self,
        defs: &[QualifierDef],
        row: &Row,
        language: &str,
        decimal_separator: char,
    ) -> Result<Vec<Snak>, RowError> {
        let mut snaks = Vec::with_capacity(defs.len());
        for def in defs {
            snaks.extend(self.build_snak(
                &def.property,
                &def.value,
                row,
                language,
                decimal_separator,
            )?);
        }
        Ok(snaks)
    }

    fn build_snak(
        &self,
        property_label: &str,
        template: &ValueTemplate,
        row: &Row,
        language: &str,
        decimal_separator: char,
    ) -> Result<Option<Snak>, RowError> {
        let text = match template {
            ValueTemplate::Template(t) | ValueTemplate::ItemLabel(t) => t.render(row)?,
            ValueTemplate::Literal(text) => text.clone(),
        };
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let property = self
            .property(property_label, language)?
            .ok_or_else(|| RowError::UnknownProperty(property_label.to_string()))?;

        let value = match (property.datatype, template) {
            (Datatype::WikibaseItem, ValueTemplate::Literal(_))
                if EntityId::parse_item(text).is_some() =>
            {
                Value::parse(text, Datatype::WikibaseItem, decimal_separator)?
            }
            (Datatype::WikibaseItem, _) => {
                let id = self
                    .item_id(text, language)
                    .map_err(|err| reference_error(err, property_label, text))?
                    .ok_or_else(|| UnresolvedReferenceError {
                        property: property_label.to_string(),
                        label: text.to_string(),
                    })?;
                Value::Item(id)
            }
            (datatype, ValueTemplate::ItemLabel(_)) => {
                return Err(ValueError::new(
                    datatype,
                    text,
                    format!("property '{property_label}' does not take item references"),
                )
                .into());
            }
            (datatype, _) => Value::parse(text, datatype, decimal_separator)?,
        };
        Ok(Some(Snak {
            property: property.id,
            datatype: property.datatype,
            value,
        }))
    }
}

/// Several items sharing a referenced label leave the reference unresolved.
fn reference_error(err: GatewayError, property: &str, label: &str) -> RowError {
    match err {
        GatewayError::Ambiguous { candidates, .. } => {
            debug!(
                "Reference '{label}' for '{property}' matches {} items",
                candidates.len()
            );
            RowError::Reference(UnresolvedReferenceError {
                property: property.to_string(),
                label: label.to_string(),
            })
        }
        other => RowError::Gateway(other),
    }
}
