use log::{debug, info};

use crate::{
    cache::{CacheKey, EntityCache, SharedEntity, share},
    error::{ConfigError, GatewayError, RowError, SyncError},
    gateway::{EntityDraft, EntityGateway, EntityPatch},
    merge::merge,
    model::{EntityKind, ItemDef, PropertyDef, RemoteEntity, UpdateAction},
    report::{EntityCounts, SchemaReport},
    resolve::Resolver,
    rows::Row,
    schema::SchemaDescription,
};

pub struct SchemaReconciler<'a> {
    resolver: Resolver<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Created,
    Updated,
    Unchanged,
}

impl EntityCounts {
    fn record(&mut self, change: Change) {
        match change {
            Change::Created => self.created += 1,
            Change::Updated => self.updated += 1,
            Change::Unchanged => self.unchanged += 1,
        }
    }
}

impl<'a> SchemaReconciler<'a> {
    pub fn new(gateway: &'a dyn EntityGateway, cache: &'a EntityCache) -> Self {
        Self {
            resolver: Resolver::new(gateway, cache),
        }
    }

    /// Properties first, then items. Items are created before any item
    /// statement is written, so schema items may reference each other in
    /// any order.
    pub fn sync(&self, schema: &SchemaDescription) -> Result<SchemaReport, SyncError> {
        let mut report = SchemaReport::default();
        for def in &schema.properties {
            let change = self.sync_property(def)?;
            report.properties.record(change);
        }

        let mut item_changes = Vec::with_capacity(schema.items.len());
        for def in &schema.items {
            item_changes.push(self.ensure_item(def)?);
        }
        for (def, (entity, change)) in schema.items.iter().zip(item_changes) {
            let wrote_statements = self.sync_item_statements(def, &entity)?;
            let change = match change {
                Change::Unchanged if wrote_statements => Change::Updated,
                other => other,
            };
            report.items.record(change);
        }

        info!(
            "Schema sync finished: properties {}, items {}",
            report.properties, report.items
        );
        Ok(report)
    }

    /// Looks `label` up once per run and creates it from `draft` when absent.
    fn ensure(
        &self,
        kind: EntityKind,
        draft: &EntityDraft,
    ) -> Result<(SharedEntity, bool), GatewayError> {
        let gateway = self.resolver.gateway();
        let cache = self.resolver.cache();
        let key = CacheKey::label(kind, &draft.label, &draft.language);
        let mut created = false;
        let found = cache.resolve_or_fetch(&key, || -> Result<_, GatewayError> {
            if let Some(existing) = gateway.find_entity(kind, &draft.label, &draft.language)? {
                return Ok(Some(share(existing)));
            }
            created = true;
            Ok(Some(share(gateway.create_entity(draft)?)))
        })?;
        match found {
            Some(entity) => Ok((entity, created)),
            // Recorded as absent earlier in this run.
            None => {
                let entity = share(gateway.create_entity(draft)?);
                cache.put(key, entity.clone());
                Ok((entity, true))
            }
        }
    }

    fn sync_property(&self, def: &PropertyDef) -> Result<Change, SyncError> {
        let mut draft = EntityDraft::property(&def.label, def.datatype, &def.language);
        draft.description = def.description.clone();
        draft.aliases = def.aliases.clone();
        let (shared, created) = self.ensure(EntityKind::Property, &draft)?;
        let mut entity = shared.lock();
        if created {
            info!("Created property {} '{}' ({})", entity.id, def.label, def.datatype);
            return Ok(Change::Created);
        }
        if entity.datatype != Some(def.datatype) {
            return Err(ConfigError::new(format!(
                "property '{}' exists as {} with datatype {}, but the schema declares {}",
                def.label,
                entity.id,
                entity
                    .datatype
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "none".to_string()),
                def.datatype
            ))
            .into());
        }
        let patch = term_patch(&entity, &def.description, &def.aliases, &def.language);
        if patch.is_empty() {
            debug!("Property '{}' is up to date ({})", def.label, entity.id);
            return Ok(Change::Unchanged);
        }
        self.resolver.gateway().update_entity(&entity.id, &patch)?;
        patch.apply_to(&mut entity);
        info!("Updated property {} '{}'", entity.id, def.label);
        Ok(Change::Updated)
    }

    fn ensure_item(&self, def: &ItemDef) -> Result<(SharedEntity, Change), SyncError> {
        let mut draft = EntityDraft::item(&def.label, &def.language);
        draft.description = def.description.clone();
        draft.aliases = def.aliases.clone();
        let (shared, created) = self.ensure(EntityKind::Item, &draft)?;
        if created {
            info!("Created item {} '{}'", shared.lock().id, def.label);
            return Ok((shared, Change::Created));
        }
        let change = {
            let mut entity = shared.lock();
            let patch = term_patch(&entity, &def.description, &def.aliases, &def.language);
            if patch.is_empty() {
                Change::Unchanged
            } else {
                self.resolver.gateway().update_entity(&entity.id, &patch)?;
                patch.apply_to(&mut entity);
                info!("Updated item {} '{}'", entity.id, def.label);
                Change::Updated
            }
        };
        Ok((shared, change))
    }

    /// Adds or updates the item's base statements; never deletes.
    fn sync_item_statements(
        &self,
        def: &ItemDef,
        shared: &SharedEntity,
    ) -> Result<bool, SyncError> {
        let empty = Row::empty();
        let mut computed = Vec::with_capacity(def.statements.len());
        for statement in &def.statements {
            let built = self
                .resolver
                .build_statement(statement, &empty, &def.language, '.')
                .map_err(|err| schema_statement_error(&def.label, err))?;
            computed.extend(built);
        }

        let mut entity = shared.lock();
        let ops = merge(&entity.statements, &computed, UpdateAction::AppendOrReplace);
        if ops.is_empty() {
            return Ok(false);
        }
        let result = self
            .resolver
            .gateway()
            .apply_statement_ops(&entity.id, &ops)?;
        if let Some(failed) = result.failed.first() {
            return Err(GatewayError::Rejected(format!(
                "item '{}' ({}): {} failed: {}",
                def.label,
                entity.id,
                failed.operation.describe(),
                failed.reason
            ))
            .into());
        }
        if let Some(statements) = result.statements {
            entity.statements = statements;
        }
        info!(
            "Wrote {} statement change(s) to item {} '{}'",
            ops.len(),
            entity.id,
            def.label
        );
        Ok(true)
    }
}

/// Description and alias changes needed for `entity` to match the schema.
/// An empty schema description leaves the remote one alone.
fn term_patch(
    entity: &RemoteEntity,
    description: &str,
    aliases: &[String],
    language: &str,
) -> EntityPatch {
    let mut patch = EntityPatch::new(language);
    if !description.is_empty() && entity.description != description {
        patch.description = Some(description.to_string());
    }
    patch.add_aliases = aliases
        .iter()
        .filter(|a| !entity.aliases.contains(a))
        .cloned()
        .collect();
    patch.remove_aliases = entity
        .aliases
        .iter()
        .filter(|a| !aliases.contains(a))
        .cloned()
        .collect();
    patch
}

fn schema_statement_error(item: &str, err: RowError) -> SyncError {
    match err {
        RowError::Reference(err) => SyncError::Reference(err),
        RowError::Value(err) => SyncError::Value(err),
        RowError::Gateway(err) => SyncError::Gateway(err),
        RowError::Ambiguity(err) => SyncError::Ambiguity(err),
        other => ConfigError::new(format!("item '{item}': {other}")).into(),
    }
}
