use std::collections::VecDeque;

use log::{debug, info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};

use crate::{
    cache::{CacheKey, EntityCache, SharedEntity, share},
    error::{GatewayError, IdentityAmbiguityError, RowError, SyncError, UnresolvedPlaceholderError},
    gateway::{EntityDraft, EntityGateway, EntityPatch},
    mapping::MappingDescription,
    merge::merge,
    model::{CsvFileMapping, EntityId, EntityKind, IdentitySnak, MappingRule},
    report::{FileReport, RowOutcome, RowStatus, RunReport},
    resolve::Resolver,
    rows::{CsvRows, Row, RowReadError},
    value::Value,
};

/// Rows pulled per worker before a batch is handed to the pool.
const ROWS_PER_WORKER: usize = 8;

/// Maps the rows of one CSV file.
pub struct RowMapper<'a> {
    resolver: Resolver<'a>,
    file: &'a CsvFileMapping,
}

#[derive(Debug, Default)]
struct RuleOutcome {
    entity: Option<EntityId>,
    created: bool,
    changed: bool,
    errors: Vec<RowError>,
}

/// Everything a rule renders from the row, before any remote call.
struct Rendered {
    label: String,
    identity: String,
    description: Option<String>,
    aliases: Vec<String>,
}

impl<'a> RowMapper<'a> {
    pub fn new(
        gateway: &'a dyn EntityGateway,
        cache: &'a EntityCache,
        file: &'a CsvFileMapping,
    ) -> Self {
        Self {
            resolver: Resolver::new(gateway, cache),
            file,
        }
    }

    /// Lazily maps `rows`, `pool.current_num_threads() * 8` rows at a time.
    /// On an authentication failure, yields the completed rows of that batch,
    /// then `Err` once, and then stops.
    pub fn process<'m, I>(
        &'m self,
        rows: I,
        pool: &'m ThreadPool,
    ) -> RowOutcomes<'m, 'a, I::IntoIter>
    where
        I: IntoIterator<Item = Result<Row, RowReadError>>,
    {
        RowOutcomes {
            mapper: self,
            rows: rows.into_iter(),
            pool,
            batch_size: pool.current_num_threads().max(1) * ROWS_PER_WORKER,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Maps one row through every rule. Only an authentication failure is
    /// returned as `Err`; everything else is recorded in the outcome.
    pub fn map_row(&self, row: &Row) -> Result<RowOutcome, SyncError> {
        let mut outcome = RowOutcome {
            row: row.index,
            status: RowStatus::Unchanged,
            partial: false,
            entities: Vec::new(),
            errors: Vec::new(),
        };
        let mut created = false;
        let mut changed = false;
        for rule in &self.file.rules {
            let result = self.apply_rule(rule, row);
            created |= result.created;
            changed |= result.changed;
            outcome.entities.extend(result.entity);
            outcome.errors.extend(result.errors);
        }
        if let Some(auth) = outcome.auth_failure() {
            return Err(auth.clone().into());
        }

        outcome.status = if !outcome.errors.is_empty() {
            outcome.partial = created || changed;
            RowStatus::Failed
        } else if created {
            RowStatus::Created
        } else if changed {
            RowStatus::Updated
        } else {
            RowStatus::Unchanged
        };
        if outcome.is_failed() {
            warn!("Row {} failed: {}", row.index, outcome.reason());
        } else {
            debug!("Row {} {}", row.index, outcome.status);
        }
        Ok(outcome)
    }

    fn apply_rule(&self, rule: &MappingRule, row: &Row) -> RuleOutcome {
        let mut outcome = RuleOutcome::default();
        if let Err(err) = self.try_apply_rule(rule, row, &mut outcome) {
            outcome.errors.push(err);
        }
        outcome
    }

    fn try_apply_rule(
        &self,
        rule: &MappingRule,
        row: &Row,
        outcome: &mut RuleOutcome,
    ) -> Result<(), RowError> {
        let rendered = render_rule(rule, row)?;
        let shared = self.resolve_item(rule, &rendered, outcome)?;

        let language = self.file.language.as_str();
        let mut computed = Vec::with_capacity(rule.statements.len());
        for def in &rule.statements {
            match self
                .resolver
                .build_statement(def, row, language, self.file.decimal_separator)
            {
                Ok(statement) => computed.extend(statement),
                Err(RowError::Gateway(err)) if err.is_auth() => return Err(err.into()),
                Err(err) => {
                    debug!("Row {}: dropping statement '{}': {err}", row.index, def.property);
                    outcome.errors.push(err);
                }
            }
        }

        let gateway = self.resolver.gateway();
        let mut entity = shared.lock();
        let mut patch = EntityPatch::new(language);
        if let Some(description) = rendered.description {
            if entity.description != description {
                patch.description = Some(description);
            }
        }
        patch.add_aliases = rendered
            .aliases
            .into_iter()
            .filter(|a| !entity.aliases.contains(a))
            .collect();
        if !patch.is_empty() {
            gateway.update_entity(&entity.id, &patch)?;
            patch.apply_to(&mut entity);
            outcome.changed = true;
        }

        let ops = merge(&entity.statements, &computed, self.file.action_for(rule));
        if ops.is_empty() {
            return Ok(());
        }
        let result = gateway.apply_statement_ops(&entity.id, &ops)?;
        if result.failed.len() < ops.len() {
            outcome.changed = true;
        }
        if let Some(statements) = result.statements {
            entity.statements = statements;
        }
        for failed in result.failed {
            outcome.errors.push(RowError::Gateway(GatewayError::Rejected(format!(
                "{} on {}: {}",
                failed.operation.describe(),
                entity.id,
                failed.reason
            ))));
        }
        Ok(())
    }

    /// Finds the item holding the rendered identity snak, or creates it.
    fn resolve_item(
        &self,
        rule: &MappingRule,
        rendered: &Rendered,
        outcome: &mut RuleOutcome,
    ) -> Result<SharedEntity, RowError> {
        let language = self.file.language.as_str();
        let property = self
            .resolver
            .property(&rule.identity.property, language)?
            .ok_or_else(|| RowError::UnknownProperty(rule.identity.property.clone()))?;
        let identity = IdentitySnak {
            value: Value::parse(
                &rendered.identity,
                property.datatype,
                self.file.decimal_separator,
            )?,
            property: property.id,
            datatype: property.datatype,
        };
        let key = identity.cache_key();

        let gateway = self.resolver.gateway();
        let mut created = false;
        let found = self
            .resolver
            .cache()
            .resolve_or_fetch(&key, || -> Result<_, GatewayError> {
                if let Some(existing) =
                    gateway.find_entity_by_statement(&identity.property, &identity.value, language)?
                {
                    return Ok(Some(share(existing)));
                }
                // One edit: the item never exists without its identity statement.
                let mut draft = EntityDraft::item(&rendered.label, language);
                draft.description = rendered.description.clone().unwrap_or_default();
                draft.aliases = rendered.aliases.clone();
                draft.statements.push(identity.to_statement());
                let entity = gateway.create_entity(&draft)?;
                info!("Created item {} '{}'", entity.id, rendered.label);
                created = true;
                Ok(Some(share(entity)))
            })
            .map_err(|err| match err {
                GatewayError::Ambiguous { candidates, .. } => {
                    RowError::Ambiguity(IdentityAmbiguityError {
                        property: rule.identity.property.clone(),
                        value: rendered.identity.clone(),
                        candidates,
                    })
                }
                other => RowError::Gateway(other),
            })?
            .ok_or_else(|| {
                RowError::Gateway(GatewayError::Rejected(format!(
                    "identity lookup for {key} returned nothing"
                )))
            })?;

        if created {
            self.resolver.cache().put(
                CacheKey::label(EntityKind::Item, &rendered.label, language),
                found.clone(),
            );
        }
        outcome.entity = Some(found.lock().id.clone());
        outcome.created = created;
        Ok(found)
    }
}

fn render_rule(rule: &MappingRule, row: &Row) -> Result<Rendered, RowError> {
    // Every template is checked up front so a missing column never leaves a
    // half-written item behind.
    for template in rule.templates() {
        if let Some(column) = template.columns().find(|c| row.get(c).is_none()) {
            return Err(UnresolvedPlaceholderError {
                column: column.to_string(),
                template: template.to_string(),
            }
            .into());
        }
    }
    let label = rule.label.render(row)?.trim().to_string();
    if label.is_empty() {
        return Err(RowError::Blank(format!("label '{}'", rule.label)));
    }
    let identity = rule.identity.value.render(row)?.trim().to_string();
    if identity.is_empty() {
        return Err(RowError::Blank(format!(
            "identity '{}' ({})",
            rule.identity.value, rule.identity.property
        )));
    }
    let description = match &rule.description {
        Some(template) => Some(template.render(row)?.trim().to_string()).filter(|d| !d.is_empty()),
        None => None,
    };
    let mut aliases: Vec<String> = Vec::with_capacity(rule.aliases.len());
    for template in &rule.aliases {
        let alias = template.render(row)?.trim().to_string();
        if !alias.is_empty() && alias != label && !aliases.contains(&alias) {
            aliases.push(alias);
        }
    }
    Ok(Rendered {
        label,
        identity,
        description,
        aliases,
    })
}

/// Lazy sequence of row outcomes; see [`RowMapper::process`].
pub struct RowOutcomes<'m, 'a, I> {
    mapper: &'m RowMapper<'a>,
    rows: I,
    pool: &'m ThreadPool,
    batch_size: usize,
    pending: VecDeque<Result<RowOutcome, SyncError>>,
    finished: bool,
}

impl<I> Iterator for RowOutcomes<'_, '_, I>
where
    I: Iterator<Item = Result<Row, RowReadError>>,
{
    type Item = Result<RowOutcome, SyncError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.pending.is_empty() {
            let batch: Vec<_> = self.rows.by_ref().take(self.batch_size).collect();
            if batch.is_empty() {
                self.finished = true;
                return None;
            }
            let mapper = self.mapper;
            let results: Vec<_> = self.pool.install(|| {
                batch
                    .par_iter()
                    .map(|row| match row {
                        Ok(row) => mapper.map_row(row),
                        Err(err) => Ok(RowOutcome::failed(
                            err.index,
                            RowError::Read(err.message.clone()),
                        )),
                    })
                    .collect()
            });
            // Rows of the batch that completed still wrote remotely, so they
            // are reported before an authentication failure ends the stream.
            let mut auth_failure = None;
            for result in results {
                match result {
                    Ok(outcome) => self.pending.push_back(Ok(outcome)),
                    Err(err) => {
                        auth_failure.get_or_insert(err);
                    }
                }
            }
            if let Some(err) = auth_failure {
                self.pending.push_back(Err(err));
            }
        }
        let next = self.pending.pop_front()?;
        if next.is_err() {
            self.finished = true;
        }
        Some(next)
    }
}

/// Runs a whole mapping: files in declaration order, rows of each file in
/// parallel.
pub struct MappingRunner<'a> {
    gateway: &'a dyn EntityGateway,
    cache: &'a EntityCache,
    pool: ThreadPool,
}

impl<'a> MappingRunner<'a> {
    pub fn new(
        gateway: &'a dyn EntityGateway,
        cache: &'a EntityCache,
        workers: usize,
    ) -> Result<Self, SyncError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|idx| format!("wikibase-bulk-row-{idx}"))
            .build()?;
        Ok(Self {
            gateway,
            cache,
            pool,
        })
    }

    pub fn run(&self, mapping: &MappingDescription) -> Result<RunReport, SyncError> {
        let mut report = RunReport::new(&mapping.name);
        for file in &mapping.files {
            info!("Mapping {:?} ({})", file.path, file.update_action);
            let rows = CsvRows::open(file)?;
            let file_report = self.run_file(file, rows)?;
            info!(
                "Finished {:?}: {} row(s), {} created, {} updated, {} unchanged, {} failed",
                file.path,
                file_report.counts.rows,
                file_report.counts.created,
                file_report.counts.updated,
                file_report.counts.unchanged,
                file_report.counts.failed
            );
            report.files.push(file_report);
        }
        Ok(report)
    }

    /// Maps `rows` as if they were read from `file`.
    pub fn run_file<I>(&self, file: &CsvFileMapping, rows: I) -> Result<FileReport, SyncError>
    where
        I: IntoIterator<Item = Result<Row, RowReadError>>,
    {
        let mapper = RowMapper::new(self.gateway, self.cache, file);
        let mut report = FileReport::new(&file.path);
        for outcome in mapper.process(rows, &self.pool) {
            match outcome {
                Ok(outcome) => report.record(&outcome),
                Err(err) => {
                    warn!(
                        "Stopped {:?} after {} row(s): {} created, {} updated, {} failed",
                        file.path,
                        report.counts.rows,
                        report.counts.created,
                        report.counts.updated,
                        report.counts.failed
                    );
                    return Err(err);
                }
            }
        }
        Ok(report)
    }
}
