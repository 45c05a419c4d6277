use std::{fmt, fs, path::Path};

use serde::Serialize;

use crate::{
    error::{GatewayError, RowError, SyncError},
    model::EntityId,
    table,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Created,
    Updated,
    Unchanged,
    Failed,
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RowStatus::Created => "created",
            RowStatus::Updated => "updated",
            RowStatus::Unchanged => "unchanged",
            RowStatus::Failed => "failed",
        })
    }
}

/// What happened to one CSV row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowOutcome {
    pub row: usize,
    pub status: RowStatus,
    /// Failed, but at least one entity was still written.
    pub partial: bool,
    /// Items the row resolved to, one per mapping rule that got that far.
    pub entities: Vec<EntityId>,
    pub errors: Vec<RowError>,
}

impl RowOutcome {
    pub fn failed(row: usize, error: RowError) -> Self {
        Self {
            row,
            status: RowStatus::Failed,
            partial: false,
            entities: Vec::new(),
            errors: vec![error],
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == RowStatus::Failed
    }

    pub fn reason(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// The authentication failure among this row's errors, if any.
    pub fn auth_failure(&self) -> Option<&GatewayError> {
        self.errors.iter().find_map(|err| match err {
            RowError::Gateway(gateway) if gateway.is_auth() => Some(gateway),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub row: usize,
    pub partial: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub rows: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl RowCounts {
    fn add(&mut self, other: &RowCounts) {
        self.rows += other.rows;
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }

    fn cells(&self) -> [String; 5] {
        [
            self.rows.to_string(),
            self.created.to_string(),
            self.updated.to_string(),
            self.unchanged.to_string(),
            self.failed.to_string(),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileReport {
    pub path: String,
    #[serde(flatten)]
    pub counts: RowCounts,
    pub failures: Vec<RowFailure>,
}

impl FileReport {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.display().to_string(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: &RowOutcome) {
        self.counts.rows += 1;
        match outcome.status {
            RowStatus::Created => self.counts.created += 1,
            RowStatus::Updated => self.counts.updated += 1,
            RowStatus::Unchanged => self.counts.unchanged += 1,
            RowStatus::Failed => {
                self.counts.failed += 1;
                self.failures.push(RowFailure {
                    row: outcome.row,
                    partial: outcome.partial,
                    reason: outcome.reason(),
                });
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub mapping: String,
    pub files: Vec<FileReport>,
}

impl RunReport {
    pub fn new(mapping: &str) -> Self {
        Self {
            mapping: mapping.to_string(),
            files: Vec::new(),
        }
    }

    pub fn totals(&self) -> RowCounts {
        let mut totals = RowCounts::default();
        for file in &self.files {
            totals.add(&file.counts);
        }
        totals
    }

    pub fn has_failures(&self) -> bool {
        self.totals().failed > 0
    }

    pub fn write_json(&self, path: &Path) -> Result<(), SyncError> {
        let io_error = |source| SyncError::Io {
            path: path.display().to_string(),
            source,
        };
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| io_error(std::io::Error::other(err)))?;
        fs::write(path, json + "\n").map_err(io_error)
    }

    /// One line per file plus a total, then the first `max_failures` failures.
    pub fn render_summary(&self, max_failures: usize) -> String {
        let headers = ["file", "rows", "created", "updated", "unchanged", "failed"];
        let mut rows: Vec<Vec<String>> = self
            .files
            .iter()
            .map(|file| {
                std::iter::once(file.path.clone())
                    .chain(file.counts.cells())
                    .collect()
            })
            .collect();
        if self.files.len() > 1 {
            rows.push(
                std::iter::once("total".to_string())
                    .chain(self.totals().cells())
                    .collect(),
            );
        }
        let mut output = table::render_table(&headers, &rows);

        let failures: Vec<Vec<String>> = self
            .files
            .iter()
            .flat_map(|file| {
                file.failures.iter().map(move |failure| {
                    vec![
                        file.path.clone(),
                        failure.row.to_string(),
                        if failure.partial { "partial" } else { "failed" }.to_string(),
                        failure.reason.clone(),
                    ]
                })
            })
            .take(max_failures)
            .collect();
        if !failures.is_empty() {
            output.push('\n');
            output.push_str(&table::render_table(&["file", "row", "status", "reason"], &failures));
            let total = self.totals().failed;
            if total > failures.len() {
                output.push_str(&format!(
                    "... {} more failure(s), see the JSON report\n",
                    total - failures.len()
                ));
            }
        }
        output
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl EntityCounts {
    pub fn changed(&self) -> usize {
        self.created + self.updated
    }
}

impl fmt::Display for EntityCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} unchanged",
            self.created, self.updated, self.unchanged
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub properties: EntityCounts,
    pub items: EntityCounts,
}

impl SchemaReport {
    pub fn render_summary(&self) -> String {
        let rows = [("properties", self.properties), ("items", self.items)]
            .into_iter()
            .map(|(kind, counts)| {
                vec![
                    kind.to_string(),
                    counts.created.to_string(),
                    counts.updated.to_string(),
                    counts.unchanged.to_string(),
                ]
            })
            .collect::<Vec<_>>();
        table::render_table(&["kind", "created", "updated", "unchanged"], &rows)
    }
}
