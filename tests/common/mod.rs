#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};
use wikibase_bulk::{
    cache::EntityCache,
    gateway::{EntityGateway, InMemoryGateway},
    mapper::RowMapper,
    mapping::MappingDescription,
    model::{EntityId, EntityKind, RemoteEntity, RemoteStatement},
    reconcile::SchemaReconciler,
    report::RowOutcome,
    rows::Row,
    schema::SchemaDescription,
};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }
}

pub const IDENTITY_PROPERTY: &str = "rol base de datos del establecimiento";

/// Properties and base items the school mappings rely on. `Talca` references
/// `comuna chilena`, which is declared after it.
pub const SCHOOL_SCHEMA: &str = r#"
namespace: directorio
language: es
properties:
  - label: rol base de datos del establecimiento
    description: RBD asignado por el Ministerio de Educación
    datatype: external-id
  - label: instancia de
    datatype: wikibase-item
  - label: comuna
    datatype: wikibase-item
  - label: matrícula
    datatype: quantity
items:
  - label: colegio
    description: Establecimiento educacional
  - label: Talca
    description: Comuna de Chile
    statements:
      - property: instancia de
        value: { item: comuna chilena }
  - label: comuna chilena
"#;

/// One rule per row: identity on the RBD, label from NOM_RBD, and two
/// statements ("instancia de" colegio, "comuna" by label).
pub const SCHOOL_MAPPING: &str = r#"
name: directorio
language: es
csv_files:
  - file_path: directorio.csv
    update_action: ACTION
    mappings:
      - item:
          label: "{NOM_RBD}"
          identity:
            property: rol base de datos del establecimiento
            value: "{RBD}"
          description: "Colegio {RBD} de la comuna de {NOM_COM_RBD}"
        statements:
          - property: instancia de
            value: colegio
          - property: comuna
            value: "{NOM_COM_RBD}"
"#;

pub fn school_mapping(action: &str) -> MappingDescription {
    MappingDescription::parse(&SCHOOL_MAPPING.replace("ACTION", action), Path::new("."))
        .expect("school mapping")
}

/// A store holding the school schema, with call counters reset.
pub fn school_gateway() -> InMemoryGateway {
    let gateway = InMemoryGateway::new();
    sync_school_schema(&gateway);
    gateway
}

pub fn sync_school_schema(gateway: &InMemoryGateway) {
    let schema = SchemaDescription::parse(SCHOOL_SCHEMA).expect("school schema");
    let cache = EntityCache::new();
    SchemaReconciler::new(gateway, &cache)
        .sync(&schema)
        .expect("schema sync");
    gateway.reset_counts();
}

pub fn school_row(index: usize, name: &str, rbd: &str, comuna: &str) -> Row {
    Row::from_pairs(
        index,
        [("NOM_RBD", name), ("RBD", rbd), ("NOM_COM_RBD", comuna)],
    )
}

/// Maps `rows` with a fresh single-file mapper, as one run would.
pub fn map_rows(
    gateway: &dyn EntityGateway,
    cache: &EntityCache,
    mapping: &MappingDescription,
    rows: Vec<Row>,
    workers: usize,
) -> Vec<RowOutcome> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .expect("thread pool");
    let mapper = RowMapper::new(gateway, cache, &mapping.files[0]);
    mapper
        .process(rows.into_iter().map(Ok), &pool)
        .collect::<Result<Vec<_>, _>>()
        .expect("no fatal errors")
}

pub fn entity_id(gateway: &InMemoryGateway, kind: EntityKind, label: &str) -> EntityId {
    let matches = gateway.entities_labelled(kind, label);
    assert_eq!(matches.len(), 1, "expected exactly one {kind} labelled '{label}'");
    matches[0].id.clone()
}

pub fn item(gateway: &InMemoryGateway, label: &str) -> RemoteEntity {
    let id = entity_id(gateway, EntityKind::Item, label);
    gateway.entity(&id).expect("stored item")
}

pub fn statements_on<'a>(
    gateway: &InMemoryGateway,
    entity: &'a RemoteEntity,
    property_label: &str,
) -> Vec<&'a RemoteStatement> {
    let property = entity_id(gateway, EntityKind::Property, property_label);
    entity
        .statements
        .iter()
        .filter(|s| *s.statement.property() == property)
        .collect()
}
