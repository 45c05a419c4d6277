mod common;

use std::time::Duration;

use common::{
    IDENTITY_PROPERTY, SCHOOL_MAPPING, TestWorkspace, entity_id, item, map_rows, school_gateway,
    school_mapping, school_row, statements_on, sync_school_schema,
};
use wikibase_bulk::{
    cache::EntityCache,
    error::{GatewayError, RowError, SyncError},
    gateway::{CallCounts, EntityDraft, GatewayCall, InMemoryGateway},
    mapper::{MappingRunner, RowMapper},
    mapping::MappingDescription,
    model::{Datatype, EntityId, EntityKind, Rank, Reference, Snak, Statement},
    report::RowStatus,
    value::Value,
};

fn item_value(gateway: &InMemoryGateway, label: &str) -> Value {
    Value::Item(entity_id(gateway, EntityKind::Item, label))
}

fn snak(gateway: &InMemoryGateway, property: &str, datatype: Datatype, value: Value) -> Statement {
    Statement::new(Snak {
        property: entity_id(gateway, EntityKind::Property, property),
        datatype,
        value,
    })
}

/// Seeds an item carrying the identity statement for `rbd`.
fn seed_school(gateway: &InMemoryGateway, label: &str, rbd: &str) -> EntityId {
    let id = gateway.seed(&EntityDraft::item(label, "es"));
    let identity = snak(
        gateway,
        IDENTITY_PROPERTY,
        Datatype::ExternalId,
        Value::ExternalId(rbd.to_string()),
    );
    gateway.seed_statement(&id, identity).expect("seeded");
    id
}

#[test]
fn new_row_creates_a_described_item_with_statements() {
    let gateway = school_gateway();
    let cache = EntityCache::new();
    let mapping = school_mapping("replace_all");

    let outcomes = map_rows(
        &gateway,
        &cache,
        &mapping,
        vec![school_row(1, "Liceo A", "123", "Talca")],
        2,
    );
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, RowStatus::Created, "{}", outcomes[0].reason());

    let liceo = item(&gateway, "Liceo A");
    assert_eq!(outcomes[0].entities, vec![liceo.id.clone()]);
    assert_eq!(liceo.description, "Colegio 123 de la comuna de Talca");
    let identity = statements_on(&gateway, &liceo, IDENTITY_PROPERTY);
    assert_eq!(identity.len(), 1);
    assert_eq!(identity[0].statement.main.value, Value::ExternalId("123".into()));
    let instance_of = statements_on(&gateway, &liceo, "instancia de");
    assert_eq!(instance_of.len(), 1);
    assert_eq!(instance_of[0].statement.main.value, item_value(&gateway, "colegio"));
    let commune = statements_on(&gateway, &liceo, "comuna");
    assert_eq!(commune.len(), 1);
    assert_eq!(commune[0].statement.main.value, item_value(&gateway, "Talca"));
}

#[test]
fn rerunning_replace_all_changes_nothing() {
    let gateway = school_gateway();
    let mapping = school_mapping("replace_all");
    let rows = || vec![school_row(1, "Liceo A", "123", "Talca")];
    map_rows(&gateway, &EntityCache::new(), &mapping, rows(), 2);
    let before = item(&gateway, "Liceo A");

    gateway.reset_counts();
    let outcomes = map_rows(&gateway, &EntityCache::new(), &mapping, rows(), 2);
    assert_eq!(outcomes[0].status, RowStatus::Unchanged);
    assert_eq!(gateway.counts().mutations(), 0);
    assert_eq!(item(&gateway, "Liceo A"), before);
}

#[test]
fn missing_reference_fails_the_row_but_keeps_the_item() {
    let gateway = school_gateway();
    let outcomes = map_rows(
        &gateway,
        &EntityCache::new(),
        &school_mapping("replace_all"),
        vec![school_row(1, "Escuela Sur", "124", "Valdivia")],
        2,
    );
    let outcome = &outcomes[0];
    assert_eq!(outcome.status, RowStatus::Failed);
    assert!(outcome.partial);
    assert!(matches!(
        &outcome.errors[..],
        [RowError::Reference(err)] if err.label == "Valdivia" && err.property == "comuna"
    ));

    let school = item(&gateway, "Escuela Sur");
    assert_eq!(statements_on(&gateway, &school, "instancia de").len(), 1);
    assert!(statements_on(&gateway, &school, "comuna").is_empty());
}

#[test]
fn concurrent_rows_with_one_identity_create_one_item() {
    let gateway = InMemoryGateway::new().with_latency(Duration::from_millis(2));
    sync_school_schema(&gateway);
    let rows = (1..=32)
        .map(|idx| school_row(idx, "Liceo Z", "900", "Talca"))
        .collect();

    let outcomes = map_rows(&gateway, &EntityCache::new(), &school_mapping("replace_all"), rows, 8);
    assert_eq!(outcomes.len(), 32);
    assert!(outcomes.iter().all(|o| !o.is_failed()));
    assert_eq!(
        outcomes.iter().filter(|o| o.status == RowStatus::Created).count(),
        1
    );
    assert_eq!(gateway.counts().creates, 1);
    let liceo = item(&gateway, "Liceo Z");
    assert!(outcomes.iter().all(|o| o.entities == vec![liceo.id.clone()]));
    assert_eq!(statements_on(&gateway, &liceo, "instancia de").len(), 1);
    assert_eq!(statements_on(&gateway, &liceo, "comuna").len(), 1);
    assert_eq!(statements_on(&gateway, &liceo, IDENTITY_PROPERTY).len(), 1);
}

#[test]
fn outcomes_follow_row_order() {
    let gateway = school_gateway();
    let rows = (1..=40)
        .map(|idx| school_row(idx, &format!("Escuela {idx}"), &format!("{}", 1000 + idx), "Talca"))
        .collect();
    let outcomes = map_rows(&gateway, &EntityCache::new(), &school_mapping("replace_all"), rows, 4);
    let order: Vec<usize> = outcomes.iter().map(|o| o.row).collect();
    assert_eq!(order, (1..=40).collect::<Vec<_>>());
    assert_eq!(gateway.entities(EntityKind::Item).len(), 3 + 40);
}

#[test]
fn append_or_replace_updates_in_place_and_keeps_other_properties() {
    let gateway = school_gateway();
    let id = seed_school(&gateway, "Liceo B", "200");
    let wrong_commune = snak(
        &gateway,
        "comuna",
        Datatype::WikibaseItem,
        item_value(&gateway, "comuna chilena"),
    );
    let commune_id = gateway.seed_statement(&id, wrong_commune).unwrap();
    let enrolment = snak(
        &gateway,
        "matrícula",
        Datatype::Quantity,
        Value::parse("800", Datatype::Quantity, '.').unwrap(),
    );
    gateway.seed_statement(&id, enrolment).unwrap();

    let outcomes = map_rows(
        &gateway,
        &EntityCache::new(),
        &school_mapping("append_or_replace"),
        vec![school_row(1, "Liceo B", "200", "Talca")],
        2,
    );
    assert_eq!(outcomes[0].status, RowStatus::Updated, "{}", outcomes[0].reason());

    let liceo = gateway.entity(&id).unwrap();
    let commune = statements_on(&gateway, &liceo, "comuna");
    assert_eq!(commune.len(), 1);
    assert_eq!(commune[0].id, commune_id);
    assert_eq!(commune[0].statement.main.value, item_value(&gateway, "Talca"));
    assert_eq!(statements_on(&gateway, &liceo, "matrícula").len(), 1);
    assert_eq!(statements_on(&gateway, &liceo, "instancia de").len(), 1);
    assert_eq!(liceo.description, "Colegio 200 de la comuna de Talca");
}

#[test]
fn updates_keep_references_and_rank_added_by_hand() {
    let gateway = school_gateway();
    let id = seed_school(&gateway, "Liceo R", "210");
    let mut sourced = snak(
        &gateway,
        "comuna",
        Datatype::WikibaseItem,
        item_value(&gateway, "comuna chilena"),
    );
    sourced.rank = Some(Rank::Preferred);
    sourced.references.push(Reference {
        hash: Some("9f2a".into()),
        snaks: vec![Snak {
            property: entity_id(&gateway, EntityKind::Property, IDENTITY_PROPERTY),
            datatype: Datatype::ExternalId,
            value: Value::ExternalId("acta 12".into()),
        }],
    });
    let commune_id = gateway.seed_statement(&id, sourced.clone()).unwrap();

    let outcomes = map_rows(
        &gateway,
        &EntityCache::new(),
        &school_mapping("append_or_replace"),
        vec![school_row(1, "Liceo R", "210", "Talca")],
        2,
    );
    assert_eq!(outcomes[0].status, RowStatus::Updated, "{}", outcomes[0].reason());

    let liceo = gateway.entity(&id).unwrap();
    let commune = statements_on(&gateway, &liceo, "comuna");
    assert_eq!(commune.len(), 1);
    assert_eq!(commune[0].id, commune_id);
    assert_eq!(commune[0].statement.main.value, item_value(&gateway, "Talca"));
    assert_eq!(commune[0].statement.rank, Some(Rank::Preferred));
    assert_eq!(commune[0].statement.references, sourced.references);
}

#[test]
fn failed_statement_write_after_create_keeps_a_single_item() {
    let gateway = school_gateway();
    gateway.inject_failure(
        GatewayCall::ApplyStatementOps,
        GatewayError::Rejected("validation".into()),
    );
    let rows = vec![
        school_row(1, "Liceo A", "123", "Talca"),
        school_row(2, "Liceo A", "123", "Talca"),
    ];

    let mapping = school_mapping("replace_all");
    let outcomes = map_rows(&gateway, &EntityCache::new(), &mapping, rows, 1);
    assert_eq!(outcomes[0].status, RowStatus::Failed);
    assert!(outcomes[0].partial, "the first row created the item");
    assert_eq!(outcomes[1].status, RowStatus::Updated, "{}", outcomes[1].reason());

    let items = gateway.entities_labelled(EntityKind::Item, "Liceo A");
    assert_eq!(items.len(), 1);
    assert_eq!(outcomes[0].entities, vec![items[0].id.clone()]);
    assert_eq!(statements_on(&gateway, &items[0], IDENTITY_PROPERTY).len(), 1);
    assert_eq!(statements_on(&gateway, &items[0], "instancia de").len(), 1);
    assert_eq!(statements_on(&gateway, &items[0], "comuna").len(), 1);
}

#[test]
fn rejected_create_leaves_nothing_behind() {
    let gateway = school_gateway();
    gateway.inject_failure(
        GatewayCall::CreateEntity,
        GatewayError::Rejected("abuse filter".into()),
    );
    let rows = vec![
        school_row(1, "Liceo A", "123", "Talca"),
        school_row(2, "Liceo A", "123", "Talca"),
    ];

    let mapping = school_mapping("replace_all");
    let outcomes = map_rows(&gateway, &EntityCache::new(), &mapping, rows, 1);
    assert_eq!(outcomes[0].status, RowStatus::Failed);
    assert!(!outcomes[0].partial);
    assert!(outcomes[0].entities.is_empty());
    assert_eq!(outcomes[1].status, RowStatus::Created, "{}", outcomes[1].reason());
    assert_eq!(gateway.entities_labelled(EntityKind::Item, "Liceo A").len(), 1);
}

#[test]
fn replace_all_shrinks_a_governed_property() {
    let gateway = school_gateway();
    let id = seed_school(&gateway, "Liceo C", "300");
    for label in ["colegio", "comuna chilena"] {
        let value = item_value(&gateway, label);
        let statement = snak(&gateway, "instancia de", Datatype::WikibaseItem, value);
        gateway.seed_statement(&id, statement).unwrap();
    }

    map_rows(
        &gateway,
        &EntityCache::new(),
        &school_mapping("replace_all"),
        vec![school_row(1, "Liceo C", "300", "Talca")],
        2,
    );
    let liceo = gateway.entity(&id).unwrap();
    let instance_of = statements_on(&gateway, &liceo, "instancia de");
    assert_eq!(instance_of.len(), 1);
    assert_eq!(instance_of[0].statement.main.value, item_value(&gateway, "colegio"));
    assert_eq!(statements_on(&gateway, &liceo, IDENTITY_PROPERTY).len(), 1);
}

#[test]
fn keep_leaves_populated_properties_alone() {
    let gateway = school_gateway();
    let id = seed_school(&gateway, "Liceo D", "400");
    let commune = snak(
        &gateway,
        "comuna",
        Datatype::WikibaseItem,
        item_value(&gateway, "comuna chilena"),
    );
    gateway.seed_statement(&id, commune).unwrap();

    map_rows(
        &gateway,
        &EntityCache::new(),
        &school_mapping("keep"),
        vec![school_row(1, "Liceo D", "400", "Talca")],
        2,
    );
    let liceo = gateway.entity(&id).unwrap();
    let commune = statements_on(&gateway, &liceo, "comuna");
    assert_eq!(commune.len(), 1);
    assert_eq!(commune[0].statement.main.value, item_value(&gateway, "comuna chilena"));
    assert_eq!(statements_on(&gateway, &liceo, "instancia de").len(), 1);
}

#[test]
fn force_append_duplicates_on_rerun() {
    let gateway = school_gateway();
    let mapping = school_mapping("force_append");
    for _ in 0..2 {
        map_rows(
            &gateway,
            &EntityCache::new(),
            &mapping,
            vec![school_row(1, "Liceo E", "500", "Talca")],
            2,
        );
    }
    let liceo = item(&gateway, "Liceo E");
    assert_eq!(statements_on(&gateway, &liceo, "instancia de").len(), 2);
    assert_eq!(statements_on(&gateway, &liceo, "comuna").len(), 2);
    assert_eq!(statements_on(&gateway, &liceo, IDENTITY_PROPERTY).len(), 1);
}

#[test]
fn missing_column_fails_before_any_remote_call() {
    let gateway = school_gateway();
    let row = wikibase_bulk::rows::Row::from_pairs(1, [("NOM_RBD", "Liceo F"), ("RBD", "600")]);
    let mapping = school_mapping("replace_all");
    let outcomes = map_rows(&gateway, &EntityCache::new(), &mapping, vec![row], 2);

    assert_eq!(outcomes[0].status, RowStatus::Failed);
    assert!(!outcomes[0].partial);
    assert!(matches!(
        &outcomes[0].errors[..],
        [RowError::Placeholder(err)] if err.column == "NOM_COM_RBD"
    ));
    assert_eq!(gateway.counts(), CallCounts::default());
}

#[test]
fn ambiguous_identity_fails_the_row_without_writing() {
    let gateway = school_gateway();
    let first = seed_school(&gateway, "Liceo G", "700");
    let second = seed_school(&gateway, "Liceo G bis", "700");

    let outcomes = map_rows(
        &gateway,
        &EntityCache::new(),
        &school_mapping("replace_all"),
        vec![school_row(1, "Liceo G", "700", "Talca")],
        2,
    );
    match &outcomes[0].errors[..] {
        [RowError::Ambiguity(err)] => {
            assert_eq!(err.value, "700");
            assert_eq!(err.candidates, vec![first, second]);
        }
        other => panic!("expected an identity ambiguity, got {other:?}"),
    }
    assert!(!outcomes[0].partial);
    assert_eq!(gateway.counts().mutations(), 0);
}

#[test]
fn rejected_statements_are_reported_per_row() {
    let gateway = school_gateway();
    gateway.reject_statements_on(&entity_id(&gateway, EntityKind::Property, "comuna"));

    let outcomes = map_rows(
        &gateway,
        &EntityCache::new(),
        &school_mapping("replace_all"),
        vec![school_row(1, "Liceo H", "800", "Talca")],
        2,
    );
    assert_eq!(outcomes[0].status, RowStatus::Failed);
    assert!(outcomes[0].partial);
    assert!(matches!(
        &outcomes[0].errors[..],
        [RowError::Gateway(GatewayError::Rejected(_))]
    ));
    let liceo = item(&gateway, "Liceo H");
    assert_eq!(statements_on(&gateway, &liceo, "instancia de").len(), 1);
    assert!(statements_on(&gateway, &liceo, "comuna").is_empty());
}

#[test]
fn authentication_failure_stops_the_row_stream() {
    let gateway = school_gateway();
    gateway.inject_failure(
        GatewayCall::FindByStatement,
        GatewayError::Auth("assertuserfailed".into()),
    );
    let cache = EntityCache::new();
    let mapping = school_mapping("replace_all");
    let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
    let mapper = RowMapper::new(&gateway, &cache, &mapping.files[0]);
    let rows = (1..=3)
        .map(|idx| Ok(school_row(idx, &format!("Liceo {idx}"), &format!("{idx}"), "Talca")));

    let results: Vec<_> = mapper.process(rows, &pool).collect();
    assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    // The other rows of the batch were written and are still reported.
    assert_eq!(results.len(), 3);
    assert!(results[..2]
        .iter()
        .all(|r| matches!(r, Ok(outcome) if outcome.status == RowStatus::Created)));
    assert!(matches!(
        results.last(),
        Some(Err(SyncError::Gateway(GatewayError::Auth(_))))
    ));

    gateway.inject_failure(GatewayCall::FindByStatement, GatewayError::Auth("badtoken".into()));
    let runner = MappingRunner::new(&gateway, &cache, 2).unwrap();
    let err = runner
        .run_file(&mapping.files[0], [Ok(school_row(1, "Liceo I", "901", "Talca"))])
        .unwrap_err();
    assert!(matches!(err, SyncError::Gateway(GatewayError::Auth(_))));
}

#[test]
fn runner_reads_latin1_csv_and_writes_a_report() {
    let workspace = TestWorkspace::new();
    let mapping_yaml = SCHOOL_MAPPING
        .replace("ACTION", "replace_all")
        .replace(
            "    mappings:",
            "    encoding: latin1\n    delimiter: \";\"\n    mappings:",
        );
    let mapping_path = workspace.write("mapping.yml", &mapping_yaml);
    let mut csv = b"NOM_RBD;RBD;NOM_COM_RBD\nLiceo A;123;Talca\nEscuela ".to_vec();
    csv.extend_from_slice(b"\xd1uble;124;Talca\nLiceo Sur;125;Valdivia\n");
    workspace.write_bytes("directorio.csv", &csv);

    let gateway = school_gateway();
    let cache = EntityCache::new();
    let mapping = MappingDescription::load(&mapping_path).expect("mapping loads");
    let runner = MappingRunner::new(&gateway, &cache, 4).unwrap();
    let report = runner.run(&mapping).expect("run completes");

    let totals = report.totals();
    assert_eq!((totals.rows, totals.created, totals.failed), (3, 2, 1));
    assert!(report.has_failures());
    item(&gateway, "Escuela Ñuble");

    let failures = &report.files[0].failures;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].row, 3);
    assert!(failures[0].partial);
    assert!(failures[0].reason.contains("Valdivia"));

    let report_path = workspace.path().join("report.json");
    report.write_json(&report_path).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(json["mapping"], "directorio");
    assert_eq!(json["files"][0]["created"], 2);
    assert_eq!(json["files"][0]["failures"][0]["row"], 3);
}
