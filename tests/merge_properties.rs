use std::collections::HashSet;

use proptest::prelude::*;
use wikibase_bulk::{
    merge::merge,
    model::{Datatype, EntityId, Operation, RemoteStatement, Snak, Statement, UpdateAction},
    value::Value,
};

fn snak(property: u8, value: u8) -> Snak {
    Snak {
        property: EntityId::new(format!("P{property}")),
        datatype: Datatype::String,
        value: Value::String(format!("v{value}")),
    }
}

/// (property, value, optional qualifier value) drawn from small domains so
/// collisions are frequent.
fn statement() -> impl Strategy<Value = Statement> {
    (1u8..4, 0u8..3, proptest::option::of(0u8..2)).prop_map(|(property, value, qualifier)| {
        let mut statement = Statement::new(snak(property, value));
        statement.qualifiers.extend(qualifier.map(|q| snak(9, q)));
        statement
    })
}

fn remote(statements: Vec<Statement>) -> Vec<RemoteStatement> {
    statements
        .into_iter()
        .enumerate()
        .map(|(idx, statement)| RemoteStatement {
            id: format!("Q1$seed{idx}"),
            statement,
        })
        .collect()
}

fn apply(existing: &[RemoteStatement], ops: &[Operation]) -> Vec<RemoteStatement> {
    let mut statements = existing.to_vec();
    for (idx, op) in ops.iter().enumerate() {
        match op {
            Operation::Create(statement) => statements.push(RemoteStatement {
                id: format!("Q1$new{idx}"),
                statement: statement.clone(),
            }),
            Operation::Update { id, statement } => {
                let target = statements
                    .iter_mut()
                    .find(|s| &s.id == id)
                    .expect("update targets an existing statement");
                target.statement = statement.clone();
            }
            Operation::Delete { id } => statements.retain(|s| &s.id != id),
        }
    }
    statements
}

fn targeted_id(op: &Operation) -> Option<&str> {
    match op {
        Operation::Create(_) => None,
        Operation::Update { id, .. } | Operation::Delete { id } => Some(id.as_str()),
    }
}

proptest! {
    #[test]
    fn append_or_replace_never_deletes(
        existing in prop::collection::vec(statement(), 0..8),
        computed in prop::collection::vec(statement(), 0..8),
    ) {
        let existing = remote(existing);
        let ops = merge(&existing, &computed, UpdateAction::AppendOrReplace);
        let no_deletes = ops.iter().all(|op| !matches!(op, Operation::Delete { .. }));
        prop_assert!(no_deletes);
    }

    #[test]
    fn untouched_properties_are_left_alone(
        existing in prop::collection::vec(statement(), 0..8),
        computed in prop::collection::vec(statement(), 0..8),
    ) {
        let existing = remote(existing);
        let touched: HashSet<&EntityId> = computed.iter().map(Statement::property).collect();
        for action in [
            UpdateAction::ReplaceAll,
            UpdateAction::AppendOrReplace,
            UpdateAction::Keep,
            UpdateAction::ForceAppend,
        ] {
            for op in merge(&existing, &computed, action) {
                if let Some(id) = targeted_id(&op) {
                    let target = existing.iter().find(|s| s.id == id).expect("known id");
                    prop_assert!(touched.contains(target.statement.property()));
                }
            }
        }
    }

    #[test]
    fn merging_twice_is_a_no_op(
        existing in prop::collection::vec(statement(), 0..8),
        computed in prop::collection::vec(statement(), 0..8),
    ) {
        let existing = remote(existing);
        for action in [
            UpdateAction::ReplaceAll,
            UpdateAction::AppendOrReplace,
            UpdateAction::Keep,
        ] {
            let merged = apply(&existing, &merge(&existing, &computed, action));
            let again = merge(&merged, &computed, action);
            prop_assert!(again.is_empty(), "{action}: second merge produced {again:?}");
        }
    }
}

#[test]
fn force_append_creates_every_statement_again() {
    let computed = vec![Statement::new(snak(1, 0)), Statement::new(snak(2, 1))];
    let existing = remote(computed.clone());
    let ops = merge(&existing, &computed, UpdateAction::ForceAppend);
    assert_eq!(ops.len(), 2);
    assert!(ops.iter().all(|op| matches!(op, Operation::Create(_))));
}
