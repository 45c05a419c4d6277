use std::collections::HashSet;

use crate::model::{EntityId, Operation, RemoteStatement, Statement, UpdateAction};

/// Operations that bring `existing` in line with `computed`. Properties
/// `computed` does not touch are never changed. Except under `ForceAppend`,
/// merging again after applying the result yields no operations.
pub fn merge(
    existing: &[RemoteStatement],
    computed: &[Statement],
    action: UpdateAction,
) -> Vec<Operation> {
    match action {
        UpdateAction::ReplaceAll => replace_all(existing, computed),
        UpdateAction::AppendOrReplace => append_or_replace(existing, computed),
        UpdateAction::Keep => keep(existing, computed),
        UpdateAction::ForceAppend => computed.iter().cloned().map(Operation::Create).collect(),
    }
}

/// Properties in order of first appearance.
fn touched_properties(computed: &[Statement]) -> Vec<&EntityId> {
    let mut seen = HashSet::new();
    computed
        .iter()
        .map(Statement::property)
        .filter(|p| seen.insert(*p))
        .collect()
}

/// Whether `a` and `b` hold the same statements, ignoring order.
fn same_multiset(a: &[&Statement], b: &[&Statement]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    a.iter().all(|left| {
        let found = b
            .iter()
            .enumerate()
            .find(|(idx, right)| !used[*idx] && right.is_satisfied_by(left));
        match found {
            Some((idx, _)) => {
                used[idx] = true;
                true
            }
            None => false,
        }
    })
}

fn replace_all(existing: &[RemoteStatement], computed: &[Statement]) -> Vec<Operation> {
    let mut ops = Vec::new();
    for property in touched_properties(computed) {
        let current: Vec<&RemoteStatement> = existing
            .iter()
            .filter(|s| s.statement.property() == property)
            .collect();
        let wanted: Vec<&Statement> = computed
            .iter()
            .filter(|s| s.property() == property)
            .collect();
        let current_statements: Vec<&Statement> = current.iter().map(|s| &s.statement).collect();
        if same_multiset(&current_statements, &wanted) {
            continue;
        }
        ops.extend(current.iter().map(|s| Operation::Delete { id: s.id.clone() }));
        ops.extend(wanted.into_iter().cloned().map(Operation::Create));
    }
    ops
}

fn append_or_replace(existing: &[RemoteStatement], computed: &[Statement]) -> Vec<Operation> {
    let mut claimed = vec![false; existing.len()];
    let mut settled = vec![false; computed.len()];

    // Exact matches first, so an unchanged statement is never rewritten to
    // make room for a changed sibling.
    for (c_idx, statement) in computed.iter().enumerate() {
        let exact = existing
            .iter()
            .enumerate()
            .find(|(idx, remote)| !claimed[*idx] && statement.is_satisfied_by(&remote.statement));
        if let Some((idx, _)) = exact {
            claimed[idx] = true;
            settled[c_idx] = true;
        }
    }

    let mut ops = Vec::new();
    for (c_idx, statement) in computed.iter().enumerate() {
        if settled[c_idx] {
            continue;
        }
        let candidate = existing.iter().enumerate().find(|(idx, remote)| {
            !claimed[*idx]
                && remote.statement.property() == statement.property()
                && remote.statement.same_qualifiers(statement)
        });
        match candidate {
            Some((idx, remote)) => {
                claimed[idx] = true;
                ops.push(Operation::Update {
                    id: remote.id.clone(),
                    statement: statement.carried_onto(&remote.statement),
                });
            }
            None => ops.push(Operation::Create(statement.clone())),
        }
    }
    ops
}

fn keep(existing: &[RemoteStatement], computed: &[Statement]) -> Vec<Operation> {
    let present: HashSet<&EntityId> = existing.iter().map(|s| s.statement.property()).collect();
    computed
        .iter()
        .filter(|s| !present.contains(s.property()))
        .cloned()
        .map(Operation::Create)
        .collect()
}
