use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{Map, Value as JsonValue, json};

use crate::{
    error::GatewayError,
    gateway::{EntityDraft, EntityPatch},
    model::{
        Datatype, EntityId, EntityKind, Operation, Rank, Reference, RemoteEntity, RemoteStatement,
        Snak, Statement,
    },
    value::{UNITLESS, Value},
};

pub const GREGORIAN_CALENDAR: &str = "http://www.wikidata.org/entity/Q1985727";
pub const EARTH_GLOBE: &str = "http://www.wikidata.org/entity/Q2";
const DEFAULT_COORDINATE_PRECISION: f64 = 0.000_001;

/// Snak types that carry no datavalue; stored as [`Value::Unsupported`].
const VALUELESS_SNAKS: [&str; 2] = ["somevalue", "novalue"];

pub fn encode_datavalue(value: &Value) -> JsonValue {
    match value {
        Value::Item(id) => {
            let mut inner = Map::new();
            inner.insert("entity-type".into(), json!("item"));
            if let Some(numeric) = id.numeric_id() {
                inner.insert("numeric-id".into(), json!(numeric));
            }
            inner.insert("id".into(), json!(id.as_str()));
            json!({ "type": "wikibase-entityid", "value": inner })
        }
        Value::String(text) | Value::Url(text) | Value::ExternalId(text) => {
            json!({ "type": "string", "value": text })
        }
        Value::Quantity { amount, unit } => json!({
            "type": "quantity",
            "value": { "amount": signed_amount(amount), "unit": unit },
        }),
        Value::Time { time, precision } => json!({
            "type": "time",
            "value": {
                "time": time,
                "timezone": 0,
                "before": 0,
                "after": 0,
                "precision": precision,
                "calendarmodel": GREGORIAN_CALENDAR,
            },
        }),
        Value::GlobeCoordinate {
            latitude,
            longitude,
            precision,
        } => json!({
            "type": "globecoordinate",
            "value": {
                "latitude": latitude,
                "longitude": longitude,
                "altitude": null,
                "precision": precision,
                "globe": EARTH_GLOBE,
            },
        }),
        Value::Unsupported(raw) => serde_json::from_str(raw).unwrap_or(JsonValue::Null),
    }
}

fn signed_amount(amount: &Decimal) -> String {
    let normalized = amount.normalize();
    if normalized.is_sign_negative() {
        normalized.to_string()
    } else {
        format!("+{normalized}")
    }
}

/// Decodes a `datavalue` object. Types this crate does not model are kept
/// verbatim so they survive a re-encode.
pub fn decode_datavalue(datatype: Datatype, datavalue: &JsonValue) -> Value {
    let inner = &datavalue["value"];
    let decoded = match datavalue["type"].as_str() {
        Some("wikibase-entityid") => inner["id"]
            .as_str()
            .map(EntityId::new)
            .or_else(|| inner["numeric-id"].as_u64().map(|n| EntityId::new(format!("Q{n}"))))
            .map(Value::Item),
        Some("string") => inner.as_str().map(|text| match datatype {
            Datatype::Url => Value::Url(text.to_string()),
            Datatype::ExternalId => Value::ExternalId(text.to_string()),
            _ => Value::String(text.to_string()),
        }),
        Some("quantity") => inner["amount"]
            .as_str()
            .and_then(|amount| Decimal::from_str(amount.trim_start_matches('+')).ok())
            .map(|amount| Value::Quantity {
                amount,
                unit: inner["unit"].as_str().unwrap_or(UNITLESS).to_string(),
            }),
        Some("time") => inner["time"].as_str().map(|time| Value::Time {
            time: time.to_string(),
            precision: inner["precision"]
                .as_u64()
                .and_then(|p| u8::try_from(p).ok())
                .unwrap_or(11),
        }),
        Some("globecoordinate") => match (inner["latitude"].as_f64(), inner["longitude"].as_f64()) {
            (Some(latitude), Some(longitude)) => Some(Value::GlobeCoordinate {
                latitude,
                longitude,
                precision: inner["precision"]
                    .as_f64()
                    .unwrap_or(DEFAULT_COORDINATE_PRECISION),
            }),
            _ => None,
        },
        _ => None,
    };
    decoded.unwrap_or_else(|| Value::Unsupported(datavalue.to_string()))
}

pub fn encode_snak(snak: &Snak) -> JsonValue {
    if let Value::Unsupported(raw) = &snak.value {
        if VALUELESS_SNAKS.contains(&raw.as_str()) {
            return json!({
                "snaktype": raw,
                "property": snak.property.as_str(),
                "datatype": snak.datatype.as_str(),
            });
        }
    }
    json!({
        "snaktype": "value",
        "property": snak.property.as_str(),
        "datatype": snak.datatype.as_str(),
        "datavalue": encode_datavalue(&snak.value),
    })
}

/// Decodes a snak; unknown datatypes read as strings with an opaque value.
pub fn decode_snak(snak: &JsonValue) -> Option<Snak> {
    let property = EntityId::new(snak["property"].as_str()?);
    let datatype = snak["datatype"]
        .as_str()
        .and_then(|d| d.parse().ok())
        .unwrap_or(Datatype::String);
    let value = match snak["snaktype"].as_str() {
        Some("value") | None => decode_datavalue(datatype, &snak["datavalue"]),
        Some(other) => Value::Unsupported(other.to_string()),
    };
    Some(Snak {
        property,
        datatype,
        value,
    })
}

/// Groups snaks by property, keeping first-appearance order.
fn encode_snak_group(snaks: &[Snak]) -> (JsonValue, Vec<String>) {
    let mut by_property: Map<String, JsonValue> = Map::new();
    let mut order = Vec::new();
    for snak in snaks {
        let key = snak.property.as_str().to_string();
        if !by_property.contains_key(&key) {
            order.push(key.clone());
        }
        let entry = by_property.entry(key).or_insert_with(|| json!([]));
        if let Some(list) = entry.as_array_mut() {
            list.push(encode_snak(snak));
        }
    }
    (JsonValue::Object(by_property), order)
}

fn decode_snak_group(by_property: &JsonValue, order: &JsonValue) -> Vec<Snak> {
    let Some(map) = by_property.as_object() else {
        return Vec::new();
    };
    let order: Vec<&str> = match order.as_array() {
        Some(order) => order.iter().filter_map(JsonValue::as_str).collect(),
        None => map.keys().map(String::as_str).collect(),
    };
    order
        .into_iter()
        .filter_map(|property| map.get(property).and_then(JsonValue::as_array))
        .flatten()
        .filter_map(decode_snak)
        .collect()
}

pub fn encode_claim(statement: &Statement, id: Option<&str>) -> JsonValue {
    let mut claim = Map::new();
    if let Some(id) = id {
        claim.insert("id".into(), json!(id));
    }
    claim.insert("type".into(), json!("statement"));
    claim.insert(
        "rank".into(),
        json!(statement.rank.unwrap_or_default().as_str()),
    );
    claim.insert("mainsnak".into(), encode_snak(&statement.main));
    if !statement.qualifiers.is_empty() {
        let (qualifiers, order) = encode_snak_group(&statement.qualifiers);
        claim.insert("qualifiers".into(), qualifiers);
        claim.insert("qualifiers-order".into(), json!(order));
    }
    if !statement.references.is_empty() {
        let references: Vec<JsonValue> = statement
            .references
            .iter()
            .map(|reference| {
                let (snaks, order) = encode_snak_group(&reference.snaks);
                let mut block = Map::new();
                if let Some(hash) = &reference.hash {
                    block.insert("hash".into(), json!(hash));
                }
                block.insert("snaks".into(), snaks);
                block.insert("snaks-order".into(), json!(order));
                JsonValue::Object(block)
            })
            .collect();
        claim.insert("references".into(), JsonValue::Array(references));
    }
    JsonValue::Object(claim)
}

pub fn decode_claim(claim: &JsonValue) -> Option<RemoteStatement> {
    let id = claim["id"].as_str()?.to_string();
    let main = decode_snak(&claim["mainsnak"])?;
    let qualifiers = decode_snak_group(&claim["qualifiers"], &claim["qualifiers-order"]);
    let references = claim["references"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|block| Reference {
            hash: block["hash"].as_str().map(str::to_string),
            snaks: decode_snak_group(&block["snaks"], &block["snaks-order"]),
        })
        .collect();
    let rank = claim["rank"]
        .as_str()
        .and_then(|rank| rank.parse::<Rank>().ok())
        .unwrap_or_default();
    Some(RemoteStatement {
        id,
        statement: Statement {
            main,
            qualifiers,
            references,
            rank: Some(rank),
        },
    })
}

/// Decodes an entity's `claims` object, keeping the remote property order.
pub fn decode_claims(claims: &JsonValue) -> Vec<RemoteStatement> {
    claims
        .as_object()
        .into_iter()
        .flat_map(|by_property| by_property.values())
        .filter_map(JsonValue::as_array)
        .flatten()
        .filter_map(decode_claim)
        .collect()
}

pub fn decode_entity(entity: &JsonValue, language: &str) -> Result<RemoteEntity, GatewayError> {
    let id = entity["id"]
        .as_str()
        .ok_or_else(|| GatewayError::Rejected(format!("entity without id: {entity}")))?;
    let kind = match entity["type"].as_str() {
        Some("property") => EntityKind::Property,
        _ => EntityKind::Item,
    };
    let term = |field: &str| {
        entity[field][language]["value"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    };
    let aliases = entity["aliases"][language]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|alias| alias["value"].as_str().map(str::to_string))
        .collect();
    Ok(RemoteEntity {
        id: EntityId::new(id),
        kind,
        label: term("labels"),
        description: term("descriptions"),
        aliases,
        datatype: entity["datatype"].as_str().and_then(|d| d.parse().ok()),
        statements: decode_claims(&entity["claims"]),
    })
}

fn term(language: &str, value: &str) -> JsonValue {
    json!({ "language": language, "value": value })
}

/// `data` payload for `wbeditentity` with `new=item|property`, initial
/// claims included.
pub fn encode_draft(draft: &EntityDraft) -> JsonValue {
    let language = draft.language.as_str();
    let mut data = Map::new();
    data.insert("labels".into(), json!({ language: term(language, &draft.label) }));
    if !draft.description.is_empty() {
        data.insert(
            "descriptions".into(),
            json!({ language: term(language, &draft.description) }),
        );
    }
    if !draft.aliases.is_empty() {
        let aliases: Vec<JsonValue> = draft.aliases.iter().map(|a| term(language, a)).collect();
        data.insert("aliases".into(), json!({ language: aliases }));
    }
    if let (EntityKind::Property, Some(datatype)) = (draft.kind, draft.datatype) {
        data.insert("datatype".into(), json!(datatype.as_str()));
    }
    if !draft.statements.is_empty() {
        let claims: Vec<JsonValue> = draft
            .statements
            .iter()
            .map(|s| encode_claim(s, None))
            .collect();
        data.insert("claims".into(), JsonValue::Array(claims));
    }
    JsonValue::Object(data)
}

pub fn encode_patch(patch: &EntityPatch) -> JsonValue {
    let language = patch.language.as_str();
    let mut data = Map::new();
    if let Some(description) = &patch.description {
        data.insert(
            "descriptions".into(),
            json!({ language: term(language, description) }),
        );
    }
    let aliases: Vec<JsonValue> = patch
        .add_aliases
        .iter()
        .map(|a| json!({ "language": language, "value": a, "add": "" }))
        .chain(
            patch
                .remove_aliases
                .iter()
                .map(|a| json!({ "language": language, "value": a, "remove": "" })),
        )
        .collect();
    if !aliases.is_empty() {
        data.insert("aliases".into(), JsonValue::Array(aliases));
    }
    JsonValue::Object(data)
}

/// `data` payload applying all `ops` to one entity in a single edit.
pub fn encode_operations(ops: &[Operation]) -> JsonValue {
    let claims: Vec<JsonValue> = ops
        .iter()
        .map(|op| match op {
            Operation::Create(statement) => encode_claim(statement, None),
            Operation::Update { id, statement } => encode_claim(statement, Some(id)),
            Operation::Delete { id } => json!({ "id": id, "remove": "" }),
        })
        .collect();
    json!({ "claims": claims })
}
