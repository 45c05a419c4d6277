use std::time::Duration;

use itertools::Itertools;
use log::{debug, info};
use parking_lot::Mutex;
use reqwest::{
    StatusCode,
    blocking::{Client, RequestBuilder},
};
use serde_json::Value as JsonValue;

use crate::{
    error::GatewayError,
    gateway::{ApplyResult, EntityDraft, EntityGateway, EntityPatch, FailedOperation, wire},
    model::{EntityId, EntityKind, Operation, RemoteEntity},
    value::Value,
};

const EDIT_SUMMARY: &str = "wikibase-bulk";
const SEARCH_LIMIT: &str = "50";
/// `wbgetentities` accepts at most 50 ids per request.
const GET_ENTITIES_BATCH: usize = 50;
const ANONYMOUS_TOKEN: &str = "+\\";

const TRANSIENT_CODES: [&str; 3] = ["maxlag", "ratelimited", "readonly"];
const AUTH_CODES: [&str; 4] = ["badtoken", "notloggedin", "assertuserfailed", "permissiondenied"];

/// Connection settings. Not `Debug`: it carries the password.
#[derive(Clone)]
pub struct ApiSettings {
    pub api_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Namespace holding items, searched for identity statements.
    pub item_namespace: u32,
    pub user_agent: String,
    pub timeout: Duration,
}

pub struct ApiGateway {
    client: Client,
    settings: ApiSettings,
    csrf_token: Mutex<String>,
    logged_in: bool,
}

impl ApiGateway {
    /// Builds the HTTP client, logs in when credentials are set and fetches
    /// an edit token. Login failures are [`GatewayError::Auth`].
    pub fn connect(settings: ApiSettings) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.timeout)
            .cookie_store(true)
            .build()
            .map_err(|err| GatewayError::Rejected(format!("building HTTP client: {err}")))?;
        let mut gateway = Self {
            client,
            settings,
            csrf_token: Mutex::new(ANONYMOUS_TOKEN.to_string()),
            logged_in: false,
        };
        if let (Some(username), Some(password)) = (
            gateway.settings.username.clone(),
            gateway.settings.password.clone(),
        ) {
            gateway.login(&username, &password)?;
            gateway.logged_in = true;
            let token = gateway.fetch_csrf_token()?;
            *gateway.csrf_token.lock() = token;
        }
        Ok(gateway)
    }

    fn login(&self, username: &str, password: &str) -> Result<(), GatewayError> {
        let tokens = self.get(&[("action", "query"), ("meta", "tokens"), ("type", "login")])?;
        let login_token = tokens["query"]["tokens"]["logintoken"]
            .as_str()
            .ok_or_else(|| GatewayError::Auth("no login token in response".into()))?
            .to_string();
        let response = self.post(&[
            ("action", "login"),
            ("lgname", username),
            ("lgpassword", password),
            ("lgtoken", login_token.as_str()),
        ])?;
        match response["login"]["result"].as_str() {
            Some("Success") => {
                info!("Logged in to {} as {username}", self.settings.api_url);
                Ok(())
            }
            other => Err(GatewayError::Auth(format!(
                "login as {username} failed: {}",
                response["login"]["reason"]
                    .as_str()
                    .or(other)
                    .unwrap_or("no result")
            ))),
        }
    }

    fn fetch_csrf_token(&self) -> Result<String, GatewayError> {
        let response = self.get(&[("action", "query"), ("meta", "tokens")])?;
        response["query"]["tokens"]["csrftoken"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Auth("no csrf token in response".into()))
    }

    fn get(&self, params: &[(&str, &str)]) -> Result<JsonValue, GatewayError> {
        let request = self
            .client
            .get(&self.settings.api_url)
            .query(&[("format", "json")])
            .query(params);
        send(request, action_of(params))
    }

    fn post(&self, params: &[(&str, &str)]) -> Result<JsonValue, GatewayError> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("format", "json"));
        let request = self.client.post(&self.settings.api_url).form(&form);
        send(request, action_of(params))
    }

    /// `wbeditentity` with the session's edit token.
    fn edit(&self, target: (&str, &str), data: &JsonValue) -> Result<JsonValue, GatewayError> {
        let token = self.csrf_token.lock().clone();
        let data = data.to_string();
        let mut params = vec![
            ("action", "wbeditentity"),
            target,
            ("data", data.as_str()),
            ("summary", EDIT_SUMMARY),
            ("token", token.as_str()),
        ];
        if self.logged_in {
            params.push(("assert", "user"));
        }
        self.post(&params)
    }

    fn get_entities(
        &self,
        ids: &[String],
        language: &str,
    ) -> Result<Vec<RemoteEntity>, GatewayError> {
        let mut entities = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(GET_ENTITIES_BATCH) {
            let joined = chunk.join("|");
            let response = self.get(&[
                ("action", "wbgetentities"),
                ("ids", joined.as_str()),
                ("props", "labels|descriptions|aliases|claims|datatype"),
                ("languages", language),
            ])?;
            if let Some(found) = response["entities"].as_object() {
                for entity in found.values().filter(|e| e.get("missing").is_none()) {
                    entities.push(wire::decode_entity(entity, language)?);
                }
            }
        }
        Ok(entities)
    }
}

fn action_of<'a>(params: &[(&str, &'a str)]) -> &'a str {
    params
        .iter()
        .find(|(key, _)| *key == "action")
        .map(|(_, value)| *value)
        .unwrap_or("?")
}

fn send(request: RequestBuilder, action: &str) -> Result<JsonValue, GatewayError> {
    debug!("API request action={action}");
    let response = request.send().map_err(|err| transport_error(action, &err))?;
    let status = response.status();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(GatewayError::Transient(format!("{action}: HTTP {status}")));
    }
    if status.is_client_error() {
        return Err(GatewayError::Rejected(format!("{action}: HTTP {status}")));
    }
    let body: JsonValue = response
        .json()
        .map_err(|err| GatewayError::Transient(format!("{action}: unreadable response: {err}")))?;
    match body.get("error") {
        Some(error) => Err(classify_api_error(
            error["code"].as_str().unwrap_or_default(),
            error["info"].as_str().unwrap_or_default(),
        )),
        None => Ok(body),
    }
}

fn transport_error(action: &str, err: &reqwest::Error) -> GatewayError {
    let message = format!("{action}: {err}");
    if err.is_timeout() || err.is_connect() || err.is_request() {
        GatewayError::Transient(message)
    } else {
        GatewayError::Rejected(message)
    }
}

fn classify_api_error(code: &str, info: &str) -> GatewayError {
    let message = format!("{code}: {info}");
    if TRANSIENT_CODES.contains(&code) || code.starts_with("internal_api_error_") {
        GatewayError::Transient(message)
    } else if AUTH_CODES.contains(&code) {
        GatewayError::Auth(message)
    } else {
        GatewayError::Rejected(message)
    }
}

/// `Item:Q5` and `Q5` both name item Q5.
fn entity_id_from_title(title: &str) -> Option<EntityId> {
    let local = title.rsplit(':').next()?;
    EntityId::parse_item(local)
}

fn statement_search(property: &EntityId, value: &Value) -> String {
    let literal = value.identity_key().replace('"', "\\\"");
    format!("haswbstatement:\"{property}={literal}\"")
}

fn single(
    key: String,
    mut matches: Vec<RemoteEntity>,
) -> Result<Option<RemoteEntity>, GatewayError> {
    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop()),
        _ => Err(GatewayError::Ambiguous {
            key,
            candidates: matches.into_iter().map(|e| e.id).collect(),
        }),
    }
}

impl EntityGateway for ApiGateway {
    fn find_entity(
        &self,
        kind: EntityKind,
        label: &str,
        language: &str,
    ) -> Result<Option<RemoteEntity>, GatewayError> {
        let response = self.get(&[
            ("action", "wbsearchentities"),
            ("search", label),
            ("language", language),
            ("strictlanguage", "1"),
            ("type", kind.as_str()),
            ("limit", SEARCH_LIMIT),
        ])?;
        let ids = response["search"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|hit| hit["label"].as_str() == Some(label))
            .filter_map(|hit| hit["id"].as_str().map(str::to_string))
            .unique()
            .collect::<Vec<_>>();
        if ids.is_empty() {
            return Ok(None);
        }
        // Search hits can match on aliases; only exact labels count.
        let matches = self
            .get_entities(&ids, language)?
            .into_iter()
            .filter(|e| e.kind == kind && e.label == label)
            .collect();
        single(format!("{kind} '{label}'@{language}"), matches)
    }

    fn find_entity_by_statement(
        &self,
        property: &EntityId,
        value: &Value,
        language: &str,
    ) -> Result<Option<RemoteEntity>, GatewayError> {
        let search = statement_search(property, value);
        let namespace = self.settings.item_namespace.to_string();
        let response = self.get(&[
            ("action", "query"),
            ("list", "search"),
            ("srsearch", search.as_str()),
            ("srnamespace", namespace.as_str()),
            ("srlimit", SEARCH_LIMIT),
        ])?;
        let ids = response["query"]["search"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|hit| hit["title"].as_str().and_then(entity_id_from_title))
            .map(|id| id.to_string())
            .unique()
            .collect::<Vec<_>>();
        if ids.is_empty() {
            return Ok(None);
        }
        let wanted = value.identity_key();
        // The search index can lag behind edits; confirm against the entity.
        let matches = self
            .get_entities(&ids, language)?
            .into_iter()
            .filter(|e| {
                e.statements_for(property)
                    .any(|s| s.statement.main.value.identity_key() == wanted)
            })
            .collect();
        single(format!("{property}='{wanted}'"), matches)
    }

    fn create_entity(&self, draft: &EntityDraft) -> Result<RemoteEntity, GatewayError> {
        let response = self.edit(("new", draft.kind.as_str()), &wire::encode_draft(draft))?;
        let entity = wire::decode_entity(&response["entity"], &draft.language)?;
        info!("Created {} {} '{}'", draft.kind, entity.id, draft.label);
        Ok(entity)
    }

    fn update_entity(&self, id: &EntityId, patch: &EntityPatch) -> Result<(), GatewayError> {
        if patch.is_empty() {
            return Ok(());
        }
        self.edit(("id", id.as_str()), &wire::encode_patch(patch))?;
        Ok(())
    }

    fn apply_statement_ops(
        &self,
        id: &EntityId,
        ops: &[Operation],
    ) -> Result<ApplyResult, GatewayError> {
        if ops.is_empty() {
            return Ok(ApplyResult::default());
        }
        // One edit per call: the API applies all claims or none of them.
        match self.edit(("id", id.as_str()), &wire::encode_operations(ops)) {
            Ok(response) => Ok(ApplyResult {
                statements: Some(wire::decode_claims(&response["entity"]["claims"])),
                failed: Vec::new(),
            }),
            Err(GatewayError::Rejected(reason)) => Ok(ApplyResult {
                statements: None,
                failed: ops
                    .iter()
                    .map(|operation| FailedOperation {
                        operation: operation.clone(),
                        reason: reason.clone(),
                    })
                    .collect(),
            }),
            Err(other) => Err(other),
        }
    }
}
