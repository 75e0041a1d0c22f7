use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use async_lock::Mutex as AsyncMutex;
use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::{Map, Value};
use url::Url;

use crate::database::error::{
    internal_error, invalid_argument, permission_denied, DatabaseError, DatabaseResult,
};
use crate::database::options::DatabaseOptions;
use crate::logger::Logger;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@whysoserious/database"));

/// Storage engine behind a [`Database`](crate::database::Database).
///
/// Paths are pre-split into segments; an empty slice addresses the root.
/// `query` carries REST-style ordering parameters which backends may use to
/// filter server-side.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    async fn set(&self, path: &[String], value: Value) -> DatabaseResult<()>;
    async fn update(
        &self,
        base_path: &[String],
        updates: Vec<(Vec<String>, Value)>,
    ) -> DatabaseResult<()>;
    async fn delete(&self, path: &[String]) -> DatabaseResult<()>;
    async fn get(&self, path: &[String], query: &[(String, String)]) -> DatabaseResult<Value>;
}

pub(crate) fn select_backend(options: &DatabaseOptions) -> Arc<dyn DatabaseBackend> {
    if let Some(url) = &options.database_url {
        match RestBackend::new(url, options.auth_token.clone()) {
            Ok(backend) => return Arc::new(backend),
            Err(err) => {
                LOGGER.warn(format!(
                    "Falling back to in-memory Realtime Database backend: {err}"
                ));
            }
        }
    }
    Arc::new(InMemoryBackend::default())
}

/// Process-local JSON tree. Access rules can be installed to simulate
/// security-rule rejections: a denied path rejects operations on itself and
/// every descendant.
pub struct InMemoryBackend {
    data: AsyncMutex<Value>,
    rules: Mutex<AccessRules>,
}

#[derive(Default)]
struct AccessRules {
    denied_reads: Vec<Vec<String>>,
    denied_writes: Vec<Vec<String>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            data: AsyncMutex::new(Value::Null),
            rules: Mutex::new(AccessRules::default()),
        }
    }
}

impl InMemoryBackend {
    pub fn deny_read(&self, path: &str) {
        let segments = split_path(path);
        self.lock_rules().denied_reads.push(segments);
    }

    pub fn deny_write(&self, path: &str) {
        let segments = split_path(path);
        self.lock_rules().denied_writes.push(segments);
    }

    /// Removes every rule previously installed with `deny_read`/`deny_write`.
    pub fn allow_all(&self) {
        let mut rules = self.lock_rules();
        rules.denied_reads.clear();
        rules.denied_writes.clear();
    }

    fn lock_rules(&self) -> std::sync::MutexGuard<'_, AccessRules> {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_read(&self, path: &[String]) -> DatabaseResult<()> {
        let rules = self.lock_rules();
        if rules
            .denied_reads
            .iter()
            .any(|denied| path_starts_with(path, denied))
        {
            return Err(permission_denied(format!(
                "Client doesn't have permission to read /{}",
                path.join("/")
            )));
        }
        Ok(())
    }

    fn check_write(&self, path: &[String]) -> DatabaseResult<()> {
        let rules = self.lock_rules();
        if rules
            .denied_writes
            .iter()
            .any(|denied| path_starts_with(path, denied))
        {
            return Err(permission_denied(format!(
                "Client doesn't have permission to write /{}",
                path.join("/")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseBackend for InMemoryBackend {
    async fn set(&self, path: &[String], value: Value) -> DatabaseResult<()> {
        self.check_write(path)?;
        let mut data = self.data.lock().await;
        set_at_path(&mut data, path, value);
        Ok(())
    }

    async fn update(
        &self,
        _base_path: &[String],
        updates: Vec<(Vec<String>, Value)>,
    ) -> DatabaseResult<()> {
        for (path, _) in &updates {
            self.check_write(path)?;
        }
        let mut data = self.data.lock().await;
        for (path, value) in updates {
            set_at_path(&mut data, &path, value);
        }
        Ok(())
    }

    async fn delete(&self, path: &[String]) -> DatabaseResult<()> {
        self.check_write(path)?;
        let mut data = self.data.lock().await;
        set_at_path(&mut data, path, Value::Null);
        Ok(())
    }

    async fn get(&self, path: &[String], _query: &[(String, String)]) -> DatabaseResult<Value> {
        self.check_read(path)?;
        let data = self.data.lock().await;
        Ok(get_at_path(&data, path).cloned().unwrap_or(Value::Null))
    }
}

/// Talks to a hosted database or emulator through the `.json` REST endpoints.
pub struct RestBackend {
    client: Client,
    base_url: Url,
    base_query: Vec<(String, String)>,
    auth_token: Option<String>,
}

impl RestBackend {
    pub fn new(raw_url: &str, auth_token: Option<String>) -> DatabaseResult<Self> {
        let mut url = Url::parse(raw_url)
            .map_err(|err| invalid_argument(format!("Invalid database_url '{raw_url}': {err}")))?;

        if !url.path().ends_with('/') {
            let mut path = url.path().trim_end_matches('/').to_owned();
            path.push('/');
            url.set_path(&path);
        }

        // e.g. `?ns=demo` for the emulator; re-attached to every request
        let base_query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        url.set_query(None);

        let client = Client::builder()
            .build()
            .map_err(|err| internal_error(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: url,
            base_query,
            auth_token: auth_token.filter(|token| !token.is_empty()),
        })
    }

    fn url_for_path(&self, path: &[String], query: &[(String, String)]) -> DatabaseResult<Url> {
        let mut url = self.base_url.clone();
        {
            // segments are percent-encoded, so keys like `a?b` stay one segment
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| internal_error("Database URL cannot be used as a base"))?;
            segments.pop_if_empty();
            match path.split_last() {
                None => {
                    segments.push(".json");
                }
                Some((last, parents)) => {
                    segments.extend(parents);
                    segments.push(&format!("{last}.json"));
                }
            }
        }

        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (key, value) in self.base_query.iter().chain(query.iter()) {
                pairs.append_pair(key, value);
            }
            if let Some(token) = &self.auth_token {
                if !query.iter().any(|(key, _)| key == "auth") {
                    pairs.append_pair("auth", token);
                }
            }
        }

        Ok(url)
    }

    async fn send_request(
        &self,
        method: Method,
        path: &[String],
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> DatabaseResult<Response> {
        let url = self.url_for_path(path, query)?;
        let mut request = self.client.request(method, url);
        if let Some(payload) = body {
            request = request.json(payload);
        }
        request
            .send()
            .await
            .map_err(|err| internal_error(format!("Database request failed: {err}")))
    }

    async fn ensure_success(&self, response: Response) -> DatabaseResult<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.ok();
            Err(http_error(status, body))
        }
    }
}

fn silent() -> Vec<(String, String)> {
    vec![("print".to_string(), "silent".to_string())]
}

#[async_trait]
impl DatabaseBackend for RestBackend {
    async fn set(&self, path: &[String], value: Value) -> DatabaseResult<()> {
        let response = self
            .send_request(Method::PUT, path, &silent(), Some(&value))
            .await?;
        self.ensure_success(response).await.map(|_| ())
    }

    async fn update(
        &self,
        base_path: &[String],
        updates: Vec<(Vec<String>, Value)>,
    ) -> DatabaseResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut payload = Map::with_capacity(updates.len());
        for (absolute_path, value) in updates {
            if !path_starts_with(&absolute_path, base_path) {
                return Err(internal_error(
                    "Database update contained a path outside the reference",
                ));
            }
            let relative = &absolute_path[base_path.len()..];
            if relative.is_empty() {
                return Err(invalid_argument(
                    "Database update path cannot be empty relative to the reference",
                ));
            }
            payload.insert(relative.join("/"), value);
        }

        let body = Value::Object(payload);
        let response = self
            .send_request(Method::PATCH, base_path, &silent(), Some(&body))
            .await?;
        self.ensure_success(response).await.map(|_| ())
    }

    async fn delete(&self, path: &[String]) -> DatabaseResult<()> {
        let response = self
            .send_request(Method::DELETE, path, &silent(), None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.ensure_success(response).await.map(|_| ())
    }

    async fn get(&self, path: &[String], query: &[(String, String)]) -> DatabaseResult<Value> {
        let mut params = Vec::with_capacity(query.len() + 1);
        if !query.iter().any(|(key, _)| key == "format") {
            params.push(("format".to_string(), "export".to_string()));
        }
        params.extend_from_slice(query);

        let response = self.send_request(Method::GET, path, &params, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Value::Null);
        }
        let response = self.ensure_success(response).await?;

        response
            .json()
            .await
            .map_err(|err| internal_error(format!("Failed to decode database response: {err}")))
    }
}

fn http_error(status: StatusCode, body: Option<String>) -> DatabaseError {
    let message = body.as_deref().and_then(extract_error_message);

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            invalid_argument(message.unwrap_or_else(|| "Invalid data payload".to_string()))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            permission_denied(message.unwrap_or_else(|| "Permission denied".to_string()))
        }
        _ => internal_error(format!(
            "Database request failed with status {}{}",
            status.as_str(),
            message.map(|b| format!(": {b}")).unwrap_or_default()
        )),
    }
}

fn extract_error_message(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(raw) {
        if let Some(Value::String(message)) = obj.get("error") {
            return Some(message.clone());
        }
    }
    Some(raw.to_string())
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn path_starts_with(path: &[String], prefix: &[String]) -> bool {
    prefix.len() <= path.len()
        && path
            .iter()
            .zip(prefix.iter())
            .all(|(left, right)| left == right)
}

/// Writes `value` at `path`, creating intermediate objects. Writing null
/// removes the node and prunes parents left empty, so the tree never holds
/// empty objects.
fn set_at_path(root: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return;
    };

    if value.is_null() {
        remove_at_path(root, parents, last);
        return;
    }

    let mut current = root;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(obj) = current else {
            return;
        };
        current = obj
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(obj) = current {
        obj.insert(last.clone(), value);
    }
}

fn remove_at_path(node: &mut Value, parents: &[String], last: &str) {
    let Value::Object(obj) = node else {
        return;
    };
    match parents.split_first() {
        None => {
            obj.remove(last);
        }
        Some((head, rest)) => {
            if let Some(child) = obj.get_mut(head) {
                remove_at_path(child, rest, last);
                if matches!(child, Value::Object(map) if map.is_empty()) || child.is_null() {
                    obj.remove(head);
                }
            }
        }
    }
    if obj.is_empty() {
        *node = Value::Null;
    }
}

fn get_at_path<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for segment in path {
        match current {
            Value::Object(obj) => current = obj.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}
