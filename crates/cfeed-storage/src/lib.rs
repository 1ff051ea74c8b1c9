//! HTTP access to the comment feed and record stores for decoded comments.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use cfeed_core::AccessToken;
use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "cfeed-storage";

/// The only table the bundled migrations create.
pub const DEFAULT_TABLE: &str = "reddit_comments";

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedRequest {
    pub url: String,
    pub limit: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub url: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("token response is not json: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("token response (http {status}) carries no access_token string")]
    MissingToken { status: u16 },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("could not build feed request: {0}")]
    RequestBuild(#[source] reqwest::Error),
    #[error("feed request failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Shared HTTP client for the token exchange and the feed fetch.
///
/// Built once per process; every call sets its own deadline on top of the
/// client-level default.
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: reqwest::Client,
}

impl FeedClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// Exchange application credentials for a bearer token (client-credentials grant).
    pub async fn exchange_client_credentials(
        &self,
        request: &TokenRequest,
    ) -> Result<AccessToken, AuthError> {
        let basic = BASE64_STANDARD.encode(format!(
            "{}:{}",
            request.client_id, request.client_secret
        ));

        let resp = self
            .client
            .post(&request.url)
            .header(AUTHORIZATION, format!("Basic {basic}"))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .timeout(request.timeout)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.bytes().await?;
        let value: JsonValue = serde_json::from_slice(&body)?;

        let secret = value
            .get("access_token")
            .and_then(JsonValue::as_str)
            .ok_or(AuthError::MissingToken { status })?;
        let expires_in = value
            .get("expires_in")
            .and_then(JsonValue::as_u64)
            .map(Duration::from_secs);

        Ok(AccessToken::new(secret, Utc::now(), expires_in))
    }

    pub async fn fetch_feed(
        &self,
        cycle_id: Uuid,
        request: &FeedRequest,
        token: Option<&AccessToken>,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("feed_fetch", %cycle_id, url = %request.url);
        let result = self.fetch_feed_inner(request, token).instrument(span.clone()).await;

        span.in_scope(|| match &result {
            Ok(resp) => debug!(bytes = resp.body.len(), "feed fetched"),
            Err(err) => error!(error = %err, "feed fetch failed"),
        });
        result
    }

    async fn fetch_feed_inner(
        &self,
        request: &FeedRequest,
        token: Option<&AccessToken>,
    ) -> Result<FetchedResponse, FetchError> {
        let mut builder = self
            .client
            .get(&request.url)
            .query(&[("limit", request.limit)])
            .header(ACCEPT, "application/json")
            .timeout(request.timeout);

        if let Some(token) = token {
            builder = builder.bearer_auth(token.secret());
        }

        let http_request = builder.build().map_err(FetchError::RequestBuild)?;
        let resp = self
            .client
            .execute(http_request)
            .await
            .map_err(FetchError::Network)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }

        let body = resp.bytes().await.map_err(FetchError::Network)?.to_vec();
        Ok(FetchedResponse { status, body })
    }
}

/// Typed attribute in the store's native record format. Numbers travel as decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::S(value) => Some(value),
            Self::N(_) => None,
        }
    }
}

pub type AttributeMap = BTreeMap<String, AttributeValue>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not marshal record: {0}")]
    Serialization(String),
    #[error("upsert rejected: {0}")]
    Write(#[source] BoxError),
    #[error("upsert timed out after {0:?}")]
    Timeout(Duration),
}

pub fn to_attribute_map<T: Serialize>(record: &T) -> Result<AttributeMap, StoreError> {
    let value = serde_json::to_value(record)
        .map_err(|err| StoreError::Serialization(err.to_string()))?;
    let JsonValue::Object(fields) = value else {
        return Err(StoreError::Serialization(
            "record does not serialize to an object".to_string(),
        ));
    };

    fields
        .into_iter()
        .map(|(name, value)| {
            let attr = match value {
                JsonValue::String(s) => AttributeValue::S(s),
                JsonValue::Number(n) => AttributeValue::N(n.to_string()),
                other => {
                    return Err(StoreError::Serialization(format!(
                        "field `{name}` has unsupported type: {other}"
                    )))
                }
            };
            Ok((name, attr))
        })
        .collect()
}

pub fn from_attribute_map<T: DeserializeOwned>(item: &AttributeMap) -> Result<T, StoreError> {
    let mut fields = serde_json::Map::with_capacity(item.len());
    for (name, attr) in item {
        let value = match attr {
            AttributeValue::S(s) => JsonValue::String(s.clone()),
            AttributeValue::N(n) => {
                let number: serde_json::Number = serde_json::from_str(n).map_err(|_| {
                    StoreError::Serialization(format!("field `{name}` is not a number: {n}"))
                })?;
                JsonValue::Number(number)
            }
        };
        fields.insert(name.clone(), value);
    }
    serde_json::from_value(JsonValue::Object(fields))
        .map_err(|err| StoreError::Serialization(err.to_string()))
}

fn primary_key(item: &AttributeMap) -> Result<&str, StoreError> {
    item.get("id")
        .and_then(AttributeValue::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| StoreError::Serialization("record has no string `id` attribute".to_string()))
}

/// Keyed upsert target. Writing the same `id` twice overwrites.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put_item(&self, item: AttributeMap) -> Result<(), StoreError>;

    fn describe(&self) -> String;
}

/// Bound a single upsert by `timeout`.
pub async fn put_with_timeout(
    store: &dyn RecordStore,
    item: AttributeMap,
    timeout: Duration,
) -> Result<(), StoreError> {
    tokio::time::timeout(timeout, store.put_item(item))
        .await
        .map_err(|_| StoreError::Timeout(timeout))?
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    items: Mutex<HashMap<String, AttributeMap>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn get(&self, id: &str) -> Option<AttributeMap> {
        self.items.lock().await.get(id).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put_item(&self, item: AttributeMap) -> Result<(), StoreError> {
        let id = primary_key(&item)?.to_string();
        self.items.lock().await.insert(id, item);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Postgres-backed key-value table: `(id TEXT PRIMARY KEY, item JSONB, updated_at)`.
pub struct PgRecordStore {
    pool: PgPool,
    table: String,
    upsert_sql: String,
}

impl fmt::Debug for PgRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgRecordStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl PgRecordStore {
    /// Does not touch the network; connections are opened on first write.
    pub fn connect_lazy(database_url: &str, table: &str) -> anyhow::Result<Self> {
        validate_table_name(table)?;
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(database_url)
            .context("parsing DATABASE_URL")?;
        Ok(Self {
            pool,
            table: table.to_string(),
            upsert_sql: upsert_statement(table),
        })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        if !migrations_cover_table(&self.table) {
            warn!(
                table = %self.table,
                migrated = DEFAULT_TABLE,
                "migrations only create the default table; create the configured table by hand"
            );
        }
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("applying migrations")
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn put_item(&self, item: AttributeMap) -> Result<(), StoreError> {
        let id = primary_key(&item)?.to_string();
        sqlx::query(&self.upsert_sql)
            .bind(id)
            .bind(Json(&item))
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::Write(Box::new(err)))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("postgres table {}", self.table)
    }
}

pub fn migrations_cover_table(table: &str) -> bool {
    table == DEFAULT_TABLE
}

fn validate_table_name(table: &str) -> anyhow::Result<()> {
    let mut chars = table.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_head && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        anyhow::bail!("invalid table name {table:?}: expected a plain SQL identifier")
    }
}

fn upsert_statement(table: &str) -> String {
    format!(
        "INSERT INTO {table} (id, item, updated_at) VALUES ($1, $2, now()) \
         ON CONFLICT (id) DO UPDATE SET item = EXCLUDED.item, updated_at = now()"
    )
}
