use std::sync::Arc;
use std::time::Duration;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, error, debug};
use crate::alist_client::AlistClient;
use crate::error::AppError;

const CACHE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache");

/// Fixed key the access token is cached under.
pub const TOKEN_CACHE_KEY: &str = "aliyun_access_token";

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 7200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    /// Absolute expiry, unix epoch seconds.
    pub expires_at: i64,
}

impl CachedToken {
    pub fn is_valid_at(&self, now: i64) -> bool {
        !self.access_token.is_empty() && self.expires_at > now
    }
}

/// Key-value cache that survives restarts.
pub trait TokenStore: Send + Sync {
    fn load(&self, key: &str) -> Option<CachedToken>;
    fn save(&self, key: &str, token: &CachedToken);
}

#[derive(Debug, Clone)]
pub struct RedbTokenStore {
    db: Arc<Database>,
}

impl RedbTokenStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn try_load(&self, key: &str) -> Result<Option<CachedToken>, redb::Error> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(CACHE_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(entry) = table.get(key)? else {
            return Ok(None);
        };
        Ok(serde_json::from_slice(entry.value()).ok())
    }

    fn try_save(&self, key: &str, token: &CachedToken) -> Result<(), AppError> {
        let bytes = serde_json::to_vec(token)?;
        self.write(key, &bytes)?;
        Ok(())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), redb::Error> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CACHE_TABLE)?;
            table.insert(key, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl TokenStore for RedbTokenStore {
    fn load(&self, key: &str) -> Option<CachedToken> {
        self.try_load(key).unwrap_or_else(|e| {
            error!("Failed to read cached token '{}': {}", key, e);
            None
        })
    }

    fn save(&self, key: &str, token: &CachedToken) {
        if let Err(e) = self.try_save(key, token) {
            error!("Failed to persist cached token '{}': {}", key, e);
        }
    }
}

/// OAuth material stored in the Alist storage's `addition` document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DriveCredentials {
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub oauth_token_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

impl DriveCredentials {
    pub fn from_addition(addition: &str) -> Result<Self, AppError> {
        let creds: Self = serde_json::from_str(addition)?;
        if creds.refresh_token.is_empty() {
            return Err(AppError::Api("storage addition carries no refresh_token".to_string()));
        }
        Ok(creds)
    }
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Read-through cache for the cloud-drive bearer token.
///
/// Concurrent callers that both find the token expired will both refresh;
/// the refresh endpoint tolerates that.
pub struct TokenCache {
    http: reqwest::Client,
    alist: Arc<AlistClient>,
    storage_id: Option<u64>,
    default_token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    credentials: Mutex<Option<DriveCredentials>>,
    store: Arc<dyn TokenStore>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("storage_id", &self.storage_id)
            .field("default_token_url", &self.default_token_url)
            .finish()
    }
}

impl TokenCache {
    pub fn new(
        alist: Arc<AlistClient>,
        storage_id: Option<u64>,
        aliyun_host: &str,
        client_id: Option<String>,
        client_secret: Option<String>,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            alist,
            storage_id,
            default_token_url: format!("{}/oauth/access_token", aliyun_host.trim_end_matches('/')),
            client_id,
            client_secret,
            credentials: Mutex::new(None),
            store,
        })
    }

    pub async fn get_token(&self) -> Result<String, AppError> {
        let now = chrono::Utc::now().timestamp();
        if let Some(cached) = self.store.load(TOKEN_CACHE_KEY) {
            if cached.is_valid_at(now) {
                debug!("Using cached access token, {}s left", cached.expires_at - now);
                return Ok(cached.access_token);
            }
        }

        let creds = self.credentials().await?;
        let refreshed = self.refresh(&creds).await?;

        let lifetime = refreshed.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let token = CachedToken {
            access_token: refreshed.access_token,
            expires_at: chrono::Utc::now().timestamp() + lifetime,
        };
        self.store.save(TOKEN_CACHE_KEY, &token);

        if let Some(rotated) = refreshed.refresh_token.filter(|t| !t.is_empty()) {
            if let Some(held) = self.credentials.lock().await.as_mut() {
                held.refresh_token = rotated;
            }
        }

        info!("Refreshed cloud-drive access token, valid for {}s", lifetime);
        Ok(token.access_token)
    }

    /// Forget the cached token so the next `get_token` refreshes.
    pub fn invalidate(&self) {
        self.store.save(
            TOKEN_CACHE_KEY,
            &CachedToken { access_token: String::new(), expires_at: 0 },
        );
    }

    /// Refresh credentials, fetched from the Alist storage on first use.
    async fn credentials(&self) -> Result<DriveCredentials, AppError> {
        let mut held = self.credentials.lock().await;
        if let Some(creds) = held.as_ref() {
            return Ok(creds.clone());
        }

        let storage_id = self
            .storage_id
            .ok_or_else(|| AppError::Config("Alist storage id is not configured".to_string()))?;
        let storage = self.alist.get_storage(storage_id).await?;
        if !storage.driver.contains("Aliyun") {
            return Err(AppError::Config(format!(
                "Alist storage {} uses driver '{}', not an Aliyun drive",
                storage_id, storage.driver
            )));
        }
        let creds = DriveCredentials::from_addition(&storage.addition)?;
        debug!("Loaded refresh token from Alist storage {}", storage_id);
        *held = Some(creds.clone());
        Ok(creds)
    }

    async fn refresh(&self, creds: &DriveCredentials) -> Result<RefreshResponse, AppError> {
        let url = if creds.oauth_token_url.is_empty() {
            self.default_token_url.as_str()
        } else {
            creds.oauth_token_url.as_str()
        };
        let body = RefreshRequest {
            grant_type: "refresh_token",
            refresh_token: &creds.refresh_token,
            client_id: self.client_id.as_deref().or_else(|| non_empty(&creds.client_id)),
            client_secret: self.client_secret.as_deref().or_else(|| non_empty(&creds.client_secret)),
        };

        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::Api(format!("token refresh returned {}: {}", status, text)));
        }
        let refreshed: RefreshResponse = resp.json().await?;
        if refreshed.access_token.is_empty() {
            return Err(AppError::Api("token refresh returned an empty access token".to_string()));
        }
        Ok(refreshed)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    Some(s).filter(|s| !s.is_empty())
}
