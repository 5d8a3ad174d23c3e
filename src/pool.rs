//! Token pool: discovery, round-robin scheduling, refresh, and failover
//! over a set of Kiro access tokens.
//!
//! Generalizes the refresh-threshold check and `AuthType`-dispatched refresh
//! of a single-token manager into a `Vec` of records scheduled round-robin,
//! each refreshed under its own lock so concurrent `acquire()` calls never
//! thunder into the same refresh endpoint twice.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{aws_sso_oidc, constants, kiro_desktop};
use crate::config;
use crate::error::{Error, Result};
use crate::models::auth::{AuthType, KiroTokenInfo};

/// Whether a token authenticates via Kiro's "social" desktop login (which
/// requires `profileArn` propagation) or a provisioned API-key-style
/// credential (which does not).
///
/// Derived from `AuthType`: `KiroDesktop` is social, `AwsSsoOidc` is
/// api-key. The two enums model orthogonal concerns in the underlying
/// client (refresh endpoint selection vs. ARN gating); this mapping is a
/// deliberate, documented correspondence rather than a structural one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Social,
    ApiKey,
}

impl From<AuthType> for AuthMethod {
    fn from(t: AuthType) -> Self {
        match t {
            AuthType::KiroDesktop => AuthMethod::Social,
            AuthType::AwsSsoOidc => AuthMethod::ApiKey,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Loaded,
    Fresh,
    Refreshing,
    Failed,
    Evicted,
}

struct TokenRecordInner {
    id: String,
    info: KiroTokenInfo,
    auth_method: AuthMethod,
    source_path: Option<PathBuf>,
    state: RecordState,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

impl TokenRecordInner {
    fn is_live(&self) -> bool {
        if self.state == RecordState::Evicted {
            return false;
        }
        match self.cooldown_until {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }
}

/// Immutable snapshot of a pooled token, safe to hand to a caller.
#[derive(Debug, Clone)]
pub struct TokenHandle {
    pub id: String,
    pub access_token: String,
    pub profile_arn: Option<String>,
    pub auth_method: AuthMethod,
    pub region: String,
}

/// Round-robin pool of Kiro access tokens with per-record refresh and
/// failover.
pub struct TokenPool {
    client: reqwest::Client,
    fingerprint: String,
    records: Mutex<Vec<TokenRecordInner>>,
    cursor: AtomicUsize,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenPool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            fingerprint: constants::machine_fingerprint(),
            records: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Scan `auth_dir` for files matching `kiro*auth*token*.json`.
    pub fn discover(auth_dir: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(auth_dir) else {
            return out;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let lower = name.to_ascii_lowercase();
            if lower.starts_with("kiro")
                && lower.contains("auth")
                && lower.contains("token")
                && lower.ends_with(".json")
            {
                out.push(path);
            }
        }
        out.sort();
        out
    }

    /// Load and register every token file discovered under `auth_dir`.
    pub async fn load_discovered(&self, auth_dir: &Path) -> usize {
        let paths = Self::discover(auth_dir);
        let mut loaded = 0;
        for path in paths {
            match Self::parse_token_file(&path) {
                Ok(info) => {
                    self.add_token(info, Some(path)).await;
                    loaded += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to load token file"),
            }
        }
        loaded
    }

    /// Parse a token JSON file on disk. A missing `type` field is
    /// synthesized as `"kiro"` in memory only; the file itself is never
    /// rewritten.
    fn parse_token_file(path: &Path) -> Result<KiroTokenInfo> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::storage_io(path, e.to_string()))?;
        let data: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| Error::StorageSerialization(e.to_string()))?;

        let mut token = KiroTokenInfo::new(
            data.get("refreshToken")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        );
        if token.refresh_token.is_empty() {
            return Err(Error::MissingCredential(
                "refreshToken not found in token file".into(),
            ));
        }
        if let Some(v) = data.get("accessToken").and_then(|v| v.as_str()) {
            token.access_token = v.to_string();
        }
        if let Some(v) = data.get("profileArn").and_then(|v| v.as_str()) {
            token.profile_arn = Some(v.to_string());
        }
        if let Some(v) = data.get("region").and_then(|v| v.as_str()) {
            token.region = v.to_string();
        }
        if let Some(v) = data.get("expiresAt").and_then(|v| v.as_str()) {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(v) {
                token.expires_at = dt.timestamp();
            }
        }
        if data.get("type").and_then(|v| v.as_str()).is_none() {
            debug!(path = %path.display(), "Token file has no `type`; synthesizing `kiro`");
        }
        token.detect_auth_type();
        Ok(token)
    }

    /// Register one token directly (bypassing disk discovery).
    pub async fn add_token(&self, info: KiroTokenInfo, source_path: Option<PathBuf>) -> String {
        let id = source_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| format!("token-{}", uuid::Uuid::new_v4()));

        let auth_method = AuthMethod::from(info.auth_type);
        let mut records = self.records.lock().await;
        records.push(TokenRecordInner {
            id: id.clone(),
            info,
            auth_method,
            source_path,
            state: RecordState::Loaded,
            consecutive_failures: 0,
            cooldown_until: None,
        });
        id
    }

    /// Acquire the next live token, refreshing it first if it's within the
    /// expiry skew window. Advances the round-robin cursor monotonically.
    pub async fn acquire(&self) -> Result<TokenHandle> {
        let len = {
            let records = self.records.lock().await;
            records.len()
        };
        if len == 0 {
            return Err(Error::NoLiveTokens);
        }

        for _ in 0..len {
            let start = self.cursor.fetch_add(1, Ordering::SeqCst) % len;
            let candidate = {
                let records = self.records.lock().await;
                records.get(start).filter(|r| r.is_live()).map(|r| r.id.clone())
            };
            let Some(id) = candidate else { continue };

            if self.needs_refresh(&id).await {
                if let Err(e) = self.refresh_record(&id).await {
                    warn!(token_id = %id, error = %e, "Token refresh failed, trying next");
                    self.report_failure(&id, &e).await;
                    continue;
                }
            }

            if let Some(handle) = self.snapshot(&id).await {
                return Ok(handle);
            }
        }

        Err(Error::NoLiveTokens)
    }

    async fn needs_refresh(&self, id: &str) -> bool {
        let records = self.records.lock().await;
        records
            .iter()
            .find(|r| r.id == id)
            .map(|r| {
                let now = chrono::Utc::now().timestamp();
                r.info.expires_at <= now + config::TOKEN_SKEW_WINDOW.as_secs() as i64
            })
            .unwrap_or(false)
    }

    async fn snapshot(&self, id: &str) -> Option<TokenHandle> {
        let records = self.records.lock().await;
        records.iter().find(|r| r.id == id).map(|r| TokenHandle {
            id: r.id.clone(),
            access_token: r.info.access_token.clone(),
            profile_arn: r.info.profile_arn.clone(),
            auth_method: r.auth_method,
            region: r.info.region.clone(),
        })
    }

    async fn refresh_lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn refresh_record(&self, id: &str) -> Result<()> {
        let lock = self.refresh_lock_for(id).await;
        let _guard = lock.lock().await;

        // Another task may have refreshed this record while we waited.
        if !self.needs_refresh(id).await {
            return Ok(());
        }

        let info = {
            let mut records = self.records.lock().await;
            let Some(record) = records.iter_mut().find(|r| r.id == id) else {
                return Ok(());
            };
            record.state = RecordState::Refreshing;
            record.info.clone()
        };

        let refreshed = match info.auth_type {
            AuthType::KiroDesktop => {
                let resp =
                    kiro_desktop::refresh_token(&self.client, &info, &self.fingerprint).await?;
                let mut updated = info.clone();
                updated.access_token = resp.access_token;
                if let Some(rt) = resp.refresh_token.filter(|s| !s.is_empty()) {
                    updated.refresh_token = rt;
                }
                if let Some(arn) = resp.profile_arn.filter(|s| !s.is_empty()) {
                    updated.profile_arn = Some(arn);
                }
                updated.expires_at = chrono::Utc::now().timestamp() + resp.expires_in;
                updated
            }
            AuthType::AwsSsoOidc => {
                let resp = aws_sso_oidc::refresh_token(&self.client, &info).await?;
                let mut updated = info.clone();
                updated.access_token = resp.access_token;
                if let Some(rt) = resp.refresh_token.filter(|s| !s.is_empty()) {
                    updated.refresh_token = rt;
                }
                updated.expires_at = chrono::Utc::now().timestamp() + resp.expires_in;
                updated
            }
        };

        let mut records = self.records.lock().await;
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.info = refreshed;
            record.state = RecordState::Fresh;
            record.consecutive_failures = 0;
            record.cooldown_until = None;
        }
        info!(token_id = id, "Token refreshed");
        Ok(())
    }

    /// Record a request failure against a token. Hard failures (HTTP
    /// status >= 500, or status-less network errors) count toward the
    /// unhealthy threshold; once reached, the record is put into cooldown.
    pub async fn report_failure(&self, id: &str, err: &Error) {
        let hard = err.status_code().map(|s| s >= 500).unwrap_or(true);
        if !hard {
            return;
        }
        let mut records = self.records.lock().await;
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.consecutive_failures += 1;
            if record.consecutive_failures >= config::TOKEN_UNHEALTHY_THRESHOLD {
                record.state = RecordState::Failed;
                record.cooldown_until =
                    Some(Instant::now() + config::TOKEN_FAILURE_COOLDOWN);
                warn!(token_id = id, "Token marked unhealthy, entering cooldown");
            }
        }
    }

    pub async fn report_success(&self, id: &str) {
        let mut records = self.records.lock().await;
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.consecutive_failures = 0;
            record.cooldown_until = None;
            if record.state != RecordState::Evicted {
                record.state = RecordState::Fresh;
            }
        }
    }

    /// Re-scan `auth_dir`: load newly appeared files and evict records
    /// whose backing file has disappeared.
    pub async fn reload_config(&self, auth_dir: &Path) {
        let discovered: std::collections::HashSet<PathBuf> =
            Self::discover(auth_dir).into_iter().collect();

        {
            let mut records = self.records.lock().await;
            for record in records.iter_mut() {
                if let Some(path) = &record.source_path {
                    if !discovered.contains(path) {
                        record.state = RecordState::Evicted;
                    }
                }
            }
        }

        let known: std::collections::HashSet<PathBuf> = {
            let records = self.records.lock().await;
            records.iter().filter_map(|r| r.source_path.clone()).collect()
        };
        for path in discovered.difference(&known) {
            if let Ok(info) = Self::parse_token_file(path) {
                self.add_token(info, Some(path.clone())).await;
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

impl Default for TokenPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_token(region: &str) -> KiroTokenInfo {
        let mut t = KiroTokenInfo::new("rt".to_string());
        t.access_token = format!("at-{region}");
        t.region = region.to_string();
        t.expires_at = chrono::Utc::now().timestamp() + 3600;
        t
    }

    #[tokio::test]
    async fn round_robin_distributes_across_all_live_tokens() {
        let pool = TokenPool::new();
        pool.add_token(fresh_token("a"), None).await;
        pool.add_token(fresh_token("b"), None).await;
        pool.add_token(fresh_token("c"), None).await;

        let mut seen = std::collections::HashSet::new();
        for _ in 0..6 {
            let handle = pool.acquire().await.unwrap();
            seen.insert(handle.access_token);
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn empty_pool_returns_no_live_tokens() {
        let pool = TokenPool::new();
        assert!(matches!(pool.acquire().await, Err(Error::NoLiveTokens)));
    }

    #[tokio::test]
    async fn unhealthy_token_enters_cooldown_and_is_skipped() {
        let pool = TokenPool::new();
        let id = pool.add_token(fresh_token("a"), None).await;
        pool.add_token(fresh_token("b"), None).await;

        for _ in 0..config::TOKEN_UNHEALTHY_THRESHOLD {
            pool.report_failure(
                &id,
                &Error::Api {
                    status: 503,
                    message: "unavailable".to_string(),
                },
            )
            .await;
        }

        for _ in 0..4 {
            let handle = pool.acquire().await.unwrap();
            assert_eq!(handle.access_token, "at-b");
        }
    }
}
