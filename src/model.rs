use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "healthy" => Some(HealthStatus::Healthy),
            "unhealthy" => Some(HealthStatus::Unhealthy),
            "unknown" => Some(HealthStatus::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Error,
    Running,
    #[serde(rename = "none")]
    Never,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
            SyncStatus::Running => "running",
            SyncStatus::Never => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(SyncStatus::Success),
            "error" => Some(SyncStatus::Error),
            "running" => Some(SyncStatus::Running),
            "none" => Some(SyncStatus::Never),
            _ => None,
        }
    }
}

/// Counts recorded after the last finished sync run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncCounts {
    pub synced: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub enabled: bool,
    pub api_base_url: String,
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    pub tags: Vec<String>,
    pub config: Map<String, Value>,
    pub health_status: HealthStatus,
    pub health_error: Option<String>,
    pub health_latency_ms: Option<i64>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: SyncStatus,
    pub last_sync_result: SyncCounts,
    pub last_sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSource {
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Fields used when seeding or creating a source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewDataSource {
    pub name: String,
    pub display_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub api_base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// Operator edit of a source; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceUpdate {
    pub display_name: Option<String>,
    pub enabled: Option<bool>,
    pub api_base_url: Option<String>,
    pub api_key: Option<String>,
    pub tags: Option<Vec<String>>,
    pub config: Option<Map<String, Value>>,
}

impl DataSourceUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.enabled.is_none()
            && self.api_base_url.is_none()
            && self.api_key.is_none()
            && self.tags.is_none()
            && self.config.is_none()
    }

    /// Names of the fields carried by this update, for the audit log.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.display_name.is_some() {
            out.push("displayName");
        }
        if self.enabled.is_some() {
            out.push("enabled");
        }
        if self.api_base_url.is_some() {
            out.push("apiBaseUrl");
        }
        if self.api_key.is_some() {
            out.push("apiKey");
        }
        if self.tags.is_some() {
            out.push("tags");
        }
        if self.config.is_some() {
            out.push("config");
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeywordSourceType {
    Admin,
    User,
}

impl KeywordSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordSourceType::Admin => "admin",
            KeywordSourceType::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(KeywordSourceType::Admin),
            "user" => Some(KeywordSourceType::User),
            _ => None,
        }
    }
}

/// Which keyword subscriptions a keyword-driven sync covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordScope {
    All,
    Only(KeywordSourceType),
}

impl KeywordScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" | "" => Some(KeywordScope::All),
            other => KeywordSourceType::parse(other).map(KeywordScope::Only),
        }
    }

    pub fn includes(&self, source_type: KeywordSourceType) -> bool {
        match self {
            KeywordScope::All => true,
            KeywordScope::Only(t) => *t == source_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Keyword {
    pub id: i64,
    pub keyword: String,
    pub category: Option<String>,
    pub source_type: KeywordSourceType,
    pub is_active: bool,
    pub priority: i64,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewKeyword {
    pub keyword: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_source_type")]
    pub source_type: KeywordSourceType,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewKeyword {
    pub fn new(keyword: impl Into<String>, priority: i64) -> Self {
        Self {
            keyword: keyword.into(),
            category: None,
            source_type: KeywordSourceType::Admin,
            is_active: true,
            priority,
            description: None,
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordUpdate {
    pub keyword: Option<String>,
    pub category: Option<String>,
    pub source_type: Option<KeywordSourceType>,
    pub is_active: Option<bool>,
    pub priority: Option<i64>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Filters for listing keywords.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordFilter {
    pub source_type: Option<KeywordSourceType>,
    pub is_active: Option<bool>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncLogType {
    Sync,
    HealthCheck,
    ConfigUpdate,
}

impl SyncLogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncLogType::Sync => "sync",
            SyncLogType::HealthCheck => "health_check",
            SyncLogType::ConfigUpdate => "config_update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(SyncLogType::Sync),
            "health_check" => Some(SyncLogType::HealthCheck),
            "config_update" => Some(SyncLogType::ConfigUpdate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncLogStatus {
    Success,
    Error,
    Warning,
}

impl SyncLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncLogStatus::Success => "success",
            SyncLogStatus::Error => "error",
            SyncLogStatus::Warning => "warning",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(SyncLogStatus::Success),
            "error" => Some(SyncLogStatus::Error),
            "warning" => Some(SyncLogStatus::Warning),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLog {
    pub id: i64,
    pub source_id: i64,
    #[serde(rename = "type")]
    pub log_type: SyncLogType,
    pub status: SyncLogStatus,
    pub request_url: Option<String>,
    pub duration_ms: i64,
    pub synced_count: Option<i64>,
    pub error_count: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A log entry about to be appended.
#[derive(Debug, Clone)]
pub struct NewSyncLog {
    pub source_id: i64,
    pub log_type: SyncLogType,
    pub status: SyncLogStatus,
    pub request_url: Option<String>,
    pub duration_ms: i64,
    pub synced_count: Option<i64>,
    pub error_count: Option<i64>,
    pub error_message: Option<String>,
}

impl NewSyncLog {
    pub fn new(source_id: i64, log_type: SyncLogType, status: SyncLogStatus) -> Self {
        Self {
            source_id,
            log_type,
            status,
            request_url: None,
            duration_ms: 0,
            synced_count: None,
            error_count: None,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: i64,
    pub provider: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub secret_value: String,
    pub error_count: i64,
    pub last_used: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    /// Short, non-reversible preview of the secret for operator screens.
    pub fn masked_secret(&self) -> String {
        let visible: String = self.secret_value.chars().take(4).collect();
        if visible.is_empty() {
            String::new()
        } else {
            format!("{}…", visible)
        }
    }
}

/// Kind of content a provider yields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Paper,
    Repo,
    Model,
    Video,
    News,
    Job,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Paper => "paper",
            ContentKind::Repo => "repo",
            ContentKind::Model => "model",
            ContentKind::Video => "video",
            ContentKind::News => "news",
            ContentKind::Job => "job",
        }
    }
}

/// Canonical record produced by every adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub external_id: String,
    pub source_name: String,
    pub kind: ContentKind,
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub raw: Value,
}

impl ContentItem {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            source_name: self.source_name.clone(),
            external_id: self.external_id.clone(),
        }
    }
}

/// `(sourceName, externalId)`: the idempotency key for upsert and dedupe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    pub source_name: String,
    pub external_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub limit: u32,
    pub since_days: Option<u32>,
}

/// Per-run overrides accepted by `POST /admin/data-sources/{id}/sync`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOverrides {
    pub query: Option<String>,
    pub max_results: Option<u32>,
    pub since_days: Option<u32>,
    #[serde(default)]
    pub force: bool,
    /// Provider-specific keys (e.g. `year`, `fieldsOfStudy`) merged over the source config.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub source_id: i64,
    pub source_name: String,
    pub status: SyncLogStatus,
    pub synced: u32,
    pub errors: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<u32>,
    pub duration_ms: i64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub source_id: i64,
    pub source_name: String,
    pub status: HealthStatus,
    pub latency_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub results: Vec<HealthReport>,
    pub healthy: u32,
    pub unhealthy: u32,
    pub unknown: u32,
}

impl HealthSummary {
    pub fn from_reports(results: Vec<HealthReport>) -> Self {
        let count = |s: HealthStatus| results.iter().filter(|r| r.status == s).count() as u32;
        let healthy = count(HealthStatus::Healthy);
        let unhealthy = count(HealthStatus::Unhealthy);
        let unknown = count(HealthStatus::Unknown);
        Self {
            results,
            healthy,
            unhealthy,
            unknown,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i64 {
    50
}

fn default_source_type() -> KeywordSourceType {
    KeywordSourceType::Admin
}
