use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Streaming ingestion is not intended for payloads above 4 MiB.
pub const DEFAULT_STREAMING_MAX_BYTES: u64 = 4 * 1024 * 1024;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_f64(profile: &str, key: &str, default: f64) -> f64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── IngestConfig ──────────────────────────────────────────────

/// Client-side settings for the ingestion reliability layer.
///
/// Reads from environment variables with optional profile prefix.
/// When `KUSTO_PROFILE=PROD`, checks `PROD_KUSTO_ENGINE_URL` before `KUSTO_ENGINE_URL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Query/engine endpoint, used for streaming ingestion.
    pub engine_url: Option<String>,
    /// Data-management endpoint, used for resource discovery.
    pub ingest_url: Option<String>,
    /// Static bearer token, if any.
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    /// How long a discovered resource bundle stays fresh.
    pub resources_refresh_secs: u64,
    /// Retry interval after a failed refresh when a stale bundle is still usable.
    pub resources_failure_refresh_secs: u64,
    /// Payloads above this size skip streaming and go straight to the queue.
    pub streaming_max_bytes: u64,
    /// Streaming attempts before falling back to queued ingestion.
    pub streaming_attempts: u32,
    pub backoff_base_secs: f64,
    pub backoff_jitter_secs: f64,
    /// Attempts for throttled resource-discovery commands.
    pub throttle_attempts: u32,
    /// Upper bound on containers / queues tried in the durable path.
    pub durable_max_retries: u32,
    /// Timeout applied to every individual backend call.
    pub call_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            engine_url: None,
            ingest_url: None,
            auth_token: None,
            resources_refresh_secs: 3600,
            resources_failure_refresh_secs: 600,
            streaming_max_bytes: DEFAULT_STREAMING_MAX_BYTES,
            streaming_attempts: 3,
            backoff_base_secs: 1.0,
            backoff_jitter_secs: 1.0,
            throttle_attempts: 3,
            durable_max_retries: 3,
            call_timeout_secs: 30,
        }
    }
}

impl IngestConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    ///
    /// Reads `KUSTO_PROFILE` to determine the profile prefix.
    pub fn from_env() -> Self {
        let profile = env_opt("KUSTO_PROFILE")
            .map(|s| s.to_uppercase())
            .unwrap_or_default();
        Self::from_env_profiled(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn from_env_profiled(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let d = Self::default();

        let engine_url = profiled_env_opt(p, "KUSTO_ENGINE_URL")
            .map(|u| u.trim_end_matches('/').to_string());
        let ingest_url = profiled_env_opt(p, "KUSTO_INGEST_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .or_else(|| engine_url.as_deref().map(derive_ingest_url));

        Self {
            profile: p.to_string(),
            engine_url,
            ingest_url,
            auth_token: profiled_env_opt(p, "KUSTO_AUTH_TOKEN"),
            resources_refresh_secs: profiled_env_u64(
                p,
                "KUSTO_RESOURCES_REFRESH_SECS",
                d.resources_refresh_secs,
            ),
            resources_failure_refresh_secs: profiled_env_u64(
                p,
                "KUSTO_RESOURCES_FAILURE_REFRESH_SECS",
                d.resources_failure_refresh_secs,
            ),
            streaming_max_bytes: profiled_env_u64(
                p,
                "KUSTO_STREAMING_MAX_BYTES",
                d.streaming_max_bytes,
            ),
            streaming_attempts: profiled_env_u32(p, "KUSTO_STREAMING_ATTEMPTS", d.streaming_attempts),
            backoff_base_secs: profiled_env_f64(p, "KUSTO_BACKOFF_BASE_SECS", d.backoff_base_secs),
            backoff_jitter_secs: profiled_env_f64(
                p,
                "KUSTO_BACKOFF_JITTER_SECS",
                d.backoff_jitter_secs,
            ),
            throttle_attempts: profiled_env_u32(p, "KUSTO_THROTTLE_ATTEMPTS", d.throttle_attempts),
            durable_max_retries: profiled_env_u32(
                p,
                "KUSTO_DURABLE_MAX_RETRIES",
                d.durable_max_retries,
            ),
            call_timeout_secs: profiled_env_u64(p, "KUSTO_CALL_TIMEOUT_SECS", d.call_timeout_secs),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    pub fn resources_ttl(&self) -> Duration {
        Duration::from_secs(self.resources_refresh_secs)
    }

    pub fn resources_failure_ttl(&self) -> Duration {
        Duration::from_secs(self.resources_failure_refresh_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Returns `true` when both service endpoints are known.
    pub fn is_configured(&self) -> bool {
        self.engine_url.is_some() && self.ingest_url.is_some()
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Ingest config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  endpoints:   engine={}, ingest={}",
            self.engine_url.as_deref().unwrap_or("(none)"),
            self.ingest_url.as_deref().unwrap_or("(none)")
        );
        tracing::info!(
            "  resources:   refresh={}s, failure_refresh={}s",
            self.resources_refresh_secs,
            self.resources_failure_refresh_secs
        );
        tracing::info!(
            "  streaming:   max_bytes={}, attempts={}",
            self.streaming_max_bytes,
            self.streaming_attempts
        );
        tracing::info!(
            "  auth:        {}",
            if self.auth_token.is_some() { "static token" } else { "none" }
        );
    }
}

/// `https://mycluster.region.kusto.windows.net` → `https://ingest-mycluster.region.kusto.windows.net`.
pub fn derive_ingest_url(engine_url: &str) -> String {
    match engine_url.split_once("://") {
        Some((scheme, rest)) if !rest.starts_with("ingest-") => {
            format!("{scheme}://ingest-{rest}")
        }
        Some(_) => engine_url.to_string(),
        None => format!("ingest-{engine_url}"),
    }
}

// ── Tests ────────────────────────────────────────────────────────
