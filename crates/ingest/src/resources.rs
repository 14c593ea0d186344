//! Cached discovery of the storage resources used for queued ingestion.
//!
//! Two independently refreshed values live here: the [`ResourceBundle`]
//! (queues, containers and tables from `.get ingestion resources`) and the
//! authorization context string (from `.get kusto identity token`).
//!
//! A value is served from cache until its refresh deadline passes. Past the
//! deadline, one caller refreshes it while concurrent callers wait on the
//! same refresh. A failed refresh keeps the previous value and pushes the
//! deadline out by the shorter failure TTL; only when there is no previous
//! value does the failure reach the caller.

use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use kusto_client::CommandExecutor;
use kusto_core::{CoreError, IngestConfig, ResourceDescriptor, TabularResult};

use crate::backoff::BackoffPolicy;
use crate::error::IngestError;
use crate::ranking::RankedAccountSelector;

/// Management database that answers discovery commands.
pub const MANAGEMENT_DATABASE: &str = "NetDefaultDB";
pub const GET_INGESTION_RESOURCES: &str = ".get ingestion resources";
pub const GET_IDENTITY_TOKEN: &str = ".get kusto identity token";

const RESOURCE_TYPE_COLUMN: &str = "ResourceTypeName";
const STORAGE_ROOT_COLUMN: &str = "StorageRoot";
const AUTHORIZATION_CONTEXT_COLUMN: &str = "AuthorizationContext";

/// The storage resources needed for queued ingestion.
///
/// Replaced wholesale on every successful refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceBundle {
    pub ingestion_queues: Vec<ResourceDescriptor>,
    pub failure_queues: Vec<ResourceDescriptor>,
    pub success_queues: Vec<ResourceDescriptor>,
    pub containers: Vec<ResourceDescriptor>,
    pub status_tables: Vec<ResourceDescriptor>,
}

impl ResourceBundle {
    /// Build a bundle from `.get ingestion resources` output.
    ///
    /// Rows with unrecognised resource types are skipped; a row missing its
    /// type or storage root rejects the whole result.
    pub fn from_result(result: &TabularResult) -> Result<Self, IngestError> {
        for column in [RESOURCE_TYPE_COLUMN, STORAGE_ROOT_COLUMN] {
            if result.column_index(column).is_none() {
                return Err(CoreError::ColumnNotFound(column.to_string()).into());
            }
        }

        let mut bundle = ResourceBundle::default();
        for row in 0..result.row_count() {
            let (Some(resource_type), Some(root)) = (
                result.get_str(row, RESOURCE_TYPE_COLUMN),
                result.get_str(row, STORAGE_ROOT_COLUMN),
            ) else {
                return Err(IngestError::InvalidResources(format!(
                    "row {row} has no resource type or storage root"
                )));
            };
            let target = match resource_type {
                "SecuredReadyForAggregationQueue" => &mut bundle.ingestion_queues,
                "FailedIngestionsQueue" => &mut bundle.failure_queues,
                "SuccessfulIngestionsQueue" => &mut bundle.success_queues,
                "TempStorage" => &mut bundle.containers,
                "IngestionsStatusTable" => &mut bundle.status_tables,
                other => {
                    debug!(resource_type = other, "Ignoring unknown resource type");
                    continue;
                }
            };
            target.push(ResourceDescriptor::parse(root)?);
        }
        Ok(bundle)
    }

    /// Every category holds at least one resource.
    pub fn is_valid(&self) -> bool {
        !self.ingestion_queues.is_empty()
            && !self.failure_queues.is_empty()
            && !self.success_queues.is_empty()
            && !self.containers.is_empty()
            && !self.status_tables.is_empty()
    }

    fn all(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.ingestion_queues
            .iter()
            .chain(&self.failure_queues)
            .chain(&self.success_queues)
            .chain(&self.containers)
            .chain(&self.status_tables)
    }
}

/// Tunables for [`ResourceCache`].
#[derive(Debug, Clone)]
pub struct ResourceCacheOptions {
    /// How long a successfully fetched value is served before refreshing.
    pub refresh_ttl: Duration,
    /// How long a stale value is served after a failed refresh.
    pub failure_ttl: Duration,
    /// Upper bound on each discovery command.
    pub call_timeout: Duration,
    /// Attempts per command while the service is throttling.
    pub throttle_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_jitter: Duration,
}

impl Default for ResourceCacheOptions {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

impl ResourceCacheOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            refresh_ttl: config.resources_ttl(),
            failure_ttl: config.resources_failure_ttl(),
            call_timeout: config.call_timeout(),
            throttle_attempts: config.throttle_attempts.max(1),
            backoff_base: Duration::from_secs_f64(config.backoff_base_secs.max(0.0)),
            backoff_jitter: Duration::from_secs_f64(config.backoff_jitter_secs.max(0.0)),
        }
    }
}

struct Cached<T> {
    value: T,
    refresh_after: Instant,
}

/// One cached value plus the lock that serialises its refreshes.
struct CachedField<T> {
    slot: RwLock<Option<Cached<T>>>,
    refresh: Mutex<()>,
}

impl<T: Clone> CachedField<T> {
    fn new() -> Self {
        Self {
            slot: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Cached<T>>> {
        self.slot.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Cached<T>>> {
        self.slot.write().unwrap_or_else(|e| e.into_inner())
    }

    fn fresh(&self, now: Instant) -> Option<T> {
        self.read()
            .as_ref()
            .filter(|c| now < c.refresh_after)
            .map(|c| c.value.clone())
    }

    fn stale(&self) -> Option<T> {
        self.read().as_ref().map(|c| c.value.clone())
    }

    fn store(&self, value: T, refresh_after: Instant) {
        *self.write() = Some(Cached {
            value,
            refresh_after,
        });
    }

    fn defer(&self, refresh_after: Instant) {
        if let Some(cached) = self.write().as_mut() {
            cached.refresh_after = refresh_after;
        }
    }
}

/// Caches ingestion resources and hands them out in reliability order.
pub struct ResourceCache {
    executor: Arc<dyn CommandExecutor>,
    selector: Arc<RankedAccountSelector>,
    options: ResourceCacheOptions,
    resources: CachedField<ResourceBundle>,
    auth_context: CachedField<String>,
}

impl ResourceCache {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        selector: Arc<RankedAccountSelector>,
        options: ResourceCacheOptions,
    ) -> Self {
        Self {
            executor,
            selector,
            options,
            resources: CachedField::new(),
            auth_context: CachedField::new(),
        }
    }

    pub fn selector(&self) -> &Arc<RankedAccountSelector> {
        &self.selector
    }

    pub fn options(&self) -> &ResourceCacheOptions {
        &self.options
    }

    pub async fn get_ingestion_queues(&self) -> Result<Vec<ResourceDescriptor>, IngestError> {
        self.ranked(|b| &b.ingestion_queues).await
    }

    pub async fn get_failed_queues(&self) -> Result<Vec<ResourceDescriptor>, IngestError> {
        self.ranked(|b| &b.failure_queues).await
    }

    pub async fn get_success_queues(&self) -> Result<Vec<ResourceDescriptor>, IngestError> {
        self.ranked(|b| &b.success_queues).await
    }

    pub async fn get_containers(&self) -> Result<Vec<ResourceDescriptor>, IngestError> {
        self.ranked(|b| &b.containers).await
    }

    pub async fn get_status_tables(&self) -> Result<Vec<ResourceDescriptor>, IngestError> {
        self.ranked(|b| &b.status_tables).await
    }

    /// The whole bundle, unranked.
    pub async fn resources(&self) -> Result<ResourceBundle, IngestError> {
        self.refresh_if_stale(&self.resources, GET_INGESTION_RESOURCES, || {
            self.fetch_resources()
        })
        .await
    }

    pub async fn get_authorization_context(&self) -> Result<String, IngestError> {
        self.refresh_if_stale(&self.auth_context, GET_IDENTITY_TOKEN, || {
            self.fetch_auth_context()
        })
        .await
    }

    async fn ranked<F>(&self, field: F) -> Result<Vec<ResourceDescriptor>, IngestError>
    where
        F: FnOnce(&ResourceBundle) -> &Vec<ResourceDescriptor>,
    {
        let bundle = self.resources().await?;
        Ok(self.selector.get_round_robin_ordering(field(&bundle)))
    }

    async fn refresh_if_stale<T, F, Fut>(
        &self,
        field: &CachedField<T>,
        operation: &'static str,
        fetch: F,
    ) -> Result<T, IngestError>
    where
        T: Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        if let Some(value) = field.fresh(Instant::now()) {
            return Ok(value);
        }

        let _guard = field.refresh.lock().await;
        // Whoever held the guard before us may have refreshed already.
        if let Some(value) = field.fresh(Instant::now()) {
            return Ok(value);
        }

        match fetch().await {
            Ok(value) => {
                field.store(value.clone(), Instant::now() + self.options.refresh_ttl);
                info!(operation, "Refreshed ingestion resources");
                Ok(value)
            }
            Err(err) => match field.stale() {
                Some(value) => {
                    warn!(
                        operation,
                        error = %err,
                        retry_in_secs = self.options.failure_ttl.as_secs(),
                        "Refresh failed; serving cached value"
                    );
                    field.defer(Instant::now() + self.options.failure_ttl);
                    Ok(value)
                }
                None => Err(IngestError::ResourceDiscovery {
                    operation,
                    source: Box::new(err),
                }),
            },
        }
    }

    async fn fetch_resources(&self) -> Result<ResourceBundle, IngestError> {
        let result = self.execute(GET_INGESTION_RESOURCES).await?;
        let bundle = ResourceBundle::from_result(&result)?;
        if !bundle.is_valid() {
            return Err(IngestError::InvalidResources(format!(
                "incomplete resource set: {} ingestion queues, {} failure queues, \
                 {} success queues, {} containers, {} status tables",
                bundle.ingestion_queues.len(),
                bundle.failure_queues.len(),
                bundle.success_queues.len(),
                bundle.containers.len(),
                bundle.status_tables.len()
            )));
        }
        for resource in bundle.all() {
            self.selector.register_account(resource.account_name());
        }
        Ok(bundle)
    }

    async fn fetch_auth_context(&self) -> Result<String, IngestError> {
        let result = self.execute(GET_IDENTITY_TOKEN).await?;
        result
            .column_strings(AUTHORIZATION_CONTEXT_COLUMN)?
            .first()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                IngestError::InvalidResources("identity token response has no rows".into())
            })
    }

    /// Run a discovery command, retrying only while the service throttles.
    async fn execute(&self, command: &'static str) -> Result<TabularResult, IngestError> {
        let mut policy = BackoffPolicy::new(
            self.options.throttle_attempts,
            self.options.backoff_base,
            self.options.backoff_jitter,
        );

        while policy.should_try() {
            let call = self.executor.execute(MANAGEMENT_DATABASE, command);
            match tokio::time::timeout(self.options.call_timeout, call).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(err)) if err.is_throttled() => {
                    warn!(
                        command,
                        attempt = policy.current_attempt(),
                        "Discovery command throttled"
                    );
                    policy.backoff().await;
                }
                Ok(Err(err)) => return Err(IngestError::Client(err)),
                Err(_) => {
                    return Err(IngestError::Timeout {
                        operation: command,
                        after: self.options.call_timeout,
                    })
                }
            }
        }

        Err(IngestError::Throttled {
            operation: command,
            attempts: policy.max_attempts(),
        })
    }
}
