//! Reliability ranking of storage accounts.
//!
//! Each account keeps a short rolling window of outcomes split into
//! fixed-width time buckets. The rank is the success ratio of the window,
//! with newer buckets weighted more heavily than older ones. Accounts are
//! then grouped into coarse tiers; accounts in the same tier are treated as
//! equally good and shuffled on every call so load spreads across them.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::time::Instant;
use tracing::debug;

use kusto_core::ResourceDescriptor;

const BUCKET_COUNT: u64 = 6;
const BUCKET_WIDTH: Duration = Duration::from_secs(10);

/// Lower bounds of the rank tiers, best first.
const TIERS: [f64; 4] = [0.9, 0.7, 0.3, 0.0];

/// Point-in-time view of one account's record.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountReliability {
    pub account_name: String,
    pub success_count: u32,
    pub failure_count: u32,
    /// Weighted success ratio in `[0, 1]`; `1.0` when nothing was observed.
    pub rank: f64,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    index: u64,
    success: u32,
    failure: u32,
}

#[derive(Debug, Default)]
struct AccountRecord {
    /// Oldest first; at most `BUCKET_COUNT` entries.
    buckets: Vec<Bucket>,
}

impl AccountRecord {
    fn prune(&mut self, current: u64) {
        let oldest = current.saturating_sub(BUCKET_COUNT - 1);
        self.buckets.retain(|b| b.index >= oldest);
    }

    fn record(&mut self, current: u64, success: bool) {
        self.prune(current);
        if !matches!(self.buckets.last(), Some(b) if b.index == current) {
            self.buckets.push(Bucket {
                index: current,
                success: 0,
                failure: 0,
            });
        }
        if let Some(bucket) = self.buckets.last_mut() {
            if success {
                bucket.success += 1;
            } else {
                bucket.failure += 1;
            }
        }
    }

    fn snapshot(&self, name: &str, current: u64) -> AccountReliability {
        let oldest = current.saturating_sub(BUCKET_COUNT - 1);
        let mut success_count = 0;
        let mut failure_count = 0;
        let mut weighted = 0.0;
        let mut weights = 0.0;

        for b in self.buckets.iter().filter(|b| b.index >= oldest) {
            success_count += b.success;
            failure_count += b.failure;
            let total = b.success + b.failure;
            if total == 0 {
                continue;
            }
            let weight = (BUCKET_COUNT - (current - b.index)) as f64;
            weighted += weight * f64::from(b.success) / f64::from(total);
            weights += weight;
        }

        let rank = if weights > 0.0 { weighted / weights } else { 1.0 };
        AccountReliability {
            account_name: name.to_string(),
            success_count,
            failure_count,
            rank,
        }
    }
}

fn tier_of(rank: f64) -> usize {
    TIERS
        .iter()
        .position(|&floor| rank >= floor)
        .unwrap_or(TIERS.len() - 1)
}

/// Tracks per-account outcomes and orders resources by recent reliability.
///
/// The lock is never held across an await point.
#[derive(Debug)]
pub struct RankedAccountSelector {
    accounts: Mutex<HashMap<String, AccountRecord>>,
    epoch: Instant,
}

impl Default for RankedAccountSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl RankedAccountSelector {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            epoch: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AccountRecord>> {
        self.accounts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_bucket(&self) -> u64 {
        Instant::now().duration_since(self.epoch).as_secs() / BUCKET_WIDTH.as_secs()
    }

    /// Add a neutral record for `name` unless one exists.
    pub fn register_account(&self, name: &str) {
        let mut accounts = self.lock();
        if !accounts.contains_key(name) {
            debug!(account = name, "Registered storage account");
            accounts.insert(name.to_string(), AccountRecord::default());
        }
    }

    /// Record the outcome of one operation against `name`.
    ///
    /// Unknown accounts are registered on the fly.
    pub fn report_outcome(&self, name: &str, success: bool) {
        let current = self.current_bucket();
        let mut accounts = self.lock();
        accounts
            .entry(name.to_string())
            .or_default()
            .record(current, success);
    }

    pub fn reliability(&self, name: &str) -> Option<AccountReliability> {
        let current = self.current_bucket();
        self.lock().get(name).map(|r| r.snapshot(name, current))
    }

    pub fn account_count(&self) -> usize {
        self.lock().len()
    }

    /// Every registered account, best tier first, shuffled within a tier.
    pub fn get_ranked_shuffled_accounts(&self) -> Vec<AccountReliability> {
        let current = self.current_bucket();
        let snapshots: Vec<_> = self
            .lock()
            .iter()
            .map(|(name, record)| record.snapshot(name, current))
            .collect();
        shuffle_by_tier(snapshots)
    }

    /// Reorder `resources` so consecutive entries come from different
    /// accounts, best-ranked account first.
    ///
    /// Resources are grouped by account; the groups are ranked (accounts
    /// not yet registered rank as untested, i.e. best) and then drained one
    /// resource per group per round. The output is a permutation of the input.
    pub fn get_round_robin_ordering(
        &self,
        resources: &[ResourceDescriptor],
    ) -> Vec<ResourceDescriptor> {
        let mut groups: Vec<(String, Vec<&ResourceDescriptor>)> = Vec::new();
        for resource in resources {
            match groups
                .iter_mut()
                .find(|(name, _)| name.as_str() == resource.account_name())
            {
                Some((_, members)) => members.push(resource),
                None => groups.push((resource.account_name().to_string(), vec![resource])),
            }
        }

        let current = self.current_bucket();
        let snapshots: Vec<_> = {
            let accounts = self.lock();
            groups
                .iter()
                .map(|(name, _)| match accounts.get(name) {
                    Some(record) => record.snapshot(name, current),
                    None => AccountRecord::default().snapshot(name, current),
                })
                .collect()
        };

        let mut ordered_groups: Vec<std::vec::IntoIter<&ResourceDescriptor>> =
            shuffle_by_tier(snapshots)
                .into_iter()
                .filter_map(|snap| {
                    groups
                        .iter()
                        .position(|(name, _)| *name == snap.account_name)
                        .map(|i| std::mem::take(&mut groups[i].1).into_iter())
                })
                .collect();

        let mut out = Vec::with_capacity(resources.len());
        while out.len() < resources.len() {
            let before = out.len();
            for group in ordered_groups.iter_mut() {
                if let Some(resource) = group.next() {
                    out.push(resource.clone());
                }
            }
            if out.len() == before {
                break;
            }
        }
        out
    }
}

fn shuffle_by_tier(snapshots: Vec<AccountReliability>) -> Vec<AccountReliability> {
    let mut tiers: Vec<Vec<AccountReliability>> = vec![Vec::new(); TIERS.len()];
    for snap in snapshots {
        tiers[tier_of(snap.rank)].push(snap);
    }
    let mut rng = rand::thread_rng();
    tiers
        .into_iter()
        .flat_map(|mut tier| {
            tier.shuffle(&mut rng);
            tier
        })
        .collect()
}
