use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{BdnsId, FlattenedRow};
use crate::error::HarvestError;
use crate::flatten::flatten;
use crate::registry::{FetchOutcome, RegistryClient};
use crate::store::PartitionStore;

pub const DEFAULT_START: u64 = 747573;
pub const DEFAULT_MAX_CONSECUTIVE_NOT_FOUND: u32 = 10;
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(4);
pub const DEFAULT_FLUSH_EVERY: usize = 100;

/// Parameters of one scan. Callers construct and pass a value; there is
/// no process-wide configuration.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub start: BdnsId,
    pub max_consecutive_not_found: u32,
    pub use_delay: bool,
    pub max_delay: Duration,
    pub flush_every: usize,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            start: BdnsId::new(DEFAULT_START),
            max_consecutive_not_found: DEFAULT_MAX_CONSECUTIVE_NOT_FOUND,
            use_delay: false,
            max_delay: DEFAULT_MAX_DELAY,
            flush_every: DEFAULT_FLUSH_EVERY,
        }
    }
}

/// Lazy scan over the id space. Yields one `(id, outcome)` pair per
/// attempt, advancing by 1 regardless of classification, and ends once
/// the run of consecutive `NotFound` outcomes reaches the threshold.
/// Transient outcomes neither extend nor reset that run.
pub struct ScrapeIter<'a, C: RegistryClient> {
    client: &'a C,
    next_id: BdnsId,
    threshold: u32,
    consecutive_not_found: u32,
    done: bool,
}

impl<'a, C: RegistryClient> ScrapeIter<'a, C> {
    pub fn new(client: &'a C, start: BdnsId, threshold: u32) -> Self {
        Self {
            client,
            next_id: start,
            threshold,
            consecutive_not_found: 0,
            done: threshold == 0,
        }
    }

    pub fn consecutive_not_found(&self) -> u32 {
        self.consecutive_not_found
    }
}

impl<C: RegistryClient> Iterator for ScrapeIter<'_, C> {
    type Item = (BdnsId, FetchOutcome);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let id = self.next_id;
        let outcome = self.client.fetch(id);
        self.next_id = id.next();

        match &outcome {
            FetchOutcome::Success(_) => self.consecutive_not_found = 0,
            FetchOutcome::NotFound => {
                self.consecutive_not_found += 1;
                if self.consecutive_not_found >= self.threshold {
                    self.done = true;
                }
            }
            FetchOutcome::Transient(_) => {}
        }

        Some((id, outcome))
    }
}

/// Next identifier to attempt given the identifiers already persisted:
/// one past the maximum. `None` when the store is empty.
pub fn resume_cursor<I>(ids: I) -> Option<BdnsId>
where
    I: IntoIterator<Item = BdnsId>,
{
    ids.into_iter().max().map(BdnsId::next)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeSummary {
    pub requests: u64,
    pub records: u64,
    pub rows_written: u64,
    pub not_found: u64,
    pub transient: u64,
    pub malformed: u64,
    pub last_id: Option<BdnsId>,
    pub final_consecutive_not_found: u32,
}

pub struct Scraper<C: RegistryClient> {
    config: ScrapeConfig,
    client: C,
}

impl<C: RegistryClient> Scraper<C> {
    pub fn new(config: ScrapeConfig, client: C) -> Self {
        Self { config, client }
    }

    /// Drive the scan to completion, flattening successful records and
    /// flushing accumulated rows into year partitions every
    /// `flush_every` records and once more at the end. Store write
    /// failures abort the run; everything else is local to the record.
    pub fn run(&self, store: &PartitionStore) -> Result<ScrapeSummary, HarvestError> {
        info!(
            start = %self.config.start,
            threshold = self.config.max_consecutive_not_found,
            delay = self.config.use_delay,
            "starting scan"
        );

        let mut summary = ScrapeSummary::default();
        let mut buffers: BTreeMap<i32, Vec<FlattenedRow>> = BTreeMap::new();
        let flush_every = self.config.flush_every.max(1) as u64;

        let mut iter = ScrapeIter::new(
            &self.client,
            self.config.start,
            self.config.max_consecutive_not_found,
        );

        while let Some((id, outcome)) = iter.next() {
            summary.requests += 1;
            summary.last_id = Some(id);

            match outcome {
                FetchOutcome::Success(record) => {
                    match flatten(&record) {
                        Ok(rows) => {
                            info!(%id, rows = rows.len(), "record fetched");
                            summary.records += 1;
                            for row in rows {
                                buffers.entry(row.year).or_default().push(row);
                            }
                            if summary.records % flush_every == 0 {
                                summary.rows_written += flush(store, &mut buffers)?;
                            }
                        }
                        Err(err) => {
                            summary.malformed += 1;
                            warn!(%id, error = %err, "record rejected");
                        }
                    }
                    if self.config.use_delay {
                        thread::sleep(random_delay(self.config.max_delay));
                    }
                }
                FetchOutcome::NotFound => {
                    summary.not_found += 1;
                    info!(%id, consecutive = iter.consecutive_not_found(), "not found");
                }
                FetchOutcome::Transient(reason) => {
                    summary.transient += 1;
                    warn!(%id, %reason, "transient failure, skipping");
                }
            }
        }

        summary.rows_written += flush(store, &mut buffers)?;
        summary.final_consecutive_not_found = iter.consecutive_not_found();

        info!(
            requests = summary.requests,
            records = summary.records,
            rows = summary.rows_written,
            "scan finished"
        );
        Ok(summary)
    }
}

fn flush(
    store: &PartitionStore,
    buffers: &mut BTreeMap<i32, Vec<FlattenedRow>>,
) -> Result<u64, HarvestError> {
    let mut written = 0u64;
    for (year, rows) in buffers.iter_mut() {
        if rows.is_empty() {
            continue;
        }
        store.append(*year, rows)?;
        written += rows.len() as u64;
        rows.clear();
    }
    Ok(written)
}

fn random_delay(max: Duration) -> Duration {
    let max_secs = max.as_secs_f64();
    if max_secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..max_secs))
}
