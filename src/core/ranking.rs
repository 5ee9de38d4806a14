use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::types::{RunRecord, Runway};

/// Shown to callers once run history has been disabled for the session.
pub const HISTORY_UNAVAILABLE_ADVISORY: &str =
    "Run history is unavailable; results will not be saved or compared with other runs.";

/// Longest a store call may take before the ledger stops waiting for it.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run store is unavailable: {0}")]
    Unavailable(String),
    #[error("run store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("run store did not answer within {0:?}")]
    Timeout(Duration),
    #[error("run store holds malformed data: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Rounded share (0-100) of prior runs strictly shorter than `runway`.
/// With no prior runs every result ranks at 100.
pub fn percentile_rank(runway: Runway, prior: &[Runway]) -> u8 {
    if prior.is_empty() {
        return 100;
    }
    let lower = prior.iter().filter(|r| **r < runway).count();
    ((lower as f64 / prior.len() as f64) * 100.0).round() as u8
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save_run(&self, record: RunRecord) -> Result<(), StoreError>;

    async fn prior_runs(&self) -> Result<Vec<Runway>, StoreError>;

    async fn check_connection(&self) -> Result<(), StoreError> {
        self.prior_runs().await.map(|_| ())
    }
}

#[async_trait]
pub trait PercentileService: Send + Sync {
    async fn rank(&self, runway: Runway) -> Result<u8, StoreError>;
}

#[async_trait]
impl<S: RunStore + ?Sized> PercentileService for S {
    async fn rank(&self, runway: Runway) -> Result<u8, StoreError> {
        let prior = self.prior_runs().await?;
        Ok(percentile_rank(runway, &prior))
    }
}

#[derive(Debug, Default)]
pub struct MemoryRunStore {
    records: RwLock<Vec<RunRecord>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<RunRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save_run(&self, record: RunRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn prior_runs(&self) -> Result<Vec<Runway>, StoreError> {
        Ok(self.records.read().await.iter().map(|r| r.runway).collect())
    }
}

/// Run history kept as a JSON array on disk. A missing file is an empty
/// history.
#[derive(Debug)]
pub struct JsonFileRunStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileRunStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<RunRecord>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(json) if json.trim().is_empty() => Ok(Vec::new()),
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RunStore for JsonFileRunStore {
    async fn save_run(&self, record: RunRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        records.push(record);
        let json = serde_json::to_string_pretty(&records)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    async fn prior_runs(&self) -> Result<Vec<Runway>, StoreError> {
        Ok(self.load().await?.into_iter().map(|r| r.runway).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankOutcome {
    /// `None` means pending or unavailable, never an error. A lookup that
    /// outlives the ledger's store timeout is reported as pending.
    pub percentile_rank: Option<u8>,
    pub advisory: Option<&'static str>,
}

/// Session view of the run store. The first store failure disables saving and
/// ranking for the rest of the session; simulations keep working and callers
/// get an advisory instead of an error. Every store call is bounded by a
/// timeout so a stalled store never holds up a simulation.
pub struct RunLedger {
    store: Arc<dyn RunStore>,
    available: Arc<AtomicBool>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    store_timeout: Duration,
}

impl RunLedger {
    pub async fn connect(store: Arc<dyn RunStore>) -> Self {
        Self::connect_with_timeout(store, DEFAULT_STORE_TIMEOUT).await
    }

    pub async fn connect_with_timeout(store: Arc<dyn RunStore>, store_timeout: Duration) -> Self {
        let check = tokio::time::timeout(store_timeout, store.check_connection()).await;
        let available = match check.unwrap_or(Err(StoreError::Timeout(store_timeout))) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Run store connection check failed");
                false
            }
        };

        Self {
            store,
            available: Arc::new(AtomicBool::new(available)),
            pending: Mutex::new(Vec::new()),
            store_timeout,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn advisory(&self) -> Option<&'static str> {
        (!self.is_available()).then_some(HISTORY_UNAVAILABLE_ADVISORY)
    }

    /// Ranks `runway` against prior runs without recording it.
    pub async fn rank(&self, runway: Runway) -> RankOutcome {
        if !self.is_available() {
            return self.unavailable();
        }

        let lookup = tokio::time::timeout(self.store_timeout, self.store.rank(runway)).await;
        match lookup {
            Ok(Ok(rank)) => RankOutcome {
                percentile_rank: Some(rank),
                advisory: None,
            },
            Err(_) => {
                debug!(timeout = ?self.store_timeout, "Percentile lookup still pending");
                RankOutcome {
                    percentile_rank: None,
                    advisory: None,
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Percentile lookup failed, disabling run history");
                self.available.store(false, Ordering::SeqCst);
                self.unavailable()
            }
        }
    }

    /// Ranks `runway` against prior runs, then saves it in the background.
    /// Save failures are logged and disable the ledger; they are not retried.
    pub async fn record(&self, label: &str, runway: Runway) -> RankOutcome {
        let outcome = self.rank(runway).await;
        if !self.is_available() {
            return outcome;
        }

        let store = Arc::clone(&self.store);
        let available = Arc::clone(&self.available);
        let store_timeout = self.store_timeout;
        let record = RunRecord {
            label: label.to_string(),
            runway,
        };
        let handle = tokio::spawn(async move {
            let saved = tokio::time::timeout(store_timeout, store.save_run(record)).await;
            match saved.unwrap_or(Err(StoreError::Timeout(store_timeout))) {
                Ok(()) => debug!("Run saved"),
                Err(e) => {
                    warn!(error = %e, "Failed to save run, disabling run history");
                    available.store(false, Ordering::SeqCst);
                }
            }
        });

        let mut pending = self.pending.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
        outcome
    }

    /// Waits for background saves started by [`RunLedger::record`].
    pub async fn flush(&self) {
        let handles = std::mem::take(&mut *self.pending.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Run save task did not complete");
            }
        }
    }

    fn unavailable(&self) -> RankOutcome {
        RankOutcome {
            percentile_rank: None,
            advisory: Some(HISTORY_UNAVAILABLE_ADVISORY),
        }
    }
}
