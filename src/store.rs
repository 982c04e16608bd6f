//! The history store: ingest with optimistic concurrency.
//!
//! An ingest is load, append in memory, then compare-and-swap persist against
//! the version that was loaded. If another writer persisted in between, the
//! document is reloaded and only this ingest's entries are re-appended, so a
//! racing writer can never drop history. Attempts are bounded by
//! `max_attempts` and the whole ingest by `timeout_ms`.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::backend::{HistoryBackend, Version};
use crate::codec;
use crate::config::StoreConfig;
use crate::error::{Error, Result, StorageError, WriteError};
use crate::schema::{Entry, HistoryDocument};

/// An append that is applied in memory but not yet durable.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    appends: Vec<(String, Entry)>,
    document: HistoryDocument,
    base: Option<Version>,
}

impl PendingWrite {
    /// The document as it would be persisted.
    pub fn document(&self) -> &HistoryDocument {
        &self.document
    }

    /// The `(suite, entry)` pairs this write adds.
    pub fn appends(&self) -> &[(String, Entry)] {
        &self.appends
    }

    fn rebase(&mut self, mut document: HistoryDocument, base: Option<Version>) {
        for (suite, entry) in &self.appends {
            document.append(suite, entry.clone());
        }
        self.document = document;
        self.base = base;
    }
}

/// Result of a successful ingest.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub version: Version,
    /// Persist attempts used, 1 when nobody raced us.
    pub attempts: u32,
    pub document: HistoryDocument,
}

pub struct HistoryStore<B> {
    backend: B,
    repo_url: Option<String>,
    config: StoreConfig,
    // Serializes ingests from this process; other processes are handled by CAS.
    writer: Mutex<()>,
    jitter: Mutex<ChaCha8Rng>,
}

impl<B: HistoryBackend> HistoryStore<B> {
    pub fn new(backend: B, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let seed = config.jitter_seed.unwrap_or_else(rand::random);
        Ok(Self {
            backend,
            repo_url: None,
            config,
            writer: Mutex::new(()),
            jitter: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        })
    }

    /// Repository the history belongs to. Required to create a new document,
    /// and checked against existing ones.
    pub fn with_repo_url(mut self, repo_url: impl Into<String>) -> Self {
        self.repo_url = Some(repo_url.into());
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Read the persisted document. A backend with nothing stored yields an
    /// empty document for the configured repository.
    pub fn load(&self) -> Result<HistoryDocument> {
        self.load_versioned().map(|(doc, _)| doc)
    }

    pub fn ingest(&self, suite: &str, entry: Entry) -> Result<Ingested> {
        self.ingest_many(vec![(suite.to_string(), entry)])
    }

    /// Append several entries and persist them in one write.
    pub fn ingest_many(&self, appends: Vec<(String, Entry)>) -> Result<Ingested> {
        if appends.is_empty() {
            return Err(Error::InvalidInput("nothing to ingest".to_string()));
        }
        for (suite, entry) in &appends {
            validate(suite, entry)?;
        }

        let _writer = self.writer();
        let started = Instant::now();
        let deadline = started + self.config.timeout();

        let (mut document, base) = self.load_versioned()?;
        for (suite, entry) in &appends {
            document.append(suite, entry.clone());
        }
        let pending = PendingWrite {
            appends,
            document,
            base,
        };

        self.commit(pending, started, deadline)
    }

    /// Finish an ingest whose persist failed, without appending twice.
    pub fn retry_persist(&self, pending: PendingWrite) -> Result<Ingested> {
        let _writer = self.writer();
        let started = Instant::now();
        self.commit(pending, started, started + self.config.timeout())
    }

    fn commit(&self, mut pending: PendingWrite, started: Instant, deadline: Instant) -> Result<Ingested> {
        let variable = &self.config.variable_name;

        for attempt in 1..=self.config.max_attempts {
            if Instant::now() >= deadline {
                return Err(unpersisted(
                    StorageError::Timeout {
                        waited: started.elapsed(),
                    },
                    pending,
                ));
            }

            let bytes = match codec::encode(&pending.document, variable) {
                Ok(bytes) => bytes,
                Err(e) => return Err(unpersisted(e.into(), pending)),
            };

            tracing::debug!(
                location = %self.backend.describe(),
                attempt,
                base = ?pending.base,
                "persisting history"
            );

            match self.backend.write(&bytes, pending.base.as_ref(), deadline) {
                Ok(version) => {
                    tracing::info!(
                        location = %self.backend.describe(),
                        %version,
                        attempts = attempt,
                        entries = pending.appends.len(),
                        "history persisted"
                    );
                    return Ok(Ingested {
                        version,
                        attempts: attempt,
                        document: pending.document,
                    });
                }
                Err(WriteError::Conflict) => {
                    tracing::warn!(
                        location = %self.backend.describe(),
                        attempt,
                        "concurrent write detected, reloading"
                    );
                    if attempt == self.config.max_attempts {
                        break;
                    }
                    self.back_off(attempt, deadline);
                    let (document, base) = match self.load_versioned() {
                        Ok(loaded) => loaded,
                        Err(Error::Storage { source, .. }) => return Err(unpersisted(source, pending)),
                        Err(e) => return Err(e),
                    };
                    pending.rebase(document, base);
                }
                Err(WriteError::Storage(e)) => return Err(unpersisted(e, pending)),
            }
        }

        Err(unpersisted(
            StorageError::ConflictsExhausted {
                attempts: self.config.max_attempts,
            },
            pending,
        ))
    }

    fn load_versioned(&self) -> Result<(HistoryDocument, Option<Version>)> {
        let Some(snapshot) = self.backend.read()? else {
            let repo_url = self.repo_url.clone().ok_or_else(|| {
                Error::InvalidInput(format!(
                    "no history at {} and no repository url to create one",
                    self.backend.describe()
                ))
            })?;
            return Ok((HistoryDocument::new(repo_url), None));
        };

        let document = codec::decode(&snapshot.bytes, &self.config.variable_name)?;
        if let Some(expected) = &self.repo_url {
            if *expected != document.repo_url {
                return Err(Error::RepoMismatch {
                    expected: expected.clone(),
                    found: document.repo_url,
                });
            }
        }
        Ok((document, Some(snapshot.version)))
    }

    fn back_off(&self, attempt: u32, deadline: Instant) {
        let full = self.config.backoff(attempt - 1).as_millis() as u64;
        let jittered = if full == 0 {
            0
        } else {
            let mut rng = self.jitter.lock().unwrap_or_else(|p| p.into_inner());
            rng.gen_range(full / 2..=full)
        };
        let wait = Duration::from_millis(jittered).min(deadline.saturating_duration_since(Instant::now()));
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }

    fn writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn validate(suite: &str, entry: &Entry) -> Result<()> {
    if suite.trim().is_empty() {
        return Err(Error::InvalidInput("suite name must not be empty".to_string()));
    }
    if entry.commit.id.trim().is_empty() {
        return Err(Error::InvalidInput(format!(
            "entry for suite {suite:?} has an empty commit id"
        )));
    }
    Ok(())
}

fn unpersisted(source: StorageError, pending: PendingWrite) -> Error {
    Error::Storage {
        source,
        pending: Some(Box::new(pending)),
    }
}
