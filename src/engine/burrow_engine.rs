mod collection;
mod delete;
mod index;
mod insert;
mod query;
mod update;

use crate::engine::disk::DiskService;
use crate::engine::lock_service::LockService;
use crate::engine::page_cache::PageCache;
use crate::engine::transaction_service::{self, TransactionService};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::Duration;

// shared by the per-operation submodules through `use super::*`
pub(crate) use crate::engine::collection_service::CollectionService;
pub(crate) use crate::engine::snapshot::Snapshot;
pub(crate) use crate::{Error, Result};

pub use insert::AutoId;

/// Options accepted by [`BurrowEngine::open`].
pub struct EngineSettings {
    pub path: PathBuf,
    /// Write-ahead journal for crash-safe commits (default true).
    pub journal: bool,
    /// Soft cap for the page cache, in pages.
    pub cache_size: usize,
    /// Lock-acquire timeout.
    pub timeout: Duration,
    /// Datafile pre-allocation in bytes.
    pub initial_size: u64,
    pub read_only: bool,
}

impl EngineSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        EngineSettings {
            path: path.into(),
            journal: true,
            cache_size: 1000,
            timeout: Duration::from_secs(60),
            initial_size: 0,
            read_only: false,
        }
    }
}

pub(crate) struct EngineShared {
    pub disk: DiskService,
    pub cache: PageCache,
    /// Change counter the cache was last synchronized with.
    last_seen_change: u32,
}

/// The engine facade: a single-file document store with skip-list indexes
/// and journaled commits.
///
/// One writer at a time, any number of readers; all methods take `&self`
/// and coordinate through the lock service.
pub struct BurrowEngine {
    locker: LockService,
    shared: Mutex<EngineShared>,
    journal_enabled: bool,
    read_only: bool,
}

impl BurrowEngine {
    /// Opens (or creates) a datafile, running journal recovery first if a
    /// previous process died mid-commit.
    pub fn open(settings: EngineSettings) -> Result<BurrowEngine> {
        let (mut disk, is_new) =
            DiskService::open(&settings.path, settings.read_only, settings.initial_size)?;

        if transaction_service::recover(&mut disk)? {
            log::info!("journal recovery applied on {}", settings.path.display());
        }

        let mut cache = PageCache::new(settings.cache_size);
        let journal_enabled = settings.journal && !settings.read_only;

        if is_new {
            if settings.read_only {
                return Err(Error::invalid_database("empty datafile"));
            }
            cache.create_header();
            TransactionService::new(&mut disk, &mut cache, journal_enabled).commit()?;
        }

        // validates magic and version on an existing file
        let change = cache.header(&mut disk)?.change_id();

        let locker = LockService::new(settings.timeout);
        locker.set_change_counter(change);

        log::debug!("engine open on {}", settings.path.display());

        Ok(BurrowEngine {
            locker,
            shared: Mutex::new(EngineShared {
                disk,
                cache,
                last_seen_change: change,
            }),
            journal_enabled,
            read_only: settings.read_only,
        })
    }

    /// Flushes and removes the journal. Also runs on drop; calling it
    /// explicitly surfaces errors instead of swallowing them.
    pub fn close(&self) -> Result<()> {
        let _scope = self.locker.enter_exclusive()?;
        let mut guard = self.shared.lock();
        let shared = &mut *guard;

        if shared.cache.has_dirty() {
            log::warn!("discarding uncommitted pages at close");
            shared.cache.discard_dirty();
        }

        if !self.read_only {
            shared.disk.flush()?;
            shared.disk.delete_journal()?;
        }

        log::debug!("engine closed");
        Ok(())
    }

    /// Drops every cached page; subsequent reads come straight from disk.
    pub fn clear_cache(&self) -> Result<()> {
        self.read_op(|shared| {
            shared.cache.clear();
            Ok(())
        })
    }
}

// operation plumbing
impl BurrowEngine {
    /// Snapshot-at-acquire: a reader that observes a commit it has not seen
    /// drops the cache so page loads return post-commit bytes.
    fn avoid_dirty_read(&self, shared: &mut EngineShared) {
        let counter = self.locker.change_counter();
        if counter != shared.last_seen_change {
            log::debug!("change {counter} observed, invalidating page cache");
            shared.cache.clear();
            shared.last_seen_change = counter;
        }
    }

    /// Runs a read under a shared lock.
    pub(crate) fn read_op<T>(
        &self,
        f: impl FnOnce(&mut EngineShared) -> Result<T>,
    ) -> Result<T> {
        let _scope = self.locker.enter_shared()?;
        let mut guard = self.shared.lock();
        let shared = &mut *guard;

        self.avoid_dirty_read(shared);
        let result = f(shared);
        shared.cache.trim();
        result
    }

    /// Runs a write under the exclusive lock inside an implicit
    /// transaction: commit on success, rollback on any error.
    pub(crate) fn write_op<T>(
        &self,
        f: impl FnOnce(&mut EngineShared) -> Result<T>,
    ) -> Result<T> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }

        let _scope = self.locker.enter_exclusive()?;
        let mut guard = self.shared.lock();
        let shared = &mut *guard;

        match f(shared) {
            Ok(value) => {
                self.commit_tx(shared)?;
                Ok(value)
            }
            Err(err) => {
                self.rollback_tx(shared);
                Err(err)
            }
        }
    }

    /// Commits the open transaction and publishes the new change counter.
    pub(crate) fn commit_tx(&self, shared: &mut EngineShared) -> Result<()> {
        let mut transaction =
            TransactionService::new(&mut shared.disk, &mut shared.cache, self.journal_enabled);

        if let Err(err) = transaction.commit() {
            transaction.rollback();
            return Err(err);
        }

        let change = shared.cache.header(&mut shared.disk)?.change_id();
        self.locker.set_change_counter(change);
        shared.last_seen_change = change;

        Ok(())
    }

    pub(crate) fn rollback_tx(&self, shared: &mut EngineShared) {
        TransactionService::new(&mut shared.disk, &mut shared.cache, self.journal_enabled)
            .rollback();
    }

    /// Looks a collection up; `Ok(None)` when it does not exist.
    pub(crate) fn collection_snapshot<'s>(
        shared: &'s mut EngineShared,
        collection: &str,
    ) -> Result<Option<Snapshot<'s>>> {
        let page_id =
            CollectionService::new(&mut shared.disk, &mut shared.cache).get(collection)?;

        Ok(match page_id {
            Some(page_id) => Some(Snapshot::new(&mut shared.disk, &mut shared.cache, page_id)),
            None => None,
        })
    }
}

impl Drop for BurrowEngine {
    fn drop(&mut self) {
        // best effort: a clean drop leaves no journal behind
        let _ = self.close();
    }
}
