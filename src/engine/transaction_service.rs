use crate::engine::disk::DiskService;
use crate::engine::page_cache::PageCache;
use crate::engine::PageBuffer;
use crate::{Error, Result};

// journal commit-marker record layout
const P_MARKER_PAGE_ID: usize = 0; // 00-03: u32::MAX, never a real page id
const P_MARKER_TYPE: usize = 4; // 04-04: 0xFF, never a real page type
const P_MARKER_MAGIC: usize = 8; // 08-15
const P_MARKER_COUNT: usize = 16; // 16-19: records preceding the marker
const P_MARKER_CRC: usize = 20; // 20-23: crc32 over those records

const MARKER_MAGIC: &[u8] = b"BRWCOMIT";

/// Commit choreography and crash recovery.
///
/// The journal is a redo log: each record is the full post-commit image of
/// one dirty page, and the flushed commit marker is the commit point. A
/// crash before the marker loses nothing but the open transaction; a crash
/// after it is healed on the next open by re-applying the journal, which is
/// idempotent.
pub(crate) struct TransactionService<'a> {
    disk: &'a mut DiskService,
    cache: &'a mut PageCache,
    journal_enabled: bool,
}

impl<'a> TransactionService<'a> {
    pub fn new(disk: &'a mut DiskService, cache: &'a mut PageCache, journal_enabled: bool) -> Self {
        TransactionService {
            disk,
            cache,
            journal_enabled,
        }
    }

    pub fn commit(&mut self) -> Result<()> {
        if !self.cache.has_dirty() {
            return Ok(());
        }

        // the bumped change counter commits atomically with everything else
        self.cache.header_mut(self.disk)?.bump_change_id();

        let dirty = self.cache.dirty_ids();
        let changed = if self.journal_enabled {
            let changed = self.write_journal(&dirty)?;
            self.write_datafile(&changed)?;
            self.disk.clear_journal()?;
            changed
        } else {
            let changed = self.changed_pages(&dirty);
            self.write_datafile(&changed)?;
            changed
        };

        for page_id in dirty {
            self.cache.mark_committed(page_id);
        }
        self.cache.trim();

        log::trace!("committed {} changed pages", changed.len());
        Ok(())
    }

    /// Journal phase: append every changed page image, flush, then append
    /// and flush the commit marker. Returns the changed page ids.
    fn write_journal(&mut self, dirty: &[u32]) -> Result<Vec<u32>> {
        let mut hasher = crc32fast::Hasher::new();
        let mut changed = Vec::with_capacity(dirty.len());

        for &page_id in dirty {
            let (buffer, modified) = self.cache.serialize_page(page_id);
            if modified {
                self.disk.journal_append(buffer)?;
                hasher.update(buffer);
                changed.push(page_id);
            }
        }

        if changed.is_empty() {
            return Ok(changed);
        }

        self.disk.journal_flush()?;

        let mut marker = PageBuffer::new();
        marker.write_u32(P_MARKER_PAGE_ID, u32::MAX);
        marker.write_u8(P_MARKER_TYPE, 0xFF);
        marker.write_bytes(P_MARKER_MAGIC, MARKER_MAGIC);
        marker.write_u32(P_MARKER_COUNT, changed.len() as u32);
        marker.write_u32(P_MARKER_CRC, hasher.finalize());

        self.disk.journal_append(marker.buffer())?;
        self.disk.journal_flush()?; // <- the commit point

        Ok(changed)
    }

    fn changed_pages(&mut self, dirty: &[u32]) -> Vec<u32> {
        dirty
            .iter()
            .copied()
            .filter(|&page_id| self.cache.serialize_page(page_id).1)
            .collect()
    }

    fn write_datafile(&mut self, changed: &[u32]) -> Result<()> {
        for &page_id in changed {
            let (buffer, _) = self.cache.serialize_page(page_id);
            self.disk.write_page(page_id, buffer)?;
        }
        self.disk.flush()
    }

    /// Drops every dirty page; reads after this see the pre-transaction
    /// state straight from disk.
    pub fn rollback(&mut self) {
        log::debug!("rolling back {} dirty pages", self.cache.dirty_ids().len());
        self.cache.discard_dirty();
    }

    /// Test hook: run the journal phase but crash before the datafile is
    /// touched.
    #[cfg(test)]
    fn commit_crash_after_marker(&mut self) -> Result<()> {
        self.cache.header_mut(self.disk)?.bump_change_id();
        let dirty = self.cache.dirty_ids();
        self.write_journal(&dirty)?;
        Ok(())
    }

    /// Test hook: crash before the marker was written.
    #[cfg(test)]
    fn commit_crash_before_marker(&mut self) -> Result<()> {
        self.cache.header_mut(self.disk)?.bump_change_id();

        for page_id in self.cache.dirty_ids() {
            let (buffer, modified) = self.cache.serialize_page(page_id);
            if modified {
                self.disk.journal_append(buffer)?;
            }
        }
        self.disk.journal_flush()?;
        Ok(())
    }
}

fn is_marker(record: &PageBuffer) -> bool {
    record.read_u32(P_MARKER_PAGE_ID) == u32::MAX
        && record.read_u8(P_MARKER_TYPE) == 0xFF
        && record.read_bytes(P_MARKER_MAGIC, MARKER_MAGIC.len()) == MARKER_MAGIC
}

/// Journal recovery, run once on open before anything reads the datafile.
///
/// A well-formed, checksummed commit marker means the journal holds a whole
/// committed transaction: re-apply it. Anything else means the commit never
/// happened: the datafile is intact, discard the journal.
pub(crate) fn recover(disk: &mut DiskService) -> Result<bool> {
    if disk.journal_len()? == 0 {
        return Ok(false);
    }

    let records = disk.journal_records()?;

    let committed = match records.split_last() {
        Some((marker, images)) if is_marker(marker) => {
            let count = marker.read_u32(P_MARKER_COUNT) as usize;
            let crc = marker.read_u32(P_MARKER_CRC);

            let mut hasher = crc32fast::Hasher::new();
            for image in images {
                hasher.update(image.buffer());
            }

            count == images.len() && hasher.finalize() == crc
        }
        _ => false,
    };

    if disk.is_read_only() {
        if committed {
            return Err(Error::invalid_database(
                "journal holds a committed transaction; reopen writable to recover",
            ));
        }
        log::warn!("ignoring uncommitted journal on read-only open");
        return Ok(false);
    }

    if committed {
        let images = &records[..records.len() - 1];
        log::warn!("recovering {} pages from journal", images.len());

        for image in images {
            let page_id = image.read_u32(0);
            disk.write_page(page_id, image.buffer())?;
        }
        disk.flush()?;
    } else {
        log::warn!("discarding incomplete journal ({} records)", records.len());
    }

    disk.clear_journal()?;
    Ok(committed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::pages::DataPage;
    use std::path::PathBuf;

    fn open_all(path: &PathBuf) -> (DiskService, PageCache) {
        let (mut disk, is_new) = DiskService::open(path, false, 0).unwrap();
        let mut cache = PageCache::new(100);

        if is_new {
            cache.create_header();
        } else {
            recover(&mut disk).unwrap();
        }

        (disk, cache)
    }

    fn insert_marked_page(disk: &mut DiskService, cache: &mut PageCache, fill: u8) -> u32 {
        let id = cache.new_page::<DataPage>(disk, None).unwrap();
        let page: &mut DataPage = cache.get_mut(disk, id).unwrap();
        let index = page.insert_block(16);
        page.write_payload(index, &[fill; 16]);
        id
    }

    fn page_payload(disk: &mut DiskService, cache: &mut PageCache, id: u32) -> Vec<u8> {
        let page: &DataPage = cache.get(disk, id).unwrap();
        page.payload(0).to_vec()
    }

    #[test]
    fn commit_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let (mut disk, mut cache) = open_all(&path);
        let id = insert_marked_page(&mut disk, &mut cache, 0xAA);
        TransactionService::new(&mut disk, &mut cache, true)
            .commit()
            .unwrap();
        drop(disk);

        let (mut disk, mut cache) = open_all(&path);
        assert_eq!(page_payload(&mut disk, &mut cache, id), vec![0xAA; 16]);
        assert_eq!(disk.journal_len().unwrap(), 0);
    }

    #[test]
    fn crash_after_marker_recovers_to_post_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let (mut disk, mut cache) = open_all(&path);
        TransactionService::new(&mut disk, &mut cache, true)
            .commit()
            .unwrap();

        let id = insert_marked_page(&mut disk, &mut cache, 0xBB);
        TransactionService::new(&mut disk, &mut cache, true)
            .commit_crash_after_marker()
            .unwrap();
        drop(disk);

        // recovery must re-apply the committed journal
        let (mut disk, mut cache) = open_all(&path);
        assert_eq!(page_payload(&mut disk, &mut cache, id), vec![0xBB; 16]);
        assert_eq!(cache.header(&mut disk).unwrap().last_page_id(), id);
    }

    #[test]
    fn crash_before_marker_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let (mut disk, mut cache) = open_all(&path);
        TransactionService::new(&mut disk, &mut cache, true)
            .commit()
            .unwrap();
        let last_before = cache.header(&mut disk).unwrap().last_page_id();

        insert_marked_page(&mut disk, &mut cache, 0xCC);
        TransactionService::new(&mut disk, &mut cache, true)
            .commit_crash_before_marker()
            .unwrap();
        drop(disk);

        // no marker: the journal is discarded, the datafile untouched
        let (mut disk, mut cache) = open_all(&path);
        assert_eq!(
            cache.header(&mut disk).unwrap().last_page_id(),
            last_before
        );
        assert_eq!(disk.journal_len().unwrap(), 0);
    }

    #[test]
    fn recovery_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let (mut disk, mut cache) = open_all(&path);
        insert_marked_page(&mut disk, &mut cache, 0xDD);
        TransactionService::new(&mut disk, &mut cache, true)
            .commit_crash_after_marker()
            .unwrap();

        // first recovery applies the journal but "crashes" before clearing
        let records = disk.journal_records().unwrap();
        for image in &records[..records.len() - 1] {
            let page_id = image.read_u32(0);
            disk.write_page(page_id, image.buffer()).unwrap();
        }
        drop(disk);

        let (mut disk, _) = DiskService::open(&path, false, 0).unwrap();
        assert!(recover(&mut disk).unwrap());
        let first = std::fs::read(&path).unwrap();

        // a second replay of the same images must not change a byte
        drop(disk);
        let (mut disk, _) = DiskService::open(&path, false, 0).unwrap();
        recover(&mut disk).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[test]
    fn corrupt_journal_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let (mut disk, mut cache) = open_all(&path);
        insert_marked_page(&mut disk, &mut cache, 0xEE);
        TransactionService::new(&mut disk, &mut cache, true)
            .commit_crash_after_marker()
            .unwrap();
        drop(disk);

        // flip one byte inside the first record: the marker crc must fail
        let journal = path.with_file_name("test.db-journal");
        let mut bytes = std::fs::read(&journal).unwrap();
        bytes[100] ^= 0xFF;
        std::fs::write(&journal, bytes).unwrap();

        let (mut disk, _) = DiskService::open(&path, false, 0).unwrap();
        assert!(!recover(&mut disk).unwrap());
        assert_eq!(disk.journal_len().unwrap(), 0);
    }

    #[test]
    fn rollback_restores_pre_transaction_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let (mut disk, mut cache) = open_all(&path);
        let id = insert_marked_page(&mut disk, &mut cache, 0x11);
        TransactionService::new(&mut disk, &mut cache, true)
            .commit()
            .unwrap();

        // a second transaction mutates the page, then aborts
        let page: &mut DataPage = cache.get_mut(&mut disk, id).unwrap();
        page.write_payload(0, &[0x22; 16]);
        TransactionService::new(&mut disk, &mut cache, true).rollback();

        assert_eq!(page_payload(&mut disk, &mut cache, id), vec![0x11; 16]);
    }
}
