use crate::engine::pages::BasePage;
use crate::engine::{PAGE_SIZE, PageBuffer, PageBufferArray};
use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Blocking file access for the datafile and its journal side file.
///
/// Pages are the only unit of datafile I/O; `flush` returns after the bytes
/// reached stable storage. Reads past the end of the file return a zeroed
/// buffer so the datafile can grow lazily.
pub(crate) struct DiskService {
    data_file: File,
    journal_file: Option<File>,
    journal_path: PathBuf,
    read_only: bool,
}

impl DiskService {
    /// Opens (or creates) the datafile. Returns the service and whether the
    /// datafile was just created.
    pub fn open(path: &Path, read_only: bool, initial_size: u64) -> Result<(Self, bool)> {
        let data_file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(path)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::FileNotFound(path.display().to_string())
                }
                _ => Error::Io(err),
            })?;

        let length = data_file.metadata()?.len();
        if length % PAGE_SIZE as u64 != 0 {
            return Err(Error::file_corrupted(format!(
                "datafile length {length} is not page aligned"
            )));
        }

        let is_new = length == 0;

        let journal_path = Self::journal_path(path);
        let journal_file = if read_only {
            None
        } else {
            Some(
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(&journal_path)?,
            )
        };

        log::debug!(
            "opened datafile {} ({length} bytes{})",
            path.display(),
            if read_only { ", read-only" } else { "" }
        );

        let mut service = DiskService {
            data_file,
            journal_file,
            journal_path,
            read_only,
        };

        if is_new && !read_only && initial_size > 0 {
            service.set_length(initial_size.div_ceil(PAGE_SIZE as u64) as u32)?;
        }

        Ok((service, is_new))
    }

    fn journal_path(path: &Path) -> PathBuf {
        let mut buf = path.to_path_buf();
        let file_name = buf
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        buf.set_file_name(file_name + "-journal");
        buf
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn len_pages(&self) -> Result<u32> {
        Ok((self.data_file.metadata()?.len() / PAGE_SIZE as u64) as u32)
    }

    pub fn read_page(&mut self, page_id: u32) -> Result<Box<PageBuffer>> {
        let mut buffer = PageBuffer::new();
        self.read_page_into(page_id, buffer.buffer_mut())?;
        Ok(buffer)
    }

    pub fn read_page_into(&mut self, page_id: u32, buffer: &mut PageBufferArray) -> Result<()> {
        let position = BasePage::get_page_position(page_id);
        let length = self.data_file.metadata()?.len();

        buffer.fill(0);
        if position >= length {
            return Ok(());
        }

        self.data_file.seek(SeekFrom::Start(position))?;
        self.data_file.read_exact(buffer)?;
        Ok(())
    }

    pub fn write_page(&mut self, page_id: u32, buffer: &PageBufferArray) -> Result<()> {
        debug_assert!(!self.read_only, "write on read-only datafile");

        self.data_file
            .seek(SeekFrom::Start(BasePage::get_page_position(page_id)))?;
        self.data_file.write_all(buffer)?;
        Ok(())
    }

    pub fn set_length(&mut self, pages: u32) -> Result<()> {
        self.data_file.set_len(pages as u64 * PAGE_SIZE as u64)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.data_file.sync_all()?;
        Ok(())
    }
}

// journal side file
impl DiskService {
    fn journal(&mut self) -> Result<&mut File> {
        self.journal_file.as_mut().ok_or(Error::ReadOnly)
    }

    pub fn journal_len(&self) -> Result<u64> {
        match &self.journal_file {
            Some(file) => Ok(file.metadata()?.len()),
            None => match std::fs::metadata(&self.journal_path) {
                Ok(metadata) => Ok(metadata.len()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
                Err(err) => Err(err.into()),
            },
        }
    }

    pub fn journal_append(&mut self, record: &PageBufferArray) -> Result<()> {
        let file = self.journal()?;
        file.seek(SeekFrom::End(0))?;
        file.write_all(record)?;
        Ok(())
    }

    pub fn journal_flush(&mut self) -> Result<()> {
        self.journal()?.sync_all()?;
        Ok(())
    }

    /// Reads every whole record currently in the journal; a partial record
    /// at the tail is dropped (it never got flushed as part of a commit).
    pub fn journal_records(&mut self) -> Result<Vec<Box<PageBuffer>>> {
        let mut records = Vec::new();

        let mut file = match &self.journal_file {
            Some(file) => file.try_clone()?,
            None => match File::open(&self.journal_path) {
                Ok(file) => file,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(records);
                }
                Err(err) => return Err(err.into()),
            },
        };

        let count = file.metadata()?.len() / PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(0))?;

        for _ in 0..count {
            let mut buffer = PageBuffer::new();
            file.read_exact(buffer.buffer_mut())?;
            records.push(buffer);
        }

        Ok(records)
    }

    pub fn clear_journal(&mut self) -> Result<()> {
        let file = self.journal()?;
        file.set_len(0)?;
        file.sync_all()?;
        Ok(())
    }

    /// Removes the journal file entirely; part of a clean shutdown.
    pub fn delete_journal(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }

        self.journal_file = None;
        match std::fs::remove_file(&self.journal_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
