use std::{
    fmt,
    fs::{remove_file, File},
    io::{self, Read, Seek, SeekFrom, Write},
    sync::{Arc, Mutex},
};

use log::{debug, trace};

#[derive(Debug)]
pub enum DiskError {
    IncorrectBlockSize(usize),
    OverCapacity(usize),
    Io(io::Error),
}

impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskError::IncorrectBlockSize(len) => {
                write!(f, "buffer of {} bytes does not match the block size", len)
            }
            DiskError::OverCapacity(block) => write!(f, "block {} is past the end of the file", block),
            DiskError::Io(e) => write!(f, "disk i/o failed: {}", e),
        }
    }
}

impl std::error::Error for DiskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiskError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DiskError {
    fn from(e: io::Error) -> Self {
        DiskError::Io(e)
    }
}

/// A flat file of fixed-size blocks with no header.
///
/// Block `n` lives at bytes `[n * BLOCKSIZE, (n + 1) * BLOCKSIZE)`. The file only
/// grows, one block at a time, through [`Disk::grow`].
#[derive(Debug, Clone)]
pub struct Disk<const BLOCKSIZE: usize> {
    file_name: String,
    file: Arc<Mutex<File>>,
}

pub fn make_name(name: &str) -> String {
    let name = name.replace('-', "_");
    let mut disk_name = String::from("DISK_IMAGE_");
    disk_name.push_str(&name);
    disk_name
}

impl<const BLOCKSIZE: usize> Disk<BLOCKSIZE> {
    /// Opens the file backing `name`. With `create` set the file is created if
    /// missing and truncated to zero blocks.
    pub fn open(name: &str, create: bool) -> Result<Self, DiskError> {
        let mut options = File::options();
        options.read(true).write(true);
        if create {
            options.create(true).truncate(true);
        }
        let file = options.open(make_name(name))?;
        debug!("Opened disk {} (create: {})", make_name(name), create);
        Ok(Self {
            file_name: String::from(name),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn create(name: &str) -> Result<Self, DiskError> {
        Self::open(name, true)
    }

    pub fn name(&self) -> &str {
        &self.file_name
    }

    pub fn len_bytes(&self) -> Result<u64, DiskError> {
        let file = self.file.lock().unwrap();
        Ok(file.metadata()?.len())
    }

    pub fn len_blocks(&self) -> Result<usize, DiskError> {
        Ok(self.len_bytes()? as usize / BLOCKSIZE)
    }

    /// Appends one zeroed block and returns its number.
    pub fn grow(&self) -> Result<usize, DiskError> {
        let file = self.file.lock().unwrap();
        let len = file.metadata()?.len();
        let block_number = len as usize / BLOCKSIZE;
        file.set_len((block_number + 1) as u64 * BLOCKSIZE as u64)?;
        trace!("Grew disk {} to {} blocks", self.file_name, block_number + 1);
        Ok(block_number)
    }

    pub fn read_block(&self, block_number: usize, buf: &mut [u8]) -> Result<(), DiskError> {
        if buf.len() != BLOCKSIZE {
            return Err(DiskError::IncorrectBlockSize(buf.len()));
        }
        let mut file = self.file.lock().unwrap();
        if (block_number + 1) as u64 * BLOCKSIZE as u64 > file.metadata()?.len() {
            return Err(DiskError::OverCapacity(block_number));
        }
        trace!("Start reading block[{}]", block_number);
        file.seek(SeekFrom::Start((block_number * BLOCKSIZE) as u64))?;
        file.read_exact(buf)?;
        trace!("Done reading block[{}]", block_number);
        Ok(())
    }

    pub fn write_block(&self, block_number: usize, block: &[u8]) -> Result<(), DiskError> {
        if block.len() != BLOCKSIZE {
            return Err(DiskError::IncorrectBlockSize(block.len()));
        }
        let mut file = self.file.lock().unwrap();
        if (block_number + 1) as u64 * BLOCKSIZE as u64 > file.metadata()?.len() {
            return Err(DiskError::OverCapacity(block_number));
        }
        trace!("Start writing block[{}]", block_number);
        file.seek(SeekFrom::Start((block_number * BLOCKSIZE) as u64))?;
        file.write_all(block)?;
        file.flush()?;
        trace!("Done writing block[{}]", block_number);
        Ok(())
    }

    /// Deletes the backing file. Other clones of this disk must not be used
    /// afterwards.
    pub fn remove(self) -> Result<(), DiskError> {
        let name = make_name(&self.file_name);
        drop(self.file);
        remove_file(&name)?;
        debug!("Removed disk {}", name);
        Ok(())
    }
}
