use std::{
    fmt,
    sync::{Arc, Mutex},
};

#[derive(Debug, PartialEq, Eq)]
pub enum MemoryError {
    OverCapacity { address: usize, len: usize },
    InvalidFrame(usize),
    IncorrectFrameSize(usize),
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::OverCapacity { address, len } => {
                write!(f, "access of {} bytes at {:#x} is out of physical memory", len, address)
            }
            MemoryError::InvalidFrame(frame) => write!(f, "frame {} does not exist", frame),
            MemoryError::IncorrectFrameSize(len) => {
                write!(f, "buffer of {} bytes does not match the frame size", len)
            }
        }
    }
}

impl std::error::Error for MemoryError {}

/// The byte-addressable main memory of the simulated machine.
///
/// Frame `n` occupies bytes `[n * PAGE_SIZE, (n + 1) * PAGE_SIZE)`. Clones share
/// the same underlying buffer.
#[derive(Clone)]
pub struct PhysicalMemory<const PAGE_SIZE: usize> {
    num_frames: usize,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl<const PAGE_SIZE: usize> fmt::Debug for PhysicalMemory<PAGE_SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalMemory")
            .field("page_size", &PAGE_SIZE)
            .field("num_frames", &self.num_frames)
            .finish()
    }
}

impl<const PAGE_SIZE: usize> PhysicalMemory<PAGE_SIZE> {
    pub fn create(num_frames: usize) -> Self {
        assert!(PAGE_SIZE.is_power_of_two(), "Page size {} is not a power of 2", PAGE_SIZE);
        Self {
            num_frames,
            buffer: Arc::new(Mutex::new(vec![0; num_frames * PAGE_SIZE])),
        }
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn capacity(&self) -> usize {
        self.num_frames * PAGE_SIZE
    }

    pub fn check_address(&self, address: usize, len: usize) -> Result<(), MemoryError> {
        match address.checked_add(len) {
            Some(end) if end <= self.capacity() => Ok(()),
            _ => Err(MemoryError::OverCapacity { address, len }),
        }
    }

    fn check_frame(&self, frame: usize) -> Result<(), MemoryError> {
        if frame >= self.num_frames {
            return Err(MemoryError::InvalidFrame(frame));
        }
        Ok(())
    }

    pub fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.check_address(address, buf.len())?;
        let buffer = self.buffer.lock().unwrap();
        buf.copy_from_slice(&buffer[address..address + buf.len()]);
        Ok(())
    }

    pub fn write(&self, address: usize, bytes: &[u8]) -> Result<(), MemoryError> {
        self.check_address(address, bytes.len())?;
        let mut buffer = self.buffer.lock().unwrap();
        buffer[address..address + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_u8(&self, address: usize) -> Result<u8, MemoryError> {
        let mut byte = [0; 1];
        self.read(address, &mut byte)?;
        Ok(byte[0])
    }

    pub fn write_u8(&self, address: usize, byte: u8) -> Result<(), MemoryError> {
        self.write(address, &[byte])
    }

    /// Copies the whole content of `frame` into `buf`.
    pub fn read_frame(&self, frame: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.check_frame(frame)?;
        if buf.len() != PAGE_SIZE {
            return Err(MemoryError::IncorrectFrameSize(buf.len()));
        }
        self.read(frame * PAGE_SIZE, buf)
    }

    pub fn write_frame(&self, frame: usize, bytes: &[u8]) -> Result<(), MemoryError> {
        self.check_frame(frame)?;
        if bytes.len() != PAGE_SIZE {
            return Err(MemoryError::IncorrectFrameSize(bytes.len()));
        }
        self.write(frame * PAGE_SIZE, bytes)
    }

    pub fn zero_frame(&self, frame: usize) -> Result<(), MemoryError> {
        self.with_frame_mut(frame, |buf| buf.fill(0))
    }

    /// Runs `f` over the bytes of `frame` while holding the memory lock.
    pub fn with_frame_mut<R>(
        &self,
        frame: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, MemoryError> {
        self.check_frame(frame)?;
        let mut buffer = self.buffer.lock().unwrap();
        Ok(f(&mut buffer[frame * PAGE_SIZE..(frame + 1) * PAGE_SIZE]))
    }
}
