use crate::FrameError;

/// What the system knows about one physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo<O> {
    /// The page currently mapped in this frame, if any.
    pub owner: Option<O>,
    pub used: bool,
    pub pinned: bool,
}

impl<O> Default for FrameInfo<O> {
    fn default() -> Self {
        Self {
            owner: None,
            used: false,
            pinned: false,
        }
    }
}

/// Proof that the holder pinned a frame. The frame stays out of victim
/// selection until the lease is handed back to [`FrameTable::unpin`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a pinned frame stays pinned until its lease is released"]
pub struct FrameLease {
    frame: usize,
}

impl FrameLease {
    pub fn frame(&self) -> usize {
        self.frame
    }
}

/// The global, fixed-size table of frames scanned by the clock hand. Serves as
/// the reverse map from a frame to the page that occupies it.
#[derive(Debug, Clone)]
pub struct FrameTable<O> {
    frames: Vec<FrameInfo<O>>,
}

impl<O: Copy> FrameTable<O> {
    pub fn new(num_frames: usize) -> Self {
        Self {
            frames: (0..num_frames).map(|_| FrameInfo::default()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, frame: usize) -> Result<&FrameInfo<O>, FrameError> {
        self.frames.get(frame).ok_or(FrameError::InvalidFrame(frame))
    }

    fn get_mut(&mut self, frame: usize) -> Result<&mut FrameInfo<O>, FrameError> {
        self.frames
            .get_mut(frame)
            .ok_or(FrameError::InvalidFrame(frame))
    }

    pub fn owner(&self, frame: usize) -> Option<O> {
        self.frames.get(frame).and_then(|info| info.owner)
    }

    /// Records `owner` as the occupant of `frame` and marks it used.
    pub fn install(&mut self, frame: usize, owner: O) -> Result<(), FrameError> {
        let info = self.get_mut(frame)?;
        info.owner = Some(owner);
        info.used = true;
        Ok(())
    }

    /// Forgets the occupant of `frame`, returning it.
    pub fn evict(&mut self, frame: usize) -> Result<Option<O>, FrameError> {
        let info = self.get_mut(frame)?;
        info.used = false;
        Ok(info.owner.take())
    }

    pub fn mark_used(&mut self, frame: usize) -> Result<(), FrameError> {
        self.get_mut(frame)?.used = true;
        Ok(())
    }

    pub fn clear_used(&mut self, frame: usize) -> Result<(), FrameError> {
        self.get_mut(frame)?.used = false;
        Ok(())
    }

    /// Clears the used bit of `frame`, returning whether it was set. Frames
    /// out of range read as unused.
    pub fn take_used(&mut self, frame: usize) -> bool {
        self.frames
            .get_mut(frame)
            .map_or(false, |info| std::mem::replace(&mut info.used, false))
    }

    pub fn is_used(&self, frame: usize) -> bool {
        self.frames.get(frame).map_or(false, |info| info.used)
    }

    pub fn pin(&mut self, frame: usize) -> Result<FrameLease, FrameError> {
        let info = self.get_mut(frame)?;
        if info.pinned {
            return Err(FrameError::AlreadyPinned(frame));
        }
        info.pinned = true;
        Ok(FrameLease { frame })
    }

    pub fn unpin(&mut self, lease: FrameLease) {
        if let Some(info) = self.frames.get_mut(lease.frame) {
            info.pinned = false;
        }
    }

    pub fn is_pinned(&self, frame: usize) -> bool {
        self.frames.get(frame).map_or(false, |info| info.pinned)
    }

    pub fn is_evictable(&self, frame: usize) -> bool {
        self.frames
            .get(frame)
            .map_or(false, |info| !info.pinned && info.owner.is_some())
    }

    pub fn pinned_count(&self) -> usize {
        self.frames.iter().filter(|info| info.pinned).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &FrameInfo<O>)> {
        self.frames.iter().enumerate()
    }
}
