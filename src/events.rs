use std::{fmt, sync::Mutex};

use log::{log, Level};

use crate::translation::PageId;

/// Where a faulted-in page got its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSource {
    FromSwap { slot: usize },
    FromExecutableSection { section: usize, page: usize },
    ZeroFill,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmEvent {
    FaultStarted {
        page: PageId,
    },
    /// `source` is `None` when another thread made the page resident first.
    FaultResolved {
        page: PageId,
        frame: usize,
        source: Option<ContentSource>,
    },
    FaultFailed {
        page: PageId,
        error: String,
    },
    EvictionChosen {
        frame: usize,
        victim: PageId,
        dirty: bool,
    },
    SwapWrite {
        page: PageId,
        slot: usize,
    },
    SwapRead {
        page: PageId,
        slot: usize,
    },
    SwapSkippedClean {
        page: PageId,
    },
    SectionLoad {
        page: PageId,
        section: usize,
    },
    ZeroFill {
        page: PageId,
    },
}

impl VmEvent {
    pub fn level(&self) -> Level {
        match self {
            VmEvent::FaultFailed { .. } => Level::Warn,
            VmEvent::FaultStarted { .. } | VmEvent::FaultResolved { .. } => Level::Trace,
            _ => Level::Debug,
        }
    }
}

impl fmt::Display for VmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmEvent::FaultStarted { page } => write!(f, "fault on {}", page),
            VmEvent::FaultResolved {
                page,
                frame,
                source,
            } => match source {
                Some(source) => write!(
                    f,
                    "fault on {} resolved in frame {} ({:?})",
                    page, frame, source
                ),
                None => write!(f, "fault on {} already resident in frame {}", page, frame),
            },
            VmEvent::FaultFailed { page, error } => write!(f, "fault on {} failed: {}", page, error),
            VmEvent::EvictionChosen {
                frame,
                victim,
                dirty,
            } => write!(f, "evicting {} from frame {} (dirty: {})", victim, frame, dirty),
            VmEvent::SwapWrite { page, slot } => write!(f, "swapped out {} to slot {}", page, slot),
            VmEvent::SwapRead { page, slot } => write!(f, "swapped in {} from slot {}", page, slot),
            VmEvent::SwapSkippedClean { page } => write!(f, "dropped clean page {}", page),
            VmEvent::SectionLoad { page, section } => {
                write!(f, "loaded {} from section {}", page, section)
            }
            VmEvent::ZeroFill { page } => write!(f, "zero-filled {}", page),
        }
    }
}

/// Sink for [`VmEvent`]s: always logged, kept in memory only when enabled.
#[derive(Debug, Default)]
pub struct EventLog {
    enabled: bool,
    events: Mutex<Vec<VmEvent>>,
}

impl EventLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&self, event: VmEvent) {
        log!(event.level(), "{}", event);
        if self.enabled {
            self.events.lock().unwrap().push(event);
        }
    }

    /// Takes every event recorded so far.
    pub fn drain(&self) -> Vec<VmEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_log_keeps_nothing() {
        let events = EventLog::new(false);
        events.record(VmEvent::ZeroFill {
            page: PageId::new(1, 0),
        });
        assert!(events.is_empty());
    }

    #[test]
    fn drain_empties_the_log() {
        let events = EventLog::new(true);
        let page = PageId::new(1, 2);
        events.record(VmEvent::FaultStarted { page });
        events.record(VmEvent::ZeroFill { page });
        assert_eq!(events.len(), 2);
        assert_eq!(
            events.drain(),
            vec![VmEvent::FaultStarted { page }, VmEvent::ZeroFill { page }]
        );
        assert!(events.is_empty());
    }

    #[test]
    fn failures_log_as_warnings() {
        let failed = VmEvent::FaultFailed {
            page: PageId::new(1, 0),
            error: String::from("insufficient physical memory"),
        };
        assert_eq!(failed.level(), Level::Warn);
        assert_eq!(
            failed.to_string(),
            "fault on 1:0 failed: insufficient physical memory"
        );
    }
}
