/// Settings fixed when the virtual memory manager starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    pub num_frames: usize,
    /// Name of the swap file, created at start and removed at shutdown.
    pub swap_file: String,
    /// Keep every [`crate::events::VmEvent`] in memory as well as logging it.
    pub record_events: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            num_frames: 16,
            swap_file: String::from("swapFile"),
            record_events: false,
        }
    }
}

impl VmConfig {
    pub fn frames(mut self, num_frames: usize) -> Self {
        self.num_frames = num_frames;
        self
    }

    pub fn swap_file(mut self, name: &str) -> Self {
        self.swap_file = String::from(name);
        self
    }

    pub fn record_events(mut self, record: bool) -> Self {
        self.record_events = record;
        self
    }
}
