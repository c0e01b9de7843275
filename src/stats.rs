use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters bumped as side effects of paging, for reporting only.
#[derive(Debug, Default)]
pub struct VmStats {
    page_faults: AtomicUsize,
    evictions: AtomicUsize,
    swap_reads: AtomicUsize,
    swap_writes: AtomicUsize,
    swap_skipped_clean: AtomicUsize,
    section_loads: AtomicUsize,
    zero_fills: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub page_faults: usize,
    pub evictions: usize,
    pub swap_reads: usize,
    pub swap_writes: usize,
    pub swap_skipped_clean: usize,
    pub section_loads: usize,
    pub zero_fills: usize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl VmStats {
    pub fn page_fault(&self) {
        bump(&self.page_faults);
    }

    pub fn eviction(&self) {
        bump(&self.evictions);
    }

    pub fn swap_read(&self) {
        bump(&self.swap_reads);
    }

    pub fn swap_write(&self) {
        bump(&self.swap_writes);
    }

    pub fn swap_skipped_clean(&self) {
        bump(&self.swap_skipped_clean);
    }

    pub fn section_load(&self) {
        bump(&self.section_loads);
    }

    pub fn zero_fill(&self) {
        bump(&self.zero_fills);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            page_faults: self.page_faults.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            swap_reads: self.swap_reads.load(Ordering::Relaxed),
            swap_writes: self.swap_writes.load(Ordering::Relaxed),
            swap_skipped_clean: self.swap_skipped_clean.load(Ordering::Relaxed),
            section_loads: self.section_loads.load(Ordering::Relaxed),
            zero_fills: self.zero_fills.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "page faults:        {}", self.page_faults)?;
        writeln!(f, "evictions:          {}", self.evictions)?;
        writeln!(f, "swap reads:         {}", self.swap_reads)?;
        writeln!(f, "swap writes:        {}", self.swap_writes)?;
        writeln!(f, "swap skipped clean: {}", self.swap_skipped_clean)?;
        writeln!(f, "section loads:      {}", self.section_loads)?;
        write!(f, "zero fills:         {}", self.zero_fills)
    }
}
