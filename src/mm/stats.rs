//! # Memory Statistics

use core::sync::atomic::{AtomicU64, Ordering};

/// Contadores de eventos do MM (monotônicos).
#[derive(Debug, Default)]
pub struct MmCounters {
    pub page_faults: AtomicU64,
    pub cow_copies: AtomicU64,
    /// COW resolvido sem cópia (único dono)
    pub cow_reused: AtomicU64,
    pub zero_fills: AtomicU64,
    pub unit_clones: AtomicU64,
    pub fetches: AtomicU64,
    pub io_waits: AtomicU64,
    pub io_errors: AtomicU64,
    pub evictions: AtomicU64,
    pub writebacks: AtomicU64,
    pub writeback_failures: AtomicU64,
    pub allocations: AtomicU64,
    pub frees: AtomicU64,
    pub oom: AtomicU64,
}

impl MmCounters {
    pub const fn new() -> Self {
        Self {
            page_faults: AtomicU64::new(0),
            cow_copies: AtomicU64::new(0),
            cow_reused: AtomicU64::new(0),
            zero_fills: AtomicU64::new(0),
            unit_clones: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            io_waits: AtomicU64::new(0),
            io_errors: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            writebacks: AtomicU64::new(0),
            writeback_failures: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            oom: AtomicU64::new(0),
        }
    }
}

/// Retrato do MM num instante.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub total_frames: u64,
    pub free_frames: u64,
    pub resident_frames: u64,
    pub wired_frames: u64,
    pub cached_pages: u64,
    pub units: u64,
    pub allocations: u64,
    pub frees: u64,
    pub evictions: u64,
    pub writebacks: u64,
    pub writeback_failures: u64,
    pub page_faults: u64,
    pub cow_copies: u64,
    pub cow_reused: u64,
    pub zero_fills: u64,
    pub unit_clones: u64,
    pub fetches: u64,
    pub io_waits: u64,
    pub io_errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub oom: u64,
}

impl MemoryStats {
    pub fn usage_percent(&self) -> u64 {
        if self.total_frames == 0 {
            return 0;
        }
        let used = self.total_frames - self.free_frames;
        (used * 100) / self.total_frames
    }

    /// Copia os contadores de eventos.
    pub(crate) fn fill_counters(&mut self, c: &MmCounters) {
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        self.allocations = load(&c.allocations);
        self.frees = load(&c.frees);
        self.evictions = load(&c.evictions);
        self.writebacks = load(&c.writebacks);
        self.writeback_failures = load(&c.writeback_failures);
        self.page_faults = load(&c.page_faults);
        self.cow_copies = load(&c.cow_copies);
        self.cow_reused = load(&c.cow_reused);
        self.zero_fills = load(&c.zero_fills);
        self.unit_clones = load(&c.unit_clones);
        self.fetches = load(&c.fetches);
        self.io_waits = load(&c.io_waits);
        self.io_errors = load(&c.io_errors);
        self.oom = load(&c.oom);
    }

    pub fn dump(&self) {
        crate::kinfo!("(MM) === Memory Stats ===");
        crate::kinfo!("(MM) Frames totais:", self.total_frames);
        crate::kinfo!("(MM) Frames livres:", self.free_frames);
        crate::kinfo!("(MM) Frames wired:", self.wired_frames);
        crate::kinfo!("(MM) Páginas em cache:", self.cached_pages);
        crate::kinfo!("(MM) Page faults:", self.page_faults);
        crate::kinfo!("(MM) Cópias COW:", self.cow_copies);
        crate::kinfo!("(MM) Evictions:", self.evictions);
        crate::kinfo!("(MM) Writebacks:", self.writebacks);
    }
}
