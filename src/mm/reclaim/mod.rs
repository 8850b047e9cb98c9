//! # Page Reclaim Subsystem
//!
//! LRU global (`aging`) e eviction (`evict`). Só páginas de objeto sem
//! mapeamentos e sem wire são reclamáveis: memória anônima não tem para
//! onde ir sem swap.

pub mod aging;
pub mod evict;

pub use aging::{LruIter, LruList};

/// Nível de pressão de memória, derivado da fração de frames livres.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPressure {
    None,
    Low,
    Medium,
    Critical,
}

/// Limiares em porcentagem de frames livres.
#[derive(Debug, Clone, Copy)]
pub struct MemoryWatermarks {
    pub low: u64,
    pub high: u64,
    pub min: u64,
}

impl Default for MemoryWatermarks {
    fn default() -> Self {
        Self {
            low: 10,
            high: 25,
            min: 2,
        }
    }
}

impl MemoryWatermarks {
    pub fn pressure(&self, free: u64, total: u64) -> MemoryPressure {
        if total == 0 {
            return MemoryPressure::Critical;
        }
        let percent = free * 100 / total;
        if percent > self.high {
            MemoryPressure::None
        } else if percent > self.low {
            MemoryPressure::Low
        } else if percent > self.min {
            MemoryPressure::Medium
        } else {
            MemoryPressure::Critical
        }
    }
}
