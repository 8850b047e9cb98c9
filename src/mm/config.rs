//! # Configuração do Módulo de Memória
//!
//! Define constantes e a configuração de runtime do MM.

use crate::sync::{LockBudget, LockPolicy};

// =============================================================================
// CONSTANTES DE TAMANHO
// =============================================================================

/// Tamanho de uma página (4 KiB)
pub const PAGE_SIZE: usize = 4096;

/// Máscara para alinhar endereços a página
pub const PAGE_MASK: u64 = !(PAGE_SIZE as u64 - 1);

/// Bits de offset dentro de uma página
pub const PAGE_OFFSET_BITS: u32 = 12;

// =============================================================================
// LAYOUT DE MEMÓRIA VIRTUAL
// =============================================================================

/// Início da faixa de usuário (página zero nunca é mapeável)
pub const USER_SPACE_START: u64 = 0x0000_0000_0000_1000;

/// Fim (exclusivo) da metade baixa canônica
pub const USER_SPACE_END: u64 = 0x0000_8000_0000_0000;

// =============================================================================
// LOCKS
// =============================================================================

/// Spins antes de considerar um lock travado
pub const DEFAULT_LOCK_SPINS: u32 = 1 << 24;

// =============================================================================
// HEAP DE METADADOS
// =============================================================================

/// Tamanho dos blocos de metadados por tipo
pub const META_BLOCK_DESCRIPTOR: usize = 128;
pub const META_BLOCK_UNIT: usize = 192;
pub const META_BLOCK_MAPPING: usize = 32;

/// Alinhamento comum dos blocos
pub const META_BLOCK_ALIGN: usize = 16;

// =============================================================================
// ALINHAMENTO
// =============================================================================

#[inline]
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

#[inline]
pub const fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

#[inline]
pub const fn is_aligned(value: u64, align: u64) -> bool {
    value & (align - 1) == 0
}

/// Número de páginas necessárias para `bytes`
#[inline]
pub const fn pages_for(bytes: u64) -> u64 {
    align_up(bytes, PAGE_SIZE as u64) / PAGE_SIZE as u64
}

// =============================================================================
// CONFIGURAÇÃO DE RUNTIME
// =============================================================================

/// Parâmetros do `MemoryManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmConfig {
    /// Orçamento de todos os locks do MM
    pub lock_budget: LockBudget,
    /// Máximo de candidatos examinados por varredura de eviction
    pub evict_scan_limit: usize,
    /// Faixa de endereços de usuário de novos address spaces
    pub user_start: u64,
    pub user_end: u64,
}

impl MmConfig {
    pub const fn new() -> Self {
        Self {
            lock_budget: LockBudget::new(DEFAULT_LOCK_SPINS, LockPolicy::Fatal),
            evict_scan_limit: usize::MAX,
            user_start: USER_SPACE_START,
            user_end: USER_SPACE_END,
        }
    }

    pub const fn with_lock_budget(mut self, budget: LockBudget) -> Self {
        self.lock_budget = budget;
        self
    }

    pub const fn with_evict_scan_limit(mut self, limit: usize) -> Self {
        self.evict_scan_limit = limit;
        self
    }
}

impl Default for MmConfig {
    fn default() -> Self {
        Self::new()
    }
}
