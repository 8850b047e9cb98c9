//! # Frame Info
//!
//! Metadados de um frame físico. Tudo que muda depois do boot fica dentro
//! de `FrameMeta`, atrás do lock do próprio frame.

use alloc::vec::Vec;

use super::rmap::VaMapping;
use crate::mm::addr::PhysAddr;
use crate::mm::cache::CacheKey;
use crate::mm::unit::UnitId;
use crate::sync::{BoundedSpinlock, LockBudget, SpinlockGuard};

// =============================================================================
// FRAME NUMBER
// =============================================================================

/// Índice de um frame no registry (estável durante toda a vida do MM)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNumber(u32);

impl FrameNumber {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

// =============================================================================
// FRAME STATE
// =============================================================================

/// Estado de um frame físico
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Na free list
    Free,
    /// Conteúdo válido de (objeto, offset), indexado no page cache
    ResidentCached,
    /// Anônimo, ou de objeto mas fora do cache
    ResidentPrivate,
    /// I/O em andamento (fetch ou writeback); quem precisa do conteúdo espera
    BusyIo,
    /// Leitura falhou; o frame não está mais no cache
    Error,
}

// =============================================================================
// SLOT REF
// =============================================================================

/// Slot de uma VmUnit que aponta para o frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub unit: UnitId,
    pub page: u64,
}

// =============================================================================
// FRAME META
// =============================================================================

/// Estado mutável de um frame.
#[derive(Debug)]
pub struct FrameMeta {
    pub(crate) state: FrameState,
    pub(crate) wire_count: u32,
    /// Sempre igual a `rmap.len()`
    pub(crate) share_count: u32,
    pub(crate) rmap: Vec<VaMapping>,
    pub(crate) holders: Vec<SlotRef>,
    pub(crate) cache_key: Option<CacheKey>,
    pub(crate) dirty: bool,
    /// Incrementa a cada free: quem espera sabe que o frame mudou de dono
    pub(crate) generation: u64,
    /// Geração cujo fetch falhou
    pub(crate) failed_generation: Option<u64>,
}

impl FrameMeta {
    const fn new() -> Self {
        Self {
            state: FrameState::Free,
            wire_count: 0,
            share_count: 0,
            rmap: Vec::new(),
            holders: Vec::new(),
            cache_key: None,
            dirty: false,
            generation: 0,
            failed_generation: None,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn wire_count(&self) -> u32 {
        self.wire_count
    }

    pub fn share_count(&self) -> u32 {
        self.share_count
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Alguém ainda usa o frame
    pub(crate) fn is_referenced(&self) -> bool {
        self.wire_count > 0
            || self.share_count > 0
            || !self.holders.is_empty()
            || self.cache_key.is_some()
    }

    /// Candidato à eviction: conteúdo recuperável do storage (ou inútil),
    /// sem wire e sem mapeamentos.
    pub(crate) fn is_evictable(&self) -> bool {
        if self.wire_count > 0 || self.share_count > 0 {
            return false;
        }
        match self.state {
            FrameState::ResidentCached => self.cache_key.is_some(),
            FrameState::Error => true,
            _ => false,
        }
    }

    pub(crate) fn add_holder(&mut self, unit: UnitId, page: u64) {
        let holder = SlotRef { unit, page };
        if !self.holders.contains(&holder) {
            self.holders.push(holder);
        }
    }

    pub(crate) fn remove_holder(&mut self, unit: UnitId, page: u64) {
        self.holders.retain(|h| !(h.unit == unit && h.page == page));
    }

    /// Retrato imutável para diagnóstico e testes
    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            state: self.state,
            wire_count: self.wire_count,
            share_count: self.share_count,
            mappings: self.rmap.len(),
            holders: self.holders.len(),
            cache_key: self.cache_key,
            dirty: self.dirty,
            generation: self.generation,
        }
    }
}

/// Cópia dos campos de um frame num instante.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub state: FrameState,
    pub wire_count: u32,
    pub share_count: u32,
    pub mappings: usize,
    pub holders: usize,
    pub cache_key: Option<CacheKey>,
    pub dirty: bool,
    pub generation: u64,
}

// =============================================================================
// FRAME INFO
// =============================================================================

/// Entrada do registry: endereço fixo + metadados travados.
pub struct FrameInfo {
    phys: PhysAddr,
    meta: BoundedSpinlock<FrameMeta>,
}

impl FrameInfo {
    pub(crate) const fn new(phys: PhysAddr, budget: LockBudget) -> Self {
        Self {
            phys,
            meta: BoundedSpinlock::new("frame", FrameMeta::new(), budget),
        }
    }

    #[inline]
    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    #[inline]
    pub(crate) fn lock(&self) -> SpinlockGuard<'_, FrameMeta> {
        self.meta.lock()
    }

    #[inline]
    pub(crate) fn try_lock(&self) -> Option<SpinlockGuard<'_, FrameMeta>> {
        self.meta.try_lock()
    }
}
