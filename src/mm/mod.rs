//! # Memory Management Subsystem (MM)
//!
//! Núcleo de memória virtual do Forge: frames físicos, address spaces,
//! paginação sob demanda com copy-on-write e page cache com eviction LRU.
//!
//! ## 🏗️ Arquitetura dos Módulos
//!
//! | Módulo    | Responsabilidade                                             |
//! |-----------|--------------------------------------------------------------|
//! | `pmm`     | Memory map do boot → registry de frames                      |
//! | `pfm`     | Estado por frame, free list, rmap, wire/unwire               |
//! | `reclaim` | LRU global e eviction                                        |
//! | `aspace`  | Address spaces, descriptors (VMAs), fork                     |
//! | `unit`    | VM units: zero-fill, páginas de objeto, COW                  |
//! | `cache`   | Page cache (objeto, offset) → frame, writeback               |
//! | `fault`   | Entrada de page fault, espera e fetch de I/O                 |
//! | `heap`    | Blocos de metadados (descriptors, units, mapeamentos)        |
//!
//! ## 🔒 Ordem de Locks
//!
//! ```text
//! AddressSpace → Unit → tabela da Unit → índice do cache → Frame → listas
//! ```
//!
//! Registry de units, mapa de objetos do cache e heap são folhas. Quem
//! precisa subir na ordem (eviction, a partir das listas) usa `try_lock`
//! e pula o candidato se não conseguir.
//!
//! Um único `MemoryManager` por boot, passado por referência. Não há
//! estado global escondido.

pub mod addr;
pub mod aspace;
pub mod cache;
pub mod config;
pub mod debug;
pub mod error;
pub mod fault;
pub mod heap;
pub mod hhdm;
pub mod pfm;
pub mod pmm;
pub mod reclaim;
pub mod stats;
pub mod unit;

#[cfg(any(test, feature = "self_test"))]
pub mod test;

pub use addr::{PhysAddr, VirtAddr};
pub use aspace::{AddressSpace, AsId, Protection, RegionInfo};
pub use config::{MmConfig, PAGE_SIZE};
pub use error::{MmError, MmResult};
pub use fault::{handle_page_fault, AccessType, PageFaultInfo};
pub use pfm::{FrameNumber, FrameSnapshot, FrameState};
pub use stats::MemoryStats;
pub use unit::{UnitId, UnitKind, VmUnit};

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::fs::Pager;
use crate::sched::Scheduler;
use crate::sync::BoundedSpinlock;
use cache::PageCache;
use error::fatal;
use heap::KernelHeap;
use hhdm::DirectMap;
use pfm::{FrameAllocator, FrameMeta};
use pmm::{FrameRegistry, MemoryRegion};
use reclaim::evict::{Reclaim, Victim};
use reclaim::{MemoryPressure, MemoryWatermarks};
use stats::MmCounters;

/// Contexto do subsistema de memória.
pub struct MemoryManager {
    pub(crate) config: MmConfig,
    pub(crate) hhdm: DirectMap,
    pub(crate) pfm: FrameAllocator,
    pub(crate) cache: PageCache,
    pub(crate) units: BoundedSpinlock<BTreeMap<UnitId, Arc<VmUnit>>>,
    pub(crate) heap: KernelHeap,
    pub(crate) pager: Arc<dyn Pager>,
    pub(crate) sched: Arc<dyn Scheduler>,
    pub(crate) counters: MmCounters,
    pub(crate) next_unit: AtomicU64,
    pub(crate) next_aspace: AtomicU64,
}

/// Resultado de `allocate_locked`.
#[derive(Debug)]
pub(crate) enum Allocation {
    Frame(FrameNumber),
    /// Só há vítimas sujas: gravar sem locks e tentar de novo
    Writeback(Victim),
}

impl MemoryManager {
    /// Inicializa o MM a partir do memory map do bootloader.
    ///
    /// Regiões utilizáveis viram frames; qualquer outro tipo é reservado e
    /// nunca entra no registry.
    pub fn new(
        map: &[MemoryRegion],
        hhdm: DirectMap,
        heap: KernelHeap,
        pager: Arc<dyn Pager>,
        sched: Arc<dyn Scheduler>,
        config: MmConfig,
    ) -> MmResult<Self> {
        crate::kinfo!("(MM) Inicializando subsistema de memória...");
        let registry = FrameRegistry::from_memory_map(map, config.lock_budget);
        if registry.is_empty() {
            crate::kerror!("(MM) Memory map sem frames utilizáveis!");
            return Err(MmError::OutOfMemory);
        }
        crate::kinfo!("(MM) Frames utilizáveis:", registry.len());

        let mm = Self {
            config,
            hhdm,
            pfm: FrameAllocator::new(registry, config.lock_budget),
            cache: PageCache::new(config.lock_budget),
            units: BoundedSpinlock::new("units", BTreeMap::new(), config.lock_budget),
            heap,
            pager,
            sched,
            counters: MmCounters::new(),
            next_unit: AtomicU64::new(1),
            next_aspace: AtomicU64::new(1),
        };
        crate::kok!("(MM) Subsistema de memória pronto");
        Ok(mm)
    }

    pub fn config(&self) -> &MmConfig {
        &self.config
    }

    pub fn heap(&self) -> &KernelHeap {
        &self.heap
    }

    pub fn frames(&self) -> &FrameAllocator {
        &self.pfm
    }

    pub fn page_cache(&self) -> &PageCache {
        &self.cache
    }

    // =========================================================================
    // FRAMES
    // =========================================================================

    /// Frame da free list; sem nenhum, reclama um do LRU (gravando vítimas
    /// sujas aqui mesmo). Só para quem não segura nenhum lock do MM.
    pub(crate) fn allocate(&self, state: FrameState) -> MmResult<FrameNumber> {
        loop {
            if let Some(frame) = self.pfm.try_take(state) {
                self.counters.allocations.fetch_add(1, Ordering::Relaxed);
                return Ok(frame);
            }
            match self.reclaim_one(false) {
                Reclaim::Freed => {}
                Reclaim::Writeback(victim) => {
                    self.complete_eviction(victim);
                }
                Reclaim::Nothing => return Err(self.out_of_memory()),
            }
        }
    }

    /// Como `allocate`, mas sem I/O: com locks do MM segurados, uma vítima
    /// suja volta para o fault loop gravar depois de soltar tudo.
    pub(crate) fn allocate_locked(&self, state: FrameState) -> MmResult<Allocation> {
        loop {
            if let Some(frame) = self.pfm.try_take(state) {
                self.counters.allocations.fetch_add(1, Ordering::Relaxed);
                return Ok(Allocation::Frame(frame));
            }
            match self.reclaim_one(true) {
                Reclaim::Freed => {}
                Reclaim::Writeback(victim) => return Ok(Allocation::Writeback(victim)),
                Reclaim::Nothing => return Err(self.out_of_memory()),
            }
        }
    }

    #[cold]
    pub(crate) fn out_of_memory(&self) -> MmError {
        self.counters.oom.fetch_add(1, Ordering::Relaxed);
        crate::kwarn!("(MM) OOM: nenhum frame livre ou reclamável");
        MmError::OutOfMemory
    }

    /// Aloca um frame para uso direto do kernel (`ResidentPrivate`).
    pub fn allocate_frame(&self) -> MmResult<FrameNumber> {
        self.allocate(FrameState::ResidentPrivate)
    }

    /// Devolve um frame alocado com `allocate_frame`.
    ///
    /// Frame wired, mapeado ou ainda referenciado (slot/cache) é violação
    /// fatal, assim como double free.
    pub fn free_frame(&self, frame: FrameNumber) {
        let mut meta = self.pfm.frame(frame).lock();
        self.pfm.release_locked(frame, &mut meta);
        self.counters.frees.fetch_add(1, Ordering::Relaxed);
    }

    /// Fixa o frame na memória: nunca será vítima de eviction.
    pub fn wire(&self, frame: FrameNumber) {
        let mut meta = self.pfm.frame(frame).lock();
        if meta.state == FrameState::Free {
            fatal("wire of a free frame");
        }
        meta.wire_count += 1;
    }

    /// Solta um wire. Chegar a zero só torna o frame elegível de novo.
    pub fn unwire(&self, frame: FrameNumber) {
        let mut meta = self.pfm.frame(frame).lock();
        if meta.wire_count == 0 {
            fatal("unwire below zero");
        }
        meta.wire_count -= 1;
    }

    pub fn frame_snapshot(&self, frame: FrameNumber) -> FrameSnapshot {
        self.pfm.frame(frame).lock().snapshot()
    }

    pub fn frame_phys(&self, frame: FrameNumber) -> PhysAddr {
        self.pfm.phys(frame)
    }

    /// Libera o frame se ninguém mais o referencia. Frames em I/O ficam
    /// com quem está fazendo o I/O.
    pub(crate) fn release_if_unreferenced(&self, frame: FrameNumber, meta: &mut FrameMeta) -> bool {
        if meta.is_referenced() {
            return false;
        }
        match meta.state {
            FrameState::Free | FrameState::BusyIo => false,
            _ => {
                self.pfm.release_locked(frame, meta);
                self.counters.frees.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    // =========================================================================
    // ESTATÍSTICAS
    // =========================================================================

    pub fn stats(&self) -> MemoryStats {
        let mut stats = MemoryStats {
            total_frames: self.pfm.total() as u64,
            ..MemoryStats::default()
        };
        for frame in self.pfm.registry().numbers() {
            let meta = self.pfm.frame(frame).lock();
            if meta.state == FrameState::Free {
                stats.free_frames += 1;
                continue;
            }
            stats.resident_frames += 1;
            if meta.wire_count > 0 {
                stats.wired_frames += 1;
            }
        }
        let cache = self.cache.stats();
        stats.cached_pages = cache.cached_pages;
        stats.cache_hits = cache.hits;
        stats.cache_misses = cache.misses;
        stats.units = self.units.lock().len() as u64;
        stats.fill_counters(&self.counters);
        stats
    }

    /// Pressão de memória segundo as watermarks padrão.
    pub fn pressure(&self) -> MemoryPressure {
        MemoryWatermarks::default().pressure(self.pfm.free_count() as u64, self.pfm.total() as u64)
    }
}
