//! # Page Frame Manager (PFM)
//!
//! Free list + LRU sobre o registry. Toda transição de lista acontece com o
//! lock do frame e o lock das listas segurados juntos, então um frame está
//! sempre em exatamente uma lista: Free ⇔ free list, alocado ⇔ LRU.
//!
//! O lock das listas é o último da ordem. A única exceção é `try_take`, que
//! trava o frame recém-tirado da free list com as listas seguradas: frames
//! livres não são alcançáveis por nenhuma outra estrutura.

pub mod frame;
pub mod rmap;

pub use frame::{FrameInfo, FrameMeta, FrameNumber, FrameSnapshot, FrameState, SlotRef};
pub use rmap::VaMapping;

use alloc::vec::Vec;

use crate::mm::addr::PhysAddr;
use crate::mm::error::fatal;
use crate::mm::pmm::FrameRegistry;
use crate::mm::reclaim::LruList;
use crate::sync::{BoundedSpinlock, LockBudget, SpinlockGuard};

/// Listas protegidas pelo lock de listas.
pub struct FrameLists {
    pub(crate) free: Vec<FrameNumber>,
    pub(crate) lru: LruList,
}

pub struct FrameAllocator {
    registry: FrameRegistry,
    lists: BoundedSpinlock<FrameLists>,
}

impl FrameAllocator {
    pub fn new(registry: FrameRegistry, budget: LockBudget) -> Self {
        // Pilha invertida: os primeiros pops devolvem os frames mais baixos.
        let free: Vec<FrameNumber> = registry.numbers().rev().collect();
        let lru = LruList::new(registry.len());
        Self {
            registry,
            lists: BoundedSpinlock::new("frame-lists", FrameLists { free, lru }, budget),
        }
    }

    #[inline]
    pub fn frame(&self, frame: FrameNumber) -> &FrameInfo {
        match self.registry.get(frame) {
            Some(info) => info,
            None => fatal("frame number outside registry"),
        }
    }

    #[inline]
    pub fn phys(&self, frame: FrameNumber) -> PhysAddr {
        self.frame(frame).phys()
    }

    pub fn registry(&self) -> &FrameRegistry {
        &self.registry
    }

    pub fn total(&self) -> usize {
        self.registry.len()
    }

    pub fn free_count(&self) -> usize {
        self.lists.lock().free.len()
    }

    pub fn lru_len(&self) -> usize {
        self.lists.lock().lru.len()
    }

    pub(crate) fn lists(&self) -> SpinlockGuard<'_, FrameLists> {
        self.lists.lock()
    }

    /// Tira um frame da free list e o coloca no LRU já em `state`.
    pub(crate) fn try_take(&self, state: FrameState) -> Option<FrameNumber> {
        let mut lists = self.lists.lock();
        let frame = lists.free.pop()?;
        let mut meta = self.frame(frame).lock();
        if meta.state != FrameState::Free || meta.is_referenced() {
            fatal("free list holds a frame in use");
        }
        meta.state = state;
        meta.dirty = false;
        lists.lru.push_mru(frame);
        crate::ktrace!("(PFM) Frame alocado idx=", frame.as_u32());
        Some(frame)
    }

    /// Devolve o frame à free list. O chamador segura o lock do frame.
    ///
    /// Frame ainda wired, mapeado ou referenciado por slot/cache é violação
    /// fatal, assim como double free.
    pub(crate) fn release_locked(&self, frame: FrameNumber, meta: &mut FrameMeta) {
        if meta.state == FrameState::Free {
            fatal("double free of frame");
        }
        if meta.wire_count > 0 {
            fatal("frame freed while wired");
        }
        if meta.share_count > 0 {
            fatal("frame freed while mapped");
        }
        if !meta.holders.is_empty() || meta.cache_key.is_some() {
            fatal("frame freed while still referenced");
        }

        meta.state = FrameState::Free;
        meta.dirty = false;
        meta.generation += 1;

        let mut lists = self.lists.lock();
        lists.lru.remove(frame);
        lists.free.push(frame);
        crate::ktrace!("(PFM) Frame liberado idx=", frame.as_u32());
    }

    /// Move para o fim MRU do LRU.
    pub(crate) fn touch(&self, frame: FrameNumber) {
        self.lists.lock().lru.touch(frame);
    }

    /// Posição LRU → MRU de todos os frames alocados.
    pub fn lru_order(&self) -> Vec<FrameNumber> {
        self.lists.lock().lru.iter_from_lru().collect()
    }
}
