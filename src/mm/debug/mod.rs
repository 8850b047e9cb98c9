//! # Memory Debug Utilities
//!
//! Verificação de consistência entre frames, listas, units e cache. Trava
//! tudo na ordem normal, uma estrutura por vez; resultados só são exatos
//! com o sistema quieto (testes, self-test no boot).

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::mm::cache::CacheKey;
use crate::mm::pfm::{FrameNumber, FrameState};
use crate::mm::unit::VmUnit;
use crate::mm::MemoryManager;

/// Loga o estado de um frame.
pub fn dump_frame(mm: &MemoryManager, frame: FrameNumber) {
    let snap = mm.frame_snapshot(frame);
    crate::kinfo!("(MM) Frame idx=", frame.as_u32());
    crate::kinfo!("(MM)   phys=", mm.frame_phys(frame).as_u64());
    crate::kinfo!("(MM)   state=", snap.state as u64);
    crate::kinfo!("(MM)   wire=", snap.wire_count);
    crate::kinfo!("(MM)   share=", snap.share_count);
    crate::kinfo!("(MM)   holders=", snap.holders);
}

pub fn dump_memory_info(mm: &MemoryManager) {
    mm.stats().dump();
}

/// Confere as invariantes do PFM. Loga a primeira violação encontrada.
pub fn verify_pfm_integrity(mm: &MemoryManager) -> bool {
    let mut free = 0usize;
    for frame in mm.pfm.registry().numbers() {
        let meta = mm.pfm.frame(frame).lock();
        let lists = mm.pfm.lists();
        let on_free = lists.free.contains(&frame);
        let on_lru = lists.lru.contains(frame);
        drop(lists);

        if meta.share_count as usize != meta.rmap.len() {
            return fail("share_count diverge do rmap no frame", frame);
        }
        if meta.state == FrameState::Free {
            free += 1;
            if !on_free || on_lru {
                return fail("frame livre fora da free list", frame);
            }
            if meta.wire_count > 0 || !meta.holders.is_empty() || meta.cache_key.is_some() {
                return fail("frame livre ainda referenciado", frame);
            }
        } else if on_free || !on_lru {
            return fail("frame alocado fora do LRU", frame);
        }
    }

    let lists = mm.pfm.lists();
    if lists.free.len() != free || lists.lru.len() + free != mm.pfm.total() {
        drop(lists);
        crate::kerror!("(MM) Contagem das listas inconsistente, livres=", free);
        return false;
    }
    true
}

/// Todo slot de unit aponta para um frame que o lista em `holders`.
pub fn verify_unit_slots(mm: &MemoryManager) -> bool {
    let units: Vec<Arc<VmUnit>> = mm.units.lock().values().cloned().collect();
    for unit in units {
        let table = unit.table.lock();
        for (page, slot) in table.iter() {
            let meta = mm.pfm.frame(slot.frame).lock();
            if meta.state == FrameState::Free {
                return fail("slot aponta para frame livre", slot.frame);
            }
            if !meta.holders.iter().any(|h| h.unit == unit.id() && h.page == page) {
                return fail("frame não lista o slot que o referencia", slot.frame);
            }
        }
    }
    true
}

/// Entradas do cache e `cache_key` dos frames concordam.
pub fn verify_page_cache(mm: &MemoryManager) -> bool {
    let handles: Vec<_> = mm.cache.handles();
    for handle in handles {
        let index = handle.lock();
        let object = index.object();
        for (offset, frame) in index.entries() {
            let meta = mm.pfm.frame(frame).lock();
            if meta.state == FrameState::Free {
                return fail("entrada do cache aponta para frame livre", frame);
            }
            if meta.cache_key != Some(CacheKey::new(object, offset)) {
                return fail("cache_key diverge do índice no frame", frame);
            }
        }
    }
    true
}

/// Todas as verificações acima.
pub fn verify_all(mm: &MemoryManager) -> bool {
    verify_pfm_integrity(mm) && verify_unit_slots(mm) && verify_page_cache(mm)
}

fn fail(msg: &'static str, frame: FrameNumber) -> bool {
    crate::kerror!("(MM) Integridade violada:");
    crate::kerror!(msg, frame.as_u32());
    false
}
