//! # Reverse Mappings (RMAP)
//!
//! Cada (address space, endereço virtual) que tem um frame mapeado vira um
//! `VaMapping` na lista do frame, junto com a unit por onde o mapeamento
//! passa. O `share_count` é o tamanho dessa lista, mantido junto com ela sob
//! o lock do frame.

use alloc::vec::Vec;

use super::frame::FrameMeta;
use crate::mm::addr::VirtAddr;
use crate::mm::aspace::AsId;
use crate::mm::error::fatal;
use crate::mm::heap::{AllocFlags, KernelHeap, MetaBlock, MetaKind};
use crate::mm::unit::UnitId;

/// Mapeamento de um frame em um address space.
#[derive(Debug)]
pub struct VaMapping {
    pub aspace: AsId,
    pub vaddr: VirtAddr,
    /// Unit cuja tabela de slots produziu o mapeamento
    pub unit: UnitId,
    block: MetaBlock,
}

impl VaMapping {
    pub fn matches(&self, aspace: AsId, vaddr: VirtAddr) -> bool {
        self.aspace == aspace && self.vaddr == vaddr
    }
}

/// Registra (aspace, vaddr) no frame, via `unit`. Idempotente.
///
/// Chamado com o lock do frame (e de toda a cadeia acima) segurado, por
/// isso o bloco sai do heap com `NO_BLOCK | NO_FAIL`.
pub(crate) fn link(heap: &KernelHeap, meta: &mut FrameMeta, aspace: AsId, vaddr: VirtAddr, unit: UnitId) {
    if contains(meta, aspace, vaddr) {
        return;
    }
    let block = match heap.alloc_block(MetaKind::Mapping, AllocFlags::NO_BLOCK | AllocFlags::NO_FAIL) {
        Ok(block) => block,
        Err(_) => fatal("mapping record allocation failed"),
    };
    meta.rmap.push(VaMapping {
        aspace,
        vaddr,
        unit,
        block,
    });
    meta.share_count += 1;
}

/// Remove (aspace, vaddr). Retorna se havia registro.
pub(crate) fn unlink(heap: &KernelHeap, meta: &mut FrameMeta, aspace: AsId, vaddr: VirtAddr) -> bool {
    let Some(pos) = meta.rmap.iter().position(|m| m.matches(aspace, vaddr)) else {
        return false;
    };
    let mapping = meta.rmap.swap_remove(pos);
    meta.share_count -= 1;
    heap.free_block(mapping.block);
    true
}

pub(crate) fn contains(meta: &FrameMeta, aspace: AsId, vaddr: VirtAddr) -> bool {
    meta.rmap.iter().any(|m| m.matches(aspace, vaddr))
}

/// Passa o mapeamento (aspace, vaddr) para `unit` (clone privado).
pub(crate) fn retag(meta: &mut FrameMeta, aspace: AsId, vaddr: VirtAddr, unit: UnitId) {
    if let Some(mapping) = meta.rmap.iter_mut().find(|m| m.matches(aspace, vaddr)) {
        mapping.unit = unit;
    }
}

/// Remove e devolve todos os mapeamentos que passam por `unit`.
pub(crate) fn unlink_unit(heap: &KernelHeap, meta: &mut FrameMeta, unit: UnitId) -> Vec<(AsId, VirtAddr)> {
    let mut moved = Vec::new();
    let mut i = 0;
    while i < meta.rmap.len() {
        if meta.rmap[i].unit != unit {
            i += 1;
            continue;
        }
        let mapping = meta.rmap.swap_remove(i);
        meta.share_count -= 1;
        moved.push((mapping.aspace, mapping.vaddr));
        heap.free_block(mapping.block);
    }
    moved
}
