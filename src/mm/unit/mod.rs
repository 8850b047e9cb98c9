//! # VM Unit
//!
//! Conteúdo paginável por trás de um ou mais descriptors: memória anônima
//! (zero-fill) ou uma janela de um objeto com pager.
//!
//! ## Ciclo de vida
//!
//! ```text
//! create_*_unit ─► refcount 0 ─► add_region/fork: +1 ─► remove_region: -1
//!                                                        │
//!                                       refcount == 0 ◄──┘ destroy
//! ```
//!
//! ## Units anônimas compartilhadas
//!
//! Descriptors que recebem a mesma unit por `add_region` enxergam a mesma
//! tabela de slots: escrita de um aparece no outro. Só o fork cria
//! semântica de snapshot: os dois descriptors ficam `cow_shared`, todo slot
//! vira COW e a primeira escrita de um deles troca sua unit por um clone
//! privado (`privatize`). Cada frame lembra quais slots apontam para ele
//! (`holders`).

pub mod resolve;
pub mod table;

pub use table::{Slot, SlotTable};

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use crate::fs::ObjectId;
use crate::mm::aspace::{AsId, Descriptor};
use crate::mm::config::{is_aligned, PAGE_SIZE};
use crate::mm::error::{fatal, MmError, MmResult};
use crate::mm::heap::{AllocFlags, MetaBlock, MetaKind};
use crate::mm::pfm::{rmap, FrameState};
use crate::mm::MemoryManager;
use crate::sync::{BoundedSpinlock, LockBudget, SpinlockGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(u64);

impl UnitId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Origem do conteúdo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Páginas zeradas sob demanda
    Anonymous,
    /// Páginas vêm do page cache / pager do objeto
    Object(ObjectId),
}

/// Estado protegido pelo lock da unit.
pub(crate) struct UnitState {
    pub(crate) refcount: u32,
    /// Descriptors `cow_shared` sobre esta unit
    pub(crate) cow_sharers: u32,
    pub(crate) destroyed: bool,
    block: Option<MetaBlock>,
}

pub struct VmUnit {
    id: UnitId,
    kind: UnitKind,
    pages: u64,
    pub(crate) state: BoundedSpinlock<UnitState>,
    pub(crate) table: BoundedSpinlock<SlotTable>,
}

impl VmUnit {
    fn new(id: UnitId, kind: UnitKind, pages: u64, block: MetaBlock, budget: LockBudget) -> Self {
        Self {
            id,
            kind,
            pages,
            state: BoundedSpinlock::new(
                "unit",
                UnitState {
                    refcount: 0,
                    cow_sharers: 0,
                    destroyed: false,
                    block: Some(block),
                },
                budget,
            ),
            table: BoundedSpinlock::new("unit-table", SlotTable::new(), budget),
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn is_anonymous(&self) -> bool {
        self.kind == UnitKind::Anonymous
    }

    /// Tamanho em páginas
    pub fn pages(&self) -> u64 {
        self.pages
    }

    pub fn size_bytes(&self) -> u64 {
        self.pages * PAGE_SIZE as u64
    }

    /// Número de descriptors que referenciam a unit
    pub fn refcount(&self) -> u32 {
        self.state.lock().refcount
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    pub fn resident_pages(&self) -> usize {
        self.table.lock().len()
    }

    /// Slot da página, se residente
    pub fn slot(&self, page: u64) -> Option<Slot> {
        self.table.lock().get(page)
    }

    pub(crate) fn lock_state(&self) -> SpinlockGuard<'_, UnitState> {
        self.state.lock()
    }
}

// =============================================================================
// CICLO DE VIDA
// =============================================================================

impl MemoryManager {
    /// Unit anônima de `size` bytes (múltiplo de página).
    pub fn create_anonymous_unit(&self, size: u64) -> MmResult<Arc<VmUnit>> {
        self.create_unit(UnitKind::Anonymous, size)
    }

    /// Unit sobre `object`, cobrindo os offsets `[0, size)`.
    pub fn create_object_unit(&self, object: ObjectId, size: u64) -> MmResult<Arc<VmUnit>> {
        self.create_unit(UnitKind::Object(object), size)
    }

    fn create_unit(&self, kind: UnitKind, size: u64) -> MmResult<Arc<VmUnit>> {
        if size == 0 {
            return Err(MmError::InvalidSize);
        }
        if !is_aligned(size, PAGE_SIZE as u64) {
            return Err(MmError::NotAligned);
        }
        let block = self.heap.alloc_block(MetaKind::Unit, AllocFlags::empty())?;
        let id = UnitId(self.next_unit.fetch_add(1, Ordering::Relaxed));
        let unit = Arc::new(VmUnit::new(
            id,
            kind,
            size / PAGE_SIZE as u64,
            block,
            self.config.lock_budget,
        ));
        self.units.lock().insert(id, unit.clone());
        crate::kdebug!("(Unit) Unit criada id=", id.0);
        Ok(unit)
    }

    /// Descarta uma unit que nunca foi (ou não é mais) referenciada.
    pub fn discard_unit(&self, unit: &Arc<VmUnit>) {
        let mut state = unit.state.lock();
        if state.refcount > 0 || state.destroyed {
            return;
        }
        let mut table = unit.table.lock();
        let block = self.destroy_unit_locked(unit, &mut state, &mut table);
        drop(table);
        drop(state);
        self.finish_unit_destroy(unit.id, block);
    }

    /// Unit registrada pelo id
    pub fn unit(&self, id: UnitId) -> Option<Arc<VmUnit>> {
        self.units.lock().get(&id).cloned()
    }

    pub fn unit_count(&self) -> usize {
        self.units.lock().len()
    }

    /// +1 referência (novo descriptor).
    pub(crate) fn unit_retain(&self, unit: &VmUnit) -> MmResult<()> {
        let mut state = unit.state.lock();
        if state.destroyed {
            return Err(MmError::InvalidAddress);
        }
        state.refcount += 1;
        Ok(())
    }

    /// Desfaz os mapeamentos de `desc` em `aspace` e solta sua referência.
    /// A última referência destrói a unit.
    pub(crate) fn unmap_descriptor(&self, aspace: AsId, desc: &Descriptor) {
        let unit = desc.unit();
        let mut state = unit.state.lock();
        let mut table = unit.table.lock();

        for (page, slot) in table.range(desc.pages()) {
            let mut meta = self.pfm.frame(slot.frame).lock();
            rmap::unlink(&self.heap, &mut meta, aspace, desc.vaddr_of(page));
        }

        if state.refcount == 0 {
            fatal("unit reference count underflow");
        }
        state.refcount -= 1;
        if desc.is_cow_shared() {
            state.cow_sharers = state.cow_sharers.saturating_sub(1);
        }
        if state.refcount > 0 {
            return;
        }

        let block = self.destroy_unit_locked(unit, &mut state, &mut table);
        drop(table);
        drop(state);
        self.finish_unit_destroy(unit.id, block);
    }

    /// Solta todos os slots. Frames sem mais nenhuma referência voltam para
    /// a free list; os que estão no cache ficam lá.
    fn destroy_unit_locked(
        &self,
        unit: &VmUnit,
        state: &mut UnitState,
        table: &mut SlotTable,
    ) -> Option<MetaBlock> {
        state.destroyed = true;
        for (page, slot) in table.drain() {
            let mut meta = self.pfm.frame(slot.frame).lock();
            meta.remove_holder(unit.id, page);
            self.release_if_unreferenced(slot.frame, &mut meta);
        }
        state.block.take()
    }

    fn finish_unit_destroy(&self, id: UnitId, block: Option<MetaBlock>) {
        self.units.lock().remove(&id);
        if let Some(block) = block {
            self.heap.free_block(block);
        }
        crate::kdebug!("(Unit) Unit destruída id=", id.0);
    }

    /// Fork: o descriptor filho passa a compartilhar a unit do pai.
    ///
    /// Slots de regiões anônimas graváveis viram COW e o descriptor do pai
    /// fica `cow_shared`; cada página que o pai tem mapeada ganha o
    /// mapeamento equivalente no filho. Devolve se o descriptor filho
    /// também é `cow_shared`.
    pub(crate) fn share_descriptor(&self, parent: AsId, child: AsId, desc: &mut Descriptor) -> MmResult<bool> {
        let unit = desc.unit().clone();
        let mut state = unit.state.lock();
        if state.destroyed {
            return Err(MmError::InvalidAddress);
        }
        state.refcount += 1;

        let cow = unit.is_anonymous() && desc.prot().contains(crate::mm::aspace::Protection::WRITE);
        if cow {
            if !desc.is_cow_shared() {
                desc.set_cow_shared(true);
                state.cow_sharers += 1;
            }
            state.cow_sharers += 1;
        }
        let mut table = unit.table.lock();
        for (page, slot) in table.range_mut(desc.pages()) {
            if cow {
                slot.mark_cow();
            }
            let va = desc.vaddr_of(page);
            let mut meta = self.pfm.frame(slot.frame).lock();
            if rmap::contains(&meta, parent, va) {
                rmap::link(&self.heap, &mut meta, child, va, unit.id);
            }
        }
        Ok(cow)
    }

    /// Antes de uma escrita por um descriptor `cow_shared`: troca a unit do
    /// descriptor por um clone privado. Todos os slots (dos dois lados)
    /// ficam COW; a cópia de cada página acontece no fault da página.
    /// Descriptors que só dividem a unit via `add_region` não passam daqui.
    pub(crate) fn privatize_if_shared(&self, aspace: AsId, desc: &mut Descriptor) -> MmResult<()> {
        if !desc.is_cow_shared() {
            return Ok(());
        }
        let old = desc.unit().clone();
        if old.state.lock().cow_sharers <= 1 {
            // O outro lado do fork já soltou a unit.
            desc.set_cow_shared(false);
            old.state.lock().cow_sharers = 0;
            return Ok(());
        }

        // Heap é folha: pode esperar mesmo com o address space travado.
        let block = self.heap.alloc_block(MetaKind::Unit, AllocFlags::empty())?;
        let id = UnitId(self.next_unit.fetch_add(1, Ordering::Relaxed));
        let clone = Arc::new(VmUnit::new(id, old.kind, old.pages, block, self.config.lock_budget));

        {
            let mut old_state = old.state.lock();
            if old_state.cow_sharers <= 1 {
                // O outro lado soltou a unit enquanto preparávamos o clone.
                old_state.cow_sharers = 0;
                drop(old_state);
                desc.set_cow_shared(false);
                if let Some(block) = clone.state.lock().block.take() {
                    self.heap.free_block(block);
                }
                return Ok(());
            }

            let window = desc.pages();
            let mut old_table = old.table.lock();
            let mut new_table = clone.table.lock();
            for (page, slot) in old_table.iter_mut() {
                slot.mark_cow();
                let mut meta = self.pfm.frame(slot.frame).lock();
                if meta.state == FrameState::Free {
                    fatal("unit slot points to a free frame");
                }
                meta.add_holder(id, page);
                if window.contains(&page) {
                    rmap::retag(&mut meta, aspace, desc.vaddr_of(page), id);
                }
                new_table.insert(page, *slot);
            }
            clone.state.lock().refcount = 1;
            old_state.refcount -= 1;
            old_state.cow_sharers -= 1;
        }

        self.units.lock().insert(id, clone.clone());
        self.counters.unit_clones.fetch_add(1, Ordering::Relaxed);
        crate::kdebug!("(Unit) Unit privatizada, clone id=", id.0);
        desc.set_cow_shared(false);
        desc.set_unit(clone);
        Ok(())
    }
}
