//! # Address Space
//!
//! Contexto de memória virtual de uma tarefa: faixa de endereços e árvore
//! de descriptors, tudo atrás de um único lock (o primeiro da ordem).
//!
//! ## Operações
//!
//! | Operação        | Efeito                                                    |
//! |-----------------|-----------------------------------------------------------|
//! | `add_region`    | Novo descriptor; unit ganha +1 referência                 |
//! | `remove_region` | Desfaz mapeamentos, unit perde 1 (destruída em zero)      |
//! | `lookup`        | Descriptor que contém o endereço, O(log n)                |
//! | `fork`          | Filho compartilha todas as units; anônimas graváveis → COW|
//! | `release`       | Última referência remove todas as regiões                 |

pub mod rbtree;
pub mod vma;

pub use rbtree::RegionTree;
pub use vma::{Descriptor, Protection, RegionInfo};

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use crate::fs::ObjectId;
use crate::mm::addr::VirtAddr;
use crate::mm::config::{is_aligned, PAGE_SIZE};
use crate::mm::error::{MmError, MmResult};
use crate::mm::fault::AccessType;
use crate::mm::heap::{AllocFlags, MetaBlock, MetaKind};
use crate::mm::unit::VmUnit;
use crate::mm::MemoryManager;
use crate::sync::{BoundedSpinlock, SpinlockGuard};

/// Identificador de address space (chave dos registros de rmap)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AsId(u64);

impl AsId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Estado protegido pelo lock do address space.
pub(crate) struct AspaceInner {
    pub(crate) regions: RegionTree,
    refcount: u32,
    pub(crate) destroyed: bool,
}

pub struct AddressSpace {
    id: AsId,
    start: VirtAddr,
    end: VirtAddr,
    inner: BoundedSpinlock<AspaceInner>,
}

impl AddressSpace {
    /// Address space vazio cobrindo `[start, end)`.
    pub fn new(mm: &MemoryManager, start: VirtAddr, end: VirtAddr) -> MmResult<Arc<Self>> {
        if !start.is_page_aligned() || !end.is_page_aligned() {
            return Err(MmError::NotAligned);
        }
        if start >= end {
            return Err(MmError::InvalidSize);
        }
        let id = AsId(mm.next_aspace.fetch_add(1, Ordering::Relaxed));
        crate::kdebug!("(AS) Address space criado id=", id.0);
        Ok(Arc::new(Self {
            id,
            start,
            end,
            inner: BoundedSpinlock::new(
                "aspace",
                AspaceInner {
                    regions: RegionTree::new(),
                    refcount: 1,
                    destroyed: false,
                },
                mm.config.lock_budget,
            ),
        }))
    }

    pub fn id(&self) -> AsId {
        self.id
    }

    pub fn start(&self) -> VirtAddr {
        self.start
    }

    pub fn end(&self) -> VirtAddr {
        self.end
    }

    pub(crate) fn lock_inner(&self) -> SpinlockGuard<'_, AspaceInner> {
        self.inner.lock()
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn region_count(&self) -> usize {
        self.inner.lock().regions.len()
    }

    /// Cópia de todos os descriptors, em ordem de endereço.
    pub fn regions(&self) -> Vec<RegionInfo> {
        self.inner.lock().regions.iter().map(Descriptor::info).collect()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }

    // =========================================================================
    // REGIÕES
    // =========================================================================

    /// Mapeia `[start, end)` sobre a janela da unit que começa em `unit_offset`.
    pub fn add_region(
        &self,
        mm: &MemoryManager,
        start: VirtAddr,
        end: VirtAddr,
        prot: Protection,
        unit: &Arc<VmUnit>,
        unit_offset: u64,
    ) -> MmResult<RegionInfo> {
        if !start.is_page_aligned() || !end.is_page_aligned() || !is_aligned(unit_offset, PAGE_SIZE as u64) {
            return Err(MmError::NotAligned);
        }
        if start >= end {
            return Err(MmError::InvalidSize);
        }
        let len = end.offset_from(start);
        match unit_offset.checked_add(len) {
            Some(window_end) if window_end <= unit.size_bytes() => {}
            _ => return Err(MmError::InvalidSize),
        }
        if start < self.start || end > self.end {
            return Err(MmError::InvalidAddress);
        }

        // Bloco de metadados antes de qualquer lock.
        let block = mm.heap.alloc_block(MetaKind::Descriptor, AllocFlags::empty())?;

        let mut inner = self.inner.lock();
        if inner.destroyed || inner.regions.overlaps(start, end) {
            drop(inner);
            mm.heap.free_block(block);
            crate::kdebug!("(AS) Região sobreposta ou AS destruído em:", start.as_u64());
            return Err(MmError::InvalidAddress);
        }
        if let Err(err) = mm.unit_retain(unit) {
            drop(inner);
            mm.heap.free_block(block);
            return Err(err);
        }

        let desc = Descriptor::new(start, end, prot, unit.clone(), unit_offset, block);
        let info = desc.info();
        if inner.regions.insert(desc).is_err() {
            crate::mm::error::fatal("region tree rejected a checked descriptor");
        }
        crate::ktrace!("(AS) Região adicionada em:", start.as_u64());
        Ok(info)
    }

    /// Remove o descriptor que começa em `start`.
    pub fn remove_region(&self, mm: &MemoryManager, start: VirtAddr) -> MmResult<()> {
        let mut inner = self.inner.lock();
        let Some(mut desc) = inner.regions.remove(start) else {
            return Err(MmError::InvalidAddress);
        };
        mm.unmap_descriptor(self.id, &desc);
        drop(inner);

        if let Some(block) = desc.take_block() {
            mm.heap.free_block(block);
        }
        crate::ktrace!("(AS) Região removida em:", start.as_u64());
        Ok(())
    }

    /// Descriptor que cobre `addr`.
    pub fn lookup(&self, addr: VirtAddr) -> MmResult<RegionInfo> {
        self.inner
            .lock()
            .regions
            .lookup(addr)
            .map(Descriptor::info)
            .ok_or(MmError::InvalidAddress)
    }

    /// Cria uma unit anônima de `len` bytes e a mapeia em `start`.
    pub fn map_anonymous(
        &self,
        mm: &MemoryManager,
        start: VirtAddr,
        len: u64,
        prot: Protection,
    ) -> MmResult<RegionInfo> {
        let end = start.checked_add(len).ok_or(MmError::InvalidAddress)?;
        let unit = mm.create_anonymous_unit(len)?;
        self.add_region(mm, start, end, prot, &unit, 0)
            .inspect_err(|_| mm.discard_unit(&unit))
    }

    /// Mapeia `[offset, offset + len)` de `object` em `start`.
    pub fn map_object(
        &self,
        mm: &MemoryManager,
        start: VirtAddr,
        len: u64,
        prot: Protection,
        object: ObjectId,
        offset: u64,
    ) -> MmResult<RegionInfo> {
        let size = offset.checked_add(len).ok_or(MmError::InvalidSize)?;
        let end = start.checked_add(len).ok_or(MmError::InvalidAddress)?;
        let unit = mm.create_object_unit(object, size)?;
        self.add_region(mm, start, end, prot, &unit, offset)
            .inspect_err(|_| mm.discard_unit(&unit))
    }

    // =========================================================================
    // FORK
    // =========================================================================

    /// Duplica o address space. Nada é copiado agora: o filho compartilha as
    /// units do pai e as páginas anônimas graváveis viram COW dos dois lados.
    pub fn fork(&self, mm: &MemoryManager) -> MmResult<Arc<AddressSpace>> {
        let child = AddressSpace::new(mm, self.start, self.end)?;

        let result = loop {
            // Blocos dos descriptors do filho antes do lock do pai.
            let wanted = self.region_count();
            let blocks = match self.alloc_descriptor_blocks(mm, wanted) {
                Ok(blocks) => blocks,
                Err(err) => break Err(err),
            };

            let mut inner = self.inner.lock();
            if inner.destroyed {
                drop(inner);
                blocks.into_iter().for_each(|b| mm.heap.free_block(b));
                break Err(MmError::InvalidAddress);
            }
            if inner.regions.len() != blocks.len() {
                // Regiões mudaram entre a contagem e o lock.
                drop(inner);
                blocks.into_iter().for_each(|b| mm.heap.free_block(b));
                continue;
            }
            break self.fork_regions(mm, &mut inner, &child, blocks);
        };

        match result {
            Ok(()) => {
                crate::kdebug!("(AS) Fork concluído, filho id=", child.id.0);
                Ok(child)
            }
            Err(err) => {
                crate::kwarn!("(AS) Fork falhou, desfazendo filho id=", child.id.0);
                child.release(mm);
                Err(err)
            }
        }
    }

    fn alloc_descriptor_blocks(&self, mm: &MemoryManager, count: usize) -> MmResult<Vec<MetaBlock>> {
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            match mm.heap.alloc_block(MetaKind::Descriptor, AllocFlags::empty()) {
                Ok(block) => blocks.push(block),
                Err(err) => {
                    blocks.into_iter().for_each(|b| mm.heap.free_block(b));
                    return Err(err);
                }
            }
        }
        Ok(blocks)
    }

    fn fork_regions(
        &self,
        mm: &MemoryManager,
        parent: &mut AspaceInner,
        child: &AddressSpace,
        blocks: Vec<MetaBlock>,
    ) -> MmResult<()> {
        let mut child_inner = child.inner.lock();
        let mut blocks = blocks.into_iter();
        for desc in parent.regions.iter_mut() {
            let Some(block) = blocks.next() else {
                crate::mm::error::fatal("fork ran out of reserved descriptor blocks");
            };
            let cow = match mm.share_descriptor(self.id, child.id, desc) {
                Ok(cow) => cow,
                Err(err) => {
                    mm.heap.free_block(block);
                    blocks.for_each(|b| mm.heap.free_block(b));
                    return Err(err);
                }
            };
            let mut copy = Descriptor::new(
                desc.start(),
                desc.end(),
                desc.prot(),
                desc.unit().clone(),
                desc.unit_offset(),
                block,
            );
            copy.set_cow_shared(cow);
            if child_inner.regions.insert(copy).is_err() {
                crate::mm::error::fatal("forked descriptor overlaps in child");
            }
        }
        Ok(())
    }

    // =========================================================================
    // REFERÊNCIAS
    // =========================================================================

    pub fn retain(&self) -> MmResult<()> {
        let mut inner = self.inner.lock();
        if inner.destroyed {
            return Err(MmError::InvalidAddress);
        }
        inner.refcount += 1;
        Ok(())
    }

    /// -1 referência. A última remove todas as regiões.
    pub fn release(&self, mm: &MemoryManager) {
        let mut inner = self.inner.lock();
        if inner.destroyed {
            return;
        }
        inner.refcount -= 1;
        if inner.refcount > 0 {
            return;
        }
        inner.destroyed = true;

        let mut blocks = Vec::new();
        for mut desc in inner.regions.drain() {
            mm.unmap_descriptor(self.id, &desc);
            blocks.extend(desc.take_block());
        }
        drop(inner);

        for block in blocks {
            mm.heap.free_block(block);
        }
        crate::kdebug!("(AS) Address space destruído id=", self.id.0);
    }

    // =========================================================================
    // ACESSO A DADOS
    // =========================================================================

    /// Copia `buf.len()` bytes a partir de `addr`, com faults de leitura.
    pub fn read(&self, mm: &MemoryManager, addr: VirtAddr, buf: &mut [u8]) -> MmResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let va = addr.checked_add(done as u64).ok_or(MmError::InvalidAddress)?;
            let offset = va.page_offset();
            let chunk = (PAGE_SIZE - offset).min(buf.len() - done);
            let out = &mut buf[done..done + chunk];
            self.with_page(mm, va, AccessType::Read, |frame| {
                // SAFETY: frame mapeado em `self` (share_count > 0), não pode
                // ser evictado nem liberado enquanto seguramos o lock do AS.
                unsafe { mm.hhdm.read_bytes(mm.pfm.phys(frame), offset, out) }
            })?;
            done += chunk;
        }
        Ok(())
    }

    /// Grava `data` a partir de `addr`, com faults de escrita (COW incluso).
    pub fn write(&self, mm: &MemoryManager, addr: VirtAddr, data: &[u8]) -> MmResult<()> {
        let mut done = 0;
        while done < data.len() {
            let va = addr.checked_add(done as u64).ok_or(MmError::InvalidAddress)?;
            let offset = va.page_offset();
            let chunk = (PAGE_SIZE - offset).min(data.len() - done);
            let input = &data[done..done + chunk];
            self.with_page(mm, va, AccessType::Write, |frame| {
                // SAFETY: idem `read`; o fault de escrita garantiu um frame
                // gravável por este address space.
                unsafe { mm.hhdm.write_bytes(mm.pfm.phys(frame), offset, input) }
            })?;
            done += chunk;
        }
        Ok(())
    }
}

// =============================================================================
// CRIAÇÃO
// =============================================================================

impl MemoryManager {
    /// Address space com a faixa de usuário padrão do `MmConfig`.
    pub fn create_address_space(&self) -> MmResult<Arc<AddressSpace>> {
        AddressSpace::new(
            self,
            VirtAddr::new(self.config.user_start),
            VirtAddr::new(self.config.user_end),
        )
    }
}
