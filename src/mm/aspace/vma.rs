//! # Region Descriptor (VMA)
//!
//! Faixa virtual contínua de um address space, com proteção e a janela da
//! VM unit que a sustenta:
//!
//! ```text
//! va ∈ [start, end)  ↦  página da unit = (va - start + unit_offset) / PAGE_SIZE
//! ```

use alloc::sync::Arc;
use core::ops::Range;

use bitflags::bitflags;

use crate::mm::addr::VirtAddr;
use crate::mm::config::PAGE_SIZE;
use crate::mm::fault::AccessType;
use crate::mm::heap::MetaBlock;
use crate::mm::unit::{UnitId, VmUnit};

bitflags! {
    /// Proteção de página
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Protection: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;

        const RW = Self::READ.bits() | Self::WRITE.bits();
        const RX = Self::READ.bits() | Self::EXEC.bits();
    }
}

impl Protection {
    pub fn permits(&self, access: AccessType) -> bool {
        match access {
            AccessType::Read => self.contains(Self::READ),
            AccessType::Write => self.contains(Self::WRITE),
            AccessType::Execute => self.contains(Self::EXEC),
        }
    }
}

/// Descriptor vivo dentro da árvore de regiões.
pub struct Descriptor {
    start: VirtAddr,
    end: VirtAddr,
    prot: Protection,
    unit: Arc<VmUnit>,
    unit_offset: u64,
    /// Compartilha a unit com outro lado de um fork (semântica de snapshot)
    cow_shared: bool,
    block: Option<MetaBlock>,
}

impl Descriptor {
    pub(crate) fn new(
        start: VirtAddr,
        end: VirtAddr,
        prot: Protection,
        unit: Arc<VmUnit>,
        unit_offset: u64,
        block: MetaBlock,
    ) -> Self {
        Self {
            start,
            end,
            prot,
            unit,
            unit_offset,
            cow_shared: false,
            block: Some(block),
        }
    }

    pub fn start(&self) -> VirtAddr {
        self.start
    }

    pub fn end(&self) -> VirtAddr {
        self.end
    }

    pub fn prot(&self) -> Protection {
        self.prot
    }

    pub fn unit(&self) -> &Arc<VmUnit> {
        &self.unit
    }

    pub(crate) fn set_unit(&mut self, unit: Arc<VmUnit>) {
        self.unit = unit;
    }

    pub fn is_cow_shared(&self) -> bool {
        self.cow_shared
    }

    pub(crate) fn set_cow_shared(&mut self, cow_shared: bool) {
        self.cow_shared = cow_shared;
    }

    pub fn unit_offset(&self) -> u64 {
        self.unit_offset
    }

    pub fn len(&self) -> u64 {
        self.end.offset_from(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn contains(&self, va: VirtAddr) -> bool {
        self.start <= va && va < self.end
    }

    /// Páginas da unit cobertas por este descriptor
    pub fn pages(&self) -> Range<u64> {
        let first = self.unit_offset / PAGE_SIZE as u64;
        first..first + self.len() / PAGE_SIZE as u64
    }

    /// Página da unit que contém `va`
    #[inline]
    pub fn page_of(&self, va: VirtAddr) -> u64 {
        (va.offset_from(self.start) + self.unit_offset) / PAGE_SIZE as u64
    }

    /// Endereço virtual (início) da página `page` da unit
    #[inline]
    pub fn vaddr_of(&self, page: u64) -> VirtAddr {
        VirtAddr::new(self.start.as_u64() + page * PAGE_SIZE as u64 - self.unit_offset)
    }

    pub(crate) fn take_block(&mut self) -> Option<MetaBlock> {
        self.block.take()
    }

    pub fn info(&self) -> RegionInfo {
        RegionInfo {
            start: self.start,
            end: self.end,
            prot: self.prot,
            unit: self.unit.id(),
            unit_offset: self.unit_offset,
        }
    }
}

/// Cópia pública dos campos de um descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    pub start: VirtAddr,
    pub end: VirtAddr,
    pub prot: Protection,
    pub unit: UnitId,
    pub unit_offset: u64,
}

impl RegionInfo {
    pub fn contains(&self, va: VirtAddr) -> bool {
        self.start <= va && va < self.end
    }
}
