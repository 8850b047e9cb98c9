use crate::mm::addr::PhysAddr;

/// Tipos de região de memória (baseado no UEFI/Multiboot)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionType {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
    Kernel,
    Bootloader,
}

/// Uma região contígua de memória física
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: PhysAddr,
    pub len: u64,
    pub kind: MemoryRegionType,
}

impl MemoryRegion {
    pub const fn new(base: PhysAddr, len: u64, kind: MemoryRegionType) -> Self {
        Self { base, len, kind }
    }

    pub const fn usable(base: u64, len: u64) -> Self {
        Self::new(PhysAddr::new(base), len, MemoryRegionType::Usable)
    }

    pub const fn reserved(base: u64, len: u64) -> Self {
        Self::new(PhysAddr::new(base), len, MemoryRegionType::Reserved)
    }

    /// Fim exclusivo (satura no topo do espaço físico)
    pub const fn end(&self) -> u64 {
        self.base.as_u64().saturating_add(self.len)
    }

    pub const fn is_usable(&self) -> bool {
        matches!(self.kind, MemoryRegionType::Usable)
    }
}
