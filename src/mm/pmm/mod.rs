//! # PMM - Physical Memory Manager
//!
//! Constrói o registry de frames a partir do mapa de memória do boot.
//! Depois do boot o registry é imutável: só o `FrameMeta` de cada frame muda.
//!
//! Regiões usáveis são alinhadas para dentro; regiões de qualquer outro tipo
//! são alinhadas para fora e recortadas das usáveis (reservado vence).

pub mod region;

pub use region::{MemoryRegion, MemoryRegionType};

use alloc::vec::Vec;

use crate::mm::addr::PhysAddr;
use crate::mm::config::{align_down, PAGE_MASK, PAGE_SIZE};
use crate::mm::pfm::{FrameInfo, FrameNumber};
use crate::sync::LockBudget;

/// Tabela de todos os frames gerenciáveis, ordenada por endereço físico.
pub struct FrameRegistry {
    frames: Vec<FrameInfo>,
}

impl FrameRegistry {
    pub fn from_memory_map(map: &[MemoryRegion], budget: LockBudget) -> Self {
        let page = PAGE_SIZE as u64;

        let mut ranges: Vec<(u64, u64)> = Vec::new();
        for region in map.iter().filter(|r| r.is_usable()) {
            let start = page_ceil(region.base.as_u64());
            let end = align_down(region.end(), page);
            if start < end {
                ranges.push((start, end));
            }
        }
        let ranges = merge(ranges);

        let mut usable = ranges;
        for region in map.iter().filter(|r| !r.is_usable()) {
            let start = align_down(region.base.as_u64(), page);
            let end = page_ceil(region.end());
            if start < end {
                usable = subtract(usable, start, end);
            }
        }

        let mut frames = Vec::new();
        for (start, end) in usable {
            let mut addr = start;
            while addr < end {
                frames.push(FrameInfo::new(PhysAddr::new(addr), budget));
                addr += page;
            }
        }

        crate::kinfo!("(PMM) Frames gerenciáveis=", frames.len());
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame pelo número. Número fora do registry é bug do chamador.
    #[inline]
    pub fn get(&self, frame: FrameNumber) -> Option<&FrameInfo> {
        self.frames.get(frame.index())
    }

    pub fn phys(&self, frame: FrameNumber) -> Option<PhysAddr> {
        self.get(frame).map(FrameInfo::phys)
    }

    /// Número do frame que contém `phys`
    pub fn frame_for(&self, phys: PhysAddr) -> Option<FrameNumber> {
        let base = phys.align_down(PAGE_SIZE as u64);
        self.frames
            .binary_search_by(|f| f.phys().cmp(&base))
            .ok()
            .map(|i| FrameNumber::new(i as u32))
    }

    pub fn numbers(&self) -> impl DoubleEndedIterator<Item = FrameNumber> + ExactSizeIterator {
        (0..self.frames.len() as u32).map(FrameNumber::new)
    }
}

/// Arredonda para cima até a página; no topo do espaço físico satura na
/// última página inteira.
fn page_ceil(value: u64) -> u64 {
    match value.checked_add(PAGE_SIZE as u64 - 1) {
        Some(v) => v & PAGE_MASK,
        None => u64::MAX & PAGE_MASK,
    }
}

/// Ordena e funde faixas sobrepostas ou adjacentes.
fn merge(mut ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    ranges.sort_unstable();
    let mut out: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match out.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => out.push((start, end)),
        }
    }
    out
}

/// Remove `[start, end)` de cada faixa.
fn subtract(ranges: Vec<(u64, u64)>, start: u64, end: u64) -> Vec<(u64, u64)> {
    let mut out = Vec::with_capacity(ranges.len() + 1);
    for (s, e) in ranges {
        if end <= s || start >= e {
            out.push((s, e));
            continue;
        }
        if s < start {
            out.push((s, start));
        }
        if end < e {
            out.push((end, e));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_ranges_are_carved_out() {
        let map = [
            MemoryRegion::usable(0x1000, 0x9000),
            MemoryRegion::reserved(0x3800, 0x800),
            MemoryRegion::usable(0x8000, 0x4000),
            MemoryRegion::new(PhysAddr::new(0xb000), 0x1000, MemoryRegionType::Kernel),
        ];
        let registry = FrameRegistry::from_memory_map(&map, LockBudget::DEFAULT);

        let addrs: Vec<u64> = registry
            .numbers()
            .filter_map(|f| registry.phys(f))
            .map(PhysAddr::as_u64)
            .collect();
        assert_eq!(
            addrs,
            [0x1000, 0x2000, 0x4000, 0x5000, 0x6000, 0x7000, 0x8000, 0x9000, 0xa000]
        );
        assert_eq!(registry.frame_for(PhysAddr::new(0x4123)), Some(FrameNumber::new(2)));
        assert_eq!(registry.frame_for(PhysAddr::new(0x3000)), None);
    }

    #[test]
    fn reserved_region_at_top_of_physical_space() {
        let map = [
            MemoryRegion::usable(0x1000, 0x4000),
            MemoryRegion::reserved(0xFFFF_FFFF_FFFF_F000, 0x1000),
            MemoryRegion::usable(0xFFFF_FFFF_FFFF_E000, 0x2000),
        ];
        let registry = FrameRegistry::from_memory_map(&map, LockBudget::DEFAULT);
        assert_eq!(registry.len(), 5);
        assert_eq!(
            registry.phys(FrameNumber::new(4)),
            Some(PhysAddr::new(0xFFFF_FFFF_FFFF_E000))
        );
    }

    #[test]
    fn frame_numbers_walk_both_ways() {
        let map = [MemoryRegion::usable(0x1000, 0x3000)];
        let registry = FrameRegistry::from_memory_map(&map, LockBudget::DEFAULT);
        assert_eq!(registry.numbers().len(), 3);
        assert_eq!(registry.numbers().rev().next(), Some(FrameNumber::new(2)));
    }

    #[test]
    fn unaligned_usable_region_is_shrunk() {
        let map = [MemoryRegion::usable(0x1800, 0x2000)];
        let registry = FrameRegistry::from_memory_map(&map, LockBudget::DEFAULT);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.phys(FrameNumber::new(0)), Some(PhysAddr::new(0x2000)));
    }
}
