//! # Árvore de Regiões
//!
//! Descriptors ordenados pelo início. Como não há sobreposição, o único
//! candidato a conter `va` é o descriptor com o maior início `<= va`.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::vma::Descriptor;
use crate::mm::addr::VirtAddr;

#[derive(Default)]
pub struct RegionTree {
    regions: BTreeMap<VirtAddr, Descriptor>,
}

impl RegionTree {
    pub const fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
        }
    }

    pub fn lookup(&self, va: VirtAddr) -> Option<&Descriptor> {
        self.regions
            .range(..=va)
            .next_back()
            .map(|(_, d)| d)
            .filter(|d| d.contains(va))
    }

    pub fn lookup_mut(&mut self, va: VirtAddr) -> Option<&mut Descriptor> {
        self.regions
            .range_mut(..=va)
            .next_back()
            .map(|(_, d)| d)
            .filter(|d| d.contains(va))
    }

    /// Alguma região intersecta `[start, end)`?
    pub fn overlaps(&self, start: VirtAddr, end: VirtAddr) -> bool {
        self.regions
            .range(..end)
            .next_back()
            .is_some_and(|(_, d)| d.end() > start)
    }

    /// Insere; devolve o descriptor de volta se houver sobreposição.
    pub fn insert(&mut self, desc: Descriptor) -> Result<(), Descriptor> {
        if desc.is_empty() || self.overlaps(desc.start(), desc.end()) {
            return Err(desc);
        }
        self.regions.insert(desc.start(), desc);
        Ok(())
    }

    /// Remove o descriptor que começa exatamente em `start`.
    pub fn remove(&mut self, start: VirtAddr) -> Option<Descriptor> {
        self.regions.remove(&start)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.regions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Descriptor> {
        self.regions.values_mut()
    }

    /// Esvazia a árvore.
    pub fn drain(&mut self) -> Vec<Descriptor> {
        core::mem::take(&mut self.regions).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
