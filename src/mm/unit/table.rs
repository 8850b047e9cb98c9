//! # Slot Table
//!
//! Índice de página da unit → frame residente. Páginas ausentes não têm
//! entrada (estado "não presente" implícito).

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::ops::Range;

use crate::mm::aspace::Protection;
use crate::mm::pfm::FrameNumber;

/// Estado de uma página residente na unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub frame: FrameNumber,
    /// Permissões efetivas do mapeamento (sem WRITE enquanto COW)
    pub prot: Protection,
    /// Escrita exige cópia privada antes
    pub cow: bool,
}

impl Slot {
    pub const fn new(frame: FrameNumber, prot: Protection) -> Self {
        Self {
            frame,
            prot,
            cow: false,
        }
    }

    /// Transforma em COW: some a escrita até a cópia.
    pub fn mark_cow(&mut self) {
        self.cow = true;
        self.prot.remove(Protection::WRITE);
    }
}

#[derive(Debug, Default)]
pub struct SlotTable {
    slots: BTreeMap<u64, Slot>,
}

impl SlotTable {
    pub const fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    pub fn get(&self, page: u64) -> Option<Slot> {
        self.slots.get(&page).copied()
    }

    pub fn get_mut(&mut self, page: u64) -> Option<&mut Slot> {
        self.slots.get_mut(&page)
    }

    pub fn insert(&mut self, page: u64, slot: Slot) -> Option<Slot> {
        self.slots.insert(page, slot)
    }

    pub fn remove(&mut self, page: u64) -> Option<Slot> {
        self.slots.remove(&page)
    }

    pub fn range(&self, pages: Range<u64>) -> impl Iterator<Item = (u64, Slot)> + '_ {
        self.slots.range(pages).map(|(p, s)| (*p, *s))
    }

    pub fn range_mut(&mut self, pages: Range<u64>) -> impl Iterator<Item = (u64, &mut Slot)> + '_ {
        self.slots.range_mut(pages).map(|(p, s)| (*p, s))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, Slot)> + '_ {
        self.slots.iter().map(|(p, s)| (*p, *s))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u64, &mut Slot)> + '_ {
        self.slots.iter_mut().map(|(p, s)| (*p, s))
    }

    /// Esvazia a tabela devolvendo todos os slots.
    pub fn drain(&mut self) -> Vec<(u64, Slot)> {
        core::mem::take(&mut self.slots).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
