//! # Higher Half Direct Map (HHDM)
//!
//! Toda RAM gerenciada pelo registry está mapeada em uma janela linear do
//! kernel: `virt = phys + offset`. É o único caminho pelo qual o MM toca o
//! conteúdo de um frame (zerar, copiar no COW, entregar ao pager).
//!
//! ## Layout de Memória
//!
//! ```text
//! offset + base ─┬─────────────────────────
//!                │ Direct Map (RAM)
//!                │ phys_to_virt(p) = offset + p
//! offset + end  ─┴─────────────────────────
//! ```
//!
//! No boot o offset vem do bootloader. Em testes no host a "RAM" é um
//! buffer vazado e o offset é calculado a partir dele.

use core::ptr;

use crate::mm::addr::PhysAddr;
use crate::mm::config::PAGE_SIZE;

/// Janela linear física → virtual.
#[derive(Debug, Clone, Copy)]
pub struct DirectMap {
    offset: usize,
}

impl DirectMap {
    /// # Safety
    ///
    /// Todo frame entregue ao `MemoryManager` deve estar mapeado, legível e
    /// gravável em `phys + offset` enquanto o MM existir, sem outros donos.
    pub const unsafe fn new(offset: u64) -> Self {
        Self {
            offset: offset as usize,
        }
    }

    /// Janela sobre um buffer que faz o papel da RAM em `phys_base`.
    ///
    /// # Safety
    ///
    /// O mapa de memória entregue ao registry deve descrever apenas faixas
    /// dentro de `[phys_base, phys_base + ram.len())`.
    pub unsafe fn for_buffer(ram: &'static mut [u8], phys_base: u64) -> Self {
        Self {
            offset: (ram.as_mut_ptr() as usize).wrapping_sub(phys_base as usize),
        }
    }

    #[inline]
    pub fn phys_to_virt(&self, phys: PhysAddr) -> *mut u8 {
        phys.as_usize().wrapping_add(self.offset) as *mut u8
    }

    /// Zera a página inteira.
    ///
    /// # Safety
    ///
    /// O chamador é dono exclusivo do conteúdo do frame.
    pub(crate) unsafe fn zero_page(&self, phys: PhysAddr) {
        ptr::write_bytes(self.phys_to_virt(phys), 0, PAGE_SIZE);
    }

    /// # Safety
    ///
    /// `dst` exclusivo do chamador; `src` sem escritores concorrentes.
    pub(crate) unsafe fn copy_page(&self, dst: PhysAddr, src: PhysAddr) {
        ptr::copy_nonoverlapping(self.phys_to_virt(src), self.phys_to_virt(dst), PAGE_SIZE);
    }

    /// Copia `out.len()` bytes a partir de `phys + offset`.
    ///
    /// # Safety
    ///
    /// O frame está mapeado para o chamador e `offset + out.len() <= PAGE_SIZE`.
    pub(crate) unsafe fn read_bytes(&self, phys: PhysAddr, offset: usize, out: &mut [u8]) {
        ptr::copy_nonoverlapping(self.phys_to_virt(phys).add(offset), out.as_mut_ptr(), out.len());
    }

    /// # Safety
    ///
    /// Igual a `read_bytes`, e o frame é gravável pelo chamador.
    pub(crate) unsafe fn write_bytes(&self, phys: PhysAddr, offset: usize, data: &[u8]) {
        ptr::copy_nonoverlapping(data.as_ptr(), self.phys_to_virt(phys).add(offset), data.len());
    }

    /// Fatia mutável sobre a página inteira.
    ///
    /// # Safety
    ///
    /// Frame em `BusyIo` pertencente ao chamador: ninguém mais o lê ou grava.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn page_mut(&self, phys: PhysAddr) -> &mut [u8] {
        core::slice::from_raw_parts_mut(self.phys_to_virt(phys), PAGE_SIZE)
    }

    /// # Safety
    ///
    /// Ninguém grava o frame enquanto a fatia existir.
    pub(crate) unsafe fn page(&self, phys: PhysAddr) -> &[u8] {
        core::slice::from_raw_parts(self.phys_to_virt(phys), PAGE_SIZE)
    }
}
