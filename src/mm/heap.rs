//! Kernel Heap de Metadados.
//!
//! Descriptors, VmUnits e VaMappings reservam um bloco de tamanho fixo por
//! tipo neste heap. O heap é um `linked_list_allocator::Heap` atrás de um
//! `spin::Mutex`; as flags dizem o que fazer quando o heap está disputado ou
//! esgotado.

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use bitflags::bitflags;
use linked_list_allocator::Heap;

use crate::mm::config::{
    META_BLOCK_ALIGN, META_BLOCK_DESCRIPTOR, META_BLOCK_MAPPING, META_BLOCK_UNIT,
};
use crate::mm::error::{fatal, MmError, MmResult};

bitflags! {
    /// Restrições de uma alocação de metadados.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u8 {
        /// Esgotamento é violação fatal (o chamador não tem como desfazer)
        const NO_FAIL = 1 << 0;
        /// Uma única tentativa no lock do heap (chamador segura outros locks)
        const NO_BLOCK = 1 << 1;
    }
}

/// Tipo de metadado (define o tamanho do bloco)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaKind {
    Descriptor,
    Unit,
    Mapping,
}

impl MetaKind {
    pub const fn block_size(self) -> usize {
        match self {
            Self::Descriptor => META_BLOCK_DESCRIPTOR,
            Self::Unit => META_BLOCK_UNIT,
            Self::Mapping => META_BLOCK_MAPPING,
        }
    }

    fn layout(self) -> Layout {
        match Layout::from_size_align(self.block_size(), META_BLOCK_ALIGN) {
            Ok(layout) => layout,
            Err(_) => fatal("invalid metadata block layout"),
        }
    }
}

/// Bloco de metadados vivo. Devolvido com `KernelHeap::free_block`.
#[derive(Debug)]
pub struct MetaBlock {
    ptr: NonNull<u8>,
    kind: MetaKind,
}

// SAFETY: o bloco é memória do heap sem aliasing; só o dono o devolve.
unsafe impl Send for MetaBlock {}
unsafe impl Sync for MetaBlock {}

impl MetaBlock {
    pub fn kind(&self) -> MetaKind {
        self.kind
    }
}

/// Heap de metadados do MM.
pub struct KernelHeap {
    heap: spin::Mutex<Heap>,
    blocks_in_use: AtomicUsize,
}

impl KernelHeap {
    pub const fn empty() -> Self {
        Self {
            heap: spin::Mutex::new(Heap::empty()),
            blocks_in_use: AtomicUsize::new(0),
        }
    }

    /// # Safety
    ///
    /// `[start, start + size)` é memória válida, exclusiva e viva enquanto
    /// o heap existir. Só pode ser chamado uma vez.
    pub unsafe fn init(&self, start: *mut u8, size: usize) {
        self.heap.lock().init(start, size);
        crate::kinfo!("(Heap) Heap de metadados inicializado, bytes=", size);
    }

    /// Heap sobre uma região estática.
    pub fn from_region(region: &'static mut [u8]) -> Self {
        let skip = region.as_ptr().align_offset(META_BLOCK_ALIGN).min(region.len());
        let (_, region) = region.split_at_mut(skip);
        let heap = Self::empty();
        // SAFETY: a região é 'static e exclusiva (&mut).
        unsafe { heap.init(region.as_mut_ptr(), region.len()) };
        heap
    }

    /// Reserva um bloco do tipo pedido.
    pub fn alloc_block(&self, kind: MetaKind, flags: AllocFlags) -> MmResult<MetaBlock> {
        let mut heap = if flags.contains(AllocFlags::NO_BLOCK) {
            match self.heap.try_lock() {
                Some(heap) => heap,
                None if flags.contains(AllocFlags::NO_FAIL) => self.heap.lock(),
                None => {
                    crate::ktrace!("(Heap) Heap disputado com NO_BLOCK");
                    return Err(MmError::OutOfMemory);
                }
            }
        } else {
            self.heap.lock()
        };

        match heap.allocate_first_fit(kind.layout()) {
            Ok(ptr) => {
                self.blocks_in_use.fetch_add(1, Ordering::Relaxed);
                Ok(MetaBlock { ptr, kind })
            }
            Err(()) => {
                drop(heap);
                if flags.contains(AllocFlags::NO_FAIL) {
                    fatal("metadata heap exhausted with NO_FAIL");
                }
                crate::kwarn!("(Heap) Heap de metadados esgotado, bloco=", kind.block_size());
                Err(MmError::OutOfMemory)
            }
        }
    }

    /// Devolve um bloco.
    pub fn free_block(&self, block: MetaBlock) {
        let layout = block.kind.layout();
        // SAFETY: o bloco veio de `alloc_block` com o mesmo layout e é
        // consumido aqui.
        unsafe { self.heap.lock().deallocate(block.ptr, layout) };
        self.blocks_in_use.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn blocks_in_use(&self) -> usize {
        self.blocks_in_use.load(Ordering::Relaxed)
    }

    pub fn free_bytes(&self) -> usize {
        self.heap.lock().free()
    }
}
