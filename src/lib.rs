//! Forge VM - núcleo de memória virtual do kernel Forge.
//!
//! Frames físicos, address spaces, paginação sob demanda com
//! copy-on-write e page cache com eviction LRU. O kernel hospedeiro fornece
//! o memory map, a janela HHDM, o heap de metadados, o pager e o scheduler;
//! tudo o mais vive dentro de um `mm::MemoryManager`.

#![cfg_attr(not(test), no_std)]

// Habilitar alocação dinâmica (necessário para Vec/BTreeMap/Arc)
extern crate alloc;

pub mod klib; // Logging e framework de testes
pub mod sync; // Spinlock com orçamento

pub mod fs; // Interface com o storage (Pager)
pub mod mm; // Gerenciamento de Memória
pub mod sched; // Interface com o scheduler

pub use mm::{MemoryManager, MmConfig, MmError, MmResult};
