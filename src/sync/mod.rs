//! # Synchronization Primitives
//!
//! Primitivas de sincronização para ambiente SMP.
//!
//! ## Regras
//!
//! - Todo lock do MM é um `BoundedSpinlock`: nunca dorme e nunca espera
//!   para sempre. Esgotado o orçamento de spins, aplica a `LockPolicy`.
//! - **Ordem de Lock**: AddressSpace → VmUnit → SlotTable → índice do
//!   objeto no cache → Frame → listas (free/LRU). O registro de units é
//!   folha. Quem precisa subir na ordem usa `try_lock` e desiste.

/// Spinlock com orçamento de spins
pub mod spinlock;

pub use spinlock::{BoundedSpinlock, LockBudget, LockPolicy, SpinlockGuard};
