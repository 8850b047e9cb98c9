//! # Scheduler (visão do MM)
//!
//! O MM precisa de três coisas do scheduler: saber qual address space está
//! ativo no CPU que faltou, dormir até um frame sair de `BusyIo`, e acordar
//! quem dorme nele.
//!
//! `block` pode retornar cedo (wakeup espúrio ou perdido): todo chamador
//! reavalia a condição em loop.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::mm::aspace::AddressSpace;
use crate::mm::pfm::FrameNumber;

/// Motivo de espera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitChannel {
    /// I/O em andamento no frame
    Frame(FrameNumber),
}

pub trait Scheduler: Send + Sync {
    /// Address space da tarefa corrente, se houver.
    fn current_address_space(&self) -> Option<Arc<AddressSpace>>;

    /// Suspende a tarefa corrente até `wake(channel)`.
    fn block(&self, channel: WaitChannel);

    /// Acorda todas as tarefas esperando em `channel`.
    fn wake(&self, channel: WaitChannel);
}

/// Scheduler mínimo para boot e single-CPU: `block` só cede o pipeline.
pub struct SpinScheduler {
    current: Mutex<Option<Arc<AddressSpace>>>,
    blocks: AtomicU64,
    wakeups: AtomicU64,
}

impl SpinScheduler {
    pub const fn new() -> Self {
        Self {
            current: Mutex::new(None),
            blocks: AtomicU64::new(0),
            wakeups: AtomicU64::new(0),
        }
    }

    /// Troca o address space ativo.
    pub fn switch_to(&self, space: Option<Arc<AddressSpace>>) {
        *self.current.lock() = space;
    }

    pub fn block_count(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    pub fn wakeup_count(&self) -> u64 {
        self.wakeups.load(Ordering::Relaxed)
    }
}

impl Default for SpinScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for SpinScheduler {
    fn current_address_space(&self) -> Option<Arc<AddressSpace>> {
        self.current.lock().clone()
    }

    fn block(&self, _channel: WaitChannel) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
        core::hint::spin_loop();
    }

    fn wake(&self, _channel: WaitChannel) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
    }
}
