//! Spinlock com orçamento - bloqueio com busy-wait limitado
//!
//! O núcleo é um `spin::Mutex`. Em vez de girar indefinidamente, `lock()`
//! conta tentativas: esgotado o orçamento, a contenção é tratada como bug
//! (deadlock ou lock segurado por tempo demais) segundo a `LockPolicy`.

use core::ops::{Deref, DerefMut};

use crate::mm::config::DEFAULT_LOCK_SPINS;

/// O que fazer quando o orçamento de spins acaba.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPolicy {
    /// Violação fatal sempre.
    Fatal,
    /// Fatal em builds de debug; em release apenas avisa e continua girando.
    DebugAssert,
}

/// Orçamento de tentativas de um lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockBudget {
    pub spins: u32,
    pub policy: LockPolicy,
}

impl LockBudget {
    pub const DEFAULT: Self = Self::new(DEFAULT_LOCK_SPINS, LockPolicy::Fatal);

    pub const fn new(spins: u32, policy: LockPolicy) -> Self {
        Self { spins, policy }
    }
}

impl Default for LockBudget {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Spinlock - usa busy-wait limitado, NÃO pode dormir
///
/// # Quando usar
///
/// - Seções críticas curtas (todas as do MM)
/// - Quando não pode chamar o scheduler
///
/// # Quando NÃO usar
///
/// - Para proteger I/O lento: pagers são chamados sem locks
pub struct BoundedSpinlock<T> {
    name: &'static str,
    budget: LockBudget,
    inner: spin::Mutex<T>,
}

impl<T> BoundedSpinlock<T> {
    /// Cria novo spinlock
    pub const fn new(name: &'static str, data: T, budget: LockBudget) -> Self {
        Self {
            name,
            budget,
            inner: spin::Mutex::new(data),
        }
    }

    /// Adquire o lock, aplicando a política se o orçamento acabar.
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        let mut spins: u32 = 0;
        loop {
            if let Some(guard) = self.inner.try_lock() {
                return SpinlockGuard { guard };
            }
            spins = spins.saturating_add(1);
            if spins >= self.budget.spins {
                self.budget_exhausted();
                spins = 0;
            }
            core::hint::spin_loop();
        }
    }

    /// Tenta adquirir uma única vez
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        self.inner.try_lock().map(|guard| SpinlockGuard { guard })
    }

    /// Acesso exclusivo sem lock (quem tem `&mut` já é dono)
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    #[cold]
    fn budget_exhausted(&self) {
        match self.budget.policy {
            LockPolicy::Fatal => {
                crate::kerror!("(SYNC) Orçamento de spins esgotado no lock:");
                crate::kerror!(self.name);
                crate::mm::error::fatal("lock spin budget exhausted");
            }
            LockPolicy::DebugAssert => {
                if cfg!(debug_assertions) {
                    crate::kerror!("(SYNC) Orçamento de spins esgotado no lock:");
                    crate::kerror!(self.name);
                    crate::mm::error::fatal("lock spin budget exhausted");
                }
                crate::kwarn!("(SYNC) Contenção persistente, spins=", self.budget.spins);
            }
        }
    }
}

/// Guard que libera o lock ao sair de escopo
pub struct SpinlockGuard<'a, T> {
    guard: spin::MutexGuard<'a, T>,
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_fails_while_held() {
        let lock = BoundedSpinlock::new("test", 5u32, LockBudget::DEFAULT);
        let mut guard = lock.lock();
        *guard += 1;
        assert!(lock.try_lock().is_none());
        assert!(lock.is_locked());
        drop(guard);
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    #[should_panic(expected = "lock spin budget exhausted")]
    fn exhausted_budget_is_fatal() {
        let lock = BoundedSpinlock::new("held", (), LockBudget::new(16, LockPolicy::Fatal));
        let _held = lock.lock();
        let _again = lock.lock();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "lock spin budget exhausted")]
    fn debug_assert_policy_is_fatal_in_debug() {
        let lock = BoundedSpinlock::new("held", (), LockBudget::new(16, LockPolicy::DebugAssert));
        let _held = lock.lock();
        let _again = lock.lock();
    }

    #[test]
    fn contended_lock_is_acquired_within_budget() {
        use alloc::sync::Arc;

        let lock = Arc::new(BoundedSpinlock::new("shared", 0u64, LockBudget::new(u32::MAX, LockPolicy::Fatal)));
        let workers: alloc::vec::Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked");
        }
        assert_eq!(*lock.lock(), 4000);
    }
}
