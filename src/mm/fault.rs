//! # Page Fault Handler
//!
//! ```text
//! loop {
//!     trava address space → lookup → checa proteção → resolve
//!       Done(frame)  → registra mapeamento, roda a operação, retorna
//!       Wait(frame)  → solta tudo, dorme até o frame sair de BusyIo
//!       Fetch(frame) → solta tudo, lê do pager, publica no cache
//!       Writeback    → solta tudo, grava a vítima suja, libera o frame
//!       Retry        → corrida perdida, tenta de novo
//! }
//! ```
//!
//! Nenhum lock é segurado durante I/O ou espera. Cada volta do loop
//! re-lê toda a estrutura, então remoções concorrentes são vistas.

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use crate::mm::addr::VirtAddr;
use crate::mm::aspace::AddressSpace;
use crate::mm::cache::CacheKey;
use crate::mm::error::{fatal, MmError, MmResult};
use crate::mm::pfm::{FrameNumber, FrameState};
use crate::mm::reclaim::evict::Victim;
use crate::mm::unit::resolve::FaultCtx;
use crate::mm::MemoryManager;
use crate::sched::WaitChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
    Execute,
}

/// Fault decodificado do error code x86_64.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultInfo {
    pub addr: VirtAddr,
    pub error_code: u64,
    pub access: AccessType,
    pub user_mode: bool,
}

impl PageFaultInfo {
    pub fn from_error_code(addr: u64, error_code: u64) -> Self {
        let access = if error_code & 0x10 != 0 {
            AccessType::Execute
        } else if error_code & 0x02 != 0 {
            AccessType::Write
        } else {
            AccessType::Read
        };
        Self {
            addr: VirtAddr::new(addr),
            error_code,
            access,
            user_mode: error_code & 0x04 != 0,
        }
    }
}

/// Resultado de um passo de resolução.
#[derive(Debug)]
pub(crate) enum Step {
    Done(FrameNumber),
    Wait { frame: FrameNumber, generation: u64 },
    Fetch(FetchTicket),
    /// Vítima suja de eviction a gravar antes de alocar de novo
    Writeback(Victim),
    Retry,
}

/// Frame reservado no cache (BusyIo) aguardando a leitura do storage.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FetchTicket {
    pub frame: FrameNumber,
    pub key: CacheKey,
}

/// Fault no address space da tarefa corrente.
pub fn handle_page_fault(mm: &MemoryManager, addr: VirtAddr, access: AccessType) -> MmResult<FrameNumber> {
    let space: Arc<AddressSpace> = match mm.sched.current_address_space() {
        Some(space) => space,
        None => {
            crate::kerror!("(Fault) Fault sem address space ativo em:", addr.as_u64());
            return Err(MmError::InvalidAddress);
        }
    };
    space.handle_fault(mm, addr, access)
}

impl AddressSpace {
    /// Resolve o fault em `addr` e devolve o frame agora mapeado.
    pub fn handle_fault(&self, mm: &MemoryManager, addr: VirtAddr, access: AccessType) -> MmResult<FrameNumber> {
        self.with_page(mm, addr, access, |frame| frame)
    }

    /// Resolve o fault e roda `op` sobre o frame ainda sob o lock do
    /// address space (fork e remoções não o trocam no meio).
    pub(crate) fn with_page<R>(
        &self,
        mm: &MemoryManager,
        addr: VirtAddr,
        access: AccessType,
        op: impl FnOnce(FrameNumber) -> R,
    ) -> MmResult<R> {
        mm.counters.page_faults.fetch_add(1, Ordering::Relaxed);
        let va = addr.page_base();
        let mut op = Some(op);
        let mut lost_victims = 0;

        loop {
            let step = {
                let mut inner = self.lock_inner();
                if inner.destroyed {
                    return Err(MmError::InvalidAddress);
                }
                let Some(desc) = inner.regions.lookup_mut(addr) else {
                    crate::kdebug!("(Fault) Sem região em:", addr.as_u64());
                    return Err(MmError::InvalidAddress);
                };
                if !desc.prot().permits(access) {
                    crate::kdebug!("(Fault) Violação de proteção em:", addr.as_u64());
                    return Err(MmError::ProtectionViolation);
                }
                if access == AccessType::Write {
                    mm.privatize_if_shared(self.id(), desc)?;
                }

                let desc = &*desc;
                let ctx = FaultCtx {
                    aspace: self.id(),
                    desc,
                    va,
                    page: desc.page_of(va),
                    access,
                };
                match mm.resolve(ctx)? {
                    Step::Done(frame) => {
                        return match op.take() {
                            Some(op) => Ok(op(frame)),
                            None => fatal("fault operation consumed twice"),
                        };
                    }
                    step => step,
                }
            };

            match step {
                Step::Wait { frame, generation } => mm.wait_for_frame(frame, generation)?,
                Step::Fetch(ticket) => mm.complete_fetch(ticket)?,
                Step::Writeback(victim) => {
                    if !mm.complete_eviction(victim) {
                        // Vítima voltou (writeback falhou ou foi mapeada).
                        lost_victims += 1;
                        if lost_victims >= mm.pfm.total() {
                            return Err(mm.out_of_memory());
                        }
                    }
                }
                Step::Retry | Step::Done(_) => {}
            }
        }
    }
}

impl MemoryManager {
    /// Dorme até o frame sair de `BusyIo` ou mudar de geração.
    pub(crate) fn wait_for_frame(&self, frame: FrameNumber, generation: u64) -> MmResult<()> {
        let info = self.pfm.frame(frame);
        loop {
            {
                let meta = info.lock();
                if meta.generation != generation {
                    if meta.failed_generation == Some(generation) {
                        return Err(MmError::IoError);
                    }
                    return Ok(());
                }
                match meta.state {
                    FrameState::BusyIo => {}
                    FrameState::Error => return Err(MmError::IoError),
                    _ => return Ok(()),
                }
            }
            self.counters.io_waits.fetch_add(1, Ordering::Relaxed);
            self.sched.block(WaitChannel::Frame(frame));
        }
    }

    /// Lê a página do storage para o frame reservado e publica o resultado.
    pub(crate) fn complete_fetch(&self, ticket: FetchTicket) -> MmResult<()> {
        let phys = self.pfm.phys(ticket.frame);
        // SAFETY: o frame está em BusyIo e só este fetch o toca.
        let buf = unsafe { self.hhdm.page_mut(phys) };
        let result = self.pager.fetch_page(ticket.key.object, ticket.key.offset, buf);
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);

        let handle = self.cache.object(ticket.key.object);
        let mut index = handle.lock();
        let mut meta = self.pfm.frame(ticket.frame).lock();

        let outcome = match result {
            Ok(()) => {
                if meta.cache_key == Some(ticket.key) {
                    meta.state = FrameState::ResidentCached;
                } else {
                    // Entrada removida durante a leitura (objeto fechado).
                    meta.state = FrameState::ResidentPrivate;
                    self.release_if_unreferenced(ticket.frame, &mut meta);
                }
                Ok(())
            }
            Err(_) => {
                crate::kwarn!("(Fault) Falha de I/O no offset=", ticket.key.offset);
                meta.state = FrameState::Error;
                meta.failed_generation = Some(meta.generation);
                index.remove_if(ticket.key.offset, ticket.frame);
                meta.cache_key = None;
                self.counters.io_errors.fetch_add(1, Ordering::Relaxed);
                self.release_if_unreferenced(ticket.frame, &mut meta);
                Err(MmError::IoError)
            }
        };
        drop(meta);
        drop(index);

        self.sched.wake(WaitChannel::Frame(ticket.frame));
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_decoding() {
        let write_user = PageFaultInfo::from_error_code(0x4000, 0x06);
        assert_eq!(write_user.access, AccessType::Write);
        assert!(write_user.user_mode);

        let fetch = PageFaultInfo::from_error_code(0x4000, 0x10);
        assert_eq!(fetch.access, AccessType::Execute);
        assert!(!fetch.user_mode);

        assert_eq!(PageFaultInfo::from_error_code(0, 0).access, AccessType::Read);
    }
}
