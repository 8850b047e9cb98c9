//! # Resolve
//!
//! Um passo de resolução de fault dentro de uma unit. Roda com o lock do
//! address space segurado e trava unit → tabela → (índice do cache) → frame.
//! Nunca espera I/O: quando a página está em trânsito devolve `Wait`, e
//! quando precisa ler do storage devolve `Fetch` com o frame já reservado
//! no cache. Alocar também não grava: se só sobrou vítima suja no LRU o
//! passo é `Writeback`. O fault loop solta tudo e executa o passo pendente.

use core::sync::atomic::Ordering;

use super::{Slot, SlotTable, UnitKind, VmUnit};
use crate::fs::ObjectId;
use crate::mm::addr::VirtAddr;
use crate::mm::aspace::{AsId, Descriptor, Protection};
use crate::mm::cache::CacheKey;
use crate::mm::config::PAGE_SIZE;
use crate::mm::error::{fatal, MmResult};
use crate::mm::fault::{AccessType, FetchTicket, Step};
use crate::mm::pfm::{rmap, FrameNumber, FrameState};
use crate::mm::{Allocation, MemoryManager};

/// O fault sendo resolvido.
#[derive(Clone, Copy)]
pub(crate) struct FaultCtx<'a> {
    pub aspace: AsId,
    pub desc: &'a Descriptor,
    /// Início da página que faltou
    pub va: VirtAddr,
    /// Índice da página dentro da unit
    pub page: u64,
    pub access: AccessType,
}

impl MemoryManager {
    pub(crate) fn resolve(&self, ctx: FaultCtx<'_>) -> MmResult<Step> {
        let unit = ctx.desc.unit();
        let state = unit.lock_state();
        if state.destroyed {
            fatal("descriptor references a destroyed unit");
        }
        // Snapshot de fork ainda vivo: páginas novas nascem COW.
        let shared = state.cow_sharers > 1;
        let mut table = unit.table.lock();

        if let Some(slot) = table.get(ctx.page) {
            return self.resolve_present(ctx, unit, &mut table, slot);
        }
        match unit.kind() {
            UnitKind::Anonymous => self.resolve_zero_fill(ctx, unit, &mut table, shared),
            UnitKind::Object(object) => self.resolve_object(ctx, unit, &mut table, object),
        }
    }

    /// Página já residente na unit.
    fn resolve_present(
        &self,
        ctx: FaultCtx<'_>,
        unit: &VmUnit,
        table: &mut SlotTable,
        slot: Slot,
    ) -> MmResult<Step> {
        let mut meta = self.pfm.frame(slot.frame).lock();
        match meta.state {
            FrameState::BusyIo => {
                return Ok(Step::Wait {
                    frame: slot.frame,
                    generation: meta.generation,
                })
            }
            FrameState::Free | FrameState::Error => fatal("unit slot points to an unusable frame"),
            FrameState::ResidentCached | FrameState::ResidentPrivate => {}
        }

        if ctx.access == AccessType::Write {
            if slot.cow {
                // Todo mapeamento passa por algum holder: com um só, quem
                // vê o frame divide esta mesma tabela.
                if meta.holders.len() > 1 {
                    drop(meta);
                    return self.break_cow(ctx, unit, table, slot);
                }
                // Nenhuma outra unit vê o frame: basta devolver a escrita.
                if let Some(s) = table.get_mut(ctx.page) {
                    s.cow = false;
                    s.prot = ctx.desc.prot();
                }
                self.counters.cow_reused.fetch_add(1, Ordering::Relaxed);
                crate::ktrace!("(Fault) COW espúrio, escrita concedida va=", ctx.va.as_u64());
            }
            if meta.cache_key.is_some() {
                meta.dirty = true;
            }
        }

        rmap::link(&self.heap, &mut meta, ctx.aspace, ctx.va, unit.id());
        drop(meta);
        self.pfm.touch(slot.frame);
        Ok(Step::Done(slot.frame))
    }

    /// Cópia privada de uma página COW compartilhada.
    ///
    /// A cópia troca o slot da tabela inteira: todos os mapeamentos que
    /// passavam por esta unit migram para o frame novo.
    fn break_cow(
        &self,
        ctx: FaultCtx<'_>,
        unit: &VmUnit,
        table: &mut SlotTable,
        slot: Slot,
    ) -> MmResult<Step> {
        // Alocar pode evictar, e eviction trava índices do cache: nenhum
        // lock de frame pode estar segurado aqui.
        let new = match self.allocate_locked(FrameState::ResidentPrivate)? {
            Allocation::Frame(frame) => frame,
            Allocation::Writeback(victim) => return Ok(Step::Writeback(victim)),
        };
        let old = slot.frame;

        let mut old_meta = self.pfm.frame(old).lock();
        if old_meta.state == FrameState::BusyIo {
            let generation = old_meta.generation;
            drop(old_meta);
            self.free_unused(new);
            return Ok(Step::Wait {
                frame: old,
                generation,
            });
        }

        if old_meta.holders.len() <= 1 {
            // As outras referências sumiram enquanto alocávamos.
            drop(old_meta);
            self.free_unused(new);
            return Ok(Step::Retry);
        }

        // SAFETY: `new` acabou de sair da free list e é só nosso; `old` é
        // COW, ninguém o grava.
        unsafe { self.hhdm.copy_page(self.pfm.phys(new), self.pfm.phys(old)) };

        let moved = rmap::unlink_unit(&self.heap, &mut old_meta, unit.id());
        old_meta.remove_holder(unit.id(), ctx.page);
        self.release_if_unreferenced(old, &mut old_meta);
        drop(old_meta);

        let mut new_meta = self.pfm.frame(new).lock();
        new_meta.add_holder(unit.id(), ctx.page);
        for (aspace, va) in moved {
            rmap::link(&self.heap, &mut new_meta, aspace, va, unit.id());
        }
        rmap::link(&self.heap, &mut new_meta, ctx.aspace, ctx.va, unit.id());
        drop(new_meta);

        table.insert(ctx.page, Slot::new(new, ctx.desc.prot()));
        self.counters.cow_copies.fetch_add(1, Ordering::Relaxed);
        crate::ktrace!("(Fault) COW copiado va=", ctx.va.as_u64());
        Ok(Step::Done(new))
    }

    /// Primeira vez que uma página anônima é tocada.
    fn resolve_zero_fill(
        &self,
        ctx: FaultCtx<'_>,
        unit: &VmUnit,
        table: &mut SlotTable,
        shared: bool,
    ) -> MmResult<Step> {
        let frame = match self.allocate_locked(FrameState::ResidentPrivate)? {
            Allocation::Frame(frame) => frame,
            Allocation::Writeback(victim) => return Ok(Step::Writeback(victim)),
        };
        // SAFETY: frame recém-alocado, invisível a todos até entrar na tabela.
        unsafe { self.hhdm.zero_page(self.pfm.phys(frame)) };

        let mut meta = self.pfm.frame(frame).lock();
        meta.add_holder(unit.id(), ctx.page);
        rmap::link(&self.heap, &mut meta, ctx.aspace, ctx.va, unit.id());
        drop(meta);

        let mut slot = Slot::new(frame, ctx.desc.prot());
        if shared && ctx.desc.prot().contains(Protection::WRITE) {
            slot.mark_cow();
        }
        table.insert(ctx.page, slot);
        self.counters.zero_fills.fetch_add(1, Ordering::Relaxed);
        Ok(Step::Done(frame))
    }

    /// Página de objeto ausente na unit: consulta o page cache.
    fn resolve_object(
        &self,
        ctx: FaultCtx<'_>,
        unit: &VmUnit,
        table: &mut SlotTable,
        object: ObjectId,
    ) -> MmResult<Step> {
        let key = CacheKey::new(object, ctx.page * PAGE_SIZE as u64);
        let handle = self.cache.object(object);

        {
            let index = handle.lock();
            if let Some(frame) = index.find(key.offset) {
                let mut meta = self.pfm.frame(frame).lock();
                match meta.state {
                    FrameState::BusyIo => {
                        return Ok(Step::Wait {
                            frame,
                            generation: meta.generation,
                        })
                    }
                    FrameState::Free | FrameState::Error => {
                        fatal("page cache entry points to an unusable frame")
                    }
                    FrameState::ResidentCached | FrameState::ResidentPrivate => {}
                }
                if ctx.access == AccessType::Write {
                    meta.dirty = true;
                }
                meta.add_holder(unit.id(), ctx.page);
                rmap::link(&self.heap, &mut meta, ctx.aspace, ctx.va, unit.id());
                drop(meta);
                drop(index);

                table.insert(ctx.page, Slot::new(frame, ctx.desc.prot()));
                self.cache.record_hit();
                self.pfm.touch(frame);
                return Ok(Step::Done(frame));
            }
        }

        // Miss: reservar o frame sem lock de cache (alocar pode evictar).
        let frame = match self.allocate_locked(FrameState::BusyIo)? {
            Allocation::Frame(frame) => frame,
            Allocation::Writeback(victim) => return Ok(Step::Writeback(victim)),
        };
        let mut index = handle.lock();
        if index.find(key.offset).is_some() {
            // Outra unit do mesmo objeto chegou antes.
            drop(index);
            self.free_unused(frame);
            return Ok(Step::Retry);
        }
        let mut meta = self.pfm.frame(frame).lock();
        index.insert(key.offset, frame)?;
        meta.cache_key = Some(key);
        drop(meta);
        drop(index);

        self.cache.record_miss();
        crate::ktrace!("(Fault) Cache miss, buscando offset=", key.offset);
        Ok(Step::Fetch(FetchTicket { frame, key }))
    }

    /// Devolve um frame recém-alocado que acabou não sendo usado.
    fn free_unused(&self, frame: FrameNumber) {
        let mut meta = self.pfm.frame(frame).lock();
        self.pfm.release_locked(frame, &mut meta);
    }
}
