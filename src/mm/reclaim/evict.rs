//! # Eviction Engine
//!
//! Reclama um frame a partir do fim LRU quando a free list está vazia.
//!
//! ```text
//! 1. select   (listas + try_lock do frame e das tabelas)  → BusyIo
//! 2. write    (sem locks; só se sujo)                     → pager
//! 3. finish   (índice → frame → listas)                   → free list
//! ```
//!
//! A seleção começa pelo lock das listas, o último da ordem, então todo
//! lock "para cima" (frame, registry de units, tabelas) é um único
//! `try_lock`: contenção pula o candidato, nunca espera.
//! Durante o writeback o frame continua no cache em `BusyIo`; quem faltar
//! nele dorme até a eviction terminar e então busca de novo no storage.
//!
//! Quem aloca segurando locks do MM (o resolve) não pode gravar: a vítima
//! suja volta como `Reclaim::Writeback` e o fault loop executa os passos 2
//! e 3 depois de soltar tudo.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use crate::mm::cache::CacheKey;
use crate::mm::pfm::{FrameMeta, FrameNumber, FrameState};
use crate::mm::unit::VmUnit;
use crate::mm::MemoryManager;
use crate::sched::WaitChannel;

/// Frame escolhido, já em `BusyIo`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Victim {
    pub frame: FrameNumber,
    pub key: Option<CacheKey>,
    pub dirty: bool,
    pub generation: u64,
}

/// Resultado de uma tentativa de reclamar um frame.
#[derive(Debug)]
pub(crate) enum Reclaim {
    /// Um frame voltou à free list
    Freed,
    /// Vítima suja reservada; a gravação fica com o chamador
    Writeback(Victim),
    /// Nada reclamável agora
    Nothing,
}

impl MemoryManager {
    /// Tenta devolver um frame à free list.
    ///
    /// Com `defer_io` nenhuma gravação acontece aqui: a primeira vítima suja
    /// volta para o chamador.
    pub(crate) fn reclaim_one(&self, defer_io: bool) -> Reclaim {
        // Cada tentativa falha manda o candidato para o fim MRU.
        let attempts = self.pfm.total();
        for _ in 0..attempts {
            let Some(victim) = self.select_victim() else {
                return Reclaim::Nothing;
            };
            if victim.dirty && defer_io {
                return Reclaim::Writeback(victim);
            }
            if self.complete_eviction(victim) {
                return Reclaim::Freed;
            }
        }
        Reclaim::Nothing
    }

    /// Grava a vítima (se suja) e a devolve à free list. Roda sem nenhum
    /// lock do MM segurado.
    pub(crate) fn complete_eviction(&self, victim: Victim) -> bool {
        if victim.dirty && !self.write_back_victim(&victim) {
            return false;
        }
        self.finish_eviction(victim)
    }

    fn select_victim(&self) -> Option<Victim> {
        let mut lists = self.pfm.lists();
        let limit = self.config.evict_scan_limit;

        let mut chosen = None;
        for frame in lists.lru.iter_from_lru().take(limit) {
            let Some(mut meta) = self.pfm.frame(frame).try_lock() else {
                continue;
            };
            if !meta.is_evictable() {
                continue;
            }
            if !self.try_detach_holders(frame, &mut meta) {
                continue;
            }

            let victim = Victim {
                frame,
                key: meta.cache_key,
                dirty: meta.dirty && meta.cache_key.is_some(),
                generation: meta.generation,
            };
            meta.state = FrameState::BusyIo;
            meta.dirty = false;
            chosen = Some(victim);
            break;
        }

        if let Some(victim) = chosen {
            // Fora do fim LRU enquanto está em trânsito.
            lists.lru.touch(victim.frame);
            crate::ktrace!("(Evict) Vítima escolhida idx=", victim.frame.as_u32());
        }
        chosen
    }

    /// Tira o frame de todos os slots de unit que ainda o referenciam.
    ///
    /// Tudo ou nada: só mexe nas tabelas se conseguir travar todas.
    fn try_detach_holders(&self, frame: FrameNumber, meta: &mut FrameMeta) -> bool {
        if meta.holders.is_empty() {
            return true;
        }

        let units: Vec<Arc<VmUnit>> = {
            let Some(registry) = self.units.try_lock() else {
                return false;
            };
            let mut units = Vec::with_capacity(meta.holders.len());
            for holder in meta.holders.iter() {
                match registry.get(&holder.unit) {
                    Some(unit) => units.push(unit.clone()),
                    None => return false,
                }
            }
            units
        };

        let mut tables = Vec::with_capacity(units.len());
        for (unit, holder) in units.iter().zip(meta.holders.iter()) {
            let Some(table) = unit.table.try_lock() else {
                return false;
            };
            if table.get(holder.page).map(|slot| slot.frame) != Some(frame) {
                return false;
            }
            tables.push(table);
        }

        for (table, holder) in tables.iter_mut().zip(meta.holders.iter()) {
            table.remove(holder.page);
        }
        drop(tables);
        meta.holders.clear();
        true
    }

    /// Grava a vítima suja. Em falha o frame volta ao estado anterior.
    fn write_back_victim(&self, victim: &Victim) -> bool {
        let Some(key) = victim.key else {
            return true;
        };
        if self.write_back(victim.frame, key) {
            return true;
        }

        let mut meta = self.pfm.frame(victim.frame).lock();
        meta.dirty = true;
        if meta.cache_key == Some(key) {
            meta.state = FrameState::ResidentCached;
        } else {
            meta.state = FrameState::ResidentPrivate;
            self.release_if_unreferenced(victim.frame, &mut meta);
        }
        drop(meta);
        self.sched.wake(WaitChannel::Frame(victim.frame));
        false
    }

    /// Tira a vítima do cache e a devolve à free list.
    fn finish_eviction(&self, victim: Victim) -> bool {
        let handle = victim.key.and_then(|key| self.cache.existing(key.object));
        let mut index = handle.as_ref().map(|h| h.lock());
        let mut meta = self.pfm.frame(victim.frame).lock();

        if meta.state != FrameState::BusyIo || meta.generation != victim.generation {
            fatal_lost_victim();
        }
        if meta.wire_count > 0 || meta.share_count > 0 || !meta.holders.is_empty() {
            // Wired ou mapeado enquanto gravávamos: fica onde está.
            meta.state = if meta.cache_key.is_some() {
                FrameState::ResidentCached
            } else {
                FrameState::ResidentPrivate
            };
            drop(meta);
            drop(index);
            self.sched.wake(WaitChannel::Frame(victim.frame));
            return false;
        }

        if let (Some(key), Some(index)) = (meta.cache_key, index.as_mut()) {
            index.remove_if(key.offset, victim.frame);
        }
        meta.cache_key = None;
        self.pfm.release_locked(victim.frame, &mut meta);
        drop(meta);
        drop(index);

        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        self.sched.wake(WaitChannel::Frame(victim.frame));
        crate::ktrace!("(Evict) Frame reclamado idx=", victim.frame.as_u32());
        true
    }
}

#[cold]
fn fatal_lost_victim() -> ! {
    crate::mm::error::fatal("eviction victim changed state while busy")
}
