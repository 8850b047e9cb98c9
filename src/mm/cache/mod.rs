//! # Page Cache
//!
//! Páginas de objetos (arquivos) em RAM, indexadas por (objeto, offset).
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │        VmUnits de objeto (faults)            │
//! └──────────────────────┬───────────────────────┘
//!                        │ find / insert
//! ┌──────────────────────▼───────────────────────┐
//! │   PAGE CACHE  (um índice ordenado por objeto) │
//! └──────────────────────┬───────────────────────┘
//!                        │ fetch_page / writeback_page
//! ┌──────────────────────▼───────────────────────┐
//! │                   Pager                      │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A entrada do cache é uma referência ao frame: enquanto existir, o frame
//! não volta para a free list. Sair do cache não libera um frame que ainda
//! está numa unit; ele só passa a ser `ResidentPrivate`.

pub mod pagecache;

pub use pagecache::{CacheKey, ObjectHandle, ObjectIndex, PageCache, PageCacheStats};

use core::sync::atomic::Ordering;

use crate::fs::ObjectId;
use crate::mm::error::{fatal, MmError, MmResult};
use crate::mm::pfm::{FrameMeta, FrameNumber, FrameState};
use crate::mm::MemoryManager;
use crate::sched::WaitChannel;

impl MemoryManager {
    /// Frame em cache para (objeto, offset).
    pub fn cache_find(&self, object: ObjectId, offset: u64) -> Option<FrameNumber> {
        self.cache.existing(object)?.lock().find(offset)
    }

    /// Publica `frame` como conteúdo de (objeto, offset).
    ///
    /// O frame precisa estar alocado e fora do cache. A entrada assume a
    /// referência de quem o alocou: sair do cache sem mapeamentos o libera.
    pub fn cache_insert(&self, object: ObjectId, offset: u64, frame: FrameNumber) -> MmResult<()> {
        let handle = self.cache.object(object);
        let mut index = handle.lock();
        let mut meta = self.pfm.frame(frame).lock();
        match meta.state {
            FrameState::Free | FrameState::Error => fatal("cache insert of an unusable frame"),
            _ => {}
        }
        if meta.cache_key.is_some() {
            return Err(MmError::AlreadyCached);
        }
        index.insert(offset, frame)?;
        meta.cache_key = Some(CacheKey::new(object, offset));
        if meta.state == FrameState::ResidentPrivate {
            meta.state = FrameState::ResidentCached;
        }
        crate::ktrace!("(Cache) Entrada inserida offset=", offset);
        Ok(())
    }

    /// Remove a entrada. Retorna o frame que ela apontava.
    pub fn cache_remove(&self, object: ObjectId, offset: u64) -> Option<FrameNumber> {
        let handle = self.cache.existing(object)?;
        let mut index = handle.lock();
        let frame = index.remove(offset)?;
        let mut meta = self.pfm.frame(frame).lock();
        self.detach_cached(frame, &mut meta, CacheKey::new(object, offset));
        Some(frame)
    }

    /// Remove todas as entradas do objeto. Retorna quantas havia.
    pub fn cache_remove_all(&self, object: ObjectId) -> usize {
        let Some(handle) = self.cache.existing(object) else {
            return 0;
        };
        let mut index = handle.lock();
        let entries = index.entries();
        for (offset, frame) in entries.iter().copied() {
            index.remove(offset);
            let mut meta = self.pfm.frame(frame).lock();
            self.detach_cached(frame, &mut meta, CacheKey::new(object, offset));
        }
        drop(index);
        self.cache.forget_object(object);
        crate::kdebug!("(Cache) Objeto removido do cache, páginas=", entries.len());
        entries.len()
    }

    /// Solta a referência do cache sobre o frame (índice já atualizado).
    fn detach_cached(&self, frame: FrameNumber, meta: &mut FrameMeta, key: CacheKey) {
        if meta.cache_key != Some(key) {
            return;
        }
        meta.cache_key = None;
        match meta.state {
            // Quem está com o I/O termina o trabalho.
            FrameState::BusyIo => {}
            FrameState::ResidentCached => {
                meta.state = FrameState::ResidentPrivate;
                self.release_if_unreferenced(frame, meta);
            }
            _ => {
                self.release_if_unreferenced(frame, meta);
            }
        }
    }

    /// Grava no storage todas as páginas sujas do objeto.
    ///
    /// Retorna quantas foram gravadas; a primeira falha vira `IoError`
    /// depois de tentar as demais.
    pub fn flush_object(&self, object: ObjectId) -> MmResult<usize> {
        let Some(handle) = self.cache.existing(object) else {
            return Ok(0);
        };
        let entries = handle.lock().entries();

        let mut written = 0;
        let mut failed = false;
        for (offset, frame) in entries {
            let key = CacheKey::new(object, offset);
            {
                let index = handle.lock();
                if index.find(offset) != Some(frame) {
                    continue;
                }
                let mut meta = self.pfm.frame(frame).lock();
                if meta.state != FrameState::ResidentCached || !meta.dirty || meta.cache_key != Some(key) {
                    continue;
                }
                meta.state = FrameState::BusyIo;
                meta.dirty = false;
            }

            let ok = self.write_back(frame, key);

            {
                let _index = handle.lock();
                let mut meta = self.pfm.frame(frame).lock();
                if !ok {
                    meta.dirty = true;
                }
                if meta.cache_key == Some(key) {
                    meta.state = FrameState::ResidentCached;
                } else {
                    meta.state = FrameState::ResidentPrivate;
                    self.release_if_unreferenced(frame, &mut meta);
                }
            }
            self.sched.wake(WaitChannel::Frame(frame));

            if ok {
                written += 1;
            } else {
                failed = true;
            }
        }

        if failed {
            return Err(MmError::IoError);
        }
        Ok(written)
    }

    /// Grava a página no storage. O frame está em `BusyIo` e é nosso.
    pub(crate) fn write_back(&self, frame: FrameNumber, key: CacheKey) -> bool {
        // SAFETY: BusyIo impede novas escritas e mapeamentos enquanto o
        // pager lê o conteúdo.
        let data = unsafe { self.hhdm.page(self.pfm.phys(frame)) };
        match self.pager.writeback_page(key.object, key.offset, data) {
            Ok(()) => {
                self.counters.writebacks.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.counters.writeback_failures.fetch_add(1, Ordering::Relaxed);
                crate::kwarn!("(Cache) Writeback falhou no offset=", key.offset);
                false
            }
        }
    }

    /// Objeto fechado/apagado pelo sistema de arquivos: grava o que está
    /// sujo e esquece todas as páginas.
    pub fn object_closed(&self, object: ObjectId) -> MmResult<()> {
        let flushed = self.flush_object(object);
        self.cache_remove_all(object);
        flushed.map(|_| ())
    }
}
