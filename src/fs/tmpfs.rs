//! TmpFS - Pager em memória
//!
//! Objetos são mapas esparsos de páginas. Página nunca escrita é lida como
//! zeros. Usado no boot (antes de haver disco) e como storage dos testes,
//! com injeção de falhas e contadores de I/O.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use spin::Mutex;

use super::pager::{ObjectId, Pager, PagerError};
use crate::mm::config::PAGE_SIZE;

#[derive(Default)]
struct TmpObject {
    pages: BTreeMap<u64, Box<[u8]>>,
}

pub struct MemPager {
    objects: Mutex<BTreeMap<ObjectId, TmpObject>>,
    failing_reads: Mutex<BTreeSet<(ObjectId, u64)>>,
    failing_writes: Mutex<BTreeSet<ObjectId>>,
    fetches: AtomicUsize,
    writebacks: AtomicUsize,
    fetch_delay: AtomicU32,
}

impl MemPager {
    pub const fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            failing_reads: Mutex::new(BTreeSet::new()),
            failing_writes: Mutex::new(BTreeSet::new()),
            fetches: AtomicUsize::new(0),
            writebacks: AtomicUsize::new(0),
            fetch_delay: AtomicU32::new(0),
        }
    }

    /// Cria (ou substitui) um objeto com o conteúdo dado.
    pub fn create(&self, object: ObjectId, contents: &[u8]) {
        let mut obj = TmpObject::default();
        for (i, chunk) in contents.chunks(PAGE_SIZE).enumerate() {
            let mut page = vec![0u8; PAGE_SIZE].into_boxed_slice();
            page[..chunk.len()].copy_from_slice(chunk);
            obj.pages.insert((i * PAGE_SIZE) as u64, page);
        }
        self.objects.lock().insert(object, obj);
    }

    pub fn remove(&self, object: ObjectId) {
        self.objects.lock().remove(&object);
    }

    /// Cópia da página armazenada (zeros se nunca escrita).
    pub fn page(&self, object: ObjectId, offset: u64) -> Option<Vec<u8>> {
        let objects = self.objects.lock();
        let obj = objects.get(&object)?;
        Some(match obj.pages.get(&offset) {
            Some(page) => page.to_vec(),
            None => vec![0u8; PAGE_SIZE],
        })
    }

    /// Leituras de (objeto, offset) falham até `heal_reads`.
    pub fn fail_reads(&self, object: ObjectId, offset: u64) {
        self.failing_reads.lock().insert((object, offset));
    }

    pub fn heal_reads(&self, object: ObjectId, offset: u64) {
        self.failing_reads.lock().remove(&(object, offset));
    }

    /// Writebacks do objeto falham até `heal_writes`.
    pub fn fail_writes(&self, object: ObjectId) {
        self.failing_writes.lock().insert(object);
    }

    pub fn heal_writes(&self, object: ObjectId) {
        self.failing_writes.lock().remove(&object);
    }

    /// Spins gastos em cada fetch antes de copiar (alarga janelas de corrida).
    pub fn set_fetch_delay(&self, spins: u32) {
        self.fetch_delay.store(spins, Ordering::Relaxed);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn writeback_count(&self) -> usize {
        self.writebacks.load(Ordering::Relaxed)
    }
}

impl Default for MemPager {
    fn default() -> Self {
        Self::new()
    }
}

impl Pager for MemPager {
    fn fetch_page(&self, object: ObjectId, offset: u64, buf: &mut [u8]) -> Result<(), PagerError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        for _ in 0..self.fetch_delay.load(Ordering::Relaxed) {
            core::hint::spin_loop();
        }

        if self.failing_reads.lock().contains(&(object, offset)) {
            crate::kwarn!("(TmpFS) Falha de leitura injetada, offset=", offset);
            return Err(PagerError::Io);
        }

        let objects = self.objects.lock();
        let obj = objects.get(&object).ok_or(PagerError::NoSuchObject)?;
        match obj.pages.get(&offset) {
            Some(page) => {
                let n = buf.len().min(page.len());
                buf[..n].copy_from_slice(&page[..n]);
                buf[n..].fill(0);
            }
            None => buf.fill(0),
        }
        Ok(())
    }

    fn writeback_page(&self, object: ObjectId, offset: u64, data: &[u8]) -> Result<(), PagerError> {
        if self.failing_writes.lock().contains(&object) {
            crate::kwarn!("(TmpFS) Falha de escrita injetada, offset=", offset);
            return Err(PagerError::Io);
        }

        let mut objects = self.objects.lock();
        let obj = objects.get_mut(&object).ok_or(PagerError::NoSuchObject)?;
        let page = obj
            .pages
            .entry(offset)
            .or_insert_with(|| vec![0u8; PAGE_SIZE].into_boxed_slice());
        let n = data.len().min(page.len());
        page[..n].copy_from_slice(&data[..n]);
        self.writebacks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
