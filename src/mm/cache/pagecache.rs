//! # Page Cache Index
//!
//! (objeto, offset) → frame. Um índice por objeto, cada um com o próprio
//! lock: faults em arquivos diferentes não disputam nada aqui. O mapa de
//! objetos só é travado para achar (ou criar) o índice.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::fs::ObjectId;
use crate::mm::config::{is_aligned, PAGE_SIZE};
use crate::mm::error::{MmError, MmResult};
use crate::mm::pfm::FrameNumber;
use crate::sync::{BoundedSpinlock, LockBudget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    pub object: ObjectId,
    pub offset: u64,
}

impl CacheKey {
    pub const fn new(object: ObjectId, offset: u64) -> Self {
        Self { object, offset }
    }
}

/// Páginas em cache de um objeto.
pub struct ObjectIndex {
    object: ObjectId,
    pages: BTreeMap<u64, FrameNumber>,
}

impl ObjectIndex {
    fn new(object: ObjectId) -> Self {
        Self {
            object,
            pages: BTreeMap::new(),
        }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn find(&self, offset: u64) -> Option<FrameNumber> {
        self.pages.get(&offset).copied()
    }

    /// Nova entrada. Offset ocupado é `AlreadyCached`.
    pub fn insert(&mut self, offset: u64, frame: FrameNumber) -> MmResult<()> {
        if !is_aligned(offset, PAGE_SIZE as u64) {
            return Err(MmError::NotAligned);
        }
        if self.pages.contains_key(&offset) {
            return Err(MmError::AlreadyCached);
        }
        self.pages.insert(offset, frame);
        Ok(())
    }

    pub fn remove(&mut self, offset: u64) -> Option<FrameNumber> {
        self.pages.remove(&offset)
    }

    /// Remove a entrada só se ainda aponta para `frame`.
    pub fn remove_if(&mut self, offset: u64, frame: FrameNumber) -> bool {
        if self.find(offset) == Some(frame) {
            self.pages.remove(&offset);
            true
        } else {
            false
        }
    }

    pub fn entries(&self) -> Vec<(u64, FrameNumber)> {
        self.pages.iter().map(|(o, f)| (*o, *f)).collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

pub type ObjectHandle = Arc<BoundedSpinlock<ObjectIndex>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCacheStats {
    pub objects: u64,
    pub cached_pages: u64,
    pub hits: u64,
    pub misses: u64,
}

pub struct PageCache {
    objects: BoundedSpinlock<BTreeMap<ObjectId, ObjectHandle>>,
    budget: LockBudget,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PageCache {
    pub fn new(budget: LockBudget) -> Self {
        Self {
            objects: BoundedSpinlock::new("cache-objects", BTreeMap::new(), budget),
            budget,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Índice do objeto, criado sob demanda.
    pub fn object(&self, object: ObjectId) -> ObjectHandle {
        let mut objects = self.objects.lock();
        objects
            .entry(object)
            .or_insert_with(|| {
                Arc::new(BoundedSpinlock::new(
                    "cache-object",
                    ObjectIndex::new(object),
                    self.budget,
                ))
            })
            .clone()
    }

    /// Índice do objeto, se existir.
    pub fn existing(&self, object: ObjectId) -> Option<ObjectHandle> {
        self.objects.lock().get(&object).cloned()
    }

    /// Índices de todos os objetos com páginas (ou entradas) no cache.
    pub fn handles(&self) -> Vec<ObjectHandle> {
        self.objects.lock().values().cloned().collect()
    }

    /// Descarta o índice do objeto se estiver vazio.
    pub fn forget_object(&self, object: ObjectId) {
        let mut objects = self.objects.lock();
        let empty = match objects.get(&object) {
            Some(index) => index.try_lock().map(|i| i.is_empty()).unwrap_or(false),
            None => false,
        };
        if empty {
            objects.remove(&object);
        }
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> PageCacheStats {
        let handles = self.handles();
        let cached_pages = handles.iter().map(|h| h.lock().len() as u64).sum();
        PageCacheStats {
            objects: handles.len() as u64,
            cached_pages,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_rejects_duplicates_and_unaligned() {
        let cache = PageCache::new(LockBudget::DEFAULT);
        let handle = cache.object(ObjectId(7));
        let mut index = handle.lock();

        assert_eq!(index.insert(0x1000, FrameNumber::new(3)), Ok(()));
        assert_eq!(index.insert(0x1000, FrameNumber::new(4)), Err(MmError::AlreadyCached));
        assert_eq!(index.insert(0x1001, FrameNumber::new(4)), Err(MmError::NotAligned));
        assert_eq!(index.find(0x1000), Some(FrameNumber::new(3)));

        assert!(!index.remove_if(0x1000, FrameNumber::new(4)));
        assert!(index.remove_if(0x1000, FrameNumber::new(3)));
        assert!(index.is_empty());
    }

    #[test]
    fn empty_objects_are_forgotten() {
        let cache = PageCache::new(LockBudget::DEFAULT);
        let obj = ObjectId(1);
        cache.object(obj);
        assert!(cache.existing(obj).is_some());
        cache.forget_object(obj);
        assert!(cache.existing(obj).is_none());
    }
}
