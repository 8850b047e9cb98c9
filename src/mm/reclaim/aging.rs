//! # Page Aging
//!
//! Lista LRU única de todos os frames alocados. Implementada como lista
//! duplamente encadeada por índice (um par prev/next por frame do registry),
//! então push/remove/touch são O(1) e nada aloca depois do boot.
//!
//! ```text
//! head (MRU) <-> ... <-> tail (LRU)
//! ```

use alloc::vec;
use alloc::vec::Vec;

use crate::mm::pfm::FrameNumber;

const NIL: u32 = u32::MAX;

/// Lista LRU simples
pub struct LruList {
    prev: Vec<u32>,
    next: Vec<u32>,
    linked: Vec<bool>,
    head: u32,
    tail: u32,
    len: usize,
}

impl LruList {
    pub fn new(capacity: usize) -> Self {
        Self {
            prev: vec![NIL; capacity],
            next: vec![NIL; capacity],
            linked: vec![false; capacity],
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, frame: FrameNumber) -> bool {
        self.linked.get(frame.index()).copied().unwrap_or(false)
    }

    /// Insere como mais recente. Já presente: apenas move.
    pub fn push_mru(&mut self, frame: FrameNumber) {
        if self.contains(frame) {
            self.unlink(frame);
        }
        let idx = frame.as_u32();
        let i = frame.index();
        self.prev[i] = NIL;
        self.next[i] = self.head;
        if self.head != NIL {
            self.prev[self.head as usize] = idx;
        } else {
            self.tail = idx;
        }
        self.head = idx;
        self.linked[i] = true;
        self.len += 1;
    }

    /// Retira da lista. Retorna se estava presente.
    pub fn remove(&mut self, frame: FrameNumber) -> bool {
        if !self.contains(frame) {
            return false;
        }
        self.unlink(frame);
        true
    }

    /// Marca acesso: move para MRU se presente
    pub fn touch(&mut self, frame: FrameNumber) {
        if self.contains(frame) && self.head != frame.as_u32() {
            self.push_mru(frame);
        }
    }

    /// Frame menos recentemente usado
    pub fn lru(&self) -> Option<FrameNumber> {
        (self.tail != NIL).then(|| FrameNumber::new(self.tail))
    }

    /// Percorre do menos para o mais recente
    pub fn iter_from_lru(&self) -> LruIter<'_> {
        LruIter {
            list: self,
            cursor: self.tail,
        }
    }

    fn unlink(&mut self, frame: FrameNumber) {
        let i = frame.index();
        let (p, n) = (self.prev[i], self.next[i]);
        if p != NIL {
            self.next[p as usize] = n;
        } else {
            self.head = n;
        }
        if n != NIL {
            self.prev[n as usize] = p;
        } else {
            self.tail = p;
        }
        self.prev[i] = NIL;
        self.next[i] = NIL;
        self.linked[i] = false;
        self.len -= 1;
    }
}

pub struct LruIter<'a> {
    list: &'a LruList,
    cursor: u32,
}

impl Iterator for LruIter<'_> {
    type Item = FrameNumber;

    fn next(&mut self) -> Option<FrameNumber> {
        if self.cursor == NIL {
            return None;
        }
        let current = self.cursor;
        self.cursor = self.list.prev[current as usize];
        Some(FrameNumber::new(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(list: &LruList) -> Vec<u32> {
        list.iter_from_lru().map(|f| f.as_u32()).collect()
    }

    #[test]
    fn push_touch_remove_keep_order() {
        let mut list = LruList::new(8);
        for i in 0..4 {
            list.push_mru(FrameNumber::new(i));
        }
        assert_eq!(order(&list), [0, 1, 2, 3]);

        list.touch(FrameNumber::new(0));
        assert_eq!(order(&list), [1, 2, 3, 0]);
        assert_eq!(list.lru(), Some(FrameNumber::new(1)));

        assert!(list.remove(FrameNumber::new(2)));
        assert!(!list.remove(FrameNumber::new(2)));
        assert_eq!(order(&list), [1, 3, 0]);
        assert_eq!(list.len(), 3);

        list.touch(FrameNumber::new(7));
        assert!(!list.contains(FrameNumber::new(7)));

        for f in [1, 3, 0] {
            list.remove(FrameNumber::new(f));
        }
        assert!(list.is_empty());
        assert_eq!(list.lru(), None);
    }
}
