//! # Testes do Subsistema de Memória
//!
//! Cada arquivo exporta uma tabela de `TestCase` que roda sobre um
//! `MemoryManager` próprio (ver `harness`), então as suites não dependem
//! do estado do kernel hospedeiro:
//! - `pfm_test.rs` - Alocação, free, wire
//! - `aspace_test.rs` - Regiões e lookup
//! - `fault_test.rs` - Entrada de fault, proteção, zero-fill
//! - `cow_test.rs` - Fork e copy-on-write
//! - `cache_test.rs` - Page cache e writeback
//! - `reclaim_test.rs` - Eviction LRU
//!
//! No boot (feature `self_test`) `run_memory_tests` executa tudo; em
//! `cargo test` cada suite vira um `#[test]`.

pub mod harness;

pub mod reclaim_test;


use crate::klib::test_framework::{run_test_suite, SuiteReport, TestCase};

/// Todas as suites, na ordem de execução.
pub const SUITES: &[(&str, &[TestCase])] = &[
    ("PFM", pfm_test::PFM_TESTS),
    ("Address Space", aspace_test::ASPACE_TESTS),
    ("Page Fault", fault_test::FAULT_TESTS),
    ("Copy-on-Write", cow_test::COW_TESTS),
    ("Page Cache", cache_test::CACHE_TESTS),
    ("Reclaim", reclaim_test::RECLAIM_TESTS),
];

/// Executa todos os testes de memória e soma os resultados.
pub fn run_memory_tests() -> SuiteReport {
    crate::kinfo!("╔════════════════════════════════════════╗");
    crate::kinfo!("║     🧪 TESTES DE MEMÓRIA               ║");
    crate::kinfo!("╚════════════════════════════════════════╝");

    let mut total = SuiteReport::default();
    for (name, suite) in SUITES {
        let report = run_test_suite(name, suite);
        total.passed += report.passed;
        total.failed += report.failed;
        total.skipped += report.skipped;
    }

    if total.failed == 0 {
        crate::kok!("(MM) Todos os testes de memória passaram");
    } else {
        crate::kerror!("(MM) Testes de memória falharam:", total.failed);
    }
    total
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::harness::{boot, boot_with, boot_with_pager, patterned_object, va, PAGE};
    use super::*;
    use crate::fs::{MemPager, ObjectId, Pager, PagerError};
    use crate::mm::AddressSpace;
    use crate::klib::test_framework::install_test_sink;
    use crate::mm::aspace::Protection;
    use crate::mm::config::MmConfig;
    use crate::mm::error::MmError;
    use crate::mm::fault::AccessType;
    use crate::mm::pfm::FrameNumber;
    use crate::sync::{LockBudget, LockPolicy};

    fn assert_suite(name: &str, suite: &[TestCase]) {
        install_test_sink();
        let report = run_test_suite(name, suite);
        assert_eq!(report.failed, 0, "suite {name} teve falhas");
        assert_eq!(report.passed, suite.len());
    }

    #[test]
    fn pfm_suite() {
        assert_suite("PFM", pfm_test::PFM_TESTS);
    }

    #[test]
    fn aspace_suite() {
        assert_suite("Address Space", aspace_test::ASPACE_TESTS);
    }

    #[test]
    fn fault_suite() {
        assert_suite("Page Fault", fault_test::FAULT_TESTS);
    }

    #[test]
    fn cow_suite() {
        assert_suite("Copy-on-Write", cow_test::COW_TESTS);
    }

    #[test]
    fn cache_suite() {
        assert_suite("Page Cache", cache_test::CACHE_TESTS);
    }

    #[test]
    fn reclaim_suite() {
        assert_suite("Reclaim", reclaim_test::RECLAIM_TESTS);
    }

    #[test]
    fn boot_runner_counts_every_case() {
        install_test_sink();
        let total = run_memory_tests();
        let cases: usize = SUITES.iter().map(|(_, suite)| suite.len()).sum();
        assert_eq!(total.passed, cases);
        assert_eq!(total.failed, 0);
    }

    // =========================================================================
    // WRITEBACK SEM LOCKS
    // =========================================================================

    /// Pager que anota se o address space observado estava travado
    /// quando o MM pediu um writeback.
    struct WritebackSpy {
        inner: Arc<MemPager>,
        watched: spin::Once<Arc<AddressSpace>>,
        calls: AtomicUsize,
        locked_calls: AtomicUsize,
    }

    impl Pager for WritebackSpy {
        fn fetch_page(&self, object: ObjectId, offset: u64, buf: &mut [u8]) -> Result<(), PagerError> {
            self.inner.fetch_page(object, offset, buf)
        }

        fn writeback_page(&self, object: ObjectId, offset: u64, data: &[u8]) -> Result<(), PagerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.watched.get().is_some_and(|space| space.is_locked()) {
                self.locked_calls.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.writeback_page(object, offset, data)
        }
    }

    #[test]
    fn fault_eviction_writes_back_without_aspace_lock() {
        install_test_sink();
        let mut spy = None;
        let rig = boot_with_pager(2, MmConfig::new(), |pager| {
            let made = Arc::new(WritebackSpy {
                inner: pager,
                watched: spin::Once::new(),
                calls: AtomicUsize::new(0),
                locked_calls: AtomicUsize::new(0),
            });
            spy = Some(made.clone());
            made as Arc<dyn Pager>
        })
        .expect("boot");
        let spy = spy.expect("spy instalado");
        let mm = &rig.mm;
        let object = ObjectId(7);
        patterned_object(&rig, object, 1, 0);

        let space = mm.create_address_space().expect("aspace");
        spy.watched.call_once(|| space.clone());
        space
            .map_object(mm, va(0), PAGE, Protection::RW, object, 0)
            .expect("map objeto");
        space.write(mm, va(0), b"suja").expect("escrita");
        space.remove_region(mm, va(0)).expect("remoção");

        // Duas páginas anônimas em dois frames: a segunda só cabe evictando
        // a página suja do cache, com o fault ainda em andamento.
        space.map_anonymous(mm, va(4), 2 * PAGE, Protection::RW).expect("map anônimo");
        space.write(mm, va(4), b"a").expect("página 0");
        space.write(mm, va(5), b"b").expect("página 1");

        assert_eq!(spy.calls.load(Ordering::SeqCst), 1);
        assert_eq!(spy.locked_calls.load(Ordering::SeqCst), 0);
        let stats = mm.stats();
        assert_eq!(stats.writebacks, 1);
        assert_eq!(stats.evictions, 1);
        let stored = rig.pager.page(object, 0).expect("página no storage");
        assert_eq!(&stored[..4], b"suja");
        assert!(crate::mm::debug::verify_all(mm));
    }

    #[test]
    fn allocate_frame_writes_back_dirty_page() {
        install_test_sink();
        let rig = boot(1).expect("boot");
        let mm = &rig.mm;
        let object = ObjectId(8);
        patterned_object(&rig, object, 1, 0);

        let space = mm.create_address_space().expect("aspace");
        space
            .map_object(mm, va(0), PAGE, Protection::RW, object, 0)
            .expect("map");
        space.write(mm, va(0), b"kern").expect("escrita");
        space.remove_region(mm, va(0)).expect("remoção");

        let frame = mm.allocate_frame().expect("frame após eviction");
        assert_eq!(mm.stats().writebacks, 1);
        assert!(mm.cache_find(object, 0).is_none());
        assert_eq!(&rig.pager.page(object, 0).expect("storage")[..4], b"kern");
        mm.free_frame(frame);
    }

    // =========================================================================
    // CONCORRÊNCIA
    // =========================================================================

    #[test]
    fn concurrent_faults_fetch_once() {
        install_test_sink();
        let rig = boot(8).expect("boot");
        let object = ObjectId(1);
        patterned_object(&rig, object, 1, 0x70);
        rig.pager.set_fetch_delay(2_000_000);

        let spaces: std::vec::Vec<_> = (0..4)
            .map(|_| {
                let space = rig.mm.create_address_space().expect("aspace");
                space
                    .map_object(&rig.mm, va(0), PAGE, Protection::READ, object, 0)
                    .expect("map");
                space
            })
            .collect();

        let barrier = Barrier::new(spaces.len());
        let frames: std::vec::Vec<FrameNumber> = thread::scope(|s| {
            let handles: std::vec::Vec<_> = spaces
                .iter()
                .map(|space| {
                    let (rig, barrier) = (&rig, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        space.handle_fault(&rig.mm, va(0), AccessType::Read).expect("fault")
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("thread")).collect()
        });

        assert_eq!(rig.pager.fetch_count(), 1);
        assert!(frames.iter().all(|f| *f == frames[0]));
        assert_eq!(rig.mm.frame_snapshot(frames[0]).share_count, 4);
        assert!(crate::mm::debug::verify_all(&rig.mm));
    }

    #[test]
    fn concurrent_faults_all_see_io_error() {
        install_test_sink();
        let rig = boot(8).expect("boot");
        let object = ObjectId(2);
        patterned_object(&rig, object, 1, 0);
        rig.pager.fail_reads(object, 0);
        rig.pager.set_fetch_delay(2_000_000);

        let space = rig.mm.create_address_space().expect("aspace");
        space
            .map_object(&rig.mm, va(0), PAGE, Protection::READ, object, 0)
            .expect("map");

        let barrier = Barrier::new(3);
        let results: std::vec::Vec<_> = thread::scope(|s| {
            let handles: std::vec::Vec<_> = (0..3)
                .map(|_| {
                    let (rig, space, barrier) = (&rig, &space, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        space.handle_fault(&rig.mm, va(0), AccessType::Read)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("thread")).collect()
        });

        assert!(results.iter().all(|r| *r == Err(MmError::IoError)));
        assert_eq!(rig.mm.frames().free_count(), 8);
        assert!(rig.mm.cache_find(object, 0).is_none());
    }

    #[test]
    fn concurrent_writers_on_forked_space() {
        install_test_sink();
        let rig = boot(16).expect("boot");
        let parent = rig.mm.create_address_space().expect("aspace");
        parent
            .map_anonymous(&rig.mm, va(0), 4 * PAGE, Protection::RW)
            .expect("map");
        for page in 0..4 {
            parent.write(&rig.mm, va(page), &[page as u8]).expect("write");
        }
        let child = parent.fork(&rig.mm).expect("fork");

        thread::scope(|s| {
            for (space, tag) in [(&parent, 0xA0u8), (&child, 0xB0u8)] {
                let rig = &rig;
                s.spawn(move || {
                    for page in 0..4 {
                        space.write(&rig.mm, va(page), &[tag + page as u8]).expect("write");
                    }
                });
            }
        });

        for page in 0..4 {
            let mut p = [0u8];
            let mut c = [0u8];
            parent.read(&rig.mm, va(page), &mut p).expect("read");
            child.read(&rig.mm, va(page), &mut c).expect("read");
            assert_eq!(p[0], 0xA0 + page as u8);
            assert_eq!(c[0], 0xB0 + page as u8);
        }
        assert!(crate::mm::debug::verify_all(&rig.mm));
    }

    // =========================================================================
    // VIOLAÇÕES FATAIS
    // =========================================================================

    #[test]
    #[should_panic(expected = "frame freed while wired")]
    fn free_of_wired_frame_is_fatal() {
        let rig = boot(2).expect("boot");
        let frame = rig.mm.allocate_frame().expect("alloc");
        rig.mm.wire(frame);
        rig.mm.free_frame(frame);
    }

    #[test]
    #[should_panic(expected = "double free of frame")]
    fn double_free_is_fatal() {
        let rig = boot(2).expect("boot");
        let frame = rig.mm.allocate_frame().expect("alloc");
        rig.mm.free_frame(frame);
        rig.mm.free_frame(frame);
    }

    #[test]
    #[should_panic(expected = "frame freed while mapped")]
    fn free_of_mapped_frame_is_fatal() {
        let rig = boot(2).expect("boot");
        let space = rig.mm.create_address_space().expect("aspace");
        space
            .map_anonymous(&rig.mm, va(0), PAGE, Protection::RW)
            .expect("map");
        let frame = space.handle_fault(&rig.mm, va(0), AccessType::Write).expect("fault");
        rig.mm.free_frame(frame);
    }

    #[test]
    #[should_panic(expected = "wire of a free frame")]
    fn wire_of_free_frame_is_fatal() {
        let rig = boot(2).expect("boot");
        rig.mm.wire(FrameNumber::new(0));
    }

    #[test]
    #[should_panic(expected = "unwire below zero")]
    fn unwire_below_zero_is_fatal() {
        let rig = boot(2).expect("boot");
        let frame = rig.mm.allocate_frame().expect("alloc");
        rig.mm.unwire(frame);
    }

    #[test]
    #[should_panic(expected = "lock spin budget exhausted")]
    fn exhausted_lock_budget_is_fatal() {
        let budget = LockBudget::new(1_000, LockPolicy::Fatal);
        let rig = boot_with(2, MmConfig::new().with_lock_budget(budget)).expect("boot");
        let _lists = rig.mm.pfm.lists();
        // Re-entrada no mesmo lock nunca termina: o orçamento tem que pegar.
        rig.mm.frames().free_count();
    }
}
