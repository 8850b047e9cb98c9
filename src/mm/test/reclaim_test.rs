//! Testes de eviction (ordem LRU, wire, anônimos, writeback)

use alloc::vec::Vec;

use super::harness::{boot, patterned_object, peek, va, Rig, PAGE};
use crate::fs::ObjectId;
use crate::klib::test_framework::{TestCase, TestResult};
use crate::mm::aspace::{AddressSpace, Protection};
use crate::mm::debug;
use crate::mm::error::{MmError, MmResult};
use crate::mm::fault::AccessType;
use crate::mm::pfm::{FrameNumber, FrameState};
use crate::mm::reclaim::{MemoryPressure, MemoryWatermarks};

pub const RECLAIM_TESTS: &[TestCase] = &[
    TestCase::new("reclaim_evicts_least_recently_used", test_lru_order),
    TestCase::new("reclaim_skips_wired_frames", test_wired_skipped),
    TestCase::new("reclaim_never_evicts_anonymous", test_anonymous_oom),
    TestCase::new("reclaim_dirty_page_round_trip", test_dirty_round_trip),
    TestCase::new("reclaim_writeback_failure_keeps_page", test_writeback_failure),
    TestCase::new("reclaim_pressure_levels", test_pressure),
];

const OBJECT: ObjectId = ObjectId(42);

/// Lê a página `page` do objeto por uma região temporária e a desmapeia:
/// o frame fica só no cache, elegível para eviction.
fn touch_unmapped(rig: &Rig, space: &AddressSpace, page: u64) -> MmResult<FrameNumber> {
    let mm = &rig.mm;
    space.map_object(mm, va(page), PAGE, Protection::RW, OBJECT, page * PAGE)?;
    let frame = space.handle_fault(mm, va(page), AccessType::Read);
    space.remove_region(mm, va(page))?;
    frame
}

fn test_lru_order() -> TestResult {
    let rig = crate::ktry!(boot(4), "(Evict) boot falhou");
    let mm = &rig.mm;
    patterned_object(&rig, OBJECT, 6, 0);
    let space = crate::ktry!(mm.create_address_space(), "(Evict) criação falhou");

    let mut frames = Vec::new();
    for page in 0..4u64 {
        frames.push(crate::ktry!(touch_unmapped(&rig, &space, page), "(Evict) leitura falhou"));
    }
    crate::kassert!(mm.frames().free_count() == 0, "(Evict) RAM deveria estar cheia");

    // Página 0 volta a ser a mais recente.
    let again = crate::ktry!(touch_unmapped(&rig, &space, 0), "(Evict) releitura falhou");
    crate::kassert!(again == frames[0], "(Evict) Releitura não veio do cache");
    crate::kassert!(
        mm.frames().lru_order() == [frames[1], frames[2], frames[3], frames[0]],
        "(Evict) Ordem LRU inesperada"
    );

    crate::ktry!(touch_unmapped(&rig, &space, 4), "(Evict) leitura da página 4 falhou");
    crate::kassert!(mm.cache_find(OBJECT, PAGE).is_none(), "(Evict) Página 1 deveria sair primeiro");
    crate::kassert!(mm.cache_find(OBJECT, 0) == Some(frames[0]), "(Evict) Página tocada foi evictada");

    crate::ktry!(touch_unmapped(&rig, &space, 5), "(Evict) leitura da página 5 falhou");
    crate::kassert!(mm.cache_find(OBJECT, 2 * PAGE).is_none(), "(Evict) Página 2 deveria sair em seguida");
    crate::kassert!(mm.cache_find(OBJECT, 3 * PAGE).is_some(), "(Evict) Página 3 saiu fora de ordem");

    let stats = mm.stats();
    crate::kassert!(stats.evictions == 2, "(Evict) evictions", stats.evictions);
    crate::kassert!(stats.writebacks == 0, "(Evict) Páginas limpas gravadas", stats.writebacks);
    crate::kassert!(debug::verify_all(mm), "(Evict) Integridade após eviction");
    TestResult::Passed
}

fn test_wired_skipped() -> TestResult {
    let rig = crate::ktry!(boot(2), "(Evict) boot falhou");
    let mm = &rig.mm;
    patterned_object(&rig, OBJECT, 4, 0);
    let space = crate::ktry!(mm.create_address_space(), "(Evict) criação falhou");

    let wired = crate::ktry!(touch_unmapped(&rig, &space, 0), "(Evict) leitura falhou");
    crate::ktry!(touch_unmapped(&rig, &space, 1), "(Evict) leitura falhou");
    mm.wire(wired);

    // O wired é o mais antigo, mas a vítima tem que ser a página 1.
    crate::ktry!(space.map_object(mm, va(2), PAGE, Protection::READ, OBJECT, 2 * PAGE), "(Evict) map falhou");
    crate::ktry!(space.handle_fault(mm, va(2), AccessType::Read), "(Evict) leitura da página 2 falhou");
    crate::kassert!(mm.cache_find(OBJECT, 0) == Some(wired), "(Evict) Frame wired evictado");
    crate::kassert!(mm.cache_find(OBJECT, PAGE).is_none(), "(Evict) Página 1 não evictada");

    // Wired + página mapeada: nada reclamável.
    crate::ktry!(space.map_object(mm, va(3), PAGE, Protection::READ, OBJECT, 3 * PAGE), "(Evict) map falhou");
    crate::kassert!(
        space.handle_fault(mm, va(3), AccessType::Read) == Err(MmError::OutOfMemory),
        "(Evict) Deveria ser OOM com tudo wired ou mapeado"
    );
    crate::kassert!(mm.frame_snapshot(wired).state == FrameState::ResidentCached, "(Evict) Wired mudou de estado");

    mm.unwire(wired);
    crate::kassert!(crate::ktry!(peek(&rig, &space, va(3)), "(Evict) peek falhou") == 3, "(Evict) Conteúdo da página 3");
    crate::kassert!(mm.cache_find(OBJECT, 0).is_none(), "(Evict) Unwire não tornou o frame elegível");
    TestResult::Passed
}

/// Sem backing storage, página anônima não tem para onde ir.
fn test_anonymous_oom() -> TestResult {
    let rig = crate::ktry!(boot(2), "(Evict) boot falhou");
    let mm = &rig.mm;
    let space = crate::ktry!(mm.create_address_space(), "(Evict) criação falhou");
    crate::ktry!(space.map_anonymous(mm, va(0), 3 * PAGE, Protection::RW), "(Evict) map falhou");

    crate::ktry!(space.write(mm, va(0), b"a"), "(Evict) escrita 0 falhou");
    crate::ktry!(space.write(mm, va(1), b"b"), "(Evict) escrita 1 falhou");
    crate::kassert!(space.write(mm, va(2), b"c") == Err(MmError::OutOfMemory), "(Evict) Anônimo evictado");
    crate::kassert!(crate::ktry!(peek(&rig, &space, va(0)), "(Evict) peek") == b'a', "(Evict) Página 0 perdida");

    let stats = mm.stats();
    crate::kassert!(stats.evictions == 0, "(Evict) evictions", stats.evictions);
    crate::kassert!(stats.oom == 1, "(Evict) oom", stats.oom);

    crate::ktry!(space.remove_region(mm, va(0)), "(Evict) remoção falhou");
    crate::kassert!(mm.frames().free_count() == 2, "(Evict) Frames anônimos não liberados");
    TestResult::Passed
}

fn test_dirty_round_trip() -> TestResult {
    let rig = crate::ktry!(boot(2), "(Evict) boot falhou");
    let mm = &rig.mm;
    patterned_object(&rig, OBJECT, 3, 0x20);
    let space = crate::ktry!(mm.create_address_space(), "(Evict) criação falhou");

    crate::ktry!(space.map_object(mm, va(0), PAGE, Protection::RW, OBJECT, 0), "(Evict) map falhou");
    crate::ktry!(space.write(mm, va(0), &[0xAB; 16]), "(Evict) escrita falhou");
    crate::ktry!(space.remove_region(mm, va(0)), "(Evict) remoção falhou");

    crate::ktry!(space.map_object(mm, va(1), 2 * PAGE, Protection::READ, OBJECT, PAGE), "(Evict) map falhou");
    crate::ktry!(space.handle_fault(mm, va(1), AccessType::Read), "(Evict) leitura da página 1 falhou");
    // Sem frame livre: a página 0 suja é gravada e evictada.
    crate::ktry!(space.handle_fault(mm, va(2), AccessType::Read), "(Evict) leitura da página 2 falhou");

    let stored = crate::ktry!(rig.pager.page(OBJECT, 0), "(Evict) página sumiu do storage");
    crate::kassert!(stored[..16].iter().all(|b| *b == 0xAB), "(Evict) Writeback não gravou o conteúdo");
    crate::kassert!(mm.cache_find(OBJECT, 0).is_none(), "(Evict) Página suja não saiu do cache");
    let stats = mm.stats();
    crate::kassert!(stats.writebacks == 1, "(Evict) writebacks", stats.writebacks);
    crate::kassert!(stats.evictions == 1, "(Evict) evictions", stats.evictions);

    // Volta do storage com a escrita.
    crate::ktry!(space.remove_region(mm, va(1)), "(Evict) remoção falhou");
    crate::ktry!(space.map_object(mm, va(0), PAGE, Protection::READ, OBJECT, 0), "(Evict) map falhou");
    crate::kassert!(crate::ktry!(peek(&rig, &space, va(0)), "(Evict) peek falhou") == 0xAB, "(Evict) Escrita perdida");
    TestResult::Passed
}

fn test_writeback_failure() -> TestResult {
    let rig = crate::ktry!(boot(1), "(Evict) boot falhou");
    let mm = &rig.mm;
    patterned_object(&rig, OBJECT, 2, 0x30);
    let space = crate::ktry!(mm.create_address_space(), "(Evict) criação falhou");

    crate::ktry!(space.map_object(mm, va(0), PAGE, Protection::RW, OBJECT, 0), "(Evict) map falhou");
    crate::ktry!(space.write(mm, va(0), b"suja"), "(Evict) escrita falhou");
    let frame = crate::ktry!(space.handle_fault(mm, va(0), AccessType::Read), "(Evict) fault falhou");
    crate::ktry!(space.remove_region(mm, va(0)), "(Evict) remoção falhou");

    rig.pager.fail_writes(OBJECT);
    crate::ktry!(space.map_object(mm, va(1), PAGE, Protection::READ, OBJECT, PAGE), "(Evict) map falhou");
    crate::kassert!(
        space.handle_fault(mm, va(1), AccessType::Read) == Err(MmError::OutOfMemory),
        "(Evict) Página suja evictada sem writeback"
    );
    let snap = mm.frame_snapshot(frame);
    crate::kassert!(snap.state == FrameState::ResidentCached, "(Evict) Estado após falha");
    crate::kassert!(snap.dirty, "(Evict) Página perdeu o dirty");
    crate::kassert!(mm.cache_find(OBJECT, 0) == Some(frame), "(Evict) Página saiu do cache");
    crate::kassert!(mm.stats().writeback_failures == 1, "(Evict) writeback_failures");

    rig.pager.heal_writes(OBJECT);
    crate::kassert!(crate::ktry!(peek(&rig, &space, va(1)), "(Evict) peek falhou") == 0x31, "(Evict) Página 1");
    let stored = crate::ktry!(rig.pager.page(OBJECT, 0), "(Evict) página sumiu do storage");
    crate::kassert!(&stored[..4] == b"suja", "(Evict) Escrita perdida após curar");
    TestResult::Passed
}

fn test_pressure() -> TestResult {
    let rig = crate::ktry!(boot(10), "(Evict) boot falhou");
    let mm = &rig.mm;
    crate::kassert!(mm.pressure() == MemoryPressure::None, "(Evict) Pressão com RAM livre");

    let mut frames = Vec::new();
    for _ in 0..9 {
        frames.push(crate::ktry!(mm.allocate_frame(), "(Evict) alocação falhou"));
    }
    crate::kassert!(mm.pressure() == MemoryPressure::Medium, "(Evict) 10% livre deveria ser Medium");
    frames.push(crate::ktry!(mm.allocate_frame(), "(Evict) alocação falhou"));
    crate::kassert!(mm.pressure() == MemoryPressure::Critical, "(Evict) Sem RAM livre deveria ser Critical");

    let marks = MemoryWatermarks::default();
    crate::kassert!(marks.pressure(20, 100) == MemoryPressure::Low, "(Evict) 20% livre deveria ser Low");

    for frame in frames {
        mm.free_frame(frame);
    }
    TestResult::Passed
}
