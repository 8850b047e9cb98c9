//! Ambiente de teste: um `MemoryManager` completo sobre "RAM" alocada do
//! heap do kernel (ou do host, em `cargo test`).

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;

use crate::fs::{MemPager, ObjectId, Pager};
use crate::mm::addr::VirtAddr;
use crate::mm::config::{MmConfig, PAGE_SIZE};
use crate::mm::error::MmResult;
use crate::mm::heap::KernelHeap;
use crate::mm::hhdm::DirectMap;
use crate::mm::pmm::MemoryRegion;
use crate::mm::MemoryManager;
use crate::sched::SpinScheduler;

/// Endereço físico onde a RAM de teste começa
pub const RAM_BASE: u64 = 0x10_0000;

/// Heap de metadados de cada ambiente
pub const HEAP_BYTES: usize = 128 * 1024;

/// Base das regiões de usuário dos testes
pub const USER_BASE: u64 = 0x4000_0000;

pub const PAGE: u64 = PAGE_SIZE as u64;

pub struct Rig {
    pub mm: MemoryManager,
    pub pager: Arc<MemPager>,
    pub sched: Arc<SpinScheduler>,
}

/// MM com `frames` frames utilizáveis.
pub fn boot(frames: usize) -> MmResult<Rig> {
    boot_with(frames, MmConfig::new())
}

pub fn boot_with(frames: usize, config: MmConfig) -> MmResult<Rig> {
    boot_with_pager(frames, config, |pager| pager as Arc<dyn Pager>)
}

/// Como `boot_with`, mas o MM fala com o pager devolvido por `wrap`
/// (que recebe o `MemPager` do ambiente).
pub fn boot_with_pager(
    frames: usize,
    config: MmConfig,
    wrap: impl FnOnce(Arc<MemPager>) -> Arc<dyn Pager>,
) -> MmResult<Rig> {
    let ram: &'static mut [u8] = Box::leak(vec![0u8; frames * PAGE_SIZE].into_boxed_slice());
    let ram_len = ram.len() as u64;
    // SAFETY: o mapa abaixo só descreve faixas dentro do buffer.
    let hhdm = unsafe { DirectMap::for_buffer(ram, RAM_BASE) };
    let heap = KernelHeap::from_region(Box::leak(vec![0u8; HEAP_BYTES].into_boxed_slice()));

    let map = [
        MemoryRegion::reserved(0, RAM_BASE),
        MemoryRegion::usable(RAM_BASE, ram_len),
    ];
    let pager = Arc::new(MemPager::new());
    let sched = Arc::new(SpinScheduler::new());
    let mm = MemoryManager::new(&map, hhdm, heap, wrap(pager.clone()), sched.clone(), config)?;
    Ok(Rig { mm, pager, sched })
}

/// Endereço virtual da página `page` da área de teste.
pub fn va(page: u64) -> VirtAddr {
    VirtAddr::new(USER_BASE + page * PAGE)
}

/// Objeto de `pages` páginas; a página `i` é preenchida com o byte `seed + i`.
pub fn patterned_object(rig: &Rig, object: ObjectId, pages: usize, seed: u8) {
    let mut contents = vec![0u8; pages * PAGE_SIZE];
    for (i, page) in contents.chunks_mut(PAGE_SIZE).enumerate() {
        page.fill(seed.wrapping_add(i as u8));
    }
    rig.pager.create(object, &contents);
}

/// Primeiro byte da página em `addr`.
pub fn peek(rig: &Rig, space: &crate::mm::AddressSpace, addr: VirtAddr) -> MmResult<u8> {
    let mut byte = [0u8; 1];
    space.read(&rig.mm, addr, &mut byte)?;
    Ok(byte[0])
}
