//! # Endereços
//!
//! Newtypes para endereços físicos e virtuais. Nunca misture os dois:
//! o único caminho físico → ponteiro é o `DirectMap`.

mod phys;
mod virt;

pub use phys::PhysAddr;
pub use virt::VirtAddr;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_helpers() {
        let va = VirtAddr::new(0x4000_1234);
        assert_eq!(va.page_base(), VirtAddr::new(0x4000_1000));
        assert_eq!(va.page_offset(), 0x234);
        assert!(!va.is_page_aligned());
        assert_eq!(VirtAddr::new(u64::MAX).checked_add(1), None);
        assert_eq!(PhysAddr::new(0x1001).align_up(0x1000), PhysAddr::new(0x2000));
        assert_eq!(PhysAddr::new(0x1fff).align_down(0x1000), PhysAddr::new(0x1000));
    }
}
