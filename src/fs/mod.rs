//! Backing storage visto pelo MM.
//!
//! Submódulos:
//! - `pager`: Trait `Pager` e identidades de objeto.
//! - `tmpfs`: Pager em memória (boot e testes).

pub mod pager;
pub mod tmpfs;

pub use pager::{ObjectId, Pager, PagerError};
pub use tmpfs::MemPager;
