//! Kernel Library (KLib).
//!
//! Utilitários agnósticos de hardware usados pelo núcleo de memória:
//! logging zero-overhead e o framework de self-test.

pub mod logging;
pub mod test_framework;
