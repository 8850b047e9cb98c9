// =============================================================================
// FORGE VM LOGGING - ZERO OVERHEAD
// =============================================================================
//
// Sistema de logging do núcleo de memória virtual com custo ZERO em release.
//
// ARQUITETURA:
// - Usa features do Cargo para compile-time filtering
// - Com feature "no_logs", TODOS os macros viram expressões vazias
// - SEM core::fmt - Evita geração de código SSE/AVX
// - SEM alocação - Apenas strings e valores hex
// - O destino é um LogSink registrado uma única vez pelo kernel hospedeiro
//   (serial, framebuffer, buffer de teste). Sem sink, os logs são descartados.
//
// NÍVEIS DE LOG (do mais crítico ao menos):
// - ERROR: Erros fatais ou críticos
// - WARN:  Situações suspeitas mas recuperáveis
// - INFO:  Fluxo normal de execução
// - DEBUG: Informações de debugging
// - TRACE: Detalhes extremos (cada fault, cada eviction)
//
// COMO USAR:
//   kinfo!("(PMM) Inicializando...");          // Apenas string
//   kinfo!("(PMM) Frames=", count);            // String + hex
//   klog!("Frame=", idx, " Gen=", generation); // Múltiplos valores
//
// =============================================================================

use spin::Once;

// =============================================================================
// SINK
// =============================================================================

/// Destino dos bytes de log.
///
/// Implementado pelo kernel (driver serial) ou pelos testes (stderr).
pub trait LogSink: Sync {
    fn write_str(&self, s: &str);
}

static SINK: Once<&'static dyn LogSink> = Once::new();

/// Registra o sink global. Apenas o primeiro registro vale.
pub fn set_sink(sink: &'static dyn LogSink) {
    SINK.call_once(|| sink);
}

/// Indica se algum sink já foi registrado.
pub fn has_sink() -> bool {
    SINK.get().is_some()
}

#[inline]
pub fn emit_str(s: &str) {
    if let Some(sink) = SINK.get() {
        sink.write_str(s);
    }
}

#[inline]
pub fn emit_nl() {
    emit_str("\n");
}

/// Formata `value` como `0x` + 16 dígitos hex minúsculos.
pub fn format_hex(value: u64) -> [u8; 18] {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";

    let mut buf = [0u8; 18];
    buf[0] = b'0';
    buf[1] = b'x';
    for i in 0..16 {
        let nibble = (value >> ((15 - i) * 4)) & 0xF;
        buf[2 + i] = DIGITS[nibble as usize];
    }
    buf
}

/// Emite um valor em hex, sem core::fmt.
pub fn emit_hex(value: u64) {
    let buf = format_hex(value);
    if let Ok(s) = core::str::from_utf8(&buf) {
        emit_str(s);
    }
}

// =============================================================================
// PREFIXOS COM CORES ANSI
// =============================================================================

pub const P_ERROR: &str = "\x1b[1;31m[ERRO]\x1b[0m ";
pub const P_WARN: &str = "\x1b[1;33m[WARN]\x1b[0m ";
pub const P_INFO: &str = "\x1b[32m[INFO]\x1b[0m ";
pub const P_DEBUG: &str = "\x1b[36m[DEBG]\x1b[0m ";
pub const P_TRACE: &str = "\x1b[35m[TRAC]\x1b[0m ";
pub const P_OK: &str = "\x1b[32m[OK]\x1b[0m ";
pub const P_FAIL: &str = "\x1b[1;31m[FAIL]\x1b[0m ";

// =============================================================================
// MACROS DE LOG - NÍVEL ERROR
// =============================================================================
//
// kerror! - Sempre ativo (exceto com no_logs)
//

#[cfg(not(feature = "no_logs"))]
#[macro_export]
macro_rules! kerror {
    ($msg:expr) => {{
        $crate::klib::logging::emit_str($crate::klib::logging::P_ERROR);
        $crate::klib::logging::emit_str($msg);
        $crate::klib::logging::emit_nl();
    }};
    ($msg:expr, $val:expr) => {{
        $crate::klib::logging::emit_str($crate::klib::logging::P_ERROR);
        $crate::klib::logging::emit_str($msg);
        $crate::klib::logging::emit_hex($val as u64);
        $crate::klib::logging::emit_nl();
    }};
}

#[cfg(feature = "no_logs")]
#[macro_export]
macro_rules! kerror {
    ($($t:tt)*) => {{}};
}

// =============================================================================
// MACROS DE LOG - NÍVEL WARN
// =============================================================================

#[cfg(not(feature = "no_logs"))]
#[macro_export]
macro_rules! kwarn {
    ($msg:expr) => {{
        $crate::klib::logging::emit_str($crate::klib::logging::P_WARN);
        $crate::klib::logging::emit_str($msg);
        $crate::klib::logging::emit_nl();
    }};
    ($msg:expr, $val:expr) => {{
        $crate::klib::logging::emit_str($crate::klib::logging::P_WARN);
        $crate::klib::logging::emit_str($msg);
        $crate::klib::logging::emit_hex($val as u64);
        $crate::klib::logging::emit_nl();
    }};
}

#[cfg(feature = "no_logs")]
#[macro_export]
macro_rules! kwarn {
    ($($t:tt)*) => {{}};
}

// =============================================================================
// MACROS DE LOG - NÍVEL INFO
// =============================================================================
//
// kinfo! - Ativo com log_info, log_debug ou log_trace
//

#[cfg(any(feature = "log_info", feature = "log_debug", feature = "log_trace"))]
#[macro_export]
macro_rules! kinfo {
    ($msg:expr) => {{
        $crate::klib::logging::emit_str($crate::klib::logging::P_INFO);
        $crate::klib::logging::emit_str($msg);
        $crate::klib::logging::emit_nl();
    }};
    ($msg:expr, $val:expr) => {{
        $crate::klib::logging::emit_str($crate::klib::logging::P_INFO);
        $crate::klib::logging::emit_str($msg);
        $crate::klib::logging::emit_hex($val as u64);
        $crate::klib::logging::emit_nl();
    }};
}

#[cfg(not(any(feature = "log_info", feature = "log_debug", feature = "log_trace")))]
#[macro_export]
macro_rules! kinfo {
    ($($t:tt)*) => {{}};
}

// =============================================================================
// MACROS DE LOG - NÍVEL DEBUG
// =============================================================================

#[cfg(any(feature = "log_debug", feature = "log_trace"))]
#[macro_export]
macro_rules! kdebug {
    ($msg:expr) => {{
        $crate::klib::logging::emit_str($crate::klib::logging::P_DEBUG);
        $crate::klib::logging::emit_str($msg);
        $crate::klib::logging::emit_nl();
    }};
    ($msg:expr, $val:expr) => {{
        $crate::klib::logging::emit_str($crate::klib::logging::P_DEBUG);
        $crate::klib::logging::emit_str($msg);
        $crate::klib::logging::emit_hex($val as u64);
        $crate::klib::logging::emit_nl();
    }};
}

#[cfg(not(any(feature = "log_debug", feature = "log_trace")))]
#[macro_export]
macro_rules! kdebug {
    ($($t:tt)*) => {{}};
}

// =============================================================================
// MACROS DE LOG - NÍVEL TRACE
// =============================================================================
//
// ktrace! - Apenas com log_trace. Usado no caminho quente (faults, LRU).
//

#[cfg(feature = "log_trace")]
#[macro_export]
macro_rules! ktrace {
    ($msg:expr) => {{
        $crate::klib::logging::emit_str($crate::klib::logging::P_TRACE);
        $crate::klib::logging::emit_str($msg);
        $crate::klib::logging::emit_nl();
    }};
    ($msg:expr, $val:expr) => {{
        $crate::klib::logging::emit_str($crate::klib::logging::P_TRACE);
        $crate::klib::logging::emit_str($msg);
        $crate::klib::logging::emit_hex($val as u64);
        $crate::klib::logging::emit_nl();
    }};
}

#[cfg(not(feature = "log_trace"))]
#[macro_export]
macro_rules! ktrace {
    ($($t:tt)*) => {{}};
}

// =============================================================================
// MACROS AUXILIARES
// =============================================================================
//
// klog! - Sequência de pares (string, valor) em uma linha, sem prefixo.
// kok! / kfail! - Marcadores usados pelo framework de testes.
//

#[cfg(not(feature = "no_logs"))]
#[macro_export]
macro_rules! klog {
    ($msg:expr) => {{
        $crate::klib::logging::emit_str($msg);
        $crate::klib::logging::emit_nl();
    }};
    ($($msg:expr, $val:expr),+ $(,)?) => {{
        $(
            $crate::klib::logging::emit_str($msg);
            $crate::klib::logging::emit_hex($val as u64);
        )+
        $crate::klib::logging::emit_nl();
    }};
}

#[cfg(feature = "no_logs")]
#[macro_export]
macro_rules! klog {
    ($($t:tt)*) => {{}};
}

#[cfg(not(feature = "no_logs"))]
#[macro_export]
macro_rules! kok {
    ($msg:expr) => {{
        $crate::klib::logging::emit_str($crate::klib::logging::P_OK);
        $crate::klib::logging::emit_str($msg);
        $crate::klib::logging::emit_nl();
    }};
}

#[cfg(feature = "no_logs")]
#[macro_export]
macro_rules! kok {
    ($($t:tt)*) => {{}};
}

#[cfg(not(feature = "no_logs"))]
#[macro_export]
macro_rules! kfail {
    ($msg:expr) => {{
        $crate::klib::logging::emit_str($crate::klib::logging::P_FAIL);
        $crate::klib::logging::emit_str($msg);
        $crate::klib::logging::emit_nl();
    }};
}

#[cfg(feature = "no_logs")]
#[macro_export]
macro_rules! kfail {
    ($($t:tt)*) => {{}};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_fixed_width() {
        assert_eq!(&format_hex(0xdead_beef), b"0x00000000deadbeef");
        assert_eq!(&format_hex(u64::MAX), b"0xffffffffffffffff");
        assert_eq!(&format_hex(0), b"0x0000000000000000");
    }
}
