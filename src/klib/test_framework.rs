//! Framework de testes do kernel
//!
//! Suites são tabelas `&[TestCase]` executadas por `run_test_suite`. No boot
//! (feature `self_test`) o kernel hospedeiro as roda direto; em `cargo test`
//! cada suite vira um `#[test]` que exige zero falhas.

/// Resultado de teste
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestResult {
    Passed,
    Failed,
    Skipped,
}

/// Um caso de teste
pub struct TestCase {
    pub name: &'static str,
    pub func: fn() -> TestResult,
}

impl TestCase {
    pub const fn new(name: &'static str, func: fn() -> TestResult) -> Self {
        Self { name, func }
    }
}

/// Contagem de uma suite executada
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuiteReport {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Executa suite de testes
pub fn run_test_suite(name: &str, tests: &[TestCase]) -> SuiteReport {
    crate::kinfo!("=== Executando suite:");
    crate::kinfo!(name);

    let mut report = SuiteReport::default();

    for test in tests {
        match (test.func)() {
            TestResult::Passed => {
                crate::kok!(test.name);
                report.passed += 1;
            }
            TestResult::Failed => {
                crate::kfail!(test.name);
                report.failed += 1;
            }
            TestResult::Skipped => {
                crate::kwarn!("[SKIP] ");
                crate::kwarn!(test.name);
                report.skipped += 1;
            }
        }
    }

    crate::kinfo!("Resultados: passed=", report.passed);
    if report.failed > 0 {
        crate::kerror!("Resultados: failed=", report.failed);
    }
    report
}

/// Falha o caso de teste atual se a condição não vale.
#[macro_export]
macro_rules! kassert {
    ($cond:expr, $msg:expr) => {
        if !$cond {
            $crate::kerror!($msg);
            return $crate::klib::test_framework::TestResult::Failed;
        }
    };
    ($cond:expr, $msg:expr, $val:expr) => {
        if !$cond {
            $crate::kerror!($msg, $val);
            return $crate::klib::test_framework::TestResult::Failed;
        }
    };
}

/// Desembrulha um `Result`/`Option` ou falha o caso de teste atual.
#[macro_export]
macro_rules! ktry {
    ($expr:expr, $msg:expr) => {
        match $crate::klib::test_framework::Outcome::into_option($expr) {
            Some(value) => value,
            None => {
                $crate::kerror!($msg);
                return $crate::klib::test_framework::TestResult::Failed;
            }
        }
    };
}

/// Uniformiza `Result` e `Option` para o `ktry!`.
pub trait Outcome<T> {
    fn into_option(self) -> Option<T>;
}

impl<T> Outcome<T> for Option<T> {
    fn into_option(self) -> Option<T> {
        self
    }
}

impl<T, E> Outcome<T> for Result<T, E> {
    fn into_option(self) -> Option<T> {
        self.ok()
    }
}

// =============================================================================
// SINK DE TESTE (host)
// =============================================================================

#[cfg(test)]
struct StderrSink;

#[cfg(test)]
impl crate::klib::logging::LogSink for StderrSink {
    fn write_str(&self, s: &str) {
        std::eprint!("{}", s);
    }
}

/// Direciona os logs para o stderr do harness de testes.
#[cfg(test)]
pub fn install_test_sink() {
    static SINK: StderrSink = StderrSink;
    crate::klib::logging::set_sink(&SINK);
}
