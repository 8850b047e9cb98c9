//! Tipos de Erro do Subsistema de Memória
//!
//! Erros recuperáveis viram `MmError`. Violações de invariantes internas
//! (free de frame ainda referenciado, orçamento de lock esgotado) não são
//! erros: vão para `fatal`.

/// Erros do subsistema de memória
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    /// Sem frame livre nem reclamável (OOM)
    OutOfMemory,
    /// Endereço fora de qualquer região, fora da faixa do address space,
    /// ou região sobreposta a outra
    InvalidAddress,
    /// Acesso não permitido pela proteção da região
    ProtectionViolation,
    /// Falha de leitura no backing storage
    IoError,
    /// Endereço não alinhado a página
    NotAligned,
    /// Tamanho inválido (zero ou além da unit)
    InvalidSize,
    /// Já existe entrada no page cache para (objeto, offset)
    AlreadyCached,
}

impl MmError {
    /// Retorna descrição legível do erro
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfMemory => "OOM: sem frames livres ou reclamáveis",
            Self::InvalidAddress => "Endereço inválido",
            Self::ProtectionViolation => "Violação de proteção",
            Self::IoError => "Erro de I/O no backing storage",
            Self::NotAligned => "Endereço não alinhado a página",
            Self::InvalidSize => "Tamanho inválido",
            Self::AlreadyCached => "Página já presente no page cache",
        }
    }
}

impl core::fmt::Display for MmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tipo Result específico para operações de memória
pub type MmResult<T> = Result<T, MmError>;

/// Violação de invariante: loga e derruba o kernel.
#[cold]
#[track_caller]
pub fn fatal(msg: &'static str) -> ! {
    crate::kerror!("(MM) Violação fatal de invariante:");
    crate::kerror!(msg);
    panic!("{}", msg)
}
