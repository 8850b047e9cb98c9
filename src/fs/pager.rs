//! # Pager
//!
//! Contrato entre o MM e o backing storage de objetos (arquivos). O MM
//! chama o pager sem nenhum lock segurado; o frame envolvido está em
//! `BusyIo` e pertence exclusivamente à operação.

/// Identidade de um objeto de backing (inode, arquivo do initramfs...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u64);

/// Falha reportada pelo storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerError {
    /// Objeto desconhecido pelo pager
    NoSuchObject,
    /// Dispositivo falhou
    Io,
}

pub trait Pager: Send + Sync {
    /// Preenche `buf` (uma página) com o conteúdo de `object` em `offset`.
    fn fetch_page(&self, object: ObjectId, offset: u64, buf: &mut [u8]) -> Result<(), PagerError>;

    /// Grava uma página suja de volta no storage.
    fn writeback_page(&self, object: ObjectId, offset: u64, data: &[u8]) -> Result<(), PagerError>;
}
