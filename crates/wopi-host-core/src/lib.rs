//! Lock-governed file access engine for a WOPI host.
//!
//! This crate holds everything the protocol endpoints need apart from HTTP:
//! - `StorageGateway`: head/get/put over the backing object store
//! - `LockManager`: per-document lock state with lazy TTL expiry
//! - `FileInfoAssembler`: CheckFileInfo metadata derived from storage + lock state
//! - `ContentAccessGateway`: GetFile/PutFile gated by lock state

mod content;
mod error;
mod file_info;
mod lock;
mod storage;

pub use content::{mime_type_for, ContentAccessGateway, UnlockedWritePolicy};
pub use error::{StorageError, WopiError};
pub use file_info::{AccessContext, FileInfoAssembler, FileMetadata};
pub use lock::{LockInfo, LockManager, UnlockPolicy, DEFAULT_LOCK_TTL, MAX_LOCK_TOKEN_LEN};
pub use storage::{MemoryStorage, ObjectHead, StorageGateway};
