//! # pc-core
//!
//! Core types, configuration, and user notices for Pieces RS.
//!
//! This crate provides the foundational building blocks used by the other crates:
//! - Identifier newtypes (DocumentId, PieceId)
//! - Configuration types and environment loading
//! - User-facing notices and the Notifier seam

pub mod config;
pub mod error;
pub mod notice;
pub mod types;

pub use config::{AppConfig, CitationStyle, LoggingConfig, PiecesConfig, StorageConfig};
pub use error::ConfigError;
pub use notice::{MemoryNotifier, Notice, NoticeLevel, Notifier, TracingNotifier};
pub use types::{DocumentId, PieceId};
