//! An embeddable transactional storage engine: page-oriented MVCC store
//! with write-ahead logging, B-tree indexes, and a secondary-index insert
//! buffer (spec §1 overview).

pub mod buffer;
pub mod common;
pub mod dict;
pub mod error;
pub mod fsp;
pub mod ibuf;
pub mod index;
pub mod latch;
pub mod mem;
pub mod mtr;
pub mod page;
pub mod row;
pub mod trx;

pub mod engine;

pub use engine::Engine;
pub use error::{EngineError, Result};

/// Process-wide engine configuration (SPEC_FULL.md Section A): no external
/// config-file format is parsed, matching the ambient-stack note that this
/// engine is embedded by a host process which already owns its own
/// configuration story.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: std::path::PathBuf,
    pub buffer_pool_frames: usize,
    pub log_buffer_size: usize,
    pub page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_dir: std::path::PathBuf::from("./data"),
            buffer_pool_frames: 4096,
            log_buffer_size: 16 * 1024 * 1024,
            page_size: common::PAGE_SIZE,
        }
    }
}

/// Installs a `tracing-subscriber` fmt layer reading `RUST_LOG`, matching
/// the teacher's logging setup convention. Safe to call more than once;
/// only the first call takes effect.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
