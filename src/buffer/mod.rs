//! L4 buffer pool (spec §4.2).

pub mod flush_list;
pub mod frame;
pub mod lru;
pub mod pool;

pub use flush_list::FlushList;
pub use frame::{BlockState, BufferBlock};
pub use lru::Lru;
pub use pool::{BufferPool, BufferPoolConfig, FlushType, LatchMode, NoopReadHook, ReadCompletionHook};
