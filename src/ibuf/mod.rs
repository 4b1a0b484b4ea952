//! L12 insert buffer: bitmap pages tracking buffered-change eligibility and
//! free space, and the queue of deferred secondary-index changes itself
//! (spec §4.9 "Insert buffer").

pub mod bitmap;
pub mod tree;

pub use bitmap::{IbufBitmap, BITMAP_PAGE_OFFSET, PAGES_PER_BITMAP};
pub use tree::{IbufReadHook, IbufTree, IBUF_TREE_INDEX_ID};
