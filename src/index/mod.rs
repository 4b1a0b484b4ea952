//! L8 B-tree engine: cursor search within a page, and the tree-level
//! search/insert/delete operations built on top of it (spec §4.5 "B-tree
//! engine").

pub mod btree;
pub mod cursor;

pub use btree::BtreeIndex;
pub use cursor::{PageSearchResult, SearchMode};
