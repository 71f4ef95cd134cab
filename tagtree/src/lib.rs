pub mod config;
pub mod error;
pub mod locate;
pub mod node;
pub mod rule;
pub mod search;
pub mod storage;
pub mod value;
pub mod watcher;

pub use config::ExplorerConfig;
pub use error::{Result, TagTreeError};
pub use node::{Capabilities, NodeId, NodeKind, NodeTree, TreeEvent};
pub use rule::Rule;
pub use search::{SearchState, SearchStatus, SearchWorker};
pub use storage::{FsStorage, Storage};
pub use value::{Compound, NodeValue, TagKind, TagList};
