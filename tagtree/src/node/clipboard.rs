use crate::value::NodeValue;
use serde::{Deserialize, Serialize};

/// A detached tag: what cut and copy produce and paste consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipboardItem {
    pub name: Option<String>,
    pub value: NodeValue,
}

/// Somewhere to park a single [`ClipboardItem`] between cut/copy and paste.
pub trait Clipboard {
    fn store(&mut self, item: ClipboardItem);

    fn load(&self) -> Option<ClipboardItem>;

    fn is_empty(&self) -> bool {
        self.load().is_none()
    }
}

/// Process-local clipboard.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    item: Option<ClipboardItem>,
}

impl MemoryClipboard {
    pub fn clear(&mut self) {
        self.item = None;
    }
}

impl Clipboard for MemoryClipboard {
    fn store(&mut self, item: ClipboardItem) {
        self.item = Some(item);
    }

    fn load(&self) -> Option<ClipboardItem> {
        self.item.clone()
    }
}
