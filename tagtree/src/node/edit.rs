use super::{Clipboard, ClipboardItem, NodeId, NodeKind, NodeTree, TreeEvent};
use crate::error::{Result, TagTreeError};
use crate::value::{NodeValue, TagKind, TagList};

/// Which edits a node permits. Every mutating operation checks its flag
/// first and fails with `NotPermitted` when it is false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub create: bool,
    pub rename: bool,
    pub edit: bool,
    pub delete: bool,
    pub cut: bool,
    pub copy: bool,
    pub paste_into: bool,
    pub reorder: bool,
    pub refresh: bool,
}

impl NodeTree {
    pub fn capabilities(&self, id: NodeId) -> Capabilities {
        match self.kind(id) {
            None | Some(NodeKind::Root) => Capabilities::default(),
            Some(NodeKind::Directory { .. }) | Some(NodeKind::Archive { .. }) => Capabilities {
                refresh: true,
                ..Capabilities::default()
            },
            Some(NodeKind::File { .. }) | Some(NodeKind::ArchiveEntry { .. }) => Capabilities {
                create: true,
                paste_into: true,
                refresh: true,
                ..Capabilities::default()
            },
            Some(NodeKind::Tag { value, .. }) => {
                let container = value.is_container();
                let named = self.parent(id).map_or(false, |p| self.is_compound(p));
                Capabilities {
                    create: container,
                    rename: named,
                    edit: !container,
                    delete: true,
                    cut: true,
                    copy: true,
                    paste_into: container,
                    reorder: true,
                    refresh: false,
                }
            }
        }
    }

    /// Whether a new tag of `kind` may be created under `parent`.
    /// Lists only take their element kind once they have one.
    pub fn can_create_tag(&self, parent: NodeId, kind: TagKind) -> bool {
        if !self.capabilities(parent).create {
            return false;
        }
        match self.value(parent) {
            Some(NodeValue::List(list)) => list.accepts(kind),
            _ => true,
        }
    }

    pub fn can_move_up(&self, id: NodeId) -> bool {
        self.capabilities(id).reorder && self.index_in_parent(id).map_or(false, |i| i > 0)
    }

    pub fn can_move_down(&self, id: NodeId) -> bool {
        let siblings = self.parent(id).map_or(0, |p| self.children(p).len());
        self.capabilities(id).reorder
            && self.index_in_parent(id).map_or(false, |i| i + 1 < siblings)
    }

    /// Create a default-valued tag of `kind` at the end of `parent`.
    /// `name` is required for compound-like parents and ignored for lists.
    pub fn create(&mut self, parent: NodeId, kind: TagKind, name: Option<&str>) -> Result<NodeId> {
        if !self.capabilities(parent).create {
            return Err(self.not_permitted(parent, "create"));
        }
        self.insert_child(parent, None, name, kind.default_value())
    }

    /// Insert an explicit value at the end of `parent`.
    pub fn insert_value(
        &mut self,
        parent: NodeId,
        name: Option<&str>,
        value: NodeValue,
    ) -> Result<NodeId> {
        if !self.capabilities(parent).create {
            return Err(self.not_permitted(parent, "create"));
        }
        self.insert_child(parent, None, name, value)
    }

    pub fn delete(&mut self, id: NodeId) -> Result<()> {
        if !self.capabilities(id).delete {
            return Err(self.not_permitted(id, "delete"));
        }
        self.remove_child(id)?;
        Ok(())
    }

    pub fn rename(&mut self, id: NodeId, new_name: &str) -> Result<()> {
        if !self.capabilities(id).rename {
            return Err(self.not_permitted(id, "rename"));
        }
        if self.tag_name(id) == Some(new_name) {
            return Ok(());
        }
        let parent = self.parent(id).ok_or(TagTreeError::NodeNotFound(id))?;
        self.check_name_free(parent, new_name)?;

        if let NodeKind::Tag { name, .. } = &mut self.entry_mut(id)?.kind {
            *name = Some(new_name.to_string());
        }
        self.mark_modified(id);
        self.emit(TreeEvent::Renamed { node: id });
        Ok(())
    }

    /// Replace a scalar or array value. The new value must keep the tag's kind.
    pub fn edit_value(&mut self, id: NodeId, new_value: NodeValue) -> Result<()> {
        if !self.capabilities(id).edit {
            return Err(self.not_permitted(id, "edit"));
        }
        let current = self.tag_kind(id).ok_or(TagTreeError::NodeNotFound(id))?;
        if current != new_value.kind() {
            return Err(TagTreeError::TypeMismatch {
                expected: current,
                actual: new_value.kind(),
            });
        }

        if let NodeKind::Tag { value, .. } = &mut self.entry_mut(id)?.kind {
            *value = new_value;
        }
        self.mark_modified(id);
        self.emit(TreeEvent::ValueChanged { node: id });
        Ok(())
    }

    /// Snapshot a tag onto the clipboard and remove it from the tree.
    pub fn cut(&mut self, id: NodeId, clipboard: &mut dyn Clipboard) -> Result<()> {
        if !self.capabilities(id).cut {
            return Err(self.not_permitted(id, "cut"));
        }
        let item = self.snapshot(id)?;
        self.remove_child(id)?;
        clipboard.store(item);
        Ok(())
    }

    /// Owned snapshot of a tag. Never mutates the tree.
    pub fn copy(&self, id: NodeId) -> Result<ClipboardItem> {
        if !self.capabilities(id).copy {
            return Err(self.not_permitted(id, "copy"));
        }
        self.snapshot(id)
    }

    pub fn copy_to(&self, id: NodeId, clipboard: &mut dyn Clipboard) -> Result<()> {
        let item = self.copy(id)?;
        clipboard.store(item);
        Ok(())
    }

    /// Insert the clipboard content at the end of `parent`.
    pub fn paste_into(&mut self, parent: NodeId, clipboard: &dyn Clipboard) -> Result<NodeId> {
        self.paste(parent, None, clipboard)
    }

    /// Insert the clipboard content at `index` among `parent`'s children.
    pub fn paste_at(
        &mut self,
        parent: NodeId,
        index: usize,
        clipboard: &dyn Clipboard,
    ) -> Result<NodeId> {
        self.paste(parent, Some(index), clipboard)
    }

    fn paste(
        &mut self,
        parent: NodeId,
        index: Option<usize>,
        clipboard: &dyn Clipboard,
    ) -> Result<NodeId> {
        if !self.capabilities(parent).paste_into {
            return Err(self.not_permitted(parent, "paste"));
        }
        let item = clipboard.load().ok_or(TagTreeError::ClipboardEmpty)?;
        self.insert_child(parent, index, item.name.as_deref(), item.value)
    }

    /// Swap with the previous (`-1`) or next (`+1`) sibling.
    pub fn move_relative(&mut self, id: NodeId, delta: isize) -> Result<()> {
        if !self.capabilities(id).reorder {
            return Err(self.not_permitted(id, "reorder"));
        }
        let parent = self.parent(id).ok_or(TagTreeError::NodeNotFound(id))?;
        let len = self.children(parent).len();
        let from = self
            .index_in_parent(id)
            .ok_or(TagTreeError::NodeNotFound(id))?;
        let to = from as isize + delta;
        if delta.abs() != 1 || to < 0 || to as usize >= len {
            return Err(TagTreeError::OutOfRange { index: to, len });
        }
        let to = to as usize;

        self.entry_mut(parent)?.children.swap(from, to);
        self.mark_modified(parent);
        self.emit(TreeEvent::Moved { parent, from, to });
        Ok(())
    }

    // ── Shared plumbing ─────────────────────────────────────────

    pub(super) fn snapshot(&self, id: NodeId) -> Result<ClipboardItem> {
        let value = self.to_value(id).ok_or(TagTreeError::NodeNotFound(id))?;
        Ok(ClipboardItem {
            name: self.tag_name(id).map(str::to_string),
            value,
        })
    }

    /// Validate and insert a new tag child. All checks run before anything
    /// is mutated, so a failed insert leaves the tree untouched.
    pub(crate) fn insert_child(
        &mut self,
        parent: NodeId,
        index: Option<usize>,
        name: Option<&str>,
        value: NodeValue,
    ) -> Result<NodeId> {
        self.materialize(parent)?;

        let len = self.children(parent).len();
        let index = index.unwrap_or(len);
        if index > len {
            return Err(TagTreeError::OutOfRange {
                index: index as isize,
                len,
            });
        }

        let name = if self.is_compound(parent) {
            let name = name.ok_or_else(|| TagTreeError::MissingName(self.path(parent)))?;
            self.check_name_free(parent, name)?;
            Some(name.to_string())
        } else if let Some(NodeValue::List(list)) = self.value(parent) {
            if let Some(expected) = list.element() {
                if expected != value.kind() {
                    return Err(TagTreeError::TypeMismatch {
                        expected,
                        actual: value.kind(),
                    });
                }
            }
            None
        } else {
            return Err(self.not_permitted(parent, "insert"));
        };

        // An untyped list adopts the kind of its first element
        let kind = value.kind();
        if let NodeKind::Tag {
            value: NodeValue::List(list),
            ..
        } = &mut self.entry_mut(parent)?.kind
        {
            if list.element().is_none() {
                *list = TagList::of(kind);
            }
        }

        let child = self.alloc(NodeKind::Tag { name, value }, Some(parent));
        self.attach(parent, index, child);
        self.mark_modified(child);
        Ok(child)
    }

    /// Unlink and drop a tag, flagging its former parent.
    pub(crate) fn remove_child(&mut self, id: NodeId) -> Result<NodeId> {
        let (parent, _) = self.detach(id)?;
        self.drop_subtree(id);
        self.mark_modified(parent);
        Ok(parent)
    }

    fn check_name_free(&self, parent: NodeId, name: &str) -> Result<()> {
        let taken = self
            .children(parent)
            .iter()
            .any(|&c| self.tag_name(c) == Some(name));
        if taken {
            return Err(TagTreeError::NameConflict {
                name: name.to_string(),
                parent: self.path(parent),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::MemoryClipboard;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_capability_table() {
        let (_tmp, mut tree, world) = setup_world();
        let level = tree.find_by_path("world/level.json").unwrap().unwrap();
        let hp = tree.find_by_path("world/level.json/hp").unwrap().unwrap();
        let inventory = tree.find_by_path("world/level.json/inventory").unwrap().unwrap();
        let first_item = tree.find_by_path("world/level.json/inventory/0").unwrap().unwrap();

        assert_eq!(tree.capabilities(tree.root()), Capabilities::default());
        assert_eq!(
            tree.capabilities(world),
            Capabilities {
                refresh: true,
                ..Capabilities::default()
            }
        );
        let file = tree.capabilities(level);
        assert!(file.create && file.paste_into && file.refresh);
        assert!(!file.delete && !file.rename);

        let scalar = tree.capabilities(hp);
        assert!(scalar.rename && scalar.edit && scalar.delete && scalar.reorder);
        assert!(!scalar.create && !scalar.paste_into);

        let list = tree.capabilities(inventory);
        assert!(list.create && list.paste_into && !list.edit);

        // List elements have no name to change
        assert!(!tree.capabilities(first_item).rename);
    }

    #[test]
    fn test_create_in_compound_requires_unique_name() {
        let (_tmp, mut tree, _world) = setup_world();
        let level = tree.find_by_path("world/level.json").unwrap().unwrap();

        let xp = tree.create(level, TagKind::Long, Some("xp")).unwrap();
        assert_eq!(tree.value(xp), Some(&NodeValue::Long(0)));
        assert_eq!(tree.index_in_parent(xp), Some(4));

        let err = tree.create(level, TagKind::Int, Some("hp")).unwrap_err();
        assert!(matches!(err, TagTreeError::NameConflict { .. }));
        let err = tree.create(level, TagKind::Int, None).unwrap_err();
        assert!(matches!(err, TagTreeError::MissingName(_)));
        assert_eq!(tree.children(level).len(), 5);
    }

    #[test]
    fn test_create_under_scalar_not_permitted() {
        let (_tmp, mut tree, _world) = setup_world();
        let hp = tree.find_by_path("world/level.json/hp").unwrap().unwrap();
        let err = tree.create(hp, TagKind::Int, Some("x")).unwrap_err();
        assert!(err.is_capability_violation());
    }

    #[test]
    fn test_list_enforces_element_kind() {
        let (_tmp, mut tree, _world) = setup_world();
        let inventory = tree.find_by_path("world/level.json/inventory").unwrap().unwrap();

        assert!(tree.can_create_tag(inventory, TagKind::Compound));
        assert!(!tree.can_create_tag(inventory, TagKind::Int));
        let err = tree.create(inventory, TagKind::Int, None).unwrap_err();
        assert!(matches!(
            err,
            TagTreeError::TypeMismatch {
                expected: TagKind::Compound,
                actual: TagKind::Int
            }
        ));

        let added = tree.create(inventory, TagKind::Compound, None).unwrap();
        assert_eq!(tree.path_name(added), "2");
    }

    #[test]
    fn test_untyped_list_adopts_first_kind() {
        let (_tmp, mut tree, _world) = setup_world();
        let level = tree.find_by_path("world/level.json").unwrap().unwrap();
        let tags = tree
            .insert_value(level, Some("tags"), NodeValue::List(TagList::new()))
            .unwrap();

        assert!(tree.can_create_tag(tags, TagKind::String));
        tree.insert_value(tags, None, NodeValue::String("a".into()))
            .unwrap();
        assert!(!tree.can_create_tag(tags, TagKind::Int));
    }

    #[test]
    fn test_delete_flags_file_and_emits_event() {
        let (_tmp, mut tree, world) = setup_world();
        let hp = tree.find_by_path("world/level.json/hp").unwrap().unwrap();
        let level = tree.parent(hp).unwrap();
        let events = tree.subscribe();

        tree.delete(hp).unwrap();
        assert!(!tree.contains(hp));
        assert!(tree.is_modified(level));
        assert_eq!(
            events.try_recv().unwrap(),
            TreeEvent::ChildRemoved {
                parent: level,
                index: 0,
                child: hp
            }
        );

        let err = tree.delete(world).unwrap_err();
        assert!(err.is_capability_violation());
        assert!(tree.delete(tree.root()).is_err());
    }

    #[test]
    fn test_rename_conflict_and_same_name() {
        let (_tmp, mut tree, _world) = setup_world();
        let hp = tree.find_by_path("world/level.json/hp").unwrap().unwrap();

        tree.rename(hp, "hp").unwrap();
        assert!(!tree.is_modified(hp));

        let err = tree.rename(hp, "name").unwrap_err();
        assert!(err.is_constraint_violation());

        tree.rename(hp, "health").unwrap();
        assert_eq!(tree.tag_name(hp), Some("health"));
        assert_eq!(tree.path(hp), "world/level.json/health");
    }

    #[test]
    fn test_edit_value_keeps_kind() {
        let (_tmp, mut tree, _world) = setup_world();
        let hp = tree.find_by_path("world/level.json/hp").unwrap().unwrap();

        let err = tree.edit_value(hp, NodeValue::Long(3)).unwrap_err();
        assert!(matches!(err, TagTreeError::TypeMismatch { .. }));
        assert_eq!(tree.value(hp), Some(&NodeValue::Int(10)));

        tree.edit_value(hp, NodeValue::Int(3)).unwrap();
        assert_eq!(tree.display(hp), "hp: 3");

        let pos = tree.find_by_path("world/level.json/pos").unwrap().unwrap();
        assert!(tree.edit_value(pos, NodeValue::Int(1)).unwrap_err().is_capability_violation());
    }

    #[test]
    fn test_cut_then_paste_restores_subtree() {
        let (_tmp, mut tree, _world) = setup_world();
        let level = tree.find_by_path("world/level.json").unwrap().unwrap();
        tree.expand(level).unwrap();
        let before = tree.to_value(level).unwrap();
        let inventory = tree.find_by_path("world/level.json/inventory").unwrap().unwrap();
        let index = tree.index_in_parent(inventory).unwrap();

        let mut clipboard = MemoryClipboard::default();
        tree.cut(inventory, &mut clipboard).unwrap();
        assert!(!tree.contains(inventory));
        assert_eq!(tree.children(level).len(), 3);

        let restored = tree.paste_at(level, index, &clipboard).unwrap();
        assert_eq!(tree.tag_name(restored), Some("inventory"));
        assert_eq!(tree.to_value(level).unwrap(), before);
    }

    #[test]
    fn test_copy_does_not_mutate() {
        let (_tmp, mut tree, _world) = setup_world();
        let pos = tree.find_by_path("world/level.json/pos").unwrap().unwrap();
        let level = tree.parent(pos).unwrap();

        let mut clipboard = MemoryClipboard::default();
        tree.copy_to(pos, &mut clipboard).unwrap();
        assert!(!tree.is_modified(level));

        // Same name pasted back into the same compound collides
        let err = tree.paste_into(level, &clipboard).unwrap_err();
        assert!(matches!(err, TagTreeError::NameConflict { .. }));
    }

    #[test]
    fn test_paste_empty_clipboard() {
        let (_tmp, mut tree, _world) = setup_world();
        let level = tree.find_by_path("world/level.json").unwrap().unwrap();
        let err = tree.paste_into(level, &MemoryClipboard::default()).unwrap_err();
        assert!(matches!(err, TagTreeError::ClipboardEmpty));
    }

    #[test]
    fn test_paste_into_list_drops_name() {
        let (_tmp, mut tree, _world) = setup_world();
        let pos = tree.find_by_path("world/level.json/pos").unwrap().unwrap();
        let inventory = tree.find_by_path("world/level.json/inventory").unwrap().unwrap();

        let mut clipboard = MemoryClipboard::default();
        tree.copy_to(pos, &mut clipboard).unwrap();
        let pasted = tree.paste_at(inventory, 0, &clipboard).unwrap();
        assert_eq!(tree.tag_name(pasted), None);
        assert_eq!(tree.path_name(pasted), "0");
        assert_eq!(tree.children(inventory).len(), 3);
    }

    #[test]
    fn test_move_relative_bounds() {
        let (_tmp, mut tree, _world) = setup_world();
        let level = tree.find_by_path("world/level.json").unwrap().unwrap();
        tree.expand(level).unwrap();
        let hp = child_named(&tree, level, "hp");
        let pos = child_named(&tree, level, "pos");

        assert!(!tree.can_move_up(hp));
        let err = tree.move_relative(hp, -1).unwrap_err();
        assert!(matches!(err, TagTreeError::OutOfRange { index: -1, len: 4 }));
        assert!(!tree.can_move_down(pos));
        assert!(tree.move_relative(pos, 1).is_err());

        let events = tree.subscribe();
        tree.move_relative(hp, 1).unwrap();
        assert_eq!(names(&tree, level), vec!["name", "hp", "inventory", "pos"]);
        assert_eq!(
            events.try_recv().unwrap(),
            TreeEvent::Moved {
                parent: level,
                from: 0,
                to: 1
            }
        );
        assert!(tree.is_modified(level));
    }
}
