//! The virtual node tree.
//!
//! Directories, data files, archives, archive entries and typed tags all live
//! in one arena owned by [`NodeTree`]. Every node has exactly one owning
//! parent (its `children` vector) and a non-owning `parent` id used for
//! ancestry walks and for propagating the modified flag upward.
//!
//! Children are materialized lazily: a container only asks the storage
//! collaborator for its content the first time it is expanded. Collapsing
//! hides children without discarding them; [`NodeTree::release`] drops them
//! when the subtree carries no unsaved edits.

mod clipboard;
mod edit;

pub use clipboard::{Clipboard, ClipboardItem, MemoryClipboard};
pub use edit::Capabilities;

use crate::error::{Result, TagTreeError};
use crate::locate::RegionPos;
use crate::rule::{Field, Rule};
use crate::storage::{EntryKind, Storage, StorageEntry};
use crate::value::{Compound, InsertPolicy, NodeValue, TagKind, TagList};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};

/// Stable handle to a node. Ids are never reused within a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The closed set of node variants.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Synthetic top of the tree holding every opened container.
    Root,
    Directory { path: PathBuf },
    /// A data file that decodes to a single compound.
    File { path: PathBuf },
    /// A file holding many independently decoded entries.
    Archive { path: PathBuf },
    ArchiveEntry { slot: usize },
    /// A typed value. For lists and compounds that have been materialized,
    /// `value` is an empty shell and the elements live in child nodes.
    Tag { name: Option<String>, value: NodeValue },
}

impl NodeKind {
    fn from_storage(entry: &StorageEntry) -> NodeKind {
        match entry.kind {
            EntryKind::Directory => NodeKind::Directory {
                path: entry.path.clone(),
            },
            EntryKind::File => NodeKind::File {
                path: entry.path.clone(),
            },
            EntryKind::Archive => NodeKind::Archive {
                path: entry.path.clone(),
            },
        }
    }

    /// Persisted containers map to exactly one file on disk.
    pub fn is_persisted(&self) -> bool {
        matches!(self, NodeKind::File { .. } | NodeKind::Archive { .. })
    }

    fn is_storage_backed(&self) -> bool {
        !matches!(self, NodeKind::Root | NodeKind::Tag { .. })
    }
}

/// Structural change notifications for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    ChildAdded { parent: NodeId, index: usize, child: NodeId },
    ChildRemoved { parent: NodeId, index: usize, child: NodeId },
    ValueChanged { node: NodeId },
    Renamed { node: NodeId },
    Moved { parent: NodeId, from: usize, to: usize },
}

#[derive(Debug)]
struct NodeEntry {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    materialized: bool,
    expanded: bool,
    modified: bool,
    error: Option<String>,
}

/// Identity used to match existing children against a fresh scan on refresh.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ChildKey {
    Path(PathBuf),
    Slot(usize),
    Name(String),
}

pub struct NodeTree {
    nodes: HashMap<NodeId, NodeEntry>,
    root: NodeId,
    next_id: u64,
    storage: Arc<dyn Storage>,
    listeners: Vec<mpsc::Sender<TreeEvent>>,
}

impl NodeTree {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            NodeEntry {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
                materialized: true,
                expanded: true,
                modified: false,
                error: None,
            },
        );
        NodeTree {
            nodes,
            root,
            next_id: 1,
            storage,
            listeners: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Open a directory, data file or archive as a new top-level container.
    /// Opening a path that is already open returns the existing node.
    pub fn open(&mut self, path: &Path) -> Result<NodeId> {
        if let Some(existing) = self
            .children(self.root)
            .iter()
            .copied()
            .find(|&c| self.backing_path(c) == Some(path))
        {
            return Ok(existing);
        }

        let kind = self.storage.classify(path).ok_or_else(|| {
            TagTreeError::Other(format!("Unsupported path: {}", path.display()))
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let entry = StorageEntry {
            name,
            path: path.to_path_buf(),
            kind,
        };

        let id = self.alloc(NodeKind::from_storage(&entry), Some(self.root));
        let index = self.children(self.root).len();
        self.attach(self.root, index, id);
        log::info!("Opened {}", path.display());
        Ok(id)
    }

    /// Receive structural change events from now on.
    pub fn subscribe(&mut self) -> mpsc::Receiver<TreeEvent> {
        let (tx, rx) = mpsc::channel();
        self.listeners.push(tx);
        rx
    }

    // ── Accessors ───────────────────────────────────────────────

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(&id).map(|e| &e.kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|e| e.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|e| e.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|&c| c == id)
    }

    /// Name of a named tag (a field of a compound-like container).
    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Tag { name, .. } => name.as_deref(),
            _ => None,
        }
    }

    /// Stored value of a tag. For materialized lists and compounds this is
    /// the empty shell; use [`NodeTree::to_value`] for the folded value.
    pub fn value(&self, id: NodeId) -> Option<&NodeValue> {
        match self.kind(id)? {
            NodeKind::Tag { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn tag_kind(&self, id: NodeId) -> Option<TagKind> {
        self.value(id).map(NodeValue::kind)
    }

    pub fn backing_path(&self, id: NodeId) -> Option<&Path> {
        match self.kind(id)? {
            NodeKind::Directory { path } | NodeKind::File { path } | NodeKind::Archive { path } => {
                Some(path.as_path())
            }
            _ => None,
        }
    }

    pub fn is_container(&self, id: NodeId) -> bool {
        match self.kind(id) {
            Some(NodeKind::Tag { value, .. }) => value.is_container(),
            Some(_) => true,
            None => false,
        }
    }

    /// Containers whose children are named fields: data files, archive
    /// entries and compound tags. These are what rules are matched against.
    pub fn is_compound(&self, id: NodeId) -> bool {
        matches!(
            self.kind(id),
            Some(NodeKind::File { .. })
                | Some(NodeKind::ArchiveEntry { .. })
                | Some(NodeKind::Tag {
                    value: NodeValue::Compound(_),
                    ..
                })
        )
    }

    pub fn is_list(&self, id: NodeId) -> bool {
        matches!(
            self.kind(id),
            Some(NodeKind::Tag {
                value: NodeValue::List(_),
                ..
            })
        )
    }

    pub fn is_materialized(&self, id: NodeId) -> bool {
        self.nodes.get(&id).map_or(false, |e| e.materialized)
    }

    pub fn is_expanded(&self, id: NodeId) -> bool {
        self.nodes.get(&id).map_or(false, |e| e.expanded)
    }

    /// Whether the node or anything below it carries unsaved edits.
    pub fn is_modified(&self, id: NodeId) -> bool {
        let Some(entry) = self.nodes.get(&id) else {
            return false;
        };
        entry.modified || entry.children.iter().any(|&c| self.is_modified(c))
    }

    /// True when expanding would (or might) produce children that have not
    /// been decoded yet. Never touches storage.
    pub fn has_unexpanded_children(&self, id: NodeId) -> bool {
        let Some(entry) = self.nodes.get(&id) else {
            return false;
        };
        if entry.materialized {
            return false;
        }
        match &entry.kind {
            NodeKind::Root => false,
            NodeKind::Tag { value, .. } => value.entry_count().map_or(false, |n| n > 0),
            _ => true,
        }
    }

    /// Last storage failure recorded against this node, if any.
    pub fn error(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(&id).and_then(|e| e.error.as_deref())
    }

    /// Number of entries a container shows, without decoding anything.
    pub fn entry_count(&self, id: NodeId) -> Option<usize> {
        let entry = self.nodes.get(&id)?;
        if entry.materialized {
            return Some(entry.children.len());
        }
        match &entry.kind {
            NodeKind::Tag { value, .. } => value.entry_count(),
            _ => None,
        }
    }

    // ── Paths and labels ────────────────────────────────────────

    /// The segment this node contributes to a path.
    pub fn path_name(&self, id: NodeId) -> String {
        match self.kind(id) {
            None | Some(NodeKind::Root) => String::new(),
            Some(NodeKind::Directory { path })
            | Some(NodeKind::File { path })
            | Some(NodeKind::Archive { path }) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            Some(NodeKind::ArchiveEntry { slot }) => slot.to_string(),
            Some(NodeKind::Tag { name: Some(name), .. }) => name.clone(),
            Some(NodeKind::Tag { name: None, .. }) => self
                .index_in_parent(id)
                .map(|i| i.to_string())
                .unwrap_or_default(),
        }
    }

    /// Nodes from the root down to `id`, inclusive.
    pub fn ancestry(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = if self.contains(id) { Some(id) } else { None };
        while let Some(node) = current {
            chain.push(node);
            current = self.parent(node);
        }
        chain.reverse();
        chain
    }

    /// Slash-separated path from the first opened container down to `id`.
    pub fn path(&self, id: NodeId) -> String {
        self.ancestry(id)
            .into_iter()
            .filter(|&n| n != self.root)
            .map(|n| self.path_name(n))
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Resolve a path produced by [`NodeTree::path`], materializing
    /// containers along the way.
    pub fn find_by_path(&mut self, path: &str) -> Result<Option<NodeId>> {
        let mut current = self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.materialize(current)?;
            match self
                .children(current)
                .iter()
                .copied()
                .find(|&c| self.path_name(c) == segment)
            {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// The node that should be refreshed when `fs_path` changes on disk:
    /// the container backed by that path, or failing that the directory
    /// node holding it.
    pub fn container_for_path(&self, fs_path: &Path) -> Option<NodeId> {
        let find = |target: &Path| {
            self.nodes
                .keys()
                .copied()
                .filter(|&id| self.backing_path(id) == Some(target))
                .min()
        };
        find(fs_path).or_else(|| fs_path.parent().and_then(find))
    }

    /// One-line label for the node.
    pub fn display(&self, id: NodeId) -> String {
        match self.kind(id) {
            None => String::new(),
            Some(NodeKind::Root) => "Root".to_string(),
            Some(NodeKind::Directory { .. })
            | Some(NodeKind::File { .. })
            | Some(NodeKind::Archive { .. }) => self.path_name(id),
            Some(NodeKind::ArchiveEntry { slot }) => {
                let region = self
                    .parent(id)
                    .map(|p| self.path_name(p))
                    .and_then(|name| RegionPos::parse_file_name(&name));
                match region.and_then(|r| r.chunk_at_slot(*slot)) {
                    Some(chunk) => format!("Chunk [{}, {}]", chunk.x, chunk.z),
                    None => format!("Entry {slot}"),
                }
            }
            Some(NodeKind::Tag { name, value }) => {
                let shown = if value.is_container() {
                    format!("{} entries", self.entry_count(id).unwrap_or(0))
                } else {
                    value.to_string()
                };
                match name {
                    Some(name) => format!("{name}: {shown}"),
                    None => shown,
                }
            }
        }
    }

    // ── Materialization ─────────────────────────────────────────

    /// Materialize children on first call and make them visible.
    /// Expanding an already expanded node is a no-op.
    pub fn expand(&mut self, id: NodeId) -> Result<()> {
        self.materialize(id)?;
        self.entry_mut(id)?.expanded = true;
        Ok(())
    }

    /// Hide children. Decoded content is kept.
    pub fn collapse(&mut self, id: NodeId) -> Result<()> {
        self.entry_mut(id)?.expanded = false;
        Ok(())
    }

    /// Decode children without changing visibility. Idempotent.
    pub fn materialize(&mut self, id: NodeId) -> Result<()> {
        let entry = self.entry(id)?;
        if entry.materialized {
            return Ok(());
        }
        let is_tag = matches!(entry.kind, NodeKind::Tag { .. });

        let children: Vec<NodeKind> = if is_tag {
            self.take_tag_elements(id)?
        } else {
            match self.load_children(id) {
                Ok(children) => children,
                Err(e) => {
                    log::warn!("Failed to expand {}: {e}", self.path(id));
                    self.entry_mut(id)?.error = Some(e.to_string());
                    return Err(e);
                }
            }
        };

        for kind in children {
            let child = self.alloc(kind, Some(id));
            self.entry_mut(id)?.children.push(child);
        }
        let entry = self.entry_mut(id)?;
        entry.materialized = true;
        entry.error = None;
        Ok(())
    }

    /// Drop decoded children so they are re-derived on the next expand.
    /// Storage-backed containers are only released when nothing below them
    /// is modified; tags fold their children back into their value first.
    /// Returns whether anything was released.
    pub fn release(&mut self, id: NodeId) -> Result<bool> {
        let entry = self.entry(id)?;
        if !entry.materialized || matches!(entry.kind, NodeKind::Root) {
            return Ok(false);
        }
        if entry.kind.is_storage_backed() && self.is_modified(id) {
            return Ok(false);
        }

        if let NodeKind::Tag { .. } = entry.kind {
            let folded = self
                .to_value(id)
                .ok_or(TagTreeError::NodeNotFound(id))?;
            if let NodeKind::Tag { value, .. } = &mut self.entry_mut(id)?.kind {
                *value = folded;
            }
        }

        let children = std::mem::take(&mut self.entry_mut(id)?.children);
        for child in children {
            self.drop_subtree(child);
        }
        let entry = self.entry_mut(id)?;
        entry.materialized = false;
        entry.expanded = false;
        Ok(true)
    }

    /// Re-scan the backing store and reconcile children by identity:
    /// kept children retain their edits and expand state, new entries are
    /// appended, vanished ones are removed unless they hold unsaved edits.
    pub fn refresh(&mut self, id: NodeId) -> Result<()> {
        if !self.capabilities(id).refresh {
            return Err(self.not_permitted(id, "refresh"));
        }
        if !self.is_materialized(id) {
            // Nothing derived yet; the next expand reads fresh content
            return Ok(());
        }
        if self.has_pending_content(id)? {
            // Storage is stale until the next save
            log::debug!("Keeping unsaved content of {} on refresh", self.path(id));
            return Ok(());
        }

        let desired = match self.load_children(id) {
            Ok(children) => children,
            Err(e) => {
                log::warn!("Failed to refresh {}: {e}", self.path(id));
                self.entry_mut(id)?.error = Some(e.to_string());
                return Err(e);
            }
        };
        self.entry_mut(id)?.error = None;

        let desired: Vec<(ChildKey, NodeKind)> = desired
            .into_iter()
            .filter_map(|kind| Self::key_for(&kind).map(|key| (key, kind)))
            .collect();
        self.reconcile(id, desired);
        log::debug!("Refreshed {}", self.path(id));
        Ok(())
    }

    /// Files and archive entries whose tags carry unsaved deletes, renames,
    /// moves or edits. Their in-memory children are the current content.
    fn has_pending_content(&self, id: NodeId) -> Result<bool> {
        let entry = self.entry(id)?;
        Ok(entry.modified
            && matches!(entry.kind, NodeKind::File { .. } | NodeKind::ArchiveEntry { .. }))
    }

    fn load_children(&self, id: NodeId) -> Result<Vec<NodeKind>> {
        let storage = Arc::clone(&self.storage);
        match &self.entry(id)?.kind {
            NodeKind::Directory { path } => Ok(storage
                .list_directory(path)?
                .iter()
                .map(NodeKind::from_storage)
                .collect()),
            NodeKind::Archive { path } => Ok(storage
                .list_archive(path)?
                .into_iter()
                .map(|slot| NodeKind::ArchiveEntry { slot })
                .collect()),
            NodeKind::File { path } => Ok(compound_children(storage.read_file(path)?)),
            NodeKind::ArchiveEntry { slot } => {
                let archive = self.parent(id).ok_or(TagTreeError::NodeNotFound(id))?;
                let path = self
                    .backing_path(archive)
                    .ok_or(TagTreeError::NodeNotFound(archive))?;
                Ok(compound_children(storage.read_entry(path, *slot)?))
            }
            NodeKind::Root | NodeKind::Tag { .. } => Ok(Vec::new()),
        }
    }

    /// Move the elements of a list or compound tag into child kinds,
    /// leaving an empty shell that remembers the list element type.
    fn take_tag_elements(&mut self, id: NodeId) -> Result<Vec<NodeKind>> {
        let entry = self.entry_mut(id)?;
        let NodeKind::Tag { value, .. } = &mut entry.kind else {
            return Ok(Vec::new());
        };
        Ok(match value {
            NodeValue::Compound(c) => compound_children(std::mem::take(c)),
            NodeValue::List(l) => l
                .take_items()
                .into_iter()
                .map(|v| NodeKind::Tag { name: None, value: v })
                .collect(),
            _ => Vec::new(),
        })
    }

    fn key_for(kind: &NodeKind) -> Option<ChildKey> {
        match kind {
            NodeKind::Directory { path } | NodeKind::File { path } | NodeKind::Archive { path } => {
                Some(ChildKey::Path(path.clone()))
            }
            NodeKind::ArchiveEntry { slot } => Some(ChildKey::Slot(*slot)),
            NodeKind::Tag { name: Some(name), .. } => Some(ChildKey::Name(name.clone())),
            NodeKind::Tag { name: None, .. } | NodeKind::Root => None,
        }
    }

    fn reconcile(&mut self, parent: NodeId, desired: Vec<(ChildKey, NodeKind)>) {
        let old = self.children(parent).to_vec();
        let mut existing: HashMap<ChildKey, NodeId> = old
            .iter()
            .filter_map(|&c| self.kind(c).and_then(Self::key_for).map(|k| (k, c)))
            .collect();

        let mut next = Vec::with_capacity(desired.len());
        let mut added = Vec::new();
        for (key, kind) in desired {
            match existing.remove(&key) {
                Some(kept) => {
                    self.renew_tag(kept, kind);
                    next.push(kept);
                }
                None => {
                    let child = self.alloc(kind, Some(parent));
                    added.push(child);
                    next.push(child);
                }
            }
        }

        // Vanished from storage; in-memory edits still win
        for &child in &old {
            if !next.contains(&child) && self.is_modified(child) {
                next.push(child);
            }
        }

        for (index, &child) in old.iter().enumerate().rev() {
            if !next.contains(&child) {
                if let Some(entry) = self.nodes.get_mut(&parent) {
                    entry.children.remove(index);
                }
                self.emit(TreeEvent::ChildRemoved {
                    parent,
                    index,
                    child,
                });
                self.drop_subtree(child);
            }
        }

        if let Some(entry) = self.nodes.get_mut(&parent) {
            entry.children = next;
        }
        for child in added {
            if let Some(index) = self.index_in_parent(child) {
                self.emit(TreeEvent::ChildAdded {
                    parent,
                    index,
                    child,
                });
            }
        }
    }

    /// Take the freshly decoded value for a kept tag that has no edits of
    /// its own, re-materializing it if it was materialized before.
    fn renew_tag(&mut self, id: NodeId, fresh: NodeKind) {
        let NodeKind::Tag { value: fresh_value, .. } = &fresh else {
            return;
        };
        if self.is_modified(id) || self.to_value(id).as_ref() == Some(fresh_value) {
            return;
        }
        let Some(entry) = self.nodes.get_mut(&id) else {
            return;
        };
        let was_materialized = entry.materialized;
        let children = std::mem::take(&mut entry.children);
        entry.kind = fresh;
        entry.materialized = false;
        for child in children {
            self.drop_subtree(child);
        }
        if was_materialized {
            // Tags decode from memory
            let _ = self.materialize(id);
        }
        self.emit(TreeEvent::ValueChanged { node: id });
    }

    // ── Values ──────────────────────────────────────────────────

    /// Owned snapshot of a tag, folding materialized children back in.
    /// Data files and archive entries yield their root compound.
    pub fn to_value(&self, id: NodeId) -> Option<NodeValue> {
        let entry = self.nodes.get(&id)?;
        match &entry.kind {
            NodeKind::Tag { value, .. } => {
                if !entry.materialized || !value.is_container() {
                    return Some(value.clone());
                }
                match value {
                    NodeValue::List(shell) => {
                        let mut list = match shell.element() {
                            Some(kind) => TagList::of(kind),
                            None => TagList::new(),
                        };
                        for &child in &entry.children {
                            // Children were checked against the element type on insert
                            let _ = list.push(self.to_value(child)?);
                        }
                        Some(NodeValue::List(list))
                    }
                    _ => self.fold_compound(id).map(NodeValue::Compound),
                }
            }
            NodeKind::File { .. } | NodeKind::ArchiveEntry { .. } if entry.materialized => {
                self.fold_compound(id).map(NodeValue::Compound)
            }
            _ => None,
        }
    }

    fn fold_compound(&self, id: NodeId) -> Option<Compound> {
        let mut compound = Compound::new();
        for &child in self.children(id) {
            let name = self.tag_name(child)?;
            let value = self.to_value(child)?;
            compound.insert(name, value, InsertPolicy::Replace).ok()?;
        }
        Some(compound)
    }

    /// The named fields of a compound-like node, as seen by the matcher.
    pub fn fields(&self, id: NodeId) -> Vec<Field<'_, NodeId>> {
        if !self.is_compound(id) {
            return Vec::new();
        }
        self.children(id)
            .iter()
            .filter_map(|&child| match self.kind(child)? {
                NodeKind::Tag {
                    name: Some(name),
                    value,
                } => Some(Field {
                    id: child,
                    name: name.as_str(),
                    value,
                }),
                _ => None,
            })
            .collect()
    }

    /// Evaluate `rule` against a compound-like node's current children.
    pub fn matches(&self, rule: &Rule, id: NodeId, out: &mut Vec<NodeId>) -> bool {
        if !self.is_compound(id) {
            return false;
        }
        rule.matches(&self.fields(id), out)
    }

    // ── Persistence ─────────────────────────────────────────────

    /// Write every modified persisted container at or below `id`.
    /// Returns the number of files written.
    pub fn save(&mut self, id: NodeId) -> Result<usize> {
        let entry = self.entry(id)?;
        let mut written = 0;
        match &entry.kind {
            NodeKind::File { path } => {
                if entry.modified {
                    let path = path.clone();
                    let data = self
                        .fold_compound(id)
                        .ok_or(TagTreeError::NodeNotFound(id))?;
                    self.storage.write_file(&path, &data)?;
                    self.clear_modified(id);
                    written += 1;
                }
            }
            NodeKind::Archive { path } => {
                if entry.modified {
                    let path = path.clone();
                    for entry_id in self.children(id).to_vec() {
                        if let Some(NodeKind::ArchiveEntry { slot }) = self.kind(entry_id) {
                            if self.is_modified(entry_id) {
                                let slot = *slot;
                                let data = self
                                    .fold_compound(entry_id)
                                    .ok_or(TagTreeError::NodeNotFound(entry_id))?;
                                self.storage.write_entry(&path, slot, &data)?;
                                self.clear_modified(entry_id);
                            }
                        }
                    }
                    self.entry_mut(id)?.modified = false;
                    written += 1;
                }
            }
            NodeKind::ArchiveEntry { .. } | NodeKind::Tag { .. } => {
                if let Some(owner) = self.persisted_ancestor(id) {
                    written += self.save(owner)?;
                }
            }
            NodeKind::Root | NodeKind::Directory { .. } => {
                for child in self.children(id).to_vec() {
                    written += self.save(child)?;
                }
            }
        }
        if written > 0 {
            log::info!("Saved {written} container(s) under {}", self.path(id));
        }
        Ok(written)
    }

    pub fn save_all(&mut self) -> Result<usize> {
        self.save(self.root)
    }

    /// The nearest ancestor (or self) that maps to one file on disk.
    pub fn persisted_ancestor(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node) = current {
            if self.kind(node)?.is_persisted() {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }

    /// Flag `id` and its ancestors up to the nearest persisted container.
    fn mark_modified(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(node) = current {
            let Some(entry) = self.nodes.get_mut(&node) else {
                break;
            };
            if matches!(entry.kind, NodeKind::Root | NodeKind::Directory { .. }) {
                break;
            }
            entry.modified = true;
            if entry.kind.is_persisted() {
                break;
            }
            current = entry.parent;
        }
    }

    fn clear_modified(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if let Some(entry) = self.nodes.get_mut(&node) {
                entry.modified = false;
                stack.extend(entry.children.iter().copied());
            }
        }
    }

    // ── Arena plumbing ──────────────────────────────────────────

    fn entry(&self, id: NodeId) -> Result<&NodeEntry> {
        self.nodes.get(&id).ok_or(TagTreeError::NodeNotFound(id))
    }

    fn entry_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry> {
        self.nodes.get_mut(&id).ok_or(TagTreeError::NodeNotFound(id))
    }

    fn alloc(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            NodeEntry {
                kind,
                parent,
                children: Vec::new(),
                materialized: false,
                expanded: false,
                modified: false,
                error: None,
            },
        );
        id
    }

    fn attach(&mut self, parent: NodeId, index: usize, child: NodeId) {
        if let Some(entry) = self.nodes.get_mut(&parent) {
            entry.children.insert(index, child);
        }
        if let Some(entry) = self.nodes.get_mut(&child) {
            entry.parent = Some(parent);
        }
        self.emit(TreeEvent::ChildAdded {
            parent,
            index,
            child,
        });
    }

    /// Unlink `child` from its parent. The subtree stays in the arena.
    fn detach(&mut self, child: NodeId) -> Result<(NodeId, usize)> {
        let parent = self.parent(child).ok_or(TagTreeError::NodeNotFound(child))?;
        let index = self
            .index_in_parent(child)
            .ok_or(TagTreeError::NodeNotFound(child))?;
        self.entry_mut(parent)?.children.remove(index);
        self.emit(TreeEvent::ChildRemoved {
            parent,
            index,
            child,
        });
        Ok((parent, index))
    }

    fn drop_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if let Some(entry) = self.nodes.remove(&node) {
                stack.extend(entry.children);
            }
        }
    }

    fn emit(&mut self, event: TreeEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn not_permitted(&self, id: NodeId, op: &'static str) -> TagTreeError {
        TagTreeError::NotPermitted {
            op,
            path: self.path(id),
        }
    }
}

fn compound_children(compound: Compound) -> Vec<NodeKind> {
    compound
        .into_entries()
        .into_iter()
        .map(|(name, value)| NodeKind::Tag {
            name: Some(name),
            value,
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::storage::FsStorage;
    use tempfile::TempDir;

    pub fn level() -> Compound {
        let mut inventory = TagList::new();
        inventory
            .push(NodeValue::Compound(
                Compound::new()
                    .with("id", NodeValue::String("stone".into()))
                    .with("count", NodeValue::Byte(64)),
            ))
            .unwrap();
        inventory
            .push(NodeValue::Compound(
                Compound::new()
                    .with("id", NodeValue::String("dirt".into()))
                    .with("count", NodeValue::Byte(3)),
            ))
            .unwrap();

        Compound::new()
            .with("hp", NodeValue::Int(10))
            .with("name", NodeValue::String("Zed".into()))
            .with("inventory", NodeValue::List(inventory))
            .with(
                "pos",
                NodeValue::Compound(
                    Compound::new()
                        .with("x", NodeValue::Double(1.5))
                        .with("z", NodeValue::Double(-2.0)),
                ),
            )
    }

    /// world/
    ///   level.json
    ///   region/r.0.0.jsonl  (slots 0 and 33)
    pub fn setup_world() -> (TempDir, NodeTree, NodeId) {
        let tmp = TempDir::new().unwrap();
        let world = tmp.path().join("world");
        std::fs::create_dir_all(world.join("region")).unwrap();

        let storage = FsStorage::new();
        storage.write_file(&world.join("level.json"), &level()).unwrap();
        let archive = world.join("region").join("r.0.0.jsonl");
        storage
            .write_entry(&archive, 0, &Compound::new().with("xPos", NodeValue::Int(0)))
            .unwrap();
        storage
            .write_entry(&archive, 33, &Compound::new().with("xPos", NodeValue::Int(1)))
            .unwrap();

        let mut tree = NodeTree::new(Arc::new(storage));
        let world_id = tree.open(&world).unwrap();
        (tmp, tree, world_id)
    }

    pub fn child_named(tree: &NodeTree, parent: NodeId, name: &str) -> NodeId {
        tree.children(parent)
            .iter()
            .copied()
            .find(|&c| tree.path_name(c) == name)
            .unwrap_or_else(|| panic!("no child '{name}' under {}", tree.path(parent)))
    }

    pub fn names(tree: &NodeTree, parent: NodeId) -> Vec<String> {
        tree.children(parent)
            .iter()
            .map(|&c| tree.path_name(c))
            .collect()
    }
}
