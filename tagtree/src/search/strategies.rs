use super::{SearchEvent, SearchState, Session};
use crate::config::SearchSettings;
use crate::error::Result;
use crate::node::{NodeId, NodeTree};
use crate::rule::Rule;
use crate::value::Compound;

// ── Name / value search ─────────────────────────────────────────

/// Finds tags whose name and/or stringified value contain a substring.
/// With both criteria set, a tag must satisfy both.
#[derive(Debug)]
pub struct NameValueSearch {
    session: Session,
    name: Option<String>,
    value: Option<String>,
    case_sensitive: bool,
}

impl NameValueSearch {
    /// A "find next" search. Use [`NameValueSearch::find_all`] to walk
    /// the whole tree instead.
    pub fn new(root: NodeId, name: Option<&str>, value: Option<&str>) -> Self {
        NameValueSearch {
            session: Session::new(root, true),
            name: name.map(str::to_string),
            value: value.map(str::to_string),
            case_sensitive: false,
        }
    }

    pub fn find_all(mut self) -> Self {
        self.session.terminate_on_discover = false;
        self
    }

    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }

    pub fn with_settings(mut self, settings: &SearchSettings) -> Self {
        self.case_sensitive = settings.case_sensitive;
        self.session.progress_rate = settings.progress_rate;
        self
    }

    fn contains(&self, haystack: &str, needle: &str) -> bool {
        if self.case_sensitive {
            haystack.contains(needle)
        } else {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        }
    }
}

impl SearchState for NameValueSearch {
    fn session(&self) -> &Session {
        &self.session
    }

    fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    fn test(&mut self, tree: &NodeTree, node: NodeId) -> bool {
        let Some(value) = tree.value(node) else {
            return false;
        };
        if self.name.is_none() && self.value.is_none() {
            return false;
        }

        if let Some(needle) = &self.name {
            match tree.tag_name(node) {
                Some(name) if self.contains(name, needle) => {}
                _ => return false,
            }
        }
        if let Some(needle) = &self.value {
            if value.is_container() || !self.contains(&value.to_string(), needle) {
                return false;
            }
        }
        true
    }
}

// ── Rule search ─────────────────────────────────────────────────

/// Tags inserted into every matching compound during a replace.
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    pub tags: Compound,
    /// Also remove the fields the rule matched, not just the ones whose
    /// names collide with a replacement tag.
    pub delete_matched: bool,
}

impl Replacement {
    /// Delete the matched fields (and any name collisions), then insert
    /// the replacement tags at the end of `node`.
    pub fn apply(&self, tree: &mut NodeTree, node: NodeId, matched: &[NodeId]) -> Result<()> {
        for child in tree.children(node).to_vec() {
            let collides = tree
                .tag_name(child)
                .map_or(false, |name| self.tags.contains(name));
            if collides || (self.delete_matched && matched.contains(&child)) {
                tree.delete(child)?;
            }
        }
        for (name, value) in self.tags.iter() {
            tree.insert_value(node, Some(name), value.clone())?;
        }
        Ok(())
    }
}

/// Tests compound-like nodes against a rule tree.
#[derive(Debug)]
pub struct RuleSearch {
    session: Session,
    rule: Rule,
    replacement: Option<Replacement>,
    matched: Vec<NodeId>,
    replaced: usize,
}

impl RuleSearch {
    /// Stop at each matching compound.
    pub fn find(root: NodeId, rule: Rule) -> Self {
        RuleSearch {
            session: Session::new(root, true),
            rule,
            replacement: None,
            matched: Vec::new(),
            replaced: 0,
        }
    }

    /// Walk the whole tree, applying `replacement` to every matching
    /// compound as it is discovered.
    pub fn replace_all(root: NodeId, rule: Rule, replacement: Replacement) -> Self {
        RuleSearch {
            session: Session::new(root, false),
            rule,
            replacement: Some(replacement),
            matched: Vec::new(),
            replaced: 0,
        }
    }

    pub fn with_settings(mut self, settings: &SearchSettings) -> Self {
        self.session.progress_rate = settings.progress_rate;
        self
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Fields matched in the most recently tested compound.
    pub fn last_matches(&self) -> &[NodeId] {
        &self.matched
    }

    /// Compounds replaced so far in this session.
    pub fn replaced(&self) -> usize {
        self.replaced
    }

    /// Apply `replacement` to a single compound found earlier, re-matching
    /// it first. Returns false if it no longer matches.
    pub fn replace_current(
        &self,
        tree: &mut NodeTree,
        node: NodeId,
        replacement: &Replacement,
    ) -> Result<bool> {
        let mut matched = Vec::new();
        if !tree.matches(&self.rule, node, &mut matched) {
            return Ok(false);
        }
        replacement.apply(tree, node, &matched)?;
        Ok(true)
    }
}

impl SearchState for RuleSearch {
    fn session(&self) -> &Session {
        &self.session
    }

    fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    fn test(&mut self, tree: &NodeTree, node: NodeId) -> bool {
        self.matched.clear();
        tree.matches(&self.rule, node, &mut self.matched)
    }

    fn on_discover(&mut self, tree: &mut NodeTree, node: NodeId) {
        self.session.emit(SearchEvent::Discovered {
            node,
            path: tree.path(node),
        });

        if let Some(replacement) = &self.replacement {
            match replacement.apply(tree, node, &self.matched) {
                Ok(()) => self.replaced += 1,
                Err(e) => log::warn!("Replace failed at {}: {e}", tree.path(node)),
            }
        }
    }
}
