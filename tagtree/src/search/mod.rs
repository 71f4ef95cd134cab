//! Search sessions over the node tree.
//!
//! A [`SearchState`] decides what matches and reacts to the walk's
//! callbacks; a [`SearchWorker`] drives the walk itself, one node per step,
//! and can be paused on discovery, resumed, cancelled or moved onto a
//! background thread.

mod strategies;
mod worker;

pub use strategies::{NameValueSearch, Replacement, RuleSearch};
pub use worker::{CancelToken, Continuation, Frame, SearchHandle, SearchStatus, SearchWorker};

use crate::node::{NodeId, NodeTree};
use std::sync::mpsc;

/// Callback notifications forwarded to whoever owns the presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
    Discovered { node: NodeId, path: String },
    Progress { node: NodeId, path: String },
    Collapsed { node: NodeId },
    Completed,
}

/// Per-session bookkeeping shared by every strategy.
#[derive(Debug)]
pub struct Session {
    pub root: NodeId,
    /// Stop after each discovery ("find next") instead of walking the
    /// whole tree ("find all" / "replace all").
    pub terminate_on_discover: bool,
    /// Minimum seconds between progress callbacks.
    pub progress_rate: f32,
    pub continuation: Continuation,
    events: Option<mpsc::Sender<SearchEvent>>,
}

impl Session {
    pub fn new(root: NodeId, terminate_on_discover: bool) -> Self {
        Session {
            root,
            terminate_on_discover,
            progress_rate: 0.5,
            continuation: Continuation::new(root),
            events: None,
        }
    }

    /// Start a fresh walk from the root.
    pub fn reset(&mut self) {
        self.continuation = Continuation::new(self.root);
    }

    /// Receive this session's callbacks as events from now on.
    pub fn subscribe(&mut self) -> mpsc::Receiver<SearchEvent> {
        let (tx, rx) = mpsc::channel();
        self.events = Some(tx);
        rx
    }

    pub fn emit(&self, event: SearchEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver just means nobody is listening anymore
            let _ = tx.send(event);
        }
    }
}

/// Strategy for one search session.
///
/// The worker calls exactly one hook at a time, in visitation order. The
/// default hooks forward a [`SearchEvent`] to the session's subscriber.
pub trait SearchState: Send {
    fn session(&self) -> &Session;

    fn session_mut(&mut self) -> &mut Session;

    fn test(&mut self, tree: &NodeTree, node: NodeId) -> bool;

    /// A node passed `test`. In continue mode the tree may be mutated here
    /// before the walk resumes.
    fn on_discover(&mut self, tree: &mut NodeTree, node: NodeId) {
        self.session().emit(SearchEvent::Discovered {
            node,
            path: tree.path(node),
        });
    }

    fn on_progress(&mut self, tree: &NodeTree, node: NodeId) {
        self.session().emit(SearchEvent::Progress {
            node,
            path: tree.path(node),
        });
    }

    /// A container the walk expanded has been fully visited. Its decoded
    /// children are released unless they carry unsaved edits.
    ///
    /// Only called when backtracking out of containers this walk expanded
    /// itself; containers that were already expanded are left as they were
    /// and get no callback.
    fn on_collapse(&mut self, tree: &mut NodeTree, node: NodeId) {
        if let Err(e) = tree.release(node) {
            log::debug!("Could not release {node}: {e}");
        }
        self.session().emit(SearchEvent::Collapsed { node });
    }

    fn on_search_complete(&mut self, _tree: &NodeTree, _node: Option<NodeId>) {
        self.session().emit(SearchEvent::Completed);
    }
}
