use super::SearchState;
use crate::error::{Result, TagTreeError};
use crate::node::{NodeId, NodeTree};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    Idle,
    Running,
    /// Stopped right after a discovery; stepping again resumes the walk.
    Paused,
    Cancelled,
    Completed,
}

impl SearchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SearchStatus::Cancelled | SearchStatus::Completed)
    }
}

/// Shared cancellation flag, observed by the worker between node visits.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One level of the depth-first walk: a visited container and a snapshot
/// of its children taken before it was tested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub node: NodeId,
    pub children: Vec<NodeId>,
    pub next: usize,
    pub expanded_by_search: bool,
}

/// Where a paused walk picks up again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    pending: Option<NodeId>,
    frames: Vec<Frame>,
}

impl Continuation {
    pub fn new(root: NodeId) -> Self {
        Continuation {
            pending: Some(root),
            frames: Vec::new(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.pending.is_none() && self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Next child index at each depth, from the search root down.
    pub fn positions(&self) -> Vec<usize> {
        self.frames.iter().map(|f| f.next).collect()
    }
}

/// Drives a [`SearchState`] through an iterative pre-order walk.
pub struct SearchWorker<S: SearchState> {
    state: S,
    status: SearchStatus,
    cancel: CancelToken,
    last_progress: Option<Instant>,
}

impl<S: SearchState> SearchWorker<S> {
    /// Build a worker around `state`. If the state already holds a
    /// continuation from an earlier worker, the walk resumes there.
    pub fn new(state: S) -> Self {
        SearchWorker {
            state,
            status: SearchStatus::Idle,
            cancel: CancelToken::new(),
            last_progress: None,
        }
    }

    pub fn status(&self) -> SearchStatus {
        self.status
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Back to `Idle` with a fresh walk from the session root.
    pub fn reset(&mut self) {
        self.state.session_mut().reset();
        self.status = SearchStatus::Idle;
        self.cancel = CancelToken::new();
        self.last_progress = None;
    }

    /// Visit at most one node (or finish one backtrack) and report the
    /// resulting status.
    pub fn step(&mut self, tree: &mut NodeTree) -> SearchStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        if self.cancel.is_cancelled() {
            log::debug!("Search cancelled");
            self.status = SearchStatus::Cancelled;
            return self.status;
        }

        self.status = SearchStatus::Running;
        let mut continuation = std::mem::take(&mut self.state.session_mut().continuation);
        let status = self.advance(tree, &mut continuation);
        self.state.session_mut().continuation = continuation;
        self.status = status;
        status
    }

    /// Step until the walk pauses on a discovery or reaches a terminal state.
    pub fn run(&mut self, tree: &mut NodeTree) -> SearchStatus {
        loop {
            match self.step(tree) {
                SearchStatus::Running => continue,
                status => return status,
            }
        }
    }

    /// Run on a background thread. The tree is locked for one step at a
    /// time, so callbacks never overlap with each other or with the caller.
    pub fn spawn(self, tree: Arc<Mutex<NodeTree>>) -> SearchHandle<S>
    where
        S: 'static,
    {
        let cancel = self.cancel.clone();
        let mut worker = self;
        let thread = std::thread::spawn(move || {
            loop {
                let status = {
                    let mut guard = match tree.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    worker.step(&mut guard)
                };
                if status != SearchStatus::Running {
                    break;
                }
            }
            worker
        });
        SearchHandle { cancel, thread }
    }

    fn advance(&mut self, tree: &mut NodeTree, cont: &mut Continuation) -> SearchStatus {
        if let Some(node) = cont.pending.take() {
            return self.visit(tree, cont, node);
        }

        while let Some(frame) = cont.frames.last_mut() {
            if frame.next < frame.children.len() {
                let child = frame.children[frame.next];
                frame.next += 1;
                // Removed or moved since the snapshot was taken
                if tree.parent(child) != Some(frame.node) {
                    continue;
                }
                return self.visit(tree, cont, child);
            }

            let Some(done) = cont.frames.pop() else {
                break;
            };
            if done.expanded_by_search && tree.contains(done.node) {
                let _ = tree.collapse(done.node);
                self.state.on_collapse(tree, done.node);
                return SearchStatus::Running;
            }
        }

        self.state.on_search_complete(tree, None);
        SearchStatus::Completed
    }

    fn visit(&mut self, tree: &mut NodeTree, cont: &mut Continuation, node: NodeId) -> SearchStatus {
        if !tree.contains(node) {
            return SearchStatus::Running;
        }

        let rate = self.state.session().progress_rate;
        let due = self
            .last_progress
            .map_or(true, |at| at.elapsed().as_secs_f32() >= rate);
        if due {
            self.last_progress = Some(Instant::now());
            self.state.on_progress(tree, node);
        }

        let mut expanded_by_search = false;
        if tree.is_container(node) && !tree.is_expanded(node) {
            if let Err(e) = tree.expand(node) {
                log::warn!("Skipping {}: {e}", tree.path(node));
                return SearchStatus::Running;
            }
            expanded_by_search = true;
        }

        // Snapshot before the test so anything on_discover inserts is not walked
        let children = tree.children(node).to_vec();
        cont.frames.push(Frame {
            node,
            children,
            next: 0,
            expanded_by_search,
        });

        if self.state.test(tree, node) {
            self.state.on_discover(tree, node);
            if self.state.session().terminate_on_discover {
                return SearchStatus::Paused;
            }
        }
        SearchStatus::Running
    }
}

/// A worker running on its own thread.
pub struct SearchHandle<S: SearchState> {
    cancel: CancelToken,
    thread: JoinHandle<SearchWorker<S>>,
}

impl<S: SearchState> SearchHandle<S> {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the thread to stop and take the worker back. A paused
    /// worker can be spawned again to find the next match.
    pub fn join(self) -> Result<SearchWorker<S>> {
        self.thread
            .join()
            .map_err(|_| TagTreeError::Other("search thread panicked".to_string()))
    }
}
