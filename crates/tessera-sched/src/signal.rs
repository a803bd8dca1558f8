//! One-shot signals and the action graph
//!
//! A signal is a one-shot token: "a particular read or write has
//! completed". Actions are closures gated on signals; the graph is driven
//! by reference counts, not by an async runtime. `exec` hangs an action off
//! a signal and hands back the action's completion signal; `fork`
//! duplicates, `merge` joins, `sink` discards.
//!
//! Signal handles are move-only: consuming one (fork/merge/exec/sink) is
//! how a reference is dropped, so the one-shot discipline is enforced by
//! ownership rather than at runtime.
//!
//! Propagation runs under one lock - the cooperative single-threaded
//! controller - while action bodies run on the worker pool (see
//! [`crate::scheduler`]).

use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};

/// A one-shot token, move-only
#[derive(Debug)]
pub struct Signal {
    pub(crate) id: u64,
}

/// What happens when a node fires
pub(crate) enum Downstream {
    /// Decrement another signal's remaining count
    Node(u64),
    /// Release an action for dispatch
    Action(u64),
}

pub(crate) struct SignalNode {
    /// Untriggered inputs; fires at zero
    pub remaining: usize,
    pub triggered: bool,
    pub downstream: Vec<Downstream>,
}

/// The signal graph: nodes, pending actions, and the fire queue
///
/// Kept separate from the worker pool so that propagation (cheap, locked)
/// and action execution (arbitrary, parallel) cannot deadlock each other.
pub struct SignalGraph {
    pub(crate) state: Mutex<GraphState>,
    /// Wakes `wait` callers when anything fires
    pub(crate) fired: Condvar,
}

pub(crate) struct GraphState {
    pub nodes: HashMap<u64, SignalNode>,
    next_id: u64,
    /// Actions released by propagation, not yet dispatched
    pub ready: Vec<u64>,
}

impl SignalGraph {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GraphState {
                nodes: HashMap::new(),
                next_id: 1,
                ready: Vec::new(),
            }),
            fired: Condvar::new(),
        }
    }

    /// A signal that is already triggered
    pub fn source(&self) -> Signal {
        let mut st = self.state.lock();
        let id = st.alloc(SignalNode {
            remaining: 0,
            triggered: true,
            downstream: Vec::new(),
        });
        Signal { id }
    }

    /// Duplicate a signal `n` ways; each copy triggers iff `s` does
    pub fn fork(&self, s: Signal, n: usize) -> Vec<Signal> {
        let mut st = self.state.lock();
        let triggered = st.nodes[&s.id].triggered;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let id = st.alloc(SignalNode {
                remaining: usize::from(!triggered),
                triggered,
                downstream: Vec::new(),
            });
            if !triggered {
                st.nodes.get_mut(&s.id).unwrap().downstream.push(Downstream::Node(id));
            }
            out.push(Signal { id });
        }
        out
    }

    /// A signal that triggers once every input has
    pub fn merge(&self, inputs: Vec<Signal>) -> Signal {
        let mut st = self.state.lock();
        let pending: Vec<u64> = inputs
            .iter()
            .filter(|s| !st.nodes[&s.id].triggered)
            .map(|s| s.id)
            .collect();
        let id = st.alloc(SignalNode {
            remaining: pending.len(),
            triggered: pending.is_empty(),
            downstream: Vec::new(),
        });
        for input in pending {
            st.nodes.get_mut(&input).unwrap().downstream.push(Downstream::Node(id));
        }
        Signal { id }
    }

    /// Drop a reference
    pub fn sink(&self, s: Signal) {
        // Ownership is the reference count; the node stays for any
        // downstream still attached to it.
        let _ = s;
    }

    /// Non-consuming peek, used by spin-waits
    pub fn is_triggered(&self, s: &Signal) -> bool {
        self.state.lock().nodes[&s.id].triggered
    }

    /// Cooperative wait: yields to the event pump between polls
    pub fn wait(&self, s: &Signal) {
        let mut st = self.state.lock();
        while !st.nodes[&s.id].triggered {
            self.fired.wait_for(&mut st, std::time::Duration::from_micros(2));
        }
    }

    /// Trigger a node and propagate; returns actions released to run
    pub(crate) fn trigger(&self, id: u64) -> Vec<u64> {
        let mut st = self.state.lock();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let node = st.nodes.get_mut(&id).unwrap();
            debug_assert!(!node.triggered, "signal {id} triggered twice");
            node.triggered = true;
            let downstream = std::mem::take(&mut node.downstream);
            for d in downstream {
                match d {
                    Downstream::Node(next) => {
                        let n = st.nodes.get_mut(&next).unwrap();
                        n.remaining -= 1;
                        if n.remaining == 0 {
                            stack.push(next);
                        }
                    }
                    Downstream::Action(action) => st.ready.push(action),
                }
            }
        }
        self.fired.notify_all();
        std::mem::take(&mut st.ready)
    }

    /// A fresh untriggered signal, fired later by [`SignalGraph::trigger`]
    pub(crate) fn pending_signal(&self) -> Signal {
        let mut st = self.state.lock();
        let id = st.alloc(SignalNode {
            remaining: 1,
            triggered: false,
            downstream: Vec::new(),
        });
        Signal { id }
    }

    /// Gate an action on `s`; returns whether it is ready right now
    ///
    /// The caller must have registered the action's closure *before* this
    /// call: a concurrent trigger of `s` may release the action the moment
    /// the downstream edge exists.
    pub(crate) fn gate_action(&self, s: &Signal, action_id: u64) -> bool {
        let mut st = self.state.lock();
        let ready_now = st.nodes[&s.id].triggered;
        if !ready_now {
            st.nodes
                .get_mut(&s.id)
                .unwrap()
                .downstream
                .push(Downstream::Action(action_id));
        }
        ready_now
    }
}

impl Default for SignalGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphState {
    fn alloc(&mut self, node: SignalNode) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, node);
        id
    }
}
