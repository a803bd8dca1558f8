//! Action scheduler and worker pool
//!
//! The controller is the signal graph's lock: propagation is serialized,
//! cheap, and never runs user code. Released actions move to a fixed pool
//! of worker threads; an action's completion triggers its output signal,
//! which may release further actions. One worker suffices for the current
//! core; the pool permits N.
//!
//! There is no cancellation: actions run to completion once scheduled, and
//! a panicking action aborts the process - leaking its signals would
//! silently wedge every dependent action.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::signal::{Signal, SignalGraph};

struct Job {
    closure: Box<dyn FnOnce() + Send>,
    output: u64,
    label: &'static str,
}

struct PendingAction {
    closure: Box<dyn FnOnce() + Send>,
    output: u64,
    worker: usize,
    label: &'static str,
}

struct Inner {
    graph: SignalGraph,
    actions: Mutex<HashMap<u64, PendingAction>>,
    /// Filled once after the workers spawn
    worker_txs: Mutex<Vec<Sender<Job>>>,
}

impl Inner {
    fn dispatch(self: &Arc<Self>, action_id: u64) {
        let action = self
            .actions
            .lock()
            .remove(&action_id)
            .expect("released action is pending");
        let txs = self.worker_txs.lock();
        if txs.is_empty() {
            // Scheduler is shutting down; late releases have nowhere to go.
            return;
        }
        let tx = &txs[action.worker % txs.len()];
        tx.send(Job {
            closure: action.closure,
            output: action.output,
            label: action.label,
        })
        .expect("worker pool alive while scheduler lives");
    }
}

/// The per-node cooperative scheduler
pub struct Scheduler {
    inner: Arc<Inner>,
    next_action: AtomicU64,
    threads: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// A scheduler with one worker, the core default
    pub fn new() -> Self {
        Self::with_workers(1)
    }

    /// A scheduler with `n` workers
    pub fn with_workers(n: usize) -> Self {
        let inner = Arc::new(Inner {
            graph: SignalGraph::new(),
            actions: Mutex::new(HashMap::new()),
            worker_txs: Mutex::new(Vec::new()),
        });
        let mut threads = Vec::with_capacity(n);
        let mut txs = Vec::with_capacity(n);
        for worker_id in 0..n.max(1) {
            let (tx, rx): (Sender<Job>, Receiver<Job>) = crossbeam_channel::unbounded();
            txs.push(tx);
            let inner = Arc::clone(&inner);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("tessera-worker-{worker_id}"))
                    .spawn(move || worker_loop(inner, rx))
                    .expect("spawn worker thread"),
            );
        }
        *inner.worker_txs.lock() = txs;
        Self {
            inner,
            next_action: AtomicU64::new(1),
            threads,
        }
    }

    pub fn graph(&self) -> &SignalGraph {
        &self.inner.graph
    }

    /// Schedule `f` on `worker` once `s` triggers; the returned signal
    /// triggers when `f` completes
    pub fn exec(&self, s: Signal, worker: usize, f: impl FnOnce() + Send + 'static) -> Signal {
        self.exec_labeled(s, worker, "action", f)
    }

    /// `exec` with a label for launch-dependency dumps
    pub fn exec_labeled(
        &self,
        s: Signal,
        worker: usize,
        label: &'static str,
        f: impl FnOnce() + Send + 'static,
    ) -> Signal {
        let action_id = self.next_action.fetch_add(1, Ordering::Relaxed);
        let output = self.inner.graph.pending_signal();
        // The action must be registered before the downstream edge exists:
        // a completion on another worker may release it immediately.
        self.inner.actions.lock().insert(
            action_id,
            PendingAction {
                closure: Box::new(f),
                output: output.id,
                worker,
                label,
            },
        );
        let ready_now = self.inner.graph.gate_action(&s, action_id);
        self.inner.graph.sink(s);
        tracing::trace!(action = action_id, label, ready_now, "action_scheduled");
        if ready_now {
            self.inner.dispatch(action_id);
        }
        output
    }

    /// Block until `s` triggers (cooperative poll)
    pub fn wait(&self, s: &Signal) {
        self.inner.graph.wait(s);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Closing the channels ends the worker loops.
        self.inner.worker_txs.lock().clear();
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

fn worker_loop(inner: Arc<Inner>, rx: Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        let label = job.label;
        if catch_unwind(AssertUnwindSafe(job.closure)).is_err() {
            // A crashed action would leak its signals and wedge every
            // dependent; treat it as fatal.
            tracing::error!(label, "worker action panicked; aborting");
            std::process::abort();
        }
        let released = inner.graph.trigger(job.output);
        for action in released {
            inner.dispatch(action);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_exec_runs_after_trigger() {
        let sched = Scheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let s = sched.graph().source();
        let done = sched.exec(s, 0, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        sched.wait(&done);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_chain_preserves_order() {
        let sched = Scheduler::with_workers(2);
        let log = Arc::new(Mutex::new(Vec::new()));

        let s = sched.graph().source();
        let l1 = Arc::clone(&log);
        let first = sched.exec(s, 0, move || l1.lock().push(1));
        let l2 = Arc::clone(&log);
        let second = sched.exec(first, 1, move || l2.lock().push(2));
        sched.wait(&second);

        assert_eq!(*log.lock(), vec![1, 2]);
    }

    #[test]
    fn test_merge_gates_until_both_done() {
        let sched = Scheduler::with_workers(2);
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = sched.graph().source();
        let b = sched.graph().source();
        let la = Arc::clone(&log);
        let done_a = sched.exec(a, 0, move || {
            std::thread::sleep(std::time::Duration::from_millis(5));
            la.lock().push("a");
        });
        let lb = Arc::clone(&log);
        let done_b = sched.exec(b, 1, move || lb.lock().push("b"));

        let joined = sched.graph().merge(vec![done_a, done_b]);
        let lj = Arc::clone(&log);
        let all = sched.exec(joined, 0, move || lj.lock().push("after"));
        sched.wait(&all);

        let entries = log.lock();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2], "after");
    }
}
