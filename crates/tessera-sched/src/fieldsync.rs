//! Per-field signal discipline
//!
//! Each field tracks exactly two signals: `last_read` and `last_write`.
//! Accesses weave new actions into those two:
//!
//! - a **read** forks `last_write` (one branch gates the action, one
//!   remains as `last_write`); the action's output merges into `last_read`.
//!   Concurrent readers overlap.
//! - a **write** gates on `merge(last_read, last_write)` and forks its
//!   output into both, serializing against everything.
//! - a **commuting write** (reductions; halo scatters) gates on
//!   `last_write` and joins `last_write` with its output; `last_read` is
//!   untouched, so these commute with reads and with each other.
//!
//! This yields serializability per field without a global lock and maximal
//! parallelism between disjoint accesses.

use tessera_exec::Privilege;

use crate::scheduler::Scheduler;
use crate::signal::{Signal, SignalGraph};

/// How an access participates in the discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    /// Order-independent writes: reductions, halo scatters
    Commuting,
}

impl AccessKind {
    pub fn of(privilege: Privilege) -> Self {
        match privilege {
            Privilege::ReadOnly => AccessKind::Read,
            Privilege::ReadWrite => AccessKind::Write,
            Privilege::Reduce(_) => AccessKind::Commuting,
        }
    }
}

/// The two signals a field carries
pub struct FieldSync {
    last_read: Option<Signal>,
    last_write: Option<Signal>,
}

impl FieldSync {
    /// A quiescent field: both signals pre-triggered
    pub fn new(graph: &SignalGraph) -> Self {
        Self {
            last_read: Some(graph.source()),
            last_write: Some(graph.source()),
        }
    }

    /// The input signal an access must wait on
    ///
    /// Must be paired with [`FieldSync::attach_output`] for the same kind
    /// before the next access touches this field.
    pub fn collect_input(&mut self, graph: &SignalGraph, kind: AccessKind) -> Signal {
        match kind {
            AccessKind::Read | AccessKind::Commuting => {
                let lw = self.last_write.take().expect("collect/attach are paired");
                let mut forks = graph.fork(lw, 2);
                let keep = forks.pop().expect("fork of 2");
                let input = forks.pop().expect("fork of 2");
                self.last_write = Some(keep);
                input
            }
            AccessKind::Write => {
                let lr = self.last_read.take().expect("collect/attach are paired");
                let lw = self.last_write.take().expect("collect/attach are paired");
                graph.merge(vec![lr, lw])
            }
        }
    }

    /// Fold the access's completion back into the field's signals
    pub fn attach_output(&mut self, graph: &SignalGraph, kind: AccessKind, output: Signal) {
        match kind {
            AccessKind::Read => {
                let lr = self.last_read.take().expect("collect/attach are paired");
                self.last_read = Some(graph.merge(vec![lr, output]));
            }
            AccessKind::Write => {
                let mut forks = graph.fork(output, 2);
                self.last_write = forks.pop();
                self.last_read = forks.pop();
            }
            AccessKind::Commuting => {
                let lw = self.last_write.take().expect("collect/attach are paired");
                self.last_write = Some(graph.merge(vec![lw, output]));
            }
        }
    }
}

/// One field access of a task
pub struct TaskAccess<'a> {
    pub sync: &'a mut FieldSync,
    pub privilege: Privilege,
}

/// Launch a task against its field accesses
///
/// Collects input signals per the discipline, schedules the task function
/// on `worker`, then forks the completion back into every accessed field.
/// The returned signal triggers when the task has run.
pub fn launch_task(
    sched: &Scheduler,
    accesses: &mut [TaskAccess<'_>],
    worker: usize,
    label: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> Signal {
    let graph = sched.graph();
    let inputs: Vec<Signal> = accesses
        .iter_mut()
        .map(|a| a.sync.collect_input(graph, AccessKind::of(a.privilege)))
        .collect();
    let gate = graph.merge(inputs);
    let done = sched.exec_labeled(gate, worker, label, f);

    let mut forks = graph.fork(done, accesses.len() + 1);
    let completion = forks.pop().expect("one fork per access plus the caller's");
    for (access, out) in accesses.iter_mut().zip(forks) {
        access.sync.attach_output(graph, AccessKind::of(access.privilege), out);
    }
    completion
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tessera_types::ReduceOp;

    #[test]
    fn test_write_then_read_ordering() {
        let sched = Scheduler::with_workers(2);
        let mut sync = FieldSync::new(sched.graph());
        let cell = Arc::new(Mutex::new(0u64));

        let w = Arc::clone(&cell);
        let writer = launch_task(
            &sched,
            &mut [TaskAccess {
                sync: &mut sync,
                privilege: Privilege::ReadWrite,
            }],
            0,
            "writer",
            move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                *w.lock() = 42;
            },
        );
        sched.graph().sink(writer);

        let observed = Arc::new(Mutex::new(0u64));
        let r = Arc::clone(&cell);
        let o = Arc::clone(&observed);
        let reader = launch_task(
            &sched,
            &mut [TaskAccess {
                sync: &mut sync,
                privilege: Privilege::ReadOnly,
            }],
            1,
            "reader",
            move || *o.lock() = *r.lock(),
        );
        sched.wait(&reader);
        assert_eq!(*observed.lock(), 42);
    }

    #[test]
    fn test_reductions_commute_with_reads() {
        let sched = Scheduler::with_workers(2);
        let mut sync = FieldSync::new(sched.graph());
        let acc = Arc::new(Mutex::new(Vec::new()));

        // A slow read followed by a reduce: the reduce's input is the last
        // write, not the read, so it may start before the read finishes.
        let a1 = Arc::clone(&acc);
        let read = launch_task(
            &sched,
            &mut [TaskAccess {
                sync: &mut sync,
                privilege: Privilege::ReadOnly,
            }],
            0,
            "read",
            move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                a1.lock().push("read");
            },
        );
        let a2 = Arc::clone(&acc);
        let reduce = launch_task(
            &sched,
            &mut [TaskAccess {
                sync: &mut sync,
                privilege: Privilege::Reduce(ReduceOp::Add),
            }],
            1,
            "reduce",
            move || a2.lock().push("reduce"),
        );
        sched.wait(&reduce);
        // The reduce finished without waiting for the slow read.
        assert_eq!(acc.lock().first().copied(), Some("reduce"));
        sched.wait(&read);
    }

    #[test]
    fn test_two_reads_overlap_then_write_waits() {
        let sched = Scheduler::with_workers(3);
        let mut sync = FieldSync::new(sched.graph());
        let log = Arc::new(Mutex::new(Vec::new()));

        for (i, delay) in [(0usize, 15u64), (1, 1)] {
            let l = Arc::clone(&log);
            let s = launch_task(
                &sched,
                &mut [TaskAccess {
                    sync: &mut sync,
                    privilege: Privilege::ReadOnly,
                }],
                i,
                "read",
                move || {
                    std::thread::sleep(std::time::Duration::from_millis(delay));
                    l.lock().push(format!("read{i}"));
                },
            );
            sched.graph().sink(s);
        }
        let l = Arc::clone(&log);
        let write = launch_task(
            &sched,
            &mut [TaskAccess {
                sync: &mut sync,
                privilege: Privilege::ReadWrite,
            }],
            2,
            "write",
            move || l.lock().push("write".into()),
        );
        sched.wait(&write);

        let entries = log.lock();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2], "write", "the write runs after both reads: {entries:?}");
    }

    #[test]
    fn test_unrelated_fields_do_not_serialize() {
        let sched = Scheduler::with_workers(2);
        let mut f1 = FieldSync::new(sched.graph());
        let mut f2 = FieldSync::new(sched.graph());
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = Arc::clone(&log);
        let slow = launch_task(
            &sched,
            &mut [TaskAccess {
                sync: &mut f1,
                privilege: Privilege::ReadWrite,
            }],
            0,
            "slow",
            move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                l.lock().push("slow");
            },
        );
        let l = Arc::clone(&log);
        let fast = launch_task(
            &sched,
            &mut [TaskAccess {
                sync: &mut f2,
                privilege: Privilege::ReadWrite,
            }],
            1,
            "fast",
            move || l.lock().push("fast"),
        );
        sched.wait(&fast);
        assert_eq!(log.lock().first().copied(), Some("fast"));
        sched.wait(&slow);
    }
}
