//! Control-plane events and the in-process fleet
//!
//! All cross-node traffic is named events with a serialized payload. Node 0
//! is the control node; compute nodes `1..N` apply each event against their
//! local store mirror and acknowledge it. Each node consumes its queue in
//! order, so events of one type are processed in broadcast order; nothing
//! is guaranteed *between* unrelated event types.
//!
//! Task bodies cannot cross a wire, so `newTask` registers metadata and
//! `launchTask` resolves the body from a process-wide registry; the control
//! plane carries only UIDs and serialized state.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use tessera_exec::Privilege;
use tessera_store::{RelationSpec, Store};
use tessera_types::{ElemType, FieldRef, NodeId, ReduceOp, RelationId, RuntimeConfig, Value};

use crate::error::{Error, Result};
use crate::fieldsync::{launch_task, FieldSync, TaskAccess};
use crate::ghost::GhostReadiness;
use crate::partition::GridPartition;
use crate::scheduler::Scheduler;

/// Wire form of a relation spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RelationSpecWire {
    Plain { size: usize },
    Grid { dims: Vec<usize>, periodic: Vec<bool> },
    Elastic { size: usize },
}

impl From<RelationSpecWire> for RelationSpec {
    fn from(w: RelationSpecWire) -> Self {
        match w {
            RelationSpecWire::Plain { size } => RelationSpec::Plain { size },
            RelationSpecWire::Grid { dims, periodic } => RelationSpec::Grid { dims, periodic },
            RelationSpecWire::Elastic { size } => RelationSpec::Elastic { size },
        }
    }
}

/// Wire form of an access privilege
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum WirePrivilege {
    ReadOnly,
    ReadWrite,
    Reduce(ReduceOp),
}

impl From<WirePrivilege> for Privilege {
    fn from(w: WirePrivilege) -> Self {
        match w {
            WirePrivilege::ReadOnly => Privilege::ReadOnly,
            WirePrivilege::ReadWrite => Privilege::ReadWrite,
            WirePrivilege::Reduce(op) => Privilege::Reduce(op),
        }
    }
}

/// The canonical control-plane event set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ControlEvent {
    NewRelation {
        uid: RelationId,
        spec: RelationSpecWire,
    },
    GlobalGridPartition {
        uid: RelationId,
        blocking: Vec<u32>,
    },
    RecordNewField {
        field: FieldRef,
        name: String,
        elem: ElemType,
    },
    PrepareField {
        field: FieldRef,
    },
    LoadFieldConstant {
        field: FieldRef,
        value: Value,
    },
    MarkGhostsReady {
        field: FieldRef,
    },
    NewTask {
        task: u64,
        relation: RelationId,
        accesses: Vec<(FieldRef, WirePrivilege)>,
    },
    LaunchTask {
        task: u64,
    },
}

/// Acknowledgement of one applied event
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ack {
    pub node: NodeId,
    pub seq: u64,
}

/// A task body resolved at `launchTask` time
pub type TaskFn = Arc<dyn Fn(NodeId, &Mutex<Store>) + Send + Sync>;

/// Process-wide task-body registry
#[derive(Clone, Default)]
pub struct TaskRegistry {
    bodies: Arc<Mutex<HashMap<u64, TaskFn>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task: u64, body: TaskFn) {
        self.bodies.lock().insert(task, body);
    }

    fn get(&self, task: u64) -> Option<TaskFn> {
        self.bodies.lock().get(&task).cloned()
    }
}

struct PendingTask {
    accesses: Vec<(FieldRef, Privilege)>,
}

/// One compute node's mirror state
struct NodeState {
    node: NodeId,
    store: Arc<Mutex<Store>>,
    sched: Scheduler,
    field_sync: HashMap<FieldRef, FieldSync>,
    partitions: HashMap<RelationId, GridPartition>,
    readiness: HashMap<FieldRef, GhostReadiness>,
    tasks: HashMap<u64, PendingTask>,
    registry: TaskRegistry,
    compute_nodes: u32,
}

impl NodeState {
    fn apply(&mut self, event: ControlEvent) -> Result<()> {
        match event {
            ControlEvent::NewRelation { uid, spec } => {
                let created = self.store.lock().new_relation(spec.into())?;
                debug_assert_eq!(created, uid, "control and compute relation uids must agree");
            }
            ControlEvent::GlobalGridPartition { uid, blocking } => {
                let dims = {
                    let store = self.store.lock();
                    store.relation(uid)?.dims().map(<[usize]>::to_vec)
                };
                if let Some(dims) = dims {
                    let partition = GridPartition::new(&dims, &blocking, self.compute_nodes)?;
                    self.partitions.insert(uid, partition);
                }
            }
            ControlEvent::RecordNewField { field, name, elem } => {
                let created = self.store.lock().new_field(field.relation, &name, elem)?;
                debug_assert_eq!(created, field, "control and compute field refs must agree");
                self.field_sync
                    .insert(field, FieldSync::new(self.sched.graph()));
            }
            ControlEvent::PrepareField { field } => {
                // Storage is allocated at record time; preparing installs
                // the ghost-readiness counter the controller spins on.
                self.readiness.entry(field).or_default();
                if let Some(p) = self.partitions.get(&field.relation) {
                    tracing::debug!(field = %field, blocks = p.blocks.len(), "field_prepared_partitioned");
                }
            }
            ControlEvent::LoadFieldConstant { field, value } => {
                self.store.lock().field_mut(field)?.load_constant(&value)?;
            }
            ControlEvent::MarkGhostsReady { field } => {
                if let Some(readiness) = self.readiness.get(&field) {
                    readiness.spin_ready();
                }
            }
            ControlEvent::NewTask { task, accesses, .. } => {
                self.tasks.insert(
                    task,
                    PendingTask {
                        accesses: accesses.into_iter().map(|(f, p)| (f, p.into())).collect(),
                    },
                );
            }
            ControlEvent::LaunchTask { task } => {
                let access_list = match self.tasks.get(&task) {
                    Some(p) => p.accesses.clone(),
                    None => {
                        tracing::warn!(task, "launchTask for unknown task");
                        return Ok(());
                    }
                };
                let body = match self.registry.get(task) {
                    Some(b) => b,
                    None => {
                        tracing::warn!(task, "launchTask with no registered body");
                        return Ok(());
                    }
                };
                // Collect the per-field inputs, run the body on a worker,
                // fork the completion back. The syncs leave the map for
                // the duration of the weave and return afterwards.
                let mut taken: Vec<(FieldRef, Privilege, FieldSync)> = access_list
                    .into_iter()
                    .map(|(fref, privilege)| {
                        let sync = self
                            .field_sync
                            .remove(&fref)
                            .unwrap_or_else(|| FieldSync::new(self.sched.graph()));
                        (fref, privilege, sync)
                    })
                    .collect();
                let mut accesses: Vec<TaskAccess<'_>> = taken
                    .iter_mut()
                    .map(|(_, privilege, sync)| TaskAccess {
                        sync,
                        privilege: *privilege,
                    })
                    .collect();
                let node = self.node;
                let store = Arc::clone(&self.store);
                let done = launch_task(&self.sched, &mut accesses, 0, "control_task", move || {
                    body(node, &store);
                });
                drop(accesses);
                for (fref, _, sync) in taken {
                    self.field_sync.insert(fref, sync);
                }
                self.sched.wait(&done);
            }
        }
        Ok(())
    }
}

struct NodeHandle {
    node: NodeId,
    tx: Sender<String>,
    ack_rx: Receiver<Ack>,
    thread: Option<JoinHandle<()>>,
}

/// The control node's view of the compute fleet
pub struct Fleet {
    nodes: Vec<NodeHandle>,
    seq: u64,
}

impl Fleet {
    /// Spawn `config.num_partitions` compute nodes (node 0 is the caller)
    pub fn launch(config: &RuntimeConfig, registry: TaskRegistry) -> Self {
        let compute_nodes = config.num_partitions;
        let mut nodes = Vec::with_capacity(compute_nodes as usize);
        for n in 1..=compute_nodes {
            let node = NodeId::new(n);
            let (tx, rx): (Sender<String>, Receiver<String>) = crossbeam_channel::unbounded();
            let (ack_tx, ack_rx) = crossbeam_channel::unbounded();
            let registry = registry.clone();
            let node_config = RuntimeConfig::single_node(1);
            let thread = std::thread::Builder::new()
                .name(format!("tessera-node-{n}"))
                .spawn(move || {
                    let mut state = NodeState {
                        node,
                        store: Arc::new(Mutex::new(Store::new(node_config))),
                        sched: Scheduler::new(),
                        field_sync: HashMap::new(),
                        partitions: HashMap::new(),
                        readiness: HashMap::new(),
                        tasks: HashMap::new(),
                        registry,
                        compute_nodes,
                    };
                    let mut seq = 0u64;
                    while let Ok(payload) = rx.recv() {
                        seq += 1;
                        match serde_json::from_str::<ControlEvent>(&payload) {
                            Ok(event) => {
                                if let Err(e) = state.apply(event) {
                                    tracing::error!(node = %node, error = %e, "event_apply_failed");
                                }
                            }
                            Err(e) => tracing::error!(node = %node, error = %e, "event_decode_failed"),
                        }
                        if ack_tx.send(Ack { node, seq }).is_err() {
                            break;
                        }
                    }
                })
                .expect("spawn compute node");
            nodes.push(NodeHandle {
                node,
                tx,
                ack_rx,
                thread: Some(thread),
            });
        }
        tracing::info!(nodes = compute_nodes, "fleet_launched");
        Self { nodes, seq: 0 }
    }

    /// Broadcast one event and wait for every acknowledgement
    pub fn broadcast(&mut self, event: &ControlEvent) -> Result<Vec<Ack>> {
        let payload = serde_json::to_string(event)?;
        self.seq += 1;
        for n in &self.nodes {
            n.tx.send(payload.clone()).map_err(|_| Error::NodeGone(n.node))?;
        }
        let mut acks = Vec::with_capacity(self.nodes.len());
        for n in &self.nodes {
            let ack = n.ack_rx.recv().map_err(|_| Error::NodeGone(n.node))?;
            acks.push(ack);
        }
        tracing::debug!(seq = self.seq, acks = acks.len(), "event_broadcast");
        Ok(acks)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl Drop for Fleet {
    fn drop(&mut self) {
        for n in &mut self.nodes {
            // Closing the channel ends the node loop.
            let (closed_tx, _) = crossbeam_channel::bounded(0);
            n.tx = closed_tx;
            if let Some(t) = n.thread.take() {
                let _ = t.join();
            }
        }
    }
}
