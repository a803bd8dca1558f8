//! Ghost-region exchange
//!
//! A field partitioned over a blocking grid keeps, per neighbor offset
//! `o ∈ {-1,0,+1}^d \ {0}`, an *inner* strip (own cells the neighbor
//! reads) and an *outer* strip (the halo mirroring the neighbor's edge).
//! Strip width is the ghost depth on axes where `oₐ ≠ 0` and the block
//! width elsewhere.
//!
//! Channels pair asynchronously through a process-wide table keyed
//! `(hid_base, src_node, dst_node, ghost_id)`; whichever endpoint arrives
//! first parks the channel, the second claims it and must agree on the
//! buffer size. A neighbor outside the blocking grid with periodicity off
//! creates no channel.
//!
//! The exchange itself is signal-driven: `gather → send` hangs off the
//! field's `last_write`; `recv → scatter` folds back into it. One action
//! per neighbor, so disjoint strips overlap in the worker pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use tessera_types::NodeId;

use crate::error::{Error, Result};
use crate::fieldsync::{AccessKind, FieldSync};
use crate::partition::{GridBlock, GridPartition};
use crate::scheduler::Scheduler;

/// All non-zero neighbor offsets of a `d`-dimensional blocking
pub fn neighbor_offsets(d: usize) -> Vec<Vec<i32>> {
    let mut out = Vec::with_capacity(3usize.pow(d as u32) - 1);
    let mut cur = vec![-1i32; d];
    loop {
        if cur.iter().any(|o| *o != 0) {
            out.push(cur.clone());
        }
        let mut axis = d;
        loop {
            if axis == 0 {
                return out;
            }
            axis -= 1;
            cur[axis] += 1;
            if cur[axis] <= 1 {
                break;
            }
            cur[axis] = -1;
        }
    }
}

/// Pack an offset vector into `[0, 3^d)`
pub fn ghost_id(offset: &[i32]) -> u32 {
    let mut id = 0u32;
    for o in offset {
        id = id * 3 + (*o + 1) as u32;
    }
    id
}

fn negated(offset: &[i32]) -> Vec<i32> {
    offset.iter().map(|o| -o).collect()
}

/// An axis-aligned cell region, bounds inclusive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhostRegion {
    pub lo: Vec<i64>,
    pub hi: Vec<i64>,
}

impl GhostRegion {
    pub fn cells(&self) -> u64 {
        self.lo
            .iter()
            .zip(&self.hi)
            .map(|(lo, hi)| (hi - lo + 1).max(0) as u64)
            .product()
    }

    /// Row-major enumeration of the region's coordinates
    fn coords(&self) -> Vec<Vec<i64>> {
        let mut out = Vec::with_capacity(self.cells() as usize);
        let mut cur = self.lo.clone();
        loop {
            out.push(cur.clone());
            let mut axis = cur.len();
            loop {
                if axis == 0 {
                    return out;
                }
                axis -= 1;
                cur[axis] += 1;
                if cur[axis] <= self.hi[axis] {
                    break;
                }
                cur[axis] = self.lo[axis];
            }
        }
    }
}

/// The strip of `block`'s own cells that the neighbor at `offset` reads
pub fn inner_region(block: &GridBlock, offset: &[i32], depth: u32) -> GhostRegion {
    let g = depth as i64;
    let mut lo = Vec::with_capacity(offset.len());
    let mut hi = Vec::with_capacity(offset.len());
    for (a, o) in offset.iter().enumerate() {
        let (blo, bhi) = (block.lo[a] as i64, block.hi[a] as i64);
        match o {
            0 => {
                lo.push(blo);
                hi.push(bhi);
            }
            1 => {
                lo.push(bhi - g + 1);
                hi.push(bhi);
            }
            _ => {
                lo.push(blo);
                hi.push(blo + g - 1);
            }
        }
    }
    GhostRegion { lo, hi }
}

/// The halo strip of `block` mirroring the neighbor at `offset`
pub fn outer_region(block: &GridBlock, offset: &[i32], depth: u32) -> GhostRegion {
    let g = depth as i64;
    let mut lo = Vec::with_capacity(offset.len());
    let mut hi = Vec::with_capacity(offset.len());
    for (a, o) in offset.iter().enumerate() {
        let (blo, bhi) = (block.lo[a] as i64, block.hi[a] as i64);
        match o {
            0 => {
                lo.push(blo);
                hi.push(bhi);
            }
            1 => {
                lo.push(bhi + 1);
                hi.push(bhi + g);
            }
            _ => {
                lo.push(blo - g);
                hi.push(blo - 1);
            }
        }
    }
    GhostRegion { lo, hi }
}

/// A node's local slab of one field: its block plus halo on every side
#[derive(Debug)]
pub struct LocalBlock {
    elem_size: usize,
    /// Owned block bounds (global coordinates)
    lo: Vec<i64>,
    /// Storage origin: `lo - halo` per axis
    origin: Vec<i64>,
    /// Storage extent per axis
    extent: Vec<i64>,
    bytes: Vec<u8>,
}

impl LocalBlock {
    pub fn new(block: &GridBlock, halo: u32, elem_size: usize) -> Self {
        let g = halo as i64;
        let lo: Vec<i64> = block.lo.iter().map(|v| *v as i64).collect();
        let origin: Vec<i64> = lo.iter().map(|v| v - g).collect();
        let extent: Vec<i64> = block
            .lo
            .iter()
            .zip(&block.hi)
            .map(|(lo, hi)| (*hi as i64 - *lo as i64 + 1) + 2 * g)
            .collect();
        let cells: i64 = extent.iter().product();
        Self {
            elem_size,
            lo,
            origin,
            extent,
            bytes: vec![0; cells as usize * elem_size],
        }
    }

    pub fn block_lo(&self) -> &[i64] {
        &self.lo
    }

    fn byte_offset(&self, coord: &[i64]) -> usize {
        let mut linear = 0i64;
        for (a, c) in coord.iter().enumerate() {
            let local = c - self.origin[a];
            debug_assert!(local >= 0 && local < self.extent[a], "coord {coord:?} outside slab");
            linear = linear * self.extent[a] + local;
        }
        linear as usize * self.elem_size
    }

    /// Element bytes at a global coordinate
    pub fn get(&self, coord: &[i64]) -> &[u8] {
        let off = self.byte_offset(coord);
        &self.bytes[off..off + self.elem_size]
    }

    pub fn set(&mut self, coord: &[i64], value: &[u8]) {
        let off = self.byte_offset(coord);
        self.bytes[off..off + self.elem_size].copy_from_slice(value);
    }

    /// Pack a region's cells into a flat buffer, row-major
    pub fn gather(&self, region: &GhostRegion) -> Vec<u8> {
        let mut buf = Vec::with_capacity(region.cells() as usize * self.elem_size);
        for coord in region.coords() {
            buf.extend_from_slice(self.get(&coord));
        }
        buf
    }

    /// Unpack a flat buffer into a region's cells
    pub fn scatter(&mut self, region: &GhostRegion, buf: &[u8]) -> Result<()> {
        let expected = region.cells() as usize * self.elem_size;
        if buf.len() != expected {
            return Err(Error::GhostSizeMismatch {
                key: format!("{region:?}"),
                local: expected,
                peer: buf.len(),
            });
        }
        for (i, coord) in region.coords().into_iter().enumerate() {
            let src = &buf[i * self.elem_size..(i + 1) * self.elem_size];
            self.set(&coord, src);
        }
        Ok(())
    }
}

/// Channel key: `(hid_base, src, dst, ghost_id)` with the ghost id packed
/// from the sender's offset vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub hid_base: u64,
    pub src: NodeId,
    pub dst: NodeId,
    pub ghost_id: u32,
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "h{}:{}->{}:g{}", self.hid_base, self.src, self.dst, self.ghost_id)
    }
}

struct ChannelEntry {
    size: usize,
    tx: Option<Sender<Vec<u8>>>,
    rx: Option<Receiver<Vec<u8>>>,
}

/// Process-wide channel pairing table
///
/// Construction is asynchronous: either endpoint may arrive first; the
/// second must agree on the byte size.
#[derive(Clone, Default)]
pub struct ChannelTable {
    entries: Arc<Mutex<HashMap<ChannelKey, ChannelEntry>>>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_action<T>(
        &self,
        key: ChannelKey,
        size: usize,
        claim: impl FnOnce(&mut ChannelEntry) -> Option<T>,
    ) -> Result<T> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_insert_with(|| {
            let (tx, rx) = crossbeam_channel::unbounded();
            ChannelEntry {
                size,
                tx: Some(tx),
                rx: Some(rx),
            }
        });
        if entry.size != size {
            return Err(Error::GhostSizeMismatch {
                key: key.to_string(),
                local: size,
                peer: entry.size,
            });
        }
        claim(entry).ok_or(Error::EndpointTaken { key: key.to_string() })
    }

    /// Claim the sending end
    pub fn source(&self, key: ChannelKey, size: usize) -> Result<GhostSender> {
        let tx = self.entry_action(key, size, |e| e.tx.take())?;
        Ok(GhostSender { key, size, tx })
    }

    /// Claim the receiving end
    pub fn dest(&self, key: ChannelKey, size: usize) -> Result<GhostReceiver> {
        let rx = self.entry_action(key, size, |e| e.rx.take())?;
        Ok(GhostReceiver { key, size, rx })
    }
}

/// Sending endpoint of one ghost channel
pub struct GhostSender {
    key: ChannelKey,
    size: usize,
    tx: Sender<Vec<u8>>,
}

impl GhostSender {
    pub fn send(&self, buf: Vec<u8>) -> Result<()> {
        if buf.len() != self.size {
            return Err(Error::GhostSizeMismatch {
                key: self.key.to_string(),
                local: self.size,
                peer: buf.len(),
            });
        }
        self.tx.send(buf).map_err(|_| Error::NodeGone(self.key.dst))
    }
}

/// Receiving endpoint of one ghost channel
pub struct GhostReceiver {
    key: ChannelKey,
    size: usize,
    rx: Receiver<Vec<u8>>,
}

impl GhostReceiver {
    /// Blocking receive of one buffered exchange
    pub fn recv(&self) -> Result<Vec<u8>> {
        let buf = self.rx.recv().map_err(|_| Error::NodeGone(self.key.src))?;
        if buf.len() != self.size {
            return Err(Error::GhostSizeMismatch {
                key: self.key.to_string(),
                local: self.size,
                peer: buf.len(),
            });
        }
        Ok(buf)
    }
}

/// Per-field readiness: every created channel on every node must report
/// done before the first read-write launch dispatches
#[derive(Clone, Default)]
pub struct GhostReadiness {
    created: Arc<AtomicUsize>,
    done: Arc<AtomicUsize>,
}

impl GhostReadiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channels: usize) {
        self.created.fetch_add(channels, Ordering::SeqCst);
    }

    pub fn mark_done(&self, channels: usize) {
        self.done.fetch_add(channels, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.done.load(Ordering::SeqCst) >= self.created.load(Ordering::SeqCst)
    }

    /// Cooperative spin: yields to the event pump every ~2µs
    pub fn spin_ready(&self) {
        while !self.is_ready() {
            std::thread::sleep(std::time::Duration::from_micros(2));
        }
    }
}

/// One neighbor's worth of exchange state
struct NeighborLink {
    inner: GhostRegion,
    outer: GhostRegion,
    sender: GhostSender,
    receiver: GhostReceiver,
}

/// All ghost channels of one field on one node
pub struct GhostExchange {
    links: Vec<NeighborLink>,
}

impl GhostExchange {
    /// Build channels toward every in-grid (or periodic-wrapped) neighbor
    ///
    /// Borders without a neighbor create no channel and are simply empty.
    pub fn build(
        table: &ChannelTable,
        partition: &GridPartition,
        node: NodeId,
        hid_base: u64,
        elem_size: usize,
        depth: u32,
        periodic: &[bool],
        readiness: &GhostReadiness,
    ) -> Result<Self> {
        let block = partition
            .block_of(node)
            .ok_or(Error::NodeGone(node))?
            .clone();
        let d = partition.dims.len();
        let mut links = Vec::new();
        for offset in neighbor_offsets(d) {
            let neighbor_coords: Vec<i64> = block
                .coords
                .iter()
                .zip(&offset)
                .map(|(c, o)| *c as i64 + *o as i64)
                .collect();
            let wrapped: Vec<i64> = neighbor_coords
                .iter()
                .enumerate()
                .map(|(a, c)| {
                    let b = partition.blocking[a] as i64;
                    if periodic.get(a).copied().unwrap_or(false) {
                        (c + b) % b
                    } else {
                        *c
                    }
                })
                .collect();
            let Some(neighbor) = partition.block_at(&wrapped) else {
                continue;
            };
            let inner = inner_region(&block, &offset, depth);
            let outer = outer_region(&block, &offset, depth);
            let size = inner.cells() as usize * elem_size;

            let sender = table.source(
                ChannelKey {
                    hid_base,
                    src: node,
                    dst: neighbor.node,
                    ghost_id: ghost_id(&offset),
                },
                size,
            )?;
            // The neighbor sends our halo as its own inner strip at the
            // opposite offset; claim the matching key.
            let receiver = table.dest(
                ChannelKey {
                    hid_base,
                    src: neighbor.node,
                    dst: node,
                    ghost_id: ghost_id(&negated(&offset)),
                },
                outer.cells() as usize * elem_size,
            )?;
            links.push(NeighborLink {
                inner,
                outer,
                sender,
                receiver,
            });
        }
        readiness.register(links.len());
        tracing::debug!(node = %node, hid = hid_base, channels = links.len(), "ghost_channels_built");
        Ok(Self { links })
    }

    pub fn channel_count(&self) -> usize {
        self.links.len()
    }

    /// Schedule one full halo exchange against the field's signals
    ///
    /// Per neighbor: `gather → send` gated on the field's `last_write` (a
    /// read), then `recv → scatter` merged back into `last_write` (a
    /// commuting write: scatters land in disjoint halo strips). One action
    /// per neighbor keeps the strips parallel in the worker pool - every
    /// send forks the same `last_write` before any scatter joins it.
    pub fn exchange(
        mut self,
        sched: &Scheduler,
        local: &Arc<Mutex<LocalBlock>>,
        sync: &mut FieldSync,
        readiness: &GhostReadiness,
    ) {
        let graph = sched.graph();
        let mut recvs = Vec::with_capacity(self.links.len());
        for (i, link) in self.links.drain(..).enumerate() {
            let NeighborLink {
                inner,
                outer,
                sender,
                receiver,
            } = link;

            let send_local = Arc::clone(local);
            let send_input = sync.collect_input(graph, AccessKind::Read);
            let sent = sched.exec_labeled(send_input, i, "ghost_send", move || {
                let buf = send_local.lock().gather(&inner);
                if let Err(e) = sender.send(buf) {
                    tracing::error!(error = %e, "ghost_send_failed");
                }
            });
            sync.attach_output(graph, AccessKind::Read, sent);
            recvs.push((i, outer, receiver));
        }

        for (i, outer, receiver) in recvs {
            let recv_local = Arc::clone(local);
            let recv_ready = readiness.clone();
            let recv_input = sync.collect_input(graph, AccessKind::Commuting);
            let scattered = sched.exec_labeled(recv_input, i, "ghost_recv", move || {
                match receiver.recv() {
                    Ok(buf) => {
                        if let Err(e) = recv_local.lock().scatter(&outer, &buf) {
                            tracing::error!(error = %e, "ghost_scatter_failed");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "ghost_recv_failed"),
                }
                recv_ready.mark_done(1);
            });
            sync.attach_output(graph, AccessKind::Commuting, scattered);
        }
    }
}
