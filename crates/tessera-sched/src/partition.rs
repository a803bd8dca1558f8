//! Partitioning relations across compute nodes
//!
//! Grids decompose into `B = Π blockingᵈ` disjoint axis-aligned blocks laid
//! out row-major over the blocking grid; block `(i₁…i_k)` is assigned to
//! compute node `1 + Σ (iₐ-1)·Π_{β>α} bᵦ` (node 0 is the control node).
//! Plain relations are colored by contiguous chunks.

use tessera_types::NodeId;

use crate::error::{Error, Result};

/// One block of a grid partition; bounds inclusive on both ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridBlock {
    /// 0-based coordinates in the blocking grid
    pub coords: Vec<u32>,
    /// Inclusive per-axis cell bounds
    pub lo: Vec<u64>,
    pub hi: Vec<u64>,
    /// Owning compute node
    pub node: NodeId,
}

impl GridBlock {
    /// Rows covered by this block
    pub fn rows(&self) -> u64 {
        self.lo
            .iter()
            .zip(&self.hi)
            .map(|(lo, hi)| hi - lo + 1)
            .product()
    }

    /// Width along one axis
    pub fn width(&self, axis: usize) -> u64 {
        self.hi[axis] - self.lo[axis] + 1
    }
}

/// Disjoint blocking of a grid over a fleet
#[derive(Debug, Clone)]
pub struct GridPartition {
    pub dims: Vec<usize>,
    pub blocking: Vec<u32>,
    pub blocks: Vec<GridBlock>,
}

impl GridPartition {
    /// Decompose `dims` into `blocking` blocks for `nodes` compute nodes
    ///
    /// Per axis, the first block takes `d − ⌊d/b⌋·(b−1)` cells and the
    /// remainder blocks take `⌊d/b⌋`. The blocking must multiply to the
    /// compute-node count exactly.
    pub fn new(dims: &[usize], blocking: &[u32], nodes: u32) -> Result<Self> {
        if blocking.len() != dims.len() {
            return Err(Error::BlockingArity {
                blocking: blocking.len(),
                dims: dims.len(),
            });
        }
        let product: u64 = blocking.iter().map(|b| *b as u64).product();
        if product != nodes as u64 {
            return Err(Error::BlockingMismatch {
                blocking: blocking.to_vec(),
                product,
                nodes,
            });
        }

        // Per-axis split points.
        let mut axis_bounds: Vec<Vec<(u64, u64)>> = Vec::with_capacity(dims.len());
        for (d, b) in dims.iter().zip(blocking) {
            let d = *d as u64;
            let b = *b as u64;
            let tail = d / b;
            let head = d - tail * (b - 1);
            let mut bounds = Vec::with_capacity(b as usize);
            let mut lo = 0;
            for i in 0..b {
                let width = if i == 0 { head } else { tail };
                bounds.push((lo, lo + width - 1));
                lo += width;
            }
            axis_bounds.push(bounds);
        }

        // Row-major enumeration of block coordinates.
        let mut blocks = Vec::with_capacity(product as usize);
        let mut coords = vec![0u32; dims.len()];
        loop {
            let mut node = 0u64;
            for (a, c) in coords.iter().enumerate() {
                let stride: u64 = blocking[a + 1..].iter().map(|b| *b as u64).product();
                node += *c as u64 * stride;
            }
            blocks.push(GridBlock {
                coords: coords.clone(),
                lo: coords
                    .iter()
                    .enumerate()
                    .map(|(a, c)| axis_bounds[a][*c as usize].0)
                    .collect(),
                hi: coords
                    .iter()
                    .enumerate()
                    .map(|(a, c)| axis_bounds[a][*c as usize].1)
                    .collect(),
                node: NodeId::new(1 + node as u32),
            });

            // Increment row-major: last axis fastest.
            let mut axis = dims.len();
            loop {
                if axis == 0 {
                    break;
                }
                axis -= 1;
                coords[axis] += 1;
                if coords[axis] < blocking[axis] {
                    break;
                }
                coords[axis] = 0;
            }
            if coords.iter().all(|c| *c == 0) {
                break;
            }
        }
        tracing::debug!(?dims, ?blocking, blocks = blocks.len(), "grid_partitioned");
        Ok(Self {
            dims: dims.to_vec(),
            blocking: blocking.to_vec(),
            blocks,
        })
    }

    /// Block owned by a compute node
    pub fn block_of(&self, node: NodeId) -> Option<&GridBlock> {
        self.blocks.iter().find(|b| b.node == node)
    }

    /// Block at blocking-grid coordinates, if inside the blocking
    pub fn block_at(&self, coords: &[i64]) -> Option<&GridBlock> {
        if coords
            .iter()
            .zip(&self.blocking)
            .any(|(c, b)| *c < 0 || *c >= *b as i64)
        {
            return None;
        }
        self.blocks
            .iter()
            .find(|blk| blk.coords.iter().zip(coords).all(|(a, b)| *a as i64 == *b))
    }
}

/// Color plain rows into `parts` contiguous chunks: `row / ⌈N/P⌉`
pub fn plain_colors(rows: u64, parts: u32) -> Vec<u32> {
    let chunk = rows.div_ceil(parts as u64).max(1);
    (0..rows).map(|r| (r / chunk) as u32).collect()
}
