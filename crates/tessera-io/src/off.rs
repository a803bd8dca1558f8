//! OFF triangle-mesh reader
//!
//! ```text
//! OFF
//! nV nF 0
//! x y z            (nV lines)
//! 3 i j k          (nF lines)
//! ```
//!
//! Loading builds a vertex relation with positions, a triangle relation,
//! and a directed edge relation (each undirected edge stored twice) sorted
//! by head vertex and grouped, so per-vertex edge lists come out of the
//! group index.

use std::path::Path;

use tessera_store::{RelationSpec, Store};
use tessera_types::{ElemType, FieldRef, RelationId, ScalarKind, Value};

use crate::error::{Error, Result};

/// Parsed OFF contents
#[derive(Debug, Clone, PartialEq)]
pub struct OffFile {
    pub positions: Vec<[f64; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

/// Parse an OFF file
pub fn read_off(path: impl AsRef<Path>) -> Result<OffFile> {
    parse_off(&std::fs::read_to_string(path.as_ref())?)
}

/// Parse OFF text
pub fn parse_off(text: &str) -> Result<OffFile> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    let (line, header) = lines.next().ok_or(Error::Parse {
        line: 1,
        message: "empty file".into(),
    })?;
    if header != "OFF" {
        return Err(Error::Parse {
            line,
            message: format!("expected OFF, got {header:?}"),
        });
    }

    let (line, counts) = lines.next().ok_or(Error::Parse {
        line: 2,
        message: "missing count line".into(),
    })?;
    let mut it = counts.split_whitespace();
    let n_verts: usize = parse_num(it.next(), line, "vertex count")?;
    let n_faces: usize = parse_num(it.next(), line, "face count")?;
    let _n_edges: usize = parse_num(it.next(), line, "edge count")?;

    let mut positions = Vec::with_capacity(n_verts);
    for _ in 0..n_verts {
        let (line, text) = lines.next().ok_or(Error::Parse {
            line: 0,
            message: "truncated vertex list".into(),
        })?;
        let mut it = text.split_whitespace();
        positions.push([
            parse_num(it.next(), line, "x")?,
            parse_num(it.next(), line, "y")?,
            parse_num(it.next(), line, "z")?,
        ]);
    }

    let mut triangles = Vec::with_capacity(n_faces);
    for _ in 0..n_faces {
        let (line, text) = lines.next().ok_or(Error::Parse {
            line: 0,
            message: "truncated face list".into(),
        })?;
        let mut it = text.split_whitespace();
        let arity: usize = parse_num(it.next(), line, "face arity")?;
        if arity != 3 {
            return Err(Error::Parse {
                line,
                message: format!("only triangles supported, got arity {arity}"),
            });
        }
        triangles.push([
            parse_num(it.next(), line, "i")?,
            parse_num(it.next(), line, "j")?,
            parse_num(it.next(), line, "k")?,
        ]);
    }
    Ok(OffFile {
        positions,
        triangles,
    })
}

fn parse_num<T: std::str::FromStr>(token: Option<&str>, line: usize, what: &str) -> Result<T> {
    token
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| Error::Parse {
            line,
            message: format!("bad or missing {what}"),
        })
}

/// Directed edges of a triangle soup, both directions per undirected edge,
/// deduplicated and sorted by (head, tail)
pub fn directed_edges(triangles: &[[u32; 3]]) -> Vec<(u32, u32)> {
    let mut edges = Vec::with_capacity(triangles.len() * 6);
    for t in triangles {
        for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
            edges.push((a, b));
            edges.push((b, a));
        }
    }
    edges.sort_unstable();
    edges.dedup();
    edges
}

/// Relations created from one OFF file
#[derive(Debug, Clone)]
pub struct OffRelations {
    pub vertices: RelationId,
    pub triangles: RelationId,
    /// Directed edges, grouped by head
    pub edges: RelationId,
    pub positions: FieldRef,
    pub edge_head: FieldRef,
    pub edge_tail: FieldRef,
}

/// Materialize an OFF mesh: vertices + positions, triangles, and a
/// directed edge relation grouped by its head vertex
pub fn load_off(store: &mut Store, off: &OffFile) -> Result<OffRelations> {
    let vertices = store.new_relation(RelationSpec::Plain {
        size: off.positions.len(),
    })?;
    let positions = store.new_field(vertices, "position", ElemType::vector(ScalarKind::F64, 3))?;
    let values: Vec<Value> = off
        .positions
        .iter()
        .map(|p| Value::Lanes(p.iter().map(|c| Value::F64(*c)).collect()))
        .collect();
    store.field_mut(positions)?.load_rows(&values)?;

    let triangles = store.new_relation(RelationSpec::Plain {
        size: off.triangles.len(),
    })?;
    for (i, name) in ["v0", "v1", "v2"].iter().enumerate() {
        let f = store.new_field(triangles, name, ElemType::key(vertices))?;
        let lanes: Vec<u64> = off.triangles.iter().map(|t| t[i] as u64).collect();
        store
            .field_mut(f)?
            .require_host_mut()?
            .lanes_mut::<u64>()
            .copy_from_slice(&lanes);
    }

    let edge_list = directed_edges(&off.triangles);
    let edges = store.new_relation(RelationSpec::Plain {
        size: edge_list.len(),
    })?;
    let edge_head = store.new_field(edges, "head", ElemType::key(vertices))?;
    let edge_tail = store.new_field(edges, "tail", ElemType::key(vertices))?;
    {
        let heads: Vec<u64> = edge_list.iter().map(|(h, _)| *h as u64).collect();
        store
            .field_mut(edge_head)?
            .require_host_mut()?
            .lanes_mut::<u64>()
            .copy_from_slice(&heads);
        let tails: Vec<u64> = edge_list.iter().map(|(_, t)| *t as u64).collect();
        store
            .field_mut(edge_tail)?
            .require_host_mut()?
            .lanes_mut::<u64>()
            .copy_from_slice(&tails);
    }
    store.group_by(edges, edge_head.field)?;

    tracing::debug!(
        vertices = off.positions.len(),
        triangles = off.triangles.len(),
        edges = edge_list.len(),
        "off_loaded"
    );
    Ok(OffRelations {
        vertices,
        triangles,
        edges,
        positions,
        edge_head,
        edge_tail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_store::RelationMode;
    use tessera_types::RuntimeConfig;

    /// 6-vertex, 8-triangle octahedron
    const OCTAHEDRON: &str = "OFF
6 8 0
1 0 0
-1 0 0
0 1 0
0 -1 0
0 0 1
0 0 -1
3 0 2 4
3 2 1 4
3 1 3 4
3 3 0 4
3 2 0 5
3 1 2 5
3 3 1 5
3 0 3 5
";

    #[test]
    fn test_parse_off() {
        let off = parse_off(OCTAHEDRON).unwrap();
        assert_eq!(off.positions.len(), 6);
        assert_eq!(off.triangles.len(), 8);
        assert_eq!(off.positions[0], [1.0, 0.0, 0.0]);
        assert_eq!(off.triangles[0], [0, 2, 4]);
    }

    #[test]
    fn test_parse_rejects_non_off() {
        assert!(matches!(parse_off("PLY\n0 0 0\n"), Err(Error::Parse { line: 1, .. })));
    }

    #[test]
    fn test_parse_rejects_quads() {
        let text = "OFF\n4 1 0\n0 0 0\n1 0 0\n1 1 0\n0 1 0\n4 0 1 2 3\n";
        assert!(matches!(parse_off(text), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_octahedron_edge_build() {
        let off = parse_off(OCTAHEDRON).unwrap();
        let mut store = Store::new(RuntimeConfig::single_node(1));
        let rels = load_off(&mut store, &off).unwrap();

        // Each of the 12 undirected edges is stored twice.
        let edges = store.relation(rels.edges).unwrap();
        assert_eq!(edges.logical_size(), 24);

        // Grouped by head: the per-vertex lengths are the out-degrees and
        // they sum to |edges|; counting both endpoints doubles that.
        let info = match edges.mode() {
            RelationMode::Grouped(info) => *info,
            other => panic!("expected grouped edges, got {other:?}"),
        };
        let verts = store.relation(rels.vertices).unwrap();
        let lengths = verts
            .field(info.lengths)
            .unwrap()
            .require_host()
            .unwrap()
            .lanes::<u64>()
            .to_vec();
        assert_eq!(lengths.iter().sum::<u64>(), 24);
        let degree_sum: u64 = 2 * lengths.iter().sum::<u64>();
        assert_eq!(degree_sum, 48);
        // The octahedron is 4-regular.
        assert!(lengths.iter().all(|l| *l == 4), "{lengths:?}");
    }

    #[test]
    fn test_group_order_is_contiguous() {
        let off = parse_off(OCTAHEDRON).unwrap();
        let mut store = Store::new(RuntimeConfig::single_node(1));
        let rels = load_off(&mut store, &off).unwrap();

        let heads = store
            .field(rels.edge_head)
            .unwrap()
            .require_host()
            .unwrap()
            .lanes::<u64>()
            .to_vec();
        // Sorted ascending: rows with one head are contiguous.
        assert!(heads.windows(2).all(|w| w[0] <= w[1]), "{heads:?}");
    }
}
