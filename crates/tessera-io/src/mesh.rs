//! Binary mesh format
//!
//! Little-endian, packed. The fixed header carries a magic number, element
//! counts, and file offsets to three tables:
//!
//! ```text
//! header      magic u32 · nV nE nF nC nFE nBoundaries (u32 each)
//!             field_table u64 · facet_edge_table u64 · boundary_set_table u64
//! facet-edge  face u32 · edge u32 · 2 × half-facet { cell u32, vert u32 }
//! boundary    elem u32 (high bit = aggregated) · start u32 (incl)
//!             · end u32 (excl) · name offset u64 (NUL-terminated)
//! positions   trailing nV × f64[3]
//! ```
//!
//! Field files carry a domain element type, a base type with vector/matrix
//! flags, an element count, and offsets to the name and the row-major data.
//! Missing files, truncation, and a wrong magic all surface as error
//! values, never a crash.

use std::io::Write;
use std::path::Path;

use tessera_store::{RelationSpec, Store};
use tessera_types::{ElemType, FieldRef, RelationId, ScalarKind, SubsetId, Value};

use crate::error::{Error, Result};

/// Mesh file magic number
pub const MESH_MAGIC: u32 = 0x1811_1022;

/// Header size in bytes
const HEADER_BYTES: usize = 4 + 6 * 4 + 3 * 8;
/// Facet-edge record size
const FACET_EDGE_BYTES: usize = 6 * 4;
/// Boundary-set record size
const BOUNDARY_BYTES: usize = 3 * 4 + 8;
/// Aggregation flag on the boundary element type
const AGG_FLAG: u32 = 1 << 7;

/// Mesh element kinds, in dual-pairing order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshElem {
    Vertex,
    Cell,
    Edge,
    Face,
}

impl MeshElem {
    fn from_code(code: u32) -> Result<Self> {
        Ok(match code {
            0 => MeshElem::Vertex,
            1 => MeshElem::Cell,
            2 => MeshElem::Edge,
            3 => MeshElem::Face,
            other => return Err(Error::BadElemCode(other)),
        })
    }

    fn code(self) -> u32 {
        match self {
            MeshElem::Vertex => 0,
            MeshElem::Cell => 1,
            MeshElem::Edge => 2,
            MeshElem::Face => 3,
        }
    }
}

/// One half-facet: a cell/vertex pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalfFacet {
    pub cell: u32,
    pub vert: u32,
}

/// One facet-edge record pairing a face/edge with two half-facets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacetEdge {
    pub face: u32,
    pub edge: u32,
    pub hf: [HalfFacet; 2],
}

/// A named element range `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundarySet {
    pub elem: MeshElem,
    pub aggregated: bool,
    pub start: u32,
    pub end: u32,
    pub name: String,
}

/// In-memory mesh file contents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshFile {
    pub n_vertices: u32,
    pub n_edges: u32,
    pub n_faces: u32,
    pub n_cells: u32,
    pub facet_edges: Vec<FacetEdge>,
    pub boundaries: Vec<BoundarySet>,
    /// One position per vertex, trailing in the file
    pub positions: Vec<[f64; 3]>,
}

fn take<'a>(bytes: &'a [u8], offset: usize, need: usize) -> Result<&'a [u8]> {
    bytes.get(offset..offset + need).ok_or(Error::Truncated {
        offset: offset as u64,
        need,
        have: bytes.len().saturating_sub(offset),
    })
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    Ok(u32::from_le_bytes(take(bytes, offset, 4)?.try_into().unwrap()))
}

fn read_u64(bytes: &[u8], offset: usize) -> Result<u64> {
    Ok(u64::from_le_bytes(take(bytes, offset, 8)?.try_into().unwrap()))
}

fn read_f64(bytes: &[u8], offset: usize) -> Result<f64> {
    Ok(f64::from_le_bytes(take(bytes, offset, 8)?.try_into().unwrap()))
}

fn read_cstr(bytes: &[u8], offset: usize) -> Result<String> {
    let tail = take(bytes, offset, 0).map(|_| &bytes[offset..])?;
    let end = tail.iter().position(|b| *b == 0).ok_or(Error::Truncated {
        offset: offset as u64,
        need: 1,
        have: tail.len(),
    })?;
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

/// Parse a mesh file
pub fn read_mesh(path: impl AsRef<Path>) -> Result<MeshFile> {
    let bytes = std::fs::read(path.as_ref())?;
    parse_mesh(&bytes)
}

/// Parse mesh bytes
pub fn parse_mesh(bytes: &[u8]) -> Result<MeshFile> {
    let magic = read_u32(bytes, 0)?;
    if magic != MESH_MAGIC {
        return Err(Error::BadMagic {
            expected: MESH_MAGIC,
            got: magic,
        });
    }
    let n_vertices = read_u32(bytes, 4)?;
    let n_edges = read_u32(bytes, 8)?;
    let n_faces = read_u32(bytes, 12)?;
    let n_cells = read_u32(bytes, 16)?;
    let n_facet_edges = read_u32(bytes, 20)?;
    let n_boundaries = read_u32(bytes, 24)?;
    let _field_table = read_u64(bytes, 28)?;
    let facet_edge_table = read_u64(bytes, 36)? as usize;
    let boundary_table = read_u64(bytes, 44)? as usize;

    let mut facet_edges = Vec::with_capacity(n_facet_edges as usize);
    for i in 0..n_facet_edges as usize {
        let at = facet_edge_table + i * FACET_EDGE_BYTES;
        facet_edges.push(FacetEdge {
            face: read_u32(bytes, at)?,
            edge: read_u32(bytes, at + 4)?,
            hf: [
                HalfFacet {
                    cell: read_u32(bytes, at + 8)?,
                    vert: read_u32(bytes, at + 12)?,
                },
                HalfFacet {
                    cell: read_u32(bytes, at + 16)?,
                    vert: read_u32(bytes, at + 20)?,
                },
            ],
        });
    }

    let mut boundaries = Vec::with_capacity(n_boundaries as usize);
    for i in 0..n_boundaries as usize {
        let at = boundary_table + i * BOUNDARY_BYTES;
        let code = read_u32(bytes, at)?;
        boundaries.push(BoundarySet {
            elem: MeshElem::from_code(code & !AGG_FLAG)?,
            aggregated: code & AGG_FLAG != 0,
            start: read_u32(bytes, at + 4)?,
            end: read_u32(bytes, at + 8)?,
            name: read_cstr(bytes, read_u64(bytes, at + 12)? as usize)?,
        });
    }

    // Positions trail the file: the last nV * 24 bytes.
    let pos_bytes = n_vertices as usize * 24;
    let pos_base = bytes.len().checked_sub(pos_bytes).ok_or(Error::Truncated {
        offset: bytes.len() as u64,
        need: pos_bytes,
        have: bytes.len(),
    })?;
    let mut positions = Vec::with_capacity(n_vertices as usize);
    for i in 0..n_vertices as usize {
        let at = pos_base + i * 24;
        positions.push([read_f64(bytes, at)?, read_f64(bytes, at + 8)?, read_f64(bytes, at + 16)?]);
    }

    tracing::debug!(
        vertices = n_vertices,
        edges = n_edges,
        faces = n_faces,
        cells = n_cells,
        facet_edges = facet_edges.len(),
        boundaries = boundaries.len(),
        "mesh_parsed"
    );
    Ok(MeshFile {
        n_vertices,
        n_edges,
        n_faces,
        n_cells,
        facet_edges,
        boundaries,
        positions,
    })
}

/// Serialize a mesh file
pub fn write_mesh(path: impl AsRef<Path>, mesh: &MeshFile) -> Result<()> {
    let facet_edge_table = HEADER_BYTES;
    let boundary_table = facet_edge_table + mesh.facet_edges.len() * FACET_EDGE_BYTES;
    let names_base = boundary_table + mesh.boundaries.len() * BOUNDARY_BYTES;

    let mut names = Vec::new();
    let mut name_offsets = Vec::with_capacity(mesh.boundaries.len());
    for b in &mesh.boundaries {
        name_offsets.push(names_base + names.len());
        names.extend_from_slice(b.name.as_bytes());
        names.push(0);
    }

    let mut out = Vec::new();
    out.extend_from_slice(&MESH_MAGIC.to_le_bytes());
    for count in [
        mesh.n_vertices,
        mesh.n_edges,
        mesh.n_faces,
        mesh.n_cells,
        mesh.facet_edges.len() as u32,
        mesh.boundaries.len() as u32,
    ] {
        out.extend_from_slice(&count.to_le_bytes());
    }
    out.extend_from_slice(&0u64.to_le_bytes()); // no field table
    out.extend_from_slice(&(facet_edge_table as u64).to_le_bytes());
    out.extend_from_slice(&(boundary_table as u64).to_le_bytes());

    for fe in &mesh.facet_edges {
        out.extend_from_slice(&fe.face.to_le_bytes());
        out.extend_from_slice(&fe.edge.to_le_bytes());
        for hf in &fe.hf {
            out.extend_from_slice(&hf.cell.to_le_bytes());
            out.extend_from_slice(&hf.vert.to_le_bytes());
        }
    }
    for (b, name_at) in mesh.boundaries.iter().zip(&name_offsets) {
        let code = b.elem.code() | if b.aggregated { AGG_FLAG } else { 0 };
        out.extend_from_slice(&code.to_le_bytes());
        out.extend_from_slice(&b.start.to_le_bytes());
        out.extend_from_slice(&b.end.to_le_bytes());
        out.extend_from_slice(&(*name_at as u64).to_le_bytes());
    }
    out.extend_from_slice(&names);
    for p in &mesh.positions {
        for c in p {
            out.extend_from_slice(&c.to_le_bytes());
        }
    }

    let mut file = std::fs::File::create(path.as_ref())?;
    file.write_all(&out)?;
    Ok(())
}

/// Relations created from one mesh file
#[derive(Debug, Clone)]
pub struct MeshRelations {
    pub vertices: RelationId,
    pub edges: RelationId,
    pub faces: RelationId,
    pub cells: RelationId,
    /// `vec3<f64>` position field on the vertex relation
    pub positions: FieldRef,
    /// Boundary sets materialized as subsets on their element relation
    pub boundary_subsets: Vec<(String, MeshElem, SubsetId)>,
}

/// Materialize a mesh file into store relations
///
/// Vertices carry the position field; boundary sets become subsets over
/// their element relation's row range.
pub fn load_mesh(store: &mut Store, mesh: &MeshFile) -> Result<MeshRelations> {
    let vertices = store.new_relation(RelationSpec::Plain {
        size: mesh.n_vertices as usize,
    })?;
    let edges = store.new_relation(RelationSpec::Plain {
        size: mesh.n_edges as usize,
    })?;
    let faces = store.new_relation(RelationSpec::Plain {
        size: mesh.n_faces as usize,
    })?;
    let cells = store.new_relation(RelationSpec::Plain {
        size: mesh.n_cells as usize,
    })?;

    let positions = store.new_field(vertices, "position", ElemType::vector(ScalarKind::F64, 3))?;
    let values: Vec<Value> = mesh
        .positions
        .iter()
        .map(|p| Value::Lanes(p.iter().map(|c| Value::F64(*c)).collect()))
        .collect();
    store.field_mut(positions)?.load_rows(&values)?;

    let mut boundary_subsets = Vec::with_capacity(mesh.boundaries.len());
    for b in &mesh.boundaries {
        let relation = match b.elem {
            MeshElem::Vertex => vertices,
            MeshElem::Cell => cells,
            MeshElem::Edge => edges,
            MeshElem::Face => faces,
        };
        let (start, end) = (b.start as u64, b.end as u64);
        let subset = store.new_subset(relation, &b.name, |row| row >= start && row < end)?;
        boundary_subsets.push((b.name.clone(), b.elem, subset));
    }

    Ok(MeshRelations {
        vertices,
        edges,
        faces,
        cells,
        positions,
        boundary_subsets,
    })
}

/// One field file record
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFile {
    pub domain: MeshElem,
    pub elem: ElemType,
    pub name: String,
    /// Row-major element bytes
    pub data: Vec<u8>,
}

const FIELD_INT: u8 = 0;
const FIELD_FLOAT: u8 = 1;
const FIELD_DOUBLE: u8 = 2;
const FIELD_BOOL: u8 = 3;
const FIELD_VEC_FLAG: u8 = 1;
const FIELD_MAT_FLAG: u8 = 3;

fn base_kind(code: u8) -> Result<ScalarKind> {
    Ok(match code {
        FIELD_INT => ScalarKind::I32,
        FIELD_FLOAT => ScalarKind::F32,
        FIELD_DOUBLE => ScalarKind::F64,
        FIELD_BOOL => ScalarKind::Bool,
        other => return Err(Error::BadFieldType(other)),
    })
}

/// Parse a field file: domain, typed range, name, raw rows
pub fn parse_field(bytes: &[u8]) -> Result<FieldFile> {
    let domain = MeshElem::from_code(read_u32(bytes, 0)?)?;
    let ty = take(bytes, 4, 4)?;
    let kind = base_kind(ty[0])?;
    let elem = match ty[1] {
        0 => ElemType::Scalar(kind),
        FIELD_VEC_FLAG => ElemType::vector(kind, ty[2]),
        FIELD_MAT_FLAG => ElemType::matrix(kind, ty[2], ty[3]),
        other => return Err(Error::BadFieldType(other)),
    };
    let n_elems = read_u32(bytes, 8)? as usize;
    let name = read_cstr(bytes, read_u64(bytes, 12)? as usize)?;
    let data_at = read_u64(bytes, 20)? as usize;
    let data = take(bytes, data_at, n_elems * elem.size_bytes())?.to_vec();
    Ok(FieldFile {
        domain,
        elem,
        name,
        data,
    })
}
