//! # tessera-io - Mesh & Field File I/O
//!
//! Readers and writers for the runtime's external formats: the packed
//! little-endian binary mesh format, OFF triangle meshes, and row-major
//! CSV field dumps. Loaders materialize files into store relations;
//! failures are error values with diagnostics, never a crash.

pub mod csv;
pub mod error;
pub mod mesh;
pub mod off;

pub use csv::{read_field_csv, write_field_csv};
pub use error::{Error, Result};
pub use mesh::{
    load_mesh, parse_field, parse_mesh, read_mesh, write_mesh, BoundarySet, FacetEdge, FieldFile, HalfFacet,
    MeshElem, MeshFile, MeshRelations, MESH_MAGIC,
};
pub use off::{directed_edges, load_off, parse_off, read_off, OffFile, OffRelations};
