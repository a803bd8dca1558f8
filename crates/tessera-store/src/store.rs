//! The store arena
//!
//! All relations and globals live in one [`Store`]. Operations that touch
//! more than one relation (key-typed field creation, grouping, elastic
//! commits) go through the arena so that cross-references stay plain
//! indices and validation sees both sides.

use tessera_types::{
    ElemType, FieldIdx, FieldRef, GlobalId, RelationId, RuntimeConfig, SubsetId, Value,
};

use crate::error::{Error, Result};
use crate::field::Field;
use crate::global::Global;
use crate::relation::{GroupInfo, Relation, RelationMode};
use crate::subset::Subset;

/// Reserved name of the elastic live-mask field
pub const LIVE_MASK_NAME: &str = "__live";

/// What kind of relation to create
#[derive(Debug, Clone)]
pub enum RelationSpec {
    /// Opaque row ids
    Plain { size: usize },
    /// 1-3 dimensional index space
    Grid { dims: Vec<usize>, periodic: Vec<bool> },
    /// Insertable/deletable rows
    Elastic { size: usize },
}

/// Arena of relations and globals
pub struct Store {
    config: RuntimeConfig,
    relations: Vec<Relation>,
    globals: Vec<Global>,
    pub(crate) copy_plans: std::collections::HashMap<RelationId, crate::elastic::CopyPlan>,
}

impl Store {
    /// Create an empty store under an immutable runtime configuration
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            relations: Vec::new(),
            globals: Vec::new(),
            copy_plans: std::collections::HashMap::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // ============================================================================================
    // Relations
    // ============================================================================================

    /// Create a relation
    ///
    /// Allocates the live mask iff elastic. Fails if grid dimensions are
    /// absent/overlong or the periodicity arity does not match.
    pub fn new_relation(&mut self, spec: RelationSpec) -> Result<RelationId> {
        let id = RelationId::new(self.relations.len() as u32);
        let rel = match spec {
            RelationSpec::Plain { size } => Relation::new(id, RelationMode::Plain, size),
            RelationSpec::Grid { dims, periodic } => {
                if dims.is_empty() || dims.len() > 3 {
                    return Err(Error::BadGridDims(dims.len()));
                }
                if periodic.len() != dims.len() {
                    return Err(Error::PeriodicArityMismatch {
                        dims: dims.len(),
                        periodic: periodic.len(),
                    });
                }
                let size = dims.iter().product();
                Relation::new(id, RelationMode::Grid { dims, periodic }, size)
            }
            RelationSpec::Elastic { size } => {
                let mut rel = Relation::new(id, RelationMode::Elastic, size);
                let mask_idx = FieldIdx::new(0);
                let mut mask = Field::new_host(
                    FieldRef::new(id, mask_idx),
                    LIVE_MASK_NAME.into(),
                    ElemType::BOOL,
                    size,
                );
                mask.load_constant(&Value::Bool(true))?;
                rel.fields.push(mask);
                rel.live_mask = Some(mask_idx);
                rel
            }
        };
        tracing::debug!(relation = %id, rows = rel.logical_size(), mode = ?rel.mode(), "relation_created");
        self.relations.push(rel);
        Ok(id)
    }

    pub fn relation(&self, id: RelationId) -> Result<&Relation> {
        self.relations.get(id.index()).ok_or(Error::UnknownRelation(id))
    }

    pub fn relation_mut(&mut self, id: RelationId) -> Result<&mut Relation> {
        self.relations.get_mut(id.index()).ok_or(Error::UnknownRelation(id))
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    // ============================================================================================
    // Fields
    // ============================================================================================

    /// Create a field on `rel`
    ///
    /// Fails if the relation is fragmented, the name is invalid or taken, or
    /// the element type is a key into elastic storage (elastic row ids are
    /// not stable, so handles into them are forbidden).
    pub fn new_field(&mut self, rel: RelationId, name: &str, elem: ElemType) -> Result<FieldRef> {
        validate_name(name)?;
        if let Some(target) = elem.key_target() {
            let target_rel = self.relation(target)?;
            if target_rel.is_elastic() {
                return Err(Error::KeyIntoElastic(target));
            }
            let dims = match elem {
                ElemType::Key { dims, .. } => dims as usize,
                _ => unreachable!(),
            };
            if dims != target_rel.n_dims() {
                return Err(Error::KeyDimsMismatch {
                    relation: target,
                    dims,
                    expected: target_rel.n_dims(),
                });
            }
        }
        let relation = self.relation_mut(rel)?;
        if relation.is_fragmented() {
            return Err(Error::Fragmented(rel));
        }
        if relation.field_by_name(name).is_some() {
            return Err(Error::DuplicateName {
                relation: rel,
                name: name.into(),
            });
        }
        let idx = FieldIdx::new(relation.fields.len() as u32);
        let fref = FieldRef::new(rel, idx);
        let len = relation.concrete_size();
        relation.fields.push(Field::new_host(fref, name.into(), elem, len));
        tracing::debug!(field = %fref, name, elem = %elem, rows = len, "field_created");
        Ok(fref)
    }

    pub fn field(&self, fref: FieldRef) -> Result<&Field> {
        self.relation(fref.relation)?
            .field(fref.field)
            .ok_or(Error::UnknownField(fref))
    }

    pub fn field_mut(&mut self, fref: FieldRef) -> Result<&mut Field> {
        self.relation_mut(fref.relation)?
            .field_mut(fref.field)
            .ok_or(Error::UnknownField(fref))
    }

    /// Swap the contents of two same-typed fields of one relation
    pub fn swap(&mut self, a: FieldRef, b: FieldRef) -> Result<()> {
        if a.relation != b.relation {
            return Err(Error::DifferentOwners { a, b });
        }
        let (a_ty, b_ty) = (self.field(a)?.elem(), self.field(b)?.elem());
        if a_ty != b_ty {
            return Err(Error::FieldTypeMismatch {
                a,
                a_ty: a_ty.to_string(),
                b,
                b_ty: b_ty.to_string(),
            });
        }
        if a.field == b.field {
            return Ok(());
        }
        let relation = self.relation_mut(a.relation)?;
        let (lo, hi) = (a.field.index().min(b.field.index()), a.field.index().max(b.field.index()));
        let (head, tail) = relation.fields.split_at_mut(hi);
        std::mem::swap(head[lo].storage_mut(), tail[0].storage_mut());
        Ok(())
    }

    /// Copy the contents of `from` over `to` (same owner, same type)
    pub fn copy(&mut self, from: FieldRef, to: FieldRef) -> Result<()> {
        if from.relation != to.relation {
            return Err(Error::DifferentOwners { a: from, b: to });
        }
        let (f_ty, t_ty) = (self.field(from)?.elem(), self.field(to)?.elem());
        if f_ty != t_ty {
            return Err(Error::FieldTypeMismatch {
                a: from,
                a_ty: f_ty.to_string(),
                b: to,
                b_ty: t_ty.to_string(),
            });
        }
        let bytes = self.field(from)?.require_host()?.as_bytes().to_vec();
        self.field_mut(to)?
            .require_host_mut()?
            .as_bytes_mut()
            .copy_from_slice(&bytes);
        Ok(())
    }

    // ============================================================================================
    // Grouping
    // ============================================================================================

    /// Sort-order grouping of a PLAIN relation by a key field
    ///
    /// Legal only on plain relations whose key field references a source
    /// relation of smaller or equal size. Scans the (already ascending) key
    /// column once, producing `offset`/`length` auxiliary fields on the
    /// source, then transitions the relation to GROUPED and records a
    /// back-reference on the source.
    pub fn group_by(&mut self, rel: RelationId, key_field: FieldIdx) -> Result<()> {
        let relation = self.relation(rel)?;
        if !relation.mode().is_plain() {
            return Err(Error::GroupNonPlain(rel));
        }
        let fref = FieldRef::new(rel, key_field);
        let field = relation.field(key_field).ok_or(Error::UnknownField(fref))?;
        let source = match field.elem() {
            ElemType::Key { relation: s, dims: 1 } => s,
            _ => return Err(Error::NotAKeyField { field: fref }),
        };
        let rows = relation.logical_size();
        let source_rows = self.relation(source)?.logical_size();
        if source_rows > rows {
            return Err(Error::GroupSourceTooLarge { relation: rel, src: source });
        }

        // One pass over the key column: verify ascending order, count per key.
        let keys: Vec<u64> = field.require_host()?.lanes::<u64>()[..rows].to_vec();
        let mut lengths = vec![0u64; source_rows];
        let mut prev = 0u64;
        for (row, &k) in keys.iter().enumerate() {
            if k < prev {
                return Err(Error::KeyFieldUnsorted { field: fref, row: row as u64 });
            }
            if k as usize >= source_rows {
                return Err(Error::KeyOutOfRange {
                    field: fref,
                    row: row as u64,
                    key: k,
                    source_rows,
                });
            }
            lengths[k as usize] += 1;
            prev = k;
        }
        let mut offsets = vec![0u64; source_rows];
        let mut acc = 0u64;
        for k in 0..source_rows {
            offsets[k] = acc;
            acc += lengths[k];
        }

        let offsets_idx = self.push_aux_field(source, &format!("__group_offsets_{}", rel.0), &offsets)?;
        let lengths_idx = self.push_aux_field(source, &format!("__group_lengths_{}", rel.0), &lengths)?;
        self.relation_mut(source)?.grouped_children.push(rel);

        let relation = self.relation_mut(rel)?;
        relation.set_mode(RelationMode::Grouped(GroupInfo {
            key_field,
            source,
            offsets: offsets_idx,
            lengths: lengths_idx,
        }));
        tracing::debug!(relation = %rel, source = %source, rows, "relation_grouped");
        Ok(())
    }

    fn push_aux_field(&mut self, rel: RelationId, name: &str, values: &[u64]) -> Result<FieldIdx> {
        let relation = self.relation_mut(rel)?;
        let idx = FieldIdx::new(relation.fields.len() as u32);
        let fref = FieldRef::new(rel, idx);
        let mut field = Field::new_host(fref, name.into(), ElemType::U64, relation.concrete_size());
        field
            .require_host_mut()?
            .lanes_mut::<u64>()[..values.len()]
            .copy_from_slice(values);
        relation.fields.push(field);
        Ok(idx)
    }

    // ============================================================================================
    // Subsets
    // ============================================================================================

    /// Create a named subset by evaluating `pred` once per row
    ///
    /// Storage shape follows the selectivity rule; grid sources and
    /// distributed mode always use a dense mask.
    pub fn new_subset<P: FnMut(u64) -> bool>(&mut self, rel: RelationId, name: &str, pred: P) -> Result<SubsetId> {
        validate_name(name)?;
        let force_mask = {
            let relation = self.relation(rel)?;
            if relation.subset_by_name(name).is_some() {
                return Err(Error::DuplicateName {
                    relation: rel,
                    name: name.into(),
                });
            }
            relation.mode().is_grid() || self.config.mode.is_distributed()
        };
        let relation = self.relation_mut(rel)?;
        let rows = relation.logical_size();
        let subset = Subset::build(name.into(), rows, pred, force_mask);
        let id = SubsetId::new(relation.subsets.len() as u32);
        tracing::debug!(relation = %rel, name, selected = subset.cardinality(), shape = %subset.shape(), "subset_created");
        relation.subsets.push(subset);
        Ok(id)
    }

    // ============================================================================================
    // Globals
    // ============================================================================================

    /// Create a typed global with an initial value
    pub fn new_global(&mut self, name: &str, elem: ElemType, init: &Value) -> Result<GlobalId> {
        validate_name(name)?;
        let id = GlobalId::new(self.globals.len() as u32);
        self.globals.push(Global::new(name.into(), elem, init)?);
        Ok(id)
    }

    pub fn global(&self, id: GlobalId) -> Result<&Global> {
        self.globals.get(id.index()).ok_or(Error::UnknownGlobal(id))
    }

    pub fn global_mut(&mut self, id: GlobalId) -> Result<&mut Global> {
        self.globals.get_mut(id.index()).ok_or(Error::UnknownGlobal(id))
    }
}

/// Internal field names use the double-underscore prefix; user names may not.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    };
    if !ok || name.starts_with("__") {
        return Err(Error::InvalidName(name.into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::ScalarKind;

    fn store() -> Store {
        Store::new(RuntimeConfig::single_node(1))
    }

    #[test]
    fn test_new_relation_modes() {
        let mut s = store();
        let plain = s.new_relation(RelationSpec::Plain { size: 10 }).unwrap();
        assert_eq!(s.relation(plain).unwrap().logical_size(), 10);

        let grid = s
            .new_relation(RelationSpec::Grid {
                dims: vec![5, 5],
                periodic: vec![false, false],
            })
            .unwrap();
        assert_eq!(s.relation(grid).unwrap().logical_size(), 25);
        assert_eq!(s.relation(grid).unwrap().n_dims(), 2);

        let elastic = s.new_relation(RelationSpec::Elastic { size: 4 }).unwrap();
        let rel = s.relation(elastic).unwrap();
        assert!(rel.is_elastic());
        assert!(rel.live_mask().is_some());
        let mask = rel.field(rel.live_mask().unwrap()).unwrap();
        assert_eq!(mask.name(), LIVE_MASK_NAME);
        assert!(mask.dump_rows(4).unwrap().iter().all(|v| *v == Value::Bool(true)));
    }

    #[test]
    fn test_grid_validation() {
        let mut s = store();
        assert!(matches!(
            s.new_relation(RelationSpec::Grid {
                dims: vec![],
                periodic: vec![]
            }),
            Err(Error::BadGridDims(0))
        ));
        assert!(matches!(
            s.new_relation(RelationSpec::Grid {
                dims: vec![4, 4],
                periodic: vec![true]
            }),
            Err(Error::PeriodicArityMismatch { .. })
        ));
    }

    #[test]
    fn test_field_name_rules() {
        let mut s = store();
        let r = s.new_relation(RelationSpec::Plain { size: 4 }).unwrap();
        s.new_field(r, "pos", ElemType::F64).unwrap();
        assert!(matches!(
            s.new_field(r, "pos", ElemType::F64),
            Err(Error::DuplicateName { .. })
        ));
        assert!(matches!(s.new_field(r, "__hidden", ElemType::F64), Err(Error::InvalidName(_))));
        assert!(matches!(s.new_field(r, "9lives", ElemType::F64), Err(Error::InvalidName(_))));
        assert!(matches!(s.new_field(r, "a b", ElemType::F64), Err(Error::InvalidName(_))));
    }

    #[test]
    fn test_key_into_elastic_rejected() {
        let mut s = store();
        let e = s.new_relation(RelationSpec::Elastic { size: 0 }).unwrap();
        let r = s.new_relation(RelationSpec::Plain { size: 4 }).unwrap();
        assert!(matches!(
            s.new_field(r, "k", ElemType::key(e)),
            Err(Error::KeyIntoElastic(_))
        ));
    }

    #[test]
    fn test_key_dims_must_match_grid() {
        let mut s = store();
        let g = s
            .new_relation(RelationSpec::Grid {
                dims: vec![4, 4],
                periodic: vec![false, false],
            })
            .unwrap();
        let r = s.new_relation(RelationSpec::Plain { size: 4 }).unwrap();
        assert!(matches!(
            s.new_field(r, "cell", ElemType::key(g)),
            Err(Error::KeyDimsMismatch { .. })
        ));
        s.new_field(r, "cell", ElemType::grid_key(g, 2)).unwrap();
    }

    #[test]
    fn test_group_by() {
        let mut s = store();
        let verts = s.new_relation(RelationSpec::Plain { size: 3 }).unwrap();
        let edges = s.new_relation(RelationSpec::Plain { size: 6 }).unwrap();
        let head = s.new_field(edges, "head", ElemType::key(verts)).unwrap();
        // keys: 0,0,1,1,1,2 (sorted)
        {
            let f = s.field_mut(head).unwrap();
            f.require_host_mut().unwrap().lanes_mut::<u64>().copy_from_slice(&[0, 0, 1, 1, 1, 2]);
        }
        s.group_by(edges, head.field).unwrap();

        let edges_rel = s.relation(edges).unwrap();
        let info = match edges_rel.mode() {
            RelationMode::Grouped(info) => *info,
            other => panic!("expected grouped, got {other:?}"),
        };
        assert_eq!(info.source, verts);

        let verts_rel = s.relation(verts).unwrap();
        assert_eq!(verts_rel.grouped_children, vec![edges]);
        let offsets = verts_rel.field(info.offsets).unwrap().require_host().unwrap().lanes::<u64>().to_vec();
        let lengths = verts_rel.field(info.lengths).unwrap().require_host().unwrap().lanes::<u64>().to_vec();
        assert_eq!(offsets, vec![0, 2, 5]);
        assert_eq!(lengths, vec![2, 3, 1]);
        assert_eq!(lengths.iter().sum::<u64>(), 6);
    }

    #[test]
    fn test_group_by_rejects_unsorted() {
        let mut s = store();
        let verts = s.new_relation(RelationSpec::Plain { size: 2 }).unwrap();
        let edges = s.new_relation(RelationSpec::Plain { size: 3 }).unwrap();
        let head = s.new_field(edges, "head", ElemType::key(verts)).unwrap();
        s.field_mut(head)
            .unwrap()
            .require_host_mut()
            .unwrap()
            .lanes_mut::<u64>()
            .copy_from_slice(&[1, 0, 1]);
        assert!(matches!(
            s.group_by(edges, head.field),
            Err(Error::KeyFieldUnsorted { row: 1, .. })
        ));
    }

    #[test]
    fn test_group_by_rejects_non_plain() {
        let mut s = store();
        let g = s
            .new_relation(RelationSpec::Grid {
                dims: vec![4],
                periodic: vec![false],
            })
            .unwrap();
        assert!(matches!(s.group_by(g, FieldIdx::new(0)), Err(Error::GroupNonPlain(_))));
    }

    #[test]
    fn test_swap_and_copy() {
        let mut s = store();
        let r = s.new_relation(RelationSpec::Plain { size: 2 }).unwrap();
        let a = s.new_field(r, "a", ElemType::I32).unwrap();
        let b = s.new_field(r, "b", ElemType::I32).unwrap();
        s.field_mut(a).unwrap().load_constant(&Value::I32(1)).unwrap();
        s.field_mut(b).unwrap().load_constant(&Value::I32(2)).unwrap();

        s.swap(a, b).unwrap();
        assert_eq!(s.field(a).unwrap().get(0).unwrap(), Value::I32(2));
        assert_eq!(s.field(b).unwrap().get(0).unwrap(), Value::I32(1));

        s.copy(a, b).unwrap();
        assert_eq!(s.field(b).unwrap().get(0).unwrap(), Value::I32(2));
    }

    #[test]
    fn test_swap_type_mismatch() {
        let mut s = store();
        let r = s.new_relation(RelationSpec::Plain { size: 2 }).unwrap();
        let a = s.new_field(r, "a", ElemType::I32).unwrap();
        let b = s.new_field(r, "b", ElemType::F64).unwrap();
        assert!(matches!(s.swap(a, b), Err(Error::FieldTypeMismatch { .. })));
    }

    #[test]
    fn test_subset_on_grid_forces_mask() {
        let mut s = store();
        let g = s
            .new_relation(RelationSpec::Grid {
                dims: vec![10, 10],
                periodic: vec![false, false],
            })
            .unwrap();
        let sub = s.new_subset(g, "corner", |r| r == 0).unwrap();
        let rel = s.relation(g).unwrap();
        assert_eq!(rel.subset(sub).unwrap().shape(), crate::subset::SubsetShape::BoolMask);
    }

    #[test]
    fn test_global_lifecycle() {
        let mut s = store();
        let g = s
            .new_global("com", ElemType::vector(ScalarKind::F64, 3), &Value::Lanes(vec![
                Value::F64(0.0),
                Value::F64(0.0),
                Value::F64(0.0),
            ]))
            .unwrap();
        s.global_mut(g).unwrap().set(&Value::Lanes(vec![
            Value::F64(0.5),
            Value::F64(0.5),
            Value::F64(0.5),
        ])).unwrap();
        let v = s.global(g).unwrap().get().unwrap();
        assert_eq!(v, Value::Lanes(vec![Value::F64(0.5), Value::F64(0.5), Value::F64(0.5)]));
    }
}
