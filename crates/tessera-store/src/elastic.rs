//! Elastic relation mutation: resize, insert/delete commits, defrag
//!
//! Kernels perform the actual row writes; the store owns the bookkeeping
//! around a launch. An inserting kernel gets header room reserved before
//! launch and committed after; a deleting kernel only clears live-mask bits
//! and counts, and the commit shrinks the logical size and packs the
//! relation once occupancy falls to half.

use tessera_types::{ElemType, RelationId, Value};

use crate::error::{Error, Result};
use crate::store::Store;

/// Cached per-relation row-copy routine
///
/// Keyed by the relation's structural signature; regenerated only when the
/// schema changes. The plan pre-resolves every column's element width so the
/// compaction loop is straight `copy_within` calls.
#[derive(Debug, Clone)]
pub struct CopyPlan {
    signature: Vec<ElemType>,
    /// Bytes one packed row occupies across the user columns
    row_bytes: usize,
}

impl CopyPlan {
    fn generate(signature: Vec<ElemType>) -> Self {
        let row_bytes = signature.iter().map(|t| t.size_bytes()).sum();
        Self { signature, row_bytes }
    }

    fn matches(&self, signature: &[ElemType]) -> bool {
        self.signature == signature
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }
}

impl Store {
    /// Grow or shrink an elastic relation
    ///
    /// Every field's backing storage (live mask included) is resized;
    /// contents are preserved for indices below `min(old, new)` concrete
    /// size. `new_logical` defaults to the clamped current logical size.
    pub fn resize(&mut self, rel: RelationId, new_concrete: usize, new_logical: Option<usize>) -> Result<()> {
        let relation = self.relation(rel)?;
        if !relation.is_elastic() {
            return Err(Error::NotElastic(rel));
        }
        let logical = new_logical.unwrap_or_else(|| relation.logical_size().min(new_concrete));
        let relation = self.relation_mut(rel)?;
        for field in relation.fields.iter_mut() {
            field.require_host_mut()?.resize(new_concrete);
        }
        relation.set_sizes(logical.min(new_concrete), new_concrete);
        tracing::debug!(relation = %rel, concrete = new_concrete, logical, "relation_resized");
        Ok(())
    }

    /// Reserve header room for an inserting kernel launch
    ///
    /// Fails unless the relation is elastic, subset-free, and the inserting
    /// record matches the structural type exactly. Returns the old concrete
    /// size, which seeds the kernel's write-index global.
    pub fn reserve_for_insert(
        &mut self,
        rel: RelationId,
        launch_size: usize,
        record: &[ElemType],
    ) -> Result<usize> {
        let relation = self.relation(rel)?;
        if !relation.is_elastic() {
            return Err(Error::NotElastic(rel));
        }
        if !relation.subsets.is_empty() {
            return Err(Error::SubsetsPresent {
                relation: rel,
                count: relation.subsets.len(),
            });
        }
        let signature = relation.structural_signature();
        if signature != record {
            return Err(Error::RecordTypeMismatch {
                relation: rel,
                expected: format!("{signature:?}"),
                actual: format!("{record:?}"),
            });
        }
        let old_concrete = relation.concrete_size();
        let old_logical = relation.logical_size();
        self.resize(rel, old_concrete + launch_size, Some(old_logical))?;
        Ok(old_concrete)
    }

    /// Commit an insert launch: shrink to the final write index
    ///
    /// `final_index` is the write-index global's value after the launch.
    /// Concrete size becomes `final_index`; logical grows by the number of
    /// rows actually written; the relation is marked fragmented.
    pub fn commit_insert(&mut self, rel: RelationId, old_concrete: usize, final_index: usize) -> Result<()> {
        let old_logical = self.relation(rel)?.logical_size();
        let inserted = final_index - old_concrete;
        self.resize(rel, final_index, Some(old_logical + inserted))?;
        let relation = self.relation_mut(rel)?;
        relation.fragmented = true;
        tracing::debug!(relation = %rel, inserted, concrete = final_index, "insert_committed");
        Ok(())
    }

    /// Commit a delete launch: shrink the logical size and pack at half
    /// occupancy
    ///
    /// Returns `true` when the automatic defrag fired.
    pub fn commit_delete(&mut self, rel: RelationId, deleted: usize) -> Result<bool> {
        let relation = self.relation_mut(rel)?;
        if !relation.is_elastic() {
            return Err(Error::NotElastic(rel));
        }
        let logical = relation.logical_size().saturating_sub(deleted);
        let concrete = relation.concrete_size();
        relation.set_sizes(logical, concrete);
        relation.fragmented = true;
        tracing::debug!(relation = %rel, deleted, logical, concrete, "delete_committed");
        if 2 * logical <= concrete {
            self.defrag(rel)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Pack live rows to the front and drop the dead tail
    ///
    /// Two cursors walk the live mask: `src` downward over dead rows, `dst`
    /// upward over live ones; live rows found above `dst` are copied down.
    /// Afterwards `concrete == logical` and the relation is unfragmented.
    /// Idempotent: a second call finds nothing to move.
    ///
    /// Device-resident fields must be migrated to host before the scan; the
    /// execution crate handles that migration and then calls here.
    pub fn defrag(&mut self, rel: RelationId) -> Result<()> {
        let relation = self.relation(rel)?;
        if !relation.is_elastic() {
            return Err(Error::NotElastic(rel));
        }
        let mask_idx = relation.live_mask().expect("elastic relation carries a live mask");
        let concrete = relation.concrete_size();

        // Copy plan cache, keyed by structural signature.
        let signature = relation.structural_signature();
        let plan_stale = self
            .copy_plans
            .get(&rel)
            .map(|p| !p.matches(&signature))
            .unwrap_or(true);
        if plan_stale {
            self.copy_plans.insert(rel, CopyPlan::generate(signature));
        }
        let row_bytes = self.copy_plans[&rel].row_bytes();

        let relation = self.relation_mut(rel)?;
        let mut live: Vec<u8> = relation
            .field(mask_idx)
            .expect("live mask field")
            .require_host()?
            .lanes::<u8>()
            .to_vec();

        let mut moves: Vec<(usize, usize)> = Vec::new();
        if concrete > 0 {
            let mut dst = 0usize;
            let mut src = concrete - 1;
            loop {
                while src > 0 && live[src] == 0 {
                    src -= 1;
                }
                while dst < concrete && live[dst] != 0 {
                    dst += 1;
                }
                if dst >= src {
                    break;
                }
                moves.push((src, dst));
                live[dst] = 1;
                live[src] = 0;
            }
        }

        for field in relation.fields.iter_mut() {
            let host = field.require_host_mut()?;
            for &(src, dst) in &moves {
                host.copy_row(src, dst);
            }
        }
        // The mask rows were copied with every other field; re-assert the
        // packed shape so a half-dead source row cannot leave a stale bit.
        {
            let mask = relation
                .field_mut(mask_idx)
                .expect("live mask field")
                .require_host_mut()?;
            let lanes = mask.lanes_mut::<u8>();
            lanes[..concrete].copy_from_slice(&live[..concrete]);
        }

        let live_rows = live[..concrete].iter().filter(|b| **b != 0).count();
        self.resize(rel, live_rows, Some(live_rows))?;
        self.relation_mut(rel)?.fragmented = false;
        let mask = self.field_mut(tessera_types::FieldRef::new(rel, mask_idx))?;
        mask.load_constant(&Value::Bool(true))?;
        tracing::debug!(relation = %rel, rows = live_rows, row_bytes, "relation_defragged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RelationSpec;
    use tessera_types::{FieldRef, RuntimeConfig};

    fn store() -> Store {
        Store::new(RuntimeConfig::single_node(1))
    }

    fn elastic_with_tag(s: &mut Store, rows: usize) -> (RelationId, FieldRef) {
        let rel = s.new_relation(RelationSpec::Elastic { size: rows }).unwrap();
        let tag = s.new_field(rel, "tag", ElemType::I32).unwrap();
        (rel, tag)
    }

    #[test]
    fn test_resize_grows_all_fields() {
        let mut s = store();
        let (rel, tag) = elastic_with_tag(&mut s, 2);
        s.resize(rel, 6, None).unwrap();
        assert_eq!(s.relation(rel).unwrap().concrete_size(), 6);
        assert_eq!(s.field(tag).unwrap().len(), 6);
        let relation = s.relation(rel).unwrap();
        let mask = relation.field(relation.live_mask().unwrap()).unwrap();
        assert_eq!(mask.len(), 6);
    }

    #[test]
    fn test_resize_rejects_non_elastic() {
        let mut s = store();
        let rel = s.new_relation(RelationSpec::Plain { size: 2 }).unwrap();
        assert!(matches!(s.resize(rel, 4, None), Err(Error::NotElastic(_))));
    }

    #[test]
    fn test_reserve_checks_record_type() {
        let mut s = store();
        let (rel, _) = elastic_with_tag(&mut s, 0);
        assert!(matches!(
            s.reserve_for_insert(rel, 4, &[ElemType::F64]),
            Err(Error::RecordTypeMismatch { .. })
        ));
        let old = s.reserve_for_insert(rel, 4, &[ElemType::I32]).unwrap();
        assert_eq!(old, 0);
        assert_eq!(s.relation(rel).unwrap().concrete_size(), 4);
        assert_eq!(s.relation(rel).unwrap().logical_size(), 0);
    }

    #[test]
    fn test_reserve_rejects_subsets() {
        let mut s = store();
        let (rel, _) = elastic_with_tag(&mut s, 4);
        s.new_subset(rel, "some", |r| r == 0).unwrap();
        assert!(matches!(
            s.reserve_for_insert(rel, 2, &[ElemType::I32]),
            Err(Error::SubsetsPresent { .. })
        ));
    }

    #[test]
    fn test_insert_commit() {
        let mut s = store();
        let (rel, tag) = elastic_with_tag(&mut s, 0);
        let old = s.reserve_for_insert(rel, 10, &[ElemType::I32]).unwrap();
        // Simulate the kernel: write 10 rows, set live bits.
        for row in 0..10usize {
            s.field_mut(tag)
                .unwrap()
                .set(row, &Value::I32((row % 2) as i32))
                .unwrap();
        }
        {
            let relation = s.relation_mut(rel).unwrap();
            let mask_idx = relation.live_mask().unwrap();
            let mask = relation.field_mut(mask_idx).unwrap().require_host_mut().unwrap();
            mask.lanes_mut::<u8>().fill(1);
        }
        s.commit_insert(rel, old, 10).unwrap();

        let relation = s.relation(rel).unwrap();
        assert_eq!(relation.logical_size(), 10);
        assert_eq!(relation.concrete_size(), 10);
        assert!(relation.is_fragmented());
        let tags = s.field(tag).unwrap().dump_rows(10).unwrap();
        let expect: Vec<Value> = (0..10).map(|i| Value::I32((i % 2) as i32)).collect();
        assert_eq!(tags, expect);
    }

    #[test]
    fn test_delete_triggers_defrag_at_half() {
        let mut s = store();
        let (rel, tag) = elastic_with_tag(&mut s, 10);
        for row in 0..10usize {
            s.field_mut(tag).unwrap().set(row, &Value::I32((row % 2) as i32)).unwrap();
        }
        // Simulate the kernel deleting the 5 odd-tagged rows.
        {
            let relation = s.relation_mut(rel).unwrap();
            let mask_idx = relation.live_mask().unwrap();
            let mask = relation.field_mut(mask_idx).unwrap().require_host_mut().unwrap();
            for row in (1..10).step_by(2) {
                mask.lanes_mut::<u8>()[row] = 0;
            }
        }
        let fired = s.commit_delete(rel, 5).unwrap();
        assert!(fired, "5 live of 10 concrete is half occupancy");

        let relation = s.relation(rel).unwrap();
        assert_eq!(relation.logical_size(), 5);
        assert_eq!(relation.concrete_size(), 5);
        assert!(!relation.is_fragmented());
        let tags = s.field(tag).unwrap().dump_rows(5).unwrap();
        assert!(tags.iter().all(|t| *t == Value::I32(0)), "only even tags survive: {tags:?}");
    }

    #[test]
    fn test_defrag_idempotent() {
        let mut s = store();
        let (rel, tag) = elastic_with_tag(&mut s, 6);
        for row in 0..6usize {
            s.field_mut(tag).unwrap().set(row, &Value::I32(row as i32)).unwrap();
        }
        {
            let relation = s.relation_mut(rel).unwrap();
            let mask_idx = relation.live_mask().unwrap();
            let mask = relation.field_mut(mask_idx).unwrap().require_host_mut().unwrap();
            // kill rows 0, 3, 4
            for row in [0usize, 3, 4] {
                mask.lanes_mut::<u8>()[row] = 0;
            }
        }
        let relation = s.relation_mut(rel).unwrap();
        relation.set_sizes(3, 6);
        relation.fragmented = true;

        s.defrag(rel).unwrap();
        let first = s.field(tag).unwrap().dump_rows(3).unwrap();
        assert_eq!(s.relation(rel).unwrap().concrete_size(), 3);
        assert!(!s.relation(rel).unwrap().is_fragmented());

        s.defrag(rel).unwrap();
        let second = s.field(tag).unwrap().dump_rows(3).unwrap();
        assert_eq!(first, second, "defrag must be idempotent");
    }

    #[test]
    fn test_defrag_keeps_live_values() {
        let mut s = store();
        let (rel, tag) = elastic_with_tag(&mut s, 4);
        for row in 0..4usize {
            s.field_mut(tag).unwrap().set(row, &Value::I32(10 + row as i32)).unwrap();
        }
        {
            let relation = s.relation_mut(rel).unwrap();
            let mask_idx = relation.live_mask().unwrap();
            let mask = relation.field_mut(mask_idx).unwrap().require_host_mut().unwrap();
            mask.lanes_mut::<u8>()[0] = 0;
            mask.lanes_mut::<u8>()[2] = 0;
        }
        let relation = s.relation_mut(rel).unwrap();
        relation.set_sizes(2, 4);
        s.defrag(rel).unwrap();

        let survivors: Vec<Value> = s.field(tag).unwrap().dump_rows(2).unwrap();
        // rows 1 and 3 survive, in some packed order
        assert!(survivors.contains(&Value::I32(11)));
        assert!(survivors.contains(&Value::I32(13)));
    }
}
