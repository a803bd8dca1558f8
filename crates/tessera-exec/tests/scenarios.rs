//! End-to-end kernel execution scenarios
//!
//! Kernels here are built the way the front end builds them: a phase report
//! plus a generator that emits the inner body against the sealed layout.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tessera_exec::{
    CpuExecutable, Executor, FieldAccess, FnGenerator, GlobalAccess, GlobalBinding, GpuExecutable, Kernel,
    LaunchSpec, PhaseReport,
};
use tessera_store::{RelationSpec, Store};
use tessera_types::{ElemType, Processor, ReduceOp, RuntimeConfig, ScalarKind, Value};

fn vec3(x: f64, y: f64, z: f64) -> Value {
    Value::Lanes(vec![Value::F64(x), Value::F64(y), Value::F64(z)])
}

#[test]
fn centroid_of_four_vertices() {
    let cfg = RuntimeConfig::single_node(2);
    let mut store = Store::new(cfg.clone());
    let mut exec = Executor::new(cfg);

    let verts = store.new_relation(RelationSpec::Plain { size: 4 }).unwrap();
    let pos = store
        .new_field(verts, "pos", ElemType::vector(ScalarKind::F64, 3))
        .unwrap();
    store
        .field_mut(pos)
        .unwrap()
        .load_rows(&[
            vec3(0.0, 0.0, 0.0),
            vec3(2.0, 0.0, 0.0),
            vec3(0.0, 2.0, 0.0),
            vec3(0.0, 0.0, 2.0),
        ])
        .unwrap();
    let com = store
        .new_global("com", ElemType::vector(ScalarKind::F64, 3), &vec3(0.0, 0.0, 0.0))
        .unwrap();

    let kernel = Kernel::new(
        "centroid",
        verts,
        PhaseReport {
            fields: vec![FieldAccess::read(pos)],
            globals: vec![GlobalAccess::reduce(com, ReduceOp::Add)],
        },
        Arc::new(FnGenerator::cpu(move |layout| {
            let pos_slot = layout.field_slot(pos).unwrap();
            let com_slot = layout.global_slot(GlobalBinding::User(com)).unwrap();
            CpuExecutable::Native(Arc::new(move |args| {
                let b = args.bounds(0);
                let pos = args.field::<f64>(pos_slot);
                let com = args.global::<f64>(com_slot);
                for row in b.lo..=b.hi {
                    for lane in 0..3u64 {
                        com.set(lane, com.get(lane) + pos.get(row * 3 + lane));
                    }
                }
            }))
        })),
    );

    exec.launch(&mut store, &kernel, LaunchSpec::cpu()).unwrap();

    // com /= 4
    let summed = store.global(com).unwrap().get().unwrap();
    if let Value::Lanes(lanes) = &summed {
        let scaled: Vec<Value> = lanes
            .iter()
            .map(|v| match v {
                Value::F64(x) => Value::F64(x / 4.0),
                other => other.clone(),
            })
            .collect();
        store.global_mut(com).unwrap().set(&Value::Lanes(scaled)).unwrap();
    }
    assert_eq!(store.global(com).unwrap().get().unwrap(), vec3(0.5, 0.5, 0.5));
}

#[test]
fn diffusion_5x5_interior_mean() {
    const N: usize = 5;
    let cfg = RuntimeConfig::single_node(1);
    let mut store = Store::new(cfg.clone());
    let mut exec = Executor::new(cfg);

    let grid = store
        .new_relation(RelationSpec::Grid {
            dims: vec![N, N],
            periodic: vec![false, false],
        })
        .unwrap();
    let t = store.new_field(grid, "t", ElemType::F64).unwrap();
    let t_new = store.new_field(grid, "t_next", ElemType::F64).unwrap();

    // Interior cells form a closed system: the update skips any neighbor
    // on the grid boundary, so the interior total is conserved.
    let interior = store
        .new_subset(grid, "interior", |row| {
            let (i, j) = ((row as usize) / N, (row as usize) % N);
            (1..N - 1).contains(&i) && (1..N - 1).contains(&j)
        })
        .unwrap();

    // Seed one interior cell with all the heat.
    store.field_mut(t).unwrap().set(N + 1, &Value::F64(25.0)).unwrap();

    let kernel = Kernel::new(
        "diffuse",
        grid,
        PhaseReport {
            fields: vec![FieldAccess::read_uncentered(t), FieldAccess::read_write(t_new)],
            globals: vec![],
        },
        Arc::new(FnGenerator::cpu(move |layout| {
            let t_slot = layout.field_slot(t).unwrap();
            let out_slot = layout.field_slot(t_new).unwrap();
            CpuExecutable::Native(Arc::new(move |args| {
                let rows = args.bounds(0);
                let cols = args.bounds(1);
                let mask = args.mask().expect("interior launches are boolmask");
                let t = args.field::<f64>(t_slot);
                let out = args.field::<f64>(out_slot);
                let n = cols.hi + 1;
                for i in rows.lo..=rows.hi {
                    for j in cols.lo..=cols.hi {
                        let c = i * n + j;
                        if mask[c as usize] == 0 {
                            continue;
                        }
                        let mut acc = 0.0;
                        for (ni, nj) in [(i.wrapping_sub(1), j), (i + 1, j), (i, j.wrapping_sub(1)), (i, j + 1)] {
                            if ni > rows.hi || nj > cols.hi {
                                continue;
                            }
                            let nc = ni * n + nj;
                            if mask[nc as usize] == 0 {
                                continue;
                            }
                            acc += t.get(nc) - t.get(c);
                        }
                        out.set(c, t.get(c) + 0.25 * acc);
                    }
                }
            }))
        })),
    );

    for _ in 0..1000 {
        exec.launch(&mut store, &kernel, LaunchSpec::cpu().with_subset(interior))
            .unwrap();
        store.swap(t, t_new).unwrap();
    }

    let expected = 25.0 / 9.0;
    let values = store.field(t).unwrap().dump_rows(N * N).unwrap();
    let rel = store.relation(grid).unwrap();
    let interior = rel.subset(interior).unwrap();
    for row in 0..(N * N) as u64 {
        if let Value::F64(v) = values[row as usize] {
            if interior.contains(row) {
                assert!((v - expected).abs() < 1e-6, "cell {row}: {v} != {expected}");
            } else {
                assert_eq!(v, 0.0, "boundary cell {row} must stay cold");
            }
        }
    }
}

#[test]
fn insert_ten_rows_then_query() {
    let cfg = RuntimeConfig::single_node(1);
    let mut store = Store::new(cfg.clone());
    let mut exec = Executor::new(cfg);

    let source = store.new_relation(RelationSpec::Plain { size: 10 }).unwrap();
    let particles = store.new_relation(RelationSpec::Elastic { size: 0 }).unwrap();
    let tag = store.new_field(particles, "tag", ElemType::I32).unwrap();

    let mask_fref = {
        let rel = store.relation(particles).unwrap();
        tessera_types::FieldRef::new(particles, rel.live_mask().unwrap())
    };

    let kernel = Kernel::new(
        "spawn",
        source,
        PhaseReport::default(),
        Arc::new(FnGenerator::cpu(move |layout| {
            let tag_slot = layout.field_slot(tag).unwrap();
            let mask_slot = layout.field_slot(mask_fref).unwrap();
            let cursor_slot = layout.global_slot(GlobalBinding::InsertCursor).unwrap();
            CpuExecutable::Native(Arc::new(move |args| {
                let b = args.bounds(0);
                let tag = args.field::<i32>(tag_slot);
                let live = args.field::<u8>(mask_slot);
                let cursor = args.global_atomic_u64(cursor_slot);
                for row in b.lo..=b.hi {
                    let dst = cursor.fetch_add(1, Ordering::SeqCst);
                    tag.set(dst, (row % 2) as i32);
                    live.set(dst, 1);
                }
            }))
        })),
    )
    .with_inserts(particles, vec![ElemType::I32]);

    exec.launch(&mut store, &kernel, LaunchSpec::cpu()).unwrap();

    let rel = store.relation(particles).unwrap();
    assert_eq!(rel.logical_size(), 10);
    assert_eq!(rel.concrete_size(), 10);
    let tags = store.field(tag).unwrap().dump_rows(10).unwrap();
    let expected: Vec<Value> = (0..10).map(|i| Value::I32(i % 2)).collect();
    assert_eq!(tags, expected);
}

#[test]
fn delete_odd_rows_fires_defrag() {
    let cfg = RuntimeConfig::single_node(1);
    let mut store = Store::new(cfg.clone());
    let mut exec = Executor::new(cfg.clone());

    let particles = store.new_relation(RelationSpec::Elastic { size: 10 }).unwrap();
    let tag = store.new_field(particles, "tag", ElemType::I32).unwrap();
    for row in 0..10 {
        store
            .field_mut(tag)
            .unwrap()
            .set(row, &Value::I32((row % 2) as i32))
            .unwrap();
    }

    let mask_fref = {
        let rel = store.relation(particles).unwrap();
        tessera_types::FieldRef::new(particles, rel.live_mask().unwrap())
    };

    let kernel = Kernel::new(
        "cull_odd",
        particles,
        PhaseReport {
            fields: vec![FieldAccess::read(tag)],
            globals: vec![],
        },
        Arc::new(FnGenerator::cpu(move |layout| {
            let tag_slot = layout.field_slot(tag).unwrap();
            let mask_slot = layout.field_slot(mask_fref).unwrap();
            let counter_slot = layout.global_slot(GlobalBinding::DeleteCounter).unwrap();
            CpuExecutable::Native(Arc::new(move |args| {
                let b = args.bounds(0);
                let tag = args.field::<i32>(tag_slot);
                let live = args.field::<u8>(mask_slot);
                let counter = args.global_atomic_u64(counter_slot);
                for row in b.lo..=b.hi {
                    if live.get(row) == 1 && tag.get(row) % 2 == 1 {
                        live.set(row, 0);
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }))
        })),
    )
    .with_deletes();

    exec.launch(&mut store, &kernel, LaunchSpec::cpu()).unwrap();

    let rel = store.relation(particles).unwrap();
    assert_eq!(rel.logical_size(), 5);
    assert_eq!(rel.concrete_size(), 5, "auto-defrag fires at half occupancy");
    assert!(!rel.is_fragmented());
    let tags = store.field(tag).unwrap().dump_rows(5).unwrap();
    assert!(tags.iter().all(|t| *t == Value::I32(0)), "{tags:?}");
}

#[test]
fn device_global_sum_over_a_million_rows() {
    let cfg = RuntimeConfig::single_node(1);
    let mut store = Store::new(cfg.clone());
    let mut exec = Executor::new(cfg);

    const ROWS: usize = 1_000_000;
    let rel = store.new_relation(RelationSpec::Plain { size: ROWS }).unwrap();
    let gerr = store.new_global("gerr", ElemType::U64, &Value::U64(0)).unwrap();

    let kernel = Kernel::new(
        "count_rows",
        rel,
        PhaseReport {
            fields: vec![],
            globals: vec![GlobalAccess::reduce(gerr, ReduceOp::Add)],
        },
        Arc::new(FnGenerator::gpu(move |_layout| {
            GpuExecutable::Emulated(Arc::new(move |ctx, args, shared| {
                let b = args.bounds(0);
                let gt = ctx.global_lane();
                if gt >= b.lo && gt <= b.hi {
                    *shared.slot_mut::<u64>(0, ctx.lane_idx) += 1;
                }
            }))
        })),
    );

    exec.launch(&mut store, &kernel, LaunchSpec::gpu()).unwrap();
    assert_eq!(store.global(gerr).unwrap().get().unwrap(), Value::U64(ROWS as u64));
}

#[test]
fn device_reduction_preserves_existing_global_value() {
    let cfg = RuntimeConfig::single_node(1);
    let mut store = Store::new(cfg.clone());
    let mut exec = Executor::new(cfg);

    let rel = store.new_relation(RelationSpec::Plain { size: 100 }).unwrap();
    let acc = store.new_global("acc", ElemType::U64, &Value::U64(7)).unwrap();

    let kernel = Kernel::new(
        "count_rows_warm",
        rel,
        PhaseReport {
            fields: vec![],
            globals: vec![GlobalAccess::reduce(acc, ReduceOp::Add)],
        },
        Arc::new(FnGenerator::gpu(move |_layout| {
            GpuExecutable::Emulated(Arc::new(move |ctx, args, shared| {
                let b = args.bounds(0);
                let gt = ctx.global_lane();
                if gt >= b.lo && gt <= b.hi {
                    *shared.slot_mut::<u64>(0, ctx.lane_idx) += 1;
                }
            }))
        })),
    );

    exec.launch(&mut store, &kernel, LaunchSpec::gpu()).unwrap();
    // The secondary pass folds into the global through ⊕, so the warm 7
    // participates instead of being overwritten.
    assert_eq!(store.global(acc).unwrap().get().unwrap(), Value::U64(107));
}

#[test]
fn index_subset_launch_touches_selected_rows_only() {
    let cfg = RuntimeConfig::single_node(2);
    let mut store = Store::new(cfg.clone());
    let mut exec = Executor::new(cfg);

    let rel = store.new_relation(RelationSpec::Plain { size: 100 }).unwrap();
    let flag = store.new_field(rel, "flag", ElemType::I32).unwrap();
    // 5% selectivity -> index storage
    let sparse = store.new_subset(rel, "sparse", |r| r % 20 == 0).unwrap();
    assert_eq!(
        store.relation(rel).unwrap().subset(sparse).unwrap().shape(),
        tessera_store::SubsetShape::IndexList
    );

    let kernel = Kernel::new(
        "mark",
        rel,
        PhaseReport {
            fields: vec![FieldAccess::read_write(flag)],
            globals: vec![],
        },
        Arc::new(FnGenerator::cpu(move |layout| {
            let flag_slot = layout.field_slot(flag).unwrap();
            CpuExecutable::Native(Arc::new(move |args| {
                let b = args.bounds(0);
                let index = args.index().expect("index-subset launch");
                let flag = args.field::<i32>(flag_slot);
                for i in b.lo..=b.hi {
                    let row = index[i as usize];
                    flag.set(row, 1);
                }
            }))
        })),
    );

    exec.launch(&mut store, &kernel, LaunchSpec::cpu().with_subset(sparse))
        .unwrap();

    let flags = store.field(flag).unwrap().dump_rows(100).unwrap();
    for (row, v) in flags.iter().enumerate() {
        let expected = if row % 20 == 0 { 1 } else { 0 };
        assert_eq!(*v, Value::I32(expected), "row {row}");
    }
}

#[test]
fn each_subset_shape_compiles_its_own_version() {
    let cfg = RuntimeConfig::single_node(1);
    let mut store = Store::new(cfg.clone());
    let mut exec = Executor::new(cfg);

    let rel = store.new_relation(RelationSpec::Plain { size: 100 }).unwrap();
    let flag = store.new_field(rel, "flag", ElemType::I32).unwrap();
    let sparse = store.new_subset(rel, "sparse", |r| r % 20 == 0).unwrap();
    let dense = store.new_subset(rel, "dense", |r| r % 2 == 0).unwrap();
    assert_eq!(
        store.relation(rel).unwrap().subset(dense).unwrap().shape(),
        tessera_store::SubsetShape::BoolMask
    );

    let kernel = Kernel::new(
        "mark2",
        rel,
        PhaseReport {
            fields: vec![FieldAccess::read_write(flag)],
            globals: vec![],
        },
        Arc::new(FnGenerator::cpu(move |layout| {
            let flag_slot = layout.field_slot(flag).unwrap();
            let uses_index = layout.has_index();
            CpuExecutable::Native(Arc::new(move |args| {
                let b = args.bounds(0);
                let flag = args.field::<i32>(flag_slot);
                if uses_index {
                    let index = args.index().expect("index launch");
                    for i in b.lo..=b.hi {
                        flag.set(index[i as usize], 1);
                    }
                } else if let Some(mask) = args.mask() {
                    for row in b.lo..=b.hi {
                        if mask[row as usize] != 0 {
                            flag.set(row, 1);
                        }
                    }
                } else {
                    for row in b.lo..=b.hi {
                        flag.set(row, 1);
                    }
                }
            }))
        })),
    );

    // Index-shaped, boolmask-shaped, and full launches each produce a
    // distinct compiled version of the same source kernel.
    exec.launch(&mut store, &kernel, LaunchSpec::cpu().with_subset(sparse))
        .unwrap();
    exec.launch(&mut store, &kernel, LaunchSpec::cpu().with_subset(dense))
        .unwrap();
    exec.launch(&mut store, &kernel, LaunchSpec::cpu()).unwrap();
    assert_eq!(exec.version_count(), 3);

    let flags = store.field(flag).unwrap().dump_rows(100).unwrap();
    assert!(flags.iter().all(|f| *f == Value::I32(1)));
}

#[test]
fn gpu_launch_rejects_host_resident_fields() {
    let cfg = RuntimeConfig::single_node(1);
    let mut store = Store::new(cfg.clone());
    let mut exec = Executor::new(cfg);

    let rel = store.new_relation(RelationSpec::Plain { size: 8 }).unwrap();
    let f = store.new_field(rel, "f", ElemType::F64).unwrap();

    let kernel = Kernel::new(
        "touch",
        rel,
        PhaseReport {
            fields: vec![FieldAccess::read_write(f)],
            globals: vec![],
        },
        Arc::new(FnGenerator::gpu(move |layout| {
            let f_slot = layout.field_slot(f).unwrap();
            GpuExecutable::Emulated(Arc::new(move |ctx, args, _shared| {
                let b = args.bounds(0);
                let gt = ctx.global_lane();
                if gt >= b.lo && gt <= b.hi {
                    args.field::<f64>(f_slot).set(gt, gt as f64);
                }
            }))
        })),
    );

    let err = exec.launch(&mut store, &kernel, LaunchSpec::gpu()).unwrap_err();
    assert!(matches!(err, tessera_exec::Error::FieldNotResident { .. }), "{err}");

    // After migration the same launch succeeds and the data round-trips.
    exec.move_field(&mut store, f, Processor::Gpu).unwrap();
    exec.launch(&mut store, &kernel, LaunchSpec::gpu()).unwrap();
    exec.move_field(&mut store, f, Processor::Cpu).unwrap();
    let vals = store.field(f).unwrap().dump_rows(8).unwrap();
    assert_eq!(vals[5], Value::F64(5.0));
}
