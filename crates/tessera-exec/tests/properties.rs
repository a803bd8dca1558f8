//! Universal properties of the execution core

use std::sync::Arc;

use tessera_exec::{
    CpuExecutable, Error, Executor, FieldAccess, FnGenerator, GlobalAccess, GlobalBinding, GpuExecutable, Kernel,
    LaunchSpec, PhaseReport,
};
use tessera_store::{RelationSpec, Store};
use tessera_types::{ElemType, ReduceOp, RuntimeConfig, Value};

fn fixture(partitions: u32) -> (Store, Executor) {
    let cfg = RuntimeConfig::single_node(partitions);
    (Store::new(cfg.clone()), Executor::new(cfg))
}

/// Loading values, running a kernel with an empty body, and dumping yields
/// the loaded values verbatim.
#[test]
fn identity_preservation() {
    let (mut store, mut exec) = fixture(4);
    let rel = store.new_relation(RelationSpec::Plain { size: 64 }).unwrap();
    let f = store.new_field(rel, "v", ElemType::F64).unwrap();

    let values: Vec<Value> = (0..64).map(|i| Value::F64(i as f64 * 0.37 - 5.0)).collect();
    store.field_mut(f).unwrap().load_rows(&values).unwrap();

    let identity = Kernel::new(
        "identity",
        rel,
        PhaseReport {
            fields: vec![FieldAccess::read(f)],
            globals: vec![],
        },
        Arc::new(FnGenerator::cpu(|_layout| CpuExecutable::Native(Arc::new(|_args| {})))),
    );
    exec.launch(&mut store, &identity, LaunchSpec::cpu()).unwrap();

    assert_eq!(store.field(f).unwrap().dump_rows(64).unwrap(), values);
}

/// A reduction op on an unsupported scalar kind is rejected at compile.
#[test]
fn coerce_and_reject_at_compile() {
    let (mut store, mut exec) = fixture(1);
    let rel = store.new_relation(RelationSpec::Plain { size: 4 }).unwrap();
    let flag = store.new_global("flag", ElemType::BOOL, &Value::Bool(false)).unwrap();

    let kernel = Kernel::new(
        "bad_reduce",
        rel,
        PhaseReport {
            fields: vec![],
            globals: vec![GlobalAccess::reduce(flag, ReduceOp::Add)],
        },
        Arc::new(FnGenerator::cpu(|_layout| CpuExecutable::Native(Arc::new(|_args| {})))),
    );
    let err = exec.launch(&mut store, &kernel, LaunchSpec::cpu()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedReduce { .. }), "{err}");

    // Assigning a mismatched value into a typed location is rejected too.
    let f = store.new_field(rel, "v", ElemType::F64).unwrap();
    assert!(store.field_mut(f).unwrap().set(0, &Value::F32(1.0)).is_err());
}

/// Reduction results equal the sequential fold for three op families,
/// independent of row order and partitioning: `+` on f64, `min` on i32,
/// boolean `or`.
#[test]
fn reduction_matches_sequential_fold() {
    for partitions in [1u32, 3, 8] {
        let (mut store, mut exec) = fixture(partitions);
        const ROWS: usize = 10_007; // deliberately not a multiple of anything

        let rel = store.new_relation(RelationSpec::Plain { size: ROWS }).unwrap();
        let data = store.new_field(rel, "data", ElemType::F64).unwrap();
        let values: Vec<f64> = (0..ROWS).map(|i| ((i * 2654435761) % 1000) as f64 - 500.0).collect();
        store
            .field_mut(data)
            .unwrap()
            .require_host_mut()
            .unwrap()
            .lanes_mut::<f64>()
            .copy_from_slice(&values);

        let sum = store.new_global("sum", ElemType::F64, &Value::F64(0.0)).unwrap();
        let low = store.new_global("low", ElemType::I32, &Value::I32(i32::MAX)).unwrap();
        let any_neg = store.new_global("any_neg", ElemType::BOOL, &Value::Bool(false)).unwrap();

        let kernel = Kernel::new(
            "fold3",
            rel,
            PhaseReport {
                fields: vec![FieldAccess::read(data)],
                globals: vec![
                    GlobalAccess::reduce(sum, ReduceOp::Add),
                    GlobalAccess::reduce(low, ReduceOp::Min),
                    GlobalAccess::reduce(any_neg, ReduceOp::Or),
                ],
            },
            Arc::new(FnGenerator::cpu(move |layout| {
                let data_slot = layout.field_slot(data).unwrap();
                let sum_slot = layout.global_slot(GlobalBinding::User(sum)).unwrap();
                let low_slot = layout.global_slot(GlobalBinding::User(low)).unwrap();
                let neg_slot = layout.global_slot(GlobalBinding::User(any_neg)).unwrap();
                CpuExecutable::Native(Arc::new(move |args| {
                    let b = args.bounds(0);
                    let data = args.field::<f64>(data_slot);
                    let sum = args.global::<f64>(sum_slot);
                    let low = args.global::<i32>(low_slot);
                    let neg = args.global::<u8>(neg_slot);
                    for row in b.lo..=b.hi {
                        let v = data.get(row);
                        sum.set(0, sum.get(0) + v);
                        low.set(0, low.get(0).min(v as i32));
                        neg.set(0, neg.get(0) | u8::from(v < 0.0));
                    }
                }))
            })),
        );
        exec.launch(&mut store, &kernel, LaunchSpec::cpu()).unwrap();

        let expected_sum: f64 = values.iter().sum();
        let expected_min = values.iter().map(|v| *v as i32).min().unwrap();
        let expected_neg = values.iter().any(|v| *v < 0.0);

        match store.global(sum).unwrap().get().unwrap() {
            Value::F64(v) => assert!(
                (v - expected_sum).abs() < 1e-6,
                "partitions={partitions}: {v} != {expected_sum}"
            ),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.global(low).unwrap().get().unwrap(), Value::I32(expected_min));
        assert_eq!(store.global(any_neg).unwrap().get().unwrap(), Value::Bool(expected_neg));
    }
}

/// The device tree reduction agrees with the sequential fold for the same
/// three op families.
#[test]
fn device_tree_reduction_matches_sequential_fold() {
    let (mut store, mut exec) = fixture(1);
    const ROWS: usize = 4_099;

    let rel = store.new_relation(RelationSpec::Plain { size: ROWS }).unwrap();
    let sum = store.new_global("dsum", ElemType::F64, &Value::F64(0.0)).unwrap();
    let low = store.new_global("dlow", ElemType::I32, &Value::I32(i32::MAX)).unwrap();
    let hit = store.new_global("dhit", ElemType::BOOL, &Value::Bool(false)).unwrap();

    // Row values derived from the row id so the device body needs no field.
    let value_of = |row: u64| ((row * 2654435761) % 1000) as i64 - 500;

    let kernel = Kernel::new(
        "dfold3",
        rel,
        PhaseReport {
            fields: vec![],
            globals: vec![
                GlobalAccess::reduce(sum, ReduceOp::Add),
                GlobalAccess::reduce(low, ReduceOp::Min),
                GlobalAccess::reduce(hit, ReduceOp::Or),
            ],
        },
        Arc::new(FnGenerator::gpu(move |_layout| {
            GpuExecutable::Emulated(Arc::new(move |ctx, args, shared| {
                let b = args.bounds(0);
                let gt = ctx.global_lane();
                if gt < b.lo || gt > b.hi {
                    return;
                }
                let v = ((gt * 2654435761) % 1000) as i64 - 500;
                *shared.slot_mut::<f64>(0, ctx.lane_idx) += v as f64;
                let slot = shared.slot_mut::<i32>(1, ctx.lane_idx);
                *slot = (*slot).min(v as i32);
                *shared.slot_mut::<u8>(2, ctx.lane_idx) |= u8::from(v == 499);
            }))
        })),
    );
    exec.launch(&mut store, &kernel, LaunchSpec::gpu()).unwrap();

    let expected_sum: f64 = (0..ROWS as u64).map(|r| value_of(r) as f64).sum();
    let expected_min = (0..ROWS as u64).map(|r| value_of(r) as i32).min().unwrap();
    let expected_hit = (0..ROWS as u64).any(|r| value_of(r) == 499);

    match store.global(sum).unwrap().get().unwrap() {
        Value::F64(v) => assert!((v - expected_sum).abs() < 1e-6, "{v} != {expected_sum}"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(store.global(low).unwrap().get().unwrap(), Value::I32(expected_min));
    assert_eq!(store.global(hit).unwrap().get().unwrap(), Value::Bool(expected_hit));
}

/// Schema changes force re-compilation of cached versions.
#[test]
fn schema_change_recompiles() {
    let (mut store, mut exec) = fixture(1);
    let rel = store.new_relation(RelationSpec::Plain { size: 8 }).unwrap();
    let f = store.new_field(rel, "v", ElemType::F64).unwrap();

    let kernel = Kernel::new(
        "noop",
        rel,
        PhaseReport {
            fields: vec![FieldAccess::read(f)],
            globals: vec![],
        },
        Arc::new(FnGenerator::cpu(|_layout| CpuExecutable::Native(Arc::new(|_args| {})))),
    );
    exec.launch(&mut store, &kernel, LaunchSpec::cpu()).unwrap();
    store.new_field(rel, "extra", ElemType::I32).unwrap();
    // Second launch sees a different structural signature and recompiles
    // rather than running against a stale layout.
    exec.launch(&mut store, &kernel, LaunchSpec::cpu()).unwrap();
    assert_eq!(exec.version_count(), 1);
}
