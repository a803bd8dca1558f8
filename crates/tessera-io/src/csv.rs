//! CSV field I/O
//!
//! Row-major, one cell per line. Values are comma-separated with an
//! optional single space; vector and matrix lanes flatten row-major with
//! `, ` separators inside a cell. Booleans serialize as `0`/`1`; floats
//! format `%f` (six decimals) or `%.<precision>f`.

use std::io::Write;
use std::path::Path;

use tessera_store::Field;
use tessera_types::{ElemType, ScalarKind, Value};

use crate::error::{Error, Result};

/// Write a field's rows to a CSV file
///
/// `precision` overrides the default six decimal places for floats.
pub fn write_field_csv(path: impl AsRef<Path>, field: &Field, precision: Option<usize>) -> Result<()> {
    let rows = field.len();
    let values = field.dump_rows(rows)?;
    let mut out = std::fs::File::create(path.as_ref())?;
    for value in &values {
        writeln!(out, "{}", format_cell(value, precision))?;
    }
    tracing::debug!(path = %path.as_ref().display(), rows, "field_csv_written");
    Ok(())
}

fn format_cell(value: &Value, precision: Option<usize>) -> String {
    match value {
        Value::Bool(b) => u8::from(*b).to_string(),
        Value::I32(v) => v.to_string(),
        Value::U64(v) => v.to_string(),
        Value::F32(v) => format_float(*v as f64, precision),
        Value::F64(v) => format_float(*v, precision),
        Value::Lanes(lanes) => lanes
            .iter()
            .map(|l| format_cell(l, precision))
            .collect::<Vec<_>>()
            .join(", "),
        Value::Key(coords) => coords
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn format_float(v: f64, precision: Option<usize>) -> String {
    format!("{v:.prec$}", prec = precision.unwrap_or(6))
}

/// Read a CSV file into typed row values
///
/// The file must carry exactly `rows` lines of `elem`-shaped cells.
pub fn read_field_csv(path: impl AsRef<Path>, elem: ElemType, rows: usize) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty())
        .collect();
    if lines.len() != rows {
        return Err(Error::RowCount {
            file_rows: lines.len(),
            relation_rows: rows,
        });
    }
    lines
        .into_iter()
        .map(|(line, text)| parse_cell(text, elem, line))
        .collect()
}

fn parse_cell(text: &str, elem: ElemType, line: usize) -> Result<Value> {
    let lanes: Vec<&str> = text.split(',').map(str::trim).collect();
    if lanes.len() != elem.lanes() {
        return Err(Error::Parse {
            line,
            message: format!("expected {} lanes, got {}", elem.lanes(), lanes.len()),
        });
    }
    let kind = elem.lane_kind();
    let parsed: Result<Vec<Value>> = lanes.iter().map(|l| parse_lane(l, kind, line)).collect();
    let parsed = parsed?;
    Ok(match elem {
        ElemType::Scalar(_) => parsed.into_iter().next().expect("one lane"),
        ElemType::Vector { .. } | ElemType::Matrix { .. } => Value::Lanes(parsed),
        ElemType::Key { .. } => Value::Key(
            parsed
                .into_iter()
                .map(|v| match v {
                    Value::U64(c) => c,
                    _ => unreachable!("key lanes parse as u64"),
                })
                .collect(),
        ),
    })
}

fn parse_lane(text: &str, kind: ScalarKind, line: usize) -> Result<Value> {
    let bad = |message: String| Error::Parse { line, message };
    Ok(match kind {
        ScalarKind::Bool => match text {
            "0" => Value::Bool(false),
            "1" => Value::Bool(true),
            other => return Err(bad(format!("boolean must be 0 or 1, got {other:?}"))),
        },
        ScalarKind::I32 => Value::I32(text.parse().map_err(|_| bad(format!("bad i32 {text:?}")))?),
        ScalarKind::U64 => Value::U64(text.parse().map_err(|_| bad(format!("bad u64 {text:?}")))?),
        ScalarKind::F32 => Value::F32(text.parse().map_err(|_| bad(format!("bad f32 {text:?}")))?),
        ScalarKind::F64 => Value::F64(text.parse().map_err(|_| bad(format!("bad f64 {text:?}")))?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_store::{RelationSpec, Store};
    use tessera_types::RuntimeConfig;

    #[test]
    fn test_scalar_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let mut store = Store::new(RuntimeConfig::single_node(1));
        let rel = store.new_relation(RelationSpec::Plain { size: 3 }).unwrap();
        let f = store.new_field(rel, "t", ElemType::F64).unwrap();
        let values = vec![Value::F64(25.0), Value::F64(0.5), Value::F64(-1.25)];
        store.field_mut(f).unwrap().load_rows(&values).unwrap();

        write_field_csv(&path, store.field(f).unwrap(), None).unwrap();
        let back = read_field_csv(&path, ElemType::F64, 3).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_vector_cells_flatten_with_comma_space() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.csv");
        let mut store = Store::new(RuntimeConfig::single_node(1));
        let rel = store.new_relation(RelationSpec::Plain { size: 1 }).unwrap();
        let f = store
            .new_field(rel, "v", ElemType::vector(ScalarKind::F64, 3))
            .unwrap();
        store
            .field_mut(f)
            .unwrap()
            .set(0, &Value::Lanes(vec![Value::F64(1.0), Value::F64(2.5), Value::F64(-3.0)]))
            .unwrap();

        write_field_csv(&path, store.field(f).unwrap(), Some(2)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim(), "1.00, 2.50, -3.00");
    }

    #[test]
    fn test_bools_as_zero_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.csv");
        let mut store = Store::new(RuntimeConfig::single_node(1));
        let rel = store.new_relation(RelationSpec::Plain { size: 2 }).unwrap();
        let f = store.new_field(rel, "b", ElemType::BOOL).unwrap();
        store.field_mut(f).unwrap().set(1, &Value::Bool(true)).unwrap();

        write_field_csv(&path, store.field(f).unwrap(), None).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0\n1\n");
        let back = read_field_csv(&path, ElemType::BOOL, 2).unwrap();
        assert_eq!(back, vec![Value::Bool(false), Value::Bool(true)]);
    }

    #[test]
    fn test_row_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.csv");
        std::fs::write(&path, "1\n2\n").unwrap();
        assert!(matches!(
            read_field_csv(&path, ElemType::I32, 3),
            Err(Error::RowCount { file_rows: 2, relation_rows: 3 })
        ));
    }

    #[test]
    fn test_optional_space_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sp.csv");
        std::fs::write(&path, "1,2\n3, 4\n").unwrap();
        let back = read_field_csv(&path, ElemType::vector(ScalarKind::I32, 2), 2).unwrap();
        assert_eq!(
            back[1],
            Value::Lanes(vec![Value::I32(3), Value::I32(4)])
        );
    }
}
