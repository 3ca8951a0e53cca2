//! Arrow helpers shared by fitting, forecasting and target transforms.

use std::ops::Range;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float64Array, RecordBatch, RecordBatchOptions,
    UInt32Array,
};
use arrow::compute::{SortColumn, cast, lexsort_to_indices, take};
use arrow::datatypes::Float64Type;
use arrow_schema::{DataType, Field, Schema};

use crate::error::{ForecastError, Result};

pub fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ForecastError::MissingColumn(name.to_string()))
}

pub fn has_column(batch: &RecordBatch, name: &str) -> bool {
    batch.schema().column_with_name(name).is_some()
}

/// UTF-8 rendering of every id, used to compare ids across tables.
pub fn series_keys(array: &ArrayRef) -> Result<Vec<String>> {
    let strings = cast(array, &DataType::Utf8)?;
    let strings = strings.as_string::<i32>();
    Ok((0..strings.len())
        .map(|i| {
            if strings.is_valid(i) {
                strings.value(i).to_string()
            } else {
                String::new()
            }
        })
        .collect())
}

/// Ranges of consecutive equal keys.
pub fn group_ranges(keys: &[String]) -> Vec<(String, Range<usize>)> {
    let mut out: Vec<(String, Range<usize>)> = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        match out.last_mut() {
            Some((last, range)) if last == key => range.end = i + 1,
            _ => out.push((key.clone(), i..i + 1)),
        }
    }
    out
}

/// Float64 values of a column, nulls become NaN.
pub fn f64_values(array: &ArrayRef) -> Result<Vec<f64>> {
    let casted = cast(array, &DataType::Float64)?;
    let floats = casted.as_primitive::<Float64Type>();
    Ok((0..floats.len())
        .map(|i| {
            if floats.is_valid(i) {
                floats.value(i)
            } else {
                f64::NAN
            }
        })
        .collect())
}

/// True if the column has nulls or NaN floats.
pub fn has_missing(array: &ArrayRef) -> bool {
    if array.null_count() > 0 {
        return true;
    }
    match array.data_type() {
        DataType::Float64 => array
            .as_primitive::<Float64Type>()
            .values()
            .iter()
            .any(|v| v.is_nan()),
        DataType::Float32 => array
            .as_primitive::<arrow::datatypes::Float32Type>()
            .values()
            .iter()
            .any(|v| v.is_nan()),
        _ => false,
    }
}

/// Indices that sort the rows by id then time.
pub fn sort_indices(batch: &RecordBatch, id_col: &str, time_col: &str) -> Result<Vec<usize>> {
    let columns = [
        SortColumn {
            values: column(batch, id_col)?.clone(),
            options: None,
        },
        SortColumn {
            values: column(batch, time_col)?.clone(),
            options: None,
        },
    ];
    let indices = lexsort_to_indices(&columns, None)?;
    Ok(indices.values().iter().map(|&i| i as usize).collect())
}

pub fn take_array(array: &ArrayRef, idxs: &[usize]) -> Result<ArrayRef> {
    let indices = UInt32Array::from(idxs.iter().map(|&i| i as u32).collect::<Vec<_>>());
    Ok(take(array.as_ref(), &indices, None)?)
}

pub fn take_batch(batch: &RecordBatch, idxs: &[usize]) -> Result<RecordBatch> {
    let columns = batch
        .columns()
        .iter()
        .map(|c| take_array(c, idxs))
        .collect::<Result<Vec<_>>>()?;
    Ok(RecordBatch::try_new(batch.schema(), columns)?)
}

pub fn gather_f64(values: &[f64], idxs: &[usize]) -> Vec<f64> {
    idxs.iter().map(|&i| values[i]).collect()
}

pub fn filter_f64(values: &[f64], keep: &BooleanArray) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .filter(|(i, _)| keep.value(*i))
        .map(|(_, v)| *v)
        .collect()
}

pub fn f64_array(values: Vec<f64>) -> ArrayRef {
    Arc::new(Float64Array::from(values))
}

/// Replace (or append) `name` with a Float64 column.
pub fn with_f64_column(batch: &RecordBatch, name: &str, values: Vec<f64>) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    let array = f64_array(values);
    match schema.index_of(name) {
        Ok(i) => {
            fields[i] = Field::new(name, DataType::Float64, true);
            columns[i] = array;
        }
        Err(_) => {
            fields.push(Field::new(name, DataType::Float64, true));
            columns.push(array);
        }
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Build a batch from named columns, every field nullable.
pub fn batch_from_columns(columns: Vec<(String, ArrayRef)>) -> Result<RecordBatch> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(name, array.data_type().clone(), true))
        .collect();
    let arrays = columns.into_iter().map(|(_, a)| a).collect();
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

/// Like [`batch_from_columns`] but also valid without columns.
pub fn batch_with_rows(columns: Vec<(String, ArrayRef)>, num_rows: usize) -> Result<RecordBatch> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(name, array.data_type().clone(), true))
        .collect();
    let arrays = columns.into_iter().map(|(_, a)| a).collect();
    let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        arrays,
        &options,
    )?)
}

/// Columns `names` of `batch`, in that order.
pub fn select_columns(batch: &RecordBatch, names: &[String]) -> Result<RecordBatch> {
    let columns = names
        .iter()
        .map(|name| Ok((name.clone(), column(batch, name)?.clone())))
        .collect::<Result<Vec<_>>>()?;
    batch_with_rows(columns, batch.num_rows())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};

    fn frame() -> RecordBatch {
        batch_from_columns(vec![
            (
                "unique_id".to_string(),
                Arc::new(StringArray::from(vec!["b", "a", "b", "a"])) as ArrayRef,
            ),
            (
                "ds".to_string(),
                Arc::new(Int64Array::from(vec![2, 2, 1, 1])) as ArrayRef,
            ),
            (
                "y".to_string(),
                Arc::new(Float64Array::from(vec![Some(4.0), Some(2.0), None, Some(1.0)]))
                    as ArrayRef,
            ),
        ])
        .expect("valid frame")
    }

    #[test]
    fn test_sort_indices() -> anyhow::Result<()> {
        let batch = frame();
        assert_eq!(sort_indices(&batch, "unique_id", "ds")?, vec![3, 1, 2, 0]);
        assert!(matches!(
            sort_indices(&batch, "id", "ds"),
            Err(ForecastError::MissingColumn(_))
        ));
        Ok(())
    }

    #[test]
    fn test_group_ranges() {
        let keys: Vec<String> = ["a", "a", "b", "c", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            group_ranges(&keys),
            vec![
                ("a".to_string(), 0..2),
                ("b".to_string(), 2..3),
                ("c".to_string(), 3..5)
            ]
        );
    }

    #[test]
    fn test_values_and_missing() -> anyhow::Result<()> {
        let batch = frame();
        let y = column(&batch, "y")?;
        assert!(has_missing(y));
        let values = f64_values(y)?;
        assert!(values[2].is_nan());
        assert!(!has_missing(&f64_array(vec![1.0])));
        assert!(has_missing(&f64_array(vec![f64::NAN])));
        assert_eq!(series_keys(column(&batch, "ds")?)?, vec!["2", "2", "1", "1"]);
        Ok(())
    }

    #[test]
    fn test_with_f64_column() -> anyhow::Result<()> {
        let batch = with_f64_column(&frame(), "y", vec![0.0; 4])?;
        assert_eq!(batch.num_columns(), 3);
        assert_eq!(f64_values(column(&batch, "y")?)?, vec![0.0; 4]);
        let batch = with_f64_column(&batch, "extra", vec![1.0; 4])?;
        assert_eq!(batch.schema().field(3).name(), "extra");
        Ok(())
    }

    #[test]
    fn test_select_columns() -> anyhow::Result<()> {
        let batch = select_columns(&frame(), &["y".to_string(), "unique_id".to_string()])?;
        assert_eq!(batch.schema().field(0).name(), "y");
        assert_eq!(batch.num_rows(), 4);
        let empty = select_columns(&frame(), &[])?;
        assert_eq!((empty.num_columns(), empty.num_rows()), (0, 4));
        assert!(select_columns(&frame(), &["x".to_string()]).is_err());
        Ok(())
    }
}
