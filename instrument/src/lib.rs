//! Instrumentation for collecting simulation series into columnar tables.
//!
//! A custom `tracing` subscriber turns structured events into dynamically
//! typed columns, one table per tracing target, one row per event. The
//! schema emerges from the recorded fields, so the engine can add fields
//! without touching this crate. Tables convert to polars DataFrames and can
//! be written as parquet for offline analysis.
//!
//! The simulation phases run on rayon worker threads, so the recorder is a
//! process-wide store behind a mutex rather than a thread-local.
//!
//! # Usage
//!
//! ```ignore
//! // In engine code:
//! tracing::info!(target: "region", timestep, name = %region, gdp);
//!
//! // In a test:
//! instrument::install_subscriber();
//! // ... run simulation ...
//! let recorder = instrument::drain();
//! let gdp = recorder.tables["region"].f64_column("gdp").unwrap();
//! ```

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Metadata, Subscriber};

/// A column of typed values.
#[derive(Debug, Clone)]
pub enum TypedColumn {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl TypedColumn {
    pub fn len(&self) -> usize {
        match self {
            TypedColumn::U64(v) => v.len(),
            TypedColumn::I64(v) => v.len(),
            TypedColumn::F64(v) => v.len(),
            TypedColumn::Bool(v) => v.len(),
            TypedColumn::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A table with dynamically-typed columns.
#[derive(Debug, Clone, Default)]
pub struct DynamicTable {
    pub columns: HashMap<String, TypedColumn>,
    pub row_count: usize,
}

impl DynamicTable {
    /// Pad all columns to the current row count with default values, keeping
    /// rows aligned when events carry different field sets.
    fn pad_columns_to_row_count(&mut self) {
        for col in self.columns.values_mut() {
            let current_len = col.len();
            if current_len < self.row_count {
                let padding = self.row_count - current_len;
                match col {
                    TypedColumn::U64(v) => v.extend(std::iter::repeat_n(0, padding)),
                    TypedColumn::I64(v) => v.extend(std::iter::repeat_n(0, padding)),
                    TypedColumn::F64(v) => v.extend(std::iter::repeat_n(0.0, padding)),
                    TypedColumn::Bool(v) => v.extend(std::iter::repeat_n(false, padding)),
                    TypedColumn::Str(v) => v.extend(std::iter::repeat_n(String::new(), padding)),
                }
            }
        }
    }

    pub fn f64_column(&self, name: &str) -> Option<&[f64]> {
        match self.columns.get(name) {
            Some(TypedColumn::F64(v)) => Some(v),
            _ => None,
        }
    }

    pub fn u64_column(&self, name: &str) -> Option<&[u64]> {
        match self.columns.get(name) {
            Some(TypedColumn::U64(v)) => Some(v),
            _ => None,
        }
    }

    pub fn str_column(&self, name: &str) -> Option<&[String]> {
        match self.columns.get(name) {
            Some(TypedColumn::Str(v)) => Some(v),
            _ => None,
        }
    }

    /// Rows of `value_column` where `key_column == key`, in recorded order.
    /// The usual shape for per-entity series: key is the entity name, the
    /// recorded order is tick order.
    pub fn series_for(&self, key_column: &str, key: &str, value_column: &str) -> Vec<f64> {
        let (Some(keys), Some(values)) = (
            self.str_column(key_column),
            self.f64_column(value_column),
        ) else {
            return Vec::new();
        };
        keys.iter()
            .zip(values)
            .filter(|(k, _)| k.as_str() == key)
            .map(|(_, &v)| v)
            .collect()
    }
}

/// Collection of tables, keyed by tracing target.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub tables: HashMap<String, DynamicTable>,
}

static RECORDER: Mutex<Option<Recorder>> = Mutex::new(None);

/// Visitor that extracts event fields into table columns.
struct ColumnVisitor<'a> {
    table: &'a mut DynamicTable,
    /// Current row count - used to pre-pad new columns
    row_count: usize,
}

impl Visit for ColumnVisitor<'_> {
    fn record_u64(&mut self, field: &Field, value: u64) {
        let name = field.name().to_string();
        let col = self
            .table
            .columns
            .entry(name)
            .or_insert_with(|| TypedColumn::U64(vec![0; self.row_count]));
        if let TypedColumn::U64(v) = col {
            v.push(value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        let name = field.name().to_string();
        let col = self
            .table
            .columns
            .entry(name)
            .or_insert_with(|| TypedColumn::I64(vec![0; self.row_count]));
        if let TypedColumn::I64(v) = col {
            v.push(value);
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let name = field.name().to_string();
        let col = self
            .table
            .columns
            .entry(name)
            .or_insert_with(|| TypedColumn::F64(vec![0.0; self.row_count]));
        if let TypedColumn::F64(v) = col {
            v.push(value);
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        let name = field.name().to_string();
        let col = self
            .table
            .columns
            .entry(name)
            .or_insert_with(|| TypedColumn::Bool(vec![false; self.row_count]));
        if let TypedColumn::Bool(v) = col {
            v.push(value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        let name = field.name().to_string();
        let col = self
            .table
            .columns
            .entry(name)
            .or_insert_with(|| TypedColumn::Str(vec![String::new(); self.row_count]));
        if let TypedColumn::Str(v) = col {
            v.push(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_str(field, &format!("{:?}", value));
    }
}

/// Tracing subscriber that collects events into column-oriented tables.
/// Warnings from the simulation loop (degenerate conditions, optimizer
/// trouble) are collected alongside the info-level data rows.
pub struct TableSubscriber;

impl Subscriber for TableSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event() && *metadata.level() <= tracing::Level::INFO
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        // spans are not tracked
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let target = event.metadata().target().to_string();
        let mut guard = RECORDER.lock().unwrap();
        let recorder = guard.get_or_insert_with(Recorder::default);
        let table = recorder.tables.entry(target).or_default();

        table.pad_columns_to_row_count();
        let row_count = table.row_count;
        event.record(&mut ColumnVisitor { table, row_count });
        table.row_count += 1;
        table.pad_columns_to_row_count();
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Install the TableSubscriber as the global default.
/// Call this once at the start of a test or run.
pub fn install_subscriber() {
    let _ = tracing::subscriber::set_global_default(TableSubscriber);
}

/// Drain all recorded data from the process-wide recorder.
pub fn drain() -> Recorder {
    RECORDER.lock().unwrap().take().unwrap_or_default()
}

/// Clear all recorded data without returning it.
pub fn clear() {
    *RECORDER.lock().unwrap() = None;
}

// === Polars Integration ===

use polars::prelude::*;

impl DynamicTable {
    /// Convert this table to a polars DataFrame.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut columns: Vec<Column> = Vec::new();

        for (name, col) in &self.columns {
            let series = match col {
                TypedColumn::U64(v) => Column::new(name.into(), v),
                TypedColumn::I64(v) => Column::new(name.into(), v),
                TypedColumn::F64(v) => Column::new(name.into(), v),
                TypedColumn::Bool(v) => Column::new(name.into(), v),
                TypedColumn::Str(v) => Column::new(name.into(), v),
            };
            columns.push(series);
        }

        DataFrame::new(columns)
    }
}

impl Recorder {
    /// Convert all tables to polars DataFrames.
    pub fn to_dataframes(&self) -> HashMap<String, DataFrame> {
        self.tables
            .iter()
            .filter_map(|(name, table)| table.to_dataframe().ok().map(|df| (name.clone(), df)))
            .collect()
    }
}

/// Drain all recorded data and convert to polars DataFrames.
pub fn drain_to_dataframes() -> HashMap<String, DataFrame> {
    drain().to_dataframes()
}

/// Save all DataFrames as parquet files in the given directory.
/// Each table becomes `{dir}/{name}.parquet`.
pub fn save_parquet(
    dfs: &mut HashMap<String, DataFrame>,
    dir: &std::path::Path,
) -> PolarsResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| PolarsError::IO {
        error: e.into(),
        msg: None,
    })?;
    for (name, df) in dfs.iter_mut() {
        let path = dir.join(format!("{}.parquet", name));
        let file = std::fs::File::create(&path).map_err(|e| PolarsError::IO {
            error: e.into(),
            msg: None,
        })?;
        ParquetWriter::new(file).finish(df)?;
    }
    Ok(())
}

/// RAII guard that clears instrumentation data on creation and saves to
/// parquet on drop. Call `.get()` after the simulation to drain and access
/// the DataFrames for analysis; on drop, parquet files plus a `_ready`
/// sentinel are written.
pub struct ScopedRecorder {
    run_dir: std::path::PathBuf,
    run_name: String,
    dfs: Option<HashMap<String, DataFrame>>,
}

impl ScopedRecorder {
    /// Create a new recorder writing to `{parent}/{name}/`.
    pub fn new(parent: impl Into<std::path::PathBuf>, name: &str) -> Self {
        let run_name = sanitize(name);
        let run_dir = parent.into().join(&run_name);
        clear();
        install_subscriber();
        Self {
            run_dir,
            run_name,
            dfs: None,
        }
    }

    /// Drain recorded data and return a reference to the DataFrames.
    /// First call drains the recorder; subsequent calls return cached data.
    pub fn get(&mut self) -> &HashMap<String, DataFrame> {
        self.dfs.get_or_insert_with(drain_to_dataframes)
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn run_dir(&self) -> &std::path::Path {
        &self.run_dir
    }
}

impl Drop for ScopedRecorder {
    fn drop(&mut self) {
        let mut dfs = self.dfs.take().unwrap_or_else(drain_to_dataframes);
        if dfs.is_empty() {
            return;
        }
        if let Err(e) = save_parquet(&mut dfs, &self.run_dir) {
            eprintln!(
                "ScopedRecorder({}): failed to write parquet: {}",
                self.run_name, e
            );
            return;
        }
        // Sentinel so watchers know all parquets are complete
        let sentinel = self.run_dir.join("_ready");
        if let Err(e) = std::fs::File::create(&sentinel) {
            eprintln!(
                "ScopedRecorder({}): failed to write _ready sentinel: {}",
                self.run_name, e
            );
        }
    }
}

/// Replace non-alphanumeric chars with `_` and truncate for directory names.
fn sanitize(name: &str) -> String {
    let s: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if s.len() > 60 { s[..60].to_string() } else { s }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_recording() {
        clear();
        {
            let mut guard = RECORDER.lock().unwrap();
            let recorder = guard.get_or_insert_with(Recorder::default);
            let table = recorder.tables.entry("test".to_string()).or_default();
            table
                .columns
                .insert("timestep".to_string(), TypedColumn::U64(vec![1, 2, 3]));
            table
                .columns
                .insert("value".to_string(), TypedColumn::F64(vec![1.0, 2.0, 3.0]));
            table.row_count = 3;
        }

        let recorder = drain();
        let table = &recorder.tables["test"];
        assert_eq!(table.row_count, 3);
        assert_eq!(table.u64_column("timestep"), Some(&[1, 2, 3][..]));
        assert_eq!(table.f64_column("value"), Some(&[1.0, 2.0, 3.0][..]));
    }

    #[test]
    fn column_padding_keeps_rows_aligned() {
        let mut table = DynamicTable::default();
        table
            .columns
            .insert("timestep".to_string(), TypedColumn::U64(vec![1]));
        table
            .columns
            .insert("price".to_string(), TypedColumn::F64(vec![10.0]));
        table.row_count = 1;
        table.pad_columns_to_row_count();

        // second row: timestep and a new column, no price
        table.pad_columns_to_row_count();
        if let TypedColumn::U64(v) = table.columns.get_mut("timestep").unwrap() {
            v.push(2);
        }
        table
            .columns
            .insert("quantity".to_string(), TypedColumn::F64(vec![0.0, 5.0]));
        table.row_count = 2;
        table.pad_columns_to_row_count();

        assert_eq!(table.columns["timestep"].len(), 2);
        assert_eq!(table.columns["price"].len(), 2);
        assert_eq!(table.f64_column("price").unwrap()[1], 0.0);
        assert_eq!(table.f64_column("quantity").unwrap(), &[0.0, 5.0]);
    }

    #[test]
    fn tracing_integration() {
        use tracing::subscriber::with_default;

        clear();
        with_default(TableSubscriber, || {
            tracing::info!(target: "series", timestep = 1u64, gdp = 10.5f64, name = "R1");
            tracing::info!(target: "series", timestep = 2u64, gdp = 20.5f64, name = "R1");
            tracing::info!(target: "series", timestep = 2u64, gdp = 7.5f64, name = "R2");
        });

        let recorder = drain();
        let table = &recorder.tables["series"];
        assert_eq!(table.row_count, 3);
        assert_eq!(
            table.series_for("name", "R1", "gdp"),
            vec![10.5, 20.5],
        );
        assert_eq!(table.series_for("name", "R2", "gdp"), vec![7.5]);
    }
}
