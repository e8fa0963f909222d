//! Append-only columnar result store.
//!
//! Three logical tables live under one directory, all keyed by `job_id`:
//! `jobs.csv` (one row per job: its parameter assignment), `results.csv`
//! (time-series rows), and `summary.csv` (one row per job: extracted
//! scalar metrics and optimization outputs). The orchestrating process is
//! the sole writer; workers never touch these files. Each table's schema
//! is fixed by the first appended row.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::StoreError;
use crate::jobs::Params;

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

struct Table {
    path: PathBuf,
    writer: csv::Writer<File>,
    schema: Option<Vec<String>>,
}

impl Table {
    fn create(path: PathBuf) -> Result<Self, StoreError> {
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file),
            schema: None,
        })
    }

    /// Fix the schema on first use; later rows are projected onto it.
    fn ensure_schema(&mut self, columns: &[String]) -> Result<&[String], StoreError> {
        if self.schema.is_none() {
            self.writer.write_record(columns)?;
            self.schema = Some(columns.to_vec());
        }
        Ok(self.schema.as_deref().unwrap_or_default())
    }

    fn append_row(&mut self, row: &Params, job_id: usize) -> Result<(), StoreError> {
        let mut columns = vec!["job_id".to_string()];
        columns.extend(row.keys().cloned());
        let schema = self.ensure_schema(&columns)?.to_vec();

        for key in row.keys() {
            if !schema.iter().any(|c| c == key) {
                tracing::warn!(
                    table = %self.path.display(),
                    column = %key,
                    "column not in table schema, dropping"
                );
            }
        }

        let record: Vec<String> = schema
            .iter()
            .map(|column| {
                if column == "job_id" {
                    job_id.to_string()
                } else {
                    row.get(column).map(render).unwrap_or_default()
                }
            })
            .collect();
        self.writer.write_record(&record)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.writer.flush()?;
        Ok(())
    }
}

pub struct ResultStore {
    dir: PathBuf,
    jobs: Table,
    results: Table,
    summary: Table,
}

impl ResultStore {
    /// Open a fresh store for one run. Existing tables in the directory
    /// are replaced.
    pub fn create(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            jobs: Table::create(dir.join("jobs.csv"))?,
            results: Table::create(dir.join("results.csv"))?,
            summary: Table::create(dir.join("summary.csv"))?,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn jobs_path(&self) -> PathBuf {
        self.dir.join("jobs.csv")
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join("results.csv")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join("summary.csv")
    }

    /// Record one job's parameter assignment.
    pub fn append_job(&mut self, job_id: usize, params: &Params) -> Result<(), StoreError> {
        self.jobs.append_row(params, job_id)
    }

    /// Stream one job's cleaned time series into the results table,
    /// tagging every row with the job id. Returns the number of rows
    /// appended.
    pub fn ingest_result(&mut self, job_id: usize, csv_path: &Path) -> Result<usize, StoreError> {
        let mut reader = csv::Reader::from_path(csv_path)?;
        let headers = reader.headers()?.clone();

        let mut columns = vec!["job_id".to_string()];
        columns.extend(headers.iter().map(|h| h.trim().to_string()));
        let schema = self.results.ensure_schema(&columns)?.to_vec();

        // Column positions in this job's file, by schema name.
        let positions: Vec<Option<usize>> = schema
            .iter()
            .map(|column| {
                if column == "job_id" {
                    None
                } else {
                    headers.iter().position(|h| h.trim() == column)
                }
            })
            .collect();

        let mut appended = 0usize;
        for record in reader.records() {
            let record = record?;
            let row: Vec<String> = schema
                .iter()
                .zip(&positions)
                .map(|(column, position)| {
                    if column == "job_id" {
                        job_id.to_string()
                    } else {
                        position
                            .and_then(|i| record.get(i))
                            .unwrap_or_default()
                            .to_string()
                    }
                })
                .collect();
            self.results.writer.write_record(&row)?;
            appended += 1;
        }
        Ok(appended)
    }

    /// Record one job's summary row: its parameters plus extracted scalar
    /// metrics and any optimization outputs.
    pub fn append_summary(&mut self, job_id: usize, row: &Params) -> Result<(), StoreError> {
        self.summary.append_row(row, job_id)
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.jobs.flush()?;
        self.results.flush()?;
        self.summary.flush()
    }

    /// Legacy flat-file export: one wide CSV where each variable column is
    /// suffixed `&param1=v1&param2=v2...` encoding the job's parameter
    /// combination. Jobs are aligned by row position; the time column
    /// comes from the first job with results.
    pub fn export_wide(&mut self, out_path: &Path) -> Result<(), StoreError> {
        self.flush()?;

        // Parameter strings per job, in job order.
        let mut job_order: Vec<usize> = Vec::new();
        let mut param_strings: std::collections::HashMap<usize, String> =
            std::collections::HashMap::new();
        {
            let mut reader = csv::Reader::from_path(self.jobs_path())?;
            let headers = reader.headers()?.clone();
            for record in reader.records() {
                let record = record?;
                let Some(job_id) = record.get(0).and_then(|f| f.parse::<usize>().ok()) else {
                    continue;
                };
                let pairs: Vec<String> = headers
                    .iter()
                    .zip(record.iter())
                    .skip(1)
                    .filter(|(_, value)| !value.is_empty())
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect();
                job_order.push(job_id);
                param_strings.insert(job_id, pairs.join("&"));
            }
        }

        // Per-job columns from the results table.
        let mut reader = csv::Reader::from_path(self.results_path())?;
        let headers = reader.headers()?.clone();
        let variables: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, name)| !name.trim().eq_ignore_ascii_case("time"))
            .map(|(i, name)| (i, name.trim().to_string()))
            .collect();
        let time_idx = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case("time"));

        let mut time: Vec<String> = Vec::new();
        let mut time_job: Option<usize> = None;
        let mut series: std::collections::HashMap<usize, Vec<Vec<String>>> =
            std::collections::HashMap::new();
        for record in reader.records() {
            let record = record?;
            let Some(job_id) = record.get(0).and_then(|f| f.parse::<usize>().ok()) else {
                continue;
            };
            let columns = series
                .entry(job_id)
                .or_insert_with(|| vec![Vec::new(); variables.len()]);
            for (slot, (idx, _)) in columns.iter_mut().zip(&variables) {
                slot.push(record.get(*idx).unwrap_or_default().to_string());
            }
            // Time axis comes from the first job that produced rows.
            if time_job.is_none() {
                time_job = Some(job_id);
            }
            if time_job == Some(job_id) {
                if let Some(t) = time_idx.and_then(|i| record.get(i)) {
                    time.push(t.to_string());
                }
            }
        }

        let mut header: Vec<String> = vec!["time".to_string()];
        let mut data_columns: Vec<&Vec<String>> = Vec::new();
        for job_id in &job_order {
            let Some(columns) = series.get(job_id) else {
                continue;
            };
            let params = param_strings.get(job_id).cloned().unwrap_or_default();
            for ((_, name), column) in variables.iter().zip(columns) {
                if params.is_empty() {
                    header.push(name.clone());
                } else {
                    header.push(format!("{name}&{params}"));
                }
                data_columns.push(column);
            }
        }

        let rows = data_columns
            .iter()
            .map(|c| c.len())
            .chain(std::iter::once(time.len()))
            .max()
            .unwrap_or(0);

        let mut writer = csv::Writer::from_path(out_path)?;
        writer.write_record(&header)?;
        for row in 0..rows {
            let mut record: Vec<String> = Vec::with_capacity(header.len());
            record.push(time.get(row).cloned().unwrap_or_default());
            for column in &data_columns {
                record.push(column.get(row).cloned().unwrap_or_default());
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}
