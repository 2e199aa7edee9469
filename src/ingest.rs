use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::EngineError;
use crate::models::{LoadStats, Period, StudentId, StudentRecord};
use crate::snapshot::SnapshotRegistry;

/// One row of a normalized registry export.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InputRow {
    pub student_id: Option<String>,
    pub name: String,
    pub program: String,
    pub degree: String,
    pub status: Option<String>,
    pub gender: String,
    pub nationality: String,
    pub admission_date: String,
    pub expected_grad_date: Option<String>,
    pub grad_date: Option<String>,
    pub gpa: Option<f64>,
    pub study_type: Option<String>,
    pub department: Option<String>,
}

/// Records of one (period, sub-period) export.
#[derive(Debug)]
pub struct SubPeriodBatch {
    pub period: Period,
    pub sub_period: u8,
    pub records: Vec<StudentRecord>,
}

fn required(value: Option<String>, field: &'static str, row: usize) -> Result<String, EngineError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(EngineError::MissingField { field, row }),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Turns a raw row into a record: degree through the synonym table,
/// department through the program table, status into the closed enum.
/// The department column of the export is not trusted.
pub fn normalize(settings: &Settings, row: InputRow, index: usize) -> Result<StudentRecord, EngineError> {
    let student_id = required(row.student_id, "student_id", index)?;
    let status = required(row.status, "status", index)?;
    let program = row.program.trim().to_string();
    let degree_label = row.degree.trim().to_string();

    Ok(StudentRecord {
        student_id: StudentId(student_id),
        name: row.name.trim().to_string(),
        department: settings.department_for(&program),
        degree: settings.normalize_degree(&degree_label),
        degree_label,
        status: settings.status_from(&status),
        program,
        gender: row.gender.trim().to_string(),
        nationality: row.nationality.trim().to_string(),
        admission_date: row.admission_date.trim().to_string(),
        expected_grad_date: non_empty(row.expected_grad_date),
        grad_date: non_empty(row.grad_date),
        gpa: row.gpa,
        study_type: non_empty(row.study_type),
    })
}

/// Splits an export name such as `461.csv` into period 46, sub-period 1.
pub fn parse_file_name(path: &Path) -> Result<(Period, u8), EngineError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let invalid = || EngineError::FileName(stem.to_string());

    if stem.len() < 2 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let (period, sub_period) = stem.split_at(stem.len() - 1);
    let period = period.parse::<u16>().map_err(|_| invalid())?;
    let sub_period = sub_period.parse::<u8>().map_err(|_| invalid())?;
    Ok((Period(period), sub_period))
}

pub fn read_sub_period(settings: &Settings, path: &Path) -> anyhow::Result<SubPeriodBatch> {
    let (period, sub_period) = parse_file_name(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(settings.delimiter_byte())
        .trim(csv::Trim::Headers)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut records = Vec::new();
    for (index, result) in reader.deserialize::<InputRow>().enumerate() {
        let row = result.with_context(|| format!("malformed row in {}", path.display()))?;
        let record = normalize(settings, row, index + 1)
            .with_context(|| format!("rejected batch {}", path.display()))?;
        records.push(record);
    }

    info!(
        file = %path.display(),
        %period,
        sub_period,
        rows = records.len(),
        "export parsed"
    );
    Ok(SubPeriodBatch {
        period,
        sub_period,
        records,
    })
}

pub fn export_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Parses every export in `dir` on the blocking pool, one task per file.
pub async fn read_directory(settings: Arc<Settings>, dir: &Path) -> anyhow::Result<Vec<SubPeriodBatch>> {
    let files = export_files(dir)?;
    if files.is_empty() {
        warn!(dir = %dir.display(), "no exports found");
    }

    let mut tasks = JoinSet::new();
    for path in files {
        let settings = Arc::clone(&settings);
        tasks.spawn_blocking(move || read_sub_period(&settings, &path));
    }

    let mut batches = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        batches.push(joined.context("export reader task failed")??);
    }
    Ok(batches)
}

/// Folds parsed batches into a registry. Batches are ordered by period and
/// sub-period first, so the result does not depend on the order in which
/// readers finished.
pub fn build_registry(
    settings: &Settings,
    mut batches: Vec<SubPeriodBatch>,
) -> Result<(SnapshotRegistry, LoadStats), EngineError> {
    batches.sort_by_key(|batch| (batch.period, batch.sub_period));

    let mut registry = SnapshotRegistry::new();
    let mut stats = LoadStats::default();
    let mut unrecognized: BTreeMap<String, usize> = BTreeMap::new();

    let mut by_period: BTreeMap<Period, Vec<(u8, Vec<StudentRecord>)>> = BTreeMap::new();
    for batch in batches {
        stats.files += 1;
        stats.rows += batch.records.len();
        for record in batch.records.iter().filter(|r| r.degree.is_none()) {
            stats.unrecognized_degree_rows += 1;
            *unrecognized.entry(record.degree_label.clone()).or_insert(0) += 1;
        }

        if batch.sub_period == settings.primary_sub_period {
            registry.ingest_primary(batch.period, batch.sub_period, batch.records.clone())?;
        }
        by_period
            .entry(batch.period)
            .or_default()
            .push((batch.sub_period, batch.records));
    }
    for (period, sub_periods) in by_period {
        registry.ingest_merged_batches(period, sub_periods)?;
    }

    for (label, count) in &unrecognized {
        warn!(degree = %label, count, "unrecognised degree label");
    }
    stats.unrecognized_degree_labels = unrecognized;
    Ok((registry, stats))
}

pub async fn load_directory(
    settings: Arc<Settings>,
    dir: &Path,
) -> anyhow::Result<(SnapshotRegistry, LoadStats)> {
    let batches = read_directory(Arc::clone(&settings), dir).await?;
    let (registry, stats) = build_registry(&settings, batches)?;
    info!(
        files = stats.files,
        rows = stats.rows,
        periods = registry.periods().len(),
        "registry built"
    );
    Ok((registry, stats))
}
