use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::Settings;
use crate::models::{AggregateRecord, Diagnostics, GraduateDetail, NonCompleterDetail};
use crate::pipeline::KpiRun;

pub const AGGREGATE_FILE: &str = "aggregate.csv";
pub const GRADUATES_FILE: &str = "graduates_detail.csv";
pub const NON_COMPLETERS_FILE: &str = "non_completers.csv";
pub const DIAGNOSTICS_FILE: &str = "diagnostics.json";

#[derive(Serialize)]
struct AggregateRow<'a> {
    department: &'a str,
    program: &'a str,
    degree: String,
    period: String,
    students_total: usize,
    students_male: usize,
    students_female: usize,
    students_domestic: usize,
    students_international: usize,
    students_new: usize,
    students_retained: usize,
    retention_denominator: usize,
    retention_rate: Option<f64>,
    graduates_total: usize,
    graduates_ontime: usize,
    ontime_denominator: usize,
    ontime_rate: Option<f64>,
    lookback_periods: u16,
}

#[derive(Serialize)]
struct GraduateRow<'a> {
    period: String,
    student_id: &'a str,
    name: &'a str,
    program: &'a str,
    degree: &'a str,
    department: &'a str,
    gender: &'a str,
    nationality: &'a str,
    admission_date: &'a str,
    grad_date: Option<&'a str>,
    expected_grad_date: Option<&'a str>,
    gpa: Option<f64>,
}

#[derive(Serialize)]
struct NonCompleterRow<'a> {
    period: String,
    student_id: &'a str,
    name: &'a str,
    program: &'a str,
    degree: &'a str,
    department: &'a str,
    status: &'a str,
    gender: &'a str,
    nationality: &'a str,
    admission_date: &'a str,
    gpa: Option<f64>,
    study_type: Option<&'a str>,
}

#[derive(Serialize)]
struct DiagnosticsDocument<'a> {
    run_id: Uuid,
    generated_at: DateTime<Utc>,
    sequence: Vec<String>,
    #[serde(flatten)]
    diagnostics: &'a Diagnostics,
}

fn csv_writer<W: Write>(settings: &Settings, out: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(settings.delimiter_byte())
        .from_writer(out)
}

pub fn write_aggregates<W: Write>(
    settings: &Settings,
    records: &[AggregateRecord],
    out: W,
) -> anyhow::Result<()> {
    let mut writer = csv_writer(settings, out);
    for record in records {
        writer.serialize(AggregateRow {
            department: &record.key.department,
            program: &record.key.program,
            degree: settings.degree_label(Some(record.key.degree), ""),
            period: settings.period_label(record.key.period),
            students_total: record.students_total,
            students_male: record.students_male,
            students_female: record.students_female,
            students_domestic: record.students_domestic,
            students_international: record.students_international,
            students_new: record.students_new,
            students_retained: record.retention.numerator,
            retention_denominator: record.retention.denominator,
            retention_rate: record.retention.ratio(),
            graduates_total: record.graduates_total,
            graduates_ontime: record.ontime.numerator,
            ontime_denominator: record.ontime.denominator,
            ontime_rate: record.ontime.ratio(),
            lookback_periods: record.lookback_periods,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_graduates<W: Write>(
    settings: &Settings,
    rows: &[GraduateDetail],
    out: W,
) -> anyhow::Result<()> {
    let mut writer = csv_writer(settings, out);
    for row in rows {
        writer.serialize(GraduateRow {
            period: settings.period_label(row.period),
            student_id: &row.student_id.0,
            name: &row.name,
            program: &row.program,
            degree: &row.degree,
            department: &row.department,
            gender: &row.gender,
            nationality: &row.nationality,
            admission_date: &row.admission_date,
            grad_date: row.grad_date.as_deref(),
            expected_grad_date: row.expected_grad_date.as_deref(),
            gpa: row.gpa,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_non_completers<W: Write>(
    settings: &Settings,
    rows: &[NonCompleterDetail],
    out: W,
) -> anyhow::Result<()> {
    let mut writer = csv_writer(settings, out);
    for row in rows {
        writer.serialize(NonCompleterRow {
            period: settings.period_label(row.period),
            student_id: &row.student_id.0,
            name: &row.name,
            program: &row.program,
            degree: &row.degree,
            department: &row.department,
            status: &row.status,
            gender: &row.gender,
            nationality: &row.nationality,
            admission_date: &row.admission_date,
            gpa: row.gpa,
            study_type: row.study_type.as_deref(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn diagnostics_json(settings: &Settings, run: &KpiRun) -> anyhow::Result<String> {
    let document = DiagnosticsDocument {
        run_id: run.run_id,
        generated_at: Utc::now(),
        sequence: settings
            .sequence
            .iter()
            .map(|period| settings.period_label(*period))
            .collect(),
        diagnostics: &run.diagnostics,
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

fn create(dir: &Path, name: &str) -> anyhow::Result<(PathBuf, File)> {
    let path = dir.join(name);
    let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok((path, file))
}

/// Writes the three tables and the diagnostics document into `dir`.
pub fn write_all(settings: &Settings, run: &KpiRun, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let (aggregate_path, file) = create(dir, AGGREGATE_FILE)?;
    write_aggregates(settings, &run.aggregates, file)?;

    let (graduates_path, file) = create(dir, GRADUATES_FILE)?;
    write_graduates(settings, &run.graduates, file)?;

    let (non_completers_path, file) = create(dir, NON_COMPLETERS_FILE)?;
    write_non_completers(settings, &run.non_completers, file)?;

    let diagnostics_path = dir.join(DIAGNOSTICS_FILE);
    std::fs::write(&diagnostics_path, diagnostics_json(settings, run)?)
        .with_context(|| format!("failed to write {}", diagnostics_path.display()))?;

    Ok(vec![
        aggregate_path,
        graduates_path,
        non_completers_path,
        diagnostics_path,
    ])
}
