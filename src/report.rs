use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::config::Settings;
use crate::models::{AggregateRecord, PeriodSummary, Rate};
use crate::pipeline::KpiRun;

pub fn summarize_by_period(records: &[AggregateRecord]) -> Vec<PeriodSummary> {
    let mut map: BTreeMap<_, PeriodSummary> = BTreeMap::new();

    for record in records {
        let period = record.key.period;
        let entry = map.entry(period).or_insert_with(|| PeriodSummary {
            period,
            students_total: 0,
            students_new: 0,
            graduates_total: 0,
            retention: Rate::default(),
            ontime: Rate::default(),
        });
        entry.students_total += record.students_total;
        entry.students_new += record.students_new;
        entry.graduates_total += record.graduates_total;
        entry.retention.numerator += record.retention.numerator;
        entry.retention.denominator += record.retention.denominator;
        entry.ontime.numerator += record.ontime.numerator;
        entry.ontime.denominator += record.ontime.denominator;
    }

    map.into_values().collect()
}

fn pct(rate: Rate) -> String {
    match rate.percent() {
        Some(value) => format!("{value:.1}% ({} of {})", rate.numerator, rate.denominator),
        None => "n/a".to_string(),
    }
}

pub fn build_report(settings: &Settings, run: &KpiRun, generated_at: DateTime<Utc>) -> String {
    let summaries = summarize_by_period(&run.aggregates);
    let mut output = String::new();

    let _ = writeln!(output, "# Student Cohort KPI Report");
    let _ = writeln!(
        output,
        "Generated {} (run {})",
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        run.run_id
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Periods");

    if summaries.is_empty() {
        let _ = writeln!(output, "No reportable periods in the supplied snapshots.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} enrolled, {} new, {} graduates; retention {}; on-time graduation {}",
                settings.period_label(summary.period),
                summary.students_total,
                summary.students_new,
                summary.graduates_total,
                pct(summary.retention),
                pct(summary.ontime)
            );
        }
    }

    let _ = writeln!(output);
    let latest = summaries.last().map(|summary| summary.period);
    match latest {
        Some(period) => {
            let _ = writeln!(output, "## Programs in {}", settings.period_label(period));
            let _ = writeln!(output);
            let _ = writeln!(
                output,
                "| Department | Program | Degree | Enrolled | New | Retention | Graduates | On-time |"
            );
            let _ = writeln!(output, "|---|---|---|---:|---:|---:|---:|---:|");

            let mut rows: Vec<&AggregateRecord> = run
                .aggregates
                .iter()
                .filter(|record| record.key.period == period)
                .collect();
            rows.sort_by(|a, b| b.students_total.cmp(&a.students_total));
            for record in rows {
                let _ = writeln!(
                    output,
                    "| {} | {} | {} | {} | {} | {} | {} | {} |",
                    record.key.department,
                    record.key.program,
                    settings.degree_label(Some(record.key.degree), ""),
                    record.students_total,
                    record.students_new,
                    pct(record.retention),
                    record.graduates_total,
                    pct(record.ontime)
                );
            }
        }
        None => {
            let _ = writeln!(output, "## Programs");
            let _ = writeln!(output, "No program rows produced.");
        }
    }

    let diagnostics = &run.diagnostics;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Diagnostics");
    let _ = writeln!(
        output,
        "- {} exports, {} rows read",
        diagnostics.load.files, diagnostics.load.rows
    );
    if diagnostics.load.unrecognized_degree_labels.is_empty() {
        let _ = writeln!(output, "- every degree label was recognised");
    } else {
        for (label, count) in &diagnostics.load.unrecognized_degree_labels {
            let _ = writeln!(output, "- unrecognised degree '{label}': {count} rows");
        }
    }
    for (period, skipped) in &diagnostics.skipped {
        if skipped.unrecognized_degree > 0 || skipped.excluded_program > 0 {
            let _ = writeln!(
                output,
                "- {}: {} records with unrecognised degree, {} from excluded programs",
                settings.period_label(*period),
                skipped.unrecognized_degree,
                skipped.excluded_program
            );
        }
    }
    for period in &diagnostics.periods_outside_sequence {
        let _ = writeln!(
            output,
            "- {} has snapshots but is not in the period sequence",
            settings.period_label(*period)
        );
    }

    output
}
