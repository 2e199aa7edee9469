use std::collections::{BTreeMap, BTreeSet};

use crate::config::Settings;
use crate::models::{GraduateDetail, NonCompleterDetail, Period, Status, StudentId};
use crate::period::PeriodSequence;
use crate::snapshot::SnapshotRegistry;

type Enrollment = (StudentId, String, String);

/// Sequence periods that appear in reports, oldest first.
fn reported_periods<'s>(
    sequence: &'s PeriodSequence,
    registry: &'s SnapshotRegistry,
) -> impl Iterator<Item = Period> + 's {
    registry
        .periods()
        .into_iter()
        .filter(move |period| sequence.contains(*period) && !sequence.is_base(*period))
}

pub fn graduates(
    settings: &Settings,
    sequence: &PeriodSequence,
    registry: &SnapshotRegistry,
) -> Vec<GraduateDetail> {
    let mut rows = Vec::new();

    for period in reported_periods(sequence, registry) {
        for record in registry.merged_view(period).values() {
            if !record.status.is_graduated() || settings.is_excluded(&record.program) {
                continue;
            }
            rows.push(GraduateDetail {
                period,
                student_id: record.student_id.clone(),
                name: record.name.clone(),
                program: record.program.clone(),
                degree: settings.degree_label(record.degree, &record.degree_label),
                department: record.department.clone(),
                gender: record.gender.clone(),
                nationality: record.nationality.clone(),
                admission_date: record.admission_date.clone(),
                grad_date: record.grad_date.clone(),
                expected_grad_date: record.expected_grad_date.clone(),
                gpa: record.gpa,
            });
        }
    }

    rows.sort_by(|a, b| {
        (a.period, &a.department, &a.program, &a.student_id).cmp(&(
            b.period,
            &b.department,
            &b.program,
            &b.student_id,
        ))
    });
    rows
}

/// Latest non-completion observation per (student, program, degree), minus
/// any enrollment that graduated in any period, earlier or later.
pub fn non_completers(
    settings: &Settings,
    sequence: &PeriodSequence,
    registry: &SnapshotRegistry,
) -> Vec<NonCompleterDetail> {
    let mut latest: BTreeMap<Enrollment, NonCompleterDetail> = BTreeMap::new();

    for period in reported_periods(sequence, registry) {
        for record in registry.merged_view(period).values() {
            let Status::Other(reason) = &record.status else {
                continue;
            };
            if settings.is_excluded(&record.program) {
                continue;
            }
            let degree = settings.degree_label(record.degree, &record.degree_label);
            let key = (record.student_id.clone(), record.program.clone(), degree.clone());
            if latest.get(&key).is_some_and(|seen| seen.period >= period) {
                continue;
            }
            latest.insert(
                key,
                NonCompleterDetail {
                    period,
                    student_id: record.student_id.clone(),
                    name: record.name.clone(),
                    program: record.program.clone(),
                    degree,
                    department: record.department.clone(),
                    status: reason.clone(),
                    gender: record.gender.clone(),
                    nationality: record.nationality.clone(),
                    admission_date: record.admission_date.clone(),
                    gpa: record.gpa,
                    study_type: record.study_type.clone(),
                },
            );
        }
    }

    let graduated: BTreeSet<Enrollment> = registry
        .periods()
        .into_iter()
        .flat_map(|period| registry.merged_view(period).values())
        .filter(|record| record.status.is_graduated())
        .map(|record| {
            (
                record.student_id.clone(),
                record.program.clone(),
                settings.degree_label(record.degree, &record.degree_label),
            )
        })
        .collect();

    let mut rows: Vec<NonCompleterDetail> = latest
        .into_iter()
        .filter(|(key, _)| !graduated.contains(key))
        .map(|(_, row)| row)
        .collect();

    rows.sort_by(|a, b| {
        (a.period, &a.department, &a.program, &a.status, &a.student_id).cmp(&(
            b.period,
            &b.department,
            &b.program,
            &b.status,
            &b.student_id,
        ))
    });
    rows
}
