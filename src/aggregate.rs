use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::cohort::CohortTracker;
use crate::config::Settings;
use crate::error::Result;
use crate::models::{AggregateRecord, KpiKey, Period, SkippedCounts, StudentId, StudentRecord};
use crate::snapshot::SnapshotRegistry;

#[derive(Debug, Default)]
pub struct AggregationRun {
    pub records: Vec<AggregateRecord>,
    pub skipped: BTreeMap<Period, SkippedCounts>,
    pub periods_outside_sequence: Vec<Period>,
}

#[derive(Default)]
struct Group<'r> {
    enrolled: Vec<&'r StudentRecord>,
    graduates: usize,
}

/// Students left out of one period's aggregation. A student seen in both
/// views of the period is counted once.
#[derive(Default)]
struct Skipped<'r> {
    unrecognized_degree: BTreeSet<&'r StudentId>,
    excluded_program: BTreeSet<&'r StudentId>,
}

impl Skipped<'_> {
    fn counts(&self) -> SkippedCounts {
        SkippedCounts {
            unrecognized_degree: self.unrecognized_degree.len(),
            excluded_program: self.excluded_program.len(),
        }
    }
}

/// Maps a record to its aggregate key, or notes why it was left out.
fn classify<'r>(
    settings: &Settings,
    period: Period,
    record: &'r StudentRecord,
    skipped: &mut Skipped<'r>,
) -> Option<KpiKey> {
    if settings.is_excluded(&record.program) {
        skipped.excluded_program.insert(&record.student_id);
        return None;
    }
    let Some(degree) = record.degree else {
        skipped.unrecognized_degree.insert(&record.student_id);
        return None;
    };
    Some(KpiKey {
        department: record.department.clone(),
        program: record.program.clone(),
        degree,
        period,
    })
}

/// One aggregate row per (department, program, degree, period) seen in a
/// reported period, either in the primary roster or among the period's
/// graduates. The base period of the sequence is not reported.
pub fn aggregate(
    settings: &Settings,
    registry: &SnapshotRegistry,
    tracker: &CohortTracker<'_>,
) -> Result<AggregationRun> {
    let sequence = tracker.sequence();
    let mut run = AggregationRun::default();

    for period in registry.periods() {
        if !sequence.contains(period) {
            warn!(%period, "snapshot period is not part of the period sequence; skipped");
            run.periods_outside_sequence.push(period);
            continue;
        }
        if sequence.is_base(period) {
            debug!(%period, "base period only feeds cohort denominators");
            continue;
        }

        let mut skipped = Skipped::default();
        let mut groups: BTreeMap<KpiKey, Group<'_>> = BTreeMap::new();

        for record in registry.primary_view(period).values() {
            let Some(key) = classify(settings, period, record, &mut skipped) else {
                continue;
            };
            let group = groups.entry(key).or_default();
            if record.status.is_enrolled() {
                group.enrolled.push(record);
            }
        }

        for record in registry
            .merged_view(period)
            .values()
            .filter(|record| record.status.is_graduated())
        {
            let Some(key) = classify(settings, period, record, &mut skipped) else {
                continue;
            };
            groups.entry(key).or_default().graduates += 1;
        }

        let skipped = skipped.counts();
        if skipped.unrecognized_degree > 0 {
            warn!(
                %period,
                count = skipped.unrecognized_degree,
                "records with an unrecognised degree left out of aggregation"
            );
        }
        if skipped.excluded_program > 0 {
            info!(
                %period,
                count = skipped.excluded_program,
                "records of excluded programs left out of aggregation"
            );
        }
        run.skipped.insert(period, skipped);

        for (key, group) in groups {
            let record = build_record(settings, tracker, key, &group)?;
            run.records.push(record);
        }
    }

    run.records.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(run)
}

fn build_record(
    settings: &Settings,
    tracker: &CohortTracker<'_>,
    key: KpiKey,
    group: &Group<'_>,
) -> Result<AggregateRecord> {
    let scope = key.scope();
    let enrolled = &group.enrolled;

    let students_male = enrolled
        .iter()
        .filter(|s| s.gender == settings.male_label)
        .count();
    let students_female = enrolled
        .iter()
        .filter(|s| s.gender == settings.female_label)
        .count();
    let students_domestic = enrolled
        .iter()
        .filter(|s| s.nationality == settings.domestic_nationality)
        .count();
    let students_international = enrolled
        .iter()
        .filter(|s| !s.nationality.is_empty() && s.nationality != settings.domestic_nationality)
        .count();

    let lookback_periods = settings.lookback(Some(key.degree));
    let students_new = tracker.new_entrants_in(key.period, &scope)?.len();
    let retention = tracker.retained(key.period, &scope)?;
    let ontime = tracker.on_time_graduates(key.period, &scope, lookback_periods)?;

    debug!(
        department = %key.department,
        program = %key.program,
        degree = ?key.degree,
        period = %key.period,
        students_new,
        retained = retention.numerator,
        ontime = ontime.numerator,
        "aggregate row computed"
    );

    Ok(AggregateRecord {
        students_total: enrolled.len(),
        students_male,
        students_female,
        students_domestic,
        students_international,
        students_new,
        retention,
        graduates_total: group.graduates,
        ontime,
        lookback_periods,
        key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Degree, Rate, Status};
    use crate::period::PeriodSequence;
    use crate::snapshot::tests::record;

    fn settings(members: &[u16]) -> Settings {
        Settings {
            sequence: members.iter().copied().map(Period).collect(),
            ..Settings::default()
        }
    }

    fn find<'r>(run: &'r AggregationRun, program: &str, period: u16) -> &'r AggregateRecord {
        run.records
            .iter()
            .find(|r| r.key.program == program && r.key.period == Period(period))
            .unwrap()
    }

    #[test]
    fn end_to_end_retention_over_gapped_sequence() {
        let settings = settings(&[1, 2, 3, 5]);
        let sequence = settings.period_sequence().unwrap();
        let mut registry = SnapshotRegistry::new();
        registry.ingest_primary(Period(1), 1, vec![]).unwrap();
        registry
            .ingest_primary(
                Period(2),
                1,
                (0..10)
                    .map(|i| record(&i.to_string(), "X", Degree::Bachelor, Status::Enrolled))
                    .collect(),
            )
            .unwrap();
        registry
            .ingest_primary(
                Period(3),
                1,
                (0..7)
                    .map(|i| record(&i.to_string(), "X", Degree::Bachelor, Status::Enrolled))
                    .collect(),
            )
            .unwrap();

        let tracker = CohortTracker::new(&sequence, &registry);
        let run = aggregate(&settings, &registry, &tracker).unwrap();

        let second = find(&run, "X", 2);
        assert_eq!(second.students_new, 10);
        assert_eq!(second.students_total, 10);
        assert_eq!(second.retention.ratio(), None);

        let third = find(&run, "X", 3);
        assert_eq!(third.retention, Rate::new(7, 10));
        assert_eq!(third.retention.percent(), Some(70.0));
        assert_eq!(third.students_new, 0);
        assert_eq!(third.ontime, Rate::default());
        assert_eq!(third.lookback_periods, 4);
    }

    #[test]
    fn base_period_and_foreign_periods_are_not_reported() {
        let settings = settings(&[1, 2]);
        let sequence = settings.period_sequence().unwrap();
        let mut registry = SnapshotRegistry::new();
        let roster = vec![record("1", "X", Degree::Bachelor, Status::Enrolled)];
        registry.ingest_primary(Period(1), 1, roster.clone()).unwrap();
        registry.ingest_primary(Period(9), 1, roster).unwrap();

        let tracker = CohortTracker::new(&sequence, &registry);
        let run = aggregate(&settings, &registry, &tracker).unwrap();
        assert!(run.records.is_empty());
        assert_eq!(run.periods_outside_sequence, vec![Period(9)]);
    }

    #[test]
    fn splits_and_graduates_counted_per_key() {
        let settings = settings(&[1, 2]);
        let sequence = settings.period_sequence().unwrap();
        let mut registry = SnapshotRegistry::new();

        let mut female = record("2", "X", Degree::Master, Status::Enrolled);
        female.gender = settings.female_label.clone();
        female.nationality = "مصري".to_string();
        let mut unknown_degree = record("3", "X", Degree::Master, Status::Enrolled);
        unknown_degree.degree = None;
        let mut excluded = record("4", "الشريعة والدراسات الإسلامية", Degree::Master, Status::Enrolled);
        excluded.department = excluded.program.clone();
        let roster = vec![
            record("1", "X", Degree::Master, Status::Enrolled),
            female,
            record("5", "X", Degree::Master, Status::Other("منسحب".into())),
            unknown_degree,
            excluded,
        ];
        registry.ingest_primary(Period(2), 1, roster.clone()).unwrap();
        registry.ingest_merged(Period(2), 1, roster).unwrap();
        registry
            .ingest_merged(
                Period(2),
                2,
                vec![
                    record("6", "X", Degree::Master, Status::Graduated),
                    record("7", "Y", Degree::Doctorate, Status::Graduated),
                ],
            )
            .unwrap();

        let tracker = CohortTracker::new(&sequence, &registry);
        let run = aggregate(&settings, &registry, &tracker).unwrap();
        assert_eq!(run.records.len(), 2);

        let x = find(&run, "X", 2);
        assert_eq!(x.students_total, 2);
        assert_eq!(x.students_male, 1);
        assert_eq!(x.students_female, 1);
        assert_eq!(x.students_domestic, 1);
        assert_eq!(x.students_international, 1);
        assert_eq!(x.graduates_total, 1);
        assert_eq!(x.lookback_periods, 2);

        let y = find(&run, "Y", 2);
        assert_eq!(y.students_total, 0);
        assert_eq!(y.graduates_total, 1);
        assert_eq!(y.key.degree, Degree::Doctorate);

        let skipped = &run.skipped[&Period(2)];
        assert_eq!(skipped.unrecognized_degree, 1);
        assert_eq!(skipped.excluded_program, 1);
    }

    #[test]
    fn skipped_student_in_both_views_counted_once() {
        let settings = settings(&[1, 2]);
        let sequence = settings.period_sequence().unwrap();
        let mut registry = SnapshotRegistry::new();

        let mut unknown = record("1", "X", Degree::Bachelor, Status::Graduated);
        unknown.degree = None;
        let excluded = record("2", "الشريعة والدراسات الإسلامية", Degree::Bachelor, Status::Graduated);
        let roster = vec![unknown, excluded];
        registry.ingest_primary(Period(2), 1, roster.clone()).unwrap();
        registry.ingest_merged(Period(2), 1, roster).unwrap();

        let tracker = CohortTracker::new(&sequence, &registry);
        let run = aggregate(&settings, &registry, &tracker).unwrap();
        assert!(run.records.is_empty());
        assert_eq!(
            run.skipped[&Period(2)],
            SkippedCounts {
                unrecognized_degree: 1,
                excluded_program: 1,
            }
        );
    }

    #[test]
    fn on_time_graduation_uses_degree_lookback() {
        let settings = settings(&[40, 41, 42, 44]);
        let sequence: PeriodSequence = settings.period_sequence().unwrap();
        let mut registry = SnapshotRegistry::new();
        registry.ingest_primary(Period(40), 1, vec![]).unwrap();
        registry
            .ingest_primary(
                Period(41),
                1,
                vec![
                    record("1", "M", Degree::Master, Status::Enrolled),
                    record("2", "M", Degree::Master, Status::Enrolled),
                    record("3", "B", Degree::Bachelor, Status::Enrolled),
                ],
            )
            .unwrap();
        registry
            .ingest_primary(
                Period(44),
                1,
                vec![record("2", "M", Degree::Master, Status::Enrolled)],
            )
            .unwrap();
        registry
            .ingest_merged(
                Period(42),
                2,
                vec![record("1", "M", Degree::Master, Status::Graduated)],
            )
            .unwrap();

        let tracker = CohortTracker::new(&sequence, &registry);
        let run = aggregate(&settings, &registry, &tracker).unwrap();

        // 44 - 2 = 42; that cohort is empty. 42 - 2 = 40 likewise.
        let at_44 = find(&run, "M", 44);
        assert_eq!(at_44.ontime, Rate::new(0, 0));
        let at_42 = find(&run, "M", 42);
        assert_eq!(at_42.ontime, Rate::new(0, 0));
        assert_eq!(at_42.graduates_total, 1);

        let settings = Settings {
            lookback: [(Degree::Master, 1)].into_iter().collect(),
            ..settings
        };
        let run = aggregate(&settings, &registry, &tracker).unwrap();
        let at_42 = find(&run, "M", 42);
        assert_eq!(at_42.ontime, Rate::new(1, 2));
        assert_eq!(at_42.lookback_periods, 1);
    }
}
