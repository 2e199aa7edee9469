use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::models::{Period, StudentId, StudentRecord};

/// Student id to record, at most one record per student.
pub type Snapshot = BTreeMap<StudentId, StudentRecord>;

static EMPTY: Snapshot = BTreeMap::new();

/// Folds one observation into a merged snapshot: the first record seen for
/// a student is kept unless a later one is Graduated, which replaces it.
/// A Graduated record is never replaced by a non-graduated one.
pub fn fold_record(snapshot: &mut Snapshot, record: StudentRecord) {
    match snapshot.get_mut(&record.student_id) {
        Some(existing) => {
            if record.status.is_graduated() {
                *existing = record;
            }
        }
        None => {
            snapshot.insert(record.student_id.clone(), record);
        }
    }
}

/// Folds sub-periods of one period into `snapshot`. Input order does not
/// matter; sub-periods are folded in ascending index order and records
/// within a sub-period in the order given.
pub fn fold_sub_periods(
    mut snapshot: Snapshot,
    mut sub_periods: Vec<(u8, Vec<StudentRecord>)>,
) -> Snapshot {
    sub_periods.sort_by_key(|(index, _)| *index);
    for (_, records) in sub_periods {
        for record in records {
            fold_record(&mut snapshot, record);
        }
    }
    snapshot
}

#[derive(Debug)]
struct MergedEntry {
    last_sub_period: u8,
    records: Snapshot,
}

/// Per-period student snapshots, built once and then read by the cohort
/// and aggregation stages.
#[derive(Debug, Default)]
pub struct SnapshotRegistry {
    primary: BTreeMap<Period, Snapshot>,
    merged: BTreeMap<Period, MergedEntry>,
}

impl SnapshotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the designated primary sub-period of `period`. A student
    /// id repeated inside the batch keeps its last record.
    pub fn ingest_primary(
        &mut self,
        period: Period,
        sub_period: u8,
        records: Vec<StudentRecord>,
    ) -> Result<()> {
        if self.primary.contains_key(&period) {
            return Err(EngineError::PrimaryAlreadyIngested { period });
        }
        let snapshot: Snapshot = records
            .into_iter()
            .map(|record| (record.student_id.clone(), record))
            .collect();
        debug!(%period, sub_period, students = snapshot.len(), "primary snapshot registered");
        self.primary.insert(period, snapshot);
        Ok(())
    }

    /// Folds one sub-period into the merged view of `period`. Sub-periods of
    /// a period must arrive in ascending order.
    pub fn ingest_merged(
        &mut self,
        period: Period,
        sub_period: u8,
        records: Vec<StudentRecord>,
    ) -> Result<()> {
        self.ingest_merged_batches(period, vec![(sub_period, records)])
    }

    /// Folds any number of sub-periods of `period` into its merged view, in
    /// ascending index order regardless of the order given. None of them may
    /// precede a sub-period already folded for the period.
    pub fn ingest_merged_batches(
        &mut self,
        period: Period,
        sub_periods: Vec<(u8, Vec<StudentRecord>)>,
    ) -> Result<()> {
        let (Some(lowest), Some(highest)) = (
            sub_periods.iter().map(|(index, _)| *index).min(),
            sub_periods.iter().map(|(index, _)| *index).max(),
        ) else {
            return Ok(());
        };
        let entry = self.merged.entry(period).or_insert_with(|| MergedEntry {
            last_sub_period: lowest,
            records: Snapshot::new(),
        });
        if lowest < entry.last_sub_period {
            return Err(EngineError::SubPeriodOutOfOrder {
                period,
                last: entry.last_sub_period,
                got: lowest,
            });
        }
        entry.records = fold_sub_periods(std::mem::take(&mut entry.records), sub_periods);
        entry.last_sub_period = highest;
        debug!(
            %period,
            sub_period = highest,
            students = entry.records.len(),
            "merged snapshot folded"
        );
        Ok(())
    }

    pub fn primary_view(&self, period: Period) -> &Snapshot {
        self.primary.get(&period).unwrap_or(&EMPTY)
    }

    pub fn merged_view(&self, period: Period) -> &Snapshot {
        self.merged
            .get(&period)
            .map(|entry| &entry.records)
            .unwrap_or(&EMPTY)
    }

    pub fn has_primary(&self, period: Period) -> bool {
        self.primary.contains_key(&period)
    }

    /// Every period with data in either view.
    pub fn periods(&self) -> BTreeSet<Period> {
        self.primary
            .keys()
            .chain(self.merged.keys())
            .copied()
            .collect()
    }

    pub fn enrolled_ids(&self, period: Period) -> BTreeSet<&StudentId> {
        self.primary_view(period)
            .values()
            .filter(|record| record.status.is_enrolled())
            .map(|record| &record.student_id)
            .collect()
    }

    pub fn graduated_in(&self, period: Period, student_id: &StudentId) -> bool {
        self.merged_view(period)
            .get(student_id)
            .is_some_and(|record| record.status.is_graduated())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Degree, Status};
    use proptest::prelude::*;

    pub(crate) fn record(id: &str, program: &str, degree: Degree, status: Status) -> StudentRecord {
        StudentRecord {
            student_id: StudentId::from(id),
            name: format!("Student {id}"),
            program: program.to_string(),
            department: program.to_string(),
            degree_label: format!("{degree:?}"),
            degree: Some(degree),
            status,
            gender: "ذكر".to_string(),
            nationality: "سعودي".to_string(),
            admission_date: "1440-01-01".to_string(),
            expected_grad_date: None,
            grad_date: None,
            gpa: Some(4.1),
            study_type: Some("انتظام".to_string()),
        }
    }

    #[test]
    fn graduated_replaces_earlier_observation() {
        let merged = fold_sub_periods(Snapshot::new(), vec![
            (1, vec![record("1", "Law", Degree::Bachelor, Status::Enrolled)]),
            (2, vec![record("1", "Law", Degree::Bachelor, Status::Graduated)]),
        ]);
        assert_eq!(merged[&StudentId::from("1")].status, Status::Graduated);
    }

    #[test]
    fn graduated_never_regresses() {
        let merged = fold_sub_periods(Snapshot::new(), vec![
            (1, vec![record("1", "Law", Degree::Bachelor, Status::Graduated)]),
            (2, vec![record("1", "Law", Degree::Bachelor, Status::Enrolled)]),
        ]);
        assert_eq!(merged[&StudentId::from("1")].status, Status::Graduated);
    }

    #[test]
    fn first_seen_kept_for_non_graduated_statuses() {
        let merged = fold_sub_periods(Snapshot::new(), vec![
            (2, vec![record("1", "Law", Degree::Bachelor, Status::Other("منسحب".into()))]),
            (1, vec![record("1", "Law", Degree::Bachelor, Status::Enrolled)]),
        ]);
        assert_eq!(merged[&StudentId::from("1")].status, Status::Enrolled);
    }

    #[test]
    fn primary_last_write_wins_within_batch() {
        let mut registry = SnapshotRegistry::new();
        let mut second = record("1", "Law", Degree::Bachelor, Status::Other("مؤجل".into()));
        second.name = "later".to_string();
        registry
            .ingest_primary(
                Period(40),
                1,
                vec![record("1", "Law", Degree::Bachelor, Status::Enrolled), second],
            )
            .unwrap();
        let view = registry.primary_view(Period(40));
        assert_eq!(view.len(), 1);
        assert_eq!(view[&StudentId::from("1")].name, "later");
    }

    #[test]
    fn primary_ingested_once_per_period() {
        let mut registry = SnapshotRegistry::new();
        registry.ingest_primary(Period(40), 1, vec![]).unwrap();
        assert!(matches!(
            registry.ingest_primary(Period(40), 1, vec![]),
            Err(EngineError::PrimaryAlreadyIngested { .. })
        ));
    }

    #[test]
    fn merged_rejects_descending_sub_periods() {
        let mut registry = SnapshotRegistry::new();
        registry.ingest_merged(Period(40), 2, vec![]).unwrap();
        assert!(matches!(
            registry.ingest_merged(Period(40), 1, vec![]),
            Err(EngineError::SubPeriodOutOfOrder { last: 2, got: 1, .. })
        ));
        registry.ingest_merged(Period(41), 1, vec![]).unwrap();
    }

    #[test]
    fn merged_batches_fold_in_ascending_order() {
        let mut registry = SnapshotRegistry::new();
        registry
            .ingest_merged_batches(
                Period(40),
                vec![
                    (3, vec![record("1", "Law", Degree::Bachelor, Status::Other("منسحب".into()))]),
                    (1, vec![record("1", "Law", Degree::Bachelor, Status::Enrolled)]),
                    (2, vec![record("2", "Law", Degree::Bachelor, Status::Graduated)]),
                ],
            )
            .unwrap();
        let view = registry.merged_view(Period(40));
        assert_eq!(view[&StudentId::from("1")].status, Status::Enrolled);
        assert_eq!(view[&StudentId::from("2")].status, Status::Graduated);

        assert!(matches!(
            registry.ingest_merged(Period(40), 2, vec![]),
            Err(EngineError::SubPeriodOutOfOrder { last: 3, got: 2, .. })
        ));
        let graduated = record("1", "Law", Degree::Bachelor, Status::Graduated);
        registry.ingest_merged(Period(40), 4, vec![graduated]).unwrap();
        assert_eq!(
            registry.merged_view(Period(40))[&StudentId::from("1")].status,
            Status::Graduated
        );
    }

    #[test]
    fn unknown_periods_read_as_empty() {
        let registry = SnapshotRegistry::new();
        assert!(registry.primary_view(Period(12)).is_empty());
        assert!(registry.merged_view(Period(12)).is_empty());
        assert!(!registry.has_primary(Period(12)));
    }

    fn status_strategy() -> impl Strategy<Value = Status> {
        prop_oneof![
            Just(Status::Enrolled),
            Just(Status::Graduated),
            Just(Status::Other("منسحب".to_string())),
        ]
    }

    proptest! {
        #[test]
        fn merged_status_graduated_iff_any_observation_graduated(
            statuses in proptest::collection::vec(status_strategy(), 1..6)
        ) {
            let sub_periods: Vec<(u8, Vec<StudentRecord>)> = statuses
                .iter()
                .enumerate()
                .map(|(i, status)| {
                    (i as u8 + 1, vec![record("7", "Law", Degree::Master, status.clone())])
                })
                .collect();
            let mut shuffled = sub_periods.clone();
            shuffled.reverse();

            let merged = fold_sub_periods(Snapshot::new(), shuffled.clone());
            let folded = &merged[&StudentId::from("7")].status;
            let any_graduated = statuses.iter().any(Status::is_graduated);
            prop_assert_eq!(folded.is_graduated(), any_graduated);
            if !any_graduated {
                prop_assert_eq!(folded, &statuses[0]);
            }
            prop_assert_eq!(&fold_sub_periods(Snapshot::new(), sub_periods), &merged);

            let mut registry = SnapshotRegistry::new();
            registry.ingest_merged_batches(Period(40), shuffled).unwrap();
            prop_assert_eq!(registry.merged_view(Period(40)), &merged);
        }
    }
}
