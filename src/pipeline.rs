use tracing::info;
use uuid::Uuid;

use crate::aggregate;
use crate::cohort::CohortTracker;
use crate::config::Settings;
use crate::error::Result;
use crate::ledger;
use crate::models::{AggregateRecord, Diagnostics, GraduateDetail, LoadStats, NonCompleterDetail};
use crate::snapshot::SnapshotRegistry;

/// Everything one aggregation pass produces.
#[derive(Debug)]
pub struct KpiRun {
    pub run_id: Uuid,
    pub aggregates: Vec<AggregateRecord>,
    pub graduates: Vec<GraduateDetail>,
    pub non_completers: Vec<NonCompleterDetail>,
    pub diagnostics: Diagnostics,
}

/// Runs cohort tracking, aggregation and the detail ledgers over a fully
/// built registry.
pub fn run(settings: &Settings, registry: &SnapshotRegistry, load: LoadStats) -> Result<KpiRun> {
    let run_id = Uuid::new_v4();
    let sequence = settings.period_sequence()?;
    let tracker = CohortTracker::new(&sequence, registry);

    let aggregation = aggregate::aggregate(settings, registry, &tracker)?;
    let graduates = ledger::graduates(settings, &sequence, registry);
    let non_completers = ledger::non_completers(settings, &sequence, registry);

    info!(
        %run_id,
        aggregates = aggregation.records.len(),
        graduates = graduates.len(),
        non_completers = non_completers.len(),
        "aggregation finished"
    );

    Ok(KpiRun {
        run_id,
        aggregates: aggregation.records,
        graduates,
        non_completers,
        diagnostics: Diagnostics {
            load,
            skipped: aggregation.skipped,
            periods_outside_sequence: aggregation.periods_outside_sequence,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Degree, Period, Status};
    use crate::snapshot::tests::record;

    #[test]
    fn graduate_ledger_matches_aggregate_counts() {
        let settings = Settings::default();
        let mut registry = SnapshotRegistry::new();
        for period in [45, 46] {
            let roster = vec![
                record("1", "الفقه", Degree::Bachelor, Status::Enrolled),
                record("2", "الفقه", Degree::Bachelor, Status::Enrolled),
                record("3", "القانون", Degree::Master, Status::Enrolled),
            ];
            registry.ingest_primary(Period(period), 1, roster.clone()).unwrap();
            registry.ingest_merged(Period(period), 1, roster).unwrap();
        }
        registry
            .ingest_merged(
                Period(46),
                2,
                vec![
                    record("2", "الفقه", Degree::Bachelor, Status::Graduated),
                    record("3", "القانون", Degree::Master, Status::Graduated),
                ],
            )
            .unwrap();

        let run = run(&settings, &registry, LoadStats::default()).unwrap();
        let aggregate_graduates: usize = run.aggregates.iter().map(|r| r.graduates_total).sum();
        assert_eq!(aggregate_graduates, run.graduates.len());
        assert_eq!(run.graduates.len(), 2);
        assert!(run.non_completers.is_empty());
        assert_eq!(run.diagnostics.skipped.len(), 2);
    }
}
