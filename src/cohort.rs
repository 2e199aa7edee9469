use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EngineError, Result};
use crate::models::{Period, ProgramDegree, Rate, StudentId};
use crate::period::PeriodSequence;
use crate::snapshot::SnapshotRegistry;

/// New-entrant cohorts per sequence period, and the retention and on-time
/// graduation counts derived from them.
///
/// Built over a fully populated registry: on-time graduation reads periods
/// after the cohort's base, so nothing here works on a partial registry.
pub struct CohortTracker<'a> {
    sequence: &'a PeriodSequence,
    registry: &'a SnapshotRegistry,
    new_entrants: BTreeMap<Period, BTreeSet<StudentId>>,
}

impl<'a> CohortTracker<'a> {
    pub fn new(sequence: &'a PeriodSequence, registry: &'a SnapshotRegistry) -> Self {
        let mut new_entrants = BTreeMap::new();

        for window in sequence.members().windows(2) {
            let (previous, period) = (window[0], window[1]);
            // Without the prior roster there is no way to tell a newcomer from
            // a continuing student.
            let entrants: BTreeSet<StudentId> = if registry.has_primary(previous) {
                let prior = registry.primary_view(previous);
                registry
                    .enrolled_ids(period)
                    .into_iter()
                    .filter(|id| !prior.contains_key(*id))
                    .cloned()
                    .collect()
            } else {
                BTreeSet::new()
            };
            new_entrants.insert(period, entrants);
        }
        new_entrants.insert(sequence.base(), BTreeSet::new());

        Self {
            sequence,
            registry,
            new_entrants,
        }
    }

    pub fn sequence(&self) -> &PeriodSequence {
        self.sequence
    }

    /// Students enrolled in the primary view of `period` who were absent
    /// from the previous period's primary view under any status.
    pub fn new_entrants(&self, period: Period) -> Result<&BTreeSet<StudentId>> {
        self.new_entrants
            .get(&period)
            .ok_or(EngineError::InvalidPeriod(period))
    }

    /// New entrants of `period` whose primary record there is in `scope`.
    pub fn new_entrants_in(
        &self,
        period: Period,
        scope: &ProgramDegree,
    ) -> Result<BTreeSet<&StudentId>> {
        let view = self.registry.primary_view(period);
        Ok(self
            .new_entrants(period)?
            .iter()
            .filter(|id| view.get(*id).is_some_and(|record| record.belongs_to(scope)))
            .collect())
    }

    /// Previous period's new entrants in `scope` that are enrolled in the
    /// same scope in `period`, over the size of that cohort.
    pub fn retained(&self, period: Period, scope: &ProgramDegree) -> Result<Rate> {
        let Some(previous) = self.sequence.previous(period)? else {
            return Ok(Rate::default());
        };
        let cohort = self.new_entrants_in(previous, scope)?;
        let view = self.registry.primary_view(period);
        let still_enrolled = cohort
            .iter()
            .filter(|id| {
                view.get(**id).is_some_and(|record| {
                    record.status.is_enrolled() && record.belongs_to(scope)
                })
            })
            .count();
        Ok(Rate::new(still_enrolled, cohort.len()))
    }

    /// Members of the cohort that entered `lookback` real periods before
    /// `period` and graduated in any period after their entry up to and
    /// including `period`.
    pub fn on_time_graduates(
        &self,
        period: Period,
        scope: &ProgramDegree,
        lookback: u16,
    ) -> Result<Rate> {
        let Some(base) = self.sequence.n_before(period, lookback)? else {
            return Ok(Rate::default());
        };
        let cohort = self.new_entrants_in(base, scope)?;
        let window = self.sequence.between(base, period)?;
        let graduated = cohort
            .iter()
            .filter(|id| {
                window
                    .iter()
                    .any(|checked| self.registry.graduated_in(*checked, id))
            })
            .count();
        Ok(Rate::new(graduated, cohort.len()))
    }
}
