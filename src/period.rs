use crate::error::{EngineError, Result};
use crate::models::Period;

/// The institution's ordered timeline. Some calendar ordinals are missing
/// because they were merged into the preceding period; sequence order, not
/// numeric distance, decides what "previous" means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodSequence {
    members: Vec<Period>,
}

impl PeriodSequence {
    pub fn new(members: Vec<Period>) -> Result<Self> {
        if members.is_empty() {
            return Err(EngineError::EmptySequence);
        }
        for pair in members.windows(2) {
            if pair[0] >= pair[1] {
                return Err(EngineError::UnsortedSequence {
                    prev: pair[0],
                    next: pair[1],
                });
            }
        }
        Ok(Self { members })
    }

    pub fn members(&self) -> &[Period] {
        &self.members
    }

    pub fn contains(&self, period: Period) -> bool {
        self.members.binary_search(&period).is_ok()
    }

    /// First member. It only feeds denominators and is never reported.
    pub fn base(&self) -> Period {
        self.members[0]
    }

    pub fn is_base(&self, period: Period) -> bool {
        self.base() == period
    }

    fn index_of(&self, period: Period) -> Result<usize> {
        self.members
            .binary_search(&period)
            .map_err(|_| EngineError::InvalidPeriod(period))
    }

    pub fn previous(&self, period: Period) -> Result<Option<Period>> {
        let idx = self.index_of(period)?;
        Ok(idx.checked_sub(1).map(|i| self.members[i]))
    }

    /// The member `n` real periods before `period`, counting merged periods
    /// as elapsed time. A target that is not a member resolves to the
    /// greatest member at or below it.
    pub fn n_before(&self, period: Period, n: u16) -> Result<Option<Period>> {
        self.index_of(period)?;
        let Some(target) = period.0.checked_sub(n) else {
            return Ok(None);
        };
        Ok(self.nearest_at_or_before(Period(target)))
    }

    pub fn nearest_at_or_before(&self, target: Period) -> Option<Period> {
        let end = self.members.partition_point(|p| *p <= target);
        end.checked_sub(1).map(|i| self.members[i])
    }

    /// Members strictly after `from` up to and including `to`, in order.
    pub fn between(&self, from: Period, to: Period) -> Result<&[Period]> {
        let start = self.index_of(from)?;
        let end = self.index_of(to)?;
        if end <= start {
            return Ok(&[]);
        }
        Ok(&self.members[start + 1..=end])
    }
}
