use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordinal of an academic period in the institution's own numbering
/// (`46` is the year labelled `1446`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Period(pub u16);

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StudentId(pub String);

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StudentId {
    fn from(value: &str) -> Self {
        StudentId(value.to_string())
    }
}

/// Registry status. Anything that is neither enrolled nor graduated keeps
/// its native label as the reason (withdrawn, deferred, dismissed, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Enrolled,
    Graduated,
    Other(String),
}

impl Status {
    pub fn is_enrolled(&self) -> bool {
        matches!(self, Status::Enrolled)
    }

    pub fn is_graduated(&self) -> bool {
        matches!(self, Status::Graduated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Degree {
    Bachelor,
    Master,
    Doctorate,
}

impl Degree {
    pub const ALL: [Degree; 3] = [Degree::Bachelor, Degree::Master, Degree::Doctorate];
}

/// One observation of a student within one sub-period, already normalised.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    pub student_id: StudentId,
    pub name: String,
    pub program: String,
    pub department: String,
    pub degree_label: String,
    pub degree: Option<Degree>,
    pub status: Status,
    pub gender: String,
    pub nationality: String,
    pub admission_date: String,
    pub expected_grad_date: Option<String>,
    pub grad_date: Option<String>,
    pub gpa: Option<f64>,
    pub study_type: Option<String>,
}

impl StudentRecord {
    pub fn belongs_to(&self, scope: &ProgramDegree) -> bool {
        self.degree == Some(scope.degree) && self.program == scope.program
    }
}

/// Cohort scope used by retention and on-time graduation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramDegree {
    pub program: String,
    pub degree: Degree,
}

/// Grouping key of one aggregate row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KpiKey {
    pub department: String,
    pub program: String,
    pub degree: Degree,
    pub period: Period,
}

impl KpiKey {
    pub fn scope(&self) -> ProgramDegree {
        ProgramDegree {
            program: self.program.clone(),
            degree: self.degree,
        }
    }
}

/// A count over a denominator. A zero denominator leaves the rate undefined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rate {
    pub numerator: usize,
    pub denominator: usize,
}

impl Rate {
    pub fn new(numerator: usize, denominator: usize) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub fn ratio(&self) -> Option<f64> {
        if self.denominator == 0 {
            None
        } else {
            Some(self.numerator as f64 / self.denominator as f64)
        }
    }

    /// Percentage rounded to one decimal place.
    pub fn percent(&self) -> Option<f64> {
        self.ratio().map(|r| (r * 1000.0).round() / 10.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRecord {
    pub key: KpiKey,
    pub students_total: usize,
    pub students_male: usize,
    pub students_female: usize,
    pub students_domestic: usize,
    pub students_international: usize,
    pub students_new: usize,
    pub retention: Rate,
    pub graduates_total: usize,
    pub ontime: Rate,
    pub lookback_periods: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraduateDetail {
    pub period: Period,
    pub student_id: StudentId,
    pub name: String,
    pub program: String,
    pub degree: String,
    pub department: String,
    pub gender: String,
    pub nationality: String,
    pub admission_date: String,
    pub grad_date: Option<String>,
    pub expected_grad_date: Option<String>,
    pub gpa: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NonCompleterDetail {
    pub period: Period,
    pub student_id: StudentId,
    pub name: String,
    pub program: String,
    pub degree: String,
    pub department: String,
    pub status: String,
    pub gender: String,
    pub nationality: String,
    pub admission_date: String,
    pub gpa: Option<f64>,
    pub study_type: Option<String>,
}

/// Institution-wide totals of one reported period.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodSummary {
    pub period: Period,
    pub students_total: usize,
    pub students_new: usize,
    pub graduates_total: usize,
    pub retention: Rate,
    pub ontime: Rate,
}

/// Counts of records kept out of aggregation, per period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkippedCounts {
    pub unrecognized_degree: usize,
    pub excluded_program: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub files: usize,
    pub rows: usize,
    pub unrecognized_degree_rows: usize,
    pub unrecognized_degree_labels: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub load: LoadStats,
    pub skipped: BTreeMap<Period, SkippedCounts>,
    pub periods_outside_sequence: Vec<Period>,
}
