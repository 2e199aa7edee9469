use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::models::{Degree, Period, Status};
use crate::period::PeriodSequence;

const DEFAULT_LOOKBACK: u16 = 4;

/// Institution-specific labels and lookup tables.
///
/// Every field has a default matching the college the tool was built for,
/// so a config file only needs to list what differs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sequence: Vec<Period>,
    pub period_label_prefix: String,
    pub primary_sub_period: u8,
    pub delimiter: char,
    pub enrolled_status: String,
    pub graduated_status: String,
    pub degree_synonyms: BTreeMap<String, Degree>,
    pub degree_labels: BTreeMap<Degree, String>,
    pub lookback: BTreeMap<Degree, u16>,
    pub departments: BTreeMap<String, String>,
    pub excluded_programs: BTreeSet<String>,
    pub male_label: String,
    pub female_label: String,
    pub domestic_nationality: String,
}

impl Default for Settings {
    fn default() -> Self {
        let sequence = [38, 39, 40, 41, 42, 44, 45, 46, 47]
            .into_iter()
            .map(Period)
            .collect();

        let degree_synonyms = [
            ("البكالوريوس", Degree::Bachelor),
            ("بكالوريوس", Degree::Bachelor),
            ("بكالوريوس انتساب", Degree::Bachelor),
            ("الماجستير", Degree::Master),
            ("ماجستير", Degree::Master),
            ("الدكتوراه", Degree::Doctorate),
            ("دكتوراه", Degree::Doctorate),
        ]
        .into_iter()
        .map(|(label, degree)| (label.to_string(), degree))
        .collect();

        let degree_labels = [
            (Degree::Bachelor, "بكالوريوس"),
            (Degree::Master, "الماجستير"),
            (Degree::Doctorate, "دكتوراه"),
        ]
        .into_iter()
        .map(|(degree, label)| (degree, label.to_string()))
        .collect();

        let lookback = [
            (Degree::Bachelor, 4),
            (Degree::Master, 2),
            (Degree::Doctorate, 3),
        ]
        .into_iter()
        .collect();

        let departments = [
            ("الأنظمة", "الأنظمة"),
            ("القانون", "الأنظمة"),
            ("الشريعة", "الشريعة"),
            ("الفقه", "الشريعة"),
            ("أصول الفقه", "الشريعة"),
            ("العقيدة", "الشريعة"),
            ("الدراسات الإسلامية", "الدراسات الإسلامية"),
            ("الثقافة الإسلامية", "الدراسات الإسلامية"),
            ("القراءات", "القراءات"),
            ("القرآن وعلومه", "القراءات"),
            ("الدراسات القرآنية", "القراءات"),
            ("الدراسات القرآنية المعاصرة", "القراءات"),
        ]
        .into_iter()
        .map(|(program, dept)| (program.to_string(), dept.to_string()))
        .collect();

        let excluded_programs = ["الشريعة والدراسات الاسلامية", "الشريعة والدراسات الإسلامية"]
            .into_iter()
            .map(str::to_string)
            .collect();

        Self {
            sequence,
            period_label_prefix: "14".to_string(),
            primary_sub_period: 1,
            delimiter: ';',
            enrolled_status: "منتظم".to_string(),
            graduated_status: "متخرج".to_string(),
            degree_synonyms,
            degree_labels,
            lookback,
            departments,
            excluded_programs,
            male_label: "ذكر".to_string(),
            female_label: "أنثى".to_string(),
            domestic_nationality: "سعودي".to_string(),
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file, or returns the defaults when no path
    /// is given. The sequence is validated before returning.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                serde_json::from_str::<Settings>(&raw)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => Settings::default(),
        };

        if !settings.delimiter.is_ascii() {
            anyhow::bail!("delimiter must be a single ASCII character");
        }
        settings.period_sequence()?;
        Ok(settings)
    }

    pub fn period_sequence(&self) -> crate::error::Result<PeriodSequence> {
        PeriodSequence::new(self.sequence.clone())
    }

    pub fn delimiter_byte(&self) -> u8 {
        // Checked ASCII in `load`; anything else falls back to the default.
        u8::try_from(self.delimiter).unwrap_or(b';')
    }

    /// Two-digit ordinals carry the institution prefix; wider ones are
    /// already full labels.
    pub fn period_label(&self, period: Period) -> String {
        if period.0 < 100 {
            format!("{}{:02}", self.period_label_prefix, period.0)
        } else {
            period.0.to_string()
        }
    }

    pub fn normalize_degree(&self, label: &str) -> Option<Degree> {
        self.degree_synonyms.get(label.trim()).copied()
    }

    /// Native label for a degree. Unrecognised degrees keep their raw label.
    pub fn degree_label(&self, degree: Option<Degree>, raw: &str) -> String {
        degree
            .and_then(|d| self.degree_labels.get(&d))
            .cloned()
            .unwrap_or_else(|| raw.to_string())
    }

    pub fn department_for(&self, program: &str) -> String {
        self.departments
            .get(program)
            .cloned()
            .unwrap_or_else(|| program.to_string())
    }

    pub fn status_from(&self, label: &str) -> Status {
        let label = label.trim();
        if label == self.enrolled_status {
            Status::Enrolled
        } else if label == self.graduated_status {
            Status::Graduated
        } else {
            Status::Other(label.to_string())
        }
    }

    pub fn is_excluded(&self, program: &str) -> bool {
        self.excluded_programs.contains(program)
    }

    /// Number of real periods a cohort is given to graduate.
    pub fn lookback(&self, degree: Option<Degree>) -> u16 {
        degree
            .and_then(|d| self.lookback.get(&d))
            .copied()
            .unwrap_or(DEFAULT_LOOKBACK)
    }
}
