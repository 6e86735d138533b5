use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentStatus {
    Active,
    Promoted,
    Repeating,
    Transferred,
    Withdrawn,
}

impl StudentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudentStatus::Active => "active",
            StudentStatus::Promoted => "promoted",
            StudentStatus::Repeating => "repeating",
            StudentStatus::Transferred => "transferred",
            StudentStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(StudentStatus::Active),
            "promoted" => Some(StudentStatus::Promoted),
            "repeating" => Some(StudentStatus::Repeating),
            "transferred" => Some(StudentStatus::Transferred),
            "withdrawn" => Some(StudentStatus::Withdrawn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub matricule: String,
    pub first_name: String,
    pub last_name: String,
    pub class_id: Uuid,
    pub status: StudentStatus,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolClass {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: Uuid,
    pub name: String,
    pub coefficient: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationKind {
    pub id: Uuid,
    pub name: String,
    pub coefficient: Decimal,
}

/// A grading window. Once `closed` is set it stays set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub closed: bool,
}

impl Period {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }
}

/// Identity of one cached subject average and of the entry set behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AverageKey {
    pub student_id: Uuid,
    pub subject_id: Uuid,
    pub period_id: Uuid,
}

impl AverageKey {
    pub fn new(student_id: Uuid, subject_id: Uuid, period_id: Uuid) -> Self {
        Self {
            student_id,
            subject_id,
            period_id,
        }
    }
}

impl fmt::Display for AverageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.student_id, self.subject_id, self.period_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradedEntry {
    pub student_id: Uuid,
    pub subject_id: Uuid,
    pub period_id: Uuid,
    pub evaluation_kind_id: Uuid,
    pub value: Decimal,
    pub evaluated_on: NaiveDate,
    pub comment: Option<String>,
}

impl GradedEntry {
    pub fn key(&self) -> AverageKey {
        AverageKey::new(self.student_id, self.subject_id, self.period_id)
    }
}

/// An entry value paired with the coefficient of its evaluation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedValue {
    pub value: Decimal,
    pub coefficient: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAverage {
    pub key: AverageKey,
    pub average: Decimal,
    pub entry_count: i32,
    pub weighted_points: Decimal,
    pub computed_at: DateTime<Utc>,
}

/// A cached subject average joined with its subject, as consumed by the
/// general average and by bulletins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAverageLine {
    pub subject_id: Uuid,
    pub subject_name: String,
    pub coefficient: Decimal,
    pub average: Decimal,
    pub entry_count: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedResult {
    pub student_id: Uuid,
    pub student_name: String,
    pub matricule: String,
    pub general_average: Decimal,
    pub rank: usize,
    pub tie_count: usize,
    pub is_tied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRanking {
    pub class_id: Uuid,
    pub class_name: String,
    pub period_id: Uuid,
    pub period_name: String,
    pub cohort_size: usize,
    pub class_average: Option<Decimal>,
    pub results: Vec<RankedResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bulletin {
    pub student: Student,
    pub class_name: String,
    pub period: Period,
    pub subjects: Vec<SubjectAverageLine>,
    pub general_average: Option<Decimal>,
    pub rank: Option<usize>,
    pub is_tied: bool,
    pub cohort_size: usize,
    pub class_average: Option<Decimal>,
    pub mention: Option<String>,
}

/// One line of a quick bulk entry: everything but the student, value and
/// comment is shared across the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLine {
    pub student_id: Uuid,
    pub value: Decimal,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryBatch {
    pub subject_id: Uuid,
    pub period_id: Uuid,
    pub evaluation_kind_id: Uuid,
    pub evaluated_on: NaiveDate,
    pub lines: Vec<BatchLine>,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub recorded: Vec<GradedEntry>,
    pub errors: Vec<(Uuid, crate::error::GradeError)>,
}
