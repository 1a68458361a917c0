use std::str::FromStr;

use crate::models::{AssessedStudent, RiskLevel};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClassFilter {
    #[default]
    All,
    Matching(String),
}

impl ClassFilter {
    fn matches(&self, class_name: &str) -> bool {
        match self {
            ClassFilter::All => true,
            ClassFilter::Matching(wanted) => class_name
                .to_lowercase()
                .contains(&wanted.to_lowercase()),
        }
    }

    pub fn as_param(&self) -> Option<&str> {
        match self {
            ClassFilter::All => None,
            ClassFilter::Matching(wanted) => Some(wanted),
        }
    }
}

impl FromStr for ClassFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            Ok(ClassFilter::All)
        } else {
            Ok(ClassFilter::Matching(trimmed.to_string()))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RiskFilter {
    #[default]
    All,
    Level(RiskLevel),
}

impl RiskFilter {
    fn matches(&self, level: RiskLevel) -> bool {
        match self {
            RiskFilter::All => true,
            RiskFilter::Level(wanted) => *wanted == level,
        }
    }

    pub fn as_level(&self) -> Option<RiskLevel> {
        match self {
            RiskFilter::All => None,
            RiskFilter::Level(level) => Some(*level),
        }
    }
}

impl FromStr for RiskFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            Ok(RiskFilter::All)
        } else {
            trimmed.parse().map(RiskFilter::Level)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentQuery {
    pub search: String,
    pub class_filter: ClassFilter,
    pub risk_filter: RiskFilter,
    pub limit: Option<usize>,
}

impl StudentQuery {
    fn matches_search(&self, student: &AssessedStudent) -> bool {
        let needle = self.search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        student.record.name.to_lowercase().contains(&needle)
            || student.record.class_name.to_lowercase().contains(&needle)
    }

    fn matches(&self, student: &AssessedStudent) -> bool {
        self.matches_search(student)
            && self.class_filter.matches(&student.record.class_name)
            && self.risk_filter.matches(student.level())
    }
}

/// Visible students for a query, highest risk score first. Equal scores keep
/// their input order.
pub fn apply(students: &[AssessedStudent], query: &StudentQuery) -> Vec<AssessedStudent> {
    let mut visible: Vec<AssessedStudent> = students
        .iter()
        .filter(|student| query.matches(student))
        .cloned()
        .collect();

    // `sort_by` is stable.
    visible.sort_by(|a, b| b.score().cmp(&a.score()));

    if let Some(limit) = query.limit {
        visible.truncate(limit);
    }

    visible
}
