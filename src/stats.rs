use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{AssessedStudent, RiskLevel};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl RiskDistribution {
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }

    fn record(&mut self, level: RiskLevel) {
        match level {
            RiskLevel::High => self.high += 1,
            RiskLevel::Medium => self.medium += 1,
            RiskLevel::Low => self.low += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CohortStatistics {
    pub total_count: usize,
    pub distribution: RiskDistribution,
    pub attendance_average: f64,
    pub performance_average: f64,
}

/// Statistics over exactly the students passed in. Callers filter first.
pub fn summarize(students: &[AssessedStudent]) -> CohortStatistics {
    let mut distribution = RiskDistribution::default();
    let mut attendance_total = 0.0;
    let mut score_total = 0.0;

    for student in students {
        distribution.record(student.level());
        attendance_total += student.record.attendance_pct;
        score_total += student.record.score_pct;
    }

    CohortStatistics {
        total_count: students.len(),
        distribution,
        attendance_average: average(attendance_total, students.len()),
        performance_average: average(score_total, students.len()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey {
    Class,
    Department,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub group: String,
    pub statistics: CohortStatistics,
}

pub fn summarize_by(students: &[AssessedStudent], key: GroupKey) -> Vec<GroupSummary> {
    let mut groups: BTreeMap<&str, Vec<AssessedStudent>> = BTreeMap::new();

    for student in students {
        let group = match key {
            GroupKey::Class => student.record.class_name.as_str(),
            GroupKey::Department => student.record.department.as_str(),
        };
        groups.entry(group).or_default().push(student.clone());
    }

    groups
        .into_iter()
        .map(|(group, members)| GroupSummary {
            group: group.to_string(),
            statistics: summarize(&members),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyAverage {
    pub month: String,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskTrendPoint {
    pub month: String,
    pub high: usize,
    pub medium: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trends {
    #[serde(default)]
    pub attendance_trend: Vec<MonthlyAverage>,
    #[serde(default)]
    pub performance_trend: Vec<MonthlyAverage>,
    #[serde(default)]
    pub risk_trend: Vec<RiskTrendPoint>,
}

fn average(total: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        (total / count as f64 * 100.0).round() / 100.0
    }
}
