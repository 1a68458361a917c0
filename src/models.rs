use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(format!("unknown risk level: {other}")),
        }
    }
}

impl<'de> Deserialize<'de> for RiskLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FeeStatus {
    Paid,
    Partial,
    Overdue,
}

impl fmt::Display for FeeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FeeStatus::Paid => "Paid",
            FeeStatus::Partial => "Partial",
            FeeStatus::Overdue => "Overdue",
        };
        f.write_str(label)
    }
}

impl FromStr for FeeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "paid" => Ok(FeeStatus::Paid),
            "partial" | "late" => Ok(FeeStatus::Partial),
            "overdue" => Ok(FeeStatus::Overdue),
            other => Err(format!("unknown fee status: {other}")),
        }
    }
}

impl<'de> Deserialize<'de> for FeeStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    #[serde(deserialize_with = "string_or_integer")]
    pub id: String,
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    #[serde(default)]
    pub department: String,
    #[serde(rename = "attendance")]
    pub attendance_pct: f64,
    #[serde(rename = "score")]
    pub score_pct: f64,
    pub fee_status: FeeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overdue_periods: Option<u32>,
    pub last_updated: NaiveDate,
}

impl StudentRecord {
    /// Trims display strings and fills in the department from the class name
    /// when the source left it blank.
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.class_name = self.class_name.trim().to_string();
        self.department = self.department.trim().to_string();
        if self.department.is_empty() {
            self.department = Department::infer(&self.class_name).to_string();
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Department {
    Science,
    Commerce,
    Arts,
    General,
}

impl Department {
    pub fn infer(class_name: &str) -> Self {
        let lowered = class_name.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|needle| lowered.contains(needle));

        if has(&["sci", "pcm", "pcb"]) {
            Department::Science
        } else if has(&["com", "commerce"]) {
            Department::Commerce
        } else if has(&["arts", "humanities"]) {
            Department::Arts
        } else {
            Department::General
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Department::Science => "Science",
            Department::Commerce => "Commerce",
            Department::Arts => "Arts",
            Department::General => "General",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Attendance,
    Performance,
    Fees,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Metric::Attendance => "attendance",
            Metric::Performance => "performance",
            Metric::Fees => "fees",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskFactor {
    pub metric: Metric,
    pub value: f64,
    pub level: RiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskFactors {
    pub attendance: RiskFactor,
    pub performance: RiskFactor,
    pub fees: RiskFactor,
}

impl RiskFactors {
    pub fn iter(&self) -> impl Iterator<Item = &RiskFactor> {
        [&self.attendance, &self.performance, &self.fees].into_iter()
    }

    /// Factors whose own level is above Low.
    pub fn contributing(&self) -> impl Iterator<Item = &RiskFactor> {
        self.iter().filter(|factor| factor.level > RiskLevel::Low)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub risk_factors: RiskFactors,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssessedStudent {
    #[serde(flatten)]
    pub record: StudentRecord,
    #[serde(flatten)]
    pub assessment: RiskAssessment,
}

impl AssessedStudent {
    pub fn level(&self) -> RiskLevel {
        self.assessment.risk_level
    }

    pub fn score(&self) -> u8 {
        self.assessment.risk_score
    }
}

pub(crate) fn string_or_integer<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Text(value) => Ok(value),
        RawId::Number(value) => Ok(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_status_accepts_late_and_any_case() {
        assert_eq!("late".parse::<FeeStatus>(), Ok(FeeStatus::Partial));
        assert_eq!("OVERDUE".parse::<FeeStatus>(), Ok(FeeStatus::Overdue));
        assert!("Unknown".parse::<FeeStatus>().is_err());
    }

    #[test]
    fn risk_levels_order_by_severity() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
        assert_eq!("High".parse::<RiskLevel>(), Ok(RiskLevel::High));
    }

    #[test]
    fn department_is_inferred_from_class() {
        assert_eq!(Department::infer("12th PCM"), Department::Science);
        assert_eq!(Department::infer("11th Commerce"), Department::Commerce);
        assert_eq!(Department::infer("10th Humanities"), Department::Arts);
        assert_eq!(Department::infer("9th A"), Department::General);
    }

    #[test]
    fn record_accepts_integer_ids_and_fills_department() {
        let json = r#"{
            "id": 4821,
            "name": " Meera Nair ",
            "class": "12th Science",
            "attendance": 81.5,
            "score": 64.0,
            "feeStatus": "paid",
            "lastUpdated": "2024-11-15"
        }"#;

        let record: StudentRecord = serde_json::from_str(json).expect("record parses");
        let record = record.normalized();
        assert_eq!(record.id, "4821");
        assert_eq!(record.name, "Meera Nair");
        assert_eq!(record.department, "Science");
        assert_eq!(record.overdue_periods, None);
    }
}
