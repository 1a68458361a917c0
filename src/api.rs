//! Typed request and response payloads for the dashboard backend.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::models::{string_or_integer, FeeStatus, RiskAssessment, StudentRecord};
use crate::risk::{self, RiskAlert};
use crate::rules::RuleTable;
use crate::stats::{RiskDistribution, Trends};

/// Query for the dashboard endpoint. The backend ranks and filters by its
/// own risk levels, so there is deliberately no risk filter here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardFilters {
    pub class_filter: Option<String>,
    pub limit: Option<usize>,
}

impl DashboardFilters {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(class_filter) = &self.class_filter {
            pairs.push(("class_filter", class_filter.clone()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardPayload {
    pub students: Vec<WireStudent>,
    pub statistics: ServerStatistics,
    #[serde(default)]
    pub trends: Trends,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerStatistics {
    pub total_students: usize,
    #[serde(default)]
    pub filtered_count: usize,
    pub risk_distribution: RiskDistribution,
    #[serde(default)]
    pub attendance_avg: f64,
    #[serde(default)]
    pub performance_avg: f64,
}

/// A student as the backend sends it. Fields that later feed the risk
/// evaluator stay loosely typed here and are checked in [`WireStudent::into_record`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireStudent {
    #[serde(deserialize_with = "string_or_integer")]
    pub id: String,
    pub name: String,
    #[serde(rename = "class", default)]
    pub class_name: String,
    #[serde(default)]
    pub department: String,
    pub attendance: f64,
    pub score: f64,
    pub fee_status: String,
    #[serde(default)]
    pub risk_score: Option<f64>,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub risk_factors: Option<WireRiskFactors>,
    #[serde(default)]
    pub last_updated: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireRiskFactors {
    #[serde(default)]
    pub fees: Option<WireFeeFactor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireFeeFactor {
    #[serde(default)]
    pub overdue_months: Option<u32>,
}

impl WireStudent {
    pub fn into_record(self, today: NaiveDate) -> Result<StudentRecord, String> {
        let fee_status: FeeStatus = self.fee_status.parse()?;
        let overdue_periods = self
            .risk_factors
            .and_then(|factors| factors.fees)
            .and_then(|fees| fees.overdue_months);

        Ok(StudentRecord {
            id: self.id,
            name: self.name,
            class_name: self.class_name,
            department: self.department,
            attendance_pct: self.attendance,
            score_pct: self.score,
            fee_status,
            overdue_periods,
            last_updated: self.last_updated.unwrap_or(today),
        }
        .normalized())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Attendance,
    Marks,
    Fees,
}

impl DataKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DataKind::Attendance => "attendance",
            DataKind::Marks => "marks",
            DataKind::Fees => "fees",
        }
    }
}

impl std::str::FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "attendance" => Ok(DataKind::Attendance),
            "marks" => Ok(DataKind::Marks),
            "fees" => Ok(DataKind::Fees),
            other => Err(format!("unknown data type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub message: String,
    pub results: Vec<FileResult>,
    #[serde(default)]
    pub summary: Option<RecordTotals>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileResult {
    Success {
        filename: String,
        #[serde(rename = "type")]
        data_type: DataKind,
        records_count: usize,
    },
    Error {
        filename: String,
        error: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTotals {
    pub total_attendance_records: usize,
    pub total_marks_records: usize,
    pub total_fees_records: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectionSummary {
    pub total_students_analyzed: usize,
    pub risk_summary: DetectionCounts,
    #[serde(default)]
    pub generated_alerts: Vec<RiskAlert>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DetectionCounts {
    pub high_risk_count: usize,
    pub medium_risk_count: usize,
    pub low_risk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AlertOutcome {
    pub success: bool,
    #[serde(default)]
    pub alert_id: Option<String>,
    #[serde(default)]
    pub message: String,
    pub sent_count: usize,
    pub total_recipients: usize,
    #[serde(default, alias = "failed_numbers")]
    pub failed_recipients: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BulkAlertOutcome {
    #[serde(default)]
    pub message: String,
    pub total_sent: usize,
    pub total_failed: usize,
    #[serde(default)]
    pub results: Vec<BulkStudentResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BulkStudentResult {
    Success {
        student_id: String,
        sent_count: usize,
        #[serde(default)]
        alert_id: Option<String>,
    },
    Error {
        student_id: String,
        error: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilters {
    pub student_id: Option<String>,
    pub alert_type: Option<String>,
    pub limit: Option<usize>,
}

impl HistoryFilters {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(student_id) = &self.student_id {
            pairs.push(("student_id", student_id.clone()));
        }
        if let Some(alert_type) = &self.alert_type {
            pairs.push(("alert_type", alert_type.clone()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AlertHistory {
    pub total_alerts: usize,
    pub filtered_count: usize,
    pub alerts: Vec<AlertRecord>,
    pub summary: AlertHistorySummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub alert_type: String,
    #[serde(default)]
    pub message: String,
    pub sent_count: usize,
    pub timestamp: String,
    pub status: String,
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AlertHistorySummary {
    pub total_sent: usize,
    pub total_failed: usize,
    #[serde(default)]
    pub by_type: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProcessingStatus {
    #[serde(default)]
    pub last_upload: Option<String>,
    #[serde(default)]
    pub total_files: usize,
    #[serde(default)]
    pub processed_files: usize,
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DataCount {
    pub count: usize,
    #[serde(default)]
    pub sample: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DataSummary {
    #[serde(default)]
    pub attendance: DataCount,
    #[serde(default)]
    pub marks: DataCount,
    #[serde(default)]
    pub fees: DataCount,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadStatus {
    pub status: ProcessingStatus,
    #[serde(default)]
    pub data_summary: DataSummary,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataPreview {
    pub data_type: DataKind,
    pub total_records: usize,
    #[serde(default)]
    pub preview: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StudentRiskDetail {
    pub student_data: StudentRecords,
    pub risk_analysis: RiskAnalysis,
    #[serde(default)]
    pub timestamp: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StudentRecords {
    pub name: String,
    #[serde(default)]
    pub attendance_records: Vec<serde_json::Value>,
    #[serde(default)]
    pub marks_records: Vec<serde_json::Value>,
    #[serde(default)]
    pub fees_records: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RiskAnalysis {
    #[serde(default)]
    pub attendance_analysis: AttendanceAnalysis,
    #[serde(default)]
    pub performance_analysis: PerformanceAnalysis,
    #[serde(default)]
    pub fees_analysis: FeesAnalysis,
    #[serde(default)]
    pub risk_timeline: Vec<TimelineEvent>,
    #[serde(default)]
    pub intervention_suggestions: Vec<InterventionSuggestion>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AttendanceAnalysis {
    pub percentage: f64,
    pub total_days: usize,
    pub present_days: usize,
    pub absent_days: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PerformanceAnalysis {
    pub average: f64,
    pub total_tests: usize,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub marks_list: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeesAnalysis {
    pub status: String,
    pub overdue_months: u32,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub paid_amount: f64,
}

impl Default for FeesAnalysis {
    fn default() -> Self {
        Self {
            status: "Unknown".to_string(),
            overdue_months: 0,
            total_amount: 0.0,
            paid_amount: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimelineEvent {
    #[serde(default)]
    pub date: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub event: String,
    #[serde(default)]
    pub impact: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InterventionSuggestion {
    pub category: String,
    pub action: String,
    pub priority: String,
}

impl StudentRiskDetail {
    /// Assesses the student from the backend's raw metrics with `rules`,
    /// ignoring any level the backend derived itself.
    pub fn local_assessment(&self, rules: &RuleTable) -> Result<RiskAssessment, String> {
        let analysis = &self.risk_analysis;
        let fee_status: FeeStatus = analysis.fees_analysis.status.parse()?;
        risk::assess_metrics(
            analysis.attendance_analysis.percentage,
            analysis.performance_analysis.average,
            fee_status,
            Some(analysis.fees_analysis.overdue_months),
            rules,
        )
        .map_err(|error| error.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        match (self.message, self.detail) {
            (Some(message), _) => Some(message),
            (None, Some(serde_json::Value::String(detail))) => Some(detail),
            (None, Some(other)) => Some(other.to_string()),
            (None, None) => None,
        }
    }
}
