use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AssessmentError;
use crate::models::{
    AssessedStudent, FeeStatus, Metric, RiskAssessment, RiskFactor, RiskFactors, RiskLevel,
    StudentRecord,
};
use crate::rules::RuleTable;
use crate::stats::RiskDistribution;

// Disjoint score bands keep every High score above every Medium score.
const LOW_BAND: (u8, u8) = (0, 33);
const MEDIUM_BAND: (u8, u8) = (34, 66);
const HIGH_BAND: (u8, u8) = (67, 100);

pub fn assess(
    record: &StudentRecord,
    rules: &RuleTable,
) -> Result<RiskAssessment, AssessmentError> {
    assess_metrics(
        record.attendance_pct,
        record.score_pct,
        record.fee_status,
        record.overdue_periods,
        rules,
    )
}

pub fn assess_metrics(
    attendance_pct: f64,
    score_pct: f64,
    fee_status: FeeStatus,
    overdue_periods: Option<u32>,
    rules: &RuleTable,
) -> Result<RiskAssessment, AssessmentError> {
    let attendance_pct = check_percentage("attendance", attendance_pct)?;
    let score_pct = check_percentage("score", score_pct)?;
    let periods = resolve_overdue_periods(fee_status, overdue_periods)?;

    let risk_factors = RiskFactors {
        attendance: RiskFactor {
            metric: Metric::Attendance,
            value: attendance_pct,
            level: rules.attendance.level(attendance_pct),
        },
        performance: RiskFactor {
            metric: Metric::Performance,
            value: score_pct,
            level: rules.performance.level(score_pct),
        },
        fees: RiskFactor {
            metric: Metric::Fees,
            value: f64::from(periods),
            level: rules.fees.level(periods),
        },
    };

    let risk_level = risk_factors
        .iter()
        .map(|factor| factor.level)
        .max()
        .unwrap_or(RiskLevel::Low);
    let severity = rules.severity(attendance_pct, score_pct, periods);

    Ok(RiskAssessment {
        risk_score: banded_score(risk_level, severity),
        risk_level,
        risk_factors,
    })
}

/// Overdue billing periods for a record, derived from the fee status when the
/// source did not report a count.
pub fn resolve_overdue_periods(
    fee_status: FeeStatus,
    reported: Option<u32>,
) -> Result<u32, AssessmentError> {
    match (fee_status, reported) {
        (FeeStatus::Paid, None) => Ok(0),
        (FeeStatus::Partial, None) => Ok(1),
        (FeeStatus::Overdue, None) => Ok(2),
        (FeeStatus::Paid, Some(0)) => Ok(0),
        (FeeStatus::Partial | FeeStatus::Overdue, Some(periods)) if periods > 0 => Ok(periods),
        (status, Some(periods)) => Err(AssessmentError::InconsistentFees { status, periods }),
    }
}

pub fn banded_score(level: RiskLevel, severity: f64) -> u8 {
    let (low, high) = match level {
        RiskLevel::Low => LOW_BAND,
        RiskLevel::Medium => MEDIUM_BAND,
        RiskLevel::High => HIGH_BAND,
    };
    let width = f64::from(high - low);
    let offset = (severity.clamp(0.0, 100.0) / 100.0 * width).round() as u8;
    low + offset.min(high - low)
}

fn check_percentage(metric: &'static str, value: f64) -> Result<f64, AssessmentError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(AssessmentError::OutOfRange { metric, value })
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssessmentBatch {
    pub students: Vec<AssessedStudent>,
    pub rejected: Vec<RejectedRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub id: String,
    pub name: String,
    pub error: AssessmentError,
}

/// Assesses every record, keeping input order. Invalid records are reported
/// in `rejected` and never abort the batch.
pub fn assess_all(records: &[StudentRecord], rules: &RuleTable) -> AssessmentBatch {
    let mut batch = AssessmentBatch::default();

    for record in records {
        match assess(record, rules) {
            Ok(assessment) => batch.students.push(AssessedStudent {
                record: record.clone(),
                assessment,
            }),
            Err(error) => {
                warn!(
                    student_id = %record.id,
                    student = %record.name,
                    %error,
                    "skipping student record"
                );
                batch.rejected.push(RejectedRecord {
                    id: record.id.clone(),
                    name: record.name.clone(),
                    error,
                });
            }
        }
    }

    batch
}

pub fn recommendations(assessment: &RiskAssessment) -> Vec<&'static str> {
    let factors = &assessment.risk_factors;
    let mut notes = Vec::new();

    if assessment.risk_level == RiskLevel::High {
        notes.push("Immediate intervention required");
    }
    if factors.attendance.level > RiskLevel::Low {
        notes.push("Improve attendance: schedule a parent meeting");
        notes.push("Check for health or transport issues");
    }
    if factors.performance.level > RiskLevel::Low {
        notes.push("Provide additional academic support");
        notes.push("Consider tutoring or a mentorship program");
    }
    if factors.fees.level > RiskLevel::Low {
        notes.push("Follow up on fee payments");
        notes.push("Discuss payment plan options");
    }
    if assessment.risk_level == RiskLevel::Low {
        notes.push("Continue current support strategies");
    }

    notes
}

pub fn cohort_recommendations(distribution: &RiskDistribution) -> Vec<String> {
    let mut notes = Vec::new();

    if distribution.high > 0 {
        notes.push(format!(
            "Immediate intervention needed for {} high-risk students",
            distribution.high
        ));
        notes.push("Schedule parent-teacher meetings for high-risk students".to_string());
        notes.push("Implement personalized study plans and mentorship programs".to_string());
    }
    if distribution.medium > 0 {
        notes.push(format!(
            "Monitor and support {} medium-risk students",
            distribution.medium
        ));
        notes.push("Provide additional academic support and counseling".to_string());
    }
    if distribution.high == 0 && distribution.medium == 0 {
        notes.push("All students are performing well: continue current strategies".to_string());
    }

    notes
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub student_id: String,
    pub student_name: String,
    pub risk_score: f64,
    pub alert_type: String,
    pub alerts: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub timestamp: NaiveDateTime,
    pub priority: String,
}

pub fn risk_alert(student: &AssessedStudent) -> Option<RiskAlert> {
    if student.level() != RiskLevel::High {
        return None;
    }

    let factors = &student.assessment.risk_factors;
    let mut alerts = Vec::new();
    if factors.attendance.level == RiskLevel::High {
        alerts.push(format!(
            "Critical attendance issue: {:.1}%",
            student.record.attendance_pct
        ));
    }
    if factors.performance.level == RiskLevel::High {
        alerts.push(format!(
            "Poor academic performance: {:.1}%",
            student.record.score_pct
        ));
    }
    if factors.fees.level == RiskLevel::High {
        alerts.push(format!("Fees overdue: {} billing periods", factors.fees.value));
    }

    Some(RiskAlert {
        student_id: student.record.id.clone(),
        student_name: student.record.name.clone(),
        risk_score: f64::from(student.score()),
        alert_type: "high_risk_dropout".to_string(),
        alerts,
        recommendations: recommendations(&student.assessment)
            .into_iter()
            .map(str::to_string)
            .collect(),
        timestamp: Utc::now().naive_utc(),
        priority: "high".to_string(),
    })
}

pub fn high_risk_alerts(students: &[AssessedStudent]) -> Vec<RiskAlert> {
    students.iter().filter_map(risk_alert).collect()
}
