use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AlertError;
use crate::models::{AssessedStudent, RiskLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Attendance,
    Performance,
    Fees,
    General,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Attendance => "attendance",
            AlertKind::Performance => "performance",
            AlertKind::Fees => "fees",
            AlertKind::General => "general",
        }
    }

    /// Picks the alert topic for a student from the most severe factor.
    /// Ties prefer attendance, then performance, then fees.
    pub fn for_student(student: &AssessedStudent) -> Self {
        let factors = &student.assessment.risk_factors;
        let worst = student.level();

        if worst == RiskLevel::Low {
            AlertKind::General
        } else if factors.attendance.level == worst {
            AlertKind::Attendance
        } else if factors.performance.level == worst {
            AlertKind::Performance
        } else {
            AlertKind::Fees
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "attendance" => Ok(AlertKind::Attendance),
            "performance" => Ok(AlertKind::Performance),
            "fees" => Ok(AlertKind::Fees),
            "general" => Ok(AlertKind::General),
            other => Err(format!("unknown alert type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailAlertRequest {
    pub student_id: String,
    pub student_name: String,
    pub alert_type: AlertKind,
    pub recipients: Vec<String>,
    pub message: String,
    pub priority: Priority,
}

impl EmailAlertRequest {
    /// Builds a request, falling back to the standard template for `kind`
    /// when no message is given.
    pub fn new(
        student_id: &str,
        student_name: &str,
        kind: AlertKind,
        recipients: Vec<String>,
        message: Option<String>,
        priority: Priority,
    ) -> Result<Self, AlertError> {
        if student_id.trim().is_empty() {
            return Err(AlertError::MissingStudent);
        }
        let recipients = clean_recipients(recipients);
        if recipients.is_empty() {
            return Err(AlertError::NoRecipients);
        }

        Ok(Self {
            student_id: student_id.trim().to_string(),
            student_name: student_name.trim().to_string(),
            alert_type: kind,
            recipients,
            message: message
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| default_message(kind, student_name.trim())),
            priority,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmsAlertRequest {
    pub student_id: String,
    pub student_name: String,
    pub phone_numbers: Vec<String>,
    pub message: String,
    pub alert_type: AlertKind,
}

impl SmsAlertRequest {
    pub fn new(
        student_id: &str,
        student_name: &str,
        kind: AlertKind,
        phone_numbers: Vec<String>,
        message: &str,
    ) -> Result<Self, AlertError> {
        if student_id.trim().is_empty() {
            return Err(AlertError::MissingStudent);
        }
        let phone_numbers = clean_recipients(phone_numbers);
        if phone_numbers.is_empty() {
            return Err(AlertError::NoRecipients);
        }
        if message.trim().is_empty() {
            return Err(AlertError::EmptyMessage);
        }

        Ok(Self {
            student_id: student_id.trim().to_string(),
            student_name: student_name.trim().to_string(),
            phone_numbers,
            message: message.trim().to_string(),
            alert_type: kind,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkAlertRequest {
    pub alert_type: AlertKind,
    pub recipients_per_student: BTreeMap<String, Vec<String>>,
    pub custom_message: Option<String>,
}

impl BulkAlertRequest {
    pub fn new(
        kind: AlertKind,
        recipients_per_student: BTreeMap<String, Vec<String>>,
        custom_message: Option<String>,
    ) -> Result<Self, AlertError> {
        if recipients_per_student.is_empty() {
            return Err(AlertError::NoRecipients);
        }

        let mut cleaned = BTreeMap::new();
        for (student_id, recipients) in recipients_per_student {
            let student_id = student_id.trim().to_string();
            if student_id.is_empty() {
                return Err(AlertError::MissingStudent);
            }
            let recipients = clean_recipients(recipients);
            if recipients.is_empty() {
                return Err(AlertError::BulkWithoutRecipients(student_id));
            }
            cleaned.insert(student_id, recipients);
        }

        Ok(Self {
            alert_type: kind,
            recipients_per_student: cleaned,
            custom_message: custom_message.filter(|text| !text.trim().is_empty()),
        })
    }

    pub fn student_ids(&self) -> Vec<String> {
        self.recipients_per_student.keys().cloned().collect()
    }
}

fn clean_recipients(recipients: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for recipient in recipients {
        let recipient = recipient.trim().to_string();
        if !recipient.is_empty() && !cleaned.contains(&recipient) {
            cleaned.push(recipient);
        }
    }
    cleaned
}

pub fn default_message(kind: AlertKind, student_name: &str) -> String {
    let body = match kind {
        AlertKind::Attendance => format!(
            "This is an automated alert regarding {student_name}'s attendance.\n\n\
             Our records show that {student_name} has been absent frequently and their attendance \
             has fallen below the required threshold. Low attendance may affect their academic \
             performance and overall development.\n\n\
             We recommend:\n\
             1. Discussing the importance of regular attendance with your child\n\
             2. Addressing any underlying issues causing absences\n\
             3. Contacting the school if there are ongoing concerns"
        ),
        AlertKind::Performance => format!(
            "This is an alert regarding {student_name}'s academic performance.\n\n\
             Recent assessments indicate that {student_name} may need additional support to \
             maintain satisfactory academic progress. Early intervention can help prevent a \
             further decline.\n\n\
             We recommend:\n\
             1. Reviewing study habits and homework completion\n\
             2. Considering additional tutoring or study support\n\
             3. Scheduling a meeting with teachers to discuss specific areas of concern"
        ),
        AlertKind::Fees => format!(
            "This is a reminder regarding pending fee payments for {student_name}.\n\n\
             Our records indicate outstanding fees that may affect your child's continued \
             enrollment and access to school services.\n\n\
             Please:\n\
             1. Review your fee payment status\n\
             2. Contact the administration office for payment arrangements if needed\n\
             3. Ensure payments are made by the due date"
        ),
        AlertKind::General => format!(
            "This is an important notification regarding {student_name}.\n\n\
             We would like to bring to your attention some concerns that may require your \
             involvement to support your child's continued success and well-being at school.\n\n\
             Please contact us at your earliest convenience to discuss how we can work together \
             to support {student_name}."
        ),
    };

    format!("Dear Parent/Guardian,\n\n{body}\n\nBest regards,\nSchool Administration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeeStatus, StudentRecord};
    use crate::risk::assess_all;
    use crate::rules::RuleTable;
    use chrono::NaiveDate;

    fn assessed(attendance: f64, score: f64, fee: FeeStatus) -> AssessedStudent {
        let record = StudentRecord {
            id: "s-9".to_string(),
            name: "Jules Moreno".to_string(),
            class_name: "11th Commerce".to_string(),
            department: "Commerce".to_string(),
            attendance_pct: attendance,
            score_pct: score,
            fee_status: fee,
            overdue_periods: None,
            last_updated: NaiveDate::from_ymd_opt(2024, 11, 15).unwrap(),
        };
        assess_all(&[record], &RuleTable::STANDARD).students.remove(0)
    }

    #[test]
    fn fills_default_message_and_dedupes_recipients() {
        let request = EmailAlertRequest::new(
            "s-9",
            "Jules Moreno",
            AlertKind::Fees,
            vec![
                "parent@example.com".to_string(),
                " parent@example.com ".to_string(),
                String::new(),
            ],
            None,
            Priority::High,
        )
        .unwrap();

        assert_eq!(request.recipients, vec!["parent@example.com"]);
        assert!(request.message.contains("pending fee payments for Jules Moreno"));
        assert!(request.message.starts_with("Dear Parent/Guardian"));
    }

    #[test]
    fn rejects_requests_without_recipients() {
        let result = EmailAlertRequest::new(
            "s-9",
            "Jules",
            AlertKind::General,
            vec![],
            None,
            Priority::Low,
        );
        assert_eq!(result, Err(AlertError::NoRecipients));

        let result = SmsAlertRequest::new(
            "s-9",
            "Jules",
            AlertKind::General,
            vec!["+15550100".into()],
            "  ",
        );
        assert_eq!(result, Err(AlertError::EmptyMessage));

        let mut per_student = BTreeMap::new();
        per_student.insert("s-1".to_string(), vec![" ".to_string()]);
        assert_eq!(
            BulkAlertRequest::new(AlertKind::Attendance, per_student, None),
            Err(AlertError::BulkWithoutRecipients("s-1".to_string()))
        );
    }

    #[test]
    fn alert_kind_follows_worst_factor() {
        let kind =
            |attendance, score, fees| AlertKind::for_student(&assessed(attendance, score, fees));
        assert_eq!(kind(45.0, 80.0, FeeStatus::Paid), AlertKind::Attendance);
        assert_eq!(kind(80.0, 30.0, FeeStatus::Partial), AlertKind::Performance);
        assert_eq!(kind(80.0, 70.0, FeeStatus::Overdue), AlertKind::Fees);
        assert_eq!(kind(95.0, 90.0, FeeStatus::Paid), AlertKind::General);
    }

    #[test]
    fn every_kind_has_a_template() {
        for kind in [
            AlertKind::Attendance,
            AlertKind::Performance,
            AlertKind::Fees,
            AlertKind::General,
        ] {
            let message = default_message(kind, "Kiara Patel");
            assert!(message.contains("Kiara Patel"));
            assert!(message.ends_with("School Administration"));
        }
    }
}
