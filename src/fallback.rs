//! Demonstration dataset shown when the dashboard backend cannot be reached.
//!
//! Only raw metrics live here. Levels and scores come from the same rule
//! table as live data.

use chrono::NaiveDate;

use crate::models::{FeeStatus, StudentRecord};
use crate::stats::{MonthlyAverage, RiskTrendPoint, Trends};

pub fn demo_students() -> Vec<StudentRecord> {
    let updated = NaiveDate::from_ymd_opt(2024, 11, 15).unwrap_or_default();
    let rows = [
        ("demo-001", "Aarav Sharma", "10th A", 45.0, 62.0, FeeStatus::Overdue),
        ("demo-002", "Priya Patel", "10th B", 78.0, 45.0, FeeStatus::Paid),
        ("demo-003", "Rohan Gupta", "12th Science", 92.0, 88.0, FeeStatus::Paid),
        ("demo-004", "Sneha Reddy", "11th Commerce", 68.0, 71.0, FeeStatus::Partial),
        ("demo-005", "Karan Singh", "11th Science", 55.0, 35.0, FeeStatus::Overdue),
        ("demo-006", "Ananya Iyer", "12th Arts", 88.0, 79.0, FeeStatus::Paid),
        ("demo-007", "Vikram Joshi", "10th A", 72.0, 58.0, FeeStatus::Paid),
        ("demo-008", "Meera Nair", "12th Commerce", 95.0, 91.0, FeeStatus::Paid),
    ];

    rows.into_iter()
        .map(|(id, name, class_name, attendance, score, fee_status)| {
            StudentRecord {
                id: id.to_string(),
                name: name.to_string(),
                class_name: class_name.to_string(),
                department: String::new(),
                attendance_pct: attendance,
                score_pct: score,
                fee_status,
                overdue_periods: None,
                last_updated: updated,
            }
            .normalized()
        })
        .collect()
}

pub fn demo_trends() -> Trends {
    let monthly = |values: [f64; 4]| {
        ["Aug 2024", "Sep 2024", "Oct 2024", "Nov 2024"]
            .into_iter()
            .zip(values)
            .map(|(month, average)| MonthlyAverage {
                month: month.to_string(),
                average,
            })
            .collect::<Vec<_>>()
    };

    Trends {
        attendance_trend: monthly([78.5, 76.2, 74.8, 73.1]),
        performance_trend: monthly([68.3, 66.7, 65.2, 64.8]),
        risk_trend: [("Aug 2024", 1, 2), ("Sep 2024", 2, 3), ("Oct 2024", 2, 4), ("Nov 2024", 3, 3)]
            .into_iter()
            .map(|(month, high, medium)| RiskTrendPoint {
                month: month.to_string(),
                high,
                medium,
            })
            .collect(),
    }
}
