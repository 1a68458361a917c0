use std::fmt::Write;

use chrono::NaiveDate;
use serde::Serialize;

use crate::dashboard::{DashboardView, DataSource};
use crate::interventions::InterventionLog;
use crate::models::AssessedStudent;
use crate::risk;

pub fn build_report(
    view: &DashboardView,
    filters: &str,
    interventions: &InterventionLog,
    today: NaiveDate,
) -> String {
    let statistics = &view.statistics;
    let distribution = &statistics.distribution;

    let mut output = String::new();
    let source = match view.source {
        DataSource::Live => "live dashboard data",
        DataSource::Demo => "demonstration data (server unavailable)",
    };

    let _ = writeln!(output, "# Student Dropout Risk Report");
    let _ = writeln!(output, "Generated {} from {} ({})", today, source, filters);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Distribution");
    let _ = writeln!(output, "- Students: {}", statistics.total_count);
    let _ = writeln!(output, "- High risk: {}", distribution.high);
    let _ = writeln!(output, "- Medium risk: {}", distribution.medium);
    let _ = writeln!(output, "- Low risk: {}", distribution.low);
    let _ = writeln!(
        output,
        "- Average attendance {:.2}%, average score {:.2}%",
        statistics.attendance_average, statistics.performance_average
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## By Class");

    if view.by_class.is_empty() {
        let _ = writeln!(output, "No students match these filters.");
    } else {
        for group in view.by_class.iter() {
            let _ = writeln!(
                output,
                "- {}: {} students ({} high, {} medium, {} low), attendance {:.2}%",
                group.group,
                group.statistics.total_count,
                group.statistics.distribution.high,
                group.statistics.distribution.medium,
                group.statistics.distribution.low,
                group.statistics.attendance_average
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Students");

    if view.students.is_empty() {
        let _ = writeln!(output, "No students match these filters.");
    } else {
        for student in view.students.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}, {}) {} risk, score {}",
                student.record.name,
                student.record.id,
                student.record.class_name,
                student.level(),
                student.score()
            );
            let factors: Vec<String> = student
                .assessment
                .risk_factors
                .contributing()
                .map(|factor| format!("{} {}", factor.metric, factor.level))
                .collect();
            if !factors.is_empty() {
                let _ = writeln!(output, "  - Factors: {}", factors.join(", "));
            }
            let _ = writeln!(
                output,
                "  - Next steps: {}",
                risk::recommendations(&student.assessment).join("; ")
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recommendations");
    for note in risk::cohort_recommendations(distribution) {
        let _ = writeln!(output, "- {}", note);
    }

    let mut open: Vec<_> = interventions.open().collect();
    open.sort_by(|a, b| a.due_date.cmp(&b.due_date));
    let overdue = interventions.overdue(today).len();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Open Interventions");

    if open.is_empty() {
        let _ = writeln!(output, "No open interventions.");
    } else {
        let _ = writeln!(output, "{} open, {} past due", open.len(), overdue);
        for action in open.iter() {
            let due = action
                .due_date
                .map(|date| date.to_string())
                .unwrap_or_else(|| "no due date".to_string());
            let _ = writeln!(
                output,
                "- {}: {} with {} ({}, due {})",
                action.student_name, action.action, action.mentor, action.status, due
            );
        }
    }

    output
}

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    id: &'a str,
    name: &'a str,
    class: &'a str,
    department: &'a str,
    attendance: f64,
    score: f64,
    fee_status: String,
    risk_score: u8,
    risk_level: &'static str,
    last_updated: NaiveDate,
}

impl<'a> From<&'a AssessedStudent> for ExportRow<'a> {
    fn from(student: &'a AssessedStudent) -> Self {
        Self {
            id: &student.record.id,
            name: &student.record.name,
            class: &student.record.class_name,
            department: &student.record.department,
            attendance: student.record.attendance_pct,
            score: student.record.score_pct,
            fee_status: student.record.fee_status.to_string(),
            risk_score: student.score(),
            risk_level: student.level().as_str(),
            last_updated: student.record.last_updated,
        }
    }
}

/// Writes one CSV row per student in the order given.
pub fn write_csv<W: std::io::Write>(students: &[AssessedStudent], writer: W) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for student in students {
        csv.serialize(ExportRow::from(student))?;
    }
    csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback;
    use crate::filter::{self, StudentQuery};
    use crate::stats::{self, GroupKey};

    fn demo_view() -> DashboardView {
        let batch = risk::assess_all(
            &fallback::demo_students(),
            &crate::rules::RuleTable::STANDARD,
        );
        let students = filter::apply(&batch.students, &StudentQuery::default());
        DashboardView {
            source: DataSource::Demo,
            statistics: stats::summarize(&students),
            by_class: stats::summarize_by(&students, GroupKey::Class),
            by_department: stats::summarize_by(&students, GroupKey::Department),
            students,
            trends: fallback::demo_trends(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 11, 20).unwrap()
    }

    #[test]
    fn report_lists_distribution_and_highest_risk_first() {
        let report = build_report(
            &demo_view(),
            "all classes",
            &InterventionLog::default(),
            today(),
        );

        assert!(report.starts_with("# Student Dropout Risk Report"));
        assert!(report.contains("demonstration data"));
        assert!(report.contains("- High risk: 2"));
        assert!(report.contains("- Medium risk: 3"));
        assert!(report.contains("- Low risk: 3"));
        assert!(report.contains("No open interventions."));

        let highest = report
            .lines()
            .find(|line| line.contains("high risk, score"))
            .unwrap();
        assert!(highest.contains("Karan Singh") || highest.contains("Aarav Sharma"));
    }

    #[test]
    fn report_includes_open_interventions() {
        let mut log = InterventionLog::default();
        log.create(
            "Aarav Sharma",
            "Ms. Rao",
            "Parent meeting",
            NaiveDate::from_ymd_opt(2024, 11, 18),
        )
        .unwrap();

        let report = build_report(&demo_view(), "all classes", &log, today());
        assert!(report.contains("1 open, 1 past due"));
        assert!(report
            .contains("- Aarav Sharma: Parent meeting with Ms. Rao (pending, due 2024-11-18)"));
    }

    #[test]
    fn csv_export_keeps_row_order() {
        let view = demo_view();
        let mut buffer = Vec::new();
        write_csv(&view.students, &mut buffer).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some(
                "id,name,class,department,attendance,score,fee_status,\
                 risk_score,risk_level,last_updated"
            )
        );
        assert_eq!(text.lines().count(), view.students.len() + 1);
        let first = lines.next().unwrap();
        assert!(first.contains(",high,"));
    }
}
