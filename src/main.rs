use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use dropout_early_warning::alerts::{
    AlertKind, BulkAlertRequest, EmailAlertRequest, Priority, SmsAlertRequest,
};
use dropout_early_warning::api::{DataKind, HistoryFilters};
use dropout_early_warning::client::HttpDashboardApi;
use dropout_early_warning::config::AppConfig;
use dropout_early_warning::dashboard::{Dashboard, DashboardView, DataSource, StudentDetail};
use dropout_early_warning::filter::{ClassFilter, RiskFilter, StudentQuery};
use dropout_early_warning::interventions::InterventionLog;
use dropout_early_warning::logging::{self, LoggingConfig};
use dropout_early_warning::models::{FeeStatus, RiskLevel};
use dropout_early_warning::request::LogNotifier;
use dropout_early_warning::upload::{spawn_progress, FileOutcome};
use dropout_early_warning::{report, risk};

#[derive(Parser)]
#[command(name = "dropout-early-warning")]
#[command(about = "Student dropout risk dashboard", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Dashboard backend URL, overrides config and environment
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[arg(long, short, global = true)]
    verbose: bool,

    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ViewArgs {
    /// Case-insensitive match on student name or class
    #[arg(long, default_value = "")]
    search: String,

    /// Class name filter, or "all"
    #[arg(long = "class", default_value = "all")]
    class_filter: ClassFilter,

    /// Risk level filter (high, medium, low, all)
    #[arg(long = "risk", default_value = "all")]
    risk_filter: RiskFilter,

    #[arg(long)]
    limit: Option<usize>,

    /// Skip the backend and use the demonstration dataset
    #[arg(long)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the backend is reachable
    Health,
    /// Assess a single student's metrics with the local rule table
    Assess {
        #[arg(long)]
        attendance: f64,
        #[arg(long)]
        score: f64,
        #[arg(long)]
        fee_status: FeeStatus,
        #[arg(long)]
        overdue_periods: Option<u32>,
    },
    /// Show the filtered student list and statistics
    Dashboard {
        #[command(flatten)]
        view: ViewArgs,
        /// Print the view as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        view: ViewArgs,
        /// Interventions JSON file to include
        #[arg(long)]
        interventions: Option<PathBuf>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export the visible students as CSV
    Export {
        #[command(flatten)]
        view: ViewArgs,
        #[arg(long, default_value = "students.csv")]
        out: PathBuf,
    },
    /// Upload attendance, marks or fee files
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        data_type: Option<DataKind>,
    },
    /// Show what the backend has ingested so far
    UploadStatus,
    /// Show the first rows of an uploaded dataset
    Preview {
        data_type: DataKind,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Run server-side risk detection
    Detect {
        #[arg(long)]
        refresh: bool,
        /// List high-risk alerts computed with the local rules instead
        #[arg(long)]
        local: bool,
    },
    /// Show the backend's detail for one student
    Student { id: String },
    /// Send alerts to guardians
    Alert {
        #[command(subcommand)]
        channel: AlertCommand,
    },
    /// Show sent alert history
    Alerts {
        #[arg(long)]
        student_id: Option<String>,
        #[arg(long)]
        alert_type: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Remove all uploaded data from the backend
    Clear {
        #[arg(long)]
        yes: bool,
    },
    /// Track mentor interventions in a local JSON file
    Intervene {
        #[arg(long, default_value = "interventions.json")]
        file: PathBuf,
        #[command(subcommand)]
        action: InterventionCommand,
    },
}

#[derive(Subcommand)]
enum AlertCommand {
    Email {
        #[arg(long)]
        student_id: String,
        #[arg(long)]
        student_name: String,
        /// Defaults to a topic picked from the student's risk factors
        #[arg(long)]
        kind: Option<AlertKind>,
        #[arg(long = "to", required = true)]
        recipients: Vec<String>,
        #[arg(long)]
        message: Option<String>,
        #[arg(long, default_value = "medium")]
        priority: Priority,
    },
    Sms {
        #[arg(long)]
        student_id: String,
        #[arg(long)]
        student_name: String,
        #[arg(long)]
        kind: Option<AlertKind>,
        #[arg(long = "to", required = true)]
        phone_numbers: Vec<String>,
        #[arg(long)]
        message: String,
    },
    /// Recipients are given as STUDENT_ID=ADDRESS, repeatable
    Bulk {
        #[arg(long, default_value = "general")]
        kind: AlertKind,
        #[arg(long = "to", required = true)]
        recipients: Vec<String>,
        #[arg(long)]
        message: Option<String>,
    },
}

#[derive(Subcommand)]
enum InterventionCommand {
    Add {
        #[arg(long)]
        student: String,
        #[arg(long, default_value = "")]
        mentor: String,
        #[arg(long)]
        action: String,
        #[arg(long)]
        due: Option<NaiveDate>,
    },
    Advance {
        id: Uuid,
        #[arg(long)]
        note: Option<String>,
    },
    List {
        #[arg(long)]
        student: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::resolve(cli.config.as_deref())?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }
    config.validate().context("invalid configuration")?;

    logging::init(&LoggingConfig::from_settings(
        &config.logging,
        cli.verbose,
        cli.json_logs,
    ));

    match cli.command {
        Commands::Assess {
            attendance,
            score,
            fee_status,
            overdue_periods,
        } => {
            let assessment = risk::assess_metrics(
                attendance,
                score,
                fee_status,
                overdue_periods,
                &config.rules,
            )?;
            println!(
                "Risk {} (score {})",
                assessment.risk_level, assessment.risk_score
            );
            for factor in assessment.risk_factors.iter() {
                println!("- {}: {} ({})", factor.metric, factor.value, factor.level);
            }
            for note in risk::recommendations(&assessment) {
                println!("* {note}");
            }
        }
        Commands::Intervene { file, action } => {
            run_interventions(&file, action)?;
        }
        command => {
            let api = HttpDashboardApi::new(&config.api_url, config.timeout())
                .context("failed to build HTTP client")?;
            let dashboard = Dashboard::new(
                Arc::new(api),
                Arc::new(LogNotifier),
                config.rules,
                config.stale_responses,
            )
            .with_fetch_limit(config.dashboard_limit);
            run_remote(&dashboard, &config, command).await?;
        }
    }

    Ok(())
}

async fn run_remote(
    dashboard: &Dashboard,
    config: &AppConfig,
    command: Commands,
) -> anyhow::Result<()> {
    match command {
        Commands::Health => {
            let health = dashboard.health().await.context("health check failed")?;
            println!("Backend {} at {}", health.status, config.api_url);
        }
        Commands::Dashboard { view, json } => {
            let view = load_view(dashboard, &view).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_view(&view);
            }
        }
        Commands::Report {
            view,
            interventions,
            out,
        } => {
            let label = describe_filters(&view);
            let view = load_view(dashboard, &view).await;
            let log = match interventions {
                Some(path) => InterventionLog::load(&path)?,
                None => InterventionLog::default(),
            };
            let report = report::build_report(&view, &label, &log, Utc::now().date_naive());
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write report to {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { view, out } => {
            let view = load_view(dashboard, &view).await;
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            report::write_csv(&view.students, file)?;
            println!("Exported {} students to {}.", view.students.len(), out.display());
        }
        Commands::Upload { files, data_type } => {
            let ticker = spawn_progress(10, Duration::from_millis(200));
            let mut progress = ticker.subscribe();
            let printer = tokio::spawn(async move {
                while progress.changed().await.is_ok() {
                    let percent = *progress.borrow_and_update();
                    eprintln!("Uploading... {percent}%");
                }
            });

            let outcome = dashboard.upload(&files, data_type).await;
            ticker.complete().await;
            printer.await.context("progress printer failed")?;

            match outcome {
                Some(report) => {
                    for outcome in &report.outcomes {
                        match outcome {
                            FileOutcome::Ingested {
                                file_name,
                                data_type,
                                records,
                            } => {
                                println!("- {file_name}: {records} {} records", data_type.as_str())
                            }
                            FileOutcome::Rejected { file_name, reason } => {
                                println!("- {file_name}: {reason}")
                            }
                        }
                    }
                    println!(
                        "{} of {} files processed.",
                        report.ingested(),
                        report.outcomes.len()
                    );
                }
                None => bail!(failure_message(dashboard.upload_state().error())),
            }
        }
        Commands::UploadStatus => {
            let status = dashboard
                .upload_status()
                .await
                .map_err(|error| anyhow::anyhow!(error.user_message()))?;
            let summary = &status.data_summary;
            println!(
                "{} of {} files processed, last upload {}",
                status.status.processed_files,
                status.status.total_files,
                status.status.last_upload.as_deref().unwrap_or("never")
            );
            println!(
                "Records: {} attendance, {} marks, {} fees",
                summary.attendance.count, summary.marks.count, summary.fees.count
            );
            for error in &status.status.errors {
                println!("- error: {error}");
            }
        }
        Commands::Preview { data_type, limit } => {
            let preview = dashboard
                .data_preview(data_type, limit)
                .await
                .map_err(|error| anyhow::anyhow!(error.user_message()))?;
            println!(
                "{} of {} {} records",
                preview.preview.len(),
                preview.total_records,
                preview.data_type.as_str()
            );
            println!("{}", preview.columns.join(" | "));
            for row in &preview.preview {
                let cells: Vec<String> = preview
                    .columns
                    .iter()
                    .map(|column| match row.get(column) {
                        Some(serde_json::Value::String(text)) => text.clone(),
                        Some(value) => value.to_string(),
                        None => String::new(),
                    })
                    .collect();
                println!("{}", cells.join(" | "));
            }
        }
        Commands::Student { id } => {
            let student = dashboard
                .student_detail(&id)
                .await
                .map_err(|error| anyhow::anyhow!(error.user_message()))?;
            print_student(&id, &student);
        }
        Commands::Detect { local: true, .. } => {
            dashboard.refresh(&StudentQuery::default()).await;
            let alerts = dashboard.local_alerts();
            println!("{} students at high risk.", alerts.len());
            for alert in &alerts {
                println!(
                    "- {} ({}): {}",
                    alert.student_name,
                    alert.student_id,
                    alert.alerts.join("; ")
                );
            }
        }
        Commands::Detect { refresh, .. } => match dashboard.detect_risk(refresh).await {
            Some(summary) => {
                let counts = summary.risk_summary;
                println!(
                    "Analyzed {} students: {} high, {} medium, {} low.",
                    summary.total_students_analyzed,
                    counts.high_risk_count,
                    counts.medium_risk_count,
                    counts.low_risk_count
                );
                for alert in &summary.generated_alerts {
                    println!(
                        "- {} ({}): {}",
                        alert.student_name,
                        alert.student_id,
                        alert.alerts.join("; ")
                    );
                }
                for note in &summary.recommendations {
                    println!("* {note}");
                }
            }
            None => bail!(failure_message(dashboard.detection_state().error())),
        },
        Commands::Alert { channel } => send_alert(dashboard, channel).await?,
        Commands::Alerts {
            student_id,
            alert_type,
            limit,
        } => {
            let filters = HistoryFilters {
                student_id,
                alert_type,
                limit: Some(limit),
            };
            let history = dashboard
                .alerts_history(&filters)
                .await
                .map_err(|error| anyhow::anyhow!(error.user_message()))?;
            println!(
                "{} of {} alerts ({} sent, {} failed)",
                history.filtered_count,
                history.total_alerts,
                history.summary.total_sent,
                history.summary.total_failed
            );
            for alert in &history.alerts {
                println!(
                    "- {} {} to {} ({}, {} sent)",
                    alert.timestamp,
                    alert.alert_type,
                    alert.student_name,
                    alert.status,
                    alert.sent_count
                );
            }
        }
        Commands::Clear { yes } => {
            if !yes {
                bail!("refusing to clear backend data without --yes");
            }
            let message = dashboard
                .clear_data()
                .await
                .map_err(|error| anyhow::anyhow!(error.user_message()))?;
            println!("{message}");
        }
        Commands::Assess { .. } | Commands::Intervene { .. } => {}
    }

    Ok(())
}

/// Risk filter and limit are applied to the local assessments only.
async fn load_view(dashboard: &Dashboard, args: &ViewArgs) -> DashboardView {
    let query = StudentQuery {
        search: args.search.clone(),
        class_filter: args.class_filter.clone(),
        risk_filter: args.risk_filter,
        limit: args.limit,
    };
    if !args.offline {
        dashboard.refresh(&query).await;
    }
    dashboard.view(&query)
}

fn describe_filters(args: &ViewArgs) -> String {
    let mut parts = Vec::new();
    if !args.search.trim().is_empty() {
        parts.push(format!("search \"{}\"", args.search.trim()));
    }
    if let Some(class_name) = args.class_filter.as_param() {
        parts.push(format!("class {class_name}"));
    }
    if let Some(level) = args.risk_filter.as_level() {
        parts.push(format!("{level} risk"));
    }
    if parts.is_empty() {
        "all students".to_string()
    } else {
        parts.join(", ")
    }
}

fn print_view(view: &DashboardView) {
    if view.source == DataSource::Demo {
        println!("Server unavailable, showing demonstration data.");
    }

    let statistics = &view.statistics;
    println!(
        "{} students: {} high, {} medium, {} low risk",
        statistics.total_count,
        statistics.distribution.high,
        statistics.distribution.medium,
        statistics.distribution.low
    );
    println!(
        "Average attendance {:.2}%, average score {:.2}%",
        statistics.attendance_average, statistics.performance_average
    );

    if view.students.is_empty() {
        println!("No students match these filters.");
        return;
    }

    for student in &view.students {
        let marker = match student.level() {
            RiskLevel::High => "!!",
            RiskLevel::Medium => "! ",
            RiskLevel::Low => "  ",
        };
        println!(
            "{} {:<20} {:<14} att {:>5.1}% score {:>5.1}% fees {:<8} risk {:>3} ({})",
            marker,
            student.record.name,
            student.record.class_name,
            student.record.attendance_pct,
            student.record.score_pct,
            student.record.fee_status,
            student.score(),
            student.level()
        );
    }
}

fn print_student(id: &str, student: &StudentDetail) {
    let records = &student.detail.student_data;
    let analysis = &student.detail.risk_analysis;
    println!("{} ({id})", records.name);
    println!(
        "Attendance {:.1}% over {} days, average score {:.1}% over {} tests, fees {} ({} overdue)",
        analysis.attendance_analysis.percentage,
        analysis.attendance_analysis.total_days,
        analysis.performance_analysis.average,
        analysis.performance_analysis.total_tests,
        analysis.fees_analysis.status,
        analysis.fees_analysis.overdue_months
    );
    match &student.assessment {
        Some(assessment) => {
            println!(
                "Risk {} (score {})",
                assessment.risk_level, assessment.risk_score
            );
            for note in risk::recommendations(assessment) {
                println!("* {note}");
            }
        }
        None => println!("Not enough data to assess this student locally."),
    }
    for event in &analysis.risk_timeline {
        println!("- {} {}: {} ({})", event.date, event.kind, event.event, event.impact);
    }
    for suggestion in &analysis.intervention_suggestions {
        println!(
            "> [{}] {}: {}",
            suggestion.priority, suggestion.category, suggestion.action
        );
    }
}

async fn alert_kind(dashboard: &Dashboard, kind: Option<AlertKind>, student_id: &str) -> AlertKind {
    match kind {
        Some(kind) => kind,
        None => {
            dashboard.refresh(&StudentQuery::default()).await;
            dashboard.alert_kind_for(student_id)
        }
    }
}

async fn send_alert(dashboard: &Dashboard, channel: AlertCommand) -> anyhow::Result<()> {
    match channel {
        AlertCommand::Email {
            student_id,
            student_name,
            kind,
            recipients,
            message,
            priority,
        } => {
            let kind = alert_kind(dashboard, kind, &student_id).await;
            let request = EmailAlertRequest::new(
                &student_id,
                &student_name,
                kind,
                recipients,
                message,
                priority,
            );
            match dashboard.send_email_alert(request).await {
                Some(outcome) => println!(
                    "Email alert sent to {} of {} recipients.",
                    outcome.sent_count, outcome.total_recipients
                ),
                None => bail!(failure_message(dashboard.alert_state().error())),
            }
        }
        AlertCommand::Sms {
            student_id,
            student_name,
            kind,
            phone_numbers,
            message,
        } => {
            let kind = alert_kind(dashboard, kind, &student_id).await;
            let request =
                SmsAlertRequest::new(&student_id, &student_name, kind, phone_numbers, &message);
            match dashboard.send_sms_alert(request).await {
                Some(outcome) => {
                    println!(
                        "SMS sent to {} of {} numbers.",
                        outcome.sent_count, outcome.total_recipients
                    );
                    for number in &outcome.failed_recipients {
                        println!("- failed: {number}");
                    }
                }
                None => bail!(failure_message(dashboard.alert_state().error())),
            }
        }
        AlertCommand::Bulk {
            kind,
            recipients,
            message,
        } => {
            let mut per_student: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for entry in recipients {
                let Some((student_id, address)) = entry.split_once('=') else {
                    bail!("bulk recipient {entry:?} must look like STUDENT_ID=ADDRESS");
                };
                per_student
                    .entry(student_id.to_string())
                    .or_default()
                    .push(address.to_string());
            }

            let request = BulkAlertRequest::new(kind, per_student, message);
            match dashboard.send_bulk_alerts(request).await {
                Some(outcome) => println!(
                    "Bulk alerts: {} sent, {} failed.",
                    outcome.total_sent, outcome.total_failed
                ),
                None => bail!(failure_message(dashboard.bulk_alert_state().error())),
            }
        }
    }

    Ok(())
}

fn failure_message(error: Option<String>) -> String {
    error.unwrap_or_else(|| "request did not complete".to_string())
}

fn run_interventions(file: &Path, command: InterventionCommand) -> anyhow::Result<()> {
    let mut log = if file.exists() {
        InterventionLog::load(file)?
    } else {
        InterventionLog::default()
    };

    match command {
        InterventionCommand::Add {
            student,
            mentor,
            action,
            due,
        } => {
            let created = log.create(&student, &mentor, &action, due)?;
            println!(
                "Created intervention {} for {}.",
                created.id, created.student_name
            );
            log.save(file)?;
        }
        InterventionCommand::Advance { id, note } => {
            let updated = log.advance(id, note.as_deref())?;
            println!("Intervention {} is now {}.", updated.id, updated.status);
            log.save(file)?;
        }
        InterventionCommand::List { student } => {
            let actions = match &student {
                Some(name) => log.for_student(name),
                None => log.actions().iter().collect(),
            };
            let counts = log.status_counts();
            println!(
                "{} pending, {} in progress, {} completed",
                counts.pending, counts.in_progress, counts.completed
            );
            for action in actions {
                println!(
                    "- {} {}: {} with {} ({})",
                    action.id, action.student_name, action.action, action.mentor, action.status
                );
            }
        }
    }

    Ok(())
}
