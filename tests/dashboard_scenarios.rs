use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use dropout_early_warning::alerts::{
    AlertKind, BulkAlertRequest, EmailAlertRequest, Priority, SmsAlertRequest,
};
use dropout_early_warning::api::{
    AlertHistory, AlertOutcome, BulkAlertOutcome, DashboardFilters, DashboardPayload, DataKind,
    DataPreview, DetectionSummary, FileResult, HealthStatus, HistoryFilters, StudentRiskDetail,
    UploadFile, UploadResponse, UploadStatus,
};
use dropout_early_warning::client::{ApiResult, DashboardApi};
use dropout_early_warning::dashboard::{Dashboard, DataSource, DEFAULT_FETCH_LIMIT};
use dropout_early_warning::error::{AlertError, ApiError};
use dropout_early_warning::filter::{RiskFilter, StudentQuery};
use dropout_early_warning::models::RiskLevel;
use dropout_early_warning::request::{NotificationKind, RecordingNotifier, StalePolicy};
use dropout_early_warning::rules::RuleTable;

/// In-memory backend. The dashboard endpoint behaves like the real one: it
/// filters by class and by its own `riskLevel` when asked, then truncates.
struct FakeApi {
    dashboard: ApiResult<serde_json::Value>,
    /// Served to the first dashboard call, which is held until a later call
    /// has answered.
    stale_dashboard: Option<serde_json::Value>,
    dashboard_calls: AtomicUsize,
    released: Notify,
    filters: Mutex<Vec<DashboardFilters>>,
    upload: ApiResult<UploadResponse>,
    uploaded: Mutex<Vec<String>>,
    student: Option<serde_json::Value>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeApi {
    fn serving(payload: serde_json::Value) -> Self {
        Self {
            dashboard: Ok(payload),
            stale_dashboard: None,
            dashboard_calls: AtomicUsize::new(0),
            released: Notify::new(),
            filters: Mutex::new(Vec::new()),
            upload: Err(not_found()),
            uploaded: Mutex::new(Vec::new()),
            student: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn unreachable() -> Self {
        Self {
            dashboard: Err(ApiError::Transport("connection refused".to_string())),
            ..Self::serving(json!({ "students": [], "statistics": empty_statistics() }))
        }
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn filters(&self) -> Vec<DashboardFilters> {
        self.filters.lock().unwrap().clone()
    }
}

fn serve(payload: &serde_json::Value, filters: &DashboardFilters) -> ApiResult<DashboardPayload> {
    let mut payload = payload.clone();
    let pairs = filters.query_pairs();
    let param = |name: &str| {
        pairs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.clone())
    };

    if let Some(students) = payload["students"].as_array_mut() {
        if let Some(class_name) = param("class_filter") {
            students.retain(|student| student["class"].as_str() == Some(class_name.as_str()));
        }
        if let Some(level) = param("risk_filter") {
            students.retain(|student| student["riskLevel"].as_str() == Some(level.as_str()));
        }
        students.truncate(filters.limit.unwrap_or(100));
    }
    serde_json::from_value(payload).map_err(|error| ApiError::Payload(error.to_string()))
}

fn not_found() -> ApiError {
    ApiError::Status {
        status: 404,
        message: String::new(),
    }
}

fn empty_statistics() -> serde_json::Value {
    json!({
        "total_students": 0,
        "risk_distribution": { "high": 0, "medium": 0, "low": 0 }
    })
}

#[async_trait]
impl DashboardApi for FakeApi {
    async fn health(&self) -> ApiResult<HealthStatus> {
        self.record("health");
        Ok(HealthStatus {
            status: "healthy".to_string(),
            message: String::new(),
            environment: None,
        })
    }

    async fn dashboard(&self, filters: &DashboardFilters) -> ApiResult<DashboardPayload> {
        self.record("dashboard");
        self.filters.lock().unwrap().push(filters.clone());

        let call = self.dashboard_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(stale) = &self.stale_dashboard {
            if call == 0 {
                self.released.notified().await;
                return serve(stale, filters);
            }
            self.released.notify_one();
        }

        match &self.dashboard {
            Ok(payload) => serve(payload, filters),
            Err(error) => Err(error.clone()),
        }
    }

    async fn upload(
        &self,
        files: Vec<UploadFile>,
        _data_type: Option<DataKind>,
    ) -> ApiResult<UploadResponse> {
        self.record("upload");
        self.uploaded
            .lock()
            .unwrap()
            .extend(files.into_iter().map(|file| file.file_name));
        self.upload.clone()
    }

    async fn upload_status(&self) -> ApiResult<UploadStatus> {
        self.record("upload_status");
        Err(not_found())
    }

    async fn data_preview(&self, _kind: DataKind, _limit: usize) -> ApiResult<DataPreview> {
        self.record("data_preview");
        Err(not_found())
    }

    async fn detect_risk(&self, _refresh: bool) -> ApiResult<DetectionSummary> {
        self.record("detect_risk");
        Err(not_found())
    }

    async fn student_risk(&self, _student_id: &str) -> ApiResult<StudentRiskDetail> {
        self.record("student_risk");
        match &self.student {
            Some(body) => serde_json::from_value(body.clone())
                .map_err(|error| ApiError::Payload(error.to_string())),
            None => Err(ApiError::Status {
                status: 404,
                message: "Student not found".to_string(),
            }),
        }
    }

    async fn send_email_alert(&self, _request: &EmailAlertRequest) -> ApiResult<AlertOutcome> {
        self.record("send_email_alert");
        Ok(AlertOutcome {
            success: true,
            alert_id: Some("alert-1".to_string()),
            message: String::new(),
            sent_count: 1,
            total_recipients: 1,
            failed_recipients: Vec::new(),
        })
    }

    async fn send_sms_alert(&self, _request: &SmsAlertRequest) -> ApiResult<AlertOutcome> {
        self.record("send_sms_alert");
        Err(not_found())
    }

    async fn send_bulk_alerts(&self, _request: &BulkAlertRequest) -> ApiResult<BulkAlertOutcome> {
        self.record("send_bulk_alerts");
        Err(not_found())
    }

    async fn alerts_history(&self, _filters: &HistoryFilters) -> ApiResult<AlertHistory> {
        self.record("alerts_history");
        Err(not_found())
    }

    async fn clear_data(&self) -> ApiResult<String> {
        self.record("clear_data");
        Ok("All data cleared successfully".to_string())
    }
}

fn three_students() -> serde_json::Value {
    json!({
        "students": [
            { "id": 3, "name": "Chitra Rao", "class": "10th A",
              "attendance": 90.0, "score": 90.0, "feeStatus": "Paid",
              "riskLevel": "low", "lastUpdated": "2024-11-15" },
            { "id": 1, "name": "Arjun Mehta", "class": "10th A",
              "attendance": 50.0, "score": 80.0, "feeStatus": "Paid",
              "riskLevel": "low", "lastUpdated": "2024-11-15" },
            { "id": 2, "name": "Bela Khan", "class": "11th Science",
              "attendance": 70.0, "score": 80.0, "feeStatus": "Paid",
              "riskLevel": "medium", "lastUpdated": "2024-11-15" }
        ],
        "statistics": {
            "total_students": 3,
            "filtered_count": 3,
            "risk_distribution": { "high": 1, "medium": 1, "low": 1 }
        }
    })
}

fn dashboard_with(api: Arc<FakeApi>, notifier: Arc<RecordingNotifier>) -> Dashboard {
    Dashboard::new(api, notifier, RuleTable::STANDARD, StalePolicy::Apply)
}

#[tokio::test]
async fn live_students_are_ordered_and_counted() {
    let api = Arc::new(FakeApi::serving(three_students()));
    let notifier = Arc::new(RecordingNotifier::default());
    let dashboard = dashboard_with(api.clone(), notifier.clone());

    assert!(dashboard.refresh(&StudentQuery::default()).await.is_some());
    let view = dashboard.view(&StudentQuery::default());

    assert_eq!(view.source, DataSource::Live);
    let levels: Vec<RiskLevel> = view.students.iter().map(|student| student.level()).collect();
    assert_eq!(levels, vec![RiskLevel::High, RiskLevel::Medium, RiskLevel::Low]);
    assert_eq!(view.students[0].record.name, "Arjun Mehta");
    assert_eq!(view.statistics.distribution.high, 1);
    assert_eq!(view.statistics.distribution.medium, 1);
    assert_eq!(view.statistics.distribution.low, 1);
    assert_eq!(notifier.notifications()[0].kind, NotificationKind::Success);
    assert_eq!(api.calls(), vec!["dashboard"]);
}

#[tokio::test]
async fn statistics_follow_the_filtered_students() {
    let api = Arc::new(FakeApi::serving(three_students()));
    let dashboard = dashboard_with(api, Arc::new(RecordingNotifier::default()));
    dashboard.refresh(&StudentQuery::default()).await;

    let view = dashboard.view(&StudentQuery {
        risk_filter: RiskFilter::Level(RiskLevel::High),
        ..StudentQuery::default()
    });

    assert_eq!(view.students.len(), 1);
    assert_eq!(view.statistics.total_count, 1);
    assert_eq!(view.statistics.attendance_average, 50.0);
    assert_eq!(view.by_class.len(), 1);
    assert_eq!(view.by_class[0].group, "10th A");
}

#[tokio::test]
async fn failed_fetch_shows_the_demonstration_dataset() {
    let api = Arc::new(FakeApi::unreachable());
    let notifier = Arc::new(RecordingNotifier::default());
    let dashboard = dashboard_with(api, notifier.clone());

    assert!(dashboard.refresh(&StudentQuery::default()).await.is_none());

    let state = dashboard.snapshot_state();
    assert!(state.data().is_none());
    assert!(!state.loading());
    assert_eq!(
        state.error().as_deref(),
        Some("Unable to reach the server. Check your connection and try again.")
    );

    let view = dashboard.view(&StudentQuery::default());
    assert_eq!(view.source, DataSource::Demo);
    assert_eq!(view.statistics.total_count, 8);
    assert_eq!(view.statistics.distribution.high, 2);
    assert_eq!(view.statistics.distribution.medium, 3);
    assert_eq!(view.statistics.distribution.low, 3);
    assert!(!view.trends.risk_trend.is_empty());

    let kinds: Vec<NotificationKind> = notifier
        .notifications()
        .into_iter()
        .map(|notification| notification.kind)
        .collect();
    assert_eq!(kinds, vec![NotificationKind::Error, NotificationKind::Info]);
}

#[tokio::test]
async fn malformed_students_are_dropped_individually() {
    let api = Arc::new(FakeApi::serving(json!({
        "students": [
            { "id": "s-1", "name": "Dev Nair", "class": "10th B",
              "attendance": 95.0, "score": 88.0, "feeStatus": "Unknown" },
            { "id": "s-2", "name": "Esha Paul", "class": "10th B",
              "attendance": 140.0, "score": 88.0, "feeStatus": "Paid" },
            { "id": "s-3", "name": "Farah Ali", "class": "10th B",
              "attendance": 82.0, "score": 77.0, "feeStatus": "paid" }
        ],
        "statistics": empty_statistics()
    })));
    let dashboard = dashboard_with(api, Arc::new(RecordingNotifier::default()));

    let snapshot = dashboard
        .refresh(&StudentQuery::default())
        .await
        .unwrap();
    assert_eq!(snapshot.rejected, 2);
    assert_eq!(snapshot.students.len(), 1);
    assert_eq!(snapshot.students[0].record.name, "Farah Ali");
    assert_eq!(snapshot.students[0].record.department, "General");
}

#[tokio::test]
async fn malformed_envelope_is_a_failure() {
    let api = Arc::new(FakeApi::serving(json!({ "students": "nope" })));
    let dashboard = dashboard_with(api, Arc::new(RecordingNotifier::default()));

    assert!(dashboard.refresh(&StudentQuery::default()).await.is_none());
    assert_eq!(
        dashboard.snapshot_state().error().as_deref(),
        Some("The server returned data in an unexpected format.")
    );
}

#[tokio::test]
async fn partial_upload_keeps_successful_files() {
    let dir = tempfile::tempdir().unwrap();
    let attendance = dir.path().join("attendance.csv");
    let fees = dir.path().join("fees.csv");
    let notes = dir.path().join("notes.txt");
    for path in [&attendance, &fees, &notes] {
        std::fs::write(path, "student_name,value\nArjun Mehta,1\n").unwrap();
    }

    let mut fake = FakeApi::serving(three_students());
    fake.upload = Ok(UploadResponse {
        message: "Processed 2 files".to_string(),
        results: vec![
            FileResult::Success {
                filename: "attendance.csv".to_string(),
                data_type: DataKind::Attendance,
                records_count: 1,
            },
            FileResult::Error {
                filename: "fees.csv".to_string(),
                error: "Missing required columns".to_string(),
            },
        ],
        summary: None,
    });
    let api = Arc::new(fake);
    let notifier = Arc::new(RecordingNotifier::default());
    let dashboard = dashboard_with(api.clone(), notifier.clone());

    let report = dashboard
        .upload(&[attendance, fees, notes], None)
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.ingested(), 1);
    assert_eq!(report.rejected(), 2);
    assert_eq!(report.outcomes[0].file_name(), "notes.txt");
    assert_eq!(
        api.uploaded.lock().unwrap().clone(),
        vec!["attendance.csv".to_string(), "fees.csv".to_string()]
    );

    let last = notifier.notifications().pop().unwrap();
    assert_eq!(last.kind, NotificationKind::Error);
    assert_eq!(last.message, "2 of 3 files could not be processed");
}

#[tokio::test]
async fn invalid_alert_never_reaches_the_server() {
    let api = Arc::new(FakeApi::serving(three_students()));
    let notifier = Arc::new(RecordingNotifier::default());
    let dashboard = dashboard_with(api.clone(), notifier.clone());

    let request = EmailAlertRequest::new(
        "1",
        "Arjun Mehta",
        AlertKind::Attendance,
        vec!["  ".to_string()],
        None,
        Priority::High,
    );
    assert_eq!(request, Err(AlertError::NoRecipients));

    assert!(dashboard.send_email_alert(request).await.is_none());
    assert_eq!(
        dashboard.alert_state().error().as_deref(),
        Some("no recipients specified")
    );
    assert!(!dashboard.alert_state().loading());
    assert!(api.calls().is_empty());
    assert_eq!(notifier.notifications()[0].kind, NotificationKind::Error);

    let request = EmailAlertRequest::new(
        "1",
        "Arjun Mehta",
        AlertKind::Attendance,
        vec!["guardian@example.com".to_string()],
        None,
        Priority::High,
    );
    let outcome = dashboard.send_email_alert(request).await.unwrap();
    assert_eq!(outcome.sent_count, 1);
    assert_eq!(dashboard.alert_state().error(), None);
    assert_eq!(api.calls(), vec!["send_email_alert"]);
}

#[tokio::test]
async fn clearing_data_returns_to_the_demonstration_dataset() {
    let api = Arc::new(FakeApi::serving(three_students()));
    let dashboard = dashboard_with(api, Arc::new(RecordingNotifier::default()));
    dashboard.refresh(&StudentQuery::default()).await;
    assert_eq!(dashboard.students().1, DataSource::Live);

    let message = dashboard.clear_data().await.unwrap();
    assert_eq!(message, "All data cleared successfully");
    assert_eq!(dashboard.students().1, DataSource::Demo);
}

#[tokio::test]
async fn risk_filter_uses_local_levels_not_the_servers() {
    let api = Arc::new(FakeApi::serving(json!({
        "students": [
            { "id": 7, "name": "Gita Bose", "class": "12th Arts",
              "attendance": 55.0, "score": 90.0, "feeStatus": "Paid", "riskLevel": "low" },
            { "id": 8, "name": "Hari Iyer", "class": "12th Arts",
              "attendance": 95.0, "score": 90.0, "feeStatus": "Paid", "riskLevel": "high" }
        ],
        "statistics": empty_statistics()
    })));
    let dashboard = dashboard_with(api.clone(), Arc::new(RecordingNotifier::default()));
    let query = StudentQuery {
        risk_filter: RiskFilter::Level(RiskLevel::High),
        limit: Some(5),
        ..StudentQuery::default()
    };

    dashboard.refresh(&query).await;
    let view = dashboard.view(&query);

    assert_eq!(view.students.len(), 1);
    assert_eq!(view.students[0].record.name, "Gita Bose");
    let sent = api.filters();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].query_pairs().iter().all(|(key, _)| *key != "risk_filter"));
    assert_eq!(sent[0].limit, Some(DEFAULT_FETCH_LIMIT));
}

#[tokio::test]
async fn local_limit_applies_after_local_ordering() {
    let mut students: Vec<serde_json::Value> = (0..4)
        .map(|n| {
            json!({ "id": n, "name": format!("Steady {n}"), "class": "10th A",
                    "attendance": 92.0, "score": 85.0, "feeStatus": "Paid" })
        })
        .collect();
    students.push(json!({ "id": 99, "name": "Ira Das", "class": "10th A",
                          "attendance": 40.0, "score": 85.0, "feeStatus": "Paid" }));
    let api = Arc::new(FakeApi::serving(json!({
        "students": students,
        "statistics": empty_statistics()
    })));
    let dashboard = dashboard_with(api.clone(), Arc::new(RecordingNotifier::default()))
        .with_fetch_limit(50);
    let query = StudentQuery {
        limit: Some(1),
        ..StudentQuery::default()
    };

    dashboard.refresh(&query).await;
    let view = dashboard.view(&query);

    assert_eq!(view.students.len(), 1);
    assert_eq!(view.students[0].record.name, "Ira Das");
    assert_eq!(api.filters()[0].limit, Some(50));
}

#[tokio::test]
async fn class_filter_is_still_sent_to_the_server() {
    let api = Arc::new(FakeApi::serving(three_students()));
    let dashboard = dashboard_with(api.clone(), Arc::new(RecordingNotifier::default()));
    let query = StudentQuery {
        class_filter: "11th Science".parse().unwrap(),
        ..StudentQuery::default()
    };

    dashboard.refresh(&query).await;
    let view = dashboard.view(&query);

    assert_eq!(view.students.len(), 1);
    assert_eq!(
        api.filters()[0].class_filter.as_deref(),
        Some("11th Science")
    );
}

#[tokio::test]
async fn overlapping_refreshes_discard_the_stale_response() {
    let mut fake = FakeApi::serving(three_students());
    fake.stale_dashboard = Some(json!({
        "students": [
            { "id": 5, "name": "Old Entry", "class": "9th C",
              "attendance": 90.0, "score": 90.0, "feeStatus": "Paid" }
        ],
        "statistics": empty_statistics()
    }));
    let api = Arc::new(fake);
    let notifier = Arc::new(RecordingNotifier::default());
    let dashboard = Dashboard::new(
        api.clone(),
        notifier.clone(),
        RuleTable::STANDARD,
        StalePolicy::Discard,
    );
    let query = StudentQuery::default();

    let (older, newer) = tokio::join!(dashboard.refresh(&query), dashboard.refresh(&query));

    assert!(older.is_none());
    assert_eq!(newer.unwrap().students.len(), 3);
    let snapshot = dashboard.snapshot_state().data().unwrap();
    assert_eq!(snapshot.students.len(), 3);
    assert!(!dashboard.snapshot_state().loading());
    assert_eq!(notifier.notifications().len(), 1);
    assert_eq!(api.calls(), vec!["dashboard", "dashboard"]);
}

#[tokio::test]
async fn overlapping_refreshes_apply_the_last_response_by_default() {
    let mut fake = FakeApi::serving(three_students());
    fake.stale_dashboard = Some(json!({
        "students": [
            { "id": 5, "name": "Old Entry", "class": "9th C",
              "attendance": 90.0, "score": 90.0, "feeStatus": "Paid" }
        ],
        "statistics": empty_statistics()
    }));
    let dashboard = dashboard_with(Arc::new(fake), Arc::new(RecordingNotifier::default()));
    let query = StudentQuery::default();

    tokio::join!(dashboard.refresh(&query), dashboard.refresh(&query));

    let snapshot = dashboard.snapshot_state().data().unwrap();
    assert_eq!(snapshot.students[0].record.name, "Old Entry");
}

#[tokio::test]
async fn upload_with_only_unsupported_files_fails() {
    let dir = tempfile::tempdir().unwrap();
    let notes = dir.path().join("notes.txt");
    std::fs::write(&notes, "not a spreadsheet").unwrap();

    let api = Arc::new(FakeApi::serving(three_students()));
    let notifier = Arc::new(RecordingNotifier::default());
    let dashboard = dashboard_with(api.clone(), notifier.clone());

    assert!(dashboard.upload(&[notes], None).await.is_none());

    let state = dashboard.upload_state();
    assert!(state.data().is_none());
    assert!(!state.loading());
    let error = state.error().unwrap();
    assert!(error.starts_with("1 of 1 files could not be processed"));
    assert!(error.contains("notes.txt"));

    let kinds: Vec<NotificationKind> = notifier
        .notifications()
        .into_iter()
        .map(|notification| notification.kind)
        .collect();
    assert_eq!(kinds, vec![NotificationKind::Error]);
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn student_detail_is_reassessed_with_local_rules() {
    let mut fake = FakeApi::serving(three_students());
    fake.student = Some(json!({
        "student_data": { "name": "Arjun Mehta" },
        "risk_analysis": {
            "attendance_analysis": {
                "percentage": 50.0, "total_days": 10, "present_days": 5, "absent_days": 5
            },
            "performance_analysis": { "average": 80.0, "total_tests": 1 },
            "fees_analysis": { "status": "Paid", "overdue_months": 0 },
            "intervention_suggestions": [
                { "category": "Attendance", "action": "Call guardian", "priority": "high" }
            ]
        }
    }));
    let dashboard = dashboard_with(Arc::new(fake), Arc::new(RecordingNotifier::default()));

    let student = dashboard.student_detail("1").await.unwrap();
    assert_eq!(student.detail.student_data.name, "Arjun Mehta");
    let assessment = student.assessment.unwrap();
    assert_eq!(assessment.risk_level, RiskLevel::High);
    assert_eq!(assessment.risk_factors.attendance.level, RiskLevel::High);
    assert_eq!(student.detail.risk_analysis.intervention_suggestions.len(), 1);

    let missing = dashboard_with(
        Arc::new(FakeApi::serving(three_students())),
        Arc::new(RecordingNotifier::default()),
    );
    let error = missing.student_detail("42").await.unwrap_err();
    assert_eq!(error.user_message(), "Student not found");
}

#[tokio::test]
async fn alert_topic_follows_the_worst_factor() {
    let api = Arc::new(FakeApi::serving(three_students()));
    let dashboard = dashboard_with(api, Arc::new(RecordingNotifier::default()));
    dashboard.refresh(&StudentQuery::default()).await;

    assert_eq!(dashboard.alert_kind_for("1"), AlertKind::Attendance);
    assert_eq!(dashboard.alert_kind_for("3"), AlertKind::General);
    assert_eq!(dashboard.alert_kind_for("404"), AlertKind::General);

    let alerts = dashboard.local_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].student_id, "1");
}
