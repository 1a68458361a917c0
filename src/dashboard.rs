use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alerts::{AlertKind, BulkAlertRequest, EmailAlertRequest, SmsAlertRequest};
use crate::api::{
    AlertHistory, AlertOutcome, BulkAlertOutcome, DashboardFilters, DashboardPayload, DataKind,
    DataPreview, DetectionSummary, HealthStatus, HistoryFilters, ServerStatistics,
    StudentRiskDetail, UploadStatus,
};
use crate::client::DashboardApi;
use crate::error::{AlertError, ApiError};
use crate::fallback;
use crate::filter::{self, StudentQuery};
use crate::models::{AssessedStudent, RiskAssessment, RiskLevel};
use crate::request::{Notification, Notifier, SharedRequest, StalePolicy};
use crate::risk::{self, AssessmentBatch, RiskAlert};
use crate::rules::RuleTable;
use crate::stats::{self, CohortStatistics, GroupKey, GroupSummary, Trends};
use crate::upload::{self, FileOutcome, UploadReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    Demo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSnapshot {
    pub students: Vec<AssessedStudent>,
    pub server_statistics: ServerStatistics,
    pub trends: Trends,
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub source: DataSource,
    pub students: Vec<AssessedStudent>,
    pub statistics: CohortStatistics,
    pub by_class: Vec<GroupSummary>,
    pub by_department: Vec<GroupSummary>,
    pub trends: Trends,
}

/// Rows requested from the backend before any local filtering. Risk level
/// and row limits are never forwarded, so this only caps the population.
pub const DEFAULT_FETCH_LIMIT: usize = 1000;

pub struct Dashboard {
    api: Arc<dyn DashboardApi>,
    notifier: Arc<dyn Notifier>,
    rules: RuleTable,
    fetch_limit: usize,
    snapshot: SharedRequest<DashboardSnapshot>,
    upload: SharedRequest<UploadReport>,
    detection: SharedRequest<DetectionSummary>,
    alert: SharedRequest<AlertOutcome>,
    bulk_alert: SharedRequest<BulkAlertOutcome>,
}

impl Dashboard {
    pub fn new(
        api: Arc<dyn DashboardApi>,
        notifier: Arc<dyn Notifier>,
        rules: RuleTable,
        policy: StalePolicy,
    ) -> Self {
        Self {
            api,
            notifier,
            rules,
            fetch_limit: DEFAULT_FETCH_LIMIT,
            snapshot: SharedRequest::new(policy),
            upload: SharedRequest::new(policy),
            detection: SharedRequest::new(policy),
            alert: SharedRequest::new(policy),
            bulk_alert: SharedRequest::new(policy),
        }
    }

    pub fn with_fetch_limit(mut self, fetch_limit: usize) -> Self {
        self.fetch_limit = fetch_limit;
        self
    }

    pub fn snapshot_state(&self) -> &SharedRequest<DashboardSnapshot> {
        &self.snapshot
    }

    pub fn upload_state(&self) -> &SharedRequest<UploadReport> {
        &self.upload
    }

    pub fn detection_state(&self) -> &SharedRequest<DetectionSummary> {
        &self.detection
    }

    pub fn alert_state(&self) -> &SharedRequest<AlertOutcome> {
        &self.alert
    }

    pub fn bulk_alert_state(&self) -> &SharedRequest<BulkAlertOutcome> {
        &self.bulk_alert
    }

    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.api.health().await
    }

    /// Backend query for `query`. Only the class filter is forwarded; risk
    /// filtering and row limits depend on local assessments and stay local.
    pub fn server_filters(&self, query: &StudentQuery) -> DashboardFilters {
        DashboardFilters {
            class_filter: query.class_filter.as_param().map(str::to_string),
            limit: Some(self.fetch_limit),
        }
    }

    pub async fn refresh(&self, query: &StudentQuery) -> Option<DashboardSnapshot> {
        let filters = self.server_filters(query);
        let api = Arc::clone(&self.api);
        let rules = self.rules;
        let call = async move {
            let payload = api.dashboard(&filters).await?;
            Ok::<_, ApiError>(assess_payload(payload, &rules))
        };

        let snapshot = self
            .snapshot
            .track("Dashboard refresh", self.notifier.as_ref(), call)
            .await;
        if self.snapshot.error().is_some() {
            self.notifier.notify(Notification::info(
                "Showing demonstration data while the server is unavailable",
            ));
        }
        snapshot
    }

    /// Live students when the last fetch succeeded, otherwise the
    /// demonstration dataset.
    pub fn students(&self) -> (Vec<AssessedStudent>, DataSource) {
        match self.snapshot.data() {
            Some(snapshot) => (snapshot.students, DataSource::Live),
            None => {
                let batch = risk::assess_all(&fallback::demo_students(), &self.rules);
                (batch.students, DataSource::Demo)
            }
        }
    }

    pub fn view(&self, query: &StudentQuery) -> DashboardView {
        let (students, source, trends) = match self.snapshot.data() {
            Some(snapshot) => (snapshot.students, DataSource::Live, snapshot.trends),
            None => {
                let batch = risk::assess_all(&fallback::demo_students(), &self.rules);
                (batch.students, DataSource::Demo, fallback::demo_trends())
            }
        };

        let visible = filter::apply(&students, query);
        DashboardView {
            source,
            statistics: stats::summarize(&visible),
            by_class: stats::summarize_by(&visible, GroupKey::Class),
            by_department: stats::summarize_by(&visible, GroupKey::Department),
            students: visible,
            trends,
        }
    }

    /// Alert topic for a student among the students currently shown, or
    /// `General` when the student is unknown.
    pub fn alert_kind_for(&self, student_id: &str) -> AlertKind {
        let (students, _) = self.students();
        students
            .iter()
            .find(|student| student.record.id == student_id.trim())
            .map(AlertKind::for_student)
            .unwrap_or(AlertKind::General)
    }

    /// High-risk alerts computed with the local rules over the shown students.
    pub fn local_alerts(&self) -> Vec<RiskAlert> {
        let (students, _) = self.students();
        risk::high_risk_alerts(&students)
    }

    pub async fn upload(
        &self,
        paths: &[PathBuf],
        data_type: Option<DataKind>,
    ) -> Option<UploadReport> {
        let prepared = upload::prepare(paths).await;

        if prepared.files.is_empty() {
            let reasons: Vec<&str> = prepared
                .rejected
                .iter()
                .filter_map(|outcome| match outcome {
                    FileOutcome::Rejected { reason, .. } => Some(reason.as_str()),
                    FileOutcome::Ingested { .. } => None,
                })
                .collect();
            warn!(files = prepared.rejected.len(), "no files left to upload");
            let message = if reasons.is_empty() {
                "No files selected for upload".to_string()
            } else {
                format!(
                    "{} of {} files could not be processed: {}",
                    reasons.len(),
                    reasons.len(),
                    reasons.join("; ")
                )
            };
            self.upload.reject(message, self.notifier.as_ref());
            return None;
        }

        let api = Arc::clone(&self.api);
        let local = prepared.rejected;
        let files = prepared.files;
        let call = async move {
            let response = api.upload(files, data_type).await?;
            Ok::<_, ApiError>(UploadReport::merge(local, Some(response)))
        };

        let report = self.upload.track("Upload", self.notifier.as_ref(), call).await;
        if let Some(report) = &report {
            info!(
                ingested = report.ingested(),
                rejected = report.rejected(),
                "upload finished"
            );
            if report.rejected() > 0 {
                self.notifier.notify(Notification::error(format!(
                    "{} of {} files could not be processed",
                    report.rejected(),
                    report.outcomes.len()
                )));
            }
        }
        report
    }

    pub async fn upload_status(&self) -> Result<UploadStatus, ApiError> {
        self.api.upload_status().await
    }

    pub async fn data_preview(
        &self,
        kind: DataKind,
        limit: usize,
    ) -> Result<DataPreview, ApiError> {
        self.api.data_preview(kind, limit).await
    }

    pub async fn detect_risk(&self, refresh: bool) -> Option<DetectionSummary> {
        let api = Arc::clone(&self.api);
        let call = async move { api.detect_risk(refresh).await };
        self.detection
            .track("Risk detection", self.notifier.as_ref(), call)
            .await
    }

    /// Backend detail for one student with the risk recomputed locally.
    pub async fn student_detail(&self, student_id: &str) -> Result<StudentDetail, ApiError> {
        let detail = self.api.student_risk(student_id).await?;
        let assessment = match detail.local_assessment(&self.rules) {
            Ok(assessment) => Some(assessment),
            Err(reason) => {
                warn!(student_id, %reason, "cannot assess student detail locally");
                None
            }
        };
        Ok(StudentDetail { detail, assessment })
    }

    pub async fn send_email_alert(
        &self,
        request: Result<EmailAlertRequest, AlertError>,
    ) -> Option<AlertOutcome> {
        let request = match request {
            Ok(request) => request,
            Err(invalid) => {
                self.alert.reject(invalid.to_string(), self.notifier.as_ref());
                return None;
            }
        };

        let api = Arc::clone(&self.api);
        let call = async move { api.send_email_alert(&request).await };
        self.alert.track("Email alert", self.notifier.as_ref(), call).await
    }

    pub async fn send_sms_alert(
        &self,
        request: Result<SmsAlertRequest, AlertError>,
    ) -> Option<AlertOutcome> {
        let request = match request {
            Ok(request) => request,
            Err(invalid) => {
                self.alert.reject(invalid.to_string(), self.notifier.as_ref());
                return None;
            }
        };

        let api = Arc::clone(&self.api);
        let call = async move { api.send_sms_alert(&request).await };
        self.alert.track("SMS alert", self.notifier.as_ref(), call).await
    }

    pub async fn send_bulk_alerts(
        &self,
        request: Result<BulkAlertRequest, AlertError>,
    ) -> Option<BulkAlertOutcome> {
        let request = match request {
            Ok(request) => request,
            Err(invalid) => {
                self.bulk_alert
                    .reject(invalid.to_string(), self.notifier.as_ref());
                return None;
            }
        };

        let api = Arc::clone(&self.api);
        let call = async move { api.send_bulk_alerts(&request).await };
        self.bulk_alert
            .track("Bulk alerts", self.notifier.as_ref(), call)
            .await
    }

    pub async fn alerts_history(&self, filters: &HistoryFilters) -> Result<AlertHistory, ApiError> {
        self.api.alerts_history(filters).await
    }

    pub async fn clear_data(&self) -> Result<String, ApiError> {
        let message = self.api.clear_data().await?;
        self.snapshot.reset();
        Ok(message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentDetail {
    pub detail: StudentRiskDetail,
    pub assessment: Option<RiskAssessment>,
}

/// Converts a backend payload into assessed students, recomputing every
/// assessment locally.
pub fn assess_payload(payload: DashboardPayload, rules: &RuleTable) -> DashboardSnapshot {
    let today = Utc::now().date_naive();
    let mut records = Vec::with_capacity(payload.students.len());
    let mut reported_levels: HashMap<String, RiskLevel> = HashMap::new();
    let mut rejected = 0usize;

    for wire in payload.students {
        if let Some(level) = wire.risk_level.as_deref().and_then(|level| level.parse().ok()) {
            reported_levels.insert(wire.id.clone(), level);
        }
        let id = wire.id.clone();
        match wire.into_record(today) {
            Ok(record) => records.push(record),
            Err(reason) => {
                warn!(student_id = %id, %reason, "dropping malformed student");
                rejected += 1;
            }
        }
    }

    let AssessmentBatch {
        students,
        rejected: invalid,
    } = risk::assess_all(&records, rules);
    rejected += invalid.len();

    for student in &students {
        match reported_levels.get(&student.record.id) {
            Some(reported) if *reported != student.level() => debug!(
                student_id = %student.record.id,
                server = %reported,
                local = %student.level(),
                "server risk level differs from local rules"
            ),
            _ => {}
        }
    }

    DashboardSnapshot {
        students,
        server_statistics: payload.statistics,
        trends: payload.trends,
        rejected,
    }
}
