//! Client for the dashboard backend.
//!
//! Consumers receive an explicitly constructed [`DashboardApi`] so tests can
//! substitute an in-memory fake.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alerts::{BulkAlertRequest, EmailAlertRequest, SmsAlertRequest};
use crate::api::{
    AlertHistory, AlertOutcome, BulkAlertOutcome, DashboardFilters, DashboardPayload, DataKind,
    DataPreview, DetectionSummary, ErrorBody, HealthStatus, HistoryFilters, StudentRiskDetail,
    UploadFile, UploadResponse, UploadStatus,
};
use crate::error::ApiError;

pub type ApiResult<T> = Result<T, ApiError>;

#[async_trait]
pub trait DashboardApi: Send + Sync {
    async fn health(&self) -> ApiResult<HealthStatus>;

    async fn dashboard(&self, filters: &DashboardFilters) -> ApiResult<DashboardPayload>;

    async fn upload(
        &self,
        files: Vec<UploadFile>,
        data_type: Option<DataKind>,
    ) -> ApiResult<UploadResponse>;

    async fn upload_status(&self) -> ApiResult<UploadStatus>;

    async fn data_preview(&self, kind: DataKind, limit: usize) -> ApiResult<DataPreview>;

    async fn detect_risk(&self, refresh: bool) -> ApiResult<DetectionSummary>;

    async fn student_risk(&self, student_id: &str) -> ApiResult<StudentRiskDetail>;

    async fn send_email_alert(&self, request: &EmailAlertRequest) -> ApiResult<AlertOutcome>;

    async fn send_sms_alert(&self, request: &SmsAlertRequest) -> ApiResult<AlertOutcome>;

    async fn send_bulk_alerts(&self, request: &BulkAlertRequest) -> ApiResult<BulkAlertOutcome>;

    async fn alerts_history(&self, filters: &HistoryFilters) -> ApiResult<AlertHistory>;

    async fn clear_data(&self) -> ApiResult<String>;
}

#[derive(Clone)]
pub struct HttpDashboardApi {
    client: Client,
    base_url: String,
}

impl HttpDashboardApi {
    pub fn new(base_url: &str, timeout: Duration) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ApiError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `path` followed by `segment`, percent-encoded as a single path segment.
    fn url_with_segment(&self, path: &str, segment: &str) -> ApiResult<Url> {
        let mut url = Url::parse(&self.url(path))
            .map_err(|error| ApiError::Transport(error.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Transport(format!("{} cannot take a path", self.base_url)))?
            .push(segment);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let response = request
            .send()
            .await
            .map_err(|error| ApiError::Transport(error.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| ApiError::Transport(error.to_string()))?;

        debug!(status = status.as_u16(), bytes = body.len(), "dashboard api response");

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(ErrorBody::into_message)
                .unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|error| ApiError::Payload(error.to_string()))
    }
}

#[derive(Serialize)]
struct BulkAlertBody<'a> {
    student_ids: Vec<String>,
    recipients_per_student: &'a BTreeMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct MessageBody {
    message: String,
}

#[async_trait]
impl DashboardApi for HttpDashboardApi {
    async fn health(&self) -> ApiResult<HealthStatus> {
        self.send(self.client.get(self.url("/api/health"))).await
    }

    async fn dashboard(&self, filters: &DashboardFilters) -> ApiResult<DashboardPayload> {
        let request = self
            .client
            .get(self.url("/api/get-dashboard-data"))
            .query(&filters.query_pairs());
        self.send(request).await
    }

    async fn upload(
        &self,
        files: Vec<UploadFile>,
        data_type: Option<DataKind>,
    ) -> ApiResult<UploadResponse> {
        let mut form = Form::new();
        for file in files {
            form = form.part("files", Part::bytes(file.bytes).file_name(file.file_name));
        }
        if let Some(kind) = data_type {
            form = form.text("data_type", kind.as_str());
        }

        let request = self.client.post(self.url("/api/upload-data")).multipart(form);
        self.send(request).await
    }

    async fn upload_status(&self) -> ApiResult<UploadStatus> {
        self.send(self.client.get(self.url("/api/upload-status"))).await
    }

    async fn data_preview(&self, kind: DataKind, limit: usize) -> ApiResult<DataPreview> {
        let url = self.url_with_segment("/api/data-preview", kind.as_str())?;
        self.send(self.client.get(url).query(&[("limit", limit)])).await
    }

    async fn student_risk(&self, student_id: &str) -> ApiResult<StudentRiskDetail> {
        let url = self.url_with_segment("/api/student-risk", student_id.trim())?;
        self.send(self.client.get(url)).await
    }

    async fn detect_risk(&self, refresh: bool) -> ApiResult<DetectionSummary> {
        let request = self
            .client
            .post(self.url("/api/risk-detection"))
            .query(&[("refresh_data", refresh)]);
        self.send(request).await
    }

    async fn send_email_alert(&self, request: &EmailAlertRequest) -> ApiResult<AlertOutcome> {
        self.send(self.client.post(self.url("/api/send-alerts")).json(request))
            .await
    }

    async fn send_sms_alert(&self, request: &SmsAlertRequest) -> ApiResult<AlertOutcome> {
        self.send(self.client.post(self.url("/api/send-sms-alerts")).json(request))
            .await
    }

    async fn send_bulk_alerts(&self, request: &BulkAlertRequest) -> ApiResult<BulkAlertOutcome> {
        let mut query = vec![("alert_type", request.alert_type.to_string())];
        if let Some(message) = &request.custom_message {
            query.push(("custom_message", message.clone()));
        }
        let body = BulkAlertBody {
            student_ids: request.student_ids(),
            recipients_per_student: &request.recipients_per_student,
        };

        let request = self
            .client
            .post(self.url("/api/bulk-alerts"))
            .query(&query)
            .json(&body);
        self.send(request).await
    }

    async fn alerts_history(&self, filters: &HistoryFilters) -> ApiResult<AlertHistory> {
        let request = self
            .client
            .get(self.url("/api/alerts-history"))
            .query(&filters.query_pairs());
        self.send(request).await
    }

    async fn clear_data(&self) -> ApiResult<String> {
        let body: MessageBody = self
            .send(self.client.delete(self.url("/api/clear-data")))
            .await?;
        Ok(body.message)
    }
}
