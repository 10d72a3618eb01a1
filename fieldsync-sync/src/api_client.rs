//! HTTP client for the analysis backend's sync endpoints.
//!
//! Every push tags the payload with the record's local id as `offlineId` so
//! the backend can correlate retries of the same record. Uses reqwest with
//! JSON bodies, and multipart for image uploads.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::types::HealthStatus;
use async_trait::async_trait;
use fieldsync_storage::{Analysis, Image, Project, QueueAction, QueueItem, Syncable};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// The backend operations the sync engine needs.
///
/// Implementations return `Ok(())` only on a 2xx acknowledgment.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    async fn push_project(&self, project: &Project) -> SyncResult<()>;
    async fn push_image(&self, image: &Image) -> SyncResult<()>;
    async fn push_analysis(&self, analysis: &Analysis) -> SyncResult<()>;
    async fn dispatch_queue_item(&self, item: &QueueItem) -> SyncResult<()>;
}

/// reqwest-backed [`SyncBackend`].
pub struct BackendClient {
    client: Client,
    config: SyncConfig,
}

impl BackendClient {
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Manual reachability check. Never polled by the engine.
    pub async fn health(&self) -> SyncResult<HealthStatus> {
        let resp = self
            .authorize(self.client.get(self.url("/health")))
            .send()
            .await?;
        Ok(check_status("/health", resp).await?.json().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url(), path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn post_json(&self, path: &str, body: &impl Serialize) -> SyncResult<()> {
        let resp = self
            .authorize(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await?;
        check_status(path, resp).await?;
        debug!("POST {path} acknowledged");
        Ok(())
    }
}

#[async_trait]
impl SyncBackend for BackendClient {
    async fn push_project(&self, project: &Project) -> SyncResult<()> {
        self.post_json("/sync/project", &with_offline_id(project)?)
            .await
    }

    async fn push_image(&self, image: &Image) -> SyncResult<()> {
        let mime = if image.mime_type.is_empty() {
            "application/octet-stream"
        } else {
            image.mime_type.as_str()
        };
        let file = Part::bytes(image.blob.clone())
            .file_name(image.filename.clone())
            .mime_str(mime)?;

        let mut form = Form::new()
            .part("file", file)
            .text("metadata", serde_json::to_string(&image.metadata)?)
            .text("offlineId", image.id().to_string());
        if let Some(project_id) = &image.project_id {
            form = form.text("projectId", project_id.clone());
        }

        let resp = self
            .authorize(self.client.post(self.url("/sync/image")))
            .multipart(form)
            .send()
            .await?;
        check_status("/sync/image", resp).await?;
        debug!("uploaded image {} ({} bytes)", image.id(), image.blob.len());
        Ok(())
    }

    async fn push_analysis(&self, analysis: &Analysis) -> SyncResult<()> {
        self.post_json("/sync/analysis", &with_offline_id(analysis)?)
            .await
    }

    async fn dispatch_queue_item(&self, item: &QueueItem) -> SyncResult<()> {
        let path = format!("/sync/{}", item.kind);
        let url = self.url(&path);
        let req = match item.action {
            QueueAction::Delete => self.client.delete(&url),
            QueueAction::Create | QueueAction::Update => self.client.post(&url),
        };

        let resp = self.authorize(req).json(&item.data).send().await?;
        check_status(&path, resp).await?;
        debug!("{} {path} acknowledged for queue item {}", item.action, item.id);
        Ok(())
    }
}

/// Serializes a record and adds its local id as `offlineId`.
fn with_offline_id<T: Syncable>(record: &T) -> SyncResult<Value> {
    let mut body = serde_json::to_value(record)?;
    if let Some(obj) = body.as_object_mut() {
        obj.insert("offlineId".into(), Value::String(record.id().to_string()));
    }
    Ok(body)
}

/// Statuses that mean the payload itself was refused.
fn is_payload_rejection(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_REQUEST
            | StatusCode::CONFLICT
            | StatusCode::PAYLOAD_TOO_LARGE
            | StatusCode::UNPROCESSABLE_ENTITY
    )
}

async fn check_status(path: &str, resp: Response) -> SyncResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    if is_payload_rejection(status) {
        return Err(SyncError::MalformedPayload {
            status: status.as_u16(),
            body,
        });
    }
    Err(SyncError::Network(format!("{path} returned {status}")))
}
