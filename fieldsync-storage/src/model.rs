//! Offline entities and the sync envelope they share.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Current wall clock in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generates a locally unique record id.
pub fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ── Collections ──────────────────────────────────────────────────

/// The three entity collections held by the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Images,
    Analyses,
    Projects,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Self::Images, Self::Analyses, Self::Projects];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Images => "images",
            Self::Analyses => "analyses",
            Self::Projects => "projects",
        }
    }

    /// Entity kind stored in this collection.
    pub fn kind(self) -> EntityKind {
        match self {
            Self::Images => EntityKind::Image,
            Self::Analyses => EntityKind::Analysis,
            Self::Projects => EntityKind::Project,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "images" => Ok(Self::Images),
            "analyses" => Ok(Self::Analyses),
            "projects" => Ok(Self::Projects),
            other => Err(format!("unknown collection: {other}")),
        }
    }
}

/// Entity type of a queued intent. Also the `{type}` path segment of the
/// generic backend endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Image,
    Analysis,
    Project,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Analysis => "analysis",
            Self::Project => "project",
        }
    }

    pub fn collection(self) -> Collection {
        match self {
            Self::Image => Collection::Images,
            Self::Analysis => Collection::Analyses,
            Self::Project => Collection::Projects,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "analysis" => Ok(Self::Analysis),
            "project" => Ok(Self::Project),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// What a queued intent asks the backend to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    Create,
    Update,
    Delete,
}

impl QueueAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for QueueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown queue action: {other}")),
        }
    }
}

// ── Sync envelope ────────────────────────────────────────────────

/// Fields every syncable entity carries.
///
/// `synced` is true only after a backend acknowledgment since the last
/// local mutation; `synced_at` is set whenever `synced` is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEnvelope {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub synced: bool,
    #[serde(default)]
    pub synced_at: Option<i64>,
    #[serde(default)]
    pub timestamp: i64,
    /// Local mutation counter. Never leaves the device.
    #[serde(skip)]
    pub version: i64,
}

impl SyncEnvelope {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// `synced` implies `synced_at`.
    pub fn is_consistent(&self) -> bool {
        !self.synced || self.synced_at.is_some()
    }
}

/// Values of the secondary-index columns for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexKeys {
    pub project_id: Option<String>,
    pub image_id: Option<String>,
}

/// Typed secondary-index lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexQuery {
    ProjectId(String),
    ImageId(String),
    Synced(bool),
}

impl IndexQuery {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProjectId(_) => "projectId",
            Self::ImageId(_) => "imageId",
            Self::Synced(_) => "synced",
        }
    }

    /// Whether the index exists on the given collection.
    pub fn supported_on(&self, collection: Collection) -> bool {
        match self {
            Self::ProjectId(_) => {
                matches!(collection, Collection::Images | Collection::Analyses)
            }
            Self::ImageId(_) => collection == Collection::Analyses,
            Self::Synced(_) => true,
        }
    }
}

/// An entity the local store can persist and the sync engine can push.
pub trait Syncable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn envelope(&self) -> &SyncEnvelope;
    fn envelope_mut(&mut self) -> &mut SyncEnvelope;

    fn id(&self) -> &str {
        &self.envelope().id
    }

    fn index_keys(&self) -> IndexKeys {
        IndexKeys::default()
    }

    /// Bytes attributed to this record in storage stats.
    fn size_bytes(&self) -> u64 {
        0
    }

    /// Binary payload kept outside the JSON document.
    fn blob(&self) -> Option<&[u8]> {
        None
    }

    fn take_blob(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn attach_blob(&mut self, _blob: Vec<u8>) {}

    /// Called on create and on every local edit.
    fn on_local_mutation(&mut self, _now: i64) {}
}

// ── Entities ─────────────────────────────────────────────────────

/// A captured or uploaded photo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(flatten)]
    pub envelope: SyncEnvelope,
    pub filename: String,
    #[serde(skip)]
    pub blob: Vec<u8>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Capture location, error details and anything else the UI attaches.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Image {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, blob: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            size: blob.len() as u64,
            mime_type: mime_type.into(),
            blob,
            ..Self::default()
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

impl Syncable for Image {
    const COLLECTION: Collection = Collection::Images;

    fn envelope(&self) -> &SyncEnvelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut SyncEnvelope {
        &mut self.envelope
    }

    fn index_keys(&self) -> IndexKeys {
        IndexKeys {
            project_id: self.project_id.clone(),
            image_id: None,
        }
    }

    fn size_bytes(&self) -> u64 {
        self.size.max(self.blob.len() as u64)
    }

    fn blob(&self) -> Option<&[u8]> {
        Some(&self.blob)
    }

    fn take_blob(&mut self) -> Option<Vec<u8>> {
        Some(std::mem::take(&mut self.blob))
    }

    fn attach_blob(&mut self, blob: Vec<u8>) {
        self.blob = blob;
    }
}

/// One finding in an analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub estimated_cost: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

/// Structured findings returned by the vision backend for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    #[serde(flatten)]
    pub envelope: SyncEnvelope,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub scene_type: String,
    #[serde(default)]
    pub scene_overview: String,
    #[serde(default)]
    pub simplified_data: Vec<LineItem>,
    #[serde(default)]
    pub narrative_report: String,
    #[serde(default)]
    pub key_observations: Vec<String>,
    #[serde(default)]
    pub estimated_property_value: Option<ValueRange>,
}

impl Analysis {
    pub fn for_image(image_id: impl Into<String>) -> Self {
        Self {
            image_id: Some(image_id.into()),
            ..Self::default()
        }
    }
}

impl Syncable for Analysis {
    const COLLECTION: Collection = Collection::Analyses;

    fn envelope(&self) -> &SyncEnvelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut SyncEnvelope {
        &mut self.envelope
    }

    fn index_keys(&self) -> IndexKeys {
        IndexKeys {
            project_id: self.project_id.clone(),
            image_id: self.image_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(flatten)]
    pub envelope: SyncEnvelope,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub last_modified: i64,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Syncable for Project {
    const COLLECTION: Collection = Collection::Projects;

    fn envelope(&self) -> &SyncEnvelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut SyncEnvelope {
        &mut self.envelope
    }

    fn on_local_mutation(&mut self, now: i64) {
        self.last_modified = now;
    }
}

// ── Queue ────────────────────────────────────────────────────────

/// A pending intent with no entity row behind it (or an opaque payload).
///
/// Immutable once enqueued except for `retry_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub action: QueueAction,
    pub data: Value,
    pub timestamp: i64,
    pub retry_count: u32,
}

impl QueueItem {
    /// The local entity id this intent refers to, if its payload names one.
    pub fn target_id(&self) -> Option<&str> {
        self.data
            .get("id")
            .or_else(|| self.data.get("offlineId"))
            .and_then(Value::as_str)
    }
}

// ── Aggregates ───────────────────────────────────────────────────

/// Everything still waiting for a backend acknowledgment.
#[derive(Debug, Clone, Default)]
pub struct UnsyncedItems {
    pub projects: Vec<Project>,
    pub images: Vec<Image>,
    pub analyses: Vec<Analysis>,
    pub queue: Vec<QueueItem>,
}

impl UnsyncedItems {
    pub fn len(&self) -> usize {
        self.projects.len() + self.images.len() + self.analyses.len() + self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStats {
    pub count: u64,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCount {
    pub count: u64,
}

/// Record counts across every collection, synced or not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub images: ImageStats,
    pub analyses: CollectionCount,
    pub projects: CollectionCount,
    pub queue: CollectionCount,
}

/// Unsynced records per collection plus the queue length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCounts {
    pub projects: u64,
    pub images: u64,
    pub analyses: u64,
    pub queue: u64,
}

impl PendingCounts {
    pub fn total(&self) -> u64 {
        self.projects + self.images + self.analyses + self.queue
    }
}
