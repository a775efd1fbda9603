//! Domain types shared by the store, service, runner, scheduler and API.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of job kinds driving every worker role (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Browser,
    Rules,
    Alert,
    SecretRefresh,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Browser => "browser",
            JobType::Rules => "rules",
            JobType::Alert => "alert",
            JobType::SecretRefresh => "secret_refresh",
        }
    }

    /// Channel name used for `LISTEN`/`NOTIFY` and for the in-process bridge.
    pub fn notify_channel(&self) -> String {
        format!("patrol_jobs_{}", self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "browser" => Ok(JobType::Browser),
            "rules" => Ok(JobType::Rules),
            "alert" => Ok(JobType::Alert),
            "secret_refresh" => Ok(JobType::SecretRefresh),
            other => Err(crate::Error::validation(format!("unknown job type: {other}"))),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(crate::Error::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// Central job row. Mirrors `spec.md` §3's Job entity exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,

    pub priority: i32,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,

    pub status: JobStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,

    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub session_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub source_id: Option<Uuid>,
    pub is_test: bool,

    pub lease_expires_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
}

/// Request body for `POST /api/jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub job_type: JobType,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub site_id: Option<Uuid>,
    #[serde(default)]
    pub source_id: Option<Uuid>,
    #[serde(default)]
    pub is_test: bool,
}

pub const DEFAULT_PRIORITY: i32 = 0;
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Pagination, normalized once centrally (`spec.md` §4.4).
#[derive(Debug, Clone, Copy)]
pub struct PageOpts {
    pub limit: i64,
    pub offset: i64,
}

impl PageOpts {
    pub const MIN_LIMIT: i64 = 1;
    pub const MAX_LIMIT: i64 = 1000;
    pub const DEFAULT_LIMIT: i64 = 50;

    /// Clamp a caller-requested page into `[1, 1000]`, defaulting to 50.
    pub fn normalize(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(Self::MIN_LIMIT, Self::MAX_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        Self { limit, offset }
    }
}

/// Per-status job counts for a given `JobType` (`Stats`, `spec.md` §4.2).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JobTypeStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

/// A periodic task materialized into jobs by the Scheduler (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub task_name: String,
    pub interval: Duration,
    pub last_queued_at: Option<DateTime<Utc>>,
    pub active_fire_key: Option<String>,
    pub active_fire_key_set_at: Option<DateTime<Utc>>,
    pub job_type: JobType,
    pub overrun_policy: OverrunPolicy,
    pub overrun_states: Vec<JobStatus>,
}

impl ScheduledTask {
    /// A task is due when it has never fired or its interval has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_queued_at {
            None => true,
            Some(last) => now - last >= self.interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrunPolicy {
    Skip,
    Queue,
}

/// Input to the Failure Notifier (`spec.md` §4.8).
#[derive(Debug, Clone, Serialize)]
pub struct JobFailurePayload {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub site_id: Option<Uuid>,
    pub site_name: Option<String>,
    pub scope: String,
    pub severity: Severity,
    pub error_class: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Critical
    }
}

/// Monotonic version counter for a cache namespace (`spec.md` §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheVersion(pub u64);
