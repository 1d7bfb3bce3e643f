//! Records and query shapes shared by the store, the cache and the server.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

use crate::error::Error;

/// Identifier of a row in the `tasks` table.
pub type TaskId = i64;

/// Identifier of a row in the `task_snapshots` table.
pub type SnapshotId = i64;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PER_PAGE: u32 = 10;
pub const MAX_PER_PAGE: u32 = 100;

/// Date format accepted in query strings and path segments.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ── Tasks ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(Error::Validation(format!(
                "priority must be 'low', 'medium', or 'high' (got '{value}')"
            ))),
        }
    }
}

/// A task as owned by the CRUD layer. The audit core only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub priority: Priority,
    pub created_on: NaiveDate,
    /// Owning user; a plain id, users live outside this crate.
    pub owner_id: Option<i64>,
}

/// Fields for inserting a task; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub priority: Priority,
    pub created_on: NaiveDate,
    pub owner_id: Option<i64>,
}

impl NewTask {
    /// An active, medium-priority task with no owner.
    pub fn active(name: impl Into<String>, created_on: NaiveDate) -> Self {
        Self {
            name: name.into(),
            description: None,
            active: true,
            priority: Priority::Medium,
            created_on,
            owner_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

// ── Snapshots ────────────────────────────────────────────────────────────────

/// An immutable record of a task's status on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub task_id: TaskId,
    pub logged_date: NaiveDate,
    pub status: bool,
}

/// Task columns joined onto a listed snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TaskSummary {
    pub task_name: String,
    pub description: Option<String>,
}

/// One row of a snapshot listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SnapshotRow {
    pub id: SnapshotId,
    pub task_id: TaskId,
    #[schema(value_type = String, format = Date)]
    pub date_logged: NaiveDate,
    pub status: bool,
    pub task: TaskSummary,
}

/// Full task columns joined onto a single snapshot lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TaskDetail {
    pub id: TaskId,
    pub task_name: String,
    pub description: Option<String>,
    pub priority: Priority,
    #[schema(value_type = String, format = Date)]
    pub created_at: NaiveDate,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SnapshotDetail {
    pub log_id: SnapshotId,
    #[schema(value_type = String, format = Date)]
    pub date_logged: NaiveDate,
    pub status: bool,
    pub task: TaskDetail,
}

// ── Paging ───────────────────────────────────────────────────────────────────

/// A validated snapshot listing query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    date: Option<NaiveDate>,
    page: u32,
    per_page: u32,
}

impl PageQuery {
    pub fn new(date: Option<NaiveDate>, page: u32, per_page: u32) -> Result<Self, Error> {
        if page == 0 {
            return Err(Error::Validation("page must be at least 1".to_owned()));
        }
        if per_page == 0 || per_page > MAX_PER_PAGE {
            return Err(Error::Validation(format!(
                "per_page must be between 1 and {MAX_PER_PAGE}"
            )));
        }
        Ok(Self {
            date,
            page,
            per_page,
        })
    }

    /// Build a query from raw request parameters, applying defaults.
    pub fn parse(date: Option<&str>, page: Option<u32>, per_page: Option<u32>) -> Result<Self, Error> {
        let date = match date.map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_date(raw)?),
        };
        Self::new(
            date,
            page.unwrap_or(DEFAULT_PAGE),
            per_page.unwrap_or(DEFAULT_PER_PAGE),
        )
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(raw: &str) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|_| Error::Validation(format!("invalid date '{raw}'; use YYYY-MM-DD")))
}

/// One page of snapshot history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Page {
    pub tasks: Vec<SnapshotRow>,
    pub total: u64,
    pub pages: u64,
    pub current_page: u32,
    pub per_page: u32,
}

impl Page {
    pub fn new(tasks: Vec<SnapshotRow>, total: u64, query: &PageQuery) -> Self {
        let per_page = u64::from(query.per_page());
        Self {
            tasks,
            total,
            pages: total.div_ceil(per_page),
            current_page: query.page(),
            per_page: query.per_page(),
        }
    }
}

// ── Identity ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    /// Any role this service does not know; never satisfies a role check.
    #[serde(other)]
    Other,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Other => "other",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The verified payload of a bearer token. Lives for one request.
///
/// Tokens minted by the legacy login service carry a numeric `user_id`
/// instead of `sub`; both decode into `subject`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "sub", alias = "user_id", deserialize_with = "int_or_string")]
    pub subject: String,
    pub username: String,
    pub role: Role,
    /// Unix seconds.
    #[serde(rename = "exp")]
    pub expiry: i64,
}

fn int_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Subject {
        Int(i64),
        Str(String),
    }

    Ok(match Subject::deserialize(deserializer)? {
        Subject::Int(id) => id.to_string(),
        Subject::Str(s) => s,
    })
}
