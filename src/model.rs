//! Domain types stored by the engine.
//!
//! The engine treats most fields as opaque payload: it preserves them,
//! round-trips them through the cache and the remote document, and enforces
//! only the referential rules between entities (job → company,
//! match → job). Validation of the fields themselves belongs to the
//! application layer.
//!
//! Entity ids are plain integers, unique within one user's partition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's identity and skills record.
///
/// At most one profile exists per user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile id, unique within the user's partition.
    pub id: i64,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Current or desired role title.
    pub title: String,
    /// Free-form location string.
    pub location: String,
    /// Skills, in the order the user listed them.
    pub skills: Vec<String>,
    /// Free-form summary paragraph.
    pub summary: String,
}

/// A company the user is tracking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Company {
    /// Company id, unique within the user's partition.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Company website, if known.
    #[serde(default)]
    pub website: String,
    /// Free-form industry label.
    #[serde(default)]
    pub industry: String,
    /// User notes.
    #[serde(default)]
    pub notes: String,
}

impl Company {
    /// Creates a company with just an id and a name.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            website: String::new(),
            industry: String::new(),
            notes: String::new(),
        }
    }
}

/// Application state of a tracked job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Saved but not yet applied to.
    #[default]
    Interested,
    /// Application submitted.
    Applied,
    /// In the interview pipeline.
    Interviewing,
    /// Offer received.
    Offered,
    /// Application closed without an offer.
    Rejected,
}

/// A job posting tracked under a company.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job id, unique within the user's partition.
    pub id: i64,
    /// Id of the owning [`Company`].
    pub company_id: i64,
    /// Posting title.
    pub title: String,
    /// Posting body.
    #[serde(default)]
    pub description: String,
    /// Free-form location string.
    #[serde(default)]
    pub location: String,
    /// Source URL of the posting.
    #[serde(default)]
    pub url: String,
    /// Application state.
    #[serde(default)]
    pub status: JobStatus,
    /// User notes.
    #[serde(default)]
    pub notes: String,
}

impl Job {
    /// Creates a job with just an id, owning company, and title.
    pub fn new(id: i64, company_id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            company_id,
            title: title.into(),
            description: String::new(),
            location: String::new(),
            url: String::new(),
            status: JobStatus::default(),
            notes: String::new(),
        }
    }
}

/// Outcome of matching the user's profile against a job.
///
/// Produced by the match pipeline; the engine only stores and orders it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Match id, unique within the user's partition.
    pub id: i64,
    /// Id of the matched [`Job`].
    pub job_id: i64,
    /// Match score in `[0.0, 1.0]`.
    pub score: f64,
    /// Points in the candidate's favor.
    #[serde(default)]
    pub strengths: Vec<String>,
    /// Gaps identified against the posting.
    #[serde(default)]
    pub weaknesses: Vec<String>,
    /// When the match was computed.
    pub matched_at: DateTime<Utc>,
}

impl MatchResult {
    /// Creates a match result scored now.
    pub fn new(id: i64, job_id: i64, score: f64) -> Self {
        Self {
            id,
            job_id,
            score,
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            matched_at: Utc::now(),
        }
    }
}

/// The per-user payload carried inside a [`UserDocument`].
///
/// Lists keep their in-memory order; the codec never reorders them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserDataCore {
    /// The user's profile, if one has been saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    /// Tracked companies, in insertion order.
    #[serde(default)]
    pub companies: Vec<Company>,
    /// Tracked jobs, concatenated in company order.
    #[serde(default)]
    pub jobs: Vec<Job>,
    /// Match results, newest first.
    #[serde(default)]
    pub matches: Vec<MatchResult>,
}

/// The authoritative per-user snapshot uploaded to the remote backend.
///
/// On the wire this is a gzipped JSON object; `checksum` holds the
/// lowercase hex SHA-256 of the serialization with the field cleared.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserDocument {
    /// When the document was last encoded.
    pub updated_at: DateTime<Utc>,
    /// Integrity digest; empty for never-verified documents.
    #[serde(default)]
    pub checksum: String,
    /// The user's data.
    #[serde(default)]
    pub data: UserDataCore,
}

impl UserDocument {
    /// Creates an empty document stamped now.
    pub fn empty() -> Self {
        Self {
            updated_at: Utc::now(),
            checksum: String::new(),
            data: UserDataCore::default(),
        }
    }
}

/// Per-user sync bookkeeping, persisted alongside the cache partition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// The owning user id.
    pub user_id: String,
    /// Wall clock at the start of the last successful upload.
    pub last_sync: Option<DateTime<Utc>>,
    /// Whether cache state has diverged from the last uploaded document.
    pub is_dirty: bool,
}

impl SessionMetadata {
    /// Creates clean metadata for a user that has never synced.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            last_sync: None,
            is_dirty: false,
        }
    }
}
