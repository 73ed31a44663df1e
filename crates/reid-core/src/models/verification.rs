//! Human-review queue entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Review priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationPriority {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for VerificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for VerificationPriority {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid verification priority: {}", s)),
        }
    }
}

/// Review status. Entries are always created `Pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, VerificationStatus::Pending)
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for VerificationStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Invalid verification status: {}", s)),
        }
    }
}

/// How the observation entered the system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationSource {
    /// Fresh user submission.
    #[default]
    UserUpload,
    /// Automatic re-scan of an existing record.
    AutoDiscovery,
}

impl std::fmt::Display for VerificationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserUpload => write!(f, "user_upload"),
            Self::AutoDiscovery => write!(f, "auto_discovery"),
        }
    }
}

impl std::str::FromStr for VerificationSource {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user_upload" => Ok(Self::UserUpload),
            "auto_discovery" => Ok(Self::AutoDiscovery),
            _ => Err(format!("Invalid verification source: {}", s)),
        }
    }
}

/// Request to queue an entity for review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVerificationEntry {
    pub entity_type: String,
    pub entity_id: Uuid,
    pub investigation_id: Option<Uuid>,
    pub source: VerificationSource,
    pub priority: VerificationPriority,
    pub notes: Option<String>,
}

/// Queued review item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationEntry {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub investigation_id: Option<Uuid>,
    pub source: VerificationSource,
    pub priority: VerificationPriority,
    pub status: VerificationStatus,
    /// Always true: there is no auto-approval path.
    pub requires_review: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VerificationEntry {
    /// Materialize a request as a fresh pending entry.
    pub fn pending(id: Uuid, req: NewVerificationEntry) -> Self {
        Self {
            id,
            entity_type: req.entity_type,
            entity_id: req.entity_id,
            investigation_id: req.investigation_id,
            source: req.source,
            priority: req.priority,
            status: VerificationStatus::Pending,
            requires_review: true,
            notes: req.notes,
            created_at: Utc::now(),
        }
    }
}
