//! Assistant aggregate: a named, versioned binding of a graph to
//! default configuration.

use super::Metadata;
use crate::graph::RunnableConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named, versioned binding of a graph to a default configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assistant {
    /// Unique assistant identifier
    pub assistant_id: Uuid,

    /// Name of the installed graph this assistant executes
    pub graph_id: String,

    /// Current version number (>= 1); every version has a matching
    /// [`AssistantVersion`] record
    pub version: u32,

    /// Default run configuration
    #[serde(default)]
    pub config: RunnableConfig,

    /// Opaque metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Display name, defaulting to `graph_id`
    pub name: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Assistant {
    /// Create a version-1 assistant
    pub fn new(
        assistant_id: Uuid,
        graph_id: impl Into<String>,
        config: RunnableConfig,
        metadata: Metadata,
        name: Option<String>,
    ) -> Self {
        let graph_id = graph_id.into();
        let now = Utc::now();
        Self {
            assistant_id,
            name: name.unwrap_or_else(|| graph_id.clone()),
            graph_id,
            version: 1,
            config,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Snapshot the current state as an immutable version record
    pub fn snapshot(&self) -> AssistantVersion {
        AssistantVersion {
            assistant_id: self.assistant_id,
            version: self.version,
            graph_id: self.graph_id.clone(),
            config: self.config.clone(),
            metadata: self.metadata.clone(),
            name: self.name.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Immutable snapshot of an assistant at one version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantVersion {
    /// Owning assistant
    pub assistant_id: Uuid,

    /// Version number
    pub version: u32,

    /// Graph bound at this version
    pub graph_id: String,

    /// Configuration at this version
    #[serde(default)]
    pub config: RunnableConfig,

    /// Metadata at this version
    #[serde(default)]
    pub metadata: Metadata,

    /// Name at this version
    pub name: String,

    /// When this version was recorded
    pub created_at: DateTime<Utc>,
}
