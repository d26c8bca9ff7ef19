use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::{QueueError, QueueResult};

/// Allow-list of job kinds accepted by the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    DealAnalysis,
    DocumentAnalysis,
    StrategyChange,
    NoteAnalysis,
}

impl JobKind {
    pub fn all() -> &'static [JobKind] {
        &[
            Self::DealAnalysis,
            Self::DocumentAnalysis,
            Self::StrategyChange,
            Self::NoteAnalysis,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DealAnalysis => "deal_analysis",
            Self::DocumentAnalysis => "document_analysis",
            Self::StrategyChange => "strategy_change",
            Self::NoteAnalysis => "note_analysis",
        }
    }

    /// Queue a job of this kind lands in unless the caller overrides it
    pub fn default_queue(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| QueueError::UnknownJobKind(s.to_string()))
    }
}

/// Score (or re-score) a deal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DealAnalysisPayload {
    pub deal_id: String,
    #[serde(default)]
    pub force_refresh: bool,
}

/// Extract and analyse an uploaded document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentAnalysisPayload {
    pub document_id: String,
    #[serde(default)]
    pub deal_id: Option<String>,
}

/// Propagate an investment strategy change to affected deals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyChangePayload {
    pub strategy_id: String,
    #[serde(default)]
    pub changed_fields: Vec<String>,
}

/// Analyse a free-form note attached to a deal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoteAnalysisPayload {
    pub note_id: String,
    #[serde(default)]
    pub deal_id: Option<String>,
}

/// Typed job payload, one variant per [`JobKind`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum JobPayload {
    DealAnalysis(DealAnalysisPayload),
    DocumentAnalysis(DocumentAnalysisPayload),
    StrategyChange(StrategyChangePayload),
    NoteAnalysis(NoteAnalysisPayload),
}

impl JobPayload {
    /// Validate an untyped payload against the shape required by `kind`
    pub fn from_value(kind: JobKind, value: Value) -> QueueResult<Self> {
        let invalid = |err: serde_json::Error| QueueError::InvalidPayload {
            kind: kind.to_string(),
            reason: err.to_string(),
        };

        let payload = match kind {
            JobKind::DealAnalysis => Self::DealAnalysis(serde_json::from_value(value).map_err(invalid)?),
            JobKind::DocumentAnalysis => Self::DocumentAnalysis(serde_json::from_value(value).map_err(invalid)?),
            JobKind::StrategyChange => Self::StrategyChange(serde_json::from_value(value).map_err(invalid)?),
            JobKind::NoteAnalysis => Self::NoteAnalysis(serde_json::from_value(value).map_err(invalid)?),
        };

        if payload.subject_id().trim().is_empty() {
            return Err(QueueError::InvalidPayload {
                kind: kind.to_string(),
                reason: "subject id must not be empty".to_string(),
            });
        }

        Ok(payload)
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Self::DealAnalysis(_) => JobKind::DealAnalysis,
            Self::DocumentAnalysis(_) => JobKind::DocumentAnalysis,
            Self::StrategyChange(_) => JobKind::StrategyChange,
            Self::NoteAnalysis(_) => JobKind::NoteAnalysis,
        }
    }

    /// Entity the job works on
    pub fn subject_id(&self) -> &str {
        match self {
            Self::DealAnalysis(p) => &p.deal_id,
            Self::DocumentAnalysis(p) => &p.document_id,
            Self::StrategyChange(p) => &p.strategy_id,
            Self::NoteAnalysis(p) => &p.note_id,
        }
    }

    pub fn deal(deal_id: impl Into<String>) -> Self {
        Self::DealAnalysis(DealAnalysisPayload {
            deal_id: deal_id.into(),
            force_refresh: false,
        })
    }

    pub fn document(document_id: impl Into<String>, deal_id: Option<String>) -> Self {
        Self::DocumentAnalysis(DocumentAnalysisPayload {
            document_id: document_id.into(),
            deal_id,
        })
    }

    pub fn strategy_change(strategy_id: impl Into<String>, changed_fields: Vec<String>) -> Self {
        Self::StrategyChange(StrategyChangePayload {
            strategy_id: strategy_id.into(),
            changed_fields,
        })
    }

    pub fn note(note_id: impl Into<String>, deal_id: Option<String>) -> Self {
        Self::NoteAnalysis(NoteAnalysisPayload {
            note_id: note_id.into(),
            deal_id,
        })
    }
}
