//! The single JSON object written to stdout.

use facematch_pipeline::{CandidateProfile, MatchError, MatchRecord, MatchReport, RankedMatches};
use serde::Serialize;

pub const NO_MATCH: &str = "No matching face found";

#[derive(Debug, Serialize)]
pub struct Output {
    pub success: bool,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub best: Option<MatchSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matches: Option<Vec<MatchSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_found: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MatchSummary {
    pub profile: CandidateProfile,
    pub confidence: f32,
    pub distance: f32,
    pub verified: bool,
}

impl From<MatchRecord> for MatchSummary {
    fn from(record: MatchRecord) -> Self {
        Self {
            confidence: record.confidence(),
            distance: record.distance(),
            verified: record.verified(),
            profile: record.profile,
        }
    }
}

impl Output {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            best: None,
            matches: None,
            total_found: None,
            error: Some(error.into()),
        }
    }

    pub fn from_report(report: MatchReport) -> Self {
        let mut output = Self {
            success: true,
            best: None,
            matches: None,
            total_found: None,
            error: None,
        };
        match report.ranked {
            RankedMatches::Best(record) => output.best = Some(record.into()),
            RankedMatches::Top { matches, total_found } => {
                output.matches = Some(matches.into_iter().map(MatchSummary::from).collect());
                output.total_found = Some(total_found);
            }
        }
        output
    }

    /// Outcome of a match run that got as far as scanning candidates.
    pub fn from_outcome(outcome: Result<MatchReport, MatchError>) -> Self {
        match outcome {
            Ok(report) => Self::from_report(report),
            Err(MatchError::InvalidQuery(e)) => Self::failure(format!("Failed to decode base64 image: {e}")),
            Err(MatchError::NoCandidates { .. } | MatchError::NoMatch { .. }) => Self::failure(NO_MATCH),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize output");
            format!(r#"{{"success":false,"error":"failed to serialize output: {e}"}}"#)
        })
    }
}
