//! Candidate pool records.
//!
//! Only the fields the pipeline reads are typed; everything else is kept
//! verbatim so a matched profile is echoed back exactly as supplied.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Nested social-profile data attached to a candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkedinData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_photo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One person in the candidate pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "linkedinData", default, skip_serializing_if = "Option::is_none")]
    pub linkedin_data: Option<LinkedinData>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CandidateProfile {
    /// Profile photo reference, if the candidate has a non-empty one.
    pub fn photo_url(&self) -> Option<&str> {
        self.linkedin_data
            .as_ref()?
            .profile_photo
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }

    pub fn headline(&self) -> Option<&str> {
        self.linkedin_data.as_ref()?.headline.as_deref()
    }
}

/// Candidate file contents: `{"attendees": [...]}` or a bare array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CandidateDocument {
    Wrapped {
        #[serde(default)]
        attendees: Vec<CandidateProfile>,
    },
    Bare(Vec<CandidateProfile>),
}

impl CandidateDocument {
    pub fn into_candidates(self) -> Vec<CandidateProfile> {
        match self {
            Self::Wrapped { attendees } => attendees,
            Self::Bare(candidates) => candidates,
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Vec<CandidateProfile>> {
        serde_json::from_str::<Self>(json).map(Self::into_candidates)
    }

    pub fn from_path(path: &Path) -> std::io::Result<Vec<CandidateProfile>> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw).map_err(std::io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_photo_url_is_optional() {
        let with_photo: CandidateProfile = serde_json::from_value(json!({
            "name": "Ada",
            "linkedinData": { "profile_photo": "https://img.example/ada.jpg", "headline": "Engineer" }
        }))
        .unwrap();
        assert_eq!(with_photo.photo_url(), Some("https://img.example/ada.jpg"));
        assert_eq!(with_photo.headline(), Some("Engineer"));

        let empty_photo: CandidateProfile = serde_json::from_value(json!({
            "name": "Bob",
            "linkedinData": { "profile_photo": "  " }
        }))
        .unwrap();
        assert_eq!(empty_photo.photo_url(), None);

        let no_data: CandidateProfile = serde_json::from_value(json!({ "name": "Cy" })).unwrap();
        assert_eq!(no_data.photo_url(), None);
        assert_eq!(CandidateProfile::default().display_name(), "Unknown");
    }

    #[test]
    fn test_unknown_fields_are_echoed() {
        let input = json!({
            "name": "Ada",
            "email": "ada@example.com",
            "linkedinData": { "profile_photo": "p.jpg", "connections": 500 }
        });
        let profile: CandidateProfile = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(serde_json::to_value(&profile).unwrap(), input);
    }

    #[test]
    fn test_document_accepts_wrapped_and_bare() {
        let wrapped = CandidateDocument::from_json(r#"{"attendees": [{"name": "a"}, {"name": "b"}]}"#).unwrap();
        assert_eq!(wrapped.len(), 2);

        let bare = CandidateDocument::from_json(r#"[{"name": "a"}]"#).unwrap();
        assert_eq!(bare.len(), 1);

        let no_attendees = CandidateDocument::from_json(r#"{"event": "x"}"#).unwrap();
        assert!(no_attendees.is_empty());

        assert!(CandidateDocument::from_json("not json").is_err());
    }
}
