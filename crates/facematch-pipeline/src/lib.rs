//! facematch-pipeline — Match a query face against a pool of profile photos.
//!
//! Stages, leaf first: [`store`] resolves and caches images, [`preprocess`]
//! enhances them and extracts the best face, [`compare`] runs one model on a
//! pair, [`ensemble`] combines several models, and [`orchestrator`] scans the
//! candidate pool and ranks the results.

pub mod cache;
pub mod compare;
pub mod config;
pub mod enhance;
pub mod ensemble;
pub mod error;
pub mod orchestrator;
pub mod preprocess;
pub mod profile;
pub mod quality;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use compare::{ComparisonResult, FaceComparator};
pub use config::PipelineConfig;
pub use ensemble::{ComparisonMode, EnsembleResult, Verdict};
pub use error::{MatchError, ModelUnavailable, SkipReason, StoreError};
pub use orchestrator::{MatchOrchestrator, MatchRecord, MatchReport, MatchRequest, RankedMatches, ScanStats};
pub use preprocess::{FaceSource, PreparedImage, Preprocessor};
pub use profile::{CandidateDocument, CandidateProfile};
pub use store::{decode_inline, ImageReference, ImageStore, ResolvedImage, WorkDir};
