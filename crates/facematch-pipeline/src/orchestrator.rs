//! Match Orchestrator: scan a candidate pool against one query face.
//!
//! A request resolves and prepares the query once, judges every candidate
//! (sequentially or on a bounded pool of tasks), ranks the records by
//! confidence, and filters them by the requested minimum. Candidate-level
//! failures are counted in [`ScanStats`] and never abort the scan.

use crate::cache;
use crate::compare::FaceComparator;
use crate::config::PipelineConfig;
use crate::ensemble::{ComparisonMode, Verdict};
use crate::error::{MatchError, SkipReason, StoreError};
use crate::preprocess::{PreparedImage, Preprocessor};
use crate::profile::CandidateProfile;
use crate::store::{ImageReference, ImageStore, ResolvedImage, WorkDir};
use facematch_core::RecognitionEngine;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Per-request knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRequest {
    pub min_confidence: f32,
    /// Number of matches to return; 1 returns the best match alone, 0 returns all.
    pub top_n: usize,
    pub parallel: bool,
}

impl MatchRequest {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            top_n: config.top_n,
            parallel: config.parallel,
        }
    }
}

impl Default for MatchRequest {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// A candidate that was successfully compared with the query.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    /// Position in the submitted pool.
    pub index: usize,
    pub profile: CandidateProfile,
    pub verdict: Verdict,
    pub query_quality: f32,
    pub candidate_quality: f32,
}

impl MatchRecord {
    pub fn confidence(&self) -> f32 {
        self.verdict.confidence()
    }

    pub fn distance(&self) -> f32 {
        self.verdict.distance()
    }

    pub fn verified(&self) -> bool {
        self.verdict.verified()
    }
}

/// Counters for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub scanned: usize,
    /// Candidates that produced a match record.
    pub matched: usize,
    pub missing_photo: usize,
    pub image_unavailable: usize,
    pub comparison_failed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RankedMatches {
    Best(MatchRecord),
    Top {
        matches: Vec<MatchRecord>,
        total_found: usize,
    },
}

impl RankedMatches {
    /// The highest-ranked record.
    pub fn best(&self) -> Option<&MatchRecord> {
        match self {
            Self::Best(record) => Some(record),
            Self::Top { matches, .. } => matches.first(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchReport {
    pub ranked: RankedMatches,
    pub stats: ScanStats,
}

#[derive(Clone)]
pub struct MatchOrchestrator {
    store: Arc<ImageStore>,
    preprocessor: Arc<Preprocessor>,
    comparator: Arc<FaceComparator>,
    mode: Arc<ComparisonMode>,
    max_workers: usize,
}

impl MatchOrchestrator {
    /// Build the pipeline stages around `engine`, creating the work directory.
    pub fn new(engine: Arc<dyn RecognitionEngine>, config: &PipelineConfig) -> Result<Self, StoreError> {
        let work_dir = Arc::new(WorkDir::create(config.work_dir.clone())?);
        tracing::debug!(path = %work_dir.path().display(), "work directory ready");

        let store = ImageStore::new(config, Arc::clone(&work_dir))?;
        let preprocessor = Preprocessor::new(Arc::clone(&engine), work_dir, config);
        let comparator = FaceComparator::new(engine, config);

        Ok(Self {
            store: Arc::new(store),
            preprocessor: Arc::new(preprocessor),
            comparator: Arc::new(comparator),
            mode: Arc::new(config.comparison_mode()),
            max_workers: config.max_workers.max(1),
        })
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Remove every file written on behalf of this orchestrator.
    pub fn cleanup(&self) {
        self.preprocessor.purge_evicted();
        self.store.cleanup();
    }

    /// Find the candidates whose photo matches the query face.
    pub async fn find_matches(
        &self,
        query: &ImageReference,
        pool: Vec<CandidateProfile>,
        request: &MatchRequest,
    ) -> Result<MatchReport, MatchError> {
        let resolved = self.store.resolve_query(query).await.map_err(|e| {
            tracing::warn!(query = %query, error = %e, "query image rejected");
            MatchError::InvalidQuery(e)
        })?;

        let outcome = self.match_resolved(&resolved, pool, request).await;

        if matches!(query, ImageReference::Inline(_)) {
            self.store.release(&resolved);
        }
        outcome
    }

    async fn match_resolved(
        &self,
        query: &ResolvedImage,
        pool: Vec<CandidateProfile>,
        request: &MatchRequest,
    ) -> Result<MatchReport, MatchError> {
        if pool.is_empty() {
            return Err(MatchError::NoCandidates {
                stats: ScanStats::default(),
            });
        }

        let prepared = self.preprocessor.prepare(query).await;
        tracing::info!(
            candidates = pool.len(),
            mode = ?self.mode,
            parallel = request.parallel,
            query_quality = prepared.quality,
            "scanning candidates"
        );

        let (records, stats) = if request.parallel {
            self.scan_parallel(&prepared, pool).await
        } else {
            self.scan_sequential(&prepared, pool).await
        };

        if prepared.is_derived() {
            cache::remove_file_quietly(&prepared.path);
        }

        tracing::info!(
            scanned = stats.scanned,
            matched = stats.matched,
            missing_photo = stats.missing_photo,
            image_unavailable = stats.image_unavailable,
            comparison_failed = stats.comparison_failed,
            "scan finished"
        );

        rank(records, stats, request)
    }

    async fn scan_sequential(
        &self,
        query: &PreparedImage,
        pool: Vec<CandidateProfile>,
    ) -> (Vec<MatchRecord>, ScanStats) {
        let mut tally = Tally::new(pool.len());
        for (index, profile) in pool.into_iter().enumerate() {
            let name = profile.display_name().to_string();
            let outcome = self.scan_candidate(index, profile, query).await;
            tally.record(index, &name, outcome);
        }
        tally.finish()
    }

    async fn scan_parallel(
        &self,
        query: &PreparedImage,
        pool: Vec<CandidateProfile>,
    ) -> (Vec<MatchRecord>, ScanStats) {
        let mut tally = Tally::new(pool.len());
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let query = Arc::new(query.clone());
        let mut tasks = JoinSet::new();

        for (index, profile) in pool.into_iter().enumerate() {
            let this = self.clone();
            let query = Arc::clone(&query);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let name = profile.display_name().to_string();
                let outcome = this.scan_candidate(index, profile, &query).await;
                (index, name, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, name, outcome)) => tally.record(index, &name, outcome),
                Err(e) => {
                    tracing::warn!(error = %e, "candidate task failed");
                    tally.stats.comparison_failed += 1;
                }
            }
        }
        tally.finish()
    }

    async fn scan_candidate(
        &self,
        index: usize,
        profile: CandidateProfile,
        query: &PreparedImage,
    ) -> Result<MatchRecord, SkipReason> {
        let reference = ImageReference::parse(profile.photo_url().ok_or(SkipReason::MissingPhoto)?);
        let resolved = self.store.resolve(&reference).await?;
        let candidate = self.preprocessor.preprocess(&resolved).await;

        let verdict = self
            .mode
            .judge(
                &self.comparator,
                &query.path,
                &candidate.path,
                query.quality,
                candidate.quality,
            )
            .await
            .ok_or(SkipReason::ComparisonFailed)?;

        Ok(MatchRecord {
            index,
            profile,
            verdict,
            query_quality: query.quality,
            candidate_quality: candidate.quality,
        })
    }
}

struct Tally {
    records: Vec<MatchRecord>,
    stats: ScanStats,
}

impl Tally {
    fn new(scanned: usize) -> Self {
        Self {
            records: Vec::with_capacity(scanned),
            stats: ScanStats {
                scanned,
                ..ScanStats::default()
            },
        }
    }

    fn record(&mut self, index: usize, name: &str, outcome: Result<MatchRecord, SkipReason>) {
        match outcome {
            Ok(record) => {
                tracing::debug!(
                    index,
                    candidate = name,
                    confidence = record.confidence(),
                    distance = record.distance(),
                    verified = record.verified(),
                    models = record.verdict.model_count(),
                    "candidate compared"
                );
                self.stats.matched += 1;
                self.records.push(record);
            }
            Err(SkipReason::MissingPhoto) => {
                tracing::debug!(index, candidate = name, "candidate has no photo");
                self.stats.missing_photo += 1;
            }
            Err(reason @ SkipReason::ImageUnavailable(_)) => {
                tracing::warn!(index, candidate = name, reason = %reason, "skipping candidate");
                self.stats.image_unavailable += 1;
            }
            Err(reason @ SkipReason::ComparisonFailed) => {
                tracing::warn!(index, candidate = name, reason = %reason, "skipping candidate");
                self.stats.comparison_failed += 1;
            }
        }
    }

    fn finish(self) -> (Vec<MatchRecord>, ScanStats) {
        (self.records, self.stats)
    }
}

/// Order by confidence (ties by pool position), drop weak matches, and cut to `top_n`.
fn rank(mut records: Vec<MatchRecord>, stats: ScanStats, request: &MatchRequest) -> Result<MatchReport, MatchError> {
    if records.is_empty() {
        return Err(MatchError::NoCandidates { stats });
    }

    records.sort_by(|a, b| {
        b.confidence()
            .total_cmp(&a.confidence())
            .then(a.index.cmp(&b.index))
    });

    let processed = records.len();
    records.retain(|r| r.confidence() >= request.min_confidence);
    if records.is_empty() {
        return Err(MatchError::NoMatch {
            min_confidence: request.min_confidence,
            processed,
            stats,
        });
    }

    let ranked = if request.top_n == 1 {
        let mut records = records.into_iter();
        match records.next() {
            Some(best) => RankedMatches::Best(best),
            None => return Err(MatchError::NoCandidates { stats }),
        }
    } else {
        let total_found = records.len();
        if request.top_n > 0 {
            records.truncate(request.top_n);
        }
        RankedMatches::Top {
            matches: records,
            total_found,
        }
    };

    Ok(MatchReport { ranked, stats })
}
