/*!
Single pass clustering over spectra sorted by precursor m/z.

Items arrive in non-decreasing precursor m/z order. Each one is compared against
the open clusters within the window around its m/z and merged into the best match
scoring at or above the similarity threshold, or else opens a cluster of its own.
Open clusters that fall behind the trailing edge of the window are closed and
returned to the caller.
*/
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cluster::{ClusterError, SpectralCluster};
use crate::consensus::{ConsensusSpectrumBuilder, MergingConsensusBuilder};
use crate::params::{ClusteringParams, ConfigurationError};
use crate::similarity::{SimilarityChecker, SimilarityScore};
use crate::spectrum::Spectrum;
use crate::window::ClusterWindow;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClusteringError {
    #[error("Received precursor m/z {mz} after {previous}, input must be sorted by precursor m/z")]
    OutOfOrder { mz: f64, previous: f64 },
    #[error("{id} does not have a usable precursor m/z")]
    InvalidPrecursorMz { id: String },
    #[error("A cluster error occurred: {0}")]
    ClusterError(#[from] ClusterError),
    #[error("The engine is misconfigured: {0}")]
    ConfigurationError(#[from] ConfigurationError),
}

/// The common interface of the clustering engines.
///
/// Clusters are identified by id and a singleton cluster takes the id of its
/// spectrum, so spectrum ids must be unique within a run.
pub trait ClusteringEngine<B: ConsensusSpectrumBuilder> {
    /// Wrap `spectrum` in a new singleton cluster configured for this engine
    fn new_cluster(&self, spectrum: Arc<Spectrum>) -> SpectralCluster<B>;

    /// Add a cluster to the engine, returning any clusters closed as a result
    fn add_cluster(
        &mut self,
        cluster: SpectralCluster<B>,
    ) -> Result<Vec<SpectralCluster<B>>, ClusteringError>;

    /// Add a spectrum to the engine, returning any clusters closed as a result
    fn add_spectrum(
        &mut self,
        spectrum: Arc<Spectrum>,
    ) -> Result<Vec<SpectralCluster<B>>, ClusteringError> {
        let cluster = self.new_cluster(spectrum);
        self.add_cluster(cluster)
    }

    /// Close every remaining open cluster, in ascending precursor m/z order
    fn flush(&mut self) -> Vec<SpectralCluster<B>>;

    fn open_cluster_count(&self) -> usize;

    fn params(&self) -> &ClusteringParams;

    /// Cluster a complete sorted sequence of spectra, returning every cluster
    fn cluster_all<I: IntoIterator<Item = Arc<Spectrum>>>(
        &mut self,
        spectra: I,
    ) -> Result<Vec<SpectralCluster<B>>, ClusteringError>
    where
        Self: Sized,
    {
        let mut closed = Vec::new();
        for spectrum in spectra {
            closed.extend(self.add_spectrum(spectrum)?);
        }
        closed.extend(self.flush());
        Ok(closed)
    }
}

/// Tracks the precursor m/z of the last item accepted, rejecting anything lower
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct OrderGuard {
    last_mz: Option<f64>,
}

impl OrderGuard {
    pub fn check<B: ConsensusSpectrumBuilder>(
        &mut self,
        incoming: &SpectralCluster<B>,
    ) -> Result<f64, ClusteringError> {
        if incoming.is_empty() {
            return Err(ClusterError::EmptyCluster(incoming.id().to_string()).into());
        }
        let mz = incoming.precursor_mz();
        if !mz.is_finite() {
            return Err(ClusteringError::InvalidPrecursorMz {
                id: incoming.id().to_string(),
            });
        }
        if let Some(previous) = self.last_mz {
            if mz < previous {
                return Err(ClusteringError::OutOfOrder { mz, previous });
            }
        }
        self.last_mz = Some(mz);
        Ok(mz)
    }

    pub fn reset(&mut self) {
        self.last_mz = None;
    }
}

fn sanitize_score<S: SimilarityChecker>(
    checker: &S,
    query: &Spectrum,
    candidate: &Spectrum,
    score: SimilarityScore,
) -> SimilarityScore {
    if checker.is_valid_score(score) {
        score
    } else {
        warn!(
            "{} produced an invalid score {score} comparing {} with {}",
            checker.name(),
            query.id(),
            candidate.id()
        );
        checker.minimum_score()
    }
}

/// Score `query` against each candidate, keeping the candidates' order. Invalid
/// scores are replaced by the checker's minimum.
pub(crate) fn score_candidates<S: SimilarityChecker>(
    checker: &S,
    query: &Spectrum,
    candidates: &[(usize, &Spectrum)],
    parallel: bool,
) -> Vec<(usize, SimilarityScore)> {
    let score = |(i, candidate): &(usize, &Spectrum)| {
        let raw = checker.assess_similarity(query, candidate);
        (*i, sanitize_score(checker, query, candidate, raw))
    };
    if parallel {
        candidates.par_iter().map(score).collect()
    } else {
        candidates.iter().map(score).collect()
    }
}

/// Pick the highest score, breaking ties in favor of the lexicographically smaller id
pub(crate) fn select_best<'a>(
    scores: &[(usize, SimilarityScore)],
    id_of: impl Fn(usize) -> &'a str,
) -> Option<(usize, SimilarityScore)> {
    scores.iter().copied().fold(None, |best, (i, score)| match best {
        None => Some((i, score)),
        Some((j, best_score)) => {
            if score > best_score || (score == best_score && id_of(i) < id_of(j)) {
                Some((i, score))
            } else {
                best
            }
        }
    })
}

/// Compares each incoming cluster's consensus spectrum with every open cluster in
/// the window, merging into the best match.
#[derive(Debug)]
pub struct IncrementalClusteringEngine<
    S: SimilarityChecker,
    B: ConsensusSpectrumBuilder = MergingConsensusBuilder,
> {
    similarity_checker: S,
    consensus: B,
    params: ClusteringParams,
    window: ClusterWindow<SpectralCluster<B>>,
    order: OrderGuard,
}

impl<S: SimilarityChecker, B: ConsensusSpectrumBuilder> IncrementalClusteringEngine<S, B> {
    /// The consensus parameters in `params` are replaced by those of `consensus`
    /// before validation.
    pub fn new(
        similarity_checker: S,
        consensus: B,
        params: ClusteringParams,
    ) -> Result<Self, ConfigurationError> {
        let params = params.for_consensus_builder(&consensus)?;
        Ok(Self {
            similarity_checker,
            consensus,
            params,
            window: ClusterWindow::new(),
            order: OrderGuard::default(),
        })
    }

    pub fn similarity_checker(&self) -> &S {
        &self.similarity_checker
    }

    pub fn window(&self) -> &ClusterWindow<SpectralCluster<B>> {
        &self.window
    }
}

impl<S: SimilarityChecker, B: ConsensusSpectrumBuilder> ClusteringEngine<B>
    for IncrementalClusteringEngine<S, B>
{
    fn new_cluster(&self, spectrum: Arc<Spectrum>) -> SpectralCluster<B> {
        SpectralCluster::from_spectrum(spectrum, &self.consensus, self.params.retained_comparisons)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    fn add_cluster(
        &mut self,
        mut incoming: SpectralCluster<B>,
    ) -> Result<Vec<SpectralCluster<B>>, ClusteringError> {
        let mz = self.order.check(&incoming)?;
        let width = self.params.window_size;

        let closed = self.window.evict_below(mz - width);
        if !closed.is_empty() {
            debug!("Closed {} clusters below {:0.4}", closed.len(), mz - width);
        }

        let range = self.window.range(mz - width, mz + width);
        for cluster in self.window.slice_mut(range.clone()) {
            cluster.refresh()?;
        }

        let query = incoming.consensus_spectrum()?;
        let candidates: Vec<(usize, &Spectrum)> = range
            .filter_map(|i| {
                self.window
                    .get(i)
                    .and_then(|c| c.cached_consensus())
                    .map(|s| (i, s))
            })
            .collect();
        let scores = score_candidates(
            &self.similarity_checker,
            query,
            &candidates,
            self.params.parallel,
        );

        let window = &self.window;
        let best = select_best(&scores, |i| window.get(i).map(|c| c.id()).unwrap_or_default());

        match best {
            Some((i, score)) if score >= self.params.similarity_threshold => {
                self.window.update(i, |target| {
                    debug!(
                        "Merging {} into {} with score {score:0.3}",
                        incoming.id(),
                        target.id()
                    );
                    target.absorb(incoming)
                });
            }
            _ => {
                self.window.insert(incoming);
            }
        }
        Ok(closed)
    }

    fn flush(&mut self) -> Vec<SpectralCluster<B>> {
        self.order.reset();
        self.window.drain_all()
    }

    fn open_cluster_count(&self) -> usize {
        self.window.len()
    }

    fn params(&self) -> &ClusteringParams {
        &self.params
    }
}
