//! The greedy incremental clustering engine.
//!
//! Extends [`IncrementalClusteringEngine`](crate::engine::IncrementalClusteringEngine)
//! with peak filtering of the compared consensus spectra, a predicate deciding which
//! candidates are worth comparing, an optional cap on the number of comparisons per
//! incoming item and a record of the best comparison scores on each cluster.
use std::sync::Arc;

use tracing::{debug, trace};

use crate::cluster::SpectralCluster;
use crate::consensus::{ConsensusSpectrumBuilder, MergingConsensusBuilder};
use crate::engine::{score_candidates, select_best, ClusteringEngine, ClusteringError, OrderGuard};
use crate::filters::{IdentityFilter, SpectrumFilter};
use crate::params::{ClusteringParams, ConfigurationError};
use crate::predicate::{AlwaysCompare, ComparisonPredicate};
use crate::similarity::SimilarityChecker;
use crate::spectrum::Spectrum;
use crate::window::{ClusterWindow, MassLocated};

/// An open cluster with its filtered consensus spectrum, dropped whenever the
/// consensus changes
#[derive(Debug)]
pub struct WindowEntry<B: ConsensusSpectrumBuilder> {
    pub cluster: SpectralCluster<B>,
    filtered: Option<Spectrum>,
}

impl<B: ConsensusSpectrumBuilder> WindowEntry<B> {
    fn new(cluster: SpectralCluster<B>, filtered: Option<Spectrum>) -> Self {
        Self { cluster, filtered }
    }

    fn prepare<F: SpectrumFilter>(&mut self, filter: &F) -> Result<(), ClusteringError> {
        if self.cluster.is_dirty() || self.filtered.is_none() {
            let consensus = self.cluster.consensus_spectrum()?;
            self.filtered = Some(filter.apply(consensus));
        }
        Ok(())
    }

    pub fn filtered_consensus(&self) -> Option<&Spectrum> {
        self.filtered.as_ref()
    }

    fn absorb(&mut self, other: SpectralCluster<B>) {
        self.cluster.absorb(other);
        self.filtered = None;
    }
}

impl<B: ConsensusSpectrumBuilder> MassLocated for WindowEntry<B> {
    fn mass(&self) -> f64 {
        self.cluster.precursor_mz()
    }
}

pub struct GreedyIncrementalClusteringEngine<
    S: SimilarityChecker,
    B: ConsensusSpectrumBuilder = MergingConsensusBuilder,
    F: SpectrumFilter = IdentityFilter,
    P: ComparisonPredicate<B> = AlwaysCompare,
> {
    similarity_checker: S,
    consensus: B,
    filter: F,
    predicate: P,
    params: ClusteringParams,
    window: ClusterWindow<WindowEntry<B>>,
    order: OrderGuard,
    comparisons: usize,
}

impl<S, B, F, P> GreedyIncrementalClusteringEngine<S, B, F, P>
where
    S: SimilarityChecker,
    B: ConsensusSpectrumBuilder,
    F: SpectrumFilter,
    P: ComparisonPredicate<B>,
{
    /// The consensus parameters in `params` are replaced by those of `consensus`
    /// before validation.
    pub fn new(
        similarity_checker: S,
        consensus: B,
        filter: F,
        predicate: P,
        params: ClusteringParams,
    ) -> Result<Self, ConfigurationError> {
        let params = params.for_consensus_builder(&consensus)?;
        Ok(Self {
            similarity_checker,
            consensus,
            filter,
            predicate,
            params,
            window: ClusterWindow::new(),
            order: OrderGuard::default(),
            comparisons: 0,
        })
    }

    pub fn similarity_checker(&self) -> &S {
        &self.similarity_checker
    }

    pub fn window(&self) -> &ClusterWindow<WindowEntry<B>> {
        &self.window
    }

    /// The number of similarity assessments made so far
    pub fn comparison_count(&self) -> usize {
        self.comparisons
    }

    /// The indices of the window entries in `[mz - width, mz + width]` that pass the
    /// predicate, nearest precursor m/z first, cut to the comparison budget
    fn eligible_candidates(&self, incoming: &SpectralCluster<B>, mz: f64) -> Vec<usize> {
        let width = self.params.window_size;
        let mut eligible: Vec<usize> = self
            .window
            .range(mz - width, mz + width)
            .filter(|i| {
                self.window
                    .get(*i)
                    .is_some_and(|e| self.predicate.should_compare(&e.cluster, incoming))
            })
            .collect();

        if let Some(budget) = self.params.max_comparisons {
            let key = |i: &usize| {
                self.window
                    .get(*i)
                    .map(|e| ((e.mass() - mz).abs(), e.cluster.id()))
                    .unwrap_or((f64::INFINITY, ""))
            };
            eligible.sort_by(|a, b| {
                let (da, ia) = key(a);
                let (db, ib) = key(b);
                da.total_cmp(&db).then_with(|| ia.cmp(ib))
            });
            eligible.truncate(budget);
        }
        eligible
    }
}

impl<S, B, F, P> ClusteringEngine<B> for GreedyIncrementalClusteringEngine<S, B, F, P>
where
    S: SimilarityChecker,
    B: ConsensusSpectrumBuilder,
    F: SpectrumFilter,
    P: ComparisonPredicate<B>,
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

        let closed: Vec<SpectralCluster<B>> = self
            .window
            .evict_below(mz - width)
            .into_iter()
            .map(|e| e.cluster)
            .collect();
        if !closed.is_empty() {
            debug!("Closed {} clusters below {:0.4}", closed.len(), mz - width);
        }

        let range = self.window.range(mz - width, mz + width);
        for entry in self.window.slice_mut(range) {
            entry.prepare(&self.filter)?;
        }
        let query = self.filter.apply(incoming.consensus_spectrum()?);

        let eligible = self.eligible_candidates(&incoming, mz);
        let candidates: Vec<(usize, &Spectrum)> = eligible
            .iter()
            .filter_map(|i| {
                self.window
                    .get(*i)
                    .and_then(|e| e.filtered_consensus())
                    .map(|s| (*i, s))
            })
            .collect();
        let scores = score_candidates(
            &self.similarity_checker,
            &query,
            &candidates,
            self.params.parallel,
        );
        self.comparisons += scores.len();
        trace!(
            "Compared {} against {} of {} open clusters",
            incoming.id(),
            scores.len(),
            self.window.len()
        );

        let incoming_id = incoming.id().to_string();
        for (i, score) in scores.iter().copied() {
            if let Some(entry) = self.window.get_mut(i) {
                entry.cluster.save_comparison_result(&incoming_id, score);
                incoming.save_comparison_result(entry.cluster.id(), score);
            }
        }

        let window = &self.window;
        let best = select_best(&scores, |i| {
            window.get(i).map(|e| e.cluster.id()).unwrap_or_default()
        });

        match best {
            Some((i, score)) if score >= self.params.similarity_threshold => {
                self.window.update(i, |target| {
                    debug!(
                        "Merging {} into {} with score {score:0.3}",
                        incoming_id,
                        target.cluster.id()
                    );
                    target.absorb(incoming)
                });
            }
            _ => {
                self.window.insert(WindowEntry::new(incoming, Some(query)));
            }
        }
        Ok(closed)
    }

    fn flush(&mut self) -> Vec<SpectralCluster<B>> {
        self.order.reset();
        self.window
            .drain_all()
            .into_iter()
            .map(|e| e.cluster)
            .collect()
    }

    fn open_cluster_count(&self) -> usize {
        self.window.len()
    }

    fn params(&self) -> &ClusteringParams {
        &self.params
    }
}
