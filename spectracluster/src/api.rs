//! * High level APIs for running clustering operations
use std::sync::Arc;

use crate::{
    cluster::SpectralCluster,
    consensus::{ConsensusParams, ConsensusSpectrumBuilder, MergingConsensusBuilder},
    engine::{ClusteringEngine, ClusteringError, IncrementalClusteringEngine},
    filters::{IdentityFilter, SpectrumFilter},
    greedy::GreedyIncrementalClusteringEngine,
    params::{ClusteringParams, ConfigurationError},
    predicate::{AlwaysCompare, ComparisonPredicate},
    similarity::SimilarityChecker,
    spectrum::Spectrum,
};

/// Assemble a clustering engine from its parts. The similarity checker and filter
/// default when not supplied, the predicate is built by
/// [`ComparisonPredicate::from_params`] and the consensus builder from
/// [`ClusteringParams::consensus`]. A supplied consensus builder's own parameters
/// replace [`ClusteringParams::consensus`].
#[derive(Debug, Default)]
pub struct ClusteringEngineBuilder<
    S: SimilarityChecker + Default,
    B: ConsensusSpectrumBuilder = MergingConsensusBuilder,
    F: SpectrumFilter + Default = IdentityFilter,
    P: ComparisonPredicate<B> = AlwaysCompare,
> {
    similarity_checker: Option<S>,
    consensus: Option<B>,
    filter: Option<F>,
    predicate: Option<P>,
    params: ClusteringParams,
}

impl<
        S: SimilarityChecker + Default,
        B: ConsensusSpectrumBuilder,
        F: SpectrumFilter + Default,
        P: ComparisonPredicate<B>,
    > ClusteringEngineBuilder<S, B, F, P>
{
    pub fn new() -> Self {
        Self {
            similarity_checker: None,
            consensus: None,
            filter: None,
            predicate: None,
            params: ClusteringParams::default(),
        }
    }

    pub fn similarity(mut self, value: S) -> Self {
        self.similarity_checker = Some(value);
        self
    }

    pub fn consensus(mut self, value: B) -> Self {
        self.consensus = Some(value);
        self
    }

    pub fn filter(mut self, value: F) -> Self {
        self.filter = Some(value);
        self
    }

    pub fn predicate(mut self, value: P) -> Self {
        self.predicate = Some(value);
        self
    }

    pub fn params(mut self, value: ClusteringParams) -> Self {
        self.params = value;
        self
    }

    pub fn consensus_params(mut self, value: ConsensusParams) -> Self {
        self.params.consensus = value;
        self
    }

    fn consensus_builder(consensus: Option<B>, params: &ClusteringParams) -> B {
        consensus.unwrap_or_else(|| B::with_params(params.consensus))
    }

    /// Build a [`GreedyIncrementalClusteringEngine`]
    pub fn create(self) -> Result<GreedyIncrementalClusteringEngine<S, B, F, P>, ConfigurationError> {
        let consensus = Self::consensus_builder(self.consensus, &self.params);
        let predicate = match self.predicate {
            Some(predicate) => predicate,
            None => P::from_params(&self.params)?,
        };
        GreedyIncrementalClusteringEngine::new(
            self.similarity_checker.unwrap_or_default(),
            consensus,
            self.filter.unwrap_or_default(),
            predicate,
            self.params,
        )
    }

    /// Build an [`IncrementalClusteringEngine`], which has no use for the filter
    /// or the predicate
    pub fn create_incremental(self) -> Result<IncrementalClusteringEngine<S, B>, ConfigurationError> {
        let consensus = Self::consensus_builder(self.consensus, &self.params);
        IncrementalClusteringEngine::new(
            self.similarity_checker.unwrap_or_default(),
            consensus,
            self.params,
        )
    }
}

fn sort_by_precursor(spectra: &mut [Arc<Spectrum>]) {
    spectra.sort_by(|a, b| {
        a.precursor_mz()
            .total_cmp(&b.precursor_mz())
            .then_with(|| a.id().cmp(b.id()))
    });
}

/// Cluster a collection of spectra in a single call with the greedy engine, every
/// pair eligible for comparison and no peak filtering.
///
/// Unlike the engines, this function does not require its input to be sorted. The
/// spectra are ordered by precursor m/z, then identifier, before clustering. The
/// clusters are returned in the order they were closed.
pub fn cluster_spectra<S: SimilarityChecker, I: IntoIterator<Item = Arc<Spectrum>>>(
    spectra: I,
    similarity_checker: S,
    params: ClusteringParams,
) -> Result<Vec<SpectralCluster<MergingConsensusBuilder>>, ClusteringError> {
    let mut spectra: Vec<_> = spectra.into_iter().collect();
    sort_by_precursor(&mut spectra);
    let mut engine = GreedyIncrementalClusteringEngine::new(
        similarity_checker,
        MergingConsensusBuilder::with_params(params.consensus),
        IdentityFilter,
        AlwaysCompare,
        params,
    )?;
    engine.cluster_all(spectra)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::consensus::BinnedConsensusBuilder;
    use crate::filters::RemoveImpossiblyHighPeaks;
    use crate::predicate::SkipStableClusters;
    use crate::similarity::{FisherExactTest, FrankDotProduct};
    use crate::spectrum::Peak;
    use crate::stability::CountBasedStabilityAssessor;

    fn make_spectrum(id: &str, mz: f64, shift: f64) -> Arc<Spectrum> {
        let peaks = (0..12)
            .map(|i| Peak::new(110.0 + i as f64 * 61.0 + shift, 10.0 + (i * 7 % 5) as f32 * 20.0, 0))
            .collect();
        Arc::new(Spectrum::new(id, 2, mz, peaks))
    }

    #[test]
    fn test_cluster_spectra_unsorted() {
        let spectra = vec![
            make_spectrum("c", 700.3, 0.0),
            make_spectrum("a", 700.0, 0.0),
            make_spectrum("x", 700.1, 23.0),
            make_spectrum("b", 700.2, 0.0),
        ];
        let clusters = cluster_spectra(spectra, FrankDotProduct::default(), ClusteringParams::default()).unwrap();
        assert_eq!(clusters.len(), 2);
        let ids: Vec<Vec<&str>> = clusters.iter().map(|c| c.spectrum_ids().collect()).collect();
        assert!(ids.contains(&vec!["a", "b", "c"]));
        assert!(ids.contains(&vec!["x"]));
    }

    #[test]
    fn test_builder() {
        let engine: GreedyIncrementalClusteringEngine<FrankDotProduct, BinnedConsensusBuilder, RemoveImpossiblyHighPeaks> =
            ClusteringEngineBuilder::new()
                .params(ClusteringParams::default().window_size(1.0))
                .consensus_params(ConsensusParams {
                    bin_width: Some(0.25),
                    ..Default::default()
                })
                .create()
                .unwrap();
        assert_eq!(engine.params().window_size, 1.0);

        let engine: IncrementalClusteringEngine<FisherExactTest> = ClusteringEngineBuilder::<FisherExactTest>::new()
            .params(ClusteringParams::default().similarity_threshold(10.0))
            .create_incremental()
            .unwrap();
        assert_eq!(engine.similarity_checker().name(), "FisherExactTest");

        let err = ClusteringEngineBuilder::<FrankDotProduct>::new()
            .params(ClusteringParams::default().retained_comparisons(0))
            .create();
        assert!(err.is_err());
    }

    #[test]
    fn test_builder_configures_stability() {
        let mut engine: GreedyIncrementalClusteringEngine<
            FrankDotProduct,
            MergingConsensusBuilder,
            IdentityFilter,
            SkipStableClusters<CountBasedStabilityAssessor>,
        > = ClusteringEngineBuilder::new()
            .params(ClusteringParams::default().stable_sizes(2, 1))
            .create()
            .unwrap();
        let spectra: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|id| make_spectrum(id, 700.0, 0.0))
            .collect();
        let clusters = engine.cluster_all(spectra).unwrap();
        let sizes: Vec<usize> = clusters.iter().map(|c| c.clustered_spectra_count()).collect();
        assert_eq!(sizes, vec![2, 2]);

        let err = ClusteringEngineBuilder::<
            FrankDotProduct,
            MergingConsensusBuilder,
            IdentityFilter,
            SkipStableClusters<CountBasedStabilityAssessor>,
        >::new()
        .params(ClusteringParams::default().stable_sizes(1, 2))
        .create();
        assert!(err.is_err());
    }

    #[test]
    fn test_builder_takes_supplied_consensus_params() {
        let supplied = ConsensusParams {
            bin_width: Some(0.25),
            ..Default::default()
        };
        let engine: IncrementalClusteringEngine<FrankDotProduct, BinnedConsensusBuilder> =
            ClusteringEngineBuilder::<FrankDotProduct, BinnedConsensusBuilder>::new()
                .consensus(BinnedConsensusBuilder::new("", supplied))
                .create_incremental()
                .unwrap();
        assert_eq!(engine.params().consensus, supplied);

        let broken = ConsensusParams {
            bin_width: Some(0.0),
            ..Default::default()
        };
        let err = ClusteringEngineBuilder::<FrankDotProduct, BinnedConsensusBuilder>::new()
            .consensus(BinnedConsensusBuilder::new("", broken))
            .create();
        assert!(matches!(err, Err(ConfigurationError::NonPositiveTolerance(_))));
    }
}
