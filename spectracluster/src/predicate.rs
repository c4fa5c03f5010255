//! Decide whether an incoming cluster should be compared with a candidate
use crate::cluster::SpectralCluster;
use crate::consensus::ConsensusSpectrumBuilder;
use crate::params::{ClusteringParams, ConfigurationError};
use crate::stability::ClusterStabilityAssessor;

/// The number of major peaks compared by [`SharesMajorPeak`] by default
pub const DEFAULT_MAJOR_PEAK_COUNT: usize = 5;

/// A pure test over a `(candidate, incoming)` pair of clusters. Pairs that fail the
/// test are not scored.
pub trait ComparisonPredicate<B: ConsensusSpectrumBuilder>: Send + Sync {
    fn should_compare(&self, candidate: &SpectralCluster<B>, incoming: &SpectralCluster<B>) -> bool;

    /// Build the predicate an engine configured with `params` uses when none is given
    fn from_params(params: &ClusteringParams) -> Result<Self, ConfigurationError>
    where
        Self: Sized;
}

/// Compare every pair
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysCompare;

impl<B: ConsensusSpectrumBuilder> ComparisonPredicate<B> for AlwaysCompare {
    fn should_compare(&self, _candidate: &SpectralCluster<B>, _incoming: &SpectralCluster<B>) -> bool {
        true
    }

    fn from_params(_params: &ClusteringParams) -> Result<Self, ConfigurationError> {
        Ok(Self)
    }
}

/// An absent predicate compares every pair
impl<B: ConsensusSpectrumBuilder, P: ComparisonPredicate<B>> ComparisonPredicate<B> for Option<P> {
    fn should_compare(&self, candidate: &SpectralCluster<B>, incoming: &SpectralCluster<B>) -> bool {
        match self {
            Some(p) => p.should_compare(candidate, incoming),
            None => true,
        }
    }

    fn from_params(_params: &ClusteringParams) -> Result<Self, ConfigurationError> {
        Ok(None)
    }
}

/// Skip candidates that are already stable
#[derive(Debug, Clone, Copy)]
pub struct SkipStableClusters<A: ClusterStabilityAssessor> {
    pub assessor: A,
}

impl<A: ClusterStabilityAssessor> SkipStableClusters<A> {
    pub fn new(assessor: A) -> Self {
        Self { assessor }
    }
}

impl<A: ClusterStabilityAssessor, B: ConsensusSpectrumBuilder> ComparisonPredicate<B>
    for SkipStableClusters<A>
{
    fn should_compare(&self, candidate: &SpectralCluster<B>, _incoming: &SpectralCluster<B>) -> bool {
        !self.assessor.is_stable(candidate)
    }

    fn from_params(params: &ClusteringParams) -> Result<Self, ConfigurationError> {
        A::from_params(params).map(Self::new)
    }
}

/// Compare only clusters whose consensus spectra share at least one of their `n`
/// major peaks. Pairs without an up-to-date consensus are compared.
#[derive(Debug, Clone, Copy)]
pub struct SharesMajorPeak {
    pub n: usize,
}

impl Default for SharesMajorPeak {
    fn default() -> Self {
        Self {
            n: DEFAULT_MAJOR_PEAK_COUNT,
        }
    }
}

impl SharesMajorPeak {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl<B: ConsensusSpectrumBuilder> ComparisonPredicate<B> for SharesMajorPeak {
    fn should_compare(&self, candidate: &SpectralCluster<B>, incoming: &SpectralCluster<B>) -> bool {
        match (candidate.cached_consensus(), incoming.cached_consensus()) {
            (Some(candidate), Some(incoming)) => {
                let candidate_peaks = candidate.major_peak_mzs(self.n);
                incoming
                    .major_peak_mzs(self.n)
                    .iter()
                    .any(|mz| candidate_peaks.contains(mz))
            }
            _ => true,
        }
    }

    fn from_params(_params: &ClusteringParams) -> Result<Self, ConfigurationError> {
        Ok(Self::default())
    }
}

/// Skip pairs that already appear in one another's best comparison results
#[derive(Debug, Default, Clone, Copy)]
pub struct NotKnownComparison;

impl<B: ConsensusSpectrumBuilder> ComparisonPredicate<B> for NotKnownComparison {
    fn should_compare(&self, candidate: &SpectralCluster<B>, incoming: &SpectralCluster<B>) -> bool {
        !(candidate.is_in_best_comparison_results(incoming.id())
            || incoming.is_in_best_comparison_results(candidate.id()))
    }

    fn from_params(_params: &ClusteringParams) -> Result<Self, ConfigurationError> {
        Ok(Self)
    }
}

/// Both predicates must hold
#[derive(Debug, Default, Clone, Copy)]
pub struct And<P1, P2>(pub P1, pub P2);

impl<B, P1, P2> ComparisonPredicate<B> for And<P1, P2>
where
    B: ConsensusSpectrumBuilder,
    P1: ComparisonPredicate<B>,
    P2: ComparisonPredicate<B>,
{
    fn should_compare(&self, candidate: &SpectralCluster<B>, incoming: &SpectralCluster<B>) -> bool {
        self.0.should_compare(candidate, incoming) && self.1.should_compare(candidate, incoming)
    }

    fn from_params(params: &ClusteringParams) -> Result<Self, ConfigurationError> {
        Ok(Self(P1::from_params(params)?, P2::from_params(params)?))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::consensus::MergingConsensusBuilder;
    use crate::spectrum::{Peak, Spectrum};
    use crate::stability::CountBasedStabilityAssessor;

    fn cluster(id: &str, peaks: &[(f64, f32)]) -> SpectralCluster {
        let spectrum = Spectrum::new(
            id,
            2,
            500.0,
            peaks.iter().map(|(mz, i)| Peak::new(*mz, *i, 0)).collect(),
        );
        SpectralCluster::from_spectrum(Arc::new(spectrum), &MergingConsensusBuilder::default(), 30)
    }

    #[test]
    fn test_shares_major_peak() {
        let mut a = cluster("a", &[(100.2, 50.0), (200.0, 10.0)]);
        let mut b = cluster("b", &[(100.7, 50.0), (300.0, 10.0)]);
        let mut c = cluster("c", &[(400.0, 50.0), (500.0, 10.0)]);
        let predicate = SharesMajorPeak::new(1);
        // no consensus yet
        assert!(predicate.should_compare(&a, &c));

        a.refresh().unwrap();
        b.refresh().unwrap();
        c.refresh().unwrap();
        assert!(predicate.should_compare(&a, &b));
        assert!(!predicate.should_compare(&a, &c));
    }

    #[test]
    fn test_known_and_stable() {
        let mut a = cluster("a", &[(100.0, 1.0)]);
        let b = cluster("b", &[(100.0, 1.0)]);
        assert!(NotKnownComparison.should_compare(&a, &b));
        a.save_comparison_result("b", 0.8);
        assert!(!NotKnownComparison.should_compare(&a, &b));
        assert!(!NotKnownComparison.should_compare(&b, &a));

        let skip = SkipStableClusters::new(CountBasedStabilityAssessor::new(1, 1).unwrap());
        assert!(!skip.should_compare(&a, &b));

        let both = And(AlwaysCompare, SkipStableClusters::new(CountBasedStabilityAssessor::default()));
        assert!(both.should_compare(&a, &b));
    }

    #[test]
    fn test_optional_predicates() {
        let a = cluster("a", &[(100.0, 1.0)]);
        let b = cluster("b", &[(100.0, 1.0)]);
        let skip = Some(SkipStableClusters::new(CountBasedStabilityAssessor::new(1, 1).unwrap()));
        assert!(!skip.should_compare(&a, &b));
        let absent: Option<SkipStableClusters<CountBasedStabilityAssessor>> = None;
        assert!(absent.should_compare(&a, &b));
    }

    #[test]
    fn test_from_params() {
        let params = ClusteringParams::default().stable_sizes(2, 1);
        let skip: SkipStableClusters<CountBasedStabilityAssessor> =
            <SkipStableClusters<_> as ComparisonPredicate<MergingConsensusBuilder>>::from_params(&params).unwrap();
        assert_eq!(skip.assessor.stable_size(), 2);
        assert_eq!(skip.assessor.semi_stable_size(), 1);

        let invalid = ClusteringParams::default().stable_sizes(1, 2);
        let err = <And<AlwaysCompare, SkipStableClusters<CountBasedStabilityAssessor>> as ComparisonPredicate<
            MergingConsensusBuilder,
        >>::from_params(&invalid);
        assert!(matches!(err, Err(ConfigurationError::SemiStableExceedsStable { .. })));
    }
}
