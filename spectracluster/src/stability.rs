//! Classify clusters by how settled their membership is
use crate::cluster::SpectralCluster;
use crate::consensus::ConsensusSpectrumBuilder;
use crate::params::{ClusteringParams, ConfigurationError};

pub const DEFAULT_STABLE_CLUSTER_SIZE: usize = 20;
pub const DEFAULT_SEMI_STABLE_CLUSTER_SIZE: usize = 10;

pub trait ClusterStabilityAssessor: Send + Sync {
    fn is_stable_count(&self, count: usize) -> bool;

    fn is_semi_stable_count(&self, count: usize) -> bool;

    /// Build the assessor described by the cluster size thresholds in `params`
    fn from_params(params: &ClusteringParams) -> Result<Self, ConfigurationError>
    where
        Self: Sized;

    fn is_stable<B: ConsensusSpectrumBuilder>(&self, cluster: &SpectralCluster<B>) -> bool
    where
        Self: Sized,
    {
        self.is_stable_count(cluster.clustered_spectra_count())
    }

    fn is_semi_stable<B: ConsensusSpectrumBuilder>(&self, cluster: &SpectralCluster<B>) -> bool
    where
        Self: Sized,
    {
        self.is_semi_stable_count(cluster.clustered_spectra_count())
    }
}

/// A cluster is stable once it has `stable_size` members, and semi-stable once it
/// has `semi_stable_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CountBasedStabilityAssessor {
    stable_size: usize,
    semi_stable_size: usize,
}

impl Default for CountBasedStabilityAssessor {
    fn default() -> Self {
        Self {
            stable_size: DEFAULT_STABLE_CLUSTER_SIZE,
            semi_stable_size: DEFAULT_SEMI_STABLE_CLUSTER_SIZE,
        }
    }
}

impl CountBasedStabilityAssessor {
    pub fn new(stable_size: usize, semi_stable_size: usize) -> Result<Self, ConfigurationError> {
        if semi_stable_size > stable_size {
            return Err(ConfigurationError::SemiStableExceedsStable {
                semi_stable: semi_stable_size,
                stable: stable_size,
            });
        }
        Ok(Self {
            stable_size,
            semi_stable_size,
        })
    }

    pub fn stable_size(&self) -> usize {
        self.stable_size
    }

    pub fn semi_stable_size(&self) -> usize {
        self.semi_stable_size
    }
}

impl ClusterStabilityAssessor for CountBasedStabilityAssessor {
    fn is_stable_count(&self, count: usize) -> bool {
        count >= self.stable_size
    }

    fn is_semi_stable_count(&self, count: usize) -> bool {
        count >= self.semi_stable_size
    }

    fn from_params(params: &ClusteringParams) -> Result<Self, ConfigurationError> {
        Self::new(params.stable_cluster_size, params.semi_stable_cluster_size)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_boundaries() {
        let assessor = CountBasedStabilityAssessor::default();
        assert!(assessor.is_stable_count(20));
        assert!(!assessor.is_stable_count(19));
        assert!(assessor.is_semi_stable_count(10));
        assert!(!assessor.is_semi_stable_count(9));
        assert!(assessor.is_semi_stable_count(20));
    }

    #[test]
    fn test_validation() {
        assert!(CountBasedStabilityAssessor::new(5, 5).is_ok());
        assert_eq!(
            CountBasedStabilityAssessor::new(5, 6),
            Err(ConfigurationError::SemiStableExceedsStable {
                semi_stable: 6,
                stable: 5
            })
        );
    }
}
