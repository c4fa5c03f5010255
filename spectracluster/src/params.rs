//! Parameters of the clustering engines
use thiserror::Error;

use crate::comparisons::DEFAULT_RETAINED_COMPARISONS;
use crate::consensus::{ConsensusParams, ConsensusSpectrumBuilder};
use crate::stability::{
    CountBasedStabilityAssessor, DEFAULT_SEMI_STABLE_CLUSTER_SIZE, DEFAULT_STABLE_CLUSTER_SIZE,
};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.6;
pub const DEFAULT_WINDOW_SIZE: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("The similarity threshold must be positive, got {0}")]
    NonPositiveThreshold(f64),
    #[error("The window size must be positive, got {0}")]
    NonPositiveWindow(f64),
    #[error("The consensus fragment tolerance must be positive, got {0}")]
    NonPositiveTolerance(f64),
    #[error("The consensus noise filter window must be positive, got {0}")]
    NonPositiveNoiseWindow(f64),
    #[error("The semi-stable cluster size {semi_stable} exceeds the stable cluster size {stable}")]
    SemiStableExceedsStable { semi_stable: usize, stable: usize },
    #[error("At least one comparison result must be retained per cluster")]
    NoRetainedComparisons,
    #[error("The comparison budget must allow at least one comparison")]
    NoComparisonBudget,
}

/// The settings shared by the clustering engines
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClusteringParams {
    /// The minimum similarity at which an incoming item is merged into a cluster
    pub similarity_threshold: f64,
    /// The half-width of the precursor m/z window searched for candidate clusters
    pub window_size: f64,
    /// The maximum number of candidate clusters compared against each incoming item
    pub max_comparisons: Option<usize>,
    /// The number of best comparison results retained per cluster
    pub retained_comparisons: usize,
    pub stable_cluster_size: usize,
    pub semi_stable_cluster_size: usize,
    /// Whether to score candidates in parallel
    pub parallel: bool,
    pub consensus: ConsensusParams,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            window_size: DEFAULT_WINDOW_SIZE,
            max_comparisons: None,
            retained_comparisons: DEFAULT_RETAINED_COMPARISONS,
            stable_cluster_size: DEFAULT_STABLE_CLUSTER_SIZE,
            semi_stable_cluster_size: DEFAULT_SEMI_STABLE_CLUSTER_SIZE,
            parallel: false,
            consensus: ConsensusParams::default(),
        }
    }
}

impl ClusteringParams {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.similarity_threshold > 0.0) {
            return Err(ConfigurationError::NonPositiveThreshold(self.similarity_threshold));
        }
        if !(self.window_size > 0.0) {
            return Err(ConfigurationError::NonPositiveWindow(self.window_size));
        }
        self.consensus.validate()?;
        if self.retained_comparisons == 0 {
            return Err(ConfigurationError::NoRetainedComparisons);
        }
        if self.max_comparisons == Some(0) {
            return Err(ConfigurationError::NoComparisonBudget);
        }
        self.stability_assessor().map(|_| ())
    }

    pub fn stability_assessor(&self) -> Result<CountBasedStabilityAssessor, ConfigurationError> {
        CountBasedStabilityAssessor::new(self.stable_cluster_size, self.semi_stable_cluster_size)
    }

    pub fn similarity_threshold(mut self, value: f64) -> Self {
        self.similarity_threshold = value;
        self
    }

    pub fn window_size(mut self, value: f64) -> Self {
        self.window_size = value;
        self
    }

    pub fn max_comparisons(mut self, value: Option<usize>) -> Self {
        self.max_comparisons = value;
        self
    }

    pub fn retained_comparisons(mut self, value: usize) -> Self {
        self.retained_comparisons = value;
        self
    }

    pub fn stable_sizes(mut self, stable: usize, semi_stable: usize) -> Self {
        self.stable_cluster_size = stable;
        self.semi_stable_cluster_size = semi_stable;
        self
    }

    pub fn parallel(mut self, value: bool) -> Self {
        self.parallel = value;
        self
    }

    pub fn consensus(mut self, value: ConsensusParams) -> Self {
        self.consensus = value;
        self
    }

    /// Adopt the parameters of the consensus builder an engine will actually use,
    /// then validate the whole
    pub(crate) fn for_consensus_builder<B: ConsensusSpectrumBuilder>(
        self,
        consensus: &B,
    ) -> Result<Self, ConfigurationError> {
        let params = self.consensus(*consensus.params());
        params.validate()?;
        Ok(params)
    }
}
