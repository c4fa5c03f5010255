//! Incremental, greedy clustering of tandem mass spectra.
//!
//! Spectra sorted by precursor m/z are streamed through a [`ClusteringEngine`], which
//! compares each one against the consensus spectra of the open clusters nearby and
//! either merges it into the most similar cluster or opens a new one. Clusters that
//! fall behind the window are closed and handed back to the caller.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use spectracluster::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let spectra: Vec<Arc<Spectrum>> = Vec::new();
//! let mut engine = ClusteringEngineBuilder::<FrankDotProduct>::new()
//!     .params(ClusteringParams::default().similarity_threshold(0.7))
//!     .create()?;
//! for cluster in engine.cluster_all(spectra)? {
//!     println!("{}\t{}", cluster.id(), cluster.clustered_spectra_count());
//! }
//! # Ok(())
//! # }
//! ```
pub mod spectrum;
pub mod similarity;
pub mod filters;
pub mod comparisons;
pub mod consensus;
pub mod cluster;
pub mod stability;
pub mod params;
pub mod window;
pub mod predicate;
pub mod engine;
pub mod greedy;
pub mod api;

pub use crate::api::{cluster_spectra, ClusteringEngineBuilder};
pub use crate::cluster::{ClusterError, SpectralCluster};
pub use crate::consensus::{
    BinnedConsensusBuilder, ConsensusParams, ConsensusSpectrumBuilder, MergingConsensusBuilder,
};
pub use crate::engine::{ClusteringEngine, ClusteringError, IncrementalClusteringEngine};
pub use crate::greedy::GreedyIncrementalClusteringEngine;
pub use crate::params::{ClusteringParams, ConfigurationError};
pub use crate::similarity::{FisherExactTest, FrankDotProduct, SimilarityChecker};
pub use crate::spectrum::{Peak, Spectrum};

pub mod prelude {
    pub use crate::api::{cluster_spectra, ClusteringEngineBuilder};
    pub use crate::cluster::SpectralCluster;
    pub use crate::consensus::{
        BinnedConsensusBuilder, ConsensusParams, ConsensusSpectrumBuilder, MergingConsensusBuilder,
    };
    pub use crate::engine::{ClusteringEngine, IncrementalClusteringEngine};
    pub use crate::filters::SpectrumFilter;
    pub use crate::greedy::GreedyIncrementalClusteringEngine;
    pub use crate::params::ClusteringParams;
    pub use crate::predicate::ComparisonPredicate;
    pub use crate::similarity::{FisherExactTest, FrankDotProduct, SimilarityChecker};
    pub use crate::spectrum::{Peak, Spectrum};
    pub use crate::stability::ClusterStabilityAssessor;
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::prelude::*;

    /// Eight spectra drawn from one peak pattern. Peaks sit in the middle of 0.5 m/z
    /// bins, jittered by at most 0.01, and a few are missing from some spectra.
    fn replicate_spectra() -> Vec<Arc<Spectrum>> {
        (0..8)
            .map(|k| {
                let jitter = (k as f64 - 3.5) * 0.002;
                let peaks = (0..16)
                    .filter(|i| (i + k) % 7 != 0)
                    .map(|i| {
                        let mz = 150.25 + i as f64 * 25.0 + jitter;
                        let intensity = 50.0 + ((i * 37 + k * 11) % 23) as f32 * 10.0;
                        Peak::new(mz, intensity, 0)
                    })
                    .collect();
                Arc::new(Spectrum::new(format!("r{k}"), 2, 600.0 + k as f64 * 0.01, peaks))
            })
            .collect()
    }

    #[test]
    fn test_consensus_strategies_agree() {
        let spectra = replicate_spectra();
        let mut merging = MergingConsensusBuilder::default().fresh("merging");
        let mut binned = BinnedConsensusBuilder::default().fresh("binned");
        merging.add_spectra(spectra.iter().map(|s| s.as_ref()));
        binned.add_spectra(spectra.iter().map(|s| s.as_ref()));

        let checker = FrankDotProduct::new(0.5, false);
        let a = merging.consensus_spectrum().unwrap().clone();
        let b = binned.consensus_spectrum().unwrap();
        assert_eq!(a.peak_count(), 16);
        assert_eq!(b.peak_count(), 16);
        let score = checker.assess_similarity(&a, b);
        assert!(score > 0.9, "{score}");
    }

    #[test]
    fn test_consensus_idempotent() {
        let spectra = replicate_spectra();
        let mut builder = MergingConsensusBuilder::default().fresh("c");
        builder.add_spectra(spectra.iter().map(|s| s.as_ref()));
        let first: Vec<(u64, u32)> = builder
            .consensus_spectrum()
            .unwrap()
            .peaks()
            .iter()
            .map(|p| (p.mz.to_bits(), p.intensity.to_bits()))
            .collect();
        let second: Vec<(u64, u32)> = builder
            .consensus_spectrum()
            .unwrap()
            .peaks()
            .iter()
            .map(|p| (p.mz.to_bits(), p.intensity.to_bits()))
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_replicates_form_one_cluster() {
        let clusters =
            cluster_spectra(replicate_spectra(), FrankDotProduct::default(), ClusteringParams::default()).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].clustered_spectra_count(), 8);
    }
}
