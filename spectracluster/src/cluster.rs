//! A group of spectra believed to come from the same analyte
use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::comparisons::{ComparisonMatch, ComparisonMatches};
use crate::consensus::{ConsensusError, ConsensusSpectrumBuilder, MergingConsensusBuilder};
use crate::similarity::SimilarityScore;
use crate::spectrum::Spectrum;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClusterError {
    #[error("Cluster {0} has no spectra to build a consensus from")]
    EmptyCluster(String),
    #[error("An error occurred while building a consensus spectrum: {0}")]
    ConsensusError(#[from] ConsensusError),
}

/// A cluster of spectra with a lazily maintained consensus spectrum and a bounded
/// record of its best comparisons against other clusters.
///
/// The cluster owns its members and its consensus builder. It changes only by
/// adding spectra, absorbing another cluster or recording a comparison.
#[derive(Debug, Clone)]
pub struct SpectralCluster<B: ConsensusSpectrumBuilder = MergingConsensusBuilder> {
    id: String,
    spectra: Vec<Arc<Spectrum>>,
    consensus: B,
    comparison_matches: ComparisonMatches,
    precursor_mz_sum: f64,
    charge_counts: BTreeMap<i32, usize>,
    precursor_charge: i32,
}

impl<B: ConsensusSpectrumBuilder> PartialEq for SpectralCluster<B> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<B: ConsensusSpectrumBuilder> SpectralCluster<B> {
    /// Create an empty cluster. `template` supplies the consensus configuration, and
    /// `retained_comparisons` bounds the number of comparison results kept.
    pub fn new(id: impl Into<String>, template: &B, retained_comparisons: usize) -> Self {
        let id = id.into();
        let consensus = template.fresh(&id);
        Self {
            id,
            spectra: Vec::new(),
            consensus,
            comparison_matches: ComparisonMatches::new(retained_comparisons),
            precursor_mz_sum: 0.0,
            charge_counts: BTreeMap::new(),
            precursor_charge: 0,
        }
    }

    /// Create a cluster holding a single spectrum, sharing that spectrum's identifier
    pub fn from_spectrum(spectrum: Arc<Spectrum>, template: &B, retained_comparisons: usize) -> Self {
        let mut this = Self::new(spectrum.id(), template, retained_comparisons);
        this.add_spectra([spectrum]);
        this
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add_spectra<I: IntoIterator<Item = Arc<Spectrum>>>(&mut self, spectra: I) {
        for spectrum in spectra {
            self.consensus.add_spectrum(&spectrum);
            self.precursor_mz_sum += spectrum.precursor_mz();
            self.update_charge(spectrum.precursor_charge());
            self.spectra.push(spectrum);
        }
    }

    fn update_charge(&mut self, charge: i32) {
        if charge == 0 {
            return;
        }
        let count = {
            let entry = self.charge_counts.entry(charge).or_default();
            *entry += 1;
            *entry
        };
        if self.precursor_charge == 0 {
            self.precursor_charge = charge;
            return;
        }
        let current = self
            .charge_counts
            .get(&self.precursor_charge)
            .copied()
            .unwrap_or_default();
        if count > current || (count == current && charge < self.precursor_charge) {
            self.precursor_charge = charge;
        }
    }

    /// Take in all of `other`'s spectra and offer its retained comparison results
    /// to this cluster.
    pub fn absorb(&mut self, other: SpectralCluster<B>) {
        let SpectralCluster {
            spectra,
            comparison_matches,
            ..
        } = other;
        self.add_spectra(spectra);
        for m in comparison_matches.iter() {
            if m.id != self.id {
                self.comparison_matches.insert(&m.id, m.score);
            }
        }
    }

    /// Record the score of a comparison with cluster `other_id`
    pub fn save_comparison_result(&mut self, other_id: &str, score: SimilarityScore) -> bool {
        self.comparison_matches.insert(other_id, score)
    }

    pub fn is_in_best_comparison_results(&self, other_id: &str) -> bool {
        self.comparison_matches.contains(other_id)
    }

    pub fn comparison_matches(&self) -> &ComparisonMatches {
        &self.comparison_matches
    }

    pub fn best_comparison_results(&self) -> Vec<&ComparisonMatch> {
        self.comparison_matches.sorted()
    }

    pub fn clustered_spectra(&self) -> &[Arc<Spectrum>] {
        &self.spectra
    }

    pub fn spectrum_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.spectra.iter().map(|s| s.id())
    }

    pub fn clustered_spectra_count(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    /// The mean precursor m/z of the members
    pub fn precursor_mz(&self) -> f64 {
        if self.spectra.is_empty() {
            0.0
        } else {
            self.precursor_mz_sum / self.spectra.len() as f64
        }
    }

    /// The most common known precursor charge of the members, `0` if none is known
    pub fn precursor_charge(&self) -> i32 {
        self.precursor_charge
    }

    /// Get the consensus spectrum, rebuilding it if members were added since it was
    /// last built
    pub fn consensus_spectrum(&mut self) -> Result<&Spectrum, ClusterError> {
        if self.spectra.is_empty() {
            return Err(ClusterError::EmptyCluster(self.id.clone()));
        }
        Ok(self.consensus.consensus_spectrum()?)
    }

    /// Bring the consensus spectrum up to date without borrowing it
    pub fn refresh(&mut self) -> Result<(), ClusterError> {
        self.consensus_spectrum().map(|_| ())
    }

    /// The consensus spectrum if it is up to date
    pub fn cached_consensus(&self) -> Option<&Spectrum> {
        self.consensus.snapshot()
    }

    pub fn is_dirty(&self) -> bool {
        self.consensus.is_dirty()
    }

    pub fn consensus_builder(&self) -> &B {
        &self.consensus
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::spectrum::Peak;

    fn spectrum(id: &str, charge: i32, mz: f64) -> Arc<Spectrum> {
        Arc::new(Spectrum::new(
            id,
            charge,
            mz,
            vec![Peak::new(150.0, 10.0, 0), Peak::new(300.0, 20.0, 0)],
        ))
    }

    #[test]
    fn test_add_spectra() {
        let template = MergingConsensusBuilder::default();
        let mut cluster = SpectralCluster::new("c1", &template, 30);
        assert!(matches!(
            cluster.consensus_spectrum(),
            Err(ClusterError::EmptyCluster(_))
        ));

        cluster.add_spectra([spectrum("a", 2, 400.0), spectrum("b", 3, 402.0)]);
        cluster.add_spectra([spectrum("c", 3, 404.0)]);
        assert_eq!(cluster.clustered_spectra_count(), 3);
        assert_eq!(cluster.precursor_mz(), 402.0);
        assert_eq!(cluster.precursor_charge(), 3);
        assert_eq!(cluster.spectrum_ids().collect::<Vec<_>>(), vec!["a", "b", "c"]);

        let consensus = cluster.consensus_spectrum().unwrap();
        assert_eq!(consensus.id(), "c1");
        assert_eq!(consensus.precursor_charge(), 3);
        assert!(cluster.cached_consensus().is_some());
    }

    #[test]
    fn test_charge_ties_prefer_smaller() {
        let template = MergingConsensusBuilder::default();
        let mut cluster = SpectralCluster::new("c1", &template, 30);
        cluster.add_spectra([spectrum("a", 3, 400.0), spectrum("b", 2, 400.0), spectrum("c", 0, 400.0)]);
        assert_eq!(cluster.precursor_charge(), 2);
    }

    #[test]
    fn test_count_matches_additions() {
        let template = MergingConsensusBuilder::default();
        let mut cluster = SpectralCluster::new("c1", &template, 30);
        for i in 0..25 {
            cluster.add_spectra([spectrum(&i.to_string(), 2, 400.0 + i as f64 * 0.01)]);
            assert_eq!(cluster.clustered_spectra_count(), i + 1);
        }
    }

    #[test]
    fn test_absorb() {
        let template = MergingConsensusBuilder::default();
        let mut a = SpectralCluster::from_spectrum(spectrum("a", 2, 400.0), &template, 30);
        let mut b = SpectralCluster::from_spectrum(spectrum("b", 2, 400.5), &template, 30);
        assert_eq!(a.id(), "a");
        a.consensus_spectrum().unwrap();

        b.save_comparison_result("a", 0.9);
        b.save_comparison_result("x", 0.4);
        a.absorb(b);
        assert_eq!(a.clustered_spectra_count(), 2);
        assert!(a.is_dirty());
        assert!(a.cached_consensus().is_none());
        assert!(a.is_in_best_comparison_results("x"));
        assert!(!a.is_in_best_comparison_results("a"));
        assert_eq!(a.precursor_mz(), 400.25);
    }

    #[test]
    fn test_best_comparisons() {
        let template = MergingConsensusBuilder::default();
        let mut cluster = SpectralCluster::new("c", &template, 30);
        for i in 0..91 {
            cluster.save_comparison_result(&i.to_string(), (10 + i) as f64 / 100.0);
        }
        assert_eq!(cluster.comparison_matches().len(), 30);
        assert!(!cluster.is_in_best_comparison_results("0"));
        assert!(!cluster.is_in_best_comparison_results("59"));
        assert!(cluster.is_in_best_comparison_results("61"));
        assert_eq!(cluster.best_comparison_results()[0].id, "90");
    }
}
