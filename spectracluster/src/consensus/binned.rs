use std::collections::HashMap;

use identity_hash::BuildIdentityHasher;
use mzpeaks::prelude::*;
use tracing::debug;

use super::{
    cap_peaks, filter_noise, merge_within_tolerance, scale_by_count, to_spectrum, ConsensusError,
    ConsensusParams, ConsensusPeak, ConsensusSpectrumBuilder, PrecursorSummary,
};
use crate::spectrum::Spectrum;

type BinIndex = usize;

#[derive(Debug, Default, Clone, Copy)]
struct Bin {
    intensity: f64,
    weighted_mz: f64,
    count: usize,
    last_contributor: usize,
}

/// Accumulates peaks into fixed width m/z bins, tracking the intensity sum, the
/// intensity-weighted m/z sum and the number of contributing spectra of each bin.
///
/// When materialized, each occupied bin becomes one peak at its weighted mean m/z,
/// and peaks in adjacent bins that fall within the fragment tolerance are merged.
#[derive(Debug, Clone)]
pub struct BinnedConsensusBuilder {
    id: String,
    params: ConsensusParams,
    bins: HashMap<BinIndex, Bin, BuildIdentityHasher<BinIndex>>,
    precursor: PrecursorSummary,
    spectra_count: usize,
    snapshot: Option<Spectrum>,
    dirty: bool,
}

impl Default for BinnedConsensusBuilder {
    fn default() -> Self {
        Self::new("", ConsensusParams::default())
    }
}

impl BinnedConsensusBuilder {
    pub fn new(id: impl Into<String>, params: ConsensusParams) -> Self {
        Self {
            id: id.into(),
            params,
            bins: HashMap::default(),
            precursor: PrecursorSummary::default(),
            spectra_count: 0,
            snapshot: None,
            dirty: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    #[inline]
    fn bin_for(&self, mz: f64) -> BinIndex {
        let i = (mz / self.params.bin_width()).floor();
        if i > 0.0 {
            i as BinIndex
        } else {
            0
        }
    }

    fn build(&self) -> Spectrum {
        let width = self.params.bin_width();
        let mut indices: Vec<_> = self.bins.keys().copied().collect();
        indices.sort_unstable();
        let mut peaks: Vec<ConsensusPeak> = indices
            .into_iter()
            .filter_map(|i| self.bins.get(&i).map(|bin| (i, bin)))
            .map(|(i, bin)| {
                let mz = if bin.intensity > 0.0 {
                    bin.weighted_mz / bin.intensity
                } else {
                    (i as f64 + 0.5) * width
                };
                ConsensusPeak::new(mz, bin.intensity, bin.count)
            })
            .collect();
        merge_within_tolerance(&mut peaks, self.params.fragment_tolerance);
        scale_by_count(&mut peaks, self.spectra_count);
        let peaks = filter_noise(peaks, &self.params);
        let peaks = cap_peaks(peaks, self.params.max_peaks);
        to_spectrum(&self.id, &self.precursor, &peaks)
    }
}

impl ConsensusSpectrumBuilder for BinnedConsensusBuilder {
    fn with_params(params: ConsensusParams) -> Self {
        Self::new("", params)
    }

    fn fresh(&self, id: &str) -> Self {
        Self::new(id, self.params)
    }

    fn add_spectrum(&mut self, spectrum: &Spectrum) {
        self.spectra_count += 1;
        let contributor = self.spectra_count;
        for peak in spectrum.peaks().iter() {
            let index = self.bin_for(peak.mz());
            let bin = self.bins.entry(index).or_default();
            let intensity = peak.intensity() as f64;
            bin.intensity += intensity;
            bin.weighted_mz += intensity * peak.mz();
            if bin.last_contributor != contributor {
                bin.count += 1;
                bin.last_contributor = contributor;
            }
        }
        self.precursor.add(spectrum);
        self.dirty = true;
    }

    fn spectra_count(&self) -> usize {
        self.spectra_count
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn refresh(&mut self) -> Result<(), ConsensusError> {
        if self.spectra_count == 0 {
            return Err(ConsensusError::NoSpectra);
        }
        if self.dirty || self.snapshot.is_none() {
            let spectrum = self.build();
            debug!(
                "Rebuilt binned consensus {} from {} spectra over {} bins",
                self.id,
                self.spectra_count,
                self.bins.len()
            );
            self.snapshot = Some(spectrum);
            self.dirty = false;
        }
        Ok(())
    }

    fn snapshot(&self) -> Option<&Spectrum> {
        if self.dirty {
            None
        } else {
            self.snapshot.as_ref()
        }
    }

    fn clear(&mut self) {
        self.bins.clear();
        self.precursor.clear();
        self.spectra_count = 0;
        self.snapshot = None;
        self.dirty = false;
    }

    fn params(&self) -> &ConsensusParams {
        &self.params
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::spectrum::Peak;

    fn spectrum(id: &str, peaks: &[(f64, f32)]) -> Spectrum {
        Spectrum::new(
            id,
            2,
            500.0,
            peaks.iter().map(|(mz, i)| Peak::new(*mz, *i, 0)).collect(),
        )
    }

    #[test]
    fn test_binning() {
        let mut builder = BinnedConsensusBuilder::new("c", ConsensusParams::default());
        builder.add_spectrum(&spectrum("a", &[(100.1, 10.0), (100.2, 10.0), (300.0, 5.0)]));
        builder.add_spectrum(&spectrum("b", &[(100.3, 20.0)]));
        assert_eq!(builder.bin_count(), 2);
        let bin = builder.bins[&200];
        // two peaks of the first spectrum share the bin but count once
        assert_eq!(bin.count, 2);
        assert_eq!(bin.intensity, 40.0);

        let consensus = builder.consensus_spectrum().unwrap();
        assert_eq!(consensus.peak_count(), 2);
        let mz = consensus.peaks()[0].mz();
        assert!((mz - (100.1 * 10.0 + 100.2 * 10.0 + 100.3 * 20.0) / 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_idempotent() {
        let mut builder = BinnedConsensusBuilder::new("c", ConsensusParams::default());
        builder.add_spectrum(&spectrum("a", &[(100.1, 10.0), (250.7, 10.0)]));
        builder.add_spectrum(&spectrum("b", &[(100.3, 20.0), (400.0, 3.0)]));
        let first = builder.consensus_spectrum().unwrap().clone();
        let second = builder.consensus_spectrum().unwrap();
        assert_eq!(&first, second);
        assert!(!builder.is_dirty());

        builder.add_spectrum(&spectrum("c", &[]));
        assert!(builder.is_dirty());
        assert_eq!(builder.spectra_count(), 3);
    }
}
