use mzpeaks::prelude::*;
use tracing::debug;

use super::{
    cap_peaks, filter_noise, merge_within_tolerance, scale_by_count, to_spectrum, ConsensusError,
    ConsensusParams, ConsensusPeak, ConsensusSpectrumBuilder, PrecursorSummary,
};
use crate::spectrum::Spectrum;

/// The m/z tolerance increments used when merging consensus peaks
const MERGE_TOLERANCE_STEP: f64 = 0.1;

/// Identical m/z values closer than this are folded together on addition
const IDENTICAL_MZ: f64 = 1e-6;

/// Keeps an m/z sorted list of every distinct peak seen, merging peaks with
/// identical m/z as spectra are added. When materialized, nearby peaks are merged
/// with a tolerance that grows in steps up to [`ConsensusParams::fragment_tolerance`]
/// so that the closest pairs are combined first.
#[derive(Debug, Clone)]
pub struct MergingConsensusBuilder {
    id: String,
    params: ConsensusParams,
    peaks: Vec<ConsensusPeak>,
    precursor: PrecursorSummary,
    spectra_count: usize,
    snapshot: Option<Spectrum>,
    dirty: bool,
}

impl Default for MergingConsensusBuilder {
    fn default() -> Self {
        Self::new("", ConsensusParams::default())
    }
}

impl MergingConsensusBuilder {
    pub fn new(id: impl Into<String>, params: ConsensusParams) -> Self {
        Self {
            id: id.into(),
            params,
            peaks: Vec::new(),
            precursor: PrecursorSummary::default(),
            spectra_count: 0,
            snapshot: None,
            dirty: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Merge the incoming m/z sorted peaks into the running list in one pass
    fn fold_peaks(&mut self, spectrum: &Spectrum) {
        let mut incoming = spectrum
            .peaks()
            .iter()
            .map(|p| ConsensusPeak::new(p.mz(), p.intensity() as f64, 1))
            .peekable();
        let existing = std::mem::take(&mut self.peaks);
        let mut merged = Vec::with_capacity(existing.len() + spectrum.peak_count());

        for mut peak in existing {
            while let Some(next) = incoming.next_if(|p| p.mz < peak.mz - IDENTICAL_MZ) {
                merged.push(next);
            }
            while let Some(next) = incoming.next_if(|p| (p.mz - peak.mz).abs() <= IDENTICAL_MZ) {
                peak.intensity += next.intensity;
                peak.count += 1;
            }
            merged.push(peak);
        }
        merged.extend(incoming);
        self.peaks = merged;
    }

    fn build(&self) -> Spectrum {
        let mut peaks = self.peaks.clone();
        let mut tolerance = MERGE_TOLERANCE_STEP.min(self.params.fragment_tolerance);
        loop {
            while merge_within_tolerance(&mut peaks, tolerance) {}
            if tolerance >= self.params.fragment_tolerance {
                break;
            }
            tolerance = (tolerance + MERGE_TOLERANCE_STEP).min(self.params.fragment_tolerance);
        }
        scale_by_count(&mut peaks, self.spectra_count);
        let peaks = filter_noise(peaks, &self.params);
        let peaks = cap_peaks(peaks, self.params.max_peaks);
        to_spectrum(&self.id, &self.precursor, &peaks)
    }
}

impl ConsensusSpectrumBuilder for MergingConsensusBuilder {
    fn with_params(params: ConsensusParams) -> Self {
        Self::new("", params)
    }

    fn fresh(&self, id: &str) -> Self {
        Self::new(id, self.params)
    }

    fn add_spectrum(&mut self, spectrum: &Spectrum) {
        self.fold_peaks(spectrum);
        self.precursor.add(spectrum);
        self.spectra_count += 1;
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
                "Rebuilt consensus {} from {} spectra with {} peaks",
                self.id,
                self.spectra_count,
                spectrum.peak_count()
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
        self.peaks.clear();
        self.precursor.clear();
        self.spectra_count = 0;
        self.snapshot = None;
        self.dirty = false;
    }

    fn params(&self) -> &ConsensusParams {
        &self.params
    }
}
