/*!
Consensus spectrum construction.

A [`ConsensusSpectrumBuilder`] folds member spectra into a running summary and
materializes a representative [`Spectrum`] on demand. The snapshot is cached
until the next addition marks the builder dirty.
*/
use std::collections::BTreeMap;
use std::fmt::Debug;

use itertools::Itertools;
use thiserror::Error;

use crate::params::ConfigurationError;
use crate::similarity::DEFAULT_FRAGMENT_TOLERANCE;
use crate::spectrum::{Peak, Spectrum};

mod binned;
mod merging;

pub use binned::BinnedConsensusBuilder;
pub use merging::MergingConsensusBuilder;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsensusError {
    #[error("Cannot build a consensus spectrum without any spectra")]
    NoSpectra,
}

/// Parameters shared by the consensus strategies
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConsensusParams {
    /// The m/z tolerance within which peaks are merged
    pub fragment_tolerance: f64,
    /// The noise filter is not applied to consensus spectra with this many peaks or fewer
    pub min_peaks: usize,
    /// If set, keep only this many of the most intense peaks
    pub max_peaks: Option<usize>,
    /// The width of the m/z windows of the noise filter
    pub noise_filter_window: f64,
    /// The number of peaks the noise filter keeps in each window
    pub peaks_per_window: usize,
    /// The bin width of [`BinnedConsensusBuilder`], the fragment tolerance when not set
    pub bin_width: Option<f64>,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            fragment_tolerance: DEFAULT_FRAGMENT_TOLERANCE,
            min_peaks: 50,
            max_peaks: None,
            noise_filter_window: 100.0,
            peaks_per_window: 5,
            bin_width: None,
        }
    }
}

impl ConsensusParams {
    pub fn bin_width(&self) -> f64 {
        self.bin_width.unwrap_or(self.fragment_tolerance)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.fragment_tolerance > 0.0) {
            return Err(ConfigurationError::NonPositiveTolerance(self.fragment_tolerance));
        }
        if let Some(width) = self.bin_width {
            if !(width > 0.0) {
                return Err(ConfigurationError::NonPositiveTolerance(width));
            }
        }
        if !(self.noise_filter_window > 0.0) {
            return Err(ConfigurationError::NonPositiveNoiseWindow(self.noise_filter_window));
        }
        Ok(())
    }
}

/// Incrementally builds a consensus spectrum.
pub trait ConsensusSpectrumBuilder: Debug + Send + Sync {
    /// Create an empty builder with the given parameters
    fn with_params(params: ConsensusParams) -> Self
    where
        Self: Sized;

    /// Create an empty builder with the same configuration whose consensus
    /// spectra carry the identifier `id`
    fn fresh(&self, id: &str) -> Self
    where
        Self: Sized;

    fn add_spectrum(&mut self, spectrum: &Spectrum);

    fn add_spectra<'a, I: IntoIterator<Item = &'a Spectrum>>(&mut self, spectra: I)
    where
        Self: Sized,
    {
        for spectrum in spectra {
            self.add_spectrum(spectrum);
        }
    }

    fn spectra_count(&self) -> usize;

    /// Whether spectra have been added since the last snapshot was built
    fn is_dirty(&self) -> bool;

    /// Rebuild the snapshot if it is stale
    fn refresh(&mut self) -> Result<(), ConsensusError>;

    /// The current snapshot, if it is up to date
    fn snapshot(&self) -> Option<&Spectrum>;

    fn consensus_spectrum(&mut self) -> Result<&Spectrum, ConsensusError> {
        self.refresh()?;
        self.snapshot().ok_or(ConsensusError::NoSpectra)
    }

    fn clear(&mut self);

    fn params(&self) -> &ConsensusParams;
}

/// An intermediate consensus peak, an intensity sum with the number of member
/// spectra that contributed to it
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ConsensusPeak {
    pub mz: f64,
    pub intensity: f64,
    pub count: usize,
}

impl ConsensusPeak {
    pub fn new(mz: f64, intensity: f64, count: usize) -> Self {
        Self {
            mz,
            intensity,
            count,
        }
    }

    /// Fold `other` into this peak at the intensity-weighted mean m/z
    pub fn merge(&mut self, other: &ConsensusPeak) {
        let total = self.intensity + other.intensity;
        if total > 0.0 {
            self.mz = (self.mz * self.intensity + other.mz * other.intensity) / total;
        } else {
            self.mz = (self.mz + other.mz) / 2.0;
        }
        self.intensity = total;
        self.count += other.count;
    }
}

/// Merge neighboring m/z-sorted peaks lying within `tolerance` of each other in a
/// single pass. Returns whether anything was merged.
pub(crate) fn merge_within_tolerance(peaks: &mut Vec<ConsensusPeak>, tolerance: f64) -> bool {
    if peaks.len() < 2 {
        return false;
    }
    let mut merged: Vec<ConsensusPeak> = Vec::with_capacity(peaks.len());
    let mut changed = false;
    for peak in peaks.drain(..) {
        match merged.last_mut() {
            Some(last) if (peak.mz - last.mz).abs() <= tolerance => {
                last.merge(&peak);
                changed = true;
            }
            _ => merged.push(peak),
        }
    }
    *peaks = merged;
    changed
}

/// Convert running intensity sums into consensus intensities, the mean intensity
/// boosted by the fraction of members the peak was observed in.
pub(crate) fn scale_by_count(peaks: &mut [ConsensusPeak], n_spectra: usize) {
    if n_spectra == 0 {
        return;
    }
    let n = n_spectra as f64;
    for peak in peaks.iter_mut() {
        let observed = (peak.count as f64 / n).min(1.0);
        peak.intensity = peak.intensity / n * (0.95 + 0.05 * (1.0 + observed).powi(5));
    }
}

fn by_intensity_desc(a: &ConsensusPeak, b: &ConsensusPeak) -> std::cmp::Ordering {
    b.intensity
        .total_cmp(&a.intensity)
        .then_with(|| a.mz.total_cmp(&b.mz))
}

/// Keep the `params.peaks_per_window` most intense peaks in each
/// `params.noise_filter_window` wide m/z window, unless there are no more than
/// `params.min_peaks` peaks to begin with. `peaks` must be sorted by m/z.
pub(crate) fn filter_noise(peaks: Vec<ConsensusPeak>, params: &ConsensusParams) -> Vec<ConsensusPeak> {
    if peaks.len() <= params.min_peaks || params.noise_filter_window <= 0.0 {
        return peaks;
    }
    let Some(first) = peaks.first() else {
        return peaks;
    };
    let origin = first.mz;
    let width = params.noise_filter_window;
    let mut kept: Vec<ConsensusPeak> = peaks
        .into_iter()
        .group_by(|p| ((p.mz - origin) / width).floor() as i64)
        .into_iter()
        .flat_map(|(_, window)| {
            window
                .sorted_by(by_intensity_desc)
                .take(params.peaks_per_window)
        })
        .collect();
    kept.sort_by(|a, b| a.mz.total_cmp(&b.mz));
    kept
}

pub(crate) fn cap_peaks(mut peaks: Vec<ConsensusPeak>, max_peaks: Option<usize>) -> Vec<ConsensusPeak> {
    if let Some(max_peaks) = max_peaks {
        if peaks.len() > max_peaks {
            peaks.sort_by(by_intensity_desc);
            peaks.truncate(max_peaks);
            peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));
        }
    }
    peaks
}

/// Running precursor statistics of the spectra folded into a consensus
#[derive(Debug, Default, Clone)]
pub(crate) struct PrecursorSummary {
    mz_sum: f64,
    count: usize,
    charges: BTreeMap<i32, usize>,
}

impl PrecursorSummary {
    pub fn add(&mut self, spectrum: &Spectrum) {
        self.mz_sum += spectrum.precursor_mz();
        self.count += 1;
        if spectrum.precursor_charge() != 0 {
            *self.charges.entry(spectrum.precursor_charge()).or_default() += 1;
        }
    }

    pub fn precursor_mz(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mz_sum / self.count as f64
        }
    }

    /// The most common known charge, preferring the smaller charge on ties
    pub fn precursor_charge(&self) -> i32 {
        let mut best = (0, 0usize);
        for (z, n) in self.charges.iter() {
            if *n > best.1 {
                best = (*z, *n);
            }
        }
        best.0
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

pub(crate) fn to_spectrum(id: &str, precursor: &PrecursorSummary, peaks: &[ConsensusPeak]) -> Spectrum {
    Spectrum::new(
        id,
        precursor.precursor_charge(),
        precursor.precursor_mz(),
        peaks
            .iter()
            .map(|p| Peak::new(p.mz, p.intensity as f32, 0))
            .collect(),
    )
}
