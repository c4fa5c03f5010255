//! The immutable spectrum model the clustering machinery operates on.
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, OnceLock, RwLock};

use mzpeaks::prelude::*;
use mzpeaks::{CentroidPeak, MZPeakSetType};

/// A single fragment peak. Equality and ordering are by m/z, then intensity.
pub type Peak = CentroidPeak;

/// An m/z sorted collection of [`Peak`]
pub type PeakList = MZPeakSetType<Peak>;

/// The largest m/z difference at which two values are considered the same
pub const SMALL_MZ_DIFFERENCE: f64 = 0.002;

/// The intensity transform used when computing dot products, `1 + ln(x)` for
/// positive intensities and `0` otherwise.
#[inline]
pub fn transform_intensity(intensity: f32) -> f64 {
    if intensity > 0.0 {
        1.0 + (intensity as f64).ln()
    } else {
        0.0
    }
}

/// Compute a quality score for a spectrum. The score is not used for clustering
/// decisions, only surfaced to downstream consumers.
pub trait QualityScorer: Debug + Send + Sync {
    fn calculate_quality_score(&self, spectrum: &Spectrum) -> f64;
}

/// Estimates signal-to-noise as the mean of the six most intense peaks divided by
/// the median peak intensity.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalToNoiseScorer;

impl SignalToNoiseScorer {
    const HIGHEST_PEAKS: usize = 6;
}

impl QualityScorer for SignalToNoiseScorer {
    fn calculate_quality_score(&self, spectrum: &Spectrum) -> f64 {
        if spectrum.is_empty() {
            return 0.0;
        }
        let mut intensities: Vec<f32> = spectrum.peaks().iter().map(|p| p.intensity()).collect();
        intensities.sort_by(|a, b| a.total_cmp(b));

        let n = intensities.len();
        let median = if n % 2 == 0 {
            (intensities[n / 2 - 1] as f64 + intensities[n / 2] as f64) / 2.0
        } else {
            intensities[n / 2] as f64
        };
        if median <= 0.0 {
            return 0.0;
        }

        let top = Self::HIGHEST_PEAKS.min(n);
        let mean_top = intensities[n - top..]
            .iter()
            .map(|i| *i as f64)
            .sum::<f64>()
            / top as f64;
        mean_top / median
    }
}

fn lock_read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn lock_write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// A fragmentation spectrum with its precursor information.
///
/// The peak list is fixed at construction time. Derived values that are expensive
/// to compute (the highest-N peak subsets, the major peak m/z sets and the quality
/// score) are computed on first request and memoized, which is safe because nothing
/// they depend upon can change afterwards.
pub struct Spectrum {
    id: String,
    precursor_charge: i32,
    precursor_mz: f64,
    peaks: PeakList,
    properties: HashMap<String, String>,
    total_intensity: f64,
    sum_square_intensity: f64,
    quality_scorer: Arc<dyn QualityScorer>,
    quality: OnceLock<f64>,
    highest_peaks: RwLock<HashMap<usize, Arc<Spectrum>>>,
    major_peaks: RwLock<HashMap<usize, Arc<[i32]>>>,
}

impl Debug for Spectrum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spectrum")
            .field("id", &self.id)
            .field("precursor_charge", &self.precursor_charge)
            .field("precursor_mz", &self.precursor_mz)
            .field("peaks", &self.peaks.len())
            .field("total_intensity", &self.total_intensity)
            .finish()
    }
}

impl Clone for Spectrum {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            precursor_charge: self.precursor_charge,
            precursor_mz: self.precursor_mz,
            peaks: self.peaks.clone(),
            properties: self.properties.clone(),
            total_intensity: self.total_intensity,
            sum_square_intensity: self.sum_square_intensity,
            quality_scorer: self.quality_scorer.clone(),
            quality: self.quality.clone(),
            highest_peaks: Default::default(),
            major_peaks: Default::default(),
        }
    }
}

impl Spectrum {
    /// Create a new spectrum using [`SignalToNoiseScorer`] for quality assessment.
    ///
    /// `peaks` need not be sorted.
    pub fn new(id: impl Into<String>, precursor_charge: i32, precursor_mz: f64, peaks: Vec<Peak>) -> Self {
        Self::with_quality_scorer(
            id,
            precursor_charge,
            precursor_mz,
            peaks,
            Arc::new(SignalToNoiseScorer),
        )
    }

    pub fn with_quality_scorer(
        id: impl Into<String>,
        precursor_charge: i32,
        precursor_mz: f64,
        peaks: Vec<Peak>,
        quality_scorer: Arc<dyn QualityScorer>,
    ) -> Self {
        let peaks = PeakList::new(peaks);
        let (total_intensity, sum_square_intensity) = Self::calculate_intensities(&peaks);
        Self {
            id: id.into(),
            precursor_charge,
            precursor_mz,
            peaks,
            properties: HashMap::new(),
            total_intensity,
            sum_square_intensity,
            quality_scorer,
            quality: OnceLock::new(),
            highest_peaks: Default::default(),
            major_peaks: Default::default(),
        }
    }

    /// Copy this spectrum's identity, precursor information, properties and quality
    /// scorer onto a new peak list.
    pub fn with_peaks(&self, peaks: Vec<Peak>) -> Self {
        let mut dup = Self::with_quality_scorer(
            self.id.clone(),
            self.precursor_charge,
            self.precursor_mz,
            peaks,
            self.quality_scorer.clone(),
        );
        dup.properties = self.properties.clone();
        dup
    }

    fn calculate_intensities(peaks: &PeakList) -> (f64, f64) {
        peaks.iter().fold((0.0, 0.0), |(total, sum_sq), p| {
            let t = transform_intensity(p.intensity());
            (total + p.intensity() as f64, sum_sq + t * t)
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace the identifier, which must stay unique among the spectra being clustered
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// The precursor charge state, where `0` means unknown
    pub fn precursor_charge(&self) -> i32 {
        self.precursor_charge
    }

    pub fn precursor_mz(&self) -> f64 {
        self.precursor_mz
    }

    pub fn peaks(&self) -> &PeakList {
        &self.peaks
    }

    pub fn peak_count(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.len() == 0
    }

    pub fn total_intensity(&self) -> f64 {
        self.total_intensity
    }

    /// The sum of the squared, transformed intensities. See [`transform_intensity`].
    pub fn sum_square_intensity(&self) -> f64 {
        self.sum_square_intensity
    }

    /// The quality score of this spectrum, computed once with the spectrum's
    /// [`QualityScorer`].
    pub fn quality_score(&self) -> f64 {
        *self
            .quality
            .get_or_init(|| self.quality_scorer.calculate_quality_score(self))
    }

    pub fn quality_scorer(&self) -> &Arc<dyn QualityScorer> {
        &self.quality_scorer
    }

    /// Get the (at most) `n` most intense peaks as a spectrum sorted by m/z.
    ///
    /// Results are cached. A request for more peaks than the spectrum has shares a
    /// cache entry with every other such request.
    pub fn highest_n_peaks(&self, n: usize) -> Arc<Spectrum> {
        let key = n.min(self.peak_count());
        if let Some(hit) = lock_read(&self.highest_peaks).get(&key) {
            return hit.clone();
        }
        let built = Arc::new(self.build_highest_peaks(key));
        lock_write(&self.highest_peaks)
            .entry(key)
            .or_insert(built)
            .clone()
    }

    fn build_highest_peaks(&self, n: usize) -> Spectrum {
        let mut by_intensity: Vec<Peak> = self.peaks.iter().cloned().collect();
        by_intensity.sort_by(|a, b| {
            b.intensity
                .total_cmp(&a.intensity)
                .then_with(|| a.mz.total_cmp(&b.mz))
        });
        by_intensity.truncate(n);
        self.with_peaks(by_intensity)
    }

    /// The integer-truncated m/z values of the `n` most intense peaks, in m/z order.
    pub fn major_peak_mzs(&self, n: usize) -> Arc<[i32]> {
        if let Some(hit) = lock_read(&self.major_peaks).get(&n) {
            return hit.clone();
        }
        let mzs: Arc<[i32]> = self
            .highest_n_peaks(n)
            .peaks()
            .iter()
            .map(|p| p.mz() as i32)
            .collect();
        lock_write(&self.major_peaks)
            .entry(n)
            .or_insert(mzs)
            .clone()
    }

    /// Whether the truncated m/z `mz` is one of the `n` major peaks of this spectrum
    pub fn contains_major_peak(&self, mz: i32, n: usize) -> bool {
        self.major_peak_mzs(n).contains(&mz)
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|s| s.as_str())
    }

    /// Set a property. An empty key is ignored, a `None` value removes the key.
    pub fn set_property(&mut self, key: &str, value: Option<&str>) {
        if key.is_empty() {
            return;
        }
        match value {
            Some(value) => {
                self.properties.insert(key.to_string(), value.to_string());
            }
            None => {
                self.properties.remove(key);
            }
        }
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// A weaker form of equality, ignoring the identifier and tolerating
    /// small m/z and intensity differences.
    pub fn equivalent(&self, other: &Spectrum) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        if (self.precursor_mz - other.precursor_mz).abs() > SMALL_MZ_DIFFERENCE {
            return false;
        }
        if self.peak_count() != other.peak_count() {
            return false;
        }
        let peaks_match = self.peaks.iter().zip(other.peaks.iter()).all(|(a, b)| {
            let intensity_scale = a.intensity().abs().max(b.intensity().abs()).max(1.0);
            (a.mz() - b.mz()).abs() <= SMALL_MZ_DIFFERENCE
                && (a.intensity() - b.intensity()).abs() / intensity_scale <= 1e-3
        });
        peaks_match && self.properties == other.properties
    }

    /// The natural ordering of spectra, first by charge, then by precursor m/z
    /// and finally by identifier.
    pub fn natural_cmp(&self, other: &Spectrum) -> Ordering {
        self.precursor_charge
            .cmp(&other.precursor_charge)
            .then_with(|| self.precursor_mz.total_cmp(&other.precursor_mz))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialEq for Spectrum {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.precursor_charge == other.precursor_charge
            && self.precursor_mz.to_bits() == other.precursor_mz.to_bits()
            && self.peak_count() == other.peak_count()
            && self
                .peaks
                .iter()
                .zip(other.peaks.iter())
                .all(|(a, b)| a.mz.to_bits() == b.mz.to_bits() && a.intensity.to_bits() == b.intensity.to_bits())
    }
}

impl PartialOrd for Spectrum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.natural_cmp(other))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_spectrum() -> Spectrum {
        Spectrum::new(
            "scan=1",
            2,
            500.25,
            vec![
                Peak::new(300.1, 50.0, 0),
                Peak::new(150.0, 10.0, 0),
                Peak::new(400.7, 200.0, 0),
                Peak::new(250.3, 120.0, 0),
                Peak::new(175.2, 0.0, 0),
            ],
        )
    }

    #[test]
    fn test_peaks_sorted() {
        let spec = make_spectrum();
        let mzs: Vec<f64> = spec.peaks().iter().map(|p| p.mz()).collect();
        assert_eq!(mzs, vec![150.0, 175.2, 250.3, 300.1, 400.7]);
    }

    #[test]
    fn test_intensity_statistics() {
        let spec = make_spectrum();
        assert!((spec.total_intensity() - 380.0).abs() < 1e-6);
        let expected: f64 = [50.0f64, 10.0, 200.0, 120.0]
            .iter()
            .map(|x| (1.0 + x.ln()).powi(2))
            .sum();
        assert!((spec.sum_square_intensity() - expected).abs() < 1e-6);
        assert_eq!(transform_intensity(0.0), 0.0);
    }

    #[test]
    fn test_highest_peaks() {
        let spec = make_spectrum();
        let top = spec.highest_n_peaks(2);
        let mzs: Vec<f64> = top.peaks().iter().map(|p| p.mz()).collect();
        assert_eq!(mzs, vec![250.3, 400.7]);
        assert_eq!(top.id(), spec.id());

        let again = spec.highest_n_peaks(2);
        assert!(Arc::ptr_eq(&top, &again));

        let all = spec.highest_n_peaks(50);
        let more = spec.highest_n_peaks(100);
        assert_eq!(all.peak_count(), 5);
        assert!(Arc::ptr_eq(&all, &more));
    }

    #[test]
    fn test_major_peaks() {
        let spec = make_spectrum();
        assert_eq!(&*spec.major_peak_mzs(3), &[250, 300, 400]);
        assert!(spec.contains_major_peak(400, 3));
        assert!(!spec.contains_major_peak(150, 3));
        assert!(spec.contains_major_peak(150, 5));
    }

    #[test]
    fn test_properties() {
        let mut spec = make_spectrum();
        spec.set_property("", Some("ignored"));
        assert!(spec.properties().is_empty());
        spec.set_property("sequence", Some("PEPTIDE"));
        assert_eq!(spec.property("sequence"), Some("PEPTIDE"));
        spec.set_property("sequence", None);
        assert_eq!(spec.property("sequence"), None);
    }

    #[test]
    fn test_quality_score_memoized() {
        let spec = make_spectrum();
        let score = spec.quality_score();
        // mean of all five (fewer than six) over the median of 50
        assert!((score - (380.0 / 5.0) / 50.0).abs() < 1e-6, "{score}");
        assert_eq!(score.to_bits(), spec.quality_score().to_bits());

        let empty = Spectrum::new("empty", 0, 100.0, Vec::new());
        assert_eq!(empty.quality_score(), 0.0);
    }

    #[test]
    fn test_equality_and_equivalence() {
        let a = make_spectrum();
        let b = make_spectrum();
        assert_eq!(a, b);
        let mut c = a.with_peaks(a.peaks().iter().cloned().collect());
        assert!(a.equivalent(&c));
        c.set_property("title", Some("different"));
        assert!(!a.equivalent(&c));

        let d = Spectrum::new("scan=0", 2, 500.25, Vec::new());
        assert_eq!(d.natural_cmp(&a), Ordering::Less);
        let e = Spectrum::new("scan=9", 1, 900.0, Vec::new());
        assert_eq!(e.natural_cmp(&a), Ordering::Less);
    }
}
