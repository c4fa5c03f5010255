//! Spectrum similarity metrics
use std::cmp::Ordering;

use mzpeaks::prelude::*;
use statrs::distribution::{Discrete, Hypergeometric};
use tracing::trace;

use crate::spectrum::{transform_intensity, Peak, Spectrum};

pub type SimilarityScore = f64;

/// The default fragment m/z tolerance in Da
pub const DEFAULT_FRAGMENT_TOLERANCE: f64 = 0.5;

/// Compare two spectra, producing a symmetric score within [`SimilarityChecker::score_range`].
///
/// Implementations must not fail, even on empty peak lists, for which they return the
/// minimum of their range.
pub trait SimilarityChecker: Send + Sync {
    fn assess_similarity(&self, spectrum1: &Spectrum, spectrum2: &Spectrum) -> SimilarityScore;

    /// Whether peaks are filtered before scoring
    fn peak_filtering(&self) -> bool;

    fn set_peak_filtering(&mut self, value: bool);

    /// The inclusive `(min, max)` range of valid scores
    fn score_range(&self) -> (SimilarityScore, SimilarityScore);

    fn minimum_score(&self) -> SimilarityScore {
        self.score_range().0
    }

    fn is_valid_score(&self, score: SimilarityScore) -> bool {
        let (lo, hi) = self.score_range();
        score.is_finite() && score >= lo && score <= hi
    }

    fn name(&self) -> &'static str;

    fn version(&self) -> &'static str {
        "0.1"
    }
}

impl<T: SimilarityChecker> SimilarityChecker for Box<T> {
    fn assess_similarity(&self, spectrum1: &Spectrum, spectrum2: &Spectrum) -> SimilarityScore {
        (**self).assess_similarity(spectrum1, spectrum2)
    }

    fn peak_filtering(&self) -> bool {
        (**self).peak_filtering()
    }

    fn set_peak_filtering(&mut self, value: bool) {
        (**self).set_peak_filtering(value)
    }

    fn score_range(&self) -> (SimilarityScore, SimilarityScore) {
        (**self).score_range()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn version(&self) -> &'static str {
        (**self).version()
    }
}

/// Order two spectra so that pairwise computations see them in the same
/// order regardless of argument order.
fn canonical_pair<'a>(a: &'a Spectrum, b: &'a Spectrum) -> (&'a Spectrum, &'a Spectrum) {
    let ord = a
        .precursor_mz()
        .total_cmp(&b.precursor_mz())
        .then_with(|| a.id().cmp(b.id()))
        .then_with(|| a.peak_count().cmp(&b.peak_count()))
        .then_with(|| a.total_intensity().total_cmp(&b.total_intensity()));
    match ord {
        Ordering::Greater => (b, a),
        _ => (a, b),
    }
}

/// Greedily pair peaks of two m/z sorted peak lists that lie within `tolerance` of
/// each other, preferring the closer neighbor when one exists. Each peak is used at
/// most once.
pub fn match_peaks(peaks1: &[Peak], peaks2: &[Peak], tolerance: f64) -> Vec<(usize, usize)> {
    let mut matches = Vec::new();
    let mut i = 0;
    let mut j = 0;
    while i < peaks1.len() && j < peaks2.len() {
        let delta = peaks1[i].mz - peaks2[j].mz;
        if delta.abs() <= tolerance {
            if j + 1 < peaks2.len() && (peaks1[i].mz - peaks2[j + 1].mz).abs() < delta.abs() {
                j += 1;
                continue;
            }
            if i + 1 < peaks1.len() && (peaks1[i + 1].mz - peaks2[j].mz).abs() < delta.abs() {
                i += 1;
                continue;
            }
            matches.push((i, j));
            i += 1;
            j += 1;
        } else if delta < 0.0 {
            i += 1;
        } else {
            j += 1;
        }
    }
    matches
}

/// The number of peaks to compare given a precursor, 15 per 1000 Da of precursor
/// mass with a floor of 15. An unknown charge is treated as 2.
pub fn peaks_to_compare(spectrum: &Spectrum) -> usize {
    let charge = if spectrum.precursor_charge() > 0 {
        spectrum.precursor_charge()
    } else {
        2
    };
    let mass = spectrum.precursor_mz() * charge as f64;
    let k = (15.0 * mass / 1000.0).round();
    if k.is_finite() && k > 15.0 {
        k as usize
    } else {
        15
    }
}

/// A normalized dot product over the transformed intensities of matched peaks,
/// after Frank et al. (2008).
///
/// # References
/// - Frank, A. M., Bandeira, N., Shen, Z., Tanner, S., Briggs, S. P., Smith, R. D., &
///   Pevzner, P. A. (2008). Clustering millions of tandem mass spectra. Journal of
///   Proteome Research, 7(1), 113–122. <https://doi.org/10.1021/pr070361e>
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrankDotProduct {
    pub fragment_tolerance: f64,
    pub peak_filtering: bool,
}

impl Default for FrankDotProduct {
    fn default() -> Self {
        Self {
            fragment_tolerance: DEFAULT_FRAGMENT_TOLERANCE,
            peak_filtering: true,
        }
    }
}

impl FrankDotProduct {
    pub fn new(fragment_tolerance: f64, peak_filtering: bool) -> Self {
        Self {
            fragment_tolerance,
            peak_filtering,
        }
    }

    fn dot_product(&self, spectrum1: &Spectrum, spectrum2: &Spectrum) -> SimilarityScore {
        let peaks1 = spectrum1.peaks();
        let peaks2 = spectrum2.peaks();
        let matches = match_peaks(
            peaks1.as_slice(),
            peaks2.as_slice(),
            self.fragment_tolerance,
        );

        let dot: f64 = matches
            .iter()
            .map(|(i, j)| {
                transform_intensity(peaks1[*i].intensity()) * transform_intensity(peaks2[*j].intensity())
            })
            .sum();

        let norm = (spectrum1.sum_square_intensity() * spectrum2.sum_square_intensity()).sqrt();
        if norm <= 0.0 {
            return 0.0;
        }
        trace!(
            "{} vs {}: {} matched peaks, dot {dot}, norm {norm}",
            spectrum1.id(),
            spectrum2.id(),
            matches.len()
        );
        dot / norm
    }
}

impl SimilarityChecker for FrankDotProduct {
    fn assess_similarity(&self, spectrum1: &Spectrum, spectrum2: &Spectrum) -> SimilarityScore {
        if spectrum1.is_empty() || spectrum2.is_empty() {
            return 0.0;
        }
        let (spectrum1, spectrum2) = canonical_pair(spectrum1, spectrum2);
        if self.peak_filtering {
            let k = peaks_to_compare(spectrum1).max(peaks_to_compare(spectrum2));
            let filtered1 = spectrum1.highest_n_peaks(k);
            let filtered2 = spectrum2.highest_n_peaks(k);
            self.dot_product(&filtered1, &filtered2)
        } else {
            self.dot_product(spectrum1, spectrum2)
        }
    }

    fn peak_filtering(&self) -> bool {
        self.peak_filtering
    }

    fn set_peak_filtering(&mut self, value: bool) {
        self.peak_filtering = value;
    }

    fn score_range(&self) -> (SimilarityScore, SimilarityScore) {
        (0.0, 1.0)
    }

    fn name(&self) -> &'static str {
        "FrankDotProduct"
    }

    fn version(&self) -> &'static str {
        "0.3"
    }
}

/// Scores the number of shared peaks with the negative log of the hypergeometric
/// probability of sharing that many peaks by chance, given the number of m/z bins
/// the two spectra span.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FisherExactTest {
    pub fragment_tolerance: f64,
    pub peak_filtering: bool,
}

impl Default for FisherExactTest {
    fn default() -> Self {
        Self {
            fragment_tolerance: DEFAULT_FRAGMENT_TOLERANCE,
            peak_filtering: true,
        }
    }
}

impl FisherExactTest {
    pub fn new(fragment_tolerance: f64, peak_filtering: bool) -> Self {
        Self {
            fragment_tolerance,
            peak_filtering,
        }
    }

    fn bin_count(&self, spectrum1: &Spectrum, spectrum2: &Spectrum) -> u64 {
        let p1 = spectrum1.peaks().as_slice();
        let p2 = spectrum2.peaks().as_slice();
        let lo = p1[0].mz.min(p2[0].mz);
        let hi = p1[p1.len() - 1].mz.max(p2[p2.len() - 1].mz);
        let bins = ((hi - lo) / (self.fragment_tolerance * 2.0)).ceil();
        if bins.is_finite() && bins >= 1.0 {
            bins as u64
        } else {
            1
        }
    }

    fn hypergeometric_score(&self, spectrum1: &Spectrum, spectrum2: &Spectrum) -> SimilarityScore {
        let shared = match_peaks(
            spectrum1.peaks().as_slice(),
            spectrum2.peaks().as_slice(),
            self.fragment_tolerance,
        )
        .len() as u64;
        let n1 = spectrum1.peak_count() as u64;
        let n2 = spectrum2.peak_count() as u64;
        let population = self.bin_count(spectrum1, spectrum2).max(n1).max(n2);

        let p = match Hypergeometric::new(population, n1, n2) {
            Ok(dist) => dist.pmf(shared),
            Err(_) => return 0.0,
        };
        // An impossible outcome carries no evidence either way
        let p = if p > 0.0 && p.is_finite() { p } else { 1.0 };
        let score = -p.ln();
        trace!(
            "{} vs {}: {shared} shared peaks of {n1}/{n2} over {population} bins, score {score}",
            spectrum1.id(),
            spectrum2.id(),
        );
        score.max(0.0)
    }
}

impl SimilarityChecker for FisherExactTest {
    fn assess_similarity(&self, spectrum1: &Spectrum, spectrum2: &Spectrum) -> SimilarityScore {
        if spectrum1.is_empty() || spectrum2.is_empty() {
            return 0.0;
        }
        let (spectrum1, spectrum2) = canonical_pair(spectrum1, spectrum2);
        if self.peak_filtering {
            let k = peaks_to_compare(spectrum1).max(peaks_to_compare(spectrum2));
            let filtered1 = spectrum1.highest_n_peaks(k);
            let filtered2 = spectrum2.highest_n_peaks(k);
            self.hypergeometric_score(&filtered1, &filtered2)
        } else {
            self.hypergeometric_score(spectrum1, spectrum2)
        }
    }

    fn peak_filtering(&self) -> bool {
        self.peak_filtering
    }

    fn set_peak_filtering(&mut self, value: bool) {
        self.peak_filtering = value;
    }

    fn score_range(&self) -> (SimilarityScore, SimilarityScore) {
        (0.0, f64::MAX)
    }

    fn name(&self) -> &'static str {
        "FisherExactTest"
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn spectrum(id: &str, mz: f64, peaks: &[(f64, f32)]) -> Spectrum {
        Spectrum::new(
            id,
            2,
            mz,
            peaks.iter().map(|(mz, i)| Peak::new(*mz, *i, 0)).collect(),
        )
    }

    #[test]
    fn test_match_peaks() {
        let a = [Peak::new(100.0, 1.0, 0), Peak::new(200.0, 1.0, 0), Peak::new(200.4, 1.0, 0)];
        let b = [Peak::new(100.3, 1.0, 0), Peak::new(200.35, 1.0, 0), Peak::new(500.0, 1.0, 0)];
        let matches = match_peaks(&a, &b, 0.5);
        assert_eq!(matches, vec![(0, 0), (2, 1)]);
    }

    #[test]
    fn test_peaks_to_compare() {
        assert_eq!(peaks_to_compare(&spectrum("a", 400.0, &[])), 15);
        assert_eq!(peaks_to_compare(&spectrum("a", 1000.0, &[])), 30);
        let unknown = Spectrum::new("b", 0, 1000.0, Vec::new());
        assert_eq!(peaks_to_compare(&unknown), 30);
    }

    #[test]
    fn test_dot_product_identity_and_symmetry() {
        let checker = FrankDotProduct::default();
        let a = spectrum("a", 500.0, &[(150.0, 100.0), (250.0, 400.0), (350.0, 50.0)]);
        let b = spectrum("b", 500.1, &[(150.1, 120.0), (250.2, 300.0), (450.0, 80.0)]);
        let self_score = checker.assess_similarity(&a, &a);
        assert!((self_score - 1.0).abs() < 1e-9, "{self_score}");

        let ab = checker.assess_similarity(&a, &b);
        let ba = checker.assess_similarity(&b, &a);
        assert_eq!(ab.to_bits(), ba.to_bits());
        assert!(ab > 0.0 && ab < 1.0, "{ab}");
        assert!(checker.is_valid_score(ab));
    }

    #[test]
    fn test_empty_spectra_score_minimum() {
        let a = spectrum("a", 500.0, &[(150.0, 100.0)]);
        let empty = spectrum("e", 500.0, &[]);
        let checker = FrankDotProduct::default();
        assert_eq!(checker.assess_similarity(&a, &empty), checker.minimum_score());
        let checker = FisherExactTest::default();
        assert_eq!(checker.assess_similarity(&empty, &a), checker.minimum_score());
    }

    #[test]
    fn test_fisher_exact_test() {
        let mut checker = FisherExactTest::default();
        checker.set_peak_filtering(false);
        assert!(!checker.peak_filtering());

        let peaks: Vec<(f64, f32)> = (0..20).map(|i| (100.0 + i as f64 * 37.0, 10.0 + i as f32)).collect();
        let a = spectrum("a", 700.0, &peaks);
        let shifted: Vec<(f64, f32)> = peaks.iter().map(|(mz, i)| (mz + 13.0, *i)).collect();
        let c = spectrum("c", 700.0, &shifted);

        let same = checker.assess_similarity(&a, &a);
        let different = checker.assess_similarity(&a, &c);
        assert!(same > different, "{same} <= {different}");
        assert!(checker.is_valid_score(same));
        assert_eq!(
            checker.assess_similarity(&a, &c).to_bits(),
            checker.assess_similarity(&c, &a).to_bits()
        );
    }

    #[test]
    fn test_invalid_scores() {
        let checker = FrankDotProduct::default();
        assert!(!checker.is_valid_score(f64::NAN));
        assert!(!checker.is_valid_score(1.5));
        assert!(!checker.is_valid_score(-0.1));
        assert!(checker.is_valid_score(0.0));
    }
}
