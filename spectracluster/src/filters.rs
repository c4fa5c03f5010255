//! Peak filters applied to spectra before comparison
use chemical_elements::{neutral_mass, PROTON};
use mzpeaks::prelude::*;

use crate::spectrum::{Peak, Spectrum};

/// A pure transformation of a spectrum's peak list
pub trait SpectrumFilter: Send + Sync {
    fn apply(&self, spectrum: &Spectrum) -> Spectrum;
}

impl<F> SpectrumFilter for F
where
    F: Fn(&Spectrum) -> Spectrum + Send + Sync,
{
    fn apply(&self, spectrum: &Spectrum) -> Spectrum {
        (self)(spectrum)
    }
}

/// An absent filter returns the spectrum unchanged
impl<F: SpectrumFilter> SpectrumFilter for Option<F> {
    fn apply(&self, spectrum: &Spectrum) -> Spectrum {
        match self {
            Some(filter) => filter.apply(spectrum),
            None => spectrum.clone(),
        }
    }
}

/// Returns the spectrum unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityFilter;

impl SpectrumFilter for IdentityFilter {
    fn apply(&self, spectrum: &Spectrum) -> Spectrum {
        spectrum.clone()
    }
}

/// Drop peaks whose m/z lies above the singly protonated precursor mass plus
/// `tolerance`, which no fragment of that precursor can reach.
///
/// Spectra with an unknown precursor charge are returned unchanged.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RemoveImpossiblyHighPeaks {
    pub tolerance: f64,
}

impl Default for RemoveImpossiblyHighPeaks {
    fn default() -> Self {
        Self { tolerance: 3.0 }
    }
}

impl RemoveImpossiblyHighPeaks {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    pub fn max_mz(&self, spectrum: &Spectrum) -> Option<f64> {
        if spectrum.precursor_charge() < 1 {
            return None;
        }
        Some(
            neutral_mass(
                spectrum.precursor_mz(),
                spectrum.precursor_charge(),
                PROTON,
            ) + PROTON
                + self.tolerance,
        )
    }
}

impl SpectrumFilter for RemoveImpossiblyHighPeaks {
    fn apply(&self, spectrum: &Spectrum) -> Spectrum {
        match self.max_mz(spectrum) {
            Some(max_mz) => spectrum.with_peaks(
                spectrum
                    .peaks()
                    .iter()
                    .filter(|p| p.mz() <= max_mz)
                    .cloned()
                    .collect(),
            ),
            None => spectrum.clone(),
        }
    }
}

/// Keep the `n` most intense peaks
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HighestNPeaks {
    pub n: usize,
}

impl HighestNPeaks {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl SpectrumFilter for HighestNPeaks {
    fn apply(&self, spectrum: &Spectrum) -> Spectrum {
        spectrum.highest_n_peaks(self.n).as_ref().clone()
    }
}

/// Keep the most intense peaks until they explain `fraction` of the total ion
/// current, but never fewer than `min_peaks`.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FractionTicPeaks {
    pub fraction: f32,
    pub min_peaks: usize,
}

impl Default for FractionTicPeaks {
    fn default() -> Self {
        Self {
            fraction: 0.5,
            min_peaks: 20,
        }
    }
}

impl FractionTicPeaks {
    pub fn new(fraction: f32, min_peaks: usize) -> Self {
        Self {
            fraction,
            min_peaks,
        }
    }
}

impl SpectrumFilter for FractionTicPeaks {
    fn apply(&self, spectrum: &Spectrum) -> Spectrum {
        let mut peaks: Vec<Peak> = spectrum.peaks().iter().cloned().collect();
        peaks.sort_by(|a, b| {
            b.intensity
                .total_cmp(&a.intensity)
                .then_with(|| a.mz.total_cmp(&b.mz))
        });

        let target = spectrum.total_intensity() * self.fraction as f64;
        let mut acc = 0.0;
        let mut keep = 0;
        for p in peaks.iter() {
            if acc >= target && keep >= self.min_peaks {
                break;
            }
            acc += p.intensity as f64;
            keep += 1;
        }
        peaks.truncate(keep);
        spectrum.with_peaks(peaks)
    }
}

/// Apply one filter, then another
#[derive(Debug, Clone, Copy, Default)]
pub struct Chain<A: SpectrumFilter, B: SpectrumFilter>(pub A, pub B);

impl<A: SpectrumFilter, B: SpectrumFilter> SpectrumFilter for Chain<A, B> {
    fn apply(&self, spectrum: &Spectrum) -> Spectrum {
        self.1.apply(&self.0.apply(spectrum))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_spectrum(charge: i32) -> Spectrum {
        Spectrum::new(
            "s",
            charge,
            400.0,
            vec![
                Peak::new(120.0, 5.0, 0),
                Peak::new(300.0, 40.0, 0),
                Peak::new(500.0, 30.0, 0),
                Peak::new(790.0, 20.0, 0),
                Peak::new(805.0, 5.0, 0),
            ],
        )
    }

    #[test]
    fn test_impossibly_high() {
        let filter = RemoveImpossiblyHighPeaks::default();
        // neutral mass ~797.985, +1 proton + 3.0 ~ 802.99
        let filtered = filter.apply(&make_spectrum(2));
        assert_eq!(filtered.peak_count(), 4);
        assert!(filtered.peaks().iter().all(|p| p.mz() < 802.0));

        let unknown = make_spectrum(0);
        assert_eq!(filter.apply(&unknown).peak_count(), 5);

        let again = filter.apply(&filtered);
        assert_eq!(again, filtered);
    }

    #[test]
    fn test_highest_n() {
        let filtered = HighestNPeaks::new(2).apply(&make_spectrum(2));
        let mzs: Vec<f64> = filtered.peaks().iter().map(|p| p.mz()).collect();
        assert_eq!(mzs, vec![300.0, 500.0]);
    }

    #[test]
    fn test_fraction_tic() {
        let spec = make_spectrum(2);
        let filtered = FractionTicPeaks::new(0.5, 1).apply(&spec);
        // 40 + 30 = 70 >= 50
        assert_eq!(filtered.peak_count(), 2);
        let filtered = FractionTicPeaks::new(0.5, 4).apply(&spec);
        assert_eq!(filtered.peak_count(), 4);
    }

    #[test]
    fn test_chain_and_closure() {
        let chain = Chain(RemoveImpossiblyHighPeaks::default(), HighestNPeaks::new(1));
        let filtered = chain.apply(&make_spectrum(2));
        assert_eq!(filtered.peak_count(), 1);

        let drop_all = |s: &Spectrum| s.with_peaks(Vec::new());
        assert!(drop_all.apply(&make_spectrum(2)).is_empty());
        assert_eq!(IdentityFilter.apply(&make_spectrum(2)).peak_count(), 5);
    }

    #[test]
    fn test_optional_filters() {
        let chain: Chain<Option<RemoveImpossiblyHighPeaks>, Option<HighestNPeaks>> = Chain::default();
        assert_eq!(chain.apply(&make_spectrum(2)).peak_count(), 5);
        let chain = Chain(None::<RemoveImpossiblyHighPeaks>, Some(HighestNPeaks::new(2)));
        let filtered = chain.apply(&make_spectrum(2));
        assert_eq!(filtered.peak_count(), 2);
    }
}
