use std::fmt::Display;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use spectracluster::{
    filters::{Chain, HighestNPeaks, RemoveImpossiblyHighPeaks},
    predicate::{And, SharesMajorPeak, SkipStableClusters},
    stability::CountBasedStabilityAssessor,
};

/// The similarity metric used to compare spectra with cluster consensus spectra
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgSimilarity {
    /// Normalized dot product of transformed intensities, scored from 0 to 1
    #[default]
    DotProduct,
    /// Negative log probability of the number of shared peaks under a hypergeometric model
    FisherExact,
}

impl ArgSimilarity {
    /// The merge threshold used when none is given, in the units of the metric
    pub fn default_threshold(&self) -> f64 {
        match self {
            Self::DotProduct => 0.6,
            Self::FisherExact => 15.0,
        }
    }
}

impl Display for ArgSimilarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// How member spectra are folded into a cluster's consensus spectrum
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgConsensusMethod {
    /// Merge nearby peaks with a growing tolerance
    #[default]
    Merging,
    /// Accumulate peaks in fixed width m/z bins
    Binned,
}

impl Display for ArgConsensusMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub(crate) fn non_negative_float_f64(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value < 0.0 {
        Err(format!("`{s}` is less than zero"))
    } else {
        Ok(value)
    }
}

pub(crate) fn positive_float_f64(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value <= 0.0 || !value.is_finite() {
        Err(format!("`{s}` must be a positive number"))
    } else {
        Ok(value)
    }
}

/// The peak filters applied to query and candidate spectra before comparison,
/// impossibly high peaks first
pub type PeakFilters = Chain<Option<RemoveImpossiblyHighPeaks>, Option<HighestNPeaks>>;

/// The optional comparison shortcuts selected on the command line, stable
/// candidates are skipped before major peaks are compared
pub type ComparisonGate =
    And<Option<SkipStableClusters<CountBasedStabilityAssessor>>, Option<SharesMajorPeak>>;
