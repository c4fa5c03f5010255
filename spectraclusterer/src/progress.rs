use std::ops::{Add, AddAssign};

/// Counts of what happened to the spectra read from the input
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProgressRecord {
    pub msn_spectra: usize,
    pub msn_peaks: usize,
    pub ms1_spectra_skipped: usize,
    pub missing_precursor: usize,
    pub not_centroided: usize,
    pub charge_defaulted: usize,
    pub duplicate_ids: usize,
}

impl Add for ProgressRecord {
    type Output = ProgressRecord;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ProgressRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.msn_spectra += rhs.msn_spectra;
        self.msn_peaks += rhs.msn_peaks;
        self.ms1_spectra_skipped += rhs.ms1_spectra_skipped;
        self.missing_precursor += rhs.missing_precursor;
        self.not_centroided += rhs.not_centroided;
        self.charge_defaulted += rhs.charge_defaulted;
        self.duplicate_ids += rhs.duplicate_ids;
    }
}

/// Counts of what the clustering stage produced
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ClusteringSummary {
    pub spectra: usize,
    pub clusters: usize,
    pub singletons: usize,
    pub largest_cluster: usize,
    pub comparisons: usize,
}

impl ClusteringSummary {
    pub fn observe(&mut self, cluster_size: usize) {
        self.clusters += 1;
        self.spectra += cluster_size;
        if cluster_size == 1 {
            self.singletons += 1;
        }
        self.largest_cluster = self.largest_cluster.max(cluster_size);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sum() {
        let a = ProgressRecord {
            msn_spectra: 3,
            msn_peaks: 30,
            ms1_spectra_skipped: 1,
            ..Default::default()
        };
        let b = ProgressRecord {
            msn_spectra: 2,
            charge_defaulted: 1,
            ..Default::default()
        };
        let c = a + b;
        assert_eq!(c.msn_spectra, 5);
        assert_eq!(c.msn_peaks, 30);
        assert_eq!(c.charge_defaulted, 1);
        assert_eq!(c.ms1_spectra_skipped, 1);
    }

    #[test]
    fn test_summary() {
        let mut summary = ClusteringSummary::default();
        summary.observe(1);
        summary.observe(4);
        summary.observe(2);
        assert_eq!(summary.clusters, 3);
        assert_eq!(summary.spectra, 7);
        assert_eq!(summary.singletons, 1);
        assert_eq!(summary.largest_cluster, 4);
    }
}
