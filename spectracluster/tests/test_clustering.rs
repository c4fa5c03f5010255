use std::sync::Arc;

use mzdata::io::mgf::MGFReaderType;
use mzdata::prelude::*;

use spectracluster::filters::RemoveImpossiblyHighPeaks;
use spectracluster::predicate::SharesMajorPeak;
use spectracluster::prelude::*;

fn load_spectra() -> Vec<Arc<Spectrum>> {
    let reader = MGFReaderType::open_path("../spectraclusterer/tests/data/small.mgf").unwrap();
    let mut spectra: Vec<_> = reader
        .map(|scan| {
            let prec = scan.precursor().unwrap();
            let mz = prec.ion().mz;
            let charge = prec.charge().unwrap_or(0);
            let id = scan.id().to_string();
            let peaks = scan.into_centroid().unwrap().peaks.iter().cloned().collect();
            Arc::new(Spectrum::new(id, charge, mz, peaks))
        })
        .collect();
    spectra.sort_by(|a, b| a.precursor_mz().total_cmp(&b.precursor_mz()));
    spectra
}

fn cluster_membership<B: ConsensusSpectrumBuilder>(clusters: &[SpectralCluster<B>]) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = clusters
        .iter()
        .map(|c| {
            let mut ids: Vec<String> = c.spectrum_ids().map(str::to_string).collect();
            ids.sort();
            ids
        })
        .collect();
    groups.sort();
    groups
}

fn expected() -> Vec<Vec<String>> {
    let groups: [&[&str]; 3] = [&["A1", "A2", "A3", "A4"], &["B1", "B2", "B3"], &["C1"]];
    groups
        .iter()
        .map(|g| g.iter().map(|s| s.to_string()).collect())
        .collect()
}

#[test_log::test]
fn test_greedy_engine() {
    let spectra = load_spectra();
    assert_eq!(spectra.len(), 8);
    let mut engine: GreedyIncrementalClusteringEngine<
        FrankDotProduct,
        MergingConsensusBuilder,
        RemoveImpossiblyHighPeaks,
        SharesMajorPeak,
    > = ClusteringEngineBuilder::new().create().unwrap();
    let mut clusters = engine.cluster_all(spectra).unwrap();
    assert_eq!(cluster_membership(&clusters), expected());
    assert!(engine.comparison_count() > 0);

    for cluster in clusters.iter_mut() {
        let size = cluster.clustered_spectra_count();
        let consensus = cluster.consensus_spectrum().unwrap();
        if size > 1 {
            assert_eq!(consensus.peak_count(), 12);
        }
    }
}

#[test_log::test]
fn test_incremental_engine_binned() {
    let spectra = load_spectra();
    let mut engine = ClusteringEngineBuilder::<FrankDotProduct, BinnedConsensusBuilder>::new()
        .params(ClusteringParams::default().parallel(true))
        .create_incremental()
        .unwrap();
    let clusters = engine.cluster_all(spectra).unwrap();
    assert_eq!(cluster_membership(&clusters), expected());
    assert_eq!(engine.open_cluster_count(), 0);
}

#[test_log::test]
fn test_fisher_exact() {
    let spectra = load_spectra();
    let clusters = cluster_spectra(
        spectra,
        FisherExactTest::default(),
        ClusteringParams::default().similarity_threshold(5.0),
    )
    .unwrap();
    assert_eq!(cluster_membership(&clusters), expected());
}

#[test_log::test]
fn test_out_of_order_input() {
    let mut spectra = load_spectra();
    spectra.reverse();
    let mut engine = ClusteringEngineBuilder::<FrankDotProduct>::new().create().unwrap();
    let err = engine.cluster_all(spectra).unwrap_err();
    assert!(matches!(err, spectracluster::ClusteringError::OutOfOrder { .. }));
}
