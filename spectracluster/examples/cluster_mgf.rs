use std::env;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use mzdata::prelude::*;

use spectracluster::filters::RemoveImpossiblyHighPeaks;
use spectracluster::predicate::SharesMajorPeak;
use spectracluster::prelude::*;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn load_spectra(path: &str) -> io::Result<Vec<Arc<Spectrum>>> {
    let reader = mzdata::MZReader::open_path(path)?;
    let mut spectra = Vec::new();
    for scan in reader {
        if scan.ms_level() < 2 {
            continue;
        }
        let Some((mz, charge)) = scan
            .precursor()
            .map(|prec| (prec.ion().mz, prec.charge().unwrap_or(0)))
        else {
            continue;
        };
        let id = scan.id().to_string();
        let Ok(centroided) = scan.into_centroid() else {
            tracing::warn!("Skipping {id}, its peaks could not be centroided");
            continue;
        };
        let peaks = centroided.peaks.iter().cloned().collect();
        spectra.push(Arc::new(Spectrum::new(id, charge, mz, peaks)));
    }
    spectra.sort_by(|a, b| a.precursor_mz().total_cmp(&b.precursor_mz()));
    Ok(spectra)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_writer(io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let mut args = env::args().skip(1);
    let path = args
        .next()
        .unwrap_or_else(|| "../spectraclusterer/tests/data/small.mgf".to_string());

    let start = Instant::now();
    let spectra = load_spectra(&path)?;
    tracing::info!("Loaded {} spectra from {path}", spectra.len());

    let mut engine: GreedyIncrementalClusteringEngine<
        FrankDotProduct,
        MergingConsensusBuilder,
        RemoveImpossiblyHighPeaks,
        SharesMajorPeak,
    > = ClusteringEngineBuilder::new()
        .params(ClusteringParams::default().parallel(true))
        .create()?;

    let mut clusters = engine.cluster_all(spectra)?;
    clusters.sort_by(|a, b| b.clustered_spectra_count().cmp(&a.clustered_spectra_count()));
    for cluster in clusters.iter_mut().take(10) {
        let size = cluster.clustered_spectra_count();
        let mz = cluster.precursor_mz();
        let peak_count = cluster.consensus_spectrum()?.peak_count();
        println!(
            "{}\t{size}\t{mz:0.4}\t{peak_count} consensus peaks",
            cluster.id()
        );
    }
    tracing::info!(
        "Formed {} clusters with {} comparisons in {:0.3} seconds",
        clusters.len(),
        engine.comparison_count(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
