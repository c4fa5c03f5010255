use std::fmt::Display;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use itertools::Itertools;
use tracing::{debug, info, warn};

use spectracluster::{
    ClusterError, ClusteringEngine, ClusteringError, ConsensusSpectrumBuilder, SpectralCluster,
    Spectrum,
};

use crate::progress::ClusteringSummary;

/// A member of a closed cluster, as written to the output
#[derive(Debug, Clone, PartialEq)]
pub struct MemberRecord {
    pub id: String,
    pub title: Option<String>,
    pub sequence: Option<String>,
    pub precursor_mz: f64,
    pub precursor_charge: i32,
}

impl From<&Spectrum> for MemberRecord {
    fn from(spectrum: &Spectrum) -> Self {
        Self {
            id: spectrum.id().to_string(),
            title: spectrum.property("title").map(str::to_string),
            sequence: spectrum.property("sequence").map(str::to_string),
            precursor_mz: spectrum.precursor_mz(),
            precursor_charge: spectrum.precursor_charge(),
        }
    }
}

/// An owned summary of a closed cluster that can be handed across threads to a writer
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRecord {
    pub id: String,
    pub precursor_mz: f64,
    pub precursor_charge: i32,
    pub consensus_mzs: Vec<f64>,
    pub consensus_intensities: Vec<f32>,
    pub members: Vec<MemberRecord>,
}

impl ClusterRecord {
    pub fn from_cluster<B: ConsensusSpectrumBuilder>(
        cluster: &mut SpectralCluster<B>,
    ) -> Result<Self, ClusterError> {
        let members = cluster
            .clustered_spectra()
            .iter()
            .map(|s| MemberRecord::from(s.as_ref()))
            .collect();
        let precursor_mz = cluster.precursor_mz();
        let precursor_charge = cluster.precursor_charge();
        let consensus = cluster.consensus_spectrum()?;
        let (consensus_mzs, consensus_intensities) =
            consensus.peaks().iter().map(|p| (p.mz, p.intensity)).unzip();
        Ok(Self {
            id: cluster.id().to_string(),
            precursor_mz,
            precursor_charge,
            consensus_mzs,
            consensus_intensities,
            members,
        })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

fn join_values<T: Display>(values: &[T]) -> String {
    values.iter().join(",")
}

/// Writes clusters in the line oriented `.clustering` format.
///
/// Each cluster is a `=Cluster=` block of `key=value` lines followed by one
/// tab-separated `SPEC` line per member.
pub struct ClusteringWriter<W: Write> {
    handle: W,
    name: String,
    header_written: bool,
    clusters_written: usize,
}

impl<W: Write> ClusteringWriter<W> {
    pub fn new(handle: W, name: impl Into<String>) -> Self {
        Self {
            handle,
            name: name.into(),
            header_written: false,
            clusters_written: 0,
        }
    }

    pub fn clusters_written(&self) -> usize {
        self.clusters_written
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.handle, "name={}", self.name)?;
        self.header_written = true;
        Ok(())
    }

    pub fn write(&mut self, cluster: &ClusterRecord) -> io::Result<()> {
        if !self.header_written {
            self.write_header()?;
        }
        let sequences: Vec<&str> = cluster
            .members
            .iter()
            .filter_map(|m| m.sequence.as_deref())
            .collect();
        writeln!(self.handle, "=Cluster=")?;
        writeln!(self.handle, "id={}", cluster.id)?;
        writeln!(self.handle, "av_precursor_mz={:.3}", cluster.precursor_mz)?;
        writeln!(self.handle, "av_precursor_intens=1.0")?;
        writeln!(self.handle, "charge={}", cluster.precursor_charge)?;
        writeln!(self.handle, "sequence=[{}]", sequences.join(","))?;
        writeln!(
            self.handle,
            "consensus_mz={}",
            join_values(&cluster.consensus_mzs)
        )?;
        writeln!(
            self.handle,
            "consensus_intens={}",
            join_values(&cluster.consensus_intensities)
        )?;
        for member in cluster.members.iter() {
            writeln!(
                self.handle,
                "SPEC\t{}\ttrue\t{}\t{:.4}\t{}",
                member.title.as_deref().unwrap_or(&member.id),
                member.sequence.as_deref().unwrap_or(""),
                member.precursor_mz,
                member.precursor_charge,
            )?;
        }
        writeln!(self.handle)?;
        self.clusters_written += 1;
        Ok(())
    }

    pub fn close(mut self) -> io::Result<W> {
        if !self.header_written {
            self.write_header()?;
        }
        self.handle.flush()?;
        Ok(self.handle)
    }
}

/// Drive `engine` over the sorted spectra arriving on `receiver`, sending each closed
/// cluster to the writer as soon as it leaves the window.
pub fn cluster_spectra_stream<B: ConsensusSpectrumBuilder, E: ClusteringEngine<B>>(
    engine: &mut E,
    receiver: Receiver<Arc<Spectrum>>,
    sender: Sender<(usize, ClusterRecord)>,
) -> Result<ClusteringSummary, ClusteringError> {
    let mut summary = ClusteringSummary::default();
    let emit = |closed: Vec<SpectralCluster<B>>, summary: &mut ClusteringSummary| {
        for mut cluster in closed {
            let record = ClusterRecord::from_cluster(&mut cluster)?;
            let index = summary.clusters;
            summary.observe(record.len());
            if let Err(e) = sender.send((index, record)) {
                warn!("Failed to send cluster {index} for writing: {e}");
            }
        }
        Ok::<(), ClusteringError>(())
    };

    for spectrum in receiver.iter() {
        let closed = engine.add_spectrum(spectrum)?;
        emit(closed, &mut summary)?;
    }
    debug!("{} clusters open at the end of input", engine.open_cluster_count());
    emit(engine.flush(), &mut summary)?;
    Ok(summary)
}

pub fn write_output_clusters<W: Write>(
    mut writer: ClusteringWriter<W>,
    receiver: Receiver<(usize, ClusterRecord)>,
) -> io::Result<()> {
    let start = Instant::now();
    let mut checkpoint = 0usize;
    let mut spectrum_counter = 0usize;
    let mut mz = 0.0;
    while let Ok((cluster_idx, cluster)) = receiver.recv() {
        spectrum_counter += cluster.len();
        mz = cluster.precursor_mz;
        if (cluster_idx - checkpoint) >= 1000 {
            let queue_size = receiver.len();
            info!(
                "Completed Cluster {} | Spectra={spectrum_counter} m/z={mz:0.3} | {queue_size} items in the write queue",
                cluster_idx + 1
            );
            checkpoint = cluster_idx;
        }
        writer.write(&cluster)?;
    }
    info!(
        "Finished | Clusters={} Spectra={spectrum_counter} m/z={mz:0.3} in {:0.3?}",
        writer.clusters_written(),
        Instant::now() - start
    );
    writer.close()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    use spectracluster::{Peak, SpectralCluster};
    use spectracluster::MergingConsensusBuilder;

    fn spectrum(id: &str, mz: f64, sequence: Option<&str>) -> Arc<Spectrum> {
        let peaks = vec![Peak::new(200.0, 10.0, 0), Peak::new(300.0, 20.0, 0)];
        let mut spectrum = Spectrum::new(id, 2, mz, peaks);
        spectrum.set_property("title", Some(id));
        spectrum.set_property("sequence", sequence);
        Arc::new(spectrum)
    }

    #[test]
    fn test_write_cluster() {
        let template = MergingConsensusBuilder::default();
        let mut cluster = SpectralCluster::from_spectrum(spectrum("a", 500.0, Some("PEPTIDE")), &template, 30);
        cluster.add_spectra([spectrum("b", 500.5, None)]);
        let record = ClusterRecord::from_cluster(&mut cluster).unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record.consensus_mzs.len(), 2);

        let mut writer = ClusteringWriter::new(Vec::new(), "test");
        writer.write(&record).unwrap();
        let buffer = writer.close().unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "name=test");
        assert_eq!(lines[1], "=Cluster=");
        assert_eq!(lines[2], "id=a");
        assert_eq!(lines[3], "av_precursor_mz=500.250");
        assert_eq!(lines[6], "sequence=[PEPTIDE]");
        assert!(lines[7].starts_with("consensus_mz=200"));
        assert_eq!(lines[9], "SPEC\ta\ttrue\tPEPTIDE\t500.0000\t2");
        assert_eq!(lines[10], "SPEC\tb\ttrue\t\t500.5000\t2");
    }

    #[test]
    fn test_empty_output_has_header() {
        let writer = ClusteringWriter::new(Vec::new(), "nothing");
        let buffer = writer.close().unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "name=nothing\n");
    }
}
