use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use clap::Parser;
use serde::{Deserialize, Serialize};

use flate2::write::GzEncoder;
use flate2::Compression;

use thiserror::Error;

use tracing::{debug, info, warn};

use mzdata::io::{
    infer_format, infer_from_stream,
    mgf::MGFReaderType,
    mzml::MzMLReaderType,
    MZFileReader, MassSpectrometryFormat, PreBufferedStream, RestartableGzDecoder,
    StreamingSpectrumIterator,
};

use spectracluster::{
    filters::{Chain, HighestNPeaks, RemoveImpossiblyHighPeaks},
    predicate::{And, SharesMajorPeak, SkipStableClusters},
    BinnedConsensusBuilder, ClusterError, ClusteringError, ClusteringParams, ConfigurationError,
    ConsensusParams, ConsensusSpectrumBuilder, FisherExactTest, FrankDotProduct,
    GreedyIncrementalClusteringEngine, MergingConsensusBuilder, SimilarityChecker,
};

use crate::args::{
    non_negative_float_f64, positive_float_f64, ArgConsensusMethod, ArgSimilarity,
    ComparisonGate, PeakFilters,
};
use crate::proc::prepare_spectra;
use crate::progress::ClusteringSummary;
use crate::types::{SpectrumType, BUFFER_SIZE};
use crate::write::{cluster_spectra_stream, write_output_clusters, ClusteringWriter};

#[derive(Debug, Error)]
pub enum SpectraClustererError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("The input file format for {0} was either unknown or not supported ({1:?})")]
    FormatUnknownOrNotSupportedError(String, MassSpectrometryFormat),
    #[error("The input file format from STDIN was either unknown or not supported ({0:?})")]
    FormatUnknownOrNotSupportedErrorStdIn(MassSpectrometryFormat),
    #[error("The clustering parameters are invalid: {0}")]
    ConfigurationError(#[from] ConfigurationError),
    #[error("An error occurred while clustering: {0}")]
    ClusteringError(#[from] ClusteringError),
    #[error("An error occurred while summarizing a cluster: {0}")]
    ClusterError(#[from] ClusterError),
    #[error("Failed to read the configuration: {0}")]
    ConfigError(#[from] Box<figment::Error>),
    #[error("Failed to set up logging: {0}")]
    LoggingError(String),
    #[error("The {0} task panicked")]
    TaskPanicked(&'static str),
}

impl From<figment::Error> for SpectraClustererError {
    fn from(value: figment::Error) -> Self {
        Self::ConfigError(Box::new(value))
    }
}

/// Incremental clustering of tandem mass spectra.
///
/// Read an MGF or mzML file or stream, group near-identical MSn spectra into clusters
/// and write each cluster with its consensus spectrum to a `.clustering` file or stream.
#[derive(Parser, Debug, Clone, Deserialize, Serialize)]
#[command(author, version)]
#[serde(default)]
pub struct SpectraClusterer {
    /// The path to read the input spectra from, or if '-' is passed, read from STDIN
    #[arg()]
    pub input_file: String,

    /// The path to write the clusters to, or if '-' is passed, write to STDOUT.
    ///
    /// A path ending in `.gz` is gzip compressed.
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    pub output_file: PathBuf,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `spectraclusterer.toml` in the working directory.
    /// Environment variables prefixed with `SPECTRACLUSTERER_` will be read too. Values
    /// from these sources take precedence over the command line.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// The size of the buffers queueing spectra for clustering and clusters for writing
    #[arg(short = 'w', long = "write-buffer-size", default_value_t = BUFFER_SIZE)]
    pub write_buffer_size: usize,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(
        short='t',
        long="threads",
        default_value_t=-1,
    )]
    pub threads: i32,

    /// The similarity metric to compare spectra with
    #[arg(short = 'm', long = "similarity", default_value = "dot-product")]
    pub similarity: ArgSimilarity,

    /// The minimum similarity for a spectrum to join a cluster.
    ///
    /// Defaults to 0.6 for the dot product and 15 for the Fisher exact test.
    #[arg(short = 's', long = "similarity-threshold", value_parser = positive_float_f64)]
    pub similarity_threshold: Option<f64>,

    /// The half-width of the precursor m/z window searched for candidate clusters
    #[arg(
        short = 'p',
        long = "precursor-window",
        default_value_t = 2.0,
        value_parser = positive_float_f64
    )]
    pub window_size: f64,

    /// The m/z tolerance for matching fragment peaks
    #[arg(
        short = 'f',
        long = "fragment-tolerance",
        default_value_t = 0.5,
        value_parser = positive_float_f64
    )]
    pub fragment_tolerance: f64,

    /// The maximum number of candidate clusters compared against each spectrum
    #[arg(short = 'c', long = "max-comparisons")]
    pub max_comparisons: Option<usize>,

    /// The number of best comparison results retained per cluster
    #[arg(short = 'k', long = "retained-comparisons", default_value_t = 30)]
    pub retained_comparisons: usize,

    /// How consensus spectra are built
    #[arg(short = 'b', long = "consensus-method", default_value = "merging")]
    pub consensus_method: ArgConsensusMethod,

    /// Keep only this many of the most intense consensus peaks
    #[arg(long = "max-consensus-peaks")]
    pub max_consensus_peaks: Option<usize>,

    /// Keep peaks above the singly charged precursor mass
    #[arg(long = "keep-impossibly-high-peaks")]
    pub keep_impossibly_high_peaks: bool,

    /// The tolerance above the singly charged precursor mass beyond which peaks are removed
    #[arg(
        long = "high-peak-tolerance",
        default_value_t = 3.0,
        value_parser = non_negative_float_f64
    )]
    pub high_peak_tolerance: f64,

    /// Compare only the N most intense peaks of each spectrum
    #[arg(short = 'n', long = "highest-peaks")]
    pub highest_peaks: Option<usize>,

    /// Compare only clusters whose consensus spectra share one of their N major peaks
    #[arg(short = 'j', long = "major-peaks")]
    pub major_peaks: Option<usize>,

    /// Stop comparing spectra with clusters that have reached the stable size
    #[arg(long = "skip-stable-clusters")]
    pub skip_stable_clusters: bool,

    /// The number of members at which a cluster is stable
    #[arg(long = "stable-cluster-size", default_value_t = 20)]
    pub stable_cluster_size: usize,

    /// The number of members at which a cluster is semi-stable
    #[arg(long = "semi-stable-cluster-size", default_value_t = 10)]
    pub semi_stable_cluster_size: usize,
}

impl Default for SpectraClusterer {
    fn default() -> Self {
        let params = ClusteringParams::default();
        Self {
            input_file: "-".to_string(),
            output_file: PathBuf::from("-"),
            log_file: None,
            config_file: None,
            write_buffer_size: BUFFER_SIZE,
            threads: -1,
            similarity: ArgSimilarity::default(),
            similarity_threshold: None,
            window_size: params.window_size,
            fragment_tolerance: params.consensus.fragment_tolerance,
            max_comparisons: params.max_comparisons,
            retained_comparisons: params.retained_comparisons,
            consensus_method: ArgConsensusMethod::default(),
            max_consensus_peaks: params.consensus.max_peaks,
            keep_impossibly_high_peaks: false,
            high_peak_tolerance: RemoveImpossiblyHighPeaks::default().tolerance,
            highest_peaks: None,
            major_peaks: None,
            skip_stable_clusters: false,
            stable_cluster_size: params.stable_cluster_size,
            semi_stable_cluster_size: params.semi_stable_cluster_size,
        }
    }
}

impl SpectraClusterer {
    fn set_threadpool(&self) {
        if self.threads > 0 {
            debug!("Using {} threads", self.threads);
            if let Err(e) = rayon::ThreadPoolBuilder::new()
                .num_threads(self.threads as usize)
                .build_global()
            {
                warn!("Failed to configure the thread pool: {e}");
            }
        }
    }

    /// The engine parameters described by these arguments
    pub fn clustering_params(&self) -> Result<ClusteringParams, ConfigurationError> {
        let consensus = ConsensusParams {
            fragment_tolerance: self.fragment_tolerance,
            max_peaks: self.max_consensus_peaks,
            ..Default::default()
        };
        let params = ClusteringParams::default()
            .similarity_threshold(
                self.similarity_threshold
                    .unwrap_or_else(|| self.similarity.default_threshold()),
            )
            .window_size(self.window_size)
            .max_comparisons(self.max_comparisons)
            .retained_comparisons(self.retained_comparisons)
            .stable_sizes(self.stable_cluster_size, self.semi_stable_cluster_size)
            .parallel(self.threads != 1)
            .consensus(consensus);
        params.validate()?;
        Ok(params)
    }

    fn peak_filters(&self) -> PeakFilters {
        Chain(
            (!self.keep_impossibly_high_peaks)
                .then(|| RemoveImpossiblyHighPeaks::new(self.high_peak_tolerance)),
            self.highest_peaks.map(HighestNPeaks::new),
        )
    }

    fn comparison_gate(&self, params: &ClusteringParams) -> Result<ComparisonGate, ConfigurationError> {
        let skip_stable = if self.skip_stable_clusters {
            Some(SkipStableClusters::new(params.stability_assessor()?))
        } else {
            None
        };
        Ok(And(skip_stable, self.major_peaks.map(SharesMajorPeak::new)))
    }

    fn output_name(&self) -> String {
        if self.input_file == "-" {
            "STDIN".to_string()
        } else {
            PathBuf::from(&self.input_file)
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| self.input_file.clone())
        }
    }

    pub fn main(&self) -> Result<(), SpectraClustererError> {
        info!(
            "spectraclusterer v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        info!("Input: {}", self.input_file);
        info!("Output: {}", self.output_file.display());
        let params = self.clustering_params()?;
        debug!("{params:?}");
        self.set_threadpool();
        self.reader_then(&params)
    }

    fn reader_then(
        &self,
        params: &ClusteringParams,
    ) -> Result<(), SpectraClustererError> {
        if self.input_file == "-" {
            let mut buffered =
                PreBufferedStream::new_with_buffer_size(io::stdin(), 2usize.pow(20))?;
            let (ms_format, compressed) = infer_from_stream(&mut buffered)?;
            debug!("Detected {ms_format:?} from STDIN (compressed? {compressed})");
            match ms_format {
                MassSpectrometryFormat::MGF => {
                    if compressed {
                        let reader = StreamingSpectrumIterator::new(MGFReaderType::new(
                            RestartableGzDecoder::new(io::BufReader::new(buffered)),
                        ));
                        self.writer_then(reader, params)?;
                    } else {
                        let reader = StreamingSpectrumIterator::new(MGFReaderType::new(buffered));
                        self.writer_then(reader, params)?;
                    }
                }
                MassSpectrometryFormat::MzML => {
                    if compressed {
                        let reader = StreamingSpectrumIterator::new(MzMLReaderType::new(
                            RestartableGzDecoder::new(io::BufReader::new(buffered)),
                        ));
                        self.writer_then(reader, params)?;
                    } else {
                        let reader = StreamingSpectrumIterator::new(MzMLReaderType::new(buffered));
                        self.writer_then(reader, params)?;
                    }
                }
                _ => {
                    return Err(SpectraClustererError::FormatUnknownOrNotSupportedErrorStdIn(
                        ms_format,
                    ))
                }
            }
        } else {
            let (ms_format, compressed) = infer_format(&self.input_file)?;
            debug!("Detected {ms_format:?} from path (compressed? {compressed})");
            match ms_format {
                MassSpectrometryFormat::MGF => {
                    if compressed {
                        let fh = RestartableGzDecoder::new(io::BufReader::new(fs::File::open(
                            &self.input_file,
                        )?));
                        let reader = StreamingSpectrumIterator::new(MGFReaderType::new(fh));
                        self.writer_then(reader, params)?;
                    } else {
                        let reader = MGFReaderType::open_path(self.input_file.clone())?;
                        self.writer_then(reader, params)?;
                    }
                }
                MassSpectrometryFormat::MzML => {
                    if compressed {
                        let fh = RestartableGzDecoder::new(io::BufReader::new(fs::File::open(
                            &self.input_file,
                        )?));
                        let reader = StreamingSpectrumIterator::new(MzMLReaderType::new(fh));
                        self.writer_then(reader, params)?;
                    } else {
                        let reader = MzMLReaderType::open_path(self.input_file.clone())?;
                        self.writer_then(reader, params)?;
                    }
                }
                _ => {
                    return Err(SpectraClustererError::FormatUnknownOrNotSupportedError(
                        self.input_file.clone(),
                        ms_format,
                    ))
                }
            }
        }
        Ok(())
    }

    fn writer_then<R: Iterator<Item = SpectrumType> + Send + 'static>(
        &self,
        reader: R,
        params: &ClusteringParams,
    ) -> Result<(), SpectraClustererError> {
        let name = self.output_name();
        if self.output_file == PathBuf::from("-") {
            let writer = ClusteringWriter::new(io::BufWriter::new(io::stdout()), name);
            self.engine_then(reader, writer, params)?;
        } else {
            let handle = io::BufWriter::new(fs::File::create(self.output_file.clone())?);
            let compressed = self
                .output_file
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
            if compressed {
                let encoder = GzEncoder::new(handle, Compression::best());
                let writer = ClusteringWriter::new(encoder, name);
                self.engine_then(reader, writer, params)?;
            } else {
                let writer = ClusteringWriter::new(handle, name);
                self.engine_then(reader, writer, params)?;
            }
        }
        Ok(())
    }

    fn engine_then<
        R: Iterator<Item = SpectrumType> + Send + 'static,
        W: io::Write + Send + 'static,
    >(
        &self,
        reader: R,
        writer: ClusteringWriter<W>,
        params: &ClusteringParams,
    ) -> Result<(), SpectraClustererError> {
        let tolerance = params.consensus.fragment_tolerance;
        match self.similarity {
            ArgSimilarity::DotProduct => self.consensus_then(
                reader,
                writer,
                FrankDotProduct::new(tolerance, true),
                params,
            ),
            ArgSimilarity::FisherExact => self.consensus_then(
                reader,
                writer,
                FisherExactTest::new(tolerance, true),
                params,
            ),
        }
    }

    fn consensus_then<
        R: Iterator<Item = SpectrumType> + Send + 'static,
        W: io::Write + Send + 'static,
        S: SimilarityChecker + 'static,
    >(
        &self,
        reader: R,
        writer: ClusteringWriter<W>,
        similarity: S,
        params: &ClusteringParams,
    ) -> Result<(), SpectraClustererError> {
        match self.consensus_method {
            ArgConsensusMethod::Merging => self.run_workflow(
                reader,
                writer,
                similarity,
                MergingConsensusBuilder::with_params(params.consensus),
                params,
            ),
            ArgConsensusMethod::Binned => self.run_workflow(
                reader,
                writer,
                similarity,
                BinnedConsensusBuilder::with_params(params.consensus),
                params,
            ),
        }
    }

    fn run_workflow<
        R: Iterator<Item = SpectrumType> + Send + 'static,
        W: io::Write + Send + 'static,
        S: SimilarityChecker + 'static,
        B: ConsensusSpectrumBuilder + 'static,
    >(
        &self,
        reader: R,
        writer: ClusteringWriter<W>,
        similarity: S,
        consensus: B,
        params: &ClusteringParams,
    ) -> Result<(), SpectraClustererError> {
        let buffer_size = self.write_buffer_size.max(1);
        let (send_spectra, recv_spectra) = crossbeam_channel::bounded(buffer_size);
        let (send_clusters, recv_clusters) = crossbeam_channel::bounded(buffer_size);

        let engine = GreedyIncrementalClusteringEngine::new(
            similarity,
            consensus,
            self.peak_filters(),
            self.comparison_gate(params)?,
            *params,
        )?;

        let start = Instant::now();
        let read_task = thread::spawn(move || prepare_spectra(reader, send_spectra));

        let cluster_task = thread::spawn(
            move || -> Result<(ClusteringSummary, usize), ClusteringError> {
                let mut engine = engine;
                let summary = cluster_spectra_stream(&mut engine, recv_spectra, send_clusters)?;
                Ok((summary, engine.comparison_count()))
            },
        );

        let write_task = thread::spawn(move || write_output_clusters(writer, recv_clusters));

        match read_task.join() {
            Ok(prog) => {
                info!("MSn Spectra: {}", prog.msn_spectra);
                info!("MSn Peaks: {}", prog.msn_peaks);
                info!(
                    "Skipped MS1: {} | Missing Precursor: {} | Unreadable Peaks: {} | Charge Defaulted: {}",
                    prog.ms1_spectra_skipped,
                    prog.missing_precursor,
                    prog.not_centroided,
                    prog.charge_defaulted
                );
                if prog.duplicate_ids > 0 {
                    warn!("Renamed {} spectra with duplicate identifiers", prog.duplicate_ids);
                }
            }
            Err(e) => {
                warn!("Failed to join reader task: {e:?}");
                return Err(SpectraClustererError::TaskPanicked("reader"));
            }
        }
        let read_done = Instant::now();
        let reading_elapsed = read_done - start;

        let clustering_result = match cluster_task.join() {
            Ok(result) => result,
            Err(e) => {
                warn!("Failed to join clustering task: {e:?}");
                return Err(SpectraClustererError::TaskPanicked("clustering"));
            }
        };

        match write_task.join() {
            Ok(o) => o?,
            Err(e) => {
                warn!("Failed to join writer task: {e:?}");
                return Err(SpectraClustererError::TaskPanicked("writer"));
            }
        }

        let (summary, comparisons) = clustering_result?;
        info!(
            "Clusters: {} | Singletons: {} | Largest: {} | Spectra: {}",
            summary.clusters, summary.singletons, summary.largest_cluster, summary.spectra
        );
        info!("Comparisons: {comparisons}");

        let elapsed = Instant::now() - start;
        if (elapsed.as_secs_f64() - reading_elapsed.as_secs_f64()) > 2.0 {
            info!("Total Elapsed Time: {:0.3?}", elapsed);
        }
        Ok(())
    }
}
