use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use mzdata::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use spectracluster::Spectrum;

use crate::progress::ProgressRecord;
use crate::types::{SpectrumType, PEAK_COUNT_THRESHOLD_WARNING};

fn find_sequence(scan: &SpectrumType) -> Option<String> {
    scan.description()
        .params()
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case("seq") || p.name.eq_ignore_ascii_case("sequence"))
        .map(|p| p.value.to_string())
        .filter(|s| !s.is_empty())
}

/// Convert an MSn scan into a [`Spectrum`], skipping anything that cannot be clustered.
///
/// Scans without a precursor are dropped and an unknown precursor charge becomes 0.
pub(crate) fn spectrum_from_scan(scan: SpectrumType) -> (Option<Spectrum>, ProgressRecord) {
    let mut prog = ProgressRecord::default();
    if scan.ms_level() < 2 {
        prog.ms1_spectra_skipped += 1;
        return (None, prog);
    }
    let Some((precursor_mz, charge)) = scan.precursor().map(|prec| (prec.ion().mz, prec.charge()))
    else {
        debug!("{} has no precursor, skipping", scan.id());
        prog.missing_precursor += 1;
        return (None, prog);
    };
    let charge = charge.unwrap_or_else(|| {
        prog.charge_defaulted += 1;
        0
    });

    let id = scan.id().to_string();
    let sequence = find_sequence(&scan);
    let centroided = match scan.into_centroid() {
        Ok(centroided) => centroided,
        Err(e) => {
            warn!("Failed to read peaks of {id}: {e}");
            prog.not_centroided += 1;
            return (None, prog);
        }
    };
    let peaks: Vec<_> = centroided.peaks.iter().cloned().collect();
    if peaks.len() > PEAK_COUNT_THRESHOLD_WARNING {
        warn!("{id} has {} peaks, consider filtering the input", peaks.len());
    }
    prog.msn_spectra += 1;
    prog.msn_peaks += peaks.len();

    let mut spectrum = Spectrum::new(id.clone(), charge, precursor_mz, peaks);
    spectrum.set_property("title", Some(&id));
    if let Some(sequence) = sequence {
        spectrum.set_property("sequence", Some(&sequence));
    }
    (Some(spectrum), prog)
}

/// Give every spectrum whose identifier was already seen, in read order, a
/// `#n` suffix. Cluster identity relies on unique identifiers, the original
/// identifier is still written as the title. Returns the number renamed.
pub(crate) fn make_ids_unique(spectra: &mut [(usize, Spectrum)]) -> usize {
    spectra.par_sort_by_key(|(i, _)| *i);
    let mut seen: HashSet<String> = spectra.iter().map(|(_, s)| s.id().to_string()).collect();
    let mut first_seen: HashSet<String> = HashSet::with_capacity(seen.len());
    let mut renamed = 0;
    for (_, spectrum) in spectra.iter_mut() {
        if first_seen.insert(spectrum.id().to_string()) {
            continue;
        }
        let base = spectrum.id().to_string();
        let mut k = 2;
        let mut candidate = format!("{base}#{k}");
        while seen.contains(&candidate) {
            k += 1;
            candidate = format!("{base}#{k}");
        }
        warn!("Duplicate spectrum identifier {base}, renamed to {candidate}");
        seen.insert(candidate.clone());
        spectrum.set_id(candidate);
        renamed += 1;
    }
    renamed
}

/// Order spectra by precursor m/z, then identifier, then read order
pub(crate) fn sort_spectra(spectra: &mut [(usize, Spectrum)]) {
    spectra.par_sort_by(|(i, a), (j, b)| {
        a.precursor_mz()
            .total_cmp(&b.precursor_mz())
            .then_with(|| a.id().cmp(b.id()))
            .then_with(|| i.cmp(j))
    });
}

/// Read every spectrum from `reader`, convert them in parallel and send them down
/// `sender` in ascending precursor m/z order.
pub fn prepare_spectra<R: Iterator<Item = SpectrumType> + Send>(
    reader: R,
    sender: Sender<Arc<Spectrum>>,
) -> ProgressRecord {
    let started = Instant::now();
    let (mut spectra, mut prog): (Vec<(usize, Spectrum)>, ProgressRecord) = reader
        .enumerate()
        .par_bridge()
        .map(|(i, scan)| {
            let (spectrum, prog) = spectrum_from_scan(scan);
            (spectrum.map(|s| (i, s)), prog)
        })
        .fold(
            || (Vec::new(), ProgressRecord::default()),
            |(mut acc, total), (spectrum, prog)| {
                acc.extend(spectrum);
                (acc, total + prog)
            },
        )
        .reduce(
            || (Vec::new(), ProgressRecord::default()),
            |(mut a, pa), (b, pb)| {
                a.extend(b);
                (a, pa + pb)
            },
        );

    prog.duplicate_ids = make_ids_unique(&mut spectra);
    sort_spectra(&mut spectra);
    info!(
        "Read {} MSn spectra in {:0.3?}",
        spectra.len(),
        Instant::now() - started
    );

    for (_, spectrum) in spectra {
        if let Err(e) = sender.send(Arc::new(spectrum)) {
            warn!("Failed to send spectrum for clustering: {e}");
            break;
        }
    }
    prog
}

#[cfg(test)]
mod test {
    use super::*;

    use mzdata::io::mgf::MGFReaderType;

    #[test]
    fn test_read_fixture() {
        let reader = MGFReaderType::open_path("./tests/data/small.mgf").unwrap();
        let (sender, receiver) = crossbeam_channel::unbounded();
        let prog = prepare_spectra(reader, sender);
        let spectra: Vec<_> = receiver.iter().collect();
        assert_eq!(spectra.len(), prog.msn_spectra);
        assert_eq!(spectra.len(), 8);
        assert_eq!(prog.charge_defaulted, 1);
        assert!(spectra
            .windows(2)
            .all(|w| w[0].precursor_mz() <= w[1].precursor_mz()));
        assert!(spectra.iter().all(|s| s.property("title") == Some(s.id())));
        assert_eq!(prog.duplicate_ids, 0);
    }

    #[test]
    fn test_duplicate_ids_renamed() {
        let make = |id: &str, mz: f64| {
            let mut spectrum = Spectrum::new(id, 2, mz, vec![]);
            spectrum.set_property("title", Some(id));
            spectrum
        };
        let mut spectra = vec![
            (2, make("scan=1", 400.0)),
            (0, make("scan=1", 500.0)),
            (1, make("scan=1#2", 450.0)),
            (3, make("scan=2", 300.0)),
        ];
        assert_eq!(make_ids_unique(&mut spectra), 1);
        let ids: Vec<&str> = spectra.iter().map(|(_, s)| s.id()).collect();
        assert_eq!(ids, vec!["scan=1", "scan=1#2", "scan=1#3", "scan=2"]);
        assert_eq!(spectra[2].1.property("title"), Some("scan=1"));
    }
}
