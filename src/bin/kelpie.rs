#[macro_use]
extern crate log;

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use clap_complete::{generate, Shell};
use itertools::Itertools;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use kelpie_genome::bref::reader::read_ref_panel;
use kelpie_genome::cli::{build_cli, imp_config_from_matches, set_log_level};
use kelpie_genome::imputation::engine::{ImpConfig, ImputationEngine};
use kelpie_genome::model::chrom_ids::ChromIds;
use kelpie_genome::model::genetic_map::GeneticMap;
use kelpie_genome::model::marker::{Marker, Markers};
use kelpie_genome::model::ref_gt_rec::RefGTRec;
use kelpie_genome::model::samples::Samples;
use kelpie_genome::model::target_gt::{CalledGTRec, TargetData, TargetGT};

fn main() {
    let matches = build_cli().get_matches();
    if let Some(shell) = matches.get_one::<Shell>("shell-completion") {
        generate(*shell, &mut build_cli(), "kelpie", &mut std::io::stdout());
        return;
    }
    set_log_level(&matches, true);
    let threads = *matches.get_one::<usize>("threads").unwrap();
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .expect("Failed to build the global thread pool");
    match run(&matches) {
        Ok(()) => info!("Imputation complete."),
        Err(e) => {
            error!("Imputation failed: {:?}", e);
            process::exit(1);
        }
    }
}

fn run(matches: &ArgMatches) -> Result<()> {
    let ref_path = matches.get_one::<PathBuf>("ref").unwrap();
    let gt_path = matches.get_one::<PathBuf>("gt").unwrap();
    let out_path = matches.get_one::<PathBuf>("out").unwrap();
    let window_cm = *matches.get_one::<f64>("window").unwrap();
    let overlap_cm = *matches.get_one::<f64>("overlap").unwrap();
    if !(window_cm > 0.0) || !(0.0..window_cm).contains(&overlap_cm) {
        bail!(
            "window must be positive and overlap must lie in [0, window): window={}, overlap={}",
            window_cm,
            overlap_cm
        );
    }
    let config = imp_config_from_matches(matches);

    let mut chrom_ids = ChromIds::new();
    let (ref_samples, mut ref_recs, blocks) = read_ref_panel(ref_path, &mut chrom_ids)
        .with_context(|| format!("Failed to read reference panel {}", ref_path.display()))?;
    info!(
        "Reference panel: {} samples, {} markers in {} blocks",
        ref_samples.n_samples(),
        ref_recs.len(),
        blocks.len()
    );
    let (targ_samples, mut targ_recs, _) = read_ref_panel(gt_path, &mut chrom_ids)
        .with_context(|| format!("Failed to read target panel {}", gt_path.display()))?;
    info!(
        "Target panel: {} samples, {} markers",
        targ_samples.n_samples(),
        targ_recs.len()
    );
    let map = match matches.get_one::<PathBuf>("map") {
        Some(path) => GeneticMap::from_plink_file(path, &mut chrom_ids)?,
        None => {
            info!("No genetic map supplied; assuming 1 cM/Mb");
            GeneticMap::constant_rate()
        }
    };
    if let Some(chrom_name) = matches.get_one::<String>("chrom") {
        let chrom = chrom_ids
            .index_of(chrom_name)
            .with_context(|| format!("Chromosome '{}' not present in the input", chrom_name))?;
        ref_recs.retain(|r| r.marker().chrom() == chrom);
        targ_recs.retain(|r| r.marker().chrom() == chrom);
    }
    if ref_recs.is_empty() {
        bail!("No reference records to impute from");
    }
    let chrom_ids = Arc::new(chrom_ids);

    let out = File::create(out_path)
        .with_context(|| format!("Failed to create {}", out_path.display()))?;
    let mut out = BufWriter::new(out);
    let mut header_written = false;

    // windows are independent; this driver runs them serially in order
    let mut lo = 0;
    while lo < ref_recs.len() {
        let chrom = ref_recs[lo].marker().chrom();
        let hi = ref_recs[lo..]
            .iter()
            .position(|r| r.marker().chrom() != chrom)
            .map(|p| lo + p)
            .unwrap_or(ref_recs.len());
        impute_chromosome(
            &ref_recs[lo..hi],
            &targ_recs,
            &targ_samples,
            &map,
            &chrom_ids,
            config,
            window_cm,
            overlap_cm,
            &mut out,
            &mut header_written,
        )?;
        lo = hi;
    }
    out.flush()?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn impute_chromosome(
    ref_recs: &[RefGTRec],
    targ_recs: &[RefGTRec],
    targ_samples: &Arc<Samples>,
    map: &GeneticMap,
    chrom_ids: &Arc<ChromIds>,
    config: ImpConfig,
    window_cm: f64,
    overlap_cm: f64,
    out: &mut impl Write,
    header_written: &mut bool,
) -> Result<()> {
    let chrom = ref_recs[0].marker().chrom();
    let gen_pos: Vec<f64> = ref_recs
        .iter()
        .map(|r| map.gen_pos(chrom, r.marker().pos()))
        .collect();
    let windows = window_specs(&gen_pos, window_cm, overlap_cm);
    info!(
        "Chromosome {}: {} markers in {} windows",
        chrom_ids.name(chrom),
        ref_recs.len(),
        windows.len()
    );
    for (lo, hi, emit_lo, emit_hi) in windows {
        if lo >= hi || emit_lo >= emit_hi {
            continue;
        }
        let window_recs = ref_recs[lo..hi].to_vec();
        let markers = Arc::new(Markers::new(
            window_recs.iter().map(|r| r.marker().clone()).collect(),
        )?);
        let target = window_target(&markers, targ_recs, targ_samples)?;
        if target.n_genotyped() == 0 {
            warn!(
                "Window {}:{}-{} has no genotyped target markers",
                chrom_ids.name(chrom),
                markers.marker(0).pos(),
                markers.marker(markers.n_markers() - 1).pos()
            );
        }
        let engine = ImputationEngine::new(
            config,
            chrom_ids.clone(),
            markers,
            window_recs,
            target,
            map,
        )?;
        let result = engine.run()?;
        if !*header_written {
            result.write_header(out)?;
            *header_written = true;
        }
        result.write_rows(out, emit_lo - lo, emit_hi - lo)?;
    }
    Ok(())
}

/// Phased target records restricted to one window, re-expressed as called
/// genotypes against the window's reference markers.
fn window_target(
    markers: &Arc<Markers>,
    targ_recs: &[RefGTRec],
    targ_samples: &Arc<Samples>,
) -> Result<TargetGT> {
    let index: HashMap<&Marker, usize> = markers
        .iter()
        .enumerate()
        .map(|(m, marker)| (marker, m))
        .collect();
    let n_samples = targ_samples.n_samples();
    let matched: Vec<(usize, &RefGTRec)> = targ_recs
        .iter()
        .filter_map(|rec| index.get(rec.marker()).map(|&m| (m, rec)))
        .sorted_by_key(|(m, _)| *m)
        .collect();
    let mut recs = Vec::with_capacity(matched.len());
    for (m, rec) in matched {
        let mut allele1 = Vec::with_capacity(n_samples);
        let mut allele2 = Vec::with_capacity(n_samples);
        for s in 0..n_samples {
            allele1.push(rec.allele(2 * s) as i16);
            allele2.push(rec.allele(2 * s + 1) as i16);
        }
        recs.push(CalledGTRec::new(
            m,
            rec.n_alleles(),
            allele1,
            allele2,
            vec![true; n_samples],
        )?);
    }
    let target = TargetGT::new(targ_samples.clone(), markers, TargetData::Called(recs))?;
    Ok(target)
}

/**
 * Splits one chromosome's markers into overlapping windows by genetic
 * position. Each (lo, hi, emit_lo, emit_hi) covers markers [lo, hi) and
 * emits [emit_lo, emit_hi); emitted ranges tile the chromosome exactly.
 */
fn window_specs(gen_pos: &[f64], window_cm: f64, overlap_cm: f64) -> Vec<(usize, usize, usize, usize)> {
    let n = gen_pos.len();
    let mut specs = Vec::new();
    if n == 0 {
        return specs;
    }
    let mut window_start_cm = gen_pos[0];
    let mut emit_from = 0usize;
    loop {
        let window_end_cm = window_start_cm + window_cm;
        let lo = gen_pos.partition_point(|&cm| cm < window_start_cm);
        let hi = gen_pos.partition_point(|&cm| cm < window_end_cm);
        let last = hi >= n;
        let emit_to = if last {
            n
        } else {
            gen_pos
                .partition_point(|&cm| cm < window_end_cm - overlap_cm / 2.0)
                .max(emit_from)
        };
        specs.push((lo.min(emit_from), hi.max(emit_to), emit_from, emit_to));
        if last {
            break;
        }
        emit_from = emit_to;
        window_start_cm = window_end_cm - overlap_cm;
    }
    specs
}
