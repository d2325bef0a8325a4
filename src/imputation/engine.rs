use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::io::Write;
use std::sync::Arc;

use crate::haplotype::hap_pair::HapPair;
use crate::haplotype::initial_haplotypes::InitialHaplotypes;
use crate::imputation::li_stephens::{HmmParams, HmmScratch, LiStephensHmm};
use crate::imputation::phase_states::PhaseStates;
use crate::imputation::steps::{CodedSteps, Steps};
use crate::model::chrom_ids::ChromIds;
use crate::model::genetic_map::GeneticMap;
use crate::model::marker::Markers;
use crate::model::ref_gt_rec::RefGTRec;
use crate::model::samples::Samples;
use crate::model::target_gt::{TargetData, TargetGT, MISSING_ALLELE};
use crate::utils::errors::KelpieError;
use crate::utils::math_utils::MathUtils;

// per-round RNG stream separation
const ROUND_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Tunable parameters of the per-window imputation engine, validated at
/// driver entry.
#[derive(Debug, Clone, Copy)]
pub struct ImpConfig {
    /// Maximum reference states per sample (K).
    pub n_states: usize,
    /// Refinement rounds; only the last writes output.
    pub n_iter: usize,
    /// Allele mismatch probability of the HMM.
    pub err: f64,
    /// Recombination intensity per cM.
    pub rho: f64,
    /// Floor applied to empirical allele frequencies.
    pub f_min: f64,
    /// Minimum step length in cM for the IBS selector.
    pub step_cm: f64,
    pub seed: u64,
}

impl Default for ImpConfig {
    fn default() -> ImpConfig {
        ImpConfig {
            n_states: 1600,
            n_iter: 4,
            err: 1e-4,
            rho: 0.04,
            f_min: 1e-4,
            step_cm: 0.1,
            seed: 0,
        }
    }
}

impl ImpConfig {
    pub fn validate(&self) -> Result<(), KelpieError> {
        if self.n_states < 1 {
            return Err(KelpieError::Parameter(format!(
                "n_states must be at least 1: {}",
                self.n_states
            )));
        }
        if self.n_iter < 1 {
            return Err(KelpieError::Parameter(format!(
                "n_iter must be at least 1: {}",
                self.n_iter
            )));
        }
        if !(self.err >= 0.0 && self.err < 1.0) {
            return Err(KelpieError::Parameter(format!(
                "err must lie in [0, 1): {}",
                self.err
            )));
        }
        if !(self.rho > 0.0) {
            return Err(KelpieError::Parameter(format!(
                "rho must be positive: {}",
                self.rho
            )));
        }
        if !(self.f_min > 0.0 && self.f_min < 0.5) {
            return Err(KelpieError::Parameter(format!(
                "f_min must lie in (0, 0.5): {}",
                self.f_min
            )));
        }
        if !(self.step_cm > 0.0) {
            return Err(KelpieError::Parameter(format!(
                "step_cm must be positive: {}",
                self.step_cm
            )));
        }
        Ok(())
    }
}

// which working alleles are pinned by the target data, per sample
struct ObsMask {
    observed: [Vec<bool>; 2],
    reorientable: Vec<bool>,
}

// per-worker mutable state, pooled across samples by rayon
struct Worker {
    phase_states: PhaseStates,
    scratch: HmmScratch,
}

/// One sample's posterior allele probabilities, flattened per haplotype
/// over the window's (marker, allele) pairs.
pub struct SampleResult {
    al_probs1: Vec<f64>,
    al_probs2: Vec<f64>,
}

/**
 * Per-window imputation driver (component H).
 *
 * Seeds working haplotype pairs from the genotype data (component E), then
 * runs `n_iter` refinement rounds: per sample, select IBS reference states
 * (component F) and run the Li-Stephens forward-backward (component G).
 * Non-final rounds sample a new haplotype pair from the posterior; the
 * final round writes posterior allele probabilities. Samples run in
 * parallel with shared read-only reference data; the first worker error
 * fails the window, and nothing is emitted for a failed window.
 */
pub struct ImputationEngine {
    config: ImpConfig,
    chrom_ids: Arc<ChromIds>,
    markers: Arc<Markers>,
    ref_recs: Vec<RefGTRec>,
    target: TargetGT,
    gen_pos: Vec<f64>,
    targ_markers: Vec<usize>,
    // index of the target record at each reference marker, if genotyped
    targ_rec_of: Vec<Option<usize>>,
    al_offsets: Vec<usize>,
}

impl ImputationEngine {
    pub fn new(
        config: ImpConfig,
        chrom_ids: Arc<ChromIds>,
        markers: Arc<Markers>,
        ref_recs: Vec<RefGTRec>,
        target: TargetGT,
        map: &GeneticMap,
    ) -> Result<ImputationEngine, KelpieError> {
        config.validate()?;
        if ref_recs.is_empty() {
            return Err(KelpieError::InvariantViolation(
                "Window with no reference records".to_string(),
            ));
        }
        if ref_recs.len() != markers.n_markers() {
            return Err(KelpieError::InvariantViolation(format!(
                "{} reference records for {} markers",
                ref_recs.len(),
                markers.n_markers()
            )));
        }
        let ref_samples = ref_recs[0].samples();
        for (m, rec) in ref_recs.iter().enumerate() {
            if rec.marker() != markers.marker(m) {
                return Err(KelpieError::InvariantViolation(format!(
                    "Reference record {} does not match its window marker",
                    m
                )));
            }
            if !Arc::ptr_eq(rec.samples(), ref_samples)
                && *rec.samples().as_ref() != *ref_samples.as_ref()
            {
                return Err(KelpieError::InvariantViolation(
                    "Reference records disagree on the sample list".to_string(),
                ));
            }
        }
        let chrom = markers.marker(0).chrom();
        if markers.iter().any(|mk| mk.chrom() != chrom) {
            return Err(KelpieError::InvariantViolation(
                "Window spans more than one chromosome".to_string(),
            ));
        }
        let gen_pos: Vec<f64> = markers
            .iter()
            .map(|mk| map.gen_pos(mk.chrom(), mk.pos()))
            .collect();
        let targ_markers = target.genotyped_markers();
        let mut targ_rec_of = vec![None; markers.n_markers()];
        for (t, &m) in targ_markers.iter().enumerate() {
            targ_rec_of[m] = Some(t);
        }
        let mut al_offsets = Vec::with_capacity(markers.n_markers() + 1);
        let mut total = 0usize;
        al_offsets.push(0);
        for mk in markers.iter() {
            total += mk.n_alleles();
            al_offsets.push(total);
        }
        Ok(ImputationEngine {
            config,
            chrom_ids,
            markers,
            ref_recs,
            target,
            gen_pos,
            targ_markers,
            targ_rec_of,
            al_offsets,
        })
    }

    pub fn run(&self) -> Result<WindowResult, KelpieError> {
        let n_samples = self.target.n_samples();
        let n_markers = self.markers.n_markers();
        let n_ref_haps = self.ref_recs[0].n_haps();
        let k_max = self.config.n_states.min(n_ref_haps);
        info!(
            "Imputing {} samples at {} markers ({} genotyped) from {} reference haplotypes",
            n_samples,
            n_markers,
            self.targ_markers.len(),
            n_ref_haps
        );

        let init = InitialHaplotypes::new(
            self.markers.clone(),
            &self.ref_recs,
            &self.target,
            self.config.f_min,
            self.config.seed,
        )?;
        let mut hap_pairs = init.sample_hap_pairs()?;

        let steps = Steps::new(&self.gen_pos, &self.targ_markers, self.config.step_cm);
        let coded = CodedSteps::new(&steps, &self.targ_markers, &self.ref_recs);
        let masks = self.obs_masks();
        let hmm = LiStephensHmm::new(
            &self.markers,
            &self.gen_pos,
            HmmParams {
                rho: self.config.rho,
                err: self.config.err,
            },
        );
        let al_total = *self.al_offsets.last().unwrap();
        let new_worker = || Worker {
            phase_states: PhaseStates::new(k_max),
            scratch: HmmScratch::new(n_markers, k_max, al_total),
        };

        for round in 0..self.config.n_iter - 1 {
            let refined: Result<Vec<HapPair>, KelpieError> = (0..n_samples)
                .into_par_iter()
                .map_init(new_worker, |worker, s| {
                    self.refine_sample(round, &hap_pairs[s], &masks[s], &steps, &coded, &hmm, worker)
                })
                .collect();
            hap_pairs = refined?;
            debug!("Refinement round {} of {} complete", round + 1, self.config.n_iter);
        }

        let results: Result<Vec<SampleResult>, KelpieError> = (0..n_samples)
            .into_par_iter()
            .map_init(new_worker, |worker, s| {
                self.impute_sample(&hap_pairs[s], &masks[s], &steps, &coded, &hmm, worker)
            })
            .collect();
        let results = results?;
        let dr2 = self.estimate_dr2(&results);
        Ok(WindowResult {
            chrom_ids: self.chrom_ids.clone(),
            markers: self.markers.clone(),
            samples: self.target.samples().clone(),
            al_offsets: self.al_offsets.clone(),
            results,
            dr2,
        })
    }

    // state selection plus one forward-backward pass per haplotype; fills
    // the worker's posterior buffers
    fn run_hmm(
        &self,
        pair: &HapPair,
        mask: &ObsMask,
        steps: &Steps,
        coded: &CodedSteps,
        hmm: &LiStephensHmm,
        worker: &mut Worker,
    ) -> Result<usize, KelpieError> {
        let scratch = &mut worker.scratch;
        let n_used = worker.phase_states.select(
            steps,
            coded,
            &self.targ_markers,
            &self.ref_recs,
            pair,
            None,
            &mut scratch.state_alleles,
        );
        if n_used == 0 {
            return Err(KelpieError::InvariantViolation(format!(
                "State selection produced no states for sample {}",
                pair.sample()
            )));
        }
        hmm.switch_probs(n_used, &mut scratch.p_switch);
        for hap in 0..2 {
            for m in 0..self.markers.n_markers() {
                scratch.obs[m] = if mask.observed[hap][m] {
                    pair.allele(m, hap) as i32
                } else {
                    -1
                };
            }
            hmm.forward(
                &scratch.obs,
                &scratch.state_alleles,
                n_used,
                &scratch.p_switch,
                &mut scratch.fwd,
            );
            hmm.backward(
                &scratch.obs,
                &scratch.state_alleles,
                n_used,
                &scratch.p_switch,
                &mut scratch.bwd,
            );
            let out = if hap == 0 {
                &mut scratch.al_probs1
            } else {
                &mut scratch.al_probs2
            };
            hmm.posteriors(
                &scratch.fwd,
                &scratch.bwd,
                &scratch.state_alleles,
                n_used,
                &self.al_offsets,
                out,
            );
        }
        Ok(n_used)
    }

    // non-final round: draw a new pair from the posterior. Called alleles
    // stay fixed and unphased heterozygote orientation is re-drawn from
    // the pair posterior; likelihood-typed alleles are re-drawn jointly
    // with zero-likelihood draws rejected; everything else is drawn per
    // haplotype.
    fn refine_sample(
        &self,
        round: usize,
        pair: &HapPair,
        mask: &ObsMask,
        steps: &Steps,
        coded: &CodedSteps,
        hmm: &LiStephensHmm,
        worker: &mut Worker,
    ) -> Result<HapPair, KelpieError> {
        self.run_hmm(pair, mask, steps, coded, hmm, worker)?;
        let scratch = &worker.scratch;
        let sample = pair.sample();
        let mut rng = StdRng::seed_from_u64(
            self.config
                .seed
                .wrapping_add(sample as u64)
                .wrapping_add((round as u64 + 1).wrapping_mul(ROUND_STRIDE)),
        );
        let mut next = pair.clone();
        for m in 0..self.markers.n_markers() {
            let (lo, hi) = (self.al_offsets[m], self.al_offsets[m + 1]);
            let probs1 = &scratch.al_probs1[lo..hi];
            let probs2 = &scratch.al_probs2[lo..hi];
            if let TargetData::Likelihoods(recs) = self.target.data() {
                if let Some(t) = self.targ_rec_of[m] {
                    let rec = &recs[t];
                    let mut d1 = MathUtils::cumulative_sample(probs1, rng.gen::<f64>());
                    let mut d2 = MathUtils::cumulative_sample(probs2, rng.gen::<f64>());
                    let mut tries = 0;
                    while rec.gl(sample, d1, d2) == 0.0
                        && tries < InitialHaplotypes::MAX_REJECTED_DRAWS
                    {
                        d1 = MathUtils::cumulative_sample(probs1, rng.gen::<f64>());
                        d2 = MathUtils::cumulative_sample(probs2, rng.gen::<f64>());
                        tries += 1;
                    }
                    next.set(m, 0, d1 as u32)?;
                    next.set(m, 1, d2 as u32)?;
                    continue;
                }
            }
            let observed1 = mask.observed[0][m];
            let observed2 = mask.observed[1][m];
            if observed1 && observed2 {
                let a1 = pair.allele1(m) as usize;
                let a2 = pair.allele2(m) as usize;
                if mask.reorientable[m] && a1 != a2 {
                    let keep = probs1[a1] * probs2[a2];
                    let swap = probs1[a2] * probs2[a1];
                    let total = keep + swap;
                    if total > 0.0 && rng.gen::<f64>() * total < swap {
                        next.swap(m);
                    }
                }
                continue;
            }
            if !observed1 {
                let draw = MathUtils::cumulative_sample(probs1, rng.gen::<f64>());
                next.set(m, 0, draw as u32)?;
            }
            if !observed2 {
                let draw = MathUtils::cumulative_sample(probs2, rng.gen::<f64>());
                next.set(m, 1, draw as u32)?;
            }
        }
        Ok(next)
    }

    // final round: posterior allele probabilities. Called positions are
    // pinned to the called allele so genotyped markers pass through;
    // likelihood-typed markers carry no hard call and report the HMM
    // posterior instead.
    fn impute_sample(
        &self,
        pair: &HapPair,
        mask: &ObsMask,
        steps: &Steps,
        coded: &CodedSteps,
        hmm: &LiStephensHmm,
        worker: &mut Worker,
    ) -> Result<SampleResult, KelpieError> {
        self.run_hmm(pair, mask, steps, coded, hmm, worker)?;
        let scratch = &mut worker.scratch;
        let pin = matches!(self.target.data(), TargetData::Called(_));
        for m in 0..self.markers.n_markers() {
            let (lo, hi) = (self.al_offsets[m], self.al_offsets[m + 1]);
            for hap in 0..2 {
                if pin && mask.observed[hap][m] {
                    let probs = if hap == 0 {
                        &mut scratch.al_probs1[lo..hi]
                    } else {
                        &mut scratch.al_probs2[lo..hi]
                    };
                    probs.iter_mut().for_each(|x| *x = 0.0);
                    probs[pair.allele(m, hap) as usize] = 1.0;
                }
            }
        }
        Ok(SampleResult {
            al_probs1: scratch.al_probs1.clone(),
            al_probs2: scratch.al_probs2.clone(),
        })
    }

    fn obs_masks(&self) -> Vec<ObsMask> {
        let n_markers = self.markers.n_markers();
        let mut masks: Vec<ObsMask> = (0..self.target.n_samples())
            .map(|_| ObsMask {
                observed: [vec![false; n_markers], vec![false; n_markers]],
                reorientable: vec![false; n_markers],
            })
            .collect();
        match self.target.data() {
            TargetData::Called(recs) => {
                for rec in recs {
                    let m = rec.ref_marker();
                    for (s, mask) in masks.iter_mut().enumerate() {
                        let a1 = rec.allele1(s);
                        let a2 = rec.allele2(s);
                        mask.observed[0][m] = a1 != MISSING_ALLELE;
                        mask.observed[1][m] = a2 != MISSING_ALLELE;
                        mask.reorientable[m] =
                            a1 != MISSING_ALLELE && a2 != MISSING_ALLELE && !rec.is_phased(s);
                    }
                }
            }
            // likelihood data make the current working alleles the HMM
            // observations within a round; refinement re-draws them, so no
            // orientation flag is needed
            TargetData::Likelihoods(recs) => {
                for rec in recs {
                    let m = rec.ref_marker();
                    for mask in masks.iter_mut() {
                        mask.observed[0][m] = true;
                        mask.observed[1][m] = true;
                    }
                }
            }
        }
        masks
    }

    /**
     * Estimated squared correlation between the estimated and true allele
     * dose, per (marker, allele): the variance of the posterior dose
     * estimates over target haplotypes, divided by itself plus the mean
     * posterior dose variance.
     */
    fn estimate_dr2(&self, results: &[SampleResult]) -> Vec<f64> {
        let n_haps = 2 * results.len();
        let al_total = *self.al_offsets.last().unwrap();
        let mut dr2 = vec![0.0f64; al_total];
        for i in 0..al_total {
            let mut sum = 0.0;
            let mut sum_sq = 0.0;
            let mut cond_var = 0.0;
            for result in results {
                for p in [result.al_probs1[i], result.al_probs2[i]] {
                    sum += p;
                    sum_sq += p * p;
                    cond_var += p * (1.0 - p);
                }
            }
            let n = n_haps as f64;
            let var_est = sum_sq / n - (sum / n) * (sum / n);
            let denom = var_est + cond_var / n;
            dr2[i] = if denom > 0.0 { var_est / denom } else { 0.0 };
        }
        dr2
    }
}

/**
 * The imputed window: per target sample and marker, posterior allele
 * probabilities for each haplotype, with records emitted in marker order.
 */
pub struct WindowResult {
    chrom_ids: Arc<ChromIds>,
    markers: Arc<Markers>,
    samples: Arc<Samples>,
    al_offsets: Vec<usize>,
    results: Vec<SampleResult>,
    dr2: Vec<f64>,
}

impl WindowResult {
    pub fn markers(&self) -> &Arc<Markers> {
        &self.markers
    }

    pub fn samples(&self) -> &Arc<Samples> {
        &self.samples
    }

    pub fn n_markers(&self) -> usize {
        self.markers.n_markers()
    }

    /// Posterior probability that haplotype `hap` of `sample` carries
    /// `allele` at marker m.
    pub fn allele_prob(&self, sample: usize, m: usize, hap: usize, allele: usize) -> f64 {
        let result = &self.results[sample];
        let i = self.al_offsets[m] + allele;
        if hap == 0 {
            result.al_probs1[i]
        } else {
            result.al_probs2[i]
        }
    }

    /// Expected diploid dose of `allele` at marker m for `sample`.
    pub fn dosage(&self, sample: usize, m: usize, allele: usize) -> f64 {
        self.allele_prob(sample, m, 0, allele) + self.allele_prob(sample, m, 1, allele)
    }

    /// Most probable phased genotype at marker m.
    pub fn best_alleles(&self, sample: usize, m: usize) -> (usize, usize) {
        let (lo, hi) = (self.al_offsets[m], self.al_offsets[m + 1]);
        let result = &self.results[sample];
        (
            MathUtils::max_element_index(&result.al_probs1[lo..hi], 0, hi - lo),
            MathUtils::max_element_index(&result.al_probs2[lo..hi], 0, hi - lo),
        )
    }

    /// Estimated dose r-squared of `allele` at marker m.
    pub fn dr2(&self, m: usize, allele: usize) -> f64 {
        self.dr2[self.al_offsets[m] + allele]
    }

    /**
     * Writes the window as a tab-delimited table: one row per marker in
     * order, with per-sample best-guess phased genotype and non-reference
     * allele dosages.
     */
    pub fn write_table<W: Write>(&self, out: &mut W) -> Result<(), KelpieError> {
        self.write_header(out)?;
        self.write_rows(out, 0, self.markers.n_markers())
    }

    pub fn write_header<W: Write>(&self, out: &mut W) -> Result<(), KelpieError> {
        write!(out, "#CHROM\tPOS\tID\tREF\tALT\tDR2")?;
        for sample in 0..self.samples.n_samples() {
            write!(out, "\t{}", self.samples.id(sample))?;
        }
        writeln!(out)?;
        Ok(())
    }

    /// Writes the rows for markers [from, to); callers discarding window
    /// overlap pass the interior range.
    pub fn write_rows<W: Write>(
        &self,
        out: &mut W,
        from: usize,
        to: usize,
    ) -> Result<(), KelpieError> {
        for m in from..to {
            let marker = self.markers.marker(m);
            let alt = if marker.n_alleles() > 1 {
                marker.alleles()[1..].join(",")
            } else {
                ".".to_string()
            };
            let dr2 = if marker.n_alleles() > 1 {
                (1..marker.n_alleles())
                    .map(|a| format!("{:.3}", self.dr2(m, a)))
                    .join(",")
            } else {
                ".".to_string()
            };
            write!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{}",
                self.chrom_ids.name(marker.chrom()),
                marker.pos(),
                marker.id().unwrap_or("."),
                marker.allele(0),
                alt,
                dr2
            )?;
            for sample in 0..self.samples.n_samples() {
                let (a1, a2) = self.best_alleles(sample, m);
                let dosages = if marker.n_alleles() > 1 {
                    (1..marker.n_alleles())
                        .map(|a| format!("{:.2}", self.dosage(sample, m, a)))
                        .join(",")
                } else {
                    ".".to_string()
                };
                write!(out, "\t{}|{}:{}", a1, a2, dosages)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}
