use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::sync::Arc;

use crate::haplotype::hap_pair::HapPair;
use crate::model::marker::Markers;
use crate::model::ref_gt_rec::RefGTRec;
use crate::model::target_gt::{TargetData, TargetGT, MISSING_ALLELE};
use crate::utils::errors::KelpieError;
use crate::utils::math_utils::MathUtils;

/**
 * Seeds each target sample's working haplotype pair so the HMM has defined
 * states everywhere (component E).
 *
 * Known phased alleles are copied, unphased called pairs are oriented by a
 * fair coin, and every missing allele is drawn independently from the
 * marker's empirical allele-frequency vector (target plus reference
 * counts, floored at f_min). The likelihood path additionally rejects
 * diploid draws whose genotype likelihood is exactly zero.
 *
 * Sample s draws from an RNG seeded `seed + s`, so initialization is
 * deterministic and independent across samples.
 */
pub struct InitialHaplotypes<'a> {
    markers: Arc<Markers>,
    ref_recs: &'a [RefGTRec],
    target: &'a TargetGT,
    f_min: f64,
    seed: u64,
}

impl<'a> InitialHaplotypes<'a> {
    /// Bound on zero-likelihood rejection retries per genotype.
    pub const MAX_REJECTED_DRAWS: usize = 100;

    pub fn new(
        markers: Arc<Markers>,
        ref_recs: &'a [RefGTRec],
        target: &'a TargetGT,
        f_min: f64,
        seed: u64,
    ) -> Result<InitialHaplotypes<'a>, KelpieError> {
        if !(0.0..0.5).contains(&f_min) || f_min == 0.0 {
            return Err(KelpieError::Parameter(format!(
                "f_min must lie in (0, 0.5): {}",
                f_min
            )));
        }
        if ref_recs.len() != markers.n_markers() {
            return Err(KelpieError::InvariantViolation(format!(
                "{} reference records for {} markers",
                ref_recs.len(),
                markers.n_markers()
            )));
        }
        Ok(InitialHaplotypes {
            markers,
            ref_recs,
            target,
            f_min,
            seed,
        })
    }

    /**
     * Per-marker empirical allele-frequency vectors. Counts come from the
     * called target alleles (or expected allele doses under the
     * likelihoods) plus all reference haplotypes; frequencies below f_min
     * are raised to f_min and the vector renormalized.
     */
    pub fn allele_frequencies(&self) -> Vec<Vec<f64>> {
        let n_markers = self.markers.n_markers();
        let rec_of = self.target_rec_index();
        let mut result = Vec::with_capacity(n_markers);
        for m in 0..n_markers {
            let n_alleles = self.markers.marker(m).n_alleles();
            let mut freq = vec![0.0f64; n_alleles];
            match self.target.data() {
                TargetData::Called(recs) => {
                    if let Some(t) = rec_of[m] {
                        let rec = &recs[t];
                        for s in 0..self.target.n_samples() {
                            for a in [rec.allele1(s), rec.allele2(s)] {
                                if a != MISSING_ALLELE {
                                    freq[a as usize] += 1.0;
                                }
                            }
                        }
                    }
                }
                TargetData::Likelihoods(recs) => {
                    if let Some(t) = rec_of[m] {
                        let rec = &recs[t];
                        for s in 0..self.target.n_samples() {
                            for a2 in 0..n_alleles {
                                for a1 in 0..=a2 {
                                    let p = rec.gl(s, a1, a2);
                                    freq[a1] += p;
                                    freq[a2] += p;
                                }
                            }
                        }
                    }
                }
            }
            for (a, f) in freq.iter_mut().enumerate() {
                *f += self.ref_recs[m].allele_count(a) as f64;
            }
            MathUtils::normalize_sum_to_one(&mut freq);
            let mut floored = false;
            for f in freq.iter_mut() {
                if *f < self.f_min {
                    *f = self.f_min;
                    floored = true;
                }
            }
            if floored {
                MathUtils::normalize_sum_to_one(&mut freq);
            }
            result.push(freq);
        }
        result
    }

    /// Draws one bit-packed pair per target sample.
    pub fn sample_hap_pairs(&self) -> Result<Vec<HapPair>, KelpieError> {
        let freqs = self.allele_frequencies();
        let rec_of = self.target_rec_index();
        (0..self.target.n_samples())
            .into_par_iter()
            .map(|s| self.sample_pair(s, &freqs, &rec_of))
            .collect()
    }

    fn sample_pair(
        &self,
        sample: usize,
        freqs: &[Vec<f64>],
        rec_of: &[Option<usize>],
    ) -> Result<HapPair, KelpieError> {
        let n_markers = self.markers.n_markers();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(sample as u64));
        let mut alleles1 = vec![0u32; n_markers];
        let mut alleles2 = vec![0u32; n_markers];
        for m in 0..n_markers {
            let freq = &freqs[m];
            let (a1, a2) = match (self.target.data(), rec_of[m]) {
                (TargetData::Called(recs), Some(t)) => {
                    let rec = &recs[t];
                    let c1 = rec.allele1(sample);
                    let c2 = rec.allele2(sample);
                    if c1 != MISSING_ALLELE && c2 != MISSING_ALLELE {
                        if rec.is_phased(sample) || c1 == c2 || rng.gen::<bool>() {
                            (c1 as u32, c2 as u32)
                        } else {
                            (c2 as u32, c1 as u32)
                        }
                    } else {
                        let d1 = if c1 != MISSING_ALLELE {
                            c1 as u32
                        } else {
                            Self::draw(freq, &mut rng)
                        };
                        let d2 = if c2 != MISSING_ALLELE {
                            c2 as u32
                        } else {
                            Self::draw(freq, &mut rng)
                        };
                        (d1, d2)
                    }
                }
                (TargetData::Likelihoods(recs), Some(t)) => {
                    let rec = &recs[t];
                    let mut d1 = Self::draw(freq, &mut rng);
                    let mut d2 = Self::draw(freq, &mut rng);
                    let mut tries = 0;
                    while rec.gl(sample, d1 as usize, d2 as usize) == 0.0
                        && tries < Self::MAX_REJECTED_DRAWS
                    {
                        d1 = Self::draw(freq, &mut rng);
                        d2 = Self::draw(freq, &mut rng);
                        tries += 1;
                    }
                    (d1, d2)
                }
                // marker present only in the reference panel
                (_, None) => (Self::draw(freq, &mut rng), Self::draw(freq, &mut rng)),
            };
            alleles1[m] = a1;
            alleles2[m] = a2;
        }
        HapPair::from_alleles(self.markers.clone(), sample, &alleles1, &alleles2)
    }

    fn draw(freq: &[f64], rng: &mut StdRng) -> u32 {
        MathUtils::cumulative_sample(freq, rng.gen::<f64>()) as u32
    }

    // rec_of[m] = index of the target record at reference marker m, if any
    fn target_rec_index(&self) -> Vec<Option<usize>> {
        let mut rec_of = vec![None; self.markers.n_markers()];
        for (t, m) in self.target.genotyped_markers().into_iter().enumerate() {
            rec_of[m] = Some(t);
        }
        rec_of
    }
}
