use std::sync::Arc;

use crate::model::marker::Markers;
use crate::model::samples::Samples;
use crate::utils::errors::KelpieError;

/// Missing-allele sentinel in called-genotype columns.
pub const MISSING_ALLELE: i16 = -1;

/**
 * Target-cohort genotype data for one window. Genotyped markers are a
 * subset of the window's reference markers; each record carries the index
 * of its reference marker. Data are either called genotypes (possibly
 * unphased or partially missing) or normalized diploid genotype
 * likelihoods.
 */
#[derive(Debug, Clone)]
pub struct TargetGT {
    samples: Arc<Samples>,
    data: TargetData,
}

#[derive(Debug, Clone)]
pub enum TargetData {
    Called(Vec<CalledGTRec>),
    Likelihoods(Vec<GlRec>),
}

/**
 * Called genotypes for one marker: per-sample allele pair and phase flag.
 * `MISSING_ALLELE` marks a missing allele; an unphased pair may be
 * reoriented by the engine, a phased pair may not.
 */
#[derive(Debug, Clone)]
pub struct CalledGTRec {
    ref_marker: usize,
    allele1: Vec<i16>,
    allele2: Vec<i16>,
    phased: Vec<bool>,
}

/**
 * Genotype likelihoods for one marker, row-major n_samples x n_genotypes
 * with the usual diploid ordering: genotype (a1, a2) with a1 <= a2 sits at
 * index a2 (a2 + 1) / 2 + a1. Rows are normalized on construction; an
 * all-zero row (no data) becomes uniform.
 */
#[derive(Debug, Clone)]
pub struct GlRec {
    ref_marker: usize,
    n_alleles: usize,
    gls: Vec<f64>,
}

impl CalledGTRec {
    pub fn new(
        ref_marker: usize,
        n_alleles: usize,
        allele1: Vec<i16>,
        allele2: Vec<i16>,
        phased: Vec<bool>,
    ) -> Result<CalledGTRec, KelpieError> {
        let n = allele1.len();
        if allele2.len() != n || phased.len() != n {
            return Err(KelpieError::InvariantViolation(format!(
                "Ragged genotype columns at target record for marker {}",
                ref_marker
            )));
        }
        for alleles in [&allele1, &allele2] {
            for &a in alleles.iter() {
                if a != MISSING_ALLELE && !(0..n_alleles as i16).contains(&a) {
                    return Err(KelpieError::InvariantViolation(format!(
                        "Called allele {} out of range [0, {}) at target record for marker {}",
                        a, n_alleles, ref_marker
                    )));
                }
            }
        }
        Ok(CalledGTRec {
            ref_marker,
            allele1,
            allele2,
            phased,
        })
    }

    pub fn ref_marker(&self) -> usize {
        self.ref_marker
    }

    pub fn allele1(&self, sample: usize) -> i16 {
        self.allele1[sample]
    }

    pub fn allele2(&self, sample: usize) -> i16 {
        self.allele2[sample]
    }

    pub fn is_phased(&self, sample: usize) -> bool {
        self.phased[sample]
    }
}

impl GlRec {
    pub fn new(
        ref_marker: usize,
        n_alleles: usize,
        n_samples: usize,
        mut gls: Vec<f64>,
    ) -> Result<GlRec, KelpieError> {
        let n_genotypes = n_alleles * (n_alleles + 1) / 2;
        if gls.len() != n_samples * n_genotypes {
            return Err(KelpieError::InvariantViolation(format!(
                "{} likelihood values for {} samples x {} genotypes at marker {}",
                gls.len(),
                n_samples,
                n_genotypes,
                ref_marker
            )));
        }
        for row in gls.chunks_mut(n_genotypes) {
            let sum: f64 = row.iter().sum();
            if sum < 0.0 || !sum.is_finite() {
                return Err(KelpieError::InvariantViolation(format!(
                    "Malformed likelihood row at marker {}",
                    ref_marker
                )));
            }
            if sum == 0.0 {
                let uniform = 1.0 / n_genotypes as f64;
                row.iter_mut().for_each(|x| *x = uniform);
            } else {
                row.iter_mut().for_each(|x| *x /= sum);
            }
        }
        Ok(GlRec {
            ref_marker,
            n_alleles,
            gls,
        })
    }

    pub fn ref_marker(&self) -> usize {
        self.ref_marker
    }

    pub fn n_alleles(&self) -> usize {
        self.n_alleles
    }

    pub fn n_genotypes(&self) -> usize {
        self.n_alleles * (self.n_alleles + 1) / 2
    }

    /// Normalized likelihood of the unordered genotype (a1, a2).
    pub fn gl(&self, sample: usize, a1: usize, a2: usize) -> f64 {
        let (lo, hi) = if a1 <= a2 { (a1, a2) } else { (a2, a1) };
        self.gls[sample * self.n_genotypes() + hi * (hi + 1) / 2 + lo]
    }
}

impl TargetGT {
    pub fn new(
        samples: Arc<Samples>,
        markers: &Markers,
        data: TargetData,
    ) -> Result<TargetGT, KelpieError> {
        let n_markers = markers.n_markers();
        let ref_indices: Vec<usize> = match &data {
            TargetData::Called(recs) => recs.iter().map(|r| r.ref_marker).collect(),
            TargetData::Likelihoods(recs) => recs.iter().map(|r| r.ref_marker).collect(),
        };
        for pair in ref_indices.windows(2) {
            if pair[1] <= pair[0] {
                return Err(KelpieError::InvariantViolation(format!(
                    "Target records out of marker order: {} then {}",
                    pair[0], pair[1]
                )));
            }
        }
        if let Some(&last) = ref_indices.last() {
            if last >= n_markers {
                return Err(KelpieError::InvariantViolation(format!(
                    "Target record refers to marker {} outside the window of {}",
                    last, n_markers
                )));
            }
        }
        if let TargetData::Likelihoods(recs) = &data {
            for rec in recs {
                if rec.n_alleles != markers.marker(rec.ref_marker).n_alleles() {
                    return Err(KelpieError::InvariantViolation(format!(
                        "Likelihood record allele count mismatch at marker {}",
                        rec.ref_marker
                    )));
                }
            }
        }
        Ok(TargetGT { samples, data })
    }

    pub fn samples(&self) -> &Arc<Samples> {
        &self.samples
    }

    pub fn n_samples(&self) -> usize {
        self.samples.n_samples()
    }

    pub fn data(&self) -> &TargetData {
        &self.data
    }

    pub fn n_genotyped(&self) -> usize {
        match &self.data {
            TargetData::Called(recs) => recs.len(),
            TargetData::Likelihoods(recs) => recs.len(),
        }
    }

    /// Reference-marker indices of the genotyped markers, ascending.
    pub fn genotyped_markers(&self) -> Vec<usize> {
        match &self.data {
            TargetData::Called(recs) => recs.iter().map(|r| r.ref_marker).collect(),
            TargetData::Likelihoods(recs) => recs.iter().map(|r| r.ref_marker).collect(),
        }
    }
}
