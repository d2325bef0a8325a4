use ndarray::Array2;

use crate::model::marker::Markers;

/// Li-Stephens rate parameters: `rho` scales the recombination (state
/// switch) intensity per cM, `err` is the allele mismatch probability.
#[derive(Debug, Clone, Copy)]
pub struct HmmParams {
    pub rho: f64,
    pub err: f64,
}

/**
 * Scaled forward-backward engine over a selected reference-state matrix
 * (component G). One instance serves a whole window; all mutable state
 * lives in the caller's HmmScratch, so workers share the engine
 * read-only.
 *
 * Emissions compare the observation with the state's allele: match
 * probability 1 - err, mismatch err / (n_alleles - 1). A negative
 * observation (missing allele, or a marker present only in the reference
 * panel) emits uniformly and so constrains nothing; such markers receive
 * their posterior purely from the flanking observations.
 *
 * Per-marker columns are normalized to prevent underflow; the logs of the
 * normalizers accumulate into the forward log-likelihood.
 */
pub struct LiStephensHmm<'a> {
    markers: &'a Markers,
    gen_pos: &'a [f64],
    params: HmmParams,
}

/// Per-worker mutable buffers, sized once and reused across samples and
/// refinement rounds by clearing, not reallocating.
pub struct HmmScratch {
    pub state_alleles: Array2<u16>,
    pub fwd: Array2<f64>,
    pub bwd: Array2<f64>,
    pub p_switch: Vec<f64>,
    pub obs: Vec<i32>,
    pub al_probs1: Vec<f64>,
    pub al_probs2: Vec<f64>,
}

impl HmmScratch {
    pub fn new(n_markers: usize, k_max: usize, al_total: usize) -> HmmScratch {
        HmmScratch {
            state_alleles: Array2::zeros((n_markers, k_max)),
            fwd: Array2::zeros((n_markers, k_max)),
            bwd: Array2::zeros((n_markers, k_max)),
            p_switch: Vec::with_capacity(n_markers),
            obs: vec![-1; n_markers],
            al_probs1: vec![0.0; al_total],
            al_probs2: vec![0.0; al_total],
        }
    }
}

impl<'a> LiStephensHmm<'a> {
    pub fn new(markers: &'a Markers, gen_pos: &'a [f64], params: HmmParams) -> LiStephensHmm<'a> {
        LiStephensHmm {
            markers,
            gen_pos,
            params,
        }
    }

    /**
     * Per-marker switch probabilities for a run with `n_states` states:
     * p_switch(m) = 1 - exp(-rho d_m / K) with d_m the cM distance to the
     * next marker. A zero distance gives a zero switch probability. The
     * final entry (no following marker) is 0.
     */
    pub fn switch_probs(&self, n_states: usize, out: &mut Vec<f64>) {
        out.clear();
        let n_markers = self.markers.n_markers();
        for m in 0..n_markers.saturating_sub(1) {
            let d = self.gen_pos[m + 1] - self.gen_pos[m];
            out.push(1.0 - (-self.params.rho * d / n_states as f64).exp());
        }
        out.push(0.0);
    }

    fn emission(&self, m: usize, state_allele: u16, obs: i32) -> f64 {
        if obs < 0 {
            return 1.0;
        }
        if state_allele as i32 == obs {
            1.0 - self.params.err
        } else {
            self.params.err / (self.markers.marker(m).n_alleles() - 1) as f64
        }
    }

    /**
     * Fills the forward matrix for one haplotype and returns the forward
     * log-likelihood (the summed logs of the per-marker normalizers).
     */
    pub fn forward(
        &self,
        obs: &[i32],
        states: &Array2<u16>,
        n_states: usize,
        p_switch: &[f64],
        fwd: &mut Array2<f64>,
    ) -> f64 {
        let n_markers = self.markers.n_markers();
        let k = n_states;
        let prior = 1.0 / k as f64;
        let mut log_lk = 0.0;
        let mut sum = 0.0;
        for j in 0..k {
            let value = prior * self.emission(0, states[[0, j]], obs[0]);
            fwd[[0, j]] = value;
            sum += value;
        }
        log_lk += Self::normalize_column(fwd, 0, k, sum, prior);
        for m in 1..n_markers {
            let p = p_switch[m - 1];
            let shift = p * prior;
            let stay = 1.0 - p;
            let mut sum = 0.0;
            for j in 0..k {
                let value =
                    (stay * fwd[[m - 1, j]] + shift) * self.emission(m, states[[m, j]], obs[m]);
                fwd[[m, j]] = value;
                sum += value;
            }
            log_lk += Self::normalize_column(fwd, m, k, sum, prior);
        }
        log_lk
    }

    // a zero column sum means every state contradicts the observation
    // (possible when err is 0); the recursion restarts from the prior and
    // the log-likelihood records the impossible observation
    fn normalize_column(matrix: &mut Array2<f64>, m: usize, k: usize, sum: f64, prior: f64) -> f64 {
        if sum > 0.0 {
            for j in 0..k {
                matrix[[m, j]] /= sum;
            }
            sum.ln()
        } else {
            for j in 0..k {
                matrix[[m, j]] = prior;
            }
            f64::NEG_INFINITY
        }
    }

    /// Fills the backward matrix for one haplotype.
    pub fn backward(
        &self,
        obs: &[i32],
        states: &Array2<u16>,
        n_states: usize,
        p_switch: &[f64],
        bwd: &mut Array2<f64>,
    ) {
        let n_markers = self.markers.n_markers();
        let k = n_states;
        let prior = 1.0 / k as f64;
        for j in 0..k {
            bwd[[n_markers - 1, j]] = 1.0;
        }
        for m in (0..n_markers - 1).rev() {
            let p = p_switch[m];
            let stay = 1.0 - p;
            // stage the emission-weighted next column in this row
            let mut sum_next = 0.0;
            for j in 0..k {
                let value = self.emission(m + 1, states[[m + 1, j]], obs[m + 1]) * bwd[[m + 1, j]];
                bwd[[m, j]] = value;
                sum_next += value;
            }
            let shift = p * prior * sum_next;
            let mut sum = 0.0;
            for j in 0..k {
                let value = stay * bwd[[m, j]] + shift;
                bwd[[m, j]] = value;
                sum += value;
            }
            Self::normalize_column(bwd, m, k, sum, prior);
        }
    }

    /**
     * Accumulates posterior allele probabilities into `out`, a flat buffer
     * indexed by `al_offsets[m] + allele`. Entries covered by this window
     * are overwritten; per marker the written probabilities sum to one.
     */
    pub fn posteriors(
        &self,
        fwd: &Array2<f64>,
        bwd: &Array2<f64>,
        states: &Array2<u16>,
        n_states: usize,
        al_offsets: &[usize],
        out: &mut [f64],
    ) {
        let n_markers = self.markers.n_markers();
        let k = n_states;
        for m in 0..n_markers {
            let slot = &mut out[al_offsets[m]..al_offsets[m + 1]];
            slot.iter_mut().for_each(|x| *x = 0.0);
            let mut norm = 0.0;
            for j in 0..k {
                norm += fwd[[m, j]] * bwd[[m, j]];
            }
            for j in 0..k {
                let weight = if norm > 0.0 {
                    fwd[[m, j]] * bwd[[m, j]] / norm
                } else {
                    1.0 / k as f64
                };
                slot[states[[m, j]] as usize] += weight;
            }
        }
    }
}
