use std::collections::HashMap;

use crate::model::ref_gt_rec::RefGTRec;

/**
 * Micro-windows ("steps") over the genotyped markers: each step spans at
 * least `step_cm` centimorgans and contains at least one genotyped marker.
 * IBS matching between target and reference haplotypes is resolved per
 * step; reference-only markers never contribute to a step's signature, so
 * freshly imputed alleles cannot pollute state selection.
 */
#[derive(Debug, Clone)]
pub struct Steps {
    // reference-marker index of each step's first genotyped marker
    starts: Vec<usize>,
    // per step, the [start, end) range into the genotyped-marker list
    targ_ranges: Vec<(usize, usize)>,
}

impl Steps {
    /**
     * Clusters the genotyped markers greedily: a step starts at the first
     * unassigned genotyped marker and absorbs markers while their genetic
     * position stays within `step_cm` of the step's first marker.
     * `gen_pos[m]` is the cM position of reference marker m.
     */
    pub fn new(gen_pos: &[f64], targ_markers: &[usize], step_cm: f64) -> Steps {
        let mut starts = Vec::new();
        let mut targ_ranges = Vec::new();
        let mut t = 0;
        while t < targ_markers.len() {
            let first = t;
            let cm0 = gen_pos[targ_markers[first]];
            t += 1;
            while t < targ_markers.len() && gen_pos[targ_markers[t]] - cm0 < step_cm {
                t += 1;
            }
            starts.push(targ_markers[first]);
            targ_ranges.push((first, t));
        }
        Steps {
            starts,
            targ_ranges,
        }
    }

    /// Builds steps directly from precomputed parts; used by callers that
    /// already hold a step decomposition (and by tests).
    pub fn from_parts(starts: Vec<usize>, targ_ranges: Vec<(usize, usize)>) -> Steps {
        Steps {
            starts,
            targ_ranges,
        }
    }

    pub fn n_steps(&self) -> usize {
        self.starts.len()
    }

    /// Reference-marker index of step w's first genotyped marker.
    pub fn start(&self, w: usize) -> usize {
        self.starts[w]
    }

    /// Range of step w in the genotyped-marker list.
    pub fn targ_range(&self, w: usize) -> (usize, usize) {
        self.targ_ranges[w]
    }
}

/**
 * Sample-independent IBS index. For each step, every reference haplotype
 * is assigned to the equivalence class of its allele sequence over the
 * step's genotyped markers; a target haplotype's sequence selects the
 * class whose members are IBS with it at that step.
 */
pub struct CodedSteps {
    step_classes: Vec<HashMap<Vec<u16>, usize>>,
    step_members: Vec<Vec<Vec<u32>>>,
}

impl CodedSteps {
    pub fn new(steps: &Steps, targ_markers: &[usize], ref_recs: &[RefGTRec]) -> CodedSteps {
        let n_haps = if ref_recs.is_empty() {
            0
        } else {
            ref_recs[0].n_haps()
        };
        let mut step_classes = Vec::with_capacity(steps.n_steps());
        let mut step_members = Vec::with_capacity(steps.n_steps());
        for w in 0..steps.n_steps() {
            let (t0, t1) = steps.targ_range(w);
            let step_markers = &targ_markers[t0..t1];
            let mut classes: HashMap<Vec<u16>, usize> = HashMap::new();
            let mut members: Vec<Vec<u32>> = Vec::new();
            for h in 0..n_haps {
                let sig: Vec<u16> = step_markers
                    .iter()
                    .map(|&m| ref_recs[m].allele(h) as u16)
                    .collect();
                let class = *classes.entry(sig).or_insert_with(|| {
                    members.push(Vec::new());
                    members.len() - 1
                });
                members[class].push(h as u32);
            }
            step_classes.push(classes);
            step_members.push(members);
        }
        CodedSteps {
            step_classes,
            step_members,
        }
    }

    /// Reference haplotypes IBS with `sig` at step w, if any share it.
    pub fn ibs_haps(&self, w: usize, sig: &[u16]) -> Option<&[u32]> {
        self.step_classes[w]
            .get(sig)
            .map(|&class| self.step_members[w][class].as_slice())
    }
}
