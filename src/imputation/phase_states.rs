use ndarray::Array2;
use std::collections::HashMap;

use crate::haplotype::hap_pair::HapPair;
use crate::imputation::steps::{CodedSteps, Steps};
use crate::model::ref_gt_rec::RefGTRec;

/**
 * Rolling IBS reference-state selector for one sample (component F).
 *
 * Keeps at most `n_states` slots, each slot tracking the reference
 * haplotypes that have been IBS with either of the sample's working
 * haplotypes, in a min-heap keyed by the last step at which the slot's
 * haplotype was IBS. When a new IBS haplotype needs a slot, the slot whose
 * occupant has been out of IBS longest is recycled; the switch point
 * recorded for the slot is the marker at the midpoint step between the
 * evicted occupant's last IBS step and the current step.
 *
 * A PhaseStates instance is owned by one worker and reused across samples
 * via `select`, which clears all slot state first. Instances are not
 * thread-safe.
 */
pub struct PhaseStates {
    n_states: usize,
    // min-heap by last_step; empty slots (hap == -1, last_step == -1) rise
    // to the root and are consumed before any occupied slot is evicted
    heap: Vec<HeapEntry>,
    heap_index_of_hap: HashMap<u32, usize>,
    copy_haps: Vec<Vec<u32>>,
    copy_ends: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    hap: i64,
    last_step: i64,
    copy: u32,
}

impl PhaseStates {
    pub fn new(n_states: usize) -> PhaseStates {
        let heap = (0..n_states)
            .map(|c| HeapEntry {
                hap: -1,
                last_step: -1,
                copy: c as u32,
            })
            .collect();
        PhaseStates {
            n_states,
            heap,
            heap_index_of_hap: HashMap::new(),
            copy_haps: vec![Vec::new(); n_states],
            copy_ends: vec![Vec::new(); n_states],
        }
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    pub fn clear(&mut self) {
        for (c, entry) in self.heap.iter_mut().enumerate() {
            entry.hap = -1;
            entry.last_step = -1;
            entry.copy = c as u32;
        }
        self.heap_index_of_hap.clear();
        self.copy_haps.iter_mut().for_each(|v| v.clear());
        self.copy_ends.iter_mut().for_each(|v| v.clear());
    }

    /**
     * Selects up to `n_states` reference haplotypes for the sample's
     * current pair and writes their alleles into the first `n_used`
     * columns of `out` (n_markers x n_states). Falls back to a naive
     * cyclic selection when fewer than two slots were filled by IBS
     * matching. `own_haps` names the sample's own haplotype indices for
     * callers whose reference panel embeds the target cohort; the
     * fallback skips them.
     */
    pub fn select(
        &mut self,
        steps: &Steps,
        coded: &CodedSteps,
        targ_markers: &[usize],
        ref_recs: &[RefGTRec],
        hap_pair: &HapPair,
        own_haps: Option<(usize, usize)>,
        out: &mut Array2<u16>,
    ) -> usize {
        self.clear();
        let mut sig1: Vec<u16> = Vec::new();
        let mut sig2: Vec<u16> = Vec::new();
        for w in 0..steps.n_steps() {
            let (t0, t1) = steps.targ_range(w);
            sig1.clear();
            sig2.clear();
            for &m in &targ_markers[t0..t1] {
                sig1.push(hap_pair.allele1(m) as u16);
                sig2.push(hap_pair.allele2(m) as u16);
            }
            if let Some(haps) = coded.ibs_haps(w, &sig1) {
                for &h in haps {
                    self.update(h, w, steps);
                }
            }
            if sig2 != sig1 {
                if let Some(haps) = coded.ibs_haps(w, &sig2) {
                    for &h in haps {
                        self.update(h, w, steps);
                    }
                }
            }
        }
        let n_used = self.materialize(ref_recs, out);
        if n_used >= 2 {
            n_used
        } else {
            self.naive_fallback(hap_pair.sample(), ref_recs, own_haps, out)
        }
    }

    /// Records that reference haplotype `hap` is IBS with the sample at
    /// step w.
    pub fn update(&mut self, hap: u32, step: usize, steps: &Steps) {
        if let Some(&i) = self.heap_index_of_hap.get(&hap) {
            self.heap[i].last_step = step as i64;
            self.sift_down(i);
            return;
        }
        let root = self.heap[0];
        if root.hap >= 0 {
            let mid_step = ((root.last_step as usize) + step) / 2;
            self.copy_ends[root.copy as usize].push(steps.start(mid_step));
            self.heap_index_of_hap.remove(&(root.hap as u32));
        }
        self.heap[0].hap = hap as i64;
        self.heap[0].last_step = step as i64;
        self.copy_haps[root.copy as usize].push(hap);
        self.heap_index_of_hap.insert(hap, 0);
        self.sift_down(0);
    }

    /**
     * Writes the selected states' alleles marker by marker, advancing to a
     * slot's next haplotype at each recorded switch point. Returns the
     * number of used states; 0 or 1 filled slots signal the caller to use
     * the naive fallback instead.
     */
    pub fn materialize(&mut self, ref_recs: &[RefGTRec], out: &mut Array2<u16>) -> usize {
        let filled: Vec<usize> = (0..self.n_states)
            .filter(|&c| !self.copy_haps[c].is_empty())
            .collect();
        if filled.len() < 2 {
            return filled.len();
        }
        let n_markers = ref_recs.len();
        for &c in &filled {
            self.copy_ends[c].push(n_markers);
        }
        let mut cursor = vec![0usize; filled.len()];
        for m in 0..n_markers {
            for (j, &c) in filled.iter().enumerate() {
                while cursor[j] + 1 < self.copy_haps[c].len() && m >= self.copy_ends[c][cursor[j]] {
                    cursor[j] += 1;
                }
                let hap = self.copy_haps[c][cursor[j]];
                out[[m, j]] = ref_recs[m].allele(hap as usize) as u16;
            }
        }
        filled.len()
    }

    // Cyclic selection starting just past the sample's second haplotype
    // index, skipping the sample's own haplotypes when the panel embeds it.
    fn naive_fallback(
        &self,
        sample: usize,
        ref_recs: &[RefGTRec],
        own_haps: Option<(usize, usize)>,
        out: &mut Array2<u16>,
    ) -> usize {
        let n_haps = if ref_recs.is_empty() {
            return 0;
        } else {
            ref_recs[0].n_haps()
        };
        let (skip1, skip2) = own_haps.unwrap_or((usize::MAX, usize::MAX));
        let available = if own_haps.is_some() {
            n_haps.saturating_sub(2)
        } else {
            n_haps
        };
        let n_used = self.n_states.min(available);
        if n_used == 0 {
            return 0;
        }
        let mut haps = Vec::with_capacity(n_used);
        let mut i = (2 * sample + 2) % n_haps;
        while haps.len() < n_used {
            if i != skip1 && i != skip2 {
                haps.push(i);
            }
            i = (i + 1) % n_haps;
        }
        for (m, rec) in ref_recs.iter().enumerate() {
            for (j, &hap) in haps.iter().enumerate() {
                out[[m, j]] = rec.allele(hap) as u16;
            }
        }
        n_used
    }

    /// Haplotypes currently occupying slots, in slot order.
    pub fn current_haps(&self) -> Vec<u32> {
        self.heap
            .iter()
            .filter(|e| e.hap >= 0)
            .map(|e| e.hap as u32)
            .collect()
    }

    /// Last-IBS step of the heap root (the eviction candidate).
    pub fn root_last_step(&self) -> i64 {
        self.heap[0].last_step
    }

    /// Last-IBS steps of all occupied slots.
    pub fn occupied_last_steps(&self) -> Vec<i64> {
        self.heap
            .iter()
            .filter(|e| e.hap >= 0)
            .map(|e| e.last_step)
            .collect()
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            if left < self.n_states && self.heap[left].last_step < self.heap[smallest].last_step {
                smallest = left;
            }
            if right < self.n_states && self.heap[right].last_step < self.heap[smallest].last_step {
                smallest = right;
            }
            if smallest == i {
                return;
            }
            self.heap.swap(i, smallest);
            for &j in &[i, smallest] {
                if self.heap[j].hap >= 0 {
                    self.heap_index_of_hap.insert(self.heap[j].hap as u32, j);
                }
            }
            i = smallest;
        }
    }
}
