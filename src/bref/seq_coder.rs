use std::sync::Arc;

use crate::model::ref_gt_rec::{RefGTRec, SeqCodedRec};
use crate::utils::errors::KelpieError;

/**
 * Builds bref3 blocks: maximal runs of consecutive markers whose reference
 * genotypes can share a single haplotype-to-sequence map (component B).
 *
 * Haplotypes start in one equivalence class (the empty sequence). Each
 * added marker refines the partition: a class whose members all carry the
 * same allele is unchanged, while a class receiving two or more distinct
 * alleles is split, each non-major subgroup moving to a freshly allocated
 * sequence index and the major remainder keeping the class index. The
 * allocated-sequence count therefore grows monotonically within a block;
 * when an add would make it reach `max_n_seq`, nothing is committed and
 * the caller must flush and retry.
 *
 * Because homogeneous classes never split, adding the same record twice
 * leaves the coder in the same state as adding it once.
 */
pub struct SeqCoder {
    n_haps: usize,
    max_n_seq: usize,
    hap_to_seq: Vec<u16>,
    // one count per allocated sequence index; split-out classes may decay to 0
    seq_to_cnt: Vec<u32>,
    recs: Vec<RefGTRec>,
    // per-add scratch, indexed by sequence: the (allele, carriers) splits
    split_alleles: Vec<Vec<(u16, Vec<u32>)>>,
    touched: Vec<u16>,
}

impl SeqCoder {
    /// Smallest usable cap: the seed class plus room for one split.
    pub const MIN_MAX_N_SEQ: usize = 3;
    /// Largest cap representable in the bref3 nSeq field (0xFFFF is the
    /// end-of-data sentinel, 0 the passthrough tag).
    pub const MAX_MAX_N_SEQ: usize = 0xFFFE;

    pub fn new(n_haps: usize, max_n_seq: usize) -> Result<SeqCoder, KelpieError> {
        if n_haps == 0 {
            return Err(KelpieError::Parameter(
                "Sequence coder needs at least one haplotype".to_string(),
            ));
        }
        if !(Self::MIN_MAX_N_SEQ..=Self::MAX_MAX_N_SEQ).contains(&max_n_seq) {
            return Err(KelpieError::Parameter(format!(
                "max_n_seq {} outside [{}, {}]",
                max_n_seq,
                Self::MIN_MAX_N_SEQ,
                Self::MAX_MAX_N_SEQ
            )));
        }
        Ok(SeqCoder {
            n_haps,
            max_n_seq,
            hap_to_seq: vec![0; n_haps],
            seq_to_cnt: vec![n_haps as u32],
            recs: Vec::new(),
            split_alleles: vec![Vec::new()],
            touched: Vec::new(),
        })
    }

    /**
     * Default cap on distinct sequences per block, growing with panel
     * size: min(floor(2^(2 log10(2 n_samples) + 1)), 65534). One sample
     * yields 3.
     */
    pub fn default_max_n_seq(n_samples: usize) -> usize {
        let n_haps = 2.0 * n_samples as f64;
        let cap = 2f64.powf(2.0 * n_haps.log10() + 1.0).floor();
        (cap as usize).min(Self::MAX_MAX_N_SEQ)
    }

    pub fn n_buffered(&self) -> usize {
        self.recs.len()
    }

    pub fn n_seq_allocated(&self) -> usize {
        self.seq_to_cnt.len()
    }

    pub fn max_n_seq(&self) -> usize {
        self.max_n_seq
    }

    pub fn hap_to_seq(&self) -> &[u16] {
        &self.hap_to_seq
    }

    pub fn seq_counts(&self) -> &[u32] {
        &self.seq_to_cnt
    }

    /**
     * Attempts to add an allele-coded record to the current block.
     * Returns Ok(false), with the coder unchanged, if the refined
     * partition would reach `max_n_seq` distinct sequences.
     */
    pub fn try_add(&mut self, rec: &RefGTRec) -> Result<bool, KelpieError> {
        if rec.n_haps() != self.n_haps {
            return Err(KelpieError::InvariantViolation(format!(
                "Record with {} haplotypes added to a coder over {}",
                rec.n_haps(),
                self.n_haps
            )));
        }
        if rec.n_alleles() > 255 {
            return Err(KelpieError::InvariantViolation(format!(
                "{} alleles at {}:{} exceed the sequence-coded limit",
                rec.n_alleles(),
                rec.marker().chrom(),
                rec.marker().pos()
            )));
        }
        let rec = rec.to_allele_coded();
        let ac = match rec.as_allele_coded() {
            Some(ac) => ac,
            None => {
                return Err(KelpieError::InvariantViolation(
                    "Sequence coder requires allele-coded input".to_string(),
                ))
            }
        };

        // tentative pass: bucket each touched class's non-major carriers
        let major = rec.major_allele();
        for a in 0..rec.n_alleles() {
            if a == major {
                continue;
            }
            let carriers = ac.carriers(a).unwrap_or(&[]);
            for &h in carriers {
                let s = self.hap_to_seq[h as usize];
                let splits = &mut self.split_alleles[s as usize];
                if splits.is_empty() {
                    self.touched.push(s);
                }
                match splits.iter_mut().find(|(al, _)| *al == a as u16) {
                    Some((_, haps)) => haps.push(h),
                    None => splits.push((a as u16, vec![h])),
                }
            }
        }

        // capacity check before any mutation, so failure needs no rollback
        let mut new_allocs = 0usize;
        for &s in &self.touched {
            let splits = &self.split_alleles[s as usize];
            let non_major: usize = splits.iter().map(|(_, haps)| haps.len()).sum();
            let remainder = self.seq_to_cnt[s as usize] as usize - non_major;
            let n_groups = splits.len() + (remainder > 0) as usize;
            if n_groups >= 2 {
                new_allocs += splits.len();
            }
        }
        if self.seq_to_cnt.len() + new_allocs >= self.max_n_seq {
            self.clear_scratch();
            return Ok(false);
        }

        // commit: move each splitting subgroup to a fresh sequence index
        let touched = std::mem::take(&mut self.touched);
        for &s in &touched {
            let splits = std::mem::take(&mut self.split_alleles[s as usize]);
            let non_major: usize = splits.iter().map(|(_, haps)| haps.len()).sum();
            let remainder = self.seq_to_cnt[s as usize] as usize - non_major;
            if splits.len() + ((remainder > 0) as usize) < 2 {
                // class stayed homogeneous at this marker
                continue;
            }
            for (_, haps) in splits {
                let fresh = self.seq_to_cnt.len() as u16;
                self.seq_to_cnt.push(haps.len() as u32);
                self.split_alleles.push(Vec::new());
                self.seq_to_cnt[s as usize] -= haps.len() as u32;
                for &h in &haps {
                    self.hap_to_seq[h as usize] = fresh;
                }
            }
        }
        self.recs.push(rec);
        Ok(true)
    }

    /**
     * Emits one sequence-coded record per buffered marker, all sharing the
     * final (compacted) hap2seq map, then reseeds the coder with the
     * single empty class of size 2 n_samples.
     */
    pub fn flush(&mut self) -> Result<Vec<RefGTRec>, KelpieError> {
        if self.recs.is_empty() {
            return Ok(Vec::new());
        }
        // compact live classes in first-occurrence order by haplotype index
        let mut old_to_new = vec![u16::MAX; self.seq_to_cnt.len()];
        let mut reps: Vec<u32> = Vec::new();
        let mut compact: Vec<u16> = Vec::with_capacity(self.n_haps);
        for h in 0..self.n_haps {
            let s = self.hap_to_seq[h] as usize;
            if old_to_new[s] == u16::MAX {
                old_to_new[s] = reps.len() as u16;
                reps.push(h as u32);
            }
            compact.push(old_to_new[s]);
        }
        let hap_to_seq = Arc::new(compact);
        let recs = std::mem::take(&mut self.recs);
        let mut out = Vec::with_capacity(recs.len());
        for rec in recs {
            let seq_to_allele: Vec<u8> = reps
                .iter()
                .map(|&rep| rec.allele(rep as usize) as u8)
                .collect();
            let coded = SeqCodedRec::new(
                rec.marker().clone(),
                rec.samples().clone(),
                hap_to_seq.clone(),
                seq_to_allele,
            )?;
            out.push(RefGTRec::SeqCoded(coded));
        }
        self.hap_to_seq.iter_mut().for_each(|s| *s = 0);
        self.seq_to_cnt.clear();
        self.seq_to_cnt.push(self.n_haps as u32);
        self.split_alleles.clear();
        self.split_alleles.push(Vec::new());
        self.touched.clear();
        Ok(out)
    }

    fn clear_scratch(&mut self) {
        for &s in &self.touched {
            self.split_alleles[s as usize].clear();
        }
        self.touched.clear();
    }
}
