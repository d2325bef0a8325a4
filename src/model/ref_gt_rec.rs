use std::sync::Arc;

use crate::model::marker::Marker;
use crate::model::samples::Samples;
use crate::utils::errors::KelpieError;

/**
 * One marker's phased, non-missing reference genotypes, in one of two
 * representations:
 *
 * - allele-coded: for each non-major allele, the sorted haplotype indices
 *   carrying it; the major allele is implicit.
 * - sequence-coded: a block-shared map from haplotype to equivalence-class
 *   index plus a small per-marker class-to-allele table (bref3 blocks).
 *
 * Both variants answer the same read-only surface. Records are created
 * once at block decode and shared read-only by every worker in the window.
 */
#[derive(Debug, Clone)]
pub enum RefGTRec {
    AlleleCoded(AlleleCodedRec),
    SeqCoded(SeqCodedRec),
}

#[derive(Debug, Clone)]
pub struct AlleleCodedRec {
    marker: Marker,
    samples: Arc<Samples>,
    major_allele: u16,
    // hap_indices[a] is sorted ascending; the major allele's list is empty
    hap_indices: Vec<Vec<u32>>,
}

#[derive(Debug, Clone)]
pub struct SeqCodedRec {
    marker: Marker,
    samples: Arc<Samples>,
    hap_to_seq: Arc<Vec<u16>>,
    seq_to_allele: Vec<u8>,
    allele_counts: Vec<u32>,
    major_allele: u16,
}

impl AlleleCodedRec {
    /**
     * Builds a record from one carrier list per allele (all alleles listed,
     * every haplotype exactly once). The major allele is chosen as the one
     * with the largest count, ties broken by smallest allele index, and its
     * list is dropped.
     */
    pub fn from_carrier_lists(
        marker: Marker,
        samples: Arc<Samples>,
        mut lists: Vec<Vec<u32>>,
    ) -> Result<AlleleCodedRec, KelpieError> {
        if lists.len() != marker.n_alleles() {
            return Err(KelpieError::InvariantViolation(format!(
                "{} carrier lists for marker {}:{} with {} alleles",
                lists.len(),
                marker.chrom(),
                marker.pos(),
                marker.n_alleles()
            )));
        }
        let total: usize = lists.iter().map(|l| l.len()).sum();
        if total != samples.n_haps() {
            return Err(KelpieError::InvariantViolation(format!(
                "Carrier lists cover {} haplotypes, expected {} at {}:{}",
                total,
                samples.n_haps(),
                marker.chrom(),
                marker.pos()
            )));
        }
        let mut major = 0usize;
        for a in 1..lists.len() {
            if lists[a].len() > lists[major].len() {
                major = a;
            }
        }
        lists[major].clear();
        let rec = AlleleCodedRec::new(marker, samples, major as u16, lists)?;
        Ok(rec)
    }

    /// Builds a record whose major-allele carrier list is implicit (empty).
    pub fn new(
        marker: Marker,
        samples: Arc<Samples>,
        major_allele: u16,
        hap_indices: Vec<Vec<u32>>,
    ) -> Result<AlleleCodedRec, KelpieError> {
        let n_haps = samples.n_haps();
        let n_alleles = marker.n_alleles();
        if hap_indices.len() != n_alleles || major_allele as usize >= n_alleles {
            return Err(KelpieError::InvariantViolation(format!(
                "Allele-coded record shape mismatch at {}:{}",
                marker.chrom(),
                marker.pos()
            )));
        }
        if !hap_indices[major_allele as usize].is_empty() {
            return Err(KelpieError::InvariantViolation(format!(
                "Major allele {} carries an explicit list at {}:{}",
                major_allele,
                marker.chrom(),
                marker.pos()
            )));
        }
        let mut seen = vec![false; n_haps];
        let mut non_major_total = 0usize;
        for list in &hap_indices {
            for pair in list.windows(2) {
                if pair[1] <= pair[0] {
                    return Err(KelpieError::InvariantViolation(format!(
                        "Carrier list not strictly increasing at {}:{}",
                        marker.chrom(),
                        marker.pos()
                    )));
                }
            }
            for &hap in list {
                if hap as usize >= n_haps || seen[hap as usize] {
                    return Err(KelpieError::InvariantViolation(format!(
                        "Carrier index {} invalid or duplicated at {}:{}",
                        hap,
                        marker.chrom(),
                        marker.pos()
                    )));
                }
                seen[hap as usize] = true;
            }
            non_major_total += list.len();
        }
        let major_count = n_haps - non_major_total;
        for (a, list) in hap_indices.iter().enumerate() {
            if a == major_allele as usize {
                continue;
            }
            let strict = major_count > list.len()
                || (major_count == list.len() && (major_allele as usize) < a);
            if !strict {
                return Err(KelpieError::InvariantViolation(format!(
                    "Allele {} (count {}) contradicts major allele {} (count {}) at {}:{}",
                    a,
                    list.len(),
                    major_allele,
                    major_count,
                    marker.chrom(),
                    marker.pos()
                )));
            }
        }
        Ok(AlleleCodedRec {
            marker,
            samples,
            major_allele,
            hap_indices,
        })
    }

    pub fn allele(&self, hap: usize) -> usize {
        for (a, list) in self.hap_indices.iter().enumerate() {
            if list.binary_search(&(hap as u32)).is_ok() {
                return a;
            }
        }
        self.major_allele as usize
    }

    pub fn allele_count(&self, allele: usize) -> usize {
        if allele == self.major_allele as usize {
            let non_major: usize = self.hap_indices.iter().map(|l| l.len()).sum();
            self.samples.n_haps() - non_major
        } else {
            self.hap_indices[allele].len()
        }
    }

    /// Carrier list of a non-major allele; None for the major allele.
    pub fn carriers(&self, allele: usize) -> Option<&[u32]> {
        if allele == self.major_allele as usize {
            None
        } else {
            Some(&self.hap_indices[allele])
        }
    }

    // O(n_haps); the major list is implicit so it has to be reconstructed
    fn major_carriers(&self) -> Vec<u32> {
        let n_haps = self.samples.n_haps();
        let mut non_major = vec![false; n_haps];
        for list in &self.hap_indices {
            for &hap in list {
                non_major[hap as usize] = true;
            }
        }
        (0..n_haps as u32)
            .filter(|&h| !non_major[h as usize])
            .collect()
    }

    pub fn hap_index(&self, allele: usize, copy: usize) -> usize {
        if allele == self.major_allele as usize {
            self.major_carriers()[copy] as usize
        } else {
            self.hap_indices[allele][copy] as usize
        }
    }
}

impl SeqCodedRec {
    pub fn new(
        marker: Marker,
        samples: Arc<Samples>,
        hap_to_seq: Arc<Vec<u16>>,
        seq_to_allele: Vec<u8>,
    ) -> Result<SeqCodedRec, KelpieError> {
        let n_haps = samples.n_haps();
        let n_seq = seq_to_allele.len();
        if marker.n_alleles() > 255 {
            return Err(KelpieError::InvariantViolation(format!(
                "{} alleles at {}:{} exceed the sequence-coded limit of 255",
                marker.n_alleles(),
                marker.chrom(),
                marker.pos()
            )));
        }
        if hap_to_seq.len() != n_haps {
            return Err(KelpieError::InvariantViolation(format!(
                "hap2seq length {} does not match {} haplotypes at {}:{}",
                hap_to_seq.len(),
                n_haps,
                marker.chrom(),
                marker.pos()
            )));
        }
        let mut allele_counts = vec![0u32; marker.n_alleles()];
        for &seq in hap_to_seq.iter() {
            if seq as usize >= n_seq {
                return Err(KelpieError::InvariantViolation(format!(
                    "hap2seq value {} out of range [0, {}) at {}:{}",
                    seq,
                    n_seq,
                    marker.chrom(),
                    marker.pos()
                )));
            }
            let allele = seq_to_allele[seq as usize] as usize;
            if allele >= marker.n_alleles() {
                return Err(KelpieError::InvariantViolation(format!(
                    "seq2allele value {} out of range at {}:{}",
                    allele,
                    marker.chrom(),
                    marker.pos()
                )));
            }
            allele_counts[allele] += 1;
        }
        let mut major = 0usize;
        for a in 1..allele_counts.len() {
            if allele_counts[a] > allele_counts[major] {
                major = a;
            }
        }
        Ok(SeqCodedRec {
            marker,
            samples,
            hap_to_seq,
            seq_to_allele,
            allele_counts,
            major_allele: major as u16,
        })
    }

    pub fn allele(&self, hap: usize) -> usize {
        self.seq_to_allele[self.hap_to_seq[hap] as usize] as usize
    }

    pub fn n_seq(&self) -> usize {
        self.seq_to_allele.len()
    }

    pub fn hap_to_seq(&self) -> &Arc<Vec<u16>> {
        &self.hap_to_seq
    }

    pub fn seq_to_allele(&self) -> &[u8] {
        &self.seq_to_allele
    }

    /// One-pass conversion, bucketing haplotypes by allele.
    pub fn to_allele_coded(&self) -> AlleleCodedRec {
        let mut lists: Vec<Vec<u32>> = (0..self.marker.n_alleles())
            .map(|a| {
                if a == self.major_allele as usize {
                    Vec::new()
                } else {
                    Vec::with_capacity(self.allele_counts[a] as usize)
                }
            })
            .collect();
        for hap in 0..self.hap_to_seq.len() {
            let allele = self.allele(hap);
            if allele != self.major_allele as usize {
                lists[allele].push(hap as u32);
            }
        }
        AlleleCodedRec {
            marker: self.marker.clone(),
            samples: self.samples.clone(),
            major_allele: self.major_allele,
            hap_indices: lists,
        }
    }
}

impl RefGTRec {
    pub fn marker(&self) -> &Marker {
        match self {
            RefGTRec::AlleleCoded(rec) => &rec.marker,
            RefGTRec::SeqCoded(rec) => &rec.marker,
        }
    }

    pub fn samples(&self) -> &Arc<Samples> {
        match self {
            RefGTRec::AlleleCoded(rec) => &rec.samples,
            RefGTRec::SeqCoded(rec) => &rec.samples,
        }
    }

    pub fn n_haps(&self) -> usize {
        self.samples().n_haps()
    }

    pub fn n_alleles(&self) -> usize {
        self.marker().n_alleles()
    }

    pub fn allele(&self, hap: usize) -> usize {
        match self {
            RefGTRec::AlleleCoded(rec) => rec.allele(hap),
            RefGTRec::SeqCoded(rec) => rec.allele(hap),
        }
    }

    pub fn allele_count(&self, allele: usize) -> usize {
        match self {
            RefGTRec::AlleleCoded(rec) => rec.allele_count(allele),
            RefGTRec::SeqCoded(rec) => rec.allele_counts[allele] as usize,
        }
    }

    /// The `copy`-th haplotype (in ascending order) carrying `allele`.
    pub fn hap_index(&self, allele: usize, copy: usize) -> usize {
        match self {
            RefGTRec::AlleleCoded(rec) => rec.hap_index(allele, copy),
            RefGTRec::SeqCoded(rec) => (0..rec.hap_to_seq.len())
                .filter(|&h| rec.allele(h) == allele)
                .nth(copy)
                .expect("carrier copy index out of range"),
        }
    }

    pub fn major_allele(&self) -> usize {
        match self {
            RefGTRec::AlleleCoded(rec) => rec.major_allele as usize,
            RefGTRec::SeqCoded(rec) => rec.major_allele as usize,
        }
    }

    pub fn is_seq_coded(&self) -> bool {
        matches!(self, RefGTRec::SeqCoded(_))
    }

    /// Total count of haplotypes carrying a non-major allele.
    pub fn non_major_count(&self) -> usize {
        self.n_haps() - self.allele_count(self.major_allele())
    }

    pub fn to_allele_coded(&self) -> RefGTRec {
        match self {
            RefGTRec::AlleleCoded(_) => self.clone(),
            RefGTRec::SeqCoded(rec) => RefGTRec::AlleleCoded(rec.to_allele_coded()),
        }
    }

    pub fn as_allele_coded(&self) -> Option<&AlleleCodedRec> {
        match self {
            RefGTRec::AlleleCoded(rec) => Some(rec),
            RefGTRec::SeqCoded(_) => None,
        }
    }

    pub fn as_seq_coded(&self) -> Option<&SeqCodedRec> {
        match self {
            RefGTRec::SeqCoded(rec) => Some(rec),
            RefGTRec::AlleleCoded(_) => None,
        }
    }
}
