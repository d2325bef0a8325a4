use std::sync::Arc;

use crate::haplotype::allele_bits::AlleleBits;
use crate::model::marker::Markers;
use crate::utils::errors::KelpieError;

/**
 * One diploid sample's working haplotype pair, bit-packed over the window's
 * markers. The pair is always phased and never missing: component E fills
 * every position before the pair reaches the HMM, and later refinement
 * rounds overwrite positions in place.
 */
#[derive(Debug, Clone)]
pub struct HapPair {
    markers: Arc<Markers>,
    sample: usize,
    bits1: AlleleBits,
    bits2: AlleleBits,
}

impl HapPair {
    pub fn new(markers: Arc<Markers>, sample: usize) -> HapPair {
        let n_bits = markers.total_bits();
        HapPair {
            markers,
            sample,
            bits1: AlleleBits::new(n_bits),
            bits2: AlleleBits::new(n_bits),
        }
    }

    /// Builds a pair from two full allele vectors.
    pub fn from_alleles(
        markers: Arc<Markers>,
        sample: usize,
        alleles1: &[u32],
        alleles2: &[u32],
    ) -> Result<HapPair, KelpieError> {
        let n_markers = markers.n_markers();
        if alleles1.len() != n_markers || alleles2.len() != n_markers {
            return Err(KelpieError::InvariantViolation(format!(
                "Allele vectors of length {}/{} for {} markers",
                alleles1.len(),
                alleles2.len(),
                n_markers
            )));
        }
        let mut pair = HapPair::new(markers, sample);
        for m in 0..n_markers {
            pair.set(m, 0, alleles1[m])?;
            pair.set(m, 1, alleles2[m])?;
        }
        Ok(pair)
    }

    pub fn sample(&self) -> usize {
        self.sample
    }

    pub fn markers(&self) -> &Arc<Markers> {
        &self.markers
    }

    /// Allele of haplotype `hap` (0 or 1) at marker m.
    pub fn allele(&self, m: usize, hap: usize) -> u32 {
        let bits = if hap == 0 { &self.bits1 } else { &self.bits2 };
        bits.get(self.markers.bit_offset(m), self.markers.bits_per_allele(m))
    }

    pub fn allele1(&self, m: usize) -> u32 {
        self.allele(m, 0)
    }

    pub fn allele2(&self, m: usize) -> u32 {
        self.allele(m, 1)
    }

    pub fn set(&mut self, m: usize, hap: usize, allele: u32) -> Result<(), KelpieError> {
        let n_alleles = self.markers.marker(m).n_alleles() as u32;
        if allele >= n_alleles {
            return Err(KelpieError::InvariantViolation(format!(
                "Allele {} out of range [0, {}) at marker {}",
                allele, n_alleles, m
            )));
        }
        let start = self.markers.bit_offset(m);
        let width = self.markers.bits_per_allele(m);
        let bits = if hap == 0 {
            &mut self.bits1
        } else {
            &mut self.bits2
        };
        bits.set(start, width, allele);
        Ok(())
    }

    /// Swaps the two haplotypes' alleles at marker m.
    pub fn swap(&mut self, m: usize) {
        let a1 = self.allele1(m);
        let a2 = self.allele2(m);
        if a1 != a2 {
            let start = self.markers.bit_offset(m);
            let width = self.markers.bits_per_allele(m);
            self.bits1.set(start, width, a2);
            self.bits2.set(start, width, a1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::marker::Marker;

    fn markers() -> Arc<Markers> {
        let mk = |pos, alleles: &[&str]| {
            Marker::new(0, pos, None, alleles.iter().map(|s| s.to_string()).collect()).unwrap()
        };
        Arc::new(
            Markers::new(vec![
                mk(100, &["A", "C"]),
                mk(200, &["G", "T", "GT", "GTT"]),
                mk(300, &["A"]),
                mk(400, &["C", "G"]),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn pack_and_unpack() {
        let markers = markers();
        let pair =
            HapPair::from_alleles(markers.clone(), 3, &[1, 3, 0, 0], &[0, 2, 0, 1]).unwrap();
        assert_eq!(pair.sample(), 3);
        assert_eq!(pair.allele1(1), 3);
        assert_eq!(pair.allele2(1), 2);
        assert_eq!(pair.allele1(2), 0);
        assert_eq!(pair.allele2(3), 1);
    }

    #[test]
    fn rejects_out_of_range_allele() {
        let markers = markers();
        let mut pair = HapPair::new(markers, 0);
        assert!(pair.set(0, 0, 2).is_err());
        assert!(pair.set(2, 1, 0).is_ok());
    }

    #[test]
    fn swap_exchanges_alleles() {
        let markers = markers();
        let mut pair = HapPair::from_alleles(markers, 0, &[1, 0, 0, 0], &[0, 1, 0, 1]).unwrap();
        pair.swap(0);
        assert_eq!(pair.allele1(0), 0);
        assert_eq!(pair.allele2(0), 1);
    }
}
