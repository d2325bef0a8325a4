pub mod allele_bits;
pub mod hap_pair;
pub mod initial_haplotypes;
