pub mod chrom_ids;
pub mod genetic_map;
pub mod marker;
pub mod ref_gt_rec;
pub mod samples;
pub mod target_gt;
