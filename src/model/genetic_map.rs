use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::model::chrom_ids::ChromIds;
use crate::utils::errors::KelpieError;

/**
 * Piecewise-linear genetic map: cM as a function of base-pair position,
 * per chromosome. Between two flanking map points the genetic position is
 * interpolated; outside the mapped range it is extrapolated with the slope
 * of the terminal interval. Chromosomes absent from the map, and runs with
 * no map file at all, fall back to a constant rate of 1 cM/Mb.
 */
#[derive(Debug, Clone, Default)]
pub struct GeneticMap {
    chrom_maps: HashMap<u16, ChromMap>,
}

#[derive(Debug, Clone)]
struct ChromMap {
    bp: Vec<u32>,
    cm: Vec<f64>,
}

impl GeneticMap {
    pub const DEFAULT_CM_PER_BP: f64 = 1e-6;

    /// The 1 cM/Mb fallback map.
    pub fn constant_rate() -> GeneticMap {
        GeneticMap::default()
    }

    /**
     * Reads a PLINK-format map: whitespace-delimited columns
     * `chrom posId cM bp`, lines starting with '#' ignored. A chromosome
     * may span several runs of lines; base-pair positions must be strictly
     * increasing and cM positions non-decreasing within each chromosome.
     */
    pub fn from_plink_file(
        path: &Path,
        chrom_ids: &mut ChromIds,
    ) -> Result<GeneticMap, KelpieError> {
        let file = File::open(path).map_err(|e| {
            KelpieError::Io(format!("Failed to open genetic map {}: {}", path.display(), e))
        })?;
        let reader = BufReader::new(file);
        let mut chrom_maps: HashMap<u16, ChromMap> = HashMap::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            if fields.len() < 4 {
                return Err(KelpieError::Format(format!(
                    "Genetic map line {} has {} fields, expected 4: '{}'",
                    line_no + 1,
                    fields.len(),
                    trimmed
                )));
            }
            let chrom = chrom_ids.get_or_insert(fields[0])?;
            let cm: f64 = fields[2].parse().map_err(|_| {
                KelpieError::Format(format!(
                    "Genetic map line {}: unparsable cM value '{}'",
                    line_no + 1,
                    fields[2]
                ))
            })?;
            let bp: u32 = fields[3].parse().map_err(|_| {
                KelpieError::Format(format!(
                    "Genetic map line {}: unparsable bp value '{}'",
                    line_no + 1,
                    fields[3]
                ))
            })?;
            let entry = chrom_maps.entry(chrom).or_insert_with(|| ChromMap {
                bp: Vec::new(),
                cm: Vec::new(),
            });
            if let Some(&last_bp) = entry.bp.last() {
                if bp <= last_bp {
                    return Err(KelpieError::Format(format!(
                        "Genetic map line {}: bp positions not strictly increasing ({} after {})",
                        line_no + 1,
                        bp,
                        last_bp
                    )));
                }
                if cm < *entry.cm.last().unwrap() {
                    return Err(KelpieError::Format(format!(
                        "Genetic map line {}: cM positions decrease ({} after {})",
                        line_no + 1,
                        cm,
                        entry.cm.last().unwrap()
                    )));
                }
            }
            entry.bp.push(bp);
            entry.cm.push(cm);
        }
        // a single map point pins no slope; drop to the constant-rate path
        chrom_maps.retain(|_, map| map.bp.len() >= 2);
        Ok(GeneticMap { chrom_maps })
    }

    /// Genetic position in cM of a base-pair coordinate.
    pub fn gen_pos(&self, chrom: u16, bp: u32) -> f64 {
        match self.chrom_maps.get(&chrom) {
            None => bp as f64 * Self::DEFAULT_CM_PER_BP,
            Some(map) => map.interpolate(bp),
        }
    }

    /// Genetic distance in cM between two coordinates on one chromosome.
    pub fn gen_dist(&self, chrom: u16, bp_a: u32, bp_b: u32) -> f64 {
        (self.gen_pos(chrom, bp_b) - self.gen_pos(chrom, bp_a)).abs()
    }
}

impl ChromMap {
    fn interpolate(&self, bp: u32) -> f64 {
        let n = self.bp.len();
        // flanking interval, or the terminal interval when extrapolating
        let hi = match self.bp.binary_search(&bp) {
            Ok(i) => return self.cm[i],
            Err(0) => 1,
            Err(i) if i >= n => n - 1,
            Err(i) => i,
        };
        let lo = hi - 1;
        let bp_lo = self.bp[lo] as f64;
        let bp_hi = self.bp[hi] as f64;
        let slope = (self.cm[hi] - self.cm[lo]) / (bp_hi - bp_lo);
        self.cm[lo] + (bp as f64 - bp_lo) * slope
    }
}
