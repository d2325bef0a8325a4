use crate::utils::errors::KelpieError;

/**
 * An immutable mapping between the dense local sample index [0, n_samples)
 * and a stable global id index, used when sample sets are merged across
 * windows. The global indices are strictly increasing, so equality of two
 * Samples instances implies the same cohort in the same order.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Samples {
    ids: Vec<String>,
    id_index: Vec<u32>,
}

impl Samples {
    pub fn new(ids: Vec<String>, id_index: Vec<u32>) -> Result<Samples, KelpieError> {
        if ids.len() != id_index.len() {
            return Err(KelpieError::InvariantViolation(format!(
                "Sample id list ({}) and id-index list ({}) differ in length",
                ids.len(),
                id_index.len()
            )));
        }
        if ids.is_empty() {
            return Err(KelpieError::InvariantViolation(
                "Empty sample list".to_string(),
            ));
        }
        for pair in id_index.windows(2) {
            if pair[1] <= pair[0] {
                return Err(KelpieError::InvariantViolation(format!(
                    "Sample id indices are not strictly increasing: {} then {}",
                    pair[0], pair[1]
                )));
            }
        }
        Ok(Samples { ids, id_index })
    }

    /// Samples whose global indices are their local indices.
    pub fn from_ids(ids: Vec<String>) -> Result<Samples, KelpieError> {
        let id_index = (0..ids.len() as u32).collect();
        Samples::new(ids, id_index)
    }

    pub fn n_samples(&self) -> usize {
        self.ids.len()
    }

    pub fn n_haps(&self) -> usize {
        2 * self.ids.len()
    }

    pub fn id(&self, sample: usize) -> &str {
        &self.ids[sample]
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn id_index(&self, sample: usize) -> u32 {
        self.id_index[sample]
    }
}
