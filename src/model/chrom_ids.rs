use std::collections::HashMap;

use crate::utils::errors::KelpieError;

/**
 * Chromosome-name registry for one run.
 *
 * The registry is owned by the driver and built by whichever component
 * first reads marker data (bref3 reader, map parser); afterwards it is
 * shared read-only. Markers store the dense u16 index, never the name.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChromIds {
    names: Vec<String>,
    indices: HashMap<String, u16>,
}

impl ChromIds {
    pub fn new() -> ChromIds {
        ChromIds {
            names: Vec::new(),
            indices: HashMap::new(),
        }
    }

    pub fn get_or_insert(&mut self, name: &str) -> Result<u16, KelpieError> {
        if let Some(&index) = self.indices.get(name) {
            return Ok(index);
        }
        if self.names.len() > u16::MAX as usize {
            return Err(KelpieError::Resource(format!(
                "Chromosome registry full ({} entries) while adding '{}'",
                self.names.len(),
                name
            )));
        }
        let index = self.names.len() as u16;
        self.names.push(name.to_string());
        self.indices.insert(name.to_string(), index);
        Ok(index)
    }

    pub fn index_of(&self, name: &str) -> Option<u16> {
        self.indices.get(name).copied()
    }

    pub fn name(&self, index: u16) -> &str {
        &self.names[index as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut ids = ChromIds::new();
        let a = ids.get_or_insert("chr1").unwrap();
        let b = ids.get_or_insert("chr2").unwrap();
        assert_eq!(ids.get_or_insert("chr1").unwrap(), a);
        assert_eq!(ids.index_of("chr2"), Some(b));
        assert_eq!(ids.name(a), "chr1");
        assert_eq!(ids.len(), 2);
    }
}
