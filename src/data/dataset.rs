use burn::data::dataset::Dataset;

use crate::domain::sample::Sample;

/// In-memory samples behind Burn's Dataset trait.
#[derive(Debug, Clone, Default)]
pub struct SampleDataset {
    samples: Vec<Sample>,
}

impl SampleDataset {
    pub fn new(samples: Vec<Sample>) -> Self { Self { samples } }

    pub fn len(&self) -> usize { self.samples.len() }
}

impl Dataset<Sample> for SampleDataset {
    fn get(&self, index: usize) -> Option<Sample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sample::Field;

    #[test]
    fn test_get_and_len() {
        let ds = SampleDataset::new(
            (0..7).map(|i| Sample::new(format!("s{i}"), vec![Field::Tokens(vec![i])], None)).collect(),
        );
        assert_eq!(ds.len(), 7);
        assert!(!ds.is_empty());
        assert_eq!(ds.get(6).map(|s| s.uri), Some("s6".to_string()));
        assert!(ds.get(7).is_none());
    }
}
