//! Biodiversity summary over the winning labels of a batch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiversitySummary {
    pub species_richness: usize,
    /// Shannon diversity index, base 2. Zero when richness <= 1.
    pub shannon_index: f64,
}

impl DiversitySummary {
    pub fn from_labels<'a>(labels: impl Iterator<Item = &'a str>) -> Self {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut total = 0usize;
        for label in labels {
            *counts.entry(label).or_insert(0) += 1;
            total += 1;
        }

        let species_richness = counts.len();
        if species_richness <= 1 || total == 0 {
            return Self {
                species_richness,
                shannon_index: 0.0,
            };
        }

        let shannon_index = -counts
            .values()
            .map(|&c| {
                let p = c as f64 / total as f64;
                p * p.log2()
            })
            .sum::<f64>();

        Self {
            species_richness,
            shannon_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_single_species_has_zero_shannon() {
        let d = DiversitySummary::from_labels(["A", "A", "A"].into_iter());
        assert_eq!(d.species_richness, 1);
        assert_eq!(d.shannon_index, 0.0);
    }

    #[test]
    fn test_even_two_species_is_one_bit() {
        let d = DiversitySummary::from_labels(["A", "B", "A", "B"].into_iter());
        assert_eq!(d.species_richness, 2);
        assert_relative_eq!(d.shannon_index, 1.0);
    }

    #[test]
    fn test_empty_input() {
        let d = DiversitySummary::from_labels(std::iter::empty());
        assert_eq!(d.species_richness, 0);
        assert_eq!(d.shannon_index, 0.0);
    }
}
