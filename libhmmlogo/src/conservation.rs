use anyhow::Result;
use serde::Deserialize;

use crate::alphabet::is_amino_symbol;
use crate::structs::Hmm;

/// Selects how per-column conservation heights are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotType {
    /// Compute locally from the model's emission and null probabilities
    Traditional,
    /// Delegate to a skylign-style scoring service
    Skylign,
}

/// A named group of alphabet symbols, i.e. one clustal colour category.
///
/// The field names match the figure configuration format: `aa` is the
/// symbol set, `rgb` is carried through to the renderer untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct ColourCategory {
    pub name: String,
    pub aa: Vec<String>,
    pub rgb: [f32; 3],
}

impl ColourCategory {
    pub fn contains(&self, symbol: &str) -> bool {
        self.aa.iter().any(|s| s == symbol)
    }
}

/// Warn about colour categories that list symbols outside the amino
/// alphabet and about alphabet symbols no category covers.
///
/// Uncovered symbols are legal; their share of a column's height is
/// left unattributed so it vanishes from the stacked bars.
pub fn check_category_coverage(categories: &[ColourCategory], alphabet: &[String]) {
    for category in categories {
        for symbol in &category.aa {
            if !is_amino_symbol(symbol) {
                tracing::warn!(
                    category = %category.name,
                    symbol = %symbol,
                    "colour category lists a symbol outside the amino alphabet"
                );
            }
        }
    }

    for symbol in alphabet {
        if !categories.iter().any(|c| c.contains(symbol)) {
            tracing::warn!(
                symbol = %symbol,
                "no colour category covers this symbol"
            );
        }
    }
}

/// Per-column scores produced by every scoring strategy: the total
/// conservation height of each column and its split across the colour
/// categories.
#[derive(Debug, Clone, Default)]
pub struct ColumnScores {
    pub conservation: Vec<f32>,
    pub category_heights: Vec<Vec<f32>>,
}

/// A strategy for deriving per-column conservation heights and their
/// colour category decomposition from a parsed hmm.
pub trait ConservationScorer {
    fn score(&self, hmm: &Hmm, categories: &[ColourCategory]) -> Result<ColumnScores>;
}

/// Scores each column locally as the relative entropy of its emission
/// distribution against the null background, in bits.
///
/// Only symbols emitted above their background probability contribute:
/// depleted residues carry no visual signal, so they are excluded from
/// both the height and the category split.
pub struct RelativeEntropyScorer;

impl ConservationScorer for RelativeEntropyScorer {
    fn score(&self, hmm: &Hmm, categories: &[ColourCategory]) -> Result<ColumnScores> {
        let mut scores = ColumnScores::default();

        for emissions in &hmm.match_probabilities {
            let mut height = 0.0f32;
            for (&p, &q) in emissions.iter().zip(&hmm.null_distribution) {
                if p > 0.0 && q > 0.0 && p > q {
                    height += p * (p / q).log2();
                }
            }

            let mut category_heights = vec![0.0f32; categories.len()];
            for (symbol_idx, symbol) in hmm.alphabet.iter().enumerate() {
                let p = emissions[symbol_idx];
                let q = hmm.null_distribution[symbol_idx];
                if p <= q {
                    continue;
                }
                for (category_idx, category) in categories.iter().enumerate() {
                    if category.contains(symbol) {
                        category_heights[category_idx] += p * height;
                    }
                }
            }

            scores.conservation.push(height);
            scores.category_heights.push(category_heights);
        }

        Ok(scores)
    }
}
