use anyhow::Result;
use serde::Serialize;
use thiserror::Error;

use crate::conservation::{ColourCategory, ConservationScorer};
use crate::structs::Hmm;

/// An Error that is thrown when a scorer produces per-column data
/// whose length disagrees with the model
#[derive(Error, Debug)]
#[error("scorer produced {found} column scores for a {expected} column model")]
struct ScoreLengthError {
    expected: usize,
    found: usize,
}

/// One alignment column of a profile.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileColumn {
    /// Emission probability for each alphabet symbol
    pub emissions: Vec<f32>,
    /// Probability for each transition state label
    pub transitions: Vec<f32>,
}

/// The per-column conservation data handed to a figure renderer.
///
/// A Profile is built once from a parsed hmm plus a scoring strategy and
/// is read-only afterward. `ss_sequence` and `ss_confidence` are empty
/// when the source file carries no structure annotation; renderers treat
/// empty as "not available".
#[derive(Debug, Serialize)]
pub struct Profile {
    pub name: String,
    pub length: usize,
    pub alphabet: Vec<String>,
    pub state_labels: Vec<String>,
    pub num_sequences: f32,
    pub null_distribution: Vec<f32>,
    pub columns: Vec<ProfileColumn>,
    /// Total information content of each column, in bits
    pub conservation: Vec<f32>,
    /// Each column's height split across the configured colour categories
    pub category_heights: Vec<Vec<f32>>,
    pub ss_sequence: String,
    pub ss_confidence: String,
}

impl Profile {
    pub fn new(
        hmm: Hmm,
        categories: &[ColourCategory],
        scorer: &dyn ConservationScorer,
    ) -> Result<Self> {
        let scores = scorer.score(&hmm, categories)?;

        if scores.conservation.len() != hmm.header.length {
            return Err(ScoreLengthError {
                expected: hmm.header.length,
                found: scores.conservation.len(),
            }
            .into());
        }
        if scores.category_heights.len() != hmm.header.length {
            return Err(ScoreLengthError {
                expected: hmm.header.length,
                found: scores.category_heights.len(),
            }
            .into());
        }

        let columns = hmm
            .match_probabilities
            .into_iter()
            .zip(hmm.state_probabilities)
            .map(|(emissions, transitions)| ProfileColumn {
                emissions,
                transitions,
            })
            .collect();

        Ok(Self {
            name: hmm.header.name,
            length: hmm.header.length,
            alphabet: hmm.alphabet,
            state_labels: hmm.state_labels,
            num_sequences: hmm.header.num_sequences,
            null_distribution: hmm.null_distribution,
            columns,
            conservation: scores.conservation,
            category_heights: scores.category_heights,
            ss_sequence: hmm.ss_sequence,
            ss_confidence: hmm.ss_confidence,
        })
    }
}
