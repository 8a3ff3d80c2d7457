use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

// local constants for parsing flags
const HHM_HEADER_NAME_FLAG: &str = "NAME";
const HHM_HEADER_LENGTH_FLAG: &str = "LENG";
const HHM_HEADER_FILTER_FLAG: &str = "FILT";
const HHM_HEADER_NULL_FLAG: &str = "NULL";
const HHM_BODY_MODEL_START_FLAG: &str = "HMM";
const HHM_BODY_END_FLAG: &str = "//";

// the secondary structure prediction and confidence blocks live in
// fasta-style records ahead of the model section
const SS_PREDICTION_MARKER: &str = "ss_pred";
const SS_CONFIDENCE_MARKER: &str = "ss_conf";
const FASTA_RECORD_PREFIX: char = '>';

// emission and transition probabilities are written as round(-1000 * log2(p));
// a probability of zero has no finite encoding and is written as "*"
const NO_PROBABILITY_TOKEN: &str = "*";
const LOG_ODDS_SCALE: f32 = 1000.0;

// this static regex matches NAME values that were derived from a file name
// rather than written by hand
lazy_static! {
    static ref GENERATED_NAME_RE: Regex = Regex::new(r"\.fa|_").unwrap();
}

enum ParserState {
    Header,
    StateLabels,
    BeginTransitions,
    MatchEmissions,
    StateTransitions,
}

/// An Error that is thrown when a required header field
/// is missing from an hmm file
#[derive(Error, Debug)]
#[error("missing required header field: {field}")]
struct MissingHeaderFieldError {
    field: &'static str,
}

/// An Error that is thrown when an emission row's column index
/// does not match the column the parser expects next
#[derive(Error, Debug)]
#[error("expected emission row for column {expected}, found column {found}")]
struct ColumnIndexMismatchError {
    expected: usize,
    found: usize,
}

/// An Error that is thrown when a probability row carries the
/// wrong number of tokens for its declared vector space
#[derive(Error, Debug)]
#[error("expected {expected} probability tokens, found {found}")]
struct TokenArityError {
    expected: usize,
    found: usize,
}

/// An Error that is thrown when the number of parsed column blocks
/// disagrees with the declared model length
#[derive(Error, Debug)]
#[error("model declares {declared} columns, found {found}")]
struct ColumnCountMismatchError {
    declared: usize,
    found: usize,
}

/// An Error that is thrown when the file ends before the model terminator
#[derive(Error, Debug)]
#[error("hmm model ended before the \"//\" terminator")]
struct TruncatedModelError;

/// An Error that is thrown when a token is neither the zero-probability
/// sentinel nor a valid log-odds integer
#[derive(Error, Debug)]
#[error("failed to decode probability token: \"{token}\"")]
struct ProbabilityTokenError {
    token: String,
}

/// Represents the header of a profile hmm file.
#[derive(Debug, Default)]
pub struct Header {
    /// The resolved profile name
    pub name: String,
    /// The declared number of alignment columns
    pub length: usize,
    /// The effective number of sequences behind the profile
    pub num_sequences: f32,
}

/// The data parsed from a profile hmm file.
#[derive(Debug, Default)]
pub struct Hmm {
    pub header: Header,
    /// Symbol tokens of the emission alphabet, in file order
    pub alphabet: Vec<String>,
    /// Labels of the non-emission state transitions
    pub state_labels: Vec<String>,
    /// Background probability for each alphabet symbol
    pub null_distribution: Vec<f32>,
    /// Per-column emission probabilities, aligned to `alphabet`
    pub match_probabilities: Vec<Vec<f32>>,
    /// Per-column transition probabilities, aligned to `state_labels`
    pub state_probabilities: Vec<Vec<f32>>,
    /// Predicted secondary structure class letters, one per column;
    /// empty when the file carries no annotation
    pub ss_sequence: String,
    /// Prediction confidence digits, one per column;
    /// empty when the file carries no annotation
    pub ss_confidence: String,
}

/// Decode a log-odds integer token into a linear probability.
///
/// Tokens encode round(-1000 * log2(p)), so a token of 0 is probability 1.0
/// and the "*" sentinel is probability 0.0 exactly.
pub fn decode_log_odds_token(token: &str) -> Result<f32> {
    if token == NO_PROBABILITY_TOKEN {
        return Ok(0.0);
    }

    let encoded = token.parse::<i32>().map_err(|_| ProbabilityTokenError {
        token: token.to_string(),
    })?;

    Ok((encoded as f32 / -LOG_ODDS_SCALE).exp2())
}

fn decode_log_odds_tokens(tokens: &[&str]) -> Result<Vec<f32>> {
    tokens.iter().map(|t| decode_log_odds_token(t)).collect()
}

fn token_index_check(tokens: &[&str], idx: usize) -> Result<()> {
    if idx >= tokens.len() {
        return Err(TokenArityError {
            expected: idx + 1,
            found: tokens.len(),
        }
        .into());
    }
    Ok(())
}

fn get_token_as_string(tokens: &[&str], idx: usize) -> Result<String> {
    token_index_check(tokens, idx)?;
    Ok(String::from(tokens[idx]))
}

fn get_token_as_f32(tokens: &[&str], idx: usize) -> Result<f32> {
    token_index_check(tokens, idx)?;
    tokens[idx]
        .parse::<f32>()
        .with_context(|| format!("failed to parse token \"{}\" as f32", tokens[idx]))
}

fn get_token_as_usize(tokens: &[&str], idx: usize) -> Result<usize> {
    token_index_check(tokens, idx)?;
    tokens[idx]
        .parse::<usize>()
        .with_context(|| format!("failed to parse token \"{}\" as usize", tokens[idx]))
}

pub fn parse_hhm_file<P: AsRef<Path>>(path: P, fallback_name: &str) -> Result<Hmm> {
    let file = File::open(&path).with_context(|| {
        format!(
            "failed to open hmm file: {}",
            path.as_ref().to_string_lossy()
        )
    })?;

    parse_hhm(BufReader::new(file), fallback_name).with_context(|| {
        format!(
            "failed to parse hmm file: {}",
            path.as_ref().to_string_lossy()
        )
    })
}

pub fn parse_hhm<R: BufRead>(reader: R, fallback_name: &str) -> Result<Hmm> {
    let mut parser_state = ParserState::Header;

    let mut raw_name: Option<String> = None;
    let mut length: Option<usize> = None;
    let mut num_sequences: Option<f32> = None;
    let mut null_distribution: Option<Vec<f32>> = None;

    let mut alphabet: Vec<String> = vec![];
    let mut state_labels: Vec<String> = vec![];
    let mut match_probabilities: Vec<Vec<f32>> = vec![];
    let mut state_probabilities: Vec<Vec<f32>> = vec![];

    let mut in_ss_prediction = false;
    let mut in_ss_confidence = false;
    let mut ss_prediction_block = String::new();
    let mut ss_confidence_block = String::new();

    let mut model_complete = false;

    for (line_idx, line) in reader.lines().enumerate() {
        let line_number = line_idx + 1;
        let line =
            line.with_context(|| format!("failed to read hmm line {}", line_number))?;

        if line.trim().is_empty() {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let flag: &str = tokens[0];

        match parser_state {
            ParserState::Header => {
                // a new fasta-style record header ends whichever annotation
                // block is open; the marker records start their own
                if line.starts_with(FASTA_RECORD_PREFIX) {
                    in_ss_prediction = line.contains(SS_PREDICTION_MARKER);
                    in_ss_confidence = line.contains(SS_CONFIDENCE_MARKER);
                    continue;
                }

                if in_ss_prediction || in_ss_confidence {
                    if in_ss_prediction {
                        ss_prediction_block.push_str(&line);
                    }
                    if in_ss_confidence {
                        ss_confidence_block.push_str(&line);
                    }
                    continue;
                }

                let error_context = || {
                    format!(
                        "failed to parse hmm header on line {} with flag {}",
                        line_number, flag
                    )
                };

                match flag {
                    HHM_HEADER_NAME_FLAG => {
                        raw_name =
                            Some(get_token_as_string(&tokens, 1).with_context(error_context)?);
                    }
                    HHM_HEADER_LENGTH_FLAG => {
                        length = Some(get_token_as_usize(&tokens, 1).with_context(error_context)?);
                    }
                    HHM_HEADER_FILTER_FLAG => {
                        num_sequences =
                            Some(get_token_as_f32(&tokens, 1).with_context(error_context)?);
                    }
                    HHM_HEADER_NULL_FLAG => {
                        let null =
                            decode_log_odds_tokens(&tokens[1..]).with_context(error_context)?;

                        let null_sum: f32 = null.iter().sum();
                        if (null_sum - 1.0).abs() > 0.05 {
                            tracing::warn!(
                                sum = null_sum,
                                "null background distribution does not sum to 1"
                            );
                        }

                        null_distribution = Some(null);
                    }
                    HHM_BODY_MODEL_START_FLAG => {
                        if length.is_none() {
                            return Err(MissingHeaderFieldError {
                                field: HHM_HEADER_LENGTH_FLAG,
                            })
                            .with_context(error_context);
                        }
                        if num_sequences.is_none() {
                            return Err(MissingHeaderFieldError {
                                field: HHM_HEADER_FILTER_FLAG,
                            })
                            .with_context(error_context);
                        }

                        alphabet = tokens[1..].iter().map(|t| t.to_string()).collect();

                        let null = null_distribution.as_ref().ok_or(MissingHeaderFieldError {
                            field: HHM_HEADER_NULL_FLAG,
                        })?;
                        if null.len() != alphabet.len() {
                            return Err(TokenArityError {
                                expected: alphabet.len(),
                                found: null.len(),
                            })
                            .with_context(error_context);
                        }

                        parser_state = ParserState::StateLabels;
                    }
                    _ => {
                        // no-op for unknown header flags
                    }
                }
            }
            ParserState::StateLabels => {
                state_labels = tokens.iter().map(|t| t.to_string()).collect();
                parser_state = ParserState::BeginTransitions;
            }
            ParserState::BeginTransitions => {
                // the begin state transition row carries no per-column data
                parser_state = ParserState::MatchEmissions;
            }
            ParserState::MatchEmissions => match flag {
                HHM_BODY_END_FLAG => {
                    model_complete = true;
                    break;
                }
                _ => {
                    let error_context = || {
                        format!("failed to parse hmm emission row on line {}", line_number)
                    };

                    // the row is: consensus residue, 1-based column index, one
                    // score per alphabet symbol, alignment map column
                    let expected = match_probabilities.len() + 1;
                    let found = get_token_as_usize(&tokens, 1).with_context(error_context)?;
                    if found != expected {
                        return Err(ColumnIndexMismatchError { expected, found })
                            .with_context(error_context);
                    }

                    if tokens.len() != alphabet.len() + 3 {
                        return Err(TokenArityError {
                            expected: alphabet.len(),
                            found: tokens.len().saturating_sub(3),
                        })
                        .with_context(error_context);
                    }

                    let score_tokens = &tokens[2..tokens.len() - 1];
                    let emissions =
                        decode_log_odds_tokens(score_tokens).with_context(error_context)?;

                    let has_sentinel = score_tokens.iter().any(|&t| t == NO_PROBABILITY_TOKEN);
                    let emission_sum: f32 = emissions.iter().sum();
                    if !has_sentinel && (emission_sum - 1.0).abs() > 0.05 {
                        tracing::warn!(
                            column = expected,
                            sum = emission_sum,
                            "column emission probabilities do not sum to 1"
                        );
                    }

                    match_probabilities.push(emissions);
                    parser_state = ParserState::StateTransitions;
                }
            },
            ParserState::StateTransitions => {
                let error_context =
                    || format!("failed to parse hmm transition row on line {}", line_number);

                if tokens.len() != state_labels.len() {
                    return Err(TokenArityError {
                        expected: state_labels.len(),
                        found: tokens.len(),
                    })
                    .with_context(error_context);
                }

                state_probabilities.push(decode_log_odds_tokens(&tokens).with_context(error_context)?);
                parser_state = ParserState::MatchEmissions;
            }
        }
    }

    if !model_complete {
        return match parser_state {
            ParserState::Header => Err(MissingHeaderFieldError {
                field: HHM_BODY_MODEL_START_FLAG,
            }
            .into()),
            _ => Err(TruncatedModelError.into()),
        };
    }

    let declared_length = length.ok_or(MissingHeaderFieldError {
        field: HHM_HEADER_LENGTH_FLAG,
    })?;

    if match_probabilities.len() != declared_length {
        return Err(ColumnCountMismatchError {
            declared: declared_length,
            found: match_probabilities.len(),
        }
        .into());
    }

    // a NAME derived from a file name is a placeholder, not a real name
    let name = match raw_name {
        Some(name) if !GENERATED_NAME_RE.is_match(&name) => name,
        _ => fallback_name.to_string(),
    };

    tracing::debug!(
        name = %name,
        columns = declared_length,
        "parsed profile hmm"
    );

    let ss_sequence: String = ss_prediction_block.split_whitespace().collect();
    let ss_confidence: String = ss_confidence_block.split_whitespace().collect();

    if !ss_sequence.is_empty() && ss_sequence.len() != declared_length {
        tracing::warn!(
            annotation_length = ss_sequence.len(),
            model_length = declared_length,
            "secondary structure annotation length does not match the model"
        );
    }
    if ss_sequence.len() != ss_confidence.len() {
        tracing::warn!(
            prediction_length = ss_sequence.len(),
            confidence_length = ss_confidence.len(),
            "secondary structure prediction and confidence lengths disagree"
        );
    }

    Ok(Hmm {
        header: Header {
            name,
            length: declared_length,
            num_sequences: num_sequences.ok_or(MissingHeaderFieldError {
                field: HHM_HEADER_FILTER_FLAG,
            })?,
        },
        alphabet,
        state_labels,
        null_distribution: null_distribution.ok_or(MissingHeaderFieldError {
            field: HHM_HEADER_NULL_FLAG,
        })?,
        match_probabilities,
        state_probabilities,
        ss_sequence,
        ss_confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;

    const SMALL_HHM: &str = "\
NAME  toy
LENG  3
FILT  10.0
NULL  1000  1000
HMM   A     B
      M->M  M->I
      0     *
A 1   1000  1000  1
      0     *

B 2   0     *     2
      0     *

A 3   415   2000  3
      0     *

//
";

    fn parse_str(text: &str) -> Result<Hmm> {
        parse_hhm(text.as_bytes(), "fallback")
    }

    #[test]
    fn test_decode_log_odds_token() -> Result<()> {
        assert!(decode_log_odds_token("*")? == 0.0);
        assert!(decode_log_odds_token("0")? == 1.0);
        assert!(decode_log_odds_token("1000")? == 0.5);
        assert!((decode_log_odds_token("500")? - 0.70710678).abs() < 1e-6);
        assert!(decode_log_odds_token("-1000")? == 2.0);

        // decoding is a pure function of the token
        assert!(decode_log_odds_token("415")? == decode_log_odds_token("415")?);

        assert!(decode_log_odds_token("10q0").is_err());
        assert!(decode_log_odds_token("").is_err());
        Ok(())
    }

    #[test]
    fn test_parse_small_model() -> Result<()> {
        let hmm = parse_str(SMALL_HHM)?;

        assert!(hmm.header.name == "toy");
        assert!(hmm.header.length == 3);
        assert!(hmm.header.num_sequences == 10.0);
        assert!(hmm.alphabet == ["A", "B"]);
        assert!(hmm.state_labels == ["M->M", "M->I"]);
        assert!(hmm.null_distribution == [0.5, 0.5]);

        assert!(hmm.match_probabilities.len() == 3);
        assert!(hmm.state_probabilities.len() == 3);

        assert!(hmm.match_probabilities[0] == [0.5, 0.5]);
        assert!(hmm.match_probabilities[1] == [1.0, 0.0]);
        assert!((hmm.match_probabilities[2][0] - 0.75).abs() < 1e-3);
        assert!(hmm.match_probabilities[2][1] == 0.25);

        for transitions in &hmm.state_probabilities {
            assert!(*transitions == [1.0, 0.0]);
        }

        assert!(hmm.ss_sequence.is_empty());
        assert!(hmm.ss_confidence.is_empty());
        Ok(())
    }

    #[test]
    fn test_emission_rows_sum_to_one() -> Result<()> {
        let hmm = parse_str(SMALL_HHM)?;

        for emissions in &hmm.match_probabilities {
            let sum: f32 = emissions.iter().sum();
            assert!((sum - 1.0).abs() < 1e-2);
        }
        Ok(())
    }

    #[test]
    fn test_generated_name_uses_fallback() -> Result<()> {
        let hmm = parse_str(&SMALL_HHM.replace("NAME  toy", "NAME  kkt4.fa"))?;
        assert!(hmm.header.name == "fallback");

        let hmm = parse_str(&SMALL_HHM.replace("NAME  toy", "NAME  query_1"))?;
        assert!(hmm.header.name == "fallback");

        let hmm = parse_str(&SMALL_HHM.replace("NAME  toy\n", ""))?;
        assert!(hmm.header.name == "fallback");
        Ok(())
    }

    #[test]
    fn test_missing_length_fails_before_model() {
        let result = parse_str(&SMALL_HHM.replace("LENG  3\n", ""));
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("LENG"));
    }

    #[test]
    fn test_missing_filter_fails() {
        let result = parse_str(&SMALL_HHM.replace("FILT  10.0\n", ""));
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("FILT"));
    }

    #[test]
    fn test_missing_null_fails() {
        let result = parse_str(&SMALL_HHM.replace("NULL  1000  1000\n", ""));
        assert!(result.is_err());
    }

    #[test]
    fn test_no_model_section_fails() {
        let result = parse_str("NAME  toy\nLENG  3\nFILT  10.0\nNULL  1000  1000\n");
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("HMM"));
    }

    #[test]
    fn test_truncated_model_fails() {
        let result = parse_str(&SMALL_HHM.replace("//\n", ""));
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("terminator"));
    }

    #[test]
    fn test_column_count_mismatch_fails() {
        let result = parse_str(&SMALL_HHM.replace("LENG  3", "LENG  4"));
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("declares 4 columns"));
    }

    #[test]
    fn test_column_index_mismatch_fails() {
        let result = parse_str(&SMALL_HHM.replace("B 2", "B 7"));
        assert!(result.is_err());
    }

    #[test]
    fn test_emission_arity_mismatch_fails() {
        let result = parse_str(&SMALL_HHM.replace("A 1   1000  1000  1", "A 1   1000  1"));
        assert!(result.is_err());
    }

    #[test]
    fn test_transition_arity_mismatch_fails() {
        let result = parse_str(&SMALL_HHM.replace("B 2   0     *     2\n      0     *", "B 2   0     *     2\n      0     *     0"));
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_probability_token_fails() {
        let result = parse_str(&SMALL_HHM.replace("A 1   1000  1000  1", "A 1   1000  10q0  1"));
        assert!(result.is_err());
    }

    #[test]
    fn test_null_arity_mismatch_fails() {
        let result = parse_str(&SMALL_HHM.replace("NULL  1000  1000", "NULL  1000"));
        assert!(result.is_err());
    }

    #[test]
    fn test_ss_annotation_blocks() -> Result<()> {
        let text = SMALL_HHM.replace(
            "NULL",
            "\
>ss_pred PSIPRED predicted secondary structure
CC
H
>ss_conf PSIPRED confidence values
987
>Consensus
xxx
NULL",
        );

        let hmm = parse_str(&text)?;
        assert!(hmm.ss_sequence == "CCH");
        assert!(hmm.ss_confidence == "987");
        Ok(())
    }

    #[test]
    fn test_ss_blocks_interleaved_with_other_records() -> Result<()> {
        let text = SMALL_HHM.replace(
            "NULL",
            "\
>ss_pred PSIPRED predicted secondary structure
CC
>query sequence
AAA
>ss_pred continued
H
>ss_conf PSIPRED confidence values
98
>another record
AAA
>ss_conf continued
7
>Consensus
xxx
NULL",
        );

        let hmm = parse_str(&text)?;
        assert!(hmm.ss_sequence == "CCH");
        assert!(hmm.ss_confidence == "987");
        Ok(())
    }

    #[test]
    fn test_empty_ss_record_is_not_an_error() -> Result<()> {
        let text = SMALL_HHM.replace(
            "NULL",
            "\
>ss_pred PSIPRED predicted secondary structure
>ss_conf PSIPRED confidence values
>Consensus
xxx
NULL",
        );

        let hmm = parse_str(&text)?;
        assert!(hmm.ss_sequence.is_empty());
        assert!(hmm.ss_confidence.is_empty());
        Ok(())
    }
}
