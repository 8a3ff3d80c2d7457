use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{multipart, Client};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::alphabet::is_amino_symbol;
use crate::conservation::{ColourCategory, ColumnScores, ConservationScorer};
use crate::structs::Hmm;

pub const DEFAULT_ENDPOINT: &str = "https://skylign.org";
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// An Error that is thrown when the logo submission request
/// comes back with a non-success status
#[derive(Error, Debug)]
#[error("logo submission failed with status {status}")]
struct SubmissionStatusError {
    status: StatusCode,
}

/// An Error that is thrown when fetching the finished logo
/// comes back with a non-success status
#[derive(Error, Debug)]
#[error("logo fetch failed with status {status}")]
struct LogoStatusError {
    status: StatusCode,
}

/// An Error that is thrown when a logo column entry is not
/// a \<symbol\>:\<probability\> pair
#[derive(Error, Debug)]
#[error("malformed logo height entry: \"{entry}\"")]
struct HeightEntryError {
    entry: String,
}

/// An Error that is thrown when the logo column count disagrees
/// with the parsed model length
#[derive(Error, Debug)]
#[error("logo has {found} columns, model has {expected}")]
struct LogoColumnCountError {
    expected: usize,
    found: usize,
}

/// The submission response: the address the finished logo can be fetched from.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    url: String,
}

/// The logo body: one entry per column, each a list of
/// "\<symbol\>:\<probability\>" strings.
#[derive(Debug, Deserialize)]
struct LogoResponse {
    height_arr: Vec<Vec<String>>,
}

/// Delegates conservation scoring to a skylign-style service.
///
/// The underlying alignment (not the hmm) is submitted; the returned
/// logo already carries corrected per-symbol heights, so no enrichment
/// gate is applied on this path. Any network or response-shape failure
/// aborts profile construction; there is no local fallback.
pub struct SkylignScorer {
    endpoint: String,
    alignment_path: PathBuf,
    timeout: Duration,
}

impl SkylignScorer {
    pub fn new(endpoint: String, alignment_path: PathBuf, timeout: Duration) -> Self {
        Self {
            endpoint,
            alignment_path,
            timeout,
        }
    }

    fn fetch_logo(&self) -> Result<LogoResponse> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .context("failed to build the http client")?;

        let form = multipart::Form::new()
            .text("processing", "hmm")
            .text("path", "/")
            .text("letter_height", "info_content_above")
            .file("file", &self.alignment_path)
            .with_context(|| {
                format!(
                    "failed to read alignment file: {}",
                    self.alignment_path.to_string_lossy()
                )
            })?;

        let response = client
            .post(&self.endpoint)
            .header(ACCEPT, "application/json")
            .multipart(form)
            .send()
            .context("logo submission request failed")?;

        if !response.status().is_success() {
            return Err(SubmissionStatusError {
                status: response.status(),
            }
            .into());
        }

        let submission: SubmitResponse = response
            .json()
            .context("malformed logo submission response")?;

        tracing::debug!(url = %submission.url, "logo submitted");

        let response = client
            .get(&submission.url)
            .header(ACCEPT, "application/json")
            .send()
            .context("logo fetch request failed")?;

        if !response.status().is_success() {
            return Err(LogoStatusError {
                status: response.status(),
            }
            .into());
        }

        let body = response.text().context("failed to read logo body")?;
        parse_logo_body(&body)
    }
}

impl ConservationScorer for SkylignScorer {
    fn score(&self, hmm: &Hmm, categories: &[ColourCategory]) -> Result<ColumnScores> {
        let logo = self
            .fetch_logo()
            .with_context(|| format!("remote conservation scoring failed: {}", self.endpoint))?;

        scores_from_logo(&logo, hmm, categories)
    }
}

fn parse_logo_body(body: &str) -> Result<LogoResponse> {
    serde_json::from_str(body).context("malformed logo response body")
}

fn parse_height_entry(entry: &str) -> Result<(&str, f32)> {
    let (symbol, value) = entry.split_once(':').ok_or_else(|| HeightEntryError {
        entry: entry.to_string(),
    })?;

    let value = value.trim().parse::<f32>().map_err(|_| HeightEntryError {
        entry: entry.to_string(),
    })?;

    Ok((symbol.trim(), value))
}

fn scores_from_logo(
    logo: &LogoResponse,
    hmm: &Hmm,
    categories: &[ColourCategory],
) -> Result<ColumnScores> {
    if logo.height_arr.len() != hmm.header.length {
        return Err(LogoColumnCountError {
            expected: hmm.header.length,
            found: logo.height_arr.len(),
        }
        .into());
    }

    let mut scores = ColumnScores::default();

    for column in &logo.height_arr {
        let mut height = 0.0f32;
        let mut category_heights = vec![0.0f32; categories.len()];

        for entry in column {
            let (symbol, contribution) = parse_height_entry(entry)?;
            height += contribution;

            if !is_amino_symbol(symbol) {
                tracing::debug!(symbol = %symbol, "logo entry outside the amino alphabet");
            }

            for (category_idx, category) in categories.iter().enumerate() {
                if category.contains(symbol) {
                    category_heights[category_idx] += contribution;
                }
            }
        }

        scores.conservation.push(height);
        scores.category_heights.push(category_heights);
    }

    Ok(scores)
}
