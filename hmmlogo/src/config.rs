use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use libhmmlogo::conservation::{ColourCategory, ConservationScorer, PlotType, RelativeEntropyScorer};
use libhmmlogo::skylign::{SkylignScorer, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT_SECS};

/// An Error that is thrown when remote scoring is selected but the
/// configuration names no alignment file to submit
#[derive(Error, Debug)]
#[error("conservation_plot.type is \"skylign\" but master.alignment_file is not set")]
pub struct MissingAlignmentPathError;

/// Paths and naming for the profile under analysis.
#[derive(Debug, Deserialize)]
pub struct MasterConfig {
    pub hmm_file: PathBuf,
    /// Fallback profile name, used when the hmm header carries a
    /// generated one
    pub name: String,
    /// The alignment behind the hmm; required for remote scoring
    pub alignment_file: Option<PathBuf>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Deserialize)]
pub struct ConservationPlotConfig {
    #[serde(rename = "type")]
    pub plot_type: PlotType,
    #[serde(default = "default_endpoint")]
    pub url: String,
    /// Request timeout in seconds for the remote strategy
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// The figure configuration file. Sections consumed by the renderer
/// (page geometry, hit boxes, output naming) are ignored here, so
/// unknown fields are tolerated.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub master: MasterConfig,
    pub colours: Vec<ColourCategory>,
    pub conservation_plot: ConservationPlotConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path).with_context(|| {
            format!(
                "failed to open config file: {}",
                path.as_ref().to_string_lossy()
            )
        })?;

        serde_json::from_reader(BufReader::new(file)).with_context(|| {
            format!(
                "failed to parse config file: {}",
                path.as_ref().to_string_lossy()
            )
        })
    }

    pub fn scorer(&self) -> Result<Box<dyn ConservationScorer>> {
        match self.conservation_plot.plot_type {
            PlotType::Traditional => Ok(Box::new(RelativeEntropyScorer)),
            PlotType::Skylign => {
                let alignment_path = self
                    .master
                    .alignment_file
                    .clone()
                    .ok_or(MissingAlignmentPathError)?;

                Ok(Box::new(SkylignScorer::new(
                    self.conservation_plot.url.clone(),
                    alignment_path,
                    Duration::from_secs(self.conservation_plot.timeout),
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;

    const CONFIG: &str = r#"{
        "master": {
            "hmm_file": "hmms/kkt4.fa.hmm.ss.hmm",
            "name": "KKT4",
            "alignment_file": "alignments/kkt4.fa"
        },
        "colours": [
            { "name": "hydrophobic", "aa": ["A", "I", "L", "M", "V"], "rgb": [0.1, 0.5, 0.9] },
            { "name": "positive", "aa": ["K", "R"], "rgb": [0.9, 0.1, 0.1] }
        ],
        "conservation_plot": { "type": "traditional" },
        "page": { "height": 600, "padding_left": 80, "padding_top": 250 },
        "output": { "file_name": "kkt4.pdf", "split": false }
    }"#;

    #[test]
    fn test_parse_config() -> Result<()> {
        let config: Config = serde_json::from_str(CONFIG)?;

        assert!(config.master.name == "KKT4");
        assert!(config.colours.len() == 2);
        assert!(config.colours[1].aa == ["K", "R"]);
        assert!(config.conservation_plot.plot_type == PlotType::Traditional);
        assert!(config.conservation_plot.url == DEFAULT_ENDPOINT);
        assert!(config.conservation_plot.timeout == DEFAULT_TIMEOUT_SECS);
        Ok(())
    }

    #[test]
    fn test_unknown_plot_type_is_rejected() {
        let text = CONFIG.replace("traditional", "shannon");
        let result: std::result::Result<Config, _> = serde_json::from_str(&text);
        assert!(result.is_err());
    }

    #[test]
    fn test_traditional_scorer_selected() -> Result<()> {
        let config: Config = serde_json::from_str(CONFIG)?;
        assert!(config.scorer().is_ok());
        Ok(())
    }

    #[test]
    fn test_skylign_without_alignment_is_rejected() -> Result<()> {
        let mut value: serde_json::Value =
            serde_json::from_str(&CONFIG.replace("traditional", "skylign"))?;
        value["master"]
            .as_object_mut()
            .unwrap()
            .remove("alignment_file");

        let config: Config = serde_json::from_value(value)?;
        assert!(config.scorer().is_err());
        Ok(())
    }

    #[test]
    fn test_skylign_scorer_selected() -> Result<()> {
        let text = CONFIG.replace("traditional", "skylign");
        let config: Config = serde_json::from_str(&text)?;
        assert!(config.scorer().is_ok());
        Ok(())
    }
}
