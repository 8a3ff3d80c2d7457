use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(name = "hmmlogo")]
#[command(
    about = "Derive per-column conservation heights and colour decompositions from a profile HMM file"
)]
pub struct Cli {
    /// The path to the JSON configuration file
    #[arg(value_name = "CONFIG.json")]
    pub config_path: PathBuf,

    /// Write the renderer payload to this file instead of stdout
    #[arg(short = 'o', long = "output", value_name = "PROFILE.json")]
    pub output_path: Option<PathBuf>,
}
