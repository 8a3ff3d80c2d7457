mod cli;
mod config;
mod extension_traits;

use std::io::Write;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use libhmmlogo::conservation::check_category_coverage;
use libhmmlogo::structs::hmm::parse_hhm_file;
use libhmmlogo::structs::Profile;

use cli::Cli;
use config::Config;
use extension_traits::PathBufExt;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let config = Config::from_file(&args.config_path)?;
    let scorer = config.scorer()?;

    tracing::info!(
        file = %config.master.hmm_file.to_string_lossy(),
        "parsing profile hmm"
    );

    let hmm = parse_hhm_file(&config.master.hmm_file, &config.master.name)?;
    check_category_coverage(&config.colours, &hmm.alphabet);

    let profile = Profile::new(hmm, &config.colours, scorer.as_ref())?;

    tracing::info!(
        name = %profile.name,
        columns = profile.length,
        "profile scored"
    );

    match &args.output_path {
        Some(path) => {
            let mut writer = path.open(true)?;
            serde_json::to_writer_pretty(&mut writer, &profile)
                .context("failed to write profile json")?;
            writer.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            serde_json::to_writer_pretty(&mut handle, &profile)
                .context("failed to write profile json")?;
            writeln!(handle)?;
        }
    }

    Ok(())
}
