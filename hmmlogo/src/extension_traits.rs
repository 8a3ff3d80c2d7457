use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Context;

/// An extension trait that adds a buffered-writer open method to PathBuf.
pub trait PathBufExt {
    fn open(&self, allow_overwrite: bool) -> anyhow::Result<BufWriter<File>>;
}

impl PathBufExt for PathBuf {
    fn open(&self, allow_overwrite: bool) -> anyhow::Result<BufWriter<File>> {
        let file = if allow_overwrite {
            File::create(self)
        } else {
            File::options().write(true).create_new(true).open(self)
        }
        .with_context(|| format!("failed to create file: {}", self.to_string_lossy()))?;

        Ok(BufWriter::new(file))
    }
}
