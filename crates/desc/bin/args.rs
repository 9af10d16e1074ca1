use std::{io::Write, path::PathBuf};

use clap::Parser;
use eyre::{Result, WrapErr};

use crate::{render::render, runner::run_scribble};

/// Dump the instrumentation of a Solidity file together with its metadata, fragment by fragment.
#[derive(Parser, Debug)]
#[command(
    name = "scribe-desc",
    version,
    after_help = "Find more information in our homepage: https://medga.org/",
    next_display_order = None,
)]
pub struct DescArgs {
    /// The annotated Solidity file.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// The instrumenter executable.
    #[arg(long, value_name = "CMD", env = "SCRIBE_SCRIBBLE", default_value = "scribble")]
    pub scribble: String,
}

impl DescArgs {
    pub fn run(self) -> Result<()> {
        if !self.file.exists() {
            eyre::bail!("file does not exist: {}", self.file.display());
        }
        let original = std::fs::read_to_string(&self.file)
            .wrap_err_with(|| format!("failed to read {}", self.file.display()))?;

        let output = run_scribble(&self.scribble, &self.file)?;
        let dump = render(&self.file.display().to_string(), &original, &output.instrumented, &output.metadata)?;

        let mut stdout = std::io::stdout().lock();
        stdout.write_all(dump.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        DescArgs::command().debug_assert();
    }

    #[test]
    fn scribble_defaults_to_path_lookup() {
        let args = DescArgs::try_parse_from(["scribe-desc", "a.sol"]).unwrap();
        assert_eq!(args.file, PathBuf::from("a.sol"));
        if std::env::var_os("SCRIBE_SCRIBBLE").is_none() {
            assert_eq!(args.scribble, "scribble");
        }

        let args = DescArgs::try_parse_from(["scribe-desc", "a.sol", "--scribble", "./run.sh"]).unwrap();
        assert_eq!(args.scribble, "./run.sh");
    }
}
