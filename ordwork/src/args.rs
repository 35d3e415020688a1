//! Command line arguments

use std::path::PathBuf;

use clap::Parser;

use crate::{Config, ConfigError};

/// Count lines, words and bytes of many files at once, reported in the order given.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(version)]
pub struct Args {
    /// Files to count
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// How many files to read at once. Defaults to the number of logical processors.
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// A yaml file providing defaults, e.g. `max_concurrency: 4`. --jobs wins if both are given.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Stop at the first file that can't be read rather than reporting it and moving on.
    #[arg(long)]
    #[clap(default_value = "false")]
    pub fail_fast: bool,

    /// Write an svg showing what each thread did to this file.
    #[arg(long)]
    pub emit_timing: Option<PathBuf>,
}

impl Args {
    /// The effective configuration: the config file, if any, overridden by flags.
    pub fn config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(jobs) = self.jobs {
            config.max_concurrency = Some(jobs);
        }
        Ok(config)
    }

    /// Args for counting `files` with everything else defaulted.
    pub fn for_files(files: Vec<PathBuf>) -> Args {
        Args {
            files,
            jobs: None,
            config: None,
            fail_fast: false,
            emit_timing: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from(["ordwork", "-j", "3", "--fail-fast", "a.txt", "b.txt"])
            .unwrap();
        assert_eq!(Some(3), args.jobs);
        assert!(args.fail_fast);
        assert_eq!(vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")], args.files);
    }

    #[test]
    fn requires_files() {
        assert!(Args::try_parse_from(["ordwork"]).is_err());
    }

    #[test]
    fn jobs_overrides_config_file() {
        let temp_dir = tempdir().unwrap();
        let config_file = temp_dir.path().join("ordwork.yml");
        fs::write(&config_file, "max_concurrency: 2\n").unwrap();

        let mut args = Args::for_files(vec!["a.txt".into()]);
        args.config = Some(config_file);
        assert_eq!(Some(2), args.config().unwrap().max_concurrency);

        args.jobs = Some(5);
        assert_eq!(Some(5), args.config().unwrap().max_concurrency);
    }
}
