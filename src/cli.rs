use std::path::PathBuf;

use clap::Parser;

/// Train and evaluate ReLU and SELU variants of VGG11-BN on six image
/// classification datasets, then export loss curves and a summary table.
#[derive(Parser, Clone, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Directory where dataset archives are cached (created if missing).
    pub cache_dir: PathBuf,

    /// Directory where checkpoints, plots and tables are written.
    pub results_dir: PathBuf,

    /// Run the full experiment (20 epochs, full splits) instead of the
    /// default smoke run (2 epochs, 10 examples per split).
    #[arg(long)]
    pub full: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positional_directories_and_flag() {
        let cli = Cli::try_parse_from(["activation-bench", "/tmp/cache", "/tmp/results", "--full"])
            .unwrap();
        assert_eq!(cli.cache_dir, PathBuf::from("/tmp/cache"));
        assert_eq!(cli.results_dir, PathBuf::from("/tmp/results"));
        assert!(cli.full);
    }

    #[test]
    fn smoke_run_is_the_default() {
        let cli = Cli::try_parse_from(["activation-bench", "cache", "results"]).unwrap();
        assert!(!cli.full);
    }

    #[test]
    fn rejects_missing_results_dir() {
        assert!(Cli::try_parse_from(["activation-bench", "cache"]).is_err());
    }
}
