//! CLI argument definitions for tokenflow.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// tokenflow -- decode and fold model token streams.
#[derive(Parser)]
#[command(
    name = "tokenflow",
    version,
    about = "tokenflow -- decode and fold model token streams",
    long_about = "Decodes text/event-stream responses from a file, stdin or URL, and folds \
                  streamed JSON chunks into their accumulated value."
)]
pub struct Cli {
    /// Path to the TOML config file (defaults to ./tokenflow.toml if present).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset; overrides the config file.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decode an event stream and print its messages as JSON lines.
    Decode(DecodeArgs),

    /// Fold JSON chunks (one per line) into a single accumulated value.
    Merge {
        /// File to read; stdin when omitted.
        #[arg(long, short)]
        file: Option<PathBuf>,
    },
}

/// Arguments for `tokenflow decode`.
#[derive(Args)]
pub struct DecodeArgs {
    /// Read the event stream from a file.
    #[arg(long, short, conflicts_with = "url")]
    pub file: Option<PathBuf>,

    /// Fetch the event stream from a URL.
    #[arg(long, short)]
    pub url: Option<url::Url>,

    /// Print only message data, skipping empty and metadata messages.
    #[arg(long)]
    pub data_only: bool,

    /// Fail when no message arrives within this many milliseconds
    /// (0 disables; overrides the config file).
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl DecodeArgs {
    /// Where the event stream comes from.
    pub fn input(&self) -> Input {
        match (&self.file, &self.url) {
            (Some(path), _) => Input::File(path.clone()),
            (None, Some(url)) => Input::Url(url.clone()),
            (None, None) => Input::Stdin,
        }
    }
}

/// A byte source selected on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    File(PathBuf),
    Url(url::Url),
    Stdin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_defaults_to_stdin() {
        let cli = Cli::try_parse_from(["tokenflow", "decode"]).unwrap();
        let Commands::Decode(args) = cli.command else {
            panic!("expected decode");
        };
        assert_eq!(args.input(), Input::Stdin);
        assert!(!args.data_only);
    }

    #[test]
    fn decode_url_with_flags() {
        let cli = Cli::try_parse_from([
            "tokenflow",
            "--log-level",
            "debug",
            "decode",
            "--url",
            "https://example.com/v1/stream",
            "--data-only",
            "--timeout-ms",
            "500",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Commands::Decode(args) = cli.command else {
            panic!("expected decode");
        };
        assert!(matches!(args.input(), Input::Url(ref u) if u.path() == "/v1/stream"));
        assert!(args.data_only);
        assert_eq!(args.timeout_ms, Some(500));
    }

    #[test]
    fn file_and_url_conflict() {
        let result = Cli::try_parse_from([
            "tokenflow",
            "decode",
            "--file",
            "a.txt",
            "--url",
            "https://example.com",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_invalid_url() {
        assert!(Cli::try_parse_from(["tokenflow", "decode", "--url", "not a url"]).is_err());
    }
}
