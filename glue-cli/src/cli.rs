use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "gruglue",
    about = "Headless host for wasm-bindgen guests",
    version
)]
pub struct Cli {
    /// More logging (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Use this config file instead of searching for gruglue.toml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Instantiate a guest, call its `run` export and pump the event loop
    Run {
        /// Module path, file: URL or http(s): URL
        module: String,
        /// Number of event-loop pumps
        #[arg(long, default_value_t = 600)]
        frames: u32,
        /// Virtual milliseconds per pump
        #[arg(long, default_value_t = 16.0)]
        frame_ms: f64,
        /// Link unbound imports as trapping stubs
        #[arg(long)]
        allow_unbound: bool,
        /// Print the final counters as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show how each import of a module resolves
    Imports {
        /// Module path, file: URL or http(s): URL
        module: String,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the import catalogue
    Catalogue {
        /// Only entries whose name or symbol contains this
        filter: Option<String>,
    },
    /// Write a default gruglue.toml
    Init {
        /// Directory to write into
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from(["gruglue", "-vv", "run", "demo.wasm", "--frames", "3"]).unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Run { module, frames, frame_ms, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(module, "demo.wasm");
        assert_eq!(frames, 3);
        assert_eq!(frame_ms, 16.0);
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["gruglue"]).is_err());
    }
}
