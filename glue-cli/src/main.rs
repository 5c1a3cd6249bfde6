mod cli;
mod commands;
mod project;
mod report;

use clap::Parser;

use cli::{Cli, Command};
use commands::run_cmd::RunOptions;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Init { dir, force } => commands::init_cmd::run(&dir, force),
        Command::Catalogue { filter } => commands::catalogue_cmd::run(filter),
        Command::Imports { module, json } => {
            let ctx = project::detect_project_context(cli.config.as_deref())?;
            commands::imports_cmd::run(module, json, ctx).await
        }
        Command::Run {
            module,
            frames,
            frame_ms,
            allow_unbound,
            json,
        } => {
            let ctx = project::detect_project_context(cli.config.as_deref())?;
            let opts = RunOptions {
                module,
                frames,
                frame_ms,
                allow_unbound,
                json,
            };
            commands::run_cmd::run(opts, ctx).await
        }
    }
}
