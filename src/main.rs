mod cli;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cli::{Cli, Commands, ReportCommands};

fn init_logging(verbose: bool) {
    let default = if verbose { "sipdesk=debug" } else { "sipdesk=warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Import {
                file,
                kind,
                verify_only,
                force,
            } => cli::import::run(&file, kind, verify_only, force).await?,
            Commands::Preview { file, kind, limit } => cli::preview::run(&file, kind, limit).await?,
            Commands::Report { command } => match command {
                ReportCommands::Commission {
                    client,
                    from,
                    to,
                    category,
                    tree,
                    export,
                } => cli::report::commission(client, from, to, category, tree, export).await?,
            },
            Commands::Config {
                api_url,
                data_dir,
                branch,
                token_file,
                timeout,
            } => cli::config::run(api_url, data_dir, branch, token_file, timeout)?,
            Commands::Imports => cli::imports::list()?,
        }
        Ok::<_, anyhow::Error>(())
    })
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
