//! semem CLI entry point.
//!
//! Binary name: `semem`
//!
//! Parses CLI arguments, loads config, opens the configured backend, then
//! dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use semem_core::manager::RetrieveOptions;
use semem_infra::config::resolve_data_dir;
use semem_observe::tracing_setup::{TracingConfig, init_tracing, shutdown_tracing};
use semem_types::context::ContextUpdate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut tracing_config = TracingConfig::for_verbosity(cli.verbose, cli.quiet);
    tracing_config.json = cli.log_json;
    tracing_config.enable_otel = cli.otel;
    init_tracing(&tracing_config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Commands that don't need the memory manager
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(*shell, &mut cmd, "semem", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Init { force } => {
            let data_dir = cli.data_dir.clone().unwrap_or_else(resolve_data_dir);
            return cli::admin::init(&data_dir, *force, cli.json).await;
        }
        _ => {}
    }

    let state = AppState::init(cli.data_dir, cli.backend).await?;

    match cli.command {
        Commands::Store {
            prompt,
            response,
            type_tag,
            meta,
        } => {
            let metadata = cli::memory::build_metadata(type_tag, meta);
            cli::memory::store(&state, &prompt, &response, metadata, cli.json).await?;
        }

        Commands::Retrieve {
            query,
            k,
            min_similarity,
            types,
        } => {
            let options = retrieve_options(k, min_similarity, types);
            cli::memory::retrieve(&state, &query, options, cli.json).await?;
        }

        Commands::Get { id } => {
            cli::memory::get(&state, &id, cli.json).await?;
        }

        Commands::Forget { id } => {
            cli::memory::forget(&state, &id, cli.json).await?;
        }

        Commands::List { offset, limit } => {
            cli::memory::list(&state, offset, limit, cli.json).await?;
        }

        Commands::Stats => {
            cli::memory::stats(&state, cli.json).await?;
        }

        Commands::Clear { force } => {
            cli::memory::clear(&state, force, cli.json).await?;
        }

        Commands::Backup {
            format,
            embeddings,
            output,
        } => {
            cli::admin::backup(&state, format, embeddings, output, cli.json).await?;
        }

        Commands::Restore {
            file,
            format,
            strategy,
        } => {
            cli::admin::restore(&state, &file, format, strategy, cli.json).await?;
        }

        Commands::Migrate { to, switch } => {
            cli::admin::migrate(&state, to, switch, cli.json).await?;
        }

        Commands::Context {
            query,
            k,
            min_similarity,
            types,
            max_items,
            max_tokens,
            summarize,
        } => {
            let options = retrieve_options(k, min_similarity, types);
            let update = ContextUpdate {
                max_items,
                max_tokens,
                relevance_threshold: None,
            };
            cli::context::assemble(&state, &query, options, update, summarize, cli.json).await?;
        }

        // Handled before the state was built.
        Commands::Completions { .. } | Commands::Init { .. } => {}
    }

    Ok(())
}

fn retrieve_options(k: usize, min_similarity: f32, types: Vec<String>) -> RetrieveOptions {
    RetrieveOptions {
        k,
        min_similarity,
        type_filter: (!types.is_empty()).then_some(types),
    }
}
