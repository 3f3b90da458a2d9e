//! `semem context`: retrieve into a fresh context window and print it.

use anyhow::{Context, Result};
use console::style;
use semem_core::context::{ContextWindowManager, ExtractiveSummarizer};
use semem_core::manager::RetrieveOptions;
use semem_types::context::ContextUpdate;

use crate::state::AppState;

pub async fn assemble(
    state: &AppState,
    query: &str,
    options: RetrieveOptions,
    update: ContextUpdate,
    summarize: bool,
    json: bool,
) -> Result<()> {
    let mut window = state.manager.new_context_window();
    window.update(update);

    let results = state
        .manager
        .retrieve_into(query, &options, &mut window)
        .await
        .context("Retrieval failed")?;

    let summary = if summarize {
        window
            .summarize(&ExtractiveSummarizer::default())
            .await
            .context("Summarization failed")?
    } else {
        None
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "retrieved": results.len(),
                "summary_id": summary,
                "tokens": window.token_count(),
                "items": window.items(),
                "rendered": window.render(),
            }))?
        );
        return Ok(());
    }

    print_header(&window, results.len());
    if window.is_empty() {
        println!(
            "  {} Nothing cleared the relevance threshold of {:.2}.",
            style("i").blue().bold(),
            window.config().relevance_threshold
        );
        println!();
        return Ok(());
    }
    for line in window.render().lines() {
        println!("  {line}");
    }
    println!();
    Ok(())
}

fn print_header(window: &ContextWindowManager, retrieved: usize) {
    let config = window.config();
    println!();
    println!(
        "  {} {} item{} admitted from {} retrieved ({}/{} items, ~{}/{} tokens)",
        style("*").green().bold(),
        window.len(),
        if window.len() == 1 { "" } else { "s" },
        retrieved,
        window.len(),
        config.max_items,
        window.token_count(),
        config.max_tokens
    );
    println!();
}
