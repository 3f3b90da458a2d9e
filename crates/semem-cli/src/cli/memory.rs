//! Memory CLI commands: store, retrieve, get, forget, list, stats, clear.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;
use semem_core::context::summarizer::truncate_chars;
use semem_core::manager::RetrieveOptions;
use semem_types::entry::{MemoryEntry, Metadata, ScoredEntry, TYPE_KEY};
use uuid::Uuid;

use crate::state::{AppState, ctrl_c_token};

/// Build entry metadata from `--type` and repeated `--meta key=value` flags.
pub fn build_metadata(type_tag: Option<String>, meta: Vec<(String, String)>) -> Metadata {
    let mut metadata = Metadata::new();
    for (key, raw) in meta {
        let value = serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw));
        metadata.insert(key, value);
    }
    if let Some(tag) = type_tag {
        metadata.insert(TYPE_KEY.into(), tag.into());
    }
    metadata
}

/// Embed and store one interaction.
///
/// # Examples
///
/// ```bash
/// semem store "what is borrowing?" "a temporary reference" --type chat
/// ```
pub async fn store(
    state: &AppState,
    prompt: &str,
    response: &str,
    metadata: Metadata,
    json: bool,
) -> Result<()> {
    let id = state
        .manager
        .store(prompt, response, metadata)
        .await
        .context("Failed to store interaction")?;

    if json {
        println!("{}", serde_json::json!({ "id": id }));
        return Ok(());
    }
    println!();
    println!(
        "  {} Stored {}",
        style("*").green().bold(),
        style(id).cyan()
    );
    println!();
    Ok(())
}

/// Rank stored interactions by similarity to `query`. Ctrl-C abandons the
/// search.
pub async fn retrieve(
    state: &AppState,
    query: &str,
    options: RetrieveOptions,
    json: bool,
) -> Result<()> {
    let cancel = ctrl_c_token();
    let results = state
        .manager
        .retrieve_cancellable(query, &options, &cancel)
        .await
        .context("Retrieval failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!();
        println!(
            "  {} No interactions above similarity {:.2}.",
            style("i").blue().bold(),
            options.min_similarity
        );
        println!();
        return Ok(());
    }

    println!();
    println!("{}", scored_table(&results));
    println!();
    Ok(())
}

pub async fn get(state: &AppState, id: &Uuid, json: bool) -> Result<()> {
    let entry = state.manager.get_required(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(());
    }

    println!();
    println!("  {}  {}", style("Id").bold(), style(entry.id).cyan());
    println!(
        "  {}  {}",
        style("Created").bold(),
        entry.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  {}  {} (last {})",
        style("Accessed").bold(),
        entry.access_count,
        entry
            .last_accessed_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string())
    );
    if !entry.metadata.is_empty() {
        println!(
            "  {}  {}",
            style("Metadata").bold(),
            serde_json::Value::Object(entry.metadata.clone())
        );
    }
    println!();
    println!("  {}", style("Prompt").bold().underlined());
    println!("  {}", entry.prompt);
    println!();
    println!("  {}", style("Response").bold().underlined());
    println!("  {}", entry.response);
    println!();
    Ok(())
}

pub async fn forget(state: &AppState, id: &Uuid, json: bool) -> Result<()> {
    let removed = state.manager.forget(id).await?;

    if json {
        println!("{}", serde_json::json!({ "id": id, "removed": removed }));
        return Ok(());
    }
    println!();
    if removed {
        println!("  {} Forgot {}", style("*").green().bold(), style(id).cyan());
    } else {
        println!("  {} No interaction with id {}", style("i").blue().bold(), id);
    }
    println!();
    Ok(())
}

pub async fn list(state: &AppState, offset: usize, limit: usize, json: bool) -> Result<()> {
    let entries = state.manager.list(offset, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!();
        println!(
            "  {} No interactions stored. Add one with `semem store`.",
            style("i").blue().bold()
        );
        println!();
        return Ok(());
    }

    println!();
    println!("{}", entry_table(&entries));
    println!();
    println!(
        "  {} interaction{} (offset {offset})",
        style(entries.len()).bold(),
        if entries.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}

pub async fn stats(state: &AppState, json: bool) -> Result<()> {
    let stats = state.manager.stats().await?;
    let descriptor = state.manager.descriptor().await;
    let indexed = state.manager.indexed().await;

    if json {
        let mut value = serde_json::to_value(&stats)?;
        value["indexed"] = indexed.into();
        value["location"] = descriptor.location().into();
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let health = if stats.healthy {
        style("healthy").green()
    } else {
        style("unreachable").red()
    };
    println!();
    println!(
        "  {} {} ({})",
        style("Backend").bold(),
        style(stats.backend_type).cyan(),
        health
    );
    println!("  {} {}", style("Location").bold(), descriptor.location());
    println!("  {} {}", style("Entries").bold(), stats.count);
    println!("  {} {}", style("Indexed").bold(), indexed);
    if let Some(bytes) = stats.size_bytes {
        println!("  {} {}", style("Size").bold(), format_bytes(bytes));
    }
    if let Some(cache) = stats.cache {
        println!(
            "  {} {}/{} entries, {} hits, {} misses",
            style("Cache").bold(),
            cache.size,
            cache.capacity,
            cache.hits,
            cache.misses
        );
    }
    println!(
        "  {} {} ({} dims)",
        style("Embedder").bold(),
        state.config.embedding.model,
        state.config.dimension
    );
    println!();
    Ok(())
}

/// Delete everything, asking first unless `force` is set.
pub async fn clear(state: &AppState, force: bool, json: bool) -> Result<()> {
    if !force {
        let count = state.manager.stats().await?.count;
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Permanently delete {} stored interaction{}?",
                style(count).red().bold(),
                if count == 1 { "" } else { "s" }
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    let outcome = state.manager.clear(true).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "removed": outcome.removed, "backup": outcome.backup_path })
        );
        return Ok(());
    }
    println!();
    println!(
        "  {} Removed {} interaction{}",
        style("*").green().bold(),
        outcome.removed,
        if outcome.removed == 1 { "" } else { "s" }
    );
    if let Some(path) = outcome.backup_path {
        println!("  {} Backup written to {}", style("i").blue().bold(), path.display());
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering helpers
// ---------------------------------------------------------------------------

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn type_cell(entry: &MemoryEntry) -> Cell {
    match entry.type_tag() {
        Some(tag) => Cell::new(tag).fg(Color::Magenta),
        None => Cell::new("-").fg(Color::DarkGrey),
    }
}

fn short_id(id: &Uuid) -> String {
    id.to_string()[..8].to_string()
}

pub fn scored_table(results: &[ScoredEntry]) -> Table {
    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Score").fg(Color::White),
        Cell::new("Id").fg(Color::White),
        Cell::new("Type").fg(Color::White),
        Cell::new("Prompt").fg(Color::White),
        Cell::new("Response").fg(Color::White),
    ]);
    for scored in results {
        let entry = &scored.entry;
        table.add_row(vec![
            Cell::new(format!("{:.3}", scored.similarity)).fg(score_color(scored.similarity)),
            Cell::new(short_id(&entry.id)).fg(Color::DarkGrey),
            type_cell(entry),
            Cell::new(truncate_chars(&entry.prompt, 50)).fg(Color::White),
            Cell::new(truncate_chars(&entry.response, 70)),
        ]);
    }
    table
}

fn entry_table(entries: &[MemoryEntry]) -> Table {
    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Id").fg(Color::White),
        Cell::new("Type").fg(Color::White),
        Cell::new("Prompt").fg(Color::White),
        Cell::new("Accessed").fg(Color::White),
        Cell::new("Created").fg(Color::White),
    ]);
    for entry in entries {
        table.add_row(vec![
            Cell::new(entry.id).fg(Color::DarkGrey),
            type_cell(entry),
            Cell::new(truncate_chars(&entry.prompt, 60)).fg(Color::White),
            Cell::new(entry.access_count).fg(Color::Yellow),
            Cell::new(entry.created_at.format("%Y-%m-%d")).fg(Color::DarkGrey),
        ]);
    }
    table
}

fn score_color(similarity: f32) -> Color {
    if similarity >= 0.8 {
        Color::Green
    } else if similarity >= 0.5 {
        Color::Yellow
    } else {
        Color::Red
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
