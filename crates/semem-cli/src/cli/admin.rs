//! Administrative commands: init, backup, restore, migrate.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use semem_core::manager::{SwitchOptions, SwitchOutcome};
use semem_core::migration::ProgressFn;
use semem_infra::config::{save_config, set_backend};
use semem_types::backend::BackendKind;
use semem_types::backup::{BackupFormat, MergeStrategy, MigrationReport};
use semem_types::config::MemoryConfig;
use tracing::info;

use crate::state::{AppState, ctrl_c_token};

/// Write a default `config.toml`. Does not need the memory manager.
pub async fn init(data_dir: &Path, force: bool, json: bool) -> Result<()> {
    let path = data_dir.join("config.toml");
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    let path = save_config(data_dir, &MemoryConfig::default())
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    if json {
        println!("{}", serde_json::json!({ "config": path }));
        return Ok(());
    }
    println!();
    println!(
        "  {} Wrote {}",
        style("*").green().bold(),
        style(path.display()).cyan()
    );
    println!();
    Ok(())
}

/// Serialize the active backend to a file, or stdout when `output` is `-`.
pub async fn backup(
    state: &AppState,
    format: BackupFormat,
    include_embeddings: bool,
    output: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let blob = state
        .manager
        .backup(format, include_embeddings)
        .await
        .context("Failed to create backup")?;

    if output.as_deref() == Some(Path::new("-")) {
        std::io::stdout().write_all(&blob)?;
        return Ok(());
    }

    let path = match output {
        Some(path) => path,
        None => {
            let dir = state.config.backup_dir(&state.data_dir);
            tokio::fs::create_dir_all(&dir).await?;
            dir.join(format!(
                "semem-{}.{}",
                Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
                format.extension()
            ))
        }
    };
    tokio::fs::write(&path, &blob)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "path": path, "format": format.to_string(), "bytes": blob.len() })
        );
        return Ok(());
    }
    println!();
    println!(
        "  {} Wrote {} backup to {} ({} bytes)",
        style("*").green().bold(),
        format,
        style(path.display()).cyan(),
        blob.len()
    );
    println!();
    Ok(())
}

/// Pick the backup format from the file extension.
pub fn format_for_path(path: &Path) -> Result<BackupFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    ext.parse::<BackupFormat>().map_err(|_| {
        anyhow::anyhow!(
            "cannot infer backup format from '{}' (pass --format json|rdf)",
            path.display()
        )
    })
}

pub async fn restore(
    state: &AppState,
    file: &Path,
    format: Option<BackupFormat>,
    strategy: MergeStrategy,
    json: bool,
) -> Result<()> {
    let format = match format {
        Some(format) => format,
        None => format_for_path(file)?,
    };
    let blob = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let spinner = spinner(format!("Restoring {} ({strategy})...", file.display()))?;
    let report = state.manager.restore(&blob, format, strategy).await;
    spinner.finish_and_clear();
    let report = report.context("Restore failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!();
    println!(
        "  {} Restored {} interaction{} ({} re-embedded, {} skipped)",
        style("*").green().bold(),
        report.restored.len(),
        if report.restored.len() == 1 { "" } else { "s" },
        report.re_embedded,
        report.skipped.len()
    );
    if let Some(reason) = &report.aborted {
        println!(
            "  {} stopped early: {}",
            style("!").yellow().bold(),
            style(reason).dim()
        );
    }
    for failed in &report.failed {
        println!(
            "  {} {} {}",
            style("!").red().bold(),
            failed.id,
            style(&failed.reason).dim()
        );
    }
    println!();
    Ok(())
}

/// Copy every interaction into the backend `to` names. With `switch`, the
/// target becomes active and is written to config.toml.
pub async fn migrate(state: &AppState, to: BackendKind, switch: bool, json: bool) -> Result<()> {
    let current = state.manager.descriptor().await;
    let target = state.config.descriptor_for(to, &state.data_dir);
    if current.kind() == to && current.location() == target.location() {
        bail!("{to} at {} is already the active backend", target.location());
    }
    if to == BackendKind::InMemory && !switch {
        bail!("an in_memory target does not outlive this process; use --switch or a persistent backend");
    }
    let cancel = ctrl_c_token();

    let report = if switch {
        let spinner = spinner(format!("Switching to {to} at {}...", target.location()))?;
        let outcome = state
            .manager
            .switch_backend(
                target,
                SwitchOptions {
                    copy_entries: true,
                    cancel,
                },
            )
            .await;
        spinner.finish_and_clear();
        match outcome.context("Backend switch failed")? {
            SwitchOutcome::Switched { migration, .. } => {
                let path = set_backend(&state.data_dir, to)
                    .await
                    .context("Switched, but failed to update config.toml")?;
                info!(config = %path.display(), backend = %to, "updated configured backend");
                migration
            }
            SwitchOutcome::Cancelled { migration } => {
                print_report(&migration, json)?;
                let why = migration.aborted.as_deref().unwrap_or("cancelled");
                bail!("switch stopped ({why}); {} is still the active backend", current.kind());
            }
        }
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );
        bar.set_message(format!("to {to}"));
        let progress_bar = bar.clone();
        let progress: ProgressFn<'_> = &move |done: u64, total: u64| {
            progress_bar.set_length(total);
            progress_bar.set_position(done);
        };
        let report = state
            .manager
            .migrate_to(&target, cancel, Some(progress))
            .await;
        bar.finish_and_clear();
        Some(report.context("Migration failed")?)
    };

    match report {
        Some(report) => print_report(&report, json),
        None => Ok(()),
    }
}

fn print_report(report: &MigrationReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let marker = if report.is_complete() {
        style("*").green().bold()
    } else {
        style("!").yellow().bold()
    };
    println!();
    println!(
        "  {} Migrated {}/{} interaction{} from {} to {}",
        marker,
        report.succeeded(),
        report.source_count,
        if report.source_count == 1 { "" } else { "s" },
        report.source,
        report.target
    );
    if report.re_embedded > 0 {
        println!("    {} re-embedded for the target dimension", report.re_embedded);
    }
    println!(
        "    target now holds {} ({})",
        report.target_count,
        if report.verified {
            style("verified").green()
        } else {
            style("count mismatch").red()
        }
    );
    if report.cancelled {
        println!("    {}", style("cancelled before completion").yellow());
    }
    if let Some(reason) = &report.aborted {
        println!("    {} {}", style("stopped early:").yellow(), style(reason).dim());
    }
    for failed in &report.failed {
        println!(
            "  {} {} {}",
            style("!").red().bold(),
            failed.id,
            style(&failed.reason).dim()
        );
    }
    println!();
    Ok(())
}

fn spinner(message: String) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.set_message(message);
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(spinner)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn format_is_inferred_from_extension() {
        assert_eq!(format_for_path(Path::new("a/b.json")).unwrap(), BackupFormat::Json);
        assert_eq!(format_for_path(Path::new("dump.nt")).unwrap(), BackupFormat::Rdf);
        assert!(format_for_path(Path::new("dump.bin")).is_err());
        assert!(format_for_path(Path::new("noext")).is_err());
    }

    #[tokio::test]
    async fn init_refuses_to_overwrite_without_force() {
        let tmp = TempDir::new().unwrap();
        init(tmp.path(), false, true).await.unwrap();
        assert!(tmp.path().join("config.toml").exists());
        assert!(init(tmp.path(), false, true).await.is_err());
        init(tmp.path(), true, true).await.unwrap();
    }
}
