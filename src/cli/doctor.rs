//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use mnemos::config::MnemosConfig;
use mnemos::db;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &MnemosConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `mnemos serve` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;

    println!("Mnemos Health Report");
    println!("====================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!("Journal mode:      {}", report.journal_mode);
    println!("sqlite-vec:        {}", report.sqlite_vec_version);
    println!();
    println!("Embedding model:");
    println!(
        "  Stored:          {} ({} dims)",
        report.embedding_model.as_deref().unwrap_or("(not set)"),
        report
            .embedding_dimensions
            .map_or_else(|| "?".to_string(), |d| d.to_string())
    );
    println!("  Configured:      {}", config.embedding.model);
    let mut needs_re_embed = false;
    if let Some(ref stored) = report.embedding_model {
        if stored != &config.embedding.model {
            println!("  WARNING: model mismatch!");
            needs_re_embed = true;
        } else {
            println!("  Status:          OK (match)");
        }
    }
    println!();
    println!("Consistency:");
    println!("  Entries without embedding:  {}", report.entries_missing_embedding);
    println!("  Mismatched embedding width: {}", report.mismatched_embeddings);
    println!("  Orphan associations:        {}", report.orphan_associations);
    needs_re_embed |= report.entries_missing_embedding > 0 || report.mismatched_embeddings > 0;
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED");
        println!();
        println!("Recovery steps:");
        println!("  1. Stop the server");
        println!("  2. Restore from a backup: cp backup.db {}", db_path.display());
    }

    if needs_re_embed {
        println!();
        println!("Run `mnemos re-embed` to rebuild vectors with the configured model.");
    }
    if report.orphan_associations > 0 {
        println!("Run `mnemos consolidate` to remove orphan associations.");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
