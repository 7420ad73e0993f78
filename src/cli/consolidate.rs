use anyhow::Result;
use std::sync::Arc;

use mnemos::config::MnemosConfig;
use mnemos::memory::sqlite::SqliteRepository;
use mnemos::memory::{ConsolidationService, MemoryRepository};

/// Run one consolidation cycle against the database and print the report.
pub fn consolidate(config: &MnemosConfig) -> Result<()> {
    let repo: Arc<dyn MemoryRepository> =
        Arc::new(SqliteRepository::open(config.resolved_db_path())?);
    let service = ConsolidationService::new(repo, config);
    let report = service.consolidate();

    println!("Consolidation complete in {} ms", report.duration_ms);
    println!("  Decayed:                     {}", report.decayed);
    println!("  Pruned:                      {}", report.pruned);
    println!("  Merged:                      {}", report.merged);
    println!("  Associations decayed:        {}", report.associations_decayed);
    println!("  Orphan associations removed: {}", report.orphans_removed);
    println!("  Weak associations removed:   {}", report.weak_associations_removed);
    println!("  Audit records trimmed:       {}", report.audit_records_trimmed);

    if !report.errors.is_empty() {
        println!();
        println!("Errors:");
        for err in &report.errors {
            println!("  {err}");
        }
        anyhow::bail!("{} consolidation phase(s) failed", report.errors.len());
    }
    Ok(())
}
