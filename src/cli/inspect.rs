use anyhow::Result;

use mnemos::config::MnemosConfig;

use crate::server::open_engine;

/// Print one memory with its live scores, associations and audit trail.
pub fn inspect(config: MnemosConfig, id: &str) -> Result<()> {
    let engine = open_engine(config)?;
    let report = engine.memory.inspect(id)?;
    let entry = &report.entry;

    println!("Memory {}", entry.id);
    println!("{}", "=".repeat(48));
    println!("  Content:             {}", entry.content);
    println!("  Type:                {}", entry.memory_type);
    match &entry.owner_id {
        Some(owner) => println!("  Partition:           {}:{owner}", entry.scope),
        None => println!("  Partition:           {}", entry.scope),
    }
    println!("  Source:              {}", entry.source);
    println!("  Importance:          {:.2}", entry.importance);
    println!(
        "  Strength:            {:.3} (stored {:.3}, decay {}/day)",
        report.effective_strength, entry.strength, entry.decay_rate
    );
    println!("  Recency:             {:.3}", report.recency);
    println!(
        "  Frequency:           {:.3} ({} recalls)",
        report.frequency, entry.access_count
    );
    println!("  Created:             {}", entry.created_at);
    println!("  Updated:             {} (v{})", entry.updated_at, entry.version);
    println!();

    if report.associations.is_empty() {
        println!("No associations.");
    } else {
        println!("Associations:");
        for assoc in &report.associations {
            println!("  {:.2}  {}  {}", assoc.weight, assoc.id, assoc.content);
        }
    }
    println!();

    if !report.audit.is_empty() {
        println!("History (newest first):");
        for record in &report.audit {
            println!("  {}  {}", record.created_at, record.operation);
        }
    }

    Ok(())
}
