use anyhow::Result;

use mnemos::config::MnemosConfig;
use mnemos::memory::sqlite::SqliteRepository;
use mnemos::memory::MemoryRepository;

/// Display memory statistics in the terminal.
pub fn stats(config: &MnemosConfig) -> Result<()> {
    let repo = SqliteRepository::open(config.resolved_db_path())?;
    let stats = repo.stats()?;

    println!("Memory Statistics");
    println!("{}", "=".repeat(40));
    println!("  Total memories:      {}", stats.total_memories);
    println!("  Associations:        {}", stats.associations);
    println!("  Episodes:            {}", stats.episodes);
    println!();

    for (title, counts) in [
        ("By Scope:", &stats.by_scope),
        ("By Type:", &stats.by_type),
        ("By Source:", &stats.by_source),
    ] {
        println!("{title}");
        for (key, count) in counts {
            println!("  {key:<14} {count}");
        }
        println!();
    }

    println!("Average strength:      {:.3}", stats.average_strength);
    println!("Average importance:    {:.3}", stats.average_importance);
    if let Some(size) = stats.db_size_bytes {
        println!("Database size:         {size} bytes");
    }
    if let Some(ref oldest) = stats.oldest_memory {
        println!("Oldest memory:         {oldest}");
    }
    if let Some(ref newest) = stats.newest_memory {
        println!("Newest memory:         {newest}");
    }

    Ok(())
}
