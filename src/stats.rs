//! Index statistics.
//!
//! [`Engine::stats`] returns chunk totals for the HTTP API; [`print_stats`]
//! renders the `mdrag stats` overview: database size, document status
//! counts, and a per-file chunk breakdown.

use chrono::{DateTime, Utc};

use mdrag_core::models::StatusStats;
use mdrag_core::store::ChunkStats;

use crate::engine::Engine;
use crate::error::Result;

impl Engine {
    pub async fn stats(&self) -> Result<ChunkStats> {
        Ok(self.store.chunk_stats().await?)
    }
}

pub async fn print_stats(engine: &Engine) -> Result<()> {
    let config = engine.config();
    let chunk_stats = engine.stats().await?;
    let documents = engine.store().list_documents(None).await?;
    let status = StatusStats::from_documents(&documents);

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("mdrag: Index Stats");
    println!("==================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Documents:   {}", config.documents.root.display());
    println!();
    println!(
        "  Tracked:     {} (new {}, modified {}, indexed {}, deleted {})",
        status.total(),
        status.new,
        status.modified,
        status.indexed,
        status.deleted
    );
    println!(
        "  Chunks:      {} across {} file(s)",
        chunk_stats.total_chunks, chunk_stats.total_files
    );

    if !documents.is_empty() {
        println!();
        println!("  {:<40} {:>9} {:>7}   {}", "FILE", "STATUS", "CHUNKS", "INDEXED");
        println!("  {}", "-".repeat(76));
        for doc in &documents {
            let chunks = chunk_stats
                .files
                .iter()
                .find(|f| f.file == doc.filename)
                .map(|f| f.chunks)
                .unwrap_or(0);
            let indexed = match doc.indexed_at {
                Some(at) => format_relative(at, Utc::now()),
                None => "never".to_string(),
            };
            println!(
                "  {:<40} {:>9} {:>7}   {}",
                doc.filename,
                doc.status.as_str(),
                chunks,
                indexed
            );
        }
    }
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "3 hours ago" style relative time; absolute beyond 30 days.
fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - at).num_seconds();
    if delta < 0 || delta >= 86400 * 30 {
        return at.format("%Y-%m-%d %H:%M").to_string();
    }
    let (n, unit) = match delta {
        d if d < 60 => return "just now".to_string(),
        d if d < 3600 => (d / 60, "min"),
        d if d < 86400 => (d / 3600, "hour"),
        d => (d / 86400, "day"),
    };
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_relative() {
        let now = Utc::now();
        assert_eq!(format_relative(now - Duration::seconds(10), now), "just now");
        assert_eq!(format_relative(now - Duration::minutes(1), now), "1 min ago");
        assert_eq!(format_relative(now - Duration::hours(5), now), "5 hours ago");
        assert_eq!(format_relative(now - Duration::days(2), now), "2 days ago");
        let old = now - Duration::days(90);
        assert_eq!(format_relative(old, now), old.format("%Y-%m-%d %H:%M").to_string());
    }
}
