use crate::index::disk::DiskStore;
use crate::index::terms::TermIndex;
use crate::utils::{get_index_dir, list_indexes};
use anyhow::Result;
use std::path::Path;

/// Summary numbers for one index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub builds: usize,
    pub with_buildid: usize,
    pub distinct_terms: usize,
    pub total_terms: usize,
}

impl IndexStats {
    pub fn collect(index: &TermIndex) -> Self {
        let records = index.records();
        Self {
            builds: records.len(),
            with_buildid: records.iter().filter(|r| r.buildid.is_some()).count(),
            distinct_terms: index.postings().terms.len(),
            total_terms: records.iter().map(|r| r.terms().count()).sum(),
        }
    }
}

/// Display index statistics
pub fn show_stats(index_name: &str) -> Result<()> {
    let index_path = get_index_dir(index_name)?;
    let store = DiskStore::open_existing(&index_path, index_name)?;
    let meta = store.meta()?;
    let stats = store.with_index(IndexStats::collect)?;

    println!("Index Statistics");
    println!("================");
    println!();
    println!("Index name:       {}", meta.name);
    println!("Index location:   {}", index_path.display());
    println!("Index version:    {}", meta.version);
    println!("Builds:           {}", stats.builds);
    println!("With build id:    {}", stats.with_buildid);
    println!("Symbol terms:     {} ({} distinct)", stats.total_terms, stats.distinct_terms);

    if let Ok(size) = dir_size(&index_path) {
        println!();
        println!("Index size:       {}", format_size(size));
    }

    println!();
    println!("Created:          {}", format_timestamp(meta.created_at));
    println!("Updated:          {}", format_timestamp(meta.updated_at));

    Ok(())
}

/// List all indexes in the app data directory
pub fn print_indexes() -> Result<()> {
    let indexes = list_indexes()?;

    if indexes.is_empty() {
        println!("No indexes found.");
        return Ok(());
    }

    println!("Indexes");
    println!("=======");
    println!();

    for location in indexes {
        println!("  {}", location.name);
        println!("    Location: {}", location.index_dir.display());
    }

    Ok(())
}

/// Total size of the files directly inside an index directory
fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut size = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            size += entry.metadata()?.len();
        }
    }
    Ok(size)
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Seconds since the epoch, plus how long ago that was
fn format_timestamp(ts: u64) -> String {
    let age = crate::index::types::unix_now().saturating_sub(ts);
    let ago = match age {
        0..=59 => format!("{}s ago", age),
        60..=3599 => format!("{}m ago", age / 60),
        3600..=86399 => format!("{}h ago", age / 3600),
        _ => format!("{}d ago", age / 86400),
    };
    format!("{} ({})", ts, ago)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::terms::tests::record;

    #[test]
    fn test_collect_stats() {
        let index = TermIndex::from_records(vec![
            record("A", "s1", Some("b"), "system@410 puts@9c0"),
            record("B", "s2", None, "system@410"),
        ]);
        let stats = IndexStats::collect(&index);
        assert_eq!(
            stats,
            IndexStats {
                builds: 2,
                with_buildid: 1,
                distinct_terms: 2,
                total_terms: 3,
            }
        );
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(10), "10 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
    }
}
