//! List objects in the filesystem store.

use std::path::PathBuf;

use meetrec_common::AppConfig;
use meetrec_storage::{FsObjectStore, ObjectStore};

pub async fn run(config: &AppConfig, prefix: &str, store: Option<PathBuf>) -> anyhow::Result<()> {
    let root = store.unwrap_or_else(|| config.storage.root_dir.clone());
    let store = FsObjectStore::open(&root)
        .map_err(|e| anyhow::anyhow!("Failed to open store at {}: {e}", root.display()))?;

    let objects = store.list(prefix).await?;
    if objects.is_empty() {
        println!("No objects under '{prefix}' in {}", root.display());
        return Ok(());
    }

    let total: u64 = objects.iter().map(|o| o.size).sum();
    for object in &objects {
        println!("{:>12}  {}  {}", object.size, object.etag, object.key);
    }
    println!();
    println!("{} objects, {} bytes", objects.len(), total);
    Ok(())
}
