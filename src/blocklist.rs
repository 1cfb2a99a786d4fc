//! Persisted set of forbidden subtrees.
//!
//! Comparison is case-insensitive with `\`->`/` normalization and trailing
//! slash stripping; a target is blocked iff its normalized form equals, or
//! has as a `/`-bounded prefix, any list entry.

use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::warn;

pub struct BlockList {
    path: PathBuf,
    entries: RwLock<Vec<String>>,
}

fn normalize(raw: &str) -> String {
    let slashed = raw.replace('\\', "/").to_lowercase();
    slashed.trim_end_matches('/').to_string()
}

impl BlockList {
    pub async fn init(fileshare_dir: &Path) -> Self {
        let path = fileshare_dir.join("block.json");
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<String>>(&bytes).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        BlockList {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub async fn list(&self) -> Vec<String> {
        self.entries.read().await.clone()
    }

    pub async fn add(&self, raw_entry: impl Into<String>) {
        let mut entries = self.entries.write().await;
        let entry = raw_entry.into();
        if !entries.iter().any(|e| normalize(e) == normalize(&entry)) {
            entries.push(entry);
        }
        drop(entries);
        self.persist().await;
    }

    pub async fn remove(&self, raw_entry: &str) {
        let target = normalize(raw_entry);
        {
            let mut entries = self.entries.write().await;
            entries.retain(|e| normalize(e) != target);
        }
        self.persist().await;
    }

    /// True iff `candidate` (any path form, absolute or relative) is blocked.
    pub async fn is_blocked(&self, candidate: &str) -> bool {
        let candidate_norm = normalize(candidate);
        let entries = self.entries.read().await;
        entries.iter().any(|entry| {
            let entry_norm = normalize(entry);
            candidate_norm == entry_norm || candidate_norm.starts_with(&format!("{entry_norm}/"))
        })
    }

    async fn persist(&self) {
        let entries = self.entries.read().await.clone();
        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Err(e) = tokio::fs::write(&self.path, serde_json::to_vec_pretty(&entries).unwrap_or_default()).await {
            warn!(error = %e, "failed to persist block.json");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::normalize;

    #[test]
    fn normalizes_separators_and_case() {
        assert_eq!(normalize(r"Docs\Private\"), "docs/private");
        assert_eq!(normalize("docs/private/"), "docs/private");
    }
}
