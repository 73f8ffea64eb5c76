use std::io;
use std::path::Path;

/// Writes `body` verbatim to `target`, creating the parent directory first.
pub async fn export_content(target: &Path, body: &str) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(target, body.as_bytes()).await?;
    tracing::info!(path = %target.display(), bytes = body.len(), "draft exported");
    Ok(())
}
