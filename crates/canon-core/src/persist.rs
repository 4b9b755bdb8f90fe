use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Replaces the file at `path` with `content` in a single step.
///
/// The canonical-config file and spilled cache entries are re-read between
/// writes, so the new bytes are staged in a sibling temp file and renamed
/// over the target. A reader sees either the previous snapshot or the new
/// one, never a partial write.
pub fn replace_file_atomic(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("refusing to write snapshot: empty target path");
    }
    if path.is_dir() {
        bail!(
            "refusing to write snapshot: '{}' is a directory",
            path.display()
        );
    }

    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("creating parent directory {}", parent.display()))?;

    // Staged in the same directory so the rename stays on one filesystem.
    let mut staged = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("staging replacement for {}", path.display()))?;
    staged
        .write_all(content.as_bytes())
        .with_context(|| format!("writing replacement for {}", path.display()))?;
    staged
        .persist(path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
