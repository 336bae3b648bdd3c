//! Code snapshot stored with the session metadata

use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::RigResult;

/// File extensions captured in a snapshot
const SNAPSHOT_EXTENSIONS: [&str; 2] = ["rs", "toml"];

/// JSON map of relative path to file contents for every source file under
/// `root`. Without a root, only the crate name and version are recorded.
pub fn code_snapshot(root: Option<&Path>) -> RigResult<String> {
    let Some(root) = root else {
        let value = json!({
            "crate": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        });
        return Ok(value.to_string());
    };

    let mut files = BTreeMap::new();
    collect(root, root, &mut files)?;
    Ok(serde_json::to_string(&files)?)
}

fn collect(root: &Path, dir: &Path, files: &mut BTreeMap<String, String>) -> RigResult<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.path());
    for entry in entries {
        let path = entry.path();
        let name = entry.file_name();
        // Skip hidden dirs and build output
        if name.to_string_lossy().starts_with('.') || name == "target" {
            continue;
        }
        if path.is_dir() {
            collect(root, &path, files)?;
            continue;
        }
        let wanted = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SNAPSHOT_EXTENSIONS.contains(&e));
        if !wanted {
            continue;
        }
        let rel = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().replace('\\', "/");
        files.insert(rel, fs::read_to_string(&path)?);
    }
    Ok(())
}
