use anyhow::{Context, Result};

use crate::config::Config;

/// Delete the contents of `artifacts/` and `outputs/`, keeping the
/// directories themselves. Source files under `data/` and the database
/// are left alone.
pub fn run_reset(config: &Config) -> Result<()> {
    for dir in [&config.paths.artifacts_dir, &config.paths.outputs_dir] {
        if !dir.exists() {
            continue;
        }
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            }
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    println!("Cleared artifacts/ and outputs/.");
    Ok(())
}
