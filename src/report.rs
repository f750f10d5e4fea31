use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::models::RunReport;

pub fn write_report(path: &Path, report: &RunReport<'_>) -> Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .context(format!("Failed to create report directory: {}", dir.display()))?;
    }

    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json).context(format!("Failed to write report: {}", path.display()))?;

    Ok(())
}
