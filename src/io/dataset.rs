//! Persisted site set: a pretty-printed JSON array sorted by id

use crate::domain::site::{dataset_from, Dataset, Site};
use anyhow::Context;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Load a dataset file. Duplicate ids collapse onto the last record.
pub fn load_dataset<P: AsRef<Path>>(path: P) -> anyhow::Result<Dataset> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("Failed to open dataset {}", path.display()))?;
    let sites: Vec<Site> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse dataset {}", path.display()))?;

    let dataset = dataset_from(sites);
    info!(path = %path.display(), sites = dataset.len(), "dataset_loaded");
    Ok(dataset)
}

/// Write the dataset atomically: a sibling temp file is synced and renamed
/// over the target, so readers see either the old or the new file.
pub fn write_dataset<P: AsRef<Path>>(path: P, dataset: &Dataset) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let tmp_path = temp_path(path);
    {
        let file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        let mut writer = BufWriter::new(file);
        let sites: Vec<&Site> = dataset.values().collect();
        serde_json::to_writer_pretty(&mut writer, &sites).context("Failed to serialize dataset")?;
        writer.write_all(b"\n")?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move dataset into place at {}", path.display()))?;
    info!(path = %path.display(), sites = dataset.len(), "dataset_written");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
