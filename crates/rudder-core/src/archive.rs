//! Packaged chart archives (`.tgz`)
//!
//! An archive holds a single chart directory: `<name>/Chart.yaml`,
//! `<name>/values.yaml`, `<name>/templates/...`, `<name>/charts/...`.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};

use crate::chart::{CHART_FILE, Chart};
use crate::error::{CoreError, Result};

/// Chart contents keyed by slash-separated path relative to the chart root
pub type FileMap = BTreeMap<String, Vec<u8>>;

/// Whether a path looks like a packaged chart
pub fn is_archive(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    name.ends_with(".tgz") || name.ends_with(".tar.gz")
}

/// Read an archive from disk into a file map rooted at the chart directory
pub fn read_archive(archive_path: &Path) -> Result<FileMap> {
    let mut bytes = Vec::new();
    File::open(archive_path)?.read_to_end(&mut bytes)?;
    read_archive_bytes(&bytes).map_err(|e| match e {
        CoreError::InvalidArchive { message, .. } => CoreError::InvalidArchive {
            path: archive_path.display().to_string(),
            message,
        },
        other => other,
    })
}

/// Read archive bytes into a file map rooted at the chart directory
pub fn read_archive_bytes(bytes: &[u8]) -> Result<FileMap> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut raw = FileMap::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path()?.to_string_lossy().replace('\\', "/");
        if path.split('/').any(|part| part == "..") {
            return Err(CoreError::InvalidArchive {
                path: "<memory>".to_string(),
                message: format!("entry escapes the archive root: {}", path),
            });
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        raw.insert(path.trim_start_matches("./").to_string(), data);
    }

    strip_top_level(raw)
}

/// Drop the single top-level directory every chart archive carries
fn strip_top_level(raw: FileMap) -> Result<FileMap> {
    if raw.contains_key(CHART_FILE) {
        return Ok(raw);
    }

    let root = raw
        .keys()
        .find_map(|k| k.strip_suffix(&format!("/{}", CHART_FILE)))
        .filter(|prefix| !prefix.contains('/'))
        .map(str::to_string)
        .ok_or_else(|| CoreError::InvalidArchive {
            path: "<memory>".to_string(),
            message: format!("no {} found", CHART_FILE),
        })?;

    let prefix = format!("{}/", root);
    Ok(raw
        .into_iter()
        .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rest| (rest.to_string(), v)))
        .collect())
}

/// Package a chart directory into `output`
///
/// Entries are written under `<chart name>/` with a zero mtime so that
/// packaging the same directory twice yields identical bytes.
pub fn create_archive(chart_dir: &Path, output: &Path) -> Result<PathBuf> {
    let chart = Chart::load(chart_dir)?;

    let file = File::create(output)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);

    let mut entries: Vec<PathBuf> = walkdir::WalkDir::new(chart_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    entries.sort();

    for path in entries {
        let rel = path
            .strip_prefix(chart_dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        let content = std::fs::read(&path)?;
        add_bytes_to_archive(&mut builder, &format!("{}/{}", chart.name(), rel), &content)?;
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;

    Ok(output.to_path_buf())
}

fn add_bytes_to_archive<W: Write>(
    builder: &mut Builder<W>,
    archive_path: &str,
    content: &[u8],
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();

    builder.append_data(&mut header, archive_path, content)?;

    Ok(())
}

/// Default archive filename for a chart
#[must_use]
pub fn default_archive_name(chart: &Chart) -> String {
    format!("{}-{}.tgz", chart.name(), chart.version())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_chart(dir: &Path) {
        std::fs::write(
            dir.join("Chart.yaml"),
            "apiVersion: rudder/v1\nkind: application\nmetadata:\n  name: web\n  version: 1.2.0\n",
        )
        .unwrap();
        std::fs::write(dir.join("values.yaml"), "replicas: 3\n").unwrap();
        std::fs::create_dir_all(dir.join("templates")).unwrap();
        std::fs::write(
            dir.join("templates").join("deployment.yaml"),
            "kind: Deployment\n",
        )
        .unwrap();
    }

    #[test]
    fn test_create_and_read_archive() {
        let temp = TempDir::new().unwrap();
        let chart_dir = temp.path().join("web");
        std::fs::create_dir_all(&chart_dir).unwrap();
        write_chart(&chart_dir);

        let output = temp.path().join("web-1.2.0.tgz");
        create_archive(&chart_dir, &output).unwrap();

        let files = read_archive(&output).unwrap();
        let keys: Vec<_> = files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Chart.yaml", "templates/deployment.yaml", "values.yaml"]);
    }

    #[test]
    fn test_archive_is_reproducible() {
        let temp = TempDir::new().unwrap();
        let chart_dir = temp.path().join("web");
        std::fs::create_dir_all(&chart_dir).unwrap();
        write_chart(&chart_dir);

        let a = temp.path().join("a.tgz");
        let b = temp.path().join("b.tgz");
        create_archive(&chart_dir, &a).unwrap();
        create_archive(&chart_dir, &b).unwrap();

        assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
    }

    #[test]
    fn test_archive_without_chart_file() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("broken.tgz");

        let file = File::create(&output).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        add_bytes_to_archive(&mut builder, "thing/values.yaml", b"a: 1\n").unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        assert!(matches!(
            read_archive(&output),
            Err(CoreError::InvalidArchive { .. })
        ));
    }
}
