use std::{fs::{self, File}, io::{Read, Write}, path::Path};

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

/// Create the directory if it doesn’t exist; error if a non-directory exists there.
pub(crate) fn ensure_dir_exists(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() { bail!("Path exists but is not a directory: {}", path.display()) }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
    }
    Ok(())
}

/// Error unless the directory already exists.
pub(crate) fn require_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() { bail!("Directory does not exist: {}", path.display()) }
    if !path.is_dir() { bail!("Path exists but is not a directory: {}", path.display()) }
    Ok(())
}

/// Computes the SHA-256 hash of a file located at `root/rel_path`.
pub(crate) fn sha256_file(rel_path: &str, root: &Path) -> Result<(String, String)> {
    let full = root.join(rel_path);
    let mut file = File::open(&full)
        .with_context(|| format!("open for hash {}", full.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 1 << 16];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 { break }
        hasher.update(&buf[..n]);
    }
    Ok((rel_path.to_string(), hex::encode(hasher.finalize())))
}

#[inline]
pub(crate) fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Write `bytes` to `path` through a sibling temp file so readers never see a partial artifact.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    ensure_dir_exists(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(bytes)?;
    tmp.persist(path)
        .with_context(|| format!("Failed to persist {}", path.display()))?;
    Ok(())
}

/// Zip every file below `src_dir` into `zip_path`, storing paths relative to `src_dir`.
/// Returns the number of files written.
pub(crate) fn zip_dir(src_dir: &Path, zip_path: &Path) -> Result<usize> {
    require_dir_exists(src_dir)?;
    if let Some(parent) = zip_path.parent() { ensure_dir_exists(parent)? }

    let file = File::create(zip_path)
        .with_context(|| format!("Failed to create {}", zip_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0;
    for entry in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", src_dir.display()))?;
        if !entry.file_type().is_file() || entry.path() == zip_path { continue }

        let rel = entry.path().strip_prefix(src_dir)?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        zip.start_file(rel, options)?;
        zip.write_all(&fs::read(entry.path())?)?;
        count += 1;
    }
    zip.finish().context("Failed to finish zip archive")?;
    Ok(count)
}
