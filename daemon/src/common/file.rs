//! Atomic file-store primitives shared by every control-plane writer.
//!
//! All persistent writes are write-temp-then-rename: the temp file is a
//! dotted `.{name}.tmp` sibling of the target, flushed and fsynced before
//! the rename, so a reader that sees a fully-named file always sees a
//! complete document.

use crate::common::error::{
    CreateDir, JsonParse, JsonSerialize, ReadFile, RemoveFile, RenameFile, Result, ScanDir,
    SyncFile, WriteTempFile,
};
use serde::{de::DeserializeOwned, Serialize};
use snafu::ResultExt;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

/// Serialize `value` and atomically replace `path` with it.
pub fn write_json_atomic<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize,
{
    let data = serde_json::to_vec_pretty(value).context(JsonSerialize {
        what: path.display().to_string(),
    })?;
    write_atomic(path, &data)
}

/// Atomically replace `path` with `data` via a dotted temp sibling.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = temp_sibling(path);

    let mut handle = fs::File::create(&tmp).context(WriteTempFile { path: tmp.clone() })?;
    handle
        .write_all(data)
        .context(WriteTempFile { path: tmp.clone() })?;
    handle.sync_all().context(SyncFile { path: tmp.clone() })?;
    drop(handle);

    fs::rename(&tmp, path).context(RenameFile {
        from: tmp,
        to: path.to_path_buf(),
    })
}

/// Read and parse a JSON document, mapping a missing file to `None`.
pub fn read_json_opt<T>(path: &Path) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error).context(ReadFile {
                path: path.to_path_buf(),
            })
        }
    };

    serde_json::from_slice(&data)
        .context(JsonParse {
            path: path.to_path_buf(),
        })
        .map(Some)
}

/// Move a file across sibling control-plane directories with one rename.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).context(RenameFile {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
    })
}

/// Create a directory and all of its parents.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).context(CreateDir {
        path: path.to_path_buf(),
    })
}

/// List the well-formed `*.json` entries of a directory, oldest mtime
/// first with name as the tie-breaker. Dotted names (in-progress temp
/// files) are skipped, as is anything that is not a regular file.
pub fn scan_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).context(ScanDir {
        path: dir.to_path_buf(),
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.context(ScanDir {
            path: dir.to_path_buf(),
        })?;
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if name.starts_with('.') || !name.ends_with(".json") {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => continue,
        };
        let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((mtime, path));
    }

    files.sort_by(|(a_time, a_path), (b_time, b_path)| {
        a_time.cmp(b_time).then_with(|| a_path.cmp(b_path))
    });
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// Unlink temp files older than `max_age` left behind by a crashed
/// writer. Returns how many were collected.
pub fn gc_temp_files(dir: &Path, max_age: Duration) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(error) => {
            return Err(error).context(ScanDir {
                path: dir.to_path_buf(),
            })
        }
    };

    let now = SystemTime::now();
    let mut collected = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if !name.starts_with('.') || !name.ends_with(constants::TEMP_FILE_SUFFIX) {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| now.duration_since(mtime).ok());
        if matches!(age, Some(age) if age > max_age) {
            fs::remove_file(&path).context(RemoveFile { path: path.clone() })?;
            collected += 1;
        }
    }
    Ok(collected)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed");
    path.with_file_name(format!(".{}{}", name, constants::TEMP_FILE_SUFFIX))
}
