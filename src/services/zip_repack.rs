//! Re-packages price-tag archives so handheld terminals can unpack them.
//!
//! Archives produced by the back office carry Windows attributes that the
//! terminal's unzip rejects. Each archive is extracted into a scratch folder
//! and a fresh Deflate archive with Unix permissions is written next to it.
//! Only once that write succeeds is the original deleted and the new archive
//! moved into place, renamed with today's date when the name follows the
//! five-part `store-dept-kind-batch-seq` convention.

use chrono::{DateTime, Datelike, Local, NaiveDate, Timelike};
use path_slash::PathExt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

#[derive(Debug, Error)]
pub enum RepackError {
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

fn io_err<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> RepackError + 'a {
    move |source| RepackError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

/// `a-b-c-d-e.zip` becomes `a-b-c-d-<yyMMdd>-e.zip`; any other name is kept.
pub fn renamed_file_name(file_name: &str, today: NaiveDate) -> String {
    let stem = strip_zip_suffix(file_name);
    let parts: Vec<&str> = stem.split('-').collect();
    if parts.len() != 5 {
        return file_name.to_string();
    }
    format!(
        "{}-{}-{}-{}-{}-{}.zip",
        parts[0],
        parts[1],
        parts[2],
        parts[3],
        today.format("%y%m%d"),
        parts[4]
    )
}

fn strip_zip_suffix(file_name: &str) -> &str {
    let cut = file_name.len().saturating_sub(4);
    match file_name.get(cut..) {
        Some(ext) if ext.eq_ignore_ascii_case(".zip") => &file_name[..cut],
        _ => file_name,
    }
}

/// Hidden sibling the new archive is written to before it replaces the source.
fn partial_path(target: &Path) -> PathBuf {
    target.with_file_name(format!(".{}.part", crate::utils::file_name_of(target)))
}

/// Scratch folder removed when dropped, on success and on error.
struct ScratchDir(PathBuf);

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.0.exists() {
            if let Err(e) = fs::remove_dir_all(&self.0) {
                tracing::warn!("Failed to remove {}: {}", self.0.display(), e);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZipRepacker {
    tmp_root: PathBuf,
}

impl ZipRepacker {
    /// `tmp_root` is usually `<base>/tmp`.
    pub fn new(tmp_root: impl Into<PathBuf>) -> Self {
        Self {
            tmp_root: tmp_root.into(),
        }
    }

    /// Repack `source` in place and return the path of the archive written.
    pub fn repack(&self, source: &Path, today: NaiveDate) -> Result<PathBuf, RepackError> {
        let file_name = crate::utils::file_name_of(source);
        let target = source.with_file_name(renamed_file_name(&file_name, today));

        let scratch = ScratchDir(self.tmp_root.join(format!("extract_{}", file_name)));
        if scratch.0.exists() {
            fs::remove_dir_all(&scratch.0).map_err(io_err("clear", &scratch.0))?;
        }
        fs::create_dir_all(&scratch.0).map_err(io_err("create", &scratch.0))?;

        {
            let file = File::open(source).map_err(io_err("open", source))?;
            let mut archive = ZipArchive::new(file)?;
            archive.extract(&scratch.0)?;
        }

        let partial = partial_path(&target);
        if let Err(e) = write_archive(&scratch.0, &partial) {
            if partial.exists() {
                let _ = fs::remove_file(&partial);
            }
            return Err(e);
        }
        fs::remove_file(source).map_err(io_err("delete", source))?;
        fs::rename(&partial, &target).map_err(io_err("rename", &partial))?;
        tracing::info!("Repacked {} -> {}", source.display(), target.display());
        Ok(target)
    }
}

/// Directory and file entries under `root`, parents before children and each
/// folder's subdirectories listed before its files.
fn walk(root: &Path) -> Result<Vec<(PathBuf, bool)>, RepackError> {
    let mut entries = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_err("list", &dir))? {
            let path = entry.map_err(io_err("list", &dir))?.path();
            if path.is_dir() {
                dirs.push(path);
            } else {
                files.push(path);
            }
        }
        dirs.sort();
        files.sort();

        entries.extend(dirs.iter().map(|d| (d.clone(), true)));
        entries.extend(files.into_iter().map(|f| (f, false)));
        pending.extend(dirs.into_iter().rev());
    }

    Ok(entries)
}

fn modified_time(path: &Path) -> Option<zip::DateTime> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let local: DateTime<Local> = modified.into();
    zip::DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

fn write_archive(root: &Path, target: &Path) -> Result<(), RepackError> {
    let out = File::create(target).map_err(io_err("create", target))?;
    let mut writer = ZipWriter::new(out);
    let base = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (path, is_dir) in walk(root)? {
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let name = relative.to_slash_lossy().into_owned();

        if is_dir {
            writer.add_directory(format!("{}/", name), base.unix_permissions(DIR_MODE))?;
            continue;
        }

        let mut options = base.unix_permissions(FILE_MODE);
        if let Some(time) = modified_time(&path) {
            options = options.last_modified_time(time);
        }
        writer.start_file(name, options)?;
        let mut input = File::open(&path).map_err(io_err("read", &path))?;
        io::copy(&mut input, &mut writer).map_err(io_err("write", target))?;
    }

    writer.finish()?;
    Ok(())
}
