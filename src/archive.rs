//! `archive` and `extract`: whole-folder zip and gzipped tar archives.
//!
//! Both directions are all-or-nothing. Archives are written to a temporary
//! file next to the final output and renamed into place once complete;
//! extraction unpacks into a staging directory inside the destination and
//! only moves entries out once every one of them has been unpacked.

use crate::config::CompiledFilters;
use crate::error::WalkError;
use crate::walker::TreeWalker;
use clap::ValueEnum;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::{debug, info, warn};
use serde::Serialize;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Zip,
    /// Gzip-compressed tar.
    Tar,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => ".zip",
            ArchiveFormat::Tar => ".tar.gz",
        }
    }

    /// Detects the format from the archive's file name.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::Tar)
        } else {
            None
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("archive not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("unsupported archive format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("unsafe member path in archive: {0}")]
    UnsafeEntry(String),

    #[error("cannot read {}", .0.display())]
    Unreadable(PathBuf),

    #[error(transparent)]
    Walk(#[from] WalkError),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub trait Archiver {
    /// Packs `folder` into `out_dir` and returns the archive's path.
    fn create(
        &self,
        folder: &Path,
        format: ArchiveFormat,
        out_dir: &Path,
    ) -> Result<PathBuf, ArchiveError>;

    /// Unpacks `archive` into `dest` and returns `dest`.
    fn extract(&self, archive: &Path, dest: &Path) -> Result<PathBuf, ArchiveError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardArchiver;

/// A file to pack: where it is and the member name it gets.
struct Member {
    path: PathBuf,
    name: String,
}

impl StandardArchiver {
    fn members(folder: &Path, prefix: &str) -> Result<Vec<Member>, ArchiveError> {
        let report = TreeWalker::new(folder)
            .filters(CompiledFilters::allow_all())
            .collect()?;
        if let Some((path, reason)) = report.skipped.first() {
            warn!("cannot archive {}: {}", path.display(), reason);
            return Err(ArchiveError::Unreadable(path.clone()));
        }

        Ok(report
            .files
            .into_iter()
            .map(|file| {
                let relative = file.path.strip_prefix(folder).unwrap_or(&file.path);
                let mut name = prefix.to_string();
                for component in relative.components() {
                    name.push('/');
                    name.push_str(&component.as_os_str().to_string_lossy());
                }
                Member {
                    path: file.path,
                    name,
                }
            })
            .collect())
    }

    fn write_zip(members: &[Member], out: &mut File) -> Result<(), ArchiveError> {
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        let mut writer = zip::ZipWriter::new(out);
        for member in members {
            debug!("adding {}", member.name);
            writer.start_file(member.name.as_str(), options)?;
            let mut source = File::open(&member.path).map_err(io_err(&member.path))?;
            io::copy(&mut source, &mut writer).map_err(io_err(&member.path))?;
        }
        writer.finish()?;
        Ok(())
    }

    fn write_tar(members: &[Member], out: &mut File, out_path: &Path) -> Result<(), ArchiveError> {
        let encoder = GzEncoder::new(out, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for member in members {
            debug!("adding {}", member.name);
            builder
                .append_path_with_name(&member.path, &member.name)
                .map_err(io_err(&member.path))?;
        }
        let mut encoder = builder.into_inner().map_err(io_err(out_path))?;
        encoder.flush().map_err(io_err(out_path))?;
        encoder.finish().map_err(io_err(out_path))?;
        Ok(())
    }

    fn unpack_zip(archive: &Path, staging: &Path) -> Result<(), ArchiveError> {
        let file = File::open(archive).map_err(io_err(archive))?;
        let mut zip = zip::ZipArchive::new(file)?;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            let relative = entry
                .enclosed_name()
                .ok_or_else(|| ArchiveError::UnsafeEntry(entry.name().to_string()))?;
            let target = staging.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(io_err(&target))?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            let mut out = File::create(&target).map_err(io_err(&target))?;
            io::copy(&mut entry, &mut out).map_err(io_err(&target))?;
        }
        Ok(())
    }

    fn unpack_tar(archive: &Path, staging: &Path) -> Result<(), ArchiveError> {
        let file = File::open(archive).map_err(io_err(archive))?;
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        for entry in tar.entries().map_err(io_err(archive))? {
            let mut entry = entry.map_err(io_err(archive))?;
            let path = entry.path().map_err(io_err(archive))?.into_owned();
            if !is_enclosed(&path) {
                return Err(ArchiveError::UnsafeEntry(path.display().to_string()));
            }

            let kind = entry.header().entry_type();
            if !(kind.is_file() || kind.is_dir()) {
                warn!("skipping {} (unsupported entry type)", path.display());
                continue;
            }
            if !entry.unpack_in(staging).map_err(io_err(&path))? {
                return Err(ArchiveError::UnsafeEntry(path.display().to_string()));
            }
        }
        Ok(())
    }
}

/// Renames every `names` entry from `from_dir` into `to_dir`.
///
/// If one rename fails, the entries already moved are put back, so either
/// all of them end up in `to_dir` or none do.
fn move_all(from_dir: &Path, to_dir: &Path, names: &[OsString]) -> Result<(), ArchiveError> {
    for (moved, name) in names.iter().enumerate() {
        let to = to_dir.join(name);
        if let Err(e) = fs::rename(from_dir.join(name), &to) {
            for done in &names[..moved] {
                if let Err(undo) = fs::rename(to_dir.join(done), from_dir.join(done)) {
                    warn!("could not roll back {}: {}", to_dir.join(done).display(), undo);
                }
            }
            return Err(ArchiveError::Io {
                path: to,
                source: e,
            });
        }
    }
    Ok(())
}

/// A relative path that stays below the directory it is joined to.
fn is_enclosed(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl Archiver for StandardArchiver {
    fn create(
        &self,
        folder: &Path,
        format: ArchiveFormat,
        out_dir: &Path,
    ) -> Result<PathBuf, ArchiveError> {
        if !folder.is_dir() {
            return Err(ArchiveError::NotADirectory(folder.to_path_buf()));
        }
        let folder = fs::canonicalize(folder).map_err(io_err(folder))?;
        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ArchiveError::NotADirectory(folder.clone()))?;

        let output = out_dir.join(format!("{}{}", name, format.extension()));
        if output.symlink_metadata().is_ok() {
            return Err(ArchiveError::AlreadyExists(output));
        }

        let members = Self::members(&folder, &name)?;
        fs::create_dir_all(out_dir).map_err(io_err(out_dir))?;
        let mut staged = NamedTempFile::new_in(out_dir).map_err(io_err(out_dir))?;

        match format {
            ArchiveFormat::Zip => Self::write_zip(&members, staged.as_file_mut())?,
            ArchiveFormat::Tar => Self::write_tar(&members, staged.as_file_mut(), &output)?,
        }
        staged.as_file().sync_all().map_err(io_err(&output))?;

        staged.persist_noclobber(&output).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                ArchiveError::AlreadyExists(output.clone())
            } else {
                ArchiveError::Io {
                    path: output.clone(),
                    source: e.error,
                }
            }
        })?;

        info!(
            "archived {} files from {} into {}",
            members.len(),
            folder.display(),
            output.display()
        );
        Ok(output)
    }

    fn extract(&self, archive: &Path, dest: &Path) -> Result<PathBuf, ArchiveError> {
        if !archive.is_file() {
            return Err(ArchiveError::NotFound(archive.to_path_buf()));
        }
        let format = ArchiveFormat::detect(archive)
            .ok_or_else(|| ArchiveError::UnsupportedFormat(archive.to_path_buf()))?;

        fs::create_dir_all(dest).map_err(io_err(dest))?;
        let staging = tempfile::Builder::new()
            .prefix(".tidykit-extract-")
            .tempdir_in(dest)
            .map_err(io_err(dest))?;

        match format {
            ArchiveFormat::Zip => Self::unpack_zip(archive, staging.path())?,
            ArchiveFormat::Tar => Self::unpack_tar(archive, staging.path())?,
        }

        let mut top_level = Vec::new();
        for entry in fs::read_dir(staging.path()).map_err(io_err(staging.path()))? {
            let entry = entry.map_err(io_err(staging.path()))?;
            top_level.push(entry.file_name());
        }
        top_level.sort();

        for name in &top_level {
            let target = dest.join(name);
            if target.symlink_metadata().is_ok() {
                return Err(ArchiveError::AlreadyExists(target));
            }
        }
        move_all(staging.path(), dest, &top_level)?;

        info!(
            "extracted {} into {} ({} top-level entries)",
            archive.display(),
            dest.display(),
            top_level.len()
        );
        Ok(dest.to_path_buf())
    }
}
