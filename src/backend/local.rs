//! Local disk backend
//!
//! Copies are written to a `<name>.part` sibling, flushed to disk, stamped
//! with the source modification time and then renamed into place, so a
//! reader never observes a half-written target.

use super::{
    cancelled, check_copy_source, map_io_error, stream_into, Backend, BackendKind, BackendResult,
    CopyContext, ReadStream,
};
use crate::copy::CopyOutcome;
use crate::types::{BackendError, DirectoryDescriptor, FileDescriptor};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use std::fs::{self, File};
use std::io::ErrorKind;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// Backend over the local filesystem
#[derive(Debug, Default, Clone)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Lexically normalize a local path: duplicate separators, `.` segments and
/// trailing separators are dropped, `..` pops the previous segment.
fn normalize_local(raw: &str) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in Utf8Path::new(raw).components() {
        match component {
            Utf8Component::Prefix(_) | Utf8Component::RootDir => out.push(component.as_str()),
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if out.file_name().is_some() {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Utf8Component::Normal(name) => out.push(name),
        }
    }
    if out.as_str().is_empty() {
        out.push(".");
    }
    out
}

fn parent_of(path: &Utf8Path) -> Option<String> {
    path.parent()
        .filter(|p| !p.as_str().is_empty())
        .map(|p| p.to_string())
}

fn name_of(path: &Utf8Path) -> String {
    path.file_name().unwrap_or_default().to_string()
}

fn part_path(target: &Utf8Path) -> Utf8PathBuf {
    let mut name = name_of(target);
    name.push_str(".part");
    target.with_file_name(name)
}

fn describe_file(path: &Utf8Path, metadata: &fs::Metadata) -> FileDescriptor {
    FileDescriptor::new(
        name_of(path),
        path.as_str(),
        parent_of(path).unwrap_or_default(),
        metadata.len(),
        metadata.modified().unwrap_or(UNIX_EPOCH),
    )
}

fn describe_directory(path: &Utf8Path, exists: bool) -> DirectoryDescriptor {
    DirectoryDescriptor::new(name_of(path), path.as_str(), parent_of(path), exists)
}

impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn normalize(&self, path: &str) -> String {
        normalize_local(path).into_string()
    }

    fn resolve_file(&self, path: &str) -> FileDescriptor {
        let path = normalize_local(path);
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => describe_file(&path, &metadata),
            _ => FileDescriptor::missing(
                name_of(&path),
                path.as_str(),
                parent_of(&path).unwrap_or_default(),
            ),
        }
    }

    fn resolve_directory(&self, path: &str) -> DirectoryDescriptor {
        let path = normalize_local(path);
        describe_directory(&path, path.is_dir())
    }

    fn file_exists(&self, path: &str) -> bool {
        normalize_local(path).is_file()
    }

    fn directory_exists(&self, path: &str) -> bool {
        normalize_local(path).is_dir()
    }

    fn list_files(&self, dir: &DirectoryDescriptor) -> BackendResult<Vec<FileDescriptor>> {
        let mut files = Vec::new();
        for (path, metadata) in read_children(dir.full_path())? {
            if metadata.is_file() {
                files.push(describe_file(&path, &metadata));
            }
        }
        Ok(files)
    }

    fn list_directories(
        &self,
        dir: &DirectoryDescriptor,
    ) -> BackendResult<Vec<DirectoryDescriptor>> {
        Ok(read_children(dir.full_path())?
            .into_iter()
            .filter(|(_, metadata)| metadata.is_dir())
            .map(|(path, _)| describe_directory(&path, true))
            .collect())
    }

    fn try_create_directory(
        &self,
        source_dir: &DirectoryDescriptor,
        target_parent: &DirectoryDescriptor,
    ) -> BackendResult<bool> {
        if !super::path::is_valid_name(source_dir.name()) {
            return Err(BackendError::Precondition(format!(
                "cannot create directory named {:?}",
                source_dir.name()
            )));
        }
        let parent = normalize_local(target_parent.full_path());
        if !parent.is_dir() {
            debug!(path = %parent, "parent directory missing");
            return Ok(false);
        }
        let path = parent.join(source_dir.name());
        if path.is_dir() {
            return Ok(true);
        }

        match fs::create_dir(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(path = %path, "a file is in the way of the new directory");
                Ok(false)
            }
            Err(e) => Err(map_io_error(path.as_str(), e)),
        }
    }

    fn try_delete_file(&self, file: &FileDescriptor) -> BackendResult<bool> {
        let path = normalize_local(file.full_path());
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_io_error(path.as_str(), e)),
        }
    }

    fn try_delete_directory(&self, dir: &DirectoryDescriptor) -> BackendResult<bool> {
        let path = normalize_local(dir.full_path());
        if path.parent().is_none() {
            return Err(BackendError::Precondition(format!(
                "refusing to delete {path}"
            )));
        }
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_io_error(path.as_str(), e)),
        }
    }

    fn try_copy_file(
        &self,
        source: &dyn Backend,
        file: &FileDescriptor,
        target_dir: &DirectoryDescriptor,
        ctx: &CopyContext,
    ) -> BackendResult<bool> {
        check_copy_source(file)?;
        let dir = normalize_local(target_dir.full_path());
        if !dir.is_dir() {
            debug!(path = %dir, "target directory missing");
            return Ok(false);
        }
        let target = dir.join(file.name());
        if target.is_dir() {
            warn!(path = %target, "a directory is in the way of the copy");
            return Ok(false);
        }

        let part = part_path(&target);
        let result = write_part(source, file, &target, &part, ctx);
        match result {
            Ok(()) => Ok(true),
            Err(err) => {
                // The .part file may not exist yet.
                let _ = fs::remove_file(&part);
                if !err.is_cancelled() {
                    warn!(path = %target, error = %err, "copy failed");
                }
                Err(err)
            }
        }
    }

    fn open_read(&self, file: &FileDescriptor) -> BackendResult<ReadStream> {
        let path = normalize_local(file.full_path());
        let handle = File::open(&path).map_err(|e| map_io_error(path.as_str(), e))?;
        Ok(Box::new(handle))
    }
}

/// Direct children of `dir` with their (symlink-following) metadata
fn read_children(dir: &str) -> BackendResult<Vec<(Utf8PathBuf, fs::Metadata)>> {
    let dir = normalize_local(dir);
    let entries = fs::read_dir(&dir).map_err(|e| map_io_error(dir.as_str(), e))?;

    let mut children = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| map_io_error(dir.as_str(), e))?;
        let Ok(name) = entry.file_name().into_string() else {
            warn!(dir = %dir, "skipping entry with a non UTF-8 name");
            continue;
        };
        let path = dir.join(&name);
        match fs::metadata(&path) {
            Ok(metadata) => children.push((path, metadata)),
            // Broken symlinks and entries removed since read_dir
            Err(e) => debug!(path = %path, error = %e, "skipping unreadable entry"),
        }
    }
    Ok(children)
}

fn write_part(
    source: &dyn Backend,
    file: &FileDescriptor,
    target: &Utf8Path,
    part: &Utf8Path,
    ctx: &CopyContext,
) -> BackendResult<()> {
    let io_err = |e: std::io::Error| map_io_error(target.as_str(), e);

    let mut part_file = File::create(part).map_err(io_err)?;
    let outcome = stream_into(source, file, target.as_str(), &mut part_file, ctx)?;
    if let CopyOutcome::Cancelled { .. } = outcome {
        return Err(cancelled(target.as_str(), outcome));
    }

    part_file.sync_all().map_err(io_err)?;
    drop(part_file);

    if source.kind() == BackendKind::Local {
        if let Ok(metadata) = fs::metadata(file.full_path()) {
            fs::set_permissions(part, metadata.permissions()).map_err(io_err)?;
        }
    }
    let mtime = filetime::FileTime::from_system_time(file.modified());
    filetime::set_file_mtime(part, mtime).map_err(io_err)?;

    fs::rename(part, target).map_err(io_err)?;
    Ok(())
}
