//! The Preparing state: working directory and file uploads.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::protocol::{FileChunk, Head};
use crate::supervisor::{SpawnSpec, Supervisor};

use super::{RunningState, SessionError, Workdir};

/// Holds the session head while the client uploads files, then launches
/// the child on `Start`.
#[derive(Debug)]
pub struct PreparingState {
    head: Head,
    // Taken by `start`; `None` afterwards so a late close does not remove
    // a directory the Running state now owns.
    workdir: Option<Workdir>,
}

impl PreparingState {
    /// Enter the Preparing state, resolving the working directory.
    ///
    /// # Errors
    ///
    /// [`SessionError::CreateWorkdir`] when the head carries no path and a
    /// temporary directory cannot be allocated.
    pub fn new(head: Head) -> Result<Self, SessionError> {
        let workdir = Workdir::from_head_path(&head.path)?;
        debug!(path = %workdir.path().display(), allocated = workdir.is_allocated(), "session working directory");
        Ok(Self {
            head,
            workdir: Some(workdir),
        })
    }

    /// The resolved working directory.
    #[must_use]
    pub fn workdir_path(&self) -> &Path {
        self.workdir
            .as_ref()
            .map_or_else(|| Path::new(""), Workdir::path)
    }

    /// Write one uploaded chunk to disk.
    ///
    /// Relative targets are joined to the working directory. Parent
    /// directories are created with mode 0700; the file is created 0600,
    /// or 0700 when marked executable. The first chunk of an upload
    /// truncates, later chunks append.
    ///
    /// # Errors
    ///
    /// [`SessionError::WriteFile`] on any filesystem failure.
    pub(crate) async fn apply_file(&self, file: &FileChunk) -> Result<(), SessionError> {
        let target = self.resolve_target(&file.filename);
        let write_err = |source| SessionError::WriteFile {
            filename: target.display().to_string(),
            source,
        };

        if let Some(parent) = target.parent() {
            let mut dirs = tokio::fs::DirBuilder::new();
            dirs.recursive(true);
            dirs.mode(0o700);
            dirs.create(parent).await.map_err(write_err)?;
        }

        debug!(path = %target.display(), bytes = file.content.len(), "writing uploaded file");

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).write(true);
        if file.truncate {
            options.truncate(true);
        } else {
            options.append(true);
        }
        options.mode(if file.executable { 0o700 } else { 0o600 });

        let mut out = options.open(&target).await.map_err(write_err)?;
        tokio::io::AsyncWriteExt::write_all(&mut out, &file.content)
            .await
            .map_err(write_err)
    }

    /// Launch the child and hand the working directory over to the Running
    /// state.
    ///
    /// # Errors
    ///
    /// [`SessionError::Spawn`] when the child cannot be started; this state
    /// keeps the directory (and the duty to clean it) in that case.
    pub(crate) fn start(&mut self) -> Result<RunningState, SessionError> {
        let workdir = self
            .workdir
            .take()
            .ok_or(SessionError::UnexpectedEvent("start"))?;
        let spec = SpawnSpec::from_head(&self.head, workdir.path());
        match Supervisor::spawn(spec) {
            Ok((supervisor, output)) => Ok(RunningState::new(supervisor, output, workdir)),
            Err(err) => {
                self.workdir = Some(workdir);
                Err(err.into())
            }
        }
    }

    /// Remove the working directory if this session allocated it and still
    /// owns it.
    ///
    /// # Errors
    ///
    /// [`SessionError::RemoveWorkdir`] when removal fails.
    pub(crate) fn close(&mut self) -> Result<(), SessionError> {
        match self.workdir.as_mut() {
            Some(workdir) => workdir.cleanup(),
            None => Ok(()),
        }
    }

    fn resolve_target(&self, filename: &str) -> PathBuf {
        let path = Path::new(filename);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir_path().join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;
    use crate::protocol::Head;

    fn preparing_in(dir: &Path) -> PreparingState {
        PreparingState::new(Head {
            command: "true".into(),
            path: dir.to_str().map(ToString::to_string).unwrap_or_default(),
            ..Default::default()
        })
        .unwrap()
    }

    fn chunk(filename: &str, content: &[u8], truncate: bool, executable: bool) -> FileChunk {
        FileChunk {
            filename: filename.to_string(),
            content: content.to_vec(),
            executable,
            truncate,
        }
    }

    #[tokio::test]
    async fn relative_upload_lands_in_the_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let state = preparing_in(dir.path());

        state
            .apply_file(&chunk("hello.txt", b"hello", true, false))
            .await
            .unwrap();

        let target = dir.path().join("hello.txt");
        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn executable_upload_gets_mode_0700() {
        let dir = tempfile::tempdir().unwrap();
        let state = preparing_in(dir.path());

        state
            .apply_file(&chunk("run.sh", b"#!/bin/sh\necho hi\n", true, true))
            .await
            .unwrap();

        let mode = std::fs::metadata(dir.path().join("run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn later_chunks_append_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let state = preparing_in(dir.path());

        state
            .apply_file(&chunk("data.bin", b"first-", true, false))
            .await
            .unwrap();
        state
            .apply_file(&chunk("data.bin", b"second", false, false))
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(dir.path().join("data.bin")).unwrap(),
            b"first-second"
        );
    }

    #[tokio::test]
    async fn truncate_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let state = preparing_in(dir.path());

        state
            .apply_file(&chunk("data.bin", b"old content", true, false))
            .await
            .unwrap();
        state
            .apply_file(&chunk("data.bin", b"new", true, false))
            .await
            .unwrap();

        assert_eq!(std::fs::read(dir.path().join("data.bin")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn parent_directories_are_created_0700() {
        let dir = tempfile::tempdir().unwrap();
        let state = preparing_in(dir.path());

        state
            .apply_file(&chunk("nested/deeper/file.txt", b"x", true, false))
            .await
            .unwrap();

        let parent = dir.path().join("nested/deeper");
        assert!(parent.is_dir());
        let mode = std::fs::metadata(&parent).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn absolute_target_ignores_the_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let state = preparing_in(dir.path());

        let target = other.path().join("absolute.txt");
        state
            .apply_file(&chunk(
                target.to_str().unwrap(),
                b"absolute",
                true,
                false,
            ))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"absolute");
        assert!(!dir.path().join("absolute.txt").exists());
    }

    #[tokio::test]
    async fn write_failure_names_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let state = preparing_in(dir.path());

        // A directory already occupies the target path.
        std::fs::create_dir(dir.path().join("occupied")).unwrap();
        let err = state
            .apply_file(&chunk("occupied", b"x", true, false))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("occupied"));
    }
}
