//! Background package preparation: download, then extract

use crate::package::cancel::CancellationToken;
use crate::package::download::DownloadError;
use crate::package::extract::{extract_archive, ExtractError};
use crate::package::workdir::WorkDir;
use crate::registry::ModuleVersion;
use crossbeam_channel::{unbounded, Receiver, Sender};
use reqwest::blocking::Client;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("package preparation was canceled")]
    Canceled,
    #[error("failed to set up work directory: {0}")]
    WorkDir(#[source] std::io::Error),
    #[error("package worker panicked")]
    WorkerPanicked,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrepareEvent {
    /// Download progress, 0.0 to 1.0
    Progress(f32),
    Extracting,
}

/// An extracted package, valid as long as its work directory lives
#[derive(Debug)]
pub struct PreparedPackage {
    pub package_dir: PathBuf,
    pub workdir: WorkDir,
}

enum Source {
    Version { version: ModuleVersion, http: Client },
    Archive(PathBuf),
}

/// Prepares a package on a worker thread
///
/// The caller's thread is never blocked until [`PackagePrepareTask::wait`].
/// Progress is published on [`PackagePrepareTask::events`].
pub struct PackagePrepareTask {
    handle: JoinHandle<Result<PreparedPackage, PrepareError>>,
    events: Receiver<PrepareEvent>,
    cancel: CancellationToken,
}

impl PackagePrepareTask {
    /// Download `version` and extract it into a new directory under `work_parent`
    pub fn from_version(version: ModuleVersion, http: Client, work_parent: &Path) -> Self {
        Self::spawn(Source::Version { version, http }, work_parent.to_path_buf())
    }

    /// Extract a local archive into a new directory under `work_parent`
    pub fn from_archive(archive: impl Into<PathBuf>, work_parent: &Path) -> Self {
        Self::spawn(Source::Archive(archive.into()), work_parent.to_path_buf())
    }

    fn spawn(source: Source, work_parent: PathBuf) -> Self {
        let (tx, rx) = unbounded();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = thread::spawn(move || prepare(source, &work_parent, &token, &tx));
        Self {
            handle,
            events: rx,
            cancel,
        }
    }

    pub fn events(&self) -> &Receiver<PrepareEvent> {
        &self.events
    }

    /// Ask the worker to stop; it gives up at the next chunk boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the worker is done
    ///
    /// On any failure, including cancellation, the work directory is already
    /// gone.
    pub fn wait(self) -> Result<PreparedPackage, PrepareError> {
        self.handle
            .join()
            .map_err(|_| PrepareError::WorkerPanicked)?
    }
}

fn prepare(
    source: Source,
    work_parent: &Path,
    cancel: &CancellationToken,
    events: &Sender<PrepareEvent>,
) -> Result<PreparedPackage, PrepareError> {
    let workdir = WorkDir::new_in(work_parent).map_err(PrepareError::WorkDir)?;

    let archive = match source {
        Source::Archive(path) => path,
        Source::Version { version, http } => {
            let downloads = workdir.subdir("downloads").map_err(PrepareError::WorkDir)?;
            // The receiver may be gone; progress is best effort
            version
                .download_archive(&http, &downloads, cancel, |fraction| {
                    let _ = events.send(PrepareEvent::Progress(fraction));
                })
                .map_err(|e| match e {
                    DownloadError::Canceled { .. } => PrepareError::Canceled,
                    other => PrepareError::Download(other),
                })?
        }
    };

    if cancel.is_canceled() {
        return Err(PrepareError::Canceled);
    }
    let _ = events.send(PrepareEvent::Extracting);

    let extracted = workdir.subdir("package").map_err(PrepareError::WorkDir)?;
    let package_dir = extract_archive(&archive, &extracted)?;
    log::info!("package ready in {}", package_dir.display());

    Ok(PreparedPackage {
        package_dir,
        workdir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::extract::tests::tarball;

    #[test]
    fn test_prepare_from_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("tww.tar.gz");
        tarball(&archive, &[("tww-1.0.0/.tmmt.yaml", "module: tww\n")]);

        let task = PackagePrepareTask::from_archive(&archive, &tmp.path().join("work"));
        let prepared = task.wait().unwrap();
        assert!(prepared.package_dir.join(".tmmt.yaml").is_file());
        assert!(prepared.package_dir.starts_with(prepared.workdir.path()));

        let workdir = prepared.workdir.path().to_path_buf();
        drop(prepared);
        assert!(!workdir.exists());
    }

    #[test]
    fn test_invalid_archive_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("broken.tar.gz");
        std::fs::write(&archive, "nope").unwrap();

        let work = tmp.path().join("work");
        let err = PackagePrepareTask::from_archive(&archive, &work).wait().unwrap_err();
        assert!(matches!(err, PrepareError::Extract(ExtractError::InvalidArchive { .. })));
        assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);
    }

    #[test]
    fn test_canceled_download_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let version = ModuleVersion::branch("http://127.0.0.1:9", "teksi", "wastewater", "main");
        let task = PackagePrepareTask::from_version(version, Client::new(), tmp.path());
        task.cancel();
        // Either the worker saw the flag before the request or after it failed
        match task.wait() {
            Err(PrepareError::Canceled) | Err(PrepareError::Download(_)) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
