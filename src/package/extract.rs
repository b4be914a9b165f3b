//! Archive extraction
//!
//! Gzip tarballs (what the hosting API serves) and zip files (what a browser
//! download gives) are told apart by their leading bytes, not the file name.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};

const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Zip,
    Tarball,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("{path} is not a valid gzip tarball: {source}")]
    InvalidArchive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is not a valid zip archive: {source}")]
    InvalidZip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("{path} contains no files")]
    EmptyArchive { path: PathBuf },
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Anything that does not start like a zip is treated as a gzip tarball
fn sniff_format(file: &mut File) -> io::Result<ArchiveFormat> {
    let mut magic = [0u8; 4];
    let read = file.read(&mut magic)?;
    file.rewind()?;
    Ok(if read == magic.len() && magic == ZIP_MAGIC {
        ArchiveFormat::Zip
    } else {
        ArchiveFormat::Tarball
    })
}

/// Unpack a gzip tarball or zip file into `destination` and return the
/// package directory
///
/// Source-hosting archives wrap everything in one `<repo>-<ref>/` directory;
/// when the archive has exactly one top-level directory, that directory is
/// the package. Otherwise `destination` itself is.
pub fn extract_archive(archive: &Path, destination: &Path) -> Result<PathBuf, ExtractError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ExtractError::Io { path, source }
    };
    let mut file = File::open(archive).map_err(io_err(archive))?;
    let format = sniff_format(&mut file).map_err(io_err(archive))?;
    fs::create_dir_all(destination).map_err(io_err(destination))?;

    match format {
        ArchiveFormat::Tarball => tar::Archive::new(GzDecoder::new(file))
            .unpack(destination)
            .map_err(|source| ExtractError::InvalidArchive {
                path: archive.to_path_buf(),
                source,
            })?,
        // `extract` refuses entries escaping `destination`
        ArchiveFormat::Zip => zip::ZipArchive::new(file)
            .and_then(|mut zipped| zipped.extract(destination))
            .map_err(|source| ExtractError::InvalidZip {
                path: archive.to_path_buf(),
                source,
            })?,
    }

    let entries = fs::read_dir(destination)
        .and_then(|entries| entries.map(|e| e.map(|e| e.path())).collect::<io::Result<Vec<_>>>())
        .map_err(io_err(destination))?;

    let package_dir = match entries.as_slice() {
        [] => {
            return Err(ExtractError::EmptyArchive {
                path: archive.to_path_buf(),
            })
        }
        [single] if single.is_dir() => single.clone(),
        _ => destination.to_path_buf(),
    };
    log::debug!(
        "extracted {} ({format:?}) into {}",
        archive.display(),
        package_dir.display()
    );
    Ok(package_dir)
}
