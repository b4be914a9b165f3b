//! Package preparation: turning a module version or a local archive into a
//! package directory the manifest loader can read.

pub mod cancel;
pub mod download;
pub mod extract;
pub mod task;
pub mod workdir;

pub use cancel::CancellationToken;
pub use download::{fetch_to_file, DownloadError};
pub use extract::{extract_archive, ExtractError};
pub use task::{PackagePrepareTask, PrepareError, PrepareEvent, PreparedPackage};
pub use workdir::WorkDir;
