//! Error types for md2epub operations.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while parsing an outline (SUMMARY.md) file.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum OutlineError {
    /// A nested entry without both a `[title]` and a `(link)` segment.
    #[error("malformed outline entry on line {line}: {text:?}")]
    MalformedEntry { line: usize, text: String },
}

/// Errors that can occur while building a book.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Outline(#[from] OutlineError),

    #[error("image {} referenced from {} not found", image.display(), chapter.display())]
    ImageNotFound { image: PathBuf, chapter: PathBuf },

    #[error("cover image not found at {}", .0.display())]
    CoverNotFound(PathBuf),

    #[error("network error: {0}")]
    Network(String),

    #[error("cover API returned status {status} for {url}")]
    CoverApi { status: u16, url: String },

    #[error("cover API returned no photos")]
    NoCoverResults,

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Wraps an I/O error together with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
