//! # md2epub Library
//!
//! Builds an EPUB book from a directory of Markdown chapters:
//!
//! ```text
//! books/My Book/
//! ├── SUMMARY.md          table of contents driving page order
//! ├── intro.md
//! ├── part1/setup.md
//! └── res/
//!     ├── css/style.css   optional stylesheet
//!     └── images/cover.jpg  optional, fetched from Unsplash when missing
//! ```
//!
//! The book is written to `out/<title>.epub`; an earlier build at that path
//! is renamed with a timestamp suffix first.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use md2epub::{Config, run_md2epub};
//! use std::path::PathBuf;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::new("My Book", "Jane Roe", PathBuf::from("books/My Book"));
//!     config.no_cover = true;
//!
//!     let written = run_md2epub(&config).await?;
//!     println!("{}", written.display());
//!     Ok(())
//! }
//! ```

pub mod assemble;
pub mod backup;
pub mod book;
pub mod cli;
pub mod content;
#[cfg(feature = "cover")]
pub mod cover;
pub mod error;
pub mod outline;
pub mod utils;
pub mod writer;
pub mod xhtml;

pub use assemble::{assemble, write_book};
pub use backup::backup_existing;
pub use book::{Book, Page, PageId};
pub use cli::Config;
pub use content::{Content, resolve_content};
pub use error::{Error, OutlineError, Result};
pub use outline::{Outline, OutlineEntry, OutlineOptions};
pub use writer::EpubWriter;

use log::{debug, info};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;

/// Builds the book described by `config` and returns the path written.
pub async fn run_md2epub(config: &Config) -> Result<PathBuf> {
    let mut book = Book::new(config.title.as_str(), config.author.as_str())
        .with_language(config.language.as_str());

    if !config.no_cover {
        let cover_path = config.cover_path();

        #[cfg(feature = "cover")]
        {
            if !cover::ensure_cover(&config.unsplash, &cover_path).await {
                return Err(Error::CoverNotFound(cover_path));
            }
        }

        let cover = fs::read(&cover_path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::CoverNotFound(cover_path.clone()),
            _ => Error::io(&cover_path, e),
        })?;
        book.set_cover(cover);
    }

    let stylesheet_path = config.stylesheet_path();
    match fs::read_to_string(&stylesheet_path).await {
        Ok(css) => book.set_stylesheet(css),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No stylesheet at {}", stylesheet_path.display());
        }
        Err(e) => return Err(Error::io(&stylesheet_path, e)),
    }

    let outline = Outline::from_file(&config.summary_path(), &config.outline).await?;
    assemble(&mut book, &outline, &config.base_dir).await?;

    let output_path = config.output_path();
    if let Some(backup) = write_book(&book, &output_path).await? {
        info!("Previous build kept at {}", backup.display());
    }
    Ok(output_path)
}
