//! Book assembly: outline entries become pages, then the book is written.

use crate::backup::backup_existing;
use crate::book::{Book, PageId};
use crate::content::resolve_content;
use crate::error::{Error, Result};
use crate::outline::{Outline, OutlineEntry};
use log::{info, warn};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;

/// Adds one page per outline entry, in outline order, nesting children
/// under their parent's page.
pub async fn assemble(book: &mut Book, outline: &Outline, base_dir: &Path) -> Result<()> {
    if outline.is_empty() {
        warn!("Outline has no entries, the book will only have a cover");
    }

    for entry in outline.entries() {
        add_entry(book, base_dir, entry, None).await?;
    }

    info!(
        "Assembled {} pages and {} images",
        book.pages().len(),
        book.images().len()
    );
    Ok(())
}

/// Uses Box::pin for async recursion.
fn add_entry<'a>(
    book: &'a mut Book,
    base_dir: &'a Path,
    entry: &'a OutlineEntry,
    parent: Option<PageId>,
) -> Pin<Box<dyn Future<Output = Result<()>> + 'a>> {
    Box::pin(async move {
        let content = resolve_content(book, base_dir, &entry.link, &entry.title).await?;
        let page = book.add_page(entry.title.as_str(), content.into_body(), parent);

        for child in &entry.children {
            add_entry(book, base_dir, child, Some(page)).await?;
        }
        Ok(())
    })
}

/// Writes `book` to `output_path`, backing up whatever was there before.
///
/// Returns the backup location, if a previous build was moved aside.
pub async fn write_book(book: &Book, output_path: &Path) -> Result<Option<PathBuf>> {
    if let Some(dir) = output_path.parent() {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::io(dir, e))?;
        info!("out dir: {}", dir.display());
    }

    let backup = backup_existing(output_path).await?;
    book.save(output_path).await?;
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline::OutlineOptions;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_pages_follow_outline_order() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A\n").unwrap();
        std::fs::write(dir.path().join("a1.md"), "# A1\n").unwrap();

        let outline = Outline::parse(
            "# Summary\n- [A](a.md)\n  - [A1](a1.md)\n  - [A2](missing.md)\n- Part B\n",
            &OutlineOptions::default(),
        )
        .unwrap();

        let mut book = Book::new("T", "A");
        assemble(&mut book, &outline, dir.path()).await.unwrap();

        let pages = book.pages();
        let titles: Vec<_> = pages.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, ["A", "A1", "A2", "Part B"]);
        assert_eq!(pages[1].parent, Some(pages[0].id));
        assert_eq!(pages[2].parent, Some(pages[0].id));
        assert_eq!(pages[3].parent, None);
        assert!(pages[1].body.contains("<h1>A1</h1>"));
        assert_eq!(pages[2].body, "<h1>A2</h1>");
    }

    #[tokio::test]
    async fn test_write_book_backs_up_previous_build() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out").join("T.epub");

        let book = Book::new("T", "A");
        assert!(write_book(&book, &output).await.unwrap().is_none());
        let first = std::fs::read(&output).unwrap();

        let backup = write_book(&book, &output).await.unwrap().unwrap();
        assert!(output.exists());
        assert_eq!(std::fs::read(&backup).unwrap(), first);
    }
}
