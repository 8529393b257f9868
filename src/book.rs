//! In-memory book model.
//!
//! A [`Book`] accumulates metadata, pages and images while the outline is
//! walked, and is serialized once at the end by [`crate::writer`].

use crate::error::{Error, Result};
use crate::writer::EpubWriter;
use log::{debug, info};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Index of a page inside its [`Book`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(usize);

impl PageId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One XHTML page of the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub id: PageId,
    pub title: String,
    /// Body markup, without the surrounding `<html>` document
    pub body: String,
    pub parent: Option<PageId>,
}

impl Page {
    /// File name of the page inside the EPUB content directory.
    pub fn file_name(&self) -> String {
        format!("page_{:04}.xhtml", self.id.0 + 1)
    }
}

/// An image embedded under `images/<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub name: String,
    /// Where the bytes were read from
    pub source: PathBuf,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Book {
    pub title: String,
    pub author: String,
    pub language: String,
    pub identifier: String,
    cover: Option<Vec<u8>>,
    stylesheet: Option<String>,
    pages: Vec<Page>,
    images: Vec<Image>,
}

impl Book {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            language: "en".to_string(),
            identifier: format!("urn:uuid:{}", uuid::Uuid::new_v4()),
            cover: None,
            stylesheet: None,
            pages: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn set_cover(&mut self, data: Vec<u8>) {
        self.cover = Some(data);
    }

    pub fn cover(&self) -> Option<&[u8]> {
        self.cover.as_deref()
    }

    pub fn set_stylesheet(&mut self, css: impl Into<String>) {
        self.stylesheet = Some(css.into());
    }

    pub fn stylesheet(&self) -> Option<&str> {
        self.stylesheet.as_deref()
    }

    /// Appends a page, nested under `parent` when given.
    ///
    /// # Panics
    ///
    /// Panics if `parent` does not belong to this book.
    pub fn add_page(
        &mut self,
        title: impl Into<String>,
        body: impl Into<String>,
        parent: Option<PageId>,
    ) -> PageId {
        if let Some(parent) = parent {
            assert!(parent.0 < self.pages.len(), "unknown parent page {:?}", parent);
        }

        let id = PageId(self.pages.len());
        let title = title.into();
        debug!("Adding page {} ({:?}, parent {:?})", id.0, title, parent);
        self.pages.push(Page {
            id,
            title,
            body: body.into(),
            parent,
        });
        id
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, id: PageId) -> Option<&Page> {
        self.pages.get(id.0)
    }

    /// Pages nested directly under `parent` (top-level pages for `None`).
    pub fn children_of(&self, parent: Option<PageId>) -> impl Iterator<Item = &Page> {
        self.pages.iter().filter(move |p| p.parent == parent)
    }

    /// Registers image bytes and returns the name they are stored under.
    ///
    /// Registering the same source twice returns the existing name. A
    /// different source whose file name is taken gets a numeric suffix.
    pub fn add_image(&mut self, source: &Path, data: Vec<u8>) -> String {
        if let Some(existing) = self.images.iter().find(|img| img.source == source) {
            return existing.name.clone();
        }

        let base = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("image{}", self.images.len()));

        let name = self.unique_image_name(&base);
        debug!("Registering image {} as {}", source.display(), name);
        self.images.push(Image {
            name: name.clone(),
            source: source.to_path_buf(),
            data,
        });
        name
    }

    fn unique_image_name(&self, base: &str) -> String {
        let taken = |name: &str| self.images.iter().any(|img| img.name == name);
        if !taken(base) {
            return base.to_string();
        }

        let (stem, ext) = match base.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{}", ext)),
            _ => (base, String::new()),
        };
        (1..)
            .map(|n| format!("{}-{}{}", stem, n, ext))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    /// Serializes the book into EPUB bytes.
    pub fn to_epub_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        EpubWriter::new(self).write(&mut buffer)?;
        Ok(buffer.into_inner())
    }

    /// Writes the book as an EPUB file at `path`, replacing any file there.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.to_epub_bytes()?;
        fs::write(path, &bytes)
            .await
            .map_err(|e| Error::io(path, e))?;
        info!(
            "Wrote: {} ({} pages, {} images, {} bytes)",
            path.display(),
            self.pages.len(),
            self.images.len(),
            bytes.len()
        );
        Ok(())
    }
}
