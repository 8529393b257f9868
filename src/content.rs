//! Chapter content resolution.
//!
//! Turns an outline link into page markup: Markdown files are rendered to
//! HTML and their local images are registered with the [`Book`] and
//! re-pointed at `images/<name>`. Links that lead nowhere fall back to the
//! entry title.

use crate::book::Book;
use crate::error::{Error, Result};
use crate::writer::image_href;
use crate::xhtml::to_xhtml;
use content_inspector::{ContentType, inspect};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, html};
use quick_xml::escape::escape;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

static IMG_SRC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(<img\b[^>]*?\bsrc\s*=\s*)(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid img regex")
});

/// Markup for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// No source was found; the text stands in for the page.
    Placeholder(String),
    /// Rendered HTML fragment.
    Html(String),
}

impl Content {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Content::Placeholder(_))
    }

    /// Body markup for the page document.
    pub fn into_body(self) -> String {
        match self {
            Content::Placeholder(text) => format!("<h1>{}</h1>", escape(text.as_str())),
            Content::Html(html) => html,
        }
    }
}

/// Resolves `link` (relative to `base_dir`) into page content.
///
/// An empty link, a missing file, or a binary file all yield
/// [`Content::Placeholder`] with `fallback`. Images referenced by the
/// Markdown are loaded into `book`; a local image that cannot be found is an
/// error.
pub async fn resolve_content(
    book: &mut Book,
    base_dir: &Path,
    link: &str,
    fallback: &str,
) -> Result<Content> {
    if link.is_empty() {
        return Ok(Content::Placeholder(fallback.to_string()));
    }

    let path = base_dir.join(decode(link));
    if !is_file(&path).await {
        warn!("File {} does not exist!", path.display());
        return Ok(Content::Placeholder(fallback.to_string()));
    }

    info!("Converting: {}", path.display());
    let bytes = fs::read(&path).await.map_err(|e| Error::io(&path, e))?;

    let sample_size = std::cmp::min(8192, bytes.len());
    if inspect(&bytes[..sample_size]) == ContentType::BINARY {
        warn!("File {} looks binary, using its title instead", path.display());
        return Ok(Content::Placeholder(fallback.to_string()));
    }

    let text = String::from_utf8_lossy(&bytes);
    let html = render_markdown(book, base_dir, &path, &text).await?;
    Ok(Content::Html(html))
}

fn markdown_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

/// Renders Markdown to XHTML, embedding every local image into `book`.
async fn render_markdown(
    book: &mut Book,
    base_dir: &Path,
    chapter: &Path,
    text: &str,
) -> Result<String> {
    let events: Vec<Event> = Parser::new_ext(text, markdown_options()).collect();

    let mut rewritten: HashMap<String, String> = HashMap::new();
    for src in image_sources(&events) {
        if rewritten.contains_key(&src) || is_remote(&src) {
            continue;
        }

        let image_path = locate_image(base_dir, chapter, &src)
            .await
            .ok_or_else(|| Error::ImageNotFound {
                image: PathBuf::from(decode(&src)),
                chapter: chapter.to_path_buf(),
            })?;
        let data = fs::read(&image_path)
            .await
            .map_err(|e| Error::io(&image_path, e))?;
        let name = book.add_image(&image_path, data);
        debug!("Rewriting image {} -> images/{}", src, name);
        rewritten.insert(src, image_href(&name));
    }

    let events = events.into_iter().map(|event| match event {
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => {
            let dest_url = match rewritten.get(&*dest_url) {
                Some(href) => CowStr::from(href.clone()),
                None => dest_url,
            };
            Event::Start(Tag::Image {
                link_type,
                dest_url,
                title,
                id,
            })
        }
        Event::Html(raw) => Event::Html(rewrite_img_tags(&raw, &rewritten).into()),
        Event::InlineHtml(raw) => Event::InlineHtml(rewrite_img_tags(&raw, &rewritten).into()),
        other => other,
    });

    let mut output = String::new();
    html::push_html(&mut output, events);
    Ok(to_xhtml(&output))
}

/// Image sources in document order, from Markdown syntax and raw `<img>` tags.
fn image_sources(events: &[Event]) -> Vec<String> {
    let mut sources = Vec::new();
    for event in events {
        match event {
            Event::Start(Tag::Image { dest_url, .. }) => sources.push(dest_url.to_string()),
            Event::Html(raw) | Event::InlineHtml(raw) => {
                for caps in IMG_SRC_RE.captures_iter(raw) {
                    if let Some(src) = caps.get(2).or_else(|| caps.get(3)) {
                        sources.push(src.as_str().to_string());
                    }
                }
            }
            _ => {}
        }
    }
    sources
}

fn rewrite_img_tags(raw: &str, rewritten: &HashMap<String, String>) -> String {
    IMG_SRC_RE
        .replace_all(raw, |caps: &Captures| {
            let src = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            match rewritten.get(src) {
                Some(href) => format!("{}\"{}\"", &caps[1], href),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn is_remote(src: &str) -> bool {
    src.is_empty() || src.contains("://") || src.starts_with("//") || src.starts_with("data:")
}

fn decode(src: &str) -> String {
    percent_decode_str(src).decode_utf8_lossy().into_owned()
}

/// Finds an image relative to the book directory, then relative to the chapter.
async fn locate_image(base_dir: &Path, chapter: &Path, src: &str) -> Option<PathBuf> {
    let decoded = decode(src);
    let mut candidates = vec![base_dir.join(&decoded)];
    if let Some(dir) = chapter.parent() {
        candidates.push(dir.join(&decoded));
    }

    for candidate in candidates {
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_empty_link_is_placeholder() {
        let dir = tempdir().unwrap();
        let mut book = Book::new("T", "A");
        let content = resolve_content(&mut book, dir.path(), "", "Part One").await.unwrap();
        assert_eq!(content, Content::Placeholder("Part One".to_string()));
    }

    #[tokio::test]
    async fn test_missing_file_is_placeholder() {
        let dir = tempdir().unwrap();
        let mut book = Book::new("T", "A");
        let content = resolve_content(&mut book, dir.path(), "nope.md", "Chapter 9")
            .await
            .unwrap();
        assert_eq!(content, Content::Placeholder("Chapter 9".to_string()));
        assert!(book.images().is_empty());
    }

    #[tokio::test]
    async fn test_binary_file_is_placeholder() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("blob.md"), [0x00, 0xFF, 0x00, 0x89]).unwrap();
        let mut book = Book::new("T", "A");
        let content = resolve_content(&mut book, dir.path(), "blob.md", "Blob")
            .await
            .unwrap();
        assert!(content.is_placeholder());
    }

    #[tokio::test]
    async fn test_markdown_image_is_registered_and_rewritten() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images/fig.png"), [1u8, 2, 3]).unwrap();
        std::fs::write(
            dir.path().join("ch1.md"),
            "# Chapter 1\n\nSee ![a figure](images/fig.png).\n",
        )
        .unwrap();

        let mut book = Book::new("T", "A");
        let content = resolve_content(&mut book, dir.path(), "ch1.md", "Chapter 1")
            .await
            .unwrap();

        let Content::Html(html) = content else {
            panic!("expected html");
        };
        assert!(html.contains("<h1>Chapter 1</h1>"));
        assert!(html.contains("src=\"images/fig.png\""));
        assert_eq!(book.images().len(), 1);
        assert_eq!(book.images()[0].name, "fig.png");
        assert_eq!(book.images()[0].data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_nested_image_path_uses_file_name() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("res/images")).unwrap();
        std::fs::write(dir.path().join("res/images/diagram.svg"), "<svg/>").unwrap();
        std::fs::write(dir.path().join("ch.md"), "![d](res/images/diagram.svg)\n").unwrap();

        let mut book = Book::new("T", "A");
        let content = resolve_content(&mut book, dir.path(), "ch.md", "Ch")
            .await
            .unwrap();
        assert!(content.into_body().contains("src=\"images/diagram.svg\""));
    }

    #[tokio::test]
    async fn test_raw_html_img_is_rewritten() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("img")).unwrap();
        std::fs::write(dir.path().join("img/photo.jpg"), [9u8]).unwrap();
        std::fs::write(
            dir.path().join("ch.md"),
            "Text\n\n<img src='img/photo.jpg' width=\"200\">\n",
        )
        .unwrap();

        let mut book = Book::new("T", "A");
        let body = resolve_content(&mut book, dir.path(), "ch.md", "Ch")
            .await
            .unwrap()
            .into_body();
        assert!(body.contains("<img src=\"images/photo.jpg\" width=\"200\"/>"));
        assert_eq!(book.images()[0].name, "photo.jpg");
    }

    #[tokio::test]
    async fn test_raw_void_tags_are_closed() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ch.md"), "Line one<br>line two\n\n<hr>\n").unwrap();

        let mut book = Book::new("T", "A");
        let body = resolve_content(&mut book, dir.path(), "ch.md", "Ch")
            .await
            .unwrap()
            .into_body();
        assert!(body.contains("<p>Line one<br/>line two</p>"));
        assert!(body.contains("<hr/>"));
    }

    #[tokio::test]
    async fn test_percent_encoded_paths_and_lossy_text() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("img dir")).unwrap();
        std::fs::write(dir.path().join("img dir/my fig.png"), [4u8, 2]).unwrap();
        let mut chapter = b"Caf".to_vec();
        chapter.push(0xE9);
        chapter.extend_from_slice(b" ![x](img%20dir/my%20fig.png)\n");
        std::fs::write(dir.path().join("my ch.md"), chapter).unwrap();

        let mut book = Book::new("T", "A");
        let content = resolve_content(&mut book, dir.path(), "my%20ch.md", "Mine")
            .await
            .unwrap();

        let Content::Html(html) = content else {
            panic!("expected html");
        };
        assert!(html.contains("src=\"images/my%20fig.png\""));
        assert!(html.contains('\u{FFFD}'));
        assert_eq!(book.images().len(), 1);
        assert_eq!(book.images()[0].name, "my fig.png");
        assert_eq!(book.images()[0].data, vec![4, 2]);
    }

    #[tokio::test]
    async fn test_chapter_relative_image_fallback() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("part1/assets")).unwrap();
        std::fs::write(dir.path().join("part1/assets/map.png"), [7u8]).unwrap();
        std::fs::write(dir.path().join("part1/intro.md"), "![map](assets/map.png)\n").unwrap();

        let mut book = Book::new("T", "A");
        let body = resolve_content(&mut book, dir.path(), "part1/intro.md", "Intro")
            .await
            .unwrap()
            .into_body();
        assert!(body.contains("src=\"images/map.png\""));
    }

    #[tokio::test]
    async fn test_remote_image_is_left_alone() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("ch.md"),
            "![logo](https://example.com/logo.png)\n",
        )
        .unwrap();

        let mut book = Book::new("T", "A");
        let body = resolve_content(&mut book, dir.path(), "ch.md", "Ch")
            .await
            .unwrap()
            .into_body();
        assert!(body.contains("src=\"https://example.com/logo.png\""));
        assert!(book.images().is_empty());
    }

    #[tokio::test]
    async fn test_missing_image_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ch.md"), "![gone](images/gone.png)\n").unwrap();

        let mut book = Book::new("T", "A");
        let err = resolve_content(&mut book, dir.path(), "ch.md", "Ch")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ImageNotFound { ref image, .. } if image == Path::new("images/gone.png")));
    }

    #[test]
    fn test_placeholder_body_is_escaped() {
        let body = Content::Placeholder("Q&A".to_string()).into_body();
        assert_eq!(body, "<h1>Q&amp;A</h1>");
    }
}
