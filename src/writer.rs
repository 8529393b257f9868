//! EPUB serialization.
//!
//! Produces an EPUB 2.0.1 container: uncompressed `mimetype` first, then
//! `META-INF/container.xml`, the OPF package document, an NCX table of
//! contents mirroring the page tree, and every page, image and stylesheet
//! under `OEBPS/`.

use crate::book::{Book, Page, PageId};
use crate::error::Result;
use crate::utils::get_media_type;
use log::debug;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use quick_xml::escape::escape;
use std::io::{Seek, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

const STYLESHEET_HREF: &str = "css/style.css";
const COVER_PAGE_HREF: &str = "cover.xhtml";

/// Characters escaped when a resource name is used as an href.
const HREF_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Percent-encodes an image name for use in `images/<name>` references.
pub fn image_href(name: &str) -> String {
    format!("images/{}", utf8_percent_encode(name, HREF_SET))
}

/// Serializes a [`Book`] into any [`Write`] + [`Seek`] destination.
pub struct EpubWriter<'a> {
    book: &'a Book,
}

impl<'a> EpubWriter<'a> {
    pub fn new(book: &'a Book) -> Self {
        Self { book }
    }

    pub fn write<W: Write + Seek>(&self, writer: W) -> Result<()> {
        let mut zip = ZipWriter::new(writer);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        // mimetype must be the first entry and must not be compressed
        put(&mut zip, "mimetype", stored, b"application/epub+zip")?;
        put(&mut zip, "META-INF/container.xml", deflated, CONTAINER_XML.as_bytes())?;
        put(&mut zip, "OEBPS/content.opf", deflated, self.opf().as_bytes())?;
        put(&mut zip, "OEBPS/toc.ncx", deflated, self.ncx().as_bytes())?;

        if let Some(css) = self.book.stylesheet() {
            let path = format!("OEBPS/{}", STYLESHEET_HREF);
            put(&mut zip, &path, deflated, css.as_bytes())?;
        }

        if let Some(cover) = self.book.cover() {
            let path = format!("OEBPS/{}", cover_file_name(cover));
            put(&mut zip, &path, deflated, cover)?;
            let page = self.cover_page(cover);
            let path = format!("OEBPS/{}", COVER_PAGE_HREF);
            put(&mut zip, &path, deflated, page.as_bytes())?;
        }

        for page in self.book.pages() {
            let path = format!("OEBPS/{}", page.file_name());
            let document = self.xhtml_document(&page.title, &page.body);
            put(&mut zip, &path, deflated, document.as_bytes())?;
        }

        for image in self.book.images() {
            let path = format!("OEBPS/images/{}", image.name);
            put(&mut zip, &path, deflated, &image.data)?;
        }

        zip.finish()?;
        debug!("Finished EPUB archive for {:?}", self.book.title);
        Ok(())
    }

    fn xhtml_document(&self, title: &str, body: &str) -> String {
        let stylesheet = if self.book.stylesheet().is_some() {
            format!(
                "\n  <link rel=\"stylesheet\" type=\"text/css\" href=\"{}\"/>",
                STYLESHEET_HREF
            )
        } else {
            String::new()
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="{lang}">
<head>
  <meta http-equiv="Content-Type" content="application/xhtml+xml; charset=utf-8"/>
  <title>{title}</title>{stylesheet}
</head>
<body>
{body}
</body>
</html>
"#,
            lang = escape(self.book.language.as_str()),
            title = escape(title),
            stylesheet = stylesheet,
            body = body,
        )
    }

    fn cover_page(&self, cover: &[u8]) -> String {
        let body = format!(
            "<div style=\"text-align: center; padding: 0; margin: 0;\">\n<img src=\"{}\" alt=\"{}\" style=\"max-width: 100%; height: 100%;\"/>\n</div>",
            cover_file_name(cover),
            escape(self.book.title.as_str())
        );
        self.xhtml_document("Cover", &body)
    }

    fn opf(&self) -> String {
        let book = self.book;
        let mut opf = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="BookId">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
"#,
        );

        opf.push_str(&format!(
            "    <dc:title>{}</dc:title>\n",
            escape(book.title.as_str())
        ));
        if !book.author.is_empty() {
            opf.push_str(&format!(
                "    <dc:creator opf:role=\"aut\">{}</dc:creator>\n",
                escape(book.author.as_str())
            ));
        }
        opf.push_str(&format!(
            "    <dc:language>{}</dc:language>\n",
            escape(book.language.as_str())
        ));
        opf.push_str(&format!(
            "    <dc:identifier id=\"BookId\">{}</dc:identifier>\n",
            escape(book.identifier.as_str())
        ));
        opf.push_str(&format!(
            "    <dc:date>{}</dc:date>\n",
            chrono::Utc::now().format("%Y-%m-%d")
        ));
        if book.cover().is_some() {
            opf.push_str("    <meta name=\"cover\" content=\"cover-image\"/>\n");
        }

        opf.push_str("  </metadata>\n  <manifest>\n");
        opf.push_str(
            "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n",
        );

        if let Some(cover) = book.cover() {
            let file_name = cover_file_name(cover);
            opf.push_str(&format!(
                "    <item id=\"cover-image\" href=\"{}\" media-type=\"{}\"/>\n",
                file_name,
                get_media_type(Path::new(file_name))
            ));
            opf.push_str(&format!(
                "    <item id=\"cover\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
                COVER_PAGE_HREF
            ));
        }
        if book.stylesheet().is_some() {
            opf.push_str(&format!(
                "    <item id=\"css\" href=\"{}\" media-type=\"text/css\"/>\n",
                STYLESHEET_HREF
            ));
        }
        for page in book.pages() {
            opf.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
                page_item_id(page),
                page.file_name()
            ));
        }
        for (i, image) in book.images().iter().enumerate() {
            opf.push_str(&format!(
                "    <item id=\"img_{}\" href=\"{}\" media-type=\"{}\"/>\n",
                i + 1,
                escape(image_href(&image.name).as_str()),
                get_media_type(Path::new(&image.name))
            ));
        }

        opf.push_str("  </manifest>\n  <spine toc=\"ncx\">\n");
        if book.cover().is_some() {
            opf.push_str("    <itemref idref=\"cover\"/>\n");
        }
        for page in book.pages() {
            opf.push_str(&format!("    <itemref idref=\"{}\"/>\n", page_item_id(page)));
        }
        opf.push_str("  </spine>\n");

        if book.cover().is_some() {
            opf.push_str(&format!(
                "  <guide>\n    <reference type=\"cover\" title=\"Cover\" href=\"{}\"/>\n  </guide>\n",
                COVER_PAGE_HREF
            ));
        }

        opf.push_str("</package>\n");
        opf
    }

    fn ncx(&self) -> String {
        let book = self.book;
        let mut ncx = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE ncx PUBLIC "-//NISO//DTD ncx 2005-1//EN" "http://www.daisy.org/z3986/2005/ncx-2005-1.dtd">
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
"#,
        );
        ncx.push_str(&format!(
            "    <meta name=\"dtb:uid\" content=\"{}\"/>\n",
            escape(book.identifier.as_str())
        ));
        ncx.push_str(&format!(
            "    <meta name=\"dtb:depth\" content=\"{}\"/>\n",
            self.depth(None).max(1)
        ));
        ncx.push_str(
            "    <meta name=\"dtb:totalPageCount\" content=\"0\"/>\n    <meta name=\"dtb:maxPageNumber\" content=\"0\"/>\n  </head>\n",
        );
        ncx.push_str(&format!(
            "  <docTitle>\n    <text>{}</text>\n  </docTitle>\n",
            escape(book.title.as_str())
        ));
        if !book.author.is_empty() {
            ncx.push_str(&format!(
                "  <docAuthor>\n    <text>{}</text>\n  </docAuthor>\n",
                escape(book.author.as_str())
            ));
        }

        ncx.push_str("  <navMap>\n");
        let mut play_order = 1;
        for page in book.children_of(None) {
            self.write_nav_point(&mut ncx, page, &mut play_order, 2);
        }
        ncx.push_str("  </navMap>\n</ncx>\n");
        ncx
    }

    fn write_nav_point(&self, ncx: &mut String, page: &Page, play_order: &mut usize, indent: usize) {
        let pad = "  ".repeat(indent);

        ncx.push_str(&format!(
            "{pad}<navPoint id=\"navpoint-{n}\" playOrder=\"{n}\">\n",
            pad = pad,
            n = play_order
        ));
        ncx.push_str(&format!(
            "{pad}  <navLabel>\n{pad}    <text>{}</text>\n{pad}  </navLabel>\n",
            escape(page.title.as_str()),
            pad = pad
        ));
        ncx.push_str(&format!(
            "{pad}  <content src=\"{}\"/>\n",
            page.file_name(),
            pad = pad
        ));
        *play_order += 1;

        for child in self.book.children_of(Some(page.id)) {
            self.write_nav_point(ncx, child, play_order, indent + 1);
        }

        ncx.push_str(&format!("{}</navPoint>\n", pad));
    }

    /// Depth of the page tree below `parent`.
    fn depth(&self, parent: Option<PageId>) -> usize {
        self.book
            .children_of(parent)
            .map(|p| 1 + self.depth(Some(p.id)))
            .max()
            .unwrap_or(0)
    }
}

fn put<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    name: &str,
    options: SimpleFileOptions,
    data: &[u8],
) -> Result<()> {
    zip.start_file(name, options)?;
    zip.write_all(data).map_err(zip::result::ZipError::from)?;
    Ok(())
}

fn page_item_id(page: &Page) -> String {
    format!("page_{:04}", page.id.index() + 1)
}

/// Cover file name, picked from the image's magic bytes.
fn cover_file_name(data: &[u8]) -> &'static str {
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        "cover.png"
    } else if data.starts_with(b"GIF8") {
        "cover.gif"
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        "cover.webp"
    } else {
        "cover.jpg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use zip::ZipArchive;

    fn sample_book() -> Book {
        let mut book = Book::new("Rust & Books", "Ferris");
        let part = book.add_page("Part <1>", "<h1>Part</h1>", None);
        book.add_page("Child", "<p>child</p>", Some(part));
        book.add_page("Last", "<p>last</p>", None);
        book
    }

    fn archive(book: &Book) -> ZipArchive<Cursor<Vec<u8>>> {
        let mut buffer = Cursor::new(Vec::new());
        EpubWriter::new(book).write(&mut buffer).unwrap();
        ZipArchive::new(Cursor::new(buffer.into_inner())).unwrap()
    }

    fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
        let mut text = String::new();
        archive
            .by_name(name)
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        text
    }

    #[test]
    fn test_mimetype_is_first_and_stored() {
        let mut archive = archive(&sample_book());
        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
    }

    #[test]
    fn test_opf_lists_pages_in_order() {
        let mut archive = archive(&sample_book());
        let opf = read_entry(&mut archive, "OEBPS/content.opf");
        assert!(opf.contains("<dc:title>Rust &amp; Books</dc:title>"));
        assert!(opf.contains("<dc:creator opf:role=\"aut\">Ferris</dc:creator>"));

        let first = opf.find("<itemref idref=\"page_0001\"/>").unwrap();
        let second = opf.find("<itemref idref=\"page_0002\"/>").unwrap();
        let third = opf.find("<itemref idref=\"page_0003\"/>").unwrap();
        assert!(first < second && second < third);
        assert!(!opf.contains("cover-image"));
    }

    #[test]
    fn test_ncx_nests_children() {
        let mut archive = archive(&sample_book());
        let ncx = read_entry(&mut archive, "OEBPS/toc.ncx");
        assert!(ncx.contains("<meta name=\"dtb:depth\" content=\"2\"/>"));
        assert!(ncx.contains("<text>Part &lt;1&gt;</text>"));

        let part = ncx.find("page_0001.xhtml").unwrap();
        let child = ncx.find("page_0002.xhtml").unwrap();
        let first_close = ncx.find("</navPoint>").unwrap();
        // the child's navPoint closes before its parent's
        assert!(part < child && child < first_close);
    }

    #[test]
    fn test_cover_stylesheet_and_images_are_packaged() {
        let mut book = sample_book();
        book.set_cover(vec![0x89, b'P', b'N', b'G', 0, 0]);
        book.set_stylesheet("body { margin: 0; }");
        book.add_image(Path::new("/b/images/my fig.png"), vec![1, 2, 3]);

        let mut archive = archive(&book);
        assert!(archive.by_name("OEBPS/cover.png").is_ok());
        assert!(archive.by_name("OEBPS/cover.xhtml").is_ok());
        assert!(archive.by_name("OEBPS/images/my fig.png").is_ok());
        assert_eq!(read_entry(&mut archive, "OEBPS/css/style.css"), "body { margin: 0; }");

        let opf = read_entry(&mut archive, "OEBPS/content.opf");
        assert!(opf.contains("<meta name=\"cover\" content=\"cover-image\"/>"));
        assert!(opf.contains("href=\"images/my%20fig.png\" media-type=\"image/png\""));

        let page = read_entry(&mut archive, "OEBPS/page_0001.xhtml");
        assert!(page.contains("href=\"css/style.css\""));
        assert!(page.contains("<h1>Part</h1>"));
    }

    #[test]
    fn test_image_href_encodes_spaces() {
        assert_eq!(image_href("a b.png"), "images/a%20b.png");
        assert_eq!(image_href("plain.jpg"), "images/plain.jpg");
    }
}
