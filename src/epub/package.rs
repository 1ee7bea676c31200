//! `META-INF/container.xml` and OPF package document parsing.
//!
//! Only what the pipeline consumes is extracted: the package path from the
//! container, and manifest, spine and a few Dublin Core fields from the
//! package. Elements are matched by local name so any namespace prefix works.

use crate::error::EpubTransError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const CONTAINER_PATH: &str = "META-INF/container.xml";
pub const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";

/// One `<item>` from the package manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
}

/// Parsed OPF package document.
#[derive(Debug, Clone, Serialize)]
pub struct PackageDocument {
    /// Absolute path of the `.opf` file.
    pub path: PathBuf,
    pub title: Option<String>,
    pub language: Option<String>,
    pub manifest: Vec<ManifestItem>,
    /// `idref`s in reading order.
    pub spine: Vec<String>,
}

impl PackageDocument {
    /// Directory manifest hrefs are relative to.
    pub fn content_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn item_path(&self, item: &ManifestItem) -> PathBuf {
        self.content_dir().join(percent_decode(&item.href))
    }

    pub fn item(&self, id: &str) -> Option<&ManifestItem> {
        if id.is_empty() {
            return None;
        }
        self.manifest.iter().find(|i| i.id == id)
    }

    /// Content documents (`application/xhtml+xml`) in manifest order.
    pub fn content_documents(&self) -> impl Iterator<Item = &ManifestItem> {
        self.manifest
            .iter()
            .filter(|i| i.media_type == XHTML_MEDIA_TYPE)
    }
}

/// Read `META-INF/container.xml` under `book_root` and load the package
/// document it points to.
pub fn load_package(book_root: &Path) -> Result<PackageDocument, EpubTransError> {
    let container_path = book_root.join(CONTAINER_PATH);
    let container_xml = std::fs::read_to_string(&container_path).map_err(|e| {
        EpubTransError::ContainerUnreadable {
            path: container_path.clone(),
            detail: e.to_string(),
        }
    })?;
    let full_path = parse_container(&container_xml).map_err(|detail| {
        EpubTransError::ContainerInvalid {
            path: container_path.clone(),
            detail,
        }
    })?;

    let package_path = book_root.join(percent_decode(&full_path));
    let package_xml = std::fs::read_to_string(&package_path).map_err(|e| {
        EpubTransError::PackageUnreadable {
            path: package_path.clone(),
            detail: e.to_string(),
        }
    })?;
    let mut package = parse_package(&package_xml).map_err(|detail| {
        EpubTransError::PackageInvalid {
            path: package_path.clone(),
            detail,
        }
    })?;
    package.path = package_path;
    Ok(package)
}

/// Extract the first `rootfile/@full-path` from a container document.
pub fn parse_container(xml: &str) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"rootfile" => {
                return match attr(&e, b"full-path")? {
                    Some(p) if !p.trim().is_empty() => Ok(p.trim().to_string()),
                    _ => Err("rootfile has no full-path".into()),
                };
            }
            Ok(Event::Eof) => return Err("no rootfile element".into()),
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "XML error at position {}: {e}",
                    reader.error_position()
                ))
            }
        }
    }
}

/// Parse an OPF document. The returned `path` is empty; [`load_package`]
/// fills it in.
pub fn parse_package(xml: &str) -> Result<PackageDocument, String> {
    #[derive(PartialEq)]
    enum Capture {
        None,
        Title,
        Language,
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut package = PackageDocument {
        path: PathBuf::new(),
        title: None,
        language: None,
        manifest: Vec::new(),
        spine: Vec::new(),
    };
    let mut saw_package = false;
    let mut in_metadata = false;
    let mut capture = Capture::None;

    loop {
        let event = reader.read_event().map_err(|e| {
            format!("XML error at position {}: {e}", reader.error_position())
        })?;
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"package" => saw_package = true,
                b"metadata" => in_metadata = true,
                b"title" if in_metadata && package.title.is_none() => capture = Capture::Title,
                b"language" if in_metadata && package.language.is_none() => {
                    capture = Capture::Language
                }
                b"item" => package.manifest.extend(manifest_item(&e)?),
                b"itemref" => package.spine.extend(attr(&e, b"idref")?),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"item" => package.manifest.extend(manifest_item(&e)?),
                b"itemref" => package.spine.extend(attr(&e, b"idref")?),
                _ => {}
            },
            Event::Text(t) if capture != Capture::None => {
                let text = t.unescape().map_err(|e| e.to_string())?.trim().to_string();
                if !text.is_empty() {
                    match capture {
                        Capture::Title => package.title = Some(text),
                        Capture::Language => package.language = Some(text),
                        Capture::None => {}
                    }
                }
            }
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"metadata" => in_metadata = false,
                    b"title" | b"language" => capture = Capture::None,
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_package {
        return Err("no <package> element".into());
    }
    Ok(package)
}

fn manifest_item(e: &BytesStart<'_>) -> Result<Option<ManifestItem>, String> {
    let (Some(id), Some(href)) = (attr(e, b"id")?, attr(e, b"href")?) else {
        return Ok(None);
    };
    Ok(Some(ManifestItem {
        id,
        href,
        media_type: attr(e, b"media-type")?.unwrap_or_default(),
        properties: attr(e, b"properties")?,
    }))
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, String> {
    for a in e.attributes() {
        let a = a.map_err(|e| e.to_string())?;
        if a.key.local_name().as_ref() == name {
            let value = a.unescape_value().map_err(|e| e.to_string())?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Decode `%XX` escapes in a manifest href. Invalid escapes are kept as-is.
fn percent_decode(href: &str) -> String {
    let bytes = href.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(b) = decoded {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| href.to_string())
}
