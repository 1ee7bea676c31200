//! EPUB container (zip) extraction and packing.
//!
//! Zip I/O is blocking; the async entry points run it on the blocking pool
//! with `tokio::task::spawn_blocking`, the same way CPU-bound work is kept off
//! the async executor elsewhere in the crate.

use crate::epub::STATE_DIR;
use crate::error::EpubTransError;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Extensions whose payload is already compressed; deflating them again
/// only costs time.
const STORED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "mp3", "mp4", "m4a", "avi", "mov", "woff", "woff2",
    "zip", "rar", "7z", "gz", "bz2", "xz", "pdf", "docx", "xlsx", "pptx",
];

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    /// Directory written by unpack, or archive written by pack.
    pub path: PathBuf,
    pub files: usize,
    pub bytes: u64,
}

/// Where `unpack` extracts `book.epub` to: a sibling directory named after the
/// file stem.
pub fn unpack_destination(epub: &Path) -> PathBuf {
    let stem = epub
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "book".into());
    epub.with_file_name(stem)
}

/// Default pack target for an unpacked book directory.
pub fn default_pack_output(book_dir: &Path) -> PathBuf {
    let name = book_dir
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_string());
    book_dir.with_file_name(format!("{name}-bilingual.epub"))
}

/// `name.ext` if free, otherwise the first free `name-(N).ext`.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1..)
        .map(|n| path.with_file_name(format!("{stem}-({n}){ext}")))
        .find(|p| !p.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

pub async fn unpack(epub: &Path, dest: &Path) -> Result<ArchiveReport, EpubTransError> {
    let (epub, dest) = (epub.to_path_buf(), dest.to_path_buf());
    tokio::task::spawn_blocking(move || unpack_blocking(&epub, &dest))
        .await
        .map_err(|e| EpubTransError::Internal(format!("unpack task failed: {e}")))?
}

pub async fn pack(book_dir: &Path, output: &Path) -> Result<ArchiveReport, EpubTransError> {
    let (book_dir, output) = (book_dir.to_path_buf(), output.to_path_buf());
    tokio::task::spawn_blocking(move || pack_blocking(&book_dir, &output))
        .await
        .map_err(|e| EpubTransError::Internal(format!("pack task failed: {e}")))?
}

/// Extract every entry of `epub` under `dest`.
///
/// Entries whose names would escape `dest` (absolute paths, `..`) are
/// rejected with [`EpubTransError::Archive`].
pub fn unpack_blocking(epub: &Path, dest: &Path) -> Result<ArchiveReport, EpubTransError> {
    if !epub.exists() {
        return Err(EpubTransError::PathNotFound {
            path: epub.to_path_buf(),
        });
    }
    let archive_err = |detail: String| EpubTransError::Archive {
        path: epub.to_path_buf(),
        detail,
    };

    let file = File::open(epub).map_err(|e| EpubTransError::io(epub, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| archive_err(e.to_string()))?;
    std::fs::create_dir_all(dest).map_err(|e| EpubTransError::io(dest, e))?;

    let mut report = ArchiveReport {
        path: dest.to_path_buf(),
        files: 0,
        bytes: 0,
    };

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| archive_err(e.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(archive_err(format!(
                "entry '{}' escapes the destination directory",
                entry.name()
            )));
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| EpubTransError::io(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EpubTransError::io(parent, e))?;
        }

        let mut out = File::create(&target).map_err(|e| EpubTransError::io(&target, e))?;
        let written = io::copy(&mut entry, &mut out).map_err(|e| EpubTransError::io(&target, e))?;
        debug!("Extracted {} ({} bytes)", target.display(), written);
        report.files += 1;
        report.bytes += written;
    }

    info!(
        "Unpacked {} files ({} bytes) into {}",
        report.files,
        report.bytes,
        dest.display()
    );
    Ok(report)
}

/// Zip `book_dir` into `output`.
///
/// `mimetype` is written first and stored uncompressed as the OCF container
/// format requires. The `.epubtrans/` state directory is never included.
pub fn pack_blocking(book_dir: &Path, output: &Path) -> Result<ArchiveReport, EpubTransError> {
    if !book_dir.is_dir() {
        return Err(EpubTransError::NotADirectory {
            path: book_dir.to_path_buf(),
        });
    }
    let archive_err = |detail: String| EpubTransError::Archive {
        path: output.to_path_buf(),
        detail,
    };

    let mut files = Vec::new();
    collect_files(book_dir, book_dir, &mut files).map_err(|e| EpubTransError::io(book_dir, e))?;
    // mimetype first, the rest in a stable order
    files.sort_by(|a, b| (a.as_str() != "mimetype", a).cmp(&(b.as_str() != "mimetype", b)));

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| EpubTransError::io(parent, e))?;
    }
    let out = File::create(output).map_err(|e| EpubTransError::io(output, e))?;
    let mut zip = ZipWriter::new(out);

    let mut report = ArchiveReport {
        path: output.to_path_buf(),
        files: 0,
        bytes: 0,
    };

    for name in &files {
        let source = book_dir.join(name);
        let data = std::fs::read(&source).map_err(|e| EpubTransError::io(&source, e))?;
        let options = SimpleFileOptions::default().compression_method(compression_for(name));
        zip.start_file(name.as_str(), options)
            .map_err(|e| archive_err(format!("{name}: {e}")))?;
        zip.write_all(&data)
            .map_err(|e| archive_err(format!("{name}: {e}")))?;
        debug!("Added {} ({} bytes)", name, data.len());
        report.files += 1;
        report.bytes += data.len() as u64;
    }
    zip.finish().map_err(|e| archive_err(e.to_string()))?;

    info!(
        "Packed {} files ({} bytes) into {}",
        report.files,
        report.bytes,
        output.display()
    );
    Ok(report)
}

fn compression_for(name: &str) -> CompressionMethod {
    if name == "mimetype" {
        return CompressionMethod::Stored;
    }
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if STORED_EXTENSIONS.contains(&ext.as_str()) {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    }
}

/// Relative, `/`-separated paths of every regular file under `dir`.
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if dir == root && entry.file_name() == STATE_DIR {
                continue;
            }
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn pack_then_unpack_keeps_files_and_skips_state_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let book = tmp.path().join("book");
        write(&book.join("mimetype"), "application/epub+zip");
        write(&book.join("META-INF/container.xml"), "<container/>");
        write(&book.join("OEBPS/ch1.xhtml"), "<html/>");
        write(&book.join(".epubtrans/usage.json"), "{}");

        let output = default_pack_output(&book);
        assert_eq!(output, tmp.path().join("book-bilingual.epub"));
        let report = pack_blocking(&book, &output).unwrap();
        assert_eq!(report.files, 3);

        let mut archive = ZipArchive::new(File::open(&output).unwrap()).unwrap();
        {
            let mut first = archive.by_index(0).unwrap();
            assert_eq!(first.name(), "mimetype");
            assert_eq!(first.compression(), CompressionMethod::Stored);
            let mut body = String::new();
            first.read_to_string(&mut body).unwrap();
            assert_eq!(body, "application/epub+zip");
        }
        assert!(archive.by_name(".epubtrans/usage.json").is_err());

        let dest = tmp.path().join("out");
        let report = unpack_blocking(&output, &dest).unwrap();
        assert_eq!(report.files, 3);
        assert_eq!(
            std::fs::read_to_string(dest.join("OEBPS/ch1.xhtml")).unwrap(),
            "<html/>"
        );
    }

    #[test]
    fn unique_path_appends_counter() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("book-bilingual.epub");
        assert_eq!(unique_path(&target), target);
        std::fs::write(&target, b"x").unwrap();
        assert_eq!(
            unique_path(&target),
            tmp.path().join("book-bilingual-(1).epub")
        );
    }

    #[test]
    fn unpack_destination_is_sibling_stem() {
        assert_eq!(
            unpack_destination(Path::new("/books/novel.epub")),
            PathBuf::from("/books/novel")
        );
    }

    #[test]
    fn compression_choice() {
        assert_eq!(compression_for("OEBPS/cover.JPG"), CompressionMethod::Stored);
        assert_eq!(compression_for("OEBPS/ch1.xhtml"), CompressionMethod::Deflated);
    }
}
