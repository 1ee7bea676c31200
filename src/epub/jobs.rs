//! Content-document enumeration.
//!
//! Turns an unpacked book directory into the ordered list of files the
//! pipeline stages work on.

use crate::epub::package::{load_package, PackageDocument};
use crate::error::EpubTransError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Front/back-matter file names. These sections carry little translation
/// value and are skipped by the translate stage. Multi-word terms accept
/// spaces, underscores or hyphens between words (`about_the_author`).
static EXCLUDED_SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(preface|introduction|foreword|prologue|toc|table[\s_-]*of[\s_-]*contents|title|cover|copyright|colophon|dedication|acknowledgements?|about[\s_-]*the[\s_-]*author|bibliography|glossary|index|appendix|notes?|footnotes?|endnotes?|references|epub-meta|metadata|nav|ncx|opf|front[\s_-]*matter|back[\s_-]*matter|halftitle|frontispiece|epigraph|list[\s_-]*of[\s_-]*(figures|tables|illustrations)|copyright[\s_-]*page|series[\s_-]*page|reviews|praise|also[\s_-]*by[\s_-]*the[\s_-]*author|author[\s_-]*bio|publication[\s_-]*info|imprint|credits|permissions|disclaimer|errata|synopsis|summary)",
    )
    .unwrap()
});

/// Which content documents a stage wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFilter {
    /// Every XHTML content document (clean, mark, styling).
    All,
    /// Content documents minus front/back matter (translate).
    Translatable,
}

/// One unit of per-file work.
#[derive(Debug, Clone, Serialize)]
pub struct ContentJob {
    /// Manifest order, 0-based.
    pub index: usize,
    pub href: String,
    pub path: PathBuf,
}

/// The enumerated book: its package metadata plus the ordered job list.
#[derive(Debug, Clone)]
pub struct BookJobs {
    pub package: PackageDocument,
    pub jobs: Vec<ContentJob>,
    pub excluded: Vec<String>,
}

impl BookJobs {
    pub fn title(&self) -> Option<&str> {
        self.package.title.as_deref()
    }
}

pub fn should_exclude_file(href: &str) -> bool {
    EXCLUDED_SECTION.is_match(href)
}

/// An unpacked book must be an existing directory.
pub fn validate_book_dir(path: &Path) -> Result<(), EpubTransError> {
    let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => EpubTransError::PathNotFound {
            path: path.to_path_buf(),
        },
        _ => EpubTransError::io(path, e),
    })?;
    if !meta.is_dir() {
        return Err(EpubTransError::NotADirectory {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// List the book's content documents in manifest order.
///
/// A missing or invalid container/package is fatal.
pub fn enumerate_content_files(
    book_root: &Path,
    filter: ContentFilter,
) -> Result<BookJobs, EpubTransError> {
    validate_book_dir(book_root)?;
    let package = load_package(book_root)?;

    let mut jobs = Vec::new();
    let mut excluded = Vec::new();
    for item in package.content_documents() {
        if filter == ContentFilter::Translatable && should_exclude_file(&item.href) {
            debug!("Excluded file: {}", item.href);
            excluded.push(item.href.clone());
            continue;
        }
        jobs.push(ContentJob {
            index: jobs.len(),
            href: item.href.clone(),
            path: package.item_path(item),
        });
    }

    info!(
        "{} content documents ({} excluded) in {}",
        jobs.len(),
        excluded.len(),
        package.path.display()
    );
    Ok(BookJobs {
        package,
        jobs,
        excluded,
    })
}
