//! EPUB container handling: archive I/O, package parsing and job enumeration.

pub mod archive;
pub mod jobs;
pub mod package;

use std::path::{Path, PathBuf};

/// Per-book state directory (usage metadata, audit log, diagnostic dumps).
/// Lives inside the unpacked book and is never packed.
pub const STATE_DIR: &str = ".epubtrans";

pub fn state_dir(book_root: &Path) -> PathBuf {
    book_root.join(STATE_DIR)
}

pub use archive::{default_pack_output, pack, unique_path, unpack, unpack_destination, ArchiveReport};
pub use jobs::{enumerate_content_files, should_exclude_file, validate_book_dir, BookJobs, ContentFilter, ContentJob};
pub use package::{load_package, ManifestItem, PackageDocument};
