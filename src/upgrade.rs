//! Self-upgrade from GitHub releases.
//!
//! ```text
//! GET /repos/{repo}/releases/latest
//!   → compare tag with the running version
//!   → pick the asset named for this platform (`linux_amd64`, `darwin_arm64`, …)
//!   → verify its SHA-256 against the release's `*checksums.txt`
//!   → extract (tar.gz, zip) or take as-is, then swap it in for the running executable
//! ```
//!
//! Confirmation is left to the caller: [`check`] reports what is available
//! and [`install`] does the swap.

use crate::error::EpubTransError;
use crate::pipeline::sha256_hex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_REPO: &str = "nguyenvanduocit/epubtrans";
const GITHUB_API: &str = "https://api.github.com";
const BINARY_NAME: &str = "epubtrans";

fn upgrade_err(detail: impl fmt::Display) -> EpubTransError {
    EpubTransError::UpgradeFailed(detail.to_string())
}

// ── Versions ─────────────────────────────────────────────────────────────

/// `major.minor.patch`; a leading `v` and any `-suffix` are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub fn parse(s: &str) -> Option<Self> {
        let core = s.trim().trim_start_matches('v');
        let core = core.split(['-', '+']).next()?;
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
        let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ── Releases ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

impl Release {
    /// The asset built for `platform`, e.g. `linux_amd64`.
    pub fn platform_asset(&self, platform: &str) -> Option<&ReleaseAsset> {
        self.assets
            .iter()
            .filter(|a| !is_checksum_asset(&a.name))
            .filter(|a| AssetFormat::from_name(&a.name).is_ok())
            .find(|a| a.name.contains(platform))
    }

    pub fn checksum_asset(&self) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|a| is_checksum_asset(&a.name))
    }
}

fn is_checksum_asset(name: &str) -> bool {
    name.ends_with("checksums.txt")
}

/// Release-asset platform tag for this build: `{os}_{arch}` with Go-style
/// architecture names.
pub fn platform_tag() -> String {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    };
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    format!("{os}_{arch}")
}

/// `sha256  name` lines → name ↦ lowercase hex digest.
pub fn parse_checksums(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let digest = fields.next()?;
            let name = fields.next()?.trim_start_matches('*');
            if fields.next().is_some() {
                return None;
            }
            Some((name.to_string(), digest.to_ascii_lowercase()))
        })
        .collect()
}

/// Result of [`check`].
#[derive(Debug, Clone)]
pub struct UpgradeCheck {
    pub current: Version,
    pub latest: Version,
    pub release: Release,
}

impl UpgradeCheck {
    pub fn is_newer(&self) -> bool {
        self.latest > self.current
    }
}

fn http_client() -> Result<reqwest::Client, EpubTransError> {
    reqwest::Client::builder()
        .user_agent(concat!("epubtrans/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(upgrade_err)
}

async fn get_bytes(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, EpubTransError> {
    let resp = http
        .get(url)
        .send()
        .await
        .map_err(|e| upgrade_err(format!("GET {url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(upgrade_err(format!("GET {url}: HTTP {}", resp.status())));
    }
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| upgrade_err(format!("GET {url}: {e}")))?;
    Ok(bytes.to_vec())
}

/// Ask GitHub for the latest release of `repo` (`owner/name`).
pub async fn check(repo: &str, current_version: &str) -> Result<UpgradeCheck, EpubTransError> {
    let current = Version::parse(current_version)
        .ok_or_else(|| upgrade_err(format!("invalid current version '{current_version}'")))?;
    let url = format!("{GITHUB_API}/repos/{repo}/releases/latest");
    debug!("Fetching {}", url);
    let http = http_client()?;
    let body = get_bytes(&http, &url).await?;
    let release: Release = serde_json::from_slice(&body)
        .map_err(|e| upgrade_err(format!("malformed release JSON: {e}")))?;
    let latest = Version::parse(&release.tag_name)
        .ok_or_else(|| upgrade_err(format!("invalid release tag '{}'", release.tag_name)))?;
    Ok(UpgradeCheck {
        current,
        latest,
        release,
    })
}

/// Check a downloaded asset against the release checksum list.
pub fn verify_checksum(
    asset: &str,
    payload: &[u8],
    checksums: &HashMap<String, String>,
) -> Result<(), EpubTransError> {
    let expected = checksums
        .get(asset)
        .ok_or_else(|| upgrade_err(format!("no checksum published for '{asset}'")))?;
    let actual = sha256_hex(payload);
    if &actual != expected {
        return Err(EpubTransError::ChecksumMismatch {
            asset: asset.to_string(),
            expected: expected.clone(),
            actual,
        });
    }
    Ok(())
}

/// How a release asset packages the executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetFormat {
    TarGz,
    Zip,
    Raw,
}

const UNSUPPORTED_SUFFIXES: &[&str] = &[
    ".tar", ".gz", ".xz", ".bz2", ".zst", ".7z", ".rar", ".deb", ".rpm", ".msi", ".dmg", ".pkg",
    ".sig",
];

const COMPRESSED_MAGIC: &[&[u8]] = &[
    b"\x1f\x8b",
    b"PK\x03\x04",
    b"\xfd7zXZ\x00",
    b"BZh",
    b"\x28\xb5\x2f\xfd",
    b"7z\xbc\xaf\x27\x1c",
    b"Rar!",
];

impl AssetFormat {
    /// Classify an asset by name. Archive formats other than `.tar.gz` and
    /// `.zip` are refused rather than installed as-is.
    pub fn from_name(asset: &str) -> Result<Self, EpubTransError> {
        let lower = asset.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Ok(Self::TarGz)
        } else if lower.ends_with(".zip") {
            Ok(Self::Zip)
        } else if UNSUPPORTED_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
            Err(upgrade_err(format!("unsupported asset format '{asset}'")))
        } else {
            Ok(Self::Raw)
        }
    }
}

/// Pull the executable out of a downloaded asset. `.tar.gz` and `.zip`
/// archives are searched for an entry named `epubtrans` (or
/// `epubtrans.exe`); an asset without an archive suffix is the executable
/// itself, unless its bytes say it is compressed.
pub fn extract_binary(asset: &str, payload: Vec<u8>) -> Result<Vec<u8>, EpubTransError> {
    match AssetFormat::from_name(asset)? {
        AssetFormat::TarGz => extract_from_tar_gz(asset, &payload),
        AssetFormat::Zip => extract_from_zip(asset, payload),
        AssetFormat::Raw => {
            if COMPRESSED_MAGIC.iter().any(|m| payload.starts_with(m)) {
                return Err(upgrade_err(format!(
                    "'{asset}' looks like a compressed archive, refusing to install it raw"
                )));
            }
            Ok(payload)
        }
    }
}

fn is_binary_entry(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| n == BINARY_NAME || n == format!("{BINARY_NAME}.exe"))
}

fn extract_from_tar_gz(asset: &str, payload: &[u8]) -> Result<Vec<u8>, EpubTransError> {
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(payload));
    for entry in archive.entries().map_err(upgrade_err)? {
        let mut entry = entry.map_err(upgrade_err)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().map_err(upgrade_err)?.into_owned();
        if is_binary_entry(&path) {
            let mut out = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut out).map_err(upgrade_err)?;
            return Ok(out);
        }
    }
    Err(upgrade_err(format!("'{asset}' does not contain {BINARY_NAME}")))
}

fn extract_from_zip(asset: &str, payload: Vec<u8>) -> Result<Vec<u8>, EpubTransError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(payload)).map_err(upgrade_err)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(upgrade_err)?;
        if entry.is_file() && is_binary_entry(Path::new(entry.name())) {
            let mut out = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut out).map_err(upgrade_err)?;
            return Ok(out);
        }
    }
    Err(upgrade_err(format!("'{asset}' does not contain {BINARY_NAME}")))
}

/// Download, verify and install `release` over the running executable.
/// Returns the path that was replaced.
pub async fn install(release: &Release) -> Result<PathBuf, EpubTransError> {
    let platform = platform_tag();
    let asset = release
        .platform_asset(&platform)
        .ok_or_else(|| upgrade_err(format!("no release asset for {platform}")))?;
    let checksum_asset = release
        .checksum_asset()
        .ok_or_else(|| upgrade_err("release has no checksums.txt"))?;

    let http = http_client()?;
    info!("Downloading {}", asset.name);
    let payload = get_bytes(&http, &asset.browser_download_url).await?;
    let checksum_text = get_bytes(&http, &checksum_asset.browser_download_url).await?;
    let checksums = parse_checksums(&String::from_utf8_lossy(&checksum_text));
    verify_checksum(&asset.name, &payload, &checksums)?;
    debug!("Checksum verified for {}", asset.name);

    let exe = std::env::current_exe().map_err(|e| upgrade_err(format!("current_exe: {e}")))?;
    let name = asset.name.clone();
    let target = exe.clone();
    tokio::task::spawn_blocking(move || {
        let binary = extract_binary(&name, payload)?;
        replace_executable(&target, &binary)
    })
    .await
    .map_err(|e| EpubTransError::Internal(format!("upgrade task panicked: {e}")))??;
    info!("Installed {} over {}", release.tag_name, exe.display());
    Ok(exe)
}

/// Swap `exe` for `binary`, keeping a `.bak` until the swap succeeded.
fn replace_executable(exe: &Path, binary: &[u8]) -> Result<(), EpubTransError> {
    let dir = exe
        .parent()
        .ok_or_else(|| upgrade_err("executable has no parent directory"))?;
    let staged = tempfile::NamedTempFile::new_in(dir).map_err(|e| EpubTransError::io(dir, e))?;
    std::fs::write(staged.path(), binary).map_err(|e| EpubTransError::io(staged.path(), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(staged.path(), std::fs::Permissions::from_mode(0o755))
            .map_err(|e| EpubTransError::io(staged.path(), e))?;
    }

    let backup = exe.with_extension("bak");
    std::fs::rename(exe, &backup).map_err(|e| EpubTransError::io(exe, e))?;
    if let Err(e) = staged.persist(exe) {
        let _ = std::fs::rename(&backup, exe);
        return Err(EpubTransError::io(exe, e.error));
    }
    let _ = std::fs::remove_file(&backup);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn version_parsing_and_order() {
        let v = Version::parse("v1.2.3-rc1").unwrap();
        assert_eq!(v.to_string(), "1.2.3");
        assert_eq!(Version::parse("0.4").unwrap().to_string(), "0.4.0");
        assert!(Version::parse("1.x").is_none());
        assert!(Version::parse("1.2.3.4").is_none());
        assert!(Version::parse("v0.10.0").unwrap() > Version::parse("0.9.9").unwrap());
    }

    #[test]
    fn checksums_file_is_parsed() {
        let text = "abc123  epubtrans_linux_amd64.zip\nDEF456 *epubtrans_darwin_arm64.zip\n\ngarbage\n";
        let sums = parse_checksums(text);
        assert_eq!(sums.len(), 2);
        assert_eq!(sums["epubtrans_linux_amd64.zip"], "abc123");
        assert_eq!(sums["epubtrans_darwin_arm64.zip"], "def456");
    }

    #[test]
    fn checksum_mismatch_is_reported() {
        let mut sums = HashMap::new();
        sums.insert("a.zip".to_string(), sha256_hex(b"good"));
        assert!(verify_checksum("a.zip", b"good", &sums).is_ok());
        match verify_checksum("a.zip", b"evil", &sums) {
            Err(EpubTransError::ChecksumMismatch { asset, .. }) => assert_eq!(asset, "a.zip"),
            other => panic!("expected mismatch, got {other:?}"),
        }
        assert!(matches!(
            verify_checksum("b.zip", b"good", &sums),
            Err(EpubTransError::UpgradeFailed(_))
        ));
    }

    #[test]
    fn platform_asset_skips_checksums() {
        let release: Release = serde_json::from_str(
            r#"{"tag_name":"v1.0.0","assets":[
                {"name":"epubtrans_1.0.0_checksums.txt","browser_download_url":"u0"},
                {"name":"epubtrans_1.0.0_linux_386.tar.xz","browser_download_url":"u3"},
                {"name":"epubtrans_1.0.0_linux_386.tar.gz","browser_download_url":"u4"},
                {"name":"epubtrans_linux_amd64.zip","browser_download_url":"u1"},
                {"name":"epubtrans_darwin_arm64.zip","browser_download_url":"u2"}]}"#,
        )
        .unwrap();
        assert_eq!(release.platform_asset("darwin_arm64").unwrap().browser_download_url, "u2");
        assert_eq!(release.checksum_asset().unwrap().browser_download_url, "u0");
        assert!(release.platform_asset("windows_386").is_none());
        assert_eq!(release.platform_asset("linux_386").unwrap().browser_download_url, "u4");
        assert!(platform_tag().contains('_'));
        assert!(!platform_tag().starts_with("macos"));
    }

    #[test]
    fn binary_is_extracted_from_zip() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zw = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            zw.start_file("README.md", opts).unwrap();
            zw.write_all(b"readme").unwrap();
            zw.start_file("dist/epubtrans", opts).unwrap();
            zw.write_all(b"\x7fELF").unwrap();
            zw.finish().unwrap();
        }
        let bin = extract_binary("epubtrans_linux_amd64.zip", buf.into_inner()).unwrap();
        assert_eq!(bin, b"\x7fELF");
        assert_eq!(extract_binary("epubtrans_linux_amd64", b"raw".to_vec()).unwrap(), b"raw");
    }

    fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        {
            let mut builder = tar::Builder::new(&mut gz);
            for (name, data) in entries {
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o755);
                builder.append_data(&mut header, name, *data).unwrap();
            }
            builder.finish().unwrap();
        }
        gz.finish().unwrap()
    }

    #[test]
    fn binary_is_extracted_from_tar_gz() {
        let payload = tar_gz(&[
            ("README.md", &b"readme"[..]),
            ("LICENSE", &b"mit"[..]),
            ("epubtrans", &b"\x7fELF-new"[..]),
        ]);
        let bin = extract_binary("epubtrans_0.4.0_linux_amd64.tar.gz", payload).unwrap();
        assert_eq!(bin, b"\x7fELF-new");
    }

    #[test]
    fn tar_gz_without_binary_is_rejected() {
        let payload = tar_gz(&[("README.md", &b"readme"[..])]);
        assert!(matches!(
            extract_binary("epubtrans_0.4.0_linux_amd64.tar.gz", payload),
            Err(EpubTransError::UpgradeFailed(_))
        ));
    }

    #[test]
    fn compressed_assets_are_never_installed_raw() {
        let gzip = vec![0x1f, 0x8b, 0x08, 0, 1, 2, 3, 4];
        assert!(extract_binary("epubtrans_0.4.0_linux_amd64.tar.xz", gzip.clone()).is_err());
        assert!(extract_binary("epubtrans_0.4.0_linux_amd64.gz", gzip.clone()).is_err());
        assert!(extract_binary("epubtrans_linux_amd64", gzip).is_err());
        assert_eq!(AssetFormat::from_name("epubtrans_Linux_x86_64.TGZ").unwrap(), AssetFormat::TarGz);
        assert_eq!(AssetFormat::from_name("epubtrans_windows_amd64.exe").unwrap(), AssetFormat::Raw);
    }

    #[test]
    fn executable_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("epubtrans");
        std::fs::write(&exe, b"old").unwrap();
        replace_executable(&exe, b"new").unwrap();
        assert_eq!(std::fs::read(&exe).unwrap(), b"new");
        assert!(!exe.with_extension("bak").exists());
    }
}
