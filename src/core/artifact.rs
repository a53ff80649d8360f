//! Release tarball handling: fetch, SHA-256 verification, extraction.

use super::error::{ProvisionError, Result};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

/// Download `url` to `dest`. Supports `http(s)://`, `file://` and plain
/// absolute paths. Data lands in a `.part` file renamed on completion.
pub fn download(url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(ProvisionError::fs("create", parent))?;
    }
    let part = part_path(dest);

    if url.starts_with("http://") || url.starts_with("https://") {
        let fetch_err = |reason: String| ProvisionError::Fetch {
            url: url.to_string(),
            reason,
        };
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("wildfly-provisioner/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| fetch_err(e.to_string()))?;
        let mut response = client
            .get(url)
            .send()
            .map_err(|e| fetch_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_err(format!("HTTP {}", response.status())));
        }
        let mut out = File::create(&part).map_err(ProvisionError::fs("create", &part))?;
        response
            .copy_to(&mut out)
            .map_err(|e| fetch_err(e.to_string()))?;
    } else {
        let source = local_source(url).ok_or_else(|| ProvisionError::Fetch {
            url: url.to_string(),
            reason: "unsupported URL scheme".to_string(),
        })?;
        std::fs::copy(&source, &part).map_err(|e| ProvisionError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    }

    std::fs::rename(&part, dest).map_err(ProvisionError::fs("rename", &part))?;
    tracing::debug!(url, dest = %dest.display(), "downloaded artifact");
    Ok(())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn local_source(url: &str) -> Option<PathBuf> {
    let path = url.strip_prefix("file://").unwrap_or(url);
    let path = PathBuf::from(path);
    path.is_absolute().then_some(path)
}

/// Compute the SHA-256 of a file as lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path).map_err(ProvisionError::fs("open", path))?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = reader.read(&mut buf).map_err(ProvisionError::fs("read", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Case-insensitive prefix match of an expected digest against the
/// full hex digest. Abbreviated digests are accepted.
pub fn checksum_matches(actual: &str, expected: &str) -> bool {
    let expected = expected.trim().to_ascii_lowercase();
    !expected.is_empty() && actual.to_ascii_lowercase().starts_with(&expected)
}

/// Verify `path` against `expected`. Returns the full digest.
pub fn verify(path: &Path, expected: &str) -> Result<String> {
    let actual = sha256_file(path)?;
    if !checksum_matches(&actual, expected) {
        return Err(ProvisionError::Integrity {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(actual)
}

/// Unpack a gzip tarball into `dest_dir`, dropping the first
/// `strip_components` path components. Entries that would land outside
/// `dest_dir` abort the extraction. Returns the number of entries written.
pub fn extract_tar_gz(archive: &Path, dest_dir: &Path, strip_components: usize) -> Result<usize> {
    let file = File::open(archive).map_err(ProvisionError::fs("open", archive))?;
    extract_tar_with_strip(GzDecoder::new(BufReader::new(file)), archive, dest_dir, strip_components)
}

fn extract_tar_with_strip<R: Read>(
    reader: R,
    archive_path: &Path,
    dest_dir: &Path,
    strip_components: usize,
) -> Result<usize> {
    let archive_err = |reason: String| ProvisionError::Archive {
        path: archive_path.to_path_buf(),
        reason,
    };
    let mut archive = tar::Archive::new(reader);
    let dest_canonical = dest_dir
        .canonicalize()
        .map_err(ProvisionError::fs("resolve", dest_dir))?;

    let mut written = 0;
    for entry in archive
        .entries()
        .map_err(|e| archive_err(format!("cannot read tar: {}", e)))?
    {
        let mut entry = entry.map_err(|e| archive_err(format!("cannot read entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| archive_err(format!("invalid path: {}", e)))?
            .into_owned();
        let stripped = match strip_path(&path, strip_components) {
            Some(Ok(p)) => p,
            Some(Err(())) => {
                return Err(archive_err(format!("path traversal detected: {}", path.display())))
            }
            None => continue,
        };
        let outpath = dest_dir.join(&stripped);
        let kind = entry.header().entry_type();

        // nothing is created until the deepest existing ancestor is known to be inside
        let new_dir = if kind.is_dir() { Some(outpath.as_path()) } else { outpath.parent() };
        if let Some(dir) = new_dir {
            if !resolves_within(dir, &dest_canonical) {
                return Err(archive_err(format!(
                    "{} escapes destination directory",
                    stripped.display()
                )));
            }
            std::fs::create_dir_all(dir).map_err(ProvisionError::fs("create", dir))?;
        }

        if kind.is_dir() {
            written += 1;
            continue;
        }

        if kind.is_symlink() || kind.is_hard_link() {
            let link = entry
                .link_name()
                .map_err(|e| archive_err(format!("invalid link target: {}", e)))?
                .ok_or_else(|| archive_err(format!("{} has no link target", stripped.display())))?
                .into_owned();
            if kind.is_hard_link() {
                // hard link targets name archive members, so they strip like paths
                let source = match strip_path(&link, strip_components) {
                    Some(Ok(p)) => dest_dir.join(p),
                    _ => {
                        return Err(archive_err(format!(
                            "{} links outside the archive: {}",
                            stripped.display(),
                            link.display()
                        )))
                    }
                };
                if !source.parent().is_some_and(|p| resolves_within(p, &dest_canonical)) {
                    return Err(archive_err(format!(
                        "{} links outside destination directory",
                        stripped.display()
                    )));
                }
                replace_path(&outpath)?;
                std::fs::hard_link(&source, &outpath)
                    .map_err(ProvisionError::fs("link", &outpath))?;
                written += 1;
                continue;
            }
            if !symlink_stays_inside(&stripped, &link) {
                return Err(archive_err(format!(
                    "{} points outside destination directory: {}",
                    stripped.display(),
                    link.display()
                )));
            }
        }

        entry
            .unpack(&outpath)
            .map_err(|e| archive_err(format!("cannot extract {}: {}", stripped.display(), e)))?;
        written += 1;
    }
    Ok(written)
}

/// Drop the leading `strip` components. `None` when nothing remains,
/// `Some(Err)` when the path is absolute or climbs with `..`.
fn strip_path(path: &Path, strip: usize) -> Option<std::result::Result<PathBuf, ()>> {
    let mut normal = Vec::new();
    for c in path.components() {
        match c {
            Component::Normal(part) => normal.push(part),
            Component::CurDir => {}
            _ => return Some(Err(())),
        }
    }
    if normal.len() <= strip {
        return None;
    }
    Some(Ok(normal[strip..].iter().collect()))
}

/// Whether `path`, once its deepest existing ancestor is resolved through
/// any symlinks, lies under `root`.
fn resolves_within(path: &Path, root: &Path) -> bool {
    for ancestor in path.ancestors() {
        if std::fs::symlink_metadata(ancestor).is_ok() {
            return ancestor
                .canonicalize()
                .is_ok_and(|resolved| resolved.starts_with(root));
        }
    }
    false
}

/// A relative symlink at `entry` (relative to the extraction root) whose
/// target never climbs above that root.
fn symlink_stays_inside(entry: &Path, target: &Path) -> bool {
    let mut depth = entry.components().count().saturating_sub(1);
    for c in target.components() {
        match c {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => depth -= 1,
            _ => return false,
        }
    }
    true
}

fn replace_path(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            std::fs::remove_dir_all(path).map_err(ProvisionError::fs("remove", path))
        }
        Ok(_) => std::fs::remove_file(path).map_err(ProvisionError::fs("remove", path)),
        Err(_) => Ok(()),
    }
}
