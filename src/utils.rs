//! Utility functions for naming, ordering, and inspecting gallery files

use crate::error::Result;
use regex::Regex;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Maximum length of a sanitised directory name
const MAX_NAME_LEN: usize = 200;

/// Image extensions picked up when converting an arbitrary directory
pub const SUPPORTED_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp"];

/// Replace characters that are invalid in file names and trim the result
///
/// Characters `<>:"/\|?*` (and control characters) become `_`; the result is
/// truncated to 200 characters.
///
/// # Examples
///
/// ```
/// use gallery_dl_core::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("  What? A/B test  "), "What_ A_B test");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let truncated: String = replaced.trim().chars().take(MAX_NAME_LEN).collect();
    // Trailing dots/spaces are rejected on some filesystems
    truncated.trim_end_matches(['.', ' ']).to_string()
}

/// Longest id kept in a directory name
const MAX_ID_LEN: usize = 64;

/// Directory name for a gallery: `"{title} [{id}]"`, or the id alone if the title is unusable
///
/// The id suffix keeps galleries that share a title in separate directories.
///
/// # Examples
///
/// ```
/// use gallery_dl_core::utils::gallery_dir_name;
///
/// assert_eq!(gallery_dir_name("Same", "177013"), "Same [177013]");
/// assert_eq!(gallery_dir_name("  ", "177013"), "177013");
/// ```
pub fn gallery_dir_name(title: &str, gallery_id: &str) -> String {
    let id: String = sanitize_filename(gallery_id)
        .chars()
        .take(MAX_ID_LEN)
        .collect();
    let suffix = format!(" [{id}]");
    let title: String = sanitize_filename(title)
        .chars()
        .take(MAX_NAME_LEN.saturating_sub(suffix.chars().count()))
        .collect();
    let title = title.trim_end_matches(['.', ' ']);

    if title.is_empty() {
        id
    } else {
        format!("{title}{suffix}")
    }
}

/// File name for page `index` (0-based): `001.jpg`, `002.png`, ...
///
/// The extension comes from the URL path; `jpg` when absent or implausible.
pub fn page_file_name(index: usize, url: &str) -> String {
    format!("{:03}.{}", index + 1, url_extension(url).unwrap_or("jpg"))
}

fn url_extension(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    let plausible =
        !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    plausible.then_some(ext)
}

/// Whether `path` has one of the supported image extensions (case-insensitive)
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            SUPPORTED_IMAGE_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

// Literal pattern, compiled once
#[allow(clippy::expect_used)]
fn chunk_regex() -> &'static Regex {
    static CHUNKS: OnceLock<Regex> = OnceLock::new();
    CHUNKS.get_or_init(|| Regex::new(r"\d+|\D+").expect("valid chunk pattern"))
}

/// Compare names so that embedded numbers order numerically (`2` before `10`)
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let re = chunk_regex();
    let mut left = re.find_iter(a).map(|m| m.as_str());
    let mut right = re.find_iter(b).map(|m| m.as_str());

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let l_num = l.as_bytes()[0].is_ascii_digit();
                let r_num = r.as_bytes()[0].is_ascii_digit();
                let ord = if l_num && r_num {
                    let lt = l.trim_start_matches('0');
                    let rt = r.trim_start_matches('0');
                    lt.len().cmp(&rt.len()).then_with(|| lt.cmp(rt))
                } else {
                    l.to_lowercase().cmp(&r.to_lowercase())
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Image files directly inside `dir`, in natural order of their file names
///
/// Used for directories that carry no page index of their own.
pub async fn collect_image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut images = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && is_image_file(&path) {
            images.push(path);
        }
    }

    images.sort_by(|a, b| {
        let a_name = a.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let b_name = b.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        natural_cmp(a_name, b_name)
    });
    Ok(images)
}

/// Total size of the regular files directly inside `dir`
pub async fn dir_size(dir: &Path) -> Result<u64> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut total = 0u64;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Remove `dir` if it has no entries left; returns whether it was removed
pub async fn remove_dir_if_empty(dir: &Path) -> Result<bool> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    if entries.next_entry().await?.is_some() {
        return Ok(false);
    }
    tokio::fs::remove_dir(dir).await?;
    Ok(true)
}
