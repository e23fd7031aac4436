//! Folder and file name derivation for downloaded and captured assets.
//!
//! Everything here is a pure function of its input, except the synthetic
//! fallbacks which mix in the clock (and entropy for capture names) so that
//! assets without a structural name do not collide.

use chrono::Utc;
use url::Url;

/// Folder names are capped well below NAME_MAX so nested paths stay short.
pub const FOLDER_NAME_MAX: usize = 100;
/// Linux NAME_MAX.
pub const FILE_NAME_MAX: usize = 255;

const RESERVED: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Turns a run identifier (usually a page URL) into a single directory name.
///
/// The protocol is dropped, separators, reserved characters and whitespace
/// become `_`, runs of `_` collapse and the result is capped at
/// [`FOLDER_NAME_MAX`] bytes. An empty result falls back to `run_<timestamp>`.
pub fn sanitize_folder_name(raw: &str) -> String {
    let stripped = strip_protocol(raw.trim());

    let mut out = String::with_capacity(stripped.len());
    let mut prev_filler = false;
    for c in stripped.chars() {
        if RESERVED.contains(&c) || c.is_control() || c.is_whitespace() || c == '_' {
            if !prev_filler {
                out.push('_');
            }
            prev_filler = true;
        } else {
            out.push(c);
            prev_filler = false;
        }
    }

    let trimmed = out.trim_matches(|c: char| c == '_' || c == '.');
    let capped = truncate_at_boundary(trimmed, FOLDER_NAME_MAX)
        .trim_end_matches(|c: char| c == '_' || c == '.');
    if capped.is_empty() {
        format!("run_{}", timestamp())
    } else {
        capped.to_string()
    }
}

/// Output folder for a capture flush: host + path of `source_url`.
///
/// Unparseable or host-less URLs get `capture_<timestamp>`.
pub fn capture_folder_name(source_url: &str) -> String {
    match Url::parse(source_url.trim()) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => sanitize_folder_name(&format!("{}{}", host, parsed.path())),
            None => format!("capture_{}", timestamp()),
        },
        Err(_) => format!("capture_{}", timestamp()),
    }
}

/// Strips disallowed characters from a file name.
///
/// Falls back to a timestamp-based name when nothing usable remains.
pub fn sanitize_filename(raw: &str) -> String {
    clean_filename(raw)
        .unwrap_or_else(|| format!("file_{}", Utc::now().timestamp_millis()))
}

/// Deterministic half of [`sanitize_filename`]: `None` when nothing usable remains.
pub fn clean_filename(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut prev_sep: Option<char> = None;

    for c in raw.chars() {
        if RESERVED.contains(&c) || c.is_control() {
            continue;
        }
        let c = if c.is_whitespace() { '_' } else { c };
        if matches!(c, '_' | '-' | '.') {
            if prev_sep == Some(c) {
                continue;
            }
            prev_sep = Some(c);
        } else {
            prev_sep = None;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches(|c: char| matches!(c, '.' | '_' | '-' | ' '));
    if trimmed.is_empty() {
        return None;
    }
    Some(cap_filename(trimmed, FILE_NAME_MAX))
}

/// Last non-empty path segment of `url`, ignoring query and fragment.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let segment = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()?;
    if segment == "." || segment == ".." {
        return None;
    }
    Some(segment.to_string())
}

/// Destination name for the fetch engine.
///
/// Must stay deterministic so a rerun finds the files it wrote last time.
pub fn fetch_filename(url: &str, index: usize) -> String {
    filename_from_url(url)
        .and_then(|segment| clean_filename(&segment))
        .unwrap_or_else(|| format!("image_{}.jpg", index))
}

/// Buffer key for an intercepted image response.
pub fn capture_filename(url: &str, content_type: Option<&str>) -> String {
    match filename_from_url(url) {
        Some(segment) if has_extension(&segment) => segment,
        _ => synthetic_image_name(content_type),
    }
}

/// `image_<millis>_<random>.<ext>`, extension from the content type.
pub fn synthetic_image_name(content_type: Option<&str>) -> String {
    format!(
        "image_{}_{:08x}.{}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>(),
        extension_for_content_type(content_type)
    )
}

/// Maps an image content type to a file extension. Unknown types map to `jpg`.
pub fn extension_for_content_type(content_type: Option<&str>) -> &'static str {
    let essence = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .unwrap_or_default();

    match essence.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" | "image/apng" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/avif" => "avif",
        "image/bmp" | "image/x-ms-bmp" => "bmp",
        "image/svg+xml" => "svg",
        "image/tiff" => "tiff",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        "image/heic" => "heic",
        "image/heif" => "heif",
        _ => "jpg",
    }
}

/// `photo.jpg` with `n = 2` becomes `photo-2.jpg`.
///
/// The stem is shortened when needed so the result stays within
/// [`FILE_NAME_MAX`] bytes; the suffix and extension are always kept.
pub fn with_collision_suffix(name: &str, n: usize) -> String {
    let suffix = format!("-{}", n);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.len() + suffix.len() + 1 < FILE_NAME_MAX => {
            let keep = FILE_NAME_MAX - ext.len() - suffix.len() - 1;
            format!("{}{}.{}", truncate_at_boundary(stem, keep), suffix, ext)
        }
        _ => {
            let keep = FILE_NAME_MAX.saturating_sub(suffix.len());
            format!("{}{}", truncate_at_boundary(name, keep), suffix)
        }
    }
}

fn has_extension(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// Drops a leading `scheme://`. A `://` later in the string (say inside a
/// query) is left alone.
fn strip_protocol(s: &str) -> &str {
    match s.split_once("://") {
        Some((scheme, rest))
            if !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c: char| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) =>
        {
            rest
        }
        _ => s,
    }
}

fn cap_filename(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.len() + 1 < max => {
            let keep = max - ext.len() - 1;
            format!("{}.{}", truncate_at_boundary(stem, keep), ext)
        }
        _ => truncate_at_boundary(name, max).to_string(),
    }
}

fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut take = max;
    while take > 0 && !s.is_char_boundary(take) {
        take -= 1;
    }
    &s[..take]
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_from_url_drops_protocol() {
        assert_eq!(
            sanitize_folder_name("https://example.com/gallery/cats/"),
            "example.com_gallery_cats"
        );
        assert_eq!(sanitize_folder_name("my run: 1"), "my_run_1");
    }

    #[test]
    fn only_leading_scheme_is_stripped() {
        assert_eq!(
            sanitize_folder_name("gallery?next=http://x"),
            "gallery_next=http_x"
        );
        assert_eq!(sanitize_folder_name("svn+ssh://host/repo"), "host_repo");
    }

    #[test]
    fn folder_is_capped() {
        let long = format!("https://example.com/{}", "a".repeat(400));
        assert_eq!(sanitize_folder_name(&long).len(), FOLDER_NAME_MAX);
    }

    #[test]
    fn empty_folder_gets_timestamp() {
        assert!(sanitize_folder_name("///").starts_with("run_"));
    }

    #[test]
    fn capture_folder_uses_host_and_path() {
        assert_eq!(
            capture_folder_name("https://img.example.org/albums/42?page=2"),
            "img.example.org_albums_42"
        );
        assert!(capture_folder_name("not a url").starts_with("capture_"));
    }

    #[test]
    fn filename_strips_reserved() {
        assert_eq!(sanitize_filename("pho*to.jpg"), "photo.jpg");
        assert_eq!(sanitize_filename("a<b>c|d.png"), "abcd.png");
        assert_eq!(sanitize_filename("my  photo.jpg"), "my_photo.jpg");
        assert_eq!(sanitize_filename("x__y--z..png"), "x_y-z.png");
    }

    #[test]
    fn filename_empty_falls_back() {
        assert!(sanitize_filename("???").starts_with("file_"));
        assert_eq!(clean_filename("..."), None);
    }

    #[test]
    fn filename_cap_keeps_extension() {
        let long = format!("{}.jpeg", "b".repeat(300));
        let out = sanitize_filename(&long);
        assert_eq!(out.len(), FILE_NAME_MAX);
        assert!(out.ends_with(".jpeg"));
    }

    #[test]
    fn url_segment() {
        assert_eq!(
            filename_from_url("https://cdn.example.com/a/b/cat.png?w=200#x").as_deref(),
            Some("cat.png")
        );
        assert_eq!(filename_from_url("https://cdn.example.com/"), None);
        assert_eq!(filename_from_url("::nope::"), None);
    }

    #[test]
    fn fetch_name_is_deterministic() {
        assert_eq!(fetch_filename("https://x.test/img/a.jpg", 3), "a.jpg");
        assert_eq!(fetch_filename("https://x.test/", 7), "image_7.jpg");
        assert_eq!(fetch_filename("garbage", 1), "image_1.jpg");
    }

    #[test]
    fn capture_name_synthesized_without_extension() {
        assert_eq!(
            capture_filename("https://x.test/p/cat.webp", Some("image/webp")),
            "cat.webp"
        );
        let synthetic = capture_filename("https://x.test/p/12345", Some("image/png"));
        assert!(synthetic.starts_with("image_"));
        assert!(synthetic.ends_with(".png"));
    }

    #[test]
    fn content_type_table() {
        assert_eq!(extension_for_content_type(Some("image/jpeg")), "jpg");
        assert_eq!(extension_for_content_type(Some("IMAGE/PNG; charset=binary")), "png");
        assert_eq!(extension_for_content_type(Some("image/svg+xml")), "svg");
        assert_eq!(extension_for_content_type(Some("image/x-unknown")), "jpg");
        assert_eq!(extension_for_content_type(None), "jpg");
    }

    #[test]
    fn collision_suffix() {
        assert_eq!(with_collision_suffix("photo.jpg", 1), "photo-1.jpg");
        assert_eq!(with_collision_suffix("README", 2), "README-2");
    }

    #[test]
    fn collision_suffix_respects_name_limit() {
        let base = format!("{}.jpg", "b".repeat(FILE_NAME_MAX - 4));
        assert_eq!(base.len(), FILE_NAME_MAX);

        let first = with_collision_suffix(&base, 1);
        assert_eq!(first.len(), FILE_NAME_MAX);
        assert!(first.ends_with("b-1.jpg"));

        let far = with_collision_suffix(&base, 1000);
        assert_eq!(far.len(), FILE_NAME_MAX);
        assert!(far.ends_with("-1000.jpg"));
        assert_ne!(first, with_collision_suffix(&base, 2));

        let bare = "c".repeat(FILE_NAME_MAX);
        assert_eq!(with_collision_suffix(&bare, 7).len(), FILE_NAME_MAX);
    }
}
