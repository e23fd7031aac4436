//! Image URL discovery from page HTML, feeding the fetch engine.

use crate::models::AssetReference;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

const IMAGE_EXTS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif", ".bmp", ".svg", ".tif", ".tiff", ".ico",
    ".heic",
];

const IMAGE_ATTRS: &[&str] = &["src", "data-src", "data-original", "data-lazy-src"];

#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("invalid page url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("page returned http status {0}")]
    Status(u16),
    #[error("bad css selector {selector}: {reason}")]
    Selector {
        selector: &'static str,
        reason: String,
    },
}

/// Downloads the HTML of `page_url`.
pub async fn fetch_page(client: &Client, page_url: &str) -> Result<String, DiscoverError> {
    let response = client.get(page_url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DiscoverError::Status(status.as_u16()));
    }
    Ok(response.text().await?)
}

/// Collects image URLs referenced by `html`, absolute and in first-seen order.
///
/// Looks at `img` sources (including common lazy-load attributes and the
/// widest `srcset` entry), `picture > source` sets, `og:image` metadata and
/// links that point straight at an image file.
pub fn discover_image_urls(
    html: &str,
    page_url: &str,
) -> Result<Vec<AssetReference>, DiscoverError> {
    let base = Url::parse(page_url)?;
    let document = Html::parse_document(html);

    let selector_img = selector("img")?;
    let selector_source = selector("picture source[srcset]")?;
    let selector_meta = selector(r#"meta[property="og:image"][content]"#)?;
    let selector_anchor = selector("a[href]")?;

    let mut found = Vec::new();
    let mut seen = HashSet::new();

    for img in document.select(&selector_img) {
        let el = img.value();
        for attr in IMAGE_ATTRS {
            if let Some(url) = el.attr(attr).and_then(|v| normalize_url_with_base(v, &base)) {
                push_unique(&mut found, &mut seen, url);
            }
        }
        for attr in ["srcset", "data-srcset"] {
            if let Some(url) = el.attr(attr).and_then(|v| parse_srcset_best(v, &base)) {
                push_unique(&mut found, &mut seen, url);
            }
        }
    }

    for source in document.select(&selector_source) {
        if let Some(url) = source
            .value()
            .attr("srcset")
            .and_then(|v| parse_srcset_best(v, &base))
        {
            push_unique(&mut found, &mut seen, url);
        }
    }

    for meta in document.select(&selector_meta) {
        if let Some(url) = meta
            .value()
            .attr("content")
            .and_then(|v| normalize_url_with_base(v, &base))
        {
            push_unique(&mut found, &mut seen, url);
        }
    }

    for anchor in document.select(&selector_anchor) {
        if let Some(url) = anchor
            .value()
            .attr("href")
            .and_then(|v| normalize_url_with_base(v, &base))
            .filter(|url| looks_like_image_url(url))
        {
            push_unique(&mut found, &mut seen, url);
        }
    }

    Ok(AssetReference::from_urls(found))
}

fn selector(css: &'static str) -> Result<Selector, DiscoverError> {
    Selector::parse(css).map_err(|e| DiscoverError::Selector {
        selector: css,
        reason: e.to_string(),
    })
}

fn push_unique(found: &mut Vec<String>, seen: &mut HashSet<String>, url: String) {
    if seen.insert(url.clone()) {
        found.push(url);
    }
}

fn normalize_url_with_base(raw_url: &str, base_url: &Url) -> Option<String> {
    let raw_url = raw_url.trim();
    if raw_url.is_empty() {
        return None;
    }
    let lower = raw_url.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("data:")
        || lower.starts_with("mailto:")
        || lower.starts_with('#')
    {
        return None;
    }

    let mut joined = base_url.join(raw_url).ok()?;
    if !matches!(joined.scheme(), "http" | "https") {
        return None;
    }
    joined.set_fragment(None);
    Some(joined.to_string())
}

fn looks_like_image_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            let path = parsed.path().to_ascii_lowercase();
            IMAGE_EXTS.iter().any(|ext| path.ends_with(ext))
        }
        Err(_) => false,
    }
}

/// Picks the largest candidate of a `srcset` by width or density descriptor.
fn parse_srcset_best(srcset: &str, base_url: &Url) -> Option<String> {
    let mut best: Option<(i64, String)> = None;
    for part in srcset.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mut bits = part.split_whitespace();
        let Some(candidate) = bits.next().and_then(|u| normalize_url_with_base(u, base_url)) else {
            continue;
        };
        let score = match bits.next().map(|d| d.to_ascii_lowercase()) {
            Some(d) if d.ends_with('w') => d.trim_end_matches('w').parse::<i64>().unwrap_or(1),
            Some(d) if d.ends_with('x') => {
                (d.trim_end_matches('x').parse::<f64>().unwrap_or(1.0) * 1000.0) as i64
            }
            _ => 1,
        };
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, candidate));
        }
    }
    best.map(|(_, url)| url)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://example.com/gallery/index.html";

    fn urls(html: &str) -> Vec<String> {
        discover_image_urls(html, PAGE)
            .unwrap()
            .into_iter()
            .map(|a| a.url)
            .collect()
    }

    #[test]
    fn resolves_relative_and_dedupes() {
        let html = r#"
            <img src="a.jpg">
            <img src="/static/b.png#frag">
            <img src="https://example.com/gallery/a.jpg">
        "#;
        assert_eq!(
            urls(html),
            vec![
                "https://example.com/gallery/a.jpg".to_string(),
                "https://example.com/static/b.png".to_string(),
            ]
        );
    }

    #[test]
    fn lazy_attributes_and_srcset() {
        let html = r#"
            <img data-src="lazy.webp" srcset="small.jpg 320w, large.jpg 1280w">
            <picture><source srcset="p1.avif 1x, p2.avif 2x"></picture>
        "#;
        assert_eq!(
            urls(html),
            vec![
                "https://example.com/gallery/lazy.webp".to_string(),
                "https://example.com/gallery/large.jpg".to_string(),
                "https://example.com/gallery/p2.avif".to_string(),
            ]
        );
    }

    #[test]
    fn skips_data_uris_and_non_image_links() {
        let html = r#"
            <img src="data:image/png;base64,AAAA">
            <a href="next.html">next</a>
            <a href="full/photo.JPG">full</a>
            <meta property="og:image" content="https://cdn.example.com/og.png">
        "#;
        assert_eq!(
            urls(html),
            vec![
                "https://cdn.example.com/og.png".to_string(),
                "https://example.com/gallery/full/photo.JPG".to_string(),
            ]
        );
    }

    #[test]
    fn indexes_follow_discovery_order() {
        let refs = discover_image_urls(r#"<img src="1.jpg"><img src="2.jpg">"#, PAGE).unwrap();
        assert_eq!(refs[0].index, 0);
        assert_eq!(refs[1].index, 1);
    }

    #[test]
    fn selectors_parse_and_bad_ones_are_errors() {
        assert!(selector("picture source[srcset]").is_ok());
        assert!(matches!(
            selector("img[[["),
            Err(DiscoverError::Selector { selector: "img[[[", .. })
        ));
    }

    #[test]
    fn invalid_page_url() {
        assert!(matches!(
            discover_image_urls("<img src=a.jpg>", "nope"),
            Err(DiscoverError::InvalidUrl(_))
        ));
    }
}
