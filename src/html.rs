//! Markup helpers shared by the extractors.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Selector};

const IMAGE_CDN_HOST: &str = "cdn.resfu.com";

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("static regex"));
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
static SIZE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"size=\d+x").expect("static regex"));
static LOSSY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"lossy=\d").expect("static regex"));

/// Compile a selector literal. Only ever called with constants.
pub(crate) fn sel(css: &'static str) -> Selector {
    Selector::parse(css).unwrap_or_else(|err| panic!("invalid selector {css:?}: {err:?}"))
}

/// Visible text of an element, whitespace collapsed.
pub fn text_of(el: ElementRef<'_>) -> String {
    collapse_ws(&el.text().collect::<Vec<_>>().join(" "))
}

pub fn collapse_ws(raw: &str) -> String {
    WS_RE.replace_all(raw, " ").trim().to_string()
}

/// Strip stray tags and collapse whitespace.
pub fn clean_text(raw: &str) -> String {
    collapse_ws(&TAG_RE.replace_all(raw, ""))
}

pub fn has_class(el: ElementRef<'_>, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

pub fn attr<'a>(el: ElementRef<'a>, name: &str) -> Option<&'a str> {
    el.value().attr(name).map(str::trim).filter(|v| !v.is_empty())
}

/// Select the first match below `el`.
pub fn first<'a>(el: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    el.select(selector).next()
}

/// Element ancestors, nearest first, at most `depth` of them.
pub fn ancestors(el: ElementRef<'_>, depth: usize) -> impl Iterator<Item = ElementRef<'_>> {
    el.ancestors().filter_map(ElementRef::wrap).take(depth)
}

pub fn absolutize(base_url: &str, href: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if let Some(rest) = href.strip_prefix("//") {
        format!("https://{rest}")
    } else if href.starts_with('/') {
        format!("{}{}", base_url.trim_end_matches('/'), href)
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), href)
    }
}

/// Positive number embedded in free text ("1,85 m" -> 1.85, "75 kgs" -> 75).
pub fn parse_number(raw: &str) -> Option<f64> {
    let digits: String = raw
        .replace(',', ".")
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let digits = digits.trim_matches('.');
    if digits.is_empty() {
        return None;
    }
    digits.parse::<f64>().ok().filter(|v| *v >= 0.0)
}

pub fn parse_count(raw: &str) -> Option<u32> {
    let n = parse_number(raw)?;
    if n.fract() != 0.0 || n > u32::MAX as f64 {
        return None;
    }
    Some(n as u32)
}

/// Ask the image CDN for a larger, lossless rendition. Best-effort only:
/// unrecognised hosts pass through untouched.
pub fn upgrade_image_url(url: &str, size: u32) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    if !url.contains(IMAGE_CDN_HOST) {
        return Some(url.to_string());
    }

    let sized = format!("size={size}x");
    let mut out = SIZE_RE.replace_all(url, sized.as_str()).into_owned();
    if !out.contains("size=") {
        out.push(if out.contains('?') { '&' } else { '?' });
        out.push_str(&sized);
    }
    out = LOSSY_RE.replace_all(&out, "lossy=0").into_owned();
    if !out.contains("lossy=") {
        out.push_str("&lossy=0");
    }
    Some(out.replace("/small/", "/big/").replace("/medium/", "/big/"))
}

/// One way of pulling a value out of a page.
pub type Strategy<C, T> = (&'static str, fn(&C) -> Option<T>);

/// Run strategies in order; the first that yields a value wins.
pub fn first_success<C, T>(ctx: &C, strategies: &[Strategy<C, T>]) -> Option<(T, &'static str)> {
    strategies
        .iter()
        .find_map(|(name, run)| run(ctx).map(|value| (value, *name)))
}
