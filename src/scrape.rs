use crate::settings::Selectors;
use crate::structs::Link;
use crate::Result;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;

pub const UNKNOWN: &str = "Unknown";
pub const NO_DESCRIPTION: &str = "Nothing";

pub fn selector(css: &str) -> Result<Selector> {
    // the parse error borrows `css`, so it can't be boxed directly
    Ok(Selector::parse(css).map_err(|e| format!("invalid selector {css:?}: {e:?}"))?)
}

/// Joins a portal-relative href onto the client base URL.
pub fn absolute_url(client_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.into()
    } else {
        format!("{client_url}{href}")
    }
}

/// Every anchor matching `css` that carries an href, in document order, without repeats.
pub fn parse_links(doc: &Html, css: &str, client_url: &str) -> Result<Vec<Link>> {
    let sel = selector(css)?;
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for anchor in doc.select(&sel) {
        let href = match anchor.value().attr("href") {
            Some(href) if !href.trim().is_empty() => href.trim(),
            _ => continue,
        };
        let url = absolute_url(client_url, href);
        if !seen.insert(url.clone()) {
            continue;
        }
        links.push(Link {
            title: collapse_whitespace(&anchor.text().collect::<String>()),
            url,
        });
    }

    Ok(links)
}

pub fn parse_courses(doc: &Html, selectors: &Selectors, client_url: &str) -> Result<Vec<Link>> {
    parse_links(doc, &selectors.course_link, client_url)
}

pub fn parse_contents(doc: &Html, selectors: &Selectors, client_url: &str) -> Result<Vec<Link>> {
    parse_links(doc, &selectors.content_link, client_url)
}

pub fn parse_pages(doc: &Html, selectors: &Selectors, client_url: &str) -> Result<Vec<Link>> {
    parse_links(doc, &selectors.page_link, client_url)
}

pub fn attachment_fragments<'a>(doc: &'a Html, css: &str) -> Result<Vec<ElementRef<'a>>> {
    let sel = selector(css)?;
    Ok(doc.select(&sel).collect())
}

/// The lines of a caption anchor, split at each `<br>`. Inline markup stays on its line.
pub fn caption_lines(anchor: ElementRef) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for node in anchor.descendants() {
        match node.value() {
            Node::Text(text) => current.push_str(text),
            Node::Element(el) if el.name() == "br" => lines.push(std::mem::take(&mut current)),
            _ => {}
        }
    }
    lines.push(current);

    lines
        .iter()
        .map(|line| collapse_whitespace(line))
        .filter(|line| !line.is_empty())
        .collect()
}

/// Splits caption lines into `(description, header)`.
///
/// With two or more lines the last one is the header. A lone line is the header
/// and the description falls back to [`NO_DESCRIPTION`].
pub fn split_caption(lines: &[String]) -> Result<(String, String)> {
    match lines {
        [] => Err("empty attachment caption")?,
        [header] => Ok((NO_DESCRIPTION.into(), header.clone())),
        [description @ .., header] => Ok((description.join("\n"), header.clone())),
    }
}

/// Splits `"<name>.<ext> - <YYYY-MM-DD HH:MM:SS>"` into `(name, upload_date)`.
///
/// Anything else is taken whole as the name, with an [`UNKNOWN`] date.
pub fn parse_header(header: &str) -> Result<(String, String)> {
    let header_re = Regex::new(r"^(.+\.[a-z]+) - (\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})")?;
    Ok(match header_re.captures(header) {
        Some(caps) => (caps[1].into(), caps[2].into()),
        None => (header.into(), UNKNOWN.into()),
    })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
