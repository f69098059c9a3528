//! Visible-text extraction from raw HTML.
//!
//! Walks the parsed DOM with `scraper`, skipping subtrees that never carry
//! page content (scripts, chrome, cookie banners, ads) and collapsing all
//! whitespace runs to a single space.

use scraper::{ElementRef, Html, Node, Selector};
use std::sync::LazyLock;

static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("static selector parses"));

/// Elements whose whole subtree is dropped.
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "iframe", "svg", "template",
    "head",
];

/// Class or id fragments marking banner and ad containers.
const NOISE_MARKERS: &[&str] = &[
    "cookie",
    "consent",
    "gdpr",
    "advert",
    "ad-banner",
    "ad-container",
    "ad-slot",
    "adsbygoogle",
    "sponsored",
];

/// Extract collapsed visible text from an HTML document.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::with_capacity(html.len() / 4);
    let root = document
        .select(&BODY)
        .next()
        .unwrap_or_else(|| document.root_element());
    collect(root, &mut raw);
    collapse_whitespace(&raw)
}

fn collect(element: ElementRef<'_>, out: &mut String) {
    if is_noise(element) {
        return;
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    collect(el, out);
                }
            }
            _ => {}
        }
    }
}

fn is_noise(element: ElementRef<'_>) -> bool {
    let value = element.value();
    if SKIPPED_TAGS.contains(&value.name()) {
        return true;
    }
    let id = value.id().unwrap_or("").to_ascii_lowercase();
    if NOISE_MARKERS.iter().any(|m| id.contains(m)) {
        return true;
    }
    value.classes().any(|class| {
        let class = class.to_ascii_lowercase();
        NOISE_MARKERS.iter().any(|m| class.contains(m))
    })
}

/// Replace every whitespace run with one space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Length in Unicode scalar values.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_chrome_and_scripts() {
        let html = r#"<html><head><title>T</title><style>body{}</style></head><body>
            <header>Site header</header>
            <nav><a href="/">Home</a></nav>
            <main><h1>Our   Pipeline</h1>
              <p>Phase 3
                 candidates</p>
              <script>var x = 1;</script>
            </main>
            <footer>Copyright</footer>
        </body></html>"#;
        assert_eq!(visible_text(html), "Our Pipeline Phase 3 candidates");
    }

    #[test]
    fn test_drops_cookie_and_ad_containers() {
        let html = r#"<body>
            <div id="onetrust-consent-sdk">Accept all cookies</div>
            <div class="Cookie-Banner">We use cookies</div>
            <aside class="ad-slot">Buy now</aside>
            <p>Oncology programs</p>
        </body>"#;
        assert_eq!(visible_text(html), "Oncology programs");
    }

    #[test]
    fn test_char_len_counts_scalars() {
        assert_eq!(char_len("héllo"), 5);
        assert_eq!("héllo".len(), 6);
    }
}
