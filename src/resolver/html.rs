//! Text, metadata and image extraction from fetched HTML.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::LazyLock;
use url::Url;

static META: LazyLock<Selector> = LazyLock::new(|| Selector::parse("meta").expect("Invalid selector"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").expect("Invalid selector"));
static HTML_ROOT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("html").expect("Invalid selector"));
static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").expect("Invalid selector"));

const SKIPPED: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "iframe", "nav", "footer", "form", "button",
    "select", "head",
];
const BLOCKS: &[&str] = &[
    "p", "div", "section", "article", "main", "header", "aside", "h1", "h2", "h3", "h4", "h5", "h6",
    "li", "ul", "ol", "tr", "table", "blockquote", "figure", "figcaption", "br", "hr", "pre",
];
const ICON_HINTS: &[&str] = &["icon", "logo", "sprite", "pixel", "avatar", "/assets/", "badge", "spinner"];

/// An image kept in the extracted text as a placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub index: usize,
    pub src: String,
    pub title: String,
    pub alt: String,
}

/// What the resolver needs from a page.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub title: String,
    pub metadata: HashMap<String, String>,
    pub text: String,
    pub images: Vec<ImageRef>,
}

impl ExtractedPage {
    /// First present metadata value among `keys`.
    pub fn meta(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|k| self.metadata.get(*k))
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    }
}

fn is_decorative(src: &str, element: &ElementRef) -> bool {
    let lower = src.to_lowercase();
    if lower.starts_with("data:") || lower.ends_with(".svg") || lower.contains(".svg?") {
        return true;
    }
    if ICON_HINTS.iter().any(|h| lower.contains(h)) {
        return true;
    }
    let tiny = |attr: &str| {
        element
            .value()
            .attr(attr)
            .and_then(|v| v.trim_end_matches("px").parse::<u32>().ok())
            .is_some_and(|v| v <= 32)
    };
    tiny("width") || tiny("height")
}

fn absolutize(src: &str, base: Option<&Url>) -> Option<String> {
    match Url::parse(src) {
        Ok(url) => Some(url.to_string()),
        Err(_) => base.and_then(|b| b.join(src).ok()).map(|u| u.to_string()),
    }
}

struct Walker<'a> {
    base: Option<&'a Url>,
    text: String,
    images: Vec<ImageRef>,
}

impl Walker<'_> {
    fn walk(&mut self, element: ElementRef) {
        let name = element.value().name();
        if SKIPPED.contains(&name) {
            return;
        }
        if name == "img" {
            self.image(element);
            return;
        }
        let block = BLOCKS.contains(&name);
        if block {
            self.text.push('\n');
        }
        for child in element.children() {
            if let Some(child_element) = ElementRef::wrap(child) {
                self.walk(child_element);
            } else if let Some(text) = child.value().as_text() {
                self.text.push_str(text);
            }
        }
        if block {
            self.text.push('\n');
        }
    }

    fn image(&mut self, element: ElementRef) {
        let value = element.value();
        let Some(src) = value.attr("src").or_else(|| value.attr("data-src")) else {
            return;
        };
        if is_decorative(src, &element) {
            return;
        }
        let Some(src) = absolutize(src.trim(), self.base) else {
            return;
        };
        let image = ImageRef {
            index: self.images.len() + 1,
            src,
            title: value.attr("title").unwrap_or_default().trim().to_string(),
            alt: value.attr("alt").unwrap_or_default().trim().to_string(),
        };
        self.text.push_str(&format!(
            " [Image {} Title='{}' Alt='{}'] ",
            image.index, image.title, image.alt
        ));
        self.images.push(image);
    }
}

/// Collapse runs of spaces within lines and runs of blank lines.
fn tidy(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() && out.last().is_none_or(|l| l.is_empty()) {
            continue;
        }
        out.push(line);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

/// Extract `<meta>` pairs, `<title>`, readable text with image placeholders.
pub fn extract_page(html: &str, page_url: &str) -> ExtractedPage {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();

    let mut metadata = HashMap::new();
    for meta in document.select(&META) {
        let value = meta.value();
        let key = value
            .attr("property")
            .or_else(|| value.attr("name"))
            .or_else(|| value.attr("itemprop"))
            .or_else(|| value.attr("http-equiv"));
        if let (Some(key), Some(content)) = (key, value.attr("content")) {
            metadata
                .entry(key.trim().to_lowercase())
                .or_insert_with(|| content.trim().to_string());
        }
    }
    if let Some(lang) = document
        .select(&HTML_ROOT)
        .next()
        .and_then(|h| h.value().attr("lang"))
    {
        metadata.insert("html_lang".to_string(), lang.trim().to_string());
    }

    let title = document
        .select(&TITLE)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let mut walker = Walker {
        base: base.as_ref(),
        text: String::new(),
        images: Vec::new(),
    };
    match document.select(&BODY).next() {
        Some(body) => walker.walk(body),
        None => walker.walk(document.root_element()),
    }

    ExtractedPage {
        title,
        metadata,
        text: tidy(&walker.text),
        images: walker.images,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html lang="en">
<head>
  <title>Chip plant opens | Example News</title>
  <meta property="og:title" content="Chip plant opens">
  <meta name="description" content="A new fab opens in Ohio.">
  <meta property="article:published_time" content="2025-01-07T08:00:00Z">
  <script>var tracking = 1;</script>
</head>
<body>
  <nav>Home | World | Tech</nav>
  <article>
    <h1>Chip plant opens</h1>
    <img src="/img/fab.jpg" alt="The fab" title="Fab exterior">
    <img src="/assets/logo.png" alt="logo">
    <img src="https://cdn.test/icon.svg">
    <p>The plant   employs three thousand people.</p>
    <p>Production starts next year.</p>
  </article>
  <footer>Copyright</footer>
</body>
</html>"#;

    #[test]
    fn test_extracts_metadata_and_title() {
        let page = extract_page(PAGE, "https://news.test/tech/chips");
        assert_eq!(page.title, "Chip plant opens | Example News");
        assert_eq!(page.meta(&["og:title"]).as_deref(), Some("Chip plant opens"));
        assert_eq!(page.meta(&["og:description", "description"]).as_deref(), Some("A new fab opens in Ohio."));
        assert_eq!(page.metadata.get("html_lang").map(String::as_str), Some("en"));
    }

    #[test]
    fn test_text_skips_chrome_and_keeps_image_placeholders() {
        let page = extract_page(PAGE, "https://news.test/tech/chips");
        assert!(page.text.contains("The plant employs three thousand people."));
        assert!(page.text.contains("[Image 1 Title='Fab exterior' Alt='The fab']"));
        assert!(!page.text.contains("Home | World"));
        assert!(!page.text.contains("tracking"));
        assert!(!page.text.contains("Copyright"));

        assert_eq!(page.images.len(), 1);
        assert_eq!(page.images[0].src, "https://news.test/img/fab.jpg");
    }
}
