use std::sync::LazyLock;

use scraper::{ElementRef, Selector};
use url::Url;

static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// Outbound links of one item body. `urls` and `texts` are parallel.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct OutboundLinks {
    pub urls: Vec<String>,
    pub texts: Vec<String>,
}

/// Resolve a raw href against the feed origin, with the fragment stripped.
fn resolve_href(raw: &str, base: &Url) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty()
        || raw.starts_with('#')
        || raw.starts_with("javascript:")
        || raw.starts_with("mailto:")
    {
        return None;
    }
    let mut parsed = if raw.starts_with("http://") || raw.starts_with("https://") {
        Url::parse(raw).ok()?
    } else {
        base.join(raw).ok()?
    };
    parsed.set_fragment(None);
    Some(parsed)
}

/// True for links back into the feed itself: its own host and subdomains.
/// Relative search and hashtag hrefs resolve onto the feed host, so they are
/// covered; the same paths on other hosts are ordinary outbound links.
fn is_internal(url: &Url, origin: &Url) -> bool {
    match (url.host_str(), origin.host_str()) {
        (Some(host), Some(own)) => host == own || host.ends_with(&format!(".{own}")),
        _ => true,
    }
}

/// Collect external links inside `container`, DOM order, each paired with
/// its displayed text.
pub fn outbound_links(container: ElementRef<'_>, origin: &Url) -> OutboundLinks {
    let mut links = OutboundLinks::default();

    for anchor in container.select(&ANCHOR) {
        let Some(url) = anchor
            .value()
            .attr("href")
            .and_then(|href| resolve_href(href, origin))
        else {
            continue;
        };
        if is_internal(&url, origin) {
            continue;
        }
        let text = anchor.text().collect::<String>().trim().to_string();
        links.urls.push(url.to_string());
        links.texts.push(text);
    }

    links
}
