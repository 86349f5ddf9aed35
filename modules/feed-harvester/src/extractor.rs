// Extractor: one rendered feed item (outer HTML) -> Record, or Skip.
//
// Pure over its input apart from the observation timestamp, which callers can
// pin with `extract_at`. Malformed and promoted items become `Skip`; nothing
// here returns an error or panics on bad markup.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use harvest_common::{Engagement, Record, BREAK_MARKER};

use crate::links::outbound_links;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

static TWEET_ARTICLE: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"article[data-testid="tweet"]"#));
static ANY_ARTICLE: LazyLock<Selector> = LazyLock::new(|| selector("article"));
static STATUS_LINK: LazyLock<Selector> = LazyLock::new(|| selector(r#"a[href*="/status/"]"#));
static USER_NAME: LazyLock<Selector> = LazyLock::new(|| selector(r#"[data-testid="User-Name"]"#));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static AVATAR: LazyLock<Selector> = LazyLock::new(|| selector(r#"img[draggable="true"]"#));
static BODY: LazyLock<Selector> = LazyLock::new(|| selector(r#"[data-testid="tweetText"]"#));
static COUNTS: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"[data-testid="app-text-transition-container"]"#));
static TIME: LazyLock<Selector> = LazyLock::new(|| selector("time[datetime]"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Record(Record),
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoArticle,
    /// Promoted items carry no status link.
    NoStatusLink,
    MissingHandle,
    MissingText,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::NoArticle => "no article",
            SkipReason::NoStatusLink => "no status link",
            SkipReason::MissingHandle => "missing handle",
            SkipReason::MissingText => "missing text",
        };
        f.write_str(s)
    }
}

pub struct Extractor {
    origin: Url,
}

impl Extractor {
    /// `origin` is the feed's own `scheme://host`, used to resolve relative
    /// links and to recognise internal ones.
    pub fn new(origin: &str) -> Result<Self> {
        let origin = Url::parse(origin).with_context(|| format!("Invalid feed origin: {origin}"))?;
        Ok(Self { origin })
    }

    pub fn extract(&self, markup: &str) -> Extraction {
        self.extract_at(markup, Utc::now().timestamp())
    }

    pub fn extract_at(&self, markup: &str, observed_at: i64) -> Extraction {
        let fragment = Html::parse_fragment(markup);
        let Some(article) = fragment
            .select(&TWEET_ARTICLE)
            .next()
            .or_else(|| fragment.select(&ANY_ARTICLE).next())
        else {
            return Extraction::Skip(SkipReason::NoArticle);
        };

        let natural_key = article
            .select(&STATUS_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(status_id)
            .unwrap_or_default();
        if natural_key.is_empty() {
            return Extraction::Skip(SkipReason::NoStatusLink);
        }

        let author = self.author(article);
        if author.handle.is_empty() {
            return Extraction::Skip(SkipReason::MissingHandle);
        }

        let body = article.select(&BODY).next();
        let text = body.map(normalized_text).unwrap_or_default();
        if text.is_empty() {
            return Extraction::Skip(SkipReason::MissingText);
        }

        let links = body
            .map(|b| outbound_links(b, &self.origin))
            .unwrap_or_default();

        let avatar_url = article
            .select(&AVATAR)
            .next()
            .and_then(|img| img.value().attr("src"))
            .unwrap_or_default()
            .to_string();

        let posted_at = article
            .select(&TIME)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
            .map(|dt| dt.timestamp());

        Extraction::Record(Record {
            natural_key,
            author_name: author.name,
            author_handle: author.handle,
            author_url: author.url,
            avatar_url,
            text,
            posted_at,
            observed_at,
            engagement: engagement(article),
            links: links.urls,
            link_texts: links.texts,
        })
    }

    /// Name and handle are the first two link texts of the author block,
    /// the profile URL is the first link's target.
    fn author(&self, article: ElementRef<'_>) -> Author {
        let scope = article.select(&USER_NAME).next().unwrap_or(article);

        let mut texts = Vec::with_capacity(2);
        let mut url = String::new();
        for anchor in scope.select(&ANCHOR) {
            let text = anchor.text().collect::<String>().trim().to_string();
            if text.is_empty() {
                continue;
            }
            if url.is_empty() {
                if let Some(href) = anchor.value().attr("href") {
                    url = self
                        .origin
                        .join(href)
                        .map(|u| u.to_string())
                        .unwrap_or_default();
                }
            }
            texts.push(text);
            if texts.len() == 2 {
                break;
            }
        }

        let mut texts = texts.into_iter();
        Author {
            name: texts.next().unwrap_or_default(),
            handle: texts.next().unwrap_or_default(),
            url,
        }
    }
}

struct Author {
    name: String,
    handle: String,
    url: String,
}

/// Item id from a status link: the segment after `status`.
fn status_id(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next()?;
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    segments.find(|s| *s == "status")?;
    segments
        .next()
        .filter(|id| !id.is_empty())
        .map(String::from)
}

/// Body text with `<br>` and embedded newlines turned into the break marker.
/// Emoji rendered as images contribute their alt text.
fn normalized_text(body: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in body.descendants() {
        match node.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(el) if el.name() == "br" => out.push('\n'),
            Node::Element(el) if el.name() == "img" => {
                if let Some(alt) = el.attr("alt") {
                    out.push_str(alt);
                }
            }
            _ => {}
        }
    }
    out.trim().replace("\r\n", "\n").replace('\n', BREAK_MARKER)
}

/// Counters by position: comment, like, share, view. Missing slots are empty.
fn engagement(article: ElementRef<'_>) -> Engagement {
    let counts: Vec<String> = article
        .select(&COUNTS)
        .map(|c| c.text().collect::<String>().trim().to_string())
        .collect();
    let at = |i: usize| counts.get(i).cloned().unwrap_or_default();
    Engagement {
        comments: at(0),
        likes: at(1),
        shares: at(2),
        views: at(3),
    }
}
