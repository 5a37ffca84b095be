use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use runway_types::{Step, StepContext, StepError, StepExecutor, StepKind};
use serde::Serialize;
use serde_json::Value;

const DEFAULT_MAX_ITEMS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Feed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub items: Vec<FeedItem>,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Title,
    Link,
    Summary,
    Published,
    Other,
}

impl Field {
    fn from_tag(name: &[u8]) -> Self {
        match name {
            b"title" => Field::Title,
            b"link" => Field::Link,
            b"description" | b"summary" | b"content" => Field::Summary,
            b"pubDate" | b"published" | b"updated" => Field::Published,
            _ => Field::Other,
        }
    }
}

fn href(tag: &BytesStart<'_>) -> Option<String> {
    let attr = tag.try_get_attribute("href").ok()??;
    attr.unescape_value().ok().map(|v| v.into_owned())
}

/// Reads RSS 2.0 `<item>`s or Atom `<entry>`s, keeping at most `max_items`.
pub fn parse_feed(xml: &str, max_items: usize) -> Result<Feed, StepError> {
    let mut reader = Reader::from_str(xml);
    let mut feed = Feed::default();
    let mut current: Option<FeedItem> = None;
    let mut field = Field::Other;

    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) => {
                let name = tag.local_name();
                match name.as_ref() {
                    b"item" | b"entry" => current = Some(FeedItem::default()),
                    other => {
                        field = Field::from_tag(other);
                        if field == Field::Link
                            && let (Some(item), Some(link)) = (current.as_mut(), href(&tag))
                            && item.link.is_empty()
                        {
                            item.link = link;
                        }
                    }
                }
            }
            Ok(Event::Empty(tag)) => {
                if tag.local_name().as_ref() == b"link"
                    && let (Some(item), Some(link)) = (current.as_mut(), href(&tag))
                    && item.link.is_empty()
                {
                    item.link = link;
                }
            }
            Ok(Event::Text(text)) => {
                let text = text
                    .unescape()
                    .map_err(|e| StepError::Failed(format!("malformed feed text: {e}")))?;
                append(&mut feed, current.as_mut(), field, &text);
            }
            Ok(Event::CData(data)) => {
                let raw = data.into_inner();
                append(&mut feed, current.as_mut(), field, &String::from_utf8_lossy(&raw));
            }
            Ok(Event::End(tag)) => {
                field = Field::Other;
                if matches!(tag.local_name().as_ref(), b"item" | b"entry")
                    && let Some(item) = current.take()
                {
                    feed.items.push(item);
                    if feed.items.len() >= max_items {
                        break;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(StepError::Failed(format!(
                    "feed is not well-formed XML at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
    }
    Ok(feed)
}

fn append(feed: &mut Feed, item: Option<&mut FeedItem>, field: Field, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    match item {
        Some(item) => {
            let slot = match field {
                Field::Title => &mut item.title,
                Field::Link => &mut item.link,
                Field::Summary => &mut item.summary,
                Field::Published => item.published.get_or_insert_with(String::new),
                Field::Other => return,
            };
            slot.push_str(text);
        }
        None if field == Field::Title && feed.title.is_none() => {
            feed.title = Some(text.to_string());
        }
        None => {}
    }
}

/// `parse_feed`: `url` (fetched) or an XML document from a prior step; `max_items`.
pub struct ParseFeedStep {
    client: reqwest::Client,
}

impl ParseFeedStep {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StepExecutor for ParseFeedStep {
    fn kind(&self) -> StepKind {
        StepKind::ParseFeed
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<Value, StepError> {
        let source = ctx
            .input_value(step, "url")
            .and_then(Value::as_str)
            .ok_or_else(|| StepError::MissingInput("url".into()))?;
        let max_items = step
            .config
            .get("max_items")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_ITEMS);

        let document = if source.starts_with("http://") || source.starts_with("https://") {
            let response = self
                .client
                .get(source)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| StepError::Failed(format!("fetching feed {source}: {e}")))?;
            response
                .text()
                .await
                .map_err(|e| StepError::Failed(format!("reading feed {source}: {e}")))?
        } else {
            source.to_string()
        };

        let feed = parse_feed(&document, max_items)?;
        let count = feed.items.len();
        let mut output = serde_json::to_value(&feed)
            .map_err(|e| StepError::Failed(format!("encoding feed: {e}")))?;
        if let Value::Object(map) = &mut output {
            map.insert("count".into(), Value::from(count));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Rust Blog</title>
  <item><title>Rust 1.90</title><link>https://blog.rust-lang.org/1.90</link>
    <description><![CDATA[<p>New release</p>]]></description><pubDate>Thu, 18 Sep 2025 00:00:00 GMT</pubDate></item>
  <item><title>Async &amp; you</title><link>https://blog.rust-lang.org/async</link></item>
  <item><title>Third</title><link>https://blog.rust-lang.org/3</link></item>
</channel></rss>"#;

    const ATOM: &str = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Releases</title>
  <entry><title>v2.0</title><link rel="alternate" href="https://example.com/v2"/><summary>Big one</summary><updated>2026-01-01T00:00:00Z</updated></entry>
</feed>"#;

    #[test]
    fn reads_rss_items_and_channel_title() {
        let feed = parse_feed(RSS, 10).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Rust Blog"));
        assert_eq!(feed.items.len(), 3);
        assert_eq!(feed.items[0].summary, "<p>New release</p>");
        assert_eq!(
            feed.items[0].published.as_deref(),
            Some("Thu, 18 Sep 2025 00:00:00 GMT")
        );
        assert_eq!(feed.items[1].title, "Async & you");
        assert!(feed.items[1].published.is_none());
    }

    #[test]
    fn stops_at_max_items() {
        let feed = parse_feed(RSS, 2).unwrap();
        assert_eq!(feed.items.len(), 2);
    }

    #[test]
    fn reads_atom_links_from_href() {
        let feed = parse_feed(ATOM, 10).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Releases"));
        assert_eq!(
            feed.items[0],
            FeedItem {
                title: "v2.0".into(),
                link: "https://example.com/v2".into(),
                summary: "Big one".into(),
                published: Some("2026-01-01T00:00:00Z".into()),
            }
        );
    }

    #[test]
    fn broken_documents_fail_the_step() {
        assert!(parse_feed("<rss><channel><item></channel>", 10).is_err());
    }

    #[tokio::test]
    async fn parses_documents_handed_over_by_earlier_steps() {
        let step = Step::new("parse", runway_types::StepAction::ParseFeed)
            .with_input("step:fetch:body")
            .with_config("max_items", 1);
        let mut ctx = StepContext::default();
        ctx.outputs
            .insert("fetch".into(), serde_json::json!({ "body": RSS }));

        let out = ParseFeedStep::new(reqwest::Client::new())
            .execute(&step, &ctx)
            .await
            .unwrap();
        assert_eq!(out["count"], 1);
        assert_eq!(out["items"][0]["title"], "Rust 1.90");
    }
}
