use crate::scripts;
use anyhow::{Context, Result};
use async_trait::async_trait;
use coinpulse_core::{FetcherFactory, PageFetcher};
use serde_json::{json, Value};
use url::Url;

const PAGE_SIZE: u32 = 50;
const USER_AGENT: &str = concat!("coinpulse/", env!("CARGO_PKG_VERSION"));

/// Page transport backed by Reddit's public JSON listing endpoints.
///
/// Stands in for a headless browser: `navigate` fetches the listing or a
/// post document, the worker's extraction scripts are answered from the
/// parsed JSON, and "scrolling" advances the listing cursor. Listing state
/// survives a round trip to a post page, like a browser's back navigation.
pub struct RedditFetcher {
    client: reqwest::Client,
    listing_url: Option<String>,
    after: Option<String>,
    listing_children: Vec<Value>,
    post_doc: Option<Value>,
}

impl RedditFetcher {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            listing_url: None,
            after: None,
            listing_children: Vec::new(),
            post_doc: None,
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned error status"))?;
        response
            .json()
            .await
            .with_context(|| format!("{url} response was not JSON"))
    }

    async fn fetch_listing_page(&mut self) -> Result<()> {
        let listing = self
            .listing_url
            .as_deref()
            .context("no listing navigated yet")?;

        let mut url = format!("{}?limit={PAGE_SIZE}", json_url(listing));
        if let Some(after) = &self.after {
            url.push_str(&format!("&after={after}"));
        }

        let doc = self.get_json(&url).await?;
        self.after = doc["data"]["after"].as_str().map(str::to_string);
        self.listing_children = doc["data"]["children"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        Ok(())
    }

    fn extract_posts(&self) -> Value {
        let origin = self
            .listing_url
            .as_deref()
            .and_then(|u| Url::parse(u).ok())
            .map(|u| u.origin().ascii_serialization());

        let posts: Vec<Value> = self
            .listing_children
            .iter()
            .filter_map(|child| {
                let data = child.get("data")?;
                let permalink = data["permalink"].as_str()?;
                let link = match &origin {
                    Some(origin) => format!("{origin}{permalink}"),
                    None => permalink.to_string(),
                };
                Some(json!({
                    "title": data["title"].as_str().unwrap_or_default(),
                    "content": data["selftext"].as_str().unwrap_or_default(),
                    "author": data["author"].as_str().unwrap_or_default(),
                    "link": link,
                    "createdUtc": data["created_utc"].as_f64().unwrap_or(0.0),
                    "upvotes": data["ups"].as_u64().unwrap_or(0),
                    "numComments": data["num_comments"].as_u64().unwrap_or(0),
                }))
            })
            .collect();

        Value::Array(posts)
    }

    fn extract_comments(&self) -> Value {
        // A post document is a two-element array: the post listing and the
        // comment listing.
        let comments: Vec<Value> = self
            .post_doc
            .as_ref()
            .and_then(|doc| doc.get(1))
            .and_then(|listing| listing["data"]["children"].as_array())
            .map(|children| {
                children
                    .iter()
                    .filter(|c| c["kind"].as_str() == Some("t1"))
                    .filter_map(|c| c["data"]["body"].as_str())
                    .map(|body| Value::String(body.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        Value::Array(comments)
    }

    async fn scroll_more(&mut self) -> Result<Value> {
        if self.after.is_none() {
            return Ok(Value::Bool(false));
        }
        self.fetch_listing_page().await?;
        Ok(Value::Bool(!self.listing_children.is_empty()))
    }
}

#[async_trait]
impl PageFetcher for RedditFetcher {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        if self.listing_url.as_deref() == Some(url) {
            // Back to the listing: keep the cursor and the loaded batch.
            self.post_doc = None;
            return Ok(());
        }

        if self.listing_url.is_none() {
            self.listing_url = Some(url.to_string());
            self.after = None;
            return self.fetch_listing_page().await;
        }

        let doc = self.get_json(&json_url(url)).await?;
        self.post_doc = Some(doc);
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value> {
        if script == scripts::EXTRACT_POSTS {
            Ok(self.extract_posts())
        } else if script == scripts::EXTRACT_COMMENTS {
            Ok(self.extract_comments())
        } else if script == scripts::SCROLL_MORE {
            self.scroll_more().await
        } else {
            anyhow::bail!("unsupported extraction script")
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.listing_children.clear();
        self.post_doc = None;
        Ok(())
    }
}

/// `https://host/r/x/new/` -> `https://host/r/x/new.json`
fn json_url(url: &str) -> String {
    format!("{}.json", url.trim_end_matches('/'))
}

/// Creates one isolated [`RedditFetcher`] per scrape worker, sharing the
/// HTTP connection pool.
pub struct RedditFetcherFactory {
    client: reqwest::Client,
}

impl RedditFetcherFactory {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reddit HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FetcherFactory for RedditFetcherFactory {
    async fn create(&self) -> Result<Box<dyn PageFetcher>> {
        Ok(Box::new(RedditFetcher::new(self.client.clone())))
    }
}
