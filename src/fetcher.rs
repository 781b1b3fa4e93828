use std::time::Duration;

use reqwest::{Client, StatusCode};
use rss::Channel;
use thiserror::Error;

const USER_AGENT: &str = "feedloop/0.1 (RSS aggregator)";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status code: {0}")]
    Status(StatusCode),
    #[error("invalid feed document: {0}")]
    Malformed(#[from] rss::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFeed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<FetchedItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedItem {
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    /// Publication date exactly as the document carried it, unparsed.
    pub pub_date: Option<String>,
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let bytes = response.bytes().await?;
        let channel = Channel::read_from(&bytes[..])?;
        Ok(FetchedFeed::from(channel))
    }
}

impl From<Channel> for FetchedFeed {
    fn from(channel: Channel) -> Self {
        // Items without a link carry nothing we can store; drop them here.
        let items = channel
            .items()
            .iter()
            .filter_map(|item| {
                let link = item.link()?;
                Some(FetchedItem {
                    title: decode(item.title().unwrap_or_default()),
                    link: link.to_string(),
                    description: item.description().map(decode),
                    pub_date: item.pub_date().map(str::to_string),
                })
            })
            .collect();

        Self {
            title: decode(channel.title()),
            link: channel.link().to_string(),
            description: decode(channel.description()),
            items,
        }
    }
}

/// Entities that survive XML decoding (double-escaped feeds) get one more
/// pass here. Links are left untouched.
fn decode(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}
