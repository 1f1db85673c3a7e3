use core::time::Duration;
use std::time::SystemTime;

use reqwest::{
    Client, Url,
    header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT},
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    util::server_date,
};

mod constants {
    use core::time::Duration;

    macro_rules! env_or_default {
        ($name:expr, $default:expr) => {
            if let Some(s) = option_env!($name) {
                s
            } else {
                $default
            }
        };
    }

    pub const USER_AGENT: &str = env_or_default!(
        "VAHAN_USER_AGENT",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36"
    );
    pub const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
    pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
    pub const TIMEOUT: Duration = Duration::from_secs(40);
}

pub use constants::TIMEOUT;

/// A response as the cascade sees it.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub date: Option<SystemTime>,
    pub body: String,
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self { status: 200, date: None, body: body.into() }
    }

    /// Non-2xx statuses become [`Error::Status`].
    pub fn success(self) -> Result<Self> {
        if (200..300).contains(&self.status) {
            Ok(self)
        } else {
            Err(Error::Status(self.status))
        }
    }
}

/// The last request sent, kept so a failure can be replayed by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub form: Vec<(String, String)>,
}

#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn get(&mut self, url: &str) -> Result<Reply>;
    async fn post(&mut self, url: &str, form: &[(String, String)]) -> Result<Reply>;
}

/// Session-bound HTTP client with the browser-like headers the dashboard expects.
pub fn basic(endpoint: &str, timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(constants::USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(constants::ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(constants::ACCEPT_LANGUAGE));
    if let Ok(url) = Url::parse(endpoint) {
        if let Ok(referer) = HeaderValue::from_str(url.as_str()) {
            headers.insert(REFERER, referer);
        }
        if let Ok(origin) = HeaderValue::from_str(&url.origin().ascii_serialization()) {
            headers.insert(ORIGIN, origin);
        }
    }

    Ok(Client::builder()
        .default_headers(headers)
        .cookie_store(true)
        .timeout(timeout)
        .build()?)
}

pub struct Http {
    client: Client,
}

impl Http {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        Ok(Self { client: basic(endpoint, timeout)? })
    }
}

impl Transport for Http {
    async fn get(&mut self, url: &str) -> Result<Reply> {
        let res = self.client.get(url).send().await?;
        let status = res.status().as_u16();
        let date = server_date(res.headers());
        Ok(Reply { status, date, body: res.text().await? })
    }

    async fn post(&mut self, url: &str, form: &[(String, String)]) -> Result<Reply> {
        let res = self
            .client
            .post(url)
            .header("Faces-Request", "partial/ajax")
            .header("X-Requested-With", "XMLHttpRequest")
            .form(form)
            .send()
            .await?;
        let status = res.status().as_u16();
        let date = server_date(res.headers());
        Ok(Reply { status, date, body: res.text().await? })
    }
}
