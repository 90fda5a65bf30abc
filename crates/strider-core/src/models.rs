use std::borrow::Cow;

use url::Url;

use crate::error::CrawlerError;

/// An extracted record: open map of field name to value.
pub type Item = serde_json::Map<String, serde_json::Value>;

/// The HTTP request a crawl [`Request`] wraps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// A plain `GET` for the given URL.
    pub fn get(url: Url) -> Self {
        Self {
            method: "GET".to_string(),
            url,
            headers: Vec::new(),
        }
    }

    /// Parses `url` and builds a `GET` for it.
    pub fn parse(url: &str) -> Result<Self, CrawlerError> {
        let url = Url::parse(url)
            .map_err(|e| CrawlerError::illegal_parameter(format!("invalid URL {url:?}: {e}")))?;
        Ok(Self::get(url))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }
}

/// The HTTP response a crawl [`Response`] wraps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Final URL, after redirects.
    pub url: Url,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(url: Url, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url,
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup, first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, replacing invalid UTF-8 sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// A unit of work for the fetch stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    http_req: Option<HttpRequest>,
    depth: u32,
}

impl Request {
    pub fn new(http_req: impl Into<Option<HttpRequest>>, depth: u32) -> Self {
        Self {
            http_req: http_req.into(),
            depth,
        }
    }

    pub fn http_req(&self) -> Option<&HttpRequest> {
        self.http_req.as_ref()
    }

    pub fn url(&self) -> Option<&Url> {
        self.http_req.as_ref().map(|req| &req.url)
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_valid(&self) -> bool {
        self.http_req.is_some()
    }
}

/// The result of fetching a [`Request`]; carries the request's depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    http_resp: Option<HttpResponse>,
    depth: u32,
}

impl Response {
    pub fn new(http_resp: impl Into<Option<HttpResponse>>, depth: u32) -> Self {
        Self {
            http_resp: http_resp.into(),
            depth,
        }
    }

    pub fn http_resp(&self) -> Option<&HttpResponse> {
        self.http_resp.as_ref()
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_valid(&self) -> bool {
        self.http_resp.is_some()
    }
}

/// Anything an analyzer may produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Request(Request),
    Item(Item),
}

impl From<Request> for Data {
    fn from(request: Request) -> Self {
        Data::Request(request)
    }
}

impl From<Item> for Data {
    fn from(item: Item) -> Self {
        Data::Item(item)
    }
}
