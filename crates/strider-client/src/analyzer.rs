use std::collections::HashSet;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::json;
use strider_core::traits::{Analysis, Analyzer};
use strider_core::{
    CrawlerError, HttpRequest, HttpResponse, Item, Mid, Module, ModuleBase, ModuleType, Request,
    Response, calculate_score_simple,
};
use url::Url;

/// Analyzer module that turns an HTML page into one item and a child
/// request per outgoing link.
///
/// The item carries `url`, `title`, `depth` and `status`. Links are resolved
/// against the page URL, stripped of their fragment and deduplicated per
/// page; only `http`/`https` targets are kept. Non-HTML responses produce
/// nothing.
pub struct LinkAnalyzer {
    base: ModuleBase,
    links: Selector,
    title: Selector,
}

/// What one HTML document yielded.
#[derive(Debug, Default, PartialEq)]
struct PageData {
    title: Option<String>,
    links: Vec<Url>,
}

impl LinkAnalyzer {
    pub fn new(id: Mid) -> Result<Self, CrawlerError> {
        if id.module_type() != ModuleType::Analyzer {
            return Err(CrawlerError::illegal_parameter(format!(
                "MID {id} does not identify an analyzer"
            )));
        }
        Ok(Self {
            base: ModuleBase::new(id, Some(calculate_score_simple)),
            links: selector("a[href]")?,
            title: selector("title")?,
        })
    }

    fn extract(&self, base_url: &Url, html: &str) -> PageData {
        let document = Html::parse_document(html);
        let title = document
            .select(&self.title)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|title| !title.is_empty());

        let mut seen = HashSet::new();
        let links = document
            .select(&self.links)
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| resolve_link(base_url, href))
            .filter(|url| seen.insert(url.clone()))
            .collect();

        PageData { title, links }
    }
}

impl Module for LinkAnalyzer {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Analyzer for LinkAnalyzer {
    async fn analyze(&self, response: Response) -> Analysis {
        let call = self.base.begin();
        let mut analysis = Analysis::default();
        let Some(http) = response.http_resp() else {
            analysis.push_error(CrawlerError::analyzer("illegal parameter: nil HTTP response"));
            return analysis;
        };
        call.accept();

        if !is_html(http) {
            tracing::debug!(url = %http.url, content_type = ?http.content_type(), "Skipping non-HTML response");
            call.complete();
            return analysis;
        }
        let html = match std::str::from_utf8(&http.body) {
            Ok(html) => html,
            Err(e) => {
                analysis.push_error(CrawlerError::analyzer(format!(
                    "unreadable body from {}: {e}",
                    http.url
                )));
                return analysis;
            }
        };

        let page = self.extract(&http.url, html);
        let depth = response.depth();
        tracing::debug!(url = %http.url, links = page.links.len(), "Page analyzed");

        let mut item = Item::new();
        item.insert("url".into(), json!(http.url.as_str()));
        item.insert("title".into(), json!(page.title));
        item.insert("depth".into(), json!(depth));
        item.insert("status".into(), json!(http.status));
        analysis.push(item);

        for link in page.links {
            analysis.push(Request::new(HttpRequest::get(link), depth + 1));
        }
        call.complete();
        analysis
    }
}

fn selector(css: &str) -> Result<Selector, CrawlerError> {
    Selector::parse(css)
        .map_err(|e| CrawlerError::analyzer(format!("invalid selector {css:?}: {e}")))
}

/// Responses without a content type are treated as HTML.
fn is_html(http: &HttpResponse) -> bool {
    http.content_type()
        .is_none_or(|ct| ct.to_ascii_lowercase().contains("html"))
}

fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

#[cfg(test)]
mod tests {
    use strider_core::Data;
    use strider_core::testutil::{mid, response};

    use super::*;

    const PAGE: &str = r##"<html><head><title> Home </title></head><body>
        <a href="/about">About</a>
        <a href="/about#team">Team</a>
        <a href="https://other.org/x">Other</a>
        <a href="#top">Top</a>
        <a href="mailto:me@example.com">Mail</a>
        <a href="javascript:void(0)">JS</a>
        <a>no href</a>
    </body></html>"##;

    fn analyzer() -> LinkAnalyzer {
        LinkAnalyzer::new(mid("A1")).unwrap()
    }

    fn split(analysis: Analysis) -> (Vec<Item>, Vec<Request>) {
        let mut items = Vec::new();
        let mut requests = Vec::new();
        for data in analysis.data {
            match data {
                Data::Item(item) => items.push(item),
                Data::Request(request) => requests.push(request),
            }
        }
        (items, requests)
    }

    #[tokio::test]
    async fn test_emits_item_and_child_requests() {
        let analyzer = analyzer();
        let analysis = analyzer
            .analyze(response("http://example.com/", 200, PAGE, 1))
            .await;
        assert!(analysis.errors.is_empty());

        let (items, requests) = split(analysis);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["url"], json!("http://example.com/"));
        assert_eq!(items[0]["title"], json!("Home"));
        assert_eq!(items[0]["depth"], json!(1));
        assert_eq!(items[0]["status"], json!(200));

        let urls: Vec<_> = requests
            .iter()
            .map(|r| r.url().unwrap().to_string())
            .collect();
        assert_eq!(
            urls,
            vec!["http://example.com/about", "https://other.org/x"]
        );
        assert!(requests.iter().all(|r| r.depth() == 2));

        let counts = analyzer.counts();
        assert_eq!((counts.accepted, counts.completed), (1, 1));
    }

    #[tokio::test]
    async fn test_non_html_yields_nothing() {
        let http = HttpResponse::new(Url::parse("http://example.com/a.png").unwrap(), 200, "PNG")
            .with_header("Content-Type", "image/png");
        let analysis = analyzer().analyze(Response::new(http, 0)).await;
        assert!(analysis.data.is_empty());
        assert!(analysis.errors.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_body_is_an_analyzer_error() {
        let http = HttpResponse::new(
            Url::parse("http://example.com/").unwrap(),
            200,
            vec![0xff, 0xfe, 0x00],
        )
        .with_header("content-type", "text/html");
        let analysis = analyzer().analyze(Response::new(http, 0)).await;
        assert!(analysis.data.is_empty());
        assert_eq!(analysis.errors.len(), 1);
        assert!(analysis.errors[0].to_string().contains("analyzer error"));
    }

    #[tokio::test]
    async fn test_missing_http_response_is_rejected() {
        let analyzer = analyzer();
        let analysis = analyzer.analyze(Response::new(None::<HttpResponse>, 0)).await;
        assert_eq!(analysis.errors.len(), 1);
        assert_eq!(analyzer.accepted_count(), 0);
    }

    #[tokio::test]
    async fn test_untitled_page_has_null_title() {
        let analysis = analyzer()
            .analyze(response("http://example.com/", 200, "<p>hi</p>", 0))
            .await;
        let (items, requests) = split(analysis);
        assert_eq!(items[0]["title"], serde_json::Value::Null);
        assert!(requests.is_empty());
    }

    #[test]
    fn test_resolve_link() {
        let base = Url::parse("http://example.com/dir/page").unwrap();
        assert_eq!(
            resolve_link(&base, "next").unwrap().as_str(),
            "http://example.com/dir/next"
        );
        assert_eq!(resolve_link(&base, "  "), None);
        assert_eq!(resolve_link(&base, "ftp://example.com/f"), None);
    }

    #[test]
    fn test_rejects_non_analyzer_mid() {
        assert!(LinkAnalyzer::new(mid("P1")).is_err());
    }
}
