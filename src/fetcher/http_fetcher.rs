use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::app::Result;
use crate::fetcher::{FetchResult, Fetcher};

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchResult> {
        let mut headers = HeaderMap::new();

        if let Some(etag) = etag {
            if let Ok(value) = HeaderValue::from_str(etag) {
                headers.insert(IF_NONE_MATCH, value);
            }
        }

        if let Some(last_modified) = last_modified {
            if let Ok(value) = HeaderValue::from_str(last_modified) {
                headers.insert(IF_MODIFIED_SINCE, value);
            }
        }

        let response = self.client.get(url).headers(headers).send().await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            debug!("{} has not been modified", url);
            return Ok(FetchResult::NotModified);
        }

        response.error_for_status_ref()?;

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let etag = header(ETAG);
        let last_modified = header(LAST_MODIFIED);

        let body = response.bytes().await?.to_vec();

        Ok(FetchResult::Content {
            body,
            etag,
            last_modified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::build_client;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(build_client("ticker-test", Duration::from_secs(5)).unwrap())
    }

    #[tokio::test]
    async fn test_fetch_returns_validators() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"v1\"")
                    .insert_header("Last-Modified", "Mon, 01 Feb 2021 00:00:00 GMT")
                    .set_body_string("<rss/>"),
            )
            .mount(&server)
            .await;

        let res = fetcher()
            .fetch(&format!("{}/feed.xml", server.uri()), None, None)
            .await
            .unwrap();
        match res {
            FetchResult::Content {
                body,
                etag,
                last_modified,
            } => {
                assert_eq!(body, b"<rss/>");
                assert_eq!(etag.as_deref(), Some("\"v1\""));
                assert_eq!(
                    last_modified.as_deref(),
                    Some("Mon, 01 Feb 2021 00:00:00 GMT")
                );
            }
            FetchResult::NotModified => panic!("expected content"),
        }
    }

    #[tokio::test]
    async fn test_conditional_request_not_modified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .and(header("If-None-Match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let res = fetcher()
            .fetch(&format!("{}/feed.xml", server.uri()), Some("\"v1\""), None)
            .await
            .unwrap();
        assert!(matches!(res, FetchResult::NotModified));
    }

    #[tokio::test]
    async fn test_error_status_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let res = fetcher()
            .fetch(&format!("{}/feed.xml", server.uri()), None, None)
            .await;
        assert!(res.is_err());
    }
}
