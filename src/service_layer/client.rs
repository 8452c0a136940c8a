//! HTTP implementation of the Service Layer collaborator.
//!
//! Keeps a `B1SESSION` cookie obtained from `POST /Login`, replays a request
//! once after re-login when the session expires, and retries transient
//! failures with jittered exponential backoff.

use async_trait::async_trait;
use rand::{Rng, thread_rng};
use reqwest::{Method, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{EntityKey, ODataQuery, QueryResponse, Record, ServiceLayer, ServiceLayerError};
use crate::config::ServiceLayerConfig;

#[derive(Debug, Clone)]
struct Credentials {
    company_db: String,
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LoginResponse {
    session_id: Option<String>,
}

/// SAP error envelope: `{"error": {"code": -2028, "message": {"value": "..."}}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<JsonValue>,
    message: Option<JsonValue>,
}

/// Service Layer client over `reqwest`.
pub struct HttpServiceLayer {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
    session: RwLock<Option<String>>,
    max_retries: u32,
    retry_base: Duration,
}

impl HttpServiceLayer {
    pub fn new(config: &ServiceLayerConfig) -> Result<Self, ServiceLayerError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        let credentials = match (&config.company_db, &config.username, &config.password) {
            (Some(company_db), Some(username), Some(password)) => Some(Credentials {
                company_db: company_db.clone(),
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            session: RwLock::new(None),
            max_retries: config.max_retries,
            retry_base: Duration::from_millis(config.retry_base_ms),
        })
    }

    /// Establish a session, replacing any existing one.
    #[instrument(skip(self))]
    pub async fn login(&self) -> Result<(), ServiceLayerError> {
        let Some(credentials) = &self.credentials else {
            return Ok(());
        };

        let response = self
            .http
            .post(format!("{}/Login", self.base_url))
            .json(&json!({
                "CompanyDB": credentials.company_db,
                "UserName": credentials.username,
                "Password": credentials.password,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let error = decode_error(response).await;
            return Err(ServiceLayerError::Authentication {
                details: error.to_string(),
            });
        }

        let mut cookies: Vec<String> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .map(|pair| pair.trim().to_string())
            .filter(|pair| pair.starts_with("B1SESSION=") || pair.starts_with("ROUTEID="))
            .collect();

        if cookies.is_empty() {
            let body: LoginResponse = response.json().await?;
            let session_id = body.session_id.ok_or_else(|| ServiceLayerError::Authentication {
                details: "login response carried no session".to_string(),
            })?;
            cookies.push(format!("B1SESSION={}", session_id));
        }

        info!(company_db = %credentials.company_db, "Service Layer session established");
        *self.session.write().await = Some(cookies.join("; "));
        Ok(())
    }

    /// End the current session, if any.
    pub async fn logout(&self) -> Result<(), ServiceLayerError> {
        let Some(cookie) = self.session.write().await.take() else {
            return Ok(());
        };
        let response = self
            .http
            .post(format!("{}/Logout", self.base_url))
            .header(header::COOKIE, cookie)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(decode_error(response).await);
        }
        Ok(())
    }

    /// Request URL with the query pairs percent-encoded. Spaces become `%20`,
    /// never `+`, since the Service Layer does not read `+` as a space inside
    /// `$filter`.
    fn url(&self, path: &str, query: &[(&'static str, String)]) -> String {
        let mut url = format!("{}/{}", self.base_url, path);
        if !query.is_empty() {
            let encoded = query
                .iter()
                .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&encoded);
        }
        url
    }

    /// Resolve an `odata.nextLink`, which the Service Layer sends relative to
    /// the versioned base URL.
    fn next_url(&self, link: &str) -> Result<Url, ServiceLayerError> {
        Url::parse(&format!("{}/", self.base_url))
            .and_then(|base| base.join(link))
            .map_err(|e| ServiceLayerError::malformed(format!("bad next link {}: {}", link, e)))
    }

    async fn fetch_page(
        &self,
        url: &str,
        page_size: Option<u64>,
    ) -> Result<QueryResponse, ServiceLayerError> {
        let response = self
            .send(|http| {
                let builder = http.get(url);
                match page_size {
                    // The Service Layer caps pages at 20 rows unless told otherwise.
                    Some(top) => builder.header("Prefer", format!("odata.maxpagesize={}", top)),
                    None => builder,
                }
            })
            .await?;

        response.json::<QueryResponse>().await.map_err(|e| {
            ServiceLayerError::malformed(format!("unexpected collection payload: {}", e))
        })
    }

    async fn ensure_session(&self) -> Result<Option<String>, ServiceLayerError> {
        if self.credentials.is_none() {
            return Ok(None);
        }
        if let Some(cookie) = self.session.read().await.clone() {
            return Ok(Some(cookie));
        }
        self.login().await?;
        Ok(self.session.read().await.clone())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_base.as_millis() as u64;
        let exp = base.saturating_mul(2_u64.saturating_pow(attempt));
        let jitter = if base > 0 {
            thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }

    /// Send a request with session handling and retries.
    async fn send<F>(&self, build: F) -> Result<Response, ServiceLayerError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let mut attempt = 0;
        let mut relogged = false;

        loop {
            let mut request = build(&self.http);
            if let Some(cookie) = self.ensure_session().await? {
                request = request.header(header::COOKIE, cookie);
            }

            let error = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response)
                    if response.status() == StatusCode::UNAUTHORIZED
                        && self.credentials.is_some()
                        && !relogged =>
                {
                    debug!("Service Layer session expired; logging in again");
                    relogged = true;
                    self.session.write().await.take();
                    continue;
                }
                Ok(response) => decode_error(response).await,
                Err(err) => ServiceLayerError::from(err),
            };

            if error.is_retryable() && attempt < self.max_retries {
                let delay = self.backoff(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "Retrying Service Layer request");
                sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Err(error);
        }
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&Record>,
    ) -> Result<Response, ServiceLayerError> {
        let url = self.url(path, &[]);
        self.send(|http| {
            let builder = http.request(method.clone(), &url);
            match body {
                Some(body) => builder.json(body),
                None => builder,
            }
        })
        .await
    }
}

#[async_trait]
impl ServiceLayer for HttpServiceLayer {
    async fn find(&self, entity: &str, key: &EntityKey) -> Result<Option<Record>, ServiceLayerError> {
        match self
            .request_json(Method::GET, &format!("{}({})", entity, key), None)
            .await
        {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create(&self, entity: &str, payload: &Record) -> Result<Record, ServiceLayerError> {
        let response = self.request_json(Method::POST, entity, Some(payload)).await?;
        Ok(response.json().await?)
    }

    async fn update(
        &self,
        entity: &str,
        key: &EntityKey,
        payload: &Record,
    ) -> Result<(), ServiceLayerError> {
        self.request_json(Method::PATCH, &format!("{}({})", entity, key), Some(payload))
            .await?;
        Ok(())
    }

    async fn delete(&self, entity: &str, key: &EntityKey) -> Result<(), ServiceLayerError> {
        self.request_json(Method::DELETE, &format!("{}({})", entity, key), None)
            .await?;
        Ok(())
    }

    async fn action(
        &self,
        entity: &str,
        key: &EntityKey,
        action: &str,
    ) -> Result<Option<JsonValue>, ServiceLayerError> {
        let response = self
            .request_json(Method::POST, &format!("{}({})/{}", entity, key, action), None)
            .await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| ServiceLayerError::malformed(e.to_string()))
    }

    #[instrument(skip(self, query), fields(top = ?query.top, skip = ?query.skip))]
    async fn query(
        &self,
        entity: &str,
        query: &ODataQuery,
    ) -> Result<QueryResponse, ServiceLayerError> {
        let url = self.url(entity, &query.to_query_pairs());
        let mut page = self.fetch_page(&url, query.top).await?;
        if query.top.is_some() {
            return Ok(page);
        }

        // Without `$top` the caller wants the whole set: follow server paging.
        let mut next = page.next_link.take();
        while let Some(link) = next {
            let mut more = self.fetch_page(self.next_url(&link)?.as_str(), None).await?;
            debug!(entity, next_link = %link, fetched = more.value.len(), "followed next link");
            page.value.append(&mut more.value);
            next = more.next_link.take().filter(|following| *following != link);
        }
        Ok(page)
    }

    async fn count(&self, entity: &str, query: &ODataQuery) -> Result<u64, ServiceLayerError> {
        let pairs: Vec<_> = query
            .filter
            .iter()
            .map(|filter| ("$filter", filter.clone()))
            .collect();
        let url = self.url(&format!("{}/$count", entity), &pairs);
        let response = self.send(|http| http.get(&url)).await?;
        let text = response.text().await?;
        text.trim_start_matches('\u{feff}')
            .trim()
            .parse::<u64>()
            .map_err(|_| ServiceLayerError::malformed(format!("count was not a number: {}", text)))
    }
}

async fn decode_error(response: Response) -> ServiceLayerError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();

    match serde_json::from_str::<ErrorEnvelope>(&text) {
        Ok(envelope) => {
            let code = envelope.error.code.as_ref().and_then(|code| match code {
                JsonValue::Number(n) => n.as_i64(),
                JsonValue::String(s) => s.parse().ok(),
                _ => None,
            });
            let message = match envelope.error.message {
                Some(JsonValue::String(s)) => s,
                Some(JsonValue::Object(obj)) => obj
                    .get("value")
                    .and_then(JsonValue::as_str)
                    .unwrap_or_default()
                    .to_string(),
                _ => String::new(),
            };
            ServiceLayerError::Http {
                status,
                code,
                message,
            }
        }
        Err(_) => ServiceLayerError::Http {
            status,
            code: None,
            message: truncate(&text, 200),
        },
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.chars().count() > max {
        let truncated: String = body.chars().take(max).collect();
        format!("{}...", truncated)
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_values_use_percent_twenty() {
        let client = HttpServiceLayer::new(&ServiceLayerConfig::default()).unwrap();
        assert_eq!(
            client.url(
                "Items",
                &[("$filter", "Qty gt 0 and Name eq 'A&B'".to_string())]
            ),
            "https://localhost:50000/b1s/v1/Items?$filter=Qty%20gt%200%20and%20Name%20eq%20%27A%26B%27"
        );
        assert!(
            client
                .url("Items", &[("$filter", "a+b".to_string())])
                .ends_with("$filter=a%2Bb")
        );
    }

    #[test]
    fn test_next_link_resolves_against_the_versioned_base() {
        let client = HttpServiceLayer::new(&ServiceLayerConfig {
            base_url: "https://sap.example.com:50000/b1s/v1".to_string(),
            ..ServiceLayerConfig::default()
        })
        .unwrap();

        assert_eq!(
            client.next_url("Items?$skip=20").unwrap().as_str(),
            "https://sap.example.com:50000/b1s/v1/Items?$skip=20"
        );
        assert_eq!(
            client.next_url("/b1s/v1/Items?$skip=40").unwrap().as_str(),
            "https://sap.example.com:50000/b1s/v1/Items?$skip=40"
        );
    }

    #[test]
    fn test_url_building() {
        let client = HttpServiceLayer::new(&ServiceLayerConfig {
            base_url: "https://sap.example.com:50000/b1s/v1/".to_string(),
            ..ServiceLayerConfig::default()
        })
        .unwrap();

        assert_eq!(
            client.url("Items", &[("$top", "5".to_string())]),
            "https://sap.example.com:50000/b1s/v1/Items?$top=5"
        );
        assert_eq!(
            client.url("Orders(12)", &[]),
            "https://sap.example.com:50000/b1s/v1/Orders(12)"
        );
    }

    #[test]
    fn test_truncate_long_bodies() {
        let body = "x".repeat(250);
        let truncated = truncate(&body, 200);
        assert_eq!(truncated.len(), 203);
        assert!(truncated.ends_with("..."));
    }
}
