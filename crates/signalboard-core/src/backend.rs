use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use crate::analytics::AnalyticsOverview;
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::intersection::{
    CreateIntersection, IntersectionFilters, IntersectionMutation, IntersectionStatus,
    IntersectionsList,
};
use crate::snapshot::{EntityKey, Snapshot};

#[async_trait]
pub trait ByteStream: Send {
    /// `Ok(None)` means the server closed the stream.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ApiError>;
}

#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn fetch_snapshot(&self, key: &EntityKey) -> Result<Snapshot, ApiError>;
    async fn fetch_analytics(&self, key: &EntityKey) -> Result<AnalyticsOverview, ApiError>;
    async fn open_stream(&self) -> Result<Box<dyn ByteStream>, ApiError>;
    async fn list_intersections(
        &self,
        filters: &IntersectionFilters,
    ) -> Result<IntersectionsList, ApiError>;
    async fn create_intersection(
        &self,
        payload: &CreateIntersection,
    ) -> Result<IntersectionMutation, ApiError>;
    async fn update_intersection_status(
        &self,
        id: &str,
        status: IntersectionStatus,
    ) -> Result<IntersectionMutation, ApiError>;
    async fn update_intersection_coords(
        &self,
        id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<IntersectionMutation, ApiError>;
}

pub struct HttpBackend {
    http: Client,
    base: Url,
    request_timeout: Duration,
    request_seq: AtomicU64,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let trimmed = config.backend_url.trim().trim_end_matches('/');
        let base = Url::parse(trimmed)
            .map_err(|err| ApiError::InvalidArgument(format!("backend url {trimmed}: {err}")))?;

        // No client-wide timeout: it would also cut the event stream.
        let http = Client::builder().build()?;

        info!(backend=%base, "http backend ready");
        Ok(Self {
            http,
            base,
            request_timeout: config.request_timeout,
            request_seq: AtomicU64::new(0),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidArgument(format!("backend url {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn cache_buster(&self) -> String {
        let seq = self.request_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{seq}", Utc::now().timestamp_millis())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        mut query: Vec<(&'static str, String)>,
    ) -> Result<T, ApiError> {
        query.push(("cb", self.cache_buster()));
        let url = self.endpoint(segments)?;
        debug!(url=%url, "GET");
        let request = self
            .http
            .get(url)
            .query(&query)
            .header(CACHE_CONTROL, "no-store");
        self.send_json(request).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.timeout(self.request_timeout).send().await?;
        decode_response(response).await
    }

    fn scoped_query(key: &EntityKey) -> Vec<(&'static str, String)> {
        key.as_query()
            .map(|id| vec![("intersectionId", id.to_string())])
            .unwrap_or_default()
    }
}

pub(crate) async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let body = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("").to_string()
        } else {
            body
        };
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let raw = response.bytes().await?;
    Ok(serde_json::from_slice(&raw)?)
}

fn require_id(id: &str) -> Result<&str, ApiError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError::InvalidArgument("intersection id is required".to_string()));
    }
    Ok(id)
}

struct ResponseStream(Response);

#[async_trait]
impl ByteStream for ResponseStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ApiError> {
        Ok(self.0.chunk().await?.map(|chunk| chunk.to_vec()))
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn fetch_snapshot(&self, key: &EntityKey) -> Result<Snapshot, ApiError> {
        self.get_json(&["api", "traffic", "lights"], Self::scoped_query(key))
            .await
    }

    async fn fetch_analytics(&self, key: &EntityKey) -> Result<AnalyticsOverview, ApiError> {
        self.get_json(&["api", "analytics", "overview"], Self::scoped_query(key))
            .await
    }

    async fn open_stream(&self) -> Result<Box<dyn ByteStream>, ApiError> {
        let url = self.endpoint(&["api", "traffic", "stream"])?;
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: status.canonical_reason().unwrap_or("").to_string(),
            });
        }
        Ok(Box::new(ResponseStream(response)))
    }

    async fn list_intersections(
        &self,
        filters: &IntersectionFilters,
    ) -> Result<IntersectionsList, ApiError> {
        self.get_json(&["api", "intersections"], filters.query_pairs())
            .await
    }

    async fn create_intersection(
        &self,
        payload: &CreateIntersection,
    ) -> Result<IntersectionMutation, ApiError> {
        let url = self.endpoint(&["api", "intersections"])?;
        self.send_json(self.http.post(url).json(payload)).await
    }

    async fn update_intersection_status(
        &self,
        id: &str,
        status: IntersectionStatus,
    ) -> Result<IntersectionMutation, ApiError> {
        let id = require_id(id)?;
        let url = self.endpoint(&["api", "intersections", id, "status"])?;
        self.send_json(self.http.put(url).json(&json!({ "status": status })))
            .await
    }

    async fn update_intersection_coords(
        &self,
        id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<IntersectionMutation, ApiError> {
        let id = require_id(id)?;
        let url = self.endpoint(&["api", "intersections", id])?;
        let body = json!({ "latitude": latitude, "longitude": longitude });
        self.send_json(self.http.put(url).json(&body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str) -> HttpBackend {
        let config = ClientConfig {
            backend_url: url.to_string(),
            ..ClientConfig::default()
        };
        HttpBackend::new(&config).expect("backend")
    }

    #[test]
    fn endpoints_join_onto_base_path() {
        let plain = backend("http://localhost:3000/");
        let prefixed = backend("https://example.org/proxy/");

        assert_eq!(
            plain.endpoint(&["api", "traffic", "lights"]).expect("url").as_str(),
            "http://localhost:3000/api/traffic/lights"
        );
        assert_eq!(
            prefixed.endpoint(&["api", "intersections", "a b"]).expect("url").as_str(),
            "https://example.org/proxy/api/intersections/a%20b"
        );
    }

    #[test]
    fn cache_buster_is_unique_per_request() {
        let backend = backend("http://localhost:3000");

        let first = backend.cache_buster();
        let second = backend.cache_buster();

        assert_ne!(first, second);
    }

    #[test]
    fn default_key_is_sent_unscoped() {
        assert!(HttpBackend::scoped_query(&EntityKey::default_key()).is_empty());
        assert_eq!(
            HttpBackend::scoped_query(&EntityKey::new("A")),
            vec![("intersectionId", "A".to_string())]
        );
    }

    #[test]
    fn blank_id_is_rejected_before_any_request() {
        assert!(matches!(require_id("  "), Err(ApiError::InvalidArgument(_))));
        assert_eq!(require_id(" x ").expect("id"), "x");
    }
}
