use crate::config::CompanionConfig;
use crate::error::{RequestError, TvError};
use crate::observer::{ObserverId, ObserverRegistry};
use crate::types::Device;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Header list as sent or received
pub type Headers = Vec<(String, String)>;

/// Lifecycle of one companion request
///
/// Every request emits `RequestStarted` followed by exactly one of
/// `ResponseReceived` or `RequestFailed`, all carrying the same id.
#[derive(Debug, Clone, PartialEq)]
pub enum RestEvent {
    RequestStarted {
        id: Uuid,
        method: String,
        url: String,
        headers: Headers,
        body: Option<Vec<u8>>,
    },
    ResponseReceived {
        id: Uuid,
        status: u16,
        headers: Headers,
        body: Vec<u8>,
        duration: Duration,
    },
    RequestFailed {
        id: Uuid,
        message: String,
        detail: Option<String>,
    },
}

impl RestEvent {
    pub fn id(&self) -> Uuid {
        match self {
            RestEvent::RequestStarted { id, .. }
            | RestEvent::ResponseReceived { id, .. }
            | RestEvent::RequestFailed { id, .. } => *id,
        }
    }
}

/// A successful (2xx) companion response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub duration: Duration,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        serde_json::from_slice(&self.body).map_err(|e| RequestError::MalformedBody(e.to_string()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Request/response client for the device's HTTP surface
///
/// Each request is its own exchange; nothing is retried.
pub struct CompanionClient {
    http: reqwest::Client,
    base: Url,
    observers: ObserverRegistry<RestEvent>,
}

impl CompanionClient {
    /// Client rooted at `base_url`. Relative request URLs resolve against it.
    pub fn new(base_url: &str, config: &CompanionConfig) -> Result<Self, RequestError> {
        let mut base = Url::parse(base_url).map_err(|e| RequestError::InvalidUrl(e.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            // Televisions serve self-signed certificates
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            http,
            base,
            observers: ObserverRegistry::new(),
        })
    }

    /// Client for `device` using the port and base path from `config`
    pub fn for_device(device: &Device, config: &CompanionConfig) -> crate::error::Result<Self> {
        let address = device.address().ok_or_else(|| {
            TvError::InvalidDevice(format!("{} has no network address", device.name()))
        })?;

        let scheme = if config.use_tls { "https" } else { "http" };
        let base = format!("{}://{}{}", scheme, SocketAddr::new(address, config.port), config.base_path);
        Ok(Self::new(&base, config)?)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Observe the lifecycle of every request
    pub fn add_rest_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&RestEvent) + Send + Sync + 'static,
    {
        self.observers.add(observer)
    }

    pub fn remove_rest_observer(&self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    /// Issue one request
    ///
    /// `url` is absolute or relative to the base URL. Non-2xx statuses come
    /// back as [`RequestError::Status`].
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: Headers,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, RequestError> {
        let id = Uuid::new_v4();
        self.observers.notify(&RestEvent::RequestStarted {
            id,
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.clone(),
            body: body.clone(),
        });

        let result = self.execute(method, url, headers, body).await;

        match &result {
            Ok(response) => self.observers.notify(&RestEvent::ResponseReceived {
                id,
                status: response.status,
                headers: response.headers.clone(),
                body: response.body.clone(),
                duration: response.duration,
            }),
            Err(e) => {
                tracing::warn!("Companion request {} to {} failed: {}", id, url, e);
                let detail = match e {
                    RequestError::Status { body, .. } => Some(body.clone()),
                    RequestError::Network(inner) => std::error::Error::source(inner).map(|s| s.to_string()),
                    _ => None,
                };
                self.observers.notify(&RestEvent::RequestFailed {
                    id,
                    message: e.to_string(),
                    detail,
                });
            }
        }

        result
    }

    /// GET `path` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
        self.request(Method::GET, path, Vec::new(), None).await?.json()
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        headers: Headers,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, RequestError> {
        let url = self.resolve(url)?;
        tracing::debug!("{} {}", method, url);

        let mut builder = self.http.request(method, url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let started = Instant::now();
        let response = builder.send().await?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();
        let duration = started.elapsed();

        if !status.is_success() {
            return Err(RequestError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            headers,
            body,
            duration,
        })
    }

    fn resolve(&self, url: &str) -> Result<Url, RequestError> {
        let resolved = if url.contains("://") {
            Url::parse(url)
        } else {
            self.base.join(url.trim_start_matches('/'))
        };
        resolved.map_err(|e| RequestError::InvalidUrl(format!("{}: {}", url, e)))
    }
}
