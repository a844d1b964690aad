use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, LOCATION, RANGE,
};
use reqwest::redirect::Policy;

use crate::error::{DownloadError, DownloadResult};

/// Caller-supplied request options, applied to every probe and body request.
#[derive(Debug, Clone, Default)]
pub struct HttpOptions {
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub proxy: Option<String>,
    pub basic_auth: Option<(String, String)>,
}

/// Headers of interest from a HEAD probe, plus the raw header map.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub accept_ranges: bool,
    pub location: Option<String>,
    pub headers: HashMap<String, String>,
}

/// A response whose body is still on the wire.
pub struct BodyResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

pub trait NetClient: Send + Sync {
    fn head(&self, url: &str, options: &HttpOptions) -> DownloadResult<ProbeResponse>;
    fn get(
        &self,
        url: &str,
        options: &HttpOptions,
        range: Option<(u64, u64)>,
    ) -> DownloadResult<BodyResponse>;
}

#[derive(Clone)]
pub struct ReqwestNetClient {
    client: Client,
}

impl ReqwestNetClient {
    pub fn new() -> DownloadResult<Self> {
        // Redirects are chased by the resolver, never by the transport.
        let client = Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|err| DownloadError::Network(err.to_string()))?;
        Ok(Self { client })
    }

    fn pick_client(&self, options: &HttpOptions) -> DownloadResult<Client> {
        let Some(proxy_url) = options.proxy.as_deref() else {
            return Ok(self.client.clone());
        };
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| DownloadError::Network(err.to_string()))?;
        Client::builder()
            .redirect(Policy::none())
            .proxy(proxy)
            .build()
            .map_err(|err| DownloadError::Network(err.to_string()))
    }

    fn request_headers(
        &self,
        options: &HttpOptions,
        range: Option<(u64, u64)>,
    ) -> DownloadResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (key, value) in &options.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|err| DownloadError::Network(err.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| DownloadError::Network(err.to_string()))?;
            headers.insert(name, value);
        }
        if let Some((lo, hi)) = range {
            let value = format!("bytes={}-{}", lo, hi);
            headers.insert(
                RANGE,
                HeaderValue::from_str(&value)
                    .map_err(|err| DownloadError::Network(err.to_string()))?,
            );
        }
        Ok(headers)
    }
}

impl NetClient for ReqwestNetClient {
    fn head(&self, url: &str, options: &HttpOptions) -> DownloadResult<ProbeResponse> {
        let client = self.pick_client(options)?;
        let mut request = client.head(url).headers(self.request_headers(options, None)?);
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }
        if let Some((user, pass)) = &options.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }
        let resp = request
            .send()
            .map_err(|err| DownloadError::Network(err.to_string()))?;

        let status = resp.status().as_u16();
        let headers = resp.headers();
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        let accept_ranges = headers
            .get(ACCEPT_RANGES)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);
        let location = headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let mut header_map = HashMap::new();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                header_map.insert(name.as_str().to_string(), value.to_string());
            }
        }

        Ok(ProbeResponse {
            status,
            content_length,
            accept_ranges,
            location,
            headers: header_map,
        })
    }

    fn get(
        &self,
        url: &str,
        options: &HttpOptions,
        range: Option<(u64, u64)>,
    ) -> DownloadResult<BodyResponse> {
        let client = self.pick_client(options)?;
        let mut request = client.get(url).headers(self.request_headers(options, range)?);
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }
        if let Some((user, pass)) = &options.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }
        let resp = request
            .send()
            .map_err(|err| DownloadError::Network(err.to_string()))?;

        let status = resp.status().as_u16();
        let content_length = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        Ok(BodyResponse {
            status,
            content_length,
            body: Box::new(resp),
        })
    }
}
