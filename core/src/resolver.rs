use std::collections::HashSet;

use reqwest::Url;
use tracing::debug;

use crate::error::{DownloadError, DownloadResult};
use crate::net::{HttpOptions, NetClient, ProbeResponse};

#[derive(Debug)]
pub struct ResolvedProbe {
    pub final_url: String,
    /// Headers of the terminal response; absent when the chain ended on a
    /// status the downloader may still want to GET.
    pub probe: Option<ProbeResponse>,
}

/// Chase 3xx responses via HEAD probes until a terminal answer.
///
/// A 200/206 settles the chain. Any other status after at least one hop is
/// handed back without headers so the caller can still attempt a GET;
/// without a hop it is an error. Revisiting a URL fails the chain.
pub fn resolve_redirects(
    net: &dyn NetClient,
    url: &str,
    options: &HttpOptions,
) -> DownloadResult<ResolvedProbe> {
    let mut visited = HashSet::new();
    let mut current = url.to_string();
    let mut hops = 0usize;

    loop {
        if !visited.insert(current.clone()) {
            return Err(DownloadError::RedirectLoop(current));
        }
        let probe = net.head(&current, options)?;
        match probe.status {
            200 | 206 => {
                return Ok(ResolvedProbe {
                    final_url: current,
                    probe: Some(probe),
                });
            }
            status @ 300..=399 => {
                let location = probe
                    .location
                    .ok_or(DownloadError::MissingLocation(status))?;
                let next = absolutize(&current, &location)?;
                debug!(from = %current, to = %next, status, "following redirect");
                current = next;
                hops += 1;
            }
            status => {
                if hops > 0 {
                    return Ok(ResolvedProbe {
                        final_url: current,
                        probe: None,
                    });
                }
                return Err(DownloadError::BadStatus {
                    url: current,
                    status,
                });
            }
        }
    }
}

/// Resolve a possibly-relative `location` header against the current URL.
fn absolutize(base: &str, location: &str) -> DownloadResult<String> {
    let base = Url::parse(base).map_err(|err| DownloadError::InvalidUrl(err.to_string()))?;
    let resolved = base
        .join(location)
        .map_err(|err| DownloadError::InvalidUrl(err.to_string()))?;
    Ok(resolved.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::net::BodyResponse;

    /// Scripted HEAD responses keyed by URL.
    struct ScriptedClient {
        responses: Mutex<HashMap<String, ProbeResponse>>,
    }

    impl ScriptedClient {
        fn new(entries: Vec<(&str, u16, Option<&str>)>) -> Self {
            let mut responses = HashMap::new();
            for (url, status, location) in entries {
                responses.insert(
                    url.to_string(),
                    ProbeResponse {
                        status,
                        content_length: Some(42),
                        accept_ranges: false,
                        location: location.map(|l| l.to_string()),
                        headers: HashMap::new(),
                    },
                );
            }
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    impl NetClient for ScriptedClient {
        fn head(&self, url: &str, _options: &HttpOptions) -> DownloadResult<ProbeResponse> {
            self.responses
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| DownloadError::Network(format!("unscripted url {url}")))
        }

        fn get(
            &self,
            _url: &str,
            _options: &HttpOptions,
            _range: Option<(u64, u64)>,
        ) -> DownloadResult<BodyResponse> {
            Err(DownloadError::Network("no body scripted".into()))
        }
    }

    #[test]
    fn follows_chain_to_terminal_headers() {
        let net = ScriptedClient::new(vec![
            ("http://a.test/u0", 302, Some("http://a.test/u1")),
            ("http://a.test/u1", 302, Some("http://b.test/u2")),
            ("http://b.test/u2", 200, None),
        ]);
        let resolved = resolve_redirects(&net, "http://a.test/u0", &HttpOptions::default()).unwrap();
        assert_eq!(resolved.final_url, "http://b.test/u2");
        let probe = resolved.probe.unwrap();
        assert_eq!(probe.status, 200);
        assert_eq!(probe.content_length, Some(42));
    }

    #[test]
    fn relative_location_is_resolved_against_current_url() {
        let net = ScriptedClient::new(vec![
            ("http://a.test/dir/u0", 301, Some("../u1")),
            ("http://a.test/u1", 200, None),
        ]);
        let resolved =
            resolve_redirects(&net, "http://a.test/dir/u0", &HttpOptions::default()).unwrap();
        assert_eq!(resolved.final_url, "http://a.test/u1");
    }

    #[test]
    fn revisited_url_is_a_loop() {
        let net = ScriptedClient::new(vec![
            ("http://a.test/u0", 302, Some("http://a.test/u1")),
            ("http://a.test/u1", 302, Some("http://a.test/u0")),
        ]);
        let err =
            resolve_redirects(&net, "http://a.test/u0", &HttpOptions::default()).unwrap_err();
        assert_eq!(err, DownloadError::RedirectLoop("http://a.test/u0".into()));
    }

    #[test]
    fn missing_location_names_the_status() {
        let net = ScriptedClient::new(vec![("http://a.test/u0", 302, None)]);
        let err =
            resolve_redirects(&net, "http://a.test/u0", &HttpOptions::default()).unwrap_err();
        assert_eq!(err, DownloadError::MissingLocation(302));
    }

    #[test]
    fn non_redirect_after_a_hop_returns_without_headers() {
        let net = ScriptedClient::new(vec![
            ("http://a.test/u0", 302, Some("http://a.test/u1")),
            ("http://a.test/u1", 403, None),
        ]);
        let resolved = resolve_redirects(&net, "http://a.test/u0", &HttpOptions::default()).unwrap();
        assert_eq!(resolved.final_url, "http://a.test/u1");
        assert!(resolved.probe.is_none());
    }

    #[test]
    fn bad_status_without_hops_fails() {
        let net = ScriptedClient::new(vec![("http://a.test/u0", 500, None)]);
        let err =
            resolve_redirects(&net, "http://a.test/u0", &HttpOptions::default()).unwrap_err();
        assert_eq!(
            err,
            DownloadError::BadStatus {
                url: "http://a.test/u0".into(),
                status: 500,
            }
        );
    }
}
