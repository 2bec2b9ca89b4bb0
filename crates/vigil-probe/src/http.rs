//! HTTP status probe.
//!
//! Issues one request and compares the response code against the target's
//! expected code. Plain `http` goes through a pooled hyper-util client held
//! by the prober; `https` opens a rustls connection per request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{header, Method, Request, Uri};
use http_body_util::Empty;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use vigil_core::{CheckResult, ProbeError, Target, DEFAULT_TIMEOUT};

use crate::context::ProbeContext;

pub const DEFAULT_HTTP_METHOD: &str = "GET";
pub const DEFAULT_HTTP_STATUS: u16 = 200;

const USER_AGENT: &str = concat!("vigil-probe/", env!("CARGO_PKG_VERSION"));
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

type PooledClient = Client<HttpConnector, Empty<Bytes>>;

/// Checks that an HTTP endpoint answers with the expected status code.
pub struct HttpProber {
    client: PooledClient,
    tls: Option<Arc<rustls::ClientConfig>>,
    timeout: Duration,
}

impl std::fmt::Debug for HttpProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProber")
            .field("timeout", &self.timeout)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl HttpProber {
    /// Create a prober. A zero timeout falls back to the default.
    pub fn new(timeout: Duration) -> Self {
        let timeout = if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout };

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build(connector);

        Self {
            client,
            tls: tls_config(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn probe(&self, ctx: &ProbeContext, target: &Target) -> CheckResult {
        let start = Instant::now();

        if ctx.is_cancelled() {
            return CheckResult::failure(
                start.elapsed(),
                "context cancelled before request",
                ProbeError::Cancelled,
            );
        }

        let method = if target.method.is_empty() {
            DEFAULT_HTTP_METHOD
        } else {
            target.method.as_str()
        };
        let expected = if target.status_code == 0 {
            DEFAULT_HTTP_STATUS
        } else {
            target.status_code
        };

        let status = self
            .get_status_code(ctx, method, &target.address, &target.path)
            .await;
        let latency = start.elapsed();

        match status {
            Err(e) => {
                debug!(error = %e, address = %target.address, "http probe failed");
                CheckResult::failure(latency, format!("request failed: {e}"), e)
            }
            Ok(code) if code != expected => CheckResult::failure(
                latency,
                format!("unexpected status code: {code} (expected {expected})"),
                ProbeError::StatusMismatch,
            ),
            Ok(code) => CheckResult::success(latency, format!("HTTP {code}")),
        }
    }

    /// Send one request and return the response code.
    pub async fn get_status_code(
        &self,
        ctx: &ProbeContext,
        method: &str,
        address: &str,
        path: &str,
    ) -> Result<u16, ProbeError> {
        let uri = resolve_url(address, path)?;
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|e| ProbeError::InvalidTarget(format!("failed to create request: {e}")))?;

        if uri.scheme_str() == Some("https") {
            return self.send_tls(ctx, method, &uri).await;
        }

        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::USER_AGENT, USER_AGENT)
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProbeError::InvalidTarget(format!("failed to create request: {e}")))?;

        let resp = ctx
            .run(self.timeout, self.client.request(req))
            .await?
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        Ok(resp.status().as_u16())
    }

    async fn send_tls(&self, ctx: &ProbeContext, method: Method, uri: &Uri) -> Result<u16, ProbeError> {
        let tls = self
            .tls
            .clone()
            .ok_or_else(|| ProbeError::Request("tls unavailable".to_string()))?;
        let host = uri
            .host()
            .ok_or_else(|| ProbeError::InvalidTarget(format!("failed to parse url: no host in {uri}")))?;
        let bare_host = host.trim_matches(['[', ']']);
        let port = uri.port_u16().unwrap_or(443);
        let server_name = ServerName::try_from(bare_host.to_string())
            .map_err(|e| ProbeError::InvalidTarget(format!("invalid server name {host}: {e}")))?;
        let authority = uri.authority().map(|a| a.as_str()).unwrap_or(host);
        let origin = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

        let req = Request::builder()
            .method(method)
            .uri(origin)
            .header(header::HOST, authority)
            .header(header::USER_AGENT, USER_AGENT)
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProbeError::InvalidTarget(format!("failed to create request: {e}")))?;

        ctx.run(self.timeout, async move {
            let stream = TcpStream::connect((bare_host, port))
                .await
                .map_err(|e| ProbeError::Connect(e.to_string()))?;
            let stream = TlsConnector::from(tls)
                .connect(server_name, stream)
                .await
                .map_err(|e| ProbeError::Connect(format!("tls handshake: {e}")))?;

            let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
                .await
                .map_err(|e| ProbeError::Request(e.to_string()))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| ProbeError::Request(e.to_string()))?;
            Ok(resp.status().as_u16())
        })
        .await?
    }
}

/// Build the request URL from `address` and `path`.
///
/// Addresses without an `http`/`https` scheme get `http://` prepended and
/// are parsed a second time. `path` is joined onto any path already in the
/// address; the query string is kept.
pub fn resolve_url(address: &str, path: &str) -> Result<Uri, ProbeError> {
    let parse_err = |e: http::uri::InvalidUri| ProbeError::InvalidTarget(format!("failed to parse url: {e}"));

    let mut uri: Uri = address.parse().map_err(parse_err)?;
    if !matches!(uri.scheme_str(), Some("http" | "https")) {
        uri = format!("http://{address}").parse().map_err(parse_err)?;
    }

    if path.is_empty() {
        return Ok(uri);
    }

    let mut parts = uri.into_parts();
    let (base, query) = match &parts.path_and_query {
        Some(pq) => (pq.path().to_string(), pq.query().map(str::to_string)),
        None => (String::new(), None),
    };
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let joined = match query {
        Some(q) => format!("{joined}?{q}"),
        None => joined,
    };

    parts.path_and_query = Some(
        joined
            .parse()
            .map_err(|e| ProbeError::InvalidTarget(format!("failed to parse url: {e}")))?,
    );
    Uri::from_parts(parts).map_err(|e| ProbeError::InvalidTarget(format!("failed to parse url: {e}")))
}

fn tls_config() -> Option<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    match rustls::ClientConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
        .with_safe_default_protocol_versions()
    {
        Ok(builder) => Some(Arc::new(
            builder.with_root_certificates(roots).with_no_client_auth(),
        )),
        Err(e) => {
            debug!(error = %e, "https probes disabled");
            None
        }
    }
}
