use std::error::Error as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ntx_common::NtxError;
use ntx_common::network::host::Host;
use ntx_common::network::protocol::Protocol;
use ntx_common::network::{DEFAULT_HTTP_PORT, DEFAULT_HTTPS_PORT};
use ntx_common::ping::{PingOptions, PingReply, PingResult};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, StatusCode, Url};
use tokio_util::sync::CancellationToken;

use super::{PingStream, Pinger, Session, execution_context, run_batch, spawn_stream};
use crate::resolver::Resolver;

pub const USER_AGENT: &str = concat!("ntx/", env!("CARGO_PKG_VERSION"));

/// Probes with one HTTP request each. Redirects are reported, never followed.
pub struct HttpPinger {
    resolver: Arc<Resolver>,
}

impl HttpPinger {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }

    async fn session(
        &self,
        target: &str,
        opts: &PingOptions,
    ) -> Result<(Host, Protocol, HttpSession), NtxError> {
        opts.validate()?;

        let url = target_url(target, opts)?;
        let host_str = url
            .host_str()
            .ok_or_else(|| NtxError::InvalidHost(target.to_string()))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(DEFAULT_HTTP_PORT);
        let host = self
            .resolver
            .resolve(&host_str, opts.ip_version)
            .await?
            .with_port(port);

        let mut builder = Client::builder()
            .redirect(Policy::none())
            .timeout(opts.timeout)
            .user_agent(USER_AGENT);
        // Pin the address we resolved so the IP version preference holds.
        if let Some(domain) = url.domain() {
            builder = builder.resolve(domain, SocketAddr::new(host.ip, 0));
        }
        let client = builder
            .build()
            .map_err(|e| NtxError::Http(describe(&e)))?;

        let protocol = if url.scheme() == "https" {
            Protocol::Https
        } else {
            Protocol::Http
        };
        let authority = match url.port() {
            Some(port) => format!("{host_str}:{port}"),
            None => host_str,
        };

        let session = HttpSession {
            client,
            method: parse_method(&opts.http_method)?,
            url,
            authority,
        };
        Ok((host, protocol, session))
    }
}

#[async_trait]
impl Pinger for HttpPinger {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    async fn ping(
        &self,
        cancel: &CancellationToken,
        target: &str,
        opts: &PingOptions,
    ) -> Result<PingResult, NtxError> {
        let (host, protocol, session) = self.session(target, opts).await?;
        let result = PingResult::new(host, protocol, execution_context());
        Ok(run_batch(&session, result, opts, cancel).await)
    }

    async fn ping_stream(
        &self,
        cancel: &CancellationToken,
        target: &str,
        opts: &PingOptions,
    ) -> Result<PingStream, NtxError> {
        let (_, _, session) = self.session(target, opts).await?;
        Ok(spawn_stream(session, opts, cancel))
    }

    async fn close(&mut self) -> Result<(), NtxError> {
        Ok(())
    }
}

struct HttpSession {
    client: Client,
    method: Method,
    url: Url,
    authority: String,
}

impl HttpSession {
    async fn exchange(&self) -> Result<(StatusCode, usize), reqwest::Error> {
        let response = self
            .client
            .request(self.method.clone(), self.url.clone())
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok((status, body.len()))
    }
}

#[async_trait]
impl Session for HttpSession {
    async fn probe(&self, seq: u32, cancel: &CancellationToken) -> Option<PingReply> {
        let start = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            outcome = self.exchange() => outcome,
        };
        let rtt = start.elapsed();

        Some(match outcome {
            Ok((status, bytes)) => {
                let from = format!("{} (status: {})", self.authority, status.as_u16());
                let mut reply = PingReply::new(seq, from).success(rtt, bytes);
                if status.is_client_error() || status.is_server_error() {
                    reply = reply.failure(format!(
                        "HTTP {} {}",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("Unknown")
                    ));
                }
                reply
            }
            Err(e) if e.is_timeout() => PingReply::new(seq, self.authority.as_str()).timeout(rtt),
            Err(e) => PingReply::new(seq, self.authority.as_str()).failure(describe(&e)),
        })
    }
}

/// Builds the probe URL. Without a scheme, port 443 means https.
/// A bare or `/` path is replaced by `opts.http_path`.
pub fn target_url(target: &str, opts: &PingOptions) -> Result<Url, NtxError> {
    let invalid = || NtxError::InvalidHost(target.to_string());
    let target = target.trim();
    if target.is_empty() {
        return Err(invalid());
    }

    let raw = if target.contains("://") {
        target.to_string()
    } else if opts.port == Some(DEFAULT_HTTPS_PORT) {
        format!("https://{target}")
    } else {
        format!("http://{target}")
    };

    let mut url = Url::parse(&raw).map_err(|_| invalid())?;
    if url.host_str().is_none() {
        return Err(invalid());
    }
    if matches!(url.path(), "" | "/") && !opts.http_path.is_empty() {
        url.set_path(&opts.http_path);
    }
    if let Some(port) = opts.port {
        if url.port().is_none() && url.port_or_known_default() != Some(port) {
            url.set_port(Some(port)).map_err(|_| invalid())?;
        }
    }
    Ok(url)
}

fn parse_method(method: &str) -> Result<Method, NtxError> {
    if method.is_empty() {
        return Ok(Method::GET);
    }
    Method::from_bytes(method.to_uppercase().as_bytes()).map_err(|_| NtxError::InvalidOption {
        field: "http_method",
        reason: format!("{method:?} is not an HTTP method"),
    })
}

/// reqwest keeps the useful part (refused, reset, tls) in the source chain.
fn describe(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
