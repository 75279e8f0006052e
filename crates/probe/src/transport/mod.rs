//! Single-attempt HTTP/1.1 client with per-phase timing.
//!
//! Every hop opens a fresh connection (`Connection: close`) so connect and
//! handshake times are measured on every run. Redirects are followed by
//! hand to keep phase timings per hop and to record the final URL.

pub mod error;
pub mod phase;
pub mod tls;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use http::header::{CONNECTION, HOST, LOCATION, USER_AGENT};
use http::{HeaderName, HeaderValue, Method, Request, StatusCode, Version};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use url::{Host, Position, Url};

pub use error::TransportError;
use phase::{PhaseClock, PhaseIo};
pub use tls::CertInfo;

use crate::model::{Timings, Tuples};

pub const DEFAULT_USER_AGENT: &str = "API Checker/1.0";

/// Transport limits
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub timeout: Duration,
    pub max_redirects: usize,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_redirects: 10,
            max_body_bytes: 5 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// A request ready to be sent
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Tuples,
    pub body: Option<Bytes>,
}

/// A completed exchange. Fields describe the final hop.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub url: Url,
    pub ip: String,
    pub status: StatusCode,
    pub version: Version,
    pub headers: Tuples,
    pub body: Bytes,
    pub timings: Timings,
    pub cert: Option<CertInfo>,
    pub redirects: usize,
}

impl Exchange {
    pub fn protocol(&self) -> &'static str {
        match self.version {
            Version::HTTP_09 => "HTTP/0.9",
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_2 => "HTTP/2",
            Version::HTTP_3 => "HTTP/3",
            _ => "HTTP/1.1",
        }
    }
}

pub struct HttpTransport {
    options: HttpOptions,
    tls: TlsConnector,
}

impl HttpTransport {
    pub fn new(options: HttpOptions) -> Result<Self, TransportError> {
        Ok(Self { options, tls: tls::connector()? })
    }

    pub fn options(&self) -> &HttpOptions {
        &self.options
    }

    /// Send `request` within `timeout`, following redirects when asked.
    pub async fn send(
        &self,
        request: PreparedRequest,
        follow_redirects: bool,
        timeout: Duration,
    ) -> Result<Exchange, TransportError> {
        tokio::time::timeout(timeout, self.send_chain(request, follow_redirects))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    async fn send_chain(
        &self,
        mut request: PreparedRequest,
        follow_redirects: bool,
    ) -> Result<Exchange, TransportError> {
        let started = Instant::now();
        let mut redirects = 0;

        loop {
            let mut exchange = self.send_once(&request).await?;
            exchange.redirects = redirects;

            let next = if follow_redirects { redirect_target(&exchange) } else { None };
            let Some(location) = next else {
                exchange.timings.total = millis(started.elapsed());
                return Ok(exchange);
            };

            if redirects >= self.options.max_redirects {
                return Err(TransportError::TooManyRedirects(redirects));
            }
            redirects += 1;
            debug!(from = %request.url, to = %location, status = exchange.status.as_u16(), "Following redirect");

            if matches!(
                exchange.status,
                StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
            ) && request.method != Method::HEAD
            {
                request.method = Method::GET;
                request.body = None;
                request.headers.retain(|(name, _)| !name.eq_ignore_ascii_case("content-type"));
            }
            if location.origin() != request.url.origin() {
                request.headers.retain(|(name, _)| !name.eq_ignore_ascii_case("authorization"));
            }
            request.url = location;
        }
    }

    async fn send_once(&self, request: &PreparedRequest) -> Result<Exchange, TransportError> {
        let url = &request.url;
        let secure = match url.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(TransportError::InvalidUrl(format!("unsupported scheme {other}"))),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;

        let dns_start = Instant::now();
        let (host, addrs) = resolve(url, port).await?;
        let dns = millis(dns_start.elapsed());

        let tcp_start = Instant::now();
        let stream = connect(&addrs).await?;
        let tcp = millis(tcp_start.elapsed());
        let _ = stream.set_nodelay(true);
        let ip = stream.peer_addr().map(|a| a.ip().to_string()).unwrap_or_default();

        let mut exchange = if secure {
            let server_name = rustls::pki_types::ServerName::try_from(host)
                .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

            let tls_start = Instant::now();
            let stream = self
                .tls
                .connect(server_name, stream)
                .await
                .map_err(|e| TransportError::Tls(e.to_string()))?;
            let tls_ms = millis(tls_start.elapsed());
            let cert = tls::observe(stream.get_ref().1.peer_certificates(), Utc::now());

            let mut exchange = self.exchange(stream, request).await?;
            exchange.timings.tls = tls_ms;
            exchange.cert = cert;
            exchange
        } else {
            self.exchange(stream, request).await?
        };

        exchange.ip = ip;
        exchange.timings.dns = dns;
        exchange.timings.tcp = tcp;
        Ok(exchange)
    }

    async fn exchange<S>(&self, stream: S, request: &PreparedRequest) -> Result<Exchange, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let clock = PhaseClock::default();
        let io = TokioIo::new(PhaseIo::new(stream, clock.clone()));
        let http_request = self.build(request)?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake::<_, Full<Bytes>>(io).await?;
        let conn_task = tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "Connection closed with error");
            }
        });

        let sent = Instant::now();
        let response = sender.send_request(http_request).await?;
        let (parts, body) = response.into_parts();

        let body = Limited::new(body, self.options.max_body_bytes)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    TransportError::BodyTooLarge(self.options.max_body_bytes)
                } else {
                    TransportError::Protocol(e.to_string())
                }
            })?
            .to_bytes();
        let done = Instant::now();
        conn_task.abort();

        let marks = clock.snapshot();
        let first_write = marks.first_write.unwrap_or(sent);
        let last_write = marks.last_write.unwrap_or(first_write);
        let first_read = marks.first_read.unwrap_or(done);

        let timings = Timings {
            wait: millis(first_write.saturating_duration_since(sent)),
            upload: millis(last_write.saturating_duration_since(first_write)),
            ttfb: millis(first_read.saturating_duration_since(last_write)),
            download: millis(done.saturating_duration_since(first_read)),
            ..Timings::default()
        };

        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned())
            })
            .collect();

        Ok(Exchange {
            url: request.url.clone(),
            ip: String::new(),
            status: parts.status,
            version: parts.version,
            headers,
            body,
            timings,
            cert: None,
            redirects: 0,
        })
    }

    fn build(&self, request: &PreparedRequest) -> Result<Request<Full<Bytes>>, TransportError> {
        let url = &request.url;
        let target = &url[Position::BeforePath..Position::AfterQuery];
        let authority = &url[Position::BeforeHost..Position::AfterPort];

        let mut builder = Request::builder()
            .method(request.method.clone())
            .uri(if target.is_empty() { "/" } else { target })
            .version(Version::HTTP_11)
            .header(HOST, authority);

        let mut has_agent = false;
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Other(format!("invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Other(format!("invalid header value for {name}: {e}")))?;
            if name == HOST || name == CONNECTION {
                continue;
            }
            has_agent |= name == USER_AGENT;
            builder = builder.header(name, value);
        }

        if !has_agent {
            builder = builder.header(USER_AGENT, self.options.user_agent.as_str());
        }
        builder = builder.header(CONNECTION, "close");

        Ok(builder.body(Full::new(request.body.clone().unwrap_or_default()))?)
    }
}

async fn resolve(url: &Url, port: u16) -> Result<(String, Vec<SocketAddr>), TransportError> {
    match url.host() {
        Some(Host::Ipv4(ip)) => Ok((ip.to_string(), vec![SocketAddr::new(ip.into(), port)])),
        Some(Host::Ipv6(ip)) => Ok((ip.to_string(), vec![SocketAddr::new(ip.into(), port)])),
        Some(Host::Domain(domain)) => {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| TransportError::Dns(format!("{domain}: {e}")))?
                .collect();
            if addrs.is_empty() {
                return Err(TransportError::Dns(format!("{domain}: no addresses")));
            }
            Ok((domain.to_string(), addrs))
        }
        None => Err(TransportError::InvalidUrl(format!("{url} has no host"))),
    }
}

async fn connect(addrs: &[SocketAddr]) -> Result<TcpStream, TransportError> {
    let mut last = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "Connect attempt failed");
                last = Some(e);
            }
        }
    }
    Err(last.map(TransportError::from).unwrap_or_else(|| TransportError::Connect("no address".into())))
}

fn redirect_target(exchange: &Exchange) -> Option<Url> {
    if !exchange.status.is_redirection() || exchange.status == StatusCode::NOT_MODIFIED {
        return None;
    }
    let location = exchange
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(LOCATION.as_str()))?;
    exchange.url.join(&location.1).ok()
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Whether `status` counts as a healthy response
pub fn status_ok(status: StatusCode, follow_redirects: bool) -> bool {
    let code = status.as_u16();
    let upper = if follow_redirects { 299 } else { 399 };
    (200..=upper).contains(&code) || status == StatusCode::NOT_MODIFIED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ok_ranges() {
        assert!(status_ok(StatusCode::OK, true));
        assert!(status_ok(StatusCode::NOT_MODIFIED, true));
        assert!(!status_ok(StatusCode::FOUND, true));
        assert!(status_ok(StatusCode::FOUND, false));
        assert!(!status_ok(StatusCode::NOT_FOUND, false));
        assert!(!status_ok(StatusCode::CONTINUE, true));
    }

    #[test]
    fn test_request_line_and_defaults() {
        let transport = HttpTransport::new(HttpOptions::default()).unwrap();
        let request = PreparedRequest {
            method: Method::GET,
            url: Url::parse("http://example.com:8080/a/b?x=1").unwrap(),
            headers: vec![("X-Trace".into(), "1".into())],
            body: None,
        };

        let built = transport.build(&request).unwrap();
        assert_eq!(built.uri(), "/a/b?x=1");
        assert_eq!(built.headers()[HOST], "example.com:8080");
        assert_eq!(built.headers()[USER_AGENT], DEFAULT_USER_AGENT);
        assert_eq!(built.headers()[CONNECTION], "close");
        assert_eq!(built.headers()["x-trace"], "1");
    }

    #[test]
    fn test_invalid_header_name_is_other() {
        let transport = HttpTransport::new(HttpOptions::default()).unwrap();
        let request = PreparedRequest {
            method: Method::GET,
            url: Url::parse("http://example.com/").unwrap(),
            headers: vec![("bad header".into(), "1".into())],
            body: None,
        };

        let err = transport.build(&request).unwrap_err();
        assert!(matches!(err, TransportError::Other(_)));
        assert!(err.code().starts_with("invalid header name"));
    }
}
