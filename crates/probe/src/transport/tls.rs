//! TLS client setup and peer certificate observation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;
use x509_parser::prelude::*;

use super::TransportError;

/// Leaf certificate details recorded on a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    pub common_name: String,
    pub expiry_days: i64,
}

/// Connector verifying against the bundled web PKI roots.
pub fn connector() -> Result<TlsConnector, TransportError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| TransportError::Tls(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Read the leaf of an already verified chain. Parsing problems are logged
/// and yield `None`; they never affect the connection.
pub fn observe(chain: Option<&[CertificateDer<'_>]>, now: DateTime<Utc>) -> Option<CertInfo> {
    let leaf = chain?.first()?;
    let (_, cert) = match X509Certificate::from_der(leaf.as_ref()) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(error = %e, "Failed to parse peer certificate");
            return None;
        }
    };

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();

    let not_after = cert.validity().not_after.timestamp();
    let expiry_days = (not_after - now.timestamp()).div_euclid(86_400);

    Some(CertInfo { common_name, expiry_days })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Self-signed leaf for `CN=api.apimon.test`, valid until 2036-10-16T20:14:08Z
    const LEAF: &[u8] = include_bytes!("testdata/leaf.der");

    fn not_after() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2036, 10, 16, 20, 14, 8).unwrap()
    }

    #[test]
    fn test_observe_reads_leaf() {
        let chain = [CertificateDer::from(LEAF)];
        let now = not_after() - chrono::Duration::days(30);

        let info = observe(Some(&chain), now).unwrap();

        assert_eq!(info, CertInfo { common_name: "api.apimon.test".into(), expiry_days: 30 });
    }

    #[test]
    fn test_expiry_counts_whole_days() {
        let chain = [CertificateDer::from(LEAF)];

        let partial = not_after() - chrono::Duration::days(10) - chrono::Duration::hours(5);
        assert_eq!(observe(Some(&chain), partial).unwrap().expiry_days, 10);

        let almost = not_after() - chrono::Duration::hours(23);
        assert_eq!(observe(Some(&chain), almost).unwrap().expiry_days, 0);

        // an hour past expiry already counts as a day overdue
        let expired = not_after() + chrono::Duration::hours(1);
        assert_eq!(observe(Some(&chain), expired).unwrap().expiry_days, -1);
    }

    #[test]
    fn test_missing_or_unparsable_chain() {
        let now = not_after();
        assert_eq!(observe(None, now), None);
        assert_eq!(observe(Some(&[]), now), None);

        let garbage = [CertificateDer::from(&b"not a certificate"[..])];
        assert_eq!(observe(Some(&garbage), now), None);
    }
}
