//! Post-handshake peer certificate checks.
//!
//! Chain-of-trust and revocation status are enforced by the engine's
//! verifier while the handshake runs; what remains here are the explicit
//! leaf checks: X.509 shape, validity window, and the hostname match when
//! one is required. Only the leaf is inspected; re-validating the rest
//! of the chain would duplicate the engine's work.
//!
//! All failures collapse to one error kind, but each distinct cause is
//! logged so a rejected peer can be diagnosed.

use std::time::{SystemTime, UNIX_EPOCH};

use rustls::pki_types::{CertificateDer, ServerName};
use tracing::{debug, warn};
use webpki::EndEntityCert;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{Error, Result};

/// RFC 5280's `99991231235959Z` sentinel: a certificate with no
/// well-defined expiration. Treated as invalid here.
const NO_WELL_DEFINED_EXPIRY: i64 = 253_402_300_799;

/// Validate the peer's leaf certificate. `required_name` is the hostname
/// the caller asked to be verified, if any.
pub(crate) fn verify_peer(
    chain: &[CertificateDer<'static>],
    required_name: Option<&ServerName<'static>>,
) -> Result<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0);
    verify_leaf(chain, required_name, now)
}

fn verify_leaf(
    chain: &[CertificateDer<'static>],
    required_name: Option<&ServerName<'static>>,
    now: i64,
) -> Result<()> {
    let Some(leaf) = chain.first() else {
        warn!("no peer certificate presented");
        return Err(Error::PeerCertVerify("no certificate presented".into()));
    };

    let (_, cert) = X509Certificate::from_der(leaf.as_ref()).map_err(|err| {
        warn!(%err, "peer certificate is not a parseable X.509 certificate");
        Error::PeerCertVerify("not an X.509 certificate".into())
    })?;

    let not_before = cert.validity().not_before.timestamp();
    let not_after = cert.validity().not_after.timestamp();
    if not_after >= NO_WELL_DEFINED_EXPIRY {
        warn!("peer certificate has no well-defined expiration");
        return Err(Error::PeerCertVerify("no well-defined expiration".into()));
    }
    if now < not_before {
        warn!(not_before, now, "peer certificate is not yet valid");
        return Err(Error::PeerCertVerify("certificate not yet valid".into()));
    }
    if now >= not_after {
        warn!(not_after, now, "peer certificate has expired");
        return Err(Error::PeerCertVerify("certificate expired".into()));
    }

    if let Some(name) = required_name {
        let end_entity = EndEntityCert::try_from(leaf).map_err(|err| {
            warn!(%err, "peer certificate rejected by the verification library");
            Error::PeerCertVerify("unusable end-entity certificate".into())
        })?;
        end_entity
            .verify_is_valid_for_subject_name(name)
            .map_err(|err| {
                warn!(%err, ?name, "peer certificate does not match required name");
                Error::PeerCertVerify(format!("certificate does not match {name:?}"))
            })?;
    }

    debug!("peer certificate validated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{Certificate, CertificateParams};
    use time::{Duration as TimeDelta, OffsetDateTime};

    fn leaf_der(params: CertificateParams) -> CertificateDer<'static> {
        let cert = Certificate::from_params(params).unwrap();
        CertificateDer::from(cert.serialize_der().unwrap())
    }

    fn now_secs() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    fn valid_params(names: &[&str]) -> CertificateParams {
        let mut params =
            CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>());
        params.not_before = OffsetDateTime::now_utc() - TimeDelta::days(1);
        params.not_after = OffsetDateTime::now_utc() + TimeDelta::days(30);
        params
    }

    #[test]
    fn accepts_a_current_certificate() {
        let chain = vec![leaf_der(valid_params(&["proxy.example"]))];
        verify_leaf(&chain, None, now_secs()).unwrap();
    }

    #[test]
    fn rejects_an_expired_certificate() {
        let mut params = valid_params(&["proxy.example"]);
        params.not_after = OffsetDateTime::now_utc() - TimeDelta::days(1);
        let chain = vec![leaf_der(params)];

        let err = verify_leaf(&chain, None, now_secs()).unwrap_err();
        assert!(matches!(err, Error::PeerCertVerify(ref reason) if reason.contains("expired")));
    }

    #[test]
    fn rejects_a_not_yet_valid_certificate() {
        let mut params = valid_params(&["proxy.example"]);
        params.not_before = OffsetDateTime::now_utc() + TimeDelta::days(1);
        params.not_after = OffsetDateTime::now_utc() + TimeDelta::days(30);
        let chain = vec![leaf_der(params)];

        let err = verify_leaf(&chain, None, now_secs()).unwrap_err();
        assert!(matches!(err, Error::PeerCertVerify(ref reason) if reason.contains("not yet")));
    }

    #[test]
    fn rejects_a_hostname_mismatch_on_an_otherwise_valid_certificate() {
        let chain = vec![leaf_der(valid_params(&["proxy.example"]))];
        let name = ServerName::try_from("other.example").unwrap();

        verify_leaf(&chain, None, now_secs()).unwrap();
        let err = verify_leaf(&chain, Some(&name), now_secs()).unwrap_err();
        assert!(matches!(err, Error::PeerCertVerify(_)));
    }

    #[test]
    fn accepts_a_matching_hostname() {
        let chain = vec![leaf_der(valid_params(&["proxy.example"]))];
        let name = ServerName::try_from("proxy.example").unwrap();
        verify_leaf(&chain, Some(&name), now_secs()).unwrap();
    }

    #[test]
    fn wildcard_names_match_one_label() {
        let chain = vec![leaf_der(valid_params(&["*.coap.example"]))];
        let matching = ServerName::try_from("node-7.coap.example").unwrap();
        let too_deep = ServerName::try_from("a.b.coap.example").unwrap();

        verify_leaf(&chain, Some(&matching), now_secs()).unwrap();
        assert!(verify_leaf(&chain, Some(&too_deep), now_secs()).is_err());
    }

    #[test]
    fn rejects_an_empty_chain_and_garbage_der() {
        assert!(matches!(
            verify_leaf(&[], None, now_secs()),
            Err(Error::PeerCertVerify(_))
        ));
        let chain = vec![CertificateDer::from(vec![0u8; 16])];
        assert!(matches!(
            verify_leaf(&chain, None, now_secs()),
            Err(Error::PeerCertVerify(_))
        ));
    }
}
