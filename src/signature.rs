use tracing::debug;
use xmlsec::{XmlSecDocumentExt as _, XmlSecKey, XmlSecKeyFormat, XmlSecSignatureContext};

use crate::utils::{parse_xml, NS_ASSERTION, NS_PROTOCOL};

/// Checks an enveloped XML signature against one trusted certificate.
///
/// Implementations must answer `false` for anything they cannot positively verify: no
/// signature, a malformed one, a different key or an unloadable certificate.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, signed_xml: &[u8], trusted_cert: &[u8]) -> bool;
}

impl<T: SignatureVerifier + ?Sized> SignatureVerifier for std::sync::Arc<T> {
    fn verify(&self, signed_xml: &[u8], trusted_cert: &[u8]) -> bool {
        (**self).verify(signed_xml, trusted_cert)
    }
}

/// Verifier backed by libxmlsec1. Certificates are DER encoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlSecVerifier;

impl SignatureVerifier for XmlSecVerifier {
    fn verify(&self, signed_xml: &[u8], trusted_cert: &[u8]) -> bool {
        let document = match parse_xml(signed_xml) {
            Ok(document) => document,
            Err(e) => {
                debug!(error = %e, "signed document is not well formed");
                return false;
            }
        };

        let key = match XmlSecKey::from_memory(trusted_cert, XmlSecKeyFormat::CertDer, None) {
            Ok(key) => key,
            Err(e) => {
                debug!(error = ?e, "could not load the trusted certificate");
                return false;
            }
        };

        let mut sigctx = XmlSecSignatureContext::new();
        sigctx.insert_key(key);

        // The Response is always present; the Assertion only on success.
        if let Err(e) = document.specify_idattr(
            "//samlp:Response",
            "ID",
            Some(&[("samlp", NS_PROTOCOL)]),
        ) {
            debug!(error = ?e, "could not register the Response ID attribute");
            return false;
        }
        if let Err(e) = document.specify_idattr(
            "//saml:Assertion",
            "ID",
            Some(&[("saml", NS_ASSERTION)]),
        ) {
            debug!(error = ?e, "could not register the Assertion ID attribute");
        }

        match sigctx.verify_document(&document) {
            Ok(valid) => valid,
            Err(e) => {
                debug!(error = ?e, "signature verification failed");
                false
            }
        }
    }
}
