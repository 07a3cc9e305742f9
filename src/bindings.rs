//! HTTP-Redirect and HTTP-POST encodings of SAML messages.

use std::io::Read;

use base64::{prelude::BASE64_STANDARD, Engine};
use deflate::deflate_bytes;
use flate2::read::DeflateDecoder;
use rsa::{
    pkcs1::DecodeRsaPrivateKey,
    pkcs1v15::SigningKey,
    pkcs8::DecodePrivateKey,
    sha2::{Sha256, Sha512},
    signature::{SignatureEncoding, Signer},
    RsaPrivateKey,
};
use url::form_urlencoded;

use crate::{config::SignatureAlgorithm, utils::decode_xml_base64, SamlError};

/// Inflated messages larger than this are rejected.
const MAX_INFLATED_SIZE: u64 = 1024 * 1024;

/// Raw DEFLATE followed by base64, as carried in a redirect query parameter.
pub fn encode_redirect_message(xml: &str) -> String {
    let compressed = deflate_bytes(xml.as_bytes());
    BASE64_STANDARD.encode(compressed)
}

/// Reverses [`encode_redirect_message`]. The value must already be URL-decoded.
pub fn decode_redirect_message(encoded: &str) -> Result<String, SamlError> {
    let compressed = decode_xml_base64(encoded)
        .map_err(|e| SamlError::Parse(format!("invalid base64: {e}")))?;

    let mut inflated = Vec::new();
    DeflateDecoder::new(compressed.as_slice())
        .take(MAX_INFLATED_SIZE + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| SamlError::Parse(format!("could not inflate message: {e}")))?;
    if inflated.len() as u64 > MAX_INFLATED_SIZE {
        return Err(SamlError::Parse("inflated message is too large".into()));
    }

    String::from_utf8(inflated).map_err(|e| SamlError::Parse(format!("invalid UTF-8: {e}")))
}

/// Plain base64, as carried in a POST form field.
pub fn encode_post_message(xml: &str) -> String {
    BASE64_STANDARD.encode(xml.as_bytes())
}

pub(crate) fn decode_post_message(encoded: &str) -> Result<Vec<u8>, SamlError> {
    decode_xml_base64(encoded).map_err(|e| SamlError::Parse(format!("invalid base64: {e}")))
}

/// Key used to sign redirect binding query strings.
pub(crate) struct QuerySigner {
    key: RsaPrivateKey,
    algorithm: SignatureAlgorithm,
}

impl QuerySigner {
    pub fn from_pem(pem: &str, algorithm: SignatureAlgorithm) -> Result<Self, SamlError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| SamlError::Build(format!("could not load the SP private key: {e}")))?;
        Ok(QuerySigner { key, algorithm })
    }

    fn sign(&self, data: &[u8]) -> String {
        let signature = match self.algorithm {
            SignatureAlgorithm::RsaSha256 => SigningKey::<Sha256>::new(self.key.clone())
                .sign(data)
                .to_bytes(),
            SignatureAlgorithm::RsaSha512 => SigningKey::<Sha512>::new(self.key.clone())
                .sign(data)
                .to_bytes(),
        };
        BASE64_STANDARD.encode(signature)
    }
}

/// Builds `destination?{parameter}=..&RelayState=..[&SigAlg=..&Signature=..]`.
///
/// The signature covers the query string up to and including `SigAlg`, in that order.
pub(crate) fn redirect_url(
    destination: &str,
    parameter: &str,
    encoded: &str,
    relay_state: Option<&str>,
    signer: Option<&QuerySigner>,
) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair(parameter, encoded);
    if let Some(relay_state) = relay_state {
        query.append_pair("RelayState", relay_state);
    }
    if let Some(signer) = signer {
        query.append_pair("SigAlg", signer.algorithm.uri());
    }
    let mut query = query.finish();

    if let Some(signer) = signer {
        let signature = signer.sign(query.as_bytes());
        query.push('&');
        query.push_str(
            &form_urlencoded::Serializer::new(String::new())
                .append_pair("Signature", &signature)
                .finish(),
        );
    }

    let separator = if destination.contains('?') { '&' } else { '?' };
    format!("{destination}{separator}{query}")
}

/// First value of `name` in a form-urlencoded body or query string.
pub(crate) fn form_value(body: &str, name: &str) -> Option<String> {
    form_urlencoded::parse(body.trim_start_matches('?').as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}
