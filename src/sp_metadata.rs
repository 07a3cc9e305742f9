use base64::{prelude::BASE64_STANDARD, Engine};
use yaserde::YaSerialize;

use crate::{authn_request::ProtocolBinding, utils::certificate_der, SamlError};

#[derive(YaSerialize)]
#[yaserde(
  namespaces = {
    "md" = "urn:oasis:names:tc:SAML:2.0:metadata",
    "ds" = "http://www.w3.org/2000/09/xmldsig#",
  },
  prefix = "md"
)]
struct EntityDescriptor {
    #[yaserde(attribute = true, rename = "entityID")]
    entity_id: String,
    #[yaserde(rename = "SPSSODescriptor", prefix = "md")]
    sp_sso_descriptor: SPSSODescriptor,
}

#[derive(YaSerialize)]
struct SPSSODescriptor {
    #[yaserde(attribute = true, rename = "AuthnRequestsSigned")]
    authn_requests_signed: bool,
    #[yaserde(attribute = true, rename = "WantAssertionsSigned")]
    want_assertions_signed: bool,
    #[yaserde(attribute = true, rename = "protocolSupportEnumeration")]
    protocol_support_enumeration: String,
    #[yaserde(rename = "KeyDescriptor", prefix = "md")]
    key_descriptors: Vec<KeyDescriptor>,
    #[yaserde(rename = "NameIDFormat", prefix = "md")]
    name_id_format: NameIdFormat,
    #[yaserde(rename = "AssertionConsumerService", prefix = "md")]
    assertion_consumer_service: AssertionConsumerService,
}

#[derive(YaSerialize)]
struct KeyDescriptor {
    #[yaserde(attribute = true, rename = "use")]
    key_use: String,
    #[yaserde(rename = "KeyInfo", prefix = "ds")]
    key_info: KeyInfo,
}

#[derive(YaSerialize)]
struct KeyInfo {
    #[yaserde(rename = "X509Data", prefix = "ds")]
    x509_data: X509Data,
}

#[derive(YaSerialize)]
struct X509Data {
    #[yaserde(rename = "X509Certificate", prefix = "ds")]
    x509_certificate: String,
}

#[derive(YaSerialize)]
struct NameIdFormat {
    #[yaserde(text = true)]
    content: String,
}

#[derive(YaSerialize)]
struct AssertionConsumerService {
    #[yaserde(attribute = true, rename = "Binding")]
    binding: String,
    #[yaserde(attribute = true, rename = "Location")]
    location: String,
    #[yaserde(attribute = true)]
    index: u32,
}

#[derive(Default)]
pub struct SpMetadataBuilder {
    entity_id: Option<String>,
    acs_url: Option<String>,
    name_id_format: Option<String>,
    certificate: Option<String>,
    authn_requests_signed: bool,
}

impl SpMetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_id(self, entity_id: &str) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..self
        }
    }

    pub fn acs_url(self, acs_url: &str) -> Self {
        Self {
            acs_url: Some(acs_url.into()),
            ..self
        }
    }

    pub fn name_id_format(self, name_id_format: &str) -> Self {
        Self {
            name_id_format: Some(name_id_format.into()),
            ..self
        }
    }

    /// PEM (or bare base64) signing certificate to publish.
    pub fn certificate(self, certificate: &str) -> Self {
        Self {
            certificate: Some(certificate.into()),
            ..self
        }
    }

    pub fn authn_requests_signed(self, signed: bool) -> Self {
        Self {
            authn_requests_signed: signed,
            ..self
        }
    }

    pub fn build(self) -> Result<String, SamlError> {
        let missing = |what: &str| SamlError::Build(format!("{what} is required"));

        let key_descriptors = match self.certificate {
            Some(certificate) => {
                // Normalized so the metadata carries the body on a single line.
                let der = certificate_der(&certificate)
                    .map_err(|e| SamlError::Build(format!("invalid SP certificate: {e}")))?;
                vec![KeyDescriptor {
                    key_use: "signing".into(),
                    key_info: KeyInfo {
                        x509_data: X509Data {
                            x509_certificate: BASE64_STANDARD.encode(der),
                        },
                    },
                }]
            }
            None => Vec::new(),
        };

        let metadata = EntityDescriptor {
            entity_id: self.entity_id.ok_or_else(|| missing("entity_id"))?,
            sp_sso_descriptor: SPSSODescriptor {
                authn_requests_signed: self.authn_requests_signed,
                want_assertions_signed: true,
                protocol_support_enumeration: "urn:oasis:names:tc:SAML:2.0:protocol".into(),
                key_descriptors,
                name_id_format: NameIdFormat {
                    content: self.name_id_format.ok_or_else(|| missing("name_id_format"))?,
                },
                assertion_consumer_service: AssertionConsumerService {
                    binding: ProtocolBinding::Post.to_string(),
                    location: self.acs_url.ok_or_else(|| missing("acs_url"))?,
                    index: 0,
                },
            },
        };
        yaserde::ser::to_string(&metadata).map_err(SamlError::Build)
    }
}
