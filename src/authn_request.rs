use std::{fmt::Display, str::FromStr};

use time::OffsetDateTime;
use yaserde::YaSerialize;

use crate::{bindings, utils::random_request_id, SamlError, DATE_TIME_FORMAT};

#[derive(YaSerialize)]
#[yaserde(
  namespaces = {
    "samlp" = "urn:oasis:names:tc:SAML:2.0:protocol",
    "saml" = "urn:oasis:names:tc:SAML:2.0:assertion",
  },
  prefix = "samlp"
)]
struct AuthnRequest {
    #[yaserde(attribute = true, rename = "ID")]
    id: String,
    #[yaserde(attribute = true, rename = "Version")]
    version: String,
    #[yaserde(attribute = true, rename = "IssueInstant")]
    issue_instant: String,
    #[yaserde(attribute = true, rename = "Destination")]
    destination: String,
    #[yaserde(attribute = true, rename = "ForceAuthn")]
    force_authn: bool,
    #[yaserde(attribute = true, rename = "ProtocolBinding")]
    protocol_binding: String,
    #[yaserde(attribute = true, rename = "AssertionConsumerServiceURL")]
    assertion_consumer_service_url: String,
    #[yaserde(rename = "Issuer", prefix = "saml")]
    issuer: Issuer,
    #[yaserde(rename = "NameIDPolicy", prefix = "samlp")]
    name_id_policy: NameIdPolicy,
    #[yaserde(rename = "RequestedAuthnContext", prefix = "samlp")]
    requested_authn_context: Option<AuthnContextElement>,
}

#[derive(YaSerialize)]
struct Issuer {
    #[yaserde(attribute = true, rename = "Format")]
    format: String,
    #[yaserde(text = true)]
    content: String,
}

#[derive(YaSerialize)]
struct NameIdPolicy {
    #[yaserde(attribute = true, rename = "Format")]
    format: String,
    #[yaserde(attribute = true, rename = "AllowCreate")]
    allow_create: bool,
}

#[derive(YaSerialize)]
struct AuthnContextElement {
    #[yaserde(attribute = true, rename = "Comparison")]
    comparison: String,
    #[yaserde(rename = "AuthnContextClassRef", prefix = "saml")]
    class_refs: Vec<String>,
}

/// Authentication context the IdP is asked to satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedAuthnContext {
    pub comparison: String,
    pub class_refs: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolBinding {
    Post,
    #[default]
    Redirect,
}

impl Display for ProtocolBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ProtocolBinding::Post => write!(f, "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"),
            ProtocolBinding::Redirect => {
                write!(f, "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect")
            }
        }
    }
}

impl FromStr for ProtocolBinding {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" | "post" | "POST" => {
                Ok(ProtocolBinding::Post)
            }
            "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" | "redirect" | "REDIRECT" => {
                Ok(ProtocolBinding::Redirect)
            }
            _ => Err(()),
        }
    }
}

#[derive(Default)]
pub struct AuthnRequestBuilder {
    id: Option<String>,
    issue_instant: Option<OffsetDateTime>,
    issuer: Option<String>,
    destination: Option<String>,
    protocol_binding: Option<ProtocolBinding>,
    consumer_url: Option<String>,
    name_format: Option<String>,
    deny_create: bool,
    force_authn: bool,
    authn_context: Option<RequestedAuthnContext>,
}

impl AuthnRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(self, id: &str) -> Self {
        AuthnRequestBuilder {
            id: Some(id.into()),
            ..self
        }
    }

    pub fn auto_id(self) -> Self {
        AuthnRequestBuilder {
            id: Some(random_request_id()),
            ..self
        }
    }

    pub fn issue_instant(self, instant: OffsetDateTime) -> Self {
        AuthnRequestBuilder {
            issue_instant: Some(instant),
            ..self
        }
    }

    pub fn issued_now(self) -> Self {
        AuthnRequestBuilder {
            issue_instant: Some(OffsetDateTime::now_utc()),
            ..self
        }
    }

    pub fn issuer(self, issuer: &str) -> Self {
        AuthnRequestBuilder {
            issuer: Some(issuer.into()),
            ..self
        }
    }

    pub fn destination(self, destination: &str) -> Self {
        AuthnRequestBuilder {
            destination: Some(destination.into()),
            ..self
        }
    }

    /// Binding the IdP should use to deliver its response. Defaults to HTTP-POST.
    pub fn protocol_binding(self, binding: ProtocolBinding) -> Self {
        AuthnRequestBuilder {
            protocol_binding: Some(binding),
            ..self
        }
    }

    pub fn consumer_url(self, url: &str) -> Self {
        AuthnRequestBuilder {
            consumer_url: Some(url.into()),
            ..self
        }
    }

    pub fn name_format(self, format: &str) -> Self {
        AuthnRequestBuilder {
            name_format: Some(format.into()),
            ..self
        }
    }

    pub fn allow_create(self, allow: bool) -> Self {
        AuthnRequestBuilder {
            deny_create: !allow,
            ..self
        }
    }

    pub fn force_authn(self, force: bool) -> Self {
        AuthnRequestBuilder {
            force_authn: force,
            ..self
        }
    }

    pub fn authn_context(self, context: Option<RequestedAuthnContext>) -> Self {
        AuthnRequestBuilder {
            authn_context: context,
            ..self
        }
    }

    /// The request id, if one has been set.
    pub fn request_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn build(self) -> Result<String, SamlError> {
        let req = AuthnRequest {
            id: required(self.id, "ID")?,
            version: "2.0".to_string(),
            issue_instant: required(self.issue_instant, "IssueInstant")?
                .format(&DATE_TIME_FORMAT)
                .map_err(|e| SamlError::Build(format!("IssueInstant: {e}")))?,
            destination: required(self.destination, "Destination")?,
            force_authn: self.force_authn,
            protocol_binding: self
                .protocol_binding
                .unwrap_or(ProtocolBinding::Post)
                .to_string(),
            assertion_consumer_service_url: required(self.consumer_url, "consumer URL")?,
            issuer: Issuer {
                format: "urn:oasis:names:tc:SAML:2.0:nameid-format:entity".to_string(),
                content: required(self.issuer, "Issuer")?,
            },
            name_id_policy: NameIdPolicy {
                format: required(self.name_format, "name format")?,
                allow_create: !self.deny_create,
            },
            requested_authn_context: self.authn_context.map(|context| AuthnContextElement {
                comparison: context.comparison,
                class_refs: context.class_refs,
            }),
        };
        yaserde::ser::to_string(&req).map_err(SamlError::Build)
    }

    /// Builds the request and encodes it for the HTTP-Redirect binding.
    pub fn build_and_encode(self) -> Result<String, SamlError> {
        let xml = self.build()?;
        Ok(bindings::encode_redirect_message(&xml))
    }
}

fn required<T>(value: Option<T>, what: &str) -> Result<T, SamlError> {
    value.ok_or_else(|| SamlError::Build(format!("{what} is required")))
}
