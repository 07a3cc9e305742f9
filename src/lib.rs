//! Service-provider side of SAML 2.0 web browser SSO.
//!
//! A [`ServiceProvider`] is built once from a [`Configuration`] and then used to issue login
//! requests, validate the IdP's responses and read the user's attributes.

mod attributes;
mod authn_request;
mod bindings;
mod config;
mod idp_metadata;
mod response;
mod service_provider;
mod signature;
mod sp_metadata;
mod tracker;
mod utils;

#[cfg(test)]
mod test_support;

pub use attributes::{
    derive_identifier, find_email, get_attribute_value, list_attribute_names, AttributeValue,
};
pub use authn_request::{AuthnRequestBuilder, ProtocolBinding, RequestedAuthnContext};
pub use bindings::{decode_redirect_message, encode_post_message, encode_redirect_message};
pub use config::{AuthContextOptions, Configuration, IdpOptions, SignatureAlgorithm, SpOptions};
pub use idp_metadata::{parse_idp_metadata, IdpMetadata};
pub use response::{AssertionResponse, ResponseHeader, Status, User, UserInfo};
pub use service_provider::{LoginOptions, LoginRequest, PostForm, ServiceProvider};
pub use signature::{SignatureVerifier, XmlSecVerifier};
pub use sp_metadata::SpMetadataBuilder;
pub use tracker::PendingRequests;

use time::format_description::well_known::iso8601::{self, TimePrecision};

pub const NAME_ID_FORMAT_EMAIL_ADDRESS: &str =
    "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// Content type under which SP metadata is served.
pub const METADATA_CONTENT_TYPE: &str = "application/xml";

// xs:dateTime isn't actually ISO8601, because implementors often don't support higher precisions.
pub const DATE_TIME_FORMAT: iso8601::Iso8601<
    {
        iso8601::Config::DEFAULT
            .set_time_precision(TimePrecision::Second {
                decimal_digits: None,
            })
            .encode()
    },
> = iso8601::Iso8601;

pub type Result<T> = std::result::Result<T, SamlError>;

/// Errors returned by every protocol operation.
///
/// `Signature` and `Correlation` only display a generic message. The reason they were raised
/// is kept for operators and available through [`SamlError::detail`].
#[derive(Debug, thiserror::Error)]
pub enum SamlError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("could not build the authentication request: {0}")]
    Build(String),
    #[error("could not parse the SAML message: {0}")]
    Parse(String),
    #[error("the SAML message signature could not be verified")]
    Signature { reason: String },
    #[error("the identity provider returned status {status}")]
    IdP {
        status: String,
        message: Option<String>,
    },
    #[error("the SAML assertion does not correspond to the expected request. Please try again.")]
    Correlation {
        expected: String,
        actual: Option<String>,
    },
    #[error("the SAML response was issued by an unexpected identity provider")]
    Issuer { expected: String, actual: String },
    #[error("the SAML assertion conditions are not met: {0}")]
    Condition(String),
}

impl SamlError {
    pub(crate) fn signature(reason: impl Into<String>) -> Self {
        SamlError::Signature {
            reason: reason.into(),
        }
    }

    /// Operator-facing explanation, including the parts not shown by `Display`.
    pub fn detail(&self) -> String {
        match self {
            SamlError::Signature { reason } => format!("{self}: {reason}"),
            SamlError::Correlation { expected, actual } => {
                format!("{self} (expected {expected:?}, got {actual:?})")
            }
            SamlError::Issuer { expected, actual } => {
                format!("{self} (expected {expected:?}, got {actual:?})")
            }
            SamlError::IdP {
                message: Some(message),
                ..
            } => format!("{self}: {message}"),
            _ => self.to_string(),
        }
    }
}
