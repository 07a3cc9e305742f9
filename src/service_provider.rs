use libxml::tree::Document;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{
    attributes::derive_identifier,
    authn_request::{AuthnRequestBuilder, ProtocolBinding, RequestedAuthnContext},
    bindings::{
        decode_post_message, decode_redirect_message, encode_post_message, form_value,
        redirect_url, QuerySigner,
    },
    config::Configuration,
    response::{read_message, validate_post_response, AssertionResponse, UserInfo},
    signature::{SignatureVerifier, XmlSecVerifier},
    sp_metadata::SpMetadataBuilder,
    utils::parse_xml,
    SamlError,
};

type ParseXml = fn(&[u8]) -> Result<Document, SamlError>;

/// A login the caller should send the user agent to.
///
/// `request_id` has to be kept (typically in a short-lived session) and handed back to
/// [`ServiceProvider::parse_post_response`] when the IdP answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub login_url: String,
    pub request_id: String,
    /// Set for the HTTP-POST binding: the form to auto-submit to `login_url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<PostForm>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostForm {
    pub action: String,
    #[serde(rename = "SAMLRequest")]
    pub saml_request: String,
    #[serde(rename = "RelayState", skip_serializing_if = "Option::is_none")]
    pub relay_state: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    pub relay_state: Option<String>,
}

/// The SP side of the exchange with the configured IdP.
///
/// Holds no mutable state, so one instance can serve concurrent logins.
pub struct ServiceProvider {
    config: Configuration,
    verifier: Box<dyn SignatureVerifier>,
    parse_xml: ParseXml,
}

impl ServiceProvider {
    pub fn new(config: Configuration) -> Self {
        Self::with_verifier(config, XmlSecVerifier)
    }

    pub fn with_verifier(
        config: Configuration,
        verifier: impl SignatureVerifier + 'static,
    ) -> Self {
        debug!(
            entity_id = %config.sp().entity_id,
            idp = %config.idp().sso_login_url,
            "creating SAML service provider"
        );
        ServiceProvider {
            config,
            verifier: Box::new(verifier),
            parse_xml,
        }
    }

    /// Replaces the parser used for inbound messages.
    #[cfg(test)]
    pub(crate) fn with_xml_parser(self, parse_xml: ParseXml) -> Self {
        ServiceProvider { parse_xml, ..self }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// SP metadata, served as [`crate::METADATA_CONTENT_TYPE`].
    pub fn metadata(&self) -> Result<String, SamlError> {
        let sp = self.config.sp();
        SpMetadataBuilder::new()
            .entity_id(&sp.entity_id)
            .acs_url(&sp.assert_endpoint)
            .name_id_format(&sp.nameid_format)
            .certificate(&sp.certificate)
            .authn_requests_signed(sp.sign_get_request)
            .build()
    }

    pub fn create_login_request(&self) -> Result<LoginRequest, SamlError> {
        self.create_login_request_with(&LoginOptions::default())
    }

    pub fn create_login_request_with(
        &self,
        options: &LoginOptions,
    ) -> Result<LoginRequest, SamlError> {
        let sp = self.config.sp();
        let idp = self.config.idp();

        let builder = AuthnRequestBuilder::new()
            .auto_id()
            .issued_now()
            .issuer(&sp.entity_id)
            .destination(&idp.sso_login_url)
            .protocol_binding(ProtocolBinding::Post)
            .consumer_url(&sp.assert_endpoint)
            .name_format(&sp.nameid_format)
            .force_authn(sp.force_authn)
            .authn_context(sp.auth_context.as_ref().map(|context| RequestedAuthnContext {
                comparison: context.comparison.clone(),
                class_refs: context.class_refs.clone(),
            }));
        let request_id = builder
            .request_id()
            .map(str::to_string)
            .ok_or_else(|| SamlError::Build("no request id was generated".into()))?;
        let relay_state = options.relay_state.as_deref();

        let login = match sp.binding {
            ProtocolBinding::Redirect => {
                let signer = if sp.sign_get_request {
                    Some(QuerySigner::from_pem(
                        &sp.private_key,
                        idp.signature_algorithm,
                    )?)
                } else {
                    None
                };
                LoginRequest {
                    login_url: redirect_url(
                        &idp.sso_login_url,
                        "SAMLRequest",
                        &builder.build_and_encode()?,
                        relay_state,
                        signer.as_ref(),
                    ),
                    request_id,
                    form: None,
                }
            }
            ProtocolBinding::Post => LoginRequest {
                login_url: idp.sso_login_url.clone(),
                form: Some(PostForm {
                    action: idp.sso_login_url.clone(),
                    saml_request: encode_post_message(&builder.build()?),
                    relay_state: relay_state.map(str::to_string),
                }),
                request_id,
            },
        };

        debug!(
            request_id = %login.request_id,
            binding = ?sp.binding,
            "created SAML login request"
        );
        Ok(login)
    }

    /// Validates the IdP's HTTP-POST response to the request identified by
    /// `expected_request_id`.
    ///
    /// `form_body` is the urlencoded callback body carrying `SAMLResponse`.
    pub fn parse_post_response(
        &self,
        form_body: &str,
        expected_request_id: Option<&str>,
    ) -> Result<(UserInfo, AssertionResponse), SamlError> {
        let expected_request_id = expected_request_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                SamlError::InvalidArgument(
                    "a requestId is needed to verify the SAML assertion".into(),
                )
            })?;
        let encoded = form_value(form_body, "SAMLResponse").ok_or_else(|| {
            SamlError::InvalidArgument("the callback body has no SAMLResponse".into())
        })?;

        let xml = decode_post_message(&encoded)?;
        let response = (self.parse_xml)(&xml)
            .and_then(|document| {
                validate_post_response(
                    &document,
                    &xml,
                    &self.config,
                    self.verifier.as_ref(),
                    expected_request_id,
                    OffsetDateTime::now_utc(),
                )
            })
            .map_err(|e| {
                warn!(error = %e.detail(), "rejected SAML response");
                e
            })?;

        let user_info = UserInfo {
            authenticated_userid: derive_identifier(&response),
        };
        debug!(
            response_id = %response.response_header.id,
            user = ?user_info.authenticated_userid,
            "accepted SAML response"
        );
        Ok((user_info, response))
    }

    /// Decodes a message delivered with the HTTP-Redirect binding.
    ///
    /// Only the message structure is checked. There is no signature verification and no
    /// request id correlation on this path, so callers relying on either must add it.
    pub fn parse_redirect_request(
        &self,
        query: Option<&str>,
    ) -> Result<AssertionResponse, SamlError> {
        let query = query
            .filter(|query| !query.is_empty())
            .ok_or_else(|| SamlError::InvalidArgument("the query string is required".into()))?;
        let encoded = form_value(query, "SAMLRequest")
            .or_else(|| form_value(query, "SAMLResponse"))
            .ok_or_else(|| {
                SamlError::InvalidArgument(
                    "the query has neither SAMLRequest nor SAMLResponse".into(),
                )
            })?;

        let xml = decode_redirect_message(&encoded)?;
        let document = (self.parse_xml)(xml.as_bytes())?;
        read_message(&document)
    }
}
