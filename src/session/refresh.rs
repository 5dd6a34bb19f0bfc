// Credential refresh call

use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;

use super::types::CredentialPair;
use crate::error::SessionError;
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Performs one refresh call against the credential-issuance service
#[async_trait]
pub trait Refresher: Send + Sync {
    /// `current` is the pair being replaced; its refresh token, if any,
    /// accompanies the call.
    async fn refresh(&self, current: &CredentialPair) -> Result<CredentialPair, SessionError>;
}

/// Decode the body of a successful sign-in or refresh response
///
/// The refresh token travels as a cookie rather than in the body; when the
/// response sets it, it is captured so a later process can refresh too.
pub fn decode_issued_credentials(
    response: &ApiResponse,
    refresh_cookie: &str,
) -> Result<CredentialPair, SessionError> {
    let mut pair: CredentialPair = response
        .json()
        .context("Failed to parse credential issuance response")?;

    if pair.access_token.is_empty() {
        return Err(anyhow::anyhow!("Issuance response does not contain accessToken").into());
    }

    if let Some(token) = response.set_cookie(refresh_cookie) {
        pair.refresh_token = Some(token);
    }

    Ok(pair)
}

/// `POST <refresh-path> {}` with the session cookie
pub struct RefreshEndpoint {
    transport: Arc<dyn Transport>,
    path: String,
    cookie_name: String,
}

impl RefreshEndpoint {
    pub fn new(
        transport: Arc<dyn Transport>,
        path: impl Into<String>,
        cookie_name: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            path: path.into(),
            cookie_name: cookie_name.into(),
        }
    }
}

#[async_trait]
impl Refresher for RefreshEndpoint {
    async fn refresh(&self, current: &CredentialPair) -> Result<CredentialPair, SessionError> {
        tracing::info!("Refreshing access token via {}...", self.path);

        let mut request = ApiRequest::refresh(&self.path);
        if let Some(ref token) = current.refresh_token {
            request = request.cookie(&self.cookie_name, token)?;
        }

        let response = self.transport.send(request).await?;

        if !response.is_success() {
            let err = SessionError::from_response(&response);
            tracing::error!(
                status = response.status.as_u16(),
                body = %response.text(),
                "Token refresh failed"
            );
            return Err(err);
        }

        let pair = decode_issued_credentials(&response, &self.cookie_name)?;
        tracing::info!("Token refreshed");
        Ok(pair)
    }
}
