use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;

#[derive(Debug, Clone)]
pub struct OAuthCodeExchangeRequest {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorization_code: String,
}

/// Tokens granted by Google for an authorization code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthTokenResponse {
    pub access_token: String,
    pub id_token: Option<String>,
    pub expires_in: i64,
    pub scope: Option<String>,
}

#[async_trait]
pub trait OAuthHttpClient: Send + Sync {
    async fn exchange_authorization_code(
        &self,
        request: OAuthCodeExchangeRequest,
    ) -> Result<OAuthTokenResponse, InfraError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestOAuthClient {
    client: Client,
}

#[derive(Debug, serde::Deserialize)]
struct GoogleTokenResponsePayload {
    #[serde(default)]
    access_token: String,
    id_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl ReqwestOAuthClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

#[async_trait]
impl OAuthHttpClient for ReqwestOAuthClient {
    async fn exchange_authorization_code(
        &self,
        request: OAuthCodeExchangeRequest,
    ) -> Result<OAuthTokenResponse, InfraError> {
        let params = [
            ("grant_type", "authorization_code".to_string()),
            ("client_id", request.client_id),
            ("client_secret", request.client_secret),
            ("redirect_uri", request.redirect_uri),
            ("code", request.authorization_code),
        ];
        let response = self
            .client
            .post(&request.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|error| InfraError::Auth(format!("token request failed: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Auth(format!("failed reading token response: {error}")))?;
        parse_token_response(status.as_u16(), status.is_success(), &body)
    }
}

fn parse_token_response(
    status_code: u16,
    success: bool,
    body: &str,
) -> Result<OAuthTokenResponse, InfraError> {
    let parsed = serde_json::from_str::<GoogleTokenResponsePayload>(body).map_err(|error| {
        InfraError::Auth(format!("invalid token response payload: {error}; body={body}"))
    })?;

    if !success || parsed.error.is_some() {
        let code = parsed.error.unwrap_or_else(|| format!("http_{status_code}"));
        let detail = parsed.error_description.unwrap_or_else(|| body.to_string());
        return Err(InfraError::Auth(format!("token endpoint error: {code}; {detail}")));
    }
    if parsed.access_token.trim().is_empty() {
        return Err(InfraError::Auth("token response has no access_token".to_string()));
    }

    Ok(OAuthTokenResponse {
        access_token: parsed.access_token,
        id_token: parsed.id_token,
        expires_in: parsed.expires_in.unwrap_or(0).max(0),
        scope: parsed.scope,
    })
}
