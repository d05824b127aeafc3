use crate::domain::models::User;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use url::Url;

const DEFAULT_IDENTITY_API_BASE: &str = "https://identitytoolkit.googleapis.com/v1/";
const GOOGLE_PROVIDER_ID: &str = "google.com";
const IDP_REQUEST_URI: &str = "http://localhost";

/// Identity backend resolving credentials to a [`User`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<User, InfraError>;
    async fn sign_up_with_email(&self, email: &str, password: &str) -> Result<User, InfraError>;
    async fn sign_in_anonymously(&self) -> Result<User, InfraError>;
    /// Federated sign-in with tokens obtained from Google's OAuth flow.
    async fn sign_in_with_google(
        &self,
        access_token: &str,
        id_token: Option<&str>,
    ) -> Result<User, InfraError>;
    async fn sign_out(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnonymousRequest {
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdpRequest {
    post_body: String,
    request_uri: &'static str,
    return_secure_token: bool,
    return_idp_credential: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountPayload {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: String,
}

/// Firebase Identity Toolkit REST client.
pub struct FirebaseIdentityClient {
    client: Client,
    api_base: String,
    api_key: String,
    id_token: Mutex<Option<String>>,
}

impl FirebaseIdentityClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: DEFAULT_IDENTITY_API_BASE.to_string(),
            api_key: api_key.into(),
            id_token: Mutex::new(None),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn has_session(&self) -> bool {
        self.id_token
            .lock()
            .map(|token| token.is_some())
            .unwrap_or(false)
    }

    fn endpoint(&self, method: &str) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|error| InfraError::Auth(format!("invalid identity api base: {error}")))?;
        url.path_segments_mut()
            .map_err(|_| InfraError::Auth("identity api base cannot be a base url".to_string()))?
            .pop_if_empty()
            .push(&format!("accounts:{method}"));
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    async fn post_account<B: Serialize + Sync>(
        &self,
        method: &str,
        body: &B,
        is_anonymous: bool,
    ) -> Result<User, InfraError> {
        if self.api_key.trim().is_empty() {
            return Err(InfraError::Auth("identity api key must not be empty".to_string()));
        }
        let url = self.endpoint(method)?;
        log::debug!("identity request accounts:{method}");

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|error| InfraError::Auth(format!("identity request failed: {error}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Auth(format!("failed reading identity response: {error}")))?;

        let account = parse_account_response(status.as_u16(), status.is_success(), &body)?;
        let user = User {
            uid: account.local_id,
            email: account.email.filter(|value| !value.is_empty()),
            display_name: account.display_name.filter(|value| !value.is_empty()),
            is_anonymous,
        };
        let mut session = self
            .id_token
            .lock()
            .map_err(|error| InfraError::Auth(format!("identity session lock poisoned: {error}")))?;
        *session = account.id_token;
        Ok(user)
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentityClient {
    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<User, InfraError> {
        validate_credentials(email, password)?;
        let request = PasswordRequest {
            email: email.trim(),
            password,
            return_secure_token: true,
        };
        self.post_account("signInWithPassword", &request, false).await
    }

    async fn sign_up_with_email(&self, email: &str, password: &str) -> Result<User, InfraError> {
        validate_credentials(email, password)?;
        let request = PasswordRequest {
            email: email.trim(),
            password,
            return_secure_token: true,
        };
        self.post_account("signUp", &request, false).await
    }

    async fn sign_in_anonymously(&self) -> Result<User, InfraError> {
        let request = AnonymousRequest {
            return_secure_token: true,
        };
        self.post_account("signUp", &request, true).await
    }

    async fn sign_in_with_google(
        &self,
        access_token: &str,
        id_token: Option<&str>,
    ) -> Result<User, InfraError> {
        if access_token.trim().is_empty() {
            return Err(InfraError::Auth("google access token must not be empty".to_string()));
        }
        let request = IdpRequest {
            post_body: google_post_body(access_token, id_token),
            request_uri: IDP_REQUEST_URI,
            return_secure_token: true,
            return_idp_credential: true,
        };
        self.post_account("signInWithIdp", &request, false).await
    }

    async fn sign_out(&self) -> Result<(), InfraError> {
        let mut session = self
            .id_token
            .lock()
            .map_err(|error| InfraError::Auth(format!("identity session lock poisoned: {error}")))?;
        *session = None;
        Ok(())
    }
}

fn validate_credentials(email: &str, password: &str) -> Result<(), InfraError> {
    if email.trim().is_empty() {
        return Err(InfraError::Auth("email must not be empty".to_string()));
    }
    if password.is_empty() {
        return Err(InfraError::Auth("password must not be empty".to_string()));
    }
    Ok(())
}

fn google_post_body(access_token: &str, id_token: Option<&str>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    serializer.append_pair("access_token", access_token.trim());
    if let Some(id_token) = id_token.map(str::trim).filter(|value| !value.is_empty()) {
        serializer.append_pair("id_token", id_token);
    }
    serializer.append_pair("providerId", GOOGLE_PROVIDER_ID);
    serializer.finish()
}

fn parse_account_response(
    status_code: u16,
    success: bool,
    body: &str,
) -> Result<AccountPayload, InfraError> {
    if !success {
        let message = serde_json::from_str::<ErrorEnvelope>(body)
            .map(|envelope| envelope.error.message)
            .unwrap_or_else(|_| format!("http {status_code}"));
        return Err(InfraError::Auth(message));
    }
    serde_json::from_str::<AccountPayload>(body)
        .map_err(|error| InfraError::Auth(format!("invalid identity response payload: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_carries_method_and_api_key() {
        let client = FirebaseIdentityClient::new("key-123");
        let url = client.endpoint("signInWithPassword").expect("endpoint");
        assert_eq!(
            url.as_str(),
            "https://identitytoolkit.googleapis.com/v1/accounts:signInWithPassword?key=key-123"
        );
    }

    #[test]
    fn google_post_body_includes_optional_id_token() {
        assert_eq!(
            google_post_body("ya29", None),
            "access_token=ya29&providerId=google.com"
        );
        assert_eq!(
            google_post_body("ya29", Some("eyJ.a")),
            "access_token=ya29&id_token=eyJ.a&providerId=google.com"
        );
    }

    #[test]
    fn error_envelope_message_is_surfaced() {
        let body = r#"{"error":{"code":400,"message":"EMAIL_NOT_FOUND","errors":[]}}"#;
        match parse_account_response(400, false, body) {
            Err(InfraError::Auth(message)) => assert_eq!(message, "EMAIL_NOT_FOUND"),
            other => panic!("expected auth error, got {other:?}"),
        }
        match parse_account_response(503, false, "unavailable") {
            Err(InfraError::Auth(message)) => assert_eq!(message, "http 503"),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn account_payload_parses_optional_fields() {
        let body = r#"{"localId":"uid-1","idToken":"tok","kind":"identitytoolkit#SignupNewUserResponse"}"#;
        let account = parse_account_response(200, true, body).expect("account");
        assert_eq!(account.local_id, "uid-1");
        assert!(account.email.is_none());
        assert_eq!(account.id_token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn empty_credentials_are_rejected_without_network() {
        let client = FirebaseIdentityClient::new("key");
        assert!(matches!(
            client.sign_in_with_email(" ", "pw").await,
            Err(InfraError::Auth(_))
        ));
        assert!(matches!(
            client.sign_up_with_email("a@b.c", "").await,
            Err(InfraError::Auth(_))
        ));
        assert!(matches!(
            client.sign_in_with_google("", None).await,
            Err(InfraError::Auth(_))
        ));
        client.sign_out().await.expect("sign out");
        assert!(!client.has_session());
    }
}
