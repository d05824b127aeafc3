use crate::domain::models::User;
use crate::infrastructure::config::GoogleOAuthSettings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::identity_client::IdentityProvider;
use crate::infrastructure::oauth_client::{OAuthCodeExchangeRequest, OAuthHttpClient};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use url::Url;

const DEFAULT_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const SIGN_IN_SCOPES: [&str; 3] = ["openid", "email", "profile"];
pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub token_endpoint: String,
    pub authorization_endpoint: String,
}

impl OAuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            authorization_endpoint: DEFAULT_AUTHORIZATION_ENDPOINT.to_string(),
        }
    }
}

impl From<GoogleOAuthSettings> for OAuthConfig {
    fn from(settings: GoogleOAuthSettings) -> Self {
        Self::new(settings.client_id, settings.client_secret, settings.redirect_uri)
    }
}

/// Current authentication state as observed by the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub user: Option<User>,
    pub loading: bool,
    #[serde(skip_serializing)]
    pub calendar_access_token: Option<String>,
}

impl AuthState {
    fn initial() -> Self {
        Self {
            user: None,
            loading: true,
            calendar_access_token: None,
        }
    }

    pub fn has_calendar_access(&self) -> bool {
        self.calendar_access_token.is_some()
    }
}

/// Sign-in flows over an [`IdentityProvider`], with Google OAuth for federated
/// sign-in and calendar access. State changes are published on a watch channel.
pub struct AuthSession {
    config: OAuthConfig,
    identity: Arc<dyn IdentityProvider>,
    oauth_client: Arc<dyn OAuthHttpClient>,
    state: watch::Sender<AuthState>,
}

impl AuthSession {
    pub fn new(
        config: OAuthConfig,
        identity: Arc<dyn IdentityProvider>,
        oauth_client: Arc<dyn OAuthHttpClient>,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::initial());
        Self {
            config,
            identity,
            oauth_client,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Ends the initial loading phase when no stored session is restored.
    pub fn mark_ready(&self) {
        self.state.send_if_modified(|state| {
            let changed = state.loading;
            state.loading = false;
            changed
        });
    }

    pub fn google_authorization_url(
        &self,
        state: &str,
        with_calendar_scope: bool,
    ) -> Result<String, InfraError> {
        if state.trim().is_empty() {
            return Err(InfraError::Auth("state must not be empty".to_string()));
        }

        let mut url = Url::parse(&self.config.authorization_endpoint)
            .map_err(|error| InfraError::Auth(format!("invalid authorization endpoint: {error}")))?;
        let mut scopes: Vec<&str> = SIGN_IN_SCOPES.to_vec();
        if with_calendar_scope {
            scopes.push(CALENDAR_SCOPE);
        }

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("scope", &scopes.join(" "));
            if with_calendar_scope {
                query.append_pair("prompt", "consent");
            }
            query.append_pair("state", state);
        }

        Ok(url.to_string())
    }

    /// Exchanges the authorization code and signs in with the resulting Google tokens.
    /// The Google access token becomes the calendar token.
    pub async fn complete_google_sign_in(&self, authorization_code: &str) -> Result<User, InfraError> {
        if authorization_code.trim().is_empty() {
            return Err(InfraError::Auth("authorization code must not be empty".to_string()));
        }

        let tokens = self
            .oauth_client
            .exchange_authorization_code(OAuthCodeExchangeRequest {
                token_endpoint: self.config.token_endpoint.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                redirect_uri: self.config.redirect_uri.clone(),
                authorization_code: authorization_code.trim().to_string(),
            })
            .await?;

        let user = self
            .identity
            .sign_in_with_google(&tokens.access_token, tokens.id_token.as_deref())
            .await?;
        self.publish_signed_in(user.clone(), Some(tokens.access_token));
        Ok(user)
    }

    pub async fn sign_in_email(&self, email: &str, password: &str) -> Result<User, InfraError> {
        let user = self.identity.sign_in_with_email(email, password).await?;
        self.publish_signed_in(user.clone(), None);
        Ok(user)
    }

    pub async fn sign_up_email(&self, email: &str, password: &str) -> Result<User, InfraError> {
        let user = self.identity.sign_up_with_email(email, password).await?;
        self.publish_signed_in(user.clone(), None);
        Ok(user)
    }

    pub async fn sign_in_guest(&self) -> Result<User, InfraError> {
        let user = self.identity.sign_in_anonymously().await?;
        self.publish_signed_in(user.clone(), None);
        Ok(user)
    }

    pub async fn sign_out(&self) -> Result<(), InfraError> {
        self.identity.sign_out().await?;
        self.state.send_replace(AuthState::default());
        log::info!("signed out");
        Ok(())
    }

    fn publish_signed_in(&self, user: User, calendar_access_token: Option<String>) {
        log::info!("signed in as {} (anonymous: {})", user.uid, user.is_anonymous);
        self.state.send_replace(AuthState {
            user: Some(user),
            loading: false,
            calendar_access_token,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::oauth_client::OAuthTokenResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeIdentity {
        google_tokens: Mutex<Vec<(String, Option<String>)>>,
        sign_out_calls: AtomicUsize,
        reject_email: bool,
    }

    fn user(uid: &str, is_anonymous: bool) -> User {
        User {
            uid: uid.to_string(),
            email: None,
            display_name: None,
            is_anonymous,
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeIdentity {
        async fn sign_in_with_email(&self, email: &str, _password: &str) -> Result<User, InfraError> {
            if self.reject_email {
                return Err(InfraError::Auth("INVALID_PASSWORD".to_string()));
            }
            Ok(User {
                email: Some(email.to_string()),
                ..user("email-user", false)
            })
        }

        async fn sign_up_with_email(&self, email: &str, _password: &str) -> Result<User, InfraError> {
            Ok(User {
                email: Some(email.to_string()),
                ..user("new-user", false)
            })
        }

        async fn sign_in_anonymously(&self) -> Result<User, InfraError> {
            Ok(user("guest", true))
        }

        async fn sign_in_with_google(
            &self,
            access_token: &str,
            id_token: Option<&str>,
        ) -> Result<User, InfraError> {
            self.google_tokens
                .lock()
                .expect("tokens lock")
                .push((access_token.to_string(), id_token.map(ToOwned::to_owned)));
            Ok(user("google-user", false))
        }

        async fn sign_out(&self) -> Result<(), InfraError> {
            self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeOAuthHttpClient {
        requests: Mutex<Vec<OAuthCodeExchangeRequest>>,
    }

    #[async_trait]
    impl OAuthHttpClient for FakeOAuthHttpClient {
        async fn exchange_authorization_code(
            &self,
            request: OAuthCodeExchangeRequest,
        ) -> Result<OAuthTokenResponse, InfraError> {
            self.requests.lock().expect("requests lock").push(request);
            Ok(OAuthTokenResponse {
                access_token: "ya29.calendar".to_string(),
                id_token: Some("eyJ.id".to_string()),
                expires_in: 3600,
                scope: Some(CALENDAR_SCOPE.to_string()),
            })
        }
    }

    fn session_with(identity: FakeIdentity) -> (AuthSession, Arc<FakeIdentity>, Arc<FakeOAuthHttpClient>) {
        let identity = Arc::new(identity);
        let oauth = Arc::new(FakeOAuthHttpClient::default());
        let session = AuthSession::new(
            OAuthConfig::new("client-id", "client-secret", "http://127.0.0.1:8080/oauth2/callback"),
            identity.clone(),
            oauth.clone(),
        );
        (session, identity, oauth)
    }

    #[test]
    fn state_starts_loading_until_marked_ready() {
        let (session, _, _) = session_with(FakeIdentity::default());
        let receiver = session.subscribe();
        assert!(receiver.borrow().loading);
        session.mark_ready();
        assert!(!receiver.borrow().loading);
        assert!(receiver.borrow().user.is_none());
    }

    #[test]
    fn calendar_scope_adds_scope_and_forces_consent() {
        let (session, _, _) = session_with(FakeIdentity::default());

        let plain = session.google_authorization_url("xyz", false).expect("url");
        assert!(!plain.contains("prompt=consent"));
        assert!(!plain.contains("auth%2Fcalendar"));

        let with_calendar = session.google_authorization_url("xyz", true).expect("url");
        let parsed = Url::parse(&with_calendar).expect("valid url");
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("prompt".to_string(), "consent".to_string())));
        assert!(pairs.contains(&("state".to_string(), "xyz".to_string())));
        let scope = pairs
            .iter()
            .find(|(key, _)| key == "scope")
            .map(|(_, value)| value.clone())
            .expect("scope");
        assert!(scope.split(' ').any(|value| value == CALENDAR_SCOPE));
    }

    #[test]
    fn empty_state_is_rejected() {
        let (session, _, _) = session_with(FakeIdentity::default());
        assert!(matches!(
            session.google_authorization_url(" ", true),
            Err(InfraError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn google_sign_in_stores_calendar_token_and_sign_out_clears_it() {
        let (session, identity, oauth) = session_with(FakeIdentity::default());
        let receiver = session.subscribe();

        let user = session.complete_google_sign_in(" code-1 ").await.expect("sign in");
        assert_eq!(user.uid, "google-user");
        assert_eq!(oauth.requests.lock().expect("requests lock")[0].authorization_code, "code-1");
        assert_eq!(
            identity.google_tokens.lock().expect("tokens lock")[0],
            ("ya29.calendar".to_string(), Some("eyJ.id".to_string()))
        );
        {
            let state = receiver.borrow();
            assert!(!state.loading);
            assert_eq!(state.calendar_access_token.as_deref(), Some("ya29.calendar"));
        }

        session.sign_out().await.expect("sign out");
        assert_eq!(identity.sign_out_calls.load(Ordering::SeqCst), 1);
        let state = session.current();
        assert!(state.user.is_none());
        assert!(!state.has_calendar_access());
    }

    #[tokio::test]
    async fn guest_and_email_flows_publish_user() {
        let (session, _, _) = session_with(FakeIdentity::default());
        let guest = session.sign_in_guest().await.expect("guest");
        assert!(guest.is_anonymous);
        assert_eq!(session.current().user, Some(guest));

        let created = session.sign_up_email("a@b.c", "pw").await.expect("sign up");
        assert_eq!(created.email.as_deref(), Some("a@b.c"));
        assert_eq!(session.current().user.map(|user| user.uid), Some("new-user".to_string()));
    }

    #[tokio::test]
    async fn failed_sign_in_propagates_and_keeps_state() {
        let (session, _, _) = session_with(FakeIdentity {
            reject_email: true,
            ..FakeIdentity::default()
        });
        let result = session.sign_in_email("a@b.c", "wrong").await;
        assert!(matches!(result, Err(InfraError::Auth(message)) if message == "INVALID_PASSWORD"));
        assert!(session.current().loading);
    }

    #[tokio::test]
    async fn blank_authorization_code_is_rejected_before_exchange() {
        let (session, _, oauth) = session_with(FakeIdentity::default());
        assert!(session.complete_google_sign_in("  ").await.is_err());
        assert!(oauth.requests.lock().expect("requests lock").is_empty());
    }
}
