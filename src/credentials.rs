use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::util::truncate;

pub const CALENDAR_EVENTS_SCOPE: &str = "https://www.googleapis.com/auth/calendar.events";
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_REDIRECT_URI: &str = "http://localhost";
const CONSENT_STATE: &str = "state-token";
const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(
        "OAuth client secret not found at {}; download an OAuth client (desktop app) JSON from the Google Cloud console",
        .0.display()
    )]
    MissingClientSecret(PathBuf),
    #[error("invalid OAuth client secret {}: {detail}", .path.display())]
    InvalidClientSecret { path: PathBuf, detail: String },
    #[error("credential expired or revoked: {0}")]
    Revoked(String),
    #[error("authorization not completed: {0}")]
    ConsentAborted(String),
    #[error("token endpoint returned HTTP {status}: {message}")]
    TokenEndpoint { status: u16, message: String },
    #[error("token request failed: {0}")]
    Transport(String),
    #[error("invalid token cache {}: {detail}", .path.display())]
    CorruptCache { path: PathBuf, detail: String },
    #[error("failed to {action} {}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Supplies a bearer token for calendar requests.
pub trait TokenSource {
    fn access_token(&self) -> Result<String, CredentialError>;

    /// Forget the cached access token after the API refused it. The next
    /// [`TokenSource::access_token`] call has to obtain a new one.
    fn discard_access_token(&self) -> Result<(), CredentialError> {
        Ok(())
    }
}

/// The cached credential as far as session handling is concerned: something
/// that can be thrown away to force re-authorization.
pub trait CredentialCache {
    /// Delete the cached credential. Succeeds when nothing is cached.
    fn invalidate(&self) -> Result<(), CredentialError>;
}

/// Obtains an authorization code from the user for a consent URL.
pub trait ConsentPrompt {
    fn authorization_code(&self, consent_url: &str) -> Result<String, CredentialError>;
}

/// OAuth client registration as downloaded from the Google Cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<OAuthClientSecret>,
    web: Option<OAuthClientSecret>,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl OAuthClientSecret {
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CredentialError::MissingClientSecret(path.to_path_buf()));
            }
            Err(source) => {
                return Err(CredentialError::Io {
                    action: "read",
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::parse(&raw).map_err(|detail| CredentialError::InvalidClientSecret {
            path: path.to_path_buf(),
            detail,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let file: ClientSecretFile = serde_json::from_str(raw).map_err(|err| err.to_string())?;
        let secret = file
            .installed
            .or(file.web)
            .ok_or_else(|| "expected an \"installed\" or \"web\" client section".to_string())?;
        if secret.client_id.trim().is_empty() || secret.client_secret.trim().is_empty() {
            return Err("client_id and client_secret must not be empty".to_string());
        }
        Ok(secret)
    }

    pub fn redirect_uri(&self) -> &str {
        self.redirect_uris
            .iter()
            .map(|uri| uri.trim())
            .find(|uri| !uri.is_empty())
            .unwrap_or(DEFAULT_REDIRECT_URI)
    }

    /// Consent URL for the authorization-code grant with offline access, so
    /// the token endpoint hands out a refresh token.
    pub fn consent_url(&self, scope: &str) -> Result<String, CredentialError> {
        let url = Url::parse_with_params(
            &self.auth_uri,
            [
                ("access_type", "offline"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri()),
                ("response_type", "code"),
                ("scope", scope),
                ("state", CONSENT_STATE),
            ],
        )
        .map_err(|err| {
            CredentialError::ConsentAborted(format!("invalid auth_uri {}: {err}", self.auth_uri))
        })?;
        Ok(url.to_string())
    }
}

/// Cached OAuth token. Field names match the JSON written by Go's
/// `oauth2.Token`, so existing `token.json` files keep working.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl StoredToken {
    /// Whether the access token can be used as-is at `now`. A missing or
    /// zero-valued expiry never expires.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            None => true,
            Some(expiry) if expiry.year() <= 1 => true,
            Some(expiry) => expiry - ChronoDuration::seconds(EXPIRY_SKEW_SECONDS) > now,
        }
    }

    pub fn usable_refresh_token(&self) -> Option<&str> {
        self.refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

/// `token.json` on disk.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<StoredToken>, CredentialError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CredentialError::Io {
                    action: "read",
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| CredentialError::CorruptCache {
                path: self.path.clone(),
                detail: err.to_string(),
            })
    }

    /// Write through a temp file in the same directory. `tempfile` creates it
    /// owner-only, and the rename keeps those permissions.
    pub fn save(&self, token: &StoredToken) -> Result<(), CredentialError> {
        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(io_err("create directory", parent))?;

        let payload = serde_json::to_string_pretty(token).map_err(|err| {
            CredentialError::CorruptCache {
                path: self.path.clone(),
                detail: err.to_string(),
            }
        })?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".token-")
            .suffix(".json.tmp")
            .tempfile_in(parent)
            .map_err(io_err("create a temp file in", parent))?;
        tmp.write_all(payload.as_bytes())
            .map_err(io_err("write", &self.path))?;
        tmp.persist(&self.path)
            .map_err(|err| io_err("persist", &self.path)(err.error))?;
        debug!(path = %self.path.display(), "saved OAuth token");
        Ok(())
    }

    /// Mark the cached access token as expired so the refresh token is used
    /// next time. Without a refresh token the whole cache goes, which sends
    /// the next request through the consent flow instead of failing as
    /// revoked.
    pub fn expire_access_token(&self) -> Result<(), CredentialError> {
        let Some(mut token) = self.load()? else {
            return Ok(());
        };
        if token.usable_refresh_token().is_none() {
            return self.invalidate();
        }
        token.expiry = Some(Utc::now() - ChronoDuration::hours(1));
        self.save(&token)
    }
}

impl CredentialCache for TokenCache {
    fn invalidate(&self) -> Result<(), CredentialError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "removed cached OAuth token");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CredentialError::Io {
                action: "remove",
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Asks on the terminal: prints the consent URL and reads the code (or the
/// whole redirected URL) from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConsent;

impl ConsentPrompt for TerminalConsent {
    fn authorization_code(&self, consent_url: &str) -> Result<String, CredentialError> {
        println!(
            "Go to the following link in your browser, approve access, then paste the \
             authorization code (or the full address your browser was redirected to) below:\n\n{consent_url}\n"
        );
        print!("Authorization code: ");
        io::stdout()
            .flush()
            .map_err(|err| CredentialError::ConsentAborted(err.to_string()))?;

        let mut line = String::new();
        io::stdin()
            .read_line(&mut line)
            .map_err(|err| CredentialError::ConsentAborted(err.to_string()))?;
        extract_authorization_code(&line)
            .ok_or_else(|| CredentialError::ConsentAborted("no authorization code entered".into()))
    }
}

/// Accepts either a bare code or the redirect URL carrying `?code=...`.
pub fn extract_authorization_code(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(url) = Url::parse(trimmed) {
        return url
            .query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value.into_owned())
            .filter(|code| !code.is_empty());
    }
    Some(trimmed.to_string())
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Google OAuth2 credential provider: cached token, refresh grant, and the
/// interactive authorization-code grant when nothing is cached.
pub struct GoogleCredentialProvider<P = TerminalConsent> {
    secret: OAuthClientSecret,
    cache: TokenCache,
    agent: ureq::Agent,
    prompt: P,
    scope: String,
}

impl<P: ConsentPrompt> GoogleCredentialProvider<P> {
    pub fn new(secret: OAuthClientSecret, cache: TokenCache, agent: ureq::Agent, prompt: P) -> Self {
        Self {
            secret,
            cache,
            agent,
            prompt,
            scope: CALENDAR_EVENTS_SCOPE.to_string(),
        }
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Make sure a usable credential is cached. A credential that can only
    /// fail as revoked is dropped and replaced through the consent flow.
    pub fn ensure_authorized(&self) -> Result<(), CredentialError> {
        match self.access_token() {
            Ok(_) => Ok(()),
            Err(CredentialError::Revoked(detail)) => {
                warn!(%detail, "cached credential is unusable; authorizing again");
                self.cache.invalidate()?;
                self.authorize().map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    /// Run the consent flow and cache the resulting token.
    pub fn authorize(&self) -> Result<StoredToken, CredentialError> {
        let consent_url = self.secret.consent_url(&self.scope)?;
        let code = self.prompt.authorization_code(&consent_url)?;
        let token = self.exchange_code(&code)?;
        println!("Saving credential file to: {}", self.cache.path().display());
        self.cache.save(&token)?;
        Ok(token)
    }

    fn exchange_code(&self, code: &str) -> Result<StoredToken, CredentialError> {
        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.secret.client_id.as_str()),
                ("client_secret", self.secret.client_secret.as_str()),
                ("redirect_uri", self.secret.redirect_uri()),
            ])
            .map_err(|err| match err {
                // A rejected code is a typo, not a revoked credential.
                CredentialError::Revoked(detail) => CredentialError::ConsentAborted(detail),
                other => other,
            })?;
        Ok(stored_token_from(response, None, Utc::now()))
    }

    fn refresh(&self, refresh_token: &str) -> Result<StoredToken, CredentialError> {
        debug!("refreshing OAuth access token");
        let response = self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
        ])?;
        Ok(stored_token_from(response, Some(refresh_token), Utc::now()))
    }

    fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, CredentialError> {
        match self.agent.post(&self.secret.token_uri).send_form(form) {
            Ok(response) => {
                let body = response
                    .into_string()
                    .map_err(|err| CredentialError::Transport(err.to_string()))?;
                serde_json::from_str(&body).map_err(|err| CredentialError::TokenEndpoint {
                    status: 200,
                    message: format!("unreadable token response: {err}"),
                })
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(classify_token_error(status, &body))
            }
            Err(ureq::Error::Transport(err)) => Err(CredentialError::Transport(err.to_string())),
        }
    }
}

impl<P: ConsentPrompt> TokenSource for GoogleCredentialProvider<P> {
    fn access_token(&self) -> Result<String, CredentialError> {
        let Some(token) = self.cache.load()? else {
            return self.authorize().map(|token| token.access_token);
        };
        if token.is_fresh(Utc::now()) {
            return Ok(token.access_token);
        }
        let Some(refresh_token) = token.usable_refresh_token() else {
            return Err(CredentialError::Revoked(
                "access token expired and no refresh token is cached".to_string(),
            ));
        };
        let refreshed = self.refresh(refresh_token)?;
        self.cache.save(&refreshed)?;
        Ok(refreshed.access_token)
    }

    fn discard_access_token(&self) -> Result<(), CredentialError> {
        self.cache.expire_access_token()
    }
}

fn io_err(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> CredentialError {
    let path = path.to_path_buf();
    move |source| CredentialError::Io {
        action,
        path,
        source,
    }
}

fn stored_token_from(
    response: TokenResponse,
    previous_refresh: Option<&str>,
    now: DateTime<Utc>,
) -> StoredToken {
    StoredToken {
        access_token: response.access_token,
        token_type: response.token_type.unwrap_or_else(default_token_type),
        refresh_token: response
            .refresh_token
            .or_else(|| previous_refresh.map(str::to_string)),
        expiry: response
            .expires_in
            .map(|seconds| now + ChronoDuration::seconds(seconds)),
    }
}

fn classify_token_error(status: u16, body: &str) -> CredentialError {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(parsed) => {
            let message = match parsed.error_description {
                Some(description) if !description.trim().is_empty() => {
                    format!("{}: {}", parsed.error, description.trim())
                }
                _ => parsed.error.clone(),
            };
            if parsed.error == "invalid_grant" {
                CredentialError::Revoked(message)
            } else {
                CredentialError::TokenEndpoint { status, message }
            }
        }
        Err(_) => CredentialError::TokenEndpoint {
            status,
            message: truncate(body.trim(), 200),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::TempDir;

    const INSTALLED_SECRET: &str = r#"{"installed":{"client_id":"id-123.apps.googleusercontent.com","project_id":"clical","auth_uri":"https://accounts.google.com/o/oauth2/auth","token_uri":"https://oauth2.googleapis.com/token","client_secret":"shh","redirect_uris":["http://localhost"]}}"#;

    #[test]
    fn parses_installed_client_secret() {
        let secret = OAuthClientSecret::parse(INSTALLED_SECRET).expect("secret");
        assert_eq!(secret.client_id, "id-123.apps.googleusercontent.com");
        assert_eq!(secret.client_secret, "shh");
        assert_eq!(secret.redirect_uri(), "http://localhost");
    }

    #[test]
    fn web_client_secret_gets_default_endpoints() {
        let secret =
            OAuthClientSecret::parse(r#"{"web":{"client_id":"abc","client_secret":"def"}}"#)
                .expect("secret");
        assert_eq!(secret.auth_uri, DEFAULT_AUTH_URI);
        assert_eq!(secret.token_uri, DEFAULT_TOKEN_URI);
        assert_eq!(secret.redirect_uri(), DEFAULT_REDIRECT_URI);
    }

    #[test]
    fn client_secret_without_client_section_is_rejected() {
        let err = OAuthClientSecret::parse(r#"{"other":{}}"#).expect_err("invalid");
        assert!(err.contains("installed"));
    }

    #[test]
    fn missing_client_secret_file_is_reported_with_path() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("credentials.json");
        match OAuthClientSecret::load(&path) {
            Err(CredentialError::MissingClientSecret(reported)) => assert_eq!(reported, path),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn consent_url_requests_offline_access() {
        let secret = OAuthClientSecret::parse(INSTALLED_SECRET).expect("secret");
        let url = Url::parse(&secret.consent_url(CALENDAR_EVENTS_SCOPE).expect("url"))
            .expect("parse");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("access_type".into(), "offline".into())));
        assert!(pairs.contains(&("response_type".into(), "code".into())));
        assert!(pairs.contains(&("scope".into(), CALENDAR_EVENTS_SCOPE.into())));
        assert!(pairs.contains(&("redirect_uri".into(), "http://localhost".into())));
    }

    #[test]
    fn authorization_code_is_taken_from_redirect_url_or_raw_input() {
        assert_eq!(
            extract_authorization_code("http://localhost/?state=state-token&code=4/0Abc&scope=x\n")
                .as_deref(),
            Some("4/0Abc")
        );
        assert_eq!(
            extract_authorization_code("  4/0AbcDef  ").as_deref(),
            Some("4/0AbcDef")
        );
        assert_eq!(extract_authorization_code("http://localhost/?error=access_denied"), None);
        assert_eq!(extract_authorization_code("   \n"), None);
    }

    #[test]
    fn token_cache_round_trip_and_idempotent_invalidate() {
        let tmp = TempDir::new().expect("temp dir");
        let cache = TokenCache::new(tmp.path().join("token.json"));
        assert!(cache.load().expect("load empty").is_none());

        let token = StoredToken {
            access_token: "ya29.access".into(),
            token_type: "Bearer".into(),
            refresh_token: Some("1//refresh".into()),
            expiry: Some(Utc::now() + ChronoDuration::hours(1)),
        };
        cache.save(&token).expect("save");
        assert_eq!(cache.load().expect("load"), Some(token));

        cache.invalidate().expect("invalidate");
        cache.invalidate().expect("invalidate again");
        assert!(!cache.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn token_cache_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().expect("temp dir");
        let cache = TokenCache::new(tmp.path().join("token.json"));
        cache
            .save(&StoredToken {
                access_token: "a".into(),
                token_type: "Bearer".into(),
                refresh_token: None,
                expiry: None,
            })
            .expect("save");
        let mode = fs::metadata(cache.path()).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn reads_go_oauth2_token_json() {
        let token: StoredToken = serde_json::from_str(
            r#"{"access_token":"ya29.a0","token_type":"Bearer","refresh_token":"1//0g","expiry":"2026-03-02T10:27:04.123456-05:00"}"#,
        )
        .expect("token");
        assert_eq!(token.usable_refresh_token(), Some("1//0g"));
        let expiry = token.expiry.expect("expiry");
        assert!(token.is_fresh(expiry - ChronoDuration::minutes(5)));
        assert!(!token.is_fresh(expiry - ChronoDuration::seconds(30)));
    }

    #[test]
    fn zero_expiry_never_goes_stale() {
        let token: StoredToken = serde_json::from_str(
            r#"{"access_token":"a","token_type":"Bearer","expiry":"0001-01-01T00:00:00Z"}"#,
        )
        .expect("token");
        assert!(token.is_fresh(Utc::now()));
        assert_eq!(token.usable_refresh_token(), None);
    }

    #[test]
    fn invalid_grant_is_classified_as_revoked() {
        let err = classify_token_error(
            400,
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        );
        match err {
            CredentialError::Revoked(message) => {
                assert!(message.contains("Token has been expired or revoked"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn other_token_errors_keep_status() {
        match classify_token_error(401, r#"{"error":"invalid_client"}"#) {
            CredentialError::TokenEndpoint { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid_client");
            }
            other => panic!("unexpected error: {other}"),
        }
        match classify_token_error(502, "<html>bad gateway</html>") {
            CredentialError::TokenEndpoint { status, .. } => assert_eq!(status, 502),
            other => panic!("unexpected error: {other}"),
        }
    }

    struct DeclinedConsent {
        asked: Cell<u32>,
    }

    impl ConsentPrompt for DeclinedConsent {
        fn authorization_code(&self, _consent_url: &str) -> Result<String, CredentialError> {
            self.asked.set(self.asked.get() + 1);
            Err(CredentialError::ConsentAborted("no code entered".into()))
        }
    }

    fn provider_with(cache: TokenCache) -> GoogleCredentialProvider<DeclinedConsent> {
        GoogleCredentialProvider::new(
            OAuthClientSecret::parse(INSTALLED_SECRET).expect("secret"),
            cache,
            ureq::AgentBuilder::new().build(),
            DeclinedConsent { asked: Cell::new(0) },
        )
    }

    fn expired_token(refresh_token: Option<&str>) -> StoredToken {
        StoredToken {
            access_token: "ya29.old".into(),
            token_type: "Bearer".into(),
            refresh_token: refresh_token.map(str::to_string),
            expiry: Some(Utc::now() - ChronoDuration::days(30)),
        }
    }

    #[test]
    fn unrefreshable_token_is_dropped_and_consent_requested() {
        let tmp = TempDir::new().expect("temp dir");
        let cache = TokenCache::new(tmp.path().join("token.json"));
        cache.save(&expired_token(None)).expect("save");
        let provider = provider_with(cache);

        assert!(matches!(
            provider.access_token(),
            Err(CredentialError::Revoked(_))
        ));

        let err = provider.ensure_authorized().expect_err("consent declined");
        assert!(matches!(err, CredentialError::ConsentAborted(_)));
        assert_eq!(provider.prompt.asked.get(), 1);
        assert!(!provider.cache().path().exists());

        // With the cache gone the next use asks again instead of failing as revoked.
        assert!(matches!(
            provider.access_token(),
            Err(CredentialError::ConsentAborted(_))
        ));
    }

    #[test]
    fn fresh_token_needs_no_consent() {
        let tmp = TempDir::new().expect("temp dir");
        let cache = TokenCache::new(tmp.path().join("token.json"));
        cache
            .save(&StoredToken {
                expiry: Some(Utc::now() + ChronoDuration::hours(1)),
                ..expired_token(None)
            })
            .expect("save");
        let provider = provider_with(cache);

        provider.ensure_authorized().expect("authorized");
        assert_eq!(provider.prompt.asked.get(), 0);
        assert!(provider.cache().path().exists());
    }

    #[test]
    fn expiring_access_token_keeps_refresh_token() {
        let tmp = TempDir::new().expect("temp dir");
        let cache = TokenCache::new(tmp.path().join("token.json"));
        cache
            .save(&StoredToken {
                expiry: Some(Utc::now() + ChronoDuration::hours(1)),
                ..expired_token(Some("1//keep"))
            })
            .expect("save");

        cache.expire_access_token().expect("expire");

        let token = cache.load().expect("load").expect("still cached");
        assert!(!token.is_fresh(Utc::now()));
        assert_eq!(token.usable_refresh_token(), Some("1//keep"));
    }

    #[test]
    fn expiring_access_token_without_refresh_token_clears_cache() {
        let tmp = TempDir::new().expect("temp dir");
        let cache = TokenCache::new(tmp.path().join("token.json"));
        cache.expire_access_token().expect("nothing cached");

        cache
            .save(&StoredToken {
                expiry: None,
                ..expired_token(None)
            })
            .expect("save");
        cache.expire_access_token().expect("expire");
        assert!(!cache.path().exists());
    }

    #[test]
    fn refresh_keeps_previous_refresh_token_when_none_returned() {
        let now = Utc::now();
        let token = stored_token_from(
            TokenResponse {
                access_token: "new".into(),
                token_type: None,
                expires_in: Some(3599),
                refresh_token: None,
            },
            Some("1//keep"),
            now,
        );
        assert_eq!(token.refresh_token.as_deref(), Some("1//keep"));
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expiry, Some(now + ChronoDuration::seconds(3599)));
    }
}
