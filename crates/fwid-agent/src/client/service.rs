//! Identity service transport

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;

use fwid_core::config::AgentConfig;
use fwid_core::error::SessionError;

use super::negotiate::Negotiator;
use super::SessionCredentials;

/// Authenticated calls to the identity service
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Log in, returning the response body
    async fn login(&self, credentials: &SessionCredentials) -> Result<String, SessionError>;

    /// Log out
    async fn logout(&self, credentials: &SessionCredentials) -> Result<(), SessionError>;
}

/// HTTPS identity service using `Authorization: Negotiate`
pub struct HttpSessionService {
    http: reqwest::Client,
    service_url: String,
    realm: String,
    negotiator: Arc<dyn Negotiator>,
}

impl HttpSessionService {
    /// Create a service client for `config.service_url`
    pub fn new(config: &AgentConfig, negotiator: Arc<dyn Negotiator>) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .build()
            .map_err(|e| SessionError::Communication(format!("could not create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            service_url: config.service_url.trim_end_matches('/').to_string(),
            realm: config.realm.clone(),
            negotiator,
        })
    }

    async fn request(
        &self,
        api: &str,
        credentials: &SessionCredentials,
    ) -> Result<String, SessionError> {
        if credentials.ccache.tgt(&self.realm).is_none() {
            return Err(SessionError::AuthMaterialMissing(format!(
                "no ticket-granting ticket for realm {}",
                self.realm
            )));
        }

        let url = format!("{}{}", self.service_url, api);
        let host = reqwest::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| SessionError::Token(format!("invalid service url {}", url)))?;

        let token = self
            .negotiator
            .token(&format!("HTTP@{}", host), credentials)
            .await?;

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("Negotiate {}", token))
            .send()
            .await
            .map_err(|e| SessionError::Communication(format!("{} request failed: {}", api, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::Backend(format!("could not read {} response: {}", api, e)))?;

        if status != StatusCode::OK {
            return Err(SessionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl SessionService for HttpSessionService {
    async fn login(&self, credentials: &SessionCredentials) -> Result<String, SessionError> {
        self.request("/login", credentials).await
    }

    async fn logout(&self, credentials: &SessionCredentials) -> Result<(), SessionError> {
        self.request("/logout", credentials).await.map(|_| ())
    }
}
