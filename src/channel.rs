use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{PermanentError, SendFailure, TransientError};
use crate::types::ChannelKind;

#[cfg(not(feature = "http"))]
use std::time::Duration;
#[cfg(not(feature = "http"))]
use tokio::time::sleep;

/// One resolved send, handed to an adapter.
///
/// The destination has already been resolved (explicit override or derived
/// from the recipient record) by the time an adapter sees it.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub destination: String,
    pub subject: String,
    pub body: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Uniform capability of a delivery channel.
///
/// Adapters own channel-specific formatting and transport errors and report
/// a single binary outcome upward, classified transient or permanent. They
/// must not retry internally beyond a single attempt; retry scheduling
/// belongs to the dispatcher.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn kind(&self) -> ChannelKind;
    async fn send(&self, request: &SendRequest) -> Result<(), SendFailure>;
}

#[cfg(feature = "http")]
fn classify_response(status: reqwest::StatusCode) -> Result<(), SendFailure> {
    if status.is_success() {
        Ok(())
    } else if status.is_client_error() {
        Err(SendFailure::Permanent(PermanentError::Rejected))
    } else {
        Err(SendFailure::Transient(TransientError::RemoteError))
    }
}

#[cfg(feature = "http")]
fn classify_transport(err: reqwest::Error) -> SendFailure {
    if err.is_timeout() {
        SendFailure::Transient(TransientError::Timeout)
    } else {
        SendFailure::Transient(TransientError::Network)
    }
}

/// Email delivery via an HTTP mail API.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: String,
    pub from_address: String,
}

impl EmailConfig {
    pub fn new(api_url: impl Into<String>, from_address: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            from_address: from_address.into(),
        }
    }
}

pub struct EmailAdapter {
    config: EmailConfig,
    #[cfg(feature = "http")]
    client: reqwest::Client,
}

impl EmailAdapter {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "http")]
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, request: &SendRequest) -> Result<(), SendFailure> {
        if !request.destination.contains('@') {
            return Err(SendFailure::Permanent(PermanentError::InvalidDestination));
        }

        #[cfg(feature = "http")]
        {
            let payload = serde_json::json!({
                "from": self.config.from_address,
                "to": request.destination,
                "subject": request.subject,
                "body": request.body,
            });

            let response = self
                .client
                .post(&self.config.api_url)
                .json(&payload)
                .send()
                .await;

            match response {
                Ok(resp) => classify_response(resp.status()),
                Err(err) => Err(classify_transport(err)),
            }
        }

        #[cfg(not(feature = "http"))]
        {
            let _ = &self.config;
            sleep(Duration::from_millis(10)).await;
            Ok(())
        }
    }
}

/// SMS delivery through an HTTP gateway with basic auth.
#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub api_url: String,
    pub username: String,
    pub password: String,
    pub source_name: String,
}

impl SmsConfig {
    pub fn new(
        api_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            username: username.into(),
            password: password.into(),
            source_name: "NOTIFY".to_string(),
        }
    }

    pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = source_name.into();
        self
    }
}

pub struct SmsAdapter {
    config: SmsConfig,
    #[cfg(feature = "http")]
    client: reqwest::Client,
}

impl SmsAdapter {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "http")]
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(&self, request: &SendRequest) -> Result<(), SendFailure> {
        if request.destination.is_empty() {
            return Err(SendFailure::Permanent(PermanentError::InvalidDestination));
        }

        #[cfg(feature = "http")]
        {
            let payload = serde_json::json!({
                "source_addr": self.config.source_name,
                "encoding": 0,
                "message": request.body,
                "recipients": [{ "recipient_id": 1, "dest_addr": request.destination }],
            });

            let response = self
                .client
                .post(&self.config.api_url)
                .basic_auth(&self.config.username, Some(&self.config.password))
                .json(&payload)
                .send()
                .await;

            match response {
                Ok(resp) => classify_response(resp.status()),
                Err(err) => Err(classify_transport(err)),
            }
        }

        #[cfg(not(feature = "http"))]
        {
            let _ = &self.config;
            sleep(Duration::from_millis(10)).await;
            Ok(())
        }
    }
}

/// Push delivery through an HTTP push gateway (FCM-style).
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub gateway_url: String,
    pub api_key: String,
}

impl PushConfig {
    pub fn new(gateway_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            api_key: api_key.into(),
        }
    }
}

pub struct PushAdapter {
    config: PushConfig,
    #[cfg(feature = "http")]
    client: reqwest::Client,
}

impl PushAdapter {
    pub fn new(config: PushConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "http")]
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for PushAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Push
    }

    async fn send(&self, request: &SendRequest) -> Result<(), SendFailure> {
        if request.destination.is_empty() {
            return Err(SendFailure::Permanent(PermanentError::InvalidDestination));
        }

        #[cfg(feature = "http")]
        {
            let payload = serde_json::json!({
                "token": request.destination,
                "title": request.subject,
                "body": request.body,
                "data": request.metadata,
            });

            let response = self
                .client
                .post(&self.config.gateway_url)
                .bearer_auth(&self.config.api_key)
                .json(&payload)
                .send()
                .await;

            match response {
                Ok(resp) => classify_response(resp.status()),
                Err(err) => Err(classify_transport(err)),
            }
        }

        #[cfg(not(feature = "http"))]
        {
            let _ = &self.config;
            sleep(Duration::from_millis(10)).await;
            Ok(())
        }
    }
}
