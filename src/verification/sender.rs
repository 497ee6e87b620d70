//! SMS notification delivery
//!
//! The verification service only depends on the [`NotificationSender`] trait;
//! the production implementation posts to the Twilio Messages API.

use async_trait::async_trait;
use tracing::{debug, error};

use crate::config::{TwilioConfig, OUTBOUND_HTTP_TIMEOUT};
use crate::error::HttpError;

/// Delivers a notification to a phone number.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Send `content` as an SMS to `to` (an E.164 number)
    async fn send_sms(&self, to: &str, content: &str) -> Result<(), HttpError>;
}

/// Twilio-backed sender.
pub struct TwilioSender {
    client: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioSender {
    /// Create a sender from Twilio credentials
    pub fn new(config: TwilioConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(OUTBOUND_HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.effective_base_url(),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl NotificationSender for TwilioSender {
    async fn send_sms(&self, to: &str, content: &str) -> Result<(), HttpError> {
        debug!(to = %to, "sending verification SMS");

        let params = [
            ("To", to),
            ("From", self.config.from_number.as_str()),
            ("Body", content),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| HttpError::internal(format!("sms delivery failed: {}", e), ""))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "sms provider rejected the message");
            return Err(HttpError::internal(
                format!("sms provider responded with status {}", status),
                "",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_url() {
        let sender = TwilioSender::new(TwilioConfig {
            account_sid: "AC123".to_string(),
            auth_token: "secret".to_string(),
            from_number: "+15550001111".to_string(),
            base_url: String::new(),
        });
        assert_eq!(
            sender.messages_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[tokio::test]
    async fn test_send_sms_against_local_server() {
        use axum::routing::post;
        use axum::Router;

        // a stand-in Twilio endpoint on an ephemeral port
        let app = Router::new().route(
            "/2010-04-01/Accounts/{sid}/Messages.json",
            post(|body: String| async move {
                assert!(body.contains("To=%2B12268213044"));
                assert!(body.contains("Body="));
                axum::http::StatusCode::NO_CONTENT
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let sender = TwilioSender::new(TwilioConfig {
            account_sid: "AC123".to_string(),
            auth_token: "secret".to_string(),
            from_number: "+15550001111".to_string(),
            base_url: format!("http://{}", addr),
        });

        sender
            .send_sms("+12268213044", "Your verification code is 999888")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_sms_provider_error() {
        use axum::routing::post;
        use axum::Router;

        let app = Router::new().route(
            "/2010-04-01/Accounts/{sid}/Messages.json",
            post(|| async { axum::http::StatusCode::UNAUTHORIZED }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let sender = TwilioSender::new(TwilioConfig {
            account_sid: "AC123".to_string(),
            auth_token: "bad".to_string(),
            from_number: "+15550001111".to_string(),
            base_url: format!("http://{}", addr),
        });

        let err = sender.send_sms("+12268213044", "code").await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
