use anyhow::Result;
use log::{error, info};
use reqwest::blocking::multipart;
use serde_json::json;
use std::thread;
use std::time::Duration;

use crate::config::constants;
use crate::error::DeliveryError;
use crate::frame_cache::CameraFrame;

/// Body of one webhook post.
#[derive(Debug, Clone, Copy)]
pub struct WebhookPayload<'a> {
    pub content: &'a str,
    /// JPEG bytes sent as a multipart attachment.
    pub attachment: Option<&'a [u8]>,
}

/// Status and body returned by a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

impl WebhookResponse {
    /// Webhooks answer 200 or 204 on success; anything else is a failure.
    pub fn is_delivered(&self) -> bool {
        matches!(self.status, 200 | 204)
    }
}

/// Sends a single payload to a single webhook URL.
pub trait WebhookClient: Send {
    /// Post `payload` to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error only when no HTTP response was received. Non-2xx
    /// responses are returned as [`WebhookResponse`] values.
    fn post(&self, url: &str, payload: &WebhookPayload<'_>) -> Result<WebhookResponse>;
}

/// Blocking reqwest implementation of [`WebhookClient`].
pub struct HttpWebhookClient {
    client: reqwest::blocking::Client,
}

impl HttpWebhookClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl WebhookClient for HttpWebhookClient {
    fn post(&self, url: &str, payload: &WebhookPayload<'_>) -> Result<WebhookResponse> {
        let body = json!({ "content": payload.content });

        let request = match payload.attachment {
            // Multipart form with the JSON payload and the camera frame
            Some(image_data) => {
                let form = multipart::Form::new()
                    .text("payload_json", body.to_string())
                    .part(
                        "files[0]",
                        multipart::Part::bytes(image_data.to_vec())
                            .file_name(constants::ATTACHMENT_NAME)
                            .mime_str("image/jpeg")?,
                    );
                self.client.post(url).multipart(form)
            }
            None => self.client.post(url).json(&body),
        };

        let response = request.send()?;
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();

        Ok(WebhookResponse { status, body })
    }
}

/// Result of delivering one event to one webhook.
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub url: String,
    /// HTTP status on success.
    pub result: Result<u16, DeliveryError>,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Delivers rendered notifications to every configured webhook.
///
/// Webhooks are tried in order, each independently: a failure is logged
/// and the next webhook is still attempted. Nothing is retried.
pub struct AlertService {
    webhook_urls: Vec<String>,
    client: Box<dyn WebhookClient>,
    delay: Duration,
}

impl AlertService {
    /// Create a new AlertService.
    ///
    /// # Arguments
    ///
    /// * `webhook_urls` - Webhooks in delivery order
    /// * `client` - Transport used for each post
    /// * `delay` - Pause between consecutive posts to stay under rate limits
    pub fn new(webhook_urls: Vec<String>, client: Box<dyn WebhookClient>, delay: Duration) -> Self {
        Self {
            webhook_urls,
            client,
            delay,
        }
    }

    pub fn webhook_count(&self) -> usize {
        self.webhook_urls.len()
    }

    /// Post `content` to every webhook, attaching `frame` when it is not empty.
    pub fn deliver(&self, content: &str, frame: &CameraFrame) -> Vec<DeliveryOutcome> {
        let payload = WebhookPayload {
            content,
            attachment: (!frame.is_empty()).then(|| frame.as_bytes()),
        };

        let mut outcomes = Vec::with_capacity(self.webhook_urls.len());
        for (i, url) in self.webhook_urls.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                thread::sleep(self.delay);
            }

            let result = self.send_one(url, &payload);
            match &result {
                Ok(status) => info!("Webhook {} delivered (HTTP {})", i, status),
                Err(e) => error!("Webhook {} failed: {}", i, e),
            }
            outcomes.push(DeliveryOutcome {
                url: url.clone(),
                result,
            });
        }
        outcomes
    }

    fn send_one(&self, url: &str, payload: &WebhookPayload<'_>) -> Result<u16, DeliveryError> {
        let response = self
            .client
            .post(url, payload)
            .map_err(|e| DeliveryError::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.is_delivered() {
            return Err(DeliveryError::Rejected {
                url: url.to_string(),
                status: response.status,
                body: response.body,
            });
        }
        Ok(response.status)
    }
}
