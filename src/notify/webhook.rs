// Webhook Notifier - JSON POST of emitted signals
// Per-message timeout; on timeout or error the send is dropped

use futures::future::BoxFuture;
use reqwest::Client;
use std::time::Duration;

use crate::core::types::Signal;
use crate::notify::{NotifyError, SignalNotifier};

pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, send_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(send_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

impl SignalNotifier for WebhookNotifier {
    fn publish_signal<'a>(&'a self, signal: &'a Signal) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            let response = self.client.post(&self.url).json(signal).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(NotifyError::Status(status.as_u16()));
            }
            Ok(())
        })
    }
}
