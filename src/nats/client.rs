use anyhow::{anyhow, Context, Result};
use async_nats::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use super::messages::ServiceReply;

/// Request/reply client shared by all collaborator adapters
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    request_timeout: Duration,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(url: &str, request_timeout: Duration) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self {
            client,
            request_timeout,
        })
    }

    /// Send a JSON request on `subject` and decode the JSON reply.
    ///
    /// A `{"error": ..}` reply is turned into an error.
    pub async fn request_json<Req, Resp>(&self, subject: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request)?;
        debug!("Request to {} ({} bytes)", subject, payload.len());

        let message = tokio::time::timeout(
            self.request_timeout,
            self.client.request(subject.to_string(), payload.into()),
        )
        .await
        .map_err(|_| anyhow!("Request to {} timed out after {:?}", subject, self.request_timeout))?
        .with_context(|| format!("Request to {} failed", subject))?;

        let reply: ServiceReply<Resp> = serde_json::from_slice(&message.payload)
            .with_context(|| format!("Malformed reply from {}", subject))?;

        reply
            .into_result()
            .map_err(|error| anyhow!("{} replied with error: {}", subject, error))
    }
}
