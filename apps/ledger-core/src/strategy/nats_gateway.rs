//! NATS-backed Order Gateway
//! Request/reply against the exchange gateway's order subjects

use crate::observability::metrics::Metrics;
use crate::strategy::gateway::{GatewayError, OrderGateway, OrderRequest, OrderResponse};

use async_nats::Client;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

pub struct NatsOrderGateway {
    client: Client,
    submit_subject: String,
    cancel_subject: String,
    metrics: Option<Arc<Metrics>>,
}

#[derive(Serialize)]
struct CancelRequest<'a> {
    order_id: &'a str,
}

impl NatsOrderGateway {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            submit_subject: "orders.submit".to_string(),
            cancel_subject: "orders.cancel".to_string(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn request<T: Serialize>(&self, subject: &str, body: &T) -> Result<OrderResponse, GatewayError> {
        let payload = serde_json::to_vec(body)?;
        let reply = self
            .client
            .request(subject.to_string(), payload.into())
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if let Some(ref metrics) = self.metrics {
            metrics.nats_messages_published.with_label_values(&[subject]).inc();
        }

        Ok(serde_json::from_slice(&reply.payload)?)
    }
}

#[async_trait]
impl OrderGateway for NatsOrderGateway {
    async fn submit_order(&self, request: &OrderRequest) -> Result<String, GatewayError> {
        let response = self.request(&self.submit_subject, request).await?;
        match response {
            OrderResponse {
                success: true,
                order_id: Some(id),
                ..
            } => Ok(id),
            OrderResponse { error, .. } => Err(GatewayError::Rejected(
                error.unwrap_or_else(|| "no order id returned".to_string()),
            )),
        }
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        let response = self
            .request(&self.cancel_subject, &CancelRequest { order_id })
            .await?;
        if response.success {
            Ok(())
        } else {
            Err(GatewayError::Rejected(
                response.error.unwrap_or_else(|| "cancel refused".to_string()),
            ))
        }
    }
}
