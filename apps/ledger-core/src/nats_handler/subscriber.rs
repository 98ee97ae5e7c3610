//! NATS Message Handler
//! Feeds exchange events to the dispatcher and answers ledger/TCA queries

use crate::engine::dispatcher::EventDispatcher;
use crate::engine::ledger::LedgerNotification;
use crate::events::ExchangeEvent;
use crate::observability::metrics::Metrics;
use crate::shutdown::Shutdown;

use async_nats::Client;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

pub const LEDGER_QUERY_SUBJECT: &str = "ledger.query";
pub const TCA_REPORT_SUBJECT: &str = "tca.report";
pub const LEDGER_UPDATES_SUBJECT: &str = "ledger.updates";

#[derive(Serialize)]
struct QueryResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub struct NatsSubscriber {
    client: Client,
    events_subject: String,
    dispatcher: Arc<EventDispatcher>,
    metrics: Arc<Metrics>,
}

impl NatsSubscriber {
    pub fn new(
        client: Client,
        events_subject: String,
        dispatcher: Arc<EventDispatcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client,
            events_subject,
            dispatcher,
            metrics,
        }
    }

    /// Consume events one at a time until shutdown. Each event is fully
    /// applied before the next is read.
    pub async fn run(&self, mut shutdown: Shutdown) -> anyhow::Result<()> {
        let mut event_sub = self.client.subscribe(self.events_subject.clone()).await?;
        let mut ledger_sub = self.client.subscribe(LEDGER_QUERY_SUBJECT.to_string()).await?;
        let mut tca_sub = self.client.subscribe(TCA_REPORT_SUBJECT.to_string()).await?;

        tracing::info!(subject = %self.events_subject, "NATS subscriber running");

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    tracing::info!("NATS subscriber stopping");
                    break;
                }
                Some(msg) = event_sub.next() => {
                    self.handle_event(msg).await;
                }
                Some(msg) = ledger_sub.next() => {
                    self.handle_ledger_query(msg).await;
                }
                Some(msg) = tca_sub.next() => {
                    self.handle_tca_query(msg).await;
                }
                else => {
                    tracing::warn!("All NATS subscriptions closed");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Forward ledger notifications to `ledger.updates` until the channel closes.
    pub async fn publish_notifications(
        client: Client,
        mut rx: broadcast::Receiver<LedgerNotification>,
        metrics: Arc<Metrics>,
    ) {
        loop {
            let notification = match rx.recv().await {
                Ok(n) => n,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "Ledger notification publisher lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let payload = match serde_json::to_vec(&notification) {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode ledger notification");
                    continue;
                }
            };

            match client.publish(LEDGER_UPDATES_SUBJECT.to_string(), payload.into()).await {
                Ok(()) => metrics
                    .nats_messages_published
                    .with_label_values(&[LEDGER_UPDATES_SUBJECT])
                    .inc(),
                Err(e) => tracing::warn!(error = %e, "Failed to publish ledger notification"),
            }
        }
    }

    // =====================================================
    // EXCHANGE EVENTS
    // =====================================================

    async fn handle_event(&self, msg: async_nats::Message) {
        self.metrics
            .nats_messages_received
            .with_label_values(&[self.events_subject.as_str()])
            .inc();

        let event: ExchangeEvent = match serde_json::from_slice(&msg.payload) {
            Ok(e) => e,
            Err(e) => {
                tracing::error!(error = %e, "Invalid exchange event");
                return;
            }
        };

        self.dispatcher.dispatch(event).await;
    }

    // =====================================================
    // QUERIES
    // =====================================================

    async fn handle_ledger_query(&self, msg: async_nats::Message) {
        self.metrics
            .nats_messages_received
            .with_label_values(&[LEDGER_QUERY_SUBJECT])
            .inc();

        let snapshot = self.dispatcher.ledger().snapshot().await;
        self.reply(
            msg,
            QueryResponse {
                success: true,
                data: Some(snapshot),
                error: None,
            },
        )
        .await;
    }

    async fn handle_tca_query(&self, msg: async_nats::Message) {
        self.metrics
            .nats_messages_received
            .with_label_values(&[TCA_REPORT_SUBJECT])
            .inc();

        let tca = self.dispatcher.tca();
        let report = match tca.last_report().await {
            Some(report) => report,
            None => tca.analyze().await,
        };
        self.reply(
            msg,
            QueryResponse {
                success: true,
                data: Some(report),
                error: None,
            },
        )
        .await;
    }

    async fn reply<T: Serialize>(&self, msg: async_nats::Message, response: QueryResponse<T>) {
        let Some(reply) = msg.reply else {
            return;
        };
        let payload = match serde_json::to_vec(&response) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode reply");
                return;
            }
        };
        if let Err(e) = self.client.publish(reply, payload.into()).await {
            tracing::warn!(error = %e, "Failed to publish reply");
        }
    }
}
