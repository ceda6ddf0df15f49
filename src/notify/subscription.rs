//! Per-user email subscriptions

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, instrument, trace};

use crate::error::EngineResult;
use crate::models::{AlertEvent, ChannelRoute, EmailFields, NoticeKind, NoticeObject, Subscription};
use crate::senders::{SendParams, SenderRegistry};
use crate::store::ConfigStore;

use super::template::TemplateRenderer;

/// Default cap on concurrent subscription emails
pub const DEFAULT_CONCURRENCY: usize = 10;

pub struct SubscriptionDispatcher {
    store: Arc<dyn ConfigStore>,
    senders: Arc<SenderRegistry>,
    renderer: Arc<dyn TemplateRenderer>,
    permits: Semaphore,
}

impl SubscriptionDispatcher {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        senders: Arc<SenderRegistry>,
        renderer: Arc<dyn TemplateRenderer>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            senders,
            renderer,
            permits: Semaphore::new(concurrency.max(1)),
        }
    }

    /// A subscription matches when it covers the event severity and every
    /// filter occurs in the serialized labels or the annotations
    pub fn matches(subscription: &Subscription, event: &AlertEvent) -> bool {
        if !subscription.severities.contains(&event.severity) {
            return false;
        }

        let labels = event.labels_json();
        subscription
            .filters
            .iter()
            .all(|filter| labels.contains(filter.as_str()) || event.annotations.contains(filter.as_str()))
    }

    /// Send one email per matching subscription
    ///
    /// Returns the number of emails delivered. Failures are logged and never
    /// retried.
    #[instrument(skip_all, fields(tenant = %event.tenant_id, rule_id = %event.rule_id))]
    pub async fn dispatch(&self, event: &AlertEvent) -> EngineResult<usize> {
        let subscriptions = self
            .store
            .subscriptions_for_rule(&event.tenant_id, &event.rule_id)
            .await?;

        let matching: Vec<_> = subscriptions
            .into_iter()
            .filter(|subscription| Self::matches(subscription, event))
            .collect();

        if matching.is_empty() {
            trace!("no matching subscriptions");
            return Ok(0);
        }

        debug!("sending to {} subscription(s)", matching.len());

        let sends = matching
            .iter()
            .map(|subscription| self.send_one(subscription, event));
        let delivered = join_all(sends).await.into_iter().filter(|ok| *ok).count();

        Ok(delivered)
    }

    async fn send_one(&self, subscription: &Subscription, event: &AlertEvent) -> bool {
        let Ok(_permit) = self.permits.acquire().await else {
            return false;
        };

        let route = ChannelRoute {
            kind: NoticeKind::Email,
            template_id: String::new(),
            severities: vec![event.severity],
            hook: String::new(),
            sign: String::new(),
            email: EmailFields::default(),
        };
        let notice = NoticeObject {
            tenant_id: event.tenant_id.clone(),
            id: subscription.id.clone(),
            name: format!("subscription {}", subscription.id),
            duty_id: None,
            routes: Vec::new(),
        };

        let params = SendParams {
            tenant_id: event.tenant_id.clone(),
            event_id: event.fingerprint.clone(),
            rule_name: event.rule_name.clone(),
            severity: event.severity,
            notice_kind: NoticeKind::Email,
            notice_id: subscription.id.clone(),
            notice_name: notice.name.clone(),
            is_recovered: event.is_recovered,
            hook: String::new(),
            email: EmailFields {
                to: vec![subscription.email.clone()],
                cc: Vec::new(),
                subject: String::new(),
            },
            content: self.renderer.render(event, &notice, &route),
            phone_numbers: Vec::new(),
            sign: String::new(),
        };

        match self.senders.send(&params).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    subscription = %subscription.id,
                    "failed to send subscription email to {}: {}", subscription.email, e
                );
                false
            }
        }
    }
}
