use crate::domain::model::{DispatchOutcome, DispatchRequest, DispatchResult};
use crate::domain::ports::{EndpointTarget, OfferPrice, OfferUpdate, PriceUpdatePayload, PricingEndpoint};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
pub const DEFAULT_PACING: Duration = Duration::from_millis(250);
pub const CURRENCY_ID: &str = "RUR";

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    pub max_in_flight: usize,
    /// Delay each item waits after getting a slot and before sending.
    pub pacing: Duration,
    pub dry_run: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            pacing: DEFAULT_PACING,
            dry_run: false,
        }
    }
}

/// Builds the single-offer payload. A discount base that is not an integer is
/// sent as `0`.
pub fn build_payload(request: &DispatchRequest) -> PriceUpdatePayload {
    let discount_base = match request.discount_base.trim().parse::<i64>() {
        Ok(value) => value,
        Err(_) => {
            warn!(
                "⚠️ Discount base '{}' for offer {} is not an integer, sending 0",
                request.discount_base, request.offer_id
            );
            0
        }
    };

    PriceUpdatePayload {
        offers: vec![OfferUpdate {
            offer_id: request.offer_id.clone(),
            price: OfferPrice {
                value: request.new_price,
                currency_id: CURRENCY_ID.to_string(),
                discount_base,
            },
        }],
    }
}

fn log_outcome(offer_id: &str, outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Sent => info!("✅ Price updated for offer {}", offer_id),
        DispatchOutcome::DryRun => {}
        DispatchOutcome::BusinessError(message) => {
            error!("❌ Price update rejected for offer {}: {}", offer_id, message)
        }
        DispatchOutcome::TransportError { status, body } => error!(
            "❌ Pricing endpoint returned {} for offer {}: {}",
            status, offer_id, body
        ),
        DispatchOutcome::NetworkError(message) => {
            error!("❌ Network error for offer {}: {}", offer_id, message)
        }
    }
}

/// Sends accepted price changes one offer per request. Failures stay with
/// their item; nothing is retried within a batch.
pub struct DispatchEngine<P: PricingEndpoint> {
    endpoint: Arc<P>,
    settings: DispatchSettings,
}

impl<P: PricingEndpoint> DispatchEngine<P> {
    pub fn new(endpoint: Arc<P>, settings: DispatchSettings) -> Self {
        Self { endpoint, settings }
    }

    /// Results are returned in the order of `requests`.
    pub async fn dispatch(
        &self,
        requests: &[DispatchRequest],
        target: &EndpointTarget,
    ) -> Vec<DispatchResult> {
        if requests.is_empty() {
            return Vec::new();
        }

        if self.settings.dry_run {
            return requests
                .iter()
                .map(|request| {
                    let payload = build_payload(request);
                    let rendered = serde_json::to_string_pretty(&payload)
                        .unwrap_or_else(|e| format!("<unserializable payload: {}>", e));
                    info!(
                        "🧪 Dry run, not sending update for offer {}:\n{}",
                        request.offer_id, rendered
                    );
                    DispatchResult {
                        offer_id: request.offer_id.clone(),
                        outcome: DispatchOutcome::DryRun,
                    }
                })
                .collect();
        }

        // Scoped to this call: separate batches are not bounded jointly.
        // The JoinSet aborts every unfinished send if this future is dropped.
        let slots = Arc::new(Semaphore::new(self.settings.max_in_flight.max(1)));
        let mut tasks = JoinSet::new();

        for (position, request) in requests.iter().enumerate() {
            let slots = slots.clone();
            let endpoint = self.endpoint.clone();
            let target = target.clone();
            let pacing = self.settings.pacing;
            let payload = build_payload(request);

            tasks.spawn(async move {
                let _permit = match slots.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            position,
                            DispatchOutcome::NetworkError("dispatch slots closed".to_string()),
                        )
                    }
                };
                tokio::time::sleep(pacing).await;
                (position, endpoint.update_price(&target, &payload).await)
            });
        }

        let mut outcomes: Vec<Option<DispatchOutcome>> = vec![None; requests.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, outcome)) => outcomes[position] = Some(outcome),
                Err(e) => error!("Dispatch task failed: {}", e),
            }
        }

        let results: Vec<DispatchResult> = requests
            .iter()
            .zip(outcomes)
            .map(|(request, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    DispatchOutcome::NetworkError("dispatch task failed".to_string())
                });
                log_outcome(&request.offer_id, &outcome);
                DispatchResult {
                    offer_id: request.offer_id.clone(),
                    outcome,
                }
            })
            .collect();

        let sent = results.iter().filter(|r| r.outcome.is_success()).count();
        info!(
            "📤 Dispatched {} price updates: {} ok, {} failed",
            results.len(),
            sent,
            results.len() - sent
        );
        results
    }
}
