use crate::domain::model::DispatchOutcome;
use crate::domain::ports::{EndpointTarget, PriceUpdatePayload, PricingEndpoint};
use crate::utils::error::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Marketplace `offer-prices/updates` endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPricingEndpoint {
    client: Client,
    base_url: String,
}

impl HttpPricingEndpoint {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn updates_url(&self, business_id: &str) -> String {
        format!(
            "{}/businesses/{}/offer-prices/updates",
            self.base_url, business_id
        )
    }
}

/// Classifies a 200 response body. `success: 0` (or `false`) is a business
/// rejection; a body that is not JSON is treated the same way.
pub fn classify_success_body(body: &str) -> DispatchOutcome {
    let parsed: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => return DispatchOutcome::BusinessError(format!("invalid JSON response: {}", e)),
    };

    let rejected = match parsed.get("success") {
        Some(Value::Number(n)) => n.as_i64() == Some(0),
        Some(Value::Bool(b)) => !b,
        _ => false,
    };
    if !rejected {
        return DispatchOutcome::Sent;
    }

    let message = parsed
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    DispatchOutcome::BusinessError(message.to_string())
}

#[async_trait]
impl PricingEndpoint for HttpPricingEndpoint {
    async fn update_price(
        &self,
        target: &EndpointTarget,
        payload: &PriceUpdatePayload,
    ) -> DispatchOutcome {
        let url = self.updates_url(&target.business_id);
        let response = match self
            .client
            .post(&url)
            .header("Api-Key", &target.api_key)
            .json(payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return DispatchOutcome::NetworkError(e.to_string()),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return DispatchOutcome::NetworkError(e.to_string()),
        };
        debug!("Pricing endpoint response {}: {}", status, body);

        if status != StatusCode::OK {
            return DispatchOutcome::TransportError {
                status: status.as_u16(),
                body,
            };
        }
        classify_success_body(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{OfferPrice, OfferUpdate};
    use httpmock::prelude::*;

    fn payload() -> PriceUpdatePayload {
        PriceUpdatePayload {
            offers: vec![OfferUpdate {
                offer_id: "123".to_string(),
                price: OfferPrice {
                    value: 110.0,
                    currency_id: "RUR".to_string(),
                    discount_base: 160,
                },
            }],
        }
    }

    fn target() -> EndpointTarget {
        EndpointTarget {
            api_key: "secret".to_string(),
            business_id: "777".to_string(),
        }
    }

    #[test]
    fn test_classify_success_body() {
        assert_eq!(classify_success_body(r#"{"status":"OK"}"#), DispatchOutcome::Sent);
        assert_eq!(classify_success_body(r#"{"success":1}"#), DispatchOutcome::Sent);
        assert_eq!(
            classify_success_body(r#"{"success":0,"error":{"message":"price below minimum"}}"#),
            DispatchOutcome::BusinessError("price below minimum".to_string())
        );
        assert_eq!(
            classify_success_body(r#"{"success":false}"#),
            DispatchOutcome::BusinessError("unknown error".to_string())
        );
        assert!(matches!(
            classify_success_body("<html>"),
            DispatchOutcome::BusinessError(_)
        ));
    }

    #[tokio::test]
    async fn test_sends_expected_request() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/businesses/777/offer-prices/updates")
                .header("Api-Key", "secret")
                .json_body(serde_json::json!({
                    "offers": [{
                        "offerId": "123",
                        "price": {"value": 110.0, "currencyId": "RUR", "discountBase": 160}
                    }]
                }));
            then.status(200).json_body(serde_json::json!({"status": "OK"}));
        });

        let endpoint = HttpPricingEndpoint::new(server.base_url(), Duration::from_secs(5)).unwrap();
        let outcome = endpoint.update_price(&target(), &payload()).await;

        mock.assert();
        assert_eq!(outcome, DispatchOutcome::Sent);
    }

    #[tokio::test]
    async fn test_non_200_is_transport_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/businesses/777/offer-prices/updates");
            then.status(420).body("rate limited");
        });

        let endpoint = HttpPricingEndpoint::new(server.base_url(), Duration::from_secs(5)).unwrap();
        let outcome = endpoint.update_price(&target(), &payload()).await;

        assert_eq!(
            outcome,
            DispatchOutcome::TransportError {
                status: 420,
                body: "rate limited".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let endpoint =
            HttpPricingEndpoint::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let outcome = endpoint.update_price(&target(), &payload()).await;
        assert!(matches!(outcome, DispatchOutcome::NetworkError(_)));
    }
}
