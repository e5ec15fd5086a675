//! Webhook notification of newly recorded trades.

use std::time::Duration;

use backoff::ExponentialBackoff;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::TradeError;
use crate::models::TradeRecord;

const DEFAULT_MAX_ELAPSED: Duration = Duration::from_secs(30);

/// POSTs each trade record as JSON to a configured URL.
///
/// Server errors and connection failures are retried with exponential backoff
/// until `max_elapsed` runs out. Client errors are returned immediately.
#[derive(Clone)]
pub struct Notifier {
    http: Client,
    url: String,
    max_elapsed: Duration,
}

impl Notifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, TradeError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TradeError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: url.to_string(),
            max_elapsed: DEFAULT_MAX_ELAPSED,
        })
    }

    #[cfg(test)]
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    pub async fn publish(&self, record: &TradeRecord) -> Result<(), TradeError> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(self.max_elapsed),
            ..ExponentialBackoff::default()
        };

        backoff::future::retry(policy, || async {
            let response = self
                .http
                .post(&self.url)
                .json(record)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(TradeError::from(e)))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            let err = TradeError::Transport(format!("notification endpoint returned HTTP {}", status.as_u16()));
            if status.is_server_error() {
                warn!(status = status.as_u16(), trade_id = %record.trade_id, "Notification failed, retrying");
                Err(backoff::Error::transient(err))
            } else {
                Err(backoff::Error::permanent(err))
            }
        })
        .await?;

        debug!(trade_id = %record.trade_id, user = %record.user_id, "Trade notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderAck, PositionSide, TradeSignal};
    use mockito::Matcher;
    use rust_decimal_macros::dec;

    fn record() -> TradeRecord {
        let signal = TradeSignal::open("ETHUSDT", PositionSide::Long, dec!(1800.25), 2);
        let ack = OrderAck {
            order_id: 55,
            status: "FILLED".to_string(),
            client_order_id: String::new(),
        };
        TradeRecord::opened("u9", &signal, &ack, "1.25", "BINANCE")
    }

    #[tokio::test]
    async fn test_publish_posts_record_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/trades")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJsonString(
                r#"{"user_id":"u9","trade_id":"55","pair":"ETHUSDT","quantity":"1.25","position_side":"LONG"}"#
                    .to_string(),
            ))
            .with_status(200)
            .create_async()
            .await;

        let notifier = Notifier::new(&format!("{}/trades", server.url()), Duration::from_secs(5)).unwrap();
        notifier.publish(&record()).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/trades")
            .with_status(422)
            .expect(1)
            .create_async()
            .await;

        let notifier = Notifier::new(&format!("{}/trades", server.url()), Duration::from_secs(5)).unwrap();
        let err = notifier.publish(&record()).await.unwrap_err();

        mock.assert_async().await;
        assert!(err.to_string().contains("422"));
    }

    #[tokio::test]
    async fn test_server_error_is_retried_until_deadline() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/trades")
            .with_status(503)
            .expect_at_least(2)
            .create_async()
            .await;

        let notifier = Notifier::new(&format!("{}/trades", server.url()), Duration::from_secs(5))
            .unwrap()
            .with_max_elapsed(Duration::from_secs(1));
        let result = notifier.publish(&record()).await;

        mock.assert_async().await;
        assert!(result.is_err());
    }
}
