//! Process-local record store.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::TradeError;
use crate::models::{RecordFilter, RecordPatch, TradeRecord};

use super::RecordStore;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<TradeRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_all(&self, filter: &RecordFilter) -> Result<Vec<TradeRecord>, TradeError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn save(&self, record: TradeRecord) -> Result<TradeRecord, TradeError> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(TradeError::Persistence(format!("duplicate record id {}", record.id)));
        }
        records.push(record.clone());
        Ok(record)
    }

    async fn update_one(&self, filter: &RecordFilter, patch: &RecordPatch) -> Result<TradeRecord, TradeError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| filter.matches(r))
            .ok_or_else(|| TradeError::RecordNotFound(format!("no record matches {:?}", filter)))?;

        patch.apply(record);
        Ok(record.clone())
    }

    async fn remove(&self, filter: &RecordFilter) -> Result<u64, TradeError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| !filter.matches(r));
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderAck, PositionSide, TradeSignal, TradeStatus};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_crud() {
        let store = MemoryStore::new();
        let signal = TradeSignal::open("BTCUSDT", PositionSide::Long, dec!(100), 2);
        let ack = OrderAck {
            order_id: 9,
            status: "FILLED".to_string(),
            client_order_id: String::new(),
        };
        let saved = store
            .save(TradeRecord::opened("u1", &signal, &ack, "1.00", "SIMULATED"))
            .await
            .unwrap();

        assert!(store.save(saved.clone()).await.is_err());
        assert_eq!(store.find_by_id(&saved.id).await.unwrap().trade_id, "9");

        let updated = store
            .update_one(&RecordFilter::by_id(&saved.id), &RecordPatch::status(TradeStatus::Closed))
            .await
            .unwrap();
        assert_eq!(updated.status, TradeStatus::Closed);

        assert_eq!(store.remove(&RecordFilter::default()).await.unwrap(), 1);
        assert_eq!(store.len().await, 0);
        assert!(matches!(store.find_by_id(&saved.id).await, Err(TradeError::RecordNotFound(_))));
    }
}
