//! Periodic low-stock and expiry scan.
//!
//! Read-only: a scan inspects every catalog product and hands alerts to a
//! sink. It never changes stock.

use std::io;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use stockflow_core::ProductId;
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_inventory::BatchId;

use crate::catalog::Catalog;
use crate::command_dispatcher::DispatchError;
use crate::config::AlertsConfig;
use crate::event_store::EventStore;
use crate::services::InventoryService;
use crate::workers::WorkerHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockAlert {
    LowStock {
        product_id: ProductId,
        on_hand: i64,
        reorder_level: i64,
    },
    Expiring {
        product_id: ProductId,
        batch_id: BatchId,
        expiry_date: NaiveDate,
        available: i64,
    },
    Expired {
        product_id: ProductId,
        batch_id: BatchId,
        expiry_date: NaiveDate,
        available: i64,
    },
}

impl StockAlert {
    pub fn product_id(&self) -> ProductId {
        match self {
            StockAlert::LowStock { product_id, .. }
            | StockAlert::Expiring { product_id, .. }
            | StockAlert::Expired { product_id, .. } => *product_id,
        }
    }
}

/// Where alerts go (mail, chat, a dashboard; owned elsewhere).
pub trait AlertSink: Send + Sync {
    fn notify(&self, alerts: &[StockAlert]);
}

impl<T> AlertSink for Arc<T>
where
    T: AlertSink + ?Sized,
{
    fn notify(&self, alerts: &[StockAlert]) {
        (**self).notify(alerts)
    }
}

/// Collects alerts in memory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAlertSink {
    received: Mutex<Vec<StockAlert>>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<StockAlert> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AlertSink for InMemoryAlertSink {
    fn notify(&self, alerts: &[StockAlert]) {
        if let Ok(mut r) = self.received.lock() {
            r.extend_from_slice(alerts);
        }
    }
}

pub struct StockAlertScanner<S, B, C> {
    inventory: Arc<InventoryService<S, B, C>>,
    settings: AlertsConfig,
}

impl<S, B, C> StockAlertScanner<S, B, C>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    C: Catalog,
{
    pub fn new(inventory: Arc<InventoryService<S, B, C>>, settings: AlertsConfig) -> Self {
        Self {
            inventory,
            settings,
        }
    }

    /// Alerts for every catalog product as of `as_of`.
    ///
    /// Only batches that still hold available units raise expiry alerts.
    pub fn scan(&self, as_of: NaiveDate) -> Result<Vec<StockAlert>, DispatchError> {
        let catalog = self.inventory.catalog();
        let mut products = catalog.products();
        products.sort();

        let mut alerts = Vec::new();
        for product_id in products {
            let stock = self.inventory.stock(product_id)?;

            let level = stock.level(catalog.reorder_level(product_id));
            if let (true, Some(reorder_level)) = (level.is_low_stock, level.reorder_level) {
                alerts.push(StockAlert::LowStock {
                    product_id,
                    on_hand: level.on_hand,
                    reorder_level,
                });
            }

            for b in stock.expired(as_of) {
                if let (Some(expiry_date), true) = (b.expiry_date(), b.available_quantity() > 0) {
                    alerts.push(StockAlert::Expired {
                        product_id,
                        batch_id: b.id_typed(),
                        expiry_date,
                        available: b.available_quantity(),
                    });
                }
            }

            for b in stock.expiring_within(as_of, self.settings.expiry_warning_days) {
                if let (Some(expiry_date), true) = (b.expiry_date(), b.available_quantity() > 0) {
                    alerts.push(StockAlert::Expiring {
                        product_id,
                        batch_id: b.id_typed(),
                        expiry_date,
                        available: b.available_quantity(),
                    });
                }
            }
        }
        Ok(alerts)
    }
}

/// Runs a scanner on a fixed interval until shut down.
#[derive(Debug)]
pub struct AlertWorker;

impl AlertWorker {
    pub fn spawn<S, B, C, K>(
        scanner: StockAlertScanner<S, B, C>,
        sink: K,
    ) -> io::Result<WorkerHandle>
    where
        S: EventStore + 'static,
        B: EventBus<EventEnvelope<JsonValue>> + 'static,
        C: Catalog + 'static,
        K: AlertSink + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let interval = Duration::from_secs(scanner.settings.scan_interval_secs);

        let join = thread::Builder::new()
            .name("stock-alerts".to_string())
            .spawn(move || {
                loop {
                    match scanner.scan(Utc::now().date_naive()) {
                        Ok(alerts) if alerts.is_empty() => {}
                        Ok(alerts) => {
                            warn!(alerts = alerts.len(), "stock alerts raised");
                            sink.notify(&alerts);
                        }
                        Err(err) => warn!(error = %err, "stock alert scan failed"),
                    }
                    match shutdown_rx.recv_timeout(interval) {
                        Err(mpsc::RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
                info!("stock alert worker stopped");
            })?;

        Ok(WorkerHandle::new(shutdown_tx, join))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{DateTime, TimeZone};
    use rust_decimal_macros::dec;
    use stockflow_core::AggregateId;
    use stockflow_events::InMemoryEventBus;

    use crate::catalog::InMemoryCatalog;
    use crate::command_dispatcher::CommandDispatcher;
    use crate::config::AllocationConfig;
    use crate::event_store::InMemoryEventStore;
    use crate::services::BatchIntake;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, d, 8, 0, 0).unwrap()
    }

    #[test]
    fn reports_low_stock_expiring_and_expired() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let low = ProductId::new(AggregateId::new());
        let perishable = ProductId::new(AggregateId::new());
        catalog.add_product(low, Some(5));
        catalog.add_product(perishable, None);

        let dispatcher = Arc::new(CommandDispatcher::new(
            InMemoryEventStore::new(),
            Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new()),
        ));
        let inventory = Arc::new(InventoryService::new(
            dispatcher,
            catalog,
            AllocationConfig::default(),
        ));

        inventory.create_batch(BatchIntake::new(low, 3, dec!(1))).unwrap();

        let mut gone = BatchIntake::new(perishable, 4, dec!(2));
        gone.expiry_date = NaiveDate::from_ymd_opt(2026, 6, 1);
        gone.occurred_at = day(1);
        inventory.create_batch(gone).unwrap();

        let mut soon = BatchIntake::new(perishable, 6, dec!(2));
        soon.expiry_date = NaiveDate::from_ymd_opt(2026, 6, 20);
        soon.occurred_at = day(2);
        inventory.create_batch(soon).unwrap();

        let scanner = StockAlertScanner::new(
            inventory,
            AlertsConfig {
                expiry_warning_days: 14,
                scan_interval_secs: 60,
            },
        );
        let alerts = scanner.scan(day(10).date_naive()).unwrap();

        assert_eq!(alerts.len(), 3);
        assert!(alerts.iter().any(|a| matches!(a, StockAlert::LowStock { on_hand: 3, .. })));
        assert!(alerts.iter().any(|a| matches!(a, StockAlert::Expired { available: 4, .. })));
        assert!(alerts.iter().any(|a| matches!(a, StockAlert::Expiring { available: 6, .. })));
    }

    #[test]
    fn worker_scans_on_start_and_stops_on_shutdown() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let empty = ProductId::new(AggregateId::new());
        catalog.add_product(empty, Some(1));

        let dispatcher = Arc::new(CommandDispatcher::new(
            InMemoryEventStore::new(),
            Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new()),
        ));
        let inventory = Arc::new(InventoryService::new(
            dispatcher,
            catalog,
            AllocationConfig::default(),
        ));
        let sink = Arc::new(InMemoryAlertSink::new());

        let handle = AlertWorker::spawn(
            StockAlertScanner::new(inventory, AlertsConfig::default()),
            Arc::clone(&sink),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(100));
        handle.shutdown();

        assert_eq!(
            sink.received(),
            vec![StockAlert::LowStock {
                product_id: empty,
                on_hand: 0,
                reorder_level: 1,
            }]
        );
    }

    #[test]
    fn sink_collects_notifications() {
        let sink = InMemoryAlertSink::new();
        let alert = StockAlert::LowStock {
            product_id: ProductId::new(AggregateId::new()),
            on_hand: 0,
            reorder_level: 1,
        };
        sink.notify(std::slice::from_ref(&alert));
        assert_eq!(sink.received(), vec![alert]);
    }
}
