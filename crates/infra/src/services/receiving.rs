use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stockflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, ExpectedVersion, ProductId, SupplierId,
    UserId,
};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_inventory::{BatchId, InventoryCommand, ProductStock, Provenance, ReceiveBatch};
use stockflow_purchasing::{
    AddItem, Adjustments, Approve, Cancel, CreateReceipt, OrderDetails, PurchaseReceipt,
    ReceiptCommand, ReceiptEvent, ReceiptId, ReceiptStatus, ReceiveGoods, RemoveItem,
    SendToSupplier, SetAdjustments, StockApplication, Submit, Verify,
};

use crate::catalog::Catalog;
use crate::command_dispatcher::{CommandDispatcher, Committed, DispatchError};
use crate::config::ReceiptsConfig;
use crate::event_store::EventStore;
use crate::numbering::{ReceiptNumberGenerator, ReceiptNumberRegistry};

/// Header of a new purchase receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReceipt {
    pub supplier_id: SupplierId,
    pub order: OrderDetails,
    /// `None` uses the configured default currency.
    pub currency: Option<String>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl NewReceipt {
    pub fn new(supplier_id: SupplierId, created_by: UserId) -> Self {
        Self {
            supplier_id,
            order: OrderDetails::default(),
            currency: None,
            created_by,
            occurred_at: Utc::now(),
        }
    }
}

/// Order side of a receipt line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLine {
    pub product_id: ProductId,
    pub ordered_quantity: i64,
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
}

impl NewLine {
    pub fn new(product_id: ProductId, ordered_quantity: i64, unit_price: Decimal) -> Self {
        Self {
            product_id,
            ordered_quantity,
            unit_price,
            discount: Decimal::ZERO,
            tax: Decimal::ZERO,
        }
    }
}

/// Purchase receipt workflow: ordering, approval, receiving into stock.
#[derive(Debug)]
pub struct ReceivingService<S, B, C, R> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    catalog: C,
    numbers: ReceiptNumberGenerator<R>,
    settings: ReceiptsConfig,
    max_retries: u32,
}

impl<S, B, C, R> ReceivingService<S, B, C, R>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    C: Catalog,
    R: ReceiptNumberRegistry,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        catalog: C,
        registry: R,
        settings: ReceiptsConfig,
        max_retries: u32,
    ) -> Self {
        let numbers = ReceiptNumberGenerator::new(
            registry,
            settings.number_prefix.as_str(),
            settings.number_max_attempts,
        );
        Self {
            dispatcher,
            catalog,
            numbers,
            settings,
            max_retries,
        }
    }

    /// Open a draft receipt under a freshly claimed receipt number.
    pub fn create(&self, new: NewReceipt) -> Result<PurchaseReceipt, DispatchError> {
        self.catalog.require_supplier(new.supplier_id)?;
        let receipt_number = self.numbers.next(new.occurred_at.date_naive())?;
        let receipt_id = ReceiptId::new(AggregateId::new());

        self.execute(ReceiptCommand::CreateReceipt(CreateReceipt {
            receipt_id,
            receipt_number: receipt_number.clone(),
            supplier_id: new.supplier_id,
            order: new.order,
            currency: new
                .currency
                .unwrap_or_else(|| self.settings.default_currency.clone()),
            created_by: new.created_by,
            occurred_at: new.occurred_at,
        }))?;
        info!(
            receipt_id = %receipt_id,
            receipt_number = %receipt_number,
            supplier_id = %new.supplier_id,
            "purchase receipt created"
        );
        self.get(receipt_id)
    }

    /// Add an order line; returns its line number.
    pub fn add_item(&self, receipt_id: ReceiptId, line: NewLine) -> Result<u32, DispatchError> {
        self.catalog.require_product(line.product_id)?;
        let committed = self.execute(ReceiptCommand::AddItem(AddItem {
            receipt_id,
            product_id: line.product_id,
            ordered_quantity: line.ordered_quantity,
            unit_price: line.unit_price,
            discount: line.discount,
            tax: line.tax,
            occurred_at: Utc::now(),
        }))?;
        committed
            .events
            .iter()
            .find_map(|e| match e {
                ReceiptEvent::ItemAdded(a) => Some(a.item.line_no),
                _ => None,
            })
            .ok_or_else(|| DomainError::invariant("no line recorded").into())
    }

    pub fn remove_item(&self, receipt_id: ReceiptId, line_no: u32) -> Result<(), DispatchError> {
        self.execute(ReceiptCommand::RemoveItem(RemoveItem {
            receipt_id,
            line_no,
            occurred_at: Utc::now(),
        }))?;
        Ok(())
    }

    pub fn set_adjustments(
        &self,
        receipt_id: ReceiptId,
        adjustments: Adjustments,
    ) -> Result<(), DispatchError> {
        self.execute(ReceiptCommand::SetAdjustments(SetAdjustments {
            receipt_id,
            adjustments,
            occurred_at: Utc::now(),
        }))?;
        Ok(())
    }

    pub fn submit(&self, receipt_id: ReceiptId) -> Result<ReceiptStatus, DispatchError> {
        self.transition(ReceiptCommand::Submit(Submit {
            receipt_id,
            occurred_at: Utc::now(),
        }))
    }

    pub fn approve(
        &self,
        receipt_id: ReceiptId,
        approved_by: UserId,
    ) -> Result<ReceiptStatus, DispatchError> {
        self.transition(ReceiptCommand::Approve(Approve {
            receipt_id,
            approved_by,
            occurred_at: Utc::now(),
        }))
    }

    pub fn send_to_supplier(&self, receipt_id: ReceiptId) -> Result<ReceiptStatus, DispatchError> {
        self.transition(ReceiptCommand::SendToSupplier(SendToSupplier {
            receipt_id,
            occurred_at: Utc::now(),
        }))
    }

    pub fn verify(
        &self,
        receipt_id: ReceiptId,
        verified_by: UserId,
    ) -> Result<ReceiptStatus, DispatchError> {
        self.transition(ReceiptCommand::Verify(Verify {
            receipt_id,
            verified_by,
            occurred_at: Utc::now(),
        }))
    }

    pub fn cancel(
        &self,
        receipt_id: ReceiptId,
        cancelled_by: UserId,
        reason: Option<String>,
    ) -> Result<ReceiptStatus, DispatchError> {
        self.transition(ReceiptCommand::Cancel(Cancel {
            receipt_id,
            cancelled_by,
            reason,
            occurred_at: Utc::now(),
        }))
    }

    /// Record a delivery and apply accepted quantities to stock.
    ///
    /// The receipt commits first: once its lines are settled, `cancel` is
    /// refused, so stock never lands under a cancelled receipt. Stock follows.
    /// Each application carries the line's reference, so repeating the call
    /// after an interrupted receive re-applies only what is missing.
    pub fn receive_goods(&self, command: ReceiveGoods) -> Result<ReceiptStatus, DispatchError> {
        let receipt_id = command.receipt_id;
        let command = ReceiptCommand::ReceiveGoods(command);
        let mut attempt = 0u32;

        let received = loop {
            attempt += 1;
            let receipt = self.load(receipt_id)?;
            let expected = ExpectedVersion::Exact(receipt.version());
            let events = receipt.handle(&command)?;
            if events.is_empty() {
                debug!(receipt_id = %receipt_id, "nothing left to settle");
                self.reconcile_stock(&receipt)?;
                return Ok(receipt.status());
            }

            match self.dispatcher.commit(
                receipt_id.0,
                PurchaseReceipt::AGGREGATE_TYPE,
                expected,
                &events,
            ) {
                Ok(_) => break events,
                Err(DispatchError::Concurrency(msg)) if attempt <= self.max_retries => {
                    debug!(
                        receipt_id = %receipt_id,
                        attempt,
                        reason = %msg,
                        "receipt moved; re-planning receive"
                    );
                }
                Err(DispatchError::Concurrency(last)) => {
                    warn!(
                        receipt_id = %receipt_id,
                        attempts = attempt,
                        "receive retries exhausted"
                    );
                    return Err(DispatchError::RetriesExhausted { attempts: attempt, last });
                }
                Err(other) => return Err(other),
            }
        };

        let mut status = ReceiptStatus::Ordered;
        for event in &received {
            if let ReceiptEvent::GoodsReceived(e) = event {
                for application in &e.stock_applications {
                    self.apply_stock(receipt_id, application, e.received_by, e.occurred_at)?;
                }
                status = e.status;
            }
        }
        info!(receipt_id = %receipt_id, status = %status, "goods received");
        Ok(status)
    }

    /// Re-apply stock for every settled line of a receipt.
    ///
    /// Lines whose stock already landed are no-ops, so this only fills gaps
    /// left by a receive that committed but stopped before stocking.
    pub fn restock(&self, receipt_id: ReceiptId) -> Result<(), DispatchError> {
        let receipt = self.get(receipt_id)?;
        self.reconcile_stock(&receipt)
    }

    /// Current receipt state, rehydrated from its stream.
    pub fn get(&self, receipt_id: ReceiptId) -> Result<PurchaseReceipt, DispatchError> {
        let receipt = self.load(receipt_id)?;
        if !receipt.is_created() {
            return Err(DomainError::not_found(format!("receipt {receipt_id}")).into());
        }
        Ok(receipt)
    }

    fn load(&self, receipt_id: ReceiptId) -> Result<PurchaseReceipt, DispatchError> {
        self.dispatcher
            .load(receipt_id.0, |id| PurchaseReceipt::empty(ReceiptId::new(id)))
    }

    fn reconcile_stock(&self, receipt: &PurchaseReceipt) -> Result<(), DispatchError> {
        let applications = receipt.stock_applications();
        if applications.is_empty() {
            return Ok(());
        }
        let received_by = receipt
            .audit()
            .received_by
            .ok_or_else(|| DomainError::invariant("settled receipt has no receiver"))?;
        let occurred_at = Utc::now();
        for application in &applications {
            self.apply_stock(receipt.id_typed(), application, received_by, occurred_at)?;
        }
        Ok(())
    }

    fn apply_stock(
        &self,
        receipt_id: ReceiptId,
        application: &StockApplication,
        received_by: UserId,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        // Stable ids per line, so a re-application proposes the same batch and movement.
        let operation_id = Uuid::new_v5(
            receipt_id.0.as_uuid(),
            format!("line:{}", application.line_no).as_bytes(),
        );
        let command = InventoryCommand::ReceiveBatch(ReceiveBatch {
            product_id: application.product_id,
            batch_id: BatchId(Uuid::new_v5(&operation_id, b"batch")),
            operation_id,
            quantity: application.quantity,
            cost_price: application.unit_cost,
            lot_code: application.lot_code.clone(),
            supplier_id: Some(application.supplier_id),
            manufacture_date: application.manufacture_date,
            expiry_date: application.expiry_date,
            provenance: Provenance::by(received_by).with_reference(application.reference.clone()),
            occurred_at,
        });

        let committed = self.dispatcher.dispatch_with_retry(
            application.product_id.0,
            ProductStock::AGGREGATE_TYPE,
            &command,
            |id| ProductStock::empty(ProductId::new(id)),
            self.max_retries,
        )?;
        if committed.is_noop() {
            debug!(
                receipt_id = %receipt_id,
                line_no = application.line_no,
                "line stock already applied"
            );
        } else {
            info!(
                receipt_id = %receipt_id,
                line_no = application.line_no,
                product_id = %application.product_id,
                quantity = application.quantity,
                "receipt line applied to stock"
            );
        }
        Ok(())
    }

    fn execute(&self, command: ReceiptCommand) -> Result<Committed<ReceiptEvent>, DispatchError> {
        self.dispatcher.dispatch_with_retry(
            command.receipt_id().0,
            PurchaseReceipt::AGGREGATE_TYPE,
            &command,
            |id| PurchaseReceipt::empty(ReceiptId::new(id)),
            self.max_retries,
        )
    }

    fn transition(&self, command: ReceiptCommand) -> Result<ReceiptStatus, DispatchError> {
        let receipt_id = command.receipt_id();
        self.execute(command)?;
        let status = self.get(receipt_id)?.status();
        info!(receipt_id = %receipt_id, status = %status, "receipt status changed");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rust_decimal_macros::dec;
    use stockflow_events::InMemoryEventBus;
    use stockflow_purchasing::{DeliveryDetails, LineReceipt};

    use crate::catalog::InMemoryCatalog;
    use crate::event_store::InMemoryEventStore;
    use crate::numbering::InMemoryReceiptNumberRegistry;

    type Service = ReceivingService<
        InMemoryEventStore,
        Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
        Arc<InMemoryCatalog>,
        InMemoryReceiptNumberRegistry,
    >;

    fn setup() -> (Service, SupplierId, ProductId) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let supplier_id = SupplierId::new(AggregateId::new());
        let product_id = ProductId::new(AggregateId::new());
        catalog.add_supplier(supplier_id);
        catalog.add_product(product_id, None);
        let dispatcher = Arc::new(CommandDispatcher::new(
            InMemoryEventStore::new(),
            Arc::new(InMemoryEventBus::new()),
        ));
        let svc = ReceivingService::new(
            dispatcher,
            catalog,
            InMemoryReceiptNumberRegistry::new(),
            ReceiptsConfig::default(),
            4,
        );
        (svc, supplier_id, product_id)
    }

    #[test]
    fn create_requires_known_supplier_and_numbers_receipts() {
        let (svc, supplier_id, _) = setup();
        let user = UserId::new();

        let unknown = SupplierId::new(AggregateId::new());
        let err = svc.create(NewReceipt::new(unknown, user)).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::NotFound(_))));

        let a = svc.create(NewReceipt::new(supplier_id, user)).unwrap();
        let b = svc.create(NewReceipt::new(supplier_id, user)).unwrap();
        assert_eq!(a.status(), ReceiptStatus::Draft);
        assert_eq!(a.currency(), "USD");
        assert_eq!(a.receipt_number().unwrap().prefix(), "PR");
        assert_eq!(
            b.receipt_number().unwrap().sequence(),
            a.receipt_number().unwrap().sequence() + 1
        );
    }

    #[test]
    fn draft_receipt_refuses_goods() {
        let (svc, supplier_id, product_id) = setup();
        let user = UserId::new();
        let receipt = svc.create(NewReceipt::new(supplier_id, user)).unwrap();
        let line_no = svc
            .add_item(receipt.id_typed(), NewLine::new(product_id, 10, dec!(3.00)))
            .unwrap();

        let err = svc
            .receive_goods(ReceiveGoods {
                receipt_id: receipt.id_typed(),
                received_by: user,
                delivery: DeliveryDetails::default(),
                lines: vec![LineReceipt::accepted(line_no, 10)],
                occurred_at: Utc::now(),
            })
            .unwrap_err();
        assert!(matches!(
            err.domain(),
            Some(DomainError::InvalidStateTransition { .. })
        ));
    }
}
