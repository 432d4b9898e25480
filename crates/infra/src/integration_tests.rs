//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Service → Dispatcher → EventStore → EventBus → Projection → ReadModel
//!
//! Verifies:
//! - A received purchase receipt lands in the batch store and the ledger
//! - Receiving is idempotent per line
//! - Issuance policies hold end to end
//! - Concurrent allocations never overdraw a batch
//! - A cancel racing a receive never strands stock under a cancelled receipt

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier, Mutex, OnceLock};
    use std::thread;
    use std::time::Duration;

    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use serde_json::Value as JsonValue;

    use stockflow_core::{
        Aggregate, AggregateId, AggregateRoot, DomainError, ExpectedVersion, ProductId,
        SupplierId, UserId,
    };
    use stockflow_events::{
        EventBus, EventEnvelope, InMemoryBusError, InMemoryEventBus, Subscription,
    };
    use stockflow_inventory::{BatchId, IssuancePolicy, MovementType, Reference, StockMovement};
    use stockflow_purchasing::{
        DeliveryDetails, LineReceipt, OrderDetails, PurchaseReceipt, ReceiptCommand, ReceiptId,
        ReceiptStatus, ReceiveGoods,
    };

    use crate::catalog::InMemoryCatalog;
    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::config::{AllocationConfig, ReceiptsConfig, StockflowConfig};
    use crate::event_store::InMemoryEventStore;
    use crate::numbering::InMemoryReceiptNumberRegistry;
    use crate::projections::{
        BatchIndexProjection, BatchView, MovementFilter, MovementLedgerProjection, Projection,
        ReceiptDirectoryProjection, ReceiptFilter, catch_up, rebuild,
    };
    use crate::read_model::{InMemoryKeyedStore, Pagination};
    use crate::services::{
        AllocationRequest, BatchIntake, InventoryService, NewLine, NewReceipt, ReceivingService,
    };
    use crate::workers::ProjectionWorker;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Store = Arc<InMemoryEventStore>;
    type Dispatcher = CommandDispatcher<Store, Bus>;
    type Inventory = InventoryService<Store, Bus, Arc<InMemoryCatalog>>;
    type Receiving =
        ReceivingService<Store, Bus, Arc<InMemoryCatalog>, Arc<InMemoryReceiptNumberRegistry>>;
    type Ledger = MovementLedgerProjection<
        Arc<InMemoryKeyedStore<stockflow_inventory::MovementId, StockMovement>>,
    >;

    struct Harness {
        store: Store,
        bus: Bus,
        catalog: Arc<InMemoryCatalog>,
        inventory: Arc<Inventory>,
        receiving: Receiving,
        supplier_id: SupplierId,
        product_id: ProductId,
        user: UserId,
    }

    fn harness_with(config: StockflowConfig) -> Harness {
        stockflow_observability::init();

        let store: Store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher: Arc<Dispatcher> =
            Arc::new(CommandDispatcher::new(Arc::clone(&store), Arc::clone(&bus)));

        let catalog = Arc::new(InMemoryCatalog::new());
        let supplier_id = SupplierId::new(AggregateId::new());
        let product_id = ProductId::new(AggregateId::new());
        catalog.add_supplier(supplier_id);
        catalog.add_product(product_id, Some(20));

        let inventory = Arc::new(InventoryService::new(
            Arc::clone(&dispatcher),
            Arc::clone(&catalog),
            config.allocation.clone(),
        ));
        let receiving = ReceivingService::new(
            dispatcher,
            Arc::clone(&catalog),
            Arc::new(InMemoryReceiptNumberRegistry::new()),
            config.receipts.clone(),
            config.allocation.max_retries,
        );

        Harness {
            store,
            bus,
            catalog,
            inventory,
            receiving,
            supplier_id,
            product_id,
            user: UserId::new(),
        }
    }

    fn harness() -> Harness {
        harness_with(StockflowConfig::default())
    }

    fn ledger() -> Ledger {
        MovementLedgerProjection::new(Arc::new(InMemoryKeyedStore::new()))
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, d, 10, 0, 0).unwrap()
    }

    /// Draft → approved → ordered, with one line per `(ordered, unit price)`.
    fn ordered_receipt(h: &Harness, lines: &[(i64, rust_decimal::Decimal)]) -> (ReceiptId, Vec<u32>) {
        let mut new = NewReceipt::new(h.supplier_id, h.user);
        new.order = OrderDetails {
            order_date: NaiveDate::from_ymd_opt(2026, 5, 1),
            expected_date: NaiveDate::from_ymd_opt(2026, 5, 8),
            reference: Some("PO-7781".to_string()),
            ..OrderDetails::default()
        };
        let receipt = h.receiving.create(new).unwrap();
        let receipt_id = receipt.id_typed();

        let line_nos = lines
            .iter()
            .map(|(qty, price)| {
                h.receiving
                    .add_item(receipt_id, NewLine::new(h.product_id, *qty, *price))
                    .unwrap()
            })
            .collect();

        assert_eq!(
            h.receiving.approve(receipt_id, h.user).unwrap(),
            ReceiptStatus::Approved
        );
        assert_eq!(
            h.receiving.send_to_supplier(receipt_id).unwrap(),
            ReceiptStatus::Ordered
        );
        (receipt_id, line_nos)
    }

    fn delivery(receipt_id: ReceiptId, user: UserId, lines: Vec<LineReceipt>) -> ReceiveGoods {
        ReceiveGoods {
            receipt_id,
            received_by: user,
            delivery: DeliveryDetails {
                received_date: NaiveDate::from_ymd_opt(2026, 5, 7),
                invoice_number: Some("INV-5521".to_string()),
                quality_checked: true,
                ..DeliveryDetails::default()
            },
            lines,
            occurred_at: day(7),
        }
    }

    #[test]
    fn received_receipt_creates_batch_and_in_movement() {
        let h = harness();
        let (receipt_id, lines) = ordered_receipt(&h, &[(100, dec!(10.00))]);

        let status = h
            .receiving
            .receive_goods(delivery(
                receipt_id,
                h.user,
                vec![LineReceipt {
                    line_no: lines[0],
                    received_quantity: 100,
                    accepted_quantity: 95,
                    rejected_quantity: 5,
                    batch_number: Some("LOT-A1".to_string()),
                    ..LineReceipt::default()
                }],
            ))
            .unwrap();
        assert_eq!(status, ReceiptStatus::Completed);

        let batches = h.inventory.batches(h.product_id).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].quantity(), 95);
        assert_eq!(batches[0].available_quantity(), 95);
        assert_eq!(batches[0].cost_price(), dec!(10.00));
        assert_eq!(batches[0].supplier_id(), Some(h.supplier_id));
        assert_eq!(batches[0].lot_code(), Some("LOT-A1"));

        let ledger = ledger();
        catch_up(&ledger, &h.store).unwrap();
        let page = ledger.query(&MovementFilter::for_product(h.product_id), Pagination::default());
        assert_eq!(page.total, 1);
        let m = &page.items[0];
        assert_eq!(m.movement_type(), MovementType::In);
        assert_eq!(m.quantity(), 95);
        assert_eq!(m.unit_cost(), dec!(10.00));
        assert_eq!(m.total_cost(), dec!(950.00));
        assert_eq!(m.user_id(), Some(h.user));
        assert_eq!(
            m.reference(),
            Some(&Reference::purchase_receipt_line(receipt_id, lines[0]))
        );

        let receipt = h.receiving.get(receipt_id).unwrap();
        assert!(receipt.items()[0].stock_updated);
        assert_eq!(receipt.totals().total, dec!(1000.00));
    }

    #[test]
    fn receiving_a_settled_line_again_changes_nothing() {
        let h = harness();
        let (receipt_id, lines) = ordered_receipt(&h, &[(10, dec!(2.00)), (4, dec!(3.00))]);

        let first = delivery(receipt_id, h.user, vec![LineReceipt::accepted(lines[0], 10)]);
        assert_eq!(
            h.receiving.receive_goods(first.clone()).unwrap(),
            ReceiptStatus::Partial
        );
        let after_first = h.receiving.get(receipt_id).unwrap();

        // Same delivery posted twice.
        assert_eq!(
            h.receiving.receive_goods(first).unwrap(),
            ReceiptStatus::Partial
        );
        assert_eq!(h.receiving.get(receipt_id).unwrap(), after_first);
        assert_eq!(h.inventory.batches(h.product_id).unwrap().len(), 1);
        assert_eq!(h.inventory.level(h.product_id).unwrap().on_hand, 10);

        // A later delivery that repeats line 1 only settles line 2.
        let second = delivery(
            receipt_id,
            h.user,
            vec![
                LineReceipt::accepted(lines[0], 10),
                LineReceipt::accepted(lines[1], 4),
            ],
        );
        assert_eq!(
            h.receiving.receive_goods(second).unwrap(),
            ReceiptStatus::Completed
        );
        assert_eq!(h.inventory.level(h.product_id).unwrap().on_hand, 14);

        let ledger = ledger();
        catch_up(&ledger, &h.store).unwrap();
        assert_eq!(ledger.totals(h.product_id).quantity_in, 14);
        assert_eq!(ledger.totals(h.product_id).movements, 2);
    }

    #[test]
    fn short_delivery_waits_for_verification() {
        let h = harness();
        let (receipt_id, lines) = ordered_receipt(&h, &[(10, dec!(1.00))]);

        let status = h
            .receiving
            .receive_goods(delivery(
                receipt_id,
                h.user,
                vec![LineReceipt::accepted(lines[0], 8)],
            ))
            .unwrap();
        assert_eq!(status, ReceiptStatus::Received);

        let verifier = UserId::new();
        assert_eq!(
            h.receiving.verify(receipt_id, verifier).unwrap(),
            ReceiptStatus::Completed
        );
        let receipt = h.receiving.get(receipt_id).unwrap();
        assert_eq!(receipt.audit().verified_by, Some(verifier));
        assert!(receipt.audit().verified_at.is_some());
    }

    #[test]
    fn cancellation_is_refused_once_stock_was_applied() {
        let h = harness();
        let (receipt_id, lines) = ordered_receipt(&h, &[(5, dec!(1.00)), (5, dec!(1.00))]);
        h.receiving
            .receive_goods(delivery(
                receipt_id,
                h.user,
                vec![LineReceipt::accepted(lines[0], 5)],
            ))
            .unwrap();

        let err = h
            .receiving
            .cancel(receipt_id, h.user, Some("supplier closed".to_string()))
            .unwrap_err();
        assert!(matches!(
            err.domain(),
            Some(DomainError::InvalidStateTransition { .. })
        ));

        let (untouched, _) = ordered_receipt(&h, &[(5, dec!(1.00))]);
        assert_eq!(
            h.receiving
                .cancel(untouched, h.user, Some("duplicate order".to_string()))
                .unwrap(),
            ReceiptStatus::Cancelled
        );
        let cancelled = h.receiving.get(untouched).unwrap();
        assert_eq!(cancelled.audit().cancel_reason.as_deref(), Some("duplicate order"));
    }

    type Hook = Box<dyn Fn(&EventEnvelope<JsonValue>) + Send + Sync>;

    /// Runs a callback before each publish, standing in for a second request
    /// that arrives while a service is midway through its work.
    struct HookedBus {
        inner: InMemoryEventBus<EventEnvelope<JsonValue>>,
        hook: OnceLock<Hook>,
    }

    impl EventBus<EventEnvelope<JsonValue>> for HookedBus {
        type Error = InMemoryBusError;

        fn publish(&self, message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
            if let Some(hook) = self.hook.get() {
                hook(&message);
            }
            self.inner.publish(message)
        }

        fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
            self.inner.subscribe()
        }
    }

    #[test]
    fn cancel_arriving_mid_receive_is_refused() {
        stockflow_observability::init();

        let store: Store = Arc::new(InMemoryEventStore::new());
        let bus = Arc::new(HookedBus {
            inner: InMemoryEventBus::new(),
            hook: OnceLock::new(),
        });
        let dispatcher = Arc::new(CommandDispatcher::new(Arc::clone(&store), Arc::clone(&bus)));

        let catalog = Arc::new(InMemoryCatalog::new());
        let supplier_id = SupplierId::new(AggregateId::new());
        let product_id = ProductId::new(AggregateId::new());
        catalog.add_supplier(supplier_id);
        catalog.add_product(product_id, None);

        let receiving = Arc::new(ReceivingService::new(
            Arc::clone(&dispatcher),
            Arc::clone(&catalog),
            Arc::new(InMemoryReceiptNumberRegistry::new()),
            ReceiptsConfig::default(),
            4,
        ));
        let inventory = InventoryService::new(dispatcher, catalog, AllocationConfig::default());

        let user = UserId::new();
        let receipt_id = receiving
            .create(NewReceipt::new(supplier_id, user))
            .unwrap()
            .id_typed();
        let line_no = receiving
            .add_item(receipt_id, NewLine::new(product_id, 100, dec!(4.00)))
            .unwrap();
        receiving.approve(receipt_id, user).unwrap();
        receiving.send_to_supplier(receipt_id).unwrap();

        // The cancel lands exactly when the stock-in is published.
        let outcome = Arc::new(Mutex::new(None));
        let cancels = Arc::downgrade(&receiving);
        let seen = Arc::clone(&outcome);
        let installed = bus.hook.set(Box::new(move |envelope| {
            if envelope.event_type() != "inventory.stock.batch_received" {
                return;
            }
            if let Some(receiving) = cancels.upgrade() {
                let result = receiving.cancel(receipt_id, user, Some("supplier withdrew".into()));
                *seen.lock().unwrap() = Some(result);
            }
        }));
        assert!(installed.is_ok());

        let status = receiving
            .receive_goods(delivery(
                receipt_id,
                user,
                vec![LineReceipt::accepted(line_no, 100)],
            ))
            .unwrap();
        assert_eq!(status, ReceiptStatus::Completed);

        let cancel = outcome.lock().unwrap().take().unwrap();
        assert!(matches!(
            cancel.unwrap_err().domain(),
            Some(DomainError::InvalidStateTransition { .. })
        ));

        let receipt = receiving.get(receipt_id).unwrap();
        assert_eq!(receipt.status(), ReceiptStatus::Completed);
        assert!(receipt.items()[0].stock_updated);
        assert_eq!(inventory.level(product_id).unwrap().on_hand, 100);
    }

    #[test]
    fn interrupted_receive_is_restocked_exactly_once() {
        let h = harness();
        let (receipt_id, lines) = ordered_receipt(&h, &[(10, dec!(2.00)), (4, dec!(3.00))]);
        let first = delivery(receipt_id, h.user, vec![LineReceipt::accepted(lines[0], 10)]);

        // The receipt settles line 1, then the process stops before stocking it.
        let dispatcher: Dispatcher =
            CommandDispatcher::new(Arc::clone(&h.store), Arc::clone(&h.bus));
        let receipt = h.receiving.get(receipt_id).unwrap();
        let events = receipt
            .handle(&ReceiptCommand::ReceiveGoods(first.clone()))
            .unwrap();
        dispatcher
            .commit(
                receipt_id.0,
                PurchaseReceipt::AGGREGATE_TYPE,
                ExpectedVersion::Exact(receipt.version()),
                &events,
            )
            .unwrap();
        assert_eq!(h.inventory.level(h.product_id).unwrap().on_hand, 0);

        // Posting the same delivery again fills the gap.
        assert_eq!(
            h.receiving.receive_goods(first).unwrap(),
            ReceiptStatus::Partial
        );
        assert_eq!(h.inventory.level(h.product_id).unwrap().on_hand, 10);

        h.receiving.restock(receipt_id).unwrap();
        assert_eq!(h.inventory.level(h.product_id).unwrap().on_hand, 10);

        let ledger = ledger();
        catch_up(&ledger, &h.store).unwrap();
        assert_eq!(ledger.totals(h.product_id).quantity_in, 10);
        assert_eq!(ledger.totals(h.product_id).movements, 1);
    }

    /// B1: received day 1, expires day 30. B2: received day 2, expires day 10.
    fn two_batches(h: &Harness) -> (BatchId, BatchId) {
        let mut b1 = BatchIntake::new(h.product_id, 5, dec!(1.00));
        b1.occurred_at = day(1);
        b1.expiry_date = NaiveDate::from_ymd_opt(2026, 5, 30);
        let mut b2 = BatchIntake::new(h.product_id, 5, dec!(2.00));
        b2.occurred_at = day(2);
        b2.expiry_date = NaiveDate::from_ymd_opt(2026, 5, 10);
        (
            h.inventory.create_batch(b1).unwrap().unwrap(),
            h.inventory.create_batch(b2).unwrap().unwrap(),
        )
    }

    #[test]
    fn issuance_policies_pick_batches_in_order() {
        let cases = [
            (IssuancePolicy::Fifo, [(0, 5), (1, 2)], dec!(9.00)),
            (IssuancePolicy::Lifo, [(1, 5), (0, 2)], dec!(12.00)),
            (IssuancePolicy::Fefo, [(1, 5), (0, 2)], dec!(12.00)),
        ];

        for (policy, expected, cogs) in cases {
            let h = harness();
            let (b1, b2) = two_batches(&h);
            let ids = [b1, b2];

            let plan = h
                .inventory
                .allocate(
                    AllocationRequest::sale(h.product_id, 7)
                        .with_policy(policy)
                        .by(h.user)
                        .at(day(3)),
                )
                .unwrap();

            let got: Vec<_> = plan.lines.iter().map(|l| (l.batch_id, l.quantity)).collect();
            let want: Vec<_> = expected.iter().map(|(i, q)| (ids[*i], *q)).collect();
            assert_eq!(got, want, "{policy}");
            assert_eq!(plan.cost_of_goods(), cogs, "{policy}");

            let ledger = ledger();
            catch_up(&ledger, &h.store).unwrap();
            let sales = ledger.query(
                &MovementFilter {
                    product_id: Some(h.product_id),
                    movement_type: Some(MovementType::Sale),
                    ..MovementFilter::default()
                },
                Pagination::default(),
            );
            assert_eq!(sales.total, 2, "{policy}");
            assert_eq!(sales.items.iter().map(|m| m.quantity()).sum::<i64>(), 7);
        }
    }

    #[test]
    fn failed_allocation_leaves_no_trace() {
        let h = harness();
        two_batches(&h);
        let before = h.inventory.stock(h.product_id).unwrap();

        let err = h
            .inventory
            .allocate(AllocationRequest::sale(h.product_id, 11).at(day(3)))
            .unwrap_err();
        assert_eq!(err.domain(), Some(&DomainError::insufficient_stock(11, 10)));
        assert_eq!(h.inventory.stock(h.product_id).unwrap(), before);

        let ledger = ledger();
        catch_up(&ledger, &h.store).unwrap();
        assert_eq!(ledger.totals(h.product_id).quantity_out, 0);
    }

    #[test]
    fn repeated_allocation_operation_is_applied_once() {
        let h = harness();
        let batch_id = h
            .inventory
            .create_batch(BatchIntake::new(h.product_id, 10, dec!(1.00)))
            .unwrap()
            .unwrap();

        let operation_id = uuid::Uuid::now_v7();
        let mut request = AllocationRequest::sale(h.product_id, 3);
        request.operation_id = Some(operation_id);

        let first = h.inventory.allocate(request.clone()).unwrap();
        let second = h.inventory.allocate(request.clone()).unwrap();
        assert_eq!(second, first);

        let batches = h.inventory.batches(h.product_id).unwrap();
        let batch = batches.iter().find(|b| b.id_typed() == batch_id).unwrap();
        assert_eq!(batch.available_quantity(), 7);

        let ledger = ledger();
        catch_up(&ledger, &h.store).unwrap();
        assert_eq!(ledger.totals(h.product_id).quantity_out, 10 - batch.available_quantity());

        // Same key with a different quantity is a different request.
        request.quantity = 4;
        let err = h.inventory.allocate(request).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Conflict(_))));
        assert_eq!(h.inventory.level(h.product_id).unwrap().available, 7);
    }

    #[test]
    fn two_concurrent_sales_never_share_the_same_units() {
        let h = harness();
        h.inventory
            .create_batch(BatchIntake::new(h.product_id, 10, dec!(1.00)))
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let inventory = Arc::clone(&h.inventory);
                let barrier = Arc::clone(&barrier);
                let product_id = h.product_id;
                thread::spawn(move || {
                    barrier.wait();
                    inventory.allocate(AllocationRequest::sale(product_id, 6))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

        let committed: i64 = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|p| p.total_quantity())
            .sum();
        assert_eq!(committed, 6);
        assert!(results.iter().any(|r| matches!(
            r.as_ref().err().and_then(DispatchError::domain),
            Some(DomainError::InsufficientStock { requested: 6, available: 4 })
        )));
        assert_eq!(h.inventory.level(h.product_id).unwrap().available, 4);
    }

    #[test]
    fn many_concurrent_single_unit_sales_stop_at_zero() {
        let mut config = StockflowConfig::default();
        config.allocation.max_retries = 64;
        let h = harness_with(config);
        h.inventory
            .create_batch(BatchIntake::new(h.product_id, 10, dec!(1.00)))
            .unwrap();

        let barrier = Arc::new(Barrier::new(20));
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let inventory = Arc::clone(&h.inventory);
                let barrier = Arc::clone(&barrier);
                let product_id = h.product_id;
                thread::spawn(move || {
                    barrier.wait();
                    inventory.allocate(AllocationRequest::out(product_id, 1))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 10);
        assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
            e.domain(),
            Some(DomainError::InsufficientStock { .. })
        )));

        let level = h.inventory.level(h.product_id).unwrap();
        assert_eq!(level.on_hand, 10);
        assert_eq!(level.available, 0);
        assert!(level.is_low_stock);

        let ledger = ledger();
        catch_up(&ledger, &h.store).unwrap();
        assert_eq!(ledger.totals(h.product_id).quantity_out, 10);
    }

    #[test]
    fn directory_search_and_supplier_performance() {
        let h = harness();
        let (first, lines) = ordered_receipt(&h, &[(100, dec!(10.00))]);
        h.receiving
            .receive_goods(delivery(
                first,
                h.user,
                vec![LineReceipt {
                    line_no: lines[0],
                    received_quantity: 100,
                    accepted_quantity: 95,
                    rejected_quantity: 5,
                    ..LineReceipt::default()
                }],
            ))
            .unwrap();
        let (second, _) = ordered_receipt(&h, &[(3, dec!(1.00))]);

        let directory = ReceiptDirectoryProjection::new(Arc::new(
            InMemoryKeyedStore::<ReceiptId, PurchaseReceipt>::new(),
        ));
        rebuild(&directory, &h.store).unwrap();

        let ordered = directory.search(
            &ReceiptFilter {
                status: Some(ReceiptStatus::Ordered),
                ..ReceiptFilter::default()
            },
            Pagination::default(),
        );
        assert_eq!(ordered.total, 1);
        assert_eq!(ordered.items[0].id_typed(), second);

        let by_invoice = directory.search(
            &ReceiptFilter {
                text: Some("inv-5521".to_string()),
                ..ReceiptFilter::default()
            },
            Pagination::default(),
        );
        assert_eq!(by_invoice.total, 1);
        assert_eq!(by_invoice.items[0].id_typed(), first);

        let number = h.receiving.get(second).unwrap().receipt_number().unwrap().to_string();
        let by_number = directory.search(
            &ReceiptFilter {
                supplier_id: Some(h.supplier_id),
                text: Some(number),
                ..ReceiptFilter::default()
            },
            Pagination::default(),
        );
        assert_eq!(by_number.total, 1);

        let perf = directory.supplier_performance(h.supplier_id);
        assert_eq!(perf.receipts, 2);
        assert_eq!(perf.total_received, 100);
        assert_eq!(perf.total_accepted, 95);
        assert_eq!(perf.total_rejected, 5);
        assert_eq!(perf.acceptance_rate, Some(dec!(95.00)));
        assert_eq!(perf.dated_deliveries, 1);
        assert_eq!(perf.on_time_rate, Some(dec!(100.00)));
    }

    #[test]
    fn batch_index_follows_the_bus() {
        let h = harness();
        let index: Arc<BatchIndexProjection<Arc<InMemoryKeyedStore<BatchId, BatchView>>>> =
            Arc::new(BatchIndexProjection::new(Arc::new(InMemoryKeyedStore::new())));
        let worker = ProjectionWorker::spawn_projection(
            "batch-index",
            Arc::clone(&h.bus),
            Arc::clone(&index),
            Arc::clone(&h.store),
        )
        .unwrap();

        let other = ProductId::new(AggregateId::new());
        h.catalog.add_product(other, None);
        let mut intake = BatchIntake::new(other, 8, dec!(4.00));
        intake.lot_code = Some("LOT-Z".to_string());
        intake.supplier_id = Some(h.supplier_id);
        let batch_id = h.inventory.create_batch(intake).unwrap().unwrap();
        h.inventory
            .allocate(AllocationRequest::out(other, 3))
            .unwrap();

        thread::sleep(Duration::from_millis(100));
        worker.shutdown();

        let view = index.get(batch_id).unwrap();
        assert_eq!((view.quantity, view.available), (8, 5));
        assert_eq!(index.by_supplier(h.supplier_id).len(), 1);
        assert_eq!(index.by_lot("LOT-Z")[0].batch_id, batch_id);

        // A rebuilt index agrees with the live one.
        let rebuilt = BatchIndexProjection::new(Arc::new(InMemoryKeyedStore::new()));
        rebuild(&rebuilt, &h.store).unwrap();
        assert_eq!(rebuilt.get(batch_id), Some(view));
        assert_eq!(index.name(), "batch_index");
    }
}
