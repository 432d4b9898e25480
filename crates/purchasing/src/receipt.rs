use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, Entity, ProductId, SupplierId, UserId,
};
use stockflow_events::Event;
use stockflow_inventory::Reference;

use crate::number::ReceiptNumber;
use crate::totals::{Adjustments, Totals};

/// Purchase receipt identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptId(pub AggregateId);

impl ReceiptId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Receipt status lifecycle.
///
/// Order phase: draft, pending, approved, ordered. Receipt phase: partial,
/// received, completed. `cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Draft,
    Pending,
    Approved,
    Ordered,
    Received,
    Partial,
    Completed,
    Cancelled,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Draft => "draft",
            ReceiptStatus::Pending => "pending",
            ReceiptStatus::Approved => "approved",
            ReceiptStatus::Ordered => "ordered",
            ReceiptStatus::Received => "received",
            ReceiptStatus::Partial => "partial",
            ReceiptStatus::Completed => "completed",
            ReceiptStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_order_phase(&self) -> bool {
        matches!(
            self,
            ReceiptStatus::Draft
                | ReceiptStatus::Pending
                | ReceiptStatus::Approved
                | ReceiptStatus::Ordered
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReceiptStatus::Completed | ReceiptStatus::Cancelled)
    }

    fn lines_editable(&self) -> bool {
        matches!(self, ReceiptStatus::Draft | ReceiptStatus::Pending)
    }
}

impl core::fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ReceiptStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(ReceiptStatus::Draft),
            "pending" => Ok(ReceiptStatus::Pending),
            "approved" => Ok(ReceiptStatus::Approved),
            "ordered" => Ok(ReceiptStatus::Ordered),
            "received" => Ok(ReceiptStatus::Received),
            "partial" => Ok(ReceiptStatus::Partial),
            "completed" => Ok(ReceiptStatus::Completed),
            "cancelled" => Ok(ReceiptStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown receipt status: {other}"
            ))),
        }
    }
}

/// Inspection outcome of a received line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityStatus {
    #[default]
    Pending,
    Passed,
    Partial,
    Failed,
}

impl QualityStatus {
    /// Outcome implied by a disposition when the inspector did not state one.
    pub fn from_disposition(received: i64, accepted: i64) -> Self {
        if received == 0 {
            QualityStatus::Pending
        } else if accepted == received {
            QualityStatus::Passed
        } else if accepted == 0 {
            QualityStatus::Failed
        } else {
            QualityStatus::Partial
        }
    }
}

/// One receipt line: order side plus receipt side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptItem {
    pub line_no: u32,
    pub product_id: ProductId,
    pub ordered_quantity: i64,
    pub unit_price: Decimal,
    /// Line-level discount amount.
    pub discount: Decimal,
    /// Line-level tax amount.
    pub tax: Decimal,
    pub received_quantity: i64,
    pub accepted_quantity: i64,
    pub rejected_quantity: i64,
    pub damaged_quantity: i64,
    pub batch_number: Option<String>,
    pub manufacture_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub quality_status: QualityStatus,
    /// Set once, when the line is settled; a settled line is never touched again.
    pub stock_updated: bool,
}

impl ReceiptItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.ordered_quantity) - self.discount + self.tax
    }

    pub fn is_fully_received(&self) -> bool {
        self.received_quantity == self.ordered_quantity
    }

    /// Stock from this line has entered inventory.
    pub fn has_applied_stock(&self) -> bool {
        self.stock_updated && self.accepted_quantity > 0
    }
}

impl Entity for ReceiptItem {
    type Id = u32;

    fn id(&self) -> &Self::Id {
        &self.line_no
    }
}

/// Order-side header fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order_date: Option<NaiveDate>,
    pub expected_date: Option<NaiveDate>,
    pub reference: Option<String>,
    pub payment_terms: Option<String>,
    pub notes: Option<String>,
}

/// Receipt-side header fields, populated once goods arrive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryDetails {
    pub received_date: Option<NaiveDate>,
    pub delivery_note: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub quality_checked: bool,
    pub quality_notes: Option<String>,
}

impl DeliveryDetails {
    /// Fold a later delivery into this header. Fields already recorded win, so
    /// the first received date and invoice survive partial deliveries.
    pub fn merge(&mut self, later: &DeliveryDetails) {
        fn keep<T: Clone>(current: &mut Option<T>, later: &Option<T>) {
            if current.is_none() {
                current.clone_from(later);
            }
        }
        keep(&mut self.received_date, &later.received_date);
        keep(&mut self.delivery_note, &later.delivery_note);
        keep(&mut self.invoice_number, &later.invoice_number);
        keep(&mut self.invoice_date, &later.invoice_date);
        keep(&mut self.quality_notes, &later.quality_notes);
        self.quality_checked |= later.quality_checked;
    }
}

/// Who did what, and when.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTrail {
    pub created_by: Option<UserId>,
    pub created_at: Option<DateTime<Utc>>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub received_by: Option<UserId>,
    pub verified_by: Option<UserId>,
    pub verified_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<UserId>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
}

/// Aggregate root: PurchaseReceipt (combined purchase order and goods receipt).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseReceipt {
    id: ReceiptId,
    receipt_number: Option<ReceiptNumber>,
    supplier_id: Option<SupplierId>,
    status: ReceiptStatus,
    order: OrderDetails,
    delivery: DeliveryDetails,
    items: Vec<ReceiptItem>,
    next_line_no: u32,
    adjustments: Adjustments,
    currency: String,
    totals: Totals,
    audit: AuditTrail,
    version: u64,
    created: bool,
}

impl PurchaseReceipt {
    pub const AGGREGATE_TYPE: &'static str = "purchasing.receipt";

    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ReceiptId) -> Self {
        Self {
            id,
            receipt_number: None,
            supplier_id: None,
            status: ReceiptStatus::Draft,
            order: OrderDetails::default(),
            delivery: DeliveryDetails::default(),
            items: Vec::new(),
            next_line_no: 1,
            adjustments: Adjustments::default(),
            currency: String::new(),
            totals: Totals::default(),
            audit: AuditTrail::default(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ReceiptId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn receipt_number(&self) -> Option<&ReceiptNumber> {
        self.receipt_number.as_ref()
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn status(&self) -> ReceiptStatus {
        self.status
    }

    pub fn order(&self) -> &OrderDetails {
        &self.order
    }

    pub fn delivery(&self) -> &DeliveryDetails {
        &self.delivery
    }

    pub fn items(&self) -> &[ReceiptItem] {
        &self.items
    }

    pub fn item(&self, line_no: u32) -> Option<&ReceiptItem> {
        self.items.iter().find(|i| i.line_no == line_no)
    }

    pub fn adjustments(&self) -> &Adjustments {
        &self.adjustments
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn has_applied_stock(&self) -> bool {
        self.items.iter().any(ReceiptItem::has_applied_stock)
    }

    /// Stock applications for every settled line with accepted units.
    ///
    /// Rebuilt from committed state, so inventory can be brought back in line
    /// with the receipt after an interrupted receive.
    pub fn stock_applications(&self) -> Vec<StockApplication> {
        let Some(supplier_id) = self.supplier_id else {
            return Vec::new();
        };
        self.items
            .iter()
            .filter(|item| item.has_applied_stock())
            .map(|item| StockApplication {
                line_no: item.line_no,
                product_id: item.product_id,
                supplier_id,
                quantity: item.accepted_quantity,
                unit_cost: item.unit_price,
                lot_code: item.batch_number.clone(),
                manufacture_date: item.manufacture_date,
                expiry_date: item.expiry_date,
                reference: Reference::purchase_receipt_line(self.id, item.line_no),
            })
            .collect()
    }

    fn recompute_totals(&mut self) {
        let lines = self.items.iter().map(ReceiptItem::line_total);
        self.totals = Totals::compute(lines, &self.adjustments);
    }
}

impl AggregateRoot for PurchaseReceipt {
    type Id = ReceiptId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateReceipt (opens a draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReceipt {
    pub receipt_id: ReceiptId,
    pub receipt_number: ReceiptNumber,
    pub supplier_id: SupplierId,
    pub order: OrderDetails,
    pub currency: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem (draft or pending only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub receipt_id: ReceiptId,
    pub product_id: ProductId,
    pub ordered_quantity: i64,
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem (draft or pending only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub receipt_id: ReceiptId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetAdjustments (header discount, tax, shipping; until ordered).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAdjustments {
    pub receipt_id: ReceiptId,
    pub adjustments: Adjustments,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Submit (draft -> pending).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submit {
    pub receipt_id: ReceiptId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Approve (draft/pending -> approved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approve {
    pub receipt_id: ReceiptId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SendToSupplier (approved -> ordered).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendToSupplier {
    pub receipt_id: ReceiptId,
    pub occurred_at: DateTime<Utc>,
}

/// Per-line delivery data for `ReceiveGoods`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReceipt {
    pub line_no: u32,
    pub received_quantity: i64,
    pub accepted_quantity: i64,
    pub rejected_quantity: i64,
    pub damaged_quantity: i64,
    pub batch_number: Option<String>,
    pub manufacture_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub quality_status: Option<QualityStatus>,
}

impl LineReceipt {
    /// A line delivered and accepted in full.
    pub fn accepted(line_no: u32, quantity: i64) -> Self {
        Self {
            line_no,
            received_quantity: quantity,
            accepted_quantity: quantity,
            ..Self::default()
        }
    }

    /// Enforce `accepted + rejected + damaged <= received <= ordered`.
    fn validate(&self, ordered: i64) -> Result<(), DomainError> {
        let parts = [
            self.received_quantity,
            self.accepted_quantity,
            self.rejected_quantity,
            self.damaged_quantity,
        ];
        if parts.iter().any(|q| *q < 0) {
            return Err(DomainError::invalid_quantity(format!(
                "line {}: quantities cannot be negative",
                self.line_no
            )));
        }
        if self.received_quantity > ordered {
            return Err(DomainError::invalid_quantity(format!(
                "line {}: received {} exceeds ordered {}",
                self.line_no, self.received_quantity, ordered
            )));
        }
        let disposed = self.accepted_quantity + self.rejected_quantity + self.damaged_quantity;
        if disposed > self.received_quantity {
            return Err(DomainError::invalid_quantity(format!(
                "line {}: accepted + rejected + damaged ({}) exceeds received {}",
                self.line_no, disposed, self.received_quantity
            )));
        }
        Ok(())
    }
}

/// Command: ReceiveGoods (ordered/partial -> partial/received/completed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveGoods {
    pub receipt_id: ReceiptId,
    pub received_by: UserId,
    pub delivery: DeliveryDetails,
    pub lines: Vec<LineReceipt>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Verify (received -> completed; records the verifier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verify {
    pub receipt_id: ReceiptId,
    pub verified_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub receipt_id: ReceiptId,
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptCommand {
    CreateReceipt(CreateReceipt),
    AddItem(AddItem),
    RemoveItem(RemoveItem),
    SetAdjustments(SetAdjustments),
    Submit(Submit),
    Approve(Approve),
    SendToSupplier(SendToSupplier),
    ReceiveGoods(ReceiveGoods),
    Verify(Verify),
    Cancel(Cancel),
}

impl ReceiptCommand {
    pub fn receipt_id(&self) -> ReceiptId {
        match self {
            ReceiptCommand::CreateReceipt(c) => c.receipt_id,
            ReceiptCommand::AddItem(c) => c.receipt_id,
            ReceiptCommand::RemoveItem(c) => c.receipt_id,
            ReceiptCommand::SetAdjustments(c) => c.receipt_id,
            ReceiptCommand::Submit(c) => c.receipt_id,
            ReceiptCommand::Approve(c) => c.receipt_id,
            ReceiptCommand::SendToSupplier(c) => c.receipt_id,
            ReceiptCommand::ReceiveGoods(c) => c.receipt_id,
            ReceiptCommand::Verify(c) => c.receipt_id,
            ReceiptCommand::Cancel(c) => c.receipt_id,
        }
    }
}

/// Event: ReceiptCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptCreated {
    pub receipt_id: ReceiptId,
    pub receipt_number: ReceiptNumber,
    pub supplier_id: SupplierId,
    pub order: OrderDetails,
    pub currency: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub receipt_id: ReceiptId,
    pub item: ReceiptItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub receipt_id: ReceiptId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AdjustmentsSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentsSet {
    pub receipt_id: ReceiptId,
    pub adjustments: Adjustments,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a plain status transition (submitted, sent to supplier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub receipt_id: ReceiptId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptApproved {
    pub receipt_id: ReceiptId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Stock to bring into inventory for one settled line.
///
/// The `reference` makes the stock-in idempotent on the inventory side as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockApplication {
    pub line_no: u32,
    pub product_id: ProductId,
    pub supplier_id: SupplierId,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub lot_code: Option<String>,
    pub manufacture_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub reference: Reference,
}

/// Event: GoodsReceived.
///
/// Carries the settled lines and the stock applications the receiving service
/// turns into inventory commands once this event is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceived {
    pub receipt_id: ReceiptId,
    pub received_by: UserId,
    pub delivery: DeliveryDetails,
    pub settled: Vec<LineReceipt>,
    pub stock_applications: Vec<StockApplication>,
    pub status: ReceiptStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptVerified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptVerified {
    pub receipt_id: ReceiptId,
    pub verified_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptCancelled {
    pub receipt_id: ReceiptId,
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptEvent {
    ReceiptCreated(ReceiptCreated),
    ItemAdded(ItemAdded),
    ItemRemoved(ItemRemoved),
    AdjustmentsSet(AdjustmentsSet),
    ReceiptSubmitted(StatusChanged),
    ReceiptApproved(ReceiptApproved),
    ReceiptSentToSupplier(StatusChanged),
    GoodsReceived(GoodsReceived),
    ReceiptVerified(ReceiptVerified),
    ReceiptCancelled(ReceiptCancelled),
}

impl ReceiptEvent {
    pub fn receipt_id(&self) -> ReceiptId {
        match self {
            ReceiptEvent::ReceiptCreated(e) => e.receipt_id,
            ReceiptEvent::ItemAdded(e) => e.receipt_id,
            ReceiptEvent::ItemRemoved(e) => e.receipt_id,
            ReceiptEvent::AdjustmentsSet(e) => e.receipt_id,
            ReceiptEvent::ReceiptSubmitted(e) | ReceiptEvent::ReceiptSentToSupplier(e) => {
                e.receipt_id
            }
            ReceiptEvent::ReceiptApproved(e) => e.receipt_id,
            ReceiptEvent::GoodsReceived(e) => e.receipt_id,
            ReceiptEvent::ReceiptVerified(e) => e.receipt_id,
            ReceiptEvent::ReceiptCancelled(e) => e.receipt_id,
        }
    }
}

impl Event for ReceiptEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReceiptEvent::ReceiptCreated(_) => "purchasing.receipt.created",
            ReceiptEvent::ItemAdded(_) => "purchasing.receipt.item_added",
            ReceiptEvent::ItemRemoved(_) => "purchasing.receipt.item_removed",
            ReceiptEvent::AdjustmentsSet(_) => "purchasing.receipt.adjustments_set",
            ReceiptEvent::ReceiptSubmitted(_) => "purchasing.receipt.submitted",
            ReceiptEvent::ReceiptApproved(_) => "purchasing.receipt.approved",
            ReceiptEvent::ReceiptSentToSupplier(_) => "purchasing.receipt.sent_to_supplier",
            ReceiptEvent::GoodsReceived(_) => "purchasing.receipt.goods_received",
            ReceiptEvent::ReceiptVerified(_) => "purchasing.receipt.verified",
            ReceiptEvent::ReceiptCancelled(_) => "purchasing.receipt.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReceiptEvent::ReceiptCreated(e) => e.occurred_at,
            ReceiptEvent::ItemAdded(e) => e.occurred_at,
            ReceiptEvent::ItemRemoved(e) => e.occurred_at,
            ReceiptEvent::AdjustmentsSet(e) => e.occurred_at,
            ReceiptEvent::ReceiptSubmitted(e) | ReceiptEvent::ReceiptSentToSupplier(e) => {
                e.occurred_at
            }
            ReceiptEvent::ReceiptApproved(e) => e.occurred_at,
            ReceiptEvent::GoodsReceived(e) => e.occurred_at,
            ReceiptEvent::ReceiptVerified(e) => e.occurred_at,
            ReceiptEvent::ReceiptCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseReceipt {
    type Command = ReceiptCommand;
    type Event = ReceiptEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReceiptEvent::ReceiptCreated(e) => {
                self.id = e.receipt_id;
                self.receipt_number = Some(e.receipt_number.clone());
                self.supplier_id = Some(e.supplier_id);
                self.status = ReceiptStatus::Draft;
                self.order = e.order.clone();
                self.currency = e.currency.clone();
                self.items.clear();
                self.next_line_no = 1;
                self.audit.created_by = Some(e.created_by);
                self.audit.created_at = Some(e.occurred_at);
                self.created = true;
            }
            ReceiptEvent::ItemAdded(e) => {
                self.next_line_no = self.next_line_no.max(e.item.line_no + 1);
                self.items.push(e.item.clone());
            }
            ReceiptEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.line_no != e.line_no);
            }
            ReceiptEvent::AdjustmentsSet(e) => {
                self.adjustments = e.adjustments.clone();
            }
            ReceiptEvent::ReceiptSubmitted(_) => {
                self.status = ReceiptStatus::Pending;
            }
            ReceiptEvent::ReceiptApproved(e) => {
                self.status = ReceiptStatus::Approved;
                self.audit.approved_by = Some(e.approved_by);
                self.audit.approved_at = Some(e.occurred_at);
            }
            ReceiptEvent::ReceiptSentToSupplier(_) => {
                self.status = ReceiptStatus::Ordered;
            }
            ReceiptEvent::GoodsReceived(e) => {
                for line in &e.settled {
                    if let Some(item) = self.items.iter_mut().find(|i| i.line_no == line.line_no) {
                        item.received_quantity = line.received_quantity;
                        item.accepted_quantity = line.accepted_quantity;
                        item.rejected_quantity = line.rejected_quantity;
                        item.damaged_quantity = line.damaged_quantity;
                        item.batch_number = line.batch_number.clone();
                        item.manufacture_date = line.manufacture_date;
                        item.expiry_date = line.expiry_date;
                        item.quality_status = line.quality_status.unwrap_or_else(|| {
                            QualityStatus::from_disposition(
                                line.received_quantity,
                                line.accepted_quantity,
                            )
                        });
                        item.stock_updated = true;
                    }
                }
                self.delivery.merge(&e.delivery);
                self.audit.received_by = Some(e.received_by);
                self.status = e.status;
            }
            ReceiptEvent::ReceiptVerified(e) => {
                self.status = ReceiptStatus::Completed;
                self.audit.verified_by = Some(e.verified_by);
                self.audit.verified_at = Some(e.occurred_at);
            }
            ReceiptEvent::ReceiptCancelled(e) => {
                self.status = ReceiptStatus::Cancelled;
                self.audit.cancelled_by = Some(e.cancelled_by);
                self.audit.cancelled_at = Some(e.occurred_at);
                self.audit.cancel_reason = e.reason.clone();
            }
        }

        self.recompute_totals();

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        self.ensure_receipt_id(command.receipt_id())?;
        match command {
            ReceiptCommand::CreateReceipt(cmd) => self.handle_create(cmd),
            ReceiptCommand::AddItem(cmd) => self.handle_add_item(cmd),
            ReceiptCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            ReceiptCommand::SetAdjustments(cmd) => self.handle_set_adjustments(cmd),
            ReceiptCommand::Submit(cmd) => self.handle_submit(cmd),
            ReceiptCommand::Approve(cmd) => self.handle_approve(cmd),
            ReceiptCommand::SendToSupplier(cmd) => self.handle_send(cmd),
            ReceiptCommand::ReceiveGoods(cmd) => self.handle_receive(cmd),
            ReceiptCommand::Verify(cmd) => self.handle_verify(cmd),
            ReceiptCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PurchaseReceipt {
    fn ensure_receipt_id(&self, receipt_id: ReceiptId) -> Result<(), DomainError> {
        if self.id != receipt_id {
            return Err(DomainError::invariant("receipt_id mismatch"));
        }
        Ok(())
    }

    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("receipt {}", self.id)));
        }
        Ok(())
    }

    fn refuse(&self, action: &str) -> DomainError {
        DomainError::invalid_transition(self.status, action)
    }

    fn handle_create(&self, cmd: &CreateReceipt) -> Result<Vec<ReceiptEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase receipt already exists"));
        }
        let currency = cmd.currency.trim().to_ascii_uppercase();
        if currency.is_empty() {
            return Err(DomainError::validation("currency is required"));
        }
        if let (Some(ordered), Some(expected)) = (cmd.order.order_date, cmd.order.expected_date) {
            if expected < ordered {
                return Err(DomainError::validation(
                    "expected date cannot precede order date",
                ));
            }
        }

        Ok(vec![ReceiptEvent::ReceiptCreated(ReceiptCreated {
            receipt_id: cmd.receipt_id,
            receipt_number: cmd.receipt_number.clone(),
            supplier_id: cmd.supplier_id,
            order: cmd.order.clone(),
            currency,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_created()?;
        if !self.status.lines_editable() {
            return Err(self.refuse("add item"));
        }
        if cmd.ordered_quantity <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "ordered quantity must be positive (got {})",
                cmd.ordered_quantity
            )));
        }
        if cmd.unit_price.is_sign_negative()
            || cmd.discount.is_sign_negative()
            || cmd.tax.is_sign_negative()
        {
            return Err(DomainError::validation(
                "unit price, discount and tax cannot be negative",
            ));
        }
        if cmd.discount > cmd.unit_price * Decimal::from(cmd.ordered_quantity) {
            return Err(DomainError::validation(
                "line discount cannot exceed the line amount",
            ));
        }

        Ok(vec![ReceiptEvent::ItemAdded(ItemAdded {
            receipt_id: self.id,
            item: ReceiptItem {
                line_no: self.next_line_no,
                product_id: cmd.product_id,
                ordered_quantity: cmd.ordered_quantity,
                unit_price: cmd.unit_price,
                discount: cmd.discount,
                tax: cmd.tax,
                received_quantity: 0,
                accepted_quantity: 0,
                rejected_quantity: 0,
                damaged_quantity: 0,
                batch_number: None,
                manufacture_date: None,
                expiry_date: None,
                quality_status: QualityStatus::Pending,
                stock_updated: false,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_created()?;
        if !self.status.lines_editable() {
            return Err(self.refuse("remove item"));
        }
        if self.item(cmd.line_no).is_none() {
            return Err(DomainError::not_found(format!("receipt line {}", cmd.line_no)));
        }

        Ok(vec![ReceiptEvent::ItemRemoved(ItemRemoved {
            receipt_id: self.id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_adjustments(
        &self,
        cmd: &SetAdjustments,
    ) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_created()?;
        if !matches!(
            self.status,
            ReceiptStatus::Draft | ReceiptStatus::Pending | ReceiptStatus::Approved
        ) {
            return Err(self.refuse("set adjustments"));
        }
        cmd.adjustments.validate()?;

        Ok(vec![ReceiptEvent::AdjustmentsSet(AdjustmentsSet {
            receipt_id: self.id,
            adjustments: cmd.adjustments.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &Submit) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_created()?;
        if self.status != ReceiptStatus::Draft {
            return Err(self.refuse("submit"));
        }
        if self.items.is_empty() {
            return Err(DomainError::validation("cannot submit a receipt without items"));
        }

        Ok(vec![ReceiptEvent::ReceiptSubmitted(StatusChanged {
            receipt_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &Approve) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_created()?;
        if !matches!(self.status, ReceiptStatus::Draft | ReceiptStatus::Pending) {
            return Err(self.refuse("approve"));
        }
        if self.items.is_empty() {
            return Err(DomainError::validation("cannot approve a receipt without items"));
        }

        Ok(vec![ReceiptEvent::ReceiptApproved(ReceiptApproved {
            receipt_id: self.id,
            approved_by: cmd.approved_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_send(&self, cmd: &SendToSupplier) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_created()?;
        if self.status != ReceiptStatus::Approved {
            return Err(self.refuse("send to supplier"));
        }

        Ok(vec![ReceiptEvent::ReceiptSentToSupplier(StatusChanged {
            receipt_id: self.id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveGoods) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_created()?;
        if !matches!(self.status, ReceiptStatus::Ordered | ReceiptStatus::Partial) {
            return Err(self.refuse("receive goods"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("no lines to receive"));
        }

        let mut seen = BTreeSet::new();
        let mut settled = Vec::new();
        for line in &cmd.lines {
            if !seen.insert(line.line_no) {
                return Err(DomainError::validation(format!(
                    "line {} listed more than once",
                    line.line_no
                )));
            }
            let item = self
                .item(line.line_no)
                .ok_or_else(|| DomainError::not_found(format!("receipt line {}", line.line_no)))?;
            line.validate(item.ordered_quantity)?;

            // Settled lines are frozen; nothing delivered means nothing to settle yet.
            if item.stock_updated || line.received_quantity == 0 {
                continue;
            }
            settled.push((item, line));
        }

        if settled.is_empty() {
            return Ok(vec![]);
        }

        let supplier_id = self
            .supplier_id
            .ok_or_else(|| DomainError::invariant("supplier must be set"))?;

        let stock_applications = settled
            .iter()
            .filter(|(_, line)| line.accepted_quantity > 0)
            .map(|(item, line)| StockApplication {
                line_no: item.line_no,
                product_id: item.product_id,
                supplier_id,
                quantity: line.accepted_quantity,
                unit_cost: item.unit_price,
                lot_code: line.batch_number.clone(),
                manufacture_date: line.manufacture_date,
                expiry_date: line.expiry_date,
                reference: Reference::purchase_receipt_line(self.id, item.line_no),
            })
            .collect();

        let status = self.status_after(&settled);
        let settled = settled.into_iter().map(|(_, line)| line.clone()).collect();

        Ok(vec![ReceiptEvent::GoodsReceived(GoodsReceived {
            receipt_id: self.id,
            received_by: cmd.received_by,
            delivery: cmd.delivery.clone(),
            settled,
            stock_applications,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Status once `settling` lines are settled on top of the current state.
    fn status_after(&self, settling: &[(&ReceiptItem, &LineReceipt)]) -> ReceiptStatus {
        let mut all_settled = true;
        let mut all_full = true;
        for item in &self.items {
            let incoming = settling.iter().find(|(i, _)| i.line_no == item.line_no);
            let (settled, received) = match incoming {
                Some((_, line)) => (true, line.received_quantity),
                None => (item.stock_updated, item.received_quantity),
            };
            all_settled &= settled;
            all_full &= settled && received == item.ordered_quantity;
        }

        match (all_settled, all_full) {
            (true, true) => ReceiptStatus::Completed,
            (true, false) => ReceiptStatus::Received,
            _ => ReceiptStatus::Partial,
        }
    }

    fn handle_verify(&self, cmd: &Verify) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_created()?;
        let allowed = match self.status {
            ReceiptStatus::Received => true,
            ReceiptStatus::Completed => self.audit.verified_by.is_none(),
            _ => false,
        };
        if !allowed {
            return Err(self.refuse("verify"));
        }

        Ok(vec![ReceiptEvent::ReceiptVerified(ReceiptVerified {
            receipt_id: self.id,
            verified_by: cmd.verified_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &Cancel) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_created()?;
        if self.status.is_terminal() {
            return Err(self.refuse("cancel"));
        }
        if self.has_applied_stock() {
            return Err(self.refuse("cancel after stock was applied"));
        }

        Ok(vec![ReceiptEvent::ReceiptCancelled(ReceiptCancelled {
            receipt_id: self.id,
            cancelled_by: cmd.cancelled_by,
            reason: cmd.reason.as_ref().map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use stockflow_events::execute;

    use crate::totals::Discount;

    fn test_receipt_id() -> ReceiptId {
        ReceiptId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap()
    }

    fn number() -> ReceiptNumber {
        ReceiptNumber::new("PR", test_time().date_naive(), 1).unwrap()
    }

    fn create(receipt: &mut PurchaseReceipt) {
        let cmd = CreateReceipt {
            receipt_id: receipt.id_typed(),
            receipt_number: number(),
            supplier_id: SupplierId::new(AggregateId::new()),
            order: OrderDetails::default(),
            currency: "usd".to_string(),
            created_by: UserId::new(),
            occurred_at: test_time(),
        };
        execute(receipt, &ReceiptCommand::CreateReceipt(cmd)).unwrap();
    }

    fn add_item(receipt: &mut PurchaseReceipt, quantity: i64, price: Decimal) -> ProductId {
        let product_id = ProductId::new(AggregateId::new());
        let cmd = AddItem {
            receipt_id: receipt.id_typed(),
            product_id,
            ordered_quantity: quantity,
            unit_price: price,
            discount: Decimal::ZERO,
            tax: Decimal::ZERO,
            occurred_at: test_time(),
        };
        execute(receipt, &ReceiptCommand::AddItem(cmd)).unwrap();
        product_id
    }

    fn ordered(lines: &[(i64, Decimal)]) -> PurchaseReceipt {
        let mut receipt = PurchaseReceipt::empty(test_receipt_id());
        create(&mut receipt);
        for (q, p) in lines {
            add_item(&mut receipt, *q, *p);
        }
        let id = receipt.id_typed();
        execute(
            &mut receipt,
            &ReceiptCommand::Approve(Approve {
                receipt_id: id,
                approved_by: UserId::new(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        execute(
            &mut receipt,
            &ReceiptCommand::SendToSupplier(SendToSupplier {
                receipt_id: id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        receipt
    }

    fn receive(receipt_id: ReceiptId, lines: Vec<LineReceipt>) -> ReceiptCommand {
        ReceiptCommand::ReceiveGoods(ReceiveGoods {
            receipt_id,
            received_by: UserId::new(),
            delivery: DeliveryDetails {
                received_date: Some(test_time().date_naive()),
                ..DeliveryDetails::default()
            },
            lines,
            occurred_at: test_time(),
        })
    }

    fn line(line_no: u32, received: i64, accepted: i64, rejected: i64) -> LineReceipt {
        LineReceipt {
            line_no,
            received_quantity: received,
            accepted_quantity: accepted,
            rejected_quantity: rejected,
            ..LineReceipt::default()
        }
    }

    #[test]
    fn create_emits_receipt_created_with_normalised_currency() {
        let receipt = PurchaseReceipt::empty(test_receipt_id());
        let cmd = CreateReceipt {
            receipt_id: receipt.id_typed(),
            receipt_number: number(),
            supplier_id: SupplierId::new(AggregateId::new()),
            order: OrderDetails::default(),
            currency: " eur ".to_string(),
            created_by: UserId::new(),
            occurred_at: test_time(),
        };

        let events = receipt.handle(&ReceiptCommand::CreateReceipt(cmd)).unwrap();
        match &events[0] {
            ReceiptEvent::ReceiptCreated(e) => assert_eq!(e.currency, "EUR"),
            _ => panic!("Expected ReceiptCreated event"),
        }
    }

    #[test]
    fn draft_rejects_receive_goods() {
        let mut receipt = PurchaseReceipt::empty(test_receipt_id());
        create(&mut receipt);
        add_item(&mut receipt, 10, dec!(1));

        let err = receipt
            .handle(&receive(receipt.id_typed(), vec![line(1, 10, 10, 0)]))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn full_receipt_with_rejections_completes() {
        let mut receipt = ordered(&[(100, dec!(10.00))]);
        let id = receipt.id_typed();

        let events = execute(&mut receipt, &receive(id, vec![line(1, 100, 95, 5)])).unwrap();

        let ReceiptEvent::GoodsReceived(e) = &events[0] else {
            panic!("Expected GoodsReceived event");
        };
        assert_eq!(e.status, ReceiptStatus::Completed);
        assert_eq!(e.stock_applications.len(), 1);
        assert_eq!(e.stock_applications[0].quantity, 95);
        assert_eq!(e.stock_applications[0].unit_cost, dec!(10.00));
        assert_eq!(
            e.stock_applications[0].reference,
            Reference::purchase_receipt_line(id, 1)
        );

        assert_eq!(receipt.status(), ReceiptStatus::Completed);
        let item = receipt.item(1).unwrap();
        assert!(item.stock_updated);
        assert_eq!(item.quality_status, QualityStatus::Partial);
    }

    #[test]
    fn partial_then_complete_and_idempotent_replay() {
        let mut receipt = ordered(&[(10, dec!(2)), (4, dec!(3))]);
        let id = receipt.id_typed();

        execute(&mut receipt, &receive(id, vec![line(1, 10, 10, 0)])).unwrap();
        assert_eq!(receipt.status(), ReceiptStatus::Partial);

        // Same delivery again: line 1 is frozen.
        let again = receipt.handle(&receive(id, vec![line(1, 10, 10, 0)])).unwrap();
        assert!(again.is_empty());

        execute(&mut receipt, &receive(id, vec![line(2, 4, 4, 0)])).unwrap();
        assert_eq!(receipt.status(), ReceiptStatus::Completed);
    }

    #[test]
    fn later_deliveries_keep_first_delivery_header() {
        let mut receipt = ordered(&[(10, dec!(2)), (4, dec!(3))]);
        let id = receipt.id_typed();
        let first_day = test_time().date_naive();

        let mut first = ReceiveGoods {
            receipt_id: id,
            received_by: UserId::new(),
            delivery: DeliveryDetails {
                received_date: Some(first_day),
                invoice_number: Some("INV-1".to_string()),
                delivery_note: Some("DN-1".to_string()),
                ..DeliveryDetails::default()
            },
            lines: vec![line(1, 10, 10, 0)],
            occurred_at: test_time(),
        };
        execute(&mut receipt, &ReceiptCommand::ReceiveGoods(first.clone())).unwrap();

        first.delivery = DeliveryDetails {
            received_date: first_day.succ_opt(),
            invoice_date: first_day.succ_opt(),
            quality_checked: true,
            ..DeliveryDetails::default()
        };
        first.lines = vec![line(2, 4, 4, 0)];
        execute(&mut receipt, &ReceiptCommand::ReceiveGoods(first)).unwrap();

        let header = receipt.delivery();
        assert_eq!(header.received_date, Some(first_day));
        assert_eq!(header.invoice_number.as_deref(), Some("INV-1"));
        assert_eq!(header.delivery_note.as_deref(), Some("DN-1"));
        assert_eq!(header.invoice_date, first_day.succ_opt());
        assert!(header.quality_checked);
    }

    #[test]
    fn stock_applications_rebuilt_from_settled_lines() {
        let mut receipt = ordered(&[(10, dec!(2)), (4, dec!(3)), (6, dec!(1))]);
        let id = receipt.id_typed();

        let events = execute(
            &mut receipt,
            &receive(id, vec![line(1, 10, 8, 2), line(2, 4, 0, 4)]),
        )
        .unwrap();
        let ReceiptEvent::GoodsReceived(e) = &events[0] else {
            panic!("Expected GoodsReceived event");
        };

        // Line 2 accepted nothing and line 3 is still open.
        assert_eq!(receipt.stock_applications(), e.stock_applications);
        assert_eq!(receipt.stock_applications().len(), 1);
        assert_eq!(receipt.stock_applications()[0].quantity, 8);
    }

    #[test]
    fn short_delivery_is_received_until_verified() {
        let mut receipt = ordered(&[(10, dec!(2))]);
        let id = receipt.id_typed();

        execute(&mut receipt, &receive(id, vec![line(1, 8, 8, 0)])).unwrap();
        assert_eq!(receipt.status(), ReceiptStatus::Received);

        let verifier = UserId::new();
        execute(
            &mut receipt,
            &ReceiptCommand::Verify(Verify {
                receipt_id: id,
                verified_by: verifier,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(receipt.status(), ReceiptStatus::Completed);
        assert_eq!(receipt.audit().verified_by, Some(verifier));
    }

    #[test]
    fn fully_rejected_line_settles_without_stock() {
        let mut receipt = ordered(&[(5, dec!(2))]);
        let id = receipt.id_typed();

        let events = execute(&mut receipt, &receive(id, vec![line(1, 5, 0, 5)])).unwrap();
        let ReceiptEvent::GoodsReceived(e) = &events[0] else {
            panic!("Expected GoodsReceived event");
        };
        assert!(e.stock_applications.is_empty());
        assert_eq!(receipt.item(1).unwrap().quality_status, QualityStatus::Failed);
        assert!(!receipt.has_applied_stock());
    }

    #[test]
    fn rejects_disposition_exceeding_received() {
        let receipt = ordered(&[(10, dec!(2))]);
        let id = receipt.id_typed();

        let over_ordered = receipt.handle(&receive(id, vec![line(1, 11, 11, 0)]));
        assert!(matches!(over_ordered, Err(DomainError::InvalidQuantity(_))));

        let over_received = receipt.handle(&receive(id, vec![line(1, 5, 4, 2)]));
        assert!(matches!(over_received, Err(DomainError::InvalidQuantity(_))));

        let unknown = receipt.handle(&receive(id, vec![line(9, 1, 1, 0)]));
        assert!(matches!(unknown, Err(DomainError::NotFound(_))));
    }

    #[test]
    fn cancel_refused_once_stock_applied() {
        let mut receipt = ordered(&[(10, dec!(2)), (3, dec!(1))]);
        let id = receipt.id_typed();
        execute(&mut receipt, &receive(id, vec![line(1, 10, 10, 0)])).unwrap();

        let err = receipt
            .handle(&ReceiptCommand::Cancel(Cancel {
                receipt_id: id,
                cancelled_by: UserId::new(),
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn cancel_from_order_phase_records_actor_and_reason() {
        let mut receipt = ordered(&[(10, dec!(2))]);
        let id = receipt.id_typed();
        let who = UserId::new();

        execute(
            &mut receipt,
            &ReceiptCommand::Cancel(Cancel {
                receipt_id: id,
                cancelled_by: who,
                reason: Some(" supplier out of stock ".to_string()),
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(receipt.status(), ReceiptStatus::Cancelled);
        assert_eq!(receipt.audit().cancelled_by, Some(who));
        assert_eq!(
            receipt.audit().cancel_reason.as_deref(),
            Some("supplier out of stock")
        );
        assert!(
            receipt
                .handle(&receive(id, vec![line(1, 1, 1, 0)]))
                .is_err()
        );
    }

    #[test]
    fn order_phase_guards() {
        let mut receipt = PurchaseReceipt::empty(test_receipt_id());
        create(&mut receipt);
        let id = receipt.id_typed();

        // Nothing to approve yet.
        let err = receipt
            .handle(&ReceiptCommand::Approve(Approve {
                receipt_id: id,
                approved_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        // Cannot send an unapproved order.
        let err = receipt
            .handle(&ReceiptCommand::SendToSupplier(SendToSupplier {
                receipt_id: id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));

        add_item(&mut receipt, 2, dec!(5));
        execute(
            &mut receipt,
            &ReceiptCommand::Submit(Submit {
                receipt_id: id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(receipt.status(), ReceiptStatus::Pending);
        add_item(&mut receipt, 1, dec!(5));
        assert_eq!(receipt.items().len(), 2);
    }

    #[test]
    fn lines_frozen_after_approval() {
        let receipt = ordered(&[(1, dec!(1))]);
        let err = receipt
            .handle(&ReceiptCommand::RemoveItem(RemoveItem {
                receipt_id: receipt.id_typed(),
                line_no: 1,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn totals_follow_items_and_adjustments() {
        let mut receipt = PurchaseReceipt::empty(test_receipt_id());
        create(&mut receipt);
        add_item(&mut receipt, 10, dec!(20));
        add_item(&mut receipt, 5, dec!(40));
        let id = receipt.id_typed();

        execute(
            &mut receipt,
            &ReceiptCommand::SetAdjustments(SetAdjustments {
                receipt_id: id,
                adjustments: Adjustments {
                    discount: Some(Discount::Percentage(dec!(10))),
                    tax: dec!(36),
                    shipping: dec!(15),
                },
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(receipt.totals().sub_total, dec!(400));
        assert_eq!(receipt.totals().total, dec!(411));

        execute(
            &mut receipt,
            &ReceiptCommand::RemoveItem(RemoveItem {
                receipt_id: id,
                line_no: 2,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(receipt.totals().sub_total, dec!(200));
        assert_eq!(receipt.totals().total, dec!(231));

        // Line numbers are never reused.
        add_item(&mut receipt, 1, dec!(1));
        assert!(receipt.item(3).is_some());
    }
}
