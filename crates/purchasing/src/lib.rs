//! Purchasing domain module (Purchase Receipts, event-sourced).
//!
//! A purchase receipt is a purchase order and its goods receipt in one
//! aggregate: order-phase editing and approval, then receiving with per-line
//! disposition. Settled lines produce stock applications for the inventory
//! domain. Pure, deterministic domain logic (no IO, no storage).

pub mod number;
pub mod receipt;
pub mod totals;

pub use number::ReceiptNumber;
pub use receipt::{
    AddItem, AdjustmentsSet, Approve, AuditTrail, Cancel, CreateReceipt, DeliveryDetails,
    GoodsReceived, ItemAdded, ItemRemoved, LineReceipt, OrderDetails, PurchaseReceipt,
    QualityStatus, ReceiptApproved, ReceiptCancelled, ReceiptCommand, ReceiptCreated,
    ReceiptEvent, ReceiptId, ReceiptItem, ReceiptStatus, ReceiptVerified, ReceiveGoods,
    RemoveItem, SendToSupplier, SetAdjustments, StatusChanged, StockApplication, Submit, Verify,
};
pub use totals::{Adjustments, Discount, Totals};
