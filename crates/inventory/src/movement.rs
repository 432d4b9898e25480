use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_core::{DomainError, DomainResult, ProductId, UserId};

use crate::batch::BatchId;

/// Ledger entry identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(pub Uuid);

impl MovementId {
    /// Deterministic id for the `index`-th movement of one logical operation.
    ///
    /// Replaying the same command yields the same ids, which keeps aggregate
    /// decisions pure.
    pub fn derive(operation_id: Uuid, index: u32) -> Self {
        Self(Uuid::new_v5(&operation_id, &index.to_be_bytes()))
    }
}

impl core::fmt::Display for MovementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Kind of quantity change recorded in the ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    In,
    Out,
    Transfer,
    Adjustment,
    Sale,
    Return,
    Damage,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Transfer => "TRANSFER",
            MovementType::Adjustment => "ADJUSTMENT",
            MovementType::Sale => "SALE",
            MovementType::Return => "RETURN",
            MovementType::Damage => "DAMAGE",
        }
    }

    pub fn is_incoming(&self) -> bool {
        matches!(self, MovementType::In | MovementType::Return)
    }

    pub fn is_outgoing(&self) -> bool {
        matches!(self, MovementType::Out | MovementType::Sale | MovementType::Damage)
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" => Ok(MovementType::In),
            "OUT" => Ok(MovementType::Out),
            "TRANSFER" => Ok(MovementType::Transfer),
            "ADJUSTMENT" => Ok(MovementType::Adjustment),
            "SALE" => Ok(MovementType::Sale),
            "RETURN" => Ok(MovementType::Return),
            "DAMAGE" => Ok(MovementType::Damage),
            other => Err(DomainError::validation(format!(
                "unknown movement type: {other}"
            ))),
        }
    }
}

/// Whether a movement added to or removed from stock.
///
/// Fixed by the type for everything except ADJUSTMENT and TRANSFER, whose
/// magnitude alone does not say which way stock moved.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Origin of a movement (e.g. `purchase_receipt` / `<receipt>#<line>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    pub reference_type: String,
    pub reference_id: String,
}

impl Reference {
    pub const PURCHASE_RECEIPT: &'static str = "purchase_receipt";

    pub fn new(reference_type: impl Into<String>, reference_id: impl Into<String>) -> Self {
        Self {
            reference_type: reference_type.into(),
            reference_id: reference_id.into(),
        }
    }

    /// Reference for the stock-in of one receipt line.
    pub fn purchase_receipt_line(receipt_id: impl core::fmt::Display, line_no: u32) -> Self {
        Self::new(Self::PURCHASE_RECEIPT, format!("{receipt_id}#{line_no}"))
    }
}

/// Who/why metadata attached to every ledger entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub reference: Option<Reference>,
    pub user_id: Option<UserId>,
    pub notes: Option<String>,
}

impl Provenance {
    pub fn by(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// One append-only ledger entry.
///
/// `quantity` is a positive magnitude and `total_cost = unit_cost × quantity`
/// is fixed at creation. Entries are never edited; corrections are new entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    id: MovementId,
    product_id: ProductId,
    batch_id: Option<BatchId>,
    movement_type: MovementType,
    direction: Direction,
    quantity: i64,
    unit_cost: Decimal,
    total_cost: Decimal,
    reference: Option<Reference>,
    user_id: Option<UserId>,
    notes: Option<String>,
    occurred_at: DateTime<Utc>,
}

/// Fields needed to record a movement.
#[derive(Debug, Clone)]
pub struct MovementDraft<'a> {
    pub id: MovementId,
    pub product_id: ProductId,
    pub batch_id: Option<BatchId>,
    pub movement_type: MovementType,
    pub direction: Direction,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub provenance: &'a Provenance,
    pub occurred_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn record(draft: MovementDraft<'_>) -> DomainResult<Self> {
        if draft.quantity <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "movement quantity must be positive (got {})",
                draft.quantity
            )));
        }
        let consistent = match draft.direction {
            Direction::Incoming => !draft.movement_type.is_outgoing(),
            Direction::Outgoing => !draft.movement_type.is_incoming(),
        };
        if !consistent {
            return Err(DomainError::invariant(format!(
                "{} movement cannot be {:?}",
                draft.movement_type, draft.direction
            )));
        }

        Ok(Self {
            id: draft.id,
            product_id: draft.product_id,
            batch_id: draft.batch_id,
            movement_type: draft.movement_type,
            direction: draft.direction,
            quantity: draft.quantity,
            unit_cost: draft.unit_cost,
            total_cost: draft.unit_cost * Decimal::from(draft.quantity),
            reference: draft.provenance.reference.clone(),
            user_id: draft.provenance.user_id,
            notes: draft.provenance.notes.clone(),
            occurred_at: draft.occurred_at,
        })
    }

    pub fn id(&self) -> MovementId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn batch_id(&self) -> Option<BatchId> {
        self.batch_id
    }

    pub fn movement_type(&self) -> MovementType {
        self.movement_type
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    /// Quantity with sign: positive into stock, negative out of it.
    pub fn signed_quantity(&self) -> i64 {
        match self.direction {
            Direction::Incoming => self.quantity,
            Direction::Outgoing => -self.quantity,
        }
    }

    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    pub fn total_cost(&self) -> Decimal {
        self.total_cost
    }

    pub fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
