use chrono::{Datelike, NaiveDate, Utc};
use rand::Rng;
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Whole FCFA; there is no smaller unit in use.
pub type Money = i64;

/// Largest amount accepted from the wire, and the cap on a fee schedule's
/// total. Keeps every sum of two amounts well inside `i64`.
pub const MAX_MONEY: Money = 1_000_000_000_000_000;

/// One state machine shared by installments and whole fee schedules; only
/// the labels differ per granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    NotStarted,
    Partial,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Installment,
    Schedule,
}

impl PaymentStatus {
    /// A zero-total entry counts as complete (nothing left to pay).
    pub fn for_amounts(paid: Money, total: Money) -> Self {
        if total.saturating_sub(paid) <= 0 {
            PaymentStatus::Complete
        } else if paid > 0 {
            PaymentStatus::Partial
        } else {
            PaymentStatus::NotStarted
        }
    }

    pub fn label(self, granularity: Granularity) -> &'static str {
        match (granularity, self) {
            (Granularity::Installment, PaymentStatus::NotStarted) => "pending",
            (Granularity::Installment, PaymentStatus::Partial) => "partial",
            (Granularity::Installment, PaymentStatus::Complete) => "paid",
            (Granularity::Schedule, PaymentStatus::NotStarted) => "in_progress",
            (Granularity::Schedule, PaymentStatus::Partial) => "partial",
            (Granularity::Schedule, PaymentStatus::Complete) => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub new_paid: Money,
    pub new_remaining: Money,
    pub status: PaymentStatus,
}

impl BalanceUpdate {
    pub fn to_json(self, granularity: Granularity) -> serde_json::Value {
        serde_json::json!({
            "newPaid": self.new_paid,
            "newRemaining": self.new_remaining,
            "status": self.status.label(granularity),
        })
    }
}

/// Adds `payment` to `paid_so_far`. Input is not validated here: remaining
/// is clamped at zero, so callers run `validate_payment_amount` first.
pub fn apply_payment(paid_so_far: Money, total: Money, payment: Money) -> BalanceUpdate {
    let new_paid = paid_so_far.saturating_add(payment);
    let new_remaining = total.saturating_sub(new_paid).max(0);
    let status = if new_remaining == 0 {
        PaymentStatus::Complete
    } else if new_paid > 0 {
        PaymentStatus::Partial
    } else {
        PaymentStatus::NotStarted
    };
    BalanceUpdate {
        new_paid,
        new_remaining,
        status,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmountCheck {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn validate_payment_amount(payment: Money, remaining: Money) -> AmountCheck {
    let error = if payment <= 0 {
        Some("amount must be greater than 0".to_string())
    } else if payment > remaining {
        Some(format!("amount exceeds remaining balance of {}", remaining))
    } else {
        None
    };
    AmountCheck {
        valid: error.is_none(),
        error,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerError {
    pub code: String,
    pub message: String,
}

impl LedgerError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installment {
    pub id: String,
    pub label: String,
    pub due_date: Option<NaiveDate>,
    pub amount: Money,
    pub paid: Money,
}

impl Installment {
    pub fn remaining(&self) -> Money {
        self.amount.saturating_sub(self.paid).max(0)
    }

    pub fn status(&self) -> PaymentStatus {
        PaymentStatus::for_amounts(self.paid, self.amount)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstallmentWire<'a> {
    id: &'a str,
    label: &'a str,
    due_date: Option<String>,
    amount: Money,
    paid_amount: Money,
    remaining_amount: Money,
    status: &'static str,
}

impl Serialize for Installment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        InstallmentWire {
            id: &self.id,
            label: &self.label,
            due_date: self.due_date.map(|d| d.format("%Y-%m-%d").to_string()),
            amount: self.amount,
            paid_amount: self.paid,
            remaining_amount: self.remaining(),
            status: self.status().label(Granularity::Installment),
        }
        .serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerTotals {
    pub total: Money,
    pub paid: Money,
    pub remaining: Money,
    pub status: PaymentStatus,
}

/// All installments one student owes for one fee type in one school year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSchedule {
    pub id: String,
    pub student_id: String,
    pub fee_type: String,
    pub school_year: String,
    pub installments: Vec<Installment>,
}

impl PaymentSchedule {
    /// Always derived from the installments; the schedule keeps no paid
    /// figure of its own.
    pub fn totals(&self) -> LedgerTotals {
        let total = self
            .installments
            .iter()
            .fold(0, |acc: Money, i| acc.saturating_add(i.amount));
        let paid = self
            .installments
            .iter()
            .fold(0, |acc: Money, i| acc.saturating_add(i.paid));
        LedgerTotals {
            total,
            paid,
            remaining: total.saturating_sub(paid).max(0),
            status: PaymentStatus::for_amounts(paid, total),
        }
    }

    pub fn installment(&self, installment_id: &str) -> Option<&Installment> {
        self.installments.iter().find(|i| i.id == installment_id)
    }

    pub fn record_payment(
        &mut self,
        installment_id: &str,
        amount: Money,
    ) -> Result<BalanceUpdate, LedgerError> {
        let Some(inst) = self
            .installments
            .iter_mut()
            .find(|i| i.id == installment_id)
        else {
            return Err(LedgerError::new("not_found", "installment not found"));
        };
        let check = validate_payment_amount(amount, inst.remaining());
        if let Some(msg) = check.error {
            return Err(LedgerError::new("invalid_amount", msg));
        }
        let update = apply_payment(inst.paid, inst.amount, amount);
        inst.paid = update.new_paid;
        Ok(update)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentScheduleWire<'a> {
    id: &'a str,
    student_id: &'a str,
    fee_type: &'a str,
    school_year: &'a str,
    total_amount: Money,
    paid_amount: Money,
    remaining_amount: Money,
    status: &'static str,
    installments: &'a [Installment],
}

impl Serialize for PaymentSchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let totals = self.totals();
        PaymentScheduleWire {
            id: &self.id,
            student_id: &self.student_id,
            fee_type: &self.fee_type,
            school_year: &self.school_year,
            total_amount: totals.total,
            paid_amount: totals.paid,
            remaining_amount: totals.remaining,
            status: totals.status.label(Granularity::Schedule),
            installments: &self.installments,
        }
        .serialize(serializer)
    }
}

pub const DEFAULT_RECEIPT_PREFIX: &str = "REC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStrategy {
    Sequence,
    Uuid,
    TimeRandom,
}

impl ReceiptStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequence" => Some(Self::Sequence),
            "uuid" => Some(Self::Uuid),
            "timerandom" => Some(Self::TimeRandom),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sequence => "sequence",
            Self::Uuid => "uuid",
            Self::TimeRandom => "timeRandom",
        }
    }
}

/// Prefix, wall-clock millis and a 0..=999 random suffix. Collisions are
/// unlikely but not ruled out.
pub fn generate_receipt_number(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: u32 = rand::rng().random_range(0..1000);
    format!("{}-{}-{:03}", prefix, millis, suffix)
}

pub fn uuid_receipt_number(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// `seq` must come from a single writer that never hands out a value twice.
pub fn sequence_receipt_number(prefix: &str, year: i32, seq: i64) -> String {
    format!("{}-{}-{:06}", prefix, year, seq)
}

pub fn current_year() -> i32 {
    Utc::now().year()
}
