//! # Domain Types
//!
//! Entities of the pharmacy domain and the input shapes used to create them.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │                       ┌─────────────────┐                               │
//! │                       │     Store       │  MedicalStore table           │
//! │                       │  id, license    │                               │
//! │                       └────────┬────────┘                               │
//! │             ┌──────────────────┼───────────────────┐                    │
//! │             ▼ StoreID          ▼ StoreID           ▼ StoreID            │
//! │  ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐           │
//! │  │    Medicine     │ │    Customer     │ │    Operator     │           │
//! │  │  price_cents    │ │  age, gender    │ │  role           │           │
//! │  │  stock_quantity │ └────────┬────────┘ └────────┬────────┘           │
//! │  └────────┬────────┘          └─────────┬─────────┘                    │
//! │           │                             ▼                               │
//! │           │                   ┌─────────────────┐                       │
//! │           │                   │    Purchase     │  total_cents          │
//! │           │                   └────────┬────────┘                       │
//! │           │                            ▼                                │
//! │           │                   ┌─────────────────┐                       │
//! │           └──────────────────►│  PurchaseItem   │  qty × unit price     │
//! │                               └─────────────────┘                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Entities are keyed by auto-increment integers assigned by the database that
//! owns them. Every store-scoped entity carries `updated_at`, which is what the
//! sync protocol compares against a watermark.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Store
// =============================================================================

/// A physical pharmacy (MedicalStore table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Store {
    #[cfg_attr(feature = "sqlx", sqlx(rename = "StoreID"))]
    pub id: i64,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "StoreName"))]
    pub store_name: String,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Address"))]
    pub address: String,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "ContactNumber"))]
    pub contact_number: Option<String>,
    /// Doubles as the credential a store presents when connecting for sync.
    #[cfg_attr(feature = "sqlx", sqlx(rename = "LicenseNumber"))]
    pub license_number: String,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "OpeningDate"))]
    pub opening_date: Option<NaiveDate>,
}

/// Input for creating a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStore {
    pub store_name: String,
    pub address: String,
    #[serde(default)]
    pub contact_number: Option<String>,
    pub license_number: String,
    #[serde(default)]
    pub opening_date: Option<NaiveDate>,
}

// =============================================================================
// Medicine
// =============================================================================

/// A stocked medicine line in one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Medicine {
    #[cfg_attr(feature = "sqlx", sqlx(rename = "MedicineID"))]
    pub id: i64,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "StoreID"))]
    pub store_id: i64,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Name"))]
    pub name: String,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Brand"))]
    pub brand: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Description"))]
    pub description: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "BatchNumber"))]
    pub batch_number: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "ExpiryDate"))]
    pub expiry_date: Option<NaiveDate>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "PriceCents"))]
    pub price_cents: Money,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "StockQuantity"))]
    pub stock_quantity: i64,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Type"))]
    pub medicine_type: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "RequiresPrescription"))]
    pub requires_prescription: bool,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "ScheduleCategory"))]
    pub schedule_category: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "StorageLocationID"))]
    pub storage_location_id: Option<i64>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "UpdatedAt"))]
    pub updated_at: DateTime<Utc>,
}

impl Medicine {
    /// Days until expiry counted from `today`; negative once expired.
    pub fn days_until_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expiry_date.map(|d| (d - today).num_days())
    }
}

/// Input for creating or replacing a medicine.
///
/// Also the shape a pushed medicine record is read into, so unknown keys
/// (`id`, `store_id`, `updated_at`) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMedicine {
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub batch_number: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    pub price_cents: Money,
    pub stock_quantity: i64,
    #[serde(default)]
    pub medicine_type: Option<String>,
    #[serde(default)]
    pub requires_prescription: bool,
    #[serde(default)]
    pub schedule_category: Option<String>,
    #[serde(default)]
    pub storage_location_id: Option<i64>,
}

// =============================================================================
// Customer
// =============================================================================

/// Customer gender as accepted by the customer form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
            Gender::Other => write!(f, "other"),
        }
    }
}

impl FromStr for Gender {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            _ => Err(ValidationError::NotAllowed {
                field: "gender".to_string(),
                allowed: vec!["male".into(), "female".into(), "other".into()],
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Customer {
    #[cfg_attr(feature = "sqlx", sqlx(rename = "CustomerID"))]
    pub id: i64,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "StoreID"))]
    pub store_id: i64,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Name"))]
    pub name: String,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "ContactNumber"))]
    pub contact_number: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Email"))]
    pub email: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Age"))]
    pub age: Option<i64>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Gender"))]
    pub gender: Option<Gender>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Address"))]
    pub address: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "UpdatedAt"))]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCustomer {
    pub name: String,
    #[serde(default)]
    pub contact_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub address: Option<String>,
}

// =============================================================================
// Operator
// =============================================================================

/// Staff member who rings up purchases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Operator {
    #[cfg_attr(feature = "sqlx", sqlx(rename = "OperatorID"))]
    pub id: i64,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "StoreID"))]
    pub store_id: i64,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Name"))]
    pub name: String,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "ContactNumber"))]
    pub contact_number: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Email"))]
    pub email: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Role"))]
    pub role: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "UpdatedAt"))]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOperator {
    pub name: String,
    #[serde(default)]
    pub contact_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

// =============================================================================
// Purchase
// =============================================================================

/// Header row of a sale to a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Purchase {
    #[cfg_attr(feature = "sqlx", sqlx(rename = "PurchaseID"))]
    pub id: i64,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "StoreID"))]
    pub store_id: i64,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "CustomerID"))]
    pub customer_id: Option<i64>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "OperatorID"))]
    pub operator_id: Option<i64>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "DateOfPurchase"))]
    pub date_of_purchase: DateTime<Utc>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "TotalCents"))]
    pub total_cents: Money,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "UpdatedAt"))]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PurchaseItem {
    #[cfg_attr(feature = "sqlx", sqlx(rename = "PurchaseItemID"))]
    pub id: i64,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "PurchaseID"))]
    pub purchase_id: i64,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "MedicineID"))]
    pub medicine_id: i64,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Quantity"))]
    pub quantity: i64,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "PricePerUnitCents"))]
    pub price_per_unit_cents: Money,
}

impl PurchaseItem {
    /// `None` when the amount does not fit in cents.
    pub fn line_total(&self) -> Option<Money> {
        self.price_per_unit_cents.checked_mul(self.quantity)
    }
}

/// A purchase with its line items. This is the record shape the sync
/// protocol carries for purchases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseDetail {
    #[serde(flatten)]
    pub purchase: Purchase,
    pub items: Vec<PurchaseItem>,
}

/// Input for one purchase line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPurchaseItem {
    pub medicine_id: i64,
    pub quantity: i64,
    /// Defaults to the medicine's current price when absent.
    #[serde(default)]
    pub price_per_unit_cents: Option<Money>,
}

/// Input for recording a purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPurchase {
    #[serde(default)]
    pub customer_id: Option<i64>,
    #[serde(default)]
    pub operator_id: Option<i64>,
    /// Defaults to now.
    #[serde(default)]
    pub date_of_purchase: Option<DateTime<Utc>>,
    /// When present it must agree with the items.
    #[serde(default)]
    pub total_cents: Option<Money>,
    pub items: Vec<NewPurchaseItem>,
}

// =============================================================================
// Reports
// =============================================================================

/// Aggregate numbers shown on a store's dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDashboard {
    pub store: Store,
    pub total_medicines: i64,
    pub low_stock_medicines: i64,
    pub customers: i64,
    pub operators: i64,
    pub purchases: i64,
}

/// Per-medicine line of the daily sales report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct MedicineSales {
    pub medicine_id: i64,
    pub name: String,
    pub quantity: i64,
    pub revenue_cents: Money,
}

/// Sales summary for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub purchase_count: i64,
    pub total_revenue_cents: Money,
    pub medicines: Vec<MedicineSales>,
}

// =============================================================================
// Unit Tests
// =============================================================================
