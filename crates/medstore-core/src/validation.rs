//! # Validation Module
//!
//! Field rules for every input type, applied before anything reaches SQLite.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: HTTP extractor (Form / Json)                                 │
//! │  └── Type validation (deserialization)                                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Lengths, ranges, allowed values                                   │
//! │  └── Purchase total vs. line items                                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::NaiveDate;

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::{NewCustomer, NewMedicine, NewOperator, NewPurchase, NewStore};
use crate::{MAX_LINE_QUANTITY, TOTAL_TOLERANCE_CENTS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Field Helpers
// =============================================================================

/// Non-empty after trimming, at most `max` characters.
pub fn required_text(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::required(field));
    }
    max_length(field, value, max)
}

/// Absent, or at most `max` characters.
pub fn optional_text(field: &str, value: Option<&str>, max: usize) -> ValidationResult<()> {
    match value {
        Some(v) => max_length(field, v.trim(), max),
        None => Ok(()),
    }
}

fn max_length(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

// =============================================================================
// Entity Validators
// =============================================================================

pub fn validate_new_store(store: &NewStore) -> ValidationResult<()> {
    required_text("store_name", &store.store_name, 100)?;
    required_text("address", &store.address, 200)?;
    optional_text("contact_number", store.contact_number.as_deref(), 20)?;
    required_text("license_number", &store.license_number, 50)?;
    Ok(())
}

/// Field rules for a medicine.
///
/// ## Rules
/// - name 1–100, brand ≤ 100, batch ≤ 50, type ≤ 50, schedule ≤ 20
/// - price > 0
/// - stock ≥ 0
///
/// Expiry is checked separately by [`validate_expiry_not_past`] because only
/// new stock entered at the counter must not already be expired; records
/// arriving through sync may legitimately be past their date.
pub fn validate_new_medicine(medicine: &NewMedicine) -> ValidationResult<()> {
    required_text("name", &medicine.name, 100)?;
    optional_text("brand", medicine.brand.as_deref(), 100)?;
    optional_text("batch_number", medicine.batch_number.as_deref(), 50)?;
    optional_text("medicine_type", medicine.medicine_type.as_deref(), 50)?;
    optional_text("schedule_category", medicine.schedule_category.as_deref(), 20)?;

    if !medicine.price_cents.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "price".to_string(),
        });
    }
    if medicine.stock_quantity < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "stock_quantity".to_string(),
        });
    }
    Ok(())
}

pub fn validate_expiry_not_past(expiry: Option<NaiveDate>, today: NaiveDate) -> ValidationResult<()> {
    match expiry {
        Some(date) if date < today => Err(ValidationError::DateInPast {
            field: "expiry_date".to_string(),
        }),
        _ => Ok(()),
    }
}

pub fn validate_new_customer(customer: &NewCustomer) -> ValidationResult<()> {
    required_text("name", &customer.name, 100)?;
    optional_text("contact_number", customer.contact_number.as_deref(), 50)?;
    optional_text("email", customer.email.as_deref(), 100)?;
    optional_text("address", customer.address.as_deref(), 200)?;

    if let Some(age) = customer.age {
        if !(0..=150).contains(&age) {
            return Err(ValidationError::OutOfRange {
                field: "age".to_string(),
                min: 0,
                max: 150,
            });
        }
    }
    Ok(())
}

pub fn validate_new_operator(operator: &NewOperator) -> ValidationResult<()> {
    required_text("name", &operator.name, 100)?;
    optional_text("contact_number", operator.contact_number.as_deref(), 50)?;
    optional_text("email", operator.email.as_deref(), 100)?;
    optional_text("role", operator.role.as_deref(), 50)?;
    Ok(())
}

/// Shape checks on a purchase that need no database lookups.
pub fn validate_new_purchase(purchase: &NewPurchase) -> ValidationResult<()> {
    if purchase.items.is_empty() {
        return Err(ValidationError::required("items"));
    }
    for item in &purchase.items {
        if item.quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            });
        }
        if item.quantity > MAX_LINE_QUANTITY {
            return Err(quantity_out_of_range());
        }
        if let Some(price) = item.price_per_unit_cents {
            if !price.is_positive() {
                return Err(ValidationError::MustBePositive {
                    field: "price_per_unit".to_string(),
                });
            }
        }
    }
    if let Some(total) = purchase.total_cents {
        if total.cents() < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "total_amount".to_string(),
            });
        }
    }
    Ok(())
}

/// Checks a claimed total against the computed sum of its lines.
///
/// ## Example
/// ```rust
/// use medstore_core::money::Money;
/// use medstore_core::validation::validate_purchase_total;
///
/// let lines = [Money::from_cents(300), Money::from_cents(250)];
/// assert!(validate_purchase_total(Money::from_cents(550), &lines).is_ok());
/// assert!(validate_purchase_total(Money::from_cents(600), &lines).is_err());
/// ```
pub fn validate_purchase_total(claimed: Money, line_totals: &[Money]) -> ValidationResult<Money> {
    let computed = sum_line_totals(line_totals)?;
    if claimed.abs_diff(computed).cents() > TOTAL_TOLERANCE_CENTS {
        return Err(ValidationError::TotalMismatch {
            claimed: claimed.to_string(),
            computed: computed.to_string(),
        });
    }
    Ok(computed)
}

/// `unit_price × quantity`, rejecting amounts that do not fit in cents.
pub fn line_total(unit_price: Money, quantity: i64) -> ValidationResult<Money> {
    unit_price
        .checked_mul(quantity)
        .ok_or_else(quantity_out_of_range)
}

pub fn sum_line_totals(line_totals: &[Money]) -> ValidationResult<Money> {
    line_totals
        .iter()
        .try_fold(Money::ZERO, |acc, line| acc.checked_add(*line))
        .ok_or_else(|| ValidationError::OutOfRange {
            field: "total_amount".to_string(),
            min: 0,
            max: i64::MAX,
        })
}

fn quantity_out_of_range() -> ValidationError {
    ValidationError::OutOfRange {
        field: "quantity".to_string(),
        min: 1,
        max: MAX_LINE_QUANTITY,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Gender, NewPurchaseItem};

    fn medicine() -> NewMedicine {
        NewMedicine {
            name: "Amoxicillin".to_string(),
            brand: Some("Generic".to_string()),
            description: None,
            batch_number: Some("B-77".to_string()),
            expiry_date: None,
            price_cents: Money::from_cents(899),
            stock_quantity: 20,
            medicine_type: Some("capsule".to_string()),
            requires_prescription: true,
            schedule_category: Some("H".to_string()),
            storage_location_id: None,
        }
    }

    #[test]
    fn test_store_rules() {
        let store = NewStore {
            store_name: "Michael Medical Store".to_string(),
            address: "123 Main Street".to_string(),
            contact_number: Some("+1-555-0123".to_string()),
            license_number: "MS001".to_string(),
            opening_date: None,
        };
        assert!(validate_new_store(&store).is_ok());

        let bad = NewStore {
            license_number: "  ".to_string(),
            ..store
        };
        assert_eq!(
            validate_new_store(&bad),
            Err(ValidationError::required("license_number"))
        );
    }

    #[test]
    fn test_medicine_rules() {
        assert!(validate_new_medicine(&medicine()).is_ok());

        let free = NewMedicine {
            price_cents: Money::ZERO,
            ..medicine()
        };
        assert!(matches!(
            validate_new_medicine(&free),
            Err(ValidationError::MustBePositive { .. })
        ));

        let negative = NewMedicine {
            stock_quantity: -1,
            ..medicine()
        };
        assert!(validate_new_medicine(&negative).is_err());

        let long_name = NewMedicine {
            name: "x".repeat(101),
            ..medicine()
        };
        assert!(validate_new_medicine(&long_name).is_err());
    }

    #[test]
    fn test_expiry_rule() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2024, 5, 31).unwrap();
        assert!(validate_expiry_not_past(Some(today), today).is_ok());
        assert!(validate_expiry_not_past(None, today).is_ok());
        assert!(validate_expiry_not_past(Some(yesterday), today).is_err());
    }

    #[test]
    fn test_customer_age_range() {
        let mut customer = NewCustomer {
            name: "Ayesha".to_string(),
            contact_number: None,
            email: None,
            age: Some(151),
            gender: Some(Gender::Female),
            address: None,
        };
        assert!(validate_new_customer(&customer).is_err());
        customer.age = Some(150);
        assert!(validate_new_customer(&customer).is_ok());
    }

    #[test]
    fn test_purchase_rules() {
        let empty = NewPurchase {
            customer_id: None,
            operator_id: None,
            date_of_purchase: None,
            total_cents: None,
            items: vec![],
        };
        assert!(validate_new_purchase(&empty).is_err());

        let zero_qty = NewPurchase {
            items: vec![NewPurchaseItem {
                medicine_id: 1,
                quantity: 0,
                price_per_unit_cents: None,
            }],
            ..empty
        };
        assert!(validate_new_purchase(&zero_qty).is_err());

        let huge_qty = NewPurchase {
            items: vec![NewPurchaseItem {
                medicine_id: 1,
                quantity: i64::MAX / 100,
                price_per_unit_cents: Some(Money::from_cents(1250)),
            }],
            ..zero_qty
        };
        assert!(matches!(
            validate_new_purchase(&huge_qty),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_line_total_overflow_is_rejected() {
        assert_eq!(line_total(Money::from_cents(250), 4).unwrap(), Money::from_cents(1000));
        assert!(matches!(
            line_total(Money::from_cents(i64::MAX / 2), 3),
            Err(ValidationError::OutOfRange { .. })
        ));
        assert!(sum_line_totals(&[Money::from_cents(i64::MAX), Money::from_cents(1)]).is_err());
    }

    #[test]
    fn test_total_tolerance() {
        let lines = [Money::from_cents(333), Money::from_cents(333), Money::from_cents(333)];
        assert_eq!(
            validate_purchase_total(Money::from_cents(1000), &lines).unwrap(),
            Money::from_cents(999)
        );
        assert!(validate_purchase_total(Money::from_cents(1001), &lines).is_err());
    }
}
