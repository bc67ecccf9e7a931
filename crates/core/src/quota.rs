//! Remaining-quantity checks for deliveries and payments against a quotation.
//!
//! The ledger is rebuilt from scratch for every check: quoted quantities come
//! from the quotation's lines and consumption from every fulfillment entry of
//! the quotation's project, so a revised quotation still sees what earlier
//! versions already consumed.

use std::collections::{BTreeMap, HashSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::quotation::{FulfillmentEntry, ProductId, QuotationLine, RequestedLine};

#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuotaViolation {
    #[error("no line items were requested")]
    EmptyInput,
    #[error("requested quantity {quantity} for product {product_id} must be greater than zero")]
    NonPositiveQuantity { product_id: ProductId, quantity: Decimal },
    #[error("product {product_id} appears more than once in the request")]
    DuplicateLineItem { product_id: ProductId },
    #[error("product {product_id} is not part of the quotation")]
    ProductNotInQuotation { product_id: ProductId },
    #[error(
        "requested {requested} of product {product_id} but only {remaining} remain \
         ({quoted} quoted, {fulfilled} fulfilled, short by {shortfall})"
    )]
    QuotaExceeded {
        product_id: ProductId,
        requested: Decimal,
        quoted: Decimal,
        fulfilled: Decimal,
        remaining: Decimal,
        shortfall: Decimal,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLine {
    pub product_id: ProductId,
    pub quoted: Decimal,
    pub fulfilled: Decimal,
    pub remaining: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuotaLedger {
    quoted: BTreeMap<ProductId, Decimal>,
    fulfilled: BTreeMap<ProductId, Decimal>,
}

impl QuotaLedger {
    pub fn new(lines: &[QuotationLine], fulfilled: &[FulfillmentEntry]) -> Self {
        let mut ledger = Self::default();
        for line in lines {
            let total = ledger.quoted.entry(line.product_id.clone()).or_default();
            *total = total.saturating_add(line.quantity);
        }
        for entry in fulfilled {
            let total = ledger.fulfilled.entry(entry.product_id.clone()).or_default();
            *total = total.saturating_add(entry.quantity);
        }
        ledger
    }

    pub fn from_totals(
        quoted: BTreeMap<ProductId, Decimal>,
        fulfilled: BTreeMap<ProductId, Decimal>,
    ) -> Self {
        Self { quoted, fulfilled }
    }

    pub fn quoted(&self, product_id: &ProductId) -> Option<Decimal> {
        self.quoted.get(product_id).copied()
    }

    pub fn fulfilled(&self, product_id: &ProductId) -> Decimal {
        self.fulfilled.get(product_id).copied().unwrap_or_default()
    }

    /// `None` when the product was never quoted. Negative once a revision
    /// quotes less than the project already consumed.
    pub fn remaining(&self, product_id: &ProductId) -> Option<Decimal> {
        self.quoted(product_id).map(|quoted| quoted.saturating_sub(self.fulfilled(product_id)))
    }

    /// Validates a request. Input shape errors are reported before any quota error.
    pub fn check(&self, requested: &[RequestedLine]) -> Result<(), QuotaViolation> {
        validate_request_shape(requested)?;

        for line in requested {
            let Some(quoted) = self.quoted(&line.product_id) else {
                return Err(QuotaViolation::ProductNotInQuotation {
                    product_id: line.product_id.clone(),
                });
            };
            let fulfilled = self.fulfilled(&line.product_id);
            let remaining = quoted.saturating_sub(fulfilled);

            if line.quantity > remaining {
                return Err(QuotaViolation::QuotaExceeded {
                    product_id: line.product_id.clone(),
                    requested: line.quantity,
                    quoted,
                    fulfilled,
                    remaining,
                    shortfall: line.quantity.saturating_sub(remaining),
                });
            }
        }

        Ok(())
    }

    /// Per-product view of every quoted product, ordered by product id.
    pub fn lines(&self) -> Vec<QuotaLine> {
        self.quoted
            .iter()
            .map(|(product_id, quoted)| {
                let fulfilled = self.fulfilled(product_id);
                QuotaLine {
                    product_id: product_id.clone(),
                    quoted: *quoted,
                    fulfilled,
                    remaining: quoted.saturating_sub(fulfilled),
                }
            })
            .collect()
    }
}

pub fn validate_request_shape(requested: &[RequestedLine]) -> Result<(), QuotaViolation> {
    if requested.is_empty() {
        return Err(QuotaViolation::EmptyInput);
    }

    let mut seen = HashSet::with_capacity(requested.len());
    for line in requested {
        if line.quantity <= Decimal::ZERO {
            return Err(QuotaViolation::NonPositiveQuantity {
                product_id: line.product_id.clone(),
                quantity: line.quantity,
            });
        }
        if !seen.insert(&line.product_id) {
            return Err(QuotaViolation::DuplicateLineItem { product_id: line.product_id.clone() });
        }
    }

    Ok(())
}
