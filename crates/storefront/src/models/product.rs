//! Catalog product.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use aztec_core::{Price, ProductId, QualityGrade};

/// A catalog product.
///
/// The core never mutates a product; it only tracks quantities of it in the
/// ledgers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category: String,
    pub price: Price,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub harvest_date: Option<NaiveDate>,
    #[serde(default)]
    pub quality: QualityGrade,
    /// Average rating, 0.0 to 5.0.
    #[serde(default)]
    pub rating: f32,
    /// Units the remote catalog reports as available.
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Product {
    /// Minimal product for places that only know id, name and price.
    #[must_use]
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, price: Price) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: String::new(),
            price,
            description: String::new(),
            harvest_date: None,
            quality: QualityGrade::default(),
            rating: 0.0,
            stock: 0,
            image_url: None,
        }
    }

    /// Set the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}
