//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::error::DomainError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shop {
    pub id: i64,
    pub name: String,
    pub type_id: i64,
    /// Comma-separated image URLs.
    pub images: String,
    pub area: Option<String>,
    pub address: String,
    pub x: f64,
    pub y: f64,
    /// Average spend per visitor, in whole currency units.
    pub avg_price: Option<i64>,
    pub sold: i32,
    pub comments: i32,
    /// Rating times ten (1..=50).
    pub score: i32,
    pub open_hours: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Editable shop fields as submitted by an operator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShopUpdate {
    pub id: Option<i64>,
    pub name: String,
    pub type_id: i64,
    #[serde(default)]
    pub images: String,
    pub area: Option<String>,
    pub address: String,
    pub x: f64,
    pub y: f64,
    pub avg_price: Option<i64>,
    pub open_hours: Option<String>,
}

/// A [`ShopUpdate`] whose id has been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidShopUpdate {
    pub id: i64,
    pub name: String,
    pub type_id: i64,
    pub images: String,
    pub area: Option<String>,
    pub address: String,
    pub x: f64,
    pub y: f64,
    pub avg_price: Option<i64>,
    pub open_hours: Option<String>,
}

impl ShopUpdate {
    pub fn validate(self) -> Result<ValidShopUpdate, DomainError> {
        let id = self
            .id
            .ok_or_else(|| DomainError::validation("shop id must not be empty"))?;
        if id <= 0 {
            return Err(DomainError::validation("shop id must be positive"));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("shop name must not be empty"));
        }

        Ok(ValidShopUpdate {
            id,
            name: self.name.trim().to_string(),
            type_id: self.type_id,
            images: self.images,
            area: self.area,
            address: self.address,
            x: self.x,
            y: self.y,
            avg_price: self.avg_price,
            open_hours: self.open_hours,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopType {
    pub id: i64,
    pub name: String,
    pub icon: String,
    pub sort: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeckillVoucher {
    pub voucher_id: i64,
    pub stock: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub begin_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoucherOrder {
    pub id: i64,
    pub user_id: i64,
    pub voucher_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(id: Option<i64>) -> ShopUpdate {
        ShopUpdate {
            id,
            name: "  Tea House ".to_string(),
            type_id: 1,
            images: String::new(),
            area: Some("Downtown".to_string()),
            address: "1 Main St".to_string(),
            x: 120.1,
            y: 30.2,
            avg_price: Some(80),
            open_hours: None,
        }
    }

    #[test]
    fn update_requires_an_id() {
        let err = update(None).validate().expect_err("missing id");
        assert!(matches!(err, DomainError::Validation { .. }));
        assert!(update(Some(0)).validate().is_err());
    }

    #[test]
    fn update_trims_name() {
        let valid = update(Some(4)).validate().expect("valid");
        assert_eq!(valid.id, 4);
        assert_eq!(valid.name, "Tea House");
    }
}
