/*
 * Responsibility
 * - Orders の request/response DTO
 * - validation (形式チェック) 用の validate()
 */
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub item: String,
    pub quantity: u32,
}

impl CreateOrderRequest {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.item.trim().is_empty() {
            return Err("item is required");
        }
        if self.quantity == 0 {
            return Err("quantity must be >= 1");
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderRequest {
    pub quantity: u32,
}

impl UpdateOrderRequest {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.quantity == 0 {
            return Err("quantity must be >= 1");
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    pub quantity: u32,
    /// Tenant scope the order was written under.
    pub tenant: String,
    pub operator: String,
}
