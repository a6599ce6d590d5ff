//! Physical inventory unit models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Physical condition of a unit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitCondition {
    Good,
    New,
    MinorDamage,
    NeedsService,
    HeavilyDamaged,
}

impl UnitCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::New => "new",
            Self::MinorDamage => "minor_damage",
            Self::NeedsService => "needs_service",
            Self::HeavilyDamaged => "heavily_damaged",
        }
    }
}

impl Default for UnitCondition {
    fn default() -> Self {
        Self::Good
    }
}

impl std::fmt::Display for UnitCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UnitCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "good" => Ok(Self::Good),
            "new" => Ok(Self::New),
            "minor_damage" => Ok(Self::MinorDamage),
            "needs_service" => Ok(Self::NeedsService),
            "heavily_damaged" => Ok(Self::HeavilyDamaged),
            _ => Err(format!("Unknown unit condition: {}", s)),
        }
    }
}

/// Availability of a unit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Available,
    Rented,
    Maintenance,
    Sold,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Rented => "rented",
            Self::Maintenance => "maintenance",
            Self::Sold => "sold",
        }
    }
}

impl Default for UnitStatus {
    fn default() -> Self {
        Self::Available
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UnitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "available" => Ok(Self::Available),
            "rented" => Ok(Self::Rented),
            "maintenance" => Ok(Self::Maintenance),
            "sold" => Ok(Self::Sold),
            _ => Err(format!("Unknown unit status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryUnit {
    pub id: String,
    pub product_id: String,
    pub unit_code: String,
    pub condition: String,
    pub status: String,
    pub location: Option<String>,
    pub last_service: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Unit joined with the product it belongs to
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryUnitWithProduct {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub unit: InventoryUnit,
    pub product_name: String,
    pub product_code: String,
    pub product_image_url: Option<String>,
}

/// Create-or-update payload. A present `id` means update.
#[derive(Debug, Deserialize)]
pub struct SaveInventoryUnitRequest {
    pub id: Option<String>,
    #[serde(default)]
    pub unit_code: String,
    #[serde(default)]
    pub product_id: String,
    pub condition: Option<String>,
    pub status: Option<String>,
    pub location: Option<String>,
    pub last_service: Option<String>,
}

/// Unit counts per status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySummary {
    pub total: i64,
    pub available: i64,
    pub rented: i64,
    pub maintenance: i64,
    pub sold: i64,
}
