//! Status enums for marketplace entities.

use serde::{Deserialize, Serialize};

/// Marketplace listing status.
///
/// A listing is unique per (seller, product) while `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    #[default]
    Active,
    Removed,
}

/// Order status as stored by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

/// Product quality grade shown on catalog cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityGrade {
    Premium,
    #[default]
    Standard,
    Organic,
}

impl std::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        })
    }
}

impl std::str::FromStr for ListingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "removed" => Ok(Self::Removed),
            _ => Err(format!("invalid listing status: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_status_round_trips_through_str() {
        for status in [ListingStatus::Active, ListingStatus::Removed] {
            assert_eq!(status.to_string().parse::<ListingStatus>().unwrap(), status);
        }
        assert!("sold".parse::<ListingStatus>().is_err());
    }

    #[test]
    fn test_order_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&OrderStatus::Cancelled).unwrap(),
            format!("\"{}\"", OrderStatus::Cancelled)
        );
    }
}
