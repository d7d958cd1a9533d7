//! Card directory data models

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Card product type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    Debit,
    Credit,
    Virtual,
}

impl CardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardType::Debit => "debit",
            CardType::Credit => "credit",
            CardType::Virtual => "virtual",
        }
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debit" => Ok(CardType::Debit),
            "credit" => Ok(CardType::Credit),
            "virtual" => Ok(CardType::Virtual),
            other => Err(format!("Invalid card type: {}", other)),
        }
    }
}

/// Card as held by the directory
///
/// `balance` is only ever changed through `CardStore::apply_transfer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub card_id: i64,
    pub user_id: i64,
    pub username: String,
    pub card_number: String,
    pub card_type: CardType,
    pub expiry_date: NaiveDate,
    /// Gates both sending and receiving
    pub availability: bool,
    pub balance: Decimal,
}

impl Card {
    #[inline]
    pub fn is_available(&self) -> bool {
        self.availability
    }

    #[inline]
    pub fn can_cover(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }

    pub fn availability_view(&self) -> CardAvailability {
        CardAvailability {
            availability: self.availability,
            owner_name: self.username.clone(),
        }
    }
}

/// Response of `CheckAvailability`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardAvailability {
    pub availability: bool,
    pub owner_name: String,
}

/// Parameters of `CreateCard`
#[derive(Debug, Clone, Deserialize)]
pub struct NewCard {
    pub user_id: i64,
    pub username: String,
    pub card_type: CardType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn card(balance: Decimal) -> Card {
        Card {
            card_id: 1,
            user_id: 7,
            username: "alice".into(),
            card_number: "4000000000000001".into(),
            card_type: CardType::Debit,
            expiry_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            availability: true,
            balance,
        }
    }

    #[test]
    fn test_card_type_parse() {
        assert_eq!("Debit".parse::<CardType>().unwrap(), CardType::Debit);
        assert_eq!(" credit ".parse::<CardType>().unwrap(), CardType::Credit);
        assert!("gold".parse::<CardType>().is_err());
    }

    #[test]
    fn test_can_cover() {
        let c = card(dec!(100));
        assert!(c.can_cover(dec!(100)));
        assert!(c.can_cover(dec!(40)));
        assert!(!c.can_cover(dec!(100.01)));
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(card(dec!(12.5))).unwrap();
        assert_eq!(json["card_type"], "debit");
        assert_eq!(json["expiry_date"], "2030-01-01");
        assert_eq!(json["balance"], "12.5");
    }
}
