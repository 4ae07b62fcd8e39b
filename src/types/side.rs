use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

const BUY_SYNONYMS: &[&str] = &["買い", "buy", "long", "l", "ロング"];
const SELL_SYNONYMS: &[&str] = &["売り", "sell", "short", "s", "ショート"];

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Buy,
    Sell,
}

impl Side {
    /// Matches localized or abbreviated spellings, ignoring case and padding.
    pub fn normalize(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_lowercase();

        if BUY_SYNONYMS.contains(&lowered.as_str()) {
            Some(Self::Buy)
        } else if SELL_SYNONYMS.contains(&lowered.as_str()) {
            Some(Self::Sell)
        } else {
            None
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

impl FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::normalize(s).ok_or_else(|| anyhow!("unknown side: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_localized_and_abbreviated_spellings() {
        assert_eq!(Side::normalize("買い"), Some(Side::Buy));
        assert_eq!(Side::normalize(" LONG "), Some(Side::Buy));
        assert_eq!(Side::normalize("l"), Some(Side::Buy));
        assert_eq!(Side::normalize("ショート"), Some(Side::Sell));
        assert_eq!(Side::normalize("Sell"), Some(Side::Sell));
        assert_eq!(Side::normalize("s"), Some(Side::Sell));
    }

    #[test]
    fn unknown_spelling_is_not_normalized() {
        assert_eq!(Side::normalize("hold"), None);
        assert!("hold".parse::<Side>().is_err());
        assert_eq!("売り".parse::<Side>().unwrap(), Side::Sell);
    }
}
