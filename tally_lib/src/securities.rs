use crate::errors::{Result, TlyError};
use serde::{Deserialize, Serialize};

#[derive(
    Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize,
    Deserialize,
)]
pub struct SecurityId(pub u32);

/// A tradeable security.  Prices and the cost/proceeds legs of its
/// transactions are denominated in `currency`; share counts carry
/// `precision` fractional digits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Security {
    pub id: SecurityId,
    pub name: String,
    pub symbol: String,
    pub currency: String,
    pub precision: u8,
}

#[derive(Default)]
pub struct SecurityCollection {
    securities: Vec<Security>,
    next_id: u32,
}

impl SecurityCollection {
    pub fn add(
        &mut self,
        name: &str,
        symbol: &str,
        currency: &str,
        precision: u8,
    ) -> SecurityId {
        self.next_id += 1;
        let id = SecurityId(self.next_id);
        self.securities.push(Security {
            id,
            name: name.to_string(),
            symbol: symbol.to_string(),
            currency: currency.to_string(),
            precision,
        });
        id
    }

    pub fn get(&self, id: SecurityId) -> Result<&Security> {
        self.securities.iter().find(|s| s.id == id).ok_or_else(|| {
            TlyError::lookup(format!("unknown security #{}", id.0))
        })
    }

    pub fn find_by_symbol(&self, symbol: &str) -> Option<&Security> {
        self.securities.iter().find(|s| s.symbol == symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Security> {
        self.securities.iter()
    }
}
