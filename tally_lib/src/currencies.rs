use crate::errors::{Result, TlyError};
use serde::{Deserialize, Serialize};

/// An ISO-style currency: code, display name and symbol, and the number of
/// fractional digits amounts in it carry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Currency {
    pub code: String,
    pub name: String,
    pub symbol: String,
    pub precision: u8,
}

#[derive(Default)]
pub struct CurrencyCollection(Vec<Currency>);

impl CurrencyCollection {
    pub fn add(&mut self, currency: Currency) -> Result<()> {
        if self.has(&currency.code) {
            return Err(TlyError::state(format!(
                "currency {} already exists",
                currency.code
            )));
        }
        self.0.push(currency);
        Ok(())
    }

    pub fn get(&self, code: &str) -> Result<&Currency> {
        self.0.iter().find(|c| c.code == code).ok_or_else(|| {
            TlyError::lookup(format!("unknown currency {code:?}"))
        })
    }

    pub fn has(&self, code: &str) -> bool {
        self.0.iter().any(|c| c.code == code)
    }

    /// Display precision for a currency; unknown codes (and the share
    /// pseudo-currency "") fall back to two digits.
    pub fn precision_of(&self, code: &str) -> u8 {
        self.get(code).map(|c| c.precision).unwrap_or(2)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Currency> {
        self.0.iter()
    }

    pub fn remove(&mut self, code: &str) {
        self.0.retain(|c| c.code != code);
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    pub fn currency(code: &str, precision: u8) -> Currency {
        Currency {
            code: code.to_string(),
            name: code.to_string(),
            symbol: code.to_string(),
            precision,
        }
    }

    #[test]
    fn test_collection() {
        let mut c = CurrencyCollection::default();
        c.add(currency("CAD", 2)).unwrap();
        assert!(c.add(currency("CAD", 2)).is_err());
        assert!(c.has("CAD"));
        assert_eq!(c.precision_of("CAD"), 2);
        assert_eq!(c.precision_of("???"), 2);
        assert!(c.get("USD").is_err());
    }
}
