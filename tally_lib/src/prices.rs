use crate::errors::{Result, TlyError};
use crate::securities::{SecurityCollection, SecurityId};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

/// Display precision for exchange rates.
pub const RATE_DECIMALS: u32 = 8;

/// An ordered series of rates for one (from, to) pair.  `from` is either a
/// currency code or the `SEC<n>` key of a security.
pub struct ExchangePair {
    from: String,
    to: String,
    rates: BTreeMap<NaiveDate, f64>,
}

impl ExchangePair {
    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn is_security_pair(&self) -> bool {
        self.from.starts_with("SEC")
    }

    /// Set the rate on a date.  Returns true when the date is (now) the most
    /// recent of the series.
    pub fn set(&mut self, date: NaiveDate, rate: f64) -> bool {
        self.rates.insert(date, rate);
        self.rates.keys().next_back() == Some(&date)
    }

    /// Remove the rate on a date.  Returns (removed, was most recent).
    pub fn remove(&mut self, date: NaiveDate) -> (bool, bool) {
        let was_last = self.rates.keys().next_back() == Some(&date);
        (self.rates.remove(&date).is_some(), was_last)
    }

    /// Nearest rate recorded on or before `date`, or 0 when the series does
    /// not reach back that far.
    pub fn on(&self, date: NaiveDate) -> f64 {
        self.rates
            .range(..=date)
            .next_back()
            .map(|(_, r)| *r)
            .unwrap_or(0.0)
    }

    /// Most recent rate of the series, or 0 when empty.
    pub fn last(&self) -> f64 {
        self.rates.values().next_back().copied().unwrap_or(0.0)
    }

    pub fn rates(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.rates.iter().map(|(d, r)| (*d, *r))
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Reported by rate mutations so the caller can emit the matching events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateChange {
    pub changed: bool,
    /// The mutated date was the most recent of the series.
    pub last_modified: bool,
}

/// Historical exchange rates between currencies and from securities to
/// currencies, with nearest-not-after lookup.
#[derive(Default)]
pub struct PriceOracle {
    pairs: Vec<ExchangePair>,
    index: HashMap<(String, String), usize>,
}

impl PriceOracle {
    /// The `from` key under which a security's prices are stored.
    pub fn security_key(id: SecurityId) -> String {
        format!("SEC{}", id.0)
    }

    pub fn add(&mut self, from: &str, to: &str) -> Result<&mut ExchangePair> {
        if from == to {
            return Err(TlyError::validation(
                "from and to have to be different",
            ));
        }
        let key = (from.to_string(), to.to_string());
        if self.index.contains_key(&key) {
            return Err(TlyError::state(format!(
                "exchange pair {from}/{to} already exists"
            )));
        }
        let at = self.pairs.len();
        self.index.insert(key, at);
        self.pairs.push(ExchangePair {
            from: from.to_string(),
            to: to.to_string(),
            rates: BTreeMap::new(),
        });
        self.get_mut(from, to)
    }

    pub fn has(&self, from: &str, to: &str) -> bool {
        self.index
            .contains_key(&(from.to_string(), to.to_string()))
    }

    pub fn get(&self, from: &str, to: &str) -> Result<&ExchangePair> {
        self.index
            .get(&(from.to_string(), to.to_string()))
            .and_then(|i| self.pairs.get(*i))
            .ok_or_else(|| {
                TlyError::lookup(format!("no exchange pair {from}/{to}"))
            })
    }

    pub fn get_mut(
        &mut self,
        from: &str,
        to: &str,
    ) -> Result<&mut ExchangePair> {
        let at = self
            .index
            .get(&(from.to_string(), to.to_string()))
            .copied();
        at.and_then(|i| self.pairs.get_mut(i)).ok_or_else(|| {
            TlyError::lookup(format!("no exchange pair {from}/{to}"))
        })
    }

    pub fn get_or_add(
        &mut self,
        from: &str,
        to: &str,
    ) -> Result<&mut ExchangePair> {
        if self.has(from, to) {
            self.get_mut(from, to)
        } else {
            self.add(from, to)
        }
    }

    pub fn remove(&mut self, from: &str, to: &str) -> bool {
        let key = (from.to_string(), to.to_string());
        match self.index.remove(&key) {
            Some(i) => {
                self.pairs.remove(i);
                self.reindex();
                true
            }
            None => false,
        }
    }

    /// Drop every pair mentioning a currency or security key, when it is
    /// being deleted.
    pub fn remove_all(&mut self, from_or_to: &str) {
        self.pairs
            .retain(|p| p.from != from_or_to && p.to != from_or_to);
        self.reindex();
    }

    fn reindex(&mut self) {
        self.index = self
            .pairs
            .iter()
            .enumerate()
            .map(|(i, p)| ((p.from.clone(), p.to.clone()), i))
            .collect();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExchangePair> {
        self.pairs.iter()
    }

    /// The exchange rate from `from` to `to` as of `date` (or the latest
    /// recorded when `date` is None).
    ///
    /// Identical units rate 1.  When the direct pair is unknown and `from`
    /// is not a security, the inverse pair's reciprocal is used.  Unknown
    /// pairs rate 0.
    pub fn rate(&self, from: &str, to: &str, date: Option<NaiveDate>) -> f64 {
        if from == to {
            return 1.0;
        }
        if let Ok(pair) = self.get(from, to) {
            return match date {
                Some(d) => pair.on(d),
                None => pair.last(),
            };
        }
        if !from.starts_with("SEC") {
            if let Ok(pair) = self.get(to, from) {
                let r = match date {
                    Some(d) => pair.on(d),
                    None => pair.last(),
                };
                if r != 0.0 {
                    return 1.0 / r;
                }
            }
        }
        0.0
    }

    /// Rate from a security into `to`, chaining through the security's
    /// native currency when they differ.
    pub fn rate_for_security(
        &self,
        securities: &SecurityCollection,
        id: SecurityId,
        to: &str,
        date: Option<NaiveDate>,
    ) -> Result<f64> {
        let security = securities.get(id)?;
        let key = PriceOracle::security_key(id);
        if security.currency == to {
            Ok(self.rate(&key, to, date))
        } else {
            Ok(self.rate(&key, &security.currency, date)
                * self.rate(&security.currency, to, date))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_lookup() {
        let mut oracle = PriceOracle::default();
        assert_eq!(oracle.rate("CAD", "CAD", None), 1.0);
        assert_eq!(oracle.rate("CAD", "USD", None), 0.0);

        let pair = oracle.get_or_add("USD", "CAD").unwrap();
        assert!(pair.set(d("2024-01-10"), 1.30));
        assert!(pair.set(d("2024-02-10"), 1.35));
        assert!(!pair.set(d("2024-01-20"), 1.32));

        // nearest-not-after
        assert_eq!(oracle.rate("USD", "CAD", Some(d("2024-01-09"))), 0.0);
        assert_eq!(oracle.rate("USD", "CAD", Some(d("2024-01-10"))), 1.30);
        assert_eq!(oracle.rate("USD", "CAD", Some(d("2024-01-25"))), 1.32);
        assert_eq!(oracle.rate("USD", "CAD", None), 1.35);

        // inverse fallback for currencies only
        assert_eq!(oracle.rate("CAD", "USD", Some(d("2024-01-10"))), 1.0 / 1.30);
        assert_eq!(oracle.rate("SEC1", "CAD", None), 0.0);
    }

    #[test]
    fn test_security_chaining() {
        let mut securities = SecurityCollection::default();
        let sec = securities.add("Apple", "AAPL", "USD", 4);

        let mut oracle = PriceOracle::default();
        let key = PriceOracle::security_key(sec);
        oracle
            .get_or_add(&key, "USD")
            .unwrap()
            .set(d("2024-01-01"), 120.0);
        oracle
            .get_or_add("USD", "CAD")
            .unwrap()
            .set(d("2024-01-01"), 1.25);

        assert_eq!(
            oracle
                .rate_for_security(&securities, sec, "USD", None)
                .unwrap(),
            120.0
        );
        assert_eq!(
            oracle
                .rate_for_security(&securities, sec, "CAD", None)
                .unwrap(),
            150.0
        );
    }

    #[test]
    fn test_pair_management() {
        let mut oracle = PriceOracle::default();
        assert!(oracle.add("CAD", "CAD").is_err());
        oracle.add("CAD", "USD").unwrap();
        assert!(oracle.add("CAD", "USD").is_err());
        oracle.add("EUR", "USD").unwrap();
        assert!(oracle.remove("CAD", "USD"));
        assert!(!oracle.remove("CAD", "USD"));
        assert!(oracle.has("EUR", "USD"));
        oracle.remove_all("USD");
        assert!(!oracle.has("EUR", "USD"));
    }
}
