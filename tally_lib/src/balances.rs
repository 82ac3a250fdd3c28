use crate::amounts::Amount;
use crate::prices::PriceOracle;
use crate::treap::Weight;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-currency totals for an account or a transaction.
///
/// Keys are currency codes; the empty string is the share unit of a
/// security-denominated account.  A zero total is never stored: the empty
/// map is the additive identity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Balances(HashMap<String, Amount>);

impl Balances {
    pub fn new(currency: &str, amount: Amount) -> Self {
        let mut b = Balances::default();
        b.add(currency, amount);
        b
    }

    pub fn add(&mut self, currency: &str, amount: Amount) {
        if amount.is_zero() && !self.0.contains_key(currency) {
            return;
        }
        let slot = self
            .0
            .entry(currency.to_string())
            .or_insert_with(Amount::zero);
        *slot += amount;
        if slot.is_zero() {
            self.0.remove(currency);
        }
    }

    pub fn value(&self, currency: &str) -> Amount {
        self.0.get(currency).copied().unwrap_or_default()
    }

    pub fn contains(&self, currency: &str) -> bool {
        self.0.contains_key(currency)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Amount)> {
        self.0.iter()
    }

    pub fn currencies(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Project every component into `currency` through the price oracle.
    /// Components with no known rate contribute zero (the oracle returns a
    /// zero rate for unknown pairs).
    pub fn in_currency(
        &self,
        oracle: &PriceOracle,
        currency: &str,
        date: Option<NaiveDate>,
    ) -> Amount {
        let mut total = Amount::zero();
        for (cur, amount) in &self.0 {
            total += amount.mul_f64(oracle.rate(cur, currency, date));
        }
        total
    }
}

impl Weight for Balances {
    fn is_empty(&self) -> bool {
        Balances::is_empty(self)
    }

    fn merge(&mut self, other: &Self) {
        *self += other;
    }
}

impl core::ops::AddAssign<&Balances> for Balances {
    fn add_assign(&mut self, rhs: &Balances) {
        for (cur, amount) in &rhs.0 {
            self.add(cur, *amount);
        }
    }
}

impl core::ops::SubAssign<&Balances> for Balances {
    fn sub_assign(&mut self, rhs: &Balances) {
        for (cur, amount) in &rhs.0 {
            self.add(cur, -*amount);
        }
    }
}

impl core::ops::Add<&Balances> for &Balances {
    type Output = Balances;

    fn add(self, rhs: &Balances) -> Balances {
        let mut b = self.clone();
        b += rhs;
        b
    }
}

impl core::ops::Sub<&Balances> for &Balances {
    type Output = Balances;

    fn sub(self, rhs: &Balances) -> Balances {
        let mut b = self.clone();
        b -= rhs;
        b
    }
}

impl core::ops::Add for Balances {
    type Output = Balances;

    fn add(mut self, rhs: Balances) -> Balances {
        self += &rhs;
        self
    }
}

impl core::ops::Sub for Balances {
    type Output = Balances;

    fn sub(mut self, rhs: Balances) -> Balances {
        self -= &rhs;
        self
    }
}

impl core::ops::Neg for &Balances {
    type Output = Balances;

    fn neg(self) -> Balances {
        let mut b = Balances::default();
        for (cur, amount) in &self.0 {
            b.add(cur, -*amount);
        }
        b
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[test]
    fn test_identity() {
        let mut b = Balances::default();
        assert!(b.is_empty());
        b.add("CAD", amt("10.00"));
        b.add("CAD", amt("-10.00"));
        assert!(b.is_empty());
        assert_eq!(b, Balances::default());
    }

    #[test]
    fn test_add_sub() {
        let mut b = Balances::new("CAD", amt("100.00"));
        b.add("USD", amt("-50.00"));
        assert_eq!(b.count(), 2);
        assert_eq!(b.value("CAD"), amt("100.00"));
        assert_eq!(b.value("USD"), amt("-50.00"));
        assert_eq!(b.value("EUR"), Amount::zero());

        let c = Balances::new("CAD", amt("-100.00"));
        let d = &b + &c;
        assert_eq!(d.count(), 1);
        assert_eq!(d.value("USD"), amt("-50.00"));

        let e = &d - &d;
        assert!(e.is_empty());
    }
}
