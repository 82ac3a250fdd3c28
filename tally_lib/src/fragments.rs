use crate::amounts::Amount;
use crate::balances::Balances;
use crate::treap::AugmentedTreapMap;
use bisection::bisect_right_by;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A stock-split ratio: `new` shares replace `old` shares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitFraction {
    pub new: i32,
    pub old: i32,
}

impl SplitFraction {
    pub fn new(new: i32, old: i32) -> Self {
        SplitFraction { new, old }
    }

    pub fn identity() -> Self {
        SplitFraction { new: 1, old: 1 }
    }

    pub fn is_identity(&self) -> bool {
        self.new == self.old
    }

    /// A usable split has positive terms and actually changes the count.
    pub fn is_valid(&self) -> bool {
        self.new > 0 && self.old > 0 && self.new != self.old
    }

    /// The share balance after the split: `amount * new / old`.
    pub fn apply(&self, amount: &Amount) -> Amount {
        if self.is_identity() {
            *amount
        } else {
            amount.mul_fraction(self.new, self.old)
        }
    }

    pub fn apply_balances(&self, balances: &Balances) -> Balances {
        if self.is_identity() {
            return balances.clone();
        }
        let mut out = Balances::default();
        for (cur, amount) in balances.iter() {
            out.add(cur, self.apply(amount));
        }
        out
    }

    pub fn to_storeable(&self) -> String {
        format!("{}:{}", self.new, self.old)
    }

    pub fn from_storeable(s: &str) -> crate::errors::Result<SplitFraction> {
        let err = || {
            crate::errors::TlyError::Io(format!("bad split fraction {s:?}"))
        };
        let (new, old) = s.split_once(':').ok_or_else(err)?;
        Ok(SplitFraction {
            new: new.trim().parse().map_err(|_| err())?,
            old: old.trim().parse().map_err(|_| err())?,
        })
    }
}

struct Boundary {
    date: NaiveDate,
    fraction: SplitFraction,
}

/// An [`AugmentedTreapMap`] of per-currency balances whose key space is
/// partitioned into fragments by stock-split dates.
///
/// Each boundary carries the split's ratio.  Sum queries report weights "as
/// they would appear today": an entry is scaled by the product of the ratios
/// of every boundary strictly after its date (up to the end of the query
/// window).  An entry on the split date itself is already post-split and is
/// not scaled by that boundary.
pub struct FragmentedTreap<V> {
    entries: AugmentedTreapMap<NaiveDate, V, Balances>,
    boundaries: Vec<Boundary>,
}

impl<V> Default for FragmentedTreap<V> {
    fn default() -> Self {
        FragmentedTreap {
            entries: AugmentedTreapMap::default(),
            boundaries: Vec::new(),
        }
    }
}

fn day_before(d: NaiveDate) -> Option<NaiveDate> {
    d.pred_opt()
}

impl<V: Ord + Copy> FragmentedTreap<V> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, date: NaiveDate, val: V, weight: Balances) {
        self.entries.insert(date, val, weight);
    }

    pub fn remove(&mut self, date: NaiveDate, val: V) -> Option<Balances> {
        self.entries.remove(date, val)
    }

    pub fn move_entry(
        &mut self,
        old_date: NaiveDate,
        val: V,
        new_date: NaiveDate,
    ) -> bool {
        self.entries.move_entry(old_date, val, new_date)
    }

    pub fn set_weight(
        &mut self,
        date: NaiveDate,
        val: V,
        weight: Balances,
    ) -> bool {
        self.entries.set_weight(date, val, weight)
    }

    pub fn contains(&self, date: NaiveDate, val: V) -> bool {
        self.entries.contains(date, val)
    }

    pub fn first_key(&self) -> Option<NaiveDate> {
        self.entries.first_key()
    }

    pub fn last_key(&self) -> Option<NaiveDate> {
        self.entries.last_key()
    }

    pub fn iter(&self) -> crate::treap::Iter<'_, NaiveDate, V, Balances> {
        self.entries.iter()
    }

    pub fn entries_between(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Vec<(NaiveDate, V)> {
        self.entries.entries_between(from, to)
    }

    // Index of the first boundary with date > d.
    fn boundaries_through(&self, d: NaiveDate) -> usize {
        bisect_right_by(&self.boundaries, |b| b.date.cmp(&d))
    }

    fn boundary_index(&self, d: NaiveDate) -> Option<usize> {
        let at = self.boundaries_through(d).checked_sub(1)?;
        self.boundaries
            .get(at)
            .is_some_and(|b| b.date == d)
            .then_some(at)
    }

    /// Introduce a fragment boundary at `date`.  Returns false if one is
    /// already there.
    pub fn split_fragment_at(
        &mut self,
        date: NaiveDate,
        fraction: SplitFraction,
    ) -> bool {
        if self.boundary_index(date).is_some() {
            return false;
        }
        let at = self.boundaries_through(date);
        self.boundaries.insert(at, Boundary { date, fraction });
        true
    }

    /// Remove the boundary at `date`; its scaling disappears from queries.
    pub fn join_fragments_at(&mut self, date: NaiveDate) -> bool {
        match self.boundary_index(date) {
            Some(i) => {
                self.boundaries.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn set_fragment_ratio(
        &mut self,
        date: NaiveDate,
        fraction: SplitFraction,
    ) -> bool {
        match self
            .boundary_index(date)
            .and_then(|i| self.boundaries.get_mut(i))
        {
            Some(boundary) => {
                boundary.fraction = fraction;
                true
            }
            None => false,
        }
    }

    pub fn fragment_ratio_at(&self, date: NaiveDate) -> Option<SplitFraction> {
        self.boundary_index(date)
            .and_then(|i| self.boundaries.get(i))
            .map(|b| b.fraction)
    }

    pub fn sum(&self) -> Balances {
        self.cascaded_prefix(None)
    }

    /// Sum over entries with date <= `date`, in today's units: every
    /// boundary after an entry scales it, including boundaries beyond the
    /// query date.
    pub fn sum_to(&self, date: NaiveDate) -> Balances {
        self.cascaded_prefix(Some(date))
    }

    pub fn sum_from(&self, date: NaiveDate) -> Balances {
        match self.last_key() {
            Some(last) if date <= last => self.sum_between(date, last),
            Some(_) | None => Balances::default(),
        }
    }

    // Prefix sum with the ratio cascade.  Walking every boundary in order,
    // the total accumulated so far is scaled at each one, so an entry picks
    // up exactly the ratios of the boundaries dated after it.
    fn cascaded_prefix(&self, upto: Option<NaiveDate>) -> Balances {
        let mut acc = Balances::default();
        let mut prev = Balances::default();
        for b in &self.boundaries {
            let p = match (day_before(b.date), upto) {
                (None, _) => Balances::default(),
                (Some(cut), Some(u)) => self.entries.sum_to(cut.min(u)),
                (Some(cut), None) => self.entries.sum_to(cut),
            };
            acc += &(&p - &prev);
            acc = b.fraction.apply_balances(&acc);
            prev = p;
        }
        let tail = match upto {
            Some(u) => self.entries.sum_to(u),
            None => self.entries.sum(),
        };
        acc + (tail - prev)
    }

    pub fn sum_between(&self, from: NaiveDate, to: NaiveDate) -> Balances {
        // A boundary at or before `from` never scales entries inside the
        // window (they are already post-split); later boundaries all do.
        let lo = self.boundaries_through(from);
        let mut acc = Balances::default();
        let mut prev = Balances::default();
        for b in self.boundaries.iter().skip(lo) {
            let p = match day_before(b.date) {
                Some(cut) => self.entries.sum_between(from, cut.min(to)),
                None => Balances::default(),
            };
            acc += &(&p - &prev);
            acc = b.fraction.apply_balances(&acc);
            prev = p;
        }
        let tail = self.entries.sum_between(from, to) - prev;
        acc + tail
    }

    /// Sum over entries strictly before `(date, val)` in entry order, in
    /// today's units.
    pub fn sum_before(&self, date: NaiveDate, val: V) -> Balances {
        let full = self.entries.sum_before(date, val);
        let mut acc = Balances::default();
        let mut prev = Balances::default();
        for b in &self.boundaries {
            let p = if b.date <= date {
                match day_before(b.date) {
                    Some(cut) => self.entries.sum_to(cut),
                    None => Balances::default(),
                }
            } else {
                full.clone()
            };
            acc += &(&p - &prev);
            acc = b.fraction.apply_balances(&acc);
            prev = p;
        }
        let tail = &full - &prev;
        acc + tail
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn shares(n: &str) -> Balances {
        Balances::new("", n.parse().unwrap())
    }

    #[test]
    fn test_retroactive_scaling() {
        let mut t: FragmentedTreap<u32> = FragmentedTreap::default();
        t.insert(d("2024-03-01"), 1, shares("10.0000"));
        t.insert(d("2024-04-01"), 2, shares("10.0000"));
        assert_eq!(t.sum().value(""), "20.0000".parse().unwrap());

        // 2:1 split on June 1st scales every earlier entry, even when the
        // query date itself is before the split
        assert!(t.split_fragment_at(d("2024-06-01"), SplitFraction::new(2, 1)));
        t.insert(d("2024-06-01"), 3, Balances::default());
        assert_eq!(t.sum().value(""), "40.0000".parse().unwrap());
        assert_eq!(
            t.sum_to(d("2024-03-15")).value(""),
            "20.0000".parse().unwrap()
        );
        assert_eq!(
            t.sum_to(d("2024-05-31")).value(""),
            "40.0000".parse().unwrap()
        );

        // an entry on the split date is already post-split
        t.insert(d("2024-06-01"), 4, shares("3.0000"));
        assert_eq!(t.sum().value(""), "43.0000".parse().unwrap());

        // removing the boundary reverts every query
        assert!(t.join_fragments_at(d("2024-06-01")));
        assert_eq!(t.sum().value(""), "23.0000".parse().unwrap());
        assert_eq!(
            t.sum_to(d("2024-03-15")).value(""),
            "10.0000".parse().unwrap()
        );
    }

    #[test]
    fn test_cascading_boundaries() {
        let mut t: FragmentedTreap<u32> = FragmentedTreap::default();
        t.insert(d("2024-01-01"), 1, shares("8"));
        t.split_fragment_at(d("2024-02-01"), SplitFraction::new(2, 1));
        t.split_fragment_at(d("2024-03-01"), SplitFraction::new(3, 1));
        t.insert(d("2024-02-15"), 2, shares("4"));

        // first entry scaled by 2*3, second by 3 only
        assert_eq!(t.sum().value(""), "60".parse().unwrap());
        assert_eq!(t.sum_to(d("2024-02-20")).value(""), "60".parse().unwrap());
        assert_eq!(t.sum_to(d("2024-01-31")).value(""), "48".parse().unwrap());

        t.set_fragment_ratio(d("2024-03-01"), SplitFraction::new(1, 2));
        assert_eq!(t.sum().value(""), "10".parse().unwrap());

        // range query: only boundaries inside the window cascade
        assert_eq!(
            t.sum_between(d("2024-02-10"), d("2024-04-01")).value(""),
            "2".parse().unwrap()
        );
    }

    #[test]
    fn test_sum_before_entry() {
        let mut t: FragmentedTreap<u32> = FragmentedTreap::default();
        t.insert(d("2024-01-01"), 1, shares("10"));
        t.split_fragment_at(d("2024-02-01"), SplitFraction::new(2, 1));
        t.insert(d("2024-02-01"), 2, Balances::default());
        t.insert(d("2024-02-01"), 3, shares("5"));
        assert_eq!(
            t.sum_before(d("2024-02-01"), 3).value(""),
            "20".parse().unwrap()
        );
        assert_eq!(
            t.sum_before(d("2024-01-01"), 1).value(""),
            Amount::zero()
        );
    }
}
