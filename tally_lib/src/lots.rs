use crate::accounts::AccountId;
use crate::amounts::Amount;
use crate::errors::{Result, TlyError};
use crate::fragments::SplitFraction;
use crate::investments::{
    InvestmentAction, InvestmentActionClass, InvestmentSplitType,
};
use crate::transactions::{Transaction, TransactionId, TransactionStore};
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(
    Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize,
    Deserialize,
)]
pub struct LotId(pub u32);

/// Shares per lot, as selected by a transaction or reported by an
/// availability query.
pub type Lots = BTreeMap<LotId, Amount>;

/// A parcel of shares created by an acquisition (Buy, ShortSell,
/// ReinvestDiv, ReinvestDistrib).
#[derive(Clone, Debug)]
pub struct Lot {
    pub id: LotId,
    pub transaction: TransactionId,
    pub account: AccountId,
    pub action: InvestmentAction,
    /// Always non-negative.
    pub amount: Amount,
    pub date: NaiveDate,
}

/// How one transaction bears on lot availability.
#[derive(Clone, Debug)]
enum LotEffect {
    /// A stock split scales every then-outstanding lot of the account.
    Split {
        account: AccountId,
        fraction: SplitFraction,
    },
    Acquire {
        lot: LotId,
    },
    /// A Sell or ShortCover consuming shares from selected lots.
    Usage {
        account: AccountId,
        lots: Lots,
    },
    /// A Transfer/Swap/Spinoff moving selected lots between accounts.
    TransferSwap {
        from: AccountId,
        to: AccountId,
        lots: Lots,
    },
}

impl LotEffect {
    // Within a date: splits first, then acquisitions, then consumptions, so
    // a split on date D is applied before anything consuming on D.
    fn priority(&self) -> i8 {
        match self {
            LotEffect::Split { .. } => -1,
            LotEffect::Acquire { .. } => 0,
            LotEffect::Usage { .. } | LotEffect::TransferSwap { .. } => 1,
        }
    }

    fn is_usage(&self) -> bool {
        matches!(self, LotEffect::Usage { .. })
    }

    fn is_transfer(&self) -> bool {
        matches!(self, LotEffect::TransferSwap { .. })
    }
}

struct Entry {
    date: NaiveDate,
    effect: LotEffect,
}

fn clean_lots(lots: &mut Lots) {
    lots.retain(|_, amount| !amount.is_zero());
}

/// Global index of share lots: which transactions created them, which
/// consumed or moved them, and how much of each lot is still available in
/// an account as of any date.
#[derive(Default)]
pub struct InvestmentLotsManager {
    lots: BTreeMap<LotId, Lot>,
    effects: HashMap<TransactionId, Entry>,
    /// Chronological index into `effects`, ordered by (date, priority).
    order: BTreeSet<(NaiveDate, i8, TransactionId)>,
    next_id: u32,
}

impl InvestmentLotsManager {
    fn adjust_availability(
        &self,
        effect: &LotEffect,
        account: AccountId,
        buckets: &mut Lots,
    ) {
        match effect {
            LotEffect::Acquire { lot } => {
                if let Some(l) = self.lots.get(lot) {
                    if l.account == account {
                        *buckets.entry(l.id).or_default() += l.amount;
                    }
                }
            }
            LotEffect::Split {
                account: split_account,
                fraction,
            } => {
                if *split_account == account {
                    for amount in buckets.values_mut() {
                        *amount = fraction.apply(amount);
                    }
                }
            }
            LotEffect::Usage {
                account: usage_account,
                lots,
            } => {
                if *usage_account == account {
                    for (id, amount) in lots {
                        *buckets.entry(*id).or_default() -= *amount;
                    }
                }
            }
            LotEffect::TransferSwap { from, to, lots } => {
                if account == *from || account == *to {
                    for (id, amount) in lots {
                        let delta = if account == *to {
                            *amount
                        } else {
                            -*amount
                        };
                        *buckets.entry(*id).or_default() += delta;
                    }
                }
            }
        }
    }

    /// Remaining shares per lot of the given class in `account` as of
    /// `date`, folding every effect up to and including that date.
    /// Fully-used lots are not reported.
    pub fn lots_available(
        &self,
        class: InvestmentActionClass,
        account: AccountId,
        date: NaiveDate,
    ) -> Lots {
        self.lots_available_excluding(class, account, date, None)
    }

    /// Same as [`lots_available`](Self::lots_available), with one
    /// transaction's own effect rewound — used when re-validating an edit.
    pub fn lots_available_excluding(
        &self,
        class: InvestmentActionClass,
        account: AccountId,
        date: NaiveDate,
        exclude: Option<TransactionId>,
    ) -> Lots {
        if class == InvestmentActionClass::Invalid {
            return Lots::new();
        }
        let mut buckets = Lots::new();
        let end = (date, i8::MAX, TransactionId(u32::MAX));
        for (_, _, tx) in self.order.range(..=end) {
            if Some(*tx) == exclude {
                continue;
            }
            if let Some(entry) = self.effects.get(tx) {
                self.adjust_availability(&entry.effect, account, &mut buckets);
            }
        }
        buckets.retain(|id, amount| {
            if !amount.is_positive() {
                return false;
            }
            match self.lots.get(id) {
                None => false,
                Some(lot) => match class {
                    InvestmentActionClass::Long
                    | InvestmentActionClass::Short => {
                        lot.action.class() == class
                    }
                    InvestmentActionClass::Transfer
                    | InvestmentActionClass::Invalid => true,
                },
            }
        });
        buckets
    }

    /// Register or refresh the lot (or lot split) a transaction defines.
    /// Only acquisitions and stock splits may call this.
    pub fn update_transaction_split(
        &mut self,
        tx: &Transaction,
    ) -> Result<()> {
        let Some(id) = tx.id() else {
            return Ok(());
        };
        let action = tx.investment_action();
        match action {
            InvestmentAction::Buy
            | InvestmentAction::ShortSell
            | InvestmentAction::ReinvestDiv
            | InvestmentAction::ReinvestDistrib => {
                let existing = self.lot_number(id);
                if existing.is_none() && self.effects.contains_key(&id) {
                    self.remove_transaction(id);
                }
                let investment =
                    tx.split_for(InvestmentSplitType::Investment)?;
                match existing {
                    None => {
                        self.next_id += 1;
                        let lot_id = LotId(self.next_id);
                        debug!(
                            "lot #{} created by transaction #{}",
                            lot_id.0, id.0
                        );
                        self.lots.insert(
                            lot_id,
                            Lot {
                                id: lot_id,
                                transaction: id,
                                account: investment.account,
                                action,
                                amount: investment.amount.abs(),
                                date: tx.date(),
                            },
                        );
                        self.insert_effect(
                            id,
                            tx.date(),
                            LotEffect::Acquire { lot: lot_id },
                        );
                    }
                    Some(lot_id) => {
                        self.rekey(id, tx.date());
                        if let Some(lot) = self.lots.get_mut(&lot_id) {
                            lot.action = action;
                            lot.amount = investment.amount.abs();
                            lot.account = investment.account;
                            lot.date = tx.date();
                        }
                    }
                }
                Ok(())
            }
            InvestmentAction::StockSplit => {
                let account = tx.id_investment_account()?;
                let fraction = tx.split_fraction();
                let is_split = matches!(
                    self.effects.get(&id),
                    Some(Entry {
                        effect: LotEffect::Split { .. },
                        ..
                    })
                );
                if !is_split && self.effects.contains_key(&id) {
                    self.remove_transaction(id);
                }
                if is_split {
                    self.rekey(id, tx.date());
                }
                self.set_effect(
                    id,
                    tx.date(),
                    LotEffect::Split { account, fraction },
                );
                Ok(())
            }
            InvestmentAction::Sell
            | InvestmentAction::ShortCover
            | InvestmentAction::Transfer
            | InvestmentAction::Swap
            | InvestmentAction::Spinoff
            | InvestmentAction::Dividend
            | InvestmentAction::StockDividend
            | InvestmentAction::Distribution
            | InvestmentAction::UndistributedCapitalGain
            | InvestmentAction::CostBasisAdjustment
            | InvestmentAction::Fee
            | InvestmentAction::Invalid => Err(TlyError::state(
                "update_transaction_split() only applies to \
                 Buy/ShortSell/Reinvest/StockSplit transactions",
            )),
        }
    }

    /// Record the lots a Sell/ShortCover/Transfer/Swap/Spinoff consumes,
    /// after validating counts, classes and availability.  An empty map
    /// clears any prior selection.
    pub fn update_usages(
        &mut self,
        tx: &Transaction,
        lots: &Lots,
    ) -> Result<()> {
        let Some(id) = tx.id() else {
            return Ok(());
        };
        let action = tx.investment_action();
        if !action.consumes_lots() {
            return Err(TlyError::state(
                "update_usages() only applies to \
                 Sell/ShortCover/Transfer/Swap/Spinoff transactions",
            ));
        }

        let mut lots = lots.clone();
        clean_lots(&mut lots);

        if !lots.is_empty()
            && !Self::validate_lots_count(&lots, &tx.share_count().abs())
        {
            return Err(TlyError::validation(
                "the number of shares in the lots does not match the number \
                 of shares in the transaction",
            ));
        }

        let is_transfer = matches!(
            action,
            InvestmentAction::Transfer
                | InvestmentAction::Swap
                | InvestmentAction::Spinoff
        );
        let kind_matches = match self.effects.get(&id) {
            Some(entry) => {
                (is_transfer && entry.effect.is_transfer())
                    || (!is_transfer && entry.effect.is_usage())
            }
            None => false,
        };
        if self.effects.contains_key(&id) && !kind_matches {
            self.remove_transaction(id);
        }

        if lots.is_empty() {
            self.remove_transaction(id);
            return Ok(());
        }

        let account = tx.id_investment_account()?;
        self.validate_usage(action, account, Some(id), &lots, tx.date())?;

        let effect = if is_transfer {
            let to = tx.id_investment_to_account().ok_or_else(|| {
                TlyError::validation("the transfer has no destination account")
            })?;
            LotEffect::TransferSwap {
                from: account,
                to,
                lots,
            }
        } else {
            LotEffect::Usage { account, lots }
        };
        self.rekey(id, tx.date());
        self.set_effect(id, tx.date(), effect);
        Ok(())
    }

    /// Drop everything a transaction contributed.  Other transactions may
    /// be left over-consuming a removed lot; that surfaces the next time
    /// they are edited.
    pub fn remove_transaction(&mut self, id: TransactionId) {
        if let Some(entry) = self.effects.remove(&id) {
            self.order
                .remove(&(entry.date, entry.effect.priority(), id));
            if let LotEffect::Acquire { lot } = entry.effect {
                debug!("lot #{} removed with transaction #{}", lot.0, id.0);
                self.lots.remove(&lot);
            }
        }
    }

    /// Re-key a transaction's effect after its date changed.
    pub fn update_date(&mut self, id: TransactionId, date: NaiveDate) {
        self.rekey(id, date);
        if let Some(Entry {
            effect: LotEffect::Acquire { lot },
            ..
        }) = self.effects.get(&id)
        {
            if let Some(l) = self.lots.get_mut(lot) {
                l.date = date;
            }
        }
    }

    fn insert_effect(
        &mut self,
        id: TransactionId,
        date: NaiveDate,
        effect: LotEffect,
    ) {
        self.order.insert((date, effect.priority(), id));
        self.effects.insert(id, Entry { date, effect });
    }

    // Insert or replace, assuming any date change was already re-keyed.
    fn set_effect(
        &mut self,
        id: TransactionId,
        date: NaiveDate,
        effect: LotEffect,
    ) {
        match self.effects.get_mut(&id) {
            Some(entry) => entry.effect = effect,
            None => self.insert_effect(id, date, effect),
        }
    }

    fn rekey(&mut self, id: TransactionId, date: NaiveDate) {
        if let Some(entry) = self.effects.get_mut(&id) {
            if entry.date != date {
                self.order
                    .remove(&(entry.date, entry.effect.priority(), id));
                self.order.insert((date, entry.effect.priority(), id));
                entry.date = date;
            }
        }
    }

    /// Check a proposed usage: the lots exist, share one class, match the
    /// action's class, and each has enough remaining quantity on `date`
    /// once `exclude`'s own prior consumption is rewound.
    pub fn validate_usage(
        &self,
        action: InvestmentAction,
        account: AccountId,
        exclude: Option<TransactionId>,
        lots: &Lots,
        date: NaiveDate,
    ) -> Result<()> {
        if lots.is_empty() {
            return Ok(());
        }
        for (id, amount) in lots {
            if !self.lots.contains_key(id) {
                return Err(TlyError::validation(format!(
                    "unknown lot #{}",
                    id.0
                )));
            }
            if !amount.is_positive() {
                return Err(TlyError::validation(format!(
                    "the quantity for lot #{} must be positive",
                    id.0
                )));
            }
        }
        if !self.lots_have_same_class(lots) {
            return Err(TlyError::validation(
                "lots must all have the same type",
            ));
        }
        let first_class = match lots.keys().next().and_then(|i| self.lots.get(i))
        {
            Some(lot) => lot.action.class(),
            None => return Ok(()),
        };
        if !matches!(
            action,
            InvestmentAction::Transfer
                | InvestmentAction::Swap
                | InvestmentAction::Spinoff
        ) && first_class != action.class()
        {
            return Err(TlyError::validation(
                "lots must have the same action as the transaction",
            ));
        }
        let available =
            self.lots_available_excluding(first_class, account, date, exclude);
        for (id, amount) in lots {
            let remaining = available.get(id).copied().unwrap_or_default();
            if remaining < *amount {
                return Err(TlyError::availability(format!(
                    "no availability for lot #{}",
                    id.0
                )));
            }
        }
        Ok(())
    }

    /// The lots recorded for a consuming transaction, if any.
    pub fn lots_for_transaction(&self, id: TransactionId) -> Lots {
        match self.effects.get(&id) {
            Some(Entry {
                effect:
                    LotEffect::Usage { lots, .. }
                    | LotEffect::TransferSwap { lots, .. },
                ..
            }) => lots.clone(),
            Some(_) | None => Lots::new(),
        }
    }

    /// The lot an acquisition transaction created, if any.
    pub fn lot_number(&self, id: TransactionId) -> Option<LotId> {
        match self.effects.get(&id) {
            Some(Entry {
                effect: LotEffect::Acquire { lot },
                ..
            }) => Some(*lot),
            Some(_) | None => None,
        }
    }

    pub fn lot(&self, id: LotId) -> Result<&Lot> {
        self.lots
            .get(&id)
            .ok_or_else(|| TlyError::lookup(format!("lot #{} does not exist", id.0)))
    }

    pub fn transaction_for_lot(&self, id: LotId) -> Result<TransactionId> {
        Ok(self.lot(id)?.transaction)
    }

    pub fn iter_lots(&self) -> impl Iterator<Item = &Lot> {
        self.lots.values()
    }

    /// All lot quantities must be non-negative and sum to `amount`.
    pub fn validate_lots_count(lots: &Lots, amount: &Amount) -> bool {
        let mut total = *amount;
        for a in lots.values() {
            if a.is_negative() {
                return false;
            }
            total -= *a;
        }
        total.is_zero()
    }

    fn lots_have_same_class(&self, lots: &Lots) -> bool {
        let mut classes = lots
            .keys()
            .filter_map(|i| self.lots.get(i))
            .map(|l| l.action.class());
        match classes.next() {
            None => true,
            Some(first) => classes.all(|c| c == first),
        }
    }

    // ---- persistence support -------------------------------------------

    /// Register a lot from storage.  Account, action and date are linked in
    /// [`after_load`](Self::after_load).
    pub fn load_lot(
        &mut self,
        id: LotId,
        transaction: TransactionId,
        amount: Amount,
    ) {
        self.lots.insert(
            id,
            Lot {
                id,
                transaction,
                account: AccountId(0),
                action: InvestmentAction::Invalid,
                amount,
                date: NaiveDate::MIN,
            },
        );
        self.next_id = self.next_id.max(id.0);
    }

    /// Rebuild every index from the transaction store, resolving the
    /// back-references storage cannot carry.
    pub fn after_load(&mut self, store: &TransactionStore) -> Result<()> {
        self.effects.clear();
        self.order.clear();

        let lots: Vec<Lot> = self.lots.values().cloned().collect();
        for lot in lots {
            let linked = store
                .get(lot.transaction)
                .ok()
                .filter(|tx| tx.investment_action().creates_lot())
                .map(|tx| {
                    (
                        tx.date(),
                        tx.investment_action(),
                        tx.split_for(InvestmentSplitType::Investment)
                            .map(|s| s.account),
                    )
                });
            match linked {
                Some((date, action, Ok(account))) => {
                    if let Some(l) = self.lots.get_mut(&lot.id) {
                        l.date = date;
                        l.action = action;
                        l.account = account;
                    }
                    self.insert_effect(
                        lot.transaction,
                        date,
                        LotEffect::Acquire { lot: lot.id },
                    );
                }
                Some((_, _, Err(_))) | None => {
                    warn!(
                        "dropping lot #{}: transaction #{} is not an \
                         acquisition",
                        lot.id.0, lot.transaction.0
                    );
                    self.lots.remove(&lot.id);
                }
            }
        }

        // Splits, usages and transfers are derived entirely from the
        // transactions themselves.
        let ids: Vec<TransactionId> =
            store.iter().filter_map(|tx| tx.id()).collect();
        for id in ids {
            let tx = store.get(id)?;
            let action = tx.investment_action();
            if action == InvestmentAction::StockSplit {
                let account = tx.id_investment_account()?;
                let fraction = tx.split_fraction();
                self.insert_effect(
                    id,
                    tx.date(),
                    LotEffect::Split { account, fraction },
                );
            } else if action.consumes_lots() {
                let lots = tx.lots();
                if lots.is_empty() {
                    continue;
                }
                let account = tx.id_investment_account()?;
                let effect = if action == InvestmentAction::Sell
                    || action == InvestmentAction::ShortCover
                {
                    LotEffect::Usage { account, lots }
                } else {
                    match tx.id_investment_to_account() {
                        Some(to) => LotEffect::TransferSwap {
                            from: account,
                            to,
                            lots,
                        },
                        None => continue,
                    }
                };
                self.insert_effect(id, tx.date(), effect);
            }
        }
        Ok(())
    }

    pub fn unload(&mut self) {
        self.lots.clear();
        self.effects.clear();
        self.order.clear();
        self.next_id = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transactions::Split;
    use maplit::btreemap;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn acquisition(
        id: u32,
        account: u32,
        date: &str,
        quantity: &str,
        action: InvestmentAction,
    ) -> Transaction {
        let mut tx = Transaction::new_investment(d(date));
        tx.id = Some(TransactionId(id));
        tx.splits = vec![Split::new(amt(quantity), AccountId(account), "")];
        tx.assign_types(&[InvestmentSplitType::Investment]);
        if let Some(f) = tx.investment_mut() {
            f.action = action;
        }
        tx
    }

    fn sale(id: u32, account: u32, date: &str, quantity: &str) -> Transaction {
        let mut tx = Transaction::new_investment(d(date));
        tx.id = Some(TransactionId(id));
        tx.splits =
            vec![Split::new(-amt(quantity), AccountId(account), "")];
        tx.assign_types(&[InvestmentSplitType::Investment]);
        if let Some(f) = tx.investment_mut() {
            f.action = InvestmentAction::Sell;
        }
        tx
    }

    fn transfer(
        id: u32,
        from: u32,
        to: u32,
        date: &str,
        quantity: &str,
    ) -> Transaction {
        let mut tx = Transaction::new_investment(d(date));
        tx.id = Some(TransactionId(id));
        tx.splits = vec![
            Split::new(-amt(quantity), AccountId(from), ""),
            Split::new(amt(quantity), AccountId(to), ""),
        ];
        tx.assign_types(&[
            InvestmentSplitType::InvestmentFrom,
            InvestmentSplitType::InvestmentTo,
        ]);
        if let Some(f) = tx.investment_mut() {
            f.action = InvestmentAction::Transfer;
        }
        tx
    }

    fn stock_split(
        id: u32,
        account: u32,
        date: &str,
        fraction: SplitFraction,
    ) -> Transaction {
        let mut tx = Transaction::new_investment(d(date));
        tx.id = Some(TransactionId(id));
        if let Some(f) = tx.investment_mut() {
            f.action = InvestmentAction::StockSplit;
            f.split_fraction = fraction;
        }
        tx.add_anchor_split(AccountId(account));
        tx
    }

    #[test]
    fn test_availability_fold() {
        let mut mgr = InvestmentLotsManager::default();
        mgr.update_transaction_split(&acquisition(
            1,
            7,
            "2024-03-01",
            "10.0000",
            InvestmentAction::Buy,
        ))
        .unwrap();
        let lot = LotId(1);

        assert_eq!(
            mgr.lots_available(InvestmentActionClass::Long, AccountId(7), d("2024-03-01")),
            btreemap! { lot => amt("10.0000") }
        );
        // not yet acquired the day before
        assert!(mgr
            .lots_available(InvestmentActionClass::Long, AccountId(7), d("2024-02-29"))
            .is_empty());
        // wrong class, wrong account
        assert!(mgr
            .lots_available(InvestmentActionClass::Short, AccountId(7), d("2024-03-01"))
            .is_empty());
        assert!(mgr
            .lots_available(InvestmentActionClass::Long, AccountId(8), d("2024-03-01"))
            .is_empty());

        let sell = sale(2, 7, "2024-04-01", "4.0000");
        mgr.update_usages(&sell, &btreemap! { lot => amt("4.0000") })
            .unwrap();
        assert_eq!(
            mgr.lots_available(InvestmentActionClass::Long, AccountId(7), d("2024-04-01")),
            btreemap! { lot => amt("6.0000") }
        );
        assert_eq!(
            mgr.lots_available(InvestmentActionClass::Long, AccountId(7), d("2024-03-31")),
            btreemap! { lot => amt("10.0000") }
        );
        // never a negative balance in the result
        for (_, remaining) in
            mgr.lots_available(InvestmentActionClass::Long, AccountId(7), d("2024-12-31"))
        {
            assert!(remaining.is_positive());
        }
    }

    #[test]
    fn test_split_applies_before_same_date_consumption() {
        let mut mgr = InvestmentLotsManager::default();
        mgr.update_transaction_split(&acquisition(
            1,
            7,
            "2024-03-01",
            "10.0000",
            InvestmentAction::Buy,
        ))
        .unwrap();
        mgr.update_transaction_split(&stock_split(
            2,
            7,
            "2024-06-01",
            SplitFraction::new(2, 1),
        ))
        .unwrap();

        // selling 12 post-split shares on the split date itself is fine
        let sell = sale(3, 7, "2024-06-01", "12.0000");
        mgr.update_usages(&sell, &btreemap! { LotId(1) => amt("12.0000") })
            .unwrap();
        assert_eq!(
            mgr.lots_available(InvestmentActionClass::Long, AccountId(7), d("2024-06-01")),
            btreemap! { LotId(1) => amt("8.0000") }
        );
    }

    #[test]
    fn test_transfer_moves_availability() {
        let mut mgr = InvestmentLotsManager::default();
        mgr.update_transaction_split(&acquisition(
            1,
            7,
            "2024-03-01",
            "10.0000",
            InvestmentAction::Buy,
        ))
        .unwrap();
        let tr = transfer(2, 7, 8, "2024-04-01", "6.0000");
        mgr.update_usages(&tr, &btreemap! { LotId(1) => amt("6.0000") })
            .unwrap();

        assert_eq!(
            mgr.lots_available(InvestmentActionClass::Long, AccountId(7), d("2024-04-02")),
            btreemap! { LotId(1) => amt("4.0000") }
        );
        assert_eq!(
            mgr.lots_available(InvestmentActionClass::Long, AccountId(8), d("2024-04-02")),
            btreemap! { LotId(1) => amt("6.0000") }
        );
    }

    #[test]
    fn test_overdraw_and_class_mismatch() {
        let mut mgr = InvestmentLotsManager::default();
        mgr.update_transaction_split(&acquisition(
            1,
            7,
            "2024-03-01",
            "10.0000",
            InvestmentAction::Buy,
        ))
        .unwrap();

        let err = mgr
            .validate_usage(
                InvestmentAction::Sell,
                AccountId(7),
                None,
                &btreemap! { LotId(1) => amt("11.0000") },
                d("2024-04-01"),
            )
            .unwrap_err();
        assert!(matches!(err, TlyError::Availability(_)));

        let err = mgr
            .validate_usage(
                InvestmentAction::ShortCover,
                AccountId(7),
                None,
                &btreemap! { LotId(1) => amt("5.0000") },
                d("2024-04-01"),
            )
            .unwrap_err();
        assert!(matches!(err, TlyError::Validation(_)));

        assert!(matches!(
            mgr.validate_usage(
                InvestmentAction::Sell,
                AccountId(7),
                None,
                &btreemap! { LotId(9) => amt("1.0000") },
                d("2024-04-01"),
            ),
            Err(TlyError::Validation(_))
        ));
    }

    #[test]
    fn test_reediting_excludes_own_usage() {
        let mut mgr = InvestmentLotsManager::default();
        mgr.update_transaction_split(&acquisition(
            1,
            7,
            "2024-03-01",
            "10.0000",
            InvestmentAction::Buy,
        ))
        .unwrap();
        let mut sell = sale(2, 7, "2024-04-01", "4.0000");
        mgr.update_usages(&sell, &btreemap! { LotId(1) => amt("4.0000") })
            .unwrap();

        // growing the same sale to the full lot is allowed: its previous
        // consumption is rewound during validation
        sell.splits[0].amount = amt("-10.0000");
        mgr.update_usages(&sell, &btreemap! { LotId(1) => amt("10.0000") })
            .unwrap();
        assert!(mgr
            .lots_available(InvestmentActionClass::Long, AccountId(7), d("2024-04-02"))
            .is_empty());
    }

    #[test]
    fn test_wrong_kind_eviction_and_removal() {
        let mut mgr = InvestmentLotsManager::default();
        let mut tx = acquisition(
            1,
            7,
            "2024-03-01",
            "10.0000",
            InvestmentAction::Buy,
        );
        mgr.update_transaction_split(&tx).unwrap();
        assert_eq!(mgr.lot_number(TransactionId(1)), Some(LotId(1)));

        // the same transaction re-made as a stock split drops its lot
        tx = stock_split(1, 7, "2024-03-01", SplitFraction::new(3, 1));
        mgr.update_transaction_split(&tx).unwrap();
        assert_eq!(mgr.lot_number(TransactionId(1)), None);
        assert!(mgr.lot(LotId(1)).is_err());

        mgr.remove_transaction(TransactionId(1));
        assert!(mgr
            .lots_available(InvestmentActionClass::Long, AccountId(7), d("2024-12-31"))
            .is_empty());
    }

    #[test]
    fn test_date_rekey() {
        let mut mgr = InvestmentLotsManager::default();
        let mut buy = acquisition(
            1,
            7,
            "2024-03-01",
            "10.0000",
            InvestmentAction::Buy,
        );
        mgr.update_transaction_split(&buy).unwrap();
        buy.date = d("2024-05-01");
        mgr.update_date(TransactionId(1), buy.date);
        assert!(mgr
            .lots_available(InvestmentActionClass::Long, AccountId(7), d("2024-04-01"))
            .is_empty());
        assert_eq!(
            mgr.lots_available(InvestmentActionClass::Long, AccountId(7), d("2024-05-01")),
            btreemap! { LotId(1) => amt("10.0000") }
        );
    }
}
