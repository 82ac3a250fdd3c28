use crate::accounts::{Account, AccountCollection, AccountId};
use crate::amounts::Amount;
use crate::balances::Balances;
use crate::currencies::CurrencyCollection;
use crate::errors::{Result, TlyError};
use crate::events::{Event, ObserverRegistry};
use crate::fragments::FragmentedTreap;
use crate::investments::{InvestmentAction, InvestmentSplitType};
use crate::lots::{InvestmentLotsManager, LotId, Lots};
use crate::prices::PriceOracle;
use crate::securities::SecurityCollection;
use crate::transactions::{Split, Transaction, TransactionId, TransactionStore};
use chrono::NaiveDate;
use log::debug;
use std::collections::{BTreeSet, HashMap};

/// The running tape of one account: every transaction touching it, keyed by
/// (date, transaction), with the per-currency totals for this account as
/// weights.  Stock splits on the account become fragment boundaries, so
/// balance queries report historical share counts as they appear today.
pub struct Ledger {
    account: AccountId,
    entries: FragmentedTreap<TransactionId>,
    /// Stock-split transactions anchored here, with the boundary date each
    /// one currently holds.
    split_dates: HashMap<TransactionId, NaiveDate>,
}

impl Ledger {
    fn new(account: AccountId) -> Ledger {
        Ledger {
            account,
            entries: FragmentedTreap::default(),
            split_dates: HashMap::new(),
        }
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn balances(&self) -> Balances {
        self.entries.sum()
    }

    pub fn balances_at(&self, date: NaiveDate) -> Balances {
        self.entries.sum_to(date)
    }

    pub fn balances_between(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Balances {
        match (from, to) {
            (None, None) => self.entries.sum(),
            (None, Some(to)) => self.entries.sum_to(to),
            (Some(from), None) => self.entries.sum_from(from),
            (Some(from), Some(to)) => self.entries.sum_between(from, to),
        }
    }

    /// Balances strictly before a transaction, in (date, insertion) order.
    pub fn balances_before(&self, tx: &Transaction) -> Balances {
        match tx.id() {
            Some(id) => self.entries.sum_before(tx.date(), id),
            None => self.balances(),
        }
    }

    /// Project per-currency balances into one currency.  With no explicit
    /// currency, a security account reports its share count and a currency
    /// account converts everything into its main currency.
    pub fn balance_in(
        &self,
        balances: &Balances,
        currency: Option<&str>,
        date: Option<NaiveDate>,
        accounts: &AccountCollection,
        oracle: &PriceOracle,
    ) -> Amount {
        let main = accounts
            .account(self.account)
            .map(|a| a.main_currency.clone())
            .unwrap_or_default();
        match currency {
            None if main.is_empty() => balances.value(""),
            None => balances.in_currency(oracle, &main, date),
            Some(cur) => balances.value(cur),
        }
    }

    pub fn balance(
        &self,
        currency: Option<&str>,
        accounts: &AccountCollection,
        oracle: &PriceOracle,
    ) -> Amount {
        self.balance_in(&self.balances(), currency, None, accounts, oracle)
    }

    pub fn balance_at(
        &self,
        date: NaiveDate,
        currency: Option<&str>,
        accounts: &AccountCollection,
        oracle: &PriceOracle,
    ) -> Amount {
        self.balance_in(
            &self.balances_at(date),
            currency,
            Some(date),
            accounts,
            oracle,
        )
    }

    pub fn balance_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        currency: Option<&str>,
        accounts: &AccountCollection,
        oracle: &PriceOracle,
    ) -> Amount {
        self.balance_in(
            &self.balances_between(Some(from), Some(to)),
            currency,
            Some(to),
            accounts,
            oracle,
        )
    }

    pub fn balance_before(
        &self,
        tx: &Transaction,
        currency: Option<&str>,
        accounts: &AccountCollection,
        oracle: &PriceOracle,
    ) -> Amount {
        self.balance_in(
            &self.balances_before(tx),
            currency,
            Some(tx.date()),
            accounts,
            oracle,
        )
    }

    /// Distinct currencies appearing in this account's splits over a range.
    pub fn currencies_used(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        store: &TransactionStore,
    ) -> BTreeSet<String> {
        let mut currencies = BTreeSet::new();
        for (_, id) in self.entries.entries_between(from, to) {
            if let Ok(tx) = store.get(id) {
                for s in tx.splits() {
                    if s.account == self.account && !s.currency.is_empty() {
                        currencies.insert(s.currency.clone());
                    }
                }
            }
        }
        currencies
    }

    pub fn transactions_between(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Vec<TransactionId> {
        self.entries
            .entries_between(from, to)
            .into_iter()
            .map(|(_, id)| id)
            .collect()
    }

    pub fn first_transaction_date(&self) -> Option<NaiveDate> {
        self.entries.first_key()
    }

    pub fn last_transaction_date(&self) -> Option<NaiveDate> {
        self.entries.last_key()
    }
}

/// Routes transaction lifecycle changes to every affected [`Ledger`] and
/// interprets stock splits as fragment operations.  Emits the balance-delta
/// events observers rely on, always after the ledgers have been updated.
pub struct LedgerManager {
    ledgers: HashMap<AccountId, Ledger>,
    today: NaiveDate,
}

impl LedgerManager {
    pub fn new(today: NaiveDate) -> LedgerManager {
        LedgerManager {
            ledgers: HashMap::new(),
            today,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn ledger(&self, account: AccountId) -> Option<&Ledger> {
        self.ledgers.get(&account)
    }

    pub fn has_ledger(&self, account: AccountId) -> bool {
        self.ledgers.contains_key(&account)
    }

    /// Placeholders group accounts and get no ledger.
    pub fn add_account(&mut self, account: &Account) {
        if !account.is_placeholder {
            self.ledgers
                .entry(account.id)
                .or_insert_with(|| Ledger::new(account.id));
        }
    }

    pub fn remove_account(&mut self, account: AccountId) -> Result<()> {
        if let Some(ledger) = self.ledgers.get(&account) {
            if !ledger.is_empty() {
                return Err(TlyError::state(
                    "impossible to remove the account as it has \
                     transactions; delete them first or close the account",
                ));
            }
            self.ledgers.remove(&account);
        }
        Ok(())
    }

    fn check_balances_changed(
        &mut self,
        account: AccountId,
        date: NaiveDate,
        prior: &Balances,
        observers: &mut ObserverRegistry,
    ) {
        let Some(ledger) = self.ledgers.get(&account) else {
            return;
        };
        let delta = &ledger.balances() - prior;
        if delta.is_empty() {
            return;
        }
        observers.emit(Event::BalanceChanged {
            account,
            delta: delta.clone(),
        });
        if date <= self.today {
            observers.emit(Event::BalanceTodayChanged { account, delta });
        }
    }

    /// Per-account totals of a split list, used as ledger weights.
    pub(crate) fn per_account_totals(
        splits: &[Split],
    ) -> Vec<(AccountId, Balances)> {
        let mut totals: Vec<(AccountId, Balances)> = Vec::new();
        for s in splits {
            match totals.iter_mut().find(|(a, _)| *a == s.account) {
                Some((_, b)) => b.add(&s.currency, s.amount),
                None => {
                    totals.push((
                        s.account,
                        Balances::new(&s.currency, s.amount),
                    ));
                }
            }
        }
        totals
    }

    /// Insert a freshly-committed transaction into every affected ledger.
    /// The repository has already validated it.
    pub(crate) fn insert_transaction(
        &mut self,
        tx: &Transaction,
        observers: &mut ObserverRegistry,
    ) -> Result<()> {
        let id = tx.id().ok_or_else(|| {
            TlyError::state("the transaction has not been committed")
        })?;
        debug!("inserting transaction #{} into ledgers", id.0);
        let is_stock_split =
            tx.investment_action() == InvestmentAction::StockSplit;
        for (account, totals) in Self::per_account_totals(tx.splits()) {
            let Some(ledger) = self.ledgers.get_mut(&account) else {
                continue;
            };
            let prior = ledger.balances();
            ledger.entries.insert(tx.date(), id, totals);
            if is_stock_split {
                self.add_stock_split(tx, observers);
            } else {
                self.check_balances_changed(
                    account,
                    tx.date(),
                    &prior,
                    observers,
                );
            }
        }
        for s in tx.splits() {
            observers.emit(Event::SplitAdded {
                tx: id,
                split: s.clone(),
            });
        }
        Ok(())
    }

    /// Undo a transaction's ledger presence, split by split.
    pub(crate) fn remove_transaction(
        &mut self,
        tx: &Transaction,
        observers: &mut ObserverRegistry,
    ) {
        let Some(id) = tx.id() else {
            return;
        };
        debug!("removing transaction #{} from ledgers", id.0);
        if tx.investment_action() == InvestmentAction::StockSplit {
            self.remove_stock_split(tx, observers);
        }
        for s in tx.splits() {
            if let Some(ledger) = self.ledgers.get_mut(&s.account) {
                let prior = ledger.balances();
                // With several splits on one account the entry goes on the
                // first pass; later passes are no-ops.
                ledger.entries.remove(tx.date(), id);
                ledger.split_dates.remove(&id);
                self.check_balances_changed(
                    s.account,
                    tx.date(),
                    &prior,
                    observers,
                );
            }
            observers.emit(Event::SplitRemoved {
                tx: id,
                split: s.clone(),
            });
        }
    }

    /// A split was added to a live transaction (`tx` is the post-state).
    pub(crate) fn on_split_added(
        &mut self,
        tx: &Transaction,
        split: &Split,
        observers: &mut ObserverRegistry,
    ) {
        let Some(id) = tx.id() else {
            return;
        };
        if let Some(ledger) = self.ledgers.get_mut(&split.account) {
            let prior = ledger.balances();
            let totals =
                Transaction::totals_for_account(split.account, tx.splits());
            if ledger.entries.contains(tx.date(), id) {
                ledger.entries.set_weight(tx.date(), id, totals);
            } else {
                ledger.entries.insert(tx.date(), id, totals);
            }
            self.check_balances_changed(
                split.account,
                tx.date(),
                &prior,
                observers,
            );
        }
        observers.emit(Event::SplitAdded {
            tx: id,
            split: split.clone(),
        });
    }

    /// A split was removed from a live transaction (`tx` is the post-state).
    pub(crate) fn on_split_removed(
        &mut self,
        tx: &Transaction,
        split: &Split,
        observers: &mut ObserverRegistry,
    ) {
        let Some(id) = tx.id() else {
            return;
        };
        if let Some(ledger) = self.ledgers.get_mut(&split.account) {
            let prior = ledger.balances();
            if tx.related_to(split.account) {
                let totals = Transaction::totals_for_account(
                    split.account,
                    tx.splits(),
                );
                ledger.entries.set_weight(tx.date(), id, totals);
            } else {
                ledger.entries.remove(tx.date(), id);
            }
            self.check_balances_changed(
                split.account,
                tx.date(),
                &prior,
                observers,
            );
        }
        observers.emit(Event::SplitRemoved {
            tx: id,
            split: split.clone(),
        });
    }

    pub(crate) fn on_split_amount_changed(
        &mut self,
        tx: &Transaction,
        split: &Split,
        observers: &mut ObserverRegistry,
    ) {
        let Some(id) = tx.id() else {
            return;
        };
        if let Some(ledger) = self.ledgers.get_mut(&split.account) {
            let prior = ledger.balances();
            let totals =
                Transaction::totals_for_account(split.account, tx.splits());
            ledger.entries.set_weight(tx.date(), id, totals);
            self.check_balances_changed(
                split.account,
                tx.date(),
                &prior,
                observers,
            );
        }
        observers.emit(Event::SplitAmountChanged {
            tx: id,
            split: split.clone(),
        });
    }

    /// Replay a wholesale split replacement: every old split reported as
    /// removed, then every new one as added.  `tx` already carries the new
    /// splits.
    pub(crate) fn apply_split_change(
        &mut self,
        tx: &Transaction,
        old_splits: &[Split],
        observers: &mut ObserverRegistry,
    ) {
        for s in old_splits {
            self.on_split_removed(tx, s, observers);
        }
        for s in tx.splits().to_vec() {
            self.on_split_added(tx, &s, observers);
        }
    }

    /// The transaction moved to a new date (`tx` carries the new one).
    pub(crate) fn on_date_changed(
        &mut self,
        tx: &Transaction,
        old: NaiveDate,
        observers: &mut ObserverRegistry,
    ) {
        let Some(id) = tx.id() else {
            return;
        };
        if old == tx.date() {
            return;
        }
        if tx.is_investment() {
            self.remove_stock_split(tx, observers);
        }

        let mut moved: BTreeSet<AccountId> = BTreeSet::new();
        for s in tx.splits() {
            if moved.insert(s.account) {
                if let Some(ledger) = self.ledgers.get_mut(&s.account) {
                    let prior = ledger.balances();
                    ledger.entries.move_entry(old, id, tx.date());
                    let delta = &ledger.balances() - &prior;
                    if !delta.is_empty() {
                        // only a stock-split boundary crossing can change
                        // the overall sum on a move
                        observers.emit(Event::BalanceChanged {
                            account: s.account,
                            delta,
                        });
                    }
                }
            }
            let crossed_in = tx.date() <= self.today && old > self.today;
            let crossed_out = tx.date() > self.today && old <= self.today;
            if crossed_in || crossed_out {
                let amount =
                    if crossed_in { s.amount } else { -s.amount };
                observers.emit(Event::BalanceTodayChanged {
                    account: s.account,
                    delta: Balances::new(&s.currency, amount),
                });
            }
        }

        if tx.investment_action() == InvestmentAction::StockSplit {
            self.add_stock_split(tx, observers);
        }
        observers.emit(Event::TransactionDateChanged { tx: id, old });
    }

    /// React to an investment transaction changing its action.
    pub(crate) fn on_investment_action_changed(
        &mut self,
        tx: &Transaction,
        previous: InvestmentAction,
        observers: &mut ObserverRegistry,
    ) {
        if tx.investment_action() == previous {
            return;
        }
        if previous == InvestmentAction::StockSplit {
            self.remove_stock_split(tx, observers);
        } else if tx.investment_action() == InvestmentAction::StockSplit {
            self.add_stock_split(tx, observers);
        }
        if let Some(id) = tx.id() {
            observers.emit(Event::InvestmentActionChanged { tx: id, previous });
        }
    }

    /// Install the fragment boundary of a stock-split transaction.
    pub(crate) fn add_stock_split(
        &mut self,
        tx: &Transaction,
        observers: &mut ObserverRegistry,
    ) {
        let (Some(id), Ok(account)) = (tx.id(), tx.id_investment_account())
        else {
            return;
        };
        if tx.investment_action() != InvestmentAction::StockSplit {
            return;
        }
        let Some(ledger) = self.ledgers.get_mut(&account) else {
            return;
        };
        if ledger.split_dates.contains_key(&id) {
            return;
        }
        let prior = ledger.balances();
        ledger
            .entries
            .split_fragment_at(tx.date(), tx.split_fraction());
        ledger.split_dates.insert(id, tx.date());
        self.check_balances_changed(account, tx.date(), &prior, observers);
    }

    /// Remove the fragment boundary a stock-split transaction holds, at the
    /// date and ledger it was recorded on (the transaction may already
    /// carry a newer date or account).
    pub(crate) fn remove_stock_split(
        &mut self,
        tx: &Transaction,
        observers: &mut ObserverRegistry,
    ) {
        let Some(id) = tx.id() else {
            return;
        };
        let Some(account) = self
            .ledgers
            .iter()
            .find(|(_, l)| l.split_dates.contains_key(&id))
            .map(|(a, _)| *a)
        else {
            return;
        };
        let Some(ledger) = self.ledgers.get_mut(&account) else {
            return;
        };
        let Some(recorded) = ledger.split_dates.remove(&id) else {
            return;
        };
        let prior = ledger.balances();
        ledger.entries.join_fragments_at(recorded);
        self.check_balances_changed(account, recorded, &prior, observers);
    }

    /// The ratio of an installed stock split changed.
    pub(crate) fn on_stock_split_amount_changed(
        &mut self,
        tx: &Transaction,
        observers: &mut ObserverRegistry,
    ) {
        let (Some(id), Ok(account)) = (tx.id(), tx.id_investment_account())
        else {
            return;
        };
        if tx.investment_action() != InvestmentAction::StockSplit {
            return;
        }
        let recorded = self
            .ledgers
            .get(&account)
            .and_then(|l| l.split_dates.get(&id).copied());
        match recorded {
            Some(date) => {
                let Some(ledger) = self.ledgers.get_mut(&account) else {
                    return;
                };
                let prior = ledger.balances();
                ledger.entries.set_fragment_ratio(date, tx.split_fraction());
                let delta = &ledger.balances() - &prior;
                if !delta.is_empty() {
                    observers.emit(Event::BalanceChanged {
                        account,
                        delta: delta.clone(),
                    });
                    if tx.date() <= self.today {
                        observers
                            .emit(Event::BalanceTodayChanged { account, delta });
                    }
                }
                observers.emit(Event::StockSplitAmountChanged { tx: id });
            }
            None => self.add_stock_split(tx, observers),
        }
    }

    // ---- cost basis -----------------------------------------------------

    /// Cost basis of an investment account's holdings, walking its ledger
    /// chronologically up to (but not including) `before`.
    ///
    /// Buys accumulate `shares * price + fee`; sells release basis — per
    /// selected lot when the sale names lots, proportionally otherwise.
    /// Transfers in pull the proportional basis out of the source account,
    /// stock splits rescale the share count, and explicit adjustments move
    /// the basis directly.  Distribution return-of-capital components are
    /// deliberately not deducted.
    pub fn cost_basis_before(
        &self,
        store: &TransactionStore,
        accounts: &AccountCollection,
        securities: &SecurityCollection,
        currencies: &CurrencyCollection,
        lots_mgr: &InvestmentLotsManager,
        account: AccountId,
        before: Option<TransactionId>,
    ) -> Result<Amount> {
        let Some(ledger) = self.ledgers.get(&account) else {
            return Ok(Amount::zero());
        };
        let Some(security) = accounts
            .account(account)
            .and_then(|a| a.id_security)
            .and_then(|s| securities.get(s).ok())
        else {
            return Ok(Amount::zero());
        };
        let cur_prec = currencies.precision_of(&security.currency);
        let share_prec = security.precision;

        let mut cost = Amount::new(0, cur_prec);
        let mut shares = Amount::new(0, share_prec);
        // Remaining (cost, shares) per lot created in this account, for
        // lot-directed sales.
        let mut lot_state: HashMap<LotId, (Amount, Amount)> = HashMap::new();

        for (_, txid, _) in ledger.entries.iter() {
            if Some(txid) == before {
                break;
            }
            let tx = store.get(txid)?;
            let Some(fields) = tx.investment() else {
                continue;
            };
            match fields.action {
                InvestmentAction::Buy
                | InvestmentAction::ReinvestDiv
                | InvestmentAction::ReinvestDistrib => {
                    let sc = tx.share_count();
                    let c = (sc * fields.price_per_share + tx.fee())
                        .to_precision(cur_prec);
                    cost += c;
                    shares += sc;
                    if let Some(lot) = lots_mgr.lot_number(txid) {
                        lot_state.insert(lot, (c, sc));
                    }
                }
                InvestmentAction::ShortSell => {
                    let sc = tx.share_count();
                    let c = (fields.price_per_share * sc - tx.fee())
                        .to_precision(cur_prec);
                    cost += c;
                    shares += sc;
                    if let Some(lot) = lots_mgr.lot_number(txid) {
                        lot_state.insert(lot, (c, sc.abs()));
                    }
                }
                InvestmentAction::Sell | InvestmentAction::ShortCover => {
                    Self::consume_basis(
                        &mut cost,
                        &mut shares,
                        &mut lot_state,
                        tx.share_count(),
                        &fields.lots,
                    );
                }
                InvestmentAction::Transfer | InvestmentAction::Swap => {
                    let from = tx.id_investment_account()?;
                    if from == account {
                        Self::consume_basis(
                            &mut cost,
                            &mut shares,
                            &mut lot_state,
                            -tx.share_count().abs(),
                            &fields.lots,
                        );
                    } else {
                        let shares_in = tx
                            .split_for(InvestmentSplitType::InvestmentTo)?
                            .amount;
                        let moved = tx.share_count().abs();
                        let other_balance = self
                            .ledgers
                            .get(&from)
                            .map(|l| l.balances_before(tx).value(""))
                            .unwrap_or_default();
                        let other_cost = self.cost_basis_before(
                            store,
                            accounts,
                            securities,
                            currencies,
                            lots_mgr,
                            from,
                            Some(txid),
                        )?;
                        if other_balance == moved {
                            cost += other_cost.to_precision(cur_prec);
                        } else if !other_balance.is_zero() {
                            let ratio = moved.to_decimal()
                                / other_balance.to_decimal();
                            cost += other_cost
                                .mul_decimal(ratio)
                                .to_precision(cur_prec);
                        }
                        shares += shares_in;
                    }
                }
                InvestmentAction::StockSplit => {
                    let fraction = fields.split_fraction;
                    shares = fraction.apply(&shares);
                    for (_, ls) in lot_state.values_mut() {
                        *ls = fraction.apply(ls);
                    }
                }
                InvestmentAction::CostBasisAdjustment
                | InvestmentAction::UndistributedCapitalGain => {
                    cost += fields.basis_adjustment.to_precision(cur_prec);
                }
                // cash-only actions leave the position untouched, and a
                // distribution's return-of-capital component is
                // deliberately not deducted
                InvestmentAction::Spinoff
                | InvestmentAction::Dividend
                | InvestmentAction::StockDividend
                | InvestmentAction::Distribution
                | InvestmentAction::Fee
                | InvestmentAction::Invalid => {}
            }
        }
        Ok(cost)
    }

    // Release basis for a disposal of `signed_count` shares (negative for a
    // long sale).  Named lots release their own recorded basis; otherwise
    // the release is proportional to the position.
    fn consume_basis(
        cost: &mut Amount,
        shares: &mut Amount,
        lot_state: &mut HashMap<LotId, (Amount, Amount)>,
        signed_count: Amount,
        lots: &Lots,
    ) {
        let magnitude = signed_count.abs();
        if magnitude.is_zero() {
            return;
        }
        if (*shares + signed_count).is_zero() {
            *cost = Amount::new(0, cost.precision());
            *shares = Amount::new(0, shares.precision());
            lot_state.clear();
            return;
        }
        if !lots.is_empty() {
            for (lot, qty) in lots {
                if let Some((lc, ls)) = lot_state.get_mut(lot) {
                    if ls.is_zero() {
                        continue;
                    }
                    let ratio = qty.to_decimal() / ls.to_decimal();
                    let used = lc.mul_decimal(ratio);
                    *cost -= used;
                    *lc -= used;
                    *ls -= *qty;
                }
            }
            *shares += signed_count;
        } else if !shares.is_zero() {
            let ratio = magnitude.to_decimal() / shares.abs().to_decimal();
            *cost -= cost.mul_decimal(ratio);
            *shares += signed_count;
        }
    }

    /// Cost basis considering only transactions at or before `date` (all of
    /// them when None).
    pub fn cost_basis_at(
        &self,
        store: &TransactionStore,
        accounts: &AccountCollection,
        securities: &SecurityCollection,
        currencies: &CurrencyCollection,
        lots_mgr: &InvestmentLotsManager,
        account: AccountId,
        date: Option<NaiveDate>,
    ) -> Result<Amount> {
        let before = match (date, self.ledgers.get(&account)) {
            (Some(d), Some(ledger)) => d
                .succ_opt()
                .and_then(|next| {
                    ledger
                        .entries
                        .entries_between(Some(next), None)
                        .into_iter()
                        .next()
                })
                .map(|(_, id)| id),
            _ => None,
        };
        self.cost_basis_before(
            store, accounts, securities, currencies, lots_mgr, account, before,
        )
    }
}
