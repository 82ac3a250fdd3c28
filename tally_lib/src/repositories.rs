use crate::accounts::{AccountCollection, AccountId, AccountType};
use crate::amounts::Amount;
use crate::currencies::CurrencyCollection;
use crate::errors::{Result, TlyError};
use crate::events::{Event, ObserverRegistry};
use crate::fragments::SplitFraction;
use crate::institutions::InstitutionCollection;
use crate::investments::{
    check_action, check_distrib_composition, check_id_investment_account,
    check_splits, split_type_sets, DistribComposition, DistribType,
    InvestmentAction, InvestmentFields, InvestmentSplitType,
};
use crate::ledgers::{Ledger, LedgerManager};
use crate::lots::{InvestmentLotsManager, LotId, Lots};
use crate::payees::PayeeCollection;
use crate::prices::PriceOracle;
use crate::schedules::{Recurrence, ScheduleId, ScheduleManager};
use crate::securities::{SecurityCollection, SecurityId};
use crate::transactions::{
    add_trading_splits, splits_balance, Split, Transaction, TransactionId,
    TransactionStore,
};
use chrono::{Local, NaiveDate};
use log::debug;

/// The whole engine: one value owning every registry and manager, with the
/// transaction lifecycle operations that keep them consistent.  All
/// cross-links between the parts are numeric ids resolved through here.
pub struct Repository {
    pub currencies: CurrencyCollection,
    pub securities: SecurityCollection,
    pub institutions: InstitutionCollection,
    pub payees: PayeeCollection,
    pub(crate) accounts: AccountCollection,
    prices: PriceOracle,
    transactions: TransactionStore,
    ledgers: LedgerManager,
    lots: InvestmentLotsManager,
    schedules: ScheduleManager,
    observers: ObserverRegistry,
}

impl Default for Repository {
    fn default() -> Self {
        Repository::with_today(Local::now().date_naive())
    }
}

impl Repository {
    pub fn new() -> Repository {
        Repository::default()
    }

    /// An engine whose notion of "today" is pinned, for reproducible
    /// balance-today events and due-schedule queries.
    pub fn with_today(today: NaiveDate) -> Repository {
        Repository {
            currencies: CurrencyCollection::default(),
            securities: SecurityCollection::default(),
            institutions: InstitutionCollection::default(),
            payees: PayeeCollection::default(),
            accounts: AccountCollection::default(),
            prices: PriceOracle::default(),
            transactions: TransactionStore::default(),
            ledgers: LedgerManager::new(today),
            lots: InvestmentLotsManager::default(),
            schedules: ScheduleManager::default(),
            observers: ObserverRegistry::default(),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.ledgers.today()
    }

    pub fn accounts(&self) -> &AccountCollection {
        &self.accounts
    }

    pub fn prices(&self) -> &PriceOracle {
        &self.prices
    }

    pub fn transactions(&self) -> &TransactionStore {
        &self.transactions
    }

    pub fn ledgers(&self) -> &LedgerManager {
        &self.ledgers
    }

    pub fn lots(&self) -> &InvestmentLotsManager {
        &self.lots
    }

    pub fn schedules(&self) -> &ScheduleManager {
        &self.schedules
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&Event) + 'static) {
        self.observers.subscribe(listener);
    }

    // ---- accounts -------------------------------------------------------

    /// Create an account under `parent` and open its ledger (placeholders
    /// get none).
    pub fn add_account(
        &mut self,
        parent: AccountId,
        name: &str,
        kind: AccountType,
        main_currency: &str,
        id_security: Option<SecurityId>,
        is_placeholder: bool,
    ) -> Result<AccountId> {
        let id = self.accounts.add_child(
            parent,
            name,
            kind,
            main_currency,
            id_security,
            is_placeholder,
        )?;
        let account = self.accounts.get(id)?;
        self.ledgers.add_account(account);
        Ok(id)
    }

    /// Remove a leaf account whose ledger is empty.
    pub fn remove_account(&mut self, id: AccountId) -> Result<()> {
        self.ledgers.remove_account(id)?;
        self.accounts.remove(id)
    }

    pub fn ledger(&self, account: AccountId) -> Result<&Ledger> {
        self.ledgers.ledger(account).ok_or_else(|| {
            TlyError::lookup(format!("account #{} has no ledger", account.0))
        })
    }

    // ---- prices ---------------------------------------------------------

    pub fn set_rate(
        &mut self,
        from: &str,
        to: &str,
        date: NaiveDate,
        rate: f64,
    ) -> Result<()> {
        let pair = self.prices.get_or_add(from, to)?;
        let is_last = pair.set(date, rate);
        self.observers.emit(Event::RateSet {
            from: from.to_string(),
            to: to.to_string(),
            date,
        });
        if is_last {
            self.observers.emit(Event::LastRateModified {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    pub fn remove_rate(
        &mut self,
        from: &str,
        to: &str,
        date: NaiveDate,
    ) -> Result<()> {
        let pair = self.prices.get_mut(from, to)?;
        let (removed, was_last) = pair.remove(date);
        if removed {
            self.observers.emit(Event::RateRemoved {
                from: from.to_string(),
                to: to.to_string(),
                date,
            });
            if was_last {
                self.observers.emit(Event::LastRateModified {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }
        Ok(())
    }

    // ---- transaction lifecycle -----------------------------------------

    fn ensure_ledgers(&mut self, splits: &[Split]) -> Result<()> {
        for s in splits {
            let account = self.accounts.get(s.account)?;
            if account.is_placeholder {
                return Err(TlyError::validation(format!(
                    "cannot add a split for account {}: it is a placeholder",
                    account.name
                )));
            }
            if !self.ledgers.has_ledger(s.account) {
                self.ledgers.add_account(account);
            }
        }
        Ok(())
    }

    // Structural checks guaranteeing the post-commit lot bookkeeping cannot
    // fail halfway through.
    fn validate_investment_for_commit(&self, tx: &Transaction) -> Result<()> {
        let Some(fields) = tx.investment() else {
            return Ok(());
        };
        let action = fields.action;
        if action == InvestmentAction::Invalid {
            return Err(TlyError::validation(
                "the transaction cannot have an invalid action",
            ));
        }
        if action.creates_lot()
            || matches!(
                action,
                InvestmentAction::StockSplit
                    | InvestmentAction::CostBasisAdjustment
                    | InvestmentAction::UndistributedCapitalGain
            )
        {
            tx.split_for(InvestmentSplitType::Investment)?;
        }
        if action.consumes_lots() {
            tx.id_investment_account()?;
            if !fields.lots.is_empty() {
                if matches!(
                    action,
                    InvestmentAction::Transfer
                        | InvestmentAction::Swap
                        | InvestmentAction::Spinoff
                ) && tx.id_investment_to_account().is_none()
                {
                    return Err(TlyError::validation(
                        "the transfer has no destination account",
                    ));
                }
                if !InvestmentLotsManager::validate_lots_count(
                    &fields.lots,
                    &tx.share_count().abs(),
                ) {
                    return Err(TlyError::validation(
                        "the number of shares in the lots does not match \
                         the number of shares in the transaction",
                    ));
                }
                self.lots.validate_usage(
                    action,
                    tx.id_investment_account()?,
                    None,
                    &fields.lots,
                    tx.date(),
                )?;
            }
        }
        Ok(())
    }

    /// Commit a new transaction: validate it, give it an id, route it into
    /// every affected ledger and the lot index, and notify observers.
    pub fn add_transaction(
        &mut self,
        mut tx: Transaction,
    ) -> Result<TransactionId> {
        if tx.id().is_some() {
            return Err(TlyError::state(
                "the transaction has already been committed",
            ));
        }
        if tx.split_count() == 0 {
            return Err(TlyError::validation(
                "the transaction has no splits",
            ));
        }

        if !tx.is_investment() {
            // multi-currency transactions get their contra-splits here
            add_trading_splits(
                &mut self.accounts,
                &self.currencies,
                &self.securities,
                &mut tx.splits,
            )?;
        }
        if !splits_balance(&self.accounts, tx.splits()) {
            return Err(TlyError::balance("the transaction does not balance"));
        }
        self.ensure_ledgers(&tx.splits)?;
        if !tx.is_investment() {
            for (account, totals) in
                LedgerManager::per_account_totals(tx.splits())
            {
                if totals.is_empty() {
                    let name = self
                        .accounts
                        .account(account)
                        .map(|a| a.name.clone())
                        .unwrap_or_default();
                    return Err(TlyError::validation(format!(
                        "the total splits for account {name} cannot be zero"
                    )));
                }
            }
        }
        self.validate_investment_for_commit(&tx)?;

        let id = self.transactions.allocate_id();
        tx.id = Some(id);
        debug!("committing transaction #{} on {}", id.0, tx.date());

        self.ledgers.insert_transaction(&tx, &mut self.observers)?;
        if let Some(fields) = tx.investment() {
            let action = fields.action;
            if action.creates_lot() || action == InvestmentAction::StockSplit
            {
                self.lots.update_transaction_split(&tx)?;
            } else if action.consumes_lots() && !fields.lots.is_empty() {
                let lots = fields.lots.clone();
                self.lots.update_usages(&tx, &lots)?;
            }
        }
        self.transactions.insert(tx)?;
        self.observers.emit(Event::TransactionAdded { tx: id });
        Ok(id)
    }

    /// Remove a transaction, reversing its ledger and lot effects.
    pub fn remove_transaction(&mut self, id: TransactionId) -> Result<()> {
        let tx = self.transactions.take(id)?;
        debug!("removing transaction #{}", id.0);
        self.ledgers.remove_transaction(&tx, &mut self.observers);
        self.lots.remove_transaction(id);
        self.observers.emit(Event::TransactionRemoved { tx: id });
        Ok(())
    }

    /// Move a transaction to another date, re-keying every ledger entry,
    /// any stock-split boundary, and the lot availability index.
    pub fn set_transaction_date(
        &mut self,
        id: TransactionId,
        date: NaiveDate,
    ) -> Result<()> {
        let mut tx = self.transactions.take(id)?;
        let old = tx.date();
        if old != date {
            tx.date = date;
            self.ledgers.on_date_changed(&tx, old, &mut self.observers);
            self.lots.update_date(id, date);
            self.observers.emit(Event::TransactionModified { tx: id });
        }
        self.transactions.put_back(tx);
        Ok(())
    }

    /// Replace the splits of a standard transaction.  Trading contra-splits
    /// are (re)derived; a list that cannot balance is refused.
    pub fn set_transaction_splits(
        &mut self,
        id: TransactionId,
        splits: Vec<Split>,
    ) -> Result<()> {
        let mut tx = self.transactions.take(id)?;
        if tx.is_investment() {
            self.transactions.put_back(tx);
            return Err(TlyError::state(
                "cannot set splits on an investment transaction; use the \
                 make operations",
            ));
        }
        let mut splits = splits;
        let checked = (|| -> Result<()> {
            add_trading_splits(
                &mut self.accounts,
                &self.currencies,
                &self.securities,
                &mut splits,
            )?;
            if !splits_balance(&self.accounts, &splits) {
                return Err(TlyError::balance("the splits do not balance"));
            }
            Ok(())
        })();
        if let Err(e) = checked.and_then(|()| self.ensure_ledgers(&splits)) {
            self.transactions.put_back(tx);
            return Err(e);
        }
        let old = std::mem::replace(&mut tx.splits, splits);
        self.ledgers
            .apply_split_change(&tx, &old, &mut self.observers);
        self.observers.emit(Event::TransactionModified { tx: id });
        self.transactions.put_back(tx);
        Ok(())
    }

    pub fn add_split(&mut self, id: TransactionId, split: Split) -> Result<()> {
        let account = self.accounts.get(split.account)?;
        if account.is_placeholder {
            return Err(TlyError::validation(format!(
                "account {} is a placeholder",
                account.name
            )));
        }
        if !self.ledgers.has_ledger(split.account) {
            self.ledgers.add_account(account);
        }
        let mut tx = self.transactions.take(id)?;
        if tx.is_investment() {
            self.transactions.put_back(tx);
            return Err(TlyError::state(
                "cannot edit the splits of an investment transaction",
            ));
        }
        tx.splits.push(split.clone());
        self.ledgers.on_split_added(&tx, &split, &mut self.observers);
        self.observers.emit(Event::TransactionModified { tx: id });
        self.transactions.put_back(tx);
        Ok(())
    }

    pub fn remove_split(
        &mut self,
        id: TransactionId,
        index: usize,
    ) -> Result<()> {
        let mut tx = self.transactions.take(id)?;
        if tx.is_investment() || index >= tx.split_count() {
            let investment = tx.is_investment();
            self.transactions.put_back(tx);
            return Err(if investment {
                TlyError::state(
                    "cannot edit the splits of an investment transaction",
                )
            } else {
                TlyError::lookup(format!("no split #{index}"))
            });
        }
        let split = tx.splits.remove(index);
        self.ledgers
            .on_split_removed(&tx, &split, &mut self.observers);
        self.observers.emit(Event::TransactionModified { tx: id });
        self.transactions.put_back(tx);
        Ok(())
    }

    pub fn set_split_amount(
        &mut self,
        id: TransactionId,
        index: usize,
        amount: Amount,
    ) -> Result<()> {
        let mut tx = self.transactions.take(id)?;
        if tx.is_investment() || index >= tx.split_count() {
            let investment = tx.is_investment();
            self.transactions.put_back(tx);
            return Err(if investment {
                TlyError::state(
                    "cannot edit the splits of an investment transaction",
                )
            } else {
                TlyError::lookup(format!("no split #{index}"))
            });
        }
        if let Some(s) = tx.splits.get_mut(index) {
            s.amount = amount;
        }
        let Some(split) = tx.splits.get(index).cloned() else {
            self.transactions.put_back(tx);
            return Err(TlyError::lookup(format!("no split #{index}")));
        };
        self.ledgers
            .on_split_amount_changed(&tx, &split, &mut self.observers);
        self.observers.emit(Event::TransactionModified { tx: id });
        self.transactions.put_back(tx);
        Ok(())
    }

    /// Edit the descriptive fields of a transaction (memo, number, payee,
    /// flags...) without touching ledgers.
    pub fn edit_transaction(
        &mut self,
        id: TransactionId,
        edit: impl FnOnce(&mut Transaction),
    ) -> Result<()> {
        let tx = self.transactions.get_mut(id)?;
        let date = tx.date();
        let splits = tx.splits.clone();
        edit(tx);
        // date and splits must go through their dedicated operations
        tx.date = date;
        tx.splits = splits;
        self.observers.emit(Event::TransactionModified { tx: id });
        Ok(())
    }

    // ---- investment "make" operations ----------------------------------

    /// Shape a detached transaction into a Buy/Sell/ShortSell/ShortCover/
    /// Fee, validating splits against the action matrix.  Lot state is not
    /// touched until the transaction is committed.
    pub fn build_buy_sell_fee(
        &self,
        tx: &mut Transaction,
        action: InvestmentAction,
        price_per_share: Amount,
        splits: Vec<Split>,
        types: Vec<InvestmentSplitType>,
        lots: &Lots,
    ) -> Result<()> {
        check_action(
            action,
            &[
                InvestmentAction::Buy,
                InvestmentAction::Sell,
                InvestmentAction::ShortSell,
                InvestmentAction::ShortCover,
                InvestmentAction::Fee,
            ],
        )?;
        if tx.investment().is_none() {
            return Err(TlyError::state("not an investment transaction"));
        }
        let (required, optional) = split_type_sets(action);
        check_splits(
            &self.accounts,
            &self.securities,
            &splits,
            &types,
            &required,
            &optional,
            action,
        )?;
        tx.splits = splits;
        tx.assign_types(&types);
        if let Some(fields) = tx.investment_mut() {
            fields.action = action;
            fields.price_per_share = price_per_share;
            fields.lots = if action.consumes_lots() {
                lots.clone()
            } else {
                Lots::new()
            };
            fields.distrib_composition.clear();
            fields.split_fraction = SplitFraction::identity();
        }
        Ok(())
    }

    fn apply_buy_sell_fee(
        &mut self,
        tx: &mut Transaction,
        action: InvestmentAction,
        price_per_share: Amount,
        splits: Vec<Split>,
        types: Vec<InvestmentSplitType>,
        lots: &Lots,
    ) -> Result<()> {
        self.build_buy_sell_fee(
            tx,
            action,
            price_per_share,
            splits,
            types,
            lots,
        )?;
        if matches!(
            action,
            InvestmentAction::Buy | InvestmentAction::ShortSell
        ) {
            self.lots.update_transaction_split(tx)?;
        } else if matches!(
            action,
            InvestmentAction::Sell | InvestmentAction::ShortCover
        ) {
            self.lots.update_usages(tx, lots)?;
        } else if let Some(id) = tx.id() {
            // a standalone Fee neither creates nor consumes lots; drop
            // anything the transaction carried from a previous action
            self.lots.remove_transaction(id);
        }
        Ok(())
    }

    /// Transition a committed transaction to Buy/Sell/ShortSell/ShortCover/
    /// Fee.  Transactional: on any validation or availability failure the
    /// previous state is restored.
    pub fn make_buy_sell_fee(
        &mut self,
        id: TransactionId,
        action: InvestmentAction,
        price_per_share: Amount,
        splits: Vec<Split>,
        types: Vec<InvestmentSplitType>,
        lots: &Lots,
    ) -> Result<()> {
        self.run_make(id, |repo, tx| {
            repo.apply_buy_sell_fee(
                tx,
                action,
                price_per_share,
                splits,
                types,
                lots,
            )
        })
    }

    pub fn build_transfer_swap(
        &self,
        tx: &mut Transaction,
        action: InvestmentAction,
        splits: Vec<Split>,
        types: Vec<InvestmentSplitType>,
        lots: &Lots,
    ) -> Result<()> {
        check_action(
            action,
            &[InvestmentAction::Transfer, InvestmentAction::Swap],
        )?;
        if tx.investment().is_none() {
            return Err(TlyError::state("not an investment transaction"));
        }
        let (required, optional) = split_type_sets(action);
        check_splits(
            &self.accounts,
            &self.securities,
            &splits,
            &types,
            &required,
            &optional,
            action,
        )?;
        tx.splits = splits;
        tx.assign_types(&types);
        if let Some(fields) = tx.investment_mut() {
            fields.action = action;
            fields.price_per_share = Amount::zero();
            fields.lots = lots.clone();
            fields.distrib_composition.clear();
            fields.split_fraction = SplitFraction::identity();
        }
        Ok(())
    }

    pub fn make_transfer_swap(
        &mut self,
        id: TransactionId,
        action: InvestmentAction,
        splits: Vec<Split>,
        types: Vec<InvestmentSplitType>,
        lots: &Lots,
    ) -> Result<()> {
        self.run_make(id, |repo, tx| {
            repo.build_transfer_swap(tx, action, splits, types, lots)?;
            repo.lots.update_usages(tx, lots)
        })
    }

    pub fn build_spinoff(
        &self,
        tx: &mut Transaction,
        splits: Vec<Split>,
        types: Vec<InvestmentSplitType>,
        lots: &Lots,
    ) -> Result<()> {
        if tx.investment().is_none() {
            return Err(TlyError::state("not an investment transaction"));
        }
        let (required, optional) = split_type_sets(InvestmentAction::Spinoff);
        check_splits(
            &self.accounts,
            &self.securities,
            &splits,
            &types,
            &required,
            &optional,
            InvestmentAction::Spinoff,
        )?;
        tx.splits = splits;
        tx.assign_types(&types);
        if let Some(fields) = tx.investment_mut() {
            fields.action = InvestmentAction::Spinoff;
            fields.price_per_share = Amount::zero();
            fields.lots = lots.clone();
            fields.distrib_composition.clear();
            fields.split_fraction = SplitFraction::identity();
        }
        Ok(())
    }

    pub fn make_spinoff(
        &mut self,
        id: TransactionId,
        splits: Vec<Split>,
        types: Vec<InvestmentSplitType>,
        lots: &Lots,
    ) -> Result<()> {
        self.run_make(id, |repo, tx| {
            repo.build_spinoff(tx, splits, types, lots)?;
            repo.lots.update_usages(tx, lots)
        })
    }

    /// Shape a transaction into a stock split: `new` shares replace `old`
    /// on the account, anchored by a zero-amount split.
    pub fn build_stock_split(
        &self,
        tx: &mut Transaction,
        account: AccountId,
        fraction: SplitFraction,
    ) -> Result<()> {
        check_id_investment_account(&self.accounts, account)?;
        if !fraction.is_valid() {
            return Err(TlyError::validation("the split fraction is invalid"));
        }
        if tx.investment().is_none() {
            return Err(TlyError::state("not an investment transaction"));
        }
        tx.splits.clear();
        if let Some(fields) = tx.investment_mut() {
            fields.action = InvestmentAction::StockSplit;
            fields.split_fraction = fraction;
            fields.price_per_share = Amount::zero();
            fields.types.clear();
            fields.lots.clear();
            fields.distrib_composition.clear();
        }
        tx.add_anchor_split(account);
        Ok(())
    }

    pub fn make_stock_split(
        &mut self,
        id: TransactionId,
        account: AccountId,
        fraction: SplitFraction,
    ) -> Result<()> {
        self.run_make(id, |repo, tx| {
            repo.build_stock_split(tx, account, fraction)?;
            repo.lots.update_transaction_split(tx)
        })
    }

    pub fn build_reinvested_div_dist(
        &self,
        tx: &mut Transaction,
        action: InvestmentAction,
        price_per_share: Amount,
        splits: Vec<Split>,
        types: Vec<InvestmentSplitType>,
        composition: DistribComposition,
    ) -> Result<()> {
        check_action(
            action,
            &[
                InvestmentAction::ReinvestDiv,
                InvestmentAction::ReinvestDistrib,
            ],
        )?;
        if tx.investment().is_none() {
            return Err(TlyError::state("not an investment transaction"));
        }
        let (required, optional) = split_type_sets(action);
        check_splits(
            &self.accounts,
            &self.securities,
            &splits,
            &types,
            &required,
            &optional,
            action,
        )?;
        if action == InvestmentAction::ReinvestDistrib {
            check_distrib_composition(action, &composition)?;
        }
        tx.splits = splits;
        tx.assign_types(&types);
        if let Some(fields) = tx.investment_mut() {
            fields.action = action;
            fields.price_per_share = price_per_share;
            fields.lots.clear();
            fields.split_fraction = SplitFraction::identity();
            set_composition(fields, composition);
        }
        Ok(())
    }

    pub fn make_reinvested_div_dist(
        &mut self,
        id: TransactionId,
        action: InvestmentAction,
        price_per_share: Amount,
        splits: Vec<Split>,
        types: Vec<InvestmentSplitType>,
        composition: DistribComposition,
    ) -> Result<()> {
        self.run_make(id, |repo, tx| {
            repo.build_reinvested_div_dist(
                tx,
                action,
                price_per_share,
                splits,
                types,
                composition,
            )?;
            repo.lots.update_transaction_split(tx)
        })
    }

    pub fn build_div_dist(
        &self,
        tx: &mut Transaction,
        action: InvestmentAction,
        investment_account: AccountId,
        splits: Vec<Split>,
        types: Vec<InvestmentSplitType>,
        composition: DistribComposition,
    ) -> Result<()> {
        check_action(
            action,
            &[InvestmentAction::Dividend, InvestmentAction::Distribution],
        )?;
        check_id_investment_account(&self.accounts, investment_account)?;
        if tx.investment().is_none() {
            return Err(TlyError::state("not an investment transaction"));
        }
        let (required, optional) = split_type_sets(action);
        check_splits(
            &self.accounts,
            &self.securities,
            &splits,
            &types,
            &required,
            &optional,
            action,
        )?;
        if action == InvestmentAction::Distribution {
            check_distrib_composition(action, &composition)?;
        }
        tx.splits = splits;
        tx.assign_types(&types);
        if let Some(fields) = tx.investment_mut() {
            fields.action = action;
            fields.price_per_share = Amount::zero();
            fields.lots.clear();
            fields.split_fraction = SplitFraction::identity();
            set_composition(fields, composition);
        }
        tx.add_anchor_split(investment_account);
        Ok(())
    }

    pub fn make_div_dist(
        &mut self,
        id: TransactionId,
        action: InvestmentAction,
        investment_account: AccountId,
        splits: Vec<Split>,
        types: Vec<InvestmentSplitType>,
        composition: DistribComposition,
    ) -> Result<()> {
        self.run_make(id, |repo, tx| {
            repo.build_div_dist(
                tx,
                action,
                investment_account,
                splits,
                types,
                composition,
            )?;
            repo.lots.remove_transaction(id);
            Ok(())
        })
    }

    pub fn build_cost_basis_adjustment(
        &self,
        tx: &mut Transaction,
        investment_account: AccountId,
        adjustment: Amount,
    ) -> Result<()> {
        check_id_investment_account(&self.accounts, investment_account)?;
        if tx.investment().is_none() {
            return Err(TlyError::state("not an investment transaction"));
        }
        tx.splits.clear();
        if let Some(fields) = tx.investment_mut() {
            fields.action = InvestmentAction::CostBasisAdjustment;
            fields.basis_adjustment = adjustment;
            fields.price_per_share = Amount::zero();
            fields.types.clear();
            fields.lots.clear();
            fields.distrib_composition.clear();
            fields.split_fraction = SplitFraction::identity();
        }
        tx.add_anchor_split(investment_account);
        Ok(())
    }

    pub fn make_cost_basis_adjustment(
        &mut self,
        id: TransactionId,
        investment_account: AccountId,
        adjustment: Amount,
    ) -> Result<()> {
        self.run_make(id, |repo, tx| {
            repo.build_cost_basis_adjustment(
                tx,
                investment_account,
                adjustment,
            )?;
            repo.lots.remove_transaction(id);
            Ok(())
        })
    }

    pub fn build_undistributed_capital_gain(
        &self,
        tx: &mut Transaction,
        investment_account: AccountId,
        capital_gain: Amount,
        tax_paid: Amount,
    ) -> Result<()> {
        check_id_investment_account(&self.accounts, investment_account)?;
        if tx.investment().is_none() {
            return Err(TlyError::state("not an investment transaction"));
        }
        tx.splits.clear();
        if let Some(fields) = tx.investment_mut() {
            fields.action = InvestmentAction::UndistributedCapitalGain;
            fields.basis_adjustment = capital_gain;
            fields.tax_paid = tax_paid;
            fields.price_per_share = Amount::zero();
            fields.types.clear();
            fields.lots.clear();
            fields.distrib_composition.clear();
            fields.split_fraction = SplitFraction::identity();
        }
        tx.add_anchor_split(investment_account);
        Ok(())
    }

    pub fn make_undistributed_capital_gain(
        &mut self,
        id: TransactionId,
        investment_account: AccountId,
        capital_gain: Amount,
        tax_paid: Amount,
    ) -> Result<()> {
        self.run_make(id, |repo, tx| {
            repo.build_undistributed_capital_gain(
                tx,
                investment_account,
                capital_gain,
                tax_paid,
            )?;
            repo.lots.remove_transaction(id);
            Ok(())
        })
    }

    /// Change the percentage composition of a Distribution or Reinvested
    /// Distribution.
    pub fn set_distrib_composition(
        &mut self,
        id: TransactionId,
        composition: DistribComposition,
    ) -> Result<()> {
        let tx = self.transactions.get_mut(id)?;
        let Some(fields) = tx.investment_mut() else {
            return Err(TlyError::state("not an investment transaction"));
        };
        if !matches!(
            fields.action,
            InvestmentAction::Distribution | InvestmentAction::ReinvestDistrib
        ) {
            return Err(TlyError::state(
                "the composition can only be set on a distribution",
            ));
        }
        check_distrib_composition(fields.action, &composition)?;
        set_composition(fields, composition);
        self.observers.emit(Event::TransactionModified { tx: id });
        Ok(())
    }

    // Snapshot, apply, restore-on-failure; then replay the split changes
    // through the ledgers and emit the action/ratio events in order.
    fn run_make(
        &mut self,
        id: TransactionId,
        apply: impl FnOnce(&mut Self, &mut Transaction) -> Result<()>,
    ) -> Result<()> {
        let mut tx = self.transactions.take(id)?;
        if !tx.is_investment() {
            self.transactions.put_back(tx);
            return Err(TlyError::state("not an investment transaction"));
        }
        let snapshot = tx.clone();
        let old_action = tx.investment_action();
        let old_fraction = tx.split_fraction();
        let old_splits = tx.splits().to_vec();
        match apply(self, &mut tx) {
            Ok(()) => {
                self.ledgers.apply_split_change(
                    &tx,
                    &old_splits,
                    &mut self.observers,
                );
                if tx.investment_action() != old_action {
                    self.ledgers.on_investment_action_changed(
                        &tx,
                        old_action,
                        &mut self.observers,
                    );
                } else if tx.investment_action()
                    == InvestmentAction::StockSplit
                    && tx.split_fraction() != old_fraction
                {
                    self.ledgers
                        .on_stock_split_amount_changed(&tx, &mut self.observers);
                }
                self.observers.emit(Event::TransactionModified { tx: id });
                self.transactions.put_back(tx);
                Ok(())
            }
            Err(e) => {
                self.transactions.put_back(snapshot);
                Err(e)
            }
        }
    }

    // ---- queries --------------------------------------------------------

    pub fn balance(&self, account: AccountId) -> Result<Amount> {
        Ok(self.ledger(account)?.balance(
            None,
            &self.accounts,
            &self.prices,
        ))
    }

    pub fn balance_at(
        &self,
        account: AccountId,
        date: NaiveDate,
    ) -> Result<Amount> {
        Ok(self.ledger(account)?.balance_at(
            date,
            None,
            &self.accounts,
            &self.prices,
        ))
    }

    pub fn cost_basis_before(
        &self,
        account: AccountId,
        before: Option<TransactionId>,
    ) -> Result<Amount> {
        self.ledgers.cost_basis_before(
            &self.transactions,
            &self.accounts,
            &self.securities,
            &self.currencies,
            &self.lots,
            account,
            before,
        )
    }

    pub fn cost_basis_at(
        &self,
        account: AccountId,
        date: Option<NaiveDate>,
    ) -> Result<Amount> {
        self.ledgers.cost_basis_at(
            &self.transactions,
            &self.accounts,
            &self.securities,
            &self.currencies,
            &self.lots,
            account,
            date,
        )
    }

    // ---- schedules ------------------------------------------------------

    pub fn add_schedule(
        &mut self,
        description: &str,
        auto_enter: bool,
        recurrence: Recurrence,
        template: Transaction,
    ) -> Result<ScheduleId> {
        self.schedules
            .add(description, auto_enter, recurrence, template)
    }

    /// Apply edited settings (and optionally a new template) to an existing
    /// schedule.
    pub fn update_schedule(
        &mut self,
        id: ScheduleId,
        description: &str,
        auto_enter: bool,
        recurrence: Recurrence,
        template: Option<Transaction>,
    ) -> Result<()> {
        let schedule = self.schedules.get_mut(id)?;
        schedule.set_recurrence(recurrence)?;
        if let Some(template) = template {
            schedule.set_template(template)?;
        }
        schedule.set_description(description);
        schedule.set_auto_enter(auto_enter);
        schedule.set_active(true);
        Ok(())
    }

    /// Materialise one occurrence of a schedule into a committed
    /// transaction.
    pub fn enter_schedule_occurrence(
        &mut self,
        id: ScheduleId,
        date: NaiveDate,
    ) -> Result<TransactionId> {
        let tx = self.schedules.get_mut(id)?.enter_occurrence_of(date)?;
        let txid = self.add_transaction(tx)?;
        self.observers
            .emit(Event::ScheduleOccurrenceEntered { schedule: id, date });
        Ok(txid)
    }

    pub fn enter_next_schedule_occurrence(
        &mut self,
        id: ScheduleId,
    ) -> Result<TransactionId> {
        let date = self
            .schedules
            .get(id)?
            .next_occurrences_dates(2, None)
            .first()
            .copied()
            .ok_or_else(|| {
                TlyError::validation(
                    "there are no future occurrences of this schedule",
                )
            })?;
        self.enter_schedule_occurrence(id, date)
    }

    pub fn cancel_schedule_occurrence(
        &mut self,
        id: ScheduleId,
        date: NaiveDate,
    ) -> Result<()> {
        self.schedules.get_mut(id)?.cancel_occurrence_of(date)?;
        self.observers
            .emit(Event::ScheduleOccurrenceCanceled { schedule: id, date });
        Ok(())
    }

    pub fn cancel_next_schedule_occurrence(
        &mut self,
        id: ScheduleId,
    ) -> Result<()> {
        let date = self
            .schedules
            .get(id)?
            .next_occurrences_dates(2, None)
            .first()
            .copied()
            .ok_or_else(|| {
                TlyError::validation(
                    "there are no future occurrences of this schedule",
                )
            })?;
        self.cancel_schedule_occurrence(id, date)
    }

    pub fn remove_schedule(&mut self, id: ScheduleId) -> bool {
        let removed = self.schedules.remove(id);
        if removed {
            self.observers.emit(Event::ScheduleRemoved { schedule: id });
        }
        removed
    }

    pub fn remove_schedules_for_account(&mut self, account: AccountId) {
        for id in self.schedules.remove_schedules_for_account(account) {
            self.observers.emit(Event::ScheduleRemoved { schedule: id });
        }
    }

    pub fn due_schedules(&self) -> Vec<(ScheduleId, NaiveDate)> {
        self.schedules.due_schedules(self.today())
    }

    // ---- persistence hooks ---------------------------------------------

    /// Register a transaction loaded from storage.  Ledgers, lots and role
    /// indexes are wired up by [`after_load`](Self::after_load).
    pub fn load_transaction(
        &mut self,
        id: TransactionId,
        mut tx: Transaction,
    ) -> Result<()> {
        tx.id = Some(id);
        self.transactions.load(tx)?;
        Ok(())
    }

    /// Register a lot loaded from storage.
    pub fn load_lot(
        &mut self,
        id: LotId,
        transaction: TransactionId,
        amount: Amount,
    ) {
        self.lots.load_lot(id, transaction, amount);
    }

    /// Post-load pass: resolve every back-reference and rebuild the
    /// in-memory indices (ledgers from transactions, lot availability from
    /// transactions, stale schedules pruned).
    pub fn after_load(&mut self) -> Result<()> {
        let ids: Vec<TransactionId> =
            self.transactions.iter().filter_map(|t| t.id()).collect();
        for id in &ids {
            let tx = self.transactions.get_mut(*id)?;
            if tx.is_investment() {
                tx.reindex_types();
            }
        }

        let account_ids: Vec<AccountId> =
            self.accounts.iter().map(|a| a.id).collect();
        for id in account_ids {
            let account = self.accounts.get(id)?;
            self.ledgers.add_account(account);
        }

        for id in &ids {
            let tx = self.transactions.get(*id)?;
            self.ledgers.insert_transaction(tx, &mut self.observers)?;
        }

        self.lots.after_load(&self.transactions)?;

        for id in self.schedules.after_load() {
            self.observers.emit(Event::ScheduleRemoved { schedule: id });
        }
        Ok(())
    }

    /// Drop the whole world, keeping only the configured "today".
    pub fn unload(&mut self) {
        let today = self.today();
        *self = Repository::with_today(today);
    }
}

// When a distribution's composition is absent, everything is "other"
// income; non-distribution actions carry none.
fn set_composition(
    fields: &mut InvestmentFields,
    composition: DistribComposition,
) {
    if matches!(
        fields.action,
        InvestmentAction::Distribution | InvestmentAction::ReinvestDistrib
    ) {
        fields.distrib_composition = composition;
        if fields.distrib_composition.is_empty() {
            fields
                .distrib_composition
                .insert(DistribType::Other, Amount::from_int(100, 0));
        }
    } else {
        fields.distrib_composition.clear();
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::currencies::Currency;
    use crate::schedules::Frequency;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    pub fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    pub fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn currency(code: &str) -> Currency {
        Currency {
            code: code.to_string(),
            name: code.to_string(),
            symbol: code.to_string(),
            precision: 2,
        }
    }

    pub fn cash_repo() -> (Repository, AccountId, AccountId) {
        let mut repo = Repository::with_today(d("2024-12-31"));
        repo.currencies.add(currency("CAD")).unwrap();
        repo.currencies.add(currency("USD")).unwrap();
        let top = repo.accounts().top_level();
        let a = repo
            .add_account(top, "A", AccountType::Checking, "CAD", None, false)
            .unwrap();
        let b = repo
            .add_account(top, "B", AccountType::Savings, "CAD", None, false)
            .unwrap();
        (repo, a, b)
    }

    /// An investment account (USD security, 4-digit share precision) plus a
    /// USD cash account.
    pub fn investment_repo() -> (Repository, AccountId, AccountId, SecurityId)
    {
        let mut repo = Repository::with_today(d("2024-12-31"));
        repo.currencies.add(currency("USD")).unwrap();
        let sec = repo.securities.add("Sample Corp", "SEC", "USD", 4);
        let top = repo.accounts().top_level();
        let i = repo
            .add_account(
                top,
                "Shares",
                AccountType::Investment,
                "",
                Some(sec),
                false,
            )
            .unwrap();
        let k = repo
            .add_account(top, "Cash", AccountType::Checking, "USD", None, false)
            .unwrap();
        (repo, i, k, sec)
    }

    /// Build the canonical Buy/Sell split list the way the editing buffer
    /// does: cost/proceeds against cash, shares on the investment account,
    /// then the trading contra-splits.
    pub fn trade(
        repo: &mut Repository,
        action: InvestmentAction,
        date: &str,
        investment: AccountId,
        cash: AccountId,
        quantity: &str,
        price: &str,
        lots: Lots,
    ) -> TransactionId {
        let quantity = amt(quantity);
        let price = amt(price);
        let total = quantity * price;
        let signed_quantity = match action {
            InvestmentAction::Buy | InvestmentAction::ShortCover => quantity,
            _ => -quantity,
        };
        let mut splits = vec![
            Split::new(
                if signed_quantity.is_positive() { -total } else { total },
                cash,
                "USD",
            ),
            Split::new(signed_quantity, investment, ""),
        ];
        let mut types = vec![
            InvestmentSplitType::CostProceeds,
            InvestmentSplitType::Investment,
        ];
        add_trading_splits(
            &mut repo.accounts,
            &repo.currencies,
            &repo.securities,
            &mut splits,
        )
        .unwrap();
        while types.len() < splits.len() {
            types.push(InvestmentSplitType::Trading);
        }
        let mut tx = Transaction::new_investment(d(date));
        repo.build_buy_sell_fee(&mut tx, action, price, splits, types, &lots)
            .unwrap();
        repo.add_transaction(tx).unwrap()
    }

    #[test]
    fn test_simple_transfer() {
        let (mut repo, a, b) = cash_repo();
        let tx = Transaction::with_splits(
            d("2024-01-10"),
            vec![
                Split::new(amt("100.00"), a, "CAD"),
                Split::new(amt("-100.00"), b, "CAD"),
            ],
        );
        repo.add_transaction(tx).unwrap();

        assert_eq!(repo.balance(a).unwrap(), amt("100.00"));
        assert_eq!(repo.balance(b).unwrap(), amt("-100.00"));
        assert_eq!(repo.balance_at(a, d("2024-01-09")).unwrap(), amt("0"));
        assert_eq!(repo.balance_at(b, d("2024-01-09")).unwrap(), amt("0"));
        assert_eq!(
            repo.balance_at(a, d("2024-01-10")).unwrap(),
            amt("100.00")
        );
    }

    #[test]
    fn test_multi_currency_exchange() {
        let (mut repo, a, _) = cash_repo();
        let top = repo.accounts().top_level();
        let b = repo
            .add_account(top, "B-USD", AccountType::Savings, "USD", None, false)
            .unwrap();
        {
            let mut tx = Transaction::with_splits(
                d("2024-02-01"),
                vec![
                    Split::new(amt("-130.00"), a, "CAD"),
                    Split::new(amt("100.00"), b, "USD"),
                ],
            );
            tx.memo = "exchange".to_string();
            repo.add_transaction(tx).unwrap();
        }

        let id = TransactionId(1);
        let tx = repo.transactions().get(id).unwrap();
        assert_eq!(tx.split_count(), 4);
        assert!(crate::transactions::is_currency_exchange(
            repo.accounts(),
            tx.splits()
        ));

        // balance invariant holds per currency once trading splits are in
        for cur in ["CAD", "USD"] {
            let total = tx
                .splits()
                .iter()
                .filter(|s| s.currency == cur)
                .fold(Amount::zero(), |acc, s| acc + s.amount);
            assert!(total.is_zero(), "currency {cur} does not net to zero");
        }

        let cad_trading =
            repo.accounts().get_by_path("Trading::CAD").unwrap();
        let usd_trading =
            repo.accounts().get_by_path("Trading::USD").unwrap();
        assert_eq!(repo.balance(a).unwrap(), amt("-130.00"));
        assert_eq!(repo.balance(b).unwrap(), amt("100.00"));
        assert_eq!(repo.balance(cad_trading).unwrap(), amt("130.00"));
        assert_eq!(repo.balance(usd_trading).unwrap(), amt("-100.00"));
    }

    #[test]
    fn test_buy_sell_fifo_lots() {
        let (mut repo, i, k, _) = investment_repo();
        trade(
            &mut repo,
            InvestmentAction::Buy,
            "2024-03-01",
            i,
            k,
            "10.0000",
            "50.00",
            Lots::new(),
        );
        trade(
            &mut repo,
            InvestmentAction::Buy,
            "2024-04-01",
            i,
            k,
            "10.0000",
            "60.00",
            Lots::new(),
        );
        let lot1 = LotId(1);
        let lot2 = LotId(2);
        assert_eq!(
            repo.lots().lots_available(
                crate::investments::InvestmentActionClass::Long,
                i,
                d("2024-04-30")
            ),
            btreemap! { lot1 => amt("10.0000"), lot2 => amt("10.0000") }
        );

        trade(
            &mut repo,
            InvestmentAction::Sell,
            "2024-05-01",
            i,
            k,
            "15.0000",
            "70.00",
            btreemap! { lot1 => amt("10.0000"), lot2 => amt("5.0000") },
        );

        assert_eq!(repo.balance(i).unwrap(), amt("5.0000"));
        assert_eq!(repo.balance(k).unwrap(), amt("-50.00"));
        // the remaining 5 shares all come from the 60 USD lot
        assert_eq!(repo.cost_basis_before(i, None).unwrap(), amt("300.00"));
        assert_eq!(
            repo.lots().lots_available(
                crate::investments::InvestmentActionClass::Long,
                i,
                d("2024-05-02")
            ),
            btreemap! { lot2 => amt("5.0000") }
        );
    }

    #[test]
    fn test_lot_overdraw_rejected() {
        let (mut repo, i, k, _) = investment_repo();
        trade(
            &mut repo,
            InvestmentAction::Buy,
            "2024-03-01",
            i,
            k,
            "10.0000",
            "50.00",
            Lots::new(),
        );
        let lot1 = LotId(1);

        let quantity = amt("12.0000");
        let price = amt("70.00");
        let mut splits = vec![
            Split::new(quantity * price, k, "USD"),
            Split::new(-quantity, i, ""),
        ];
        let mut types = vec![
            InvestmentSplitType::CostProceeds,
            InvestmentSplitType::Investment,
        ];
        add_trading_splits(
            &mut repo.accounts,
            &repo.currencies,
            &repo.securities,
            &mut splits,
        )
        .unwrap();
        while types.len() < splits.len() {
            types.push(InvestmentSplitType::Trading);
        }
        let mut tx = Transaction::new_investment(d("2024-05-01"));
        repo.build_buy_sell_fee(
            &mut tx,
            InvestmentAction::Sell,
            price,
            splits,
            types,
            &btreemap! { lot1 => amt("12.0000") },
        )
        .unwrap();
        let err = repo.add_transaction(tx).unwrap_err();
        assert!(matches!(err, TlyError::Availability(_)));
    }

    #[test]
    fn test_stock_split_retroactive() {
        let (mut repo, i, k, _) = investment_repo();
        trade(
            &mut repo,
            InvestmentAction::Buy,
            "2024-03-01",
            i,
            k,
            "10.0000",
            "50.00",
            Lots::new(),
        );
        trade(
            &mut repo,
            InvestmentAction::Buy,
            "2024-04-01",
            i,
            k,
            "10.0000",
            "60.00",
            Lots::new(),
        );

        let mut split_tx = Transaction::new_investment(d("2024-06-01"));
        repo.build_stock_split(&mut split_tx, i, SplitFraction::new(2, 1))
            .unwrap();
        let split_id = repo.add_transaction(split_tx).unwrap();

        // historical share counts are reported post-split
        assert_eq!(
            repo.balance_at(i, d("2024-03-15")).unwrap(),
            amt("20.0000")
        );
        assert_eq!(repo.balance(i).unwrap(), amt("40.0000"));
        // availability is scaled too
        assert_eq!(
            repo.lots().lots_available(
                crate::investments::InvestmentActionClass::Long,
                i,
                d("2024-06-02")
            ),
            btreemap! {
                LotId(1) => amt("20.0000"),
                LotId(2) => amt("20.0000"),
            }
        );

        repo.remove_transaction(split_id).unwrap();
        assert_eq!(
            repo.balance_at(i, d("2024-03-15")).unwrap(),
            amt("10.0000")
        );
        assert_eq!(repo.balance(i).unwrap(), amt("20.0000"));
    }

    #[test]
    fn test_schedule_enter() {
        let (mut repo, a, b) = cash_repo();
        let mut rec = Recurrence::new(d("2024-07-01"), Frequency::Monthly, 1);
        rec.days_of_month.insert(15);
        rec.stops = true;
        rec.num_remaining = Some(3);
        let template = Transaction::with_splits(
            d("2024-07-01"),
            vec![
                Split::new(amt("100.00"), a, "CAD"),
                Split::new(amt("-100.00"), b, "CAD"),
            ],
        );
        let sid = repo.add_schedule("rent", false, rec, template).unwrap();

        assert_eq!(
            repo.schedules().get(sid).unwrap().next_occurrences_dates(5, None),
            vec![d("2024-07-15"), d("2024-08-15"), d("2024-09-15")]
        );

        let txid =
            repo.enter_schedule_occurrence(sid, d("2024-07-15")).unwrap();
        let tx = repo.transactions().get(txid).unwrap();
        assert_eq!(tx.date(), d("2024-07-15"));
        assert_eq!(repo.balance(a).unwrap(), amt("100.00"));

        let schedule = repo.schedules().get(sid).unwrap();
        assert_eq!(
            schedule.next_occurrences_dates(5, None),
            vec![d("2024-08-15"), d("2024-09-15")]
        );
        assert_eq!(schedule.recurrence().num_remaining, Some(2));

        // re-entering the same date is refused
        assert!(repo
            .enter_schedule_occurrence(sid, d("2024-07-15"))
            .is_err());
    }

    #[test]
    fn test_ledger_consistency_and_events() {
        let (mut repo, a, b) = cash_repo();
        let deltas = Rc::new(RefCell::new(Vec::new()));
        let sink = deltas.clone();
        repo.subscribe(move |e| {
            if let Event::BalanceChanged { account, delta } = e {
                sink.borrow_mut().push((*account, delta.clone()));
            }
        });

        let mut expected = Amount::zero();
        for (day, amount) in
            [("2024-01-10", "25.00"), ("2024-01-05", "-10.00"), ("2024-02-01", "7.50")]
        {
            let tx = Transaction::with_splits(
                d(day),
                vec![
                    Split::new(amt(amount), a, "CAD"),
                    Split::new(-amt(amount), b, "CAD"),
                ],
            );
            repo.add_transaction(tx).unwrap();
            expected += amt(amount);
        }
        assert_eq!(repo.balance(a).unwrap(), expected);
        assert_eq!(repo.balance(b).unwrap(), -expected);
        assert_eq!(
            repo.balance_at(a, d("2024-01-31")).unwrap(),
            amt("15.00")
        );
        // one delta per affected account per transaction
        assert_eq!(deltas.borrow().len(), 6);

        // date move re-keys the entries
        repo.set_transaction_date(TransactionId(1), d("2024-03-01"))
            .unwrap();
        assert_eq!(
            repo.balance_at(a, d("2024-01-31")).unwrap(),
            amt("-10.00")
        );
        assert_eq!(repo.balance(a).unwrap(), expected);

        // removal reverses everything
        repo.remove_transaction(TransactionId(2)).unwrap();
        assert_eq!(repo.balance(a).unwrap(), amt("32.50"));
    }

    #[test]
    fn test_transfer_moves_cost_basis() {
        let (mut repo, i, k, sec) = investment_repo();
        let top = repo.accounts().top_level();
        let i2 = repo
            .add_account(
                top,
                "Shares elsewhere",
                AccountType::Investment,
                "",
                Some(sec),
                false,
            )
            .unwrap();
        trade(
            &mut repo,
            InvestmentAction::Buy,
            "2024-03-01",
            i,
            k,
            "10.0000",
            "50.00",
            Lots::new(),
        );

        let mut tx = Transaction::new_investment(d("2024-04-01"));
        repo.build_transfer_swap(
            &mut tx,
            InvestmentAction::Transfer,
            vec![
                Split::new(amt("-5.0000"), i, ""),
                Split::new(amt("5.0000"), i2, ""),
            ],
            vec![
                InvestmentSplitType::InvestmentFrom,
                InvestmentSplitType::InvestmentTo,
            ],
            &Lots::new(),
        )
        .unwrap();
        repo.add_transaction(tx).unwrap();

        assert_eq!(repo.balance(i).unwrap(), amt("5.0000"));
        assert_eq!(repo.balance(i2).unwrap(), amt("5.0000"));
        // half the basis followed the shares
        assert_eq!(repo.cost_basis_before(i, None).unwrap(), amt("250.00"));
        assert_eq!(repo.cost_basis_before(i2, None).unwrap(), amt("250.00"));
    }

    #[test]
    fn test_balance_projection_through_rates() {
        let (mut repo, a, b) = cash_repo();
        // a CAD account that also happens to hold a USD total
        let tx = Transaction::with_splits(
            d("2024-01-10"),
            vec![
                Split::new(amt("100.00"), a, "USD"),
                Split::new(amt("-100.00"), b, "USD"),
            ],
        );
        repo.add_transaction(tx).unwrap();
        repo.set_rate("USD", "CAD", d("2024-01-01"), 1.30).unwrap();

        assert_eq!(repo.balance(a).unwrap(), amt("130.00"));
        assert_eq!(
            repo.ledger(a).unwrap().balance(
                Some("USD"),
                repo.accounts(),
                repo.prices(),
            ),
            amt("100.00")
        );
        assert_eq!(
            repo.ledger(a)
                .unwrap()
                .currencies_used(None, None, repo.transactions()),
            std::collections::BTreeSet::from(["USD".to_string()])
        );
    }

    #[test]
    fn test_due_schedules() {
        let (mut repo, a, b) = cash_repo();
        let rec = Recurrence::new(d("2024-12-01"), Frequency::Daily, 1);
        let template = Transaction::with_splits(
            d("2024-12-01"),
            vec![
                Split::new(amt("10.00"), a, "CAD"),
                Split::new(amt("-10.00"), b, "CAD"),
            ],
        );
        let sid = repo.add_schedule("daily", true, rec, template).unwrap();
        let due = repo.due_schedules();
        assert_eq!(due, vec![(sid, d("2024-12-01"))]);

        repo.cancel_schedule_occurrence(sid, d("2024-12-01")).unwrap();
        assert_eq!(repo.due_schedules(), vec![(sid, d("2024-12-02"))]);
        assert!(repo.transactions().is_empty());
    }

    #[test]
    fn test_unbalanced_rejected() {
        let (mut repo, a, b) = cash_repo();
        let tx = Transaction::with_splits(
            d("2024-01-10"),
            vec![
                Split::new(amt("100.00"), a, "CAD"),
                Split::new(amt("-90.00"), b, "CAD"),
            ],
        );
        assert!(matches!(
            repo.add_transaction(tx),
            Err(TlyError::Balance(_))
        ));

        let zero = Transaction::with_splits(
            d("2024-01-10"),
            vec![
                Split::new(amt("100.00"), a, "CAD"),
                Split::new(amt("-100.00"), a, "CAD"),
            ],
        );
        assert!(matches!(
            repo.add_transaction(zero),
            Err(TlyError::Validation(_))
        ));
    }

    #[test]
    fn test_make_transition_rolls_back() {
        let (mut repo, i, k, _) = investment_repo();
        let buy = trade(
            &mut repo,
            InvestmentAction::Buy,
            "2024-03-01",
            i,
            k,
            "10.0000",
            "50.00",
            Lots::new(),
        );

        // try to turn the buy into a sale consuming its own (future) lot
        // more than available
        let quantity = amt("99.0000");
        let price = amt("10.00");
        let mut splits = vec![
            Split::new(quantity * price, k, "USD"),
            Split::new(-quantity, i, ""),
        ];
        let mut types = vec![
            InvestmentSplitType::CostProceeds,
            InvestmentSplitType::Investment,
        ];
        add_trading_splits(
            &mut repo.accounts,
            &repo.currencies,
            &repo.securities,
            &mut splits,
        )
        .unwrap();
        while types.len() < splits.len() {
            types.push(InvestmentSplitType::Trading);
        }
        let err = repo
            .make_buy_sell_fee(
                buy,
                InvestmentAction::Sell,
                price,
                splits,
                types,
                &btreemap! { LotId(1) => amt("99.0000") },
            )
            .unwrap_err();
        assert!(err.is_recoverable());

        // the transaction is untouched
        let tx = repo.transactions().get(buy).unwrap();
        assert_eq!(tx.investment_action(), InvestmentAction::Buy);
        assert_eq!(repo.balance(i).unwrap(), amt("10.0000"));
        assert_eq!(repo.cost_basis_before(i, None).unwrap(), amt("500.00"));
    }
}
