use crate::accounts::{AccountCollection, AccountId};
use crate::amounts::Amount;
use crate::errors::{Result, TlyError};
use crate::fragments::SplitFraction;
use crate::investments::{
    DistribComposition, InvestmentAction, InvestmentSplitType,
};
use crate::lots::{InvestmentLotsManager, Lots};
use crate::repositories::Repository;
use crate::schedules::{Frequency, Recurrence, Schedule, ScheduleId};
use crate::transactions::{
    add_trading_splits, splits_balance, splits_imbalances, ClearedStatus,
    Split, Transaction, TransactionId,
};
use chrono::NaiveDate;

/// Editable columns of a ledger row.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Column {
    Status,
    Flag,
    No,
    Date,
    Memo,
    Payee,
    Cleared,
    Transfer,
    Debit,
    Credit,
    Balance,
    Action,
    Quantity,
    Price,
    Fee,
}

/// A single-field edit pushed into the buffer.
#[derive(Clone, Debug)]
pub enum EditValue {
    Text(String),
    Date(NaiveDate),
    Amount(Amount),
    Account {
        account: Option<AccountId>,
        currency: Option<String>,
    },
    Cleared(ClearedStatus),
    Flag(bool),
    Action(InvestmentAction),
}

/// What the buffer is currently editing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BufferState {
    #[default]
    Empty,
    New,
    Existing(TransactionId),
}

/// Outcome of asking the user how to convert a cross-currency transfer.
pub enum ExchangeResolution {
    Rate(f64),
    Amount(Amount),
}

/// Collaborator consulted when a transfer crosses currencies: given the
/// from/to pair, the source amount and the date, it produces either a rate
/// or an explicit target amount.  `None` aborts the save.
pub trait CurrencyExchangeResolver {
    fn resolve(
        &mut self,
        from: &str,
        to: &str,
        amount: &Amount,
        date: NaiveDate,
    ) -> Option<ExchangeResolution>;
}

/// A fixed-rate resolver, convenient for non-interactive callers.
pub struct FixedRateResolver(pub f64);

impl CurrencyExchangeResolver for FixedRateResolver {
    fn resolve(
        &mut self,
        _from: &str,
        _to: &str,
        _amount: &Amount,
        _date: NaiveDate,
    ) -> Option<ExchangeResolution> {
        Some(ExchangeResolution::Rate(self.0))
    }
}

/// What to do when the entered payee name is unknown.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NewPayeePolicy {
    Add,
    Drop,
    Cancel,
}

/// One pending edit of one ledger row.  Fields mirror the editable surface;
/// `splits` switches the buffer into split mode when non-empty.
pub struct LedgerBuffer {
    pub account: AccountId,
    pub state: BufferState,
    today: NaiveDate,

    pub date: NaiveDate,
    pub no: String,
    pub memo: String,
    pub note: String,
    pub payee: String,
    pub cleared: ClearedStatus,
    pub flagged: bool,
    pub attachments: Vec<String>,

    pub id_transfer: Option<AccountId>,
    pub transfer_currency: String,
    pub debit: Amount,
    pub credit: Amount,
    /// The counterpart amount of a currency exchange.
    pub exch_transfer: Amount,
    pub multi_currency: bool,

    pub is_schedule: bool,
    pub schedule: Option<ScheduleId>,
    pub schedule_description: String,
    pub auto_enter: bool,
    pub recurrence: Recurrence,

    pub splits: Vec<Split>,
}

impl LedgerBuffer {
    pub fn new(account: AccountId, today: NaiveDate) -> LedgerBuffer {
        LedgerBuffer {
            account,
            state: BufferState::Empty,
            today,
            date: today,
            no: String::new(),
            memo: String::new(),
            note: String::new(),
            payee: String::new(),
            cleared: ClearedStatus::None,
            flagged: false,
            attachments: Vec::new(),
            id_transfer: None,
            transfer_currency: String::new(),
            debit: Amount::zero(),
            credit: Amount::zero(),
            exch_transfer: Amount::zero(),
            multi_currency: false,
            is_schedule: false,
            schedule: None,
            schedule_description: String::new(),
            auto_enter: false,
            recurrence: Recurrence::new(today, Frequency::Once, 0),
            splits: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        *self = LedgerBuffer::new(self.account, self.today);
    }

    pub fn start_new(&mut self) {
        self.clear();
        self.state = BufferState::New;
    }

    /// Turn the pending edit into a schedule definition.
    pub fn make_schedule(&mut self) {
        if !self.is_schedule {
            self.is_schedule = true;
            self.schedule = None;
            self.recurrence = Recurrence::new(self.date, Frequency::Once, 0);
        }
    }

    pub fn load_transaction(&mut self, tx: &Transaction, repo: &Repository) {
        self.clear();
        self.state = match tx.id() {
            Some(id) => BufferState::Existing(id),
            None => BufferState::New,
        };
        self.no = tx.no().to_string();
        self.date = tx.date();
        self.memo = tx.memo().to_string();
        self.note = tx.note().to_string();
        self.cleared = tx.cleared_status();
        self.flagged = tx.is_flagged();
        self.attachments = tx.attachments().to_vec();
        self.payee = tx
            .payee()
            .and_then(|id| repo.payees.get(id))
            .map(|p| p.name.clone())
            .unwrap_or_default();
        self.load_splits(tx.splits(), repo);
    }

    pub fn load_schedule(&mut self, schedule: &Schedule, repo: &Repository) {
        self.load_transaction(schedule.template(), repo);
        self.state = BufferState::New;
        self.is_schedule = true;
        self.schedule = Some(schedule.id());
        self.schedule_description = schedule.description().to_string();
        self.auto_enter = schedule.auto_enter();
        self.recurrence = schedule.recurrence().clone();
    }

    fn load_splits(&mut self, splits: &[Split], repo: &Repository) {
        let mine = self.account;
        let one_line = |buffer: &mut LedgerBuffer, cur: &Split, oth: &Split| {
            buffer.debit = if cur.amount.is_positive() {
                cur.amount
            } else {
                Amount::zero()
            };
            buffer.credit = if cur.amount.is_negative() {
                -cur.amount
            } else {
                Amount::zero()
            };
            buffer.id_transfer = Some(oth.account);
            buffer.transfer_currency = oth.currency.clone();
        };

        if let [a, b] = splits {
            if a.account == mine {
                one_line(self, a, b);
            } else {
                one_line(self, b, a);
            }
        } else if crate::transactions::is_currency_exchange(
            repo.accounts(),
            splits,
        ) {
            let cur = splits.iter().find(|s| s.account == mine);
            let oth = splits.iter().find(|s| {
                s.account != mine
                    && !repo.accounts().is_currency_trading(s.account)
            });
            if let (Some(cur), Some(oth)) = (cur, oth) {
                let exch = oth.amount.abs();
                one_line(self, cur, oth);
                self.multi_currency = true;
                self.exch_transfer = exch;
            }
        } else {
            self.splits = splits.to_vec();
            // the current account's split leads
            if let Some(at) =
                self.splits.iter().position(|s| s.account == mine)
            {
                self.splits.swap(at, 0);
            }
            let total = Transaction::totals_for_account(mine, &self.splits);
            let main = total.iter().next().map(|(_, a)| *a).unwrap_or_default();
            self.debit = if main.is_positive() { main } else { Amount::zero() };
            self.credit =
                if main.is_negative() { -main } else { Amount::zero() };
            self.ensure_one_empty_row();
        }
    }

    pub fn row_count(&self) -> usize {
        if self.splits.is_empty() {
            1
        } else {
            self.splits.len()
        }
    }

    fn row_is_empty(&self, row: usize) -> bool {
        match self.splits.get(row) {
            Some(s) => s.amount.is_zero() && s.account == AccountId(0),
            None => false,
        }
    }

    pub fn ensure_one_empty_row(&mut self) {
        if self.splits.len() <= 1 || !self.row_is_empty(self.splits.len() - 1)
        {
            self.splits.push(Split::new(
                Amount::zero(),
                AccountId(0),
                "",
            ));
        }
    }

    /// Switch a one-line edit into split mode, seeding the two implied
    /// splits.
    pub fn change_to_split_transaction(
        &mut self,
        accounts: &AccountCollection,
    ) {
        if !self.splits.is_empty() {
            return;
        }
        let total = if self.debit.is_positive() {
            self.debit
        } else {
            -self.credit
        };
        let main = accounts
            .account(self.account)
            .map(|a| a.main_currency.clone())
            .unwrap_or_default();
        let other_currency = self
            .id_transfer
            .and_then(|id| accounts.account(id))
            .map(|a| a.main_currency.clone())
            .unwrap_or_default();
        self.splits.push(Split::new(total, self.account, &main));
        self.splits.push(Split::new(
            -total,
            self.id_transfer.unwrap_or(AccountId(0)),
            &other_currency,
        ));
        self.ensure_one_empty_row();
    }

    pub fn remove_row_at(&mut self, row: usize) {
        if row > 0 && row < self.splits.len() {
            self.splits.remove(row);
            self.ensure_one_empty_row();
        }
    }

    /// The per-unit imbalance report shown while editing splits.
    pub fn imbalances(&self, accounts: &AccountCollection) -> String {
        splits_imbalances(accounts, &self.splits)
    }

    /// Apply one cell edit.  Exactly one field changes; dependent state is
    /// re-derived (a debit entry clears the credit and vice versa).
    pub fn set_data(
        &mut self,
        column: Column,
        row: usize,
        value: EditValue,
        accounts: &AccountCollection,
    ) -> bool {
        if row == 0 {
            match (column, &value) {
                (Column::No, EditValue::Text(s)) => {
                    self.no = s.clone();
                    return true;
                }
                (Column::Date, EditValue::Date(date)) => {
                    self.date = *date;
                    if self.is_schedule
                        && (self.recurrence.frequency == Frequency::Once
                            || self.state == BufferState::New)
                    {
                        self.recurrence.begin = Some(*date);
                    }
                    return true;
                }
                (Column::Memo, EditValue::Text(s)) => {
                    self.memo = s.clone();
                    return true;
                }
                (Column::Payee, EditValue::Text(s)) => {
                    self.payee = s.clone();
                    return true;
                }
                (Column::Cleared, EditValue::Cleared(c)) => {
                    self.cleared = *c;
                    return true;
                }
                (Column::Flag, EditValue::Flag(f)) => {
                    self.flagged = *f;
                    return true;
                }
                _ => {}
            }
        }

        if let Some(split) = self.splits.get_mut(row) {
            // split mode
            let changed = match (column, value) {
                (Column::Transfer, EditValue::Account { account, currency }) =>
                {
                    if row == 0 {
                        return false;
                    }
                    let id = account.unwrap_or(AccountId(0));
                    split.account = id;
                    split.currency = currency.unwrap_or_else(|| {
                        accounts
                            .account(id)
                            .map(|a| a.main_currency.clone())
                            .unwrap_or_default()
                    });
                    true
                }
                (Column::Debit, EditValue::Amount(a)) => {
                    if a.is_zero() && split.amount.is_negative() {
                        false
                    } else {
                        split.amount = a;
                        true
                    }
                }
                (Column::Credit, EditValue::Amount(a)) => {
                    if a.is_zero() && split.amount.is_positive() {
                        false
                    } else {
                        split.amount = -a;
                        true
                    }
                }
                _ => false,
            };
            if changed {
                // keep exactly one empty trailing row
                if row == self.row_count() - 1 && !self.row_is_empty(row) {
                    self.ensure_one_empty_row();
                } else {
                    while self.splits.len() >= 2
                        && self.row_is_empty(self.splits.len() - 1)
                        && self.row_is_empty(self.splits.len() - 2)
                    {
                        self.splits.pop();
                    }
                }
            }
            return changed;
        }

        if self.splits.is_empty() && row == 0 {
            match (column, value) {
                (Column::Transfer, EditValue::Account { account, currency }) =>
                {
                    self.id_transfer = account;
                    self.transfer_currency = currency
                        .or_else(|| {
                            account
                                .and_then(|id| accounts.account(id))
                                .map(|a| a.main_currency.clone())
                        })
                        .unwrap_or_default();
                    return true;
                }
                (Column::Debit, EditValue::Amount(a)) => {
                    self.debit = a;
                    if self.debit.is_positive() {
                        self.credit = Amount::zero();
                    }
                    return true;
                }
                (Column::Credit, EditValue::Amount(a)) => {
                    self.credit = a;
                    if self.credit.is_positive() {
                        self.debit = Amount::zero();
                    }
                    return true;
                }
                _ => return false,
            }
        }
        false
    }

    /// Run the cross-field checks.  Returns the error messages and the
    /// first column to focus.
    pub fn validate(
        &self,
        repo: &Repository,
    ) -> (Vec<String>, Option<Column>) {
        let mut errors = Vec::new();
        let mut first: Option<Column> = None;
        let mut err = |errors: &mut Vec<String>,
                       first: &mut Option<Column>,
                       msg: String,
                       col: Column| {
            errors.push(msg);
            if first.is_none() {
                *first = Some(col);
            }
        };

        if self.is_schedule && !self.recurrence.is_valid() {
            err(
                &mut errors,
                &mut first,
                "The schedule is invalid.".to_string(),
                Column::Date,
            );
        }

        if !self.splits.is_empty() {
            let mut not_empty = Vec::new();
            for (i, s) in self.splits.iter().enumerate() {
                if s.account == AccountId(0) && s.amount.is_zero() {
                    continue;
                }
                if s.account == AccountId(0) {
                    err(
                        &mut errors,
                        &mut first,
                        format!("Select an account for split {}.", i + 1),
                        Column::Transfer,
                    );
                } else if s.amount.is_zero() {
                    err(
                        &mut errors,
                        &mut first,
                        format!("Enter an amount for split {}.", i + 1),
                        Column::Debit,
                    );
                }
                not_empty.push(s.clone());
            }
            if not_empty.len() < 2 {
                err(
                    &mut errors,
                    &mut first,
                    "There must be at least two splits.".to_string(),
                    Column::Transfer,
                );
            }
            if !splits_balance(repo.accounts(), &not_empty) {
                err(
                    &mut errors,
                    &mut first,
                    "The splits do not balance.".to_string(),
                    Column::Debit,
                );
            }
        } else {
            match self.id_transfer.and_then(|id| repo.accounts().account(id))
            {
                None => {
                    err(
                        &mut errors,
                        &mut first,
                        "The transfer account is invalid.".to_string(),
                        Column::Transfer,
                    );
                }
                Some(a) if a.is_placeholder => {
                    err(
                        &mut errors,
                        &mut first,
                        "The transfer account is a placeholder.".to_string(),
                        Column::Transfer,
                    );
                }
                Some(_) => {}
            }
            if (self.debit - self.credit).is_zero() {
                err(
                    &mut errors,
                    &mut first,
                    "The transaction amount is zero.".to_string(),
                    Column::Debit,
                );
            }
        }

        (errors, first)
    }

    // The canonical split list for the current edit.  Ok(None) means the
    // user backed out of the currency-exchange dialog.
    fn splits_for_saving(
        &self,
        repo: &mut Repository,
        resolver: &mut dyn CurrencyExchangeResolver,
    ) -> Result<Option<Vec<Split>>> {
        if !self.splits.is_empty() {
            let not_empty: Vec<Split> = self
                .splits
                .iter()
                .filter(|s| {
                    s.account != AccountId(0) || !s.amount.is_zero()
                })
                .cloned()
                .collect();
            return Ok(Some(not_empty));
        }

        let total = if !self.debit.is_zero() && !self.credit.is_zero() {
            self.debit - self.credit
        } else if !self.debit.is_zero() {
            self.debit
        } else {
            -self.credit
        };

        let account = repo.accounts().get(self.account)?;
        let main = account.main_currency.clone();
        let transfer = self.id_transfer.ok_or_else(|| {
            TlyError::validation("the transfer account is invalid")
        })?;

        let crosses_currency = !self.transfer_currency.is_empty()
            && !account
                .all_currencies()
                .contains(&self.transfer_currency.as_str());
        if crosses_currency {
            let to = self.transfer_currency.clone();
            let resolved =
                match resolver.resolve(&main, &to, &total, self.date) {
                    Some(r) => r,
                    None => return Ok(None),
                };
            let to_amount = match resolved {
                ExchangeResolution::Rate(rate) => total
                    .mul_f64(rate)
                    .to_precision(repo.currencies.precision_of(&to)),
                ExchangeResolution::Amount(a) => a,
            };
            let mut splits = vec![
                Split::new(total, self.account, &main),
                Split::new(-to_amount, transfer, &to),
            ];
            add_trading_splits(
                &mut repo.accounts,
                &repo.currencies,
                &repo.securities,
                &mut splits,
            )?;
            Ok(Some(splits))
        } else {
            Ok(Some(vec![
                Split::new(total, self.account, &main),
                Split::new(-total, transfer, &self.transfer_currency),
            ]))
        }
    }

    fn resolve_payee(
        &self,
        repo: &mut Repository,
        policy: NewPayeePolicy,
    ) -> Option<Option<crate::payees::PayeeId>> {
        if self.payee.is_empty() {
            return Some(None);
        }
        match repo.payees.find(&self.payee) {
            Some(id) => Some(Some(id)),
            None => match policy {
                NewPayeePolicy::Add => Some(Some(repo.payees.add(&self.payee))),
                NewPayeePolicy::Drop => Some(None),
                NewPayeePolicy::Cancel => None,
            },
        }
    }

    /// Commit the pending edit.  Returns false when the user backed out
    /// (exchange dialog, payee question); on success the buffer is Empty.
    pub fn save(
        &mut self,
        repo: &mut Repository,
        resolver: &mut dyn CurrencyExchangeResolver,
        payee_policy: NewPayeePolicy,
    ) -> Result<bool> {
        let Some(payee) = self.resolve_payee(repo, payee_policy) else {
            return Ok(false);
        };
        let Some(splits) = self.splits_for_saving(repo, resolver)? else {
            return Ok(false);
        };

        match self.state {
            BufferState::Empty => {
                return Err(TlyError::state("nothing is being edited"))
            }
            BufferState::New => {
                let mut tx = Transaction::with_splits(self.date, splits);
                self.fill_transaction(&mut tx, payee);
                if self.is_schedule {
                    match self.schedule {
                        // editing a loaded schedule updates it in place
                        Some(id) => repo.update_schedule(
                            id,
                            &self.schedule_description,
                            self.auto_enter,
                            self.recurrence.clone(),
                            Some(tx),
                        )?,
                        None => {
                            repo.add_schedule(
                                &self.schedule_description,
                                self.auto_enter,
                                self.recurrence.clone(),
                                tx,
                            )?;
                        }
                    }
                } else {
                    repo.add_transaction(tx)?;
                }
            }
            BufferState::Existing(id) => {
                repo.set_transaction_date(id, self.date)?;
                repo.set_transaction_splits(id, splits)?;
                let no = self.no.clone();
                let memo = self.memo.clone();
                let note = self.note.clone();
                let flagged = self.flagged;
                let cleared = self.cleared;
                let attachments = self.attachments.clone();
                repo.edit_transaction(id, move |tx| {
                    tx.set_no(&no);
                    tx.set_memo(&memo);
                    tx.set_note(&note);
                    tx.set_flagged(flagged);
                    tx.set_cleared_status(cleared);
                    tx.set_attachments(attachments);
                    tx.set_payee(payee);
                })?;
            }
        }
        self.clear();
        Ok(true)
    }

    fn fill_transaction(
        &self,
        tx: &mut Transaction,
        payee: Option<crate::payees::PayeeId>,
    ) {
        tx.set_no(&self.no);
        tx.set_memo(&self.memo);
        tx.set_note(&self.note);
        tx.set_flagged(self.flagged);
        tx.set_cleared_status(self.cleared);
        tx.set_attachments(self.attachments.clone());
        tx.set_payee(payee);
    }
}

// What kind of account the one-line "transfer" column points at, per
// action.  Changing to an action with a different kind resets the account.
fn transfer_account_kind(action: InvestmentAction) -> u8 {
    match action {
        InvestmentAction::Buy
        | InvestmentAction::Sell
        | InvestmentAction::ShortSell
        | InvestmentAction::ShortCover
        | InvestmentAction::Fee => 1,
        InvestmentAction::Dividend
        | InvestmentAction::Distribution
        | InvestmentAction::ReinvestDiv
        | InvestmentAction::ReinvestDistrib => 2,
        InvestmentAction::Transfer
        | InvestmentAction::Swap
        | InvestmentAction::Spinoff => 3,
        InvestmentAction::StockSplit
        | InvestmentAction::StockDividend
        | InvestmentAction::UndistributedCapitalGain
        | InvestmentAction::CostBasisAdjustment
        | InvestmentAction::Invalid => 0,
    }
}

/// The investment flavour of the buffer: same row surface plus the action
/// and its side amounts, saved through the investment make operations.
pub struct InvestmentLedgerBuffer {
    pub base: LedgerBuffer,
    pub action: InvestmentAction,
    pub price_per_share: Amount,
    pub quantity: Amount,
    pub fee: Amount,
    pub tax_paid: Amount,
    pub gain_loss: Amount,
    pub cash_in_lieu: Amount,
    pub basis_adjustment: Amount,
    /// Incoming share count of a swap.
    pub swap_to: Amount,
    pub split_fraction: SplitFraction,
    pub lots: Lots,
    pub distrib_composition: DistribComposition,
    pub id_fee_account: Option<AccountId>,
    pub id_tax_account: Option<AccountId>,
    pub id_cash_in_lieu_account: Option<AccountId>,
    pub id_div_dist_to_account: Option<AccountId>,
    pub id_gain_loss_account: Option<AccountId>,
}

impl InvestmentLedgerBuffer {
    pub fn new(account: AccountId, today: NaiveDate) -> Self {
        InvestmentLedgerBuffer {
            base: LedgerBuffer::new(account, today),
            action: InvestmentAction::Invalid,
            price_per_share: Amount::zero(),
            quantity: Amount::zero(),
            fee: Amount::zero(),
            tax_paid: Amount::zero(),
            gain_loss: Amount::zero(),
            cash_in_lieu: Amount::zero(),
            basis_adjustment: Amount::zero(),
            swap_to: Amount::zero(),
            split_fraction: SplitFraction::identity(),
            lots: Lots::new(),
            distrib_composition: DistribComposition::new(),
            id_fee_account: None,
            id_tax_account: None,
            id_cash_in_lieu_account: None,
            id_div_dist_to_account: None,
            id_gain_loss_account: None,
        }
    }

    pub fn clear(&mut self) {
        *self = InvestmentLedgerBuffer::new(self.base.account, self.base.today);
    }

    pub fn start_new(&mut self) {
        self.clear();
        self.base.state = BufferState::New;
    }

    /// Switching the action keeps the transfer account only when the new
    /// action points the column at the same kind of account.
    pub fn set_action(&mut self, action: InvestmentAction) {
        if transfer_account_kind(action) != transfer_account_kind(self.action)
        {
            self.base.id_transfer = None;
            self.base.transfer_currency.clear();
        }
        self.action = action;
    }

    pub fn set_data(
        &mut self,
        column: Column,
        row: usize,
        value: EditValue,
        accounts: &AccountCollection,
    ) -> bool {
        match (column, &value) {
            (Column::Action, EditValue::Action(action)) if row == 0 => {
                self.set_action(*action);
                true
            }
            (Column::Quantity, EditValue::Amount(a)) if row == 0 => {
                if matches!(
                    self.action,
                    InvestmentAction::CostBasisAdjustment
                        | InvestmentAction::UndistributedCapitalGain
                ) {
                    self.basis_adjustment = *a;
                } else {
                    self.quantity = *a;
                }
                true
            }
            (Column::Price, EditValue::Amount(a)) if row == 0 => {
                self.price_per_share = *a;
                true
            }
            (Column::Fee, EditValue::Amount(a)) if row == 0 => {
                self.fee = *a;
                true
            }
            _ => self.base.set_data(column, row, value, accounts),
        }
    }

    pub fn load_transaction(&mut self, tx: &Transaction, repo: &Repository) {
        self.clear();
        self.base.load_transaction(tx, repo);
        // the base loader puts the one-line or split view in place; the
        // investment surface comes from the typed fields
        self.base.splits.clear();
        self.action = tx.investment_action();
        self.price_per_share = tx.price_per_share();
        self.quantity = tx.share_count().abs();
        self.fee = tx.fee();
        self.gain_loss = -tx.gain_loss();
        self.tax_paid = tx.tax_paid();
        self.split_fraction = tx.split_fraction();
        self.basis_adjustment = tx.basis_adjustment();
        self.lots = tx.lots();
        self.distrib_composition = tx.distrib_composition();
        self.base.id_transfer = tx.id_transfer_account();
        self.base.transfer_currency = self
            .base
            .id_transfer
            .and_then(|id| repo.accounts().account(id))
            .map(|a| a.main_currency.clone())
            .unwrap_or_default();

        let split_account = |t: InvestmentSplitType| {
            tx.split_for(t).ok().map(|s| s.account)
        };
        self.id_fee_account = split_account(InvestmentSplitType::Fee);
        self.id_tax_account = split_account(InvestmentSplitType::Tax);
        self.id_cash_in_lieu_account =
            split_account(InvestmentSplitType::CashInLieu);
        self.id_gain_loss_account =
            split_account(InvestmentSplitType::GainLoss);
        self.id_div_dist_to_account =
            split_account(InvestmentSplitType::DistributionDest);
        if self.action == InvestmentAction::Swap
            || self.action == InvestmentAction::Spinoff
        {
            self.swap_to = tx
                .split_for(InvestmentSplitType::InvestmentTo)
                .map(|s| s.amount)
                .unwrap_or_default();
        }
        if matches!(
            self.action,
            InvestmentAction::Dividend | InvestmentAction::Distribution
        ) {
            // the "quantity" column shows the distributed amount
            self.quantity = tx
                .split_for(InvestmentSplitType::DistributionSource)
                .map(|s| -s.amount)
                .unwrap_or_default();
        }
    }

    fn security_currency(&self, repo: &Repository) -> String {
        repo.accounts()
            .account(self.base.account)
            .and_then(|a| a.id_security)
            .and_then(|s| repo.securities.get(s).ok())
            .map(|s| s.currency.clone())
            .unwrap_or_default()
    }

    /// Action-specific validation, mirroring the checks the make operations
    /// will enforce, so the user is pointed at the offending column first.
    pub fn validate(
        &self,
        repo: &Repository,
    ) -> (Vec<String>, Option<Column>) {
        let mut errors = Vec::new();
        let mut first: Option<Column> = None;
        let mut err = |errors: &mut Vec<String>,
                       first: &mut Option<Column>,
                       msg: &str,
                       col: Column| {
            errors.push(msg.to_string());
            if first.is_none() {
                *first = Some(col);
            }
        };

        let inv_cur = self.security_currency(repo);
        let account_ok = |id: Option<AccountId>| {
            id.and_then(|id| repo.accounts().account(id))
                .is_some_and(|a| !a.is_placeholder)
        };
        let currency_ok = |id: Option<AccountId>| {
            id.and_then(|id| repo.accounts().account(id))
                .is_some_and(|a| {
                    a.all_currencies().contains(&inv_cur.as_str())
                })
        };

        match self.action {
            InvestmentAction::Buy
            | InvestmentAction::Sell
            | InvestmentAction::ShortSell
            | InvestmentAction::ShortCover
            | InvestmentAction::Fee => {
                if !self.quantity.is_positive() {
                    err(
                        &mut errors,
                        &mut first,
                        "The quantity must be greater than zero.",
                        Column::Quantity,
                    );
                }
                if !self.price_per_share.is_positive() {
                    err(
                        &mut errors,
                        &mut first,
                        "The price per share must be greater than zero.",
                        Column::Price,
                    );
                }
                if !account_ok(self.base.id_transfer) {
                    err(
                        &mut errors,
                        &mut first,
                        "The transfer account is invalid.",
                        Column::Transfer,
                    );
                } else if !currency_ok(self.base.id_transfer) {
                    err(
                        &mut errors,
                        &mut first,
                        "The transfer account's currency must match the \
                         security's currency.",
                        Column::Transfer,
                    );
                }
                if !self.fee.is_zero() && !account_ok(self.id_fee_account) {
                    err(
                        &mut errors,
                        &mut first,
                        "The fee account is invalid.",
                        Column::Fee,
                    );
                }
                if !self.tax_paid.is_zero()
                    && !account_ok(self.id_tax_account)
                {
                    err(
                        &mut errors,
                        &mut first,
                        "The tax account is invalid.",
                        Column::Quantity,
                    );
                }
                if !self.lots.is_empty()
                    && !InvestmentLotsManager::validate_lots_count(
                        &self.lots,
                        &self.quantity,
                    )
                {
                    err(
                        &mut errors,
                        &mut first,
                        "The number of shares in the lots does not match \
                         the number of shares in the transaction.",
                        Column::Quantity,
                    );
                }
            }
            InvestmentAction::Transfer
            | InvestmentAction::Swap
            | InvestmentAction::Spinoff => {
                if !self.quantity.is_positive() {
                    err(
                        &mut errors,
                        &mut first,
                        "The quantity must be greater than zero.",
                        Column::Quantity,
                    );
                }
                let dest_is_investment = self
                    .base
                    .id_transfer
                    .and_then(|id| repo.accounts().account(id))
                    .is_some_and(|a| a.id_security.is_some());
                if !dest_is_investment {
                    err(
                        &mut errors,
                        &mut first,
                        "The destination must be an investment account.",
                        Column::Transfer,
                    );
                }
                if matches!(
                    self.action,
                    InvestmentAction::Swap | InvestmentAction::Spinoff
                ) && !self.swap_to.is_positive()
                {
                    err(
                        &mut errors,
                        &mut first,
                        "The number of shares received must be greater \
                         than zero.",
                        Column::Quantity,
                    );
                }
            }
            InvestmentAction::StockSplit => {
                if !self.split_fraction.is_valid() {
                    err(
                        &mut errors,
                        &mut first,
                        "The split fraction is invalid.",
                        Column::Quantity,
                    );
                }
            }
            InvestmentAction::Dividend | InvestmentAction::Distribution => {
                if !self.quantity.is_positive() {
                    err(
                        &mut errors,
                        &mut first,
                        "The amount must be greater than zero.",
                        Column::Quantity,
                    );
                }
                if !account_ok(self.base.id_transfer) {
                    err(
                        &mut errors,
                        &mut first,
                        "The source account is invalid.",
                        Column::Transfer,
                    );
                }
                if !account_ok(self.id_div_dist_to_account) {
                    err(
                        &mut errors,
                        &mut first,
                        "The deposit account is invalid.",
                        Column::Transfer,
                    );
                }
                if self.tax_paid > self.quantity {
                    err(
                        &mut errors,
                        &mut first,
                        "The tax must be smaller than the \
                         dividend/distribution amount.",
                        Column::Quantity,
                    );
                }
            }
            InvestmentAction::ReinvestDiv
            | InvestmentAction::ReinvestDistrib => {
                if !self.quantity.is_positive() {
                    err(
                        &mut errors,
                        &mut first,
                        "The quantity must be greater than zero.",
                        Column::Quantity,
                    );
                }
                if !account_ok(self.base.id_transfer) {
                    err(
                        &mut errors,
                        &mut first,
                        "The source account is invalid.",
                        Column::Transfer,
                    );
                }
                if !self.cash_in_lieu.is_zero()
                    && !account_ok(self.id_cash_in_lieu_account)
                {
                    err(
                        &mut errors,
                        &mut first,
                        "The cash-in-lieu account is invalid.",
                        Column::Transfer,
                    );
                }
            }
            InvestmentAction::CostBasisAdjustment => {
                if self.basis_adjustment.is_zero() {
                    err(
                        &mut errors,
                        &mut first,
                        "The basis adjustment amount is invalid.",
                        Column::Quantity,
                    );
                }
            }
            InvestmentAction::UndistributedCapitalGain => {
                if !self.basis_adjustment.is_positive() {
                    err(
                        &mut errors,
                        &mut first,
                        "The capital gain amount is invalid.",
                        Column::Quantity,
                    );
                }
                if self.tax_paid.is_negative() {
                    err(
                        &mut errors,
                        &mut first,
                        "The tax paid amount is invalid.",
                        Column::Quantity,
                    );
                }
            }
            InvestmentAction::StockDividend | InvestmentAction::Invalid => {
                err(
                    &mut errors,
                    &mut first,
                    "The transaction type is invalid.",
                    Column::Action,
                );
            }
        }

        (errors, first)
    }

    /// Commit the pending investment edit through the matching make
    /// operation.
    pub fn save(&mut self, repo: &mut Repository) -> Result<bool> {
        let account = self.base.account;
        let date = self.base.date;
        let inv_cur = self.security_currency(repo);

        let mut splits: Vec<Split> = Vec::new();
        let mut types: Vec<InvestmentSplitType> = Vec::new();
        let transfer = self.base.id_transfer;

        let missing_transfer =
            || TlyError::validation("the transfer account is invalid");

        enum Op {
            BuySellFee(InvestmentAction, Amount),
            TransferSwap(InvestmentAction),
            Spinoff,
            StockSplit(AccountId, SplitFraction),
            Reinvest(InvestmentAction, Amount),
            DivDist(InvestmentAction),
            CostBasis(Amount),
            CapitalGain(Amount, Amount),
        }

        let op = match self.action {
            InvestmentAction::Buy | InvestmentAction::ShortCover => {
                let net = self.quantity * self.price_per_share
                    + self.fee
                    + self.tax_paid;
                splits.push(Split::new(
                    -net,
                    transfer.ok_or_else(missing_transfer)?,
                    &inv_cur,
                ));
                types.push(InvestmentSplitType::CostProceeds);
                splits.push(Split::new(self.quantity, account, ""));
                types.push(InvestmentSplitType::Investment);
                self.push_extras(&mut splits, &mut types, &inv_cur)?;
                if self.action == InvestmentAction::ShortCover
                    && !self.gain_loss.is_zero()
                {
                    splits.push(Split::new(
                        -self.gain_loss,
                        self.id_gain_loss_account
                            .ok_or_else(missing_transfer)?,
                        &inv_cur,
                    ));
                    types.push(InvestmentSplitType::GainLoss);
                }
                Op::BuySellFee(self.action, self.price_per_share)
            }
            InvestmentAction::Sell | InvestmentAction::ShortSell => {
                let net = self.quantity * self.price_per_share
                    - self.fee
                    - self.tax_paid;
                splits.push(Split::new(
                    net,
                    transfer.ok_or_else(missing_transfer)?,
                    &inv_cur,
                ));
                types.push(InvestmentSplitType::CostProceeds);
                splits.push(Split::new(-self.quantity, account, ""));
                types.push(InvestmentSplitType::Investment);
                self.push_extras(&mut splits, &mut types, &inv_cur)?;
                if self.action == InvestmentAction::Sell
                    && !self.gain_loss.is_zero()
                {
                    splits.push(Split::new(
                        -self.gain_loss,
                        self.id_gain_loss_account
                            .ok_or_else(missing_transfer)?,
                        &inv_cur,
                    ));
                    types.push(InvestmentSplitType::GainLoss);
                }
                Op::BuySellFee(self.action, self.price_per_share)
            }
            InvestmentAction::Fee => {
                let net = self.quantity * self.price_per_share;
                splits.push(Split::new(
                    net,
                    transfer.ok_or_else(missing_transfer)?,
                    &inv_cur,
                ));
                types.push(InvestmentSplitType::CostProceeds);
                splits.push(Split::new(-self.quantity, account, ""));
                types.push(InvestmentSplitType::Investment);
                Op::BuySellFee(self.action, self.price_per_share)
            }
            InvestmentAction::ReinvestDiv
            | InvestmentAction::ReinvestDistrib => {
                let mut net = self.quantity * self.price_per_share
                    + self.fee
                    + self.tax_paid;
                if self.cash_in_lieu.is_positive() {
                    splits.push(Split::new(
                        self.cash_in_lieu,
                        self.id_cash_in_lieu_account
                            .ok_or_else(missing_transfer)?,
                        &inv_cur,
                    ));
                    types.push(InvestmentSplitType::CashInLieu);
                    net += self.cash_in_lieu;
                }
                splits.push(Split::new(
                    -net,
                    transfer.ok_or_else(missing_transfer)?,
                    &inv_cur,
                ));
                types.push(InvestmentSplitType::DistributionSource);
                splits.push(Split::new(self.quantity, account, ""));
                types.push(InvestmentSplitType::Investment);
                self.push_extras(&mut splits, &mut types, &inv_cur)?;
                Op::Reinvest(self.action, self.price_per_share)
            }
            InvestmentAction::Dividend | InvestmentAction::Distribution => {
                splits.push(Split::new(
                    -self.quantity,
                    transfer.ok_or_else(missing_transfer)?,
                    &inv_cur,
                ));
                types.push(InvestmentSplitType::DistributionSource);
                splits.push(Split::new(
                    self.quantity - self.tax_paid,
                    self.id_div_dist_to_account
                        .ok_or_else(missing_transfer)?,
                    &inv_cur,
                ));
                types.push(InvestmentSplitType::DistributionDest);
                if self.tax_paid.is_positive() {
                    splits.push(Split::new(
                        self.tax_paid,
                        self.id_tax_account.ok_or_else(missing_transfer)?,
                        &inv_cur,
                    ));
                    types.push(InvestmentSplitType::Tax);
                }
                Op::DivDist(self.action)
            }
            InvestmentAction::Transfer | InvestmentAction::Swap => {
                let to = transfer.ok_or_else(missing_transfer)?;
                splits.push(Split::new(-self.quantity, account, ""));
                types.push(InvestmentSplitType::InvestmentFrom);
                let incoming = if self.action == InvestmentAction::Swap {
                    self.swap_to
                } else {
                    self.quantity
                };
                splits.push(Split::new(incoming, to, ""));
                types.push(InvestmentSplitType::InvestmentTo);
                if self.action == InvestmentAction::Swap {
                    Op::TransferSwap(InvestmentAction::Swap)
                } else {
                    Op::TransferSwap(InvestmentAction::Transfer)
                }
            }
            InvestmentAction::Spinoff => {
                let to = transfer.ok_or_else(missing_transfer)?;
                splits.push(Split::new(-self.quantity, account, ""));
                types.push(InvestmentSplitType::Investment);
                splits.push(Split::new(self.swap_to, to, ""));
                types.push(InvestmentSplitType::InvestmentTo);
                Op::Spinoff
            }
            InvestmentAction::StockSplit => {
                Op::StockSplit(account, self.split_fraction)
            }
            InvestmentAction::UndistributedCapitalGain => {
                Op::CapitalGain(self.basis_adjustment, self.tax_paid)
            }
            InvestmentAction::CostBasisAdjustment => {
                Op::CostBasis(self.basis_adjustment)
            }
            InvestmentAction::StockDividend | InvestmentAction::Invalid => {
                return Err(TlyError::validation(
                    "the transaction type is invalid",
                ))
            }
        };

        // the trading contra-splits, one per unit out of balance
        if !splits.is_empty() {
            add_trading_splits(
                &mut repo.accounts,
                &repo.currencies,
                &repo.securities,
                &mut splits,
            )?;
            while types.len() < splits.len() {
                types.push(InvestmentSplitType::Trading);
            }
        }

        let existing = match self.base.state {
            BufferState::Empty => {
                return Err(TlyError::state("nothing is being edited"))
            }
            BufferState::New => None,
            BufferState::Existing(id) => Some(id),
        };

        match existing {
            Some(id) => {
                repo.set_transaction_date(id, date)?;
                match op {
                    Op::BuySellFee(action, price) => repo.make_buy_sell_fee(
                        id, action, price, splits, types, &self.lots,
                    )?,
                    Op::TransferSwap(action) => repo.make_transfer_swap(
                        id, action, splits, types, &self.lots,
                    )?,
                    Op::Spinoff => {
                        repo.make_spinoff(id, splits, types, &self.lots)?
                    }
                    Op::StockSplit(acct, fraction) => {
                        repo.make_stock_split(id, acct, fraction)?
                    }
                    Op::Reinvest(action, price) => repo
                        .make_reinvested_div_dist(
                            id,
                            action,
                            price,
                            splits,
                            types,
                            self.distrib_composition.clone(),
                        )?,
                    Op::DivDist(action) => repo.make_div_dist(
                        id,
                        action,
                        account,
                        splits,
                        types,
                        self.distrib_composition.clone(),
                    )?,
                    Op::CostBasis(adjustment) => repo
                        .make_cost_basis_adjustment(id, account, adjustment)?,
                    Op::CapitalGain(gain, tax) => repo
                        .make_undistributed_capital_gain(
                            id, account, gain, tax,
                        )?,
                }
                let no = self.base.no.clone();
                let memo = self.base.memo.clone();
                let note = self.base.note.clone();
                let flagged = self.base.flagged;
                let cleared = self.base.cleared;
                repo.edit_transaction(id, move |tx| {
                    tx.set_no(&no);
                    tx.set_memo(&memo);
                    tx.set_note(&note);
                    tx.set_flagged(flagged);
                    tx.set_cleared_status(cleared);
                })?;
            }
            None => {
                let mut tx = Transaction::new_investment(date);
                match op {
                    Op::BuySellFee(action, price) => repo.build_buy_sell_fee(
                        &mut tx, action, price, splits, types, &self.lots,
                    )?,
                    Op::TransferSwap(action) => repo.build_transfer_swap(
                        &mut tx, action, splits, types, &self.lots,
                    )?,
                    Op::Spinoff => repo
                        .build_spinoff(&mut tx, splits, types, &self.lots)?,
                    Op::StockSplit(acct, fraction) => {
                        repo.build_stock_split(&mut tx, acct, fraction)?
                    }
                    Op::Reinvest(action, price) => repo
                        .build_reinvested_div_dist(
                            &mut tx,
                            action,
                            price,
                            splits,
                            types,
                            self.distrib_composition.clone(),
                        )?,
                    Op::DivDist(action) => repo.build_div_dist(
                        &mut tx,
                        action,
                        account,
                        splits,
                        types,
                        self.distrib_composition.clone(),
                    )?,
                    Op::CostBasis(adjustment) => repo
                        .build_cost_basis_adjustment(
                            &mut tx, account, adjustment,
                        )?,
                    Op::CapitalGain(gain, tax) => repo
                        .build_undistributed_capital_gain(
                            &mut tx, account, gain, tax,
                        )?,
                }
                tx.set_no(&self.base.no);
                tx.set_memo(&self.base.memo);
                tx.set_note(&self.base.note);
                tx.set_flagged(self.base.flagged);
                tx.set_cleared_status(self.base.cleared);
                if self.base.is_schedule {
                    repo.add_schedule(
                        &self.base.schedule_description,
                        self.base.auto_enter,
                        self.base.recurrence.clone(),
                        tx,
                    )?;
                } else {
                    repo.add_transaction(tx)?;
                }
            }
        }

        self.clear();
        Ok(true)
    }

    // Fee and tax side-splits shared by the buy/sell/reinvest recipes.
    fn push_extras(
        &self,
        splits: &mut Vec<Split>,
        types: &mut Vec<InvestmentSplitType>,
        inv_cur: &str,
    ) -> Result<()> {
        let missing =
            || TlyError::validation("the fee or tax account is invalid");
        if self.fee.is_positive() {
            splits.push(Split::new(
                self.fee,
                self.id_fee_account.ok_or_else(missing)?,
                inv_cur,
            ));
            types.push(InvestmentSplitType::Fee);
        }
        if self.tax_paid.is_positive() {
            splits.push(Split::new(
                self.tax_paid,
                self.id_tax_account.ok_or_else(missing)?,
                inv_cur,
            ));
            types.push(InvestmentSplitType::Tax);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::repositories::test::{amt, cash_repo, d, investment_repo};

    #[test]
    fn test_one_line_save() {
        let (mut repo, a, b) = cash_repo();
        let mut buffer = LedgerBuffer::new(a, repo.today());
        buffer.start_new();
        assert!(buffer.set_data(
            Column::Date,
            0,
            EditValue::Date(d("2024-01-10")),
            repo.accounts(),
        ));
        assert!(buffer.set_data(
            Column::Payee,
            0,
            EditValue::Text("Groceries Inc".to_string()),
            repo.accounts(),
        ));
        assert!(buffer.set_data(
            Column::Transfer,
            0,
            EditValue::Account {
                account: Some(b),
                currency: None,
            },
            repo.accounts(),
        ));
        assert!(buffer.set_data(
            Column::Credit,
            0,
            EditValue::Amount(amt("42.00")),
            repo.accounts(),
        ));
        let (errors, _) = buffer.validate(&repo);
        assert!(errors.is_empty(), "{errors:?}");

        let saved = buffer
            .save(&mut repo, &mut FixedRateResolver(1.0), NewPayeePolicy::Add)
            .unwrap();
        assert!(saved);
        assert_eq!(buffer.state, BufferState::Empty);
        assert_eq!(repo.balance(a).unwrap(), amt("-42.00"));
        assert_eq!(repo.balance(b).unwrap(), amt("42.00"));
        assert!(repo.payees.find("Groceries Inc").is_some());
    }

    #[test]
    fn test_validate_points_at_first_error() {
        let (repo, a, _) = cash_repo();
        let mut buffer = LedgerBuffer::new(a, repo.today());
        buffer.start_new();
        let (errors, first) = buffer.validate(&repo);
        assert!(!errors.is_empty());
        assert_eq!(first, Some(Column::Transfer));
    }

    #[test]
    fn test_currency_exchange_resolution() {
        let (mut repo, a, _) = cash_repo();
        let top = repo.accounts().top_level();
        let b = repo
            .add_account(
                top,
                "US savings",
                crate::accounts::AccountType::Savings,
                "USD",
                None,
                false,
            )
            .unwrap();
        let mut buffer = LedgerBuffer::new(a, repo.today());
        buffer.start_new();
        buffer.date = d("2024-02-01");
        buffer.credit = amt("130.00");
        buffer.id_transfer = Some(b);
        buffer.transfer_currency = "USD".to_string();

        // 1 CAD buys 0.769... USD, so the dialog answers 100 USD directly
        let mut resolver = ExplicitAmountResolver(amt("100.00"));
        assert!(buffer
            .save(&mut repo, &mut resolver, NewPayeePolicy::Add)
            .unwrap());

        assert_eq!(repo.balance(a).unwrap(), amt("-130.00"));
        assert_eq!(repo.balance(b).unwrap(), amt("100.00"));
        let tx = repo.transactions().get(TransactionId(1)).unwrap();
        assert_eq!(tx.split_count(), 4);
        assert!(crate::transactions::is_currency_exchange(
            repo.accounts(),
            tx.splits()
        ));
    }

    struct ExplicitAmountResolver(Amount);

    impl CurrencyExchangeResolver for ExplicitAmountResolver {
        fn resolve(
            &mut self,
            _from: &str,
            _to: &str,
            amount: &Amount,
            _date: NaiveDate,
        ) -> Option<ExchangeResolution> {
            // the source leg is a credit, so the target amount offsets it
            assert!(amount.is_negative());
            Some(ExchangeResolution::Amount(-self.0))
        }
    }

    #[test]
    fn test_canceled_exchange_aborts_save() {
        struct Canceler;
        impl CurrencyExchangeResolver for Canceler {
            fn resolve(
                &mut self,
                _from: &str,
                _to: &str,
                _amount: &Amount,
                _date: NaiveDate,
            ) -> Option<ExchangeResolution> {
                None
            }
        }

        let (mut repo, a, _) = cash_repo();
        let top = repo.accounts().top_level();
        let b = repo
            .add_account(
                top,
                "US savings",
                crate::accounts::AccountType::Savings,
                "USD",
                None,
                false,
            )
            .unwrap();
        let mut buffer = LedgerBuffer::new(a, repo.today());
        buffer.start_new();
        buffer.debit = amt("50.00");
        buffer.id_transfer = Some(b);
        buffer.transfer_currency = "USD".to_string();

        let saved = buffer
            .save(&mut repo, &mut Canceler, NewPayeePolicy::Add)
            .unwrap();
        assert!(!saved);
        assert_eq!(buffer.state, BufferState::New);
        assert!(repo.transactions().is_empty());
    }

    #[test]
    fn test_split_mode_trailing_row() {
        let (repo, a, b) = cash_repo();
        let mut buffer = LedgerBuffer::new(a, repo.today());
        buffer.start_new();
        buffer.debit = amt("100.00");
        buffer.id_transfer = Some(b);
        buffer.transfer_currency = "CAD".to_string();
        buffer.change_to_split_transaction(repo.accounts());
        assert_eq!(buffer.row_count(), 3);
        assert!(buffer.row_is_empty(2));

        // typing into the trailing row appends a fresh one
        assert!(buffer.set_data(
            Column::Debit,
            2,
            EditValue::Amount(amt("5.00")),
            repo.accounts(),
        ));
        assert_eq!(buffer.row_count(), 4);
        assert!(buffer.row_is_empty(3));
        assert!(!buffer.imbalances(repo.accounts()).is_empty());

        // clearing it again collapses the extra empties
        assert!(buffer.set_data(
            Column::Debit,
            2,
            EditValue::Amount(Amount::zero()),
            repo.accounts(),
        ));
        assert_eq!(buffer.row_count(), 3);
    }

    #[test]
    fn test_investment_buffer_buy_then_edit() {
        let (mut repo, i, k, _) = investment_repo();
        let mut buffer = InvestmentLedgerBuffer::new(i, repo.today());
        buffer.start_new();
        buffer.base.date = d("2024-03-01");
        buffer.set_action(InvestmentAction::Buy);
        buffer.quantity = amt("10.0000");
        buffer.price_per_share = amt("50.00");
        buffer.base.id_transfer = Some(k);

        let (errors, _) = buffer.validate(&repo);
        assert!(errors.is_empty(), "{errors:?}");
        assert!(buffer.save(&mut repo).unwrap());

        assert_eq!(repo.balance(i).unwrap(), amt("10.0000"));
        assert_eq!(repo.balance(k).unwrap(), amt("-500.00"));
        let id = TransactionId(1);
        assert!(repo.lots().lot_number(id).is_some());

        // reload the committed buy and change the price
        let tx = repo.transactions().get(id).unwrap().clone();
        buffer.load_transaction(&tx, &repo);
        assert_eq!(buffer.base.state, BufferState::Existing(id));
        assert_eq!(buffer.action, InvestmentAction::Buy);
        assert_eq!(buffer.quantity, amt("10.0000"));
        buffer.price_per_share = amt("55.00");
        assert!(buffer.save(&mut repo).unwrap());
        assert_eq!(repo.balance(k).unwrap(), amt("-550.00"));
        assert_eq!(
            repo.transactions().get(id).unwrap().price_per_share(),
            amt("55.00")
        );
    }

    #[test]
    fn test_investment_buffer_action_switch_resets_transfer() {
        let (repo, i, k, _) = investment_repo();
        let mut buffer = InvestmentLedgerBuffer::new(i, repo.today());
        buffer.start_new();
        buffer.set_action(InvestmentAction::Buy);
        buffer.base.id_transfer = Some(k);
        // same account category keeps the transfer account
        buffer.set_action(InvestmentAction::Sell);
        assert_eq!(buffer.base.id_transfer, Some(k));
        // a dividend points the column at an income account instead
        buffer.set_action(InvestmentAction::Dividend);
        assert_eq!(buffer.base.id_transfer, None);
    }

    #[test]
    fn test_investment_buffer_validation() {
        let (repo, i, _, _) = investment_repo();
        let mut buffer = InvestmentLedgerBuffer::new(i, repo.today());
        buffer.start_new();
        buffer.set_action(InvestmentAction::Buy);
        let (errors, first) = buffer.validate(&repo);
        assert!(!errors.is_empty());
        assert_eq!(first, Some(Column::Quantity));

        buffer.set_action(InvestmentAction::StockSplit);
        buffer.split_fraction = SplitFraction::new(2, 2);
        let (errors, _) = buffer.validate(&repo);
        assert_eq!(errors.len(), 1);
        buffer.split_fraction = SplitFraction::new(2, 1);
        let (errors, _) = buffer.validate(&repo);
        assert!(errors.is_empty());
    }
}
