use crate::accounts::AccountCollection;
use crate::accounts::AccountId;
use crate::amounts::Amount;
use crate::balances::Balances;
use crate::currencies::CurrencyCollection;
use crate::errors::{Result, TlyError};
use crate::investments::InvestmentFields;
use crate::payees::PayeeId;
use crate::prices::PriceOracle;
use crate::securities::SecurityCollection;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(
    Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize,
    Deserialize,
)]
pub struct TransactionId(pub u32);

#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum ClearedStatus {
    #[default]
    None,
    Cleared,
    Reconciled,
}

impl ClearedStatus {
    pub fn code(&self) -> i32 {
        match self {
            ClearedStatus::None => 0,
            ClearedStatus::Cleared => 1,
            ClearedStatus::Reconciled => 2,
        }
    }

    pub fn from_code(code: i32) -> ClearedStatus {
        match code {
            1 => ClearedStatus::Cleared,
            2 => ClearedStatus::Reconciled,
            _ => ClearedStatus::None,
        }
    }
}

/// One leg of a double-entry transaction.
///
/// `currency` is empty for share-denominated splits; the unit is then the
/// account's security.  `user_data` is an opaque tag; the investment layer
/// stores the split's role there.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub account: AccountId,
    pub currency: String,
    pub amount: Amount,
    pub memo: String,
    pub user_data: String,
}

impl Split {
    pub fn new(amount: Amount, account: AccountId, currency: &str) -> Split {
        Split {
            account,
            currency: currency.to_string(),
            amount,
            memo: String::new(),
            user_data: String::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum TxKind {
    Standard,
    Investment(InvestmentFields),
}

/// A set of splits committed atomically on a date.  Identity (the id) is
/// fixed on insertion into the [`TransactionStore`]; everything else is
/// mutable through the repository, which routes the changes to the ledgers.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub(crate) id: Option<TransactionId>,
    pub(crate) date: NaiveDate,
    pub(crate) no: String,
    pub(crate) memo: String,
    pub(crate) note: String,
    pub(crate) flagged: bool,
    pub(crate) cleared: ClearedStatus,
    pub(crate) attachments: Vec<String>,
    pub(crate) payee: Option<PayeeId>,
    pub(crate) splits: Vec<Split>,
    pub(crate) kind: TxKind,
}

impl Transaction {
    pub fn new(date: NaiveDate) -> Transaction {
        Transaction {
            id: None,
            date,
            no: String::new(),
            memo: String::new(),
            note: String::new(),
            flagged: false,
            cleared: ClearedStatus::None,
            attachments: Vec::new(),
            payee: None,
            splits: Vec::new(),
            kind: TxKind::Standard,
        }
    }

    pub fn new_investment(date: NaiveDate) -> Transaction {
        Transaction {
            kind: TxKind::Investment(InvestmentFields::default()),
            ..Transaction::new(date)
        }
    }

    pub fn with_splits(date: NaiveDate, splits: Vec<Split>) -> Transaction {
        Transaction {
            splits,
            ..Transaction::new(date)
        }
    }

    pub fn id(&self) -> Option<TransactionId> {
        self.id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn no(&self) -> &str {
        &self.no
    }

    pub fn memo(&self) -> &str {
        &self.memo
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged
    }

    pub fn cleared_status(&self) -> ClearedStatus {
        self.cleared
    }

    pub fn attachments(&self) -> &[String] {
        &self.attachments
    }

    pub fn payee(&self) -> Option<PayeeId> {
        self.payee
    }

    pub fn splits(&self) -> &[Split] {
        &self.splits
    }

    pub fn split_count(&self) -> usize {
        self.splits.len()
    }

    pub fn is_investment(&self) -> bool {
        matches!(self.kind, TxKind::Investment(_))
    }

    pub fn investment(&self) -> Option<&InvestmentFields> {
        match &self.kind {
            TxKind::Investment(f) => Some(f),
            TxKind::Standard => None,
        }
    }

    pub(crate) fn investment_mut(&mut self) -> Option<&mut InvestmentFields> {
        match &mut self.kind {
            TxKind::Investment(f) => Some(f),
            TxKind::Standard => None,
        }
    }

    pub fn set_no(&mut self, no: &str) {
        self.no = no.to_string();
    }

    pub fn set_memo(&mut self, memo: &str) {
        self.memo = memo.to_string();
    }

    pub fn set_note(&mut self, note: &str) {
        self.note = note.to_string();
    }

    pub fn set_flagged(&mut self, flagged: bool) {
        self.flagged = flagged;
    }

    pub fn set_cleared_status(&mut self, cleared: ClearedStatus) {
        self.cleared = cleared;
    }

    pub fn set_attachments(&mut self, attachments: Vec<String>) {
        self.attachments = attachments;
    }

    pub fn set_payee(&mut self, payee: Option<PayeeId>) {
        self.payee = payee;
    }

    /// True iff any split references the account.
    pub fn related_to(&self, account: AccountId) -> bool {
        self.splits.iter().any(|s| s.account == account)
    }

    /// Per-currency totals of the splits touching one account.
    pub fn totals_for_account(
        account: AccountId,
        splits: &[Split],
    ) -> Balances {
        let mut totals = Balances::default();
        for s in splits.iter().filter(|s| s.account == account) {
            totals.add(&s.currency, s.amount);
        }
        totals
    }

    /// A copy ready for insertion (no id); used for schedule templates.
    pub fn duplicated(&self, date: NaiveDate) -> Transaction {
        let mut copy = self.clone();
        copy.id = None;
        copy.date = date;
        copy
    }
}

/// The unit a split is denominated in: its currency code, or the `SEC<n>`
/// key of the account's security for share splits.
pub(crate) fn commodity_key(
    accounts: &AccountCollection,
    split: &Split,
) -> Result<String> {
    if !split.currency.is_empty() {
        return Ok(split.currency.clone());
    }
    let account = accounts.get(split.account)?;
    match account.id_security {
        Some(id) => Ok(PriceOracle::security_key(id)),
        None => Err(TlyError::validation(format!(
            "split on {} has no currency and the account holds no security",
            account.name
        ))),
    }
}

/// Whether a split list balances.  A single-unit list must net zero; a list
/// spanning several units always balances once its trading contra-splits
/// are in place (they are what forces each unit to zero).
pub fn splits_balance(
    accounts: &AccountCollection,
    splits: &[Split],
) -> bool {
    let mut totals: HashMap<String, Amount> = HashMap::new();
    for s in splits {
        match commodity_key(accounts, s) {
            Ok(key) => {
                let slot = totals.entry(key).or_default();
                *slot += s.amount;
            }
            Err(_) => return false,
        }
    }
    if totals.len() > 1 {
        return true;
    }
    totals.values().all(Amount::is_zero)
}

/// A human-readable list of the per-unit imbalances, for the editing UI.
pub fn splits_imbalances(
    accounts: &AccountCollection,
    splits: &[Split],
) -> String {
    let mut totals: HashMap<String, Amount> = HashMap::new();
    for s in splits {
        if let Ok(key) = commodity_key(accounts, s) {
            *totals.entry(key).or_default() += s.amount;
        }
    }
    let mut parts: Vec<String> = totals
        .iter()
        .filter(|(_, a)| !a.is_zero())
        .map(|(c, a)| format!(" {a} {c}"))
        .collect();
    parts.sort();
    parts.join(",")
}

/// Append, for each unit whose splits do not net to zero, a contra-split on
/// that unit's trading account.  A no-op on an already-balanced list and on
/// single-unit lists (those must balance on their own).
pub fn add_trading_splits(
    accounts: &mut AccountCollection,
    currencies: &CurrencyCollection,
    securities: &SecurityCollection,
    splits: &mut Vec<Split>,
) -> Result<()> {
    let mut totals: Vec<(String, Amount)> = Vec::new();
    for s in splits.iter() {
        let key = commodity_key(accounts, s)?;
        match totals.iter_mut().find(|(k, _)| *k == key) {
            Some((_, a)) => *a += s.amount,
            None => totals.push((key, s.amount)),
        }
    }
    if totals.len() < 2 {
        return Ok(());
    }
    for (key, sum) in totals {
        if sum.is_zero() {
            continue;
        }
        if let Some(sec_id) = key.strip_prefix("SEC") {
            let id = sec_id.parse::<u32>().map_err(|_| {
                TlyError::balance(format!("unresolvable unit {key:?}"))
            })?;
            let security = securities.get(crate::securities::SecurityId(id))?;
            let trading =
                accounts.create_security_trading_account(security)?;
            splits.push(Split::new(-sum, trading, ""));
        } else {
            if !currencies.has(&key) {
                return Err(TlyError::balance(format!(
                    "no trading account for unknown currency {key:?}"
                )));
            }
            let trading = accounts.create_currency_trading_account(&key)?;
            splits.push(Split::new(-sum, trading, &key));
        }
    }
    Ok(())
}

/// A transaction is a currency exchange iff, once the currency-trading
/// contra-splits are set aside, exactly two splits remain, in two distinct
/// currencies, with opposite-signed amounts.
pub fn is_currency_exchange(
    accounts: &AccountCollection,
    splits: &[Split],
) -> bool {
    let remaining: Vec<&Split> = splits
        .iter()
        .filter(|s| !accounts.is_currency_trading(s.account))
        .collect();
    match remaining.as_slice() {
        [a, b] => {
            a.currency != b.currency
                && !a.currency.is_empty()
                && !b.currency.is_empty()
                && a.amount.is_positive() != b.amount.is_positive()
                && !a.amount.is_zero()
                && !b.amount.is_zero()
        }
        _ => false,
    }
}

/// Arena owning every committed transaction, keyed by id.
#[derive(Default)]
pub struct TransactionStore {
    transactions: HashMap<TransactionId, Transaction>,
    next_id: u32,
}

impl TransactionStore {
    pub(crate) fn allocate_id(&mut self) -> TransactionId {
        self.next_id += 1;
        TransactionId(self.next_id)
    }

    pub(crate) fn insert(&mut self, tx: Transaction) -> Result<TransactionId> {
        let id = tx.id.ok_or_else(|| {
            TlyError::state("cannot store a transaction without an id")
        })?;
        self.transactions.insert(id, tx);
        Ok(id)
    }

    /// Register a transaction under an externally-assigned id (load path).
    pub(crate) fn load(&mut self, tx: Transaction) -> Result<TransactionId> {
        let id = tx.id.ok_or_else(|| {
            TlyError::state("cannot load a transaction without an id")
        })?;
        self.next_id = self.next_id.max(id.0);
        self.transactions.insert(id, tx);
        Ok(id)
    }

    pub fn get(&self, id: TransactionId) -> Result<&Transaction> {
        self.transactions.get(&id).ok_or_else(|| {
            TlyError::lookup(format!("unknown transaction #{}", id.0))
        })
    }

    pub(crate) fn get_mut(
        &mut self,
        id: TransactionId,
    ) -> Result<&mut Transaction> {
        self.transactions.get_mut(&id).ok_or_else(|| {
            TlyError::lookup(format!("unknown transaction #{}", id.0))
        })
    }

    /// Temporarily move a transaction out of the store so it can be edited
    /// while the rest of the repository stays borrowable.  Always pair with
    /// [`put_back`](Self::put_back).
    pub(crate) fn take(&mut self, id: TransactionId) -> Result<Transaction> {
        self.transactions.remove(&id).ok_or_else(|| {
            TlyError::lookup(format!("unknown transaction #{}", id.0))
        })
    }

    pub(crate) fn put_back(&mut self, tx: Transaction) {
        if let Some(id) = tx.id {
            self.transactions.insert(id, tx);
        }
    }

    pub(crate) fn remove(&mut self, id: TransactionId) -> Option<Transaction> {
        self.transactions.remove(&id)
    }

    pub fn has(&self, id: TransactionId) -> bool {
        self.transactions.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.values()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::accounts::AccountType;
    use crate::currencies::test::currency;

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn setup() -> (AccountCollection, CurrencyCollection, SecurityCollection)
    {
        let mut accounts = AccountCollection::default();
        let mut currencies = CurrencyCollection::default();
        currencies.add(currency("CAD", 2)).unwrap();
        currencies.add(currency("USD", 2)).unwrap();
        let top = accounts.top_level();
        accounts
            .add_child(top, "A", AccountType::Checking, "CAD", None, false)
            .unwrap();
        accounts
            .add_child(top, "B", AccountType::Savings, "USD", None, false)
            .unwrap();
        (accounts, currencies, SecurityCollection::default())
    }

    #[test]
    fn test_single_currency_balance() {
        let (accounts, _, _) = setup();
        let a = accounts.get_by_path("A").unwrap();
        let b = accounts.get_by_path("B").unwrap();
        let splits = vec![
            Split::new(amt("100.00"), a, "CAD"),
            Split::new(amt("-100.00"), b, "CAD"),
        ];
        assert!(splits_balance(&accounts, &splits));

        let unbalanced = vec![
            Split::new(amt("100.00"), a, "CAD"),
            Split::new(amt("-90.00"), b, "CAD"),
        ];
        assert!(!splits_balance(&accounts, &unbalanced));
    }

    #[test]
    fn test_trading_splits_idempotent() {
        let (mut accounts, currencies, securities) = setup();
        let a = accounts.get_by_path("A").unwrap();
        let b = accounts.get_by_path("B").unwrap();
        let mut splits = vec![
            Split::new(amt("-130.00"), a, "CAD"),
            Split::new(amt("100.00"), b, "USD"),
        ];
        add_trading_splits(&mut accounts, &currencies, &securities, &mut splits)
            .unwrap();
        assert_eq!(splits.len(), 4);
        let cad: Amount = splits
            .iter()
            .filter(|s| s.currency == "CAD")
            .fold(Amount::zero(), |acc, s| acc + s.amount);
        let usd: Amount = splits
            .iter()
            .filter(|s| s.currency == "USD")
            .fold(Amount::zero(), |acc, s| acc + s.amount);
        assert!(cad.is_zero());
        assert!(usd.is_zero());
        assert!(splits_balance(&accounts, &splits));
        assert!(is_currency_exchange(&accounts, &splits));

        // invariant: a second invocation changes nothing
        let before = splits.clone();
        add_trading_splits(&mut accounts, &currencies, &securities, &mut splits)
            .unwrap();
        assert_eq!(splits, before);
    }

    #[test]
    fn test_unknown_currency_fails() {
        let (mut accounts, currencies, securities) = setup();
        let a = accounts.get_by_path("A").unwrap();
        let b = accounts.get_by_path("B").unwrap();
        let mut splits = vec![
            Split::new(amt("-130.00"), a, "CAD"),
            Split::new(amt("100.00"), b, "XYZ"),
        ];
        assert!(matches!(
            add_trading_splits(
                &mut accounts,
                &currencies,
                &securities,
                &mut splits
            ),
            Err(TlyError::Balance(_))
        ));
    }

    #[test]
    fn test_totals_for_account() {
        let (accounts, _, _) = setup();
        let a = accounts.get_by_path("A").unwrap();
        let b = accounts.get_by_path("B").unwrap();
        let splits = vec![
            Split::new(amt("60.00"), a, "CAD"),
            Split::new(amt("40.00"), a, "CAD"),
            Split::new(amt("-100.00"), b, "CAD"),
        ];
        let totals = Transaction::totals_for_account(a, &splits);
        assert_eq!(totals.value("CAD"), amt("100.00"));
    }
}
