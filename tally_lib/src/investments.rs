use crate::accounts::{AccountCollection, AccountId, AccountType};
use crate::amounts::Amount;
use crate::errors::{Result, TlyError};
use crate::fragments::SplitFraction;
use crate::lots::Lots;
use crate::securities::SecurityCollection;
use crate::transactions::{splits_balance, Split, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// What an investment transaction does.  The numeric codes are part of the
/// persisted form and must stay stable.
#[derive(
    Copy, Clone, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum InvestmentAction {
    Buy,
    Sell,
    ShortSell,
    ShortCover,
    Transfer,
    Swap,
    Spinoff,
    StockSplit,
    Dividend,
    StockDividend,
    Distribution,
    ReinvestDiv,
    ReinvestDistrib,
    UndistributedCapitalGain,
    CostBasisAdjustment,
    Fee,
    #[default]
    Invalid,
}

impl InvestmentAction {
    pub fn code(&self) -> i32 {
        match self {
            InvestmentAction::Buy => 1,
            InvestmentAction::Sell => 2,
            InvestmentAction::ShortSell => 5,
            InvestmentAction::ShortCover => 6,
            InvestmentAction::Transfer => 10,
            InvestmentAction::Swap => 11,
            InvestmentAction::Spinoff => 12,
            InvestmentAction::StockSplit => 20,
            InvestmentAction::Dividend => 30,
            InvestmentAction::StockDividend => 31,
            InvestmentAction::Distribution => 32,
            InvestmentAction::ReinvestDiv => 40,
            InvestmentAction::ReinvestDistrib => 41,
            InvestmentAction::UndistributedCapitalGain => 50,
            InvestmentAction::CostBasisAdjustment => 51,
            InvestmentAction::Fee => 60,
            InvestmentAction::Invalid => -1,
        }
    }

    pub fn from_code(code: i32) -> InvestmentAction {
        match code {
            1 => InvestmentAction::Buy,
            2 => InvestmentAction::Sell,
            5 => InvestmentAction::ShortSell,
            6 => InvestmentAction::ShortCover,
            10 => InvestmentAction::Transfer,
            11 => InvestmentAction::Swap,
            12 => InvestmentAction::Spinoff,
            20 => InvestmentAction::StockSplit,
            30 => InvestmentAction::Dividend,
            31 => InvestmentAction::StockDividend,
            32 => InvestmentAction::Distribution,
            40 => InvestmentAction::ReinvestDiv,
            41 => InvestmentAction::ReinvestDistrib,
            50 => InvestmentAction::UndistributedCapitalGain,
            51 => InvestmentAction::CostBasisAdjustment,
            60 => InvestmentAction::Fee,
            _ => InvestmentAction::Invalid,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InvestmentAction::Buy => "Buy",
            InvestmentAction::Sell => "Sell",
            InvestmentAction::ShortSell => "Short Sell",
            InvestmentAction::ShortCover => "Short Cover",
            InvestmentAction::Transfer => "Transfer",
            InvestmentAction::Swap => "Swap",
            InvestmentAction::Spinoff => "Spinoff",
            InvestmentAction::StockSplit => "Split",
            InvestmentAction::Dividend => "Dividend",
            InvestmentAction::StockDividend => "Stock Dividend",
            InvestmentAction::Distribution => "Distribution",
            InvestmentAction::ReinvestDiv => "Reinvest Dividend",
            InvestmentAction::ReinvestDistrib => "Reinvest Distribution",
            InvestmentAction::UndistributedCapitalGain => {
                "Undistributed Capital Gain"
            }
            InvestmentAction::CostBasisAdjustment => "Cost Basis Adjustment",
            InvestmentAction::Fee => "Fee",
            InvestmentAction::Invalid => "Invalid",
        }
    }

    /// Which side of the lot ledger the action works on.
    pub fn class(&self) -> InvestmentActionClass {
        match self {
            InvestmentAction::Buy
            | InvestmentAction::ReinvestDiv
            | InvestmentAction::ReinvestDistrib
            | InvestmentAction::Sell => InvestmentActionClass::Long,
            InvestmentAction::ShortSell | InvestmentAction::ShortCover => {
                InvestmentActionClass::Short
            }
            InvestmentAction::Transfer
            | InvestmentAction::Swap
            | InvestmentAction::Spinoff => InvestmentActionClass::Transfer,
            InvestmentAction::StockSplit
            | InvestmentAction::Dividend
            | InvestmentAction::StockDividend
            | InvestmentAction::Distribution
            | InvestmentAction::UndistributedCapitalGain
            | InvestmentAction::CostBasisAdjustment
            | InvestmentAction::Fee
            | InvestmentAction::Invalid => InvestmentActionClass::Invalid,
        }
    }

    /// Actions that create a share lot.
    pub fn creates_lot(&self) -> bool {
        matches!(
            self,
            InvestmentAction::Buy
                | InvestmentAction::ShortSell
                | InvestmentAction::ReinvestDiv
                | InvestmentAction::ReinvestDistrib
        )
    }

    /// Actions that consume shares from existing lots.
    pub fn consumes_lots(&self) -> bool {
        matches!(
            self,
            InvestmentAction::Sell
                | InvestmentAction::ShortCover
                | InvestmentAction::Transfer
                | InvestmentAction::Swap
                | InvestmentAction::Spinoff
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InvestmentActionClass {
    Long,
    Short,
    Transfer,
    Invalid,
}

/// Role tag of a split inside an investment transaction.  The code is
/// stored in the split's `user_data`.
#[derive(
    Copy, Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum InvestmentSplitType {
    CostProceeds,
    Investment,
    InvestmentTo,
    InvestmentFrom,
    DistributionSource,
    DistributionDest,
    CashInLieu,
    Fee,
    GainLoss,
    Tax,
    Trading,
}

impl InvestmentSplitType {
    pub fn code(&self) -> i32 {
        match self {
            InvestmentSplitType::CostProceeds => 0,
            InvestmentSplitType::Investment => 1,
            InvestmentSplitType::InvestmentTo => 2,
            InvestmentSplitType::InvestmentFrom => 3,
            InvestmentSplitType::DistributionSource => 4,
            InvestmentSplitType::DistributionDest => 5,
            InvestmentSplitType::CashInLieu => 6,
            InvestmentSplitType::Fee => 7,
            InvestmentSplitType::GainLoss => 8,
            InvestmentSplitType::Tax => 9,
            InvestmentSplitType::Trading => 10,
        }
    }

    pub fn from_code(code: i32) -> Option<InvestmentSplitType> {
        Some(match code {
            0 => InvestmentSplitType::CostProceeds,
            1 => InvestmentSplitType::Investment,
            2 => InvestmentSplitType::InvestmentTo,
            3 => InvestmentSplitType::InvestmentFrom,
            4 => InvestmentSplitType::DistributionSource,
            5 => InvestmentSplitType::DistributionDest,
            6 => InvestmentSplitType::CashInLieu,
            7 => InvestmentSplitType::Fee,
            8 => InvestmentSplitType::GainLoss,
            9 => InvestmentSplitType::Tax,
            10 => InvestmentSplitType::Trading,
            _ => return None,
        })
    }
}

#[derive(
    Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize,
    Deserialize,
)]
pub enum DistribType {
    ReturnOfCapital,
    CapitalGain,
    Other,
}

impl DistribType {
    pub fn code(&self) -> i32 {
        match self {
            DistribType::ReturnOfCapital => 0,
            DistribType::CapitalGain => 1,
            DistribType::Other => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<DistribType> {
        Some(match code {
            0 => DistribType::ReturnOfCapital,
            1 => DistribType::CapitalGain,
            2 => DistribType::Other,
            _ => return None,
        })
    }
}

/// Percentage composition of a distribution; must add up to 100.
pub type DistribComposition = BTreeMap<DistribType, Amount>;

/// Storeable form: comma-separated `type:amount` pairs.
pub fn composition_to_storeable(composition: &DistribComposition) -> String {
    composition
        .iter()
        .map(|(t, a)| format!("{}:{}", t.code(), a.to_storeable()))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn composition_from_storeable(s: &str) -> Result<DistribComposition> {
    let mut composition = DistribComposition::new();
    for part in s.split(',').filter(|p| !p.trim().is_empty()) {
        let bad = || {
            TlyError::Io(format!(
                "bad distribution composition entry {part:?}"
            ))
        };
        let (t, a) = part.trim().split_once(':').ok_or_else(bad)?;
        let t = t
            .parse::<i32>()
            .ok()
            .and_then(DistribType::from_code)
            .ok_or_else(bad)?;
        composition.insert(t, Amount::from_storeable(a)?);
    }
    Ok(composition)
}

/// Extra state an investment transaction carries beyond its splits.
#[derive(Clone, Debug)]
pub struct InvestmentFields {
    pub action: InvestmentAction,
    pub price_per_share: Amount,
    /// Lots consumed by this transaction, when it sells/covers/moves shares.
    pub lots: Lots,
    /// Reverse index: where each split role sits in the split list.
    pub types: HashMap<InvestmentSplitType, usize>,
    pub distrib_composition: DistribComposition,
    pub split_fraction: SplitFraction,
    pub basis_adjustment: Amount,
    pub tax_paid: Amount,
}

impl Default for InvestmentFields {
    fn default() -> Self {
        InvestmentFields {
            action: InvestmentAction::Invalid,
            price_per_share: Amount::zero(),
            lots: Lots::new(),
            types: HashMap::new(),
            distrib_composition: DistribComposition::new(),
            split_fraction: SplitFraction::identity(),
            basis_adjustment: Amount::zero(),
            tax_paid: Amount::zero(),
        }
    }
}

// Investment-specific accessors.  They all return neutral values on a
// standard transaction.
impl Transaction {
    pub fn investment_action(&self) -> InvestmentAction {
        self.investment()
            .map(|f| f.action)
            .unwrap_or(InvestmentAction::Invalid)
    }

    pub fn has_split_for(&self, t: InvestmentSplitType) -> bool {
        self.investment().is_some_and(|f| f.types.contains_key(&t))
    }

    pub fn split_for(&self, t: InvestmentSplitType) -> Result<&Split> {
        self.investment()
            .and_then(|f| f.types.get(&t))
            .and_then(|i| self.splits().get(*i))
            .ok_or_else(|| {
                TlyError::validation(format!("no {t:?} split"))
            })
    }

    /// Number of shares this transaction moves, signed as recorded (buys
    /// positive, sells negative).
    pub fn share_count(&self) -> Amount {
        let split = match self.investment_action() {
            InvestmentAction::Buy
            | InvestmentAction::Sell
            | InvestmentAction::ShortSell
            | InvestmentAction::ShortCover
            | InvestmentAction::StockDividend
            | InvestmentAction::ReinvestDiv
            | InvestmentAction::ReinvestDistrib
            | InvestmentAction::Fee => {
                self.split_for(InvestmentSplitType::Investment)
            }
            InvestmentAction::Transfer | InvestmentAction::Swap => {
                self.split_for(InvestmentSplitType::InvestmentFrom)
            }
            InvestmentAction::Spinoff => {
                self.split_for(InvestmentSplitType::InvestmentTo)
            }
            InvestmentAction::StockSplit
            | InvestmentAction::Dividend
            | InvestmentAction::Distribution
            | InvestmentAction::UndistributedCapitalGain
            | InvestmentAction::CostBasisAdjustment
            | InvestmentAction::Invalid => return Amount::zero(),
        };
        split.map(|s| s.amount).unwrap_or_default()
    }

    pub fn price_per_share(&self) -> Amount {
        self.investment()
            .map(|f| f.price_per_share)
            .unwrap_or_default()
    }

    /// Price per share once the fee is folded in: buys effectively pay
    /// `price + fee/shares`, sells receive `price - fee/shares`.
    pub fn net_price_per_share(&self) -> Amount {
        let Some(fields) = self.investment() else {
            return Amount::zero();
        };
        if !self.has_split_for(InvestmentSplitType::Fee) {
            return fields.price_per_share;
        }
        let fee = self.fee();
        let shares = self.share_count().abs();
        match fields.action {
            InvestmentAction::Buy
            | InvestmentAction::ShortCover
            | InvestmentAction::StockDividend
            | InvestmentAction::ReinvestDiv
            | InvestmentAction::ReinvestDistrib => {
                fields.price_per_share + fee / shares
            }
            InvestmentAction::Sell
            | InvestmentAction::ShortSell
            | InvestmentAction::Fee => fields.price_per_share - fee / shares,
            InvestmentAction::Transfer
            | InvestmentAction::Swap
            | InvestmentAction::Spinoff
            | InvestmentAction::StockSplit
            | InvestmentAction::Dividend
            | InvestmentAction::Distribution
            | InvestmentAction::UndistributedCapitalGain
            | InvestmentAction::CostBasisAdjustment
            | InvestmentAction::Invalid => Amount::zero(),
        }
    }

    pub fn fee(&self) -> Amount {
        self.split_for(InvestmentSplitType::Fee)
            .map(|s| s.amount)
            .unwrap_or_default()
    }

    pub fn gain_loss(&self) -> Amount {
        self.split_for(InvestmentSplitType::GainLoss)
            .map(|s| s.amount)
            .unwrap_or_default()
    }

    pub fn tax_paid(&self) -> Amount {
        if matches!(
            self.investment_action(),
            InvestmentAction::Sell
                | InvestmentAction::ShortSell
                | InvestmentAction::ShortCover
                | InvestmentAction::StockDividend
                | InvestmentAction::ReinvestDiv
                | InvestmentAction::ReinvestDistrib
        ) {
            if let Ok(s) = self.split_for(InvestmentSplitType::Tax) {
                return s.amount;
            }
        }
        self.investment().map(|f| f.tax_paid).unwrap_or_default()
    }

    pub fn basis_adjustment(&self) -> Amount {
        self.investment()
            .map(|f| f.basis_adjustment)
            .unwrap_or_default()
    }

    pub fn split_fraction(&self) -> SplitFraction {
        self.investment()
            .map(|f| f.split_fraction)
            .unwrap_or_else(SplitFraction::identity)
    }

    pub fn lots(&self) -> Lots {
        self.investment().map(|f| f.lots.clone()).unwrap_or_default()
    }

    pub fn distrib_composition(&self) -> DistribComposition {
        self.investment()
            .map(|f| f.distrib_composition.clone())
            .unwrap_or_default()
    }

    /// The investment account this transaction acts on; for transfers and
    /// swaps, the FROM side.
    pub fn id_investment_account(&self) -> Result<AccountId> {
        let split = match self.investment_action() {
            InvestmentAction::Invalid => {
                return Err(TlyError::state("the transaction is invalid"))
            }
            InvestmentAction::Transfer | InvestmentAction::Swap => {
                self.split_for(InvestmentSplitType::InvestmentFrom)?
            }
            InvestmentAction::Buy
            | InvestmentAction::Sell
            | InvestmentAction::ShortSell
            | InvestmentAction::ShortCover
            | InvestmentAction::Spinoff
            | InvestmentAction::StockSplit
            | InvestmentAction::Dividend
            | InvestmentAction::StockDividend
            | InvestmentAction::Distribution
            | InvestmentAction::ReinvestDiv
            | InvestmentAction::ReinvestDistrib
            | InvestmentAction::UndistributedCapitalGain
            | InvestmentAction::CostBasisAdjustment
            | InvestmentAction::Fee => {
                self.split_for(InvestmentSplitType::Investment)?
            }
        };
        Ok(split.account)
    }

    /// The destination investment account of a Transfer/Swap/Spinoff.
    pub fn id_investment_to_account(&self) -> Option<AccountId> {
        if matches!(
            self.investment_action(),
            InvestmentAction::Transfer
                | InvestmentAction::Swap
                | InvestmentAction::Spinoff
        ) {
            self.split_for(InvestmentSplitType::InvestmentTo)
                .ok()
                .map(|s| s.account)
        } else {
            None
        }
    }

    /// The "other side" account shown in a one-line ledger view.
    pub fn id_transfer_account(&self) -> Option<AccountId> {
        let t = match self.investment_action() {
            InvestmentAction::Buy
            | InvestmentAction::Sell
            | InvestmentAction::ShortCover
            | InvestmentAction::ShortSell
            | InvestmentAction::Fee => InvestmentSplitType::CostProceeds,
            InvestmentAction::Transfer
            | InvestmentAction::Swap
            | InvestmentAction::Spinoff => InvestmentSplitType::InvestmentTo,
            InvestmentAction::Dividend
            | InvestmentAction::Distribution
            | InvestmentAction::ReinvestDiv
            | InvestmentAction::ReinvestDistrib => {
                InvestmentSplitType::DistributionSource
            }
            InvestmentAction::StockSplit
            | InvestmentAction::StockDividend
            | InvestmentAction::UndistributedCapitalGain
            | InvestmentAction::CostBasisAdjustment
            | InvestmentAction::Invalid => return None,
        };
        self.split_for(t).ok().map(|s| s.account)
    }

    /// A synthesized memo when the user left none.
    pub fn auto_memo(
        &self,
        accounts: &AccountCollection,
        securities: &SecurityCollection,
    ) -> String {
        if !self.memo().is_empty() {
            return self.memo().to_string();
        }
        let action = self.investment_action();
        let body = match action {
            InvestmentAction::Buy => {
                match self.split_for(InvestmentSplitType::CostProceeds) {
                    Ok(s) => format!(
                        "Bought {} shares at {} per share. Total cost: {}",
                        self.share_count(),
                        self.price_per_share(),
                        -s.amount,
                    ),
                    Err(_) => String::new(),
                }
            }
            InvestmentAction::Sell => {
                match self.split_for(InvestmentSplitType::CostProceeds) {
                    Ok(s) => format!(
                        "Sold {} shares at {} per share. Total proceeds: {}",
                        -self.share_count(),
                        self.price_per_share(),
                        s.amount,
                    ),
                    Err(_) => String::new(),
                }
            }
            InvestmentAction::Dividend | InvestmentAction::Distribution => {
                match self.split_for(InvestmentSplitType::DistributionSource)
                {
                    Ok(s) => format!("{}: {}", action.name(), -s.amount),
                    Err(_) => String::new(),
                }
            }
            InvestmentAction::ReinvestDiv
            | InvestmentAction::ReinvestDistrib => {
                match self.split_for(InvestmentSplitType::DistributionSource)
                {
                    Ok(s) => format!(
                        "Reinvested {}: {} shares at {} per share.",
                        -s.amount,
                        self.share_count(),
                        self.price_per_share(),
                    ),
                    Err(_) => String::new(),
                }
            }
            InvestmentAction::Fee => {
                match self.split_for(InvestmentSplitType::CostProceeds) {
                    Ok(s) => format!("Fee: {}", s.amount),
                    Err(_) => String::new(),
                }
            }
            InvestmentAction::ShortSell
            | InvestmentAction::ShortCover
            | InvestmentAction::Transfer
            | InvestmentAction::Swap
            | InvestmentAction::Spinoff
            | InvestmentAction::StockSplit
            | InvestmentAction::StockDividend
            | InvestmentAction::UndistributedCapitalGain
            | InvestmentAction::CostBasisAdjustment
            | InvestmentAction::Invalid => String::new(),
        };
        if body.is_empty() {
            return body;
        }
        let symbol = self
            .id_investment_account()
            .ok()
            .and_then(|id| accounts.account(id))
            .and_then(|a| a.id_security)
            .and_then(|s| securities.get(s).ok())
            .map(|s| s.symbol.clone());
        match symbol {
            Some(sym) => format!("[{sym}] {body}"),
            None => body,
        }
    }

    /// Install the role tags: fills the reverse index and stamps each
    /// split's `user_data` with its role code.
    pub(crate) fn assign_types(&mut self, types: &[InvestmentSplitType]) {
        for (i, t) in types.iter().enumerate() {
            if let Some(s) = self.splits.get_mut(i) {
                s.user_data = t.code().to_string();
            }
        }
        if let Some(fields) = self.investment_mut() {
            fields.types =
                types.iter().enumerate().map(|(i, t)| (*t, i)).collect();
        }
    }

    /// The zero-amount split anchoring an anchored action (StockSplit, cost
    /// basis adjustment, ...) to its investment account.
    pub(crate) fn add_anchor_split(&mut self, account: AccountId) {
        let mut s = Split::new(Amount::zero(), account, "");
        s.user_data = InvestmentSplitType::Investment.code().to_string();
        let at = self.splits.len();
        self.splits.push(s);
        if let Some(fields) = self.investment_mut() {
            fields.types.insert(InvestmentSplitType::Investment, at);
        }
    }

    /// Rebuild the role index from the split tags, after load.
    pub(crate) fn reindex_types(&mut self) {
        let mapping: HashMap<InvestmentSplitType, usize> = self
            .splits
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                s.user_data
                    .parse::<i32>()
                    .ok()
                    .and_then(InvestmentSplitType::from_code)
                    .map(|t| (t, i))
            })
            .collect();
        if let Some(fields) = self.investment_mut() {
            fields.types = mapping;
        }
    }
}

pub(crate) fn check_action(
    action: InvestmentAction,
    allowed: &[InvestmentAction],
) -> Result<()> {
    if allowed.contains(&action) {
        Ok(())
    } else {
        Err(TlyError::validation(format!(
            "invalid investment transaction action {}",
            action.name()
        )))
    }
}

pub(crate) fn check_id_investment_account(
    accounts: &AccountCollection,
    id: AccountId,
) -> Result<()> {
    let account = accounts.get(id)?;
    if account.kind != AccountType::Investment || account.id_security.is_none()
    {
        return Err(TlyError::validation(
            "the investment split must relate to an investment account",
        ));
    }
    Ok(())
}

pub(crate) fn check_distrib_composition(
    action: InvestmentAction,
    composition: &DistribComposition,
) -> Result<()> {
    if composition.is_empty() {
        return Ok(());
    }
    if action != InvestmentAction::Distribution
        && action != InvestmentAction::ReinvestDistrib
    {
        return Err(TlyError::validation(
            "a distribution composition can only be set for Distribution or \
             Reinvested Distribution transactions",
        ));
    }
    let total = composition
        .values()
        .fold(Amount::zero(), |acc, a| acc + *a);
    if total != Amount::from_int(100, 0) {
        return Err(TlyError::validation(
            "the distribution composition must add up to 100",
        ));
    }
    Ok(())
}

/// The split roles each action requires and tolerates (any number of
/// Trading splits is always allowed on top).
pub(crate) fn split_type_sets(
    action: InvestmentAction,
) -> (Vec<InvestmentSplitType>, Vec<InvestmentSplitType>) {
    use InvestmentSplitType::*;
    match action {
        InvestmentAction::Buy | InvestmentAction::ShortSell => {
            (vec![CostProceeds, Investment, Trading], vec![Tax, Fee])
        }
        InvestmentAction::Sell | InvestmentAction::ShortCover => (
            vec![CostProceeds, Investment, Trading],
            vec![Tax, Fee, GainLoss],
        ),
        InvestmentAction::Fee => {
            (vec![CostProceeds, Investment, Trading], vec![])
        }
        InvestmentAction::Transfer => {
            (vec![InvestmentFrom, InvestmentTo], vec![])
        }
        InvestmentAction::Swap => {
            (vec![InvestmentFrom, InvestmentTo, Trading], vec![])
        }
        InvestmentAction::Spinoff => {
            (vec![Investment, InvestmentTo, Trading], vec![])
        }
        InvestmentAction::ReinvestDiv | InvestmentAction::ReinvestDistrib => (
            vec![DistributionSource, Investment, Trading],
            vec![Fee, Tax, CashInLieu],
        ),
        InvestmentAction::Dividend | InvestmentAction::Distribution => (
            vec![DistributionSource, DistributionDest],
            vec![Tax, Trading],
        ),
        // anchored actions have no user splits, only their anchor
        InvestmentAction::StockSplit
        | InvestmentAction::StockDividend
        | InvestmentAction::UndistributedCapitalGain
        | InvestmentAction::CostBasisAdjustment
        | InvestmentAction::Invalid => (vec![], vec![]),
    }
}

/// Validate a proposed split list against the action matrix: balanced,
/// typed one-to-one, the right account kinds, matching currencies, no
/// duplicate roles, all required roles present and nothing outside the
/// allowed set.
pub(crate) fn check_splits(
    accounts: &AccountCollection,
    securities: &SecurityCollection,
    splits: &[Split],
    types: &[InvestmentSplitType],
    required: &[InvestmentSplitType],
    optional: &[InvestmentSplitType],
    action: InvestmentAction,
) -> Result<()> {
    if !splits_balance(accounts, splits) {
        return Err(TlyError::balance("the splits do not balance"));
    }
    if splits.len() != types.len() {
        return Err(TlyError::validation(
            "there must be the same number of splits and types",
        ));
    }

    let mut proceeds_currency: Option<String> = None;
    let mut id_security = None;
    let mut id_security_other = None;
    let mut account_from = None;
    let mut account_to = None;

    for (split, t) in splits.iter().zip(types) {
        if split.amount.is_zero() {
            return Err(TlyError::validation(
                "cannot have zero amount splits",
            ));
        }
        let account = accounts.get(split.account)?;
        if account.is_placeholder {
            return Err(TlyError::validation(format!(
                "account {} is a placeholder",
                account.name
            )));
        }
        match t {
            InvestmentSplitType::Investment => {
                if account.kind != AccountType::Investment
                    || account.id_security.is_none()
                {
                    return Err(TlyError::validation(
                        "wrong account for this split (investment)",
                    ));
                }
                id_security = account.id_security;
                account_from = Some(account.id);
            }
            InvestmentSplitType::InvestmentFrom => {
                if account.id_security.is_none() {
                    return Err(TlyError::validation(
                        "wrong account for this split (investment from)",
                    ));
                }
                id_security = account.id_security;
                account_from = Some(account.id);
            }
            InvestmentSplitType::InvestmentTo => {
                if account.id_security.is_none() {
                    return Err(TlyError::validation(
                        "wrong account for this split (investment to)",
                    ));
                }
                id_security_other = account.id_security;
                account_to = Some(account.id);
            }
            InvestmentSplitType::Trading => {
                if account.kind != AccountType::Trading {
                    return Err(TlyError::validation(
                        "wrong account for this split (trading)",
                    ));
                }
            }
            InvestmentSplitType::CostProceeds => {
                proceeds_currency = Some(split.currency.clone());
                if account.kind == AccountType::Investment {
                    return Err(TlyError::validation(
                        "wrong account for this split (non investment)",
                    ));
                }
            }
            InvestmentSplitType::DistributionSource
            | InvestmentSplitType::DistributionDest
            | InvestmentSplitType::CashInLieu
            | InvestmentSplitType::Fee
            | InvestmentSplitType::GainLoss
            | InvestmentSplitType::Tax => {
                if account.kind == AccountType::Investment {
                    return Err(TlyError::validation(
                        "wrong account for this split (non investment)",
                    ));
                }
            }
        }
    }

    if let (Some(cur), Some(sec)) = (&proceeds_currency, id_security) {
        if securities.get(sec)?.currency != *cur {
            return Err(TlyError::validation(
                "the cost/proceeds currency has to match the trading \
                 currency of the security",
            ));
        }
    }

    if account_from.is_some() && account_from == account_to {
        return Err(TlyError::validation(
            "the source and destination accounts must differ",
        ));
    }
    if action == InvestmentAction::Transfer
        && id_security != id_security_other
    {
        return Err(TlyError::validation(
            "the source and destination securities for the transfer must \
             match",
        ));
    }
    if matches!(
        action,
        InvestmentAction::Swap | InvestmentAction::Spinoff
    ) && id_security == id_security_other
    {
        return Err(TlyError::validation(
            "the source and destination securities for the swap must differ",
        ));
    }

    // Exactly one of each non-Trading role, all the required ones, nothing
    // outside required + optional.
    let mut seen: HashMap<InvestmentSplitType, usize> = HashMap::new();
    for t in types {
        if *t != InvestmentSplitType::Trading {
            *seen.entry(*t).or_insert(0) += 1;
        }
    }
    if seen.values().any(|count| *count != 1) {
        return Err(TlyError::validation(
            "at most one split of each type (except Trading) is allowed",
        ));
    }
    if !required
        .iter()
        .all(|t| *t == InvestmentSplitType::Trading || seen.contains_key(t))
    {
        return Err(TlyError::validation(
            "at least one required split is missing",
        ));
    }
    if required.contains(&InvestmentSplitType::Trading)
        && !types.contains(&InvestmentSplitType::Trading)
    {
        return Err(TlyError::validation(
            "at least one required split is missing",
        ));
    }
    if !seen.keys().all(|t| {
        required.contains(t) || optional.contains(t)
    }) {
        return Err(TlyError::validation(
            "the split types must be a subset of the required and optional \
             types for this investment transaction action",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_action_codes() {
        for action in [
            InvestmentAction::Buy,
            InvestmentAction::ShortCover,
            InvestmentAction::Spinoff,
            InvestmentAction::ReinvestDistrib,
            InvestmentAction::Fee,
            InvestmentAction::Invalid,
        ] {
            assert_eq!(InvestmentAction::from_code(action.code()), action);
        }
        assert_eq!(InvestmentAction::Buy.code(), 1);
        assert_eq!(InvestmentAction::StockSplit.code(), 20);
        assert_eq!(InvestmentAction::UndistributedCapitalGain.code(), 50);
        assert_eq!(InvestmentAction::from_code(99), InvestmentAction::Invalid);
    }

    #[test]
    fn test_action_classes() {
        assert_eq!(
            InvestmentAction::Sell.class(),
            InvestmentActionClass::Long
        );
        assert_eq!(
            InvestmentAction::ShortCover.class(),
            InvestmentActionClass::Short
        );
        assert_eq!(
            InvestmentAction::Swap.class(),
            InvestmentActionClass::Transfer
        );
        assert_eq!(
            InvestmentAction::Dividend.class(),
            InvestmentActionClass::Invalid
        );
    }

    #[test]
    fn test_composition_storeable() {
        let mut comp = DistribComposition::new();
        comp.insert(DistribType::ReturnOfCapital, "40".parse().unwrap());
        comp.insert(DistribType::Other, "60".parse().unwrap());
        let stored = composition_to_storeable(&comp);
        assert_eq!(stored, "0:40/0,2:60/0");
        assert_eq!(composition_from_storeable(&stored).unwrap(), comp);
        assert!(composition_from_storeable("9:1/0").is_err());
    }

    #[test]
    fn test_composition_check() {
        let mut comp = DistribComposition::new();
        comp.insert(DistribType::ReturnOfCapital, "40".parse().unwrap());
        comp.insert(DistribType::Other, "60".parse().unwrap());
        check_distrib_composition(InvestmentAction::Distribution, &comp)
            .unwrap();
        assert!(check_distrib_composition(
            InvestmentAction::Dividend,
            &comp
        )
        .is_err());

        comp.insert(DistribType::CapitalGain, "10".parse().unwrap());
        assert!(check_distrib_composition(
            InvestmentAction::Distribution,
            &comp
        )
        .is_err());
    }
}
