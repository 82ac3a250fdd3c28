use crate::errors::{Result, TlyError};
use crate::institutions::InstitutionId;
use crate::securities::{Security, SecurityId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(
    Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize,
    Deserialize,
)]
pub struct AccountId(pub u32);

/// Kind of a node in the chart of accounts.  User-defined kinds carry codes
/// of 50 and above.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    TopLevel,
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
    Trading,
    Cash,
    Checking,
    Investment,
    Deposit,
    PrepaidCard,
    Savings,
    Brokerage,
    CreditCard,
    Property,
    Custom(i32),
}

impl AccountType {
    pub fn code(&self) -> i32 {
        match self {
            AccountType::TopLevel => 0,
            AccountType::Asset => 1,
            AccountType::Liability => 2,
            AccountType::Equity => 3,
            AccountType::Income => 4,
            AccountType::Expense => 5,
            AccountType::Trading => 6,
            AccountType::Cash => 10,
            AccountType::Checking => 11,
            AccountType::Investment => 12,
            AccountType::Deposit => 13,
            AccountType::PrepaidCard => 14,
            AccountType::Savings => 15,
            AccountType::Brokerage => 16,
            AccountType::CreditCard => 17,
            AccountType::Property => 18,
            AccountType::Custom(code) => *code,
        }
    }

    pub fn from_code(code: i32) -> AccountType {
        match code {
            0 => AccountType::TopLevel,
            1 => AccountType::Asset,
            2 => AccountType::Liability,
            3 => AccountType::Equity,
            4 => AccountType::Income,
            5 => AccountType::Expense,
            6 => AccountType::Trading,
            10 => AccountType::Cash,
            11 => AccountType::Checking,
            12 => AccountType::Investment,
            13 => AccountType::Deposit,
            14 => AccountType::PrepaidCard,
            15 => AccountType::Savings,
            16 => AccountType::Brokerage,
            17 => AccountType::CreditCard,
            18 => AccountType::Property,
            other => AccountType::Custom(other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub kind: AccountType,

    /// Empty for security-denominated accounts (their unit is the security).
    pub main_currency: String,
    pub secondary_currencies: Vec<String>,
    pub id_security: Option<SecurityId>,

    /// A placeholder groups children and holds no transactions itself.
    pub is_placeholder: bool,
    pub is_open: bool,

    pub parent: Option<AccountId>,
    pub children: Vec<AccountId>,
    pub institution: Option<InstitutionId>,
}

impl Account {
    /// Every currency usable on this account (main first).
    pub fn all_currencies(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if !self.main_currency.is_empty() {
            out.push(self.main_currency.as_str());
        }
        for c in &self.secondary_currencies {
            out.push(c.as_str());
        }
        out
    }

    pub fn is_investment(&self) -> bool {
        self.kind == AccountType::Investment
    }
}

pub struct AccountCollection {
    accounts: HashMap<AccountId, Account>,
    top_level: AccountId,
    trading_root: Option<AccountId>,
    next_id: u32,
}

impl Default for AccountCollection {
    fn default() -> Self {
        let top = AccountId(1);
        let mut accounts = HashMap::new();
        accounts.insert(
            top,
            Account {
                id: top,
                name: "Top Level".to_string(),
                kind: AccountType::TopLevel,
                main_currency: String::new(),
                secondary_currencies: Vec::new(),
                id_security: None,
                is_placeholder: true,
                is_open: true,
                parent: None,
                children: Vec::new(),
                institution: None,
            },
        );
        AccountCollection {
            accounts,
            top_level: top,
            trading_root: None,
            next_id: 1,
        }
    }
}

impl AccountCollection {
    pub fn top_level(&self) -> AccountId {
        self.top_level
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    pub fn get(&self, id: AccountId) -> Result<&Account> {
        self.accounts
            .get(&id)
            .ok_or_else(|| TlyError::lookup(format!("unknown account #{}", id.0)))
    }

    pub fn get_mut(&mut self, id: AccountId) -> Result<&mut Account> {
        self.accounts
            .get_mut(&id)
            .ok_or_else(|| TlyError::lookup(format!("unknown account #{}", id.0)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn add_child(
        &mut self,
        parent: AccountId,
        name: &str,
        kind: AccountType,
        main_currency: &str,
        id_security: Option<SecurityId>,
        is_placeholder: bool,
    ) -> Result<AccountId> {
        if kind == AccountType::TopLevel {
            return Err(TlyError::state("only one top-level account exists"));
        }
        if kind == AccountType::Trading
            && main_currency.is_empty()
            && id_security.is_none()
        {
            return Err(TlyError::validation(
                "a trading account needs a currency or a security",
            ));
        }
        self.get(parent)?;
        self.next_id += 1;
        let id = AccountId(self.next_id);
        self.accounts.insert(
            id,
            Account {
                id,
                name: name.to_string(),
                kind,
                main_currency: main_currency.to_string(),
                secondary_currencies: Vec::new(),
                id_security,
                is_placeholder,
                is_open: true,
                parent: Some(parent),
                children: Vec::new(),
                institution: None,
            },
        );
        if let Some(p) = self.accounts.get_mut(&parent) {
            p.children.push(id);
        }
        Ok(id)
    }

    /// Remove a leaf account.  The caller is responsible for checking that
    /// its ledger is empty.
    pub fn remove(&mut self, id: AccountId) -> Result<()> {
        let account = self.get(id)?;
        if !account.children.is_empty() {
            return Err(TlyError::state(format!(
                "account {} still has children",
                account.name
            )));
        }
        let parent = account.parent;
        self.accounts.remove(&id);
        if let Some(p) = parent.and_then(|p| self.accounts.get_mut(&p)) {
            p.children.retain(|c| *c != id);
        }
        if self.trading_root == Some(id) {
            self.trading_root = None;
        }
        Ok(())
    }

    /// Resolve a `Parent::Child::Grandchild` path below the top level.
    pub fn get_by_path(&self, path: &str) -> Option<AccountId> {
        let mut current = self.top_level;
        for name in path.split("::") {
            let account = self.accounts.get(&current)?;
            current = *account.children.iter().find(|c| {
                self.accounts.get(c).is_some_and(|a| a.name == name)
            })?;
        }
        Some(current)
    }

    pub fn path(&self, id: AccountId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            match self.accounts.get(&c) {
                Some(a) if a.parent.is_some() => {
                    parts.push(a.name.clone());
                    current = a.parent;
                }
                Some(_) | None => break,
            }
        }
        parts.reverse();
        parts.join("::")
    }

    fn trading_root(&mut self) -> AccountId {
        if let Some(id) = self.trading_root {
            return id;
        }
        self.next_id += 1;
        let id = AccountId(self.next_id);
        self.accounts.insert(
            id,
            Account {
                id,
                name: "Trading".to_string(),
                kind: AccountType::Trading,
                main_currency: String::new(),
                secondary_currencies: Vec::new(),
                id_security: None,
                is_placeholder: true,
                is_open: true,
                parent: Some(self.top_level),
                children: Vec::new(),
                institution: None,
            },
        );
        if let Some(top) = self.accounts.get_mut(&self.top_level) {
            top.children.push(id);
        }
        self.trading_root = Some(id);
        id
    }

    /// The contra account absorbing imbalances in `currency`, created on
    /// first use under the Trading branch.
    pub fn create_currency_trading_account(
        &mut self,
        currency: &str,
    ) -> Result<AccountId> {
        let root = self.trading_root();
        let existing = self.get(root)?.children.iter().copied().find(|c| {
            self.account(*c)
                .is_some_and(|a| a.main_currency == currency)
        });
        match existing {
            Some(id) => Ok(id),
            None => self.add_child(
                root,
                currency,
                AccountType::Trading,
                currency,
                None,
                false,
            ),
        }
    }

    /// Same as [`create_currency_trading_account`], for a security.
    pub fn create_security_trading_account(
        &mut self,
        security: &Security,
    ) -> Result<AccountId> {
        let root = self.trading_root();
        let existing = self.get(root)?.children.iter().copied().find(|c| {
            self.account(*c)
                .is_some_and(|a| a.id_security == Some(security.id))
        });
        match existing {
            Some(id) => Ok(id),
            None => self.add_child(
                root,
                &security.name,
                AccountType::Trading,
                "",
                Some(security.id),
                false,
            ),
        }
    }

    pub fn is_currency_trading(&self, id: AccountId) -> bool {
        let Some(root) = self.trading_root else {
            return false;
        };
        self.account(id).is_some_and(|a| {
            a.parent == Some(root) && !a.main_currency.is_empty()
        })
    }

    pub fn is_trading(&self, id: AccountId) -> bool {
        self.account(id)
            .is_some_and(|a| a.kind == AccountType::Trading)
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    #[test]
    fn test_tree_and_paths() {
        let mut coll = AccountCollection::default();
        let top = coll.top_level();
        let assets = coll
            .add_child(top, "Assets", AccountType::Asset, "CAD", None, true)
            .unwrap();
        let checking = coll
            .add_child(
                assets,
                "Checking",
                AccountType::Checking,
                "CAD",
                None,
                false,
            )
            .unwrap();
        assert_eq!(coll.path(checking), "Assets::Checking");
        assert_eq!(coll.get_by_path("Assets::Checking"), Some(checking));
        assert_eq!(coll.get_by_path("Assets::Nope"), None);

        assert!(coll.remove(assets).is_err());
        coll.remove(checking).unwrap();
        assert!(coll.get_by_path("Assets::Checking").is_none());
    }

    #[test]
    fn test_trading_accounts() {
        let mut coll = AccountCollection::default();
        let cad = coll.create_currency_trading_account("CAD").unwrap();
        let cad2 = coll.create_currency_trading_account("CAD").unwrap();
        let usd = coll.create_currency_trading_account("USD").unwrap();
        assert_eq!(cad, cad2);
        assert_ne!(cad, usd);
        assert!(coll.is_currency_trading(cad));
        assert!(coll.is_trading(cad));
        assert!(!coll.is_currency_trading(coll.top_level()));
        assert_eq!(coll.path(cad), "Trading::CAD");
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(AccountType::from_code(12), AccountType::Investment);
        assert_eq!(AccountType::from_code(57), AccountType::Custom(57));
        assert_eq!(AccountType::Custom(57).code(), 57);
        for t in [
            AccountType::Asset,
            AccountType::Trading,
            AccountType::Property,
        ] {
            assert_eq!(AccountType::from_code(t.code()), t);
        }
    }
}
