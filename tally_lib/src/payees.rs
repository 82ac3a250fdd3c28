use serde::{Deserialize, Serialize};

#[derive(
    Copy, Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct PayeeId(pub u32);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Payee {
    pub id: PayeeId,
    pub name: String,
}

#[derive(Default)]
pub struct PayeeCollection {
    payees: Vec<Payee>,
    next_id: u32,
}

impl PayeeCollection {
    pub fn add(&mut self, name: &str) -> PayeeId {
        if let Some(p) = self.find(name) {
            return p;
        }
        self.next_id += 1;
        let id = PayeeId(self.next_id);
        self.payees.push(Payee {
            id,
            name: name.to_string(),
        });
        id
    }

    pub fn get(&self, id: PayeeId) -> Option<&Payee> {
        self.payees.iter().find(|p| p.id == id)
    }

    pub fn find(&self, name: &str) -> Option<PayeeId> {
        self.payees.iter().find(|p| p.name == name).map(|p| p.id)
    }
}
