use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(
    Copy, Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct InstitutionId(pub u32);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Institution {
    pub id: InstitutionId,
    pub name: String,
}

#[derive(Default)]
pub struct InstitutionCollection(HashMap<InstitutionId, Institution>);

impl InstitutionCollection {
    pub fn add(&mut self, id: InstitutionId, name: &str) {
        self.0.insert(
            id,
            Institution {
                id,
                name: name.to_string(),
            },
        );
    }

    pub fn get(&self, id: InstitutionId) -> Option<&Institution> {
        self.0.get(&id)
    }
}
