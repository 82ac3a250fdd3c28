pub mod accounts;
pub mod amounts;
pub mod balances;
pub mod buffers;
pub mod currencies;
pub mod errors;
pub mod events;
pub mod fragments;
pub mod institutions;
pub mod investments;
pub mod ledgers;
pub mod lots;
pub mod payees;
pub mod prices;
pub mod repositories;
pub mod schedules;
pub mod securities;
pub mod transactions;
pub mod treap;
