use crate::accounts::AccountId;
use crate::balances::Balances;
use crate::investments::InvestmentAction;
use crate::schedules::ScheduleId;
use crate::transactions::{Split, TransactionId};
use chrono::NaiveDate;
use log::debug;

/// Everything the engine tells the outside world about.  Handlers run as
/// synchronous in-thread callbacks after the state they describe has been
/// applied, in the emission order the mutation prescribes.
#[derive(Debug, Clone)]
pub enum Event {
    TransactionAdded {
        tx: TransactionId,
    },
    TransactionRemoved {
        tx: TransactionId,
    },
    TransactionModified {
        tx: TransactionId,
    },
    TransactionDateChanged {
        tx: TransactionId,
        old: NaiveDate,
    },
    SplitAdded {
        tx: TransactionId,
        split: Split,
    },
    SplitRemoved {
        tx: TransactionId,
        split: Split,
    },
    SplitAmountChanged {
        tx: TransactionId,
        split: Split,
    },
    InvestmentActionChanged {
        tx: TransactionId,
        previous: InvestmentAction,
    },
    StockSplitAmountChanged {
        tx: TransactionId,
    },
    BalanceChanged {
        account: AccountId,
        delta: Balances,
    },
    /// Same as BalanceChanged, emitted additionally when the affected date
    /// is today or earlier.
    BalanceTodayChanged {
        account: AccountId,
        delta: Balances,
    },
    RateSet {
        from: String,
        to: String,
        date: NaiveDate,
    },
    RateRemoved {
        from: String,
        to: String,
        date: NaiveDate,
    },
    LastRateModified {
        from: String,
        to: String,
    },
    ScheduleOccurrenceEntered {
        schedule: ScheduleId,
        date: NaiveDate,
    },
    ScheduleOccurrenceCanceled {
        schedule: ScheduleId,
        date: NaiveDate,
    },
    ScheduleRemoved {
        schedule: ScheduleId,
    },
}

type Listener = Box<dyn FnMut(&Event)>;

/// Replaces the per-object signals of a widget toolkit: components that
/// need to react subscribe once, and every mutation funnels its deltas
/// through here.
#[derive(Default)]
pub struct ObserverRegistry {
    listeners: Vec<Listener>,
}

impl ObserverRegistry {
    pub fn subscribe(&mut self, listener: impl FnMut(&Event) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn emit(&mut self, event: Event) {
        debug!("event: {event:?}");
        for l in &mut self.listeners {
            l(&event);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_dispatch() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ObserverRegistry::default();
        let sink = seen.clone();
        registry.subscribe(move |e| {
            if let Event::TransactionAdded { tx } = e {
                sink.borrow_mut().push(*tx);
            }
        });
        registry.emit(Event::TransactionAdded {
            tx: TransactionId(7),
        });
        registry.emit(Event::TransactionRemoved {
            tx: TransactionId(7),
        });
        assert_eq!(*seen.borrow(), vec![TransactionId(7)]);
    }
}
