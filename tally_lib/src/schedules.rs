use crate::accounts::AccountId;
use crate::errors::{Result, TlyError};
use crate::transactions::Transaction;
use chrono::{Datelike, Days, Months, NaiveDate};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

#[derive(
    Copy, Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct ScheduleId(pub u32);

/// No more than this many occurrences are ever enumerated ahead.
pub const MAX_FUTURE: usize = 100;

/// Synthetic day-of-month markers, resolved against each concrete month.
pub const FIRST_WEEKDAY: i8 = -1;
pub const LAST_WEEKDAY: i8 = -2;
pub const LAST_DAY: i8 = -3;

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum Frequency {
    Once,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn code(&self) -> i32 {
        match self {
            Frequency::Once => 0,
            Frequency::Daily => 1,
            Frequency::Weekly => 2,
            Frequency::Monthly => 3,
            Frequency::Yearly => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Frequency> {
        Some(match code {
            0 => Frequency::Once,
            1 => Frequency::Daily,
            2 => Frequency::Weekly,
            3 => Frequency::Monthly,
            4 => Frequency::Yearly,
            _ => return None,
        })
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next.and_then(|d| d.pred_opt()).map(|d| d.day()).unwrap_or(28)
}

// First day of the month that is not a Saturday or Sunday.
fn first_weekday(year: i32, month: u32) -> u32 {
    match NaiveDate::from_ymd_opt(year, month, 1) {
        Some(d) => match d.weekday().number_from_monday() {
            6 => 3,
            7 => 2,
            _ => 1,
        },
        None => 1,
    }
}

// Last day of the month that is not a Saturday or Sunday.
fn last_weekday(year: i32, month: u32) -> u32 {
    let last = days_in_month(year, month);
    match NaiveDate::from_ymd_opt(year, month, last) {
        Some(d) => match d.weekday().number_from_monday() {
            6 => last - 1,
            7 => last - 2,
            _ => last,
        },
        None => last,
    }
}

/// A recurrence pattern: the begin date, a frequency with its period, the
/// per-frequency day selectors, and an optional stop condition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recurrence {
    pub begin: Option<NaiveDate>,
    pub frequency: Frequency,
    pub every: u32,

    /// For Weekly: ISO weekday numbers, 1 = Monday .. 7 = Sunday.
    pub weekdays: std::collections::BTreeSet<u8>,
    /// For Monthly: days 1..=31 or the negative markers.
    pub days_of_month: std::collections::BTreeSet<i8>,
    /// For Yearly: (month, day-or-marker) pairs.
    pub days_of_year: std::collections::BTreeSet<(u8, i8)>,

    pub stops: bool,
    pub last_date: Option<NaiveDate>,
    pub num_remaining: Option<u32>,
}

impl Recurrence {
    pub fn new(
        begin: NaiveDate,
        frequency: Frequency,
        every: u32,
    ) -> Recurrence {
        Recurrence {
            begin: Some(begin),
            frequency,
            every,
            weekdays: Default::default(),
            days_of_month: Default::default(),
            days_of_year: Default::default(),
            stops: false,
            last_date: None,
            num_remaining: None,
        }
    }

    fn days_of_month_valid(
        days: &std::collections::BTreeSet<i8>,
    ) -> bool {
        days.iter().all(|d| (-3..=31).contains(d) && *d != 0)
    }

    fn days_of_year_valid(
        days: &std::collections::BTreeSet<(u8, i8)>,
    ) -> bool {
        days.iter().all(|(month, day)| {
            if *day == 0 || *day < -3 {
                return false;
            }
            if *day < 0 {
                return (1..=12).contains(month);
            }
            match *month {
                2 => *day <= 29,
                4 | 6 | 9 | 11 => *day <= 30,
                1 | 3 | 5 | 7 | 8 | 10 | 12 => *day <= 31,
                _ => false,
            }
        })
    }

    pub fn is_valid(&self) -> bool {
        if self.begin.is_none() {
            return false;
        }
        if self.every == 0 && self.frequency != Frequency::Once {
            return false;
        }
        if self.stops
            && self.num_remaining.is_none()
            && self.last_date.is_none()
        {
            return false;
        }
        match self.frequency {
            Frequency::Once | Frequency::Daily => true,
            Frequency::Weekly => {
                !self.weekdays.is_empty()
                    && self.weekdays.iter().all(|d| (1..=7).contains(d))
            }
            Frequency::Monthly => {
                !self.days_of_month.is_empty()
                    && Self::days_of_month_valid(&self.days_of_month)
            }
            Frequency::Yearly => {
                !self.days_of_year.is_empty()
                    && Self::days_of_year_valid(&self.days_of_year)
            }
        }
    }

    // Concrete, ordered day numbers for one month, with markers resolved
    // and days the month does not have dropped.
    fn ordered_days_of_month(&self, year: i32, month: u32) -> Vec<u32> {
        let in_month = days_in_month(year, month);
        let mut days: Vec<u32> = self
            .days_of_month
            .iter()
            .filter_map(|d| match *d {
                FIRST_WEEKDAY => Some(first_weekday(year, month)),
                LAST_WEEKDAY => Some(last_weekday(year, month)),
                LAST_DAY => Some(in_month),
                d if d > 0 && (d as u32) <= in_month => Some(d as u32),
                _ => None,
            })
            .collect();
        days.sort_unstable();
        days.dedup();
        days
    }

    fn ordered_days_of_year(&self, year: i32) -> Vec<(u32, u32)> {
        let mut days: Vec<(u32, u32)> = self
            .days_of_year
            .iter()
            .filter_map(|(month, day)| {
                let month = u32::from(*month);
                let in_month = days_in_month(year, month);
                match *day {
                    FIRST_WEEKDAY => {
                        Some((month, first_weekday(year, month)))
                    }
                    LAST_WEEKDAY => Some((month, last_weekday(year, month))),
                    LAST_DAY => Some((month, in_month)),
                    d if d > 0 && (d as u32) <= in_month => {
                        Some((month, d as u32))
                    }
                    _ => None,
                }
            })
            .collect();
        days.sort_unstable();
        days.dedup();
        days
    }

    /// Enumerate the next occurrence dates, skipping any member of `skip`
    /// (which must be sorted).  At most `min(at_most, MAX_FUTURE, remaining
    /// occurrences if the recurrence stops)` dates are returned, strictly
    /// increasing.
    pub fn next_occurrences_dates(
        &self,
        skip: &[NaiveDate],
        at_most: usize,
        at_most_date: Option<NaiveDate>,
    ) -> Vec<NaiveDate> {
        let Some(begin) = self.begin else {
            return Vec::new();
        };
        let mut limit = at_most.min(MAX_FUTURE);
        if self.stops {
            if let Some(n) = self.num_remaining {
                limit = limit.min(n as usize);
            }
        }

        let mut out: Vec<NaiveDate> = Vec::new();
        let mut next: Option<NaiveDate> = None;
        let mut skip_at = 0;
        let mut first_iteration = true;

        while out.len() < limit {
            next = match self.frequency {
                Frequency::Once => match next {
                    Some(_) => None,
                    None => Some(begin),
                },
                Frequency::Daily => Some(match next {
                    Some(n) => n + Days::new(u64::from(self.every)),
                    None => begin,
                }),
                Frequency::Weekly => {
                    let cur = match next {
                        Some(n) => n,
                        None => begin - Days::new(1),
                    };
                    if self.weekdays.is_empty() {
                        return out;
                    }
                    let weekday = cur.weekday().number_from_monday() as u8;
                    match self.weekdays.range(weekday + 1..).next().copied() {
                        Some(d) => Some(
                            cur + Days::new(u64::from(d - weekday)),
                        ),
                        None => {
                            // wrap into the next period; the first step
                            // never skips whole weeks
                            let first =
                                *self.weekdays.iter().next().unwrap_or(&1);
                            let weeks = if first_iteration {
                                1
                            } else {
                                u64::from(self.every)
                            };
                            let ahead = weeks * 7 + u64::from(first)
                                - u64::from(weekday);
                            Some(cur + Days::new(ahead))
                        }
                    }
                }
                Frequency::Monthly => {
                    let cur = match next {
                        Some(n) => n,
                        None => begin - Days::new(1),
                    };
                    let days =
                        self.ordered_days_of_month(cur.year(), cur.month());
                    match days.iter().find(|d| **d > cur.day()) {
                        Some(d) => NaiveDate::from_ymd_opt(
                            cur.year(),
                            cur.month(),
                            *d,
                        ),
                        None => self.advance_months(cur, first_iteration),
                    }
                }
                Frequency::Yearly => {
                    let cur = match next {
                        Some(n) => n,
                        None => begin - Days::new(1),
                    };
                    let days = self.ordered_days_of_year(cur.year());
                    match days
                        .iter()
                        .find(|(m, d)| (*m, *d) > (cur.month(), cur.day()))
                    {
                        Some((m, d)) => {
                            NaiveDate::from_ymd_opt(cur.year(), *m, *d)
                        }
                        None => self.advance_years(cur, first_iteration),
                    }
                }
            };

            let Some(candidate) = next else {
                break;
            };
            if at_most_date.is_some_and(|most| candidate > most) {
                break;
            }
            if self.stops
                && self.last_date.is_some_and(|last| candidate > last)
            {
                break;
            }

            while skip.get(skip_at).is_some_and(|s| *s < candidate) {
                skip_at += 1;
            }
            if skip.get(skip_at) != Some(&candidate) {
                out.push(candidate);
            }
            first_iteration = false;
        }

        out
    }

    // Move to the first selected day of a later month.  Months with none of
    // the selected days (a bare 31 in February) are stepped over.
    fn advance_months(
        &self,
        cur: NaiveDate,
        first_iteration: bool,
    ) -> Option<NaiveDate> {
        let step = if first_iteration { 1 } else { self.every };
        let mut month =
            NaiveDate::from_ymd_opt(cur.year(), cur.month(), 1)?
                + Months::new(step);
        for _ in 0..48 {
            let days = self.ordered_days_of_month(month.year(), month.month());
            if let Some(d) = days.first() {
                return NaiveDate::from_ymd_opt(
                    month.year(),
                    month.month(),
                    *d,
                );
            }
            month = month + Months::new(self.every.max(1));
        }
        None
    }

    fn advance_years(
        &self,
        cur: NaiveDate,
        first_iteration: bool,
    ) -> Option<NaiveDate> {
        let step = if first_iteration { 1 } else { self.every } as i32;
        let mut year = cur.year() + step;
        for _ in 0..8 {
            let days = self.ordered_days_of_year(year);
            if let Some((m, d)) = days.first() {
                return NaiveDate::from_ymd_opt(year, *m, *d);
            }
            year += self.every.max(1) as i32;
        }
        None
    }
}

// ---- storeable encodings -----------------------------------------------

pub fn weekdays_to_letters(
    weekdays: &std::collections::BTreeSet<u8>,
) -> String {
    weekdays
        .iter()
        .filter_map(|d| match d {
            1 => Some('M'),
            2 => Some('T'),
            3 => Some('W'),
            4 => Some('R'),
            5 => Some('F'),
            6 => Some('S'),
            7 => Some('N'),
            _ => None,
        })
        .collect()
}

pub fn weekdays_from_letters(s: &str) -> std::collections::BTreeSet<u8> {
    s.chars()
        .filter_map(|c| match c {
            'M' => Some(1),
            'T' => Some(2),
            'W' => Some(3),
            'R' => Some(4),
            'F' => Some(5),
            'S' => Some(6),
            'N' => Some(7),
            _ => None,
        })
        .collect()
}

pub fn month_days_to_storeable(
    days: &std::collections::BTreeSet<i8>,
) -> String {
    days.iter().map(i8::to_string).join(",")
}

pub fn month_days_from_storeable(
    s: &str,
) -> Result<std::collections::BTreeSet<i8>> {
    s.split(',')
        .filter(|p| !p.trim().is_empty())
        .map(|p| {
            p.trim()
                .parse::<i8>()
                .map_err(|e| TlyError::Io(format!("bad month day {p:?}: {e}")))
        })
        .collect()
}

pub fn year_days_to_storeable(
    days: &std::collections::BTreeSet<(u8, i8)>,
) -> String {
    days.iter().map(|(m, d)| format!("{m}:{d}")).join(",")
}

pub fn year_days_from_storeable(
    s: &str,
) -> Result<std::collections::BTreeSet<(u8, i8)>> {
    s.split(',')
        .filter(|p| !p.trim().is_empty())
        .map(|p| {
            let bad =
                || TlyError::Io(format!("bad year day {p:?}"));
            let (m, d) = p.trim().split_once(':').ok_or_else(bad)?;
            Ok((
                m.parse::<u8>().map_err(|_| bad())?,
                d.parse::<i8>().map_err(|_| bad())?,
            ))
        })
        .collect()
}

/// A template transaction plus the recurrence producing its occurrences,
/// with the bookkeeping of which dates were already entered or canceled.
pub struct Schedule {
    pub(crate) id: ScheduleId,
    pub(crate) description: String,
    pub(crate) active: bool,
    pub(crate) auto_enter: bool,
    pub(crate) remind_before: Option<u8>,
    pub(crate) recurrence: Recurrence,
    pub(crate) template: Transaction,
    pub(crate) entered: Vec<NaiveDate>,
    pub(crate) canceled: Vec<NaiveDate>,
}

impl Schedule {
    pub fn id(&self) -> ScheduleId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn auto_enter(&self) -> bool {
        self.auto_enter
    }

    pub fn set_auto_enter(&mut self, auto_enter: bool) {
        self.auto_enter = auto_enter;
    }

    pub fn remind_before(&self) -> Option<u8> {
        self.remind_before
    }

    /// Reminder horizon in days, clamped to at most 30.
    pub fn set_remind_before(&mut self, days: Option<u8>) {
        self.remind_before = days.map(|d| d.min(30));
    }

    pub fn recurrence(&self) -> &Recurrence {
        &self.recurrence
    }

    pub fn set_recurrence(&mut self, recurrence: Recurrence) -> Result<()> {
        if !recurrence.is_valid() {
            return Err(TlyError::validation(
                "the recurrence settings are invalid",
            ));
        }
        self.recurrence = recurrence;
        Ok(())
    }

    pub fn template(&self) -> &Transaction {
        &self.template
    }

    pub fn set_template(&mut self, template: Transaction) -> Result<()> {
        if template.split_count() == 0 {
            return Err(TlyError::validation("the transaction is invalid"));
        }
        self.template = template;
        Ok(())
    }

    pub fn entered_occurrences(&self) -> &[NaiveDate] {
        &self.entered
    }

    pub fn canceled_occurrences(&self) -> &[NaiveDate] {
        &self.canceled
    }

    pub fn next_occurrences_dates(
        &self,
        at_most: usize,
        at_most_date: Option<NaiveDate>,
    ) -> Vec<NaiveDate> {
        if !self.active || (at_most == 0 && at_most_date.is_none()) {
            return Vec::new();
        }
        // both lists are sorted, so a merge keeps the skip list sorted
        let skip: Vec<NaiveDate> = self
            .entered
            .iter()
            .merge(self.canceled.iter())
            .copied()
            .collect();
        let at_most = if at_most == 0 { MAX_FUTURE } else { at_most };
        self.recurrence
            .next_occurrences_dates(&skip, at_most, at_most_date)
    }

    /// Record `date` as entered and return the concrete transaction to
    /// commit (a dated copy of the template).
    pub(crate) fn enter_occurrence_of(
        &mut self,
        date: NaiveDate,
    ) -> Result<Transaction> {
        let next = self.next_occurrences_dates(MAX_FUTURE, None);
        if !next.contains(&date) {
            return Err(TlyError::validation(
                "the occurrence date is not valid",
            ));
        }
        let tx = self.template.duplicated(date);
        self.consume_occurrence(date, &next, true);
        Ok(tx)
    }

    /// Record `date` as canceled; no transaction is produced.
    pub(crate) fn cancel_occurrence_of(
        &mut self,
        date: NaiveDate,
    ) -> Result<()> {
        let next = self.next_occurrences_dates(MAX_FUTURE, None);
        if !next.contains(&date) {
            return Err(TlyError::validation(
                "the occurrence date is not valid",
            ));
        }
        self.consume_occurrence(date, &next, false);
        Ok(())
    }

    fn consume_occurrence(
        &mut self,
        date: NaiveDate,
        next: &[NaiveDate],
        entered: bool,
    ) {
        let list = if entered {
            &mut self.entered
        } else {
            &mut self.canceled
        };
        let at = list.partition_point(|d| *d <= date);
        list.insert(at, date);

        if self.recurrence.stops {
            if let Some(n) = self.recurrence.num_remaining {
                self.recurrence.num_remaining = Some(n.saturating_sub(1));
            }
        }

        if next.first() == Some(&date) {
            match next.get(1) {
                Some(following) => self.recurrence.begin = Some(*following),
                None => {
                    self.recurrence.begin = None;
                    self.active = false;
                }
            }
            // occurrences before the new begin can never match again
            if let Some(begin) = self.recurrence.begin {
                self.entered.retain(|d| *d >= begin);
                self.canceled.retain(|d| *d >= begin);
            }
        }
    }
}

/// Owns every schedule and hands out occurrence operations.
#[derive(Default)]
pub struct ScheduleManager {
    schedules: Vec<Schedule>,
    next_id: u32,
}

impl ScheduleManager {
    pub fn add(
        &mut self,
        description: &str,
        auto_enter: bool,
        recurrence: Recurrence,
        template: Transaction,
    ) -> Result<ScheduleId> {
        if template.split_count() == 0 {
            return Err(TlyError::validation("the transaction is invalid"));
        }
        if !recurrence.is_valid() {
            return Err(TlyError::validation(
                "the recurrence settings are invalid",
            ));
        }
        let mut recurrence = recurrence;
        if recurrence.stops && recurrence.last_date.is_some() {
            recurrence.num_remaining = None;
        }
        self.next_id += 1;
        let id = ScheduleId(self.next_id);
        self.schedules.push(Schedule {
            id,
            description: description.to_string(),
            active: true,
            auto_enter,
            remind_before: None,
            recurrence,
            template,
            entered: Vec::new(),
            canceled: Vec::new(),
        });
        Ok(id)
    }

    pub fn get(&self, id: ScheduleId) -> Result<&Schedule> {
        self.schedules.iter().find(|s| s.id == id).ok_or_else(|| {
            TlyError::lookup(format!("no such schedule #{}", id.0))
        })
    }

    pub(crate) fn get_mut(&mut self, id: ScheduleId) -> Result<&mut Schedule> {
        self.schedules
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| {
                TlyError::lookup(format!("no such schedule #{}", id.0))
            })
    }

    pub fn remove(&mut self, id: ScheduleId) -> bool {
        let before = self.schedules.len();
        self.schedules.retain(|s| s.id != id);
        self.schedules.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = &Schedule> {
        self.schedules.iter()
    }

    /// Schedules whose template touches an account.
    pub fn schedules_for(&self, account: AccountId) -> Vec<ScheduleId> {
        self.schedules
            .iter()
            .filter(|s| s.template.related_to(account))
            .map(|s| s.id)
            .collect()
    }

    /// Drop schedules referring to a removed account; returns their ids.
    pub fn remove_schedules_for_account(
        &mut self,
        account: AccountId,
    ) -> Vec<ScheduleId> {
        let removed = self.schedules_for(account);
        self.schedules
            .retain(|s| !s.template.related_to(account));
        removed
    }

    /// Active schedules whose next occurrence is due on or before `today`.
    pub fn due_schedules(
        &self,
        today: NaiveDate,
    ) -> Vec<(ScheduleId, NaiveDate)> {
        self.schedules
            .iter()
            .filter(|s| s.active)
            .filter_map(|s| {
                s.next_occurrences_dates(1, None)
                    .first()
                    .copied()
                    .filter(|d| *d <= today)
                    .map(|d| (s.id, d))
            })
            .collect()
    }

    /// Prune schedules with no remaining occurrences; returns their ids.
    pub fn after_load(&mut self) -> Vec<ScheduleId> {
        let dead: Vec<ScheduleId> = self
            .schedules
            .iter()
            .filter(|s| s.next_occurrences_dates(1, None).is_empty())
            .map(|s| s.id)
            .collect();
        self.schedules
            .retain(|s| !s.next_occurrences_dates(1, None).is_empty());
        dead
    }

    pub fn unload(&mut self) {
        self.schedules.clear();
        self.next_id = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_monthly_with_stop_count() {
        let mut rec =
            Recurrence::new(d("2024-07-01"), Frequency::Monthly, 1);
        rec.days_of_month.insert(15);
        rec.stops = true;
        rec.num_remaining = Some(3);
        assert!(rec.is_valid());
        assert_eq!(
            rec.next_occurrences_dates(&[], 5, None),
            vec![d("2024-07-15"), d("2024-08-15"), d("2024-09-15")]
        );
    }

    #[test]
    fn test_biweekly_two_weekdays() {
        let mut rec = Recurrence::new(d("2024-01-01"), Frequency::Weekly, 2);
        rec.weekdays.insert(1); // Monday
        rec.weekdays.insert(4); // Thursday
        assert_eq!(
            rec.next_occurrences_dates(&[], 6, None),
            vec![
                d("2024-01-01"),
                d("2024-01-04"),
                d("2024-01-15"),
                d("2024-01-18"),
                d("2024-01-29"),
                d("2024-02-01"),
            ]
        );
    }

    #[rstest]
    #[case(FIRST_WEEKDAY, "2024-03-01")] // March 1st 2024 is a Friday
    #[case(LAST_WEEKDAY, "2024-03-29")] // the 31st is a Sunday
    #[case(LAST_DAY, "2024-03-31")]
    fn test_monthly_markers(#[case] marker: i8, #[case] expected: &str) {
        let mut rec = Recurrence::new(d("2024-03-01"), Frequency::Monthly, 1);
        rec.days_of_month.insert(marker);
        assert_eq!(
            rec.next_occurrences_dates(&[], 1, None),
            vec![d(expected)]
        );
    }

    #[test]
    fn test_skip_and_termination() {
        let mut rec = Recurrence::new(d("2024-01-01"), Frequency::Daily, 1);
        rec.stops = true;
        rec.last_date = Some(d("2024-01-05"));
        let skip = vec![d("2024-01-02"), d("2024-01-04")];
        assert_eq!(
            rec.next_occurrences_dates(&skip, 50, None),
            vec![d("2024-01-01"), d("2024-01-03"), d("2024-01-05")]
        );

        // never more than MAX_FUTURE, never a skipped date, increasing
        let mut unbounded =
            Recurrence::new(d("2024-01-01"), Frequency::Daily, 1);
        unbounded.every = 1;
        let dates = unbounded.next_occurrences_dates(&skip, 1000, None);
        assert_eq!(dates.len(), MAX_FUTURE);
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
        assert!(dates.iter().all(|date| !skip.contains(date)));
    }

    #[test]
    fn test_yearly() {
        let mut rec = Recurrence::new(d("2024-01-01"), Frequency::Yearly, 1);
        rec.days_of_year.insert((3, 15));
        rec.days_of_year.insert((10, LAST_DAY));
        assert_eq!(
            rec.next_occurrences_dates(&[], 4, None),
            vec![
                d("2024-03-15"),
                d("2024-10-31"),
                d("2025-03-15"),
                d("2025-10-31"),
            ]
        );
    }

    #[test]
    fn test_once() {
        let rec = Recurrence::new(d("2024-06-01"), Frequency::Once, 0);
        assert!(rec.is_valid());
        assert_eq!(
            rec.next_occurrences_dates(&[], 10, None),
            vec![d("2024-06-01")]
        );
        assert!(rec
            .next_occurrences_dates(&[d("2024-06-01")], 10, None)
            .is_empty());
    }

    #[test]
    fn test_encodings() {
        let weekdays = weekdays_from_letters("MRN");
        assert_eq!(weekdays.iter().copied().collect::<Vec<_>>(), vec![1, 4, 7]);
        assert_eq!(weekdays_to_letters(&weekdays), "MRN");

        let days = month_days_from_storeable("1,15,-3").unwrap();
        assert!(days.contains(&LAST_DAY));
        assert_eq!(month_days_to_storeable(&days), "-3,1,15");

        let ydays = year_days_from_storeable("3:15,10:-2").unwrap();
        assert!(ydays.contains(&(10, LAST_WEEKDAY)));
        assert_eq!(year_days_to_storeable(&ydays), "3:15,10:-2");
        assert!(year_days_from_storeable("nope").is_err());
    }
}
