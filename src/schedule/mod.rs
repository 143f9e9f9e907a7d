//! Repayment schedule calculator
//!
//! Simple, non-compounding interest spread over equal monthly installments.
//! Everything here is a pure function of the loan terms, a start date and
//! the amounts recorded per month.

use chrono::{DateTime, Months, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{DomainError, DomainResult};

/// Largest accepted difference between a repayment and the installment
pub const INSTALLMENT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Totals derived from (principal, annual rate percent, duration)
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct Amortization {
    pub principal: Decimal,
    pub annual_rate: Decimal,
    pub duration: i32,
    pub total_repayment: Decimal,
    pub installment: Decimal,
}

impl Amortization {
    /// Whether `amount` settles one installment
    pub fn matches_installment(&self, amount: Decimal) -> bool {
        (amount - self.installment).abs() <= INSTALLMENT_TOLERANCE
    }

    pub fn remaining_balance(&self, total_paid: Decimal) -> Decimal {
        (self.total_repayment - total_paid).max(Decimal::ZERO)
    }
}

fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn amortize(
    principal: Decimal,
    annual_rate_percent: Decimal,
    duration_months: i32,
) -> DomainResult<Amortization> {
    if principal <= Decimal::ZERO {
        return Err(DomainError::validation("Principal must be positive"));
    }
    if annual_rate_percent < Decimal::ZERO {
        return Err(DomainError::validation("Interest rate cannot be negative"));
    }
    if duration_months < 1 {
        return Err(DomainError::validation("Duration must be at least 1 month"));
    }

    let months = Decimal::from(duration_months);
    let interest = principal * annual_rate_percent / Decimal::ONE_HUNDRED * months / Decimal::from(12);
    let total_repayment = round_money(principal + interest);
    let installment = round_money(total_repayment / months);

    Ok(Amortization {
        principal,
        annual_rate: annual_rate_percent,
        duration: duration_months,
        total_repayment,
        installment,
    })
}

/// Due date of `month`, counted in calendar months from `start`
pub fn due_date(start: DateTime<Utc>, month: i32) -> DateTime<Utc> {
    u32::try_from(month)
        .ok()
        .and_then(|m| start.checked_add_months(Months::new(m)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// round(100 * completed / duration)
pub fn progress(completed: usize, duration: i32) -> u32 {
    if duration <= 0 {
        return 0;
    }
    let ratio = Decimal::from(completed as u64) * Decimal::ONE_HUNDRED / Decimal::from(duration);
    ratio
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u32()
        .unwrap_or(0)
        .min(100)
}

/// True once the next unpaid month is due for longer than `grace_months`
pub fn is_past_due(
    start: DateTime<Utc>,
    next_due_month: i32,
    grace_months: i32,
    duration: i32,
    now: DateTime<Utc>,
) -> bool {
    if next_due_month > duration {
        return false;
    }
    due_date(start, next_due_month + grace_months.max(0)) < now
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum InstallmentStatus {
    Paid,
    Overdue,
    Upcoming,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub month: i32,
    pub due_date: DateTime<Utc>,
    pub amount: Decimal,
    pub paid_amount: Decimal,
    pub status: InstallmentStatus,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct RepaymentSchedule {
    pub terms: Amortization,
    pub start_date: DateTime<Utc>,
    pub entries: Vec<ScheduleEntry>,
    pub total_paid: Decimal,
    pub remaining_balance: Decimal,
    pub next_due_month: i32,
    pub progress: u32,
}

impl RepaymentSchedule {
    /// Due date of the next unpaid installment, if any remain
    pub fn next_payment_due(&self) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .find(|e| e.month == self.next_due_month)
            .map(|e| e.due_date)
    }
}

pub fn build_schedule(
    terms: &Amortization,
    start_date: DateTime<Utc>,
    paid_by_month: &BTreeMap<i32, Decimal>,
) -> RepaymentSchedule {
    let next_due_month = paid_by_month
        .iter()
        .filter(|(_, amount)| **amount > Decimal::ZERO)
        .map(|(month, _)| *month)
        .max()
        .map_or(1, |month| month + 1);

    let entries: Vec<ScheduleEntry> = (1..=terms.duration)
        .map(|month| {
            let paid_amount = paid_by_month.get(&month).copied().unwrap_or(Decimal::ZERO);
            let status = if paid_amount > Decimal::ZERO {
                InstallmentStatus::Paid
            } else if month < next_due_month {
                InstallmentStatus::Overdue
            } else {
                InstallmentStatus::Upcoming
            };
            ScheduleEntry {
                month,
                due_date: due_date(start_date, month),
                amount: terms.installment,
                paid_amount,
                status,
            }
        })
        .collect();

    let completed = entries
        .iter()
        .filter(|e| e.status == InstallmentStatus::Paid)
        .count();
    let total_paid = entries
        .iter()
        .fold(Decimal::ZERO, |acc, e| acc + e.paid_amount);

    RepaymentSchedule {
        terms: *terms,
        start_date,
        remaining_balance: terms.remaining_balance(total_paid),
        progress: progress(completed, terms.duration),
        total_paid,
        next_due_month,
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_amortization_reference_case() {
        let terms = amortize(Decimal::from(12000), Decimal::from(6), 24).unwrap();
        assert_eq!(terms.total_repayment, Decimal::from(13440));
        assert_eq!(terms.installment, Decimal::new(56000, 2));
        assert_eq!(terms.installment.to_string(), "560.00");
    }

    #[test]
    fn test_amortization_rejects_bad_terms() {
        assert!(amortize(Decimal::ZERO, Decimal::from(5), 12).is_err());
        assert!(amortize(Decimal::from(100), Decimal::from(-1), 12).is_err());
        assert!(amortize(Decimal::from(100), Decimal::from(5), 0).is_err());
    }

    #[test]
    fn test_installment_tolerance() {
        // 1000 at 0% over 3 months -> 333.33 per month
        let terms = amortize(Decimal::from(1000), Decimal::ZERO, 3).unwrap();
        assert_eq!(terms.installment, Decimal::new(33333, 2));
        assert!(terms.matches_installment(Decimal::new(33334, 2)));
        assert!(terms.matches_installment(Decimal::new(33332, 2)));
        assert!(!terms.matches_installment(Decimal::new(33335, 2)));
    }

    #[test]
    fn test_due_dates_clamp_to_month_end() {
        assert_eq!(
            due_date(start(), 1),
            Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()
        );
        assert_eq!(
            due_date(start(), 3),
            Utc.with_ymd_and_hms(2024, 4, 30, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_schedule_statuses() {
        let terms = amortize(Decimal::from(1200), Decimal::ZERO, 4).unwrap();
        let mut paid = BTreeMap::new();
        paid.insert(1, Decimal::from(300));
        paid.insert(3, Decimal::from(300));

        let schedule = build_schedule(&terms, start(), &paid);
        let statuses: Vec<_> = schedule.entries.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                InstallmentStatus::Paid,
                InstallmentStatus::Overdue,
                InstallmentStatus::Paid,
                InstallmentStatus::Upcoming,
            ]
        );
        assert_eq!(schedule.next_due_month, 4);
        assert_eq!(schedule.progress, 50);
        assert_eq!(schedule.total_paid, Decimal::from(600));
        assert_eq!(schedule.remaining_balance, Decimal::from(600));
        assert_eq!(schedule.next_payment_due(), Some(due_date(start(), 4)));
    }

    #[test]
    fn test_progress_rounds() {
        assert_eq!(progress(0, 24), 0);
        assert_eq!(progress(1, 3), 33);
        assert_eq!(progress(2, 3), 67);
        assert_eq!(progress(24, 24), 100);
    }

    #[test]
    fn test_past_due_respects_grace() {
        let now = Utc.with_ymd_and_hms(2024, 4, 15, 0, 0, 0).unwrap();
        // month 1 due 2024-02-29; plus one grace month -> 2024-03-31
        assert!(is_past_due(start(), 1, 1, 12, now));
        // plus three grace months -> 2024-05-31
        assert!(!is_past_due(start(), 1, 3, 12, now));
        // fully repaid
        assert!(!is_past_due(start(), 13, 0, 12, now));
    }
}
