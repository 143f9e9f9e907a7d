//! Postgres-backed `AgreementStore`
//!
//! Every multi-row effect runs in a single short transaction. The owning
//! agreement row is locked (`FOR UPDATE`) only for the duration of that
//! transaction; nothing is held across ledger round-trips.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool, Postgres};
use sqlx::QueryBuilder;
use uuid::Uuid;

use super::store::{
    AgreementStore, AgreementWrite, ContractKind, PaymentGuard, TrackedContract, Transition,
};
use crate::error::{DomainError, DomainResult};
use crate::loan::{LoanAgreement, LoanStatus};
use crate::matching::{AcceptedOffer, LoanOffer, LoanRequest, OfferStatus, RequestStatus};
use crate::payment::{AgreementRef, NewPayment, Payment, PaymentType};
use crate::rental::{CollateralUsage, RentalAgreement, RentalStatus};

/// `AgreementStore` over a sqlx connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// (payments column, agreement table) for an agreement reference
fn agreement_columns(agreement: &AgreementRef) -> (&'static str, &'static str) {
    match agreement {
        AgreementRef::Rental(_) => ("rental_agreement_id", "rental_agreements"),
        AgreementRef::Loan(_) => ("loan_agreement_id", "loan_agreements"),
    }
}

async fn collateral_usage_in(
    conn: &mut PgConnection,
    rental_agreement_id: Uuid,
) -> DomainResult<CollateralUsage> {
    let row = sqlx::query_as::<_, (Decimal, Decimal, Decimal, Decimal)>(
        r#"
        SELECT
            r.security_deposit,
            COALESCE((SELECT SUM(p.amount) FROM payments p
                      WHERE p.rental_agreement_id = r.id AND p.payment_type = 'RENT_SKIPPED'), 0),
            COALESCE((SELECT SUM(q.amount) FROM loan_requests q
                      WHERE q.rental_agreement_id = r.id
                        AND q.status IN ('OPEN', 'MATCHED', 'FULFILLED')), 0),
            COALESCE((SELECT SUM(l.amount) FROM loan_agreements l
                      WHERE l.rental_agreement_id = r.id AND l.status = 'DEFAULTED'), 0)
        FROM rental_agreements r
        WHERE r.id = $1
        "#,
    )
    .bind(rental_agreement_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DomainError::not_found("Rental agreement", rental_agreement_id))?;

    Ok(CollateralUsage {
        security_deposit: row.0,
        skipped_rent: row.1,
        committed: row.2,
        forfeited: row.3,
    })
}

async fn insert_payment(
    conn: &mut PgConnection,
    payment: &NewPayment,
    guard: PaymentGuard,
) -> DomainResult<Payment> {
    let (column, table) = agreement_columns(&payment.agreement);
    let agreement_id = payment.agreement.id();
    let key = payment.key();

    let lock_sql = format!("SELECT id FROM {} WHERE id = $1 FOR UPDATE", table);
    let locked: Option<Uuid> = sqlx::query_scalar(&lock_sql)
        .bind(agreement_id)
        .fetch_optional(&mut *conn)
        .await?;
    if locked.is_none() {
        return Err(DomainError::not_found("Agreement", agreement_id));
    }

    let existing_sql = format!(
        "SELECT id FROM payments WHERE {} = $1 AND payment_type = $2 AND month IS NOT DISTINCT FROM $3",
        column
    );
    let existing: Option<Uuid> = sqlx::query_scalar(&existing_sql)
        .bind(agreement_id)
        .bind(key.payment_type)
        .bind(key.month)
        .fetch_optional(&mut *conn)
        .await?;
    if existing.is_some() {
        return Err(DomainError::Conflict(format!("payment {} already recorded", key)));
    }

    match (guard, key.month) {
        (PaymentGuard::KeyOnly, _) => {}
        (PaymentGuard::Sequential, Some(month)) => {
            let last_sql = format!(
                "SELECT COALESCE(MAX(month), 0) FROM payments WHERE {} = $1 AND payment_type = $2",
                column
            );
            let last: i32 = sqlx::query_scalar(&last_sql)
                .bind(agreement_id)
                .bind(key.payment_type)
                .fetch_one(&mut *conn)
                .await?;
            if month != last + 1 {
                return Err(DomainError::state(format!(
                    "month {} is out of sequence; next expected month is {}",
                    month,
                    last + 1
                )));
            }
        }
        (PaymentGuard::OpenRentMonth { skip_cap }, Some(month)) => {
            let settled: Option<PaymentType> = sqlx::query_scalar(
                r#"
                SELECT payment_type FROM payments
                WHERE rental_agreement_id = $1 AND month = $2
                  AND payment_type IN ('RENT', 'RENT_SKIPPED')
                LIMIT 1
                "#,
            )
            .bind(agreement_id)
            .bind(month)
            .fetch_optional(&mut *conn)
            .await?;
            if settled.is_some() {
                return Err(DomainError::state(format!("month {} is already settled", month)));
            }

            if let (Some(cap), PaymentType::RentSkipped) = (skip_cap, key.payment_type) {
                let skipped: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM payments WHERE rental_agreement_id = $1 AND payment_type = 'RENT_SKIPPED'",
                )
                .bind(agreement_id)
                .fetch_one(&mut *conn)
                .await?;
                if skipped >= cap {
                    return Err(DomainError::Capacity(format!(
                        "grace period of {} months exhausted",
                        cap
                    )));
                }
            }
        }
        (_, None) => {
            return Err(DomainError::validation("month-guarded payment without a month"));
        }
    }

    let row = Payment::from_new(payment, Utc::now());
    let recorded = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (
            id, rental_agreement_id, loan_agreement_id, payer_id, recipient_id,
            amount, tx_reference, payment_type, month, payment_date
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(row.id)
    .bind(row.rental_agreement_id)
    .bind(row.loan_agreement_id)
    .bind(row.payer_id)
    .bind(row.recipient_id)
    .bind(row.amount)
    .bind(&row.tx_reference)
    .bind(row.payment_type)
    .bind(row.month)
    .bind(row.payment_date)
    .fetch_one(&mut *conn)
    .await?;

    Ok(recorded)
}

async fn compare_and_set<T>(
    conn: &mut PgConnection,
    table: &str,
    id: Uuid,
    from: &[T],
    to: T,
    extra_assignments: &str,
) -> DomainResult<()>
where
    T: for<'q> sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres> + Send + Copy + std::fmt::Debug + 'static,
{
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!("UPDATE {} SET status = ", table));
    qb.push_bind(to);
    qb.push(", updated_at = NOW()");
    qb.push(extra_assignments);
    qb.push(" WHERE id = ");
    qb.push_bind(id);
    qb.push(" AND status IN (");
    let mut separated = qb.separated(", ");
    for status in from {
        separated.push_bind(*status);
    }
    separated.push_unseparated(")");

    let result = qb.build().execute(&mut *conn).await?;
    if result.rows_affected() == 0 {
        return Err(DomainError::state(format!(
            "{} {} is not in {:?}; cannot move to {:?}",
            table, id, from, to
        )));
    }
    Ok(())
}

async fn apply_transition(conn: &mut PgConnection, transition: &Transition) -> DomainResult<()> {
    match transition {
        Transition::Rental { id, from, to } => {
            compare_and_set(conn, "rental_agreements", *id, from, *to, "").await
        }
        Transition::Loan { id, from, to } => {
            let extra = if *to == LoanStatus::Active {
                ", start_date = COALESCE(start_date, NOW())"
            } else {
                ""
            };
            compare_and_set(conn, "loan_agreements", *id, from, *to, extra).await
        }
        Transition::Request { id, from, to } => {
            compare_and_set(conn, "loan_requests", *id, from, *to, "").await
        }
    }
}

#[async_trait]
impl AgreementStore for PgStore {
    async fn party_id_by_wallet(&self, wallet_address: &str) -> DomainResult<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM parties WHERE wallet_address = $1")
            .bind(wallet_address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn insert_rental_agreement(
        &self,
        agreement: &RentalAgreement,
    ) -> DomainResult<RentalAgreement> {
        let rental = sqlx::query_as::<_, RentalAgreement>(
            r#"
            INSERT INTO rental_agreements (
                id, contract_address, landlord_id, renter_id, name, status, duration,
                security_deposit, base_rent, grace_period, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(agreement.id)
        .bind(&agreement.contract_address)
        .bind(agreement.landlord_id)
        .bind(agreement.renter_id)
        .bind(&agreement.name)
        .bind(agreement.status)
        .bind(agreement.duration)
        .bind(agreement.security_deposit)
        .bind(agreement.base_rent)
        .bind(agreement.grace_period)
        .bind(agreement.created_at)
        .bind(agreement.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(rental)
    }

    async fn rental_agreement(&self, id: Uuid) -> DomainResult<Option<RentalAgreement>> {
        let rental =
            sqlx::query_as::<_, RentalAgreement>("SELECT * FROM rental_agreements WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(rental)
    }

    async fn rental_agreement_by_address(
        &self,
        contract_address: &str,
    ) -> DomainResult<Option<RentalAgreement>> {
        let rental = sqlx::query_as::<_, RentalAgreement>(
            "SELECT * FROM rental_agreements WHERE contract_address = $1",
        )
        .bind(contract_address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rental)
    }

    async fn rental_agreements_with_status(
        &self,
        statuses: &[RentalStatus],
    ) -> DomainResult<Vec<RentalAgreement>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM rental_agreements WHERE status IN (");
        let mut separated = qb.separated(", ");
        for status in statuses {
            separated.push_bind(*status);
        }
        separated.push_unseparated(") ORDER BY created_at");

        let rentals = qb
            .build_query_as::<RentalAgreement>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rentals)
    }

    async fn update_rental_terms(
        &self,
        id: Uuid,
        expected_duration: i32,
        duration: i32,
        grace_period: i32,
    ) -> DomainResult<RentalAgreement> {
        sqlx::query_as::<_, RentalAgreement>(
            r#"
            UPDATE rental_agreements
            SET duration = $1, grace_period = $2, updated_at = NOW()
            WHERE id = $3 AND duration = $4
            RETURNING *
            "#,
        )
        .bind(duration)
        .bind(grace_period)
        .bind(id)
        .bind(expected_duration)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            DomainError::state(format!(
                "rental agreement {} no longer has duration {}",
                id, expected_duration
            ))
        })
    }

    async fn collateral_usage(&self, rental_agreement_id: Uuid) -> DomainResult<CollateralUsage> {
        let mut conn = self.pool.acquire().await?;
        collateral_usage_in(&mut conn, rental_agreement_id).await
    }

    async fn insert_loan_request(&self, request: &LoanRequest) -> DomainResult<LoanRequest> {
        let mut tx = self.pool.begin().await?;

        let status: Option<RentalStatus> = sqlx::query_scalar(
            "SELECT status FROM rental_agreements WHERE id = $1 FOR UPDATE",
        )
        .bind(request.rental_agreement_id)
        .fetch_optional(&mut *tx)
        .await?;
        match status {
            Some(RentalStatus::Active) => {}
            Some(other) => {
                return Err(DomainError::state(format!(
                    "rental agreement {} is {:?}",
                    request.rental_agreement_id, other
                )))
            }
            None => {
                return Err(DomainError::not_found(
                    "Rental agreement",
                    request.rental_agreement_id,
                ))
            }
        }

        let available = collateral_usage_in(&mut tx, request.rental_agreement_id)
            .await?
            .available();
        if request.amount > available {
            return Err(DomainError::Capacity(format!(
                "requested {} exceeds available collateral {}",
                request.amount, available
            )));
        }

        let inserted = sqlx::query_as::<_, LoanRequest>(
            r#"
            INSERT INTO loan_requests (
                id, rental_agreement_id, requester_id, amount, duration, interest_rate,
                status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(request.id)
        .bind(request.rental_agreement_id)
        .bind(request.requester_id)
        .bind(request.amount)
        .bind(request.duration)
        .bind(request.interest_rate)
        .bind(request.status)
        .bind(request.created_at)
        .bind(request.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn loan_request(&self, id: Uuid) -> DomainResult<Option<LoanRequest>> {
        let request = sqlx::query_as::<_, LoanRequest>("SELECT * FROM loan_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(request)
    }

    async fn cancel_loan_request(&self, id: Uuid) -> DomainResult<LoanRequest> {
        let mut tx = self.pool.begin().await?;

        let request = sqlx::query_as::<_, LoanRequest>(
            r#"
            UPDATE loan_requests SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3
            RETURNING *
            "#,
        )
        .bind(RequestStatus::Cancelled)
        .bind(id)
        .bind(RequestStatus::Open)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DomainError::state(format!("loan request {} is not open", id)))?;

        sqlx::query(
            r#"
            UPDATE loan_offers SET status = $1, updated_at = NOW()
            WHERE loan_request_id = $2 AND status = $3
            "#,
        )
        .bind(OfferStatus::Rejected)
        .bind(id)
        .bind(OfferStatus::Pending)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(request)
    }

    async fn insert_loan_offer(&self, offer: &LoanOffer) -> DomainResult<LoanOffer> {
        sqlx::query_as::<_, LoanOffer>(
            r#"
            INSERT INTO loan_offers (
                id, loan_request_id, lender_id, interest_rate, duration, amount,
                grace_months, status, created_at, updated_at
            )
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
            WHERE EXISTS (SELECT 1 FROM loan_requests WHERE id = $2 AND status = $11)
            RETURNING *
            "#,
        )
        .bind(offer.id)
        .bind(offer.loan_request_id)
        .bind(offer.lender_id)
        .bind(offer.interest_rate)
        .bind(offer.duration)
        .bind(offer.amount)
        .bind(offer.grace_months)
        .bind(offer.status)
        .bind(offer.created_at)
        .bind(offer.updated_at)
        .bind(RequestStatus::Open)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            DomainError::state(format!("loan request {} is not open", offer.loan_request_id))
        })
    }

    async fn loan_offer(&self, id: Uuid) -> DomainResult<Option<LoanOffer>> {
        let offer = sqlx::query_as::<_, LoanOffer>("SELECT * FROM loan_offers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(offer)
    }

    async fn loan_offers_for_request(&self, loan_request_id: Uuid) -> DomainResult<Vec<LoanOffer>> {
        let offers = sqlx::query_as::<_, LoanOffer>(
            "SELECT * FROM loan_offers WHERE loan_request_id = $1 ORDER BY created_at",
        )
        .bind(loan_request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(offers)
    }

    async fn update_offer_status(
        &self,
        id: Uuid,
        from: &[OfferStatus],
        to: OfferStatus,
    ) -> DomainResult<LoanOffer> {
        let mut conn = self.pool.acquire().await?;
        compare_and_set(&mut conn, "loan_offers", id, from, to, "").await?;
        let offer = sqlx::query_as::<_, LoanOffer>("SELECT * FROM loan_offers WHERE id = $1")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(offer)
    }

    async fn accept_offer(&self, offer_id: Uuid) -> DomainResult<AcceptedOffer> {
        let mut tx = self.pool.begin().await?;

        let offer = sqlx::query_as::<_, LoanOffer>(
            r#"
            UPDATE loan_offers SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3
            RETURNING *
            "#,
        )
        .bind(OfferStatus::Accepted)
        .bind(offer_id)
        .bind(OfferStatus::Pending)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DomainError::state(format!("loan offer {} is not pending", offer_id)))?;

        let request = sqlx::query_as::<_, LoanRequest>(
            r#"
            UPDATE loan_requests SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3
              AND EXISTS (
                  SELECT 1 FROM rental_agreements r
                  WHERE r.id = loan_requests.rental_agreement_id AND r.status = $4
              )
            RETURNING *
            "#,
        )
        .bind(RequestStatus::Matched)
        .bind(offer.loan_request_id)
        .bind(RequestStatus::Open)
        .bind(RentalStatus::Active)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            DomainError::state(format!(
                "loan request {} is not open or its rental agreement is not active",
                offer.loan_request_id
            ))
        })?;

        let rejected_offer_ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE loan_offers SET status = $1, updated_at = NOW()
            WHERE loan_request_id = $2 AND id <> $3 AND status = $4
            RETURNING id
            "#,
        )
        .bind(OfferStatus::Rejected)
        .bind(offer.loan_request_id)
        .bind(offer_id)
        .bind(OfferStatus::Pending)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(AcceptedOffer {
            offer,
            request,
            rejected_offer_ids,
        })
    }

    async fn insert_loan_agreement(&self, agreement: &LoanAgreement) -> DomainResult<LoanAgreement> {
        let loan = sqlx::query_as::<_, LoanAgreement>(
            r#"
            INSERT INTO loan_agreements (
                id, contract_address, loan_request_id, loan_offer_id, rental_agreement_id,
                borrower_id, lender_id, amount, interest_rate, duration, grace_months,
                status, start_date, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING *
            "#,
        )
        .bind(agreement.id)
        .bind(&agreement.contract_address)
        .bind(agreement.loan_request_id)
        .bind(agreement.loan_offer_id)
        .bind(agreement.rental_agreement_id)
        .bind(agreement.borrower_id)
        .bind(agreement.lender_id)
        .bind(agreement.amount)
        .bind(agreement.interest_rate)
        .bind(agreement.duration)
        .bind(agreement.grace_months)
        .bind(agreement.status)
        .bind(agreement.start_date)
        .bind(agreement.created_at)
        .bind(agreement.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(loan)
    }

    async fn loan_agreement(&self, id: Uuid) -> DomainResult<Option<LoanAgreement>> {
        let loan = sqlx::query_as::<_, LoanAgreement>("SELECT * FROM loan_agreements WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(loan)
    }

    async fn loan_agreement_by_address(
        &self,
        contract_address: &str,
    ) -> DomainResult<Option<LoanAgreement>> {
        let loan = sqlx::query_as::<_, LoanAgreement>(
            "SELECT * FROM loan_agreements WHERE contract_address = $1",
        )
        .bind(contract_address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(loan)
    }

    async fn loan_agreements_with_status(
        &self,
        statuses: &[LoanStatus],
    ) -> DomainResult<Vec<LoanAgreement>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM loan_agreements WHERE status IN (");
        let mut separated = qb.separated(", ");
        for status in statuses {
            separated.push_bind(*status);
        }
        separated.push_unseparated(") ORDER BY created_at");

        let loans = qb
            .build_query_as::<LoanAgreement>()
            .fetch_all(&self.pool)
            .await?;
        Ok(loans)
    }

    async fn open_loans_for_rental(&self, rental_agreement_id: Uuid) -> DomainResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM loan_agreements
            WHERE rental_agreement_id = $1 AND status NOT IN ('COMPLETED', 'DEFAULTED')
            "#,
        )
        .bind(rental_agreement_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn commit(&self, write: AgreementWrite) -> DomainResult<Option<Payment>> {
        let mut tx = self.pool.begin().await?;

        let recorded = match &write.payment {
            Some(payment) => Some(insert_payment(&mut tx, payment, write.guard).await?),
            None => None,
        };
        for transition in &write.transitions {
            apply_transition(&mut tx, transition).await?;
        }

        tx.commit().await?;
        Ok(recorded)
    }

    async fn payments_for(&self, agreement_id: Uuid) -> DomainResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments
            WHERE rental_agreement_id = $1 OR loan_agreement_id = $1
            ORDER BY payment_date, month NULLS FIRST
            "#,
        )
        .bind(agreement_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    async fn tracked_contracts(&self) -> DomainResult<Vec<TrackedContract>> {
        let rows = sqlx::query_as::<_, (String, bool)>(
            r#"
            SELECT contract_address, TRUE FROM rental_agreements
            UNION ALL
            SELECT contract_address, FALSE FROM loan_agreements
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(address, is_rental)| TrackedContract {
                address,
                kind: if is_rental {
                    ContractKind::Rental
                } else {
                    ContractKind::Loan
                },
            })
            .collect())
    }

    async fn ledger_cursor(&self, contract_address: &str) -> DomainResult<Option<String>> {
        let cursor = sqlx::query_scalar::<_, String>(
            "SELECT last_cursor FROM ledger_cursors WHERE contract_address = $1",
        )
        .bind(contract_address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(cursor)
    }

    async fn save_ledger_cursor(&self, contract_address: &str, cursor: &str) -> DomainResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_cursors (contract_address, last_cursor, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (contract_address)
            DO UPDATE SET last_cursor = EXCLUDED.last_cursor, updated_at = NOW()
            "#,
        )
        .bind(contract_address)
        .bind(cursor)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
