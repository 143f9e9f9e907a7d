//! Loan agreement state machine and repayment sequencing

mod common;

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal::Decimal;
    use std::time::Duration;

    use rentvault_server::error::DomainError;
    use rentvault_server::ledger::event::{LOAN_DISBURSED, LOAN_FUNDED, REPAID};
    use rentvault_server::ledger::{LedgerAction, LedgerEvent};
    use rentvault_server::loan::LoanStatus;
    use rentvault_server::matching::RequestStatus;
    use rentvault_server::payment::PaymentType;
    use rentvault_server::schedule::InstallmentStatus;

    use crate::common::{event, installment, Harness, LENDER, RENTER};

    #[tokio::test]
    async fn test_full_lifecycle_to_completion() {
        let h = Harness::new().await;
        let loan = h.registered_loan("CRENT1", "CLOAN1").await;
        let loans = &h.state.loan_service;
        assert_eq!(loan.status, LoanStatus::Initialized);

        // Only the lender funds, only the borrower disburses
        let err = loans.fund(loan.id, h.renter, None).await.unwrap_err();
        assert!(matches!(err, DomainError::Authorization(_)));
        let err = loans.disburse(loan.id, h.renter, None).await.unwrap_err();
        assert!(matches!(err, DomainError::State(_)));

        let funded = loans.fund(loan.id, h.lender, None).await.unwrap();
        assert_eq!(funded.status, LoanStatus::Ready);

        let active = loans.disburse(loan.id, h.renter, None).await.unwrap();
        assert_eq!(active.status, LoanStatus::Active);
        assert!(active.start_date.is_some());

        let request = h
            .state
            .matching_service
            .loan_request(loan.loan_request_id)
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Fulfilled);

        for month in 1..=11 {
            loans
                .repay(loan.id, h.renter, month, installment(), None)
                .await
                .unwrap();
            let current = loans.agreement(loan.id).await.unwrap();
            assert_eq!(current.status, LoanStatus::Paid);
        }
        loans
            .repay(loan.id, h.renter, 12, installment(), None)
            .await
            .unwrap();

        let completed = loans.agreement(loan.id).await.unwrap();
        assert_eq!(completed.status, LoanStatus::Completed);

        let request = h
            .state
            .matching_service
            .loan_request(loan.loan_request_id)
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Closed);

        // Completed loans release their collateral
        let collateral = h
            .state
            .rental_service
            .available_collateral(loan.rental_agreement_id)
            .await
            .unwrap();
        assert_eq!(collateral.available, Decimal::from(3000));

        let schedule = loans.repayment_schedule(loan.id).await.unwrap();
        assert_eq!(schedule.progress, 100);
        assert_eq!(schedule.remaining_balance, Decimal::ZERO);
        assert!(schedule
            .entries
            .iter()
            .all(|e| e.status == InstallmentStatus::Paid));

        let submitted: Vec<LedgerAction> = h
            .client
            .submitted()
            .await
            .into_iter()
            .map(|tx| tx.action)
            .collect();
        assert!(submitted.contains(&LedgerAction::Fund));
        assert!(submitted.contains(&LedgerAction::Disburse));
        assert!(submitted.contains(&LedgerAction::Repay { month: 12 }));
    }

    #[tokio::test]
    async fn test_repayments_are_strictly_sequential() {
        let h = Harness::new().await;
        let loan = h.active_loan("CRENT1", "CLOAN1").await;
        let loans = &h.state.loan_service;

        let err = loans
            .repay(loan.id, h.renter, 2, installment(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::State(_)));

        loans
            .repay(loan.id, h.renter, 1, installment(), None)
            .await
            .unwrap();

        let err = loans
            .repay(loan.id, h.renter, 3, installment(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::State(_)));

        // A recorded month is behind the sequence, not a replay
        let err = loans
            .repay(loan.id, h.renter, 1, installment(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::State(_)));

        let err = loans
            .repay(loan.id, h.renter, 13, installment(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        // The write path enforces the sequence on its own
        let current = loans.agreement(loan.id).await.unwrap();
        let err = loans
            .apply_repayment(&current, 4, installment(), "tx_out_of_order".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::State(_)));

        let err = loans
            .apply_repayment(&current, 1, installment(), "tx_replay".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let history = h.state.status_service.payment_history(loan.id).await.unwrap();
        let repayments = history
            .payments
            .iter()
            .filter(|p| p.payment_type == PaymentType::LoanRepayment)
            .count();
        assert_eq!(repayments, 1);
        assert_eq!(history.next_due_month, 2);
    }

    #[tokio::test]
    async fn test_repayment_amount_tolerance() {
        let h = Harness::new().await;
        let loan = h.active_loan("CRENT1", "CLOAN1").await;
        let loans = &h.state.loan_service;

        let err = loans
            .repay(loan.id, h.renter, 1, Decimal::new(10998, 2), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        loans
            .repay(loan.id, h.renter, 1, Decimal::new(11001, 2), None)
            .await
            .unwrap();

        let err = loans
            .repay(loan.id, h.lender, 2, installment(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_terminal_loans_refuse_every_operation() {
        let h = Harness::new().await;
        let loan = h.active_loan("CRENT1", "CLOAN1").await;
        let loans = &h.state.loan_service;

        let later = Utc::now() + ChronoDuration::days(62);
        let defaulted = loans.detect_defaults(later).await.unwrap();
        assert_eq!(defaulted, vec![loan.id]);

        let current = loans.agreement(loan.id).await.unwrap();
        assert_eq!(current.status, LoanStatus::Defaulted);

        assert!(matches!(
            loans.repay(loan.id, h.renter, 1, installment(), None).await,
            Err(DomainError::State(_))
        ));
        assert!(matches!(
            loans.fund(loan.id, h.lender, None).await,
            Err(DomainError::State(_))
        ));
        assert!(matches!(
            loans.disburse(loan.id, h.renter, None).await,
            Err(DomainError::State(_))
        ));
        assert!(matches!(
            loans.mark_default(loan.id, h.lender, None, later).await,
            Err(DomainError::State(_))
        ));

        // Forfeited principal stays out of the available collateral
        let collateral = h
            .state
            .rental_service
            .available_collateral(loan.rental_agreement_id)
            .await
            .unwrap();
        assert_eq!(collateral.available, Decimal::from(1800));

        // Detection is idempotent
        assert!(loans.detect_defaults(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_default_requires_lender_and_past_due() {
        let h = Harness::new().await;
        let loan = h.active_loan("CRENT1", "CLOAN1").await;
        let loans = &h.state.loan_service;

        let now = Utc::now();
        let err = loans.mark_default(loan.id, h.lender, None, now).await.unwrap_err();
        assert!(matches!(err, DomainError::State(_)));

        let later = now + ChronoDuration::days(62);
        let err = loans
            .mark_default(loan.id, h.renter, None, later)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Authorization(_)));

        let defaulted = loans.mark_default(loan.id, h.lender, None, later).await.unwrap();
        assert_eq!(defaulted.status, LoanStatus::Defaulted);
        assert!(h
            .client
            .submitted()
            .await
            .iter()
            .any(|tx| tx.action == LedgerAction::Default));
    }

    #[tokio::test]
    async fn test_rental_cannot_close_under_open_loan() {
        let h = Harness::new().await;
        let loan = h.active_loan("CRENT1", "CLOAN1").await;

        let err = h
            .state
            .rental_service
            .close(loan.rental_agreement_id, h.landlord, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::State(_)));
    }

    #[tokio::test]
    async fn test_ledger_timeout_leaves_state_untouched() {
        let h = Harness::with_ledger_timeout(Duration::from_millis(50)).await;
        let loan = h.active_loan("CRENT1", "CLOAN1").await;

        h.client.set_latency(Some(Duration::from_millis(300))).await;
        let err = h
            .state
            .loan_service
            .repay(loan.id, h.renter, 1, installment(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::ExternalLedger {
                retryable: true,
                ..
            }
        ));

        let current = h.state.loan_service.agreement(loan.id).await.unwrap();
        assert_eq!(current.status, LoanStatus::Active);
        let history = h.state.status_service.payment_history(loan.id).await.unwrap();
        assert_eq!(history.next_due_month, 1);

        // Retry succeeds once the ledger responds again
        h.client.set_latency(None).await;
        h.state
            .loan_service
            .repay(loan.id, h.renter, 1, installment(), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_repayment_recorded_by_its_event_first_succeeds() {
        let h = Harness::new().await;
        let loan = h.active_loan("CRENT1", "CLOAN1").await;

        h.eager
            .apply_on_next_submit(LedgerEvent {
                party_wallets: vec![RENTER.to_string()],
                amounts: vec![installment()],
                month: Some(1),
                ..event("CLOAN1", REPAID, "")
            })
            .await;

        let payment = h
            .state
            .loan_service
            .repay(loan.id, h.renter, 1, installment(), None)
            .await
            .unwrap();
        assert_eq!(payment.month, Some(1));

        let history = h.state.status_service.payment_history(loan.id).await.unwrap();
        let repayments = history
            .payments
            .iter()
            .filter(|p| p.payment_type == PaymentType::LoanRepayment)
            .count();
        assert_eq!(repayments, 1);
        assert_eq!(history.next_due_month, 2);
    }

    #[tokio::test]
    async fn test_funding_and_disbursement_overtaken_by_events_succeed() {
        let h = Harness::new().await;
        let loan = h.registered_loan("CRENT1", "CLOAN1").await;
        let loans = &h.state.loan_service;

        h.eager
            .apply_on_next_submit(LedgerEvent {
                party_wallets: vec![LENDER.to_string()],
                amounts: vec![Decimal::from(1200)],
                ..event("CLOAN1", LOAN_FUNDED, "")
            })
            .await;
        let funded = loans.fund(loan.id, h.lender, None).await.unwrap();
        assert_eq!(funded.status, LoanStatus::Ready);

        h.eager
            .apply_on_next_submit(LedgerEvent {
                party_wallets: vec![RENTER.to_string()],
                ..event("CLOAN1", LOAN_DISBURSED, "")
            })
            .await;
        let active = loans.disburse(loan.id, h.renter, None).await.unwrap();
        assert_eq!(active.status, LoanStatus::Active);
        assert!(active.start_date.is_some());
    }
}
