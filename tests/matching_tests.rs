//! Loan request / offer negotiation against the in-memory store

mod common;

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use rentvault_server::error::DomainError;
    use rentvault_server::matching::{CreateLoanRequestBody, OfferStatus, RequestStatus};

    use crate::common::Harness;

    #[tokio::test]
    async fn test_accepting_one_offer_rejects_its_siblings() {
        let h = Harness::new().await;
        let rental = h.active_rental("CRENT1").await;
        let request = h.loan_request(&rental, 1200).await;

        let first = h.offer(&request, h.lender, 0).await;
        let second = h.offer(&request, h.other_lender, 1).await;

        let matching = &h.state.matching_service;
        let accepted = matching.accept_offer(second.id, h.renter).await.unwrap();

        assert_eq!(accepted.offer.status, OfferStatus::Accepted);
        assert_eq!(accepted.request.status, RequestStatus::Matched);
        assert_eq!(accepted.rejected_offer_ids, vec![first.id]);

        let offers = matching.list_offers(request.id).await.unwrap();
        let accepted_count = offers
            .iter()
            .filter(|o| o.status == OfferStatus::Accepted)
            .count();
        assert_eq!(accepted_count, 1);
        assert!(offers
            .iter()
            .any(|o| o.id == first.id && o.status == OfferStatus::Rejected));

        // A rejected offer can no longer be accepted
        let err = matching.accept_offer(first.id, h.renter).await.unwrap_err();
        assert!(matches!(err, DomainError::State(_)));
    }

    #[tokio::test]
    async fn test_concurrent_accepts_match_exactly_one_offer() {
        let h = Harness::new().await;
        let rental = h.active_rental("CRENT1").await;
        let request = h.loan_request(&rental, 1200).await;
        let first = h.offer(&request, h.lender, 0).await;
        let second = h.offer(&request, h.other_lender, 0).await;

        let matching = h.state.matching_service.clone();
        let other = h.state.matching_service.clone();
        let renter = h.renter;
        let (a, b) = tokio::join!(
            async move { matching.accept_offer(first.id, renter).await },
            async move { other.accept_offer(second.id, renter).await },
        );
        assert!(a.is_ok() ^ b.is_ok(), "exactly one accept must win");

        let offers = h.state.matching_service.list_offers(request.id).await.unwrap();
        assert_eq!(
            offers.iter().filter(|o| o.status == OfferStatus::Accepted).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_only_requester_accepts_and_lender_cannot_self_fund() {
        let h = Harness::new().await;
        let rental = h.active_rental("CRENT1").await;
        let request = h.loan_request(&rental, 1200).await;
        let offer = h.offer(&request, h.lender, 0).await;

        let matching = &h.state.matching_service;
        let err = matching.accept_offer(offer.id, h.lender).await.unwrap_err();
        assert!(matches!(err, DomainError::Authorization(_)));

        let err = matching
            .create_loan_offer(
                h.renter,
                request.id,
                rentvault_server::matching::CreateLoanOfferBody {
                    interest_rate: Decimal::from(10),
                    duration: 12,
                    amount: Decimal::from(1200),
                    grace_months: 0,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_request_cannot_exceed_available_collateral() {
        let h = Harness::new().await;
        let rental = h.active_rental("CRENT1").await;

        let body = |amount: i64| CreateLoanRequestBody {
            rental_agreement_id: rental.id,
            amount: Decimal::from(amount),
            duration: 12,
            interest_rate: Decimal::from(10),
        };
        let matching = &h.state.matching_service;

        let err = matching
            .create_loan_request(h.renter, body(3001))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Capacity(_)));

        // Open requests hold collateral until closed or cancelled
        let held = matching.create_loan_request(h.renter, body(2000)).await.unwrap();
        let err = matching
            .create_loan_request(h.renter, body(1500))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Capacity(_)));

        matching.cancel_loan_request(held.id, h.renter).await.unwrap();
        matching.create_loan_request(h.renter, body(1500)).await.unwrap();

        let collateral = h
            .state
            .rental_service
            .available_collateral(rental.id)
            .await
            .unwrap();
        assert_eq!(collateral.available, Decimal::from(1500));
    }

    #[tokio::test]
    async fn test_skipped_rent_reduces_collateral() {
        let h = Harness::new().await;
        let rental = h.active_rental("CRENT1").await;
        h.state
            .rental_service
            .skip_rent(rental.id, h.renter, 1, None)
            .await
            .unwrap();

        let collateral = h
            .state
            .rental_service
            .available_collateral(rental.id)
            .await
            .unwrap();
        assert_eq!(collateral.available, Decimal::from(2500));
    }

    #[tokio::test]
    async fn test_loan_request_requires_active_rental() {
        let h = Harness::new().await;
        let rental = h.rental("CRENT1").await;

        let err = h
            .state
            .matching_service
            .create_loan_request(
                h.renter,
                CreateLoanRequestBody {
                    rental_agreement_id: rental.id,
                    amount: Decimal::from(100),
                    duration: 6,
                    interest_rate: Decimal::from(5),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_cancel_rejects_pending_offers() {
        let h = Harness::new().await;
        let rental = h.active_rental("CRENT1").await;
        let request = h.loan_request(&rental, 1000).await;
        let offer = h.offer(&request, h.lender, 0).await;

        let matching = &h.state.matching_service;
        let cancelled = matching.cancel_loan_request(request.id, h.renter).await.unwrap();
        assert_eq!(cancelled.status, RequestStatus::Cancelled);

        let offer = matching.loan_offer(offer.id).await.unwrap();
        assert_eq!(offer.status, OfferStatus::Rejected);

        // Offers on a closed request are refused
        let err = matching
            .create_loan_offer(
                h.other_lender,
                request.id,
                rentvault_server::matching::CreateLoanOfferBody {
                    interest_rate: Decimal::from(10),
                    duration: 12,
                    amount: Decimal::from(1000),
                    grace_months: 0,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::State(_)));
    }

    #[tokio::test]
    async fn test_withdrawn_offer_cannot_be_accepted() {
        let h = Harness::new().await;
        let rental = h.active_rental("CRENT1").await;
        let request = h.loan_request(&rental, 1000).await;
        let offer = h.offer(&request, h.lender, 0).await;

        let matching = &h.state.matching_service;
        let err = matching.withdraw_offer(offer.id, h.renter).await.unwrap_err();
        assert!(matches!(err, DomainError::Authorization(_)));

        let withdrawn = matching.withdraw_offer(offer.id, h.lender).await.unwrap();
        assert_eq!(withdrawn.status, OfferStatus::Withdrawn);

        let err = matching.accept_offer(offer.id, h.renter).await.unwrap_err();
        assert!(matches!(err, DomainError::State(_)));
    }
}
