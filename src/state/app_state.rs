//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::db::AgreementStore;
use crate::ledger::Ledger;
use crate::loan::LoanService;
use crate::matching::MatchingService;
use crate::reconciler::EventReconciler;
use crate::rental::RentalService;
use crate::status::StatusService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub rental_service: Arc<RentalService>,
    pub loan_service: Arc<LoanService>,
    pub matching_service: Arc<MatchingService>,
    pub status_service: Arc<StatusService>,
    pub reconciler: Arc<EventReconciler>,
}

impl AppState {
    pub fn new(
        rental_service: Arc<RentalService>,
        loan_service: Arc<LoanService>,
        matching_service: Arc<MatchingService>,
        status_service: Arc<StatusService>,
        reconciler: Arc<EventReconciler>,
    ) -> Self {
        Self {
            rental_service,
            loan_service,
            matching_service,
            status_service,
            reconciler,
        }
    }

    /// Wire every service over one store and one ledger
    pub fn assemble(
        store: Arc<dyn AgreementStore>,
        ledger: Ledger,
        factory_address: Option<String>,
    ) -> Self {
        let rentals = RentalService::new(store.clone(), ledger.clone());
        let loans = LoanService::new(store.clone(), ledger.clone());
        let reconciler = EventReconciler::new(
            store.clone(),
            ledger,
            rentals.clone(),
            loans.clone(),
            factory_address,
        );

        Self::new(
            Arc::new(rentals),
            Arc::new(loans),
            Arc::new(MatchingService::new(store.clone())),
            Arc::new(StatusService::new(store)),
            Arc::new(reconciler),
        )
    }
}

impl FromRef<AppState> for Arc<RentalService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.rental_service.clone()
    }
}

impl FromRef<AppState> for Arc<LoanService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.loan_service.clone()
    }
}

impl FromRef<AppState> for Arc<MatchingService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.matching_service.clone()
    }
}

impl FromRef<AppState> for Arc<StatusService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.status_service.clone()
    }
}

impl FromRef<AppState> for Arc<EventReconciler> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.reconciler.clone()
    }
}
