//! Order Service: accepts order submissions.
//!
//! Validation, ownership and duplicate rules live here; the ledger only
//! provides the atomic create-if-absent.

use std::sync::Arc;

use tracing::{debug, info};

use loyalty_domain::{Order, OrderNumber, UserId};
use loyalty_store::{Insertion, Store};

use crate::error::{DaemonError, DaemonResult};

/// Successful outcome of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Order created by this call
    Accepted(Order),
    /// The same user submitted this number before; nothing changed
    AlreadySubmitted(Order),
}

impl SubmitOutcome {
    /// The stored order
    pub fn order(&self) -> &Order {
        match self {
            SubmitOutcome::Accepted(order) | SubmitOutcome::AlreadySubmitted(order) => order,
        }
    }
}

/// Accepts and lists orders.
pub struct OrderService<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for OrderService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: Store> OrderService<S> {
    /// Create a new order service.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Submit an order number on behalf of `user`.
    ///
    /// # Errors
    ///
    /// - `InvalidOrderNumber` if the number fails format or checksum rules
    /// - `OrderOwnedByAnotherUser` if another user registered it first
    /// - `Store` on ledger failure
    pub async fn submit(&self, raw: &str, user: &UserId) -> DaemonResult<SubmitOutcome> {
        let number = parse_number(raw)?;
        let order = Order::new(number, user.clone());

        match self.store.orders().insert_if_absent(&order).await? {
            Insertion::Created(order) => {
                info!(order = %order.number, user = %user, "Order accepted");
                Ok(SubmitOutcome::Accepted(order))
            },
            Insertion::Existing(order) if order.is_owned_by(user) => {
                debug!(order = %order.number, user = %user, "Order already submitted");
                Ok(SubmitOutcome::AlreadySubmitted(order))
            },
            Insertion::Existing(order) => {
                debug!(order = %order.number, user = %user, "Order owned by another user");
                Err(DaemonError::OrderOwnedByAnotherUser(order.number))
            },
        }
    }

    /// All orders of `user`, oldest submission first.
    pub async fn list(&self, user: &UserId) -> DaemonResult<Vec<Order>> {
        Ok(self.store.orders().find_by_owner(user).await?)
    }

    /// Look up one order.
    pub async fn get(&self, number: &OrderNumber) -> DaemonResult<Option<Order>> {
        Ok(self.store.orders().find_by_number(number).await?)
    }
}

fn parse_number(raw: &str) -> DaemonResult<OrderNumber> {
    OrderNumber::parse(raw).map_err(|_| DaemonError::InvalidOrderNumber(raw.trim().to_string()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use loyalty_domain::OrderStatus;
    use loyalty_store::{MemoryStore, StoreError};

    fn service() -> (OrderService<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (OrderService::new(store.clone()), store)
    }

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_submit_accepts_new_order() {
        let (service, store) = service();

        let outcome = service.submit("79927398713", &user("alice")).await.unwrap();
        match &outcome {
            SubmitOutcome::Accepted(order) => {
                assert_eq!(order.status, OrderStatus::New);
                assert_eq!(order.owner, user("alice"));
                assert_eq!(order.accrual, None);
            },
            other => panic!("expected Accepted, got {:?}", other),
        }
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn test_submit_same_user_twice_is_idempotent() {
        let (service, store) = service();

        service.submit("79927398713", &user("alice")).await.unwrap();
        let again = service.submit(" 79927398713\n", &user("alice")).await.unwrap();

        assert!(matches!(again, SubmitOutcome::AlreadySubmitted(_)));
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn test_submit_other_user_conflicts() {
        let (service, _store) = service();

        service.submit("12345678903", &user("alice")).await.unwrap();
        let result = service.submit("12345678903", &user("bob")).await;
        assert!(matches!(result, Err(DaemonError::OrderOwnedByAnotherUser(_))));

        let number = OrderNumber::parse("12345678903").unwrap();
        let order = service.get(&number).await.unwrap().unwrap();
        assert_eq!(order.owner, user("alice"));
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_numbers() {
        let (service, store) = service();

        for raw in ["1", "0", "12345678904", "", "12a45", "-18"] {
            let result = service.submit(raw, &user("alice")).await;
            assert!(
                matches!(result, Err(DaemonError::InvalidOrderNumber(_))),
                "{:?} should be rejected",
                raw
            );
        }
        assert_eq!(store.order_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_store_one_order() {
        let (service, store) = service();
        let mut tasks = tokio::task::JoinSet::new();

        for _ in 0..50 {
            let service = service.clone();
            tasks.spawn(async move { service.submit("4561261212345467", &user("alice")).await });
        }

        let mut accepted = 0;
        let mut ok = 0;
        while let Some(result) = tasks.join_next().await {
            let outcome = result.unwrap().unwrap();
            ok += 1;
            if matches!(outcome, SubmitOutcome::Accepted(_)) {
                accepted += 1;
            }
        }

        assert_eq!(ok, 50);
        assert_eq!(accepted, 1);
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn test_list_is_per_user_and_ordered() {
        let (service, _store) = service();

        service.submit("79927398713", &user("alice")).await.unwrap();
        service.submit("12345678903", &user("bob")).await.unwrap();
        service.submit("2377225624", &user("alice")).await.unwrap();

        let orders = service.list(&user("alice")).await.unwrap();
        let numbers: Vec<&str> = orders.iter().map(|o| o.number.as_str()).collect();
        assert_eq!(numbers, vec!["79927398713", "2377225624"]);

        assert!(service.list(&user("carol")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let (service, store) = service();
        store.fail_next_write();

        let result = service.submit("79927398713", &user("alice")).await;
        assert!(matches!(result, Err(DaemonError::Store(StoreError::Timeout { .. }))));
    }
}
