//! End-to-end scenarios for the order workflow.

use eventum_core::config::{ErrorPolicy, ProcessingMode};
use eventum_core::error::DispatchError;
use eventum_runtime::config::ProcessorConfig;
use order_workflow::{
    Order, OrderCommand, OrderEvent, OrderStatus, OrderSystem, PAYMENT_TIMEOUT_REASON,
    PaymentTimeoutSaga,
};
use std::future::Future;
use std::time::Duration;

fn tracking_config() -> ProcessorConfig {
    ProcessorConfig::default().with_poll_interval(Duration::from_millis(5))
}

fn subscribing_config() -> ProcessorConfig {
    ProcessorConfig::default()
        .with_mode(ProcessingMode::Subscribing)
        .with_error_policy(ErrorPolicy::Swallow)
}

async fn start_tracking() -> OrderSystem {
    match OrderSystem::start(PaymentTimeoutSaga::default(), tracking_config()).await {
        Ok(system) => system,
        Err(error) => unreachable!("wiring a fresh system cannot fail: {error}"),
    }
}

/// Poll `probe` until it reports true or the attempts run out.
async fn eventually<F, Fut>(mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if probe().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

fn create(order_id: &str) -> OrderCommand {
    OrderCommand::CreateOrder {
        order_id: order_id.to_string(),
        product: "widget".to_string(),
    }
}

fn confirm(order_id: &str) -> OrderCommand {
    OrderCommand::ConfirmOrder {
        order_id: order_id.to_string(),
    }
}

#[tokio::test]
async fn create_then_confirm_assigns_sequences_and_rejects_a_second_confirm() {
    let system = start_tracking().await;

    let created = system
        .commands
        .send_command(&create("o1"))
        .await
        .unwrap_or_default();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].sequence, 0);
    assert_eq!(created[0].event_type, "OrderCreated.v1");

    let confirmed = system
        .commands
        .send_command(&confirm("o1"))
        .await
        .unwrap_or_default();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].sequence, 1);
    assert_eq!(confirmed[0].event_type, "OrderConfirmed.v1");

    let before = system.event_store.committed_count().await;
    let second = system.commands.send_command(&confirm("o1")).await;
    match second {
        Err(DispatchError::Validation(reason)) => assert!(reason.contains("already confirmed")),
        other => unreachable!("expected a validation failure, got {other:?}"),
    }
    assert_eq!(system.event_store.committed_count().await, before);

    system.shutdown().await;
}

#[tokio::test]
async fn confirming_an_unknown_order_is_not_found() {
    let system = start_tracking().await;
    let result = system.commands.send_command(&confirm("missing")).await;
    assert!(matches!(result, Err(DispatchError::NotFound(_))));
    system.shutdown().await;
}

#[tokio::test]
async fn confirmation_cancels_the_payment_deadline_and_ends_the_saga() {
    let system = start_tracking().await;

    system
        .commands
        .send_command(&create("o2"))
        .await
        .unwrap_or_default();
    assert!(
        eventually(|| async {
            system.sagas_watching("o2").await.len() == 1
                && system.scheduler.pending_count().await == 1
        })
        .await
    );

    system
        .commands
        .send_command(&confirm("o2"))
        .await
        .unwrap_or_default();
    assert!(
        eventually(|| async {
            system.sagas_watching("o2").await.is_empty()
                && system.scheduler.pending_count().await == 0
        })
        .await
    );
    assert_eq!(system.saga_store.record_count().await, 0);

    // The order itself stays confirmed; nothing fires later.
    let order = system.order("o2").await.unwrap_or_default();
    assert_eq!(order.map(|o| o.status), Some(OrderStatus::Confirmed));

    system.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unpaid_orders_are_cancelled_when_the_deadline_elapses() {
    // Default saga: a real 30-minute payment window, run on paused time.
    let config = tracking_config().with_poll_interval(Duration::from_secs(1));
    let system = match OrderSystem::start(PaymentTimeoutSaga::default(), config).await {
        Ok(system) => system,
        Err(error) => unreachable!("wiring a fresh system cannot fail: {error}"),
    };

    system
        .commands
        .send_command(&create("o3"))
        .await
        .unwrap_or_default();
    assert!(eventually(|| async { system.scheduler.pending_count().await == 1 }).await);

    // Jump past the payment window; the deadline timer fires on the way.
    tokio::time::sleep(Duration::from_secs(31 * 60)).await;

    assert!(
        eventually(|| async {
            system
                .order("o3")
                .await
                .unwrap_or_default()
                .is_some_and(|order| {
                    order.status
                        == OrderStatus::Cancelled {
                            reason: PAYMENT_TIMEOUT_REASON.to_string(),
                        }
                })
        })
        .await
    );
    assert!(eventually(|| async { system.sagas_watching("o3").await.is_empty() }).await);
    assert_eq!(system.saga_store.record_count().await, 0);

    system.shutdown().await;
}

#[tokio::test]
async fn sagas_are_isolated_per_order() {
    let system = start_tracking().await;

    system
        .commands
        .send_command(&create("o4"))
        .await
        .unwrap_or_default();
    system
        .commands
        .send_command(&create("o5"))
        .await
        .unwrap_or_default();
    assert!(
        eventually(|| async {
            system.sagas_watching("o4").await.len() == 1
                && system.sagas_watching("o5").await.len() == 1
        })
        .await
    );

    system
        .commands
        .send_command(&confirm("o4"))
        .await
        .unwrap_or_default();
    assert!(eventually(|| async { system.sagas_watching("o4").await.is_empty() }).await);

    // o5's saga and deadline are untouched by o4's confirmation.
    assert_eq!(system.sagas_watching("o5").await.len(), 1);
    assert_eq!(system.scheduler.pending_count().await, 1);

    system.shutdown().await;
}

#[tokio::test]
async fn subscribing_mode_applies_saga_effects_before_send_returns() {
    let system = match OrderSystem::start(PaymentTimeoutSaga::default(), subscribing_config()).await
    {
        Ok(system) => system,
        Err(error) => unreachable!("wiring a fresh system cannot fail: {error}"),
    };

    system
        .commands
        .send_command(&create("o6"))
        .await
        .unwrap_or_default();
    // Subscribing-mode handlers ran inside the send: the deadline already
    // exists and the instance is already indexed.
    assert_eq!(system.scheduler.pending_count().await, 1);
    assert_eq!(system.sagas_watching("o6").await.len(), 1);

    system
        .commands
        .send_command(&confirm("o6"))
        .await
        .unwrap_or_default();
    assert_eq!(system.scheduler.pending_count().await, 0);
    assert!(system.sagas_watching("o6").await.is_empty());

    system.shutdown().await;
}

mod replay_determinism {
    use super::*;
    use eventum_core::aggregate::Aggregate;
    use eventum_core::event::RecordedEvent;
    use eventum_core::event_store::EventStore;
    use proptest::prelude::*;

    /// One step of a randomly generated command script.
    #[derive(Clone, Debug)]
    enum Step {
        Confirm,
        Cancel,
        CreateAgain,
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        prop_oneof![
            Just(Step::Confirm),
            Just(Step::Cancel),
            Just(Step::CreateAgain),
        ]
    }

    fn decode(records: &[RecordedEvent]) -> Vec<OrderEvent> {
        records
            .iter()
            .filter_map(|record| record.payload::<OrderEvent>().ok())
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        // Replaying the committed stream reproduces exactly the state the
        // last decision was made against, for any command script.
        #[test]
        fn replaying_the_stream_reproduces_decision_state(
            steps in proptest::collection::vec(step_strategy(), 0..12)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build();
            let Ok(runtime) = runtime else {
                return Err(TestCaseError::fail("tokio runtime"));
            };
            runtime.block_on(async move {
                let system = start_tracking().await;
                let mut accepted: Vec<OrderEvent> = Vec::new();

                let created = system
                    .commands
                    .send_command(&create("p-1"))
                    .await
                    .unwrap_or_default();
                accepted.extend(decode(&created));

                for step in steps {
                    let command = match step {
                        Step::Confirm => confirm("p-1"),
                        Step::Cancel => OrderCommand::CancelOrder {
                            order_id: "p-1".to_string(),
                            reason: "script".to_string(),
                        },
                        Step::CreateAgain => create("p-1"),
                    };
                    if let Ok(events) = system.commands.send_command(&command).await {
                        accepted.extend(decode(&events));
                    }
                }

                let stream = system
                    .event_store
                    .read_stream(eventum_core::stream::AggregateId::new("p-1"))
                    .await
                    .unwrap_or_default();
                let committed = decode(&stream);
                prop_assert_eq!(&committed, &accepted);
                prop_assert_eq!(Order::replay(&committed), Order::replay(&accepted));

                system.shutdown().await;
                Ok(())
            })?;
        }
    }
}
