use eventshop_messaging_core::retry::{self, EXPONENTIAL_MAX_DELAY};
use eventshop_messaging_core::{
    run_with_retry, ErrorKind, MessagingError, RetryPolicyBuilder, RetryReporter, RetryStage,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, PartialEq)]
enum Event {
    Scheduled(u32, Duration),
    NotRetried(ErrorKind),
    Exhausted(u32),
}

#[derive(Default)]
struct RecordingReporter(Mutex<Vec<Event>>);

impl RecordingReporter {
    fn events(&self) -> Vec<Event> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl RetryReporter for RecordingReporter {
    fn retry_scheduled(&self, _endpoint: &str, retry: u32, delay: Duration, _error: &MessagingError) {
        self.0.lock().unwrap().push(Event::Scheduled(retry, delay));
    }

    fn not_retried(&self, _endpoint: &str, error: &MessagingError) {
        self.0.lock().unwrap().push(Event::NotRetried(error.kind()));
    }

    fn retries_exhausted(&self, _endpoint: &str, retries: u32, _error: &MessagingError) {
        self.0.lock().unwrap().push(Event::Exhausted(retries));
    }
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[test]
fn default_policy_has_interval_then_exponential_stage() {
    let descriptor = retry::build(3, secs(3), []);

    assert_eq!(
        descriptor.stages(),
        &[
            RetryStage::Interval {
                attempts: 3,
                delay: secs(3),
            },
            RetryStage::Exponential {
                attempts: 3,
                min_delay: secs(5),
                max_delay: EXPONENTIAL_MAX_DELAY,
                increment: secs(10),
            },
        ]
    );
    assert_eq!(EXPONENTIAL_MAX_DELAY, secs(3600));
    assert_eq!(descriptor.total_attempts(), 6);
    assert_eq!(
        descriptor.delays().collect::<Vec<_>>(),
        vec![secs(3), secs(3), secs(3), secs(5), secs(15), secs(35)]
    );
}

#[test]
fn zero_limit_skips_interval_stage_only() {
    let descriptor = retry::build(0, secs(3), []);

    assert_eq!(descriptor.stages().len(), 1);
    assert!(matches!(
        descriptor.stages()[0],
        RetryStage::Exponential { attempts: 3, .. }
    ));
}

#[test]
fn consumer_cancellation_is_always_exempt() {
    let descriptor = retry::build(3, secs(3), []);

    assert!(descriptor.exempt().contains(&ErrorKind::CONSUMER_CANCELED));
    assert!(!descriptor.should_retry(&ErrorKind::CONSUMER_CANCELED));
    assert!(descriptor.should_retry(&ErrorKind::HANDLER));
}

#[test]
fn explicit_exemptions_and_handled_kinds() {
    let poison = ErrorKind::from_static("poison_message");
    let timeout = ErrorKind::new("timeout");

    let exempting = retry::build(3, secs(3), [poison.clone()]);
    assert!(!exempting.should_retry(&poison));
    assert!(exempting.should_retry(&timeout));

    let handling = RetryPolicyBuilder::default().handle(timeout.clone()).build();
    assert!(handling.should_retry(&timeout));
    assert!(!handling.should_retry(&poison));
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_until_success() {
    let reporter = RecordingReporter::default();
    let descriptor = retry::build(3, secs(3), []);
    let calls = &AtomicU32::new(0);

    let result = run_with_retry(&descriptor, &reporter, "dev.q.v1", move || async move {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(MessagingError::handler(ErrorKind::HANDLER, "flaky"))
        } else {
            Ok(())
        }
    })
    .await;

    assert!(result.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        reporter.events(),
        vec![Event::Scheduled(1, secs(3)), Event::Scheduled(2, secs(3))]
    );
}

#[tokio::test(start_paused = true)]
async fn exhaustion_is_reported_before_failure_surfaces() {
    let reporter = RecordingReporter::default();
    let descriptor = retry::build(3, secs(3), []);
    let calls = &AtomicU32::new(0);
    let started = tokio::time::Instant::now();

    let result = run_with_retry(&descriptor, &reporter, "dev.q.v1", move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(MessagingError::handler(ErrorKind::HANDLER, "always"))
    })
    .await;

    assert!(matches!(result, Err(MessagingError::Handler { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 7);
    assert!(started.elapsed() >= secs(3 * 3 + 5 + 15 + 35));

    let events = reporter.events();
    assert_eq!(events.len(), 7);
    assert_eq!(events[5], Event::Scheduled(6, secs(35)));
    assert_eq!(events[6], Event::Exhausted(6));
}

#[tokio::test(start_paused = true)]
async fn cancellation_propagates_without_consuming_a_retry() {
    let reporter = RecordingReporter::default();
    let descriptor = retry::build(3, secs(3), []);
    let calls = &AtomicU32::new(0);

    let result = run_with_retry(&descriptor, &reporter, "dev.q.v1", move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(MessagingError::ConsumerCanceled("shutdown".into()))
    })
    .await;

    assert!(matches!(result, Err(MessagingError::ConsumerCanceled(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        reporter.events(),
        vec![Event::NotRetried(ErrorKind::CONSUMER_CANCELED)]
    );
}
