//! Notifier contract — fire-and-forget, one attempt per notifier, errors
//! isolated so one notifier's failure never blocks another's.

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &str);
}

#[derive(Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: &str) {}
}

/// Composes many notifiers; each runs regardless of whether an earlier one
/// panicked or otherwise failed to deliver.
pub struct MultiNotifier {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }
}

impl Notifier for MultiNotifier {
    fn notify(&self, event: &str) {
        for notifier in &self.notifiers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| notifier.notify(event)));
            if result.is_err() {
                tracing::warn!(%event, "notifier panicked, continuing with remaining notifiers");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingNotifier(Arc<AtomicUsize>);

    impl Notifier for CountingNotifier {
        fn notify(&self, _event: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingNotifier;

    impl Notifier for PanickingNotifier {
        fn notify(&self, _event: &str) {
            panic!("boom");
        }
    }

    #[test]
    fn noop_does_nothing() {
        NoopNotifier.notify("session.revoked");
    }

    #[test]
    fn multi_notifier_runs_all_notifiers() {
        let count = Arc::new(AtomicUsize::new(0));
        let multi = MultiNotifier::new(vec![
            Box::new(CountingNotifier(count.clone())),
            Box::new(CountingNotifier(count.clone())),
        ]);
        multi.notify("event");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn one_notifier_failing_does_not_block_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let multi = MultiNotifier::new(vec![Box::new(PanickingNotifier), Box::new(CountingNotifier(count.clone()))]);
        multi.notify("event");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
