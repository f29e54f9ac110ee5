//! Restart-on-panic wrapper for long-lived background loops.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics::SUPERVISOR_RESTARTS_TOTAL;

/// Run the future produced by `task` until `cancel` fires, relaunching it
/// after `restart_delay` whenever it panics or returns early.
pub async fn supervise<F, Fut>(
    name: &'static str,
    restart_delay: Duration,
    cancel: CancellationToken,
    mut task: F,
) where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    loop {
        let outcome = AssertUnwindSafe(task()).catch_unwind().await;
        if cancel.is_cancelled() {
            break;
        }

        match outcome {
            Ok(()) => warn!(task = name, "background loop exited early, restarting"),
            Err(payload) => {
                error!(task = name, panic = %panic_message(&payload), "background loop panicked, restarting");
            }
        }
        counter!(SUPERVISOR_RESTARTS_TOTAL, "task" => name).increment(1);

        tokio::select! {
            () = tokio::time::sleep(restart_delay) => {}
            () = cancel.cancelled() => break,
        }
    }
    info!(task = name, "background loop stopped");
}

/// Extract a readable message from a panic payload.
fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn relaunches_after_panic() {
        let runs = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let counter = Arc::clone(&runs);
        let token = cancel.clone();
        let handle = tokio::spawn(supervise(
            "test",
            Duration::from_secs(1),
            cancel.clone(),
            move || {
                let counter = Arc::clone(&counter);
                let token = token.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("boom");
                    }
                    token.cancelled().await;
                }
            },
        ));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn early_return_is_restarted() {
        let runs = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let counter = Arc::clone(&runs);
        let handle = tokio::spawn(supervise(
            "test",
            Duration::from_secs(1),
            cancel.clone(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn exits_when_task_ends_after_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        supervise("test", Duration::from_secs(60), cancel, move || {
            let counter = Arc::clone(&counter);
            async move {
                let _ = counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&owned), "owned");
        let borrowed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&borrowed), "static");
        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&other), "unknown panic");
    }
}
