use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::observe::{Reporter, WaitEvent};

pub(crate) struct WaitCancelled;

/// Suspends for `delay`, reporting `event` first when a reporter is present.
///
/// A zero delay returns immediately without reporting. Cancellation wins over
/// an unfinished sleep.
pub(crate) async fn wait(
    delay: Duration,
    report: Option<(&dyn Reporter, WaitEvent<'_>)>,
    cancellation: Option<&CancellationToken>,
) -> Result<(), WaitCancelled> {
    if delay.is_zero() {
        return Ok(());
    }
    if let Some((reporter, event)) = report {
        reporter.on_wait(&event);
    }

    match cancellation {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(WaitCancelled),
            _ = sleep(delay) => Ok(()),
        },
        None => {
            sleep(delay).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use http::Method;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::wait;
    use crate::observe::{Reporter, WaitEvent};

    #[derive(Default)]
    struct RecordingReporter {
        messages: Mutex<Vec<String>>,
    }

    impl Reporter for RecordingReporter {
        fn on_wait(&self, event: &WaitEvent<'_>) {
            self.messages
                .lock()
                .expect("reporter lock")
                .push(event.message.to_owned());
        }
    }

    static GET: Method = Method::GET;

    fn event(message: &str) -> WaitEvent<'_> {
        WaitEvent {
            url: "http://somewhere/",
            method: &GET,
            attempt: 1,
            delay: Duration::from_secs(3),
            message,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reports_then_sleeps() {
        let reporter = RecordingReporter::default();
        let sink: &dyn Reporter = &reporter;
        let started = Instant::now();
        let result = wait(
            Duration::from_secs(3),
            Some((sink, event("waiting for 3s"))),
            None,
        )
        .await;
        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(
            *reporter.messages.lock().expect("reporter lock"),
            vec!["waiting for 3s".to_owned()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_neither_reports_nor_sleeps() {
        let reporter = RecordingReporter::default();
        let sink: &dyn Reporter = &reporter;
        let started = Instant::now();
        let result = wait(Duration::ZERO, Some((sink, event("now"))), None).await;
        assert!(result.is_ok());
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(reporter.messages.lock().expect("reporter lock").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_sleep() {
        let token = CancellationToken::new();
        token.cancel();
        let started = Instant::now();
        let result = wait(Duration::from_secs(60), None, Some(&token)).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
