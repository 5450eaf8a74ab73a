//! Background fitness estimation.
//!
//! Every chromosome owns one estimator: a tokio task that keeps calling the [`Sampler`] and
//! folding the results into the chromosome's [`FitnessEstimate`]. The estimate lives in a
//! `watch` channel, the task is its only writer and readers copy it out.

use super::events::{EstimatorFailedEvent, Publisher, SampleFailedEvent};
use crate::models::{EstimateMode, EstimatorStatus, Estimation, Sampler};
use std::sync::Arc;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::instrument;
use uuid::Uuid;

/// Shared by all estimators of a run.
#[derive(Clone)]
pub(crate) struct EstimatorSettings {
    pub(crate) consecutive_failure_threshold: u32,
    pub(crate) estimate_mode: EstimateMode,
    /// Notified after every update and when an estimator exits.
    pub(crate) wake: Arc<Notify>,
    pub(crate) publisher: Publisher,
}

/// Wakes the orchestrator when the estimator loop ends, panics included.
struct ExitSignal(Arc<Notify>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

pub(crate) struct Estimator;

impl Estimator {
    /// Spawns the estimator loop and returns immediately.
    #[instrument(level = "debug", skip_all, fields(chromosome_id = %chromosome_id))]
    pub(crate) fn start<G: Send + Sync + 'static>(
        chromosome_id: Uuid,
        genome: Arc<G>,
        sampler: Arc<dyn Sampler<G>>,
        settings: EstimatorSettings,
        estimation: watch::Sender<Estimation>,
    ) -> EstimatorHandle {
        let (cancel, cancelled) = watch::channel(false);

        let task = tokio::spawn(run(
            chromosome_id,
            genome,
            sampler,
            settings,
            estimation,
            cancelled,
        ));

        EstimatorHandle {
            chromosome_id,
            cancel,
            task: Some(task),
            exit_status: None,
        }
    }
}

/// Owning handle to a running estimator. Dropping it stops the estimator without waiting.
#[derive(Debug)]
pub(crate) struct EstimatorHandle {
    chromosome_id: Uuid,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<EstimatorStatus>>,
    /// Set once the task has been joined.
    exit_status: Option<EstimatorStatus>,
}

impl EstimatorHandle {
    pub(crate) fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Requests termination and waits until the estimator has exited.
    ///
    /// Once this returns the sampler is no longer called and the estimate no longer changes.
    /// Dropping the returned future before it completes leaves the handle intact, so
    /// cancelling again resumes the wait.
    #[instrument(level = "debug", skip(self), fields(chromosome_id = %self.chromosome_id))]
    pub(crate) async fn cancel(&mut self) -> EstimatorStatus {
        // Fails only if the estimator already exited
        let _ = self.cancel.send(true);

        let Some(task) = self.task.as_mut() else {
            return self.exit_status.unwrap_or(EstimatorStatus::Cancelled);
        };

        let status = match task.await {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(
                    message = "Estimator task ended abnormally",
                    chromosome_id = %self.chromosome_id,
                    error = %err
                );
                EstimatorStatus::Aborted
            }
        };

        self.task = None;
        self.exit_status = Some(status);
        status
    }
}

impl Drop for EstimatorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[instrument(level = "debug", skip_all, fields(chromosome_id = %chromosome_id))]
async fn run<G: Send + Sync + 'static>(
    chromosome_id: Uuid,
    genome: Arc<G>,
    sampler: Arc<dyn Sampler<G>>,
    settings: EstimatorSettings,
    estimation: watch::Sender<Estimation>,
    mut cancelled: watch::Receiver<bool>,
) -> EstimatorStatus {
    let _exit = ExitSignal(settings.wake.clone());
    let mut consecutive_failures = 0u32;

    loop {
        let outcome = tokio::select! {
            biased;
            // A value change or a dropped sender both mean stop
            _ = cancelled.changed() => break,
            outcome = sampler.sample(&genome) => outcome,
        };

        match outcome {
            Ok(sample) => {
                let mut applied = false;
                estimation.send_if_modified(|current| {
                    applied = current.estimate.apply(sample, settings.estimate_mode);
                    applied
                });

                if applied {
                    consecutive_failures = 0;
                    settings.wake.notify_one();
                } else {
                    tracing::debug!(
                        message = "Discarded non-finite sample",
                        sample = sample
                    );
                }
            }
            Err(err) => {
                consecutive_failures += 1;
                tracing::warn!(
                    message = "Sampler failed",
                    consecutive_failures = consecutive_failures,
                    error = %err
                );
                settings.publisher.publish(SampleFailedEvent {
                    chromosome_id,
                    consecutive_failures,
                    error: err.to_string(),
                });

                if consecutive_failures >= settings.consecutive_failure_threshold {
                    let status = EstimatorStatus::Failed {
                        failures: consecutive_failures,
                    };
                    estimation.send_modify(|current| current.status = status);

                    tracing::warn!(
                        message = "Estimator gave up, estimate is frozen",
                        failures = consecutive_failures
                    );
                    settings.publisher.publish(EstimatorFailedEvent {
                        chromosome_id,
                        failures: consecutive_failures,
                    });

                    return status;
                }
            }
        }

        tokio::task::yield_now().await;
    }

    estimation.send_modify(|current| current.status = EstimatorStatus::Cancelled);
    EstimatorStatus::Cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSampler {
        calls: Arc<AtomicUsize>,
        samples: Vec<Result<f64, ()>>,
    }

    impl Sampler<char> for CountingSampler {
        fn sample<'a>(&'a self, _genome: &'a char) -> BoxFuture<'a, Result<f64, anyhow::Error>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let sample = self.samples[call % self.samples.len()];
            Box::pin(async move { sample.map_err(|_| anyhow::anyhow!("sampler failed")) })
        }
    }

    fn settings(threshold: u32) -> EstimatorSettings {
        EstimatorSettings {
            consecutive_failure_threshold: threshold,
            estimate_mode: EstimateMode::Cumulative,
            wake: Arc::new(Notify::new()),
            publisher: Publisher::new(),
        }
    }

    fn start(
        samples: Vec<Result<f64, ()>>,
        settings: EstimatorSettings,
    ) -> (EstimatorHandle, watch::Receiver<Estimation>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let sampler = CountingSampler {
            calls: calls.clone(),
            samples,
        };
        let (tx, rx) = watch::channel(Estimation::default());
        let handle = Estimator::start(Uuid::now_v7(), Arc::new('x'), Arc::new(sampler), settings, tx);
        (handle, rx, calls)
    }

    #[tokio::test]
    async fn it_refines_the_estimate_until_cancelled() {
        let (mut handle, mut rx, _) = start(vec![Ok(1.0), Ok(3.0)], settings(3));

        rx.wait_for(|e| e.estimate.count() >= 10).await.unwrap();
        let status = handle.cancel().await;

        let estimation = *rx.borrow();
        assert_eq!(status, EstimatorStatus::Cancelled);
        assert_eq!(estimation.status, EstimatorStatus::Cancelled);
        assert!((estimation.estimate.mean().unwrap() - 2.0).abs() <= 1.0 / 10.0);
    }

    #[tokio::test]
    async fn it_stops_sampling_after_cancel() {
        let (mut handle, rx, calls) = start(vec![Ok(1.0)], settings(3));

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel().await;

        let calls_at_cancel = calls.load(Ordering::SeqCst);
        let estimate_at_cancel = rx.borrow().estimate;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), calls_at_cancel);
        assert_eq!(rx.borrow().estimate, estimate_at_cancel);
    }

    #[tokio::test]
    async fn it_gives_up_after_consecutive_failures() {
        let settings = settings(3);
        let mut events = settings.publisher.subscribe();
        let (mut handle, mut rx, calls) = start(vec![Err(())], settings);

        rx.wait_for(|e| e.status.is_frozen()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(rx.borrow().estimate.count(), 0);
        assert_eq!(handle.cancel().await, EstimatorStatus::Failed { failures: 3 });

        let names: Vec<&str> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|event| event.name())
            .collect();
        assert_eq!(
            names,
            vec!["SampleFailed", "SampleFailed", "SampleFailed", "EstimatorFailed"]
        );
    }

    #[tokio::test]
    async fn it_resets_failures_after_a_success() {
        // Two failures never reach the threshold of three
        let (mut handle, mut rx, _) = start(vec![Err(()), Err(()), Ok(1.0)], settings(3));

        rx.wait_for(|e| e.estimate.count() >= 5).await.unwrap();

        assert_eq!(rx.borrow().status, EstimatorStatus::Running);
        assert_eq!(handle.cancel().await, EstimatorStatus::Cancelled);
    }

    #[tokio::test]
    async fn it_ignores_non_finite_samples() {
        let (mut handle, mut rx, calls) = start(vec![Ok(f64::NAN), Ok(2.0)], settings(1));

        rx.wait_for(|e| e.estimate.count() >= 5).await.unwrap();
        handle.cancel().await;

        let estimation = *rx.borrow();
        assert_eq!(estimation.estimate.mean(), Some(2.0));
        assert!(calls.load(Ordering::SeqCst) as u64 >= 2 * estimation.estimate.count() - 1);
    }

    #[tokio::test]
    async fn it_cancels_in_flight_samples() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sampler = move |_: char| {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::pending::<Result<f64, anyhow::Error>>()
        };
        let (tx, rx) = watch::channel(Estimation::default());
        let mut handle = Estimator::start(Uuid::now_v7(), Arc::new('x'), Arc::new(sampler), settings(3), tx);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let status = tokio::time::timeout(Duration::from_secs(1), handle.cancel())
            .await
            .unwrap();

        assert_eq!(status, EstimatorStatus::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(rx.borrow().estimate.count(), 0);
    }

    #[tokio::test]
    async fn it_resumes_an_interrupted_cancel() {
        let (mut handle, rx, calls) = start(vec![Ok(1.0)], settings(3));

        // The estimator task has not run yet, so the join cannot complete within zero time
        let interrupted = tokio::time::timeout(Duration::ZERO, handle.cancel()).await;
        assert!(interrupted.is_err());

        assert_eq!(handle.cancel().await, EstimatorStatus::Cancelled);
        assert!(handle.is_finished());
        assert_eq!(rx.borrow().status, EstimatorStatus::Cancelled);

        let calls_after_cancel = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), calls_after_cancel);

        // Cancelling a joined estimator reports the same exit
        assert_eq!(handle.cancel().await, EstimatorStatus::Cancelled);
    }

    #[tokio::test]
    async fn it_stops_when_the_handle_is_dropped() {
        let (handle, _rx, calls) = start(vec![Ok(1.0)], settings(3));

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let calls_after_drop = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), calls_after_drop);
    }
}
