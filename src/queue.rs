//! Job lanes. Each lane owns one worker task that runs its jobs strictly one
//! at a time, in arrival order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::audio::AudioReport;
use crate::batch::{BatchOptions, BatchSummary};
use crate::error::PipelineError;
use crate::prompts::{PromptItem, SheetRow};
use crate::single::SingleImageResult;
use crate::upload::UploadReport;

#[derive(Debug, Clone)]
pub enum Job {
    GenerateImages {
        prompts: Vec<PromptItem>,
        options: BatchOptions,
    },
    GenerateImage {
        item: PromptItem,
        options: BatchOptions,
    },
    UploadReel {
        reel: String,
    },
    DownloadAudio {
        reel: String,
        rows: Vec<SheetRow>,
    },
}

impl Job {
    pub fn describe(&self) -> String {
        match self {
            Job::GenerateImages { prompts, .. } => format!("image batch of {}", prompts.len()),
            Job::GenerateImage { item, .. } => format!(
                "image for snippet {} of reel {}",
                item.key.line_no, item.key.reel_no
            ),
            Job::UploadReel { reel } => format!("upload of reel {}", reel),
            Job::DownloadAudio { reel, rows } => {
                format!("audio download of {} file(s) for reel {}", rows.len(), reel)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobOutcome {
    Batch(BatchSummary),
    Single(SingleImageResult),
    Upload(UploadReport),
    Audio(AudioReport),
}

impl JobOutcome {
    pub fn success(&self) -> bool {
        match self {
            JobOutcome::Batch(summary) => summary.success,
            JobOutcome::Single(result) => result.success,
            JobOutcome::Upload(report) => report.success,
            JobOutcome::Audio(report) => report.success,
        }
    }
}

/// Executes jobs taken off a lane.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job: Job) -> Result<JobOutcome>;
}

type Reply = oneshot::Sender<Result<JobOutcome>>;

#[derive(Debug, Default)]
struct LaneState {
    queued: AtomicUsize,
    processing: AtomicBool,
    /// Held from acceptance to completion of a job on a rejecting lane.
    claimed: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaneStatus {
    pub queue_size: usize,
    pub is_processing: bool,
}

pub struct JobQueue {
    name: &'static str,
    reject_when_busy: bool,
    sender: mpsc::UnboundedSender<(Job, Reply)>,
    state: Arc<LaneState>,
}

impl JobQueue {
    /// Starts the lane's worker on the current runtime. With
    /// `reject_when_busy` a job is refused while another is queued or
    /// running instead of waiting its turn.
    pub fn spawn(name: &'static str, runner: Arc<dyn JobRunner>, reject_when_busy: bool) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(LaneState::default());
        tokio::spawn(work(name, runner, receiver, state.clone()));
        JobQueue {
            name,
            reject_when_busy,
            sender,
            state,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn status(&self) -> LaneStatus {
        LaneStatus {
            queue_size: self.state.queued.load(Ordering::SeqCst),
            is_processing: self.state.processing.load(Ordering::SeqCst),
        }
    }

    /// Enqueues `job`; the receiver resolves with its outcome once the
    /// worker has run it.
    pub fn submit(&self, job: Job) -> Result<oneshot::Receiver<Result<JobOutcome>>, PipelineError> {
        if self.reject_when_busy
            && self
                .state
                .claimed
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return Err(PipelineError::LaneBusy(self.name));
        }

        let (reply, receiver) = oneshot::channel();
        let ahead = self.state.queued.fetch_add(1, Ordering::SeqCst);
        info!(
            "Queueing {} on {} lane ({} ahead)",
            job.describe(),
            self.name,
            ahead
        );
        if self.sender.send((job, reply)).is_err() {
            self.state.queued.fetch_sub(1, Ordering::SeqCst);
            self.state.claimed.store(false, Ordering::SeqCst);
            return Err(PipelineError::LaneClosed(self.name));
        }
        Ok(receiver)
    }
}

async fn work(
    name: &'static str,
    runner: Arc<dyn JobRunner>,
    mut receiver: mpsc::UnboundedReceiver<(Job, Reply)>,
    state: Arc<LaneState>,
) {
    while let Some((job, reply)) = receiver.recv().await {
        state.processing.store(true, Ordering::SeqCst);
        state.queued.fetch_sub(1, Ordering::SeqCst);
        let description = job.describe();
        info!("{} lane started {}", name, description);

        // A panicking job must not take the lane down with it.
        let job_runner = runner.clone();
        let outcome = match tokio::spawn(async move { job_runner.run(job).await }).await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(anyhow!("job panicked: {}", join_err)),
        };
        match &outcome {
            Ok(result) => info!(
                "{} lane finished {} (success: {})",
                name,
                description,
                result.success()
            ),
            Err(err) => error!("{} lane failed {}: {:#}", name, description, err),
        }

        state.processing.store(false, Ordering::SeqCst);
        state.claimed.store(false, Ordering::SeqCst);
        if reply.send(outcome).is_err() {
            warn!("Nobody is waiting for the {} result any more", description);
        }
    }
    info!("{} lane stopped", name);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;
    use crate::upload::UploadReport;

    /// Records the order jobs start in and holds each one until released.
    #[derive(Default)]
    struct GatedRunner {
        started: Mutex<Vec<String>>,
        running: AtomicUsize,
        overlap: AtomicBool,
        gate: Notify,
    }

    #[async_trait]
    impl JobRunner for GatedRunner {
        async fn run(&self, job: Job) -> Result<JobOutcome> {
            let Job::UploadReel { reel } = job else {
                return Err(anyhow!("unexpected job"));
            };
            if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlap.store(true, Ordering::SeqCst);
            }
            if let Ok(mut started) = self.started.lock() {
                started.push(reel.clone());
            }
            self.gate.notified().await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if reel == "boom" {
                panic!("runner blew up");
            }
            Ok(JobOutcome::Upload(UploadReport {
                success: true,
                reel_number: reel,
                total_pairs: 0,
                uploaded_pairs: 0,
                results: Vec::new(),
            }))
        }
    }

    fn upload(reel: &str) -> Job {
        Job::UploadReel {
            reel: reel.to_string(),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn runs_jobs_one_at_a_time_in_order() -> anyhow::Result<()> {
        let runner = Arc::new(GatedRunner::default());
        let lane = JobQueue::spawn("images", runner.clone(), false);

        let first = lane.submit(upload("1"))?;
        let second = lane.submit(upload("2"))?;
        settle().await;
        assert_eq!(
            lane.status(),
            LaneStatus {
                queue_size: 1,
                is_processing: true
            }
        );

        runner.gate.notify_one();
        let outcome = first.await??;
        assert!(outcome.success());
        runner.gate.notify_one();
        second.await??;

        settle().await;
        assert!(!runner.overlap.load(Ordering::SeqCst));
        assert_eq!(*runner.started.lock().unwrap(), vec!["1", "2"]);
        assert_eq!(
            lane.status(),
            LaneStatus {
                queue_size: 0,
                is_processing: false
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn rejecting_lane_refuses_while_busy() -> anyhow::Result<()> {
        let runner = Arc::new(GatedRunner::default());
        let lane = JobQueue::spawn("uploads", runner.clone(), true);

        let first = lane.submit(upload("1"))?;
        settle().await;
        assert!(matches!(
            lane.submit(upload("2")),
            Err(PipelineError::LaneBusy("uploads"))
        ));

        runner.gate.notify_one();
        first.await??;
        settle().await;
        let again = lane.submit(upload("3"))?;
        runner.gate.notify_one();
        again.await??;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_submits_claim_a_rejecting_lane_once() -> anyhow::Result<()> {
        let runner = Arc::new(GatedRunner::default());
        let lane = JobQueue::spawn("uploads", runner.clone(), true);
        let barrier = std::sync::Barrier::new(8);

        let accepted: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let (lane, barrier) = (&lane, &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        lane.submit(upload(&i.to_string()))
                    })
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| handle.join().ok())
                .filter_map(Result::ok)
                .collect()
        });

        assert_eq!(accepted.len(), 1);
        runner.gate.notify_one();
        for receiver in accepted {
            receiver.await??;
        }
        assert_eq!(runner.started.lock().unwrap().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn panicking_job_reports_error_and_lane_survives() -> anyhow::Result<()> {
        let runner = Arc::new(GatedRunner::default());
        let lane = JobQueue::spawn("audio", runner.clone(), false);

        let doomed = lane.submit(upload("boom"))?;
        runner.gate.notify_one();
        let err = doomed.await?.unwrap_err();
        assert!(err.to_string().contains("panicked"));

        let next = lane.submit(upload("4"))?;
        runner.gate.notify_one();
        let outcome = tokio::time::timeout(Duration::from_secs(5), next).await???;
        assert!(outcome.success());
        Ok(())
    }
}
