use crate::context::ServerContext;
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

type Job = Box<dyn FnMut(&ServerContext) -> Result<()> + Send>;

/// One-shot daemon which periodically executes a job against a local
/// context on a worker thread.
///
/// Each iteration records its start, runs the job, then sleeps for
/// whatever is left of the period. The job's first error stops the daemon
/// and is re-raised from [`stop`](Daemon::stop).
pub struct Daemon {
    job: Option<Job>,
    period: Duration,
    stop_flag: Arc<AtomicBool>,
    faults: (Sender<Error>, Receiver<Error>),
    handle: Option<JoinHandle<()>>,
}

impl Daemon {
    /// The period is in seconds and must be non-negative.
    pub fn new(
        job: impl FnMut(&ServerContext) -> Result<()> + Send + 'static,
        period: f64,
    ) -> Result<Self> {
        if period < 0.0 {
            return Err(Error::NegativePeriod(period));
        }
        Ok(Daemon {
            job: Some(Box::new(job)),
            period: Duration::from_secs_f64(period),
            stop_flag: Arc::new(AtomicBool::new(false)),
            faults: bounded(1),
            handle: None,
        })
    }

    /// Start executing the job against `ctx` in the background.
    pub fn serve(&mut self, ctx: ServerContext) -> Result<()> {
        let mut job = self
            .job
            .take()
            .ok_or_else(|| Error::Encoding("daemon can only be served once".to_owned()))?;
        let period = self.period;
        let flag = Arc::clone(&self.stop_flag);
        let faults = self.faults.0.clone();
        let handle = std::thread::Builder::new()
            .name("mbmap-daemon".to_owned())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    let start = Instant::now();
                    if let Err(e) = job(&ctx) {
                        faults.send(e).ok();
                        return;
                    }
                    if let Some(wait) = period.checked_sub(start.elapsed()) {
                        sleep_watching(&flag, wait);
                    }
                }
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Let the current iteration finish, then stop. Re-raises the job's
    /// error if it failed in the background.
    pub fn stop(&mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| Error::Encoding("daemon thread panicked".to_owned()))?;
        }
        match self.faults.1.try_recv() {
            Ok(e) => Err(e),
            Err(_) => Ok(()),
        }
    }
}

// Sleep in short slices so a stop request does not have to wait out a
// long period.
fn sleep_watching(flag: &AtomicBool, total: Duration) {
    let slice = Duration::from_millis(50);
    let deadline = Instant::now() + total;
    while !flag.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(slice));
    }
}

/// [`Daemon`], but as a tokio task.
///
/// [`stop`](AsyncDaemon::stop) lets the current iteration finish;
/// [`cancel`](AsyncDaemon::cancel) aborts the task at its next await
/// point.
pub struct AsyncDaemon {
    job: Option<Job>,
    period: Duration,
    stop_flag: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<Result<()>>>,
}

impl AsyncDaemon {
    /// The period is in seconds and must be non-negative.
    pub fn new(
        job: impl FnMut(&ServerContext) -> Result<()> + Send + 'static,
        period: f64,
    ) -> Result<Self> {
        if period < 0.0 {
            return Err(Error::NegativePeriod(period));
        }
        Ok(AsyncDaemon {
            job: Some(Box::new(job)),
            period: Duration::from_secs_f64(period),
            stop_flag: Arc::new(AtomicBool::new(false)),
            task: None,
        })
    }

    /// Start executing the job against `ctx` on the current runtime.
    pub fn serve(&mut self, ctx: ServerContext) -> Result<()> {
        let mut job = self
            .job
            .take()
            .ok_or_else(|| Error::Encoding("daemon can only be served once".to_owned()))?;
        let period = self.period;
        let flag = Arc::clone(&self.stop_flag);
        self.task = Some(tokio::spawn(async move {
            while !flag.load(Ordering::SeqCst) {
                let start = Instant::now();
                job(&ctx)?;
                if let Some(wait) = period.checked_sub(start.elapsed()) {
                    tokio::time::sleep(wait).await;
                }
            }
            Ok(())
        }));
        Ok(())
    }

    /// Let the current iteration finish, then stop. Re-raises the job's
    /// error if it failed in the background.
    pub async fn stop(mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::SeqCst);
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| Error::Encoding(format!("daemon task failed: {e}")))?,
            None => Ok(()),
        }
    }

    /// Abort the task without waiting for the iteration to complete.
    pub async fn cancel(mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => {
                task.abort();
                match task.await {
                    Ok(result) => result,
                    Err(e) if e.is_cancelled() => Ok(()),
                    Err(e) => Err(Error::Encoding(format!("daemon task failed: {e}"))),
                }
            }
            None => Ok(()),
        }
    }
}
