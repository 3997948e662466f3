//! Bounded waits on calls that may never return.
//!
//! Each job is handed to a worker thread that owns it until the call
//! finishes. When the wait runs out, that worker is abandoned with the job
//! and a fresh one serves the next call.
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SendError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// The blocking call run against each job
pub type Inspect<J, R> = Arc<dyn Fn(&J) -> R + Send + Sync>;

#[derive(Debug, PartialEq, Eq)]
pub enum WorkOutcome<R> {
    Done(R),
    TimedOut,
    /// The worker died (panicked) before replying
    Lost,
}

struct Worker<J, R> {
    jobs: Sender<J>,
    replies: Receiver<R>,
}

impl<J: Send + 'static, R: Send + 'static> Worker<J, R> {
    fn spawn(name: &str, inspect: Inspect<J, R>) -> io::Result<Self> {
        let (jobs, job_rx) = mpsc::channel::<J>();
        let (reply_tx, replies) = mpsc::channel::<R>();

        thread::Builder::new().name(name.to_string()).spawn(move || {
            for job in job_rx {
                let reply = inspect(&job);
                drop(job);
                if reply_tx.send(reply).is_err() {
                    break;
                }
            }
        })?;

        Ok(Worker { jobs, replies })
    }
}

pub struct TimedWorker<J, R> {
    name: &'static str,
    timeout: Duration,
    inspect: Inspect<J, R>,
    worker: Option<Worker<J, R>>,
    spawned: usize,
}

impl<J: Send + 'static, R: Send + 'static> TimedWorker<J, R> {
    pub fn new(name: &'static str, timeout: Duration, inspect: Inspect<J, R>) -> Self {
        TimedWorker {
            name,
            timeout,
            inspect,
            worker: None,
            spawned: 0,
        }
    }

    /// Threads started so far, counting abandoned ones
    pub fn workers_spawned(&self) -> usize {
        self.spawned
    }

    /// Run `inspect` on `job`, waiting at most the configured timeout
    pub fn run(&mut self, job: J) -> io::Result<WorkOutcome<R>> {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => {
                let worker = Worker::spawn(self.name, Arc::clone(&self.inspect))?;
                self.spawned += 1;
                worker
            }
        };

        if let Err(SendError(job)) = worker.jobs.send(job) {
            log::warn!("{} worker exited, running inline", self.name);
            return Ok(WorkOutcome::Done((self.inspect)(&job)));
        }

        match worker.replies.recv_timeout(self.timeout) {
            Ok(reply) => {
                self.worker = Some(worker);
                Ok(WorkOutcome::Done(reply))
            }
            // dropping `worker` closes its queue; the thread exits once
            // the stuck call returns and releases the job then
            Err(RecvTimeoutError::Timeout) => Ok(WorkOutcome::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Ok(WorkOutcome::Lost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Reports its id when released
    struct Job {
        id: u32,
        block: bool,
        panic: bool,
        released: Sender<u32>,
    }

    impl Drop for Job {
        fn drop(&mut self) {
            let _ = self.released.send(self.id);
        }
    }

    fn job(id: u32, released: &Sender<u32>) -> Job {
        Job {
            id,
            block: false,
            panic: false,
            released: released.clone(),
        }
    }

    fn blocking_job(id: u32, released: &Sender<u32>) -> Job {
        let mut job = job(id, released);
        job.block = true;
        job
    }

    fn crashing_job(id: u32, released: &Sender<u32>) -> Job {
        let mut job = job(id, released);
        job.panic = true;
        job
    }

    fn gated_worker(gate: Receiver<()>) -> TimedWorker<Job, u32> {
        let gate = Mutex::new(gate);
        TimedWorker::new(
            "test-worker",
            Duration::from_millis(500),
            Arc::new(move |job: &Job| {
                if job.panic {
                    panic!("call crashed");
                }
                if job.block {
                    let _ = gate.lock().unwrap().recv();
                }
                job.id * 2
            }),
        )
    }

    fn wait_for_release(released: &Receiver<u32>, id: u32) -> bool {
        while let Ok(got) = released.recv_timeout(Duration::from_secs(5)) {
            if got == id {
                return true;
            }
        }
        false
    }

    #[test]
    fn test_reuses_worker_while_calls_return() {
        let (_gate_tx, gate_rx) = mpsc::channel();
        let (released_tx, released) = mpsc::channel();
        let mut worker = gated_worker(gate_rx);

        assert_eq!(worker.run(job(1, &released_tx)).unwrap(), WorkOutcome::Done(2));
        assert_eq!(worker.run(job(2, &released_tx)).unwrap(), WorkOutcome::Done(4));
        assert_eq!(worker.workers_spawned(), 1);
        assert!(wait_for_release(&released, 2));
    }

    #[test]
    fn test_stuck_call_times_out_and_fresh_worker_continues() {
        let (gate_tx, gate_rx) = mpsc::channel();
        let (released_tx, released) = mpsc::channel();
        let mut worker = gated_worker(gate_rx);

        assert_eq!(worker.run(job(1, &released_tx)).unwrap(), WorkOutcome::Done(2));

        let stuck = blocking_job(7, &released_tx);
        assert_eq!(worker.run(stuck).unwrap(), WorkOutcome::TimedOut);

        // next call is served by a new thread while the old one is blocked
        assert_eq!(worker.run(job(3, &released_tx)).unwrap(), WorkOutcome::Done(6));
        assert_eq!(worker.workers_spawned(), 2);

        let early: Vec<u32> = released.try_iter().collect();
        assert!(!early.contains(&7));

        // the abandoned worker still owns the stuck job and releases it
        // once the call returns
        gate_tx.send(()).unwrap();
        assert!(wait_for_release(&released, 7));
    }

    #[test]
    fn test_crashed_worker_is_replaced() {
        let (_gate_tx, gate_rx) = mpsc::channel();
        let (released_tx, _released) = mpsc::channel();
        let mut worker = gated_worker(gate_rx);

        let crashing = crashing_job(1, &released_tx);
        assert_eq!(worker.run(crashing).unwrap(), WorkOutcome::Lost);
        assert_eq!(worker.run(job(2, &released_tx)).unwrap(), WorkOutcome::Done(4));
        assert_eq!(worker.workers_spawned(), 2);
    }
}
