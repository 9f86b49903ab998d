// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Mining worker: one OS thread, fed through channels.
//
//   caller --Job{id, request, cancel}--> thread --JobReply{id, reply}--> caller
//
// Only the channels and a per-job cancel flag cross the boundary. A new job
// raises the flag of the outstanding one, which then replies {"err":"cancelled"}.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::{MineReply, MineRequest};
use crate::search::{prepare, search};

pub const THREAD_NAME: &str = "powgate-miner";

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("mining thread has stopped")]
    Stopped,
}

struct Job {
    id: u64,
    request: MineRequest,
    cancel: Arc<AtomicBool>,
}

/// Reply to the job with the same `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReply {
    pub id: u64,
    pub reply: MineReply,
}

pub struct MiningWorker {
    jobs: Option<mpsc::UnboundedSender<Job>>,
    current: Option<Arc<AtomicBool>>,
    next_id: u64,
    thread: Option<JoinHandle<()>>,
}

impl MiningWorker {
    /// Start the thread. Replies arrive on the returned receiver.
    pub fn spawn() -> io::Result<(Self, mpsc::UnboundedReceiver<JobReply>)> {
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<Job>();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                while let Some(job) = job_rx.blocking_recv() {
                    let result = prepare(&job.request).and_then(|puzzle| search(&puzzle, &job.cancel));
                    debug!(id = job.id, ok = result.is_ok(), "job finished");
                    let reply = JobReply {
                        id: job.id,
                        reply: result.into(),
                    };
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
            })?;

        let worker = Self {
            jobs: Some(job_tx),
            current: None,
            next_id: 0,
            thread: Some(thread),
        };
        Ok((worker, reply_rx))
    }

    /// Queue `request`, cancelling whatever was submitted before it.
    pub fn submit(&mut self, request: MineRequest) -> Result<u64, WorkerError> {
        self.cancel();

        let id = self.next_id;
        self.next_id += 1;
        let cancel = Arc::new(AtomicBool::new(false));
        let job = Job {
            id,
            request,
            cancel: cancel.clone(),
        };
        self.jobs
            .as_ref()
            .ok_or(WorkerError::Stopped)?
            .send(job)
            .map_err(|_| WorkerError::Stopped)?;
        self.current = Some(cancel);
        Ok(id)
    }

    /// Cancel the outstanding job, if any.
    pub fn cancel(&mut self) {
        if let Some(flag) = self.current.take() {
            flag.store(true, Ordering::Relaxed);
        }
    }
}

impl Drop for MiningWorker {
    fn drop(&mut self) {
        self.cancel();
        // Closing the job channel ends the thread's loop
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
