//! Several worker threads, each with its own channel; the main thread routes
//! jobs to them round-robin and then tells them to stop.

use std::io;
use std::sync::mpsc;
use std::thread;

use eventp_channel::{Channel, Message, PostError, Poster, Worker};

const WORKERS: usize = 4;
const JOBS: u32 = 12;

#[derive(Clone, Copy, Debug)]
#[repr(C)]
struct Job {
    kind: u32,
    arg: u32,
}

unsafe impl Message for Job {}

const WORK: u32 = 0;
const SHUTDOWN: u32 = 1;

fn spawn_worker(index: usize) -> (thread::JoinHandle<io::Result<u64>>, Poster<Job>) {
    let (tx, rx) = mpsc::channel();

    let handle = thread::spawn(move || -> io::Result<u64> {
        let worker = Worker::default();
        let weak = worker.downgrade();
        let mut done = 0u64;

        let mut channel = Channel::new(move |_: &Poster<Job>, job: Job| match job.kind {
            WORK => {
                done += u64::from(job.arg);
                tracing::info!(worker = index, job = job.arg, total = done, "job done");
            }
            SHUTDOWN => {
                if let Some(worker) = weak.upgrade() {
                    worker.stop();
                }
            }
            other => tracing::warn!(worker = index, kind = other, "unknown job"),
        })?;
        channel.attach(&worker)?;
        let _ = tx.send(channel.poster());

        worker.run_forever()?;
        Ok(worker.stats().n_serviced)
    });

    let poster = rx.recv().expect("worker thread died before attaching");
    (handle, poster)
}

fn post_or_retry(poster: &Poster<Job>, job: Job) {
    loop {
        match poster.post(job) {
            Ok(()) => return,
            Err(PostError::Full) => thread::yield_now(),
            Err(e) => {
                tracing::error!(error = %e, "dropping job");
                return;
            }
        }
    }
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt::init();

    let (handles, posters): (Vec<_>, Vec<_>) = (0..WORKERS).map(spawn_worker).unzip();

    for n in 0..JOBS {
        let poster = &posters[n as usize % WORKERS];
        post_or_retry(poster, Job { kind: WORK, arg: n });
    }
    for poster in &posters {
        post_or_retry(poster, Job { kind: SHUTDOWN, arg: 0 });
    }

    for (index, handle) in handles.into_iter().enumerate() {
        let serviced = handle.join().expect("worker thread panicked")?;
        tracing::info!(worker = index, serviced, "worker finished");
    }
    Ok(())
}
