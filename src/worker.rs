use std::cell::{Cell, RefCell};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use rustc_hash::FxHashMap;

use crate::epoll::*;
use crate::utils::epoll_ctl;
use crate::{Event, EventpOps, Interest, Subscriber};

const DEFAULT_EVENT_BUF_CAPACITY: usize = 256;

static NEXT_WORKER_ID: AtomicUsize = AtomicUsize::new(0);

/// A single-threaded epoll reactor.
///
/// `Worker` is a cheap handle: clones refer to the same reactor. It is
/// neither `Send` nor `Sync`; each thread builds and runs its own, and other
/// threads reach it through a [`Channel`](crate::Channel)'s
/// [`Poster`](crate::Poster).
///
/// Subscribers are owned by the worker from [`add`](EventpOps::add) until
/// [`delete`](EventpOps::delete). Registrations may change while the worker is
/// dispatching, including from inside the callback being dispatched.
#[derive(Clone)]
pub struct Worker {
    inner: Rc<Inner>,
}

/// A non-owning reference to a [`Worker`].
#[derive(Clone)]
pub struct WeakWorker {
    inner: Weak<Inner>,
}

struct Inner {
    id: usize,
    registered: RefCell<FxHashMap<RawFd, Box<dyn Subscriber>>>,
    epoll: Epoll,
    event_buf: RefCell<Vec<EpollEvent>>,
    handling: Cell<Option<Handling>>,
    stopped: Cell<bool>,
    stats: Cell<Stats>,
}

#[derive(Clone, Copy)]
struct Handling {
    fd: RawFd,
    deleted: bool,
    modified: Option<Interest>,
}

/// Counters kept by a [`Worker`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Completed `epoll_wait` calls.
    pub n_polls: u64,
    /// Events returned by those calls.
    pub n_events: u64,
    /// Events whose handler reported that it serviced something.
    pub n_serviced: u64,
}

impl Default for Worker {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUF_CAPACITY, EpollCreateFlags::EPOLL_CLOEXEC)
            .expect("Failed to create epoll instance")
    }
}

impl Worker {
    /// Creates a worker that collects up to `capacity` events per poll.
    pub fn new(capacity: usize, flags: EpollCreateFlags) -> io::Result<Self> {
        let epoll = Epoll::new(flags).map_err(io::Error::from)?;
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(worker = id, capacity, "worker created");

        Ok(Self {
            inner: Rc::new(Inner {
                id,
                registered: Default::default(),
                epoll,
                event_buf: RefCell::new(vec![EpollEvent::empty(); capacity.max(1)]),
                handling: Cell::new(None),
                stopped: Cell::new(false),
                stats: Cell::new(Stats::default()),
            }),
        })
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn stats(&self) -> Stats {
        self.inner.stats.get()
    }

    pub fn downgrade(&self) -> WeakWorker {
        WeakWorker {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether `fd` currently has a subscriber on this worker.
    pub fn is_registered(&self, fd: RawFd) -> bool {
        match self.inner.handling.get() {
            Some(h) if h.fd == fd && !h.deleted => true,
            _ => self.inner.registered.borrow().contains_key(&fd),
        }
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        let in_hand = match self.inner.handling.get() {
            Some(h) if !h.deleted => 1,
            _ => 0,
        };
        self.inner.registered.borrow().len() + in_hand
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes [`run_forever`](Self::run_forever) return after the current pass,
    /// or right away if it is not running yet.
    pub fn stop(&self) {
        self.inner.stopped.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.get()
    }

    /// Dispatches until [`stop`](Self::stop) is called.
    ///
    /// A stop requested before the call makes it return without dispatching.
    /// The request is consumed on return, so the next call runs again.
    pub fn run_forever(&self) -> io::Result<()> {
        let result = self.dispatch_until_stopped();
        self.inner.stopped.set(false);
        result
    }

    fn dispatch_until_stopped(&self) -> io::Result<()> {
        while !self.inner.stopped.get() {
            match self.run_once() {
                Ok(_) => continue,

                // The only source of error is epoll_wait.
                // Ref: https://man.archlinux.org/man/epoll_wait.2.en#ERRORS
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(worker = self.id(), "worker stopped");
        Ok(())
    }

    pub fn run_once(&self) -> io::Result<()> {
        self.run_once_with_timeout(EpollTimeout::NONE)
    }

    pub fn run_once_with_timeout(&self, timeout: EpollTimeout) -> io::Result<()> {
        let inner = &*self.inner;
        if inner.handling.get().is_some() {
            panic!("Recursive call to Worker::run_once_with_timeout");
        }

        let mut buf = inner.event_buf.borrow_mut();
        let n = inner.epoll.wait(&mut buf, timeout)?;

        let mut stats = inner.stats.get();
        stats.n_polls += 1;
        stats.n_events += n as u64;
        inner.stats.set(stats);

        for ev in &buf[..n] {
            let fd = ev.data() as RawFd;

            // Deleted earlier in this pass.
            let Some(mut subscriber) = inner.registered.borrow_mut().remove(&fd) else {
                continue;
            };

            inner.handling.set(Some(Handling {
                fd,
                deleted: false,
                modified: None,
            }));
            let serviced = subscriber.handle(Event::from(ev.events()), self);
            let handling = inner.handling.take();

            if !serviced.is_empty() {
                let mut stats = inner.stats.get();
                stats.n_serviced += 1;
                inner.stats.set(stats);
            }

            match handling {
                Some(Handling {
                    deleted: false,
                    modified,
                    ..
                }) => {
                    if let Some(interest) = modified {
                        subscriber.interest().set(interest);
                    }
                    inner.registered.borrow_mut().insert(fd, subscriber);
                }
                _ => drop(subscriber),
            }
        }

        Ok(())
    }
}

impl EventpOps for Worker {
    fn add(&self, subscriber: Box<dyn Subscriber>) -> io::Result<()> {
        let inner = &*self.inner;
        let raw_fd = subscriber.as_fd().as_raw_fd();

        // A subscriber may re-add its own fd only after deleting itself.
        if let Some(handling) = inner.handling.get() {
            if handling.fd == raw_fd && !handling.deleted {
                return Err(io::Error::other(
                    "cannot replace the subscriber of itself at running",
                ));
            }
        }

        let interest = subscriber.interest().get();
        let epoll_event = EpollEvent::new(interest.bitflags(), raw_fd as u64);

        inner.epoll.add(subscriber.as_fd(), epoll_event)?;
        inner.registered.borrow_mut().insert(raw_fd, subscriber);
        tracing::trace!(worker = inner.id, fd = raw_fd, ?interest, "fd added");

        Ok(())
    }

    fn modify(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let inner = &*self.inner;
        let in_hand = matches!(inner.handling.get(), Some(h) if h.fd == fd && !h.deleted);
        if !in_hand && !inner.registered.borrow().contains_key(&fd) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "fd not registered"));
        }

        let epoll_event = EpollEvent::new(interest.bitflags(), fd as u64);
        epoll_ctl(&inner.epoll, libc::EPOLL_CTL_MOD, fd, Some(epoll_event))?;

        if in_hand {
            // Out of the table while it runs; applied when it is put back.
            if let Some(mut h) = inner.handling.get() {
                h.modified = Some(interest);
                inner.handling.set(Some(h));
            }
        } else if let Some(subscriber) = inner.registered.borrow().get(&fd) {
            subscriber.interest().set(interest);
        }
        Ok(())
    }

    fn delete(&self, fd: RawFd) -> io::Result<()> {
        let inner = &*self.inner;
        epoll_ctl(&inner.epoll, libc::EPOLL_CTL_DEL, fd, None)?;

        if let Some(mut h) = inner.handling.get() {
            if h.fd == fd {
                h.deleted = true;
                inner.handling.set(Some(h));
            }
        }
        let removed = inner.registered.borrow_mut().remove(&fd);
        drop(removed);
        tracing::trace!(worker = inner.id, fd, "fd deleted");
        Ok(())
    }
}

impl WeakWorker {
    pub fn upgrade(&self) -> Option<Worker> {
        self.inner.upgrade().map(|inner| Worker { inner })
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.inner.id)
            .field("len", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}
