//! A pipe-backed channel that hands fixed-size messages to one [`Worker`].
//!
//! Any thread may [`post`](Poster::post) a [`Message`]; the worker the channel is
//! attached to reads it back and runs the channel's [`MessageHandler`] on its
//! own thread. Posting is a single non-blocking `write(2)` on a pipe in packet
//! mode, so it is lock-free and may be called from a signal handler.
//!
//! # Examples
//!
//! ```
//! # use std::io;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::thread;
//!
//! use eventp_channel::{Channel, Poster, Worker};
//!
//! # fn main() -> io::Result<()> {
//! let worker = Worker::default();
//! let received = Rc::new(RefCell::new(Vec::new()));
//!
//! let sink = Rc::clone(&received);
//! let mut channel = Channel::new(move |_: &Poster<u64>, m: u64| sink.borrow_mut().push(m))?;
//! channel.attach(&worker)?;
//!
//! let poster = channel.poster();
//! thread::spawn(move || poster.post(42).unwrap()).join().unwrap();
//!
//! worker.run_once()?;
//! assert_eq!(*received.borrow(), vec![42]);
//! # Ok(()) }
//! ```

use std::cell::{Cell, RefCell};
use std::io;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::epoll::EpollFlags;
use crate::message::FrameSize;
use crate::pipe::{Packet, Pipe};
use crate::{interest, Event, EventpOps, Handler, Interest, Message, PostError, WithInterest, Worker};

/// Receives the messages drained from a [`Channel`].
///
/// Runs on the worker's thread, inside its dispatch loop: it must not block,
/// and it must handle every message value it can receive without panicking.
pub trait MessageHandler<M: Message> {
    fn handle_message(&mut self, poster: &Poster<M>, message: M);
}

impl<M, F> MessageHandler<M> for F
where
    M: Message,
    F: FnMut(&Poster<M>, M),
{
    fn handle_message(&mut self, poster: &Poster<M>, message: M) {
        self(poster, message)
    }
}

/// What the drain does when the reactor or the pipe breaks its contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPolicy {
    /// Panic on an unexpected event bit or a malformed frame.
    Strict,
    /// Log the anomaly and keep draining.
    Lenient,
}

impl Default for DrainPolicy {
    /// `Strict` with debug assertions, `Lenient` otherwise.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            DrainPolicy::Strict
        } else {
            DrainPolicy::Lenient
        }
    }
}

/// Result of one exhaustive drain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DrainOutcome {
    pub(crate) delivered: usize,
    pub(crate) malformed: usize,
}

struct Shared<M> {
    pipe: Pipe,
    attached: AtomicBool,
    _marker: PhantomData<fn() -> M>,
}

/// The sending half of a [`Channel`].
///
/// Cheap to clone, `Send` and `Sync`. A poster keeps the pipe open, but once
/// the channel is detached or dropped every post fails with
/// [`PostError::Detached`].
pub struct Poster<M> {
    shared: Arc<Shared<M>>,
}

impl<M> Clone for Poster<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M> std::fmt::Debug for Poster<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poster")
            .field("fd", &self.shared.pipe.write_fd().as_raw_fd())
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl<M: Message> Poster<M> {
    /// Queues `message` for the attached worker.
    ///
    /// Succeeds only if the whole message was accepted by one write. On any
    /// error the message was not queued; retrying is up to the caller.
    ///
    /// Async-signal-safe: one atomic load and one `write(2)`, no locks, no
    /// allocation, no logging.
    pub fn post(&self, message: M) -> Result<(), PostError> {
        if !self.shared.attached.load(Ordering::Acquire) {
            return Err(PostError::Detached);
        }

        let expected = FrameSize::<M>::CHECKED;
        match self.shared.pipe.write_packet(&message) {
            Ok(n) if n == expected => Ok(()),
            Ok(written) => Err(PostError::ShortWrite { written, expected }),
            Err(e) => Err(PostError::from(e)),
        }
    }
}

impl<M> Poster<M> {
    pub fn is_attached(&self) -> bool {
        self.shared.attached.load(Ordering::Acquire)
    }
}

/// Configures a [`Channel`] before it allocates its pipe.
#[derive(Debug, Default, Clone)]
pub struct Builder {
    policy: DrainPolicy,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(mut self, policy: DrainPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Allocates the pipe and builds a detached channel.
    ///
    /// # Errors
    ///
    /// Fails if the pipe cannot be created, typically because the process
    /// or the system is out of descriptors.
    pub fn build<M, H, W>(self, handler: H) -> io::Result<Channel<M, H, W>>
    where
        M: Message,
        H: MessageHandler<M> + 'static,
        W: EventpOps + Clone,
    {
        let _ = FrameSize::<M>::CHECKED;

        let pipe = Pipe::new().map_err(|e| {
            tracing::error!(error = %e, "could not create pipe for channel");
            e
        })?;
        tracing::debug!(
            read_fd = pipe.read_fd().as_raw_fd(),
            write_fd = pipe.write_fd().as_raw_fd(),
            "channel created"
        );

        Ok(Channel {
            poster: Poster {
                shared: Arc::new(Shared {
                    pipe,
                    attached: AtomicBool::new(false),
                    _marker: PhantomData,
                }),
            },
            handler: Rc::new(RefCell::new(handler)),
            policy: self.policy,
            worker: None,
        })
    }
}

/// A message channel, attached to at most one worker at a time.
///
/// Dropping the channel detaches it first.
pub struct Channel<M, H, W = Worker>
where
    M: Message,
    H: MessageHandler<M> + 'static,
    W: EventpOps + Clone,
{
    poster: Poster<M>,
    handler: Rc<RefCell<H>>,
    policy: DrainPolicy,
    worker: Option<W>,
}

impl<M, H> Channel<M, H>
where
    M: Message,
    H: MessageHandler<M> + 'static,
{
    /// Creates a detached channel with the default [`DrainPolicy`].
    pub fn new(handler: H) -> io::Result<Self> {
        Builder::new().build(handler)
    }
}

impl<M, H, W> Channel<M, H, W>
where
    M: Message,
    H: MessageHandler<M> + 'static,
    W: EventpOps + Clone,
{
    /// See [`Poster::post`].
    pub fn post(&self, message: M) -> Result<(), PostError> {
        self.poster.post(message)
    }

    /// A handle other threads can post through.
    pub fn poster(&self) -> Poster<M> {
        self.poster.clone()
    }

    pub fn read_fd(&self) -> RawFd {
        self.poster.shared.pipe.read_fd().as_raw_fd()
    }

    pub fn policy(&self) -> DrainPolicy {
        self.policy
    }

    pub fn worker(&self) -> Option<&W> {
        self.worker.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.worker.is_some()
    }

    /// Registers the read side with `worker` for readable events, detaching
    /// from the previous worker first.
    ///
    /// # Errors
    ///
    /// Returns the registration error; the channel is then detached.
    pub fn attach(&mut self, worker: &W) -> io::Result<()> {
        self.detach();

        let fd = self.read_fd();
        if let Err(e) = worker.add(Box::new(self.drain())) {
            tracing::error!(fd, error = %e, "could not attach channel to worker");
            return Err(e);
        }

        self.worker = Some(worker.clone());
        self.poster.shared.attached.store(true, Ordering::Release);
        tracing::debug!(fd, "channel attached");
        Ok(())
    }

    /// Deregisters from the current worker and returns it, or `None` if the
    /// channel was not attached.
    ///
    /// Messages already in the pipe stay there and are delivered after the
    /// next [`attach`](Self::attach).
    pub fn detach(&mut self) -> Option<W> {
        let worker = self.worker.take()?;
        self.poster.shared.attached.store(false, Ordering::Release);

        let fd = self.read_fd();
        if let Err(e) = worker.delete(fd) {
            tracing::warn!(fd, error = %e, "could not remove channel from worker");
        }
        tracing::debug!(fd, "channel detached");
        Some(worker)
    }

    fn drain(&self) -> Drain<M, H> {
        Drain {
            poster: self.poster.clone(),
            handler: Rc::clone(&self.handler),
            interest: Cell::new(interest().read()),
            policy: self.policy,
        }
    }
}

impl<M, H, W> Drop for Channel<M, H, W>
where
    M: Message,
    H: MessageHandler<M> + 'static,
    W: EventpOps + Clone,
{
    fn drop(&mut self) {
        self.detach();
    }
}

/// The subscriber a channel registers with its worker.
struct Drain<M, H> {
    poster: Poster<M>,
    handler: Rc<RefCell<H>>,
    interest: Cell<Interest>,
    policy: DrainPolicy,
}

impl<M, H> AsFd for Drain<M, H> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.poster.shared.pipe.read_fd()
    }
}

impl<M, H> WithInterest for Drain<M, H> {
    fn interest(&self) -> &Cell<Interest> {
        &self.interest
    }
}

impl<M, H> Handler for Drain<M, H>
where
    M: Message,
    H: MessageHandler<M>,
{
    fn handle(&mut self, event: Event, worker: &Worker) -> Event {
        let unexpected = event.unexpected(EpollFlags::EPOLLIN);
        if !unexpected.is_empty() {
            let fd = self.as_fd().as_raw_fd();
            match self.policy {
                DrainPolicy::Strict => {
                    panic!("channel fd {fd} got unexpected events {unexpected:?}")
                }
                DrainPolicy::Lenient => {
                    tracing::warn!(worker = worker.id(), fd, ?unexpected, "unexpected channel events")
                }
            }
        }

        if !event.is_readable() {
            return Event::empty();
        }

        let outcome = self.drain();
        tracing::trace!(
            worker = worker.id(),
            delivered = outcome.delivered,
            malformed = outcome.malformed,
            "channel drained"
        );
        Event::readable()
    }
}

impl<M, H> Drain<M, H>
where
    M: Message,
    H: MessageHandler<M>,
{
    /// Reads and handles every whole message currently in the pipe.
    fn drain(&mut self) -> DrainOutcome {
        let expected = FrameSize::<M>::CHECKED;
        let pipe = &self.poster.shared.pipe;
        let mut outcome = DrainOutcome::default();

        loop {
            let mut slot = MaybeUninit::<M>::uninit();
            match Packet::classify(pipe.read_packet(&mut slot), expected) {
                Packet::Full => {
                    // SAFETY: the read filled all `size_of::<M>()` bytes, and
                    // `Message` makes any copied value valid.
                    let message = unsafe { slot.assume_init() };
                    outcome.delivered += 1;
                    self.handler
                        .borrow_mut()
                        .handle_message(&self.poster, message);
                }
                Packet::Short(read) => {
                    outcome.malformed += 1;
                    let fd = pipe.read_fd().as_raw_fd();
                    tracing::error!(fd, read, expected, "malformed frame on channel");
                    if self.policy == DrainPolicy::Strict {
                        panic!("malformed frame on channel fd {fd}: read {read} of {expected} bytes");
                    }
                    // Keep going, or the stale bytes would wedge the worker.
                }
                Packet::Interrupted => continue,
                Packet::Empty | Packet::Closed => break,
                Packet::Failed(e) => {
                    let fd = pipe.read_fd().as_raw_fd();
                    tracing::error!(fd, error = %e, "could not read from channel");
                    break;
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoll::EpollTimeout;

    const fn assert_send<T: Send>() {}
    const fn assert_sync<T: Sync>() {}

    const _: () = assert_send::<Poster<u64>>();
    const _: () = assert_sync::<Poster<u64>>();

    type Log = Rc<RefCell<Vec<u32>>>;

    fn recorder(log: &Log) -> impl FnMut(&Poster<u32>, u32) + 'static {
        let log = Rc::clone(log);
        move |_: &Poster<u32>, m: u32| log.borrow_mut().push(m)
    }

    fn timeout() -> EpollTimeout {
        EpollTimeout::from(100u16)
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    /// Runs `f` with logs going to the returned buffer.
    fn with_captured_logs<R>(f: impl FnOnce() -> R) -> (R, Captured) {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .with_writer(move || writer.clone())
            .finish();
        let ret = tracing::subscriber::with_default(subscriber, f);
        (ret, captured)
    }

    #[test]
    fn malformed_frame_is_skipped_when_lenient() {
        let worker = Worker::default();
        let log = Log::default();
        let mut channel = Builder::new()
            .policy(DrainPolicy::Lenient)
            .build::<u32, _, Worker>(recorder(&log))
            .unwrap();
        channel.attach(&worker).unwrap();

        channel.post(1).unwrap();
        channel.poster.shared.pipe.write_bytes(&[0xff, 0xff]).unwrap();
        channel.post(2).unwrap();

        let (outcome, logs) = with_captured_logs(|| channel.drain().drain());

        assert_eq!(
            outcome,
            DrainOutcome {
                delivered: 2,
                malformed: 1
            }
        );
        assert_eq!(*log.borrow(), vec![1, 2]);

        let logs = logs.text();
        let line = logs
            .lines()
            .find(|l| l.contains("malformed frame on channel"))
            .expect("malformed frame was not logged");
        assert!(line.contains("ERROR"), "{line}");
        assert!(line.contains("read=2"), "{line}");
        assert!(line.contains("expected=4"), "{line}");
    }

    #[test]
    #[should_panic(expected = "malformed frame")]
    fn malformed_frame_panics_when_strict() {
        let worker = Worker::default();
        let mut channel = Builder::new()
            .policy(DrainPolicy::Strict)
            .build::<u32, _, Worker>(|_: &Poster<u32>, _: u32| {})
            .unwrap();
        channel.attach(&worker).unwrap();

        channel.poster.shared.pipe.write_bytes(&[1]).unwrap();
        worker.run_once_with_timeout(timeout()).unwrap();
    }

    #[test]
    #[should_panic(expected = "unexpected events")]
    fn unexpected_event_panics_when_strict() {
        let worker = Worker::default();
        let channel = Builder::new()
            .policy(DrainPolicy::Strict)
            .build::<u32, _, Worker>(|_: &Poster<u32>, _: u32| {})
            .unwrap();

        channel
            .drain()
            .handle(Event::from(EpollFlags::EPOLLIN | EpollFlags::EPOLLERR), &worker);
    }

    #[test]
    fn unexpected_event_still_drains_when_lenient() {
        let worker = Worker::default();
        let log = Log::default();
        let mut channel = Builder::new()
            .policy(DrainPolicy::Lenient)
            .build::<u32, _, Worker>(recorder(&log))
            .unwrap();
        channel.attach(&worker).unwrap();
        channel.post(7).unwrap();

        let serviced = channel
            .drain()
            .handle(Event::from(EpollFlags::EPOLLIN | EpollFlags::EPOLLHUP), &worker);

        assert!(serviced.is_readable());
        assert_eq!(*log.borrow(), vec![7]);
    }

    #[test]
    fn nothing_to_read_is_still_a_serviced_read() {
        let worker = Worker::default();
        let channel = Channel::new(|_: &Poster<u32>, _: u32| {}).unwrap();

        let mut drain = channel.drain();
        assert_eq!(drain.drain(), DrainOutcome::default());
        assert!(drain.handle(Event::readable(), &worker).is_readable());
        assert!(drain.handle(Event::empty(), &worker).is_empty());
    }

    #[test]
    fn handler_can_post_back_to_its_channel() {
        let worker = Worker::default();
        let log = Log::default();

        let sink = Rc::clone(&log);
        let mut channel = Channel::new(move |poster: &Poster<u32>, m: u32| {
            sink.borrow_mut().push(m);
            if m == 1 {
                poster.post(2).unwrap();
            }
        })
        .unwrap();
        channel.attach(&worker).unwrap();
        channel.post(1).unwrap();

        worker.run_once_with_timeout(timeout()).unwrap();

        // The re-post lands in the same exhaustive drain.
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn poster_outliving_channel_is_detached() {
        let worker = Worker::default();
        let mut channel = Channel::new(|_: &Poster<u32>, _: u32| {}).unwrap();
        channel.attach(&worker).unwrap();
        let poster = channel.poster();
        assert!(poster.is_attached());

        drop(channel);

        assert!(!poster.is_attached());
        assert_eq!(poster.post(1), Err(PostError::Detached));
        assert!(worker.is_empty());
    }

    mod registration {
        use std::io;

        use mockall::predicate::*;

        use super::*;
        use crate::MockEventp;

        fn channel() -> Channel<u32, impl MessageHandler<u32>, Rc<MockEventp>> {
            Builder::new()
                .build::<u32, _, Rc<MockEventp>>(|_: &Poster<u32>, _: u32| {})
                .unwrap()
        }

        fn expect_add(mock: &mut MockEventp, fd: RawFd) {
            mock.expect_add()
                .withf(move |s| {
                    s.as_fd().as_raw_fd() == fd && s.interest().get() == interest().read()
                })
                .times(1)
                .returning(|_| Ok(()));
        }

        #[test]
        fn attach_registers_read_fd_for_readable() {
            let mut channel = channel();
            let fd = channel.read_fd();

            let mut mock = MockEventp::new();
            expect_add(&mut mock, fd);
            mock.expect_delete().with(eq(fd)).times(1).returning(|_| Ok(()));
            let worker = Rc::new(mock);

            channel.attach(&worker).unwrap();

            assert!(channel.is_attached());
            assert!(channel.poster().is_attached());
            assert!(Rc::ptr_eq(channel.worker().unwrap(), &worker));
            // `delete` is checked when the channel drops.
        }

        #[test]
        fn failed_attach_leaves_channel_detached() {
            let mut channel = channel();

            let mut mock = MockEventp::new();
            mock.expect_add()
                .times(1)
                .returning(|_| Err(io::Error::from_raw_os_error(libc::ENOMEM)));
            mock.expect_delete().never();
            let worker = Rc::new(mock);

            assert!(channel.attach(&worker).is_err());

            assert!(!channel.is_attached());
            assert_eq!(channel.post(1), Err(PostError::Detached));
            assert!(channel.detach().is_none());
        }

        #[test]
        fn reattach_moves_registration() {
            let mut channel = channel();
            let fd = channel.read_fd();
            let mut seq = mockall::Sequence::new();

            let mut first = MockEventp::new();
            let mut second = MockEventp::new();
            first
                .expect_add()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
            first
                .expect_delete()
                .with(eq(fd))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
            second
                .expect_add()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
            second
                .expect_delete()
                .with(eq(fd))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
            let (first, second) = (Rc::new(first), Rc::new(second));

            channel.attach(&first).unwrap();
            channel.attach(&second).unwrap();
            assert!(Rc::ptr_eq(channel.worker().unwrap(), &second));

            let previous = channel.detach().unwrap();
            assert!(Rc::ptr_eq(&previous, &second));
        }

        #[test]
        fn detach_when_detached_touches_nothing() {
            let mut channel = channel();
            assert!(channel.detach().is_none());
            assert!(!channel.is_attached());
        }

        #[test]
        fn failed_delete_still_detaches() {
            let mut channel = channel();
            let fd = channel.read_fd();

            let mut mock = MockEventp::new();
            expect_add(&mut mock, fd);
            mock.expect_delete()
                .times(1)
                .returning(|_| Err(io::Error::from_raw_os_error(libc::ENOENT)));
            let worker = Rc::new(mock);

            channel.attach(&worker).unwrap();
            assert!(channel.detach().is_some());
            assert_eq!(channel.post(1), Err(PostError::Detached));
        }
    }
}
