use nix::errno::Errno;

/// Why a message was not accepted by a channel.
///
/// Every variant means the message was *not* queued. Building one never
/// allocates, so the error is safe to produce from a signal handler; formatting
/// it is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PostError {
    #[error("channel is not attached to a worker")]
    Detached,

    #[error("channel is full")]
    Full,

    #[error("short write to channel: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("write to channel failed: {0}")]
    Os(Errno),
}

impl From<Errno> for PostError {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::EAGAIN => PostError::Full,
            e => PostError::Os(e),
        }
    }
}
