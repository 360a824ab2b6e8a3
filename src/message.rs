use std::marker::PhantomData;
use std::mem::size_of;

use crate::pipe::PIPE_BUF;

/// A fixed-size record that a [`Channel`](crate::Channel) moves between
/// threads by copying its bytes through a pipe.
///
/// # Safety
///
/// Implementors must be plain data: no references, no pointers to owned
/// memory, no padding bytes. The bytes of any valid value, copied verbatim,
/// must form a valid value again. `#[repr(C)]` structs of integers laid out
/// without gaps are the usual shape.
///
/// The size must be between 1 and [`PIPE_BUF`] bytes; this is checked at
/// compile time when a channel for the type is built.
pub unsafe trait Message: Copy + Send + 'static {}

macro_rules! impl_message {
    ($($t:ty),* $(,)?) => {
        $(unsafe impl Message for $t {})*
    };
}

impl_message!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

unsafe impl<M: Message, const N: usize> Message for [M; N] {}

pub(crate) struct FrameSize<M>(PhantomData<M>);

impl<M: Message> FrameSize<M> {
    pub(crate) const CHECKED: usize = {
        assert!(size_of::<M>() > 0, "zero-sized messages are not supported");
        assert!(
            size_of::<M>() <= PIPE_BUF,
            "message does not fit in one atomic pipe write"
        );
        size_of::<M>()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    #[repr(C)]
    struct Ping {
        id: u32,
        arg: u32,
    }

    unsafe impl Message for Ping {}

    #[test]
    fn frame_size_is_the_type_size() {
        assert_eq!(FrameSize::<Ping>::CHECKED, 8);
        assert_eq!(FrameSize::<[u8; 4096]>::CHECKED, 4096);
    }
}
