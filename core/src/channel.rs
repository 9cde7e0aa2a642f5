//! [`async_channel`] re-exports and shims

pub use async_channel::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError<T> {
    #[error(transparent)]
    SendError(#[from] SendError<T>),
    #[error(transparent)]
    RecvError(#[from] RecvError),
}

/// Creates a oneshot channel (bounded channel with a limit of 1 message)
pub fn oneshot<T>() -> (Sender<T>, Receiver<T>) {
    bounded(1)
}

/// [`Channel`] struct that combines [`async_channel::Sender`] and
/// [`async_channel::Receiver`] into a single struct with `sender`
/// and `receiver` members.
#[derive(Debug, Clone)]
pub struct Channel<T = ()> {
    pub sender: Sender<T>,
    pub receiver: Receiver<T>,
}

impl<T> Channel<T> {
    pub fn unbounded() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn bounded(cap: usize) -> Self {
        let (sender, receiver) = bounded(cap);
        Self { sender, receiver }
    }

    pub fn oneshot() -> Self {
        let (sender, receiver) = bounded(1);
        Self { sender, receiver }
    }

    pub async fn recv(&self) -> Result<T, RecvError> {
        self.receiver.recv().await
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.receiver.try_recv()
    }

    pub async fn send(&self, msg: T) -> Result<(), SendError<T>> {
        self.sender.send(msg).await
    }

    pub fn try_send(&self, msg: T) -> Result<(), TrySendError<T>> {
        self.sender.try_send(msg)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Pair of [`Channel`] structs meant to function in a request/response
/// fashion, typically used for stop/join signaling where the request
/// channel carries the stop signal and the response channel carries the
/// completion acknowledgement.
#[derive(Debug, Clone)]
pub struct DuplexChannel<T = (), R = ()> {
    pub request: Channel<T>,
    pub response: Channel<R>,
}

impl<T, R> DuplexChannel<T, R> {
    pub fn unbounded() -> Self {
        Self {
            request: Channel::unbounded(),
            response: Channel::unbounded(),
        }
    }

    pub fn oneshot() -> Self {
        Self {
            request: Channel::oneshot(),
            response: Channel::oneshot(),
        }
    }

    /// Post the request message and block until the response arrives.
    pub async fn signal(&self, msg: T) -> Result<R, ChannelError<T>> {
        self.request.sender.send(msg).await?;
        self.response
            .receiver
            .recv()
            .await
            .map_err(|err| err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oneshot_is_bounded_to_one() {
        let channel = Channel::<u32>::oneshot();
        channel.try_send(1).unwrap();
        assert!(channel.try_send(2).is_err());
        assert_eq!(channel.try_recv().unwrap(), 1);
    }

    #[test]
    fn channel_len() {
        let channel = Channel::<u32>::unbounded();
        assert!(channel.is_empty());
        channel.try_send(7).unwrap();
        assert_eq!(channel.len(), 1);
    }
}
