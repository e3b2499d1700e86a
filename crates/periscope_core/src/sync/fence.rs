//! Promise/future pair over a bounded crossbeam channel.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::error::FenceError;

/// Observed state of a [`GpuFuture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The GPU has not signalled yet.
    Pending,
    /// The value is available; `wait` returns immediately.
    Signalled,
    /// The producer was dropped without signalling.
    Abandoned,
}

/// Producer half, held by whoever completes the GPU work.
#[derive(Debug)]
pub struct GpuPromise<T> {
    tx: Sender<T>,
}

impl<T> GpuPromise<T> {
    /// Signals the fence with `value`.
    ///
    /// Returns `false` if the consumer already went away.
    pub fn signal(self, value: T) -> bool {
        self.tx.send(value).is_ok()
    }
}

/// Consumer half: a value the GPU will produce later.
#[derive(Debug)]
pub struct GpuFuture<T> {
    rx: Receiver<T>,
    value: Option<T>,
    consumed: bool,
}

/// Creates a connected promise/future pair.
#[must_use]
pub fn gpu_fence<T>() -> (GpuPromise<T>, GpuFuture<T>) {
    let (tx, rx) = bounded(1);
    (
        GpuPromise { tx },
        GpuFuture {
            rx,
            value: None,
            consumed: false,
        },
    )
}

impl<T> GpuFuture<T> {
    /// A future that is already signalled.
    #[must_use]
    pub fn ready(value: T) -> Self {
        let (_, rx) = bounded(1);
        Self {
            rx,
            value: Some(value),
            consumed: false,
        }
    }

    /// Non-blocking status check.
    pub fn poll(&mut self) -> FenceStatus {
        if self.value.is_some() {
            return FenceStatus::Signalled;
        }
        if self.consumed {
            return FenceStatus::Abandoned;
        }
        match self.rx.try_recv() {
            Ok(value) => {
                self.value = Some(value);
                FenceStatus::Signalled
            }
            Err(TryRecvError::Empty) => FenceStatus::Pending,
            Err(TryRecvError::Disconnected) => FenceStatus::Abandoned,
        }
    }

    /// Blocks until the fence is signalled and takes the value.
    ///
    /// # Errors
    ///
    /// [`FenceError::Abandoned`] if the promise was dropped unsignalled,
    /// [`FenceError::Consumed`] if an earlier `wait` already took the value.
    pub fn wait(&mut self) -> Result<T, FenceError> {
        if let Some(value) = self.value.take() {
            self.consumed = true;
            return Ok(value);
        }
        if self.consumed {
            return Err(FenceError::Consumed);
        }
        let value = self.rx.recv().map_err(|_| FenceError::Abandoned)?;
        self.consumed = true;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_poll_then_wait() {
        let (promise, mut future) = gpu_fence::<u32>();
        assert_eq!(future.poll(), FenceStatus::Pending);

        assert!(promise.signal(7));
        assert_eq!(future.poll(), FenceStatus::Signalled);
        assert_eq!(future.wait(), Ok(7));
        assert_eq!(future.wait(), Err(FenceError::Consumed));
    }

    #[test]
    fn test_wait_blocks_until_signal() {
        let (promise, mut future) = gpu_fence::<Vec<u8>>();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.signal(vec![1, 0, 1]);
        });

        assert_eq!(future.wait(), Ok(vec![1, 0, 1]));
        producer.join().unwrap();
    }

    #[test]
    fn test_dropped_promise_is_abandoned() {
        let (promise, mut future) = gpu_fence::<u32>();
        drop(promise);
        assert_eq!(future.poll(), FenceStatus::Abandoned);
        assert_eq!(future.wait(), Err(FenceError::Abandoned));
    }

    #[test]
    fn test_ready_future() {
        let mut future = GpuFuture::ready(());
        assert_eq!(future.poll(), FenceStatus::Signalled);
        assert!(future.wait().is_ok());
    }
}
