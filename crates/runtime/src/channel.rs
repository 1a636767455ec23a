use ctxstream_common::{Error, Fragment, Result};
use tokio::sync::mpsc;
use tracing::warn;

/// Create the fragment channel for one generation request.
///
/// `None` gives an unbounded queue. `Some(n)` caps the queue at `n` fragments; a full
/// queue suspends the producer until the consumer catches up or goes away.
pub fn fragment_channel(capacity: Option<usize>) -> (FragmentSender, FragmentReceiver) {
    match capacity {
        Some(n) => {
            let (tx, rx) = mpsc::channel(n.max(1));
            (
                FragmentSender { inner: SenderKind::Bounded(tx) },
                FragmentReceiver { inner: ReceiverKind::Bounded(rx), stopped: false },
            )
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                FragmentSender { inner: SenderKind::Unbounded(tx) },
                FragmentReceiver { inner: ReceiverKind::Unbounded(rx), stopped: false },
            )
        }
    }
}

#[derive(Clone)]
enum SenderKind {
    Unbounded(mpsc::UnboundedSender<Fragment>),
    Bounded(mpsc::Sender<Fragment>),
}

enum ReceiverKind {
    Unbounded(mpsc::UnboundedReceiver<Fragment>),
    Bounded(mpsc::Receiver<Fragment>),
}

/// Producer half, held by the generation worker
#[derive(Clone)]
pub struct FragmentSender {
    inner: SenderKind,
}

impl FragmentSender {
    /// Append a fragment from async context
    pub async fn put(&self, fragment: Fragment) -> Result<()> {
        match &self.inner {
            SenderKind::Unbounded(tx) => tx.send(fragment).map_err(|_| Error::ChannelClosed),
            SenderKind::Bounded(tx) => tx.send(fragment).await.map_err(|_| Error::ChannelClosed),
        }
    }

    /// Append a fragment from a blocking worker thread.
    ///
    /// Must not be called from inside the async runtime.
    pub fn blocking_put(&self, fragment: Fragment) -> Result<()> {
        match &self.inner {
            SenderKind::Unbounded(tx) => tx.send(fragment).map_err(|_| Error::ChannelClosed),
            SenderKind::Bounded(tx) => tx.blocking_send(fragment).map_err(|_| Error::ChannelClosed),
        }
    }

    /// True once the consumer has dropped its half
    pub fn is_closed(&self) -> bool {
        match &self.inner {
            SenderKind::Unbounded(tx) => tx.is_closed(),
            SenderKind::Bounded(tx) => tx.is_closed(),
        }
    }
}

/// Consumer half, held by exactly one streaming consumer
pub struct FragmentReceiver {
    inner: ReceiverKind,
    stopped: bool,
}

impl FragmentReceiver {
    /// Remove the next fragment, waiting until one is available.
    ///
    /// Returns `Stop` if every producer went away without sending one. Once `Stop`
    /// has been returned the channel is closed and every later call returns `Stop`.
    pub async fn get(&mut self) -> Fragment {
        if self.stopped {
            return Fragment::Stop;
        }

        let next = match &mut self.inner {
            ReceiverKind::Unbounded(rx) => rx.recv().await,
            ReceiverKind::Bounded(rx) => rx.recv().await,
        };

        let fragment = next.unwrap_or_else(|| {
            warn!("Fragment channel closed without a stop marker");
            Fragment::Stop
        });

        if fragment.is_stop() {
            self.stopped = true;
            match &mut self.inner {
                ReceiverKind::Unbounded(rx) => rx.close(),
                ReceiverKind::Bounded(rx) => rx.close(),
            }
        }

        fragment
    }
}
