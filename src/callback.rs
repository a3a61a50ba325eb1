use bytes::Bytes;
#[cfg(test)] use mockall::automock;

/// What happened to a cell. Passed to the application's delivery-outcome
/// callback together with the cell's payload and tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeliveryStatus {
    /// The cell was handed to the transport.
    Sent,
    /// The peer acknowledged the cell.
    AckReceived,
    /// No acknowledgement arrived within the channel's ack timeout. The
    /// callback's return value decides whether to retry or give up.
    Timeout,
    /// The cell was discarded without delivery (give-up, retry exhaustion,
    /// flush).
    Cancel,
    /// The cell was evicted by an overwriting push; its payload can be
    /// reused or released.
    Free,
}

/// The application's decision in response to a delivery outcome.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallbackAction {
    /// Take the default path for the status. Not valid for `Timeout`, which
    /// requires an explicit decision.
    Default,
    /// `AckReceived`: reset the retry counter and resend immediately.
    /// `Timeout`: spend one retry and resend.
    Retry,
    /// Drop the cell and move on to the next queued one.
    DataPop,
    /// Flush every input channel.
    Flush,
}

/// Delivery-outcome callback, supplied once at manager construction and
/// invoked from the worker loops for every cell outcome.
///
/// The callback runs on the engine's worker tasks while channel state is
/// locked; it must return quickly and must not call back into the manager.
#[cfg_attr(test, automock)]
pub trait DeliveryCallback: Send + Sync + 'static {
    fn on_outcome(
        &self,
        channel_id: u16,
        payload: &Bytes,
        tag: u64,
        status: DeliveryStatus,
    ) -> CallbackAction;
}

impl<F> DeliveryCallback for F
where
    F: Fn(u16, &Bytes, u64, DeliveryStatus) -> CallbackAction + Send + Sync + 'static,
{
    fn on_outcome(&self, channel_id: u16, payload: &Bytes, tag: u64, status: DeliveryStatus) -> CallbackAction {
        self(channel_id, payload, tag, status)
    }
}
