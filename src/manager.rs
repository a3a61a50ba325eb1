use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::select;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::buffers::io::{InputBuffer, OutputBuffer};
use crate::callback::{DeliveryCallback, DeliveryStatus};
use crate::config::ChannelConfig;
use crate::error::{NetworkError, Result};
use crate::ping::PingMonitor;
use crate::receiver::ReceiverLoop;
use crate::sender::SenderLoop;
use crate::transport::Transport;

pub(crate) struct InputChannel {
    pub buffer: Mutex<InputBuffer>,
}

pub(crate) struct OutputChannel {
    pub buffer: Mutex<OutputBuffer>,
    /// Signaled for every payload delivered into the buffer; blocking reads
    /// wait on it.
    pub data_ready: Notify,
}

/// Everything the two worker loops and the API share. The manager is the sole
/// owner; nothing in here leaks past its API.
pub(crate) struct Core {
    /// Input channels in configuration order - the sender's round-robin order.
    pub inputs: Vec<Arc<InputChannel>>,
    pub input_map: FxHashMap<u16, Arc<InputChannel>>,
    pub output_map: FxHashMap<u16, Arc<OutputChannel>>,
    pub transport: Arc<dyn Transport>,
    pub callback: Arc<dyn DeliveryCallback>,
    pub ping: Mutex<PingMonitor>,
    /// `true` while the engine is running. Doubles as the broadcast that
    /// wakes blocked readers on shutdown.
    pub run_tx: watch::Sender<bool>,
    /// Wakes the sender loop out of its nap when new data is pushed.
    pub sender_wake: Notify,
}

impl Core {
    pub fn new(
        transport: Arc<dyn Transport>,
        callback: Arc<dyn DeliveryCallback>,
        input_configs: Vec<ChannelConfig>,
        output_configs: Vec<ChannelConfig>,
        ping_interval: Option<Duration>,
    ) -> Result<Arc<Core>> {
        let mut inputs = Vec::with_capacity(input_configs.len());
        let mut input_map = FxHashMap::default();
        for config in input_configs {
            config.validate()?;
            let id = config.id;
            let chan = Arc::new(InputChannel {
                buffer: Mutex::new(InputBuffer::new(config)),
            });
            if input_map.insert(id, chan.clone()).is_some() {
                return Err(NetworkError::IdCollision(id));
            }
            inputs.push(chan);
        }

        let mut output_map = FxHashMap::default();
        for config in output_configs {
            config.validate()?;
            let id = config.id;
            let chan = Arc::new(OutputChannel {
                buffer: Mutex::new(OutputBuffer::new(config)),
                data_ready: Notify::new(),
            });
            if output_map.insert(id, chan).is_some() {
                return Err(NetworkError::IdCollision(id));
            }
        }

        let (run_tx, _) = watch::channel(false);

        Ok(Arc::new(Core {
            inputs,
            input_map,
            output_map,
            transport,
            callback,
            ping: Mutex::new(PingMonitor::new(ping_interval)),
            run_tx,
            sender_wake: Notify::new(),
        }))
    }

    pub fn is_running(&self) -> bool {
        *self.run_tx.borrow()
    }

    /// Flip the run flag off and wake everyone who might be napping on it.
    pub fn shutdown(&self) {
        let _ = self.run_tx.send(false);
        self.sender_wake.notify_one();
    }

    /// Empty one input channel, emitting exactly one `Cancel` per discarded
    /// cell (including the one awaiting an ack - it is still queued).
    pub async fn flush_input_channel(&self, chan: &InputChannel) {
        let (id, cells) = {
            let mut buf = chan.buffer.lock().await;
            (buf.config.id, buf.clear())
        };
        for cell in cells {
            self.callback.on_outcome(id, &cell.payload, cell.tag, DeliveryStatus::Cancel);
        }
    }

    pub async fn flush_all_inputs(&self) {
        for chan in &self.inputs {
            self.flush_input_channel(chan).await;
        }
    }
}

/// The engine's public face: owns the channel tables and the two worker
/// tasks, and mediates every push, read and flush. Shareable across
/// application tasks; push and read may run concurrently with each other and
/// with stop.
///
/// The lifecycle is single-shot: `start` spawns the workers, `stop` ends them
/// for good. Push/read calls made before `start` or after `stop` fail with
/// `NotInitialized`.
pub struct Manager {
    core: Arc<Core>,
    started: std::sync::atomic::AtomicBool,
    worker_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Manager {
    /// Validates the channel set and builds all buffers. `ping_interval`
    /// `None` disables liveness probing, `Some(Duration::ZERO)` picks the
    /// default interval.
    pub fn new(
        transport: Arc<dyn Transport>,
        callback: Arc<dyn DeliveryCallback>,
        input_configs: Vec<ChannelConfig>,
        output_configs: Vec<ChannelConfig>,
        ping_interval: Option<Duration>,
    ) -> Result<Manager> {
        let core = Core::new(transport, callback, input_configs, output_configs, ping_interval)?;
        Ok(Manager {
            core,
            started: std::sync::atomic::AtomicBool::new(false),
            worker_tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Spawn the sender and receiver workers. Must be called from within a
    /// tokio runtime. Calling it again (including after `stop`) is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, std::sync::atomic::Ordering::SeqCst) {
            debug!("manager already started");
            return;
        }
        let mut tasks = self.worker_tasks.lock().expect("worker task list poisoned");

        let _ = self.core.run_tx.send(true);
        tasks.push(tokio::spawn(
            SenderLoop::new(self.core.clone(), self.core.run_tx.subscribe()).run(),
        ));
        tasks.push(tokio::spawn(
            ReceiverLoop::new(self.core.clone(), self.core.run_tx.subscribe()).run(),
        ));
    }

    /// Signal both workers to stop, wake all blocked readers and wait for the
    /// workers to finish. Both observe the flag within one poll interval.
    pub async fn stop(&self) {
        self.core.shutdown();

        let tasks = {
            let mut tasks = self.worker_tasks.lock().expect("worker task list poisoned");
            std::mem::take(&mut *tasks)
        };
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Enqueue a payload on an input channel. The tag is opaque and comes
    /// back with every delivery outcome for this cell.
    pub async fn push(&self, channel_id: u16, payload: Bytes, tag: u64) -> Result<()> {
        self.ensure_running()?;
        let chan = self.core.input_map.get(&channel_id)
            .ok_or(NetworkError::IdUnknown(channel_id))?;

        let evicted = chan.buffer.lock().await.push(payload, tag, Instant::now())?;
        if let Some(cell) = evicted {
            self.core.callback.on_outcome(channel_id, &cell.payload, cell.tag, DeliveryStatus::Free);
        }

        self.core.sender_wake.notify_one();
        Ok(())
    }

    /// Read the oldest received payload of an output channel, waiting until
    /// one arrives or the manager stops.
    pub async fn read(&self, channel_id: u16) -> Result<Bytes> {
        let chan = self.output_channel(channel_id)?;
        let mut run = self.core.run_tx.subscribe();

        loop {
            if !*run.borrow() {
                return Err(NetworkError::NotInitialized);
            }

            let notified = chan.data_ready.notified();
            if let Some(payload) = chan.buffer.lock().await.pop_front() {
                return Ok(payload);
            }

            select! {
                _ = notified => {}
                _ = run.changed() => {}
            }
        }
    }

    /// Non-blocking read.
    pub async fn try_read(&self, channel_id: u16) -> Result<Bytes> {
        let chan = self.output_channel(channel_id)?;
        let result = chan.buffer.lock().await.pop_front().ok_or(NetworkError::BufferEmpty);
        result
    }

    /// Read with an upper bound on the wait.
    pub async fn read_with_timeout(&self, channel_id: u16, timeout: Duration) -> Result<Bytes> {
        match time::timeout(timeout, self.read(channel_id)).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout),
        }
    }

    /// Empty every input channel, dropping outstanding ack state and issuing
    /// `Cancel` for each discarded cell.
    pub async fn flush(&self) -> Result<()> {
        self.ensure_running()?;
        self.core.flush_all_inputs().await;
        Ok(())
    }

    pub async fn flush_input(&self, channel_id: u16) -> Result<()> {
        self.ensure_running()?;
        let chan = self.core.input_map.get(&channel_id)
            .ok_or(NetworkError::IdUnknown(channel_id))?;
        self.core.flush_input_channel(chan).await;
        Ok(())
    }

    /// Discard everything received but not yet read on an output channel.
    pub async fn flush_output(&self, channel_id: u16) -> Result<()> {
        self.ensure_running()?;
        let chan = self.output_channel(channel_id)?;
        chan.buffer.lock().await.clear();
        Ok(())
    }

    /// Estimated link latency from keepalive round-trips; `None` until the
    /// first probe echo arrived (or after probes started going unanswered).
    pub async fn estimated_latency(&self) -> Option<Duration> {
        self.core.ping.lock().await.estimated_latency(Instant::now())
    }

    /// When the peer was last heard from via keepalive traffic. Advisory
    /// input for a connection-health watcher; the engine itself never gives
    /// up on a silent peer.
    pub async fn peer_last_seen(&self) -> Option<Instant> {
        self.core.ping.lock().await.last_seen_peer()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.core.is_running() {
            Ok(())
        }
        else {
            Err(NetworkError::NotInitialized)
        }
    }

    fn output_channel(&self, channel_id: u16) -> Result<Arc<OutputChannel>> {
        self.ensure_running()?;
        self.core.output_map.get(&channel_id)
            .cloned()
            .ok_or(NetworkError::IdUnknown(channel_id))
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        // stop the workers even if the application never called stop()
        self.core.shutdown();
    }
}
