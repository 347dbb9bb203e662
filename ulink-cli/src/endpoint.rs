//! Live transfer endpoint over a TCP link
//!
//! Ties a link engine, a transfer sender or receiver, two tickers and a
//! socket reader thread together. All entry points go through one mutex so
//! the engine and the transfer state machine never run concurrently.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use ulink_io::{MonotonicClock, StreamSocket, Ticker, TickerHandle};
use ulink_protocol::{Link, LinkConfig, LinkEngine, LinkStats, PacketHandler};
use ulink_transfer::{TransferReceiver, TransferSender, TransferStatus};

/// Transfer state machine driven by its own timer
pub trait TransferEndpoint: PacketHandler + Send + 'static {
    fn tick(&mut self, link: &mut dyn Link);
}

impl TransferEndpoint for TransferSender<TickerHandle> {
    fn tick(&mut self, link: &mut dyn Link) {
        TransferSender::tick(self, link);
    }
}

impl TransferEndpoint for TransferReceiver<TickerHandle> {
    fn tick(&mut self, link: &mut dyn Link) {
        TransferReceiver::tick(self, link);
    }
}

/// Events delivered to the main thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The transfer ended with this status
    Outcome(TransferStatus),
    /// The peer closed the connection
    Closed,
}

/// Engine and transfer handler sharing one lock
pub struct Endpoint<H> {
    pub engine: LinkEngine<StreamSocket, TickerHandle>,
    pub handler: H,
}

impl<H: TransferEndpoint> Endpoint<H> {
    fn link_tick(&mut self) {
        self.engine.tick(&mut self.handler);
    }

    fn transfer_tick(&mut self) {
        self.handler.tick(&mut self.engine);
    }

    fn receive(&mut self, bytes: &[u8]) {
        self.engine.receive(bytes, &mut self.handler);
    }
}

type Slot<H> = Arc<Mutex<Option<Endpoint<H>>>>;

/// A running endpoint
pub struct Running<H> {
    slot: Slot<H>,
    events: Receiver<Event>,
    _link_ticker: Ticker,
    _transfer_ticker: Ticker,
    reader: Option<JoinHandle<()>>,
    socket: StreamSocket,
}

/// Start an endpoint on `socket`
///
/// `make_handler` gets the transfer timer and a channel sender for its
/// status listener.
pub fn spawn<H, F>(socket: StreamSocket, config: LinkConfig, make_handler: F) -> anyhow::Result<Running<H>>
where
    H: TransferEndpoint,
    F: FnOnce(TickerHandle, Sender<Event>) -> H,
{
    let slot: Slot<H> = Arc::new(Mutex::new(None));
    let (tx, events) = channel::unbounded();
    let clock = MonotonicClock::new();

    let link_slot = slot.clone();
    let link_ticker = Ticker::spawn("ulink-link", clock, move || {
        if let Some(endpoint) = link_slot.lock().as_mut() {
            endpoint.link_tick();
        }
    })?;
    let transfer_slot = slot.clone();
    let transfer_ticker = Ticker::spawn("ulink-transfer", clock, move || {
        if let Some(endpoint) = transfer_slot.lock().as_mut() {
            endpoint.transfer_tick();
        }
    })?;

    let engine = LinkEngine::new(config, socket.try_clone()?, link_ticker.handle());
    let handler = make_handler(transfer_ticker.handle(), tx.clone());
    *slot.lock() = Some(Endpoint { engine, handler });

    let read_socket = socket.try_clone()?;
    let read_slot = slot.clone();
    let reader = thread::Builder::new()
        .name("ulink-reader".to_string())
        .spawn(move || {
            let res = read_socket.read_loop(|bytes| {
                if let Some(endpoint) = read_slot.lock().as_mut() {
                    endpoint.receive(bytes);
                }
            });
            if let Err(e) = res {
                tracing::warn!("Link read failed: {}", e);
            }
            let _ = tx.send(Event::Closed);
        })?;

    Ok(Running {
        slot,
        events,
        _link_ticker: link_ticker,
        _transfer_ticker: transfer_ticker,
        reader: Some(reader),
        socket,
    })
}

impl<H: TransferEndpoint> Running<H> {
    /// Run `f` with the endpoint locked
    pub fn with<R>(&self, f: impl FnOnce(&mut Endpoint<H>) -> R) -> Option<R> {
        self.slot.lock().as_mut().map(f)
    }

    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    pub fn link_stats(&self) -> LinkStats {
        self.with(|ep| ep.engine.stats().clone()).unwrap_or_default()
    }

    /// Close the connection and stop all threads
    pub fn close(mut self) {
        if let Err(e) = self.socket.shutdown() {
            tracing::debug!("Shutdown: {}", e);
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.slot.lock().take();
    }
}
