use std::fmt::Debug;

use tokio::sync::mpsc;
use tracing::Instrument;

use super::state::EngineState;

/// A command that the engine loop applies to its state.
///
/// Commands are applied one at a time, in the order they were posted, so
/// each of them sees the transcript exactly as the previous one left it.
pub(crate) trait Command: Send + Debug + 'static {
    fn apply(self: Box<Self>, state: &mut EngineState, mailbox: &Mailbox);
}

/// The engine loop stopped, which only happens when it panicked.
#[derive(Debug)]
pub(crate) struct EngineStopped;

/// The sending side of the engine loop.
#[derive(Clone)]
pub(crate) struct Mailbox {
    cmd_tx: mpsc::UnboundedSender<Box<dyn Command>>,
}

impl Mailbox {
    /// Creates a mailbox whose engine is already gone, posting to it
    /// always fails.
    fn detached() -> Self {
        let (cmd_tx, _) = mpsc::unbounded_channel();
        Self { cmd_tx }
    }

    /// Returns `true` if commands posted here will never be applied.
    #[inline]
    pub fn is_detached(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    #[inline]
    pub fn post<C: Command>(&self, cmd: C) -> Result<(), EngineStopped> {
        self.cmd_tx.send(Box::new(cmd)).map_err(|_| EngineStopped)
    }
}

/// Spawns the engine loop owning `state` onto the current runtime.
///
/// The loop ends once every [`Mailbox`] is dropped and the queued
/// commands are applied. Replies still in flight hold a mailbox, so the
/// last of them is applied even if the engine handles are gone.
pub(crate) fn spawn_engine(state: EngineState) -> Mailbox {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let weak_tx = cmd_tx.downgrade();
    tokio::spawn(
        run_engine(state, cmd_rx, weak_tx).instrument(debug_span!("engine")),
    );
    Mailbox { cmd_tx }
}

async fn run_engine(
    mut state: EngineState,
    mut cmd_rx: mpsc::UnboundedReceiver<Box<dyn Command>>,
    weak_tx: mpsc::WeakUnboundedSender<Box<dyn Command>>,
) {
    debug!("started");
    while let Some(cmd) = cmd_rx.recv().await {
        trace!("received command: {cmd:?}");

        let mailbox = match weak_tx.upgrade() {
            Some(cmd_tx) => Mailbox { cmd_tx },
            None => {
                debug!("last mailbox has been dropped, draining commands");
                Mailbox::detached()
            }
        };

        let apply_span = trace_span!("apply cmd");
        apply_span.in_scope(|| {
            cmd.apply(&mut state, &mailbox);
            trace!("finished");
        });
    }
    debug!("will terminate");
}
