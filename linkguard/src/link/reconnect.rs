use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::LinkCommand;
use crate::tracing::prelude::*;

/// Task that waits out the backoff after a link fault and then asks the
/// state machine to connect again.
///
/// Runs independently of the transport pump so a long backoff never delays
/// byte delivery.
pub struct ReconnectDriver {
    delays: mpsc::Receiver<Duration>,
    commands: mpsc::Sender<LinkCommand>,
}

impl ReconnectDriver {
    pub(super) fn new(
        delays: mpsc::Receiver<Duration>,
        commands: mpsc::Sender<LinkCommand>,
    ) -> Self {
        Self { delays, commands }
    }

    pub async fn run(mut self, running: CancellationToken) {
        trace!("Reconnect driver started.");

        loop {
            let delay = tokio::select! {
                _ = running.cancelled() => break,
                delay = self.delays.recv() => match delay {
                    Some(delay) => delay,
                    None => break,
                },
            };

            info!(delay_secs = delay.as_secs(), "Link down, reconnecting after backoff");
            tokio::select! {
                _ = running.cancelled() => break,
                _ = time::sleep(delay) => {}
            }

            if self.commands.send(LinkCommand::Connect).await.is_err() {
                break;
            }
        }

        trace!("Reconnect driver stopped.");
    }
}
