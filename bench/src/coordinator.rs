//! Synchronized start: readiness join, then one-shot trigger release

use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("only {ready} of {expected} actors became ready")]
    NotReady { ready: usize, expected: usize },

    #[error("trigger was dropped without firing")]
    TriggerDropped,
}

/// Signals one actor's readiness; consumed on use
#[derive(Debug)]
pub struct ReadySignal {
    tx: mpsc::UnboundedSender<()>,
}

impl ReadySignal {
    pub fn signal(self) {
        let _ = self.tx.send(());
    }
}

/// Orchestrator side of the readiness join
#[derive(Debug)]
pub struct ReadinessJoin {
    expected: usize,
    rx: mpsc::UnboundedReceiver<()>,
}

/// Create a join expecting `expected` actors and one signal per actor
pub fn readiness_join(expected: usize) -> (ReadinessJoin, Vec<ReadySignal>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let signals = (0..expected)
        .map(|_| ReadySignal { tx: tx.clone() })
        .collect();
    (ReadinessJoin { expected, rx }, signals)
}

impl ReadinessJoin {
    /// Block until every actor signalled; returns the completion instant.
    ///
    /// Fails as soon as all outstanding signals were dropped unused, which
    /// happens when an actor exits during setup.
    pub async fn wait(mut self) -> Result<Instant, StartError> {
        let mut ready = 0;
        while ready < self.expected {
            match self.rx.recv().await {
                Some(()) => ready += 1,
                None => {
                    return Err(StartError::NotReady {
                        ready,
                        expected: self.expected,
                    });
                }
            }
        }
        Ok(Instant::now())
    }
}

/// Fires once, releasing every [`TriggerWaiter`]
#[derive(Debug)]
pub struct Trigger {
    tx: watch::Sender<bool>,
}

/// Publisher side of the trigger; observes the fire exactly once
#[derive(Debug, Clone)]
pub struct TriggerWaiter {
    rx: watch::Receiver<bool>,
}

pub fn trigger() -> (Trigger, TriggerWaiter) {
    let (tx, rx) = watch::channel(false);
    (Trigger { tx }, TriggerWaiter { rx })
}

impl Trigger {
    /// Release all waiters and return the fire instant
    pub fn fire(self) -> Instant {
        let fired_at = Instant::now();
        self.tx.send_replace(true);
        fired_at
    }
}

impl TriggerWaiter {
    pub async fn wait(mut self) -> Result<(), StartError> {
        self.rx
            .wait_for(|fired| *fired)
            .await
            .map(|_| ())
            .map_err(|_| StartError::TriggerDropped)
    }
}
