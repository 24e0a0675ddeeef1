//! Settlement worker pool.
//!
//! RULES:
//!   - Each worker owns its own connection; workers share the keyed locks.
//!   - Orders are pulled from one intake queue, so any worker may settle
//!     any order. Correctness never depends on which one does.
//!   - A worker stops when intake closes or stays idle for the configured
//!     intake timeout.
//!   - An in-memory store cannot be reached from a second connection, so
//!     it is settled on the caller's thread.

use crate::{
    error::EngineResult,
    event::OrderPaid,
    orchestrator::{SettlementOrchestrator, SettlementReport},
};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

pub struct SettlementPool<'o> {
    orchestrator: &'o SettlementOrchestrator,
    workers: usize,
}

impl<'o> SettlementPool<'o> {
    pub fn new(orchestrator: &'o SettlementOrchestrator, workers: usize) -> Self {
        Self {
            orchestrator,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        if self.orchestrator.store().is_shareable() {
            self.workers
        } else {
            1
        }
    }

    /// Settle every event and return the reports in input order.
    pub fn settle_all(&self, events: Vec<OrderPaid>) -> EngineResult<Vec<SettlementReport>> {
        let (intake_tx, intake_rx) = mpsc::channel();
        for item in events.into_iter().enumerate() {
            // The receiver is still alive here.
            let _ = intake_tx.send(item);
        }
        drop(intake_tx);

        let mut done = self.serve(intake_rx)?;
        done.sort_by_key(|(idx, _)| *idx);
        Ok(done.into_iter().map(|(_, report)| report).collect())
    }

    /// Settle events from a live intake until every sender is gone or no
    /// event arrives within the intake timeout. Each report comes back with
    /// the tag it was sent with, in completion order.
    pub fn serve<T: Send>(
        &self,
        intake: Receiver<(T, OrderPaid)>,
    ) -> EngineResult<Vec<(T, SettlementReport)>> {
        let intake = Mutex::new(intake);
        let timeout = self.orchestrator.config().intake_timeout();

        if self.workers() == 1 {
            let mut done = Vec::new();
            work(0, self.orchestrator, &intake, timeout, |tag, report| {
                done.push((tag, report));
                true
            });
            return Ok(done);
        }

        let mut forks = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            forks.push(self.orchestrator.fork()?);
        }
        let (done_tx, done_rx) = mpsc::channel::<(T, SettlementReport)>();

        thread::scope(|scope| {
            for (worker, orchestrator) in forks.into_iter().enumerate() {
                let intake = &intake;
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    work(worker, &orchestrator, intake, timeout, |tag, report| {
                        done_tx.send((tag, report)).is_ok()
                    });
                });
            }
        });
        drop(done_tx);
        Ok(done_rx.into_iter().collect())
    }
}

fn work<T>(
    worker: usize,
    orchestrator: &SettlementOrchestrator,
    intake: &Mutex<Receiver<(T, OrderPaid)>>,
    timeout: Duration,
    mut deliver: impl FnMut(T, SettlementReport) -> bool,
) {
    let mut settled = 0usize;
    loop {
        let next = {
            let rx = intake.lock().unwrap_or_else(PoisonError::into_inner);
            rx.recv_timeout(timeout)
        };
        match next {
            Ok((tag, event)) => {
                let report = orchestrator.settle(&event);
                settled += 1;
                if !deliver(tag, report) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                log::info!("worker {worker} idle for {timeout:?}, stopping");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    log::debug!("worker {worker} done after {settled} orders");
}
