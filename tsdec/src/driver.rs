//! Event-loop integration: a tokio task owning a descrambler.
//!
//! The task serializes input arrivals, control commands and deadline
//! firings onto the pipe, so the core never sees concurrent mutation. It
//! exits when the input channel closes, flushing buffered items first.

use std::time::Duration;

use log::debug;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use crate::descrambler::Descrambler;
use crate::error::ControlError;
use crate::flow::FlowDef;
use crate::types::StreamItem;

/// Capacity of the control command channel.
const CONTROL_CAPACITY: usize = 16;

/// Control commands accepted by a running driver.
pub enum Control {
    SetKey {
        even: String,
        odd: String,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
    SetFlowDef {
        flow: FlowDef,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
    AddPid(u16),
    DelPid(u16),
}

/// Handle for sending control commands to a running driver.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<Control>,
}

impl ControlHandle {
    pub async fn set_key(&self, even: &str, odd: &str) -> Result<(), ControlError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Control::SetKey {
                even: even.to_string(),
                odd: odd.to_string(),
                reply,
            })
            .await
            .map_err(|_| ControlError::BackendUnavailable)?;
        rx.await.map_err(|_| ControlError::BackendUnavailable)?
    }

    pub async fn set_flow_def(&self, flow: FlowDef) -> Result<(), ControlError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Control::SetFlowDef { flow, reply })
            .await
            .map_err(|_| ControlError::BackendUnavailable)?;
        rx.await.map_err(|_| ControlError::BackendUnavailable)?
    }

    pub async fn add_pid(&self, pid: u16) -> Result<(), ControlError> {
        self.tx
            .send(Control::AddPid(pid))
            .await
            .map_err(|_| ControlError::BackendUnavailable)
    }

    pub async fn del_pid(&self, pid: u16) -> Result<(), ControlError> {
        self.tx
            .send(Control::DelPid(pid))
            .await
            .map_err(|_| ControlError::BackendUnavailable)
    }
}

/// Spawn a driver task for the pipe. Returns the control handle and the
/// task handle.
pub fn spawn(
    pipe: Descrambler,
    input: mpsc::Receiver<StreamItem>,
    output: mpsc::Sender<StreamItem>,
) -> (ControlHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CONTROL_CAPACITY);
    let task = tokio::spawn(run(pipe, input, rx, output));
    (ControlHandle { tx }, task)
}

/// Drive a descrambler from an input channel to an output channel,
/// realizing deadline flushes on the runtime timer.
pub async fn run(
    mut pipe: Descrambler,
    mut input: mpsc::Receiver<StreamItem>,
    mut control: mpsc::Receiver<Control>,
    output: mpsc::Sender<StreamItem>,
) {
    let mut control_open = true;
    loop {
        let deadline = pipe.next_deadline();
        // A disabled select branch still evaluates its expression.
        let sleep_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        let emitted = tokio::select! {
            item = input.recv() => match item {
                Some(item) => pipe.push(item),
                None => {
                    for item in pipe.flush() {
                        if output.send(item).await.is_err() {
                            return;
                        }
                    }
                    debug!("input closed, driver exiting");
                    return;
                }
            },
            command = control.recv(), if control_open => match command {
                Some(command) => handle_control(&mut pipe, command),
                None => {
                    control_open = false;
                    Vec::new()
                }
            },
            _ = sleep_until(sleep_at), if deadline.is_some() => {
                pipe.on_deadline(Instant::now())
            }
        };

        for item in emitted {
            if output.send(item).await.is_err() {
                return;
            }
        }
    }
}

fn handle_control(pipe: &mut Descrambler, command: Control) -> Vec<StreamItem> {
    match command {
        Control::SetKey { even, odd, reply } => {
            let _ = reply.send(pipe.set_key(&even, &odd));
            Vec::new()
        }
        Control::SetFlowDef { flow, reply } => match pipe.set_flow_def(flow) {
            Ok(items) => {
                let _ = reply.send(Ok(()));
                items
            }
            Err(err) => {
                let _ = reply.send(Err(err));
                Vec::new()
            }
        },
        Control::AddPid(pid) => {
            pipe.add_pid(pid);
            Vec::new()
        }
        Control::DelPid(pid) => {
            pipe.del_pid(pid);
            Vec::new()
        }
    }
}
