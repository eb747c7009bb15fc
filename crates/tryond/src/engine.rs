use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tryon_core::session::{Session, SessionError, SessionStatus, StartKind, Tick};
use tryon_hw::Facing;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Start {
        facing: Facing,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Retry {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SwitchFacing {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Capture {
        reply: oneshot::Sender<Result<PathBuf, SessionError>>,
    },
    SetScale {
        percent: u32,
        reply: oneshot::Sender<u32>,
    },
    SetOpacity {
        percent: u32,
        reply: oneshot::Sender<u32>,
    },
    ResetScale {
        reply: oneshot::Sender<()>,
    },
    ResetOpacity {
        reply: oneshot::Sender<()>,
    },
    ResetParams {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn start(&self, facing: Facing) -> Result<(), EngineError> {
        Ok(self
            .request(|reply| EngineRequest::Start { facing, reply })
            .await??)
    }

    pub async fn retry(&self) -> Result<(), EngineError> {
        Ok(self.request(|reply| EngineRequest::Retry { reply }).await??)
    }

    pub async fn switch_facing(&self) -> Result<(), EngineError> {
        Ok(self
            .request(|reply| EngineRequest::SwitchFacing { reply })
            .await??)
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Stop { reply }).await
    }

    /// Capture a still and return where it was written.
    pub async fn capture(&self) -> Result<PathBuf, EngineError> {
        Ok(self.request(|reply| EngineRequest::Capture { reply }).await??)
    }

    pub async fn set_scale(&self, percent: u32) -> Result<u32, EngineError> {
        self.request(|reply| EngineRequest::SetScale { percent, reply })
            .await
    }

    pub async fn set_opacity(&self, percent: u32) -> Result<u32, EngineError> {
        self.request(|reply| EngineRequest::SetOpacity { percent, reply })
            .await
    }

    pub async fn reset_scale(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::ResetScale { reply }).await
    }

    pub async fn reset_opacity(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::ResetOpacity { reply })
            .await
    }

    pub async fn reset_params(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::ResetParams { reply })
            .await
    }

    pub async fn status(&self) -> Result<SessionStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread runs its own current-thread runtime so the session's frame
/// pipeline never competes with D-Bus dispatch. The session is stopped and
/// the camera released when every handle has been dropped.
pub fn spawn_engine(session: Session, capture_dir: PathBuf) -> Result<EngineHandle, EngineError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let (tx, rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("tryon-engine".into())
        .spawn(move || {
            tracing::info!(session = %session.id(), "engine thread started");
            runtime.block_on(run(session, rx, capture_dir));
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

enum Event {
    Request(Option<EngineRequest>),
    Tick(Tick),
}

async fn run(mut session: Session, mut rx: mpsc::Receiver<EngineRequest>, capture_dir: PathBuf) {
    let mut backlog = VecDeque::new();
    loop {
        let request = match backlog.pop_front() {
            Some(request) => request,
            None => {
                let event = tokio::select! {
                    biased;
                    request = rx.recv() => Event::Request(request),
                    tick = session.next_tick() => Event::Tick(tick),
                };
                match event {
                    Event::Request(Some(request)) => request,
                    Event::Request(None) => break,
                    Event::Tick(Tick::Frame(report)) => {
                        tracing::trace!(
                            seq = report.sequence,
                            face = report.face_detected,
                            rendered = report.rendered,
                            "frame processed"
                        );
                        continue;
                    }
                    Event::Tick(Tick::Lost(err)) => {
                        tracing::warn!(error = %err, "camera lost; waiting for retry");
                        continue;
                    }
                }
            }
        };
        handle(&mut session, request, &mut rx, &mut backlog, &capture_dir).await;
    }
    session.stop();
}

async fn handle(
    session: &mut Session,
    request: EngineRequest,
    rx: &mut mpsc::Receiver<EngineRequest>,
    backlog: &mut VecDeque<EngineRequest>,
    capture_dir: &Path,
) {
    match request {
        EngineRequest::Start { facing, reply } => {
            let result = acquire(session, StartKind::Start(facing), rx, backlog).await;
            let _ = reply.send(result);
        }
        EngineRequest::Retry { reply } => {
            let result = acquire(session, StartKind::Retry, rx, backlog).await;
            let _ = reply.send(result);
        }
        EngineRequest::SwitchFacing { reply } => {
            let result = acquire(session, StartKind::SwitchFacing, rx, backlog).await;
            let _ = reply.send(result);
        }
        EngineRequest::Stop { reply } => {
            session.stop();
            let _ = reply.send(());
        }
        EngineRequest::Capture { reply } => {
            let _ = reply.send(session.capture_to(capture_dir));
        }
        EngineRequest::SetScale { percent, reply } => {
            let _ = reply.send(session.set_scale(percent));
        }
        EngineRequest::SetOpacity { percent, reply } => {
            let _ = reply.send(session.set_opacity(percent));
        }
        EngineRequest::ResetScale { reply } => {
            session.reset_scale();
            let _ = reply.send(());
        }
        EngineRequest::ResetOpacity { reply } => {
            session.reset_opacity();
            let _ = reply.send(());
        }
        EngineRequest::ResetParams { reply } => {
            session.reset_params();
            let _ = reply.send(());
        }
        EngineRequest::Status { reply } => {
            let _ = reply.send(session.status());
        }
    }
}

/// Run a camera acquisition while still serving the request channel.
///
/// `Stop` cancels the acquisition; `Status` is answered from the `Starting`
/// snapshot; anything else waits in `backlog` until the acquisition settles.
async fn acquire(
    session: &mut Session,
    kind: StartKind,
    rx: &mut mpsc::Receiver<EngineRequest>,
    backlog: &mut VecDeque<EngineRequest>,
) -> Result<(), SessionError> {
    let pending = session.begin(kind)?;
    let snapshot = session.status();
    let mut stop_reply = None;

    let outcome = {
        let acquisition = session.acquire(pending);
        tokio::pin!(acquisition);
        loop {
            tokio::select! {
                result = &mut acquisition => break Some(result),
                request = rx.recv() => match request {
                    Some(EngineRequest::Stop { reply }) => {
                        stop_reply = Some(reply);
                        break None;
                    }
                    Some(EngineRequest::Status { reply }) => {
                        let _ = reply.send(snapshot.clone());
                    }
                    Some(other) => backlog.push_back(other),
                    None => break None,
                },
            }
        }
    };

    match outcome {
        Some(result) => result,
        None => {
            tracing::info!("camera acquisition cancelled");
            session.stop();
            if let Some(reply) = stop_reply {
                let _ = reply.send(());
            }
            Err(SessionError::Cancelled)
        }
    }
}
