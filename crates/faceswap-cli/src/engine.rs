use crate::render::RenderReport;
use crate::session::{Distance, FaceSummary, Options, Role, SelectOutcome, Session, SessionError, Status};
use faceswap_core::Detector;
use image::RgbImage;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to start engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Messages sent from the shell to the engine thread.
enum EngineRequest {
    SelectSource { path: PathBuf, reply: Reply<SelectOutcome> },
    SelectTarget { path: PathBuf, reply: Reply<SelectOutcome> },
    Choose { role: Option<Role>, index: usize, reply: Reply<SelectOutcome> },
    Cancel { role: Option<Role>, reply: Reply<Role> },
    Thumbnail { role: Role, reply: Reply<Option<RgbImage>> },
    Candidates { role: Role, reply: Reply<Vec<FaceSummary>> },
    SetOption { name: String, value: String, reply: Reply<Options> },
    Distance { reply: Reply<Option<Distance>> },
    Preview { frame: u64, reply: Reply<RgbImage> },
    Render { output: PathBuf, reply: Reply<RenderReport> },
    SuggestOutput { reply: Reply<Option<PathBuf>> },
    Status { reply: Reply<Status> },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    pub async fn select_source(&self, path: PathBuf) -> Result<SelectOutcome, EngineError> {
        self.call(|reply| EngineRequest::SelectSource { path, reply }).await
    }

    pub async fn select_target(&self, path: PathBuf) -> Result<SelectOutcome, EngineError> {
        self.call(|reply| EngineRequest::SelectTarget { path, reply }).await
    }

    pub async fn choose_face(&self, role: Option<Role>, index: usize) -> Result<SelectOutcome, EngineError> {
        self.call(|reply| EngineRequest::Choose { role, index, reply }).await
    }

    pub async fn cancel_choice(&self, role: Option<Role>) -> Result<Role, EngineError> {
        self.call(|reply| EngineRequest::Cancel { role, reply }).await
    }

    pub async fn thumbnail(&self, role: Role) -> Result<Option<RgbImage>, EngineError> {
        self.call(|reply| EngineRequest::Thumbnail { role, reply }).await
    }

    pub async fn candidates(&self, role: Role) -> Result<Vec<FaceSummary>, EngineError> {
        self.call(|reply| EngineRequest::Candidates { role, reply }).await
    }

    pub async fn set_option(&self, name: String, value: String) -> Result<Options, EngineError> {
        self.call(|reply| EngineRequest::SetOption { name, value, reply }).await
    }

    pub async fn distance(&self) -> Result<Option<Distance>, EngineError> {
        self.call(|reply| EngineRequest::Distance { reply }).await
    }

    pub async fn preview(&self, frame: u64) -> Result<RgbImage, EngineError> {
        self.call(|reply| EngineRequest::Preview { frame, reply }).await
    }

    pub async fn render(&self, output: PathBuf) -> Result<RenderReport, EngineError> {
        self.call(|reply| EngineRequest::Render { output, reply }).await
    }

    pub async fn suggest_output(&self) -> Result<Option<PathBuf>, EngineError> {
        self.call(|reply| EngineRequest::SuggestOutput { reply }).await
    }

    pub async fn status(&self) -> Result<Status, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }
}

/// Move the session onto a dedicated OS thread and serve requests in
/// arrival order until every handle is dropped.
pub fn spawn_engine<D>(mut session: Session<D>) -> Result<EngineHandle, EngineError>
where
    D: Detector + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("faceswap-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle(&mut session, req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn handle<D: Detector>(session: &mut Session<D>, req: EngineRequest) {
    // A dropped receiver only means the caller stopped waiting.
    match req {
        EngineRequest::SelectSource { path, reply } => {
            let _ = reply.send(session.select_source(&path));
        }
        EngineRequest::SelectTarget { path, reply } => {
            let _ = reply.send(session.select_target(&path));
        }
        EngineRequest::Choose { role, index, reply } => {
            let _ = reply.send(session.choose_face(role, index));
        }
        EngineRequest::Cancel { role, reply } => {
            let _ = reply.send(session.cancel_choice(role));
        }
        EngineRequest::Thumbnail { role, reply } => {
            let _ = reply.send(Ok(session.thumbnail(role).cloned()));
        }
        EngineRequest::Candidates { role, reply } => {
            let _ = reply.send(Ok(session.candidates(role)));
        }
        EngineRequest::SetOption { name, value, reply } => {
            let _ = reply.send(session.set_option(&name, &value));
        }
        EngineRequest::Distance { reply } => {
            let _ = reply.send(Ok(session.distance()));
        }
        EngineRequest::Preview { frame, reply } => {
            let _ = reply.send(session.preview(frame));
        }
        EngineRequest::Render { output, reply } => {
            let _ = reply.send(session.render(&output));
        }
        EngineRequest::SuggestOutput { reply } => {
            let _ = reply.send(Ok(session.suggest_output()));
        }
        EngineRequest::Status { reply } => {
            let _ = reply.send(Ok(session.status()));
        }
    }
}
