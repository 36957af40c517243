use chrono::{DateTime, NaiveDate, Utc};
use presence_core::{Embedding, RecognitionSession, SessionConfig, Tick};
use presence_store::{local_date, AttendanceBook, AttendanceEntry, MarkOutcome, StoreError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("no group selected")]
    NoSession,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of feeding one frame to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub tick: Tick,
    /// Entry written because this frame confirmed an identity.
    pub marked: Option<AttendanceEntry>,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from the CLI to the engine thread.
enum EngineRequest {
    SwitchGroup {
        group: String,
        reply: Reply<usize>,
    },
    Frame {
        embedding: Embedding,
        at: DateTime<Utc>,
        reply: Reply<FrameReport>,
    },
    Mark {
        identity: String,
        at: DateTime<Utc>,
        reply: Reply<MarkOutcome>,
    },
    Undo {
        date: NaiveDate,
        reply: Reply<Option<AttendanceEntry>>,
    },
    Sync {
        date: NaiveDate,
        reply: Reply<()>,
    },
    SetAutoMark {
        enabled: bool,
        reply: Reply<()>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Select `group`: drop the current session and build a new one from the
    /// group's roster. Returns how many members had enrolled vectors.
    pub async fn switch_group(&self, group: &str) -> Result<usize, EngineError> {
        let group = group.to_string();
        self.call(|reply| EngineRequest::SwitchGroup { group, reply })
            .await
    }

    /// Match one frame's embedding; marks attendance when it confirms.
    pub async fn frame(
        &self,
        embedding: Embedding,
        at: DateTime<Utc>,
    ) -> Result<FrameReport, EngineError> {
        self.call(|reply| EngineRequest::Frame {
            embedding,
            at,
            reply,
        })
        .await
    }

    /// Manually mark `identity` present in the selected group.
    pub async fn mark(&self, identity: &str, at: DateTime<Utc>) -> Result<MarkOutcome, EngineError> {
        let identity = identity.to_string();
        self.call(|reply| EngineRequest::Mark {
            identity,
            at,
            reply,
        })
        .await
    }

    /// Remove the most recent entry of `date` in the selected group.
    pub async fn undo(&self, date: NaiveDate) -> Result<Option<AttendanceEntry>, EngineError> {
        self.call(|reply| EngineRequest::Undo { date, reply }).await
    }

    /// Reconcile the selected group's ledger with `date`.
    pub async fn sync(&self, date: NaiveDate) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::Sync { date, reply }).await
    }

    pub async fn set_auto_mark(&self, enabled: bool) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::SetAutoMark { enabled, reply })
            .await
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the book and the current recognition session; requests
/// are handled strictly in arrival order. It exits once every handle is
/// dropped.
pub fn spawn_engine(book: AttendanceBook, config: SessionConfig) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("presence-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut engine = Engine {
                book,
                config,
                session: None,
            };
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

struct Engine {
    book: AttendanceBook,
    config: SessionConfig,
    session: Option<RecognitionSession>,
}

impl Engine {
    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::SwitchGroup { group, reply } => {
                let _ = reply.send(self.switch_group(&group));
            }
            EngineRequest::Frame {
                embedding,
                at,
                reply,
            } => {
                let _ = reply.send(self.frame(&embedding, at));
            }
            EngineRequest::Mark {
                identity,
                at,
                reply,
            } => {
                let result = self.group().and_then(|group| {
                    Ok(self.book.mark(&group, &identity, local_date(at), at)?)
                });
                let _ = reply.send(result);
            }
            EngineRequest::Undo { date, reply } => {
                let result = self
                    .group()
                    .and_then(|group| Ok(self.book.undo(&group, date)?));
                let _ = reply.send(result);
            }
            EngineRequest::Sync { date, reply } => {
                let result = self.group().and_then(|group| {
                    self.book.ledger().sync(&group, date)?;
                    Ok(())
                });
                let _ = reply.send(result);
            }
            EngineRequest::SetAutoMark { enabled, reply } => {
                self.config.auto_mark = enabled;
                let result = match self.session.as_mut() {
                    Some(session) => {
                        session.set_auto_mark(enabled);
                        Ok(())
                    }
                    None => Err(EngineError::NoSession),
                };
                let _ = reply.send(result);
            }
        }
    }

    fn group(&self) -> Result<String, EngineError> {
        self.session
            .as_ref()
            .map(|s| s.group().to_string())
            .ok_or(EngineError::NoSession)
    }

    fn switch_group(&mut self, group: &str) -> Result<usize, EngineError> {
        if let Some(mut old) = self.session.take() {
            tracing::info!(from = old.group(), to = group, "switching group");
            old.clear();
        }
        let session = self.book.session(group, self.config)?;
        let enrolled = session.engine().len();
        self.session = Some(session);
        Ok(enrolled)
    }

    fn frame(&mut self, embedding: &Embedding, at: DateTime<Utc>) -> Result<FrameReport, EngineError> {
        let session = self.session.as_mut().ok_or(EngineError::NoSession)?;
        let tick = session.process(embedding, at);
        tracing::debug!(group = session.group(), ?tick, "frame processed");

        let Tick::Confirmed { identity, .. } = &tick else {
            return Ok(FrameReport { tick, marked: None });
        };
        let group = session.group().to_string();
        let marked = match self.book.mark(&group, identity, local_date(at), at) {
            Ok(MarkOutcome::Marked(entry)) => {
                tracing::info!(group = %group, identity = %identity, "attendance marked");
                Some(entry)
            }
            Ok(MarkOutcome::AlreadyMarked) => {
                tracing::info!(group = %group, identity = %identity, "already marked today");
                None
            }
            Err(err) => {
                tracing::warn!(
                    group = %group,
                    identity = %identity,
                    error = %err,
                    transient = err.is_transient(),
                    "failed to record attendance"
                );
                None
            }
        };
        Ok(FrameReport { tick, marked })
    }
}
