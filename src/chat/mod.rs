//! Collaborator interface to the AI invocation layer, plus the explicit
//! turn state machine that drives a streamed model response into a durable
//! message.

use crate::error::ChatError;
use crate::session::types::{ImageAttachment, Message, SessionSettings};
use anyhow::Result;
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// One streamed fragment of a model response.
#[derive(Debug, Clone)]
pub enum ChatChunk {
    Text(String),
    Image(ImageAttachment),
    /// A side effect requested by the model (tool invocation). The turn
    /// parks in `AwaitingToolResult` until the caller resolves it.
    SideEffect(serde_json::Value),
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatChunk>> + Send + 'static>>;

/// Opaque request/response-stream provider. Core never looks inside.
pub trait ChatProvider: Send + Sync {
    /// Precondition for any AI call; store and sync paths never consult it.
    fn has_valid_api_key(&self) -> bool;

    fn initialize<'a>(
        &'a self,
        history: &'a [Message],
        settings: &'a SessionSettings,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn send_message<'a>(
        &'a self,
        text: &'a str,
        attachments: &'a [ImageAttachment],
    ) -> Pin<Box<dyn Future<Output = Result<ChunkStream>> + Send + 'a>>;
}

/// Turn lifecycle states.
///
/// Transitions: `Streaming` → `Streaming` on text/image chunks,
/// `Streaming` → `AwaitingToolResult` on a side-effect chunk,
/// `Streaming` → `Done` on stream end, any → `Aborted` on cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TurnState {
    Streaming,
    AwaitingToolResult,
    Done,
    Aborted,
}

/// Where a turn ended up, with the message draft as it stands.
#[derive(Debug)]
pub struct TurnOutcome {
    pub state: TurnState,
    pub message: Message,
    /// Set only in `AwaitingToolResult`.
    pub pending_effect: Option<serde_json::Value>,
}

/// Consume a chunk stream into `draft`, reporting every mutation through
/// `on_update` so a UI can render incrementally.
///
/// Cancellation is checked before each chunk (biased), so an abort that
/// fires while chunks are still buffered wins: a late chunk can never
/// resurrect content the user walked away from. The partially received text
/// is kept and the draft is marked not-thinking; an abort is a normal
/// outcome, not an error.
pub async fn drive_turn<F>(
    mut stream: ChunkStream,
    mut draft: Message,
    cancel: CancellationToken,
    mut on_update: F,
) -> Result<TurnOutcome>
where
    F: FnMut(&Message) + Send,
{
    draft.is_thinking = true;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                draft.is_thinking = false;
                return Ok(TurnOutcome {
                    state: TurnState::Aborted,
                    message: draft,
                    pending_effect: None,
                });
            }
            next = stream.next() => match next {
                Some(Ok(ChatChunk::Text(text))) => {
                    draft.text.push_str(&text);
                    on_update(&draft);
                }
                Some(Ok(ChatChunk::Image(image))) => {
                    draft.images.push(image);
                    on_update(&draft);
                }
                Some(Ok(ChatChunk::SideEffect(effect))) => {
                    on_update(&draft);
                    return Ok(TurnOutcome {
                        state: TurnState::AwaitingToolResult,
                        message: draft,
                        pending_effect: Some(effect),
                    });
                }
                Some(Err(error)) => {
                    return Err(ChatError::Stream(error.to_string()).into());
                }
                None => {
                    draft.is_thinking = false;
                    return Ok(TurnOutcome {
                        state: TurnState::Done,
                        message: draft,
                        pending_effect: None,
                    });
                }
            }
        }
    }
}
