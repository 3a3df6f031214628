//! Message Pipeline
//!
//! Takes one raw inbound frame through parse, authorization, persistence,
//! enrichment and fan-out. Expected failures come back as `Outcome`
//! variants for the session loop to relay; only directory store faults
//! surface as errors.

use tracing::debug;

use crate::directory::{DirectoryError, DirectoryStore};
use crate::models::{InboundMessage, MessageView, ParseError};
use crate::registry::ConnectionRegistry;

/// Authorization decision for one (conversation, sender) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    NotParticipant,
    Blocked,
    ConversationNotFound,
}

/// Terminal result of handling one inbound frame.
#[derive(Debug)]
pub enum Outcome {
    /// Message persisted and fanned out; carries the enriched view.
    Delivered(Box<MessageView>),
    /// Frame understood but refused; the text goes back to the sender.
    Rejected(&'static str),
    /// Frame was not valid JSON.
    Malformed,
}

/// Decide whether `sender_id` may post into `conversation_id`.
///
/// The participant check runs before the block check, so a non-participant
/// is reported as such even when a block also exists.
pub async fn authorize(
    directory: &DirectoryStore,
    conversation_id: &str,
    sender_id: &str,
) -> Result<Decision, DirectoryError> {
    if directory
        .find_participant(conversation_id, sender_id)
        .await?
        .is_none()
    {
        return Ok(Decision::NotParticipant);
    }

    let Some(conversation) = directory.find_conversation(conversation_id).await? else {
        return Ok(Decision::ConversationNotFound);
    };

    // A block in either direction between sender and owner refuses the send
    let owner_id = conversation.owner_id;
    if directory.is_blocked(sender_id, &owner_id).await?
        || directory.is_blocked(&owner_id, sender_id).await?
    {
        return Ok(Decision::Blocked);
    }

    Ok(Decision::Allowed)
}

/// Handle one raw frame from `sender_id`'s session.
///
/// Exactly one message row is inserted per `Delivered` outcome; rejected
/// and malformed frames touch neither the store nor the registry.
pub async fn handle_inbound(
    raw: &str,
    sender_id: &str,
    directory: &DirectoryStore,
    registry: &ConnectionRegistry,
) -> Result<Outcome, DirectoryError> {
    let inbound = match InboundMessage::parse(raw) {
        Ok(inbound) => inbound,
        Err(ParseError::Invalid) => return Ok(Outcome::Malformed),
        Err(ParseError::MissingFields) => {
            return Ok(Outcome::Rejected("Missing required fields"))
        }
    };

    match authorize(directory, &inbound.conversation_id, sender_id).await? {
        Decision::Allowed => {}
        Decision::NotParticipant => {
            return Ok(Outcome::Rejected("Not a participant in this conversation"))
        }
        Decision::Blocked => {
            return Ok(Outcome::Rejected(
                "You are blocked by the conversation owner or you have blocked them",
            ))
        }
        Decision::ConversationNotFound => {
            return Ok(Outcome::Rejected("Conversation not found"))
        }
    }

    let message = directory
        .insert_message(
            &inbound.conversation_id,
            sender_id,
            &inbound.content,
            &inbound.kind,
            inbound.image_key.as_deref(),
        )
        .await?;

    // Profile snapshot is taken at broadcast time, not cached with the row
    let sender_profile = directory.find_user(sender_id).await?;
    let view = MessageView::new(&message, sender_profile.as_ref());

    fan_out(directory, registry, &view).await?;

    Ok(Outcome::Delivered(Box::new(view)))
}

/// Deliver `view` to every connected, non-deleted participant of its
/// conversation. Best-effort: disconnected participants are skipped and a
/// failed send is logged inside the registry without stopping the loop.
/// The sender is not special-cased; it receives the frame like any other
/// connected participant.
async fn fan_out(
    directory: &DirectoryStore,
    registry: &ConnectionRegistry,
    view: &MessageView,
) -> Result<(), DirectoryError> {
    let participants = directory.list_participants(&view.conversation_id).await?;

    let mut reached = 0usize;
    for participant in &participants {
        if !registry.is_connected(&participant.user_id) {
            continue;
        }
        registry.send_json(&participant.user_id, view);
        reached += 1;
    }

    debug!(
        conversation_id = %view.conversation_id,
        reached,
        participants = participants.len(),
        "Message fanned out"
    );

    Ok(())
}
