use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from player WebSocket clients.
#[serde(tag = "type")]
pub enum PlayerInboundMessage {
    /// Must be the first frame of a connection.
    #[serde(rename = "identify")]
    Identify { party_id: Uuid, player_id: Uuid },
    #[serde(rename = "vote")]
    Vote {
        song_id: Uuid,
        rating: u8,
        #[serde(default)]
        super_vote: bool,
        #[serde(default)]
        comment: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl PlayerInboundMessage {
    /// Parse a text frame and apply the same bounds as the REST routes.
    pub fn from_json_str(text: &str) -> Result<Self, InboundError> {
        let message: Self = serde_json::from_str(text)?;
        message.validate()?;
        Ok(message)
    }
}

impl Validate for PlayerInboundMessage {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Self::Vote {
            rating, comment, ..
        } = self
        {
            if !(1..=10).contains(rating) {
                errors.add("rating", validator::ValidationError::new("range"));
            }
            if comment.as_ref().is_some_and(|comment| comment.chars().count() > 280) {
                errors.add("comment", validator::ValidationError::new("length"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Reasons an inbound frame is rejected before reaching the services.
#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationErrors),
}

#[derive(Debug, Serialize, ToSchema)]
/// Error frame sent back when an inbound message is rejected.
pub struct SocketError {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_frame_parses() {
        let text = format!(
            r#"{{"type":"identify","party_id":"{}","player_id":"{}"}}"#,
            Uuid::nil(),
            Uuid::nil()
        );
        assert!(matches!(
            PlayerInboundMessage::from_json_str(&text).unwrap(),
            PlayerInboundMessage::Identify { .. }
        ));
    }

    #[test]
    fn vote_frame_bounds_rating() {
        let frame = |rating: u8| {
            format!(
                r#"{{"type":"vote","song_id":"{}","rating":{rating}}}"#,
                Uuid::nil()
            )
        };
        assert!(PlayerInboundMessage::from_json_str(&frame(10)).is_ok());
        assert!(matches!(
            PlayerInboundMessage::from_json_str(&frame(11)),
            Err(InboundError::Invalid(_))
        ));
    }

    #[test]
    fn unknown_types_are_tolerated() {
        assert!(matches!(
            PlayerInboundMessage::from_json_str(r#"{"type":"dance"}"#).unwrap(),
            PlayerInboundMessage::Unknown
        ));
    }
}
