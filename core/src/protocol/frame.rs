//! Frame definitions
//!
//! The relay protocol has no envelope: a frame is one or two consecutive
//! transport messages.
//!
//! - identity frame: `Text(own peer id)`, sent once after connecting
//! - sync frame: `Text(recipient peer id)` immediately followed by
//!   `Binary(ciphertext)`
//!
//! Pairing relies on message order alone; there is no correlation id.

use crate::crypto::PeerId;

/// A single transport message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WireMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Text(_) => "text",
            WireMessage::Binary(_) => "binary",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(t) => t.len(),
            WireMessage::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Announces the sender's peer id
    Identity(PeerId),
    /// Ciphertext for one recipient
    Sync { recipient: PeerId, ciphertext: Vec<u8> },
}

impl Frame {
    /// Transport messages for this frame, in the order they must be sent
    pub fn into_messages(self) -> Vec<WireMessage> {
        match self {
            Frame::Identity(id) => vec![WireMessage::Text(id.to_string())],
            Frame::Sync {
                recipient,
                ciphertext,
            } => vec![
                WireMessage::Text(recipient.to_string()),
                WireMessage::Binary(ciphertext),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive_peer_id;

    #[test]
    fn test_identity_frame_is_single_text() {
        let id = derive_peer_id(b"me");
        let messages = Frame::Identity(id.clone()).into_messages();
        assert_eq!(messages, vec![WireMessage::Text(id.to_string())]);
    }

    #[test]
    fn test_sync_frame_is_text_then_binary() {
        let id = derive_peer_id(b"you");
        let messages = Frame::Sync {
            recipient: id.clone(),
            ciphertext: vec![1, 2, 3],
        }
        .into_messages();

        assert_eq!(
            messages,
            vec![
                WireMessage::Text(id.to_string()),
                WireMessage::Binary(vec![1, 2, 3]),
            ]
        );
        assert_eq!(messages[0].kind(), "text");
        assert_eq!(messages[1].len(), 3);
    }
}
