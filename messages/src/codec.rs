//! Reference codec: bincode framing with a hard size limit.

use bincode::Options;

use crate::{LcapMessage, MessageError};

/// Maximum encoded message size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

fn options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_MESSAGE_SIZE as u64)
}

/// Encode a message for transmission.
pub fn encode(message: &LcapMessage) -> Result<Vec<u8>, MessageError> {
    let bytes = options()
        .serialize(message)
        .map_err(|e| MessageError::Encode(e.to_string()))?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(MessageError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(bytes)
}

/// Decode a message from raw bytes.
pub fn decode(data: &[u8]) -> Result<LcapMessage, MessageError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(MessageError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    options()
        .deserialize(data)
        .map_err(|e| MessageError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MessageBody, MessageHeader, Opcode, VoteBlock};
    use lcap_types::{Digest, Nonce, PeerId, Timestamp};
    use proptest::prelude::*;

    fn header(opcode: Opcode) -> MessageHeader {
        MessageHeader {
            version: opcode.version(),
            opcode,
            sender: PeerId::new("peer-a"),
            au_id: "au".into(),
            plugin_id: "p".into(),
            url: "http://x/".into(),
            lower: Some("a".into()),
            upper: Some("m".into()),
            duration: 5,
            challenge: Nonce::new(vec![1; 20]),
            verifier: Nonce::new(vec![2; 20]),
            hash_algorithm: "SHA-256".into(),
            sent_at: Timestamp::new(9),
        }
    }

    #[test]
    fn vote_message_survives_codec() {
        let msg = LcapMessage::new(
            header(Opcode::Vote),
            MessageBody::Vote {
                blocks: vec![VoteBlock {
                    url: "http://x/a".into(),
                    digest: Digest::new(vec![7; 32]),
                }],
            },
        );
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            decode(&[0xff, 0xff, 0xff]),
            Err(MessageError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_input_rejected_before_parsing() {
        let data = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            decode(&data),
            Err(MessageError::MessageTooLarge { .. })
        ));
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = decode(&data);
        }

        #[test]
        fn truncated_frames_are_malformed(cut in 0usize..64) {
            let msg = LcapMessage::new(
                header(Opcode::RepairRequest),
                MessageBody::RepairRequest { url: "http://x/a".into() },
            );
            let bytes = encode(&msg).unwrap();
            let cut = cut.min(bytes.len() - 1);
            prop_assert!(matches!(decode(&bytes[..cut]), Err(MessageError::Malformed(_))));
        }
    }
}
