//! Binary wire protocol for spike and initialisation messages
//!
//! One message per UDP datagram. Byte 0 is the message tag, every
//! multi-byte field after it is in network byte order (big-endian).
//!
//! | Tag | Payload                                   | Message                 |
//! |-----|-------------------------------------------|-------------------------|
//! | 0   | `u16 index`                               | [`Message::Performance`] |
//! | 1   | `u16 num_frequencies, u16 chunk_size`     | [`Message::InitCount`]   |
//! | 1   | `u16 index, f32 frequency` (`0.0` = count) | [`Message::InitFrequency`] / [`Message::InitCount`] |
//! | 2   | none                                      | [`Message::InitDone`]    |
//! | 2   | `f32` frequencies, `0.0` terminated       | [`Message::InitContent`] |
//!
//! Decoding is pure and allocation-free. Malformed frames produce a
//! [`DecodeError`] instead of aborting.

use std::fmt;

/// Length of the count-header form of an initialisation frame
const INIT_HEADER_LEN: usize = 5;
/// Length of the `(index, frequency)` form of an initialisation frame
const INIT_FREQUENCY_LEN: usize = 7;
/// Minimum performance frame: tag + u16 index
const PERFORMANCE_LEN: usize = 3;

/// Message tag carried in byte 0 of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Performance = 0,
    Initialisation = 1,
    InitialisationContent = 2,
    Unknown = 255,
}

impl From<u8> for MessageType {
    fn from(tag: u8) -> Self {
        match tag {
            0 => MessageType::Performance,
            1 => MessageType::Initialisation,
            2 => MessageType::InitialisationContent,
            _ => MessageType::Unknown,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Performance => "performance",
            MessageType::Initialisation => "initialisation",
            MessageType::InitialisationContent => "initialisation content",
            MessageType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Errors produced while decoding a datagram
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty datagram")]
    Empty,

    #[error("unknown message tag {0}")]
    UnknownTag(u8),

    #[error("truncated {kind} message: expected at least {expected} bytes, got {actual}")]
    Truncated {
        kind: MessageType,
        expected: usize,
        actual: usize,
    },

    #[error("non-finite frequency in {kind} message")]
    NonFiniteFrequency { kind: MessageType },
}

/// A decoded message, borrowing from the datagram it came from
#[derive(Debug, Clone, PartialEq)]
pub enum Message<'a> {
    /// Trigger the envelope of oscillator `index`
    Performance { index: u16 },

    /// Start of a handshake: how many frequencies will follow
    InitCount {
        expected: u16,
        /// Frequencies per content chunk, when the sender announced it
        chunk_size: Option<u16>,
    },

    /// Set the frequency of a single oscillator
    InitFrequency { index: u16, frequency: f32 },

    /// A chunk of consecutive frequencies
    InitContent(ContentFrequencies<'a>),

    /// Explicit end of the handshake
    InitDone,
}

impl Message<'_> {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Performance { .. } => MessageType::Performance,
            Message::InitCount { .. } | Message::InitFrequency { .. } => {
                MessageType::Initialisation
            }
            Message::InitContent(_) | Message::InitDone => MessageType::InitialisationContent,
        }
    }

    /// Append the wire representation of this message to `buf`
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Message::Performance { index } => {
                buf.push(MessageType::Performance as u8);
                buf.extend_from_slice(&index.to_be_bytes());
            }
            Message::InitCount {
                expected,
                chunk_size: Some(chunk),
            } => {
                buf.push(MessageType::Initialisation as u8);
                buf.extend_from_slice(&expected.to_be_bytes());
                buf.extend_from_slice(&chunk.to_be_bytes());
            }
            Message::InitCount {
                expected,
                chunk_size: None,
            } => {
                buf.push(MessageType::Initialisation as u8);
                buf.extend_from_slice(&expected.to_be_bytes());
                buf.extend_from_slice(&0.0f32.to_be_bytes());
            }
            Message::InitFrequency { index, frequency } => {
                buf.push(MessageType::Initialisation as u8);
                buf.extend_from_slice(&index.to_be_bytes());
                buf.extend_from_slice(&frequency.to_be_bytes());
            }
            Message::InitContent(content) => {
                buf.push(MessageType::InitialisationContent as u8);
                for frequency in content.clone() {
                    buf.extend_from_slice(&frequency.to_be_bytes());
                }
                if content.is_terminated() {
                    buf.extend_from_slice(&0.0f32.to_be_bytes());
                }
            }
            Message::InitDone => buf.push(MessageType::InitialisationContent as u8),
        }
    }
}

/// Append a content chunk carrying `frequencies` to `buf`.
///
/// When `terminated` is set a `0.0` sentinel follows the frequencies,
/// which the receiver treats as the end of the handshake.
pub fn encode_content(frequencies: &[f32], terminated: bool, buf: &mut Vec<u8>) {
    buf.push(MessageType::InitialisationContent as u8);
    for frequency in frequencies {
        buf.extend_from_slice(&frequency.to_be_bytes());
    }
    if terminated {
        buf.extend_from_slice(&0.0f32.to_be_bytes());
    }
}

/// Iterator over the frequencies of a content chunk.
///
/// Stops at the first `0.0` sentinel. Trailing bytes that do not form a
/// whole `f32` are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentFrequencies<'a> {
    payload: &'a [u8],
    terminated: bool,
}

impl<'a> ContentFrequencies<'a> {
    fn new(payload: &'a [u8]) -> Self {
        let whole = payload.len() / 4 * 4;
        let payload = &payload[..whole];
        let end = payload
            .chunks_exact(4)
            .position(|chunk| read_f32(chunk) == 0.0)
            .map(|i| i * 4);

        match end {
            Some(end) => Self {
                payload: &payload[..end],
                terminated: true,
            },
            None => Self {
                payload,
                terminated: false,
            },
        }
    }

    /// Whether the chunk ended with the `0.0` sentinel
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Iterator for ContentFrequencies<'_> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.payload.len() < 4 {
            return None;
        }
        let (head, rest) = self.payload.split_at(4);
        self.payload = rest;
        Some(read_f32(head))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.payload.len() / 4;
        (n, Some(n))
    }
}

impl ExactSizeIterator for ContentFrequencies<'_> {}

/// Decode a single datagram
pub fn decode(bytes: &[u8]) -> Result<Message<'_>, DecodeError> {
    let (&tag, payload) = bytes.split_first().ok_or(DecodeError::Empty)?;

    match MessageType::from(tag) {
        MessageType::Performance => {
            require(MessageType::Performance, bytes, PERFORMANCE_LEN)?;
            Ok(Message::Performance {
                index: read_u16(payload),
            })
        }
        MessageType::Initialisation => {
            if bytes.len() == INIT_HEADER_LEN {
                return Ok(Message::InitCount {
                    expected: read_u16(payload),
                    chunk_size: Some(read_u16(&payload[2..])),
                });
            }
            require(MessageType::Initialisation, bytes, INIT_FREQUENCY_LEN)?;
            let index = read_u16(payload);
            let frequency = read_f32(&payload[2..]);
            if !frequency.is_finite() {
                return Err(DecodeError::NonFiniteFrequency {
                    kind: MessageType::Initialisation,
                });
            }
            if frequency == 0.0 {
                Ok(Message::InitCount {
                    expected: index,
                    chunk_size: None,
                })
            } else {
                Ok(Message::InitFrequency { index, frequency })
            }
        }
        MessageType::InitialisationContent => {
            if payload.is_empty() {
                return Ok(Message::InitDone);
            }
            let content = ContentFrequencies::new(payload);
            if content.clone().any(|f| !f.is_finite()) {
                return Err(DecodeError::NonFiniteFrequency {
                    kind: MessageType::InitialisationContent,
                });
            }
            Ok(Message::InitContent(content))
        }
        MessageType::Unknown => Err(DecodeError::UnknownTag(tag)),
    }
}

fn require(kind: MessageType, bytes: &[u8], expected: usize) -> Result<(), DecodeError> {
    if bytes.len() < expected {
        Err(DecodeError::Truncated {
            kind,
            expected,
            actual: bytes.len(),
        })
    } else {
        Ok(())
    }
}

#[inline]
fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

#[inline]
fn read_f32(bytes: &[u8]) -> f32 {
    f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_performance() {
        let msg = decode(&[0, 0x01, 0x02]).unwrap();
        assert_eq!(msg, Message::Performance { index: 0x0102 });
    }

    #[test]
    fn test_decode_performance_with_padding() {
        // Senders that pad to a 4-byte record are accepted
        let msg = decode(&[0, 0x00, 0x07, 0xAA]).unwrap();
        assert_eq!(msg, Message::Performance { index: 7 });
    }

    #[test]
    fn test_decode_count_header() {
        let msg = decode(&[1, 0x03, 0xE8, 0x00, 0x40]).unwrap();
        assert_eq!(
            msg,
            Message::InitCount {
                expected: 1000,
                chunk_size: Some(64)
            }
        );
    }

    #[test]
    fn test_decode_zero_frequency_is_count() {
        let mut buf = vec![1];
        buf.extend_from_slice(&12u16.to_be_bytes());
        buf.extend_from_slice(&0.0f32.to_be_bytes());

        assert_eq!(
            decode(&buf).unwrap(),
            Message::InitCount {
                expected: 12,
                chunk_size: None
            }
        );
    }

    #[test]
    fn test_decode_frequency() {
        let mut buf = vec![1];
        buf.extend_from_slice(&3u16.to_be_bytes());
        buf.extend_from_slice(&440.5f32.to_be_bytes());

        assert_eq!(
            decode(&buf).unwrap(),
            Message::InitFrequency {
                index: 3,
                frequency: 440.5
            }
        );
    }

    #[test]
    fn test_decode_done() {
        assert_eq!(decode(&[2]).unwrap(), Message::InitDone);
    }

    #[test]
    fn test_decode_content_stops_at_sentinel() {
        let mut buf = Vec::new();
        encode_content(&[100.0, 200.0, 300.0], true, &mut buf);
        // Anything after the sentinel is ignored
        buf.extend_from_slice(&999.0f32.to_be_bytes());

        match decode(&buf).unwrap() {
            Message::InitContent(content) => {
                assert!(content.is_terminated());
                let freqs: Vec<f32> = content.collect();
                assert_eq!(freqs, vec![100.0, 200.0, 300.0]);
            }
            other => panic!("Expected content, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_content_without_sentinel() {
        let mut buf = Vec::new();
        encode_content(&[50.0, 60.0], false, &mut buf);
        buf.push(0xFF); // partial trailing float

        match decode(&buf).unwrap() {
            Message::InitContent(content) => {
                assert!(!content.is_terminated());
                assert_eq!(content.len(), 2);
            }
            other => panic!("Expected content, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        assert_eq!(decode(&[255, 0, 0]), Err(DecodeError::UnknownTag(255)));
        assert_eq!(decode(&[42]), Err(DecodeError::UnknownTag(42)));
    }

    #[test]
    fn test_empty_and_truncated() {
        assert_eq!(decode(&[]), Err(DecodeError::Empty));
        assert!(matches!(
            decode(&[0, 1]),
            Err(DecodeError::Truncated {
                kind: MessageType::Performance,
                expected: 3,
                actual: 2
            })
        ));
        assert!(matches!(
            decode(&[1, 0, 1, 0]),
            Err(DecodeError::Truncated {
                kind: MessageType::Initialisation,
                ..
            })
        ));
    }

    #[test]
    fn test_nan_frequency_rejected() {
        let mut buf = vec![1];
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&f32::NAN.to_be_bytes());
        assert!(matches!(
            decode(&buf),
            Err(DecodeError::NonFiniteFrequency { .. })
        ));
    }

    #[test]
    fn test_network_order_fields() {
        for x in [0u16, 1, 0x00FF, 0xFF00, 0x1234, u16::MAX] {
            assert_eq!(u16::from_be_bytes(x.to_be_bytes()), x);
            assert_eq!(read_u16(&x.to_be_bytes()), x);
        }
        for f in [0.0f32, 1.0, -1.5, 440.0, 19_999.9, f32::MIN_POSITIVE] {
            assert_eq!(read_f32(&f.to_be_bytes()).to_bits(), f.to_bits());
        }
        // Big-endian on the wire regardless of host
        assert_eq!(0x0102u16.to_be_bytes(), [0x01, 0x02]);
    }

    #[test]
    fn test_encoded_messages_decode() {
        let messages = [
            Message::Performance { index: 19_999 },
            Message::InitCount {
                expected: 20,
                chunk_size: Some(8),
            },
            Message::InitCount {
                expected: 20,
                chunk_size: None,
            },
            Message::InitFrequency {
                index: 4,
                frequency: 523.25,
            },
            Message::InitDone,
        ];

        for msg in messages {
            let mut buf = Vec::new();
            msg.encode(&mut buf);
            assert_eq!(decode(&buf).unwrap(), msg);
        }
    }
}
