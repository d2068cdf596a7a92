//! # beacon-protocol
//!
//! Wire format for messages the Beacon registry pushes to clients.
//!
//! A message is any JSON object. It is encoded as UTF-8 JSON text and handed
//! to the client's connection in a single write.
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, Message};
//!
//! let message = Message::new().with("type", "chat").with("body", "hello");
//!
//! let encoded = codec::encode(&message).unwrap();
//! let decoded: Message = codec::decode(&encoded).unwrap();
//! assert_eq!(message, decoded);
//! ```

pub mod codec;
pub mod message;

pub use codec::{decode, encode, encode_with_limit, ProtocolError, MAX_MESSAGE_SIZE};
pub use message::Message;
