//! Sandmail Wire Protocol
//!
//! Typed, versioned representations of everything the sandbox service
//! sends and receives: encrypted envelopes, sync checkpoints, email records,
//! inbox exports, API bodies and the event stream.
//!
//! # Versioning
//!
//! Every top-level payload carries an explicit version. Decoding checks it
//! before anything else and rejects both `0` and anything newer than
//! [`PROTOCOL_VERSION`] with [`ProtocolError::UnsupportedVersion`]. Nothing
//! is ever coerced to a version this crate understands.
//!
//! # Encoding
//!
//! JSON with camelCase field names (envelopes use snake_case); binary
//! fields are base64url without padding; timestamps are RFC 3339.

pub mod api;
pub mod b64;
pub mod email;
pub mod envelope;
pub mod errors;
pub mod export;
pub mod ids;
pub mod sse;
pub mod sync;
pub mod version;

pub use api::{CheckKeyResponse, CreateInboxRequest, CreateInboxResponse, EventFrame, ServerInfo};
pub use email::{AttachmentMeta, DecryptedEmail, EmailContent, EmailRecord};
pub use envelope::{Algorithms, WireEnvelope};
pub use errors::{ProtocolError, Result};
pub use export::{InboxExport, InboxIdentity};
pub use ids::{EmailId, InboxHash};
pub use sse::{SseDecoder, SseFrame};
pub use sync::SyncState;
pub use version::{PROTOCOL_VERSION, Versioned, decode_json, decode_versioned};
