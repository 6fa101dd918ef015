//! On-disk chat sessions
//!
//! A session is a timestamped directory under the outputs root:
//!
//! ```text
//! outputs/chat_20240101_120000/
//!     text/chat_history.txt
//!     audio/output_20240101_120005.wav
//! ```
//!
//! Sessions are created lazily, appended to and never removed.

pub mod store;
pub mod transcript;

pub use store::{SessionHandle, SessionStore, TRANSCRIPT_FILE};
pub use transcript::{Speaker, TurnRecord};
