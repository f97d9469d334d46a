//! Real-time bidirectional voice sessions
//!
//! A session streams microphone frames to the remote service and plays the
//! model's audio back as it arrives, while text fragments are accumulated
//! into turns for the application.

mod event;
mod link;
mod observer;
mod session;
mod turn;

pub use event::{InboundEvent, LinkEvent, OutboundFrame};
pub use link::{LiveConnector, LiveLink};
pub use observer::SessionObserver;
pub use session::{LiveSession, LiveSessionController, SessionState};
pub use turn::TurnBuffer;
