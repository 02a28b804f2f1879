//! Message relay pipeline.
//!
//! Every message accepted by the listener flows through:
//! 1. `Envelope::new()`: address normalisation (angle brackets stripped once)
//! 2. `parse_content()`: subject, date and body from the raw bytes
//! 3. `JunctionSet::select()`: first matching junction, or none
//! 4. `compose()`: title, body and destination URL from templates
//! 5. `Notifier::notify()`: delivery

pub mod composer;
pub mod content;
pub mod processor;
pub mod types;

pub use composer::compose;
pub use content::parse_content;
pub use processor::Relay;
pub use types::{Envelope, InboundMessage, MessageContent, Notification, Outcome};
