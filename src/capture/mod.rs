//! Presence-driven capture: sensor sampling, the per-room recording session
//! state machine, the frame buffer it owns, and artifact encoding.

mod buffer;
mod controller;
mod registry;
mod sensor;
mod writer;

pub use buffer::{FrameBuffer, PushOutcome};
pub use controller::{ControllerCommand, Phase, RoomController, SessionFsm, Transition};
pub use registry::SessionRegistry;
pub use sensor::{PresenceSensor, SensorReading};
pub use writer::{ArtifactWriter, WrittenAudio};
