//! Peer mesh: roster, orchestration and observer notifications

pub mod events;
pub mod orchestrator;
pub mod roster;

pub use events::{ConnectionStatus, MeshEvent};
pub use orchestrator::{MeshCommand, MeshInput, MeshOrchestrator};
pub use roster::{validate_display_name, Peer, Roster, MAX_DISPLAY_NAME_CHARS};
