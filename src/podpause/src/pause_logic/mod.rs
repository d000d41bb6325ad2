mod engine;
mod recreate;

pub use self::engine::{pause, paused_clone, resume, resumed_clone, Action, Outcome};
pub use self::recreate::recreate_pod;
