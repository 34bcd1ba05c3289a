//! detour-live: the async shell around the execution controller. Owns the
//! controller behind a mutex, runs the auto-apply countdown and the trigger
//! pollers, and fans controller notices out to observers.

pub mod clock;
pub mod replay;
pub mod session;

pub use clock::{Clock, SystemClock, TokioClock};
pub use replay::{Replay, ReplayEntry};
pub use session::{LiveSession, SessionEvent};
