// Gateway module for trigger - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod clock;
mod debounce;

// Public re-exports - the ONLY way to access trigger functionality
pub use clock::{Clock, ManualClock, TokioClock};
pub use debounce::{
    validate_debounce_ms, DebounceCoordinator, DebounceState, Fired, SessionId,
};
