pub mod session;

pub use session::{SessionState, Turn, DEFAULT_HISTORY_CAPACITY};
