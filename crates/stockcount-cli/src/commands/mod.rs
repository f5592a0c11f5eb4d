pub mod common;
pub mod conflicts;
pub mod count;
pub mod flush;
pub mod queue;
pub mod scan;
pub mod status;
pub mod watch;
