pub mod rect;
pub mod scheduler;
