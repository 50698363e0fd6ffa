pub mod backoff;
pub mod enumerate;
pub mod paths;
pub mod queue;
pub mod scheduler;
pub mod transfer;
