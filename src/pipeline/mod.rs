pub mod queue;

pub use queue::SyncQueue;
