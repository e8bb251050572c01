//! 记忆层：会话快照持久化

pub mod persistence;

pub use persistence::SnapshotStore;
