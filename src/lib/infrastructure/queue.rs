//! Job queue implementations

pub mod redis;

pub use self::redis::RedisJobQueue;
