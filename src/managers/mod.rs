pub mod backup;
pub mod executor;
pub mod failover;
pub mod health;
pub mod logging;
pub mod notification;
pub mod restore;
pub mod retention;
pub mod scheduler;
