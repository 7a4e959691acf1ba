pub mod debug;
pub mod events;
pub mod facts;
pub mod health;
pub mod metrics;
pub mod rules;
pub mod timers;
