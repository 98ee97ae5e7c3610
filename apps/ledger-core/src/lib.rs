//! Ledger Core - Account Ledger & Execution Quality Service
//! Balance, frozen funds and positions kept consistent with exchange fills

pub mod config;
pub mod engine;
pub mod events;
pub mod nats_handler;
pub mod observability;
pub mod resilience;
pub mod shutdown;
pub mod strategy;
