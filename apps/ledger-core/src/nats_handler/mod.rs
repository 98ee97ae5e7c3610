//! NATS transport for exchange events and ledger queries

pub mod subscriber;

pub use subscriber::NatsSubscriber;
