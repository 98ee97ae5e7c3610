//! Ledger Engine Module
//! Account ledger, order registry, transaction cost analysis and event routing

pub mod dispatcher;
pub mod ledger;
pub mod ledger_store;
pub mod order_registry;
pub mod tca;
pub mod types;

pub use dispatcher::{DispatchOutcome, EventDispatcher};
pub use ledger::{Ledger, LedgerError, LedgerNotification, LedgerSnapshot, Position, SellPolicy};
pub use ledger_store::LedgerStore;
pub use order_registry::OrderRegistry;
pub use tca::{TcaReport, TransactionCostAnalyzer};
pub use types::{Direction, OrderRecord, OrderStatus, TradeRecord};
