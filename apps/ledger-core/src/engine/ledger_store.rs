//! Ledger Persistence
//! Whole-state JSON file, rewritten (temp file + rename) on every mutation

use crate::engine::ledger::{Account, Position};
use crate::engine::types::Direction;

use chrono::Local;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One position entry as it appears on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedPosition {
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision")]
    pub volume: Decimal,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision")]
    pub price: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    positions: HashMap<String, PersistedPosition>,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    balance: Decimal,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision")]
    frozen: Decimal,
    #[serde(default)]
    update_time: Option<String>,
}

/// How the state was obtained on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Full-format file with balance, frozen and positions.
    Loaded,
    /// Positions-only map from an older version; balance is the starting value.
    Legacy,
    /// No file yet.
    Fresh,
    /// File present but unusable; fell back to a fresh state.
    Malformed,
}

#[derive(Debug, Clone)]
pub struct LoadedState {
    pub account: Account,
    pub positions: HashMap<String, Position>,
    pub outcome: LoadOutcome,
}

#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted state. Never fails: missing or malformed files yield a
    /// fresh state holding `starting_balance`.
    pub fn load(&self, starting_balance: Decimal) -> LoadedState {
        let fresh = |outcome| LoadedState {
            account: Account::new(starting_balance),
            positions: HashMap::new(),
            outcome,
        };

        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "No ledger file, starting fresh");
            return fresh(LoadOutcome::Fresh);
        }

        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ledger file unreadable, starting fresh");
                return fresh(LoadOutcome::Malformed);
            }
        };

        match parse_state(&raw, starting_balance) {
            Some(state) => {
                tracing::info!(
                    path = %self.path.display(),
                    balance = %state.account.balance,
                    frozen = %state.account.frozen,
                    positions = state.positions.len(),
                    legacy = state.outcome == LoadOutcome::Legacy,
                    "Loaded ledger state"
                );
                state
            }
            None => {
                tracing::warn!(path = %self.path.display(), "Ledger file malformed, starting fresh");
                fresh(LoadOutcome::Malformed)
            }
        }
    }

    /// Rewrite the whole file.
    pub fn save(&self, account: &Account, positions: &HashMap<String, Position>) -> Result<(), StoreError> {
        let file = LedgerFile {
            positions: positions
                .iter()
                .map(|(symbol, p)| {
                    (
                        symbol.clone(),
                        PersistedPosition {
                            volume: p.volume,
                            direction: p.direction,
                            price: p.avg_price,
                        },
                    )
                })
                .collect(),
            balance: account.balance,
            frozen: account.frozen,
            update_time: Some(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        };

        let json = serde_json::to_string_pretty(&file)?;
        let temp_path = self.temp_path();

        std::fs::write(&temp_path, json).map_err(|source| StoreError::Io {
            path: temp_path.clone(),
            source,
        })?;
        std::fs::rename(&temp_path, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ledger.json".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }
}

fn parse_state(raw: &str, starting_balance: Decimal) -> Option<LoadedState> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;

    if object.contains_key("positions") && object.contains_key("balance") {
        let file: LedgerFile = serde_json::from_value(value).ok()?;
        let mut account = Account {
            balance: file.balance,
            frozen: file.frozen,
        };
        if account.frozen < Decimal::ZERO || account.frozen > account.balance.max(Decimal::ZERO) {
            tracing::warn!(
                balance = %account.balance,
                frozen = %account.frozen,
                "Persisted frozen funds out of range, clamping"
            );
            account.frozen = account.frozen.max(Decimal::ZERO).min(account.balance.max(Decimal::ZERO));
        }
        return Some(LoadedState {
            account,
            positions: into_positions(file.positions),
            outcome: LoadOutcome::Loaded,
        });
    }

    let legacy: HashMap<String, PersistedPosition> = serde_json::from_value(value).ok()?;
    Some(LoadedState {
        account: Account::new(starting_balance),
        positions: into_positions(legacy),
        outcome: LoadOutcome::Legacy,
    })
}

fn into_positions(raw: HashMap<String, PersistedPosition>) -> HashMap<String, Position> {
    raw.into_iter()
        .filter_map(|(symbol, p)| {
            if p.volume <= Decimal::ZERO {
                if p.volume < Decimal::ZERO {
                    tracing::warn!(symbol = %symbol, volume = %p.volume, "Dropping negative persisted position");
                }
                return None;
            }
            let Some(direction) = p.direction else {
                tracing::warn!(symbol = %symbol, volume = %p.volume, "Dropping persisted position without direction");
                return None;
            };
            Some((
                symbol,
                Position {
                    volume: p.volume,
                    direction: Some(direction),
                    avg_price: p.price,
                },
            ))
        })
        .collect()
}
