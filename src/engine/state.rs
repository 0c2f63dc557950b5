use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::wallet::WalletCapability;

/// Observable engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Disconnected,
    Connected,
    /// Waiting for the wallet to sign the authentication message.
    Signing,
    /// Authenticated and idle.
    Signed,
    Trading,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Disconnected => "disconnected",
            EngineState::Connected => "connected",
            EngineState::Signing => "signing",
            EngineState::Signed => "signed",
            EngineState::Trading => "trading",
        };
        f.write_str(s)
    }
}

/// Session flags guarded by [`SessionGuard`](super::SessionGuard).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionFlag {
    Signing,
    Trading,
}

/// Mutable wallet session. The observable state is derived from it so the
/// two can never disagree.
#[derive(Default)]
pub(crate) struct Session {
    pub wallet: Option<Arc<dyn WalletCapability>>,
    pub authenticated: bool,
    pub signing: bool,
    pub trading: bool,
    /// Bumped on every wallet change.
    pub epoch: u64,
}

impl Session {
    pub fn state(&self) -> EngineState {
        match self.wallet {
            None => EngineState::Disconnected,
            Some(_) if self.trading => EngineState::Trading,
            Some(_) if self.signing => EngineState::Signing,
            Some(_) if self.authenticated => EngineState::Signed,
            Some(_) => EngineState::Connected,
        }
    }

    pub fn set(&mut self, flag: SessionFlag, value: bool) {
        match flag {
            SessionFlag::Signing => self.signing = value,
            SessionFlag::Trading => self.trading = value,
        }
    }

    /// Replaces the connected wallet and drops the authentication.
    pub fn switch_wallet(&mut self, wallet: Option<Arc<dyn WalletCapability>>) {
        self.wallet = wallet;
        self.authenticated = false;
        self.signing = false;
        self.epoch += 1;
    }
}
