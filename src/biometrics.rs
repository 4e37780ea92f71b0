//! Scanvault - Biometric Authentication
//!
//! Platform prompt boundary plus a lockout wrapper. Sensitive key
//! operations consult this gate before touching key material.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{VaultError, VaultResult};

/// Platform biometric prompt (fingerprint/face). The OS integration lives
/// behind this trait; the core only sees availability and a yes/no answer.
pub trait BiometricPrompt: Send + Sync {
    /// Whether any biometric is enrolled and usable
    fn is_available(&self) -> bool;

    /// Show the platform prompt with the given reason
    fn authenticate(&self, reason: &str) -> VaultResult<bool>;
}

/// Prompt for platforms without biometric hardware.
pub struct NoBiometrics;

impl BiometricPrompt for NoBiometrics {
    fn is_available(&self) -> bool {
        false
    }

    fn authenticate(&self, _reason: &str) -> VaultResult<bool> {
        Err(VaultError::BiometricError("no biometric hardware".into()))
    }
}

/// Fixed-outcome prompt for tests and headless environments.
pub struct StaticBiometrics {
    available: bool,
    allow: bool,
}

impl StaticBiometrics {
    pub fn allowing() -> Self {
        Self {
            available: true,
            allow: true,
        }
    }

    pub fn denying() -> Self {
        Self {
            available: true,
            allow: false,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            allow: false,
        }
    }
}

impl BiometricPrompt for StaticBiometrics {
    fn is_available(&self) -> bool {
        self.available
    }

    fn authenticate(&self, _reason: &str) -> VaultResult<bool> {
        Ok(self.allow)
    }
}

/// Gate configuration
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Lock after this many failed prompts
    pub max_attempts: u8,
    /// Cooldown period after lockout (seconds)
    pub lockout_seconds: i64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_seconds: 300,
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    failed_attempts: u8,
    locked_until: Option<DateTime<Utc>>,
}

/// Lockout wrapper around a platform prompt. Repeated denials lock the
/// gate for a cooldown period.
pub struct BiometricGate<P: BiometricPrompt> {
    prompt: P,
    config: GateConfig,
    state: Mutex<GateState>,
}

impl<P: BiometricPrompt> BiometricGate<P> {
    pub fn new(prompt: P, config: GateConfig) -> Self {
        Self {
            prompt,
            config,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Check if locked out
    pub fn is_locked(&self) -> bool {
        let state = self.state.lock();
        match state.locked_until {
            Some(until) => Utc::now() < until,
            None => false,
        }
    }

    /// Remaining attempts before lockout
    pub fn remaining_attempts(&self) -> u8 {
        self.config
            .max_attempts
            .saturating_sub(self.state.lock().failed_attempts)
    }
}

impl<P: BiometricPrompt> BiometricPrompt for BiometricGate<P> {
    fn is_available(&self) -> bool {
        self.prompt.is_available()
    }

    fn authenticate(&self, reason: &str) -> VaultResult<bool> {
        if self.is_locked() {
            return Err(VaultError::BiometricError("gate locked out".into()));
        }

        match self.prompt.authenticate(reason)? {
            true => {
                let mut state = self.state.lock();
                state.failed_attempts = 0;
                state.locked_until = None;
                Ok(true)
            }
            false => {
                let mut state = self.state.lock();
                state.failed_attempts += 1;
                if state.failed_attempts >= self.config.max_attempts {
                    state.locked_until =
                        Some(Utc::now() + chrono::Duration::seconds(self.config.lockout_seconds));
                }
                Ok(false)
            }
        }
    }
}
