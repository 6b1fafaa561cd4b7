//! C2 — Payee & Provider Registries. Closed, enumerable sets; no free-text
//! recipients per spec.md Non-goals.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Sandbox,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayeeEntry {
    pub display_name: String,
    pub provider_ref: String,
    pub environment: Environment,
    pub currency: String,
    pub allowed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub environment: Environment,
    pub allowed: bool,
}

/// Closed payee set: `payee-ref -> PayeeEntry`.
#[derive(Debug, Clone, Default)]
pub struct PayeeRegistry {
    entries: HashMap<String, PayeeEntry>,
}

impl PayeeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, payee_ref: impl Into<String>, entry: PayeeEntry) {
        self.entries.insert(payee_ref.into(), entry);
    }

    pub fn get(&self, payee_ref: &str) -> Option<&PayeeEntry> {
        self.entries.get(payee_ref)
    }
}

/// Closed provider set: `provider-ref -> ProviderEntry`.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    entries: HashMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider_ref: impl Into<String>, entry: ProviderEntry) {
        self.entries.insert(provider_ref.into(), entry);
    }

    pub fn get(&self, provider_ref: &str) -> Option<&ProviderEntry> {
        self.entries.get(provider_ref)
    }
}

/// `require-allowed(payee, provider)` — fails with `PayeeNotAllowed` if the
/// payee is not registered, not marked allowed, or if its bound
/// `provider-ref` does not equal the executing provider. Sandbox payees
/// never resolve against live providers and vice versa.
pub fn require_allowed(
    payees: &PayeeRegistry,
    providers: &ProviderRegistry,
    payee_ref: &str,
    executing_provider_ref: &str,
) -> Result<(), RegistryError> {
    let payee = payees
        .get(payee_ref)
        .ok_or_else(|| RegistryError::PayeeNotAllowed(payee_ref.to_string()))?;

    if !payee.allowed || payee.provider_ref != executing_provider_ref {
        return Err(RegistryError::PayeeNotAllowed(payee_ref.to_string()));
    }

    let provider = providers
        .get(executing_provider_ref)
        .ok_or_else(|| RegistryError::ProviderNotAllowed(executing_provider_ref.to_string()))?;

    if !provider.allowed || provider.environment != payee.environment {
        return Err(RegistryError::ProviderNotAllowed(
            executing_provider_ref.to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> (PayeeRegistry, ProviderRegistry) {
        let mut payees = PayeeRegistry::new();
        payees.register(
            "sandbox-utility",
            PayeeEntry {
                display_name: "Sandbox Utility Co".into(),
                provider_ref: "mock-write".into(),
                environment: Environment::Sandbox,
                currency: "GBP".into(),
                allowed: true,
            },
        );
        payees.register(
            "disabled-payee",
            PayeeEntry {
                display_name: "Disabled Payee".into(),
                provider_ref: "mock-write".into(),
                environment: Environment::Sandbox,
                currency: "GBP".into(),
                allowed: false,
            },
        );

        let mut providers = ProviderRegistry::new();
        providers.register(
            "mock-write",
            ProviderEntry {
                environment: Environment::Sandbox,
                allowed: true,
            },
        );
        providers.register(
            "truelayer-live",
            ProviderEntry {
                environment: Environment::Live,
                allowed: true,
            },
        );

        (payees, providers)
    }

    #[test]
    fn allowed_payee_and_provider_passes() {
        let (payees, providers) = fixtures();
        assert!(require_allowed(&payees, &providers, "sandbox-utility", "mock-write").is_ok());
    }

    #[test]
    fn unknown_payee_fails() {
        let (payees, providers) = fixtures();
        let err = require_allowed(&payees, &providers, "ghost", "mock-write").unwrap_err();
        assert_eq!(err, RegistryError::PayeeNotAllowed("ghost".into()));
    }

    #[test]
    fn disabled_payee_fails() {
        let (payees, providers) = fixtures();
        let err =
            require_allowed(&payees, &providers, "disabled-payee", "mock-write").unwrap_err();
        assert_eq!(err, RegistryError::PayeeNotAllowed("disabled-payee".into()));
    }

    #[test]
    fn sandbox_payee_against_live_provider_fails() {
        let (payees, providers) = fixtures();
        let err =
            require_allowed(&payees, &providers, "sandbox-utility", "truelayer-live").unwrap_err();
        assert_eq!(err, RegistryError::PayeeNotAllowed("sandbox-utility".into()));
    }
}
