//! Deploy/upgrade/destroy lifecycle against a live model
//!
//! # Test Flow
//!
//! 1. Pin the released provider and apply (resources must be added)
//! 2. Wait for every unit to be active and idle
//! 3. (upgrade) Build the provider at the target ref and re-apply through a
//!    dev override (nothing may change)
//! 4. Destroy (resources must be destroyed) and wait for the model to idle
//! 5. Fallback cleanup restores the configuration either way
#![cfg(feature = "live-e2e")]

use provtest_cli::commands::lifecycle::Scenario;

use super::helpers::run_scenario;

#[tokio::test]
async fn test_plain_lifecycle() {
    let record = run_scenario(Scenario::Plain).await;
    assert!(record.cleanup.is_clean(), "cleanup: {:?}", record.cleanup);
    record.into_result().expect("plain lifecycle");
}

#[tokio::test]
async fn test_upgrade_lifecycle() {
    let record = run_scenario(Scenario::Upgrade).await;
    record.into_result().expect("upgrade lifecycle");
}
