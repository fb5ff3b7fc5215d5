//! Live lifecycle tests against real Terraform and a bootstrapped Juju controller
//!
//! # Running Tests
//!
//! ```bash
//! PROVTEST_WORKING_DIR=./deploy \
//! cargo test -p provtest-cli --features live-e2e --test e2e -- --nocapture --test-threads=1
//! ```
//!
//! # Environment Variables
//!
//! - PROVTEST_CONFIG: Harness configuration file (optional)
//! - PROVTEST_WORKING_DIR: Terraform configuration to deploy
//! - PROVTEST_MODEL: Juju model (default: main)
//! - PROVTEST_BASELINE_VERSION: Released provider version (default: 0.22.0 for upgrade)
//! - PROVTEST_UPGRADE_REF: Source ref for the upgrade scenario (default: v1.0.0-beta2)
//! - PROVTEST_RUN_ID: Run ID for build directories (default: generated)

mod helpers;
mod lifecycle_e2e;
