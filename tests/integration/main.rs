//! Integration tests: full check-in runs with in-memory signers.

mod mock_signer;
mod run_cycle;
