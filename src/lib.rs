//! Arbitration engine for competing assembly populations.
//!
//! Assemblies accumulate injected evidence, channels compete through
//! normalized dominance with lateral inhibition, and an irreversible
//! latch commits a single winner once dominance contrast and inhibitory
//! relief both hold above threshold for a sustained window. Modulatory
//! pressure (value, urgency, salience) only enters through bounded,
//! policy-gated signals that can bias but never decide.

pub mod arbiter;
pub mod assembly;
pub mod competition;
pub mod config;
pub mod latch;
pub mod modulation;
pub mod prng;
pub mod snapshot;
pub mod trace;
