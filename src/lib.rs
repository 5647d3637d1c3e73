//! Proof of Trust: an attested daily news ledger with sentiment voting.
//!
//! * [`ledger`]: the article ledger holding daily batches, the freshness gate and
//!   one-vote-per-article sentiment records.
//! * [`attestation`]: Merkle inclusion and committee-signature checks that
//!   an attested response must pass before it reaches the ledger.
//! * [`feed`]: the Web2Json top-articles request and response decoding.
//! * [`client`]: blocking HTTP client for the verifier and DA layer.
//! * [`store`]: JSON snapshot persistence with an integrity root.

pub mod address;
pub mod attestation;
pub mod client;
pub mod feed;
pub mod ledger;
pub mod merkle;
pub mod settings;
pub mod store;

pub use address::Address;
pub use ledger::{ArticleLedger, LedgerError};
