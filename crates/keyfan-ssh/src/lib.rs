// ABOUTME: Key material for keyfan: state tokens, tagged public keys, key generation.
// ABOUTME: Pure validation logic plus the generator seam and its scoped work directory.

pub mod error;
pub mod key;
pub mod keygen;
pub mod state;
pub mod workdir;

pub use error::{KeyError, Result};
pub use key::PublicKeyRecord;
pub use keygen::{generate, BuiltinKeygen, GeneratedKey, KeyGenerator, SshKeygen};
pub use state::{generate_passphrase, StateToken, DEFAULT_STATE_PREFIX};
pub use workdir::WorkDir;
