//! The peer session protocol: framed pub/sub dispatch over an
//! authenticated TLS connection, plus the identity minting step that
//! binds the transport certificate to the router's signing key.

pub mod async_runtime;
pub mod communication;
pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod globals;
pub mod identity;
pub mod log;

use std::ops::Drop;

use error::*;
use globals::Flag;

static INITIALIZED: Flag = Flag::new();

/// Configures the init process of the crate.
pub struct InitConfig {
    /// Number of worker threads used by the tokio runtime.
    pub async_threads: usize,
}

/// Handle to the global data. When dropped, the data is deinitialized.
pub struct InitGuard;

/// Initializes global data (currently: the tokio runtime). Should always
/// be called before any other operation in this crate, otherwise runtime
/// panics may ensue.
pub unsafe fn init(c: InitConfig) -> Result<Option<InitGuard>> {
    if INITIALIZED.test() {
        return Ok(None);
    }
    async_runtime::init(c.async_threads).simple(ErrorKind::Communication)?;
    INITIALIZED.set();
    Ok(Some(InitGuard))
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        INITIALIZED.unset();
    }
}
