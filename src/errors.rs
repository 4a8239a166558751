//! Error classification for the engine (§7).
//!
//! Internal code mostly deals in `anyhow::Error` (teacher's convention);
//! this module exists only where the RPC boundary needs to pick a specific
//! JSON-RPC error code, which `anyhow::Error` does not carry.

/// The subset of §7's error categories that need to cross the RPC boundary
/// with a specific wire representation. Transient, liquidity-signal, and
/// internal-invariant errors never reach the caller synchronously — they
/// are logged and handled by the controller (§4.6, §4.7, §7).
#[derive(Debug, thiserror::Error)]
pub enum SlingError {
    /// A rejected RPC: invalid option, unknown scid, duplicate job,
    /// candidate conflict, excepting an owned channel. Maps to JSON-RPC
    /// code -32602.
    #[error("{0}")]
    Validation(String),

    /// Anything else, wrapped from `anyhow::Error` at the boundary.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SlingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SlingError::Validation(msg.into())
    }

    /// JSON-RPC error code for this error, per §6/§7.
    pub fn rpc_code(&self) -> i32 {
        match self {
            SlingError::Validation(_) => -32602,
            SlingError::Internal(_) => -32603,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_invalid_params_code() {
        let e = SlingError::validation("You can't except your own channels");
        assert_eq!(e.rpc_code(), -32602);
    }

    #[test]
    fn internal_error_wraps_anyhow() {
        let e: SlingError = anyhow::anyhow!("boom").into();
        assert_eq!(e.rpc_code(), -32603);
    }
}
