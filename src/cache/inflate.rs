//! Decompression with an upper bound on the output size.

use std::io::{self, Read};

use thiserror::Error;

/// Inflated-size ceiling applied when nothing else is configured.
pub const DEFAULT_MAX_INFLATED_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub(crate) enum InflateError {
    #[error(transparent)]
    Io(io::Error),
    #[error("inflated size exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Drain `reader`, refusing to produce more than `limit` bytes.
pub(crate) fn read_capped(reader: impl Read, limit: usize) -> Result<Vec<u8>, InflateError> {
    let mut out = Vec::new();
    let ceiling = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    reader
        .take(ceiling)
        .read_to_end(&mut out)
        .map_err(InflateError::Io)?;
    if out.len() > limit {
        return Err(InflateError::TooLarge { limit });
    }
    Ok(out)
}
