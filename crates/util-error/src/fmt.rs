// SPDX-License-Identifier: MIT

//! Compact single-line formatting of error chains, for log fields

use std::error::Error;
use std::fmt;

/// Displays an error followed by all its sources, separated with `: `
pub struct CompactError<'e, E: ?Sized>(&'e E);

impl<E> fmt::Display for CompactError<'_, E>
where
    E: Error + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}

pub trait FmtCompact {
    fn fmt_compact(&self) -> CompactError<'_, Self>;
}

impl<E> FmtCompact for E
where
    E: Error + ?Sized,
{
    fn fmt_compact(&self) -> CompactError<'_, Self> {
        CompactError(self)
    }
}
