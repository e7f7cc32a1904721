//! Append-only tar writer.
//!
//! [`TarAssembler`] wraps a [`tar::Builder`] over any `Write` sink (a file on
//! disk in production, a `Vec<u8>` in tests). Entries are written in call
//! order with a ustar header carrying the exact size and mode `0644`. Once
//! closed, every further call fails with [`ArchiveError::Closed`].
use std::io::Write;

use tar::{Builder, EntryType, Header};
use tracing::debug;

use crate::ArchiveError;

/// Mode applied to every archive entry.
pub const ENTRY_MODE: u32 = 0o644;

enum State<W: Write> {
    Open(Builder<W>),
    Closed(Option<W>),
}

/// Single-writer tar archive builder.
pub struct TarAssembler<W: Write> {
    state: State<W>,
}

impl<W: Write> TarAssembler<W> {
    pub fn new(sink: W) -> Self {
        Self {
            state: State::Open(Builder::new(sink)),
        }
    }

    /// Append one regular-file entry named `path` holding `bytes`.
    pub fn add_file(&mut self, bytes: &[u8], path: &str) -> Result<(), ArchiveError> {
        let State::Open(builder) = &mut self.state else {
            return Err(ArchiveError::Closed);
        };

        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_size(bytes.len() as u64);
        header.set_mode(ENTRY_MODE);
        header.set_mtime(0);

        builder
            .append_data(&mut header, path, bytes)
            .map_err(|source| ArchiveError::Write {
                path: path.to_string(),
                source,
            })?;
        debug!(path, size = bytes.len(), "tar_entry_written");
        Ok(())
    }

    /// Write the tar trailer and flush the sink. A second call fails.
    pub fn close(&mut self) -> Result<(), ArchiveError> {
        let state = std::mem::replace(&mut self.state, State::Closed(None));
        match state {
            State::Open(builder) => {
                let mut sink = builder.into_inner().map_err(ArchiveError::Finish)?;
                sink.flush().map_err(ArchiveError::Finish)?;
                self.state = State::Closed(Some(sink));
                Ok(())
            }
            closed @ State::Closed(_) => {
                self.state = closed;
                Err(ArchiveError::Closed)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed(_))
    }

    /// Release the sink after [`close`](Self::close). Returns `None` while the
    /// archive is still open or when finalizing it failed.
    pub fn into_inner(self) -> Option<W> {
        match self.state {
            State::Closed(sink) => sink,
            State::Open(_) => None,
        }
    }
}
