use std::{
    fmt::{Debug, Formatter},
    os::fd::{AsFd, BorrowedFd, OwnedFd},
};

use log::trace;
use rustix::io::{Errno, ioctl_fionbio, read};

use crate::{IoErr, Result};

pub const CHUNK_SIZE: usize = 1024;

/// An incoming payload: the read end of a transfer pipe and everything
/// received from it so far.
pub struct Transfer {
    read: OwnedFd,
    buf: Vec<u8>,
}

#[derive(Debug)]
pub enum Progress {
    /// Nothing more to read for now.
    Continue,
    /// End of stream was reached, [`Transfer::into_payload`] yields the data.
    Complete,
    Failed(Errno),
}

impl Transfer {
    /// Takes over `read`, switching it to non-blocking mode.
    pub fn new(read: OwnedFd) -> Result<Self> {
        ioctl_fionbio(&read, true)
            .map_io_err(|| "Failed to make transfer pipe non-blocking.")?;
        Ok(Self {
            read,
            buf: Vec::with_capacity(CHUNK_SIZE),
        })
    }

    /// Performs a single read of at most [`CHUNK_SIZE`] bytes.
    ///
    /// The buffer doubles whenever less than a chunk of free space remains.
    /// After [`Progress::Complete`] or [`Progress::Failed`] the caller
    /// retires the transfer, which closes the pipe.
    pub fn advance(&mut self) -> Progress {
        let Self { read: fd, buf } = self;

        let len = buf.len();
        if buf.capacity() - len < CHUNK_SIZE {
            let target = (buf.capacity() * 2).max(CHUNK_SIZE);
            buf.reserve_exact(target - len);
        }
        buf.resize(len + CHUNK_SIZE, 0);

        let result = read(&*fd, &mut buf[len..]);
        buf.truncate(len + result.unwrap_or(0));

        match result {
            Ok(0) => Progress::Complete,
            Ok(count) => {
                trace!("Read {count} bytes, {} total.", buf.len());
                Progress::Continue
            }
            Err(Errno::AGAIN | Errno::INTR) => Progress::Continue,
            Err(e) => Progress::Failed(e),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.buf
    }
}

impl AsFd for Transfer {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.read.as_fd()
    }
}

impl Debug for Transfer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("read", &self.read)
            .field("len", &self.buf.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write, thread};

    use rustix::pipe::{PipeFlags, pipe_with};

    use super::*;

    fn drain(transfer: &mut Transfer) -> Progress {
        loop {
            match transfer.advance() {
                Progress::Continue => thread::yield_now(),
                p => return p,
            }
        }
    }

    fn transfer_of(len: usize) -> (Vec<u8>, Transfer) {
        let data = (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        let (r, w) = pipe_with(PipeFlags::CLOEXEC).unwrap();
        let mut transfer = Transfer::new(r).unwrap();

        let writer = {
            let data = data.clone();
            thread::spawn(move || File::from(w).write_all(&data).unwrap())
        };
        assert!(matches!(drain(&mut transfer), Progress::Complete));
        writer.join().unwrap();

        (data, transfer)
    }

    #[test]
    fn exact_payload_for_boundary_sizes() {
        for len in [0, 1, 1023, 1024, 1025, 4 * 1024 + 1, 64 * 1024 + 1] {
            let (data, transfer) = transfer_of(len);
            assert_eq!(transfer.len(), len);
            assert_eq!(transfer.into_payload(), data, "len {len}");
        }
    }

    #[test]
    fn growth_is_geometric() {
        let len = 300 * 1024 + 1;
        let (_, transfer) = transfer_of(len);

        let capacity = transfer.capacity();
        assert!(capacity >= len);
        assert!(capacity <= 2 * (len + CHUNK_SIZE), "capacity {capacity}");
        assert!((capacity / CHUNK_SIZE).is_power_of_two(), "capacity {capacity}");
    }

    #[test]
    fn would_block_continues() {
        let (r, _w) = pipe_with(PipeFlags::CLOEXEC).unwrap();
        let mut transfer = Transfer::new(r).unwrap();

        assert!(matches!(transfer.advance(), Progress::Continue));
        assert!(transfer.is_empty());
    }

    #[test]
    fn no_terminator_is_added() {
        let (r, w) = pipe_with(PipeFlags::CLOEXEC).unwrap();
        let mut transfer = Transfer::new(r).unwrap();
        File::from(w).write_all(b"hello").unwrap();

        assert!(matches!(drain(&mut transfer), Progress::Complete));
        assert_eq!(transfer.into_payload(), b"hello");
    }

    #[test]
    fn read_error_fails() {
        let dir = File::open("/").unwrap();
        let mut transfer = Transfer::new(dir.into()).unwrap();

        assert!(matches!(
            transfer.advance(),
            Progress::Failed(Errno::ISDIR)
        ));
        assert!(transfer.is_empty());
    }
}
