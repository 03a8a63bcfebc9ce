use std::{
    mem::MaybeUninit,
    os::fd::{AsFd, OwnedFd},
};

use arrayvec::ArrayVec;
use log::{debug, error, trace};
use rustix::{event::epoll, io::Errno};

use crate::{Error, IoErr, Result};

/// What a registered handle is used for. At most one handle per role can be
/// registered at a time.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// The display server connection, registered for the lifetime of the
    /// multiplexer.
    Protocol,
    ClipboardTransfer,
    DragTransfer,
    SelectionSend,
    DragSend,
}

impl Role {
    pub const COUNT: usize = 5;
    pub const ALL: [Self; Self::COUNT] = [
        Self::Protocol,
        Self::ClipboardTransfer,
        Self::DragTransfer,
        Self::SelectionSend,
        Self::DragSend,
    ];

    const fn index(self) -> usize {
        self as usize
    }

    const fn interest(self) -> epoll::EventFlags {
        match self {
            Self::Protocol | Self::ClipboardTransfer | Self::DragTransfer => epoll::EventFlags::IN,
            Self::SelectionSend | Self::DragSend => epoll::EventFlags::OUT,
        }
    }
}

/// The roles that fired during one wake, protocol first.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ready(ArrayVec<Role, { Role::COUNT }>);

impl Ready {
    fn insert(&mut self, role: Role) {
        if let Err(i) = self.0.binary_search(&role) {
            self.0.insert(i, role);
        }
    }

    #[must_use]
    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Role> for Ready {
    fn from_iter<T: IntoIterator<Item = Role>>(iter: T) -> Self {
        let mut ready = Self::default();
        for role in iter {
            ready.insert(role);
        }
        ready
    }
}

/// Readiness multiplexer over epoll with one interest slot per [`Role`].
#[derive(Debug)]
pub struct Multiplexer {
    epoll: OwnedFd,
    registered: [bool; Role::COUNT],
}

impl Multiplexer {
    pub fn new() -> Result<Self> {
        let epoll =
            epoll::create(epoll::CreateFlags::CLOEXEC).map_io_err(|| "Failed to create epoll.")?;
        Ok(Self {
            epoll,
            registered: [false; Role::COUNT],
        })
    }

    /// Adds `handle` to the interest set under `role`.
    ///
    /// Registering over an occupied role is a contract violation: debug
    /// builds fail with [`Error::DuplicateRegistration`] while release builds
    /// forget the stale entry and carry on. The stale handle leaves the epoll
    /// set once it is closed.
    pub fn register(&mut self, handle: impl AsFd, role: Role) -> Result<()> {
        if self.registered[role.index()] {
            if cfg!(debug_assertions) {
                return Err(Error::DuplicateRegistration { role });
            }
            error!("Handle already registered for {role:?}, retiring stale entry.");
        }

        epoll::add(
            &self.epoll,
            handle,
            epoll::EventData::new_u64(role.index() as u64),
            role.interest(),
        )
        .map_io_err(|| format!("Failed to register epoll interest for {role:?}."))?;
        self.registered[role.index()] = true;
        trace!("Registered interest for {role:?}.");
        Ok(())
    }

    /// Removes `handle` from the interest set. Must be called before the
    /// handle is closed.
    pub fn unregister(&mut self, handle: impl AsFd, role: Role) {
        if !self.registered[role.index()] {
            debug!("Nothing registered for {role:?}.");
            return;
        }
        self.registered[role.index()] = false;

        match epoll::delete(&self.epoll, handle) {
            // Already gone, e.g. after a forced retirement.
            Ok(()) | Err(Errno::NOENT) => trace!("Unregistered interest for {role:?}."),
            Err(e) => error!("Failed to remove epoll interest for {role:?}: {e}"),
        }
    }

    #[must_use]
    pub fn is_registered(&self, role: Role) -> bool {
        self.registered[role.index()]
    }

    /// Blocks until at least one registered handle is ready.
    ///
    /// An interrupted wait returns an empty set. Roles whose registration was
    /// dropped since the wake are filtered out, but callers must still
    /// tolerate a role firing without progress being possible.
    pub fn wait(&mut self) -> Result<Ready> {
        let mut events = [const { MaybeUninit::<epoll::Event>::uninit() }; Role::COUNT * 2];

        trace!("Waiting for event.");
        let (events, _) = match epoll::wait(&self.epoll, &mut events[..], None) {
            Err(Errno::INTR) => return Ok(Ready::default()),
            r => r.map_io_err(|| "Failed to wait for epoll events.")?,
        };

        Ok(events
            .iter()
            .filter_map(|&epoll::Event { flags: _, data }| {
                let token = data.u64();
                let role = usize::try_from(token)
                    .ok()
                    .and_then(|i| Role::ALL.get(i).copied());
                debug_assert!(role.is_some(), "Unknown epoll token: {token}");
                role
            })
            .filter(|&role| self.registered[role.index()])
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use rustix::{
        io::write,
        pipe::{PipeFlags, pipe_with},
    };

    use super::*;

    #[test]
    fn reports_readable_roles_protocol_first() {
        let mut mux = Multiplexer::new().unwrap();
        let (conn_r, conn_w) = pipe_with(PipeFlags::CLOEXEC).unwrap();
        let (clip_r, clip_w) = pipe_with(PipeFlags::CLOEXEC).unwrap();
        let (drag_r, _drag_w) = pipe_with(PipeFlags::CLOEXEC).unwrap();

        mux.register(&clip_r, Role::ClipboardTransfer).unwrap();
        mux.register(&drag_r, Role::DragTransfer).unwrap();
        mux.register(&conn_r, Role::Protocol).unwrap();

        write(&clip_w, b"x").unwrap();
        write(&conn_w, b"x").unwrap();

        let ready = mux.wait().unwrap();
        assert_eq!(
            ready.iter().collect::<Vec<_>>(),
            [Role::Protocol, Role::ClipboardTransfer]
        );
        assert!(!ready.contains(Role::DragTransfer));
    }

    #[test]
    fn unregistered_roles_do_not_fire() {
        let mut mux = Multiplexer::new().unwrap();
        let (conn_r, conn_w) = pipe_with(PipeFlags::CLOEXEC).unwrap();
        let (clip_r, clip_w) = pipe_with(PipeFlags::CLOEXEC).unwrap();

        mux.register(&conn_r, Role::Protocol).unwrap();
        mux.register(&clip_r, Role::ClipboardTransfer).unwrap();
        mux.unregister(&clip_r, Role::ClipboardTransfer);
        assert!(!mux.is_registered(Role::ClipboardTransfer));

        write(&clip_w, b"x").unwrap();
        write(&conn_w, b"x").unwrap();
        let ready = mux.wait().unwrap();
        assert_eq!(ready.iter().collect::<Vec<_>>(), [Role::Protocol]);

        // Unregistering twice is harmless.
        mux.unregister(&clip_r, Role::ClipboardTransfer);
    }

    #[test]
    fn hangup_counts_as_readable() {
        let mut mux = Multiplexer::new().unwrap();
        let (r, w) = pipe_with(PipeFlags::CLOEXEC).unwrap();
        mux.register(&r, Role::DragTransfer).unwrap();
        drop(w);

        assert!(mux.wait().unwrap().contains(Role::DragTransfer));
    }

    #[test]
    fn writable_interest_for_send_roles() {
        let mut mux = Multiplexer::new().unwrap();
        let (_r, w) = pipe_with(PipeFlags::CLOEXEC).unwrap();
        mux.register(&w, Role::SelectionSend).unwrap();

        assert_eq!(
            mux.wait().unwrap().iter().collect::<Vec<_>>(),
            [Role::SelectionSend]
        );
    }

    #[test]
    #[cfg(debug_assertions)]
    fn duplicate_registration_is_rejected() {
        let mut mux = Multiplexer::new().unwrap();
        let (a, _a) = pipe_with(PipeFlags::CLOEXEC).unwrap();
        let (b, _b) = pipe_with(PipeFlags::CLOEXEC).unwrap();

        mux.register(&a, Role::ClipboardTransfer).unwrap();
        assert!(matches!(
            mux.register(&b, Role::ClipboardTransfer),
            Err(Error::DuplicateRegistration {
                role: Role::ClipboardTransfer
            })
        ));
    }
}
