use std::{fmt::Debug, rc::Rc};

use log::debug;

use crate::{
    action::{Action, Actions},
    offer::OFFERED_MIMES,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SourceRole {
    Selection,
    Drag,
}

/// Data we offer to other clients, snapshotted when the copy or drag
/// started.
#[derive(Debug)]
pub struct DataSource<S> {
    handle: S,
    role: SourceRole,
    payload: Rc<[u8]>,
    actions: Actions,
    action: Action,
}

impl<S> DataSource<S> {
    #[must_use]
    pub fn new(handle: S, role: SourceRole, payload: &[u8], actions: Actions) -> Self {
        Self {
            handle,
            role,
            payload: Rc::from(payload),
            actions,
            action: Action::None,
        }
    }

    #[must_use]
    pub const fn handle(&self) -> &S {
        &self.handle
    }

    #[must_use]
    pub const fn role(&self) -> SourceRole {
        self.role
    }

    #[must_use]
    pub fn payload(&self) -> &Rc<[u8]> {
        &self.payload
    }

    #[must_use]
    pub const fn actions(&self) -> Actions {
        self.actions
    }

    #[must_use]
    pub const fn action(&self) -> Action {
        self.action
    }

    pub fn set_action(&mut self, action: Action) {
        self.action = action;
    }

    #[must_use]
    pub fn offers_mime(&self, mime: &str) -> bool {
        OFFERED_MIMES.contains(&mime)
    }
}

/// Local sources: at most one active source per role, plus superseded ones
/// that still wait for the server to cancel them.
#[derive(Debug)]
pub struct Sources<S> {
    selection: Option<DataSource<S>>,
    drag: Option<DataSource<S>>,
    retiring: Vec<DataSource<S>>,
}

impl<S> Default for Sources<S> {
    fn default() -> Self {
        Self {
            selection: None,
            drag: None,
            retiring: Vec::new(),
        }
    }
}

impl<S: PartialEq + Debug> Sources<S> {
    /// Makes `source` the active source of its role. The previously active
    /// source, if any, keeps serving requests until it is cancelled.
    pub fn activate(&mut self, source: DataSource<S>) {
        let slot = self.slot(source.role);
        if let Some(old) = slot.replace(source) {
            debug!(
                "Source {:?} superseded, awaiting cancellation.",
                old.handle
            );
            self.retiring.push(old);
        }
    }

    #[must_use]
    pub fn active(&self, role: SourceRole) -> Option<&DataSource<S>> {
        match role {
            SourceRole::Selection => self.selection.as_ref(),
            SourceRole::Drag => self.drag.as_ref(),
        }
    }

    pub fn get_mut(&mut self, handle: &S) -> Option<&mut DataSource<S>> {
        self.selection
            .iter_mut()
            .chain(self.drag.iter_mut())
            .chain(self.retiring.iter_mut())
            .find(|source| source.handle == *handle)
    }

    /// Stops tracking the source behind `handle`, whether active or retiring.
    pub fn remove(&mut self, handle: &S) -> Option<DataSource<S>> {
        for slot in [&mut self.selection, &mut self.drag] {
            if slot.as_ref().is_some_and(|source| source.handle == *handle) {
                return slot.take();
            }
        }
        let idx = self
            .retiring
            .iter()
            .position(|source| source.handle == *handle)?;
        Some(self.retiring.swap_remove(idx))
    }

    #[must_use]
    pub fn retiring(&self) -> usize {
        self.retiring.len()
    }

    fn slot(&mut self, role: SourceRole) -> &mut Option<DataSource<S>> {
        match role {
            SourceRole::Selection => &mut self.selection,
            SourceRole::Drag => &mut self.drag,
        }
    }

    pub fn drain(&mut self) -> impl Iterator<Item = DataSource<S>> + '_ {
        self.selection
            .take()
            .into_iter()
            .chain(self.drag.take())
            .chain(self.retiring.drain(..))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offer::{TEXT_MIME, UTF8_STRING_MIME};

    fn source(handle: u32, role: SourceRole) -> DataSource<u32> {
        DataSource::new(handle, role, b"hello", Actions::empty())
    }

    #[test]
    fn payload_is_a_snapshot() {
        let mut text = b"hello".to_vec();
        let source = DataSource::new(1, SourceRole::Selection, &text, Actions::empty());
        text.clear();
        assert_eq!(&**source.payload(), b"hello");
        assert!(source.offers_mime(TEXT_MIME));
        assert!(source.offers_mime(UTF8_STRING_MIME));
        assert!(!source.offers_mime("image/png"));
    }

    #[test]
    fn superseded_sources_are_kept_until_removed() {
        let mut sources = Sources::default();
        sources.activate(source(1, SourceRole::Selection));
        sources.activate(source(2, SourceRole::Selection));
        sources.activate(source(3, SourceRole::Drag));

        assert_eq!(
            sources.active(SourceRole::Selection).map(DataSource::handle),
            Some(&2)
        );
        assert_eq!(sources.retiring(), 1);
        assert!(sources.get_mut(&1).is_some());

        assert_eq!(sources.remove(&1).map(|s| *s.handle()), Some(1));
        assert_eq!(sources.retiring(), 0);
        assert!(sources.remove(&1).is_none());

        assert_eq!(sources.remove(&3).map(|s| s.role()), Some(SourceRole::Drag));
        assert!(sources.active(SourceRole::Drag).is_none());
        assert_eq!(sources.drain().count(), 1);
    }
}
