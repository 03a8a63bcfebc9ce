//! The boundary with the display server: events it pushes to us and the
//! requests we make of it.
//!
//! Semantics follow the Wayland `wl_data_device`, `wl_data_offer` and
//! `wl_data_source` interfaces.

use std::{
    fmt::Debug,
    os::fd::{BorrowedFd, OwnedFd},
};

use crate::action::{Action, Actions, Position};

#[derive(Debug)]
pub enum Event<O, S> {
    /// A new offer exists; its role becomes known with a later
    /// [`Event::DragEnter`] or [`Event::Selection`].
    OfferAnnounced(O),
    OfferMimeType { offer: O, mime: String },
    OfferSourceActions { offer: O, actions: Actions },
    OfferAction { offer: O, action: Action },

    DragEnter {
        serial: u32,
        offer: Option<O>,
        position: Position,
    },
    DragMotion(Position),
    DragLeave,
    DragDrop,
    Selection(Option<O>),

    SourceTarget { source: S, mime: Option<String> },
    SourceSend { source: S, mime: String, fd: OwnedFd },
    SourceCancelled(S),
    SourceDndDropPerformed(S),
    SourceDndFinished(S),
    SourceAction { source: S, action: Action },
}

/// Requests the engine issues to the display server.
pub trait Protocol {
    type Offer: Clone + PartialEq + Debug;
    type Source: Clone + PartialEq + Debug;

    /// Asks the offer's owner to write `mime` data into `fd`.
    fn offer_receive(&mut self, offer: &Self::Offer, mime: &str, fd: BorrowedFd<'_>);
    fn offer_set_actions(&mut self, offer: &Self::Offer, actions: Actions, preferred: Action);
    fn offer_accept(&mut self, offer: &Self::Offer, serial: u32, mime: Option<&str>);
    fn offer_finish(&mut self, offer: &Self::Offer);
    fn offer_destroy(&mut self, offer: &Self::Offer);

    fn source_create(&mut self) -> Self::Source;
    fn source_offer(&mut self, source: &Self::Source, mime: &str);
    fn source_set_actions(&mut self, source: &Self::Source, actions: Actions);
    fn source_destroy(&mut self, source: &Self::Source);

    fn set_selection(&mut self, source: Option<&Self::Source>, serial: u32);
    /// Starts a drag from the local surface.
    fn start_drag(&mut self, source: &Self::Source, serial: u32);
}
