use std::{
    borrow::Cow,
    os::fd::{AsFd, OwnedFd},
};

use log::{debug, info, trace, warn};
use rustix::pipe::{PipeFlags, pipe_with};

use crate::{
    IoErr, Result,
    action::{Action, Actions, Position, SurfaceSize, action_for},
    mux::{Multiplexer, Ready, Role},
    offer::{AnnouncedOffers, DataOffer, OFFERED_MIMES, OfferRole, TEXT_MIME},
    protocol::{Event, Protocol},
    send::{PendingSend, SendProgress},
    source::{DataSource, SourceRole, Sources},
    transfer::{Progress, Transfer},
};


/// Sink-side state of a drag hovering over the local surface.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DragSession {
    /// Serial of the enter event, used for every accept during the drag.
    pub serial: u32,
    /// Last action requested from the policy. Only a change of this value
    /// triggers a new negotiation.
    pub requested: Action,
    /// Action in effect for the drop: the requested one until the server
    /// picks its own.
    pub action: Action,
    pub position: Position,
}

/// A payload received in full from another client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub role: OfferRole,
    pub bytes: Vec<u8>,
}

impl Payload {
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

const fn transfer_role(role: OfferRole) -> Role {
    match role {
        OfferRole::Selection => Role::ClipboardTransfer,
        OfferRole::Drag => Role::DragTransfer,
    }
}

const fn send_role(role: SourceRole) -> Role {
    match role {
        SourceRole::Selection => Role::SelectionSend,
        SourceRole::Drag => Role::DragSend,
    }
}

/// Owns every offer, source and in-flight transfer, reacting to protocol
/// events and I/O readiness.
///
/// Each wake must be handled in two steps: first every protocol event read
/// from the connection goes through [`TransferEngine::handle_event`], then
/// [`TransferEngine::on_ready`] advances the transfers. Protocol events may
/// withdraw an offer whose transfer is still in flight, so the order
/// matters.
#[derive(Debug)]
pub struct TransferEngine<P: Protocol> {
    protocol: P,
    mux: Multiplexer,
    surface: SurfaceSize,

    announced: AnnouncedOffers<P::Offer>,
    selection: Option<DataOffer<P::Offer>>,
    drag: Option<DataOffer<P::Offer>>,
    session: Option<DragSession>,
    clipboard_transfer: Option<Transfer>,
    drag_transfer: Option<Transfer>,

    sources: Sources<P::Source>,
    selection_send: Option<PendingSend>,
    drag_send: Option<PendingSend>,
}

impl<P: Protocol> TransferEngine<P> {
    /// Creates the engine, permanently registering `connection` as the
    /// protocol handle.
    pub fn new(protocol: P, connection: impl AsFd, surface: SurfaceSize) -> Result<Self> {
        let mut mux = Multiplexer::new()?;
        mux.register(connection, Role::Protocol)?;

        Ok(Self {
            protocol,
            mux,
            surface,
            announced: AnnouncedOffers::default(),
            selection: None,
            drag: None,
            session: None,
            clipboard_transfer: None,
            drag_transfer: None,
            sources: Sources::default(),
            selection_send: None,
            drag_send: None,
        })
    }

    pub const fn protocol(&self) -> &P {
        &self.protocol
    }

    pub const fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    #[must_use]
    pub const fn selection_offer(&self) -> Option<&DataOffer<P::Offer>> {
        self.selection.as_ref()
    }

    #[must_use]
    pub const fn drag_offer(&self) -> Option<&DataOffer<P::Offer>> {
        self.drag.as_ref()
    }

    #[must_use]
    pub const fn drag_session(&self) -> Option<&DragSession> {
        self.session.as_ref()
    }

    #[must_use]
    pub const fn sources(&self) -> &Sources<P::Source> {
        &self.sources
    }

    #[must_use]
    pub const fn is_receiving(&self, role: OfferRole) -> bool {
        match role {
            OfferRole::Selection => self.clipboard_transfer.is_some(),
            OfferRole::Drag => self.drag_transfer.is_some(),
        }
    }

    #[must_use]
    pub const fn is_sending(&self, role: SourceRole) -> bool {
        match role {
            SourceRole::Selection => self.selection_send.is_some(),
            SourceRole::Drag => self.drag_send.is_some(),
        }
    }

    /// Blocks until the connection or an in-flight transfer is ready.
    pub fn wait(&mut self) -> Result<Ready> {
        self.mux.wait()
    }

    pub fn handle_event(&mut self, event: Event<P::Offer, P::Source>) -> Result<()> {
        trace!("Protocol event: {event:?}");
        match event {
            Event::OfferAnnounced(offer) => {
                if let Some(evicted) = self.announced.announce(offer) {
                    self.protocol.offer_destroy(evicted.handle());
                }
            }
            Event::OfferMimeType { offer, mime } => {
                if let Some(o) = self.find_offer(&offer) {
                    o.add_mime(mime);
                } else {
                    warn!("Mime type {mime:?} for unknown offer {offer:?}, ignoring.");
                }
            }
            Event::OfferSourceActions { offer, actions } => {
                if let Some(o) = self.find_offer(&offer) {
                    o.set_source_actions(actions);
                } else {
                    warn!("Source actions for unknown offer {offer:?}, ignoring.");
                }
            }
            Event::OfferAction { offer, action } => self.offer_action(&offer, action),

            Event::DragEnter {
                serial,
                offer,
                position,
            } => self.drag_enter(serial, offer, position),
            Event::DragMotion(position) => self.drag_motion(position),
            Event::DragLeave => self.drag_leave(),
            Event::DragDrop => self.drag_drop()?,
            Event::Selection(offer) => self.selection_changed(offer),

            Event::SourceTarget { source, mime } => {
                if self.sources.get_mut(&source).is_some() {
                    debug!("Target of source {source:?} now accepts {mime:?}.");
                } else {
                    warn!("Target event for unknown source {source:?}, ignoring.");
                }
            }
            Event::SourceSend { source, mime, fd } => self.source_send(&source, &mime, fd)?,
            Event::SourceCancelled(source) => {
                if let Some(s) = self.sources.remove(&source) {
                    debug!("Source {source:?} for {:?} cancelled.", s.role());
                    self.protocol.source_destroy(s.handle());
                } else {
                    warn!("Cancellation of unknown source {source:?}, ignoring.");
                }
            }
            Event::SourceDndDropPerformed(source) => {
                debug!("Drag of source {source:?} dropped.");
            }
            Event::SourceDndFinished(source) => {
                if let Some(s) = self.sources.remove(&source) {
                    if s.action() == Action::Move {
                        info!("Dragged data moved to target, releasing it.");
                    } else {
                        debug!("Drag of source {source:?} finished with {:?}.", s.action());
                    }
                    self.protocol.source_destroy(s.handle());
                } else {
                    warn!("Drag finish for unknown source {source:?}, ignoring.");
                }
            }
            Event::SourceAction { source, action } => {
                if let Some(s) = self.sources.get_mut(&source) {
                    debug!("Drag of source {source:?} negotiated {action:?}.");
                    s.set_action(action);
                } else {
                    warn!("Action for unknown source {source:?}, ignoring.");
                }
            }
        }
        Ok(())
    }

    /// Advances the transfers and deferred writes whose handles are ready,
    /// returning the payloads that completed.
    pub fn on_ready(&mut self, ready: &Ready) -> Vec<Payload> {
        let mut payloads = Vec::new();
        for role in ready.iter() {
            match role {
                Role::Protocol => {}
                Role::ClipboardTransfer => payloads.extend(self.advance(OfferRole::Selection)),
                Role::DragTransfer => payloads.extend(self.advance(OfferRole::Drag)),
                Role::SelectionSend => self.resume_send(SourceRole::Selection),
                Role::DragSend => self.resume_send(SourceRole::Drag),
            }
        }
        payloads
    }

    /// Requests the current selection as plain text.
    pub fn start_paste(&mut self) -> Result<()> {
        let Some(offer) = &self.selection else {
            info!("Nothing to paste: the selection is empty.");
            return Ok(());
        };
        if offer.text_mime().is_none() {
            warn!(
                "Selection does not offer {TEXT_MIME:?}, only {:?}.",
                offer.mimes()
            );
            return Ok(());
        }

        self.start_receive(OfferRole::Selection)
    }

    /// Offers `text` as the new selection.
    pub fn start_copy(&mut self, text: &str, serial: u32) {
        let handle = self.new_source();
        self.protocol.set_selection(Some(&handle), serial);
        debug!("Offering {} bytes as selection with {handle:?}.", text.len());

        self.sources.activate(DataSource::new(
            handle,
            SourceRole::Selection,
            text.as_bytes(),
            Actions::empty(),
        ));
    }

    /// Starts dragging `text` out of the local surface.
    pub fn start_drag(&mut self, text: &str, serial: u32) {
        let actions = Actions::COPY | Actions::MOVE | Actions::ASK;
        let handle = self.new_source();
        self.protocol.source_set_actions(&handle, actions);
        self.protocol.start_drag(&handle, serial);
        debug!("Dragging {} bytes with {handle:?}.", text.len());

        self.sources.activate(DataSource::new(
            handle,
            SourceRole::Drag,
            text.as_bytes(),
            actions,
        ));
    }

    fn new_source(&mut self) -> P::Source {
        let handle = self.protocol.source_create();
        for mime in OFFERED_MIMES {
            self.protocol.source_offer(&handle, mime);
        }
        handle
    }

    fn find_offer(&mut self, handle: &P::Offer) -> Option<&mut DataOffer<P::Offer>> {
        self.announced
            .iter_mut()
            .chain(self.selection.iter_mut())
            .chain(self.drag.iter_mut())
            .find(|offer| offer.handle() == handle)
    }

    fn offer_action(&mut self, handle: &P::Offer, action: Action) {
        let Some(offer) = self.find_offer(handle) else {
            warn!("Action for unknown offer {handle:?}, ignoring.");
            return;
        };
        offer.set_action(action);

        let is_drag = self.drag.as_ref().is_some_and(|o| o.handle() == handle);
        match &mut self.session {
            Some(session) if is_drag => {
                debug!("Drag action negotiated: {action:?}.");
                session.action = action;
            }
            _ => {}
        }
    }

    fn selection_changed(&mut self, handle: Option<P::Offer>) {
        if let (Some(current), Some(new)) = (&self.selection, &handle) {
            if current.handle() == new {
                trace!("Selection unchanged.");
                return;
            }
        }

        self.abandon_transfer(OfferRole::Selection);
        if let Some(old) = self.selection.take() {
            debug!("Selection offer {:?} replaced.", old.handle());
            self.protocol.offer_destroy(old.handle());
        }
        self.selection = handle.map(|h| self.announced.adopt(h, OfferRole::Selection));
    }

    fn drag_enter(&mut self, serial: u32, handle: Option<P::Offer>, position: Position) {
        if self.session.is_some() || self.drag.is_some() {
            debug!("New drag entered, withdrawing the previous one.");
            self.withdraw_drag();
        }

        let action = action_for(position, self.surface);
        debug!("Drag entered at {position:?} with serial {serial}: {action:?}.");
        self.session = Some(DragSession {
            serial,
            requested: action,
            action,
            position,
        });
        self.drag = handle.map(|h| self.announced.adopt(h, OfferRole::Drag));
        self.negotiate(action);
    }

    fn drag_motion(&mut self, position: Position) {
        let Some(session) = &mut self.session else {
            trace!("Motion without an active drag.");
            return;
        };
        session.position = position;

        let action = action_for(position, self.surface);
        if action != session.requested {
            debug!("Drag moved to {position:?}: {action:?}.");
            session.requested = action;
            session.action = action;
            self.negotiate(action);
        }
    }

    fn drag_leave(&mut self) {
        if self.session.is_none() {
            debug!("Drag left without an active session, nothing to withdraw.");
            return;
        }
        debug!("Drag left.");
        self.withdraw_drag();
    }

    fn drag_drop(&mut self) -> Result<()> {
        let Some(session) = &mut self.session else {
            warn!("Drop without an active drag, ignoring.");
            return Ok(());
        };
        let Some(offer) = &self.drag else {
            debug!("Drop of a drag without data.");
            self.session = None;
            return Ok(());
        };

        if session.action == Action::Ask {
            // No prompt: settle on copying and wait for the drop to be
            // confirmed again.
            info!("Drop asks for an action, forcing copy.");
            session.action = Action::Copy;
            self.negotiate(Action::Copy);
            return Ok(());
        }
        if session.action == Action::None {
            debug!("Drop without an accepted action, rejecting it.");
            self.withdraw_drag();
            return Ok(());
        }
        if offer.text_mime().is_none() {
            warn!("Dropped data has no {TEXT_MIME:?}, only {:?}.", offer.mimes());
            self.withdraw_drag();
            return Ok(());
        }

        debug!("Dropped with {:?}.", session.action);
        self.session = None;
        self.start_receive(OfferRole::Drag)
    }

    /// Requests `action` for the hovering drag offer.
    fn negotiate(&mut self, action: Action) {
        let (Some(offer), Some(session)) = (&self.drag, &self.session) else {
            return;
        };
        self.protocol
            .offer_set_actions(offer.handle(), action.as_set(), action);
        self.protocol
            .offer_accept(offer.handle(), session.serial, offer.text_mime());
    }

    fn withdraw_drag(&mut self) {
        self.session = None;
        self.abandon_transfer(OfferRole::Drag);
        if let Some(offer) = self.drag.take() {
            debug!("Drag offer {:?} withdrawn.", offer.handle());
            self.protocol.offer_destroy(offer.handle());
        }
    }

    fn start_receive(&mut self, role: OfferRole) -> Result<()> {
        self.abandon_transfer(role);
        let offer = match role {
            OfferRole::Selection => &self.selection,
            OfferRole::Drag => &self.drag,
        };
        let Some(offer) = offer else {
            return Ok(());
        };

        let (read, write) =
            pipe_with(PipeFlags::CLOEXEC).map_io_err(|| "Failed to create transfer pipe.")?;
        self.protocol.offer_receive(offer.handle(), TEXT_MIME, write.as_fd());
        drop(write);
        debug!("Receiving {role:?} offer {:?}.", offer.handle());

        let transfer = Transfer::new(read)?;
        self.mux.register(&transfer, transfer_role(role))?;
        *self.transfer_slot(role) = Some(transfer);
        Ok(())
    }

    fn transfer_slot(&mut self, role: OfferRole) -> &mut Option<Transfer> {
        match role {
            OfferRole::Selection => &mut self.clipboard_transfer,
            OfferRole::Drag => &mut self.drag_transfer,
        }
    }

    fn retire_transfer(&mut self, role: OfferRole) -> Option<Transfer> {
        let transfer = self.transfer_slot(role).take()?;
        self.mux.unregister(&transfer, transfer_role(role));
        Some(transfer)
    }

    fn abandon_transfer(&mut self, role: OfferRole) {
        if let Some(transfer) = self.retire_transfer(role) {
            warn!(
                "Abandoning {role:?} transfer after {} bytes.",
                transfer.len()
            );
        }
    }

    fn advance(&mut self, role: OfferRole) -> Option<Payload> {
        let Some(transfer) = self.transfer_slot(role) else {
            trace!("Spurious wake for {role:?} transfer.");
            return None;
        };

        match transfer.advance() {
            Progress::Continue => None,
            Progress::Complete => {
                let bytes = self.retire_transfer(role)?.into_payload();
                info!("{role:?} transfer of {} bytes complete.", bytes.len());
                if let Some(offer) = self.take_drag_offer(role) {
                    self.protocol.offer_finish(offer.handle());
                    self.protocol.offer_destroy(offer.handle());
                }
                Some(Payload { role, bytes })
            }
            Progress::Failed(e) => {
                warn!("{role:?} transfer failed: {e}");
                drop(self.retire_transfer(role));
                if let Some(offer) = self.take_drag_offer(role) {
                    self.protocol.offer_destroy(offer.handle());
                }
                None
            }
        }
    }

    /// The drag offer is spent once its transfer ends, the selection offer
    /// stays until replaced.
    fn take_drag_offer(&mut self, role: OfferRole) -> Option<DataOffer<P::Offer>> {
        match role {
            OfferRole::Selection => None,
            OfferRole::Drag => self.drag.take(),
        }
    }

    fn source_send(&mut self, handle: &P::Source, mime: &str, fd: OwnedFd) -> Result<()> {
        let Some(source) = self.sources.get_mut(handle) else {
            warn!("Send request for unknown source {handle:?}, ignoring.");
            return Ok(());
        };
        if !source.offers_mime(mime) {
            warn!("Send request for undeclared mime {mime:?}, ignoring.");
            return Ok(());
        }
        let role = source.role();

        let mut send = PendingSend::new(fd, source.payload().clone());
        match send.resume() {
            SendProgress::Done => debug!("Sent {} bytes as {mime:?}.", send.written()),
            SendProgress::Failed(e) => warn!("Failed to send {role:?} data: {e}"),
            SendProgress::Blocked => {
                debug!(
                    "Receiver is slow, deferring {role:?} send after {} bytes.",
                    send.written()
                );
                if let Some(old) = self.retire_send(role) {
                    warn!(
                        "Dropping unfinished {role:?} send after {} bytes.",
                        old.written()
                    );
                }
                self.mux.register(&send, send_role(role))?;
                *self.send_slot(role) = Some(send);
            }
        }
        Ok(())
    }

    fn send_slot(&mut self, role: SourceRole) -> &mut Option<PendingSend> {
        match role {
            SourceRole::Selection => &mut self.selection_send,
            SourceRole::Drag => &mut self.drag_send,
        }
    }

    fn retire_send(&mut self, role: SourceRole) -> Option<PendingSend> {
        let send = self.send_slot(role).take()?;
        self.mux.unregister(&send, send_role(role));
        Some(send)
    }

    fn resume_send(&mut self, role: SourceRole) {
        let Some(send) = self.send_slot(role) else {
            trace!("Spurious wake for {role:?} send.");
            return;
        };

        match send.resume() {
            SendProgress::Blocked => {}
            SendProgress::Done => {
                if let Some(send) = self.retire_send(role) {
                    debug!("Deferred {role:?} send of {} bytes done.", send.written());
                }
            }
            SendProgress::Failed(e) => {
                warn!("Deferred {role:?} send failed: {e}");
                drop(self.retire_send(role));
            }
        }
    }
}

impl<P: Protocol> Drop for TransferEngine<P> {
    fn drop(&mut self) {
        for role in [OfferRole::Selection, OfferRole::Drag] {
            drop(self.retire_transfer(role));
        }
        for role in [SourceRole::Selection, SourceRole::Drag] {
            drop(self.retire_send(role));
        }

        let Self {
            protocol,
            announced,
            selection,
            drag,
            sources,
            ..
        } = self;
        for offer in announced.drain().chain(selection.take()).chain(drag.take()) {
            protocol.offer_destroy(offer.handle());
        }
        for source in sources.drain() {
            protocol.source_destroy(source.handle());
        }
    }
}
