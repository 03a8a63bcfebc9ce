use std::os::fd::BorrowedFd;

use dragboard_core::{
    action::{Action, Actions},
    protocol::Protocol,
};
use log::warn;
use wayland_client::{
    QueueHandle, WEnum,
    protocol::{
        wl_data_device::WlDataDevice,
        wl_data_device_manager::{DndAction, WlDataDeviceManager},
        wl_data_offer::WlDataOffer,
        wl_data_source::WlDataSource,
        wl_surface::WlSurface,
    },
};

use crate::App;

/// Issues engine requests on the seat's `wl_data_device`.
#[derive(Debug)]
pub struct WaylandProtocol {
    manager: WlDataDeviceManager,
    device: WlDataDevice,
    surface: WlSurface,
    qh: QueueHandle<App>,
}

impl WaylandProtocol {
    pub const fn new(
        manager: WlDataDeviceManager,
        device: WlDataDevice,
        surface: WlSurface,
        qh: QueueHandle<App>,
    ) -> Self {
        Self {
            manager,
            device,
            surface,
            qh,
        }
    }
}

impl Drop for WaylandProtocol {
    fn drop(&mut self) {
        self.device.release();
    }
}

fn dnd_actions(actions: Actions) -> DndAction {
    DndAction::from_bits_truncate(actions.bits())
}

pub fn actions_from_wire(actions: WEnum<DndAction>) -> Actions {
    let bits = match actions {
        WEnum::Value(actions) => actions.bits(),
        WEnum::Unknown(bits) => bits,
    };
    Actions::from_bits_truncate(bits)
}

pub fn action_from_wire(action: WEnum<DndAction>) -> Option<Action> {
    let bits = match action {
        WEnum::Value(action) => action.bits(),
        WEnum::Unknown(bits) => bits,
    };
    let action = Action::from_bits(bits);
    if action.is_none() {
        warn!("Server chose an invalid action: {bits:#x}.");
    }
    action
}

impl Protocol for WaylandProtocol {
    type Offer = WlDataOffer;
    type Source = WlDataSource;

    fn offer_receive(&mut self, offer: &WlDataOffer, mime: &str, fd: BorrowedFd<'_>) {
        offer.receive(mime.to_string(), fd);
    }

    fn offer_set_actions(&mut self, offer: &WlDataOffer, actions: Actions, preferred: Action) {
        offer.set_actions(dnd_actions(actions), dnd_actions(preferred.as_set()));
    }

    fn offer_accept(&mut self, offer: &WlDataOffer, serial: u32, mime: Option<&str>) {
        offer.accept(serial, mime.map(str::to_string));
    }

    fn offer_finish(&mut self, offer: &WlDataOffer) {
        offer.finish();
    }

    fn offer_destroy(&mut self, offer: &WlDataOffer) {
        offer.destroy();
    }

    fn source_create(&mut self) -> WlDataSource {
        self.manager.create_data_source(&self.qh, ())
    }

    fn source_offer(&mut self, source: &WlDataSource, mime: &str) {
        source.offer(mime.to_string());
    }

    fn source_set_actions(&mut self, source: &WlDataSource, actions: Actions) {
        source.set_actions(dnd_actions(actions));
    }

    fn source_destroy(&mut self, source: &WlDataSource) {
        source.destroy();
    }

    fn set_selection(&mut self, source: Option<&WlDataSource>, serial: u32) {
        self.device.set_selection(source, serial);
    }

    fn start_drag(&mut self, source: &WlDataSource, serial: u32) {
        self.device.start_drag(Some(source), &self.surface, None, serial);
    }
}
