use std::{io::ErrorKind, mem};

use dragboard_core::{
    Error,
    action::Position,
    config::{Config, Latest},
    dirs::config_file,
    engine::TransferEngine,
    mux::Role,
    offer::OfferRole,
    protocol::Event as TransferEvent,
};
use error_stack::Report;
use log::{debug, info, trace, warn};
use thiserror::Error;
use wayland_client::{
    ConnectError, Connection, Dispatch, DispatchError, EventQueue, Proxy, QueueHandle, WEnum,
    backend::WaylandError, delegate_noop, event_created_child,
    protocol::{
        wl_buffer::WlBuffer,
        wl_compositor::WlCompositor,
        wl_data_device,
        wl_data_device::WlDataDevice,
        wl_data_device_manager::WlDataDeviceManager,
        wl_data_offer,
        wl_data_offer::WlDataOffer,
        wl_data_source,
        wl_data_source::WlDataSource,
        wl_keyboard,
        wl_keyboard::WlKeyboard,
        wl_pointer,
        wl_pointer::WlPointer,
        wl_registry,
        wl_registry::WlRegistry,
        wl_seat,
        wl_seat::WlSeat,
        wl_shm::WlShm,
        wl_shm_pool::WlShmPool,
        wl_surface::WlSurface,
    },
};
use wayland_protocols::xdg::shell::client::{
    xdg_surface, xdg_surface::XdgSurface, xdg_toplevel, xdg_toplevel::XdgToplevel, xdg_wm_base,
    xdg_wm_base::XdgWmBase,
};

use crate::{
    protocol::{WaylandProtocol, action_from_wire, actions_from_wire},
    window::Window,
};

mod protocol;
mod window;

#[derive(Error, Debug)]
enum CliError {
    #[error("{0}")]
    Core(#[from] Error),
    #[error("Wayland connection: {0}")]
    WaylandConnection(#[from] ConnectError),
    #[error("Wayland dispatch: {0}")]
    WaylandDispatch(#[from] DispatchError),
    #[error("{message}: {interface}")]
    BadWaylandGlobal {
        message: &'static str,
        interface: &'static str,
    },
    #[error("unusable window size: {width}x{height}")]
    InvalidSurface { width: u32, height: u32 },
}

#[derive(Error, Debug)]
enum Wrapper {
    #[error("{0}")]
    W(String),
}

fn main() -> error_stack::Result<(), Wrapper> {
    #[cfg(not(debug_assertions))]
    error_stack::Report::install_debug_hook::<std::panic::Location>(|_, _| {});

    if cfg!(debug_assertions) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::init();
    }

    run().map_err(into_report)
}

fn into_report(cli_err: CliError) -> Report<Wrapper> {
    let wrapper = Wrapper::W(cli_err.to_string());
    match cli_err {
        CliError::Core(e) => e.into_report(wrapper),
        CliError::WaylandConnection(e) => Report::new(e).change_context(wrapper),
        CliError::WaylandDispatch(e) => Report::new(e).change_context(wrapper),
        CliError::BadWaylandGlobal {
            message: _,
            interface: _,
        }
        | CliError::InvalidSurface {
            width: _,
            height: _,
        } => Report::new(wrapper),
    }
}

/// Evdev codes of the inputs we react to.
const KEY_C: u32 = 46;
const KEY_V: u32 = 47;
const BTN_LEFT: u32 = 0x110;
const BTN_RIGHT: u32 = 0x111;

const DATA_DEVICE_MANAGER_VERSION: u32 = 3;

fn run() -> Result<(), CliError> {
    info!("Starting dragboard v{}.", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&config_file())?.to_latest();
    debug!("Using config: {config:?}");

    let conn = Connection::connect_to_env()?;
    debug!("Wayland connection established.");

    let mut event_queue = conn.new_event_queue();
    let qh = event_queue.handle();
    conn.display().get_registry(&qh, ());
    let mut app = App::default();
    event_queue.roundtrip(&mut app)?;

    if let Some(e) = app.error.take() {
        return Err(e);
    }
    let Globals {
        compositor,
        shm,
        seat,
        manager,
        wm_base,
    } = mem::take(&mut app.globals);
    let compositor = required(compositor)?;
    let shm = required(shm)?;
    let seat = required(seat)?;
    let manager = required(manager)?;
    let wm_base = required(wm_base)?;
    if manager.version() < DATA_DEVICE_MANAGER_VERSION {
        return Err(CliError::BadWaylandGlobal {
            message: "compositor does not support drag-and-drop actions",
            interface: WlDataDeviceManager::interface().name,
        });
    }
    debug!("Wayland globals initialized.");

    let window = Window::new(&compositor, &shm, &wm_base, config.surface(), &qh)?;
    app.wm_base = Some(wm_base);

    let device = manager.get_data_device(&seat, &qh, ());
    let mut engine = TransferEngine::new(
        WaylandProtocol::new(manager, device, window.surface().clone(), qh.clone()),
        &conn,
        config.surface(),
    )?;
    app.window = Some(window);

    info!("Starting event loop.");
    let result = event_loop(&mut event_queue, &mut app, &mut engine, &config);
    drop(engine);
    drop(app);
    if seat.version() >= 5 {
        seat.release();
    }
    event_queue.flush().map_err(DispatchError::from)?;
    result
}

fn required<T: Proxy>(global: Option<T>) -> Result<T, CliError> {
    global.ok_or(CliError::BadWaylandGlobal {
        message: "compositor does not implement necessary interface",
        interface: T::interface().name,
    })
}

fn event_loop(
    event_queue: &mut EventQueue<App>,
    app: &mut App,
    engine: &mut TransferEngine<WaylandProtocol>,
    config: &Latest,
) -> Result<(), CliError> {
    loop {
        event_queue.flush().map_err(DispatchError::from)?;

        let ready = if let Some(guard) = event_queue.prepare_read() {
            let ready = engine.wait()?;
            if ready.contains(Role::Protocol) {
                match guard.read() {
                    Ok(count) => trace!("Read {count} events."),
                    Err(WaylandError::Io(e)) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => return Err(DispatchError::from(e).into()),
                }
            } else {
                drop(guard);
            }
            Some(ready)
        } else {
            None
        };
        event_queue.dispatch_pending(app)?;

        for event in app.events.drain(..) {
            engine.handle_event(event)?;
        }
        for command in app.commands.drain(..) {
            match command {
                Command::Copy { serial } => {
                    let text = config.copy_payload(serial);
                    info!("Copying {text:?}.");
                    engine.start_copy(&text, serial);
                }
                Command::Paste => {
                    info!("Pasting.");
                    engine.start_paste()?;
                }
                Command::Drag { serial } => {
                    info!("Dragging {:?}.", config.drag_text);
                    engine.start_drag(&config.drag_text, serial);
                }
            }
        }
        if let Some(ready) = ready {
            for payload in engine.on_ready(&ready) {
                info!(
                    "Received {} payload: {:?}",
                    match payload.role {
                        OfferRole::Selection => "clipboard",
                        OfferRole::Drag => "drag",
                    },
                    payload.text()
                );
            }
        }

        if let Some(e) = app.error.take() {
            return Err(e);
        }
        if app.exit {
            info!("Exiting.");
            return Ok(());
        }
    }
}

#[derive(Debug)]
enum Command {
    Copy { serial: u32 },
    Paste,
    Drag { serial: u32 },
}

#[derive(Default, Debug)]
struct Globals {
    compositor: Option<WlCompositor>,
    shm: Option<WlShm>,
    seat: Option<WlSeat>,
    manager: Option<WlDataDeviceManager>,
    wm_base: Option<XdgWmBase>,
}

#[derive(Default, Debug)]
struct App {
    globals: Globals,
    wm_base: Option<XdgWmBase>,
    window: Option<Window>,
    keyboard: Option<WlKeyboard>,
    pointer: Option<WlPointer>,

    events: Vec<TransferEvent<WlDataOffer, WlDataSource>>,
    commands: Vec<Command>,

    exit: bool,
    error: Option<CliError>,
}

impl App {
    fn push(&mut self, event: TransferEvent<WlDataOffer, WlDataSource>) {
        self.events.push(event);
    }
}

/// Input devices can only be released from version 3 on; older ones live
/// as long as the connection.
fn release_keyboard(keyboard: WlKeyboard) {
    if keyboard.version() >= 3 {
        keyboard.release();
    }
}

fn release_pointer(pointer: WlPointer) {
    if pointer.version() >= 3 {
        pointer.release();
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if let Some(keyboard) = self.keyboard.take() {
            release_keyboard(keyboard);
        }
        if let Some(pointer) = self.pointer.take() {
            release_pointer(pointer);
        }
        drop(self.window.take());
        if let Some(wm_base) = self.wm_base.take() {
            wm_base.destroy();
        }
    }
}

impl Dispatch<WlRegistry, ()> for App {
    fn event(
        this: &mut Self,
        registry: &WlRegistry,
        event: <WlRegistry as Proxy>::Event,
        (): &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        use wl_registry::Event;

        fn singleton<T: Proxy + 'static>(
            registry: &WlRegistry,
            qhandle: &QueueHandle<App>,
            object: &mut Option<T>,
            error: &mut Option<CliError>,
            event: &Event,
            max_version: u32,
        ) where
            App: Dispatch<T, ()>,
        {
            let &Event::Global {
                name,
                ref interface,
                version,
            } = event
            else {
                return;
            };
            if interface != T::interface().name {
                return;
            }

            if object.is_some() {
                *error = Some(CliError::BadWaylandGlobal {
                    message: "duplicate global found",
                    interface: T::interface().name,
                });
            } else {
                *object = Some(registry.bind(name, version.min(max_version), qhandle, ()));
            }
        }

        trace!("Registry event: {event:?}");
        let App { globals, error, .. } = this;
        singleton(registry, qh, &mut globals.compositor, error, &event, 4);
        singleton(registry, qh, &mut globals.shm, error, &event, 1);
        singleton(
            registry,
            qh,
            &mut globals.manager,
            error,
            &event,
            DATA_DEVICE_MANAGER_VERSION,
        );
        singleton(registry, qh, &mut globals.wm_base, error, &event, 1);

        match event {
            Event::Global {
                name,
                interface,
                version,
            } => {
                if interface == WlSeat::interface().name {
                    if globals.seat.is_some() {
                        debug!("Ignoring additional seat {name}.");
                    } else {
                        globals.seat = Some(registry.bind(name, version.min(5), qh, ()));
                    }
                }
            }
            Event::GlobalRemove { name } => trace!("Global {name} removed."),
            _ => debug_assert!(false, "Unhandled registry event: {event:?}"),
        }
    }
}

impl Dispatch<WlSeat, ()> for App {
    fn event(
        this: &mut Self,
        seat: &WlSeat,
        event: <WlSeat as Proxy>::Event,
        (): &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        use wl_seat::{Capability, Event};
        match event {
            Event::Capabilities {
                capabilities: WEnum::Value(capabilities),
            } => {
                let keyboard = capabilities.contains(Capability::Keyboard);
                if keyboard && this.keyboard.is_none() {
                    debug!("Seat gained a keyboard.");
                    this.keyboard = Some(seat.get_keyboard(qh, ()));
                } else if !keyboard {
                    if let Some(k) = this.keyboard.take() {
                        debug!("Seat lost its keyboard.");
                        release_keyboard(k);
                    }
                }

                let pointer = capabilities.contains(Capability::Pointer);
                if pointer && this.pointer.is_none() {
                    debug!("Seat gained a pointer.");
                    this.pointer = Some(seat.get_pointer(qh, ()));
                } else if !pointer {
                    if let Some(p) = this.pointer.take() {
                        debug!("Seat lost its pointer.");
                        release_pointer(p);
                    }
                }
            }
            Event::Capabilities {
                capabilities: WEnum::Unknown(bits),
            } => warn!("Unknown seat capabilities: {bits:#x}"),
            Event::Name { name } => debug!("Using seat {name:?}."),
            _ => debug_assert!(false, "Unhandled seat event: {event:?}"),
        }
    }
}

impl Dispatch<WlKeyboard, ()> for App {
    fn event(
        this: &mut Self,
        _: &WlKeyboard,
        event: <WlKeyboard as Proxy>::Event,
        (): &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        use wl_keyboard::{Event, KeyState};
        if let Event::Key {
            serial,
            time: _,
            key,
            state: WEnum::Value(KeyState::Pressed),
        } = event
        {
            match key {
                KEY_C => this.commands.push(Command::Copy { serial }),
                KEY_V => this.commands.push(Command::Paste),
                _ => trace!("Ignoring key {key}."),
            }
        }
    }
}

impl Dispatch<WlPointer, ()> for App {
    fn event(
        this: &mut Self,
        _: &WlPointer,
        event: <WlPointer as Proxy>::Event,
        (): &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        use wl_pointer::{ButtonState, Event};
        if let Event::Button {
            serial,
            time: _,
            button,
            state: WEnum::Value(ButtonState::Pressed),
        } = event
        {
            match button {
                BTN_LEFT => this.commands.push(Command::Drag { serial }),
                BTN_RIGHT => this.exit = true,
                _ => trace!("Ignoring button {button:#x}."),
            }
        }
    }
}

impl Dispatch<WlDataDevice, ()> for App {
    fn event(
        this: &mut Self,
        _: &WlDataDevice,
        event: <WlDataDevice as Proxy>::Event,
        (): &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        use wl_data_device::Event;
        let event = match event {
            Event::DataOffer { id } => {
                trace!("Received data offer: {:?}", id.id());
                TransferEvent::OfferAnnounced(id)
            }
            Event::Enter {
                serial,
                surface,
                x,
                y,
                id,
            } => {
                if this.window.as_ref().map(Window::surface) != Some(&surface) {
                    warn!("Drag entered unknown surface {:?}.", surface.id());
                }
                TransferEvent::DragEnter {
                    serial,
                    offer: id,
                    position: Position { x, y },
                }
            }
            Event::Motion { time: _, x, y } => TransferEvent::DragMotion(Position { x, y }),
            Event::Leave => TransferEvent::DragLeave,
            Event::Drop => TransferEvent::DragDrop,
            Event::Selection { id } => TransferEvent::Selection(id),
            _ => {
                debug_assert!(false, "Unhandled data device event: {event:?}");
                return;
            }
        };
        this.push(event);
    }

    event_created_child!(Self, WlDataDevice, [
        wl_data_device::EVT_DATA_OFFER_OPCODE => (WlDataOffer, ()),
    ]);
}

impl Dispatch<WlDataOffer, ()> for App {
    fn event(
        this: &mut Self,
        offer: &WlDataOffer,
        event: <WlDataOffer as Proxy>::Event,
        (): &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        use wl_data_offer::Event;
        let offer = offer.clone();
        let event = match event {
            Event::Offer { mime_type } => {
                debug!("Offer {:?} has mime type {mime_type:?}.", offer.id());
                TransferEvent::OfferMimeType {
                    offer,
                    mime: mime_type,
                }
            }
            Event::SourceActions { source_actions } => TransferEvent::OfferSourceActions {
                offer,
                actions: actions_from_wire(source_actions),
            },
            Event::Action { dnd_action } => {
                let Some(action) = action_from_wire(dnd_action) else {
                    return;
                };
                TransferEvent::OfferAction { offer, action }
            }
            _ => {
                debug_assert!(false, "Unhandled data offer event: {event:?}");
                return;
            }
        };
        this.push(event);
    }
}

impl Dispatch<WlDataSource, ()> for App {
    fn event(
        this: &mut Self,
        source: &WlDataSource,
        event: <WlDataSource as Proxy>::Event,
        (): &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        use wl_data_source::Event;
        let source = source.clone();
        let event = match event {
            Event::Target { mime_type } => TransferEvent::SourceTarget {
                source,
                mime: mime_type,
            },
            Event::Send { mime_type, fd } => TransferEvent::SourceSend {
                source,
                mime: mime_type,
                fd,
            },
            Event::Cancelled => TransferEvent::SourceCancelled(source),
            Event::DndDropPerformed => TransferEvent::SourceDndDropPerformed(source),
            Event::DndFinished => TransferEvent::SourceDndFinished(source),
            Event::Action { dnd_action } => {
                let Some(action) = action_from_wire(dnd_action) else {
                    return;
                };
                TransferEvent::SourceAction { source, action }
            }
            _ => {
                debug_assert!(false, "Unhandled data source event: {event:?}");
                return;
            }
        };
        this.push(event);
    }
}

impl Dispatch<XdgWmBase, ()> for App {
    fn event(
        _: &mut Self,
        wm_base: &XdgWmBase,
        event: <XdgWmBase as Proxy>::Event,
        (): &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        use xdg_wm_base::Event;
        match event {
            Event::Ping { serial } => wm_base.pong(serial),
            _ => debug_assert!(false, "Unhandled wm base event: {event:?}"),
        }
    }
}

impl Dispatch<XdgSurface, ()> for App {
    fn event(
        this: &mut Self,
        _: &XdgSurface,
        event: <XdgSurface as Proxy>::Event,
        (): &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        use xdg_surface::Event;
        match event {
            Event::Configure { serial } => {
                trace!("Window configured with serial {serial}.");
                if let Some(window) = &this.window {
                    window.configure(serial);
                }
            }
            _ => debug_assert!(false, "Unhandled xdg surface event: {event:?}"),
        }
    }
}

impl Dispatch<XdgToplevel, ()> for App {
    fn event(
        this: &mut Self,
        _: &XdgToplevel,
        event: <XdgToplevel as Proxy>::Event,
        (): &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        use xdg_toplevel::Event;
        match event {
            Event::Close => {
                debug!("Window closed.");
                this.exit = true;
            }
            _ => trace!("Toplevel event: {event:?}"),
        }
    }
}

delegate_noop!(App: WlCompositor);
delegate_noop!(App: WlDataDeviceManager);
delegate_noop!(App: WlShmPool);
delegate_noop!(App: ignore WlShm);
delegate_noop!(App: ignore WlSurface);
delegate_noop!(App: ignore WlBuffer);
