use std::os::fd::AsFd;

use dragboard_core::{IoErr, action::SurfaceSize};
use log::debug;
use rustix::fs::{MemfdFlags, ftruncate, memfd_create};
use wayland_client::{
    QueueHandle,
    protocol::{
        wl_buffer::WlBuffer, wl_compositor::WlCompositor, wl_shm, wl_shm::WlShm,
        wl_surface::WlSurface,
    },
};
use wayland_protocols::xdg::shell::client::{
    xdg_surface::XdgSurface, xdg_toplevel::XdgToplevel, xdg_wm_base::XdgWmBase,
};

use crate::{App, CliError};

/// A toplevel window showing a single black buffer. It only exists to give
/// drags a target and the seat something to focus.
#[derive(Debug)]
pub struct Window {
    surface: WlSurface,
    xdg_surface: XdgSurface,
    toplevel: XdgToplevel,
    buffer: WlBuffer,
}

impl Window {
    pub fn new(
        compositor: &WlCompositor,
        shm: &WlShm,
        wm_base: &XdgWmBase,
        size: SurfaceSize,
        qh: &QueueHandle<App>,
    ) -> Result<Self, CliError> {
        let invalid = || CliError::InvalidSurface {
            width: size.width,
            height: size.height,
        };
        let width = i32::try_from(size.width).map_err(|_| invalid())?;
        let height = i32::try_from(size.height).map_err(|_| invalid())?;
        let stride = width.checked_mul(4).ok_or_else(invalid)?;
        let len = stride.checked_mul(height).ok_or_else(invalid)?;
        if len == 0 {
            return Err(invalid());
        }

        let buffer = {
            let file = memfd_create(c"dragboard_buffer", MemfdFlags::CLOEXEC)
                .map_io_err(|| "Failed to create window buffer file.")?;
            ftruncate(&file, len.unsigned_abs().into())
                .map_io_err(|| "Failed to size window buffer file.")?;

            let pool = shm.create_pool(file.as_fd(), len, qh, ());
            let buffer =
                pool.create_buffer(0, width, height, stride, wl_shm::Format::Xrgb8888, qh, ());
            pool.destroy();
            buffer
        };

        let surface = compositor.create_surface(qh, ());
        let xdg_surface = wm_base.get_xdg_surface(&surface, qh, ());
        let toplevel = xdg_surface.get_toplevel(qh, ());
        toplevel.set_title("dragboard".to_string());
        toplevel.set_app_id("dragboard".to_string());
        toplevel.set_min_size(width, height);
        toplevel.set_max_size(width, height);
        surface.commit();
        debug!("Created {width}x{height} window.");

        Ok(Self {
            surface,
            xdg_surface,
            toplevel,
            buffer,
        })
    }

    #[must_use]
    pub const fn surface(&self) -> &WlSurface {
        &self.surface
    }

    pub fn configure(&self, serial: u32) {
        self.xdg_surface.ack_configure(serial);
        self.surface.attach(Some(&self.buffer), 0, 0);
        self.surface.damage(0, 0, i32::MAX, i32::MAX);
        self.surface.commit();
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        self.toplevel.destroy();
        self.xdg_surface.destroy();
        self.surface.destroy();
        self.buffer.destroy();
    }
}
