//! Physical-port data-plane proxy.
//!
//! Binding a port hands its data plane from the host NIC driver to the
//! coprocessor; unbinding gives it back. Port control (open, MTU, MAC, ...)
//! is forwarded to the firmware as phys-if messages on the port's static
//! interface.

use alloc::sync::Arc;
use spin::Mutex;

use crate::dispatch::{
    AppData, DispatchCore, DispatchError, MessageHandler, MsgCallback, Request, RxCallback,
    TxError, SYNC_TIMEOUT_MS,
};
use crate::msg::{Feature, Message, OpenParams, Payload, PhysIfMsg};
use crate::netdev::{HostNetDevice, NetFeatures, StatsSnapshot};

pub const FIRST_PORT: u16 = 1;
pub const MAX_PORTS: usize = 6;
pub const MAX_MTU: u32 = 9000;
/// Bytes the firmware prepends to every frame.
pub const PREHEADER_LEN: u32 = 32;
const DEFAULT_MTU: u32 = 1500;

struct PortState {
    device: Option<Arc<dyn HostNetDevice>>,
    /// Firmware already told the port is open.
    notify_open: bool,
    mtu: u32,
    link_up: bool,
    node: [u64; 5],
}

impl PortState {
    fn new() -> Self {
        Self { device: None, notify_open: false, mtu: DEFAULT_MTU, link_up: false, node: [0; 5] }
    }
}

struct PhysIfShared {
    ports: Mutex<[PortState; MAX_PORTS]>,
}

fn port_index(port: u16) -> Option<usize> {
    let idx = port.checked_sub(FIRST_PORT)? as usize;
    (idx < MAX_PORTS).then_some(idx)
}

struct PhysIfHandler {
    shared: Arc<PhysIfShared>,
    notify: MsgCallback,
}

impl MessageHandler for PhysIfHandler {
    fn feature(&self) -> Feature {
        Feature::PhysIf
    }

    fn sync_stats(&self, interface: u16, msg: &Message) {
        let Payload::PhysIf(PhysIfMsg::Stats(s)) = &msg.payload else {
            return;
        };
        let Some(idx) = port_index(interface) else {
            return;
        };
        let mut ports = self.shared.ports.lock();
        for (acc, v) in ports[idx].node.iter_mut().zip(s.as_array()) {
            *acc = acc.wrapping_add(v as u64);
        }
    }

    fn notify_callback(&self, _interface: u16) -> Option<(MsgCallback, Option<AppData>)> {
        Some((Arc::clone(&self.notify), None))
    }
}

/// Notify subscriber: link-state events update the port and its host carrier.
fn link_notify(shared: Arc<PhysIfShared>) -> MsgCallback {
    Arc::new(move |_: Option<&AppData>, msg: &Message| {
        let Payload::PhysIf(PhysIfMsg::LinkState(state)) = msg.payload else {
            return;
        };
        let Some(idx) = port_index(msg.header.interface) else {
            return;
        };
        let device = {
            let mut ports = shared.ports.lock();
            ports[idx].link_up = state != 0;
            ports[idx].device.clone()
        };
        if let Some(device) = device {
            device.set_carrier(state != 0);
        }
    })
}

pub struct PhysIf {
    core: Arc<DispatchCore>,
    shared: Arc<PhysIfShared>,
    handler: Arc<PhysIfHandler>,
}

impl PhysIf {
    pub fn new(core: Arc<DispatchCore>) -> Self {
        let shared = Arc::new(PhysIfShared {
            ports: Mutex::new([(); MAX_PORTS].map(|_| PortState::new())),
        });
        let handler = Arc::new(PhysIfHandler {
            shared: Arc::clone(&shared),
            notify: link_notify(Arc::clone(&shared)),
        });
        Self { core, shared, handler }
    }

    fn index(port: u16) -> Result<usize, TxError> {
        port_index(port).ok_or(TxError::InvalidInterface(port))
    }

    /// Take over `port`'s data plane from `device`.
    pub fn register_port(
        &self,
        port: u16,
        device: Arc<dyn HostNetDevice>,
        rx: RxCallback,
        features: NetFeatures,
    ) -> Result<(), DispatchError> {
        let idx = port_index(port).ok_or(DispatchError::InvalidInterface(port))?;

        self.core.register_handler(port, self.handler.clone(), None)?;
        {
            let mut ports = self.shared.ports.lock();
            ports[idx] = PortState::new();
            ports[idx].device = Some(Arc::clone(&device));
        }
        if let Err(e) = self.core.bind_device(port, Arc::clone(&device), rx, features) {
            self.shared.ports.lock()[idx] = PortState::new();
            self.core.unregister_handler(port);
            return Err(e);
        }
        log::info!("port {}: data plane moved from {}", port, device.name());
        Ok(())
    }

    /// Give `port` back to the host driver.
    pub fn unregister_port(&self, port: u16) {
        let Some(idx) = port_index(port) else {
            return;
        };
        let had_device = {
            let mut ports = self.shared.ports.lock();
            let had = ports[idx].device.is_some();
            ports[idx] = PortState::new();
            had
        };
        if had_device {
            self.core.unbind_device(port);
            self.core.unregister_handler(port);
            log::info!("port {}: data plane restored to host", port);
        }
    }

    pub fn unregister_all(&self) {
        for idx in 0..MAX_PORTS {
            self.unregister_port(FIRST_PORT + idx as u16);
        }
    }

    pub fn is_registered(&self, port: u16) -> bool {
        port_index(port)
            .map(|idx| self.shared.ports.lock()[idx].device.is_some())
            .unwrap_or(false)
    }

    fn send(&self, port: u16, msg: PhysIfMsg) -> Result<(), TxError> {
        self.core.send_async(Request::new(Message::new(port, msg)))
    }

    fn send_sync(&self, port: u16, msg: PhysIfMsg) -> Result<(), TxError> {
        self.core
            .send_sync(Request::new(Message::new(port, msg)), SYNC_TIMEOUT_MS)
            .map(|_| ())
    }

    // ---- Port control ----

    /// Tell the firmware the port is open. Repeated opens are no-ops.
    pub fn open(&self, port: u16, params: OpenParams) -> Result<(), TxError> {
        let idx = Self::index(port)?;
        if self.shared.ports.lock()[idx].notify_open {
            return Ok(());
        }
        self.send_sync(port, PhysIfMsg::Open(params))?;
        self.shared.ports.lock()[idx].notify_open = true;
        Ok(())
    }

    pub fn close(&self, port: u16) -> Result<(), TxError> {
        let idx = Self::index(port)?;
        self.send_sync(port, PhysIfMsg::Close)?;
        self.shared.ports.lock()[idx].notify_open = false;
        Ok(())
    }

    pub fn link_state(&self, port: u16, up: bool) -> Result<(), TxError> {
        Self::index(port)?;
        self.send(port, PhysIfMsg::LinkState(up as u32))
    }

    pub fn mac_addr(&self, port: u16, mac: [u8; 6]) -> Result<(), TxError> {
        Self::index(port)?;
        self.send(port, PhysIfMsg::MacAddr(mac))
    }

    /// MTUs above `MAX_MTU` never reach the device.
    pub fn change_mtu(&self, port: u16, mtu: u32) -> Result<(), TxError> {
        let idx = Self::index(port)?;
        if mtu > MAX_MTU {
            log::warn!("port {}: mtu {} above {}", port, mtu, MAX_MTU);
            return Err(TxError::Rejected("mtu above maximum"));
        }
        self.send(port, PhysIfMsg::ChangeMtu(mtu))?;
        self.shared.ports.lock()[idx].mtu = mtu;
        Ok(())
    }

    pub fn pause(&self, port: u16, on: bool) -> Result<(), TxError> {
        Self::index(port)?;
        self.send(port, PhysIfMsg::Pause(on))
    }

    pub fn vsi_assign(&self, port: u16, vsi: u32) -> Result<(), TxError> {
        Self::index(port)?;
        self.send_sync(port, PhysIfMsg::VsiAssign(vsi))
    }

    pub fn vsi_unassign(&self, port: u16, vsi: u32) -> Result<(), TxError> {
        Self::index(port)?;
        self.send_sync(port, PhysIfMsg::VsiUnassign(vsi))
    }

    // ---- Queries ----

    /// Buffer size the device needs for the port's current MTU.
    pub fn mtu_size(&self, port: u16) -> Option<u32> {
        let idx = port_index(port)?;
        Some(self.shared.ports.lock()[idx].mtu + PREHEADER_LEN)
    }

    pub fn link_up(&self, port: u16) -> bool {
        port_index(port)
            .map(|idx| self.shared.ports.lock()[idx].link_up)
            .unwrap_or(false)
    }

    /// Host driver statistics, read under the proxy lock.
    pub fn stats(&self, port: u16) -> Option<StatsSnapshot> {
        let idx = port_index(port)?;
        let ports = self.shared.ports.lock();
        ports[idx].device.as_ref().map(|d| d.stats())
    }

    /// Firmware node counters accumulated from stats syncs.
    pub fn node_stats(&self, port: u16) -> Option<[u64; 5]> {
        let idx = port_index(port)?;
        Some(self.shared.ports.lock()[idx].node)
    }
}
