/// Data-plane proxy: device bindings, packet receive and the packet tap.
use alloc::sync::Arc;

use super::table::{interface_scope, DeviceBinding, PacketTap, RxCallback};
use super::{bump, DispatchCore, DispatchError};
use crate::netdev::{HostNetDevice, NetFeatures};

impl DispatchCore {
    /// Attach `device` and its receive path to `interface`.
    ///
    /// A device that is already open gets its start notification right away
    /// so a late binding does not miss the open transition. One displaced
    /// owner is kept; binding over a slot that already has one is
    /// `Occupied`.
    pub fn bind_device(
        &self,
        interface: u16,
        device: Arc<dyn HostNetDevice>,
        rx: RxCallback,
        features: NetFeatures,
    ) -> Result<(), DispatchError> {
        if interface_scope(interface).is_none() {
            return Err(DispatchError::InvalidInterface(interface));
        }
        let was_open = device.is_open();
        {
            let mut table = self.table.write();
            let entry = table
                .get_mut(interface)
                .ok_or(DispatchError::InvalidInterface(interface))?;
            if entry.previous.is_some() {
                log::warn!("if {}: already displacing a device, {} not bound", interface, device.name());
                return Err(DispatchError::Occupied(interface));
            }
            let binding = DeviceBinding { device: Arc::clone(&device), rx, features };
            if let Some(old) = entry.device.replace(binding) {
                entry.previous = Some(old);
            }
        }

        log::debug!("if {}: bound to {}", interface, device.name());
        if was_open {
            device.start_data_plane(interface);
        }
        Ok(())
    }

    /// Detach the current device, reinstating the one it displaced.
    pub fn unbind_device(&self, interface: u16) {
        let removed = {
            let mut table = self.table.write();
            let Some(entry) = table.get_mut(interface) else {
                return;
            };
            let removed = entry.device.take();
            entry.device = entry.previous.take();
            removed
        };
        if let Some(binding) = removed {
            log::debug!("if {}: unbound from {}", interface, binding.device.name());
            binding.device.restore_data_plane(interface);
        }
    }

    /// Device of the current binding, if any.
    pub fn bound_device(&self, interface: u16) -> Option<Arc<dyn HostNetDevice>> {
        let table = self.table.read();
        table
            .get(interface)
            .and_then(|e| e.device.as_ref())
            .map(|b| Arc::clone(&b.device))
    }

    /// Deliver a packet from the device. Returns false if it was dropped.
    pub fn on_receive(&self, interface: u16, packet: &[u8]) -> bool {
        let rx = {
            let table = self.table.read();
            table
                .get(interface)
                .and_then(|e| e.device.as_ref())
                .map(|b| Arc::clone(&b.rx))
        };
        let Some(rx) = rx else {
            bump(&self.counters.rx_packets_dropped);
            log::trace!("if {}: no receive path, packet dropped", interface);
            return false;
        };

        let tap = self.tap.read().clone();
        if let Some(tap) = tap {
            tap(interface, packet);
        }
        rx(interface, packet);
        bump(&self.counters.rx_packets);
        true
    }

    /// Install the single process-wide packet tap, replacing any previous one.
    pub fn set_packet_tap(&self, tap: PacketTap) {
        *self.tap.write() = Some(tap);
    }

    pub fn clear_packet_tap(&self) {
        *self.tap.write() = None;
    }

    pub fn has_packet_tap(&self) -> bool {
        self.tap.read().is_some()
    }
}
