pub mod can_interface;
pub mod serial_can;
pub mod mock;
pub mod replay;
pub mod can_manager;

pub use can_interface::{CanConfig, CanInterface, CanStatus, InterfaceInfo, InterfaceType};
pub use serial_can::SerialCanInterface;
pub use mock::MockCanInterface;
pub use replay::ReplayCanInterface;
pub use can_manager::{CanManager, ConnectionStatus, ManagerEvent};

/// Every interface the monitor can open right now
pub fn list_interfaces() -> Vec<InterfaceInfo> {
    let mut interfaces = serial_can::list_interfaces();
    interfaces.sort_by(|a, b| a.name.cmp(&b.name));
    interfaces.extend(mock::list_mock_interfaces());
    interfaces
}
