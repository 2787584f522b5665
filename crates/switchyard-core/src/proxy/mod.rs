// ── Device and component proxies ──
//
// Async facades generated from the capability registry: one callable per
// command, correlation accessors per status. A DeviceProxy aggregates the
// component proxies of one named device and adds fan-out waits.

mod component;
mod device;

pub use component::ComponentProxy;
pub use device::DeviceProxy;
