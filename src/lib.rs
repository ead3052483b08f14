// Remove after IpAddr::to_canonical stabilizes
// https://github.com/rust-lang/rust/issues/27709
mod canonical_ip;
pub mod browser;
pub mod config;
pub mod controller;
mod header_tools;
pub mod ip_geo;
mod non_zero_duration;
pub mod page;
pub mod record;
pub mod service;
pub mod session;
pub mod store;
#[cfg(test)]
mod test_server;
