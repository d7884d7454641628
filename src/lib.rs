// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Client library for Intel AMT's PTHI (Platform Tool Host Interface),
//! spoken over the HECI/MEI kernel transport.
//!
//! # Examples
//!
//! ```no_run
//! # use pthi::client::PthiClient;
//! # use pthi::transport::HeciOptions;
//! # #[cfg(target_os = "linux")]
//! # fn run() {
//! let options = HeciOptions::new();
//! let mut client = match PthiClient::open_linux(&options) {
//!     Ok(c) => c,
//!     Err(e) => {
//!         println!("{}", e);
//!         return;
//!     }
//! };
//!
//! match client.get_uuid() {
//!     Ok(uuid) => println!("uuid: {:?}", uuid),
//!     Err(e) => println!("{}", e),
//! }
//! # }
//! # #[cfg(not(target_os = "linux"))]
//! # fn run() {}
//! # fn main() { run() }
//! ```
pub mod client;
pub mod error;
pub mod transport;
pub mod wire;
