// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Diagnostic CLI that queries a PTHI client and prints what it finds.
//!
//! On Linux/Windows it opens the real HECI device; everywhere else (and
//! whenever `--mock` is passed) it runs against a scripted [`MockTransport`]
//! so the binary is runnable without AMT hardware, e.g. in CI.

use pthi::client::{LanInterface, PthiClient};
use pthi::transport::mock::{Exchange, MockTransport};
use pthi::transport::HeciOptions;
use pthi::wire::{self, command};

/// Wraps a 16-byte message header (with the response command bit set) plus a
/// zero status word around `payload`, matching what a real AMTHI response
/// looks like on the wire.
fn mock_response(command: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x01, 0x01, 0x00, 0x00];
    out.extend_from_slice(&(command | wire::RESPONSE_COMMAND_BIT).to_le_bytes());
    out.extend_from_slice(&((payload.len() + 4) as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn mock_client() -> PthiClient<MockTransport> {
    let uuid = [
        0xD2, 0x3F, 0x11, 0x1C, 0x25, 0x33, 0x94, 0x45, 0xA2, 0x72, 0x54, 0xB2, 0x03, 0x8B, 0xEB,
        0x07,
    ];

    let mut lan_settings = vec![1u32.to_le_bytes(), 0u32.to_le_bytes()].concat(); // enabled, ipv4
    lan_settings.extend_from_slice(&1u32.to_le_bytes()); // dhcp_enabled
    lan_settings.extend_from_slice(&0u32.to_le_bytes()); // dhcp_ip_mode
    lan_settings.extend_from_slice(&1u32.to_le_bytes()); // link_status
    lan_settings.extend_from_slice(&[0u8; 6]); // mac

    PthiClient::new(MockTransport::new(
        4096,
        vec![
            Exchange {
                expect_send: wire::encode_request(command::GET_UUID, &[]),
                respond: mock_response(command::GET_UUID, &uuid),
            },
            Exchange {
                expect_send: wire::encode_request(command::GET_CONTROL_MODE, &[]),
                respond: mock_response(command::GET_CONTROL_MODE, &2i32.to_le_bytes()),
            },
            Exchange {
                expect_send: wire::encode_request(
                    command::GET_LAN_INTERFACE_SETTINGS,
                    &1u32.to_le_bytes(),
                ),
                respond: mock_response(command::GET_LAN_INTERFACE_SETTINGS, &lan_settings),
            },
        ],
    ))
}

fn main() {
    tracing_subscriber::fmt::init();

    let use_mock = std::env::args().any(|a| a == "--mock");

    #[cfg(target_os = "linux")]
    if !use_mock {
        let options = HeciOptions::new();
        match PthiClient::open_linux(&options) {
            Ok(mut client) => return dump(&mut client),
            Err(e) => {
                eprintln!("failed to open HECI device: {e}");
                std::process::exit(1);
            }
        }
    }

    #[cfg(target_os = "windows")]
    if !use_mock {
        let options = HeciOptions::new();
        match PthiClient::open_windows(&options) {
            Ok(mut client) => return dump(&mut client),
            Err(e) => {
                eprintln!("failed to open HECI device: {e}");
                std::process::exit(1);
            }
        }
    }

    let _ = use_mock;
    let mut client = mock_client();
    dump(&mut client);
}

fn dump<T: pthi::transport::HeciTransport>(client: &mut PthiClient<T>) {
    match client.get_uuid() {
        Ok(uuid) => println!("uuid: {uuid:02x?}"),
        Err(e) => println!("get_uuid failed: {e}"),
    }
    match client.get_control_mode() {
        Ok(mode) => println!("control mode: {mode}"),
        Err(e) => println!("get_control_mode failed: {e}"),
    }
    match client.get_lan_interface_settings(LanInterface::Wireless) {
        Ok(settings) => println!("wireless lan enabled: {}", settings.enabled != 0),
        Err(e) => println!("get_lan_interface_settings failed: {e}"),
    }
}
