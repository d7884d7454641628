use pthi::client::{LanInterface, PthiClient};
use pthi::error::{PthiError, ProtocolError};
use pthi::transport::mock::{Exchange, MockTransport};
use pthi::wire::{self, command, AmtAnsiString};

const MTU: usize = 4096;

fn response(command: u32, status: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + payload.len());
    out.push(0x01); // major
    out.push(0x01); // minor
    out.extend_from_slice(&0u16.to_le_bytes()); // reserved
    out.extend_from_slice(&(command | wire::RESPONSE_COMMAND_BIT).to_le_bytes());
    out.extend_from_slice(&((payload.len() + 4) as u32).to_le_bytes());
    out.extend_from_slice(&status.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn client_with(script: Vec<Exchange>) -> PthiClient<MockTransport> {
    PthiClient::new(MockTransport::new(MTU, script))
}

#[test]
fn scenario_get_uuid() {
    let uuid_bytes: [u8; 16] = [
        0xD2, 0x3F, 0x11, 0x1C, 0x25, 0x33, 0x94, 0x45, 0xA2, 0x72, 0x54, 0xB2, 0x03, 0x8B, 0xEB,
        0x07,
    ];
    let mut client = client_with(vec![Exchange {
        expect_send: wire::encode_request(command::GET_UUID, &[]),
        respond: response(command::GET_UUID, 0, &uuid_bytes),
    }]);

    assert_eq!(client.get_uuid().unwrap(), uuid_bytes);
}

#[test]
fn scenario_get_control_mode_admin() {
    let mut client = client_with(vec![Exchange {
        expect_send: wire::encode_request(command::GET_CONTROL_MODE, &[]),
        respond: response(command::GET_CONTROL_MODE, 0, &2i32.to_le_bytes()),
    }]);

    assert_eq!(client.get_control_mode().unwrap(), 2);
}

#[test]
fn scenario_get_dns_suffix() {
    let mut client = client_with(vec![Exchange {
        expect_send: wire::encode_request(command::GET_PKI_FQDN_SUFFIX, &[]),
        respond: response(
            command::GET_PKI_FQDN_SUFFIX,
            0,
            &AmtAnsiString::encode("test"),
        ),
    }]);

    assert_eq!(client.get_dns_suffix().unwrap(), "test");
}

#[test]
fn scenario_get_lan_interface_settings_wireless_disabled() {
    let mut payload = Vec::new();
    for _ in 0..5 {
        payload.extend_from_slice(&0u32.to_le_bytes());
    }
    payload.extend_from_slice(&[0u8; 6]);

    let mut client = client_with(vec![Exchange {
        expect_send: wire::encode_request(command::GET_LAN_INTERFACE_SETTINGS, &1u32.to_le_bytes()),
        respond: response(command::GET_LAN_INTERFACE_SETTINGS, 0, &payload),
    }]);

    let settings = client
        .get_lan_interface_settings(LanInterface::Wireless)
        .unwrap();
    assert_eq!(settings.enabled, 0);
    assert_eq!(settings.mac, [0u8; 6]);
}

#[test]
fn scenario_get_certificate_hashes_single_entry() {
    let mut handles_payload = 1u32.to_le_bytes().to_vec();
    handles_payload.extend_from_slice(&7u32.to_le_bytes());

    let mut entry_payload = vec![1u8, 1u8]; // is_default, is_active
    entry_payload.extend_from_slice(&[0xAAu8; 64]);
    entry_payload.push(2); // SHA-256
    entry_payload.extend_from_slice(&AmtAnsiString::encode("ME Default"));

    let mut client = client_with(vec![
        Exchange {
            expect_send: wire::encode_request(command::ENUMERATE_HASH_HANDLES, &[]),
            respond: response(command::ENUMERATE_HASH_HANDLES, 0, &handles_payload),
        },
        Exchange {
            expect_send: wire::encode_request(command::GET_CERTHASH_ENTRY, &7u32.to_le_bytes()),
            respond: response(command::GET_CERTHASH_ENTRY, 0, &entry_payload),
        },
    ]);

    let hashes = client.get_certificate_hashes().unwrap();
    assert_eq!(hashes.len(), 1);
    assert!(hashes[0].is_default);
    assert!(hashes[0].is_active);
    assert_eq!(hashes[0].algorithm, 2);
    assert_eq!(hashes[0].hash_bytes().unwrap().len(), 32);
    assert_eq!(hashes[0].name.as_bytes(), b"ME Default");
}

#[test]
fn scenario_non_zero_status_is_protocol_error() {
    let mut client = client_with(vec![Exchange {
        expect_send: wire::encode_request(command::GET_CONTROL_MODE, &[]),
        respond: response(command::GET_CONTROL_MODE, 3, &[]),
    }]);

    let err = client.get_control_mode().unwrap_err();
    assert!(matches!(
        err,
        PthiError::Protocol(ProtocolError::Status(3))
    ));
}

#[test]
fn strict_command_check_rejects_mismatched_response_command() {
    let mut mismatched = response(command::GET_CONTROL_MODE, 0, &2i32.to_le_bytes());
    // Corrupt the echoed command so it no longer matches the request.
    mismatched[4..8].copy_from_slice(&command::GET_UUID.to_le_bytes());

    let mut client = client_with(vec![Exchange {
        expect_send: wire::encode_request(command::GET_CONTROL_MODE, &[]),
        respond: mismatched,
    }])
    .with_strict_command_check(true);

    let err = client.get_control_mode().unwrap_err();
    assert!(matches!(
        err,
        PthiError::Protocol(ProtocolError::CommandMismatch { .. })
    ));
}

#[test]
fn receive_failure_poisons_handle_and_next_call_reopens() {
    // First exchange's response is empty, which MockTransport::receive turns
    // into TransportError::Empty. The second exchange only succeeds if the
    // client reopened the (mock) transport before retrying.
    let mut client = client_with(vec![
        Exchange {
            expect_send: wire::encode_request(command::GET_UUID, &[]),
            respond: vec![],
        },
        Exchange {
            expect_send: wire::encode_request(command::GET_CONTROL_MODE, &[]),
            respond: response(command::GET_CONTROL_MODE, 0, &2i32.to_le_bytes()),
        },
    ]);

    assert!(matches!(
        client.get_uuid().unwrap_err(),
        PthiError::Transport(_)
    ));
    assert_eq!(client.get_control_mode().unwrap(), 2);
}

#[test]
fn get_code_versions_round_trip() {
    let mut payload = vec![0u8; 65];
    payload[..4].copy_from_slice(b"1.23");
    payload.extend_from_slice(&1u32.to_le_bytes());
    payload.extend_from_slice(&AmtAnsiString::encode("AMT"));
    payload.extend_from_slice(&AmtAnsiString::encode("11.8.50"));

    let mut client = client_with(vec![Exchange {
        expect_send: wire::encode_request(command::GET_CODE_VERSIONS, &[]),
        respond: response(command::GET_CODE_VERSIONS, 0, &payload),
    }]);

    let versions = client.get_code_versions().unwrap();
    assert_eq!(versions.versions.len(), 1);
    assert_eq!(versions.versions[0].description.as_bytes(), b"AMT");
    assert_eq!(versions.versions[0].version.as_bytes(), b"11.8.50");
}
