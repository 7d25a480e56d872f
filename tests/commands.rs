use bmc_ipmi::commands::{
    ClearOperation, ClearSel, Command, DeleteSelEntry, GetChannelAuthCapabilities, GetDeviceId,
    GetSelEntry, GetWatchdogTimer, ReserveSel, ResetWatchdogTimer,
};
use bmc_ipmi::{Error, PrivilegeLevel, RawResponse, TimerUse};

fn ok(cmd: u8, data: Vec<u8>) -> RawResponse {
    RawResponse {
        cmd,
        completion_code: 0x00,
        data,
    }
}

#[test]
fn get_device_id_parses_response() {
    let response = ok(
        0x01,
        vec![
            0x20, 0x01, 0x02, 0x43, 0x02, 0x04, 0xA2, 0x02, 0x00, 0x00, 0x01, 0x00, 0x06, 0x2B,
            0x2B,
        ],
    );

    let parsed = GetDeviceId.parse_response(response).expect("parse");
    assert_eq!(parsed.device_id, 0x20);
    assert_eq!(parsed.device_revision, 0x01);
    assert_eq!(parsed.firmware_major, 0x02);
    assert_eq!(parsed.firmware_minor, 0x43);
    assert_eq!(parsed.ipmi_version, 0x02);
    assert_eq!(parsed.manufacturer_id, 0x0000_02A2);
    assert_eq!(parsed.product_id, 0x0100);
    assert_eq!(parsed.aux_firmware_revision, [0x00, 0x06, 0x2B, 0x2B]);
    assert!(parsed.supports_sel());
}

#[test]
fn completion_code_is_reported_with_reason() {
    let response = RawResponse {
        cmd: 0x01,
        completion_code: 0xC1,
        data: vec![0xAA, 0xBB],
    };

    let err = GetDeviceId
        .parse_response(response)
        .expect_err("expected error");
    match err {
        Error::CompletionCode {
            netfn,
            cmd,
            completion_code,
            reason,
        } => {
            assert_eq!((netfn, cmd, completion_code), (0x06, 0x01, 0xC1));
            assert_eq!(reason, "invalid command");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn busy_and_cancelled_have_dedicated_errors() {
    let busy = RawResponse {
        cmd: 0x42,
        completion_code: 0xC0,
        data: Vec::new(),
    };
    assert!(matches!(
        ReserveSel.parse_response(busy),
        Err(Error::ControllerBusy)
    ));

    let cancelled = RawResponse {
        cmd: 0x43,
        completion_code: 0xC5,
        data: Vec::new(),
    };
    assert!(matches!(
        GetSelEntry::entire(1, 0).parse_response(cancelled),
        Err(Error::ReservationCancelled)
    ));
}

#[test]
fn get_channel_auth_capabilities_encodes_request_data() {
    let cmd = GetChannelAuthCapabilities::new(0x02, PrivilegeLevel::Administrator);
    assert_eq!(cmd.request_data(), vec![0x82, 0x04]);

    let cmd = cmd.without_v2_data();
    assert_eq!(cmd.request_data(), vec![0x02, 0x04]);
}

#[test]
fn get_channel_auth_capabilities_parses_v2_support() {
    let response = ok(0x38, vec![0x01, 0x80, 0x04, 0x02, 0x00, 0x00, 0x00, 0x00]);
    let caps = GetChannelAuthCapabilities::new(0x0E, PrivilegeLevel::User)
        .parse_response(response)
        .expect("parse");
    assert_eq!(caps.channel_number, 0x01);
    assert!(caps.v20_data_available);
    assert!(caps.non_null_usernames);
    assert!(caps.supports_ipmi_v2_0);
    assert!(!caps.supports_ipmi_v1_5);
    assert_eq!(caps.oem_id, None);
}

#[test]
fn sel_commands_use_storage_netfn() {
    let request = DeleteSelEntry {
        reservation_id: 0x0001,
        record_id: 0x0203,
    }
    .request();
    assert_eq!((request.netfn, request.cmd), (0x0A, 0x46));
    assert_eq!(request.data, vec![0x01, 0x00, 0x03, 0x02]);

    let request = ClearSel {
        reservation_id: 0x0001,
        operation: ClearOperation::GetStatus,
    }
    .request();
    assert_eq!(request.data, vec![0x01, 0x00, b'C', b'L', b'R', 0x00]);
}

#[test]
fn watchdog_commands() {
    assert_eq!(ResetWatchdogTimer.request().cmd, 0x22);

    let response = ok(0x25, vec![0x44, 0x01, 0x0A, 0x00, 0x58, 0x02, 0x2C, 0x01]);
    let timer = GetWatchdogTimer.parse_response(response).expect("parse");
    assert_eq!(timer.timer_use, TimerUse::SmsOs);
    assert!(timer.running);
    assert!(!timer.log_disabled);
    assert_eq!(timer.timeout_action, 0x01);
    assert_eq!(timer.pre_timeout_interval, 10);
    assert_eq!(timer.initial_countdown, 600);
    assert_eq!(timer.present_countdown, 300);
}
