#![forbid(unsafe_code)]

//! The case catalogue.
//!
//! Names are stable: filters and reports key on them.

use bytes::Bytes;
use l2cap_core::signal::{
    CID_ATT, CONFIG_REQ, CONN_REQ, CONN_RSP, CMD_REJECT, DISCONN_REQ, ECRED_CONN_REQ,
    ECRED_CONN_RSP, LE_CONN_REQ, LE_CONN_RSP,
};
use l2cap_core::{
    AddressType, Advertising, BdAddr, ChannelMode, ConnectionParameters, Errno, IoCapability,
    SecurityLevel, SocketKind, TimestampFlags, Transfer, Transport,
};
use l2cap_stream::required_credits;
use once_cell::sync::Lazy;
use std::time::Duration;

use crate::lifecycle::{PhaseFn, TestCase};
use crate::scenarios::{basic, client, scan, server};
use crate::setup::{setup_client, setup_server};

const BREDR_PSM: u16 = 0x1001;
const LE_PSM: u16 = 0x0080;
const EATT_PSM: u16 = 0x0027;
const SDP_PSM: u16 = 0x0001;

/// PIN "0000".
const PAIR_PIN: &[u8] = b"0000";

/// Eight bytes `01..08`.
pub static L2_DATA: Lazy<Bytes> = Lazy::new(|| Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]));

const BLOCK_32K: usize = 4096;
pub const L2_DATA_32K_LEN: usize = 8 * BLOCK_32K;

/// 32 KiB in eight 4 KiB blocks filled with the block number.
pub static L2_DATA_32K: Lazy<Bytes> = Lazy::new(|| {
    let data: Vec<u8> =
        (0u8..8).flat_map(|block| std::iter::repeat(block).take(BLOCK_32K)).collect();
    Bytes::from(data)
});

/// An address nothing answers on.
const NONEXISTING_BDADDR: BdAddr = BdAddr([0x00, 0xAA, 0x01, 0x02, 0x03, 0x00]);

const TX_TIMESTAMPING: TimestampFlags = TimestampFlags::SOFTWARE
    .union(TimestampFlags::OPT_ID)
    .union(TimestampFlags::TX_SOFTWARE)
    .union(TimestampFlags::TX_COMPLETION);

const RX_TIMESTAMPING: TimestampFlags =
    TimestampFlags::SOFTWARE.union(TimestampFlags::RX_SOFTWARE);

const CONNECT_REQ: &[u8] = &[0x01, 0x10, 0x41, 0x00];

const SEC_BLOCK_RSP: &[u8] = &[
    0x00, 0x00, // dcid
    0x41, 0x00, // scid
    0x03, 0x00, // security block
    0x00, 0x00, // status
];

const NVAL_PSM_RSP: &[u8] = &[
    0x00, 0x00, // dcid
    0x41, 0x00, // scid
    0x02, 0x00, // invalid psm
    0x00, 0x00, // status
];

const NVAL_CONN_REQ: &[u8] = &[0x00];
const NVAL_PDU_RSP: &[u8] = &[0x00, 0x00];

const NVAL_DISCONN_REQ: &[u8] = &[0x12, 0x34, 0x56, 0x78];
const NVAL_DISCONN_RSP: &[u8] = &[0x02, 0x00, 0x12, 0x34, 0x56, 0x78];

const NVAL_CONFIG_REQ: &[u8] = &[0x12, 0x34, 0x00, 0x00];
const NVAL_CONFIG_RSP: &[u8] = &[0x02, 0x00, 0x12, 0x34, 0x00, 0x00];

/// Command reject, "not understood", for ident 1.
const CMD_REJECT_RSP: &[u8] = &[0x01, 0x01, 0x02, 0x00, 0x00, 0x00];

const LE_CONNECT_REQ: &[u8] = &[
    0x80, 0x00, // psm
    0x41, 0x00, // scid
    0x20, 0x00, // mtu
    0x20, 0x00, // mps
    0x05, 0x00, // credits
];

const LE_CONNECT_RSP: &[u8] = &[
    0x40, 0x00, // dcid
    0xa0, 0x02, // mtu
    0xbc, 0x00, // mps
    0x04, 0x00, // credits
    0x00, 0x00, // result
];

const NVAL_LE_CONNECT_REQ: &[u8] = &[
    0x80, 0x00, // psm
    0x01, 0x00, // scid
    0x20, 0x00, // mtu
    0x20, 0x00, // mps
    0x05, 0x00, // credits
];

const NVAL_LE_CONNECT_RSP: &[u8] = &[
    0x00, 0x00, // dcid
    0x00, 0x00, // mtu
    0x00, 0x00, // mps
    0x00, 0x00, // credits
    0x09, 0x00, // result
];

const ECRED_CONNECT_REQ: &[u8] = &[
    0x80, 0x00, // psm
    0x40, 0x00, // mtu
    0x40, 0x00, // mps
    0x05, 0x00, // credits
    0x41, 0x00, 0x42, 0x00, 0x43, 0x00, 0x44, 0x00, 0x45, 0x00, // scid 1-5
];

const ECRED_CONNECT_RSP: &[u8] = &[
    0xa0, 0x02, // mtu
    0xbc, 0x00, // mps
    0x04, 0x00, // credits
    0x00, 0x00, // result
    0x40, 0x00, 0x41, 0x00, 0x42, 0x00, 0x43, 0x00, 0x44, 0x00, // dcid 1-5
];

const NVAL_ECRED_CONNECT_REQ: &[u8] = &[
    0x80, 0x00, // psm
    0x40, 0x00, // mtu
    0x40, 0x00, // mps
    0x05, 0x00, // credits
    0x01, 0x00, // scid
];

const NVAL_ECRED_CONNECT_RSP: &[u8] = &[
    0x00, 0x00, // mtu
    0x00, 0x00, // mps
    0x00, 0x00, // credits
    0x09, 0x00, // result
    0x00, 0x00, // dcid
];

const EATT_CONNECT_REQ: &[u8] = &[
    0x27, 0x00, // psm
    0x40, 0x00, // mtu
    0x40, 0x00, // mps
    0x05, 0x00, // credits
    0x41, 0x00, // scid
];

const EATT_CONNECT_RSP: &[u8] = &[
    0xa0, 0x02, // mtu
    0xbc, 0x00, // mps
    0x04, 0x00, // credits
    0x00, 0x00, // result
    0x40, 0x00, // dcid
];

const EATT_REJECT_REQ: &[u8] = &[
    0x27, 0x00, // psm
    0x40, 0x00, // mtu
    0x40, 0x00, // mps
    0x05, 0x00, // credits
    0x41, 0x00, 0x42, 0x00, 0x43, 0x00, 0x44, 0x00, 0x45, 0x00, // scid 1-5
];

const EATT_REJECT_RSP: &[u8] = &[
    0xa0, 0x02, // mtu
    0xbc, 0x00, // mps
    0x04, 0x00, // credits
    0x06, 0x00, // result: insufficient authorization
];

/// Channel parameters of the LE 32k transfers.
pub const LE_32K_MTU: u16 = 672;
pub const LE_32K_MPS: u16 = 251;

/// Credits for every fragment of the 32k transfer (49 SDUs of three
/// fragments each), so it never waits for a refill.
pub const CREDITS_32K: u16 =
    match required_credits(L2_DATA_32K_LEN, LE_32K_MTU, LE_32K_MPS) {
        Ok(credits) if credits <= u16::MAX as u32 => credits as u16,
        _ => panic!("32k transfer does not fit one credit grant"),
    };

fn raw(bytes: &'static [u8]) -> Option<Bytes> {
    Some(Bytes::from_static(bytes))
}

fn client_psm(psm: u16) -> ConnectionParameters {
    ConnectionParameters { client_service_id: Some(psm), ..Default::default() }
}

/// Client and peer server on the same service.
fn both_psm(psm: u16) -> ConnectionParameters {
    ConnectionParameters {
        client_service_id: Some(psm),
        server_service_id: Some(psm),
        ..Default::default()
    }
}

fn read(data: &Bytes) -> Option<Transfer> {
    Some(Transfer::Inbound(data.clone()))
}

fn write(data: &Bytes) -> Option<Transfer> {
    Some(Transfer::Outbound(data.clone()))
}

/// Pins the peer server so a 32k transfer fits the credit budget.
fn le_32k(transfer: Option<Transfer>) -> ConnectionParameters {
    ConnectionParameters {
        mtu: Some(LE_32K_MTU),
        mps: Some(LE_32K_MPS),
        credits: Some(CREDITS_32K),
        transfer,
        ..both_psm(LE_PSM)
    }
}

/// A peer-initiated BR/EDR connection request.
fn bredr_server(server_psm: Option<u16>) -> ConnectionParameters {
    ConnectionParameters {
        server_service_id: server_psm,
        send_command_code: Some(CONN_REQ),
        raw_send_command: raw(CONNECT_REQ),
        expect_command_code: Some(CONN_RSP),
        ..Default::default()
    }
}

fn signal(
    send_code: u8,
    send: &'static [u8],
    expect_code: u8,
    expect: &'static [u8],
) -> ConnectionParameters {
    ConnectionParameters {
        send_command_code: Some(send_code),
        raw_send_command: raw(send),
        expect_command_code: Some(expect_code),
        raw_expect_command: raw(expect),
        ..Default::default()
    }
}

fn ext_flowctl(params: ConnectionParameters) -> ConnectionParameters {
    ConnectionParameters { mode: ChannelMode::ExtFlowctl, ..params }
}

struct Catalogue(Vec<TestCase>);

impl Catalogue {
    fn bredr(&mut self, name: &str, params: ConnectionParameters, setup: PhaseFn, body: PhaseFn) {
        self.0.push(TestCase::new(name, Transport::BrEdr, params, setup, body));
    }

    fn le(&mut self, name: &str, params: ConnectionParameters, setup: PhaseFn, body: PhaseFn) {
        self.0.push(TestCase::new(name, Transport::Le, params, setup, body));
    }
}

/// Every registered case, in execution order.
pub fn all_cases() -> Vec<TestCase> {
    let mut c = Catalogue(Vec::new());
    let data: &Bytes = &L2_DATA;
    let data_32k: &Bytes = &L2_DATA_32K;
    let none = ConnectionParameters::default;

    c.bredr("Basic L2CAP Socket - Success", none(), setup_client, basic::basic_socket);
    c.bredr(
        "Non-connected getpeername - Failure",
        none(),
        setup_client,
        basic::getpeername_not_connected,
    );

    // BR/EDR client
    c.bredr("L2CAP BR/EDR Client - Success", both_psm(BREDR_PSM), setup_client, client::connect);
    c.bredr(
        "L2CAP BR/EDR Client - Close",
        client_psm(BREDR_PSM),
        setup_client,
        client::connect_close,
    );
    c.bredr(
        "L2CAP BR/EDR Client - Timeout",
        ConnectionParameters { timeout: Some(Duration::from_secs(1)), ..client_psm(BREDR_PSM) },
        setup_client,
        client::connect_timeout,
    );
    c.bredr(
        "L2CAP BR/EDR Client SSP - Success 1",
        ConnectionParameters { enable_pairing: true, ..both_psm(BREDR_PSM) },
        setup_client,
        client::connect,
    );
    c.bredr(
        "L2CAP BR/EDR Client SSP - Success 2",
        ConnectionParameters {
            enable_pairing: true,
            security_level: Some(SecurityLevel::High),
            client_io_capability: Some(IoCapability::KeyboardDisplay),
            ..both_psm(BREDR_PSM)
        },
        setup_client,
        client::connect,
    );
    c.bredr(
        "L2CAP BR/EDR Client PIN Code - Success",
        ConnectionParameters {
            security_level: Some(SecurityLevel::Medium),
            pin: Some(Bytes::from_static(PAIR_PIN)),
            client_pin: Some(Bytes::from_static(PAIR_PIN)),
            ..both_psm(BREDR_PSM)
        },
        setup_client,
        client::connect,
    );
    c.bredr(
        "L2CAP BR/EDR Client - Read Success",
        ConnectionParameters { transfer: read(data), ..both_psm(BREDR_PSM) },
        setup_client,
        client::connect,
    );
    c.bredr(
        "L2CAP BR/EDR Client - Read 32k Success",
        ConnectionParameters { transfer: read(data_32k), ..both_psm(BREDR_PSM) },
        setup_client,
        client::connect,
    );
    c.bredr(
        "L2CAP BR/EDR Client - RX Timestamping",
        ConnectionParameters {
            transfer: read(data),
            timestamping_flags: RX_TIMESTAMPING,
            ..both_psm(BREDR_PSM)
        },
        setup_client,
        client::connect,
    );
    c.bredr(
        "L2CAP BR/EDR Client - RX Timestamping 32k",
        ConnectionParameters {
            transfer: read(data_32k),
            timestamping_flags: RX_TIMESTAMPING,
            ..both_psm(BREDR_PSM)
        },
        setup_client,
        client::connect,
    );
    c.bredr(
        "L2CAP BR/EDR Client - Write Success",
        ConnectionParameters { transfer: write(data), ..both_psm(BREDR_PSM) },
        setup_client,
        client::connect,
    );
    c.bredr(
        "L2CAP BR/EDR Client - Write 32k Success",
        ConnectionParameters { transfer: write(data_32k), ..both_psm(BREDR_PSM) },
        setup_client,
        client::connect,
    );
    c.bredr(
        "L2CAP BR/EDR Client - TX Timestamping",
        ConnectionParameters {
            transfer: write(data),
            timestamping_flags: TX_TIMESTAMPING,
            repeat_count: 2,
            ..both_psm(BREDR_PSM)
        },
        setup_client,
        client::connect,
    );
    c.bredr(
        "L2CAP BR/EDR Client - Stream TX Timestamping",
        ConnectionParameters {
            transfer: write(data),
            timestamping_flags: TX_TIMESTAMPING,
            repeat_count: 2,
            socket_kind: SocketKind::Stream,
            ..both_psm(BREDR_PSM)
        },
        setup_client,
        client::connect,
    );
    c.bredr(
        "L2CAP BR/EDR Client - Invalid PSM 1",
        ConnectionParameters {
            expect_error_code: Some(Errno::ECONNREFUSED),
            ..client_psm(BREDR_PSM)
        },
        setup_client,
        client::connect,
    );
    c.bredr(
        "L2CAP BR/EDR Client - Invalid PSM 2",
        ConnectionParameters {
            expect_error_code: Some(Errno::ECONNREFUSED),
            ..client_psm(SDP_PSM)
        },
        setup_client,
        client::connect,
    );
    c.bredr(
        "L2CAP BR/EDR Client - Invalid PSM 3",
        ConnectionParameters {
            expect_error_code: Some(Errno::ECONNREFUSED),
            enable_pairing: true,
            ..client_psm(SDP_PSM)
        },
        setup_client,
        client::connect,
    );
    c.bredr(
        "L2CAP BR/EDR Client - Socket Shut WR Success",
        ConnectionParameters { shutdown_write: true, ..both_psm(BREDR_PSM) },
        setup_client,
        client::connect,
    );

    // BR/EDR server
    c.bredr(
        "L2CAP BR/EDR Server - Success",
        bredr_server(Some(BREDR_PSM)),
        setup_server,
        server::serve,
    );
    c.bredr(
        "L2CAP BR/EDR Server - Read Success",
        ConnectionParameters { transfer: read(data), ..bredr_server(Some(BREDR_PSM)) },
        setup_server,
        server::serve,
    );
    c.bredr(
        "L2CAP BR/EDR Server - Read 32k Success",
        ConnectionParameters { transfer: read(data_32k), ..bredr_server(Some(BREDR_PSM)) },
        setup_server,
        server::serve,
    );
    c.bredr(
        "L2CAP BR/EDR Server - Write Success",
        ConnectionParameters { transfer: write(data), ..bredr_server(Some(BREDR_PSM)) },
        setup_server,
        server::serve,
    );
    c.bredr(
        "L2CAP BR/EDR Server - Write 32k Success",
        ConnectionParameters { transfer: write(data_32k), ..bredr_server(Some(BREDR_PSM)) },
        setup_server,
        server::serve,
    );
    c.bredr(
        "L2CAP BR/EDR Server - Security Block",
        ConnectionParameters {
            raw_expect_command: raw(SEC_BLOCK_RSP),
            enable_pairing: true,
            ..bredr_server(Some(BREDR_PSM))
        },
        setup_server,
        server::serve,
    );
    c.bredr(
        "L2CAP BR/EDR Server - Invalid PSM",
        ConnectionParameters { raw_expect_command: raw(NVAL_PSM_RSP), ..bredr_server(None) },
        setup_server,
        server::serve,
    );
    c.bredr(
        "L2CAP BR/EDR Server - Invalid PDU",
        signal(CONN_REQ, NVAL_CONN_REQ, CMD_REJECT, NVAL_PDU_RSP),
        setup_server,
        server::serve,
    );
    c.bredr(
        "L2CAP BR/EDR Server - Invalid Disconnect CID",
        signal(DISCONN_REQ, NVAL_DISCONN_REQ, CMD_REJECT, NVAL_DISCONN_RSP),
        setup_server,
        server::serve,
    );
    c.bredr(
        "L2CAP BR/EDR Server - Invalid Config CID",
        signal(CONFIG_REQ, NVAL_CONFIG_REQ, CMD_REJECT, NVAL_CONFIG_RSP),
        setup_server,
        server::serve,
    );

    c.bredr("L2CAP BR/EDR Ethtool Get Ts Info - Success", none(), setup_server, basic::ts_info);

    // LE client
    c.le("L2CAP LE Client - Success", both_psm(LE_PSM), setup_client, client::connect);
    c.le("L2CAP LE Client - Close", client_psm(LE_PSM), setup_client, client::connect_close);
    c.le(
        "L2CAP LE Client - Timeout",
        ConnectionParameters { timeout: Some(Duration::from_secs(1)), ..client_psm(LE_PSM) },
        setup_client,
        client::connect_timeout,
    );
    c.le(
        "L2CAP LE Client - Read Success",
        ConnectionParameters { transfer: read(data), ..both_psm(LE_PSM) },
        setup_client,
        client::connect,
    );
    c.le(
        "L2CAP LE Client - Read 32k Success",
        le_32k(read(data_32k)),
        setup_client,
        client::connect,
    );
    c.le(
        "L2CAP LE Client - RX Timestamping",
        ConnectionParameters {
            transfer: read(data),
            timestamping_flags: RX_TIMESTAMPING,
            ..both_psm(LE_PSM)
        },
        setup_client,
        client::connect,
    );
    c.le(
        "L2CAP LE Client - RX Timestamping 32k",
        ConnectionParameters { timestamping_flags: RX_TIMESTAMPING, ..le_32k(read(data_32k)) },
        setup_client,
        client::connect,
    );
    c.le(
        "L2CAP LE Client - Write Success",
        ConnectionParameters { transfer: write(data), ..both_psm(LE_PSM) },
        setup_client,
        client::connect,
    );
    c.le(
        "L2CAP LE Client - Write 32k Success",
        le_32k(write(data_32k)),
        setup_client,
        client::connect,
    );
    c.le(
        "L2CAP LE Client - TX Timestamping",
        ConnectionParameters {
            transfer: write(data),
            timestamping_flags: TX_TIMESTAMPING,
            ..both_psm(LE_PSM)
        },
        setup_client,
        client::connect,
    );
    c.le(
        "L2CAP LE Client, Direct Advertising - Success",
        ConnectionParameters { advertising: Advertising::Direct, ..both_psm(LE_PSM) },
        setup_client,
        client::connect,
    );
    c.le(
        "L2CAP LE Client SMP - Success",
        ConnectionParameters { security_level: Some(SecurityLevel::Medium), ..both_psm(LE_PSM) },
        setup_client,
        client::connect,
    );
    c.le(
        "L2CAP LE Client - Command Reject",
        ConnectionParameters {
            raw_send_command: raw(CMD_REJECT_RSP),
            expect_error_code: Some(Errno::ECONNREFUSED),
            ..client_psm(LE_PSM)
        },
        setup_client,
        client::connect,
    );
    // An LE address type on a BR/EDR-only controller.
    c.bredr(
        "L2CAP LE Client - Connection Reject",
        ConnectionParameters { address_type: Some(AddressType::LePublic), ..client_psm(LE_PSM) },
        setup_client,
        client::connect_reject,
    );
    c.le(
        "L2CAP LE Client - Close socket 1",
        ConnectionParameters { peer_address: Some(NONEXISTING_BDADDR), ..client_psm(LE_PSM) },
        setup_client,
        scan::close_socket,
    );
    c.le(
        "L2CAP LE Client - Close socket 2",
        ConnectionParameters { advertising: Advertising::None, ..client_psm(LE_PSM) },
        setup_client,
        scan::close_socket,
    );
    c.le(
        "L2CAP LE Client - Open two sockets",
        ConnectionParameters { advertising: Advertising::None, ..both_psm(LE_PSM) },
        setup_client,
        client::connect_two,
    );
    c.le(
        "L2CAP LE Client - Open two sockets close one",
        ConnectionParameters {
            advertising: Advertising::None,
            close_first: true,
            ..both_psm(LE_PSM)
        },
        setup_client,
        client::connect_two,
    );
    c.le(
        "L2CAP LE Client - Invalid PSM",
        ConnectionParameters { expect_error_code: Some(Errno::ECONNREFUSED), ..client_psm(LE_PSM) },
        setup_client,
        client::connect,
    );

    // LE server
    c.le(
        "L2CAP LE Server - Success",
        ConnectionParameters {
            server_service_id: Some(LE_PSM),
            ..signal(LE_CONN_REQ, LE_CONNECT_REQ, LE_CONN_RSP, LE_CONNECT_RSP)
        },
        setup_server,
        server::serve,
    );
    c.le(
        "L2CAP LE Server - Nval SCID",
        ConnectionParameters {
            server_service_id: Some(LE_PSM),
            ..signal(LE_CONN_REQ, NVAL_LE_CONNECT_REQ, LE_CONN_RSP, NVAL_LE_CONNECT_RSP)
        },
        setup_server,
        server::serve,
    );

    // Enhanced credit based flow control
    c.le(
        "L2CAP Ext-Flowctl Client - Success",
        ext_flowctl(both_psm(LE_PSM)),
        setup_client,
        client::connect,
    );
    c.le(
        "L2CAP Ext-Flowctl Client - Close",
        ext_flowctl(client_psm(LE_PSM)),
        setup_client,
        client::connect_close,
    );
    c.le(
        "L2CAP Ext-Flowctl Client - Timeout",
        ext_flowctl(ConnectionParameters {
            timeout: Some(Duration::from_secs(1)),
            ..client_psm(LE_PSM)
        }),
        setup_client,
        client::connect_timeout,
    );
    c.le(
        "L2CAP Ext-Flowctl Client, Direct Advertising - Success",
        ext_flowctl(ConnectionParameters { advertising: Advertising::Direct, ..both_psm(LE_PSM) }),
        setup_client,
        client::connect,
    );
    c.le(
        "L2CAP Ext-Flowctl Client SMP - Success",
        ext_flowctl(ConnectionParameters {
            security_level: Some(SecurityLevel::Medium),
            ..both_psm(LE_PSM)
        }),
        setup_client,
        client::connect,
    );
    c.le(
        "L2CAP Ext-Flowctl Client - Command Reject",
        ext_flowctl(ConnectionParameters {
            raw_send_command: raw(CMD_REJECT_RSP),
            expect_error_code: Some(Errno::ECONNREFUSED),
            ..client_psm(LE_PSM)
        }),
        setup_client,
        client::connect,
    );
    c.le(
        "L2CAP Ext-Flowctl Client - Open two sockets",
        ext_flowctl(ConnectionParameters { advertising: Advertising::None, ..both_psm(LE_PSM) }),
        setup_client,
        client::connect_two,
    );
    c.le(
        "L2CAP Ext-Flowctl Client - Open two sockets close one",
        ext_flowctl(ConnectionParameters {
            advertising: Advertising::None,
            close_first: true,
            ..both_psm(LE_PSM)
        }),
        setup_client,
        client::connect_two,
    );
    c.le(
        "L2CAP Ext-Flowctl Server - Success",
        ConnectionParameters {
            server_service_id: Some(LE_PSM),
            ..signal(ECRED_CONN_REQ, ECRED_CONNECT_REQ, ECRED_CONN_RSP, ECRED_CONNECT_RSP)
        },
        setup_server,
        server::serve,
    );
    c.le(
        "L2CAP Ext-Flowctl Server - Nval SCID",
        ConnectionParameters {
            server_service_id: Some(LE_PSM),
            ..signal(ECRED_CONN_REQ, NVAL_ECRED_CONNECT_REQ, ECRED_CONN_RSP, NVAL_ECRED_CONNECT_RSP)
        },
        setup_server,
        server::serve,
    );

    // Fixed ATT channel and enhanced ATT
    c.le(
        "L2CAP LE ATT Client - Success",
        ConnectionParameters {
            channel_id: Some(CID_ATT),
            security_level: Some(SecurityLevel::Low),
            ..none()
        },
        setup_client,
        client::connect,
    );
    c.le(
        "L2CAP LE ATT Server - Success",
        ConnectionParameters { channel_id: Some(CID_ATT), ..none() },
        setup_server,
        server::serve,
    );
    c.le(
        "L2CAP LE EATT Client - Success",
        ext_flowctl(ConnectionParameters {
            security_level: Some(SecurityLevel::Low),
            ..both_psm(EATT_PSM)
        }),
        setup_client,
        client::connect,
    );
    c.le(
        "L2CAP LE EATT Server - Success",
        ext_flowctl(ConnectionParameters {
            server_service_id: Some(EATT_PSM),
            deferred_accept: true,
            ..signal(ECRED_CONN_REQ, EATT_CONNECT_REQ, ECRED_CONN_RSP, EATT_CONNECT_RSP)
        }),
        setup_server,
        server::serve,
    );
    c.le(
        "L2CAP LE EATT Server - Reject",
        ext_flowctl(ConnectionParameters {
            server_service_id: Some(EATT_PSM),
            deferred_accept: true,
            expect_rejection_without_error: true,
            ..signal(ECRED_CONN_REQ, EATT_REJECT_REQ, ECRED_CONN_RSP, EATT_REJECT_RSP)
        }),
        setup_server,
        server::serve,
    );

    c.le("L2CAP LE Ethtool Get Ts Info - Success", none(), setup_server, basic::ts_info);

    c.0
}
