//! Session tests against an in-process mock acquirer.

use hex_literal::hex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::field55;
use crate::crypto::{CryptoProxy, local};
use crate::encode::{ascii_bytes, bytes_to_hex_upper};
use crate::error::PosError;
use crate::iso8583::message::{self, Field, select};
use crate::pos::{
    IcRefundRequest, IcReversalRequest, IcTags, IcTradeRequest, ScriptNotifyRequest,
    TcUploadRequest, TradeRequest, UnipayClient, UnipayConfig,
};

const TPDU: [u8; 5] = [0x60, 0x00, 0x03, 0x00, 0x00];
const PRIMARY_KEY: &str = "31313131313131313131313131313131";
const P_KEY: [u8; 16] = hex!("00112233445566778899AABBCCDDEEFF");
const M_KEY: [u8; 8] = hex!("0123456789ABCDEF");

/// Accept one connection per canned reply, record each framed request and
/// answer with the next reply.
async fn spawn_acquirer(replies: Vec<Vec<u8>>) -> (u16, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut replies = replies.into_iter();
        while let Some(reply) = replies.next() {
            let Ok((mut sock, _)) = listener.accept().await else { break };
            let mut header = [0u8; 2];
            if sock.read_exact(&mut header).await.is_err() {
                break;
            }
            let mut body = vec![0u8; u16::from_be_bytes(header) as usize];
            if sock.read_exact(&mut body).await.is_err() {
                break;
            }
            let mut framed = header.to_vec();
            framed.extend(body);
            let _ = tx.send(framed);
            let _ = sock.write_all(&reply).await;
        }
    });
    (port, rx)
}

fn test_config(port: u16) -> UnipayConfig {
    UnipayConfig::new(
        "127.0.0.1",
        port,
        "6000030000",
        "123456789012345",
        "12345678",
        "000001",
        PRIMARY_KEY,
        "A1234567",
    )
}

fn frame_reply(mti: &str, fields: &[Field]) -> Vec<u8> {
    let msg = message::build(&TPDU, mti, fields, false).unwrap();
    message::frame(&msg).unwrap()
}

/// Approval with the working keys wrapped under the terminal master key
/// and batch 654321.
fn register_reply() -> Vec<u8> {
    let primary = hex!("31313131313131313131313131313131");
    let enc_p = local::tdes_ecb_encrypt(&P_KEY, &primary).unwrap();
    let enc_m = local::tdes_ecb_encrypt(&M_KEY, &primary).unwrap();
    let field62 = format!(
        "{}30303030{}31313131",
        bytes_to_hex_upper(&enc_p),
        bytes_to_hex_upper(&enc_m)
    );
    let fields = [
        Field::new(39, "3030"),
        Field::new(60, "00654321003"),
        Field::new(62, field62),
    ];
    frame_reply("0810", &fields)
}

fn approved_trade_reply() -> Vec<u8> {
    let fields = [
        Field::new(12, "130500"),
        Field::new(13, "0921"),
        Field::new(37, bytes_to_hex_upper(b"123456789012")),
        Field::new(39, "3030"),
    ];
    frame_reply("0210", &fields)
}

fn status_reply(status: &str) -> Vec<u8> {
    frame_reply("0210", &[Field::new(39, status)])
}

fn sample_tags() -> IcTags {
    IcTags {
        secret: "0011223344556677".to_string(),
        issuer_info: "06010A03A02000".to_string(),
        unpredictable: "12345678".to_string(),
        counter: "005E".to_string(),
        trade_date: "170901".to_string(),
        script_status: None,
    }
}

fn trade_request() -> TradeRequest {
    TradeRequest {
        serial_no: "000123".to_string(),
        track2: "6225880155679893D49121010000059100000".to_string(),
        track3: None,
        pin_block: "1122334455667788".to_string(),
        price: 10_000,
    }
}

fn ic_trade_request() -> IcTradeRequest {
    IcTradeRequest {
        serial_no: "000123".to_string(),
        card_no: "6225880155679893".to_string(),
        tags: sample_tags(),
        track2: "6225880155679893D49121010000059100000".to_string(),
        track3: None,
        pin_block: "1122334455667788".to_string(),
        price: 10_000,
        csn: "001".to_string(),
    }
}

fn request_bitmap(framed: &[u8]) -> String {
    // Length header (4) + TPDU (10) + message header (12) + MTI (4).
    bytes_to_hex_upper(framed)[30..46].to_string()
}

#[tokio::test]
async fn register_downloads_working_keys() {
    let (port, mut rx) = spawn_acquirer(vec![register_reply()]).await;
    let mut client = UnipayClient::new(test_config(port)).unwrap();

    let outcome = client.register().await.unwrap();
    assert!(outcome.approved());
    assert_eq!(outcome.p_key.as_deref(), Some("00112233445566778899AABBCCDDEEFF"));
    assert_eq!(outcome.m_key.as_deref(), Some("0123456789ABCDEF"));
    assert_eq!(outcome.batch_no.as_deref(), Some("654321"));
    assert_eq!(
        outcome.key_check,
        Some(("30303030".to_string(), "31313131".to_string()))
    );
    assert_eq!(client.batch_no(), "654321");

    let request = rx.recv().await.unwrap();
    assert_eq!(request_bitmap(&request), "0020000000C00012");
    let fields = message::parse(&request).unwrap();
    assert_eq!(select(&fields, 11), Some("000001"));
    assert_eq!(select(&fields, 41), Some(bytes_to_hex_upper(b"12345678").as_str()));
    assert_eq!(select(&fields, 42), Some(bytes_to_hex_upper(b"123456789012345").as_str()));
    // Batch the terminal asked with, before the host reassigned it.
    assert_eq!(select(&fields, 60), Some("000000010030"));
    assert_eq!(select(&fields, 63), Some("303132"));
    // Sign-on carries no currency code, unlike the transactions.
    assert_eq!(select(&fields, 49), None);
}

#[tokio::test]
async fn trade_request_carries_valid_mac_and_pin() {
    let (port, mut rx) = spawn_acquirer(vec![register_reply(), approved_trade_reply()]).await;
    let mut client = UnipayClient::new(test_config(port)).unwrap();
    client.register().await.unwrap();

    let outcome = client.trade(&trade_request()).await.unwrap();
    assert!(outcome.approved());
    assert_eq!(outcome.retrieval_no.as_deref(), Some("123456789012"));
    assert_eq!(outcome.trade_time.as_deref(), Some("130500"));
    assert_eq!(outcome.trade_date.as_deref(), Some("0921"));

    rx.recv().await.unwrap();
    let request = rx.recv().await.unwrap();
    assert_eq!(request_bitmap(&request), "302004C020C09811");

    // The MAC is the retail MAC over MTI..fields under the working key.
    let msg = &request[2..];
    let mac = &msg[msg.len() - 8..];
    let expected = local::retail_mac(&msg[11..msg.len() - 8], &M_KEY).unwrap();
    assert_eq!(mac, expected);

    // The PIN block travels 3DES-encrypted under the working PIN key.
    let fields = message::parse(&request).unwrap();
    let pin = local::tdes_ecb_encrypt(&hex!("1122334455667788"), &P_KEY).unwrap();
    assert_eq!(select(&fields, 52), Some(bytes_to_hex_upper(&pin).as_str()));
    assert_eq!(select(&fields, 3), Some("190000"));
    assert_eq!(select(&fields, 4), Some("000000010000"));
    assert_eq!(select(&fields, 22), Some("0210"));
    assert_eq!(select(&fields, 60), Some("2265432100000052"));
}

#[tokio::test]
async fn unanswered_request_times_out() {
    // Reversals always run against the fixed short deadline.
    assert_eq!(crate::transport::REVERSAL_TIMEOUT_MS, 5000);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        // Accept and read the request, then go silent.
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = sock.read(&mut buf).await;
        std::future::pending::<()>().await;
    });

    let mut config = test_config(port);
    config.timeout_ms = 50;
    let mut client = UnipayClient::new(config).unwrap();
    let err = client.register().await.unwrap_err();
    assert!(matches!(err, PosError::Timeout(50)));
}

#[tokio::test]
async fn operations_before_sign_on_are_rejected() {
    let mut client = UnipayClient::new(test_config(1)).unwrap();
    let err = client.trade(&trade_request()).await.unwrap_err();
    assert!(matches!(err, PosError::NotRegistered));
    let err = client.trade_ic(&ic_trade_request()).await.unwrap_err();
    assert!(matches!(err, PosError::NotRegistered));
}

#[tokio::test]
async fn declined_register_leaves_session_unusable() {
    let (port, _rx) = spawn_acquirer(vec![status_reply("3531")]).await;
    let mut client = UnipayClient::new(test_config(port)).unwrap();

    let outcome = client.register().await.unwrap();
    assert!(!outcome.approved());
    assert_eq!(outcome.status, "3531");
    assert!(outcome.p_key.is_none());

    let err = client.trade(&trade_request()).await.unwrap_err();
    assert!(matches!(err, PosError::NotRegistered));
}

#[tokio::test]
async fn declined_trade_carries_no_receipt_fields() {
    let (port, _rx) = spawn_acquirer(vec![register_reply(), status_reply("3535")]).await;
    let mut client = UnipayClient::new(test_config(port)).unwrap();
    client.register().await.unwrap();

    let outcome = client.trade(&trade_request()).await.unwrap();
    assert!(!outcome.approved());
    assert_eq!(outcome.status, "3535");
    assert!(outcome.retrieval_no.is_none());
}

#[tokio::test]
async fn ic_trade_parses_issuer_reply() {
    // 91 = issuer auth data, 72 wraps two 86 scripts, 9F36 echoes the ATC.
    let blob = "91080102030405060708720A860311223386031A2B3C9F3602005E";
    let fields = [
        Field::new(12, "130500"),
        Field::new(13, "0921"),
        Field::new(37, bytes_to_hex_upper(b"123456789012")),
        Field::new(39, "3030"),
        Field::new(55, blob),
    ];
    let (port, mut rx) =
        spawn_acquirer(vec![register_reply(), frame_reply("0210", &fields)]).await;
    let mut client = UnipayClient::new(test_config(port)).unwrap();
    client.register().await.unwrap();

    let outcome = client.trade_ic(&ic_trade_request()).await.unwrap();
    assert!(outcome.approved());
    assert_eq!(outcome.arpc.as_deref(), Some("0102030405060708"));
    assert_eq!(outcome.scripts.as_deref(), Some("112233,1A2B3C"));
    assert_eq!(outcome.script_id.as_deref(), Some("005E"));

    rx.recv().await.unwrap();
    let request = rx.recv().await.unwrap();
    assert_eq!(request_bitmap(&request), "702006C020C09A11");
    let sent = message::parse(&request).unwrap();
    assert_eq!(select(&sent, 2), Some("6225880155679893"));
    assert_eq!(select(&sent, 22), Some("0510"));
    assert_eq!(select(&sent, 23), Some("0010"));
}

#[tokio::test]
async fn reversal_layout_fields() {
    let (port, mut rx) = spawn_acquirer(vec![register_reply(), status_reply("3030")]).await;
    let mut client = UnipayClient::new(test_config(port)).unwrap();
    client.register().await.unwrap();

    let req = IcReversalRequest {
        pre_serial_no: "000100".to_string(),
        tags: sample_tags(),
        track2: "6225880155679893D49121010000059100000".to_string(),
        track3: None,
        price: 10_000,
        csn: "001".to_string(),
        pre_trade_date: "0920".to_string(),
        pre_batch_no: "654320".to_string(),
    };
    let outcome = client.reversal_ic(&req).await.unwrap();
    assert!(outcome.approved());

    rx.recv().await.unwrap();
    let request = rx.recv().await.unwrap();
    assert_eq!(request_bitmap(&request), "3020068022C08219");
    let sent = message::parse(&request).unwrap();
    assert_eq!(select(&sent, 39), Some("3936"));
    assert_eq!(select(&sent, 60), Some("2265432000000050"));
    let trailer = bytes_to_hex_upper(&ascii_bytes("65432000010009200000000000000", 29));
    assert_eq!(select(&sent, 61), Some(trailer.as_str()));
}

#[tokio::test]
async fn refund_layout() {
    let (port, mut rx) = spawn_acquirer(vec![register_reply(), status_reply("3030")]).await;
    let mut client = UnipayClient::new(test_config(port)).unwrap();
    client.register().await.unwrap();

    let req = IcRefundRequest {
        serial_no: "000124".to_string(),
        card_no: "6225880155679893".to_string(),
        track2: "6225880155679893D49121010000059100000".to_string(),
        track3: None,
        price: 10_000,
        csn: "001".to_string(),
        pre_trade_date: "0920".to_string(),
        retrieval_no: "123456789012".to_string(),
        pre_serial_no: "000100".to_string(),
        pre_batch_no: "654320".to_string(),
    };
    let outcome = client.refund_ic(&req).await.unwrap();
    assert!(outcome.approved());

    rx.recv().await.unwrap();
    let request = rx.recv().await.unwrap();
    assert_eq!(request_bitmap(&request), "7020068028C08019");
    let sent = message::parse(&request).unwrap();
    assert_eq!(select(&sent, 3), Some("200000"));
    assert_eq!(select(&sent, 37), Some(bytes_to_hex_upper(b"123456789012").as_str()));
    // Refund uses the terminal's current batch, not the original one.
    assert_eq!(select(&sent, 60), Some("2565432100000050"));
}

#[tokio::test]
async fn tc_upload_layout() {
    let (port, mut rx) = spawn_acquirer(vec![register_reply(), status_reply("3030")]).await;
    let mut client = UnipayClient::new(test_config(port)).unwrap();
    client.register().await.unwrap();

    let req = TcUploadRequest {
        serial_no: "000100".to_string(),
        card_no: "6225880155679893".to_string(),
        tags: sample_tags(),
        price: 10_000,
        csn: "001".to_string(),
        pre_trade_date: "0920".to_string(),
        pre_trade_time: "130500".to_string(),
        pre_batch_no: "654320".to_string(),
    };
    let outcome = client.trade_tc_upload(&req).await.unwrap();
    assert!(outcome.approved());

    rx.recv().await.unwrap();
    let request = rx.recv().await.unwrap();
    assert_eq!(request_bitmap(&request), "5038060000C08212");
    let hex = bytes_to_hex_upper(&request);
    // Trailer: 23 bytes on the wire, 21 declared, no MAC after it.
    let trailer = bytes_to_hex_upper(&ascii_bytes("610000000000010000156", 23));
    assert!(hex.ends_with(&format!("0021{trailer}")));
}

#[tokio::test]
async fn script_notify_layout() {
    let (port, mut rx) = spawn_acquirer(vec![register_reply(), status_reply("3030")]).await;
    let mut client = UnipayClient::new(test_config(port)).unwrap();
    client.register().await.unwrap();

    let mut tags = sample_tags();
    tags.script_status = Some("1122334455".to_string());
    let req = ScriptNotifyRequest {
        serial_no: "000125".to_string(),
        card_no: "6225880155679893".to_string(),
        tags,
        price: 10_000,
        csn: "001".to_string(),
        pre_trade_date: "0920".to_string(),
        retrieval_no: "123456789012".to_string(),
        pre_serial_no: "000100".to_string(),
        pre_batch_no: "654320".to_string(),
    };
    let outcome = client.script_notify(&req).await.unwrap();
    assert!(outcome.approved());

    rx.recv().await.unwrap();
    let request = rx.recv().await.unwrap();
    assert_eq!(request_bitmap(&request), "7020068008C08219");
    let sent = message::parse(&request).unwrap();
    assert_eq!(select(&sent, 60), Some("2265432095100050"));
    // DF31 carries the reported script status.
    assert!(select(&sent, 55).unwrap().contains("DF31051122334455"));
}

#[test]
fn arqc_payload_tag_order() {
    let tags = sample_tags();
    let blob = field55::arqc_blob(&tags, 10_000, "A1234567", "000123").unwrap();
    let expected = concat!(
        "9F26080011223344556677",
        "9F270180",
        "9F100706010A03A02000",
        "9F370412345678",
        "9F3602005E",
        "9505008004E000",
        "9A03170901",
        "9C0100",
        "9F0206000000010000",
        "5F2A020156",
        "82027C00",
        "9F1A020156",
        "9F0306000000000000",
        "9F3303E0E9C8",
        "9F3403020300",
        "9F350122",
        "9F1E084131323334353637",
        "840E315041592E5359532E4444463031",
        "9F410400000123",
    );
    assert_eq!(blob, expected);
}

#[test]
fn tc_payload_flags_offline_approval() {
    let tags = sample_tags();
    let blob = field55::tc_blob(&tags, 10_000, "A1234567", "000123").unwrap();
    assert!(blob.starts_with("9F260800112233445566779F270140"));
}

#[test]
fn reversal_payload_has_zero_script_result() {
    let blob = field55::reversal_blob(&sample_tags()).unwrap();
    assert_eq!(
        blob,
        "9505008004E0009F100706010A03A020009F3602005EDF31050000000000"
    );
}

#[test]
fn script_notify_payload_requires_status() {
    assert!(matches!(
        field55::script_notify_blob(&sample_tags()),
        Err(PosError::Encoding(_))
    ));
}

async fn read_http_request(sock: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = sock.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                break;
            }
        }
    }
    buf
}

async fn spawn_proxy_responder(body: &'static str) -> (u16, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let request = read_http_request(&mut sock).await;
        let _ = tx.send(String::from_utf8_lossy(&request).to_string());
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let _ = sock.write_all(response.as_bytes()).await;
    });
    (port, rx)
}

#[tokio::test]
async fn crypto_proxy_round_trip() {
    let (port, mut rx) = spawn_proxy_responder(r#"{"data":"0102030405060708"}"#).await;
    let proxy = CryptoProxy::new(format!("http://127.0.0.1:{port}"));
    let mac = proxy.calc_mac("AB01").await.unwrap();
    assert_eq!(mac, hex!("0102030405060708"));

    let request = rx.recv().await.unwrap();
    assert!(request.starts_with("POST /calcMac"));
    assert!(request.contains(r#"{"data":"AB01"}"#));
}

#[tokio::test]
async fn crypto_proxy_error_is_surfaced() {
    let (port, _rx) = spawn_proxy_responder(r#"{"data":null,"error":"hsm offline"}"#).await;
    let proxy = CryptoProxy::new(format!("http://127.0.0.1:{port}"));
    let err = proxy.encrypt_tdes_ecb("1122334455667788").await.unwrap_err();
    assert!(matches!(err, PosError::ProxyFail(_)));
}
