//! Terminal session and transaction builders.

use tracing::{debug, info};

use crate::crypto::{CryptoBackend, CryptoProxy};
use crate::encode::{ascii_bytes, bytes_to_hex_upper, num_to_ascii, str_to_hex};
use crate::error::{PosError, Result};
use crate::iso8583::message::{self, Field};
use crate::transport::{HttpsTransport, REVERSAL_TIMEOUT_MS, TcpTransport, Transport};

use super::field55::{self, IcTags};
use super::response::{self, IcTradeOutcome, RegisterOutcome, StatusOutcome, TradeOutcome};

/// Bytes skipped before the MAC span: TPDU (5) + message header (6).
const MAC_OFFSET: usize = 11;

/// Connection and terminal identity settings.
#[derive(Debug, Clone)]
pub struct UnipayConfig {
    pub host: String,
    pub port: u16,
    /// Routing TPDU, 10 hex chars.
    pub tpdu: String,
    /// Merchant code, 15 ASCII chars (bit 42).
    pub pos_id: String,
    /// Terminal identifier, 8 ASCII chars (bit 41).
    pub terminal_id: String,
    /// Current batch number, 6 digits.
    pub batch_no: String,
    /// Terminal master key, 32 hex chars.
    pub primary_key: String,
    /// Device serial carried in EMV tag 9F1E, 8 ASCII chars.
    pub device_no: String,
    /// Per-transaction deadline, milliseconds.
    pub timeout_ms: u64,
    /// Tunnel through the HTTPS gateway instead of raw TCP.
    pub https: bool,
    /// Extra trust root (PEM) for the HTTPS tunnel.
    pub tls_ca: Option<String>,
    /// Verify the gateway certificate. Turning this off reproduces the
    /// legacy terminal behavior.
    pub tls_verify: bool,
    /// Base URL of a remote crypto proxy; local primitives when unset.
    pub crypto_proxy: Option<String>,
}

impl UnipayConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        tpdu: impl Into<String>,
        pos_id: impl Into<String>,
        terminal_id: impl Into<String>,
        batch_no: impl Into<String>,
        primary_key: impl Into<String>,
        device_no: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            tpdu: tpdu.into(),
            pos_id: pos_id.into(),
            terminal_id: terminal_id.into(),
            batch_no: batch_no.into(),
            primary_key: primary_key.into(),
            device_no: device_no.into(),
            timeout_ms: 15_000,
            https: false,
            tls_ca: None,
            tls_verify: true,
            crypto_proxy: None,
        }
    }
}

/// Magstripe purchase.
#[derive(Debug, Clone)]
pub struct TradeRequest {
    /// System trace number, 6 digits.
    pub serial_no: String,
    /// Track 2 nibbles ('D' separator), up to 37.
    pub track2: String,
    pub track3: Option<String>,
    /// PIN block to encrypt under the working PIN key, 16 hex chars.
    pub pin_block: String,
    /// Amount in the smallest currency unit.
    pub price: u64,
}

/// IC chip purchase carrying an ARQC.
#[derive(Debug, Clone)]
pub struct IcTradeRequest {
    pub serial_no: String,
    /// Primary account number digits.
    pub card_no: String,
    pub tags: IcTags,
    pub track2: String,
    pub track3: Option<String>,
    pub pin_block: String,
    pub price: u64,
    /// Card sequence number, 3 digits.
    pub csn: String,
}

/// Reversal of an earlier IC purchase.
#[derive(Debug, Clone)]
pub struct IcReversalRequest {
    /// Trace number of the transaction being reversed.
    pub pre_serial_no: String,
    pub tags: IcTags,
    pub track2: String,
    pub track3: Option<String>,
    pub price: u64,
    pub csn: String,
    /// Date of the original transaction (bit 13 nibbles).
    pub pre_trade_date: String,
    /// Batch the original transaction was sent in.
    pub pre_batch_no: String,
}

/// Refund against a settled IC purchase.
#[derive(Debug, Clone)]
pub struct IcRefundRequest {
    pub serial_no: String,
    pub card_no: String,
    pub track2: String,
    pub track3: Option<String>,
    pub price: u64,
    pub csn: String,
    pub pre_trade_date: String,
    /// Retrieval reference of the original transaction, 12 ASCII chars.
    pub retrieval_no: String,
    pub pre_serial_no: String,
    pub pre_batch_no: String,
}

/// Transaction certificate upload for an offline-completed IC purchase.
#[derive(Debug, Clone)]
pub struct TcUploadRequest {
    pub serial_no: String,
    pub card_no: String,
    pub tags: IcTags,
    pub price: u64,
    pub csn: String,
    pub pre_trade_date: String,
    pub pre_trade_time: String,
    pub pre_batch_no: String,
}

/// Issuer script execution result notification.
#[derive(Debug, Clone)]
pub struct ScriptNotifyRequest {
    pub serial_no: String,
    pub card_no: String,
    pub tags: IcTags,
    pub price: u64,
    pub csn: String,
    pub pre_trade_date: String,
    pub retrieval_no: String,
    pub pre_serial_no: String,
    pub pre_batch_no: String,
}

/// One acquiring session: sign on first, then run transactions with the
/// downloaded working keys. Methods take `&mut self`, so a session carries
/// at most one transaction in flight.
pub struct UnipayClient {
    transport: Transport,
    crypto: CryptoBackend,
    tpdu: Vec<u8>,
    pos_id: String,
    terminal_id: String,
    device_no: String,
    primary_key: Vec<u8>,
    batch_no: String,
    timeout_ms: u64,
    p_key: Option<Vec<u8>>,
    m_key: Option<Vec<u8>>,
    registered: bool,
}

impl UnipayClient {
    pub fn new(config: UnipayConfig) -> Result<Self> {
        let tpdu = str_to_hex(&config.tpdu)?;
        if tpdu.len() != 5 {
            return Err(PosError::Encoding(format!(
                "TPDU must be 10 hex chars, got {:?}",
                config.tpdu
            )));
        }
        let primary_key = str_to_hex(&config.primary_key)?;
        if primary_key.len() != 16 {
            return Err(PosError::Encoding("primary key must be 32 hex chars".to_string()));
        }
        let transport = if config.https {
            Transport::Https(HttpsTransport::new(
                &config.host,
                config.port,
                config.tls_ca.as_deref(),
                config.tls_verify,
            )?)
        } else {
            Transport::Tcp(TcpTransport::new(&config.host, config.port))
        };
        let crypto = match &config.crypto_proxy {
            Some(base_url) => CryptoBackend::Proxy(CryptoProxy::new(base_url)),
            None => CryptoBackend::Local,
        };
        Ok(Self {
            transport,
            crypto,
            tpdu,
            pos_id: config.pos_id,
            terminal_id: config.terminal_id,
            device_no: config.device_no,
            primary_key,
            batch_no: config.batch_no,
            timeout_ms: config.timeout_ms,
            p_key: None,
            m_key: None,
            registered: false,
        })
    }

    /// Batch number currently in effect (updated by [`register`](Self::register)).
    pub fn batch_no(&self) -> &str {
        &self.batch_no
    }

    /// Sign on: MTI 0800. On approval the host returns the working keys
    /// wrapped under the terminal master key and a fresh batch number.
    pub async fn register(&mut self) -> Result<RegisterOutcome> {
        let mut fields = vec![
            Field::new(11, "000001"),
            Field::new(60, format!("00{}003", self.batch_no)),
            Field::new(63, bytes_to_hex_upper(b"012")),
        ];
        fields.extend(self.identity_fields());
        let msg = message::build(&self.tpdu, "0800", &fields, false)?;
        let framed = message::frame(&msg)?;
        let reply = self.round_trip("register", framed, self.timeout_ms).await?;

        let mut outcome =
            RegisterOutcome { status: response::status_of(&reply), ..Default::default() };
        if outcome.approved()
            && let Some(keys) = message::select(&reply, 62)
            && keys.len() == 64
        {
            match &self.crypto {
                CryptoBackend::Local => {
                    let p_key = self
                        .crypto
                        .decrypt_tdes_ecb(&str_to_hex(&keys[..32])?, &self.primary_key)
                        .await?;
                    let m_key = self
                        .crypto
                        .decrypt_tdes_ecb(&str_to_hex(&keys[40..56])?, &self.primary_key)
                        .await?;
                    outcome.p_key = Some(bytes_to_hex_upper(&p_key));
                    outcome.m_key = Some(bytes_to_hex_upper(&m_key));
                    self.p_key = Some(p_key);
                    self.m_key = Some(m_key);
                }
                CryptoBackend::Proxy(_) => {
                    // The HSM unwraps and stores the working keys itself.
                    self.crypto.register_passthrough(keys).await?;
                }
            }
            outcome.key_check = Some((keys[32..40].to_string(), keys[56..64].to_string()));
            self.registered = true;
        }
        if let Some(batch) = message::select(&reply, 60)
            && batch.len() >= 8
        {
            self.batch_no = batch[2..8].to_string();
            outcome.batch_no = Some(self.batch_no.clone());
        }
        info!("register: status {:?}", outcome.status);
        Ok(outcome)
    }

    /// Magstripe purchase: MTI 0200.
    pub async fn trade(&mut self, req: &TradeRequest) -> Result<TradeOutcome> {
        self.ensure_registered()?;
        let mut fields = vec![
            Field::new(3, "190000"),
            Field::new(4, num_to_ascii(req.price, 12)),
            Field::new(11, req.serial_no.clone()),
            Field::new(22, "0210"),
            Field::new(25, "82"),
            Field::new(26, "06"),
            Field::new(35, req.track2.clone()),
            Field::new(52, self.encrypted_pin(&req.pin_block).await?),
            Field::new(53, "1600000000000000"),
            Field::new(60, format!("22{}00000052", self.batch_no)),
        ];
        if let Some(track3) = &req.track3 {
            fields.push(Field::new(36, track3.clone()));
        }
        fields.extend(self.terminal_fields());
        let msg = message::build(&self.tpdu, "0200", &fields, true)?;
        let framed = self.seal_and_frame(msg).await?;
        let reply = self.round_trip("trade", framed, self.timeout_ms).await?;
        let outcome = response::trade_outcome(&reply)?;
        info!("trade: status {:?}", outcome.status);
        Ok(outcome)
    }

    /// IC chip purchase: MTI 0200 with PAN, card sequence number and the
    /// ARQC payload in bit 55. An approval may carry issuer authentication
    /// data and scripts back.
    pub async fn trade_ic(&mut self, req: &IcTradeRequest) -> Result<IcTradeOutcome> {
        self.ensure_registered()?;
        let arqc = field55::arqc_blob(&req.tags, req.price, &self.device_no, &req.serial_no)?;
        let mut fields = vec![
            Field::new(2, req.card_no.clone()),
            Field::new(3, "190000"),
            Field::new(4, num_to_ascii(req.price, 12)),
            Field::new(11, req.serial_no.clone()),
            Field::new(22, "0510"),
            Field::new(23, format!("{}0", req.csn)),
            Field::new(25, "82"),
            Field::new(26, "06"),
            Field::new(35, req.track2.clone()),
            Field::new(52, self.encrypted_pin(&req.pin_block).await?),
            Field::new(53, "1600000000000000"),
            Field::new(55, arqc),
            Field::new(60, format!("22{}00000050", self.batch_no)),
        ];
        if let Some(track3) = &req.track3 {
            fields.push(Field::new(36, track3.clone()));
        }
        fields.extend(self.terminal_fields());
        let msg = message::build(&self.tpdu, "0200", &fields, true)?;
        let framed = self.seal_and_frame(msg).await?;
        let reply = self.round_trip("trade_ic", framed, self.timeout_ms).await?;
        let outcome = response::ic_trade_outcome(&reply)?;
        info!("trade_ic: status {:?}", outcome.status);
        Ok(outcome)
    }

    /// Reverse an earlier IC purchase: MTI 0400, fixed 5 s deadline.
    pub async fn reversal_ic(&mut self, req: &IcReversalRequest) -> Result<StatusOutcome> {
        self.ensure_registered()?;
        let mut fields = vec![
            Field::new(3, "190000"),
            Field::new(4, num_to_ascii(req.price, 12)),
            Field::new(11, req.pre_serial_no.clone()),
            Field::new(22, "0510"),
            Field::new(23, format!("{}0", req.csn)),
            Field::new(25, "82"),
            Field::new(35, req.track2.clone()),
            Field::new(39, bytes_to_hex_upper(b"96")),
            Field::new(55, field55::reversal_blob(&req.tags)?),
            Field::new(60, format!("22{}00000050", req.pre_batch_no)),
            trailer_field(&req.pre_batch_no, &req.pre_serial_no, &req.pre_trade_date),
        ];
        if let Some(track3) = &req.track3 {
            fields.push(Field::new(36, track3.clone()));
        }
        fields.extend(self.terminal_fields());
        let msg = message::build(&self.tpdu, "0400", &fields, true)?;
        let framed = self.seal_and_frame(msg).await?;
        let reply = self.round_trip("reversal_ic", framed, REVERSAL_TIMEOUT_MS).await?;
        let outcome = response::status_outcome(&reply);
        info!("reversal_ic: status {:?}", outcome.status);
        Ok(outcome)
    }

    /// Refund against a settled IC purchase: MTI 0220, processing code
    /// 200000. Shares the short reversal deadline.
    pub async fn refund_ic(&mut self, req: &IcRefundRequest) -> Result<StatusOutcome> {
        self.ensure_registered()?;
        let mut fields = vec![
            Field::new(2, req.card_no.clone()),
            Field::new(3, "200000"),
            Field::new(4, num_to_ascii(req.price, 12)),
            Field::new(11, req.serial_no.clone()),
            Field::new(22, "0510"),
            Field::new(23, format!("{}0", req.csn)),
            Field::new(25, "82"),
            Field::new(35, req.track2.clone()),
            Field::new(37, bytes_to_hex_upper(&ascii_bytes(&req.retrieval_no, 12))),
            Field::new(60, format!("25{}00000050", self.batch_no)),
            trailer_field(&req.pre_batch_no, &req.pre_serial_no, &req.pre_trade_date),
        ];
        if let Some(track3) = &req.track3 {
            fields.push(Field::new(36, track3.clone()));
        }
        fields.extend(self.terminal_fields());
        let msg = message::build(&self.tpdu, "0220", &fields, true)?;
        let framed = self.seal_and_frame(msg).await?;
        let reply = self.round_trip("refund_ic", framed, REVERSAL_TIMEOUT_MS).await?;
        let outcome = response::status_outcome(&reply);
        info!("refund_ic: status {:?}", outcome.status);
        Ok(outcome)
    }

    /// Upload the transaction certificate of an offline-completed IC
    /// purchase: MTI 0320, no MAC.
    pub async fn trade_tc_upload(&mut self, req: &TcUploadRequest) -> Result<StatusOutcome> {
        self.ensure_registered()?;
        let tc = field55::tc_blob(&req.tags, req.price, &self.device_no, &req.serial_no)?;
        let trailer = format!("610000{}156", num_to_ascii(req.price, 12));
        let mut fields = vec![
            Field::new(2, req.card_no.clone()),
            Field::new(4, num_to_ascii(req.price, 12)),
            Field::new(11, req.serial_no.clone()),
            Field::new(12, req.pre_trade_time.clone()),
            Field::new(13, req.pre_trade_date.clone()),
            Field::new(22, "0510"),
            Field::new(23, format!("{}0", req.csn)),
            Field::new(55, tc),
            Field::new(60, format!("22{}20300050", req.pre_batch_no)),
            // The host wants this trailer padded to 23 bytes but declared as 21.
            Field::with_declared(63, bytes_to_hex_upper(&ascii_bytes(&trailer, 23)), 21),
        ];
        fields.extend(self.terminal_fields());
        let msg = message::build(&self.tpdu, "0320", &fields, false)?;
        let framed = message::frame(&msg)?;
        let reply = self.round_trip("trade_tc_upload", framed, self.timeout_ms).await?;
        let outcome = response::status_outcome(&reply);
        info!("trade_tc_upload: status {:?}", outcome.status);
        Ok(outcome)
    }

    /// Report the issuer script execution result: MTI 0620.
    pub async fn script_notify(&mut self, req: &ScriptNotifyRequest) -> Result<StatusOutcome> {
        self.ensure_registered()?;
        let mut fields = vec![
            Field::new(2, req.card_no.clone()),
            Field::new(3, "190000"),
            Field::new(4, num_to_ascii(req.price, 12)),
            Field::new(11, req.serial_no.clone()),
            Field::new(22, "0510"),
            Field::new(23, format!("{}0", req.csn)),
            Field::new(25, "82"),
            Field::new(37, bytes_to_hex_upper(&ascii_bytes(&req.retrieval_no, 12))),
            Field::new(55, field55::script_notify_blob(&req.tags)?),
            Field::new(60, format!("22{}95100050", req.pre_batch_no)),
            trailer_field(&req.pre_batch_no, &req.pre_serial_no, &req.pre_trade_date),
        ];
        fields.extend(self.terminal_fields());
        let msg = message::build(&self.tpdu, "0620", &fields, true)?;
        let framed = self.seal_and_frame(msg).await?;
        let reply = self.round_trip("script_notify", framed, self.timeout_ms).await?;
        let outcome = response::status_outcome(&reply);
        info!("script_notify: status {:?}", outcome.status);
        Ok(outcome)
    }

    fn ensure_registered(&self) -> Result<()> {
        if self.registered { Ok(()) } else { Err(PosError::NotRegistered) }
    }

    /// Bits 41 / 42, present in every message.
    fn identity_fields(&self) -> [Field; 2] {
        [
            Field::new(41, bytes_to_hex_upper(self.terminal_id.as_bytes())),
            Field::new(42, bytes_to_hex_upper(self.pos_id.as_bytes())),
        ]
    }

    /// Bits 41 / 42 / 49; sign-on is the only message without the currency.
    fn terminal_fields(&self) -> [Field; 3] {
        let [terminal, merchant] = self.identity_fields();
        [terminal, merchant, Field::new(49, bytes_to_hex_upper(b"156"))]
    }

    async fn encrypted_pin(&self, pin_block: &str) -> Result<String> {
        let data = str_to_hex(pin_block)?;
        let key = self.p_key.as_deref().unwrap_or_default();
        Ok(bytes_to_hex_upper(&self.crypto.encrypt_tdes_ecb(&data, key).await?))
    }

    /// Append the retail MAC over everything after the message header,
    /// then frame.
    async fn seal_and_frame(&self, mut msg: Vec<u8>) -> Result<Vec<u8>> {
        let key = self.m_key.as_deref().unwrap_or_default();
        let mac = self.crypto.calc_mac(&msg[MAC_OFFSET..], key).await?;
        msg.extend_from_slice(&mac);
        message::frame(&msg)
    }

    async fn round_trip(&self, op: &str, framed: Vec<u8>, timeout_ms: u64) -> Result<Vec<Field>> {
        info!("{op}: sending {} bytes", framed.len());
        let reply = self.transport.exchange(&framed, timeout_ms).await?;
        let fields = message::parse(&reply)?;
        debug!("{op}: reply fields {fields:?}");
        Ok(fields)
    }
}

/// Bit 61: original batch, trace number and date, zero filled to 29
/// ASCII bytes.
fn trailer_field(pre_batch: &str, pre_serial: &str, pre_trade_date: &str) -> Field {
    let text = format!("{pre_batch}{pre_serial}{pre_trade_date}0000000000000");
    Field::new(61, bytes_to_hex_upper(&ascii_bytes(&text, 29)))
}
