//! FIX 4.4 tag=value codec.
//!
//! A message on the wire is `8=FIX.4.4<SOH>9=<len><SOH>...<SOH>10=<cks><SOH>`
//! where BodyLength counts the bytes between the BodyLength field's SOH and
//! the start of the CheckSum field, and CheckSum is the byte sum of
//! everything before the CheckSum field, mod 256, zero-padded to three
//! digits.
//!
//! `RawMessage` keeps fields in wire order so repeating groups
//! (267/269, 268/269...) survive a round-trip; `serialize ∘ parse = id`
//! holds for every message type the engine emits.

use crate::error::{FixError, FixResult};

/// Field separator.
pub const SOH: u8 = 0x01;

const BEGIN_STRING: &str = "FIX.4.4";

pub mod tags {
    pub const BEGIN_STRING: u32 = 8;
    pub const BODY_LENGTH: u32 = 9;
    pub const CHECK_SUM: u32 = 10;
    pub const CL_ORD_ID: u32 = 11;
    pub const CURRENCY: u32 = 15;
    pub const EXEC_ID: u32 = 17;
    pub const MSG_SEQ_NUM: u32 = 34;
    pub const MSG_TYPE: u32 = 35;
    pub const NEW_SEQ_NO: u32 = 36;
    pub const ORDER_QTY: u32 = 38;
    pub const ORD_STATUS: u32 = 39;
    pub const ORD_TYPE: u32 = 40;
    pub const ORIG_CL_ORD_ID: u32 = 41;
    pub const POSS_DUP_FLAG: u32 = 43;
    pub const PRICE: u32 = 44;
    pub const REF_SEQ_NUM: u32 = 45;
    pub const SENDER_COMP_ID: u32 = 49;
    pub const SENDING_TIME: u32 = 52;
    pub const SIDE: u32 = 54;
    pub const SYMBOL: u32 = 55;
    pub const TARGET_COMP_ID: u32 = 56;
    pub const TEXT: u32 = 58;
    pub const TIME_IN_FORCE: u32 = 59;
    pub const TRANSACT_TIME: u32 = 60;
    pub const RAW_DATA: u32 = 96;
    pub const ENCRYPT_METHOD: u32 = 98;
    pub const STOP_PX: u32 = 99;
    pub const HEART_BT_INT: u32 = 108;
    pub const TEST_REQ_ID: u32 = 112;
    pub const GAP_FILL_FLAG: u32 = 123;
    pub const RESET_SEQ_NUM_FLAG: u32 = 141;
    pub const NO_RELATED_SYM: u32 = 146;
    pub const EXEC_TYPE: u32 = 150;
    pub const LEAVES_QTY: u32 = 151;
    pub const SECURITY_TYPE: u32 = 167;
    pub const SECURITY_EXCHANGE: u32 = 207;
    pub const CUM_QTY: u32 = 14;
    pub const AVG_PX: u32 = 6;
    pub const BEGIN_SEQ_NO: u32 = 7;
    pub const END_SEQ_NO: u32 = 16;
    pub const LAST_PX: u32 = 31;
    pub const LAST_QTY: u32 = 32;
    pub const MD_REQ_ID: u32 = 262;
    pub const SUBSCRIPTION_REQUEST_TYPE: u32 = 263;
    pub const MARKET_DEPTH: u32 = 264;
    pub const NO_MD_ENTRY_TYPES: u32 = 267;
    pub const NO_MD_ENTRIES: u32 = 268;
    pub const MD_ENTRY_TYPE: u32 = 269;
    pub const MD_ENTRY_PX: u32 = 270;
    pub const MD_ENTRY_SIZE: u32 = 271;
    pub const SECURITY_REQ_ID: u32 = 320;
    pub const SECURITY_REQUEST_TYPE: u32 = 321;
    pub const SECURITY_RESPONSE_ID: u32 = 322;
    pub const MD_REQ_REJ_REASON: u32 = 281;
    pub const PRODUCT: u32 = 460;
    pub const BUSINESS_REJECT_REF_ID: u32 = 379;
    pub const BUSINESS_REJECT_REASON: u32 = 380;
}

/// A parsed FIX message: fields in wire order, header/trailer stripped of
/// nothing. Lookups scan linearly; messages are small.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    fields: Vec<(u32, String)>,
}

impl RawMessage {
    /// Start a message with its MsgType. BeginString, BodyLength, seqnum
    /// and CheckSum are stamped at serialization time.
    pub fn new(msg_type: &str) -> Self {
        Self {
            fields: vec![(tags::MSG_TYPE, msg_type.to_string())],
        }
    }

    pub fn from_fields(fields: Vec<(u32, String)>) -> Self {
        Self { fields }
    }

    pub fn push(&mut self, tag: u32, value: impl Into<String>) -> &mut Self {
        self.fields.push((tag, value.into()));
        self
    }

    /// First value for `tag`.
    pub fn get(&self, tag: u32) -> Option<&str> {
        self.fields
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `tag` in wire order (repeating groups).
    pub fn get_all(&self, tag: u32) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn require(&self, tag: u32) -> FixResult<&str> {
        self.get(tag).ok_or(FixError::MissingTag(tag))
    }

    pub fn msg_type(&self) -> FixResult<&str> {
        self.require(tags::MSG_TYPE)
    }

    pub fn seq_num(&self) -> FixResult<u64> {
        self.require(tags::MSG_SEQ_NUM)?
            .parse()
            .map_err(|_| FixError::Malformed("non-numeric MsgSeqNum".to_string()))
    }

    pub fn poss_dup(&self) -> bool {
        self.get(tags::POSS_DUP_FLAG) == Some("Y")
    }

    pub fn fields(&self) -> &[(u32, String)] {
        &self.fields
    }

    /// Fields in wire order starting at the first occurrence of `tag`.
    /// Used to walk repeating groups positionally.
    pub fn fields_from(&self, tag: u32) -> &[(u32, String)] {
        match self.fields.iter().position(|(t, _)| *t == tag) {
            Some(idx) => &self.fields[idx..],
            None => &[],
        }
    }

    /// Serialize with header and trailer: stamps BeginString, BodyLength,
    /// MsgSeqNum/SenderCompID/TargetCompID/SendingTime (callers push those
    /// into `self` first) and CheckSum.
    pub fn serialize(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(256);
        for (tag, value) in &self.fields {
            body.extend_from_slice(tag.to_string().as_bytes());
            body.push(b'=');
            body.extend_from_slice(value.as_bytes());
            body.push(SOH);
        }

        let mut out = Vec::with_capacity(body.len() + 32);
        out.extend_from_slice(format!("8={BEGIN_STRING}").as_bytes());
        out.push(SOH);
        out.extend_from_slice(format!("9={}", body.len()).as_bytes());
        out.push(SOH);
        out.extend_from_slice(&body);

        let checksum: u32 = out.iter().map(|&b| b as u32).sum();
        out.extend_from_slice(format!("10={:03}", checksum % 256).as_bytes());
        out.push(SOH);
        out
    }

    /// Parse a complete framed message, validating the checksum.
    pub fn parse(bytes: &[u8]) -> FixResult<Self> {
        let mut fields = Vec::new();
        let mut declared_checksum: Option<u8> = None;
        let mut checksum_offset = None;

        let mut start = 0usize;
        while start < bytes.len() {
            let end = bytes[start..]
                .iter()
                .position(|&b| b == SOH)
                .map(|p| start + p)
                .ok_or_else(|| FixError::Malformed("unterminated field".to_string()))?;
            let field = &bytes[start..end];
            let eq = field
                .iter()
                .position(|&b| b == b'=')
                .ok_or_else(|| FixError::Malformed("field without '='".to_string()))?;
            let tag: u32 = std::str::from_utf8(&field[..eq])
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| FixError::Malformed("non-numeric tag".to_string()))?;
            let value = String::from_utf8_lossy(&field[eq + 1..]).into_owned();

            match tag {
                tags::BEGIN_STRING | tags::BODY_LENGTH => {}
                tags::CHECK_SUM => {
                    declared_checksum = Some(
                        value
                            .parse()
                            .map_err(|_| FixError::Malformed("bad checksum".to_string()))?,
                    );
                    checksum_offset = Some(start);
                }
                _ => fields.push((tag, value)),
            }
            start = end + 1;
        }

        let declared =
            declared_checksum.ok_or_else(|| FixError::Malformed("missing CheckSum".to_string()))?;
        let offset =
            checksum_offset.ok_or_else(|| FixError::Malformed("missing CheckSum".to_string()))?;
        let computed = (bytes[..offset].iter().map(|&b| b as u32).sum::<u32>() % 256) as u8;
        if computed != declared {
            return Err(FixError::ChecksumMismatch { declared, computed });
        }

        if fields.is_empty() {
            return Err(FixError::Malformed("empty message".to_string()));
        }
        Ok(Self { fields })
    }
}

/// Incremental decoder for a FIX byte stream.
///
/// Accumulates bytes and yields complete framed messages. Framing relies on
/// BodyLength: a frame is `8=...|9=N|` + N body bytes + `10=XXX|`.
#[derive(Debug, Default)]
pub struct FixDecoder {
    buf: Vec<u8>,
}

impl FixDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Try to extract the next complete message from the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Garbage before the
    /// next `8=` marker is discarded.
    pub fn next_message(&mut self) -> FixResult<Option<RawMessage>> {
        // Resync to the next BeginString.
        if let Some(pos) = find_subsequence(&self.buf, b"8=FIX") {
            if pos > 0 {
                self.buf.drain(..pos);
            }
        } else {
            self.buf.clear();
            return Ok(None);
        }

        // Locate "9=<len><SOH>".
        let after_begin = match self.buf.iter().position(|&b| b == SOH) {
            Some(p) => p + 1,
            None => return Ok(None),
        };
        if !self.buf[after_begin..].starts_with(b"9=") {
            // BodyLength must immediately follow BeginString.
            self.buf.drain(..after_begin);
            return Err(FixError::Malformed(
                "BodyLength not after BeginString".to_string(),
            ));
        }
        let len_end = match self.buf[after_begin..].iter().position(|&b| b == SOH) {
            Some(p) => after_begin + p,
            None => return Ok(None),
        };
        let body_len: usize = std::str::from_utf8(&self.buf[after_begin + 2..len_end])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| FixError::Malformed("non-numeric BodyLength".to_string()))?;

        // body + "10=XXX<SOH>" trailer.
        let frame_end = len_end + 1 + body_len + 7;
        if self.buf.len() < frame_end {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buf.drain(..frame_end).collect();
        RawMessage::parse(&frame).map(Some)
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
