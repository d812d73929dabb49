//! AT reply decoding for the small command subset the driver uses.
//!
//! ```text
//! AT        -> OK
//! AT+CSQ    -> +CSQ: <rssi 0-31|99>,<ber>   OK
//! AT+CCID?  -> +CCID: <iccid>              OK | ERROR
//! ```

use serde::Serialize;

pub const CMD_ATTENTION: &str = "AT";
pub const CMD_ECHO_OFF: &str = "ATE0";
pub const CMD_POWER_DOWN: &str = "AT!POWERDOWN";
pub const CMD_SIGNAL_QUALITY: &str = "AT+CSQ";
pub const CMD_SIM_ICCID: &str = "AT+CCID?";

pub const CSQ_MARKER: &str = "+CSQ";
pub const CCID_MARKER: &str = "+CCID";

/// Protocol sentinel for "signal not known or not detectable".
pub const RSSI_NO_SIGNAL: u8 = 99;
/// Strongest level on the CSQ scale.
pub const RSSI_MAX: u8 = 31;

/// Non-empty lines of a modem reply, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AtResponse {
    lines: Vec<String>,
}

impl AtResponse {
    /// Decode raw bytes, splitting on CR and/or LF and dropping blank lines.
    pub fn from_bytes(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let lines = text
            .split(['\r', '\n'])
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn is_ok(&self) -> bool {
        self.lines.iter().any(|l| l.trim() == "OK")
    }

    /// True for a bare `ERROR` as well as `+CME ERROR: <n>` style replies.
    pub fn is_error(&self) -> bool {
        self.lines.iter().any(|l| l.contains("ERROR"))
    }

    /// First line containing `marker`.
    pub fn find(&self, marker: &str) -> Option<&str> {
        self.lines
            .iter()
            .find(|l| l.contains(marker))
            .map(String::as_str)
    }

    /// The text after `": "` on the first line containing `marker`.
    pub fn field(&self, marker: &str) -> Option<&str> {
        self.find(marker)?.split(": ").nth(1)
    }
}

impl From<Vec<String>> for AtResponse {
    fn from(lines: Vec<String>) -> Self {
        Self { lines }
    }
}

/// Raw RSSI from a `+CSQ` reply: 0..=31, or 99 passed through unchanged.
/// Anything else is malformed.
pub fn parse_rssi(response: &AtResponse) -> Option<u8> {
    let rssi = response
        .field(CSQ_MARKER)?
        .split(',')
        .next()?
        .trim()
        .parse::<u8>()
        .ok()?;
    match rssi {
        0..=RSSI_MAX => Some(rssi),
        RSSI_NO_SIGNAL => {
            tracing::warn!("no signal, missing antenna?");
            Some(rssi)
        }
        _ => None,
    }
}

/// Map the 0..=31 CSQ scale to dBm. The "no signal" sentinel and anything
/// off the scale map to `None`.
pub fn rssi_to_dbm(rssi: u8) -> Option<i32> {
    if rssi > RSSI_MAX {
        return None;
    }
    Some(-113 + 2 * i32::from(rssi))
}

/// ICCID from a `+CCID` reply; `None` on any error reply or a missing field.
pub fn parse_iccid(response: &AtResponse) -> Option<String> {
    if response.is_error() {
        return None;
    }
    let iccid = response.field(CCID_MARKER)?.trim();
    // ICCIDs are decimal, optionally padded with a trailing hex F.
    if iccid.is_empty() || !iccid.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(iccid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(raw: &str) -> AtResponse {
        AtResponse::from_bytes(raw.as_bytes())
    }

    #[test]
    fn splits_and_drops_blank_lines() {
        let r = reply("\r\n+CSQ: 17,99\r\n\r\nOK\r\n");
        assert_eq!(r.lines(), ["+CSQ: 17,99", "OK"]);
        assert!(r.is_ok());
        assert!(!r.is_error());
        assert!(reply("\r\n \r\n").is_empty());
    }

    #[test]
    fn ok_must_be_a_whole_line() {
        assert!(!reply("+COPS: 0,0,\"OK Mobile\"\r\n").is_ok());
        assert!(reply("  OK \r\n").is_ok());
    }

    #[test]
    fn rssi_parsed_from_csq_line() {
        assert_eq!(parse_rssi(&reply("+CSQ: 10,99\r\nOK\r\n")), Some(10));
        assert_eq!(parse_rssi(&reply("+CSQ: 99,99\r\nOK\r\n")), Some(99));
        assert_eq!(parse_rssi(&reply("OK\r\n")), None);
        assert_eq!(parse_rssi(&reply("+CSQ: ,99\r\n")), None);
        assert_eq!(parse_rssi(&reply("+CSQ:17\r\n")), None);
        assert_eq!(parse_rssi(&reply("+CSQ: 31,99\r\nOK\r\n")), Some(31));
        assert_eq!(parse_rssi(&reply("+CSQ: 32,99\r\nOK\r\n")), None);
        assert_eq!(parse_rssi(&reply("+CSQ: 100,99\r\nOK\r\n")), None);
    }

    #[test]
    fn dbm_mapping() {
        assert_eq!(rssi_to_dbm(99), None);
        assert_eq!(rssi_to_dbm(10), Some(-93));
        assert_eq!(rssi_to_dbm(0), Some(-113));
        assert_eq!(rssi_to_dbm(31), Some(-51));
        assert_eq!(rssi_to_dbm(32), None);
    }

    #[test]
    fn iccid_parsed_from_ccid_line() {
        let r = reply("+CCID: 89441000301234567890\r\n\r\nOK\r\n");
        assert_eq!(parse_iccid(&r).as_deref(), Some("89441000301234567890"));
        let padded = reply("+CCID: 8944100030123456789F\r\nOK\r\n");
        assert_eq!(parse_iccid(&padded).as_deref(), Some("8944100030123456789F"));
    }

    #[test]
    fn iccid_absent_on_error_or_missing_marker() {
        assert_eq!(parse_iccid(&reply("ERROR\r\n")), None);
        assert_eq!(parse_iccid(&reply("+CME ERROR: 10\r\n")), None);
        assert_eq!(parse_iccid(&reply("OK\r\n")), None);
        assert_eq!(parse_iccid(&reply("+CCID: \r\nOK\r\n")), None);
    }
}
