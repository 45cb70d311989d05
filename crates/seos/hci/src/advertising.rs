//! Advertising payloads
//!
//! Advertising data and scan responses are lists of AD structures
//! (`<len> <type> <value>`), at most 31 bytes long.

use crate::config::HciConfig;

/// Longest advertising or scan response payload
pub const MAX_AD_LEN: usize = 31;

/// 128-bit service advertised by SEOS readers, wire order
pub const READER_SERVICE: [u8; 16] = [
    0x02, 0x00, 0x00, 0x7A, 0x17, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x98, 0x00,
    0x00,
];

/// 128-bit service advertised by SEOS credentials, wire order
pub const CREDENTIAL_SERVICE: [u8; 16] = [
    0x02, 0x00, 0x00, 0x7A, 0x17, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x01, 0x98, 0x00,
    0x00,
];

/// AD structure types
pub mod ad_type {
    /// Flags
    pub const FLAGS: u8 = 0x01;
    /// Complete list of 128-bit service UUIDs
    pub const COMPLETE_SERVICE_UUIDS_128: u8 = 0x07;
    /// Shortened local name
    pub const SHORT_LOCAL_NAME: u8 = 0x08;
    /// Complete local name
    pub const COMPLETE_LOCAL_NAME: u8 = 0x09;
    /// Manufacturer specific data
    pub const MANUFACTURER_DATA: u8 = 0xFF;
}

/// LE general discoverable, BR/EDR not supported
const FLAGS_GENERAL_DISCOVERABLE: u8 = 0x06;
/// Bluetooth SIG company identifier, little-endian
const COMPANY_ID: [u8; 2] = [0x2E, 0x01];
/// Payload format marker following the company identifier
const MANUFACTURER_FORMAT: u8 = 0x15;
/// Fixed trailer of the manufacturer data
const MANUFACTURER_TRAILER: &[u8; 11] = b"*FL0K7Z01U1";
/// Size of the manufacturer data structure, header included
const MANUFACTURER_AD_LEN: usize = 2 + COMPANY_ID.len() + 1 + 1 + 4 + MANUFACTURER_TRAILER.len();
/// Longest local name that still fits next to the manufacturer data
pub const MAX_NAME_LEN: usize = MAX_AD_LEN - MANUFACTURER_AD_LEN - 2;

/// Iterator over the AD structures of an advertising payload
///
/// Stops at the first zero length or truncated structure.
#[derive(Debug, Clone)]
pub struct AdStructures<'a> {
    data: &'a [u8],
}

/// Walk the AD structures of `data`
pub const fn ad_structures(data: &[u8]) -> AdStructures<'_> {
    AdStructures { data }
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let (&len, rest) = self.data.split_first()?;
        let len = usize::from(len);
        if len == 0 || rest.len() < len {
            self.data = &[];
            return None;
        }
        let (structure, rest) = rest.split_at(len);
        self.data = rest;
        Some((structure[0], &structure[1..]))
    }
}

/// Whether the payload lists `service` among its 128-bit service UUIDs
pub fn advertises_service(data: &[u8], service: &[u8; 16]) -> bool {
    ad_structures(data).any(|(kind, value)| {
        kind == ad_type::COMPLETE_SERVICE_UUIDS_128
            && value.chunks_exact(16).any(|uuid| uuid == service)
    })
}

/// The local name, complete or shortened
pub fn local_name(data: &[u8]) -> Option<String> {
    ad_structures(data)
        .find(|(kind, _)| {
            *kind == ad_type::COMPLETE_LOCAL_NAME || *kind == ad_type::SHORT_LOCAL_NAME
        })
        .map(|(_, name)| String::from_utf8_lossy(name).into_owned())
}

/// Flags and the advertised service
pub fn advertising_data(service: &[u8; 16]) -> Vec<u8> {
    let mut data = Vec::with_capacity(MAX_AD_LEN);
    data.extend_from_slice(&[2, ad_type::FLAGS, FLAGS_GENERAL_DISCOVERABLE]);
    data.push(1 + service.len() as u8);
    data.push(ad_type::COMPLETE_SERVICE_UUIDS_128);
    data.extend_from_slice(service);
    data
}

/// Local name and the manufacturer data readers look for
pub fn scan_response_data(config: &HciConfig) -> Vec<u8> {
    let name = config.device_name.as_bytes();
    let name = &name[..name.len().min(MAX_NAME_LEN)];

    let mut data = Vec::with_capacity(MAX_AD_LEN);
    data.push(1 + name.len() as u8);
    data.push(ad_type::COMPLETE_LOCAL_NAME);
    data.extend_from_slice(name);

    data.push((MANUFACTURER_AD_LEN - 1) as u8);
    data.push(ad_type::MANUFACTURER_DATA);
    data.extend_from_slice(&COMPANY_ID);
    data.push(MANUFACTURER_FORMAT);
    data.push(config.capabilities);
    data.extend(config.rssi_thresholds.iter().map(|&rssi| rssi as u8));
    data.extend_from_slice(MANUFACTURER_TRAILER);
    data
}

/// Command parameters for LE Set Advertising Data and LE Set Scan Response
/// Data: the significant length, then the payload zero-padded to 31 bytes
pub fn padded_parameters(data: &[u8]) -> Vec<u8> {
    let len = data.len().min(MAX_AD_LEN);
    let mut parameters = Vec::with_capacity(1 + MAX_AD_LEN);
    parameters.push(len as u8);
    parameters.extend_from_slice(&data[..len]);
    parameters.resize(1 + MAX_AD_LEN, 0x00);
    parameters
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_advertising_data() {
        let data = advertising_data(&CREDENTIAL_SERVICE);
        assert_eq!(
            data,
            hex!("020106 1107 0200007A170000800010000001980000")
        );
        let parameters = padded_parameters(&data);
        assert_eq!(parameters.len(), 32);
        assert_eq!(parameters[0], 0x15);
        assert!(parameters[22..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_scan_response() {
        let data = scan_response_data(&HciConfig::default());
        assert_eq!(
            data,
            hex!("0809 466C6970706572 14FF 2E01 15 4E B5B5B5B5 2A464C304B375A30315531")
        );
        assert_eq!(padded_parameters(&data)[0], 30);
        assert_eq!(local_name(&data).as_deref(), Some("Flipper"));
    }

    #[test]
    fn test_long_name_is_cut() {
        let config = HciConfig {
            device_name: "A very long device name".to_string(),
            ..Default::default()
        };
        let data = scan_response_data(&config);
        assert_eq!(data.len(), MAX_AD_LEN);
        assert_eq!(local_name(&data).as_deref(), Some("A very l"));
    }

    #[test]
    fn test_service_match() {
        let reader = advertising_data(&READER_SERVICE);
        assert!(advertises_service(&reader, &READER_SERVICE));
        assert!(!advertises_service(&reader, &CREDENTIAL_SERVICE));

        // Truncated structure is ignored
        assert!(!advertises_service(&reader[..10], &READER_SERVICE));
        assert_eq!(ad_structures(&hex!("00 0201")).count(), 0);
    }
}
