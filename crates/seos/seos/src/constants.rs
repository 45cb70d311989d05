//! Constants used in SEOS operations
//!
//! This module contains the application identifiers, command headers and data
//! object tags exchanged between a SEOS reader and a SEOS credential.

use seos_apdu_core::Header;

/// Command classes
pub mod cla {
    /// ISO7816 command class
    pub const ISO7816: u8 = 0x00;
    /// Proprietary command class
    pub const PROPRIETARY: u8 = 0x80;
    /// Secure messaging command class
    pub const SECURE_MESSAGING: u8 = 0x0C;
}

/// Instruction codes
pub mod ins {
    /// SELECT command
    pub const SELECT: u8 = 0xA4;
    /// SELECT ADF command
    pub const SELECT_ADF: u8 = 0xA5;
    /// GENERAL AUTHENTICATE command
    pub const GENERAL_AUTHENTICATE: u8 = 0x87;
    /// GET DATA command (odd instruction, BER-TLV data field)
    pub const GET_DATA: u8 = 0xCB;
}

/// Application identifiers
pub mod aid {
    /// The SEOS applet
    pub const SEOS: [u8; 10] = [0xA0, 0x00, 0x00, 0x04, 0x40, 0x00, 0x01, 0x01, 0x00, 0x01];
    /// Mobile SEOS administration applet
    pub const MOBILE_SEOS_ADMIN: [u8; 10] =
        [0xA0, 0x00, 0x00, 0x03, 0x82, 0x00, 0x2D, 0x00, 0x01, 0x01];
    /// Operation selector applet
    pub const OPERATION_SELECTOR: [u8; 10] =
        [0xA0, 0x00, 0x00, 0x03, 0x82, 0x00, 0x2F, 0x00, 0x01, 0x01];
    /// Operation selector applet, as selected after a reset
    pub const OPERATION_SELECTOR_POST_RESET: [u8; 10] =
        [0xA0, 0x00, 0x00, 0x03, 0x82, 0x00, 0x31, 0x00, 0x01, 0x01];
}

/// Command headers
pub mod header {
    use super::*;

    /// SELECT by DF name
    pub const SELECT: Header = Header::new(cla::ISO7816, ins::SELECT, 0x04, 0x00);
    /// SELECT ADF by object identifier list
    pub const SELECT_ADF: Header = Header::new(cla::PROPRIETARY, ins::SELECT_ADF, 0x04, 0x00);
    /// GET DATA under secure messaging
    pub const SECURE_GET_DATA: Header =
        Header::new(cla::SECURE_MESSAGING, ins::GET_DATA, 0x3F, 0xFF);

    /// GENERAL AUTHENTICATE against the given key index
    pub const fn general_authenticate(key_index: u8) -> Header {
        Header::new(cla::ISO7816, ins::GENERAL_AUTHENTICATE, 0x00, key_index)
    }
}

/// BER-TLV tags
pub mod tags {
    /// File Control Information template
    pub const FCI_TEMPLATE: u8 = 0x6F;
    /// DF name inside the FCI
    pub const DF_NAME: u8 = 0x84;
    /// Dynamic authentication data template
    pub const DYNAMIC_AUTH: u8 = 0x7C;
    /// Challenge (inside the dynamic authentication template)
    pub const CHALLENGE: u8 = 0x81;
    /// Authentication cryptogram (inside the dynamic authentication template)
    pub const RESPONSE: u8 = 0x82;
    /// Algorithm identifiers heading the ADF response
    pub const ADF_ALGORITHMS: u8 = 0xCD;
    /// Object identifier
    pub const OID: u8 = 0x06;
    /// Diversifier
    pub const DIVERSIFIER: u8 = 0xCF;
    /// Cryptogram, also the encrypted data object under secure messaging
    pub const CRYPTOGRAM: u8 = 0x85;
    /// Expected length under secure messaging
    pub const EXPECTED_LENGTH: u8 = 0x97;
    /// Processing status under secure messaging
    pub const PROCESSING_STATUS: u8 = 0x99;
    /// Cryptographic checksum
    pub const MAC: u8 = 0x8E;
    /// Tag list
    pub const TAG_LIST: u8 = 0x5C;
}

/// Body of the first General Authenticate step: ask for the card challenge
pub const GENERAL_AUTHENTICATE_1_DATA: [u8; 4] = [tags::DYNAMIC_AUTH, 0x02, tags::CHALLENGE, 0x00];

/// Secure messaging cleartext requesting the SIO file
pub const REQUEST_SIO: [u8; 4] = [tags::TAG_LIST, 0x02, 0xFF, 0x00];

/// Answer to the operation selector when inspecting a reader
pub const INSPECTION_TEMPLATE: [u8; 10] = [0x6F, 0x08, 0x85, 0x06, 0x02, 0x01, 0x40, 0x02, 0x01, 0x00];

/// Key index used by readers that do not pick one
pub const DEFAULT_KEY_INDEX: u8 = 0x01;
