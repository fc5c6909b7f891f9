//! Protocol message payloads.
//!
//! Each payload is CBOR-encoded into the body of a frame whose tag byte
//! selects the payload type (see [`wire`](crate::wire)).

use serde::{Deserialize, Serialize};

/// Frame tag for [`SecInit`] (0x01).
pub const TAG_SEC_INIT: u8 = 0x01;
/// Frame tag for [`SecConf`] (0x02).
pub const TAG_SEC_CONF: u8 = 0x02;
/// Frame tag for [`RevInit`] (0x03).
pub const TAG_REV_INIT: u8 = 0x03;
/// Frame tag for [`RevShare`] (0x04).
pub const TAG_REV_SHARE: u8 = 0x04;

/// A dealer's deal for one DKG instance. Broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecInit {
    /// Roster index of the dealer.
    pub src_index: u32,
    /// SecretId of the DKG instance.
    pub sid: String,
    /// Canonical encoding of the deal.
    pub deal: Vec<u8>,
    /// Time-to-live of the secret, in milliseconds.
    pub duration_ms: u64,
}

/// Announces that the sender holds its share of the joint secret. Broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecConf {
    /// Roster index of the sender.
    pub src_index: u32,
    /// SecretId of the DKG instance.
    pub sid: String,
}

/// Asks every peer to reveal its share of an expired secret. Broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevInit {
    /// Roster index of the requester.
    pub src_index: u32,
    /// SecretId of the secret to reveal.
    pub sid: String,
}

/// A revealed share. Unicast to the originator of the `RevInit`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevShare {
    /// Roster index of the sender.
    pub src_index: u32,
    /// SecretId of the revealed secret.
    pub sid: String,
    /// Share index (evaluation point minus one).
    pub share_index: u32,
    /// Canonical encoding of the share scalar.
    pub share: [u8; 32],
}

/// Any protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Deal broadcast (0x01).
    SecInit(SecInit),
    /// Share confirmation (0x02).
    SecConf(SecConf),
    /// Reveal request (0x03).
    RevInit(RevInit),
    /// Revealed share (0x04).
    RevShare(RevShare),
}

impl Message {
    /// The frame tag for this message.
    pub fn tag(&self) -> u8 {
        match self {
            Self::SecInit(_) => TAG_SEC_INIT,
            Self::SecConf(_) => TAG_SEC_CONF,
            Self::RevInit(_) => TAG_REV_INIT,
            Self::RevShare(_) => TAG_REV_SHARE,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SecInit(_) => "SecInit",
            Self::SecConf(_) => "SecConf",
            Self::RevInit(_) => "RevInit",
            Self::RevShare(_) => "RevShare",
        }
    }

    /// Roster index the sender claims.
    pub fn src_index(&self) -> u32 {
        match self {
            Self::SecInit(m) => m.src_index,
            Self::SecConf(m) => m.src_index,
            Self::RevInit(m) => m.src_index,
            Self::RevShare(m) => m.src_index,
        }
    }

    /// SecretId the message refers to.
    pub fn sid(&self) -> &str {
        match self {
            Self::SecInit(m) => &m.sid,
            Self::SecConf(m) => &m.sid,
            Self::RevInit(m) => &m.sid,
            Self::RevShare(m) => &m.sid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_distinct() {
        let tags = [TAG_SEC_INIT, TAG_SEC_CONF, TAG_REV_INIT, TAG_REV_SHARE];
        for (i, a) in tags.iter().enumerate() {
            for b in &tags[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_accessors() {
        let msg = Message::RevShare(RevShare {
            src_index: 4,
            sid: "TVSS_1_2".to_string(),
            share_index: 4,
            share: [9; 32],
        });
        assert_eq!(msg.tag(), TAG_REV_SHARE);
        assert_eq!(msg.kind(), "RevShare");
        assert_eq!(msg.src_index(), 4);
        assert_eq!(msg.sid(), "TVSS_1_2");
    }
}
