/// Whether a message arrived over the air or was read back from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsState {
    /// Delivered by the network while the service was watching.
    Received,

    /// Found in modem memory during a storage scan.
    Stored,
}

/// Concatenation header of a multipart protocol fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcatInfo {
    /// Reference number shared by every part of one logical message.
    pub reference: u16,

    /// This part's position, 1-based.
    pub sequence: u8,

    /// Declared number of parts in the logical message.
    pub total: u8,
}

/// One protocol-level fragment delivered by the device.
#[derive(Debug, Clone)]
pub struct SmsPart {
    /// Slot the fragment occupies in modem storage.
    pub storage_index: u32,

    /// Raw fragment payload.
    pub payload: Vec<u8>,

    /// Concatenation header, present when the fragment belongs to a
    /// multipart message.
    pub concat: Option<ConcatInfo>,
}

impl SmsPart {
    /// A single-part fragment.
    pub fn single(storage_index: u32, payload: Vec<u8>) -> Self {
        Self {
            storage_index,
            payload,
            concat: None,
        }
    }

    /// A fragment belonging to a multipart message.
    pub fn multipart(
        storage_index: u32,
        payload: Vec<u8>,
        reference: u16,
        sequence: u8,
        total: u8,
    ) -> Self {
        Self {
            storage_index,
            payload,
            concat: Some(ConcatInfo {
                reference,
                sequence,
                total,
            }),
        }
    }
}
