// ===== Types and Structures =====

use core::fmt;

/// Which data-path error bit the controller raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    Crc7,
    Crc16,
    Fifo,
    ReadWriteTimeout,
}

/// Card identification stages, in order. [`SdHost::ident_stage`] reports the
/// one in progress (or failed); `Ready` once the card is usable.
///
/// [`SdHost::ident_stage`]: crate::SdHost::ident_stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IdentStage {
    Reset,
    VoltageQuery,
    CardArrival,
    Identify,
    ReadCid,
    ReadCsd,
    ParseCsd,
    SelectCard,
    FixBlockLength,
    Flush,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    CommandTimeout,
    Transfer(TransferErrorKind),
    UnknownCommandError,
    IdentificationFailure(IdentStage),
    CardNotReady,
    CardStatus(u32),
    Busy,
    InvalidArgument,
}

impl fmt::Display for TransferErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferErrorKind::Crc7 => write!(f, "CRC7"),
            TransferErrorKind::Crc16 => write!(f, "CRC16"),
            TransferErrorKind::Fifo => write!(f, "FIFO"),
            TransferErrorKind::ReadWriteTimeout => write!(f, "read/write timeout"),
        }
    }
}

impl fmt::Display for IdentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdentStage::Reset => "reset",
            IdentStage::VoltageQuery => "voltage query",
            IdentStage::CardArrival => "card arrival",
            IdentStage::Identify => "identify",
            IdentStage::ReadCid => "read CID",
            IdentStage::ReadCsd => "read CSD",
            IdentStage::ParseCsd => "parse CSD",
            IdentStage::SelectCard => "select card",
            IdentStage::FixBlockLength => "set block length",
            IdentStage::Flush => "flush",
            IdentStage::Ready => "ready",
        };
        f.write_str(name)
    }
}

impl fmt::Display for SdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdError::CommandTimeout => write!(f, "Command timeout error"),
            SdError::Transfer(kind) => write!(f, "Transfer error ({})", kind),
            SdError::UnknownCommandError => write!(f, "Command failed with no status bit set"),
            SdError::IdentificationFailure(stage) => {
                write!(f, "Card identification failed at stage: {}", stage)
            }
            SdError::CardNotReady => write!(f, "Card not ready"),
            SdError::CardStatus(status) => write!(f, "Card status error: 0x{:08X}", status),
            SdError::Busy => write!(f, "Controller busy"),
            SdError::InvalidArgument => write!(f, "Invalid argument"),
        }
    }
}
