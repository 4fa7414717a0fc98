//! Enumerations the control plane encodes as small integer codes.
//!
//! Every enum here decodes from either its wire name or its code by exact
//! value. Two policies exist:
//!
//! - **Strict** ([`CodedEnum::decode`]): a value outside the declared set is
//!   [`EnvelopeError::UnknownVariant`]. Used for anything fed back into a
//!   write, such as [`DiskBusType`].
//! - **Lossy** ([`WithUnknown::decode_lossy`]): a value outside the declared
//!   set becomes the `UNKNOWN` sentinel. Used only for read-side fields whose
//!   consumers already display `"UNKNOWN"`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::envelope::{Discriminator, EnvelopeError};

/// An enumeration with a closed set of named, integer-coded variants.
pub trait CodedEnum: Sized + Copy + 'static {
    /// Name used in decode errors.
    const NAME: &'static str;

    /// Every declared variant.
    const VARIANTS: &'static [Self];

    /// Wire code.
    fn code(&self) -> i64;

    /// Wire name.
    fn as_str(&self) -> &'static str;

    /// Resolves a code by exact value.
    fn from_code(code: i64) -> Option<Self> {
        Self::VARIANTS.iter().copied().find(|v| v.code() == code)
    }

    /// Resolves a wire name.
    fn from_name(name: &str) -> Option<Self> {
        Self::VARIANTS.iter().copied().find(|v| v.as_str() == name)
    }

    /// Resolves a discriminator, failing closed.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::UnknownVariant`] for a value outside the declared set.
    fn decode(discriminator: &Discriminator) -> Result<Self, EnvelopeError> {
        let found = match discriminator {
            Discriminator::Code(code) => Self::from_code(*code),
            Discriminator::Name(name) => Self::from_name(name),
        };
        found.ok_or_else(|| EnvelopeError::UnknownVariant {
            union: Self::NAME,
            discriminator: discriminator.clone(),
        })
    }
}

/// A [`CodedEnum`] with an explicit forward-compatibility bucket.
pub trait WithUnknown: CodedEnum {
    /// The sentinel unrecognized values map to.
    const UNKNOWN: Self;

    /// Resolves a discriminator, mapping unrecognized values to
    /// [`UNKNOWN`](Self::UNKNOWN).
    fn decode_lossy(discriminator: &Discriminator) -> Self {
        Self::decode(discriminator).unwrap_or_else(|_| {
            tracing::debug!(
                union = Self::NAME,
                value = %discriminator,
                "unrecognized value mapped to UNKNOWN"
            );
            Self::UNKNOWN
        })
    }
}

macro_rules! coded_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = ($code:literal, $wire:literal), )+
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl CodedEnum for $name {
            const NAME: &'static str = stringify!($name);
            const VARIANTS: &'static [Self] = &[ $( Self::$variant, )+ ];

            fn code(&self) -> i64 {
                match self {
                    $( Self::$variant => $code, )+
                }
            }

            fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $wire, )+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<$name> for Discriminator {
            fn from(value: $name) -> Self {
                Discriminator::from(value.as_str())
            }
        }
    };
}

coded_enum! {
    /// Bus a virtual disk is attached to.
    ///
    /// # Examples
    ///
    /// ```
    /// use prism_tasks::types::enums::{CodedEnum, DiskBusType};
    /// use prism_tasks::types::envelope::Discriminator;
    ///
    /// assert_eq!(DiskBusType::decode(&Discriminator::Code(5)).unwrap(), DiskBusType::Sata);
    /// assert!(DiskBusType::decode(&Discriminator::Code(9)).is_err());
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(try_from = "Discriminator", into = "Discriminator")]
    pub enum DiskBusType {
        /// SCSI controller.
        Scsi = (2, "SCSI"),
        /// IDE controller.
        Ide = (3, "IDE"),
        /// PCI passthrough.
        Pci = (4, "PCI"),
        /// SATA controller.
        Sata = (5, "SATA"),
        /// sPAPR virtual SCSI.
        Spapr = (6, "SPAPR"),
    }
}

impl TryFrom<Discriminator> for DiskBusType {
    type Error = EnvelopeError;

    fn try_from(discriminator: Discriminator) -> Result<Self, Self::Error> {
        Self::decode(&discriminator)
    }
}

coded_enum! {
    /// Consistency level of a scheduled recovery point.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(from = "Discriminator", into = "Discriminator")]
    pub enum RecoveryPointType {
        /// Unrecognized value.
        Unknown = (0, "UNKNOWN"),
        /// Crash consistent.
        CrashConsistent = (2, "CRASH_CONSISTENT"),
        /// Application consistent.
        ApplicationConsistent = (3, "APPLICATION_CONSISTENT"),
    }
}

coded_enum! {
    /// Backup type of a recovery point.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(from = "Discriminator", into = "Discriminator")]
    pub enum BackupType {
        /// Unrecognized value.
        Unknown = (0, "UNKNOWN"),
        /// Full backup.
        FullBackup = (2, "FULL_BACKUP"),
        /// Incremental backup.
        IncrementalBackup = (3, "INCREMENTAL_BACKUP"),
    }
}

coded_enum! {
    /// Lifecycle status of a recovery point.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(from = "Discriminator", into = "Discriminator")]
    pub enum RecoveryPointStatus {
        /// Unrecognized value.
        Unknown = (0, "UNKNOWN"),
        /// Fully created.
        Complete = (2, "COMPLETE"),
    }
}

coded_enum! {
    /// Unit of an auto-rollup retention interval.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(from = "Discriminator", into = "Discriminator")]
    pub enum SnapshotIntervalType {
        /// Unrecognized value.
        Unknown = (0, "UNKNOWN"),
        /// Hours.
        Hourly = (2, "HOURLY"),
        /// Days.
        Daily = (3, "DAILY"),
        /// Weeks.
        Weekly = (4, "WEEKLY"),
        /// Months.
        Monthly = (5, "MONTHLY"),
        /// Years.
        Yearly = (6, "YEARLY"),
    }
}

macro_rules! lossy_from_discriminator {
    ($($name:ident),+ $(,)?) => {
        $(
            impl WithUnknown for $name {
                const UNKNOWN: Self = Self::Unknown;
            }

            impl From<Discriminator> for $name {
                fn from(discriminator: Discriminator) -> Self {
                    Self::decode_lossy(&discriminator)
                }
            }
        )+
    };
}

lossy_from_discriminator!(RecoveryPointType, BackupType, RecoveryPointStatus, SnapshotIntervalType);
