//! Class of Device decomposition and naming.
//!
//! The 3-byte Class of Device field is stored verbatim in the log and only
//! decomposed when rendered. Names follow the Bluetooth assigned numbers for
//! the baseband, the same table `hciconfig` prints.

use std::borrow::Cow;

/// The raw 3-byte Class of Device field, in HCI wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceClass(pub [u8; 3]);

impl DeviceClass {
    pub const LEN: usize = 3;

    /// Minor device class (bits 2-7 of the first byte).
    pub fn minor(&self) -> u8 {
        self.0[0] >> 2
    }

    /// Major device class (bits 0-4 of the second byte).
    pub fn major(&self) -> u8 {
        self.0[1] & 0x1f
    }

    /// Major service class bits (the third byte).
    pub fn services(&self) -> u8 {
        self.0[2]
    }

    /// Descriptive names for the major and minor class, or `None` when the
    /// major class is not one we know.
    pub fn names(&self) -> Option<(&'static str, Cow<'static, str>)> {
        class_name(self.major(), self.minor())
    }
}

impl From<[u8; 3]> for DeviceClass {
    fn from(bytes: [u8; 3]) -> Self {
        Self(bytes)
    }
}

const UNKNOWN_MINOR: &str = "Unknown (reserved) minor device class";

/// How the minor class is named within one major class.
enum MinorNames {
    /// The major class has no minor breakdown.
    Empty,
    /// Explicit minor code to name mapping; unlisted codes are reserved.
    Listed(&'static [(u8, &'static str)]),
    /// LAN access points report utilization in the upper three bits.
    Utilization(&'static [&'static str; 8]),
    /// Peripherals combine a keyboard/pointer kind with a device type.
    Peripheral,
    /// Imaging devices set one bit per capability; the lowest one wins.
    Capabilities(&'static [(u8, &'static str)]),
}

struct MajorClass {
    code: u8,
    name: &'static str,
    minors: MinorNames,
}

static MAJOR_CLASSES: &[MajorClass] = &[
    MajorClass {
        code: 0,
        name: "Miscellaneous",
        minors: MinorNames::Empty,
    },
    MajorClass {
        code: 1,
        name: "Computer",
        minors: MinorNames::Listed(&[
            (0, "Uncategorized"),
            (1, "Desktop workstation"),
            (2, "Server"),
            (3, "Laptop"),
            (4, "Handheld"),
            (5, "Palm"),
            (6, "Wearable"),
        ]),
    },
    MajorClass {
        code: 2,
        name: "Phone",
        minors: MinorNames::Listed(&[
            (0, "Uncategorized"),
            (1, "Cellular"),
            (2, "Cordless"),
            (3, "Smart phone"),
            (4, "Wired modem or voice gateway"),
            (5, "Common ISDN Access"),
            (6, "Sim Card Reader"),
        ]),
    },
    MajorClass {
        code: 3,
        name: "LAN Access",
        minors: MinorNames::Utilization(&[
            "Fully available",
            "1-17% utilized",
            "17-33% utilized",
            "33-50% utilized",
            "50-67% utilized",
            "67-83% utilized",
            "83-99% utilized",
            "No service available",
        ]),
    },
    MajorClass {
        code: 4,
        name: "Audio/Video",
        minors: MinorNames::Listed(&[
            (0, "Uncategorized"),
            (1, "Device conforms to the Headset profile"),
            (2, "Hands-free"),
            (4, "Microphone"),
            (5, "Loudspeaker"),
            (6, "Headphones"),
            (7, "Portable Audio"),
            (8, "Car Audio"),
            (9, "Set-top box"),
            (10, "HiFi Audio Device"),
            (11, "VCR"),
            (12, "Video Camera"),
            (13, "Camcorder"),
            (14, "Video Monitor"),
            (15, "Video Display and Loudspeaker"),
            (16, "Video Conferencing"),
            (18, "Gaming/Toy"),
        ]),
    },
    MajorClass {
        code: 5,
        name: "Peripheral",
        minors: MinorNames::Peripheral,
    },
    MajorClass {
        code: 6,
        name: "Imaging",
        minors: MinorNames::Capabilities(&[
            (4, "Display"),
            (8, "Camera"),
            (16, "Scanner"),
            (32, "Printer"),
        ]),
    },
    MajorClass {
        code: 7,
        name: "Wearable",
        minors: MinorNames::Listed(&[
            (1, "Wrist Watch"),
            (2, "Pager"),
            (3, "Jacket"),
            (4, "Helmet"),
            (5, "Glasses"),
        ]),
    },
    MajorClass {
        code: 8,
        name: "Toy",
        minors: MinorNames::Listed(&[
            (1, "Robot"),
            (2, "Vehicle"),
            (3, "Doll / Action Figure"),
            (4, "Controller"),
            (5, "Game"),
        ]),
    },
    MajorClass {
        code: 31,
        name: "Uncategorized",
        minors: MinorNames::Empty,
    },
];

static PERIPHERAL_KINDS: [&str; 4] = [
    "",
    "Keyboard",
    "Pointing device",
    "Combo keyboard/pointing device",
];

static PERIPHERAL_TYPES: [&str; 7] = [
    "",
    "Joystick",
    "Gamepad",
    "Remote control",
    "Sensing device",
    "Digitizer tablet",
    "Card reader",
];

fn peripheral_name(minor: u8) -> Cow<'static, str> {
    let kind = PERIPHERAL_KINDS[usize::from((minor >> 4) & 0x03)];
    let kind_type = PERIPHERAL_TYPES
        .get(usize::from(minor & 0x0f))
        .copied()
        .unwrap_or("(reserved)");

    match (kind.is_empty(), kind_type.is_empty()) {
        (true, true) => Cow::Borrowed(UNKNOWN_MINOR),
        (false, true) => Cow::Borrowed(kind),
        (true, false) => Cow::Borrowed(kind_type),
        (false, false) => Cow::Owned(format!("{kind}/{kind_type}")),
    }
}

impl MinorNames {
    fn name(&self, minor: u8) -> Cow<'static, str> {
        match self {
            MinorNames::Empty => Cow::Borrowed(""),
            MinorNames::Listed(names) => Cow::Borrowed(
                names
                    .iter()
                    .find(|(code, _)| *code == minor)
                    .map_or(UNKNOWN_MINOR, |(_, name)| *name),
            ),
            MinorNames::Utilization(levels) => {
                if minor == 0 {
                    Cow::Borrowed("Uncategorized")
                } else {
                    Cow::Borrowed(levels[usize::from((minor >> 3) & 0x07)])
                }
            }
            MinorNames::Peripheral => peripheral_name(minor),
            MinorNames::Capabilities(bits) => Cow::Borrowed(
                bits.iter()
                    .find(|(bit, _)| (minor & bit) != 0)
                    .map_or(UNKNOWN_MINOR, |(_, name)| *name),
            ),
        }
    }
}

/// Resolve a `(major, minor)` pair to descriptive names.
///
/// Returns `None` when the major class is unknown; callers render that as
/// empty fields.
pub fn class_name(major: u8, minor: u8) -> Option<(&'static str, Cow<'static, str>)> {
    let class = MAJOR_CLASSES.iter().find(|class| class.code == major)?;
    Some((class.name, class.minors.name(minor)))
}
