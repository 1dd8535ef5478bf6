use std::fmt;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    AuthFailed(String),
    NotAuthenticated,
    UnexpectedStatus(u16),
    GatewayOffline,
    Decode(String),
    TemperatureOutOfRange { requested: f64, min: f64, max: f64 },
    UnsupportedFanSpeed(String),
    UnsupportedVanePosition(String),
    UnknownPreset(String),
    NoDevices,
    DeviceOrphaned(u32),
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::AuthFailed(msg) => write!(f, "authentication failed: {msg}"),
            Error::NotAuthenticated => write!(f, "not authenticated (no login cookie)"),
            Error::UnexpectedStatus(code) => write!(f, "unexpected status code: {code}"),
            Error::GatewayOffline => write!(
                f,
                "unit is not communicating with the MELView server (COMM fault); \
                 check the Wi-Fi adapter's network connection"
            ),
            Error::Decode(msg) => write!(f, "decode error: {msg}"),
            Error::TemperatureOutOfRange { requested, min, max } => {
                write!(
                    f,
                    "temperature {requested:.1} outside allowed range {min:.1}..{max:.1}"
                )
            }
            Error::UnsupportedFanSpeed(label) => write!(f, "unsupported fan speed: {label}"),
            Error::UnsupportedVanePosition(label) => {
                write!(f, "unsupported vane position: {label}")
            }
            Error::UnknownPreset(label) => write!(f, "unknown Lossnay preset: {label}"),
            Error::NoDevices => write!(f, "account has no devices"),
            Error::DeviceOrphaned(id) => {
                write!(f, "device {id} no longer present in the account")
            }
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
