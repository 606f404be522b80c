//! Hardware signer: device transport, APDU codec and the session state
//! machine that serializes access to the device.

pub mod address_cache;
pub mod apdu;
pub mod derivation_path;
pub mod session;
pub mod speculos;
pub mod transport;

pub use address_cache::{AddressCache, CachedAccount};
pub use derivation_path::DerivationPath;
pub use session::{SessionState, SessionTimeouts, SignerSession};
pub use speculos::TcpConnector;
pub use transport::{DeviceConnector, DeviceTransport, RawSignature, TransportError};

/// Account path used when none is configured
pub const DEFAULT_DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";
