pub mod commands;
pub mod device;
pub mod discovery;
pub mod events;
pub mod identity;
pub mod printer;
pub mod status;
pub mod topics;
pub mod transport;

pub use commands::{Axis, Command, CommandError, ControlKind, JogRequest};
pub use device::DeviceDescriptor;
pub use discovery::{CatalogContext, DiscoveryDocument, DiscoveryPayload};
pub use events::PrinterEvent;
pub use identity::NodeIdentity;
pub use printer::{ConnectionState, PrinterControl, PrinterError};
pub use topics::{TopicResolver, TopicTemplate};
pub use transport::{PublishOptions, Publisher, Subscriber, TimestampedPublisher, TransportError};
