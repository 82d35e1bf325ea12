//! Reactive state containers fed by local actions and server pushes.

pub mod address;
pub mod cart;
pub mod notifications;

pub use address::{AddressState, AddressStore};
pub use cart::{CartEmitter, CartLineItem, CartState, CartStore};
pub use notifications::{
    IngestOutcome, NotificationChannel, NotificationEvent, NotificationSnapshot, NotificationState,
};
