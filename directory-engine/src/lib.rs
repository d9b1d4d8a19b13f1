//! Part of the Sparkplug directory.
//!
//! This library ingests the whole Sparkplug namespace and maintains the directory model in a
//! [directory_store::Store]: device sessions from BIRTH and DEATH, alerts and links declared in
//! BIRTH payloads, alert state from DATA and advertised service providers. Addresses sending
//! DATA without a BIRTH are asked to rebirth.
//!
//! A [Directory] is created from a transport [EventLoop](directory_client::EventLoop) and
//! [Client](directory_client::Client) pair and processes messages strictly in arrival order.
//! A [ChangeNotifier] publishes `Last_Changed` metrics from the store's change notifications.

mod config;
mod directory;
mod dispatcher;
mod error;
mod eventloop;
mod extract;
mod model;
mod notify;
mod rebirth;

pub use config::*;
pub use directory::Directory;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use eventloop::{command_request, Change, DirectoryClient, DirectoryEvent, DirectoryEventLoop};
pub use extract::{
    datetime, find_alerts, find_links, find_service, AlertIndex, AlertUpdate, Birth, DeviceRef,
    FoundAlert, FoundLink, ServiceAdvert,
};
pub use model::Model;
pub use notify::ChangeNotifier;
pub use rebirth::RebirthDebouncer;
