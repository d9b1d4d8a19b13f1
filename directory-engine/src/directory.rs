use std::sync::Arc;

use directory_client::{Client, EventLoop};
use directory_store::DynStore;
use log::{debug, error};
use tokio::{sync::mpsc, task};

use crate::{
    config::DirectoryConfig,
    dispatcher::Dispatcher,
    eventloop::{DirectoryClient, DirectoryEvent, DirectoryEventLoop},
    model::Model,
};

/// The directory: an event loop feeding a single ordered message queue.
pub struct Directory {
    eventloop: DirectoryEventLoop,
    dispatcher: Dispatcher,
}

impl Directory {
    pub fn new<E, C>(
        config: DirectoryConfig,
        store: Arc<DynStore>,
        eventloop: E,
        client: C,
    ) -> (Self, DirectoryClient)
    where
        E: EventLoop + Send + 'static,
        C: Client + Send + Sync + 'static,
    {
        let (eventloop, client) =
            DirectoryEventLoop::new(config.publishing_identity().cloned(), eventloop, client);
        let dispatcher = Dispatcher::new(&config, Model::new(store), client.clone());
        (
            Self {
                eventloop,
                dispatcher,
            },
            client,
        )
    }

    /// Run until [DirectoryClient::cancel] is called.
    ///
    /// Messages already queued are processed before this returns.
    pub async fn run(self) {
        let Self {
            mut eventloop,
            dispatcher,
        } = self;
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = task::spawn(dispatcher.run(rx));

        loop {
            match eventloop.poll().await {
                DirectoryEvent::Message(message) => {
                    if tx.send(message).is_err() {
                        error!("Dispatcher has stopped");
                        break;
                    }
                }
                DirectoryEvent::Cancelled => break,
                DirectoryEvent::Online | DirectoryEvent::Offline => (),
            }
        }

        drop(tx);
        if let Err(e) = worker.await {
            error!("Dispatcher task failed: {e}");
        }
        debug!("Directory stopped");
    }
}
