//! Consumption loop.
//!
//! Deliveries are received one at a time, acknowledged on receipt and handed
//! to their own task. Acknowledgement does not wait for processing, so a crash
//! mid-command loses that command. A slow action, notably a Listen Workflow
//! wait, never holds up the deliveries behind it.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bus::{random_queue_name, Binding, BusError, SharedMessageBus, Subscription};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::rackhd::{RackHdClient, RackHdError};

const SERVICE_QUEUE_PREFIX: &str = "rackhd-service";

pub struct Server {
    bus: SharedMessageBus,
    dispatcher: Arc<Dispatcher>,
    binding: Binding,
    limiter: Option<Arc<Semaphore>>,
}

impl Server {
    pub fn new(bus: SharedMessageBus, config: &Config) -> Result<Self, RackHdError> {
        let rackhd = RackHdClient::new(&config.rackhd_address, &config.injectable_workflow)?;
        let dispatcher = Dispatcher::new(Arc::clone(&bus), rackhd, config);
        Ok(Self {
            bus,
            dispatcher: Arc::new(dispatcher),
            binding: Binding::new(
                config.exchange.clone(),
                config.exchange_type.clone(),
                config.binding_key.clone(),
            ),
            limiter: config
                .max_in_flight
                .map(|permits| Arc::new(Semaphore::new(permits))),
        })
    }

    /// Subscribe to the service exchange and spawn the consumption loop.
    ///
    /// The returned handle completes when the subscription ends.
    pub async fn start(&self) -> Result<JoinHandle<()>, BusError> {
        let queue = random_queue_name(SERVICE_QUEUE_PREFIX);
        let subscription = self.bus.listen(&self.binding, &queue, "").await?;
        info!(
            exchange = %self.binding.exchange,
            binding_key = %self.binding.routing_key,
            queue = %queue,
            "RackHD service listening"
        );

        Ok(tokio::spawn(run_loop(
            subscription,
            Arc::clone(&self.dispatcher),
            self.limiter.clone(),
        )))
    }
}

async fn run_loop(
    mut subscription: Subscription,
    dispatcher: Arc<Dispatcher>,
    limiter: Option<Arc<Semaphore>>,
) {
    while let Some(delivery) = subscription.next().await {
        info!(
            bytes = delivery.body.len(),
            exchange = %delivery.exchange,
            delivery_tag = delivery.delivery_tag,
            "got delivery"
        );
        if let Err(e) = delivery.ack().await {
            warn!(delivery_tag = delivery.delivery_tag, error = %e, "failed to acknowledge delivery");
        }

        let permit = match &limiter {
            Some(limiter) => match Arc::clone(limiter).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    error!("in-flight limiter closed; stopping consumption");
                    break;
                }
            },
            None => None,
        };

        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = dispatcher.process_message(&delivery).await {
                error!(
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "failed to process delivery"
                );
            }
        });
    }

    info!(queue = %subscription.queue(), "RackHD service subscription ended");
}
