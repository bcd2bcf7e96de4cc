use amqprs::{
    callbacks::{DefaultChannelCallback, DefaultConnectionCallback},
    channel::{BasicAckArguments, BasicConsumeArguments, BasicNackArguments, BasicPublishArguments, Channel, QueueDeclareArguments},
    connection::{Connection, OpenConnectionArguments},
    consumer::AsyncConsumer,
    BasicProperties,
    Deliver,
    FieldTable,
    FieldValue,
};
use chrono::{Local, NaiveDateTime};
use diesel::{
    prelude::*,
    r2d2::{ConnectionManager, Pool},
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::actions;
use crate::config::AmqpConfig;
use crate::models::{LifecycleEvent, Reservation};

type DbPool = Pool<ConnectionManager<PgConnection>>;
type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

const DELAY_QUEUE_PREFIX: &str = "reservation.lifecycle.delay";
const TRANSITION_QUEUE: &str = "reservation.lifecycle";

// Delay queues hold 1s, 2s, 4s ... 2^21s (about 24 days). Each queue has a
// single x-message-ttl, so its messages expire in publish order.
const MAX_DELAY_EXPONENT: u32 = 21;

/// Published when a reservation is saved; delivered when `due_at` arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleTimerMessage {
    pub reservation_id: i32,
    pub event: LifecycleEvent,
    pub due_at: NaiveDateTime,
}

/// Start and end timers still ahead of `now` for a reservation whose status
/// needs them. Times that have already passed get no timer.
pub fn timers_for(reservation: &Reservation, now: NaiveDateTime) -> Vec<LifecycleTimerMessage> {
    if reservation.is_deleted || !reservation.status.is_scheduled() {
        return Vec::new();
    }
    [
        (LifecycleEvent::Start, reservation.start_time),
        (LifecycleEvent::End, reservation.end_time),
    ]
    .into_iter()
    .filter(|(_, due_at)| ttl_millis(*due_at, now).is_some())
    .map(|(event, due_at)| LifecycleTimerMessage {
        reservation_id: reservation.reservation_id,
        event,
        due_at,
    })
    .collect()
}

/// Milliseconds until `due_at`, or `None` when it has already passed.
pub fn ttl_millis(due_at: NaiveDateTime, now: NaiveDateTime) -> Option<i64> {
    let delay = due_at.signed_duration_since(now).num_milliseconds();
    (delay > 0).then_some(delay)
}

/// Seconds of the longest delay queue that does not overshoot `remaining_ms`,
/// or `None` once the timer is due within a second.
pub fn delay_bucket(remaining_ms: i64) -> Option<u32> {
    (0..=MAX_DELAY_EXPONENT)
        .rev()
        .map(|exp| 1u32 << exp)
        .find(|secs| i64::from(*secs) * 1000 <= remaining_ms)
}

fn delay_queue_name(secs: u32) -> String {
    format!("{}.{}s", DELAY_QUEUE_PREFIX, secs)
}

/// Queue a timer goes to next: a delay queue while it is a second or more
/// away, the transition queue once it is due.
fn next_hop(timer: &LifecycleTimerMessage, now: NaiveDateTime) -> Option<String> {
    ttl_millis(timer.due_at, now)
        .and_then(delay_bucket)
        .map(delay_queue_name)
}

/// How a due timer's delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Ack,
    Requeue,
}

/// Acks only when the transition task ran and reached the database.
fn settlement_for<T, E>(outcome: &std::result::Result<Result<T>, E>) -> Settlement {
    match outcome {
        Ok(Ok(_)) => Settlement::Ack,
        Ok(Err(_)) | Err(_) => Settlement::Requeue,
    }
}

async fn publish_timer(channel: &Channel, timer: &LifecycleTimerMessage, queue: &str) -> Result<()> {
    let content = serde_json::to_vec(timer)?;
    let properties = BasicProperties::default()
        .with_delivery_mode(2) // persistent
        .finish();
    channel
        .basic_publish(properties, content, BasicPublishArguments::new("", queue))
        .await?;
    Ok(())
}

// Consumer for handling due lifecycle timers
struct LifecycleTransitionConsumer {
    db_pool: DbPool,
}

#[async_trait::async_trait]
impl AsyncConsumer for LifecycleTransitionConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let result = self.handle_timer(channel, deliver, content).await;
        if let Err(e) = result {
            error!("❌ Failed to process lifecycle timer: {:?}", e);
        }
    }
}

impl LifecycleTransitionConsumer {
    async fn handle_timer(&mut self, channel: &Channel, deliver: Deliver, content: Vec<u8>) -> Result<()> {
        let message = match serde_json::from_slice::<LifecycleTimerMessage>(&content) {
            Ok(message) => message,
            Err(e) => {
                error!("❌ Error deserializing lifecycle timer message: {:?}", e);
                // Reject without requeue - malformed message
                if let Err(e) = channel.basic_nack(BasicNackArguments::new(deliver.delivery_tag(), false, false)).await {
                    error!("Error rejecting message: {:?}", e);
                }
                return Err(e.into());
            }
        };

        // Still early: pass it on to the next shorter delay queue
        if let Some(queue) = next_hop(&message, Local::now().naive_local()) {
            if let Err(e) = publish_timer(channel, &message, &queue).await {
                error!("❌ Error forwarding lifecycle timer: {:?}", e);
                if let Err(e) = channel.basic_nack(BasicNackArguments::new(deliver.delivery_tag(), false, true)).await {
                    error!("Error rejecting message: {:?}", e);
                }
                return Err(e);
            }
            if let Err(e) = channel.basic_ack(BasicAckArguments::new(deliver.delivery_tag(), false)).await {
                error!("Error acknowledging message: {:?}", e);
            }
            return Ok(());
        }

        info!("⏰ {:?} timer due for reservation {}", message.event, message.reservation_id);

        let pool = self.db_pool.clone();
        let (reservation_id, event, due_at) = (message.reservation_id, message.event, message.due_at);
        let outcome = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            actions::apply_lifecycle_event(&mut conn, reservation_id, event, due_at)
        })
        .await;

        if settlement_for(&outcome) == Settlement::Requeue {
            // Reject and requeue for retry
            if let Err(e) = channel.basic_nack(BasicNackArguments::new(deliver.delivery_tag(), false, true)).await {
                error!("Error rejecting message: {:?}", e);
            }
        }

        match outcome {
            Ok(Ok(Some(status))) => {
                info!("✅ Reservation {} is now {}", reservation_id, status);
            }
            Ok(Ok(None)) => {
                info!("ℹ️ Timer for reservation {} no longer applies, dropping it", reservation_id);
            }
            Ok(Err(e)) => {
                error!("❌ Error applying lifecycle timer: {:?}", e);
                return Err(e);
            }
            Err(e) => {
                error!("❌ Lifecycle transition task failed: {:?}", e);
                return Err(e.into());
            }
        }

        if let Err(e) = channel.basic_ack(BasicAckArguments::new(deliver.delivery_tag(), false)).await {
            error!("Error acknowledging message: {:?}", e);
        }
        Ok(())
    }
}

/// Schedules reservation start/end transitions through fixed-TTL delay
/// queues that dead-letter into the transition queue.
#[derive(Clone)]
pub struct LifecycleTimerService {
    db_pool: DbPool,
    amqp: AmqpConfig,
    connection: Option<Arc<Connection>>,
    transition_queue: String,
}

impl LifecycleTimerService {
    pub fn new(db_pool: DbPool, amqp: AmqpConfig) -> Self {
        Self {
            db_pool,
            amqp,
            connection: None,
            transition_queue: TRANSITION_QUEUE.to_string(),
        }
    }

    pub async fn initialize(&mut self) -> Result<()> {
        info!("Connecting to RabbitMQ at {}:{}...", self.amqp.host, self.amqp.port);

        let connection = Connection::open(&OpenConnectionArguments::new(
            &self.amqp.host,
            self.amqp.port,
            &self.amqp.user,
            &self.amqp.password,
        ))
        .await?;

        connection
            .register_callback(DefaultConnectionCallback)
            .await?;

        let setup_channel = connection.open_channel(None).await?;
        setup_channel
            .register_callback(DefaultChannelCallback)
            .await?;

        self.declare_queues(&setup_channel).await?;

        self.connection = Some(Arc::new(connection));

        let _ = setup_channel.close().await;

        info!("Connected to RabbitMQ and declared lifecycle queues");

        Ok(())
    }

    // Idempotent, so every publishing channel can call it
    async fn declare_queues(&self, channel: &Channel) -> Result<()> {
        channel
            .queue_declare(
                QueueDeclareArguments::new(&self.transition_queue)
                    .durable(true)
                    .finish(),
            )
            .await?;

        for exp in 0..=MAX_DELAY_EXPONENT {
            let secs = 1u32 << exp;

            let mut args = FieldTable::new();
            args.insert(
                "x-message-ttl".try_into()?,
                // 2^21 * 1000 still fits in an i32
                FieldValue::I(i32::try_from(u64::from(secs) * 1000)?),
            );
            args.insert(
                "x-dead-letter-exchange".try_into()?,
                "".into() // Route to default exchange
            );
            args.insert(
                "x-dead-letter-routing-key".try_into()?,
                self.transition_queue.clone().into()
            );

            channel
                .queue_declare(
                    QueueDeclareArguments::new(&delay_queue_name(secs))
                        .durable(true)
                        .arguments(args)
                        .finish(),
                )
                .await?;
        }

        Ok(())
    }

    async fn get_fresh_channel(&self) -> Result<Channel> {
        if let Some(connection) = &self.connection {
            let channel = connection.open_channel(None).await?;
            channel.register_callback(DefaultChannelCallback).await?;
            Ok(channel)
        } else {
            Err("RabbitMQ connection not initialized".into())
        }
    }

    // Queue operation with a short exponential backoff
    async fn safe_queue_operation<F, Fut>(&self, operation: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let max_retries = 2;
        let mut delay_ms = 25;

        for attempt in 1..=max_retries {
            match operation().await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < max_retries => {
                    warn!("Queue operation failed (attempt {}/{}), retrying: {:?}", attempt, max_retries, e);
                    tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    delay_ms *= 2;
                }
                Err(e) => {
                    error!("Queue operation failed after {} attempts, giving up: {:?}", max_retries, e);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Publishes the start and end timers of a newly booked reservation.
    pub async fn schedule_reservation(&self, reservation: &Reservation) -> Result<()> {
        let timers = timers_for(reservation, Local::now().naive_local());
        if timers.is_empty() {
            return Ok(());
        }

        let operation = || {
            let timers = timers.clone();
            async move {
                let channel = self.get_fresh_channel().await?;
                self.declare_queues(&channel).await?;

                let now = Local::now().naive_local();
                for timer in &timers {
                    let queue = next_hop(timer, now).unwrap_or_else(|| self.transition_queue.clone());
                    publish_timer(&channel, timer, &queue).await?;

                    info!(
                        "📅 Scheduled {:?} for reservation {} at {} via '{}'",
                        timer.event, timer.reservation_id, timer.due_at, queue
                    );
                }

                let _ = channel.close().await;
                Ok(())
            }
        };

        self.safe_queue_operation(operation).await
    }

    /// Starts the consumer that applies due transitions.
    pub async fn start_consuming_transitions(&self) -> Result<()> {
        let connection = match &self.connection {
            Some(connection) => connection,
            None => return Err("RabbitMQ connection not initialized".into()),
        };

        info!("🚀 Starting lifecycle consumer on queue: {}", self.transition_queue);

        let channel = connection.open_channel(None).await?;
        channel.register_callback(DefaultChannelCallback).await?;

        let consumer_tag = format!("lifecycle_consumer_{}", Uuid::new_v4());
        let args = BasicConsumeArguments::new(&self.transition_queue, &consumer_tag)
            .manual_ack(true)
            .finish();
        let consumer = LifecycleTransitionConsumer {
            db_pool: self.db_pool.clone(),
        };

        tokio::spawn(async move {
            match channel.basic_consume(consumer, args).await {
                Ok(_) => {
                    info!("✅ Lifecycle consumer started successfully");
                    // The channel must outlive the consumer
                    std::future::pending::<()>().await;
                }
                Err(e) => {
                    error!("❌ Failed to start lifecycle consumer: {:?}", e);
                }
            }
        });

        Ok(())
    }
}
