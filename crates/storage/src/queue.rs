//! Redis Streams channels.
//!
//! Each delivery channel (main, fast-path, dead-letter) is one stream. The
//! ingress router appends classified envelopes; station-sync consumes raw
//! payload references from per-origin streams through a consumer group.

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, streams::*, AsyncCommands, Client, RedisError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use ingress::{Channel, RoutedMessage};
use ingress_common::{IngressError, IngressResult};

/// Field holding the serialized envelope or reference.
pub const DATA_FIELD: &str = "data";

const BLOCK_MS: usize = 5000;

/// Stream names for the three delivery channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStreams {
    pub main: String,
    pub fast_path: String,
    pub dead_letter: String,
}

impl Default for ChannelStreams {
    fn default() -> Self {
        Self {
            main: "ingress:main".to_string(),
            fast_path: "ingress:fastline".to_string(),
            dead_letter: "ingress:deadletter".to_string(),
        }
    }
}

impl ChannelStreams {
    pub fn stream_for(&self, channel: Channel) -> &str {
        match channel {
            Channel::Main => &self.main,
            Channel::FastPath => &self.fast_path,
            Channel::DeadLetter => &self.dead_letter,
        }
    }
}

/// Broker side of the ingress router.
#[async_trait]
pub trait ChannelPublisher: Send + Sync {
    /// Append a routed message to its channel. Returns the broker entry id.
    async fn publish(&self, message: &RoutedMessage) -> IngressResult<String>;
}

/// [`ChannelPublisher`] writing to Redis streams.
pub struct RedisChannelPublisher {
    conn: MultiplexedConnection,
    streams: ChannelStreams,
}

impl RedisChannelPublisher {
    pub async fn connect(redis_url: &str, streams: ChannelStreams) -> IngressResult<Self> {
        let conn = connect(redis_url).await?;
        Ok(Self { conn, streams })
    }
}

#[async_trait]
impl ChannelPublisher for RedisChannelPublisher {
    #[instrument(skip(self, message), fields(channel = %message.decision.channel))]
    async fn publish(&self, message: &RoutedMessage) -> IngressResult<String> {
        let stream = self.streams.stream_for(message.decision.channel);

        // Only fields derived from the routing decision are written.
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (field, value) in message.headers.to_fields() {
            cmd.arg(field).arg(value);
        }
        cmd.arg(DATA_FIELD).arg(&message.body);

        let mut conn = self.conn.clone();
        let entry_id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| IngressError::QueueError(format!("Publish to {} failed: {}", stream, e)))?;

        debug!(stream = %stream, entry_id = %entry_id, "Published message");
        Ok(entry_id)
    }
}

/// One entry read from a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDelivery {
    pub stream: String,
    pub entry_id: String,
    /// Contents of the `data` field, if present.
    pub data: Option<String>,
}

/// Position a consumer group reader reads from.
///
/// Entries already delivered to this consumer but never acknowledged are
/// read first, oldest to newest. Once that backlog is empty the reader
/// switches to entries never delivered to the group.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReadCursor {
    Pending(String),
    New,
}

impl ReadCursor {
    fn start() -> Self {
        ReadCursor::Pending("0".to_string())
    }

    fn id(&self) -> &str {
        match self {
            ReadCursor::Pending(id) => id,
            ReadCursor::New => ">",
        }
    }

    fn advance(&mut self, read: Option<&str>) {
        if let ReadCursor::Pending(id) = self {
            match read {
                Some(entry_id) => *id = entry_id.to_string(),
                None => *self = ReadCursor::New,
            }
        }
    }
}

/// Consumer-group reader for one stream.
pub struct StreamConsumer {
    conn: MultiplexedConnection,
    stream: String,
    group: String,
    consumer: String,
    cursor: ReadCursor,
}

impl StreamConsumer {
    /// Connect and create the consumer group if it doesn't exist.
    pub async fn connect(
        redis_url: &str,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> IngressResult<Self> {
        let mut conn = connect(redis_url).await?;
        let stream = stream.into();
        let group = group.into();

        let created: Result<(), RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&stream)
            .arg(&group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        group_created(created, &stream, &group)?;

        Ok(Self {
            conn,
            stream,
            group,
            consumer: consumer.into(),
            cursor: ReadCursor::start(),
        })
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Claim the next entry for this consumer.
    ///
    /// Entries left unacknowledged by an earlier run are redelivered before
    /// new ones. Reading new entries blocks up to five seconds.
    pub async fn claim_next(&mut self) -> IngressResult<Option<StreamDelivery>> {
        if let ReadCursor::Pending(_) = self.cursor {
            let delivery = self.read(false).await?;
            self.cursor
                .advance(delivery.as_ref().map(|d| d.entry_id.as_str()));
            match delivery {
                Some(delivery) => {
                    debug!(stream = %self.stream, entry_id = %delivery.entry_id, "Redelivering pending entry");
                    return Ok(Some(delivery));
                }
                None => info!(stream = %self.stream, "Pending entries drained"),
            }
        }

        self.read(true).await
    }

    async fn read(&mut self, block: bool) -> IngressResult<Option<StreamDelivery>> {
        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1);
        if block {
            opts = opts.block(BLOCK_MS);
        }

        let result: StreamReadReply = self
            .conn
            .xread_options(&[&self.stream], &[self.cursor.id()], &opts)
            .await
            .map_err(|e| IngressError::QueueError(format!("Read failed: {}", e)))?;

        for stream_key in result.keys {
            if let Some(entry) = stream_key.ids.into_iter().next() {
                let data = match entry.map.get(DATA_FIELD) {
                    Some(value) => Some(redis::from_redis_value::<String>(value).map_err(|e| {
                        IngressError::QueueError(format!("Parse failed: {}", e))
                    })?),
                    None => None,
                };
                return Ok(Some(StreamDelivery {
                    stream: stream_key.key,
                    entry_id: entry.id,
                    data,
                }));
            }
        }

        Ok(None)
    }

    /// Acknowledge a processed entry.
    pub async fn ack(&mut self, entry_id: &str) -> IngressResult<()> {
        let _: i64 = self
            .conn
            .xack(&self.stream, &self.group, &[entry_id])
            .await
            .map_err(|e| IngressError::QueueError(format!("Ack failed: {}", e)))?;
        Ok(())
    }
}

/// Outcome of `XGROUP CREATE`. An existing group (`BUSYGROUP`) is fine.
fn group_created(result: Result<(), RedisError>, stream: &str, group: &str) -> IngressResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
        Err(e) => Err(IngressError::QueueError(format!(
            "Failed to create group {} on {}: {}",
            group, stream, e
        ))),
    }
}

async fn connect(redis_url: &str) -> IngressResult<MultiplexedConnection> {
    let client = Client::open(redis_url)
        .map_err(|e| IngressError::QueueError(format!("Redis connection failed: {}", e)))?;

    client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| IngressError::QueueError(format!("Redis connection failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_streams() {
        let streams = ChannelStreams::default();
        assert_eq!(streams.stream_for(Channel::Main), "ingress:main");
        assert_eq!(streams.stream_for(Channel::FastPath), "ingress:fastline");
        assert_eq!(streams.stream_for(Channel::DeadLetter), "ingress:deadletter");
    }

    #[test]
    fn test_streams_from_yaml() {
        let streams: ChannelStreams =
            serde_yaml::from_str("main: a\nfast_path: b\ndead_letter: c\n").unwrap();
        assert_eq!(streams.stream_for(Channel::FastPath), "b");
    }

    #[test]
    fn test_cursor_walks_pending_then_new() {
        let mut cursor = ReadCursor::start();
        assert_eq!(cursor.id(), "0");

        cursor.advance(Some("1700000000000-0"));
        assert_eq!(cursor.id(), "1700000000000-0");

        cursor.advance(None);
        assert_eq!(cursor, ReadCursor::New);
        assert_eq!(cursor.id(), ">");

        cursor.advance(Some("1700000000001-0"));
        assert_eq!(cursor.id(), ">");
    }

    fn server_error(reply: &[u8]) -> RedisError {
        redis::parse_redis_value(reply)
            .unwrap()
            .extract_error()
            .unwrap_err()
    }

    #[test]
    fn test_existing_group_accepted() {
        let busy = server_error(b"-BUSYGROUP Consumer Group name already exists\r\n");
        assert!(group_created(Err(busy), "raw:merano", "station-sync").is_ok());
        assert!(group_created(Ok(()), "raw:merano", "station-sync").is_ok());
    }

    #[test]
    fn test_group_creation_failure_propagated() {
        let wrong_type = server_error(
            b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n",
        );
        let err = group_created(Err(wrong_type), "raw:merano", "station-sync").unwrap_err();
        assert_eq!(err.kind(), "queue");
        assert!(err.to_string().contains("raw:merano"));
    }
}
