//! Line-delimited JSON change events.
//!
//! Each non-blank line holds one serialized [`ChangeEvent`]. Malformed
//! lines are logged and skipped so one bad record cannot stall the feed.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use offering_indexing::ChannelFeed;
use offering_types::ChangeEvent;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

/// Counters for one input stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    /// Lines read, blank ones included
    pub lines: u64,
    /// Events handed to the feed
    pub published: u64,
    /// Lines that did not parse as an event
    pub malformed: u64,
}

/// Publish every event in `reader` until end of input.
pub async fn pump_events<R>(reader: R, feed: &ChannelFeed) -> Result<InputStats, InputError>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = InputStats::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        stats.lines += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<ChangeEvent>(line) {
            Ok(event) => {
                let delivered = feed.publish(event).await;
                debug!(line = stats.lines, delivered, "Published event");
                stats.published += 1;
            }
            Err(e) => {
                warn!(line = stats.lines, error = %e, "Skipping malformed event");
                stats.malformed += 1;
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use offering_indexing::ChangeFeed;
    use offering_types::{AttributeValue, Course, FeedTopic, Offering, Semester};
    use uuid::Uuid;

    fn offering() -> Offering {
        Offering::new(
            Course::new("CS 101", "Intro"),
            Semester::new(2022, "Spring"),
            Uuid::new_v4(),
        )
    }

    fn line(event: &ChangeEvent) -> String {
        serde_json::to_string(event).unwrap()
    }

    #[tokio::test]
    async fn test_pump_publishes_and_skips_malformed() {
        let feed = ChannelFeed::new(16);
        let mut created = feed.subscribe(FeedTopic::Created);
        let mut times = feed.subscribe(FeedTopic::Attribute(offering_types::AttributeKind::Time));

        let o = offering();
        let input = format!(
            "{}\n\n{{not json}}\n{}\n",
            line(&ChangeEvent::OfferingCreated { offering: o.clone() }),
            line(&ChangeEvent::updated(o.clone(), AttributeValue::time("MF", "10:00"))),
        );

        let stats = pump_events(input.as_bytes(), &feed).await.unwrap();
        assert_eq!(
            stats,
            InputStats {
                lines: 4,
                published: 2,
                malformed: 1,
            }
        );

        let event = created.events.recv().await.unwrap();
        assert_eq!(event.offering(), &o);
        assert!(matches!(
            times.events.recv().await.unwrap(),
            ChangeEvent::AttributeUpdated { .. }
        ));
    }

    #[tokio::test]
    async fn test_pump_without_subscribers_still_counts() {
        let feed = ChannelFeed::new(4);
        let input = line(&ChangeEvent::OfferingDeleted { offering: offering() });

        let stats = pump_events(input.as_bytes(), &feed).await.unwrap();
        assert_eq!(stats.lines, 1);
        assert_eq!(stats.published, 1);
        assert_eq!(stats.malformed, 0);
    }
}
