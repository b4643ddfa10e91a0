//! Turns one inbound chat message into registry mutations and replies.
//!
//! The interpreter is stateless between messages; everything it knows lives
//! in the [`TimezoneRegistry`] and the clock value passed in by the caller.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::info;

use crate::registry::TimezoneRegistry;

/// A user reference embedded in a message. `display` is the platform's
/// mention form and is echoed verbatim in replies.
#[derive(Debug, Clone)]
pub struct Mention {
    pub uid: String,
    pub display: String,
}

/// Transport-independent view of one message event.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub content: String,
    pub author_uid: String,
    pub author_is_self: bool,
    pub mentions: Vec<Mention>,
}

/// Handles one message, returning the replies to send in order.
///
/// Messages from the bot itself and messages that do not start with `!`
/// are ignored, as are unknown verbs.
pub fn handle_message(
    registry: &mut TimezoneRegistry,
    msg: &InboundMessage,
    now: DateTime<Utc>,
) -> Vec<String> {
    if msg.author_is_self {
        return Vec::new();
    }
    let Some(rest) = msg.content.strip_prefix('!') else {
        return Vec::new();
    };
    let (verb, tail) = match rest.split_once(' ') {
        Some((verb, tail)) => (verb, tail.trim()),
        None => (rest, ""),
    };

    match verb {
        "settime" => {
            // The tail still carries the raw mention markup; the zone is
            // its first token.
            let zone_arg = tail.split_whitespace().next().unwrap_or("");
            info!(author = %msg.author_uid, zone = zone_arg, "Received settime");
            settime(registry, &msg.author_uid, &msg.mentions, zone_arg)
        }
        "timefor" => {
            info!(author = %msg.author_uid, mentions = msg.mentions.len(), "Received timefor");
            timefor(registry, &msg.author_uid, &msg.mentions, now)
        }
        _ => Vec::new(),
    }
}

/// Registers a zone for the mentioned users, or for the author when nobody
/// is mentioned. Mentioning others deliberately leaves the author's own
/// entry alone.
fn settime(
    registry: &mut TimezoneRegistry,
    author_uid: &str,
    mentions: &[Mention],
    zone_arg: &str,
) -> Vec<String> {
    let zone = match zone_arg.parse::<Tz>() {
        Ok(zone) => zone,
        Err(e) => return vec![format!("Error setting timezone to [{zone_arg}]: {e}")],
    };
    let canonical = zone.name();

    if mentions.is_empty() {
        registry.set(author_uid, canonical);
        return vec![format!("Set timezone to {canonical}")];
    }

    mentions
        .iter()
        .map(|mention| {
            registry.set(&mention.uid, canonical);
            format!("Set timezone for {} to {canonical}", mention.display)
        })
        .collect()
}

/// Reports the current moment for each mentioned user, rendered through
/// the author's own zone.
fn timefor(
    registry: &TimezoneRegistry,
    author_uid: &str,
    mentions: &[Mention],
    now: DateTime<Utc>,
) -> Vec<String> {
    let Some(author_zone) = registry.get(author_uid) else {
        return vec![
            "It looks like you don't have your own timezone set. \
             Please set one with !settime for the result to be displayed properly"
                .to_string(),
        ];
    };
    let author_tz = match author_zone.parse::<Tz>() {
        Ok(tz) => tz,
        Err(e) => return vec![format!("Error parsing timezone: {e}")],
    };

    let mut replies = Vec::new();
    for mention in mentions {
        let Some(target_zone) = registry.get(&mention.uid) else {
            replies.push(format!(
                "User {} has not set their timezone, set it with !settime",
                mention.display
            ));
            continue;
        };
        let target_tz = match target_zone.parse::<Tz>() {
            Ok(tz) => tz,
            Err(e) => {
                replies.push(format!(
                    "Could not load timezone of user {}: {e}",
                    mention.display
                ));
                continue;
            }
        };
        // The instant is the same everywhere; rendering through the
        // target's zone first keeps the two failure cases distinct.
        let local = now.with_timezone(&target_tz).with_timezone(&author_tz);
        replies.push(format!(
            "From your perspective, the time for user {} is {}",
            mention.display,
            local.format("%-I:%M%P")
        ));
    }
    replies
}
