//! Simulated assistant replies.

use std::time::Duration;

use anyhow::Result;
use tracing::debug;

/// Prompts offered to users who don't know where to start.
pub const SUGGESTIONS: [&str; 4] = [
    "Find flights to London next week",
    "Check the weather for my location",
    "Help me shop for noise-cancelling headphones",
    "Schedule a meeting with my team",
];

const WEATHER_REPLY: &str = "Based on your location, it's currently 72°F and sunny with light clouds. The forecast for today shows clear skies with a high of 75°F and a low of 58°F.";

const FLIGHT_REPLY: &str = "I found several flight options from New York to London next week. The best deal seems to be with British Airways departing on Tuesday at 7:30 PM for $650 round trip. Would you like me to provide more details or help with the booking?";

const SHOPPING_REPLY: &str = "I can help you shop for that. Based on your preferences and past purchases, here are some options I've found from trusted retailers with good reviews. Would you like me to narrow down the results based on specific features or price range?";

const MEETING_REPLY: &str = "I've checked your calendar and you appear to be free next Monday afternoon and Wednesday morning. Would you like me to schedule this meeting for one of those times?";

const FALLBACK_REPLY: &str = "I understand you need assistance with this task. Could you provide a bit more detail about what you'd like me to do? I can help with web searches, shopping recommendations, travel bookings, and much more.";

/// Ordered keyword table; the first matching row wins.
const TOPICS: [(&[&str], &str); 4] = [
    (&["weather"], WEATHER_REPLY),
    (&["flight", "book"], FLIGHT_REPLY),
    (&["shop", "buy"], SHOPPING_REPLY),
    (&["schedule", "meeting"], MEETING_REPLY),
];

/// Pick the canned reply for a request by case-insensitive keyword match.
pub fn canned_reply(text: &str) -> &'static str {
    let lowered = text.to_lowercase();
    TOPICS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|keyword| lowered.contains(keyword)))
        .map_or(FALLBACK_REPLY, |(_, reply)| *reply)
}

/// Produces replies after a simulated thinking delay.
#[derive(Debug, Clone)]
pub struct ReplyGenerator {
    delay: Duration,
}

impl ReplyGenerator {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Reply to `text` once the delay has passed.
    ///
    /// # Errors
    /// Returns an error for blank requests.
    pub async fn reply(&self, text: &str) -> Result<String> {
        tokio::time::sleep(self.delay).await;

        if text.trim().is_empty() {
            anyhow::bail!("Nothing to reply to");
        }

        let reply = canned_reply(text);
        debug!("Replying to \"{}\" with {} chars", text, reply.len());
        Ok(reply.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(canned_reply("What's the WEATHER like?"), WEATHER_REPLY);
        assert_eq!(canned_reply("Book a table"), FLIGHT_REPLY);
        assert_eq!(canned_reply("I want to buy shoes"), SHOPPING_REPLY);
        assert_eq!(canned_reply("Set up a Meeting"), MEETING_REPLY);
        assert_eq!(canned_reply("Tell me a joke"), FALLBACK_REPLY);
    }

    #[test]
    fn test_earlier_topics_win() {
        assert_eq!(canned_reply("weather for my flight"), WEATHER_REPLY);
        assert_eq!(canned_reply("book a meeting room"), FLIGHT_REPLY);
        assert_eq!(canned_reply("schedule time to shop"), SHOPPING_REPLY);
    }

    #[test]
    fn test_suggestions_have_replies() {
        assert_eq!(canned_reply(SUGGESTIONS[0]), FLIGHT_REPLY);
        assert_eq!(canned_reply(SUGGESTIONS[1]), WEATHER_REPLY);
        assert_eq!(canned_reply(SUGGESTIONS[2]), SHOPPING_REPLY);
        assert_eq!(canned_reply(SUGGESTIONS[3]), MEETING_REPLY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_waits_for_delay() {
        let generator = ReplyGenerator::new(Duration::from_millis(1500));
        let started = tokio::time::Instant::now();

        let reply = generator.reply("check the weather").await.unwrap();

        assert_eq!(reply, WEATHER_REPLY);
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_request_fails() {
        let generator = ReplyGenerator::new(Duration::from_millis(10));
        assert!(generator.reply("   ").await.is_err());
    }
}
