use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{ Rng, SeedableRng };
use std::sync::Mutex;
use crate::models::chat::ChatMessage;

pub const GREETING: &str = "Hello! How can I help you today?";
pub const GREETING_AGAIN: &str = "Hello again! Continuing our conversation, how can I help you further?";
pub const HOW_ARE_YOU: &str =
    "I'm just a simulated response in your application, but I'm working well! How can I assist you?";
pub const NAME: &str = "I'm Chat Buddy, your friendly chat companion.";
pub const WEATHER: &str =
    "I can't check the real weather as this is a mock response, but I hope it's nice where you are!";
pub const THANKS: &str = "You're welcome! Let me know if there's anything else you need help with.";
pub const GOODBYE: &str = "Goodbye! Feel free to return if you have more questions.";
pub const CLARIFY: &str =
    "Could you please provide a bit more information so I can assist you better?";

pub const DEFAULT_REPLIES: [&str; 3] = [
    "This is a mock response because the application is running without an OpenAI API key. To get real AI responses, please add your API key to the environment variables.",
    "I'm running in demo mode without an OpenAI API key, so this reply is simulated. Add your API key to the environment variables to chat with a real model.",
    "Mock mode is active because no OpenAI API key was found. Set OPENAI_API_KEY in the environment to receive real AI responses.",
];

/// Source of the generator's random choices; injectable for reproducible output.
pub trait RandomSource: Send {
    /// Uniform index in `0..upper`. `upper` is never zero.
    fn pick(&mut self, upper: usize) -> usize;
}

pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn pick(&mut self, upper: usize) -> usize {
        rand::rng().random_range(0..upper)
    }
}

pub struct SeededRandom(StdRng);

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl RandomSource for SeededRandom {
    fn pick(&mut self, upper: usize) -> usize {
        self.0.random_range(0..upper)
    }
}

/// Canned replies used when no upstream credential is configured.
pub struct MockResponder {
    random: Mutex<Box<dyn RandomSource>>,
}

impl Default for MockResponder {
    fn default() -> Self {
        Self::new(Box::new(ThreadRandom))
    }
}

impl MockResponder {
    pub fn new(random: Box<dyn RandomSource>) -> Self {
        Self { random: Mutex::new(random) }
    }

    pub fn seeded(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::new(Box::new(SeededRandom::new(seed))),
            None => Self::default(),
        }
    }

    fn pick(&self, upper: usize) -> usize {
        match self.random.lock() {
            Ok(mut random) => random.pick(upper) % upper,
            // A panicked holder cannot leave the source in a harmful state.
            Err(poisoned) => poisoned.into_inner().pick(upper) % upper,
        }
    }

    /// Keyword checks are case-insensitive substring matches, first match wins.
    pub fn generate(&self, last_user_message: &str, all_messages: &[ChatMessage]) -> String {
        let message = last_user_message.to_lowercase();

        let user_turns: Vec<&str> = all_messages
            .iter()
            .filter(|m| m.is_user())
            .map(|m| m.content.as_str())
            .collect();
        let has_context = user_turns.len() > 1;

        if has_context && message.contains("what") && !message.contains("your") {
            let previous = user_turns[user_turns.len() - 2];
            return format!(
                "Based on our conversation, I think you're asking about \"{}\". Could you clarify what specific information you're looking for?",
                previous
            );
        }

        if message.contains("hello") || message.contains("hi") || message.contains("hey") {
            return if has_context { GREETING_AGAIN } else { GREETING }.to_string();
        }
        if message.contains("how are you") {
            return HOW_ARE_YOU.to_string();
        }
        if message.contains("your name") {
            return NAME.to_string();
        }
        if message.contains("weather") {
            return WEATHER.to_string();
        }
        if message.contains("thank") {
            return THANKS.to_string();
        }
        if message.contains("bye") || message.contains("goodbye") {
            return GOODBYE.to_string();
        }
        if last_user_message.chars().count() < 10 {
            return CLARIFY.to_string();
        }

        let mut reply = if has_context {
            format!(
                "I notice we've been discussing various topics. To respond to \"{}\", I need to tell you that this is a mock response in development mode. To get real AI responses, please add your OpenAI API key to the environment variables.",
                last_user_message
            )
        } else {
            DEFAULT_REPLIES[self.pick(DEFAULT_REPLIES.len())].to_string()
        };

        if all_messages.len() >= 3 {
            let earlier = &user_turns[..user_turns.len().saturating_sub(1)];
            if !earlier.is_empty() {
                let recalled = earlier[self.pick(earlier.len())];
                reply.push_str(&format!(" By the way, earlier you mentioned \"{}\".", recalled));
            }
        }

        reply
    }
}

/// Label for a conversation when no upstream model can name it.
pub fn mock_conversation_name(messages: &[ChatMessage], today: NaiveDate) -> String {
    let first = messages
        .first()
        .map(|m| m.content.to_lowercase())
        .unwrap_or_default();

    if first.contains("hello") || first.contains("hi") || first.contains("hey") {
        "Friendly Greeting".to_string()
    } else if first.contains("help") || first.contains("assist") {
        "Help Request".to_string()
    } else if first.contains("how") && first.contains("you") {
        "Casual Check-in".to_string()
    } else if first.contains("what") || first.contains("who") || first.contains("why") {
        "General Inquiry".to_string()
    } else {
        format!("New Conversation {}", today.format("%-m/%-d/%Y"))
    }
}
