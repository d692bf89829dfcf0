use autostream_core::domain::lead::Slot;
use regex::Regex;

const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";

/// Lowercase alias → canonical platform name. Earlier rows win.
const PLATFORM_ALIASES: &[(&str, &str)] = &[
    ("youtube", "YouTube"),
    ("instagram", "Instagram"),
    ("tiktok", "TikTok"),
    ("tik tok", "TikTok"),
    ("twitch", "Twitch"),
    ("facebook", "Facebook"),
    ("linkedin", "LinkedIn"),
    ("twitter", "Twitter"),
    ("snapchat", "Snapchat"),
    ("pinterest", "Pinterest"),
    ("vimeo", "Vimeo"),
];

pub fn known_platforms() -> Vec<&'static str> {
    let mut platforms = Vec::new();
    for (_, canonical) in PLATFORM_ALIASES {
        if !platforms.contains(canonical) {
            platforms.push(*canonical);
        }
    }
    platforms
}

#[derive(Clone, Debug)]
pub struct SlotExtractor {
    email: Regex,
}

impl SlotExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self { email: Regex::new(EMAIL_PATTERN)? })
    }

    /// Pulls a value for `slot` out of `text`; `None` means re-prompt.
    pub fn extract(&self, slot: Slot, text: &str) -> Option<String> {
        match slot {
            Slot::Email => self.email(text),
            Slot::Platform => platform(text),
            Slot::Name => self.name(text),
        }
    }

    fn email(&self, text: &str) -> Option<String> {
        self.email.find(text).map(|found| found.as_str().to_string())
    }

    fn name(&self, text: &str) -> Option<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() || self.email(trimmed).is_some() || platform(trimmed).is_some() {
            return None;
        }
        Some(trimmed.to_string())
    }
}

fn platform(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    PLATFORM_ALIASES
        .iter()
        .find(|(alias, _)| lowered.contains(alias))
        .map(|(_, canonical)| canonical.to_string())
}
